//! Overlap-aware merging of sequential chunk transcripts.
//!
//! Adjacent chunks share `overlap_secs` of audio, so the tail of one
//! transcript usually reappears at the head of the next. The merge
//! estimates the overlap in tokens, scans the head of each new chunk for
//! the best positional match against the accumulated tail, and skips the
//! matched prefix. When no candidate reaches two matching tokens the new
//! chunk is appended verbatim; the join may then duplicate a word or two,
//! which is the intended trade (duplication is cheap, deletion is not).

use murmur_core::defaults::MERGE_TOKENS_PER_SEC;

/// Minimum matching tokens for an overlap candidate to be trusted.
const MIN_OVERLAP_MATCHES: usize = 2;

/// Merge sequential chunk transcripts into one text.
///
/// A single chunk comes back whitespace-collapsed and trimmed, making the
/// merge idempotent on already-merged input.
pub fn merge_chunks(chunks: &[String], overlap_secs: f64) -> String {
    let mut merged: Vec<String> = Vec::new();

    // Estimated overlap token count.
    let k = (MERGE_TOKENS_PER_SEC * overlap_secs).ceil() as usize;

    for (i, chunk) in chunks.iter().enumerate() {
        let tokens: Vec<String> = chunk.split_whitespace().map(String::from).collect();
        if i == 0 || merged.is_empty() || k == 0 {
            merged.extend(tokens);
            continue;
        }

        let skip = overlap_skip(&merged, &tokens, k);
        merged.extend(tokens.into_iter().skip(skip));
    }

    merged.join(" ").trim().to_string()
}

/// Find how many tokens to skip at the head of the new chunk.
///
/// The normalized last `2k` tokens of the accumulated text are compared
/// against candidate windows starting at positions `0..=3k` of the new
/// chunk. For each candidate start, matching positions between the tail
/// suffix and the new-chunk prefix of length `k` are counted; the best
/// candidate wins and the skip runs to `start + matches`.
fn overlap_skip(merged: &[String], new_tokens: &[String], k: usize) -> usize {
    let tail_len = (2 * k).min(merged.len());
    let tail: Vec<String> = merged[merged.len() - tail_len..]
        .iter()
        .map(|t| normalize(t))
        .collect();
    let new_norm: Vec<String> = new_tokens.iter().map(|t| normalize(t)).collect();

    let suffix_start = tail.len().saturating_sub(k);
    let suffix = &tail[suffix_start..];

    let mut best_matches = 0usize;
    let mut best_index = 0usize;

    let max_start = (3 * k).min(new_norm.len());
    for start in 0..max_start {
        let mut matches = 0usize;
        let window = k.min(suffix.len()).min(new_norm.len() - start);
        for j in 0..window {
            if !suffix[j].is_empty() && suffix[j] == new_norm[start + j] {
                matches += 1;
            }
        }
        if matches > best_matches {
            best_matches = matches;
            best_index = start + matches;
        }
    }

    if best_matches >= MIN_OVERLAP_MATCHES {
        best_index.min(new_tokens.len())
    } else {
        0
    }
}

/// Lowercase with non-alphanumerics stripped, the comparison form.
fn normalize(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Merge with a 1-second overlap, giving k = 3: small enough to build
    /// readable fixtures whose chunk boundaries share exactly k tokens.
    fn merge3(chunks: &[&str]) -> String {
        merge_chunks(
            &chunks.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            1.0,
        )
    }

    #[test]
    fn test_single_chunk_is_trimmed_verbatim() {
        assert_eq!(merge3(&["  hello world  "]), "hello world");
    }

    #[test]
    fn test_single_chunk_collapses_whitespace_runs() {
        assert_eq!(merge3(&["hello\n\nworld  again"]), "hello world again");
    }

    #[test]
    fn test_merge_is_idempotent_on_merged_output() {
        let first = merge3(&["today I walked to the office", "to the office and had lunch"]);
        let second = merge3(&[first.as_str()]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_overlapping_chunks_deduplicate_the_join() {
        let merged = merge3(&["today I walked to the office", "to the office and had lunch"]);
        assert_eq!(merged, "today I walked to the office and had lunch");
    }

    #[test]
    fn test_full_width_overlap_window() {
        // k = ceil(2.5 * 5) = 13 at the default 5s overlap: the previous
        // chunk's last 13 tokens reappear at the head of the next chunk.
        let a = "we wrapped up early and then the meeting ended so we grabbed coffee near the station";
        let b = "early and then the meeting ended so we grabbed coffee near the station before heading home";
        let merged = merge_chunks(&[a.to_string(), b.to_string()], 5.0);
        assert_eq!(
            merged,
            "we wrapped up early and then the meeting ended so we grabbed \
             coffee near the station before heading home"
        );
    }

    #[test]
    fn test_no_overlap_appends_verbatim() {
        let merged = merge3(&[
            "completely different opening words",
            "about totally unrelated closing material",
        ]);
        assert_eq!(
            merged,
            "completely different opening words about totally unrelated closing material"
        );
    }

    #[test]
    fn test_single_matching_token_is_not_trusted() {
        // One positional match is below the threshold: the chunk is
        // appended verbatim, duplicating the shared word. Duplication at
        // the join is the intended trade.
        let merged = merge3(&["we discussed the budget", "discussed something entirely different"]);
        assert_eq!(
            merged,
            "we discussed the budget discussed something entirely different"
        );
    }

    #[test]
    fn test_scan_skips_extra_leading_tokens() {
        // The new chunk opens with one token the previous tail does not
        // end with; the scan finds the aligned window at start 1 and the
        // skip swallows both it and the matched prefix.
        let a = "the meeting ended early so we grabbed Coffee,";
        let b = "so we grabbed coffee and walked back";
        assert_eq!(
            merge3(&[a, b]),
            "the meeting ended early so we grabbed Coffee, and walked back"
        );
    }

    #[test]
    fn test_partial_match_skips_only_matched_length() {
        // Two of three overlap tokens match; the skip runs to
        // start + matches, leaving the mismatched token in place.
        let merged = merge3(&["today I walked to the office", "to the offices and had lunch"]);
        assert_eq!(
            merged,
            "today I walked to the office offices and had lunch"
        );
    }

    #[test]
    fn test_three_chunks_chain() {
        let a = "alpha bravo charlie delta echo";
        let b = "charlie delta echo foxtrot golf hotel";
        let c = "foxtrot golf hotel india juliet";
        assert_eq!(
            merge3(&[a, b, c]),
            "alpha bravo charlie delta echo foxtrot golf hotel india juliet"
        );
    }

    #[test]
    fn test_empty_chunks_are_harmless() {
        assert_eq!(merge3(&["", "hello there world", ""]), "hello there world");
    }

    #[test]
    fn test_case_insensitive_matching_keeps_original_casing() {
        let merged = merge3(&["I spoke with Maria Lopez Garcia", "maria lopez garcia called back later"]);
        assert_eq!(merged, "I spoke with Maria Lopez Garcia called back later");
    }
}
