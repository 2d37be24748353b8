//! Hallucination detection for speech-tool output.
//!
//! Whisper-family tools occasionally emit pathological text: nothing at
//! all, far too little for the audio length, a short phrase looping, or a
//! single token dominating the output. Each rule reports a confidence and
//! a reason; rules are evaluated in confidence order so the strongest
//! signal names the flag.

use std::collections::HashMap;

use murmur_core::defaults::CHARS_PER_SEC_BASELINE;

/// A raised hallucination flag.
#[derive(Debug, Clone, PartialEq)]
pub struct HallucinationFlag {
    pub confidence: f64,
    pub reason: String,
}

/// Fraction of the expected character baseline below which output counts
/// as under-produced.
const UNDER_PRODUCTION_RATIO: f64 = 0.3;

/// Phrase-loop detection: a phrase of up to this many tokens...
const LOOP_MAX_PHRASE_TOKENS: usize = 12;
/// ...repeating back-to-back at least this many times.
const LOOP_MIN_REPEATS: usize = 3;

/// Dominant-token detection thresholds.
const DOMINANT_MIN_TOKEN_LEN: usize = 3;
const DOMINANT_MIN_COUNT: usize = 10;
const DOMINANT_RATIO: f64 = 0.2;

/// Check a chunk's transcript against its audio duration.
///
/// Returns the strongest flag raised, or None when the text looks sane.
pub fn check_hallucination(text: &str, chunk_secs: f64) -> Option<HallucinationFlag> {
    let trimmed = text.trim();

    // Empty output (confidence 1.0).
    if trimmed.is_empty() {
        return Some(HallucinationFlag {
            confidence: 1.0,
            reason: "empty transcription".to_string(),
        });
    }

    // Phrase loop (confidence 0.95) outranks under-production, so a short
    // looping chunk is reported as repetition rather than length.
    if let Some(reason) = detect_phrase_loop(trimmed) {
        return Some(HallucinationFlag {
            confidence: 0.95,
            reason,
        });
    }

    // Under-production against the speech-density baseline (confidence 0.8).
    let expected = UNDER_PRODUCTION_RATIO * CHARS_PER_SEC_BASELINE * chunk_secs;
    if (trimmed.len() as f64) < expected {
        return Some(HallucinationFlag {
            confidence: 0.8,
            reason: format!(
                "under-production: {} chars for {:.0}s of audio (expected at least {:.0})",
                trimmed.len(),
                chunk_secs,
                expected
            ),
        });
    }

    // Dominant token (confidence 0.7).
    if let Some(reason) = detect_dominant_token(trimmed) {
        return Some(HallucinationFlag {
            confidence: 0.7,
            reason,
        });
    }

    None
}

/// Scan for a phrase of 1..=12 tokens repeating at least three times
/// back-to-back, case-insensitive. Short loops are the most common
/// whisper failure mode ("thank you. thank you. thank you."), so the
/// phrase window starts at a single token.
fn detect_phrase_loop(text: &str) -> Option<String> {
    let tokens: Vec<String> = text
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect();

    for phrase_len in 1..=LOOP_MAX_PHRASE_TOKENS.min(tokens.len() / LOOP_MIN_REPEATS) {
        for start in 0..tokens.len().saturating_sub(phrase_len * LOOP_MIN_REPEATS - 1) {
            let phrase = &tokens[start..start + phrase_len];
            let mut repeats = 1;
            let mut pos = start + phrase_len;
            while pos + phrase_len <= tokens.len() && &tokens[pos..pos + phrase_len] == phrase {
                repeats += 1;
                pos += phrase_len;
            }
            if repeats >= LOOP_MIN_REPEATS {
                return Some(format!(
                    "repetition: phrase {:?} repeats {} times back-to-back",
                    phrase.join(" "),
                    repeats
                ));
            }
        }
    }
    None
}

/// Scan for a single normalized token of length > 2 accounting for more
/// than 20% of all tokens with more than 10 occurrences.
fn detect_dominant_token(text: &str) -> Option<String> {
    let tokens: Vec<String> = text
        .split_whitespace()
        .map(normalize_token)
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        return None;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for token in &tokens {
        *counts.entry(token.as_str()).or_default() += 1;
    }

    for (token, count) in counts {
        if token.len() >= DOMINANT_MIN_TOKEN_LEN
            && count > DOMINANT_MIN_COUNT
            && (count as f64) / (tokens.len() as f64) > DOMINANT_RATIO
        {
            return Some(format!(
                "dominant token: {token:?} accounts for {count} of {} tokens",
                tokens.len()
            ));
        }
    }
    None
}

fn normalize_token(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}
