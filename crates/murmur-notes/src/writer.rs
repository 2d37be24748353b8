//! Note rendering and mutation.
//!
//! `write_note` produces the whole document deterministically from the
//! entry and its inputs. The mutation paths strict-parse the existing
//! file first and splice replacement bodies between the markers,
//! preserving every byte outside them. All writes go through a temp file
//! in the target directory followed by an atomic rename; the returned
//! mtime is the post-rename modification time the store records for
//! drift detection.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

use murmur_core::defaults::JOURNAL_DIR;
use murmur_core::{parse_timezone, Entry, EntryKind, Error, PromptKey, Result};

use crate::markers::{end_marker, start_marker, FLAG_GENERATED, FLAG_IMMUTABLE};
use crate::parser::{parse_strict, Section};

/// Generated-section names with a fixed slot in the template, in
/// document order. Anything else lands after them, sorted by name.
const TEMPLATE_GENERATED_ORDER: &[&str] = &["JOURNAL", "AI_REFLECTION", "SUMMARY"];

/// Writer bound to a vault root.
pub struct NoteWriter {
    vault_root: PathBuf,
}

impl NoteWriter {
    pub fn new(vault_root: impl Into<PathBuf>) -> Self {
        Self {
            vault_root: vault_root.into(),
        }
    }

    /// Note filename: the creation instant projected into the entry's
    /// timezone, plus the kind.
    pub fn note_filename(&self, entry: &Entry) -> Result<String> {
        let tz = parse_timezone(&entry.timezone)?;
        let local = entry.created_at.with_timezone(&tz);
        Ok(format!(
            "{}-{}.md",
            local.format("%Y-%m-%d-%H%M%S"),
            entry.entry_type.as_str()
        ))
    }

    /// Vault-relative path of the entry's note.
    pub fn note_relative_path(&self, entry: &Entry) -> Result<String> {
        Ok(format!("{JOURNAL_DIR}/{}", self.note_filename(entry)?))
    }

    /// Produce the entire document and write it atomically.
    ///
    /// Returns the vault-relative path and the post-rename mtime.
    pub fn write_note(
        &self,
        entry: &Entry,
        transcript: &str,
        generated_sections: &HashMap<String, String>,
        include_audio: bool,
    ) -> Result<(String, DateTime<Utc>)> {
        let rel_path = self.note_relative_path(entry)?;
        let content = self.render_document(entry, transcript, generated_sections, include_audio)?;
        let mtime = atomic_write(&self.vault_root.join(&rel_path), &content)?;
        debug!(path = %rel_path, bytes = content.len(), "Note written");
        Ok((rel_path, mtime))
    }

    /// Replace exactly one section's body. Everything outside the
    /// markers is preserved byte-for-byte.
    pub fn update_note_section(
        &self,
        entry: &Entry,
        name: &str,
        body: &str,
    ) -> Result<DateTime<Utc>> {
        let path = self.note_path(entry)?;
        let content = std::fs::read_to_string(&path)?;
        let sections = parse_strict(&content)?;

        let section = sections
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::NoteFormat(format!("Note has no {name} section")))?;

        let updated = splice(&content, &[(section, body.to_string())]);
        atomic_write(&path, &updated)
    }

    /// Replace several sections at once. Sections not present in the
    /// file are skipped, never invented. The TRANSCRIPT body keeps the
    /// wrapper style already in the file.
    pub fn update_note_content(
        &self,
        entry: &Entry,
        bodies: &HashMap<String, String>,
    ) -> Result<DateTime<Utc>> {
        let path = self.note_path(entry)?;
        let content = std::fs::read_to_string(&path)?;
        let sections = parse_strict(&content)?;

        let mut replacements: Vec<(&Section, String)> = Vec::new();
        for section in &sections {
            let Some(body) = bodies.get(&section.name) else {
                continue;
            };
            let rendered = if section.name == "TRANSCRIPT" {
                if section.body.contains("<details>") {
                    details_wrapper(body)
                } else {
                    plain_transcript(body)
                }
            } else {
                body.clone()
            };
            replacements.push((section, rendered));
        }

        let updated = splice(&content, &replacements);
        atomic_write(&path, &updated)
    }

    /// Read the note to a string, or None when it does not exist.
    pub fn read_note(&self, entry: &Entry) -> Result<Option<String>> {
        let Some(rel) = entry.note_path.as_deref() else {
            return Ok(None);
        };
        match std::fs::read_to_string(self.vault_root.join(rel)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// True when the file's current mtime is strictly newer than the one
    /// recorded at write time: the vault side has been edited.
    pub fn has_external_edits(&self, entry: &Entry) -> Result<bool> {
        let (Some(rel), Some(recorded)) = (entry.note_path.as_deref(), entry.note_mtime) else {
            return Ok(false);
        };
        let metadata = match std::fs::metadata(self.vault_root.join(rel)) {
            Ok(m) => m,
            // A vanished note is the strongest form of drift.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };
        let current: DateTime<Utc> = metadata.modified()?.into();
        Ok(current > recorded)
    }

    fn note_path(&self, entry: &Entry) -> Result<PathBuf> {
        let rel = entry
            .note_path
            .as_deref()
            .ok_or_else(|| Error::InvalidInput("Entry has no written note".to_string()))?;
        Ok(self.vault_root.join(rel))
    }

    fn render_document(
        &self,
        entry: &Entry,
        transcript: &str,
        generated_sections: &HashMap<String, String>,
        include_audio: bool,
    ) -> Result<String> {
        let tz = parse_timezone(&entry.timezone)?;
        let local = entry.created_at.with_timezone(&tz);
        let kind = entry.entry_type.as_str();

        let mut out = String::new();

        // Frontmatter
        out.push_str("---\n");
        out.push_str(&format!("id: {}\n", entry.id));
        out.push_str(&format!(
            "created: {}\n",
            entry.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
        out.push_str(&format!(
            "created_local: {}\n",
            local.to_rfc3339_opts(SecondsFormat::Secs, false)
        ));
        out.push_str(&format!("timezone: {}\n", entry.timezone));
        out.push_str(&format!("entry_date: {}\n", entry.entry_date));
        out.push_str(&format!("type: {kind}\n"));
        if let Some(duration) = entry.audio_duration_secs {
            out.push_str(&format!("audio_duration: {}\n", duration.round() as i64));
        }
        if include_audio {
            if let Some(audio) = entry.original_audio_path.as_deref() {
                out.push_str(&format!("audio_file: {audio}\n"));
            }
        }
        out.push_str(&format!("tags: [journal, {kind}]\n"));
        out.push_str("---\n\n");

        // Title and tag line
        out.push_str(&format!("# {} - {}\n\n", title_for(entry.entry_type), entry.entry_date));
        out.push_str(&format!("#journal #{kind}\n\n"));

        // AUDIO
        if include_audio {
            if let Some(audio) = entry.original_audio_path.as_deref() {
                if let Some(file) = Path::new(audio).file_name().and_then(|f| f.to_str()) {
                    // Notes live in journal/, audio in journal/audio/.
                    let body = format!("[Audio](audio/{file})\n![[audio/{file}]]");
                    emit_section(&mut out, "AUDIO", &[FLAG_IMMUTABLE], &body);
                }
            }
        }

        // Guided prompt answers
        if entry.entry_type == EntryKind::DailyReflection {
            for key in PromptKey::all() {
                if let Some(answer) = entry.prompt_answers.get(key) {
                    let text = answer.effective_text();
                    if !text.is_empty() {
                        emit_section(&mut out, key.section_name(), &[], text);
                    }
                }
            }
        }

        // Generated sections: template slots first, leftovers by name.
        let mut written: Vec<&str> = Vec::new();
        for name in TEMPLATE_GENERATED_ORDER {
            if let Some(body) = generated_sections.get(*name) {
                emit_section(&mut out, name, &[FLAG_GENERATED], body);
                written.push(name);
            }
        }
        let mut extras: Vec<&String> = generated_sections
            .keys()
            .filter(|k| !written.contains(&k.as_str()))
            .collect();
        extras.sort();
        for name in extras {
            emit_section(&mut out, name, &[FLAG_GENERATED], &generated_sections[name]);
        }

        // TRANSCRIPT: always present, always immutable. Primary content
        // for quick notes, collapsed details for the other kinds.
        let transcript_body = match entry.entry_type {
            EntryKind::QuickNote => plain_transcript(transcript),
            _ => details_wrapper(transcript),
        };
        emit_section(&mut out, "TRANSCRIPT", &[FLAG_IMMUTABLE], &transcript_body);

        // RELATED: empty placeholder for future links.
        emit_section(&mut out, "RELATED", &[FLAG_GENERATED], "");

        Ok(out)
    }
}

fn title_for(kind: EntryKind) -> &'static str {
    match kind {
        EntryKind::BrainDump => "Brain Dump",
        EntryKind::DailyReflection => "Daily Reflection",
        EntryKind::QuickNote => "Quick Note",
    }
}

fn plain_transcript(text: &str) -> String {
    format!("## Transcript\n\n{}", text.trim())
}

fn details_wrapper(text: &str) -> String {
    format!(
        "<details>\n<summary>Raw Transcript</summary>\n\n{}\n\n</details>",
        text.trim()
    )
}

/// Append one marker-delimited section block plus a trailing blank line.
fn emit_section(out: &mut String, name: &str, flags: &[&str], body: &str) {
    out.push_str(&start_marker(name, flags));
    out.push('\n');
    let trimmed = body.trim();
    if !trimmed.is_empty() {
        out.push_str(trimmed);
        out.push('\n');
    }
    out.push_str(&end_marker(name));
    out.push_str("\n\n");
}

/// Replace section bodies by byte range, back to front so earlier
/// offsets stay valid.
fn splice(content: &str, replacements: &[(&Section, String)]) -> String {
    let mut ordered: Vec<&(&Section, String)> = replacements.iter().collect();
    ordered.sort_by_key(|(s, _)| std::cmp::Reverse(s.body_start));

    let mut result = content.to_string();
    for (section, body) in ordered {
        let trimmed = body.trim();
        let rendered = if trimmed.is_empty() {
            String::new()
        } else {
            format!("{trimmed}\n")
        };
        result.replace_range(section.body_start..section.body_end, &rendered);
    }
    result
}

/// Temp-file-plus-rename write; returns the post-rename mtime.
fn atomic_write(path: &Path, content: &str) -> Result<DateTime<Utc>> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::InvalidInput(format!("Path has no parent: {}", path.display())))?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;

    let mtime: DateTime<Utc> = std::fs::metadata(path)?.modified()?.into();
    Ok(mtime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn entry(kind: EntryKind) -> Entry {
        Entry {
            id: "abc123def456".into(),
            created_at: DateTime::parse_from_rfc3339("2026-03-14T10:15:00Z")
                .unwrap()
                .with_timezone(&Utc),
            updated_at: Utc::now(),
            timezone: "Europe/Berlin".into(),
            entry_date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            entry_type: kind,
            stage: murmur_core::Stage::Writing,
            stage_message: None,
            error_message: None,
            locked_by: None,
            locked_at: None,
            heartbeat_at: None,
            original_audio_path: Some("journal/audio/abc123def456-original.webm".into()),
            normalized_audio_path: None,
            audio_duration_secs: Some(12.6),
            raw_transcript: None,
            raw_transcript_locked_at: None,
            edited_transcript: None,
            prompt_answers: HashMap::new(),
            generated_sections: HashMap::new(),
            note_path: None,
            note_mtime: None,
        }
    }

    #[test]
    fn test_filename_projects_into_timezone() {
        let writer = NoteWriter::new("/tmp/vault");
        // 10:15 UTC is 11:15 in Berlin in March (CET).
        let name = writer.note_filename(&entry(EntryKind::BrainDump)).unwrap();
        assert_eq!(name, "2026-03-14-111500-brain-dump.md");
    }

    #[test]
    fn test_render_frontmatter_and_tags() {
        let writer = NoteWriter::new("/tmp/vault");
        let doc = writer
            .render_document(&entry(EntryKind::BrainDump), "words", &HashMap::new(), true)
            .unwrap();

        assert!(doc.starts_with("---\n"));
        assert!(doc.contains("id: abc123def456\n"));
        assert!(doc.contains("created: 2026-03-14T10:15:00Z\n"));
        assert!(doc.contains("created_local: 2026-03-14T11:15:00+01:00\n"));
        assert!(doc.contains("timezone: Europe/Berlin\n"));
        assert!(doc.contains("entry_date: 2026-03-14\n"));
        assert!(doc.contains("type: brain-dump\n"));
        assert!(doc.contains("audio_duration: 13\n"));
        assert!(doc.contains("audio_file: journal/audio/abc123def456-original.webm\n"));
        assert!(doc.contains("tags: [journal, brain-dump]\n"));
        assert!(doc.contains("#journal #brain-dump\n"));
    }

    #[test]
    fn test_audio_section_uses_note_relative_paths() {
        let writer = NoteWriter::new("/tmp/vault");
        let doc = writer
            .render_document(&entry(EntryKind::QuickNote), "words", &HashMap::new(), true)
            .unwrap();
        assert!(doc.contains("[Audio](audio/abc123def456-original.webm)"));
        assert!(doc.contains("![[audio/abc123def456-original.webm]]"));
        assert!(doc.contains("<!-- WHISPER_JOURNAL:AUDIO:START immutable -->"));
    }

    #[test]
    fn test_audio_omitted_when_not_kept() {
        let writer = NoteWriter::new("/tmp/vault");
        let doc = writer
            .render_document(&entry(EntryKind::QuickNote), "words", &HashMap::new(), false)
            .unwrap();
        assert!(!doc.contains("WHISPER_JOURNAL:AUDIO"));
        assert!(!doc.contains("audio_file:"));
    }

    #[test]
    fn test_quick_note_transcript_is_primary_content() {
        let writer = NoteWriter::new("/tmp/vault");
        let doc = writer
            .render_document(&entry(EntryKind::QuickNote), "hello world", &HashMap::new(), false)
            .unwrap();
        assert!(doc.contains("<!-- WHISPER_JOURNAL:TRANSCRIPT:START immutable -->\n## Transcript\n\nhello world\n<!-- WHISPER_JOURNAL:TRANSCRIPT:END -->"));
        assert!(!doc.contains("<details>"));
    }

    #[test]
    fn test_other_kinds_wrap_transcript_in_details() {
        let writer = NoteWriter::new("/tmp/vault");
        let doc = writer
            .render_document(&entry(EntryKind::BrainDump), "hello world", &HashMap::new(), false)
            .unwrap();
        assert!(doc.contains("<details>\n<summary>Raw Transcript</summary>\n\nhello world\n\n</details>"));
    }

    #[test]
    fn test_related_placeholder_is_always_written() {
        let writer = NoteWriter::new("/tmp/vault");
        let doc = writer
            .render_document(&entry(EntryKind::QuickNote), "x", &HashMap::new(), false)
            .unwrap();
        assert!(doc.contains(
            "<!-- WHISPER_JOURNAL:RELATED:START generated -->\n<!-- WHISPER_JOURNAL:RELATED:END -->"
        ));
    }

    #[test]
    fn test_generated_sections_in_template_order() {
        let writer = NoteWriter::new("/tmp/vault");
        let mut generated = HashMap::new();
        generated.insert("SUMMARY".to_string(), "short".to_string());
        generated.insert("JOURNAL".to_string(), "long".to_string());
        let doc = writer
            .render_document(&entry(EntryKind::BrainDump), "x", &generated, false)
            .unwrap();
        let journal_pos = doc.find("WHISPER_JOURNAL:JOURNAL:START").unwrap();
        let summary_pos = doc.find("WHISPER_JOURNAL:SUMMARY:START").unwrap();
        assert!(journal_pos < summary_pos);
    }

    #[test]
    fn test_reflection_prompt_sections() {
        let writer = NoteWriter::new("/tmp/vault");
        let mut e = entry(EntryKind::DailyReflection);
        e.prompt_answers.insert(
            PromptKey::Gratitude,
            murmur_core::PromptAnswer {
                text: "I'm grateful for coffee".into(),
                ..Default::default()
            },
        );
        let doc = writer
            .render_document(&e, "x", &HashMap::new(), false)
            .unwrap();
        assert!(doc.contains("<!-- WHISPER_JOURNAL:GRATITUDE:START -->\nI'm grateful for coffee\n<!-- WHISPER_JOURNAL:GRATITUDE:END -->"));
        // Unanswered prompts get no section.
        assert!(!doc.contains("WHISPER_JOURNAL:CHALLENGES"));
    }
}
