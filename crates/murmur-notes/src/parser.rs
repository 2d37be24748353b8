//! Line-scan parser for structured-section documents.
//!
//! The parser collects errors instead of throwing so a damaged document
//! can still be inspected; the strict variant fails whenever any error
//! was collected, which is what every mutation path uses before touching
//! a user-edited file.

use murmur_core::{Error, Result};

use crate::markers::{parse_marker, Marker, FLAG_GENERATED, FLAG_IMMUTABLE};

/// A parsed section with its exact byte geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub name: String,
    /// Body text between the markers, trimmed.
    pub body: String,
    /// Flags from the START line, verbatim order.
    pub flags: Vec<String>,
    /// Line numbers (0-based) of the START and END marker lines.
    pub start_line: usize,
    pub end_line: usize,
    /// Byte offset just past the START marker line (including its
    /// newline): where the raw body begins.
    pub body_start: usize,
    /// Byte offset of the first byte of the END marker line: where the
    /// raw body ends.
    pub body_end: usize,
}

impl Section {
    pub fn is_immutable(&self) -> bool {
        self.flags.iter().any(|f| f == FLAG_IMMUTABLE)
    }

    pub fn is_generated(&self) -> bool {
        self.flags.iter().any(|f| f == FLAG_GENERATED)
    }
}

/// Kinds of structural damage the scanner can find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    MissingEnd,
    MissingStart,
    InvalidNesting,
    DuplicateSection,
}

impl ParseErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingEnd => "missing_end",
            Self::MissingStart => "missing_start",
            Self::InvalidNesting => "invalid_nesting",
            Self::DuplicateSection => "duplicate_section",
        }
    }
}

/// One collected parse error.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub name: String,
    /// 0-based line of the offending marker (or of EOF for missing_end).
    pub line: usize,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} for section {} at line {}",
            self.kind.as_str(),
            self.name,
            self.line + 1
        )
    }
}

/// Result of a lenient parse.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub sections: Vec<Section>,
    pub errors: Vec<ParseError>,
}

impl ParsedDocument {
    /// Find a section by name.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }
}

struct OpenFrame {
    name: String,
    flags: Vec<String>,
    start_line: usize,
    body_start: usize,
}

/// Scan a document, collecting sections and structural errors.
pub fn parse(content: &str) -> ParsedDocument {
    let mut doc = ParsedDocument::default();
    let mut open: Vec<OpenFrame> = Vec::new();
    let mut seen: Vec<String> = Vec::new();

    let mut offset = 0usize;
    let mut line_no = 0usize;

    for line in content.split_inclusive('\n') {
        let line_len = line.len();
        let trimmed_line = line.strip_suffix('\n').unwrap_or(line);

        match parse_marker(trimmed_line) {
            Some(Marker::Start { name, flags }) => {
                if open.iter().any(|f| f.name == name) {
                    doc.errors.push(ParseError {
                        kind: ParseErrorKind::InvalidNesting,
                        name,
                        line: line_no,
                    });
                } else if seen.contains(&name) {
                    doc.errors.push(ParseError {
                        kind: ParseErrorKind::DuplicateSection,
                        name,
                        line: line_no,
                    });
                } else {
                    open.push(OpenFrame {
                        name,
                        flags,
                        start_line: line_no,
                        body_start: offset + line_len,
                    });
                }
            }
            Some(Marker::End { name }) => {
                match open.iter().rposition(|f| f.name == name) {
                    Some(pos) => {
                        let frame = open.remove(pos);
                        let body_end = offset;
                        doc.sections.push(Section {
                            body: content[frame.body_start..body_end].trim().to_string(),
                            name: frame.name.clone(),
                            flags: frame.flags,
                            start_line: frame.start_line,
                            end_line: line_no,
                            body_start: frame.body_start,
                            body_end,
                        });
                        seen.push(frame.name);
                    }
                    None => {
                        doc.errors.push(ParseError {
                            kind: ParseErrorKind::MissingStart,
                            name,
                            line: line_no,
                        });
                    }
                }
            }
            None => {}
        }

        offset += line_len;
        line_no += 1;
    }

    for frame in open {
        doc.errors.push(ParseError {
            kind: ParseErrorKind::MissingEnd,
            name: frame.name,
            line: line_no,
        });
    }

    // Present sections in document order.
    doc.sections.sort_by_key(|s| s.start_line);
    doc
}

/// Parse, failing when any structural error was collected.
pub fn parse_strict(content: &str) -> Result<Vec<Section>> {
    let doc = parse(content);
    if doc.errors.is_empty() {
        Ok(doc.sections)
    } else {
        let detail = doc
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Err(Error::NoteFormat(format!(
            "Document has damaged section markers: {detail}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = "\
# Title

<!-- WHISPER_JOURNAL:JOURNAL:START generated -->
body line one
body line two
<!-- WHISPER_JOURNAL:JOURNAL:END -->

<!-- WHISPER_JOURNAL:TRANSCRIPT:START immutable -->
raw words
<!-- WHISPER_JOURNAL:TRANSCRIPT:END -->
";

    #[test]
    fn test_parse_simple_document() {
        let doc = parse(SIMPLE);
        assert!(doc.errors.is_empty());
        assert_eq!(doc.sections.len(), 2);

        let journal = doc.section("JOURNAL").unwrap();
        assert_eq!(journal.body, "body line one\nbody line two");
        assert!(journal.is_generated());
        assert!(!journal.is_immutable());

        let transcript = doc.section("TRANSCRIPT").unwrap();
        assert_eq!(transcript.body, "raw words");
        assert!(transcript.is_immutable());
    }

    #[test]
    fn test_body_byte_ranges_are_exact() {
        let doc = parse(SIMPLE);
        let journal = doc.section("JOURNAL").unwrap();
        assert_eq!(
            &SIMPLE[journal.body_start..journal.body_end],
            "body line one\nbody line two\n"
        );
    }

    #[test]
    fn test_empty_section_body() {
        let content = "<!-- WHISPER_JOURNAL:RELATED:START generated -->\n<!-- WHISPER_JOURNAL:RELATED:END -->\n";
        let doc = parse(content);
        assert!(doc.errors.is_empty());
        let related = doc.section("RELATED").unwrap();
        assert_eq!(related.body, "");
        assert_eq!(related.body_start, related.body_end);
    }

    #[test]
    fn test_missing_end_collected() {
        let content = "<!-- WHISPER_JOURNAL:JOURNAL:START -->\nbody\n";
        let doc = parse(content);
        assert_eq!(doc.errors.len(), 1);
        assert_eq!(doc.errors[0].kind, ParseErrorKind::MissingEnd);
        assert_eq!(doc.errors[0].name, "JOURNAL");
    }

    #[test]
    fn test_missing_start_collected() {
        let content = "body\n<!-- WHISPER_JOURNAL:JOURNAL:END -->\n";
        let doc = parse(content);
        assert_eq!(doc.errors.len(), 1);
        assert_eq!(doc.errors[0].kind, ParseErrorKind::MissingStart);
    }

    #[test]
    fn test_invalid_nesting_collected() {
        let content = "\
<!-- WHISPER_JOURNAL:JOURNAL:START -->
<!-- WHISPER_JOURNAL:JOURNAL:START -->
<!-- WHISPER_JOURNAL:JOURNAL:END -->
";
        let doc = parse(content);
        assert!(doc
            .errors
            .iter()
            .any(|e| e.kind == ParseErrorKind::InvalidNesting));
    }

    #[test]
    fn test_duplicate_section_collected() {
        let content = "\
<!-- WHISPER_JOURNAL:SUMMARY:START -->
a
<!-- WHISPER_JOURNAL:SUMMARY:END -->
<!-- WHISPER_JOURNAL:SUMMARY:START -->
b
<!-- WHISPER_JOURNAL:SUMMARY:END -->
";
        let doc = parse(content);
        assert!(doc
            .errors
            .iter()
            .any(|e| e.kind == ParseErrorKind::DuplicateSection));
        // The first occurrence still parses.
        assert_eq!(doc.section("SUMMARY").unwrap().body, "a");
    }

    #[test]
    fn test_unknown_flags_are_preserved() {
        let content = "<!-- WHISPER_JOURNAL:AUDIO:START immutable shiny -->\nx\n<!-- WHISPER_JOURNAL:AUDIO:END -->\n";
        let doc = parse(content);
        let audio = doc.section("AUDIO").unwrap();
        assert_eq!(audio.flags, vec!["immutable", "shiny"]);
        assert!(audio.is_immutable());
    }

    #[test]
    fn test_strict_parse_fails_on_any_error() {
        assert!(parse_strict(SIMPLE).is_ok());
        let damaged = "<!-- WHISPER_JOURNAL:JOURNAL:START -->\nbody\n";
        let err = parse_strict(damaged).unwrap_err();
        assert!(err.to_string().contains("missing_end"));
    }

    #[test]
    fn test_document_without_final_newline() {
        let content = "<!-- WHISPER_JOURNAL:SUMMARY:START -->\nbody\n<!-- WHISPER_JOURNAL:SUMMARY:END -->";
        let doc = parse(content);
        assert!(doc.errors.is_empty());
        assert_eq!(doc.section("SUMMARY").unwrap().body, "body");
    }
}
