//! Section marker grammar.
//!
//! Sections are delimited by literal HTML comments:
//!
//! ```text
//! <!-- WHISPER_JOURNAL:NAME:START flag1 flag2 -->
//! body
//! <!-- WHISPER_JOURNAL:NAME:END -->
//! ```
//!
//! NAME is uppercase alphanumerics plus underscore. Flags are
//! space-separated tokens on the START line; `immutable` and `generated`
//! are recognized, unknown flags are preserved but ignored. The marker
//! text is compatibility-critical: notes written by earlier versions of
//! the vault must keep round-tripping.

use once_cell::sync::Lazy;
use regex::Regex;

/// Marker namespace prefix.
pub const MARKER_PREFIX: &str = "WHISPER_JOURNAL";

/// Flag marking a section that automated rewrites must not alter.
pub const FLAG_IMMUTABLE: &str = "immutable";

/// Flag marking LLM-produced content that is safe to regenerate.
pub const FLAG_GENERATED: &str = "generated";

static MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*<!--\s*WHISPER_JOURNAL:([A-Z0-9_]+):(START|END)\s*(.*?)\s*-->\s*$")
        .expect("marker regex is valid")
});

/// A recognized marker line.
#[derive(Debug, Clone, PartialEq)]
pub enum Marker {
    Start { name: String, flags: Vec<String> },
    End { name: String },
}

/// Parse a single line as a marker, if it is one.
pub fn parse_marker(line: &str) -> Option<Marker> {
    let caps = MARKER_RE.captures(line)?;
    let name = caps[1].to_string();
    match &caps[2] {
        "START" => {
            let flags = caps[3]
                .split_whitespace()
                .map(String::from)
                .collect::<Vec<_>>();
            Some(Marker::Start { name, flags })
        }
        "END" => Some(Marker::End { name }),
        _ => unreachable!("regex only matches START|END"),
    }
}

/// Render a START marker line.
pub fn start_marker(name: &str, flags: &[&str]) -> String {
    if flags.is_empty() {
        format!("<!-- {MARKER_PREFIX}:{name}:START -->")
    } else {
        format!("<!-- {MARKER_PREFIX}:{name}:START {} -->", flags.join(" "))
    }
}

/// Render an END marker line.
pub fn end_marker(name: &str) -> String {
    format!("<!-- {MARKER_PREFIX}:{name}:END -->")
}
