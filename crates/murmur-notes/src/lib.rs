//! # murmur-notes
//!
//! Structured-section Markdown documents for the vault. A note is YAML
//! frontmatter, a title, and a series of marker-delimited sections that
//! survive partial rewrites: the parser recovers each section's exact
//! byte geometry, and the writer splices new bodies between the markers
//! without disturbing anything the user wrote around them.

pub mod markers;
pub mod parser;
pub mod writer;

pub use markers::{end_marker, parse_marker, start_marker, Marker, FLAG_GENERATED, FLAG_IMMUTABLE};
pub use parser::{parse, parse_strict, ParseError, ParseErrorKind, ParsedDocument, Section};
pub use writer::NoteWriter;
