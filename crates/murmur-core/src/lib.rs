//! # murmur-core
//!
//! Shared domain models, error types, settings, and default constants for
//! the murmur voice-journal pipeline. Every other crate in the workspace
//! depends on this one and nothing here depends on the rest of the
//! workspace.

pub mod defaults;
pub mod error;
pub mod id;
pub mod models;
pub mod settings;

pub use error::{Error, Result};
pub use id::{is_valid_id, new_entry_id};
pub use models::{
    local_date_in, parse_timezone, CreateEntryRequest, Entry, EntryKind, EntryLink, LinkType,
    PromptAnswer, PromptAnswers, PromptKey, SearchRequest, SearchResponse, Stage, StageClass,
};
pub use settings::{setting_type, SettingType, Settings, SettingsPatch, SETTING_KEYS};
