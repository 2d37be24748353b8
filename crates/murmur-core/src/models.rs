//! Core data models for murmur.
//!
//! These types are shared across all murmur crates and represent the
//! central domain entities: journal entries, their pipeline stages, prompt
//! answers, and entry links.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// ENTRY KIND
// =============================================================================

/// The kind of journal entry, which determines the pipeline shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// Free-form voice note; the LLM produces a structured journal body.
    #[serde(rename = "brain-dump")]
    BrainDump,
    /// Voice plus four guided prompt answers; the LLM produces a short
    /// reflection paragraph.
    #[serde(rename = "daily-reflection")]
    DailyReflection,
    /// Transcript only, no LLM involvement.
    #[serde(rename = "quick-note")]
    QuickNote,
}

impl EntryKind {
    /// Stable string form used in the database, filenames, and note tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BrainDump => "brain-dump",
            Self::DailyReflection => "daily-reflection",
            Self::QuickNote => "quick-note",
        }
    }

    /// Parse from the stable string form.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "brain-dump" => Ok(Self::BrainDump),
            "daily-reflection" => Ok(Self::DailyReflection),
            "quick-note" => Ok(Self::QuickNote),
            other => Err(Error::InvalidInput(format!("Unknown entry type: {other}"))),
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// STAGE MACHINE
// =============================================================================

/// A value of the entry state machine.
///
/// ```text
/// pending ──(audio uploaded)──► queued ──► normalizing ──► transcribing
///   ──► awaiting_review ──(continue)──► [awaiting_prompts ──(continue)──►]
///   generating ──► writing ──► completed
/// ```
///
/// `cancel_requested` is entered from any cancellable stage and always
/// resolves to `cancelled`. Terminal stages are `completed`, `failed`,
/// and `cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Queued,
    Normalizing,
    Transcribing,
    AwaitingReview,
    AwaitingPrompts,
    Generating,
    Writing,
    CancelRequested,
    Completed,
    Failed,
    Cancelled,
}

impl Stage {
    /// Stable string form used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Normalizing => "normalizing",
            Self::Transcribing => "transcribing",
            Self::AwaitingReview => "awaiting_review",
            Self::AwaitingPrompts => "awaiting_prompts",
            Self::Generating => "generating",
            Self::Writing => "writing",
            Self::CancelRequested => "cancel_requested",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from the stable string form.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "normalizing" => Ok(Self::Normalizing),
            "transcribing" => Ok(Self::Transcribing),
            "awaiting_review" => Ok(Self::AwaitingReview),
            "awaiting_prompts" => Ok(Self::AwaitingPrompts),
            "generating" => Ok(Self::Generating),
            "writing" => Ok(Self::Writing),
            "cancel_requested" => Ok(Self::CancelRequested),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::InvalidInput(format!("Unknown stage: {other}"))),
        }
    }

    /// Terminal stages never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Stages in which the worker is actively executing a stage body.
    /// A stale heartbeat in one of these marks the entry as stuck.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            Self::Normalizing | Self::Transcribing | Self::Generating | Self::Writing
        )
    }

    /// Stages from which a cancel request is accepted.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            Self::Queued | Self::Normalizing | Self::Transcribing | Self::Generating | Self::Writing
        )
    }

    /// Stages where the pipeline is parked waiting for user input.
    pub fn is_awaiting(&self) -> bool {
        matches!(self, Self::AwaitingReview | Self::AwaitingPrompts)
    }

    /// Progress window for this stage on a 0-100 scale. Clients display
    /// the start of the window.
    pub fn progress_range(&self) -> (u8, u8) {
        match self {
            Self::Pending => (0, 0),
            Self::Queued => (0, 5),
            Self::Normalizing => (5, 15),
            Self::Transcribing => (15, 60),
            Self::AwaitingReview | Self::AwaitingPrompts => (60, 60),
            Self::Generating => (60, 90),
            Self::Writing => (90, 100),
            Self::Completed => (100, 100),
            Self::CancelRequested | Self::Failed | Self::Cancelled => (0, 0),
        }
    }

    /// The progress value a client displays for this stage.
    pub fn overall_progress(&self) -> u8 {
        self.progress_range().0
    }

    /// All stages whose stale heartbeats the recovery pass scans for.
    pub fn running_stages() -> &'static [Stage] {
        &[
            Self::Normalizing,
            Self::Transcribing,
            Self::Generating,
            Self::Writing,
        ]
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse grouping of stages used by search filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageClass {
    /// Anything not terminal.
    Active,
    /// Completed entries.
    Done,
    /// Failed or cancelled entries.
    Failed,
}

impl StageClass {
    /// Parse from the query-string form.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidInput(format!("Unknown status class: {other}"))),
        }
    }

    /// The concrete stages this class matches. `Active` is open-ended
    /// (everything except the terminal set), so it is expressed as the
    /// excluded terminal list instead.
    pub fn matches(&self, stage: Stage) -> bool {
        match self {
            Self::Active => !stage.is_terminal(),
            Self::Done => stage == Stage::Completed,
            Self::Failed => matches!(stage, Stage::Failed | Stage::Cancelled),
        }
    }
}

// =============================================================================
// PROMPT ANSWERS
// =============================================================================

/// Keys of the four guided daily-reflection prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptKey {
    Gratitude,
    Accomplishments,
    Challenges,
    Tomorrow,
}

impl PromptKey {
    /// All prompt keys in presentation order.
    pub fn all() -> &'static [PromptKey] {
        &[
            Self::Gratitude,
            Self::Accomplishments,
            Self::Challenges,
            Self::Tomorrow,
        ]
    }

    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gratitude => "gratitude",
            Self::Accomplishments => "accomplishments",
            Self::Challenges => "challenges",
            Self::Tomorrow => "tomorrow",
        }
    }

    /// The section name this prompt's answer is written under.
    pub fn section_name(&self) -> &'static str {
        match self {
            Self::Gratitude => "GRATITUDE",
            Self::Accomplishments => "ACCOMPLISHMENTS",
            Self::Challenges => "CHALLENGES",
            Self::Tomorrow => "TOMORROW",
        }
    }

    /// Human-readable question shown to the user and echoed into prompts.
    pub fn question(&self) -> &'static str {
        match self {
            Self::Gratitude => "What are you grateful for today?",
            Self::Accomplishments => "What did you accomplish today?",
            Self::Challenges => "What challenged you today?",
            Self::Tomorrow => "What is your focus for tomorrow?",
        }
    }
}

impl std::fmt::Display for PromptKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's answer to one guided prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptAnswer {
    /// The typed answer text.
    #[serde(default)]
    pub text: String,
    /// Text extracted from the main transcript for this prompt, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    /// Transcript of a per-prompt audio answer, if one was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_transcript: Option<String>,
}

impl PromptAnswer {
    /// The effective text for generation: the typed answer, falling back
    /// to extracted text, falling back to the per-prompt transcript.
    pub fn effective_text(&self) -> &str {
        if !self.text.trim().is_empty() {
            return self.text.trim();
        }
        if let Some(ref t) = self.extracted_text {
            if !t.trim().is_empty() {
                return t.trim();
            }
        }
        if let Some(ref t) = self.audio_transcript {
            if !t.trim().is_empty() {
                return t.trim();
            }
        }
        ""
    }
}

/// Mapping from prompt key to answer, as stored on the entry.
pub type PromptAnswers = HashMap<PromptKey, PromptAnswer>;

// =============================================================================
// ENTRY
// =============================================================================

/// A journal entry, the central entity of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Opaque collision-free short token.
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// IANA timezone name the entry belongs to.
    pub timezone: String,
    /// Local calendar date of the entry; user-adjustable until writing
    /// begins.
    pub entry_date: NaiveDate,

    pub entry_type: EntryKind,
    pub stage: Stage,
    /// Human-readable description of what the pipeline is doing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_message: Option<String>,
    /// Populated when the entry fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    // Worker lease
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_at: Option<DateTime<Utc>>,

    // Audio, vault-relative paths
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_audio_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_audio_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_duration_secs: Option<f64>,

    // Transcript
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_transcript: Option<String>,
    /// Set the first time `raw_transcript` is persisted; the column is
    /// immutable afterwards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_transcript_locked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_transcript: Option<String>,

    /// Guided prompt answers (daily-reflection).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub prompt_answers: PromptAnswers,
    /// LLM-generated sections by section name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub generated_sections: HashMap<String, String>,

    // Output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note_path: Option<String>,
    /// Modification time of the note immediately after the writer's atomic
    /// rename. A later observed mtime means external edits happened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note_mtime: Option<DateTime<Utc>>,
}

impl Entry {
    /// The transcript a downstream stage should consume: the user-edited
    /// form when present, otherwise the raw transcript.
    pub fn effective_transcript(&self) -> &str {
        match (&self.edited_transcript, &self.raw_transcript) {
            (Some(edited), _) if !edited.trim().is_empty() => edited,
            (_, Some(raw)) => raw,
            _ => "",
        }
    }
}

/// Request payload for creating an entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEntryRequest {
    pub entry_type: EntryKind,
    /// Defaults to today in the entry's timezone.
    #[serde(default)]
    pub entry_date: Option<NaiveDate>,
    /// Defaults to the configured default timezone.
    #[serde(default)]
    pub timezone: Option<String>,
}

// =============================================================================
// LINKS
// =============================================================================

/// Relation type of a directed edge between two entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Related,
    Followup,
    Reference,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Related => "related",
            Self::Followup => "followup",
            Self::Reference => "reference",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "related" => Ok(Self::Related),
            "followup" => Ok(Self::Followup),
            "reference" => Ok(Self::Reference),
            other => Err(Error::InvalidInput(format!("Unknown link type: {other}"))),
        }
    }
}

/// A directed, typed edge between two entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryLink {
    pub source_id: String,
    pub target_id: String,
    pub link_type: LinkType,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// SEARCH
// =============================================================================

/// Parsed search request.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    /// Bare term; whitespace-split, each token prefix-matched, AND'ed.
    pub query: Option<String>,
    pub entry_type: Option<EntryKind>,
    pub status: Option<StageClass>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub limit: i64,
    pub offset: i64,
}

/// Paginated search results.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub entries: Vec<Entry>,
    pub total: i64,
    pub has_more: bool,
}

// =============================================================================
// TIMEZONE HELPERS
// =============================================================================

/// Validate an IANA timezone name, returning the parsed zone.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| Error::InvalidInput(format!("Invalid timezone: {name}")))
}

/// Today's calendar date in the given IANA timezone.
pub fn local_date_in(tz: &Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(tz).date_naive()
}
