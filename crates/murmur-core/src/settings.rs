//! Process-wide settings backed by the store's key/value table.
//!
//! Values are persisted as strings and decoded per-read through a fixed
//! key → type map; callers only ever see the typed [`Settings`] surface.
//! HTTP exposes camelCase field names; the database keys are snake_case,
//! and the mapping between them is fixed by the serde attributes here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Error, Result};

/// Value type of a settings key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingType {
    String,
    Integer,
    Boolean,
}

/// Fixed key → type map. Every persisted key appears here; unknown keys
/// are rejected on write.
pub const SETTING_KEYS: &[(&str, SettingType)] = &[
    ("vault_path", SettingType::String),
    ("whisper_model", SettingType::String),
    ("whisper_model_path", SettingType::String),
    ("transcription_prompt", SettingType::String),
    ("llm_base_url", SettingType::String),
    ("llm_model", SettingType::String),
    ("keep_audio", SettingType::Boolean),
    ("default_timezone", SettingType::String),
    ("user_name", SettingType::String),
    ("vad_enabled", SettingType::Boolean),
    ("vad_model_path", SettingType::String),
    ("chunk_duration_secs", SettingType::Integer),
];

/// Look up the declared type of a key.
pub fn setting_type(key: &str) -> Option<SettingType> {
    SETTING_KEYS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, t)| *t)
}

/// Typed view of the settings table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Root of the Obsidian-style vault that receives notes and audio.
    pub vault_path: String,
    /// Whisper model name (resolved against the models directory).
    pub whisper_model: String,
    /// Explicit path to a model file, overriding name resolution.
    pub whisper_model_path: Option<String>,
    /// Optional priming text passed to the speech tool as initial prompt.
    pub transcription_prompt: Option<String>,
    pub llm_base_url: String,
    pub llm_model: String,
    /// Keep source and normalized audio after completion.
    pub keep_audio: bool,
    pub default_timezone: String,
    pub user_name: String,
    pub vad_enabled: bool,
    pub vad_model_path: Option<String>,
    pub chunk_duration_secs: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vault_path: String::new(),
            whisper_model: "base.en".to_string(),
            whisper_model_path: None,
            transcription_prompt: None,
            llm_base_url: defaults::LLM_BASE_URL.to_string(),
            llm_model: defaults::LLM_MODEL.to_string(),
            keep_audio: true,
            default_timezone: "UTC".to_string(),
            user_name: String::new(),
            vad_enabled: false,
            vad_model_path: None,
            chunk_duration_secs: defaults::CHUNK_DURATION_SECS as u32,
        }
    }
}

impl Settings {
    /// Decode from the raw key/value rows. Missing keys fall back to
    /// defaults; malformed typed values are configuration errors.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        let mut settings = Self::default();

        for (key, value) in map {
            match key.as_str() {
                "vault_path" => settings.vault_path = value.clone(),
                "whisper_model" => settings.whisper_model = value.clone(),
                "whisper_model_path" => settings.whisper_model_path = non_empty(value),
                "transcription_prompt" => settings.transcription_prompt = non_empty(value),
                "llm_base_url" => settings.llm_base_url = value.clone(),
                "llm_model" => settings.llm_model = value.clone(),
                "keep_audio" => settings.keep_audio = parse_bool(key, value)?,
                "default_timezone" => settings.default_timezone = value.clone(),
                "user_name" => settings.user_name = value.clone(),
                "vad_enabled" => settings.vad_enabled = parse_bool(key, value)?,
                "vad_model_path" => settings.vad_model_path = non_empty(value),
                "chunk_duration_secs" => {
                    settings.chunk_duration_secs = value.parse::<u32>().map_err(|_| {
                        Error::Config(format!("Setting {key} is not an integer: {value}"))
                    })?;
                }
                // Rows written by a newer build are ignored on read.
                _ => {}
            }
        }

        Ok(settings)
    }

    /// Encode to the raw key/value form for persistence.
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("vault_path".into(), self.vault_path.clone());
        map.insert("whisper_model".into(), self.whisper_model.clone());
        map.insert(
            "whisper_model_path".into(),
            self.whisper_model_path.clone().unwrap_or_default(),
        );
        map.insert(
            "transcription_prompt".into(),
            self.transcription_prompt.clone().unwrap_or_default(),
        );
        map.insert("llm_base_url".into(), self.llm_base_url.clone());
        map.insert("llm_model".into(), self.llm_model.clone());
        map.insert("keep_audio".into(), self.keep_audio.to_string());
        map.insert("default_timezone".into(), self.default_timezone.clone());
        map.insert("user_name".into(), self.user_name.clone());
        map.insert("vad_enabled".into(), self.vad_enabled.to_string());
        map.insert(
            "vad_model_path".into(),
            self.vad_model_path.clone().unwrap_or_default(),
        );
        map.insert(
            "chunk_duration_secs".into(),
            self.chunk_duration_secs.to_string(),
        );
        map
    }

    /// Chunk window as seconds, the form the audio tools consume.
    pub fn chunk_duration(&self) -> f64 {
        self.chunk_duration_secs as f64
    }
}

/// Partial settings update from the HTTP facade. Only present fields are
/// applied; unknown JSON keys are rejected by `deny_unknown_fields`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SettingsPatch {
    pub vault_path: Option<String>,
    pub whisper_model: Option<String>,
    pub whisper_model_path: Option<String>,
    pub transcription_prompt: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    pub keep_audio: Option<bool>,
    pub default_timezone: Option<String>,
    pub user_name: Option<String>,
    pub vad_enabled: Option<bool>,
    pub vad_model_path: Option<String>,
    pub chunk_duration_secs: Option<u32>,
}

impl SettingsPatch {
    /// Apply the patch on top of current settings, validating constrained
    /// fields.
    pub fn apply(self, mut current: Settings) -> Result<Settings> {
        if let Some(tz) = &self.default_timezone {
            crate::models::parse_timezone(tz)?;
        }
        if let Some(secs) = self.chunk_duration_secs {
            if secs == 0 {
                return Err(Error::InvalidInput(
                    "chunkDurationSecs must be positive".into(),
                ));
            }
        }

        if let Some(v) = self.vault_path {
            current.vault_path = v;
        }
        if let Some(v) = self.whisper_model {
            current.whisper_model = v;
        }
        if let Some(v) = self.whisper_model_path {
            current.whisper_model_path = non_empty(&v);
        }
        if let Some(v) = self.transcription_prompt {
            current.transcription_prompt = non_empty(&v);
        }
        if let Some(v) = self.llm_base_url {
            current.llm_base_url = v;
        }
        if let Some(v) = self.llm_model {
            current.llm_model = v;
        }
        if let Some(v) = self.keep_audio {
            current.keep_audio = v;
        }
        if let Some(v) = self.default_timezone {
            current.default_timezone = v;
        }
        if let Some(v) = self.user_name {
            current.user_name = v;
        }
        if let Some(v) = self.vad_enabled {
            current.vad_enabled = v;
        }
        if let Some(v) = self.vad_model_path {
            current.vad_model_path = non_empty(&v);
        }
        if let Some(v) = self.chunk_duration_secs {
            current.chunk_duration_secs = v;
        }

        Ok(current)
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(Error::Config(format!(
            "Setting {key} is not a boolean: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip_through_map() {
        let settings = Settings::default();
        let map = settings.to_map();
        let decoded = Settings::from_map(&map).unwrap();
        assert_eq!(decoded, settings);
    }

    #[test]
    fn test_every_persisted_key_is_declared() {
        let map = Settings::default().to_map();
        for key in map.keys() {
            assert!(
                setting_type(key).is_some(),
                "key {key} missing from SETTING_KEYS"
            );
        }
        assert_eq!(map.len(), SETTING_KEYS.len());
    }

    #[test]
    fn test_from_map_bad_boolean() {
        let mut map = Settings::default().to_map();
        map.insert("keep_audio".into(), "maybe".into());
        let err = Settings::from_map(&map).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_map_bad_integer() {
        let mut map = Settings::default().to_map();
        map.insert("chunk_duration_secs".into(), "sixty".into());
        assert!(Settings::from_map(&map).is_err());
    }

    #[test]
    fn test_from_map_ignores_unknown_keys() {
        let mut map = Settings::default().to_map();
        map.insert("future_flag".into(), "on".into());
        assert!(Settings::from_map(&map).is_ok());
    }

    #[test]
    fn test_empty_optional_becomes_none() {
        let mut map = Settings::default().to_map();
        map.insert("whisper_model_path".into(), "  ".into());
        let decoded = Settings::from_map(&map).unwrap();
        assert!(decoded.whisper_model_path.is_none());
    }

    #[test]
    fn test_patch_applies_present_fields_only() {
        let patch: SettingsPatch =
            serde_json::from_str(r#"{"keepAudio":false,"chunkDurationSecs":120}"#).unwrap();
        let updated = patch.apply(Settings::default()).unwrap();
        assert!(!updated.keep_audio);
        assert_eq!(updated.chunk_duration_secs, 120);
        assert_eq!(updated.whisper_model, "base.en");
    }

    #[test]
    fn test_patch_rejects_unknown_field() {
        let result: std::result::Result<SettingsPatch, _> =
            serde_json::from_str(r#"{"nope":true}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_patch_rejects_bad_timezone() {
        let patch = SettingsPatch {
            default_timezone: Some("Nowhere/Void".into()),
            ..Default::default()
        };
        assert!(patch.apply(Settings::default()).is_err());
    }

    #[test]
    fn test_patch_rejects_zero_chunk_duration() {
        let patch = SettingsPatch {
            chunk_duration_secs: Some(0),
            ..Default::default()
        };
        assert!(patch.apply(Settings::default()).is_err());
    }
}
