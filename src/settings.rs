//! Typed view over the runtime settings map.
//!
//! The store itself is an open `key -> value` string map (unknown keys are
//! kept verbatim). Consumers take a fresh [`Settings`] snapshot at the start
//! of each operation and read through the accessors below, which validate
//! lazily: a malformed or out-of-range value logs a warning and falls back to
//! the default instead of failing the operation.
use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;

use crate::storage::{Database, DatabaseError};

pub const SCHEDULE_INTERVAL: &str = "schedule_interval";
pub const MAX_ARTICLES_PER_FETCH: &str = "max_articles_per_fetch";
pub const CATEGORIES: &str = "categories";
pub const AUTO_SUMMARIZE: &str = "auto_summarize";
pub const LLM_MODEL: &str = "llm_model";

/// Recognised keys and the values seeded on first open.
pub const DEFAULT_SETTINGS: [(&str, &str); 5] = [
    (SCHEDULE_INTERVAL, "60"),
    (MAX_ARTICLES_PER_FETCH, "50"),
    (
        CATEGORIES,
        "AI/ML,Software Development,Cybersecurity,New Technologies",
    ),
    (AUTO_SUMMARIZE, "true"),
    (LLM_MODEL, "gpt-4o-mini"),
];

const DEFAULT_INTERVAL_MINUTES: u64 = 60;
const INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 1..=1440;
const DEFAULT_FETCH_CAP: usize = 50;
const FETCH_CAP_RANGE: std::ops::RangeInclusive<usize> = 1..=500;
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Category assigned when the classifier answers outside the vocabulary.
pub const FALLBACK_CATEGORY: &str = "Other";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Setting keys must be non-empty")]
    EmptyKey,

    #[error("Setting '{0}' must be a string, number or boolean")]
    NonScalar(String),

    #[error(transparent)]
    Storage(#[from] DatabaseError),
}

// ============================================================================
// Settings snapshot
// ============================================================================

/// Point-in-time copy of the settings map.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    /// Read the current map from the database.
    pub async fn load(db: &Database) -> Result<Self, DatabaseError> {
        Ok(Self {
            values: db.get_settings().await?,
        })
    }

    pub fn from_map(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    // ========================================================================
    // Type-safe Accessors
    // ========================================================================

    /// Collection interval in minutes, within 1..=1440.
    pub fn schedule_interval_minutes(&self) -> u64 {
        self.parsed_in_range(SCHEDULE_INTERVAL, INTERVAL_RANGE, DEFAULT_INTERVAL_MINUTES)
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_minutes() * 60)
    }

    /// Per-source cap on items taken from one fetch, within 1..=500.
    pub fn max_articles_per_fetch(&self) -> usize {
        self.parsed_in_range(MAX_ARTICLES_PER_FETCH, FETCH_CAP_RANGE, DEFAULT_FETCH_CAP)
    }

    /// Category vocabulary, comma separated in storage. Blank entries are dropped.
    pub fn categories(&self) -> Vec<String> {
        let raw = self
            .get(CATEGORIES)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(DEFAULT_SETTINGS[2].1);
        let mut out: Vec<String> = Vec::new();
        for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if !out.iter().any(|c| c == name) {
                out.push(name.to_owned());
            }
        }
        out
    }

    /// Whether freshly collected articles are categorized right after ingestion.
    pub fn auto_categorize(&self) -> bool {
        match self.get(AUTO_SUMMARIZE).map(|v| v.trim().to_ascii_lowercase()) {
            None => true,
            Some(v) if matches!(v.as_str(), "true" | "1" | "yes" | "on") => true,
            Some(v) if matches!(v.as_str(), "false" | "0" | "no" | "off") => false,
            Some(v) => {
                tracing::warn!(key = AUTO_SUMMARIZE, value = %v, "Unrecognised boolean setting, using default");
                true
            }
        }
    }

    pub fn llm_model(&self) -> &str {
        self.get(LLM_MODEL)
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MODEL)
    }

    fn parsed_in_range<T>(&self, key: &str, range: std::ops::RangeInclusive<T>, default: T) -> T
    where
        T: std::str::FromStr + PartialOrd + Copy + std::fmt::Display,
    {
        let Some(raw) = self.get(key) else {
            return default;
        };
        match raw.trim().parse::<T>() {
            Ok(v) if range.contains(&v) => v,
            _ => {
                tracing::warn!(
                    key = key,
                    value = raw,
                    min = %range.start(),
                    max = %range.end(),
                    "Setting out of range or malformed, using default"
                );
                default
            }
        }
    }
}

/// Convert a client-supplied settings object into the stored string map.
///
/// Numbers and booleans are stored in their textual form so a client sending
/// `{"schedule_interval": 30}` and one sending `"30"` end up identical.
pub fn normalize_input(
    input: BTreeMap<String, serde_json::Value>,
) -> Result<BTreeMap<String, String>, SettingsError> {
    let mut out = BTreeMap::new();
    for (key, value) in input {
        let key = key.trim().to_owned();
        if key.is_empty() {
            return Err(SettingsError::EmptyKey);
        }
        let text = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            serde_json::Value::Null => String::new(),
            _ => return Err(SettingsError::NonScalar(key)),
        };
        out.insert(key, text);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        Settings::from_map(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults_when_empty() {
        let s = Settings::default();
        assert_eq!(s.schedule_interval_minutes(), 60);
        assert_eq!(s.max_articles_per_fetch(), 50);
        assert!(s.auto_categorize());
        assert_eq!(s.llm_model(), "gpt-4o-mini");
        assert_eq!(
            s.categories(),
            vec![
                "AI/ML",
                "Software Development",
                "Cybersecurity",
                "New Technologies"
            ]
        );
    }

    #[test]
    fn test_interval_out_of_range_falls_back() {
        assert_eq!(
            settings(&[(SCHEDULE_INTERVAL, "0")]).schedule_interval_minutes(),
            60
        );
        assert_eq!(
            settings(&[(SCHEDULE_INTERVAL, "1441")]).schedule_interval_minutes(),
            60
        );
        assert_eq!(
            settings(&[(SCHEDULE_INTERVAL, "soon")]).schedule_interval_minutes(),
            60
        );
        assert_eq!(
            settings(&[(SCHEDULE_INTERVAL, " 15 ")]).schedule_interval(),
            Duration::from_secs(900)
        );
    }

    #[test]
    fn test_fetch_cap_bounds() {
        assert_eq!(
            settings(&[(MAX_ARTICLES_PER_FETCH, "500")]).max_articles_per_fetch(),
            500
        );
        assert_eq!(
            settings(&[(MAX_ARTICLES_PER_FETCH, "501")]).max_articles_per_fetch(),
            50
        );
        assert_eq!(
            settings(&[(MAX_ARTICLES_PER_FETCH, "-3")]).max_articles_per_fetch(),
            50
        );
    }

    #[test]
    fn test_categories_trimmed_and_deduplicated() {
        let s = settings(&[(CATEGORIES, " Security , AI,,Security ,Cloud ")]);
        assert_eq!(s.categories(), vec!["Security", "AI", "Cloud"]);
    }

    #[test]
    fn test_auto_categorize_parsing() {
        assert!(!settings(&[(AUTO_SUMMARIZE, "false")]).auto_categorize());
        assert!(!settings(&[(AUTO_SUMMARIZE, "OFF")]).auto_categorize());
        assert!(settings(&[(AUTO_SUMMARIZE, "1")]).auto_categorize());
        assert!(settings(&[(AUTO_SUMMARIZE, "maybe")]).auto_categorize());
    }

    #[test]
    fn test_normalize_input_stringifies_scalars() {
        let input: BTreeMap<String, serde_json::Value> = serde_json::from_value(serde_json::json!({
            "schedule_interval": 30,
            "auto_summarize": false,
            "llm_model": "gpt-4o",
            "custom_flag": null
        }))
        .unwrap();
        let out = normalize_input(input).unwrap();
        assert_eq!(out["schedule_interval"], "30");
        assert_eq!(out["auto_summarize"], "false");
        assert_eq!(out["llm_model"], "gpt-4o");
        assert_eq!(out["custom_flag"], "");
    }

    #[test]
    fn test_normalize_input_rejects_nested() {
        let input: BTreeMap<String, serde_json::Value> =
            serde_json::from_value(serde_json::json!({"categories": ["a", "b"]})).unwrap();
        assert!(matches!(
            normalize_input(input),
            Err(SettingsError::NonScalar(k)) if k == "categories"
        ));

        let input: BTreeMap<String, serde_json::Value> =
            serde_json::from_value(serde_json::json!({"  ": "x"})).unwrap();
        assert!(matches!(normalize_input(input), Err(SettingsError::EmptyKey)));
    }
}
