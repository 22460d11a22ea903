use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-evaluation settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How aggressively the cleaner is asked to rewrite a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CleaningLevel {
    None,
    Light,
    #[default]
    Full,
}

impl CleaningLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleaningLevel::None => "none",
            CleaningLevel::Light => "light",
            CleaningLevel::Full => "full",
        }
    }
}

/// Model configuration forwarded to the LLM provider per stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParams {
    #[serde(default = "d_model")]
    pub model_name: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Provider-specific safety configuration, passed through opaquely.
    #[serde(default)]
    pub safety_settings: Option<Value>,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            model_name: d_model(),
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: None,
            safety_settings: None,
        }
    }
}

/// Dollar rates per thousand tokens for one model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CostRate {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl CostRate {
    /// Estimated USD cost for the given token counts.
    pub fn estimate(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 * self.input_per_1k + output_tokens as f64 * self.output_per_1k)
            / 1_000.0
    }
}

/// All recognized per-evaluation settings with their defaults.
///
/// Unknown keys are rejected at deserialization time so a typo in a settings
/// map surfaces as a configuration error when the evaluation is created, not
/// as silently-ignored input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvalSettings {
    #[serde(default)]
    pub cleaning_level: CleaningLevel,
    #[serde(default = "d_10")]
    pub sliding_window_cleaner: usize,
    #[serde(default = "d_20")]
    pub sliding_window_decider: usize,
    #[serde(default = "d_10")]
    pub sliding_window_functions: usize,
    /// Speaker names treated as assistant-side (bypassed); matched
    /// case-insensitively after trimming.
    #[serde(default = "d_assistant_speakers")]
    pub assistant_speakers: Vec<String>,
    #[serde(default = "d_3000")]
    pub cleaner_timeout_ms: u64,
    #[serde(default = "d_3000")]
    pub decider_timeout_ms: u64,
    #[serde(default = "d_500")]
    pub function_exec_timeout_ms: u64,
    #[serde(default = "d_true")]
    pub enable_function_calling: bool,
    #[serde(default)]
    pub strict_cleaner: bool,
    #[serde(default)]
    pub strict_pipeline: bool,
    #[serde(default)]
    pub cleaner_model_params: ModelParams,
    #[serde(default)]
    pub decider_model_params: ModelParams,
    /// Model name → per-1k-token rates. Models absent from the table cost 0.
    #[serde(default)]
    pub cost_rates: HashMap<String, CostRate>,
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self {
            cleaning_level: CleaningLevel::default(),
            sliding_window_cleaner: d_10(),
            sliding_window_decider: d_20(),
            sliding_window_functions: d_10(),
            assistant_speakers: d_assistant_speakers(),
            cleaner_timeout_ms: d_3000(),
            decider_timeout_ms: d_3000(),
            function_exec_timeout_ms: d_500(),
            enable_function_calling: d_true(),
            strict_cleaner: false,
            strict_pipeline: false,
            cleaner_model_params: ModelParams::default(),
            decider_model_params: ModelParams::default(),
            cost_rates: HashMap::new(),
        }
    }
}

impl EvalSettings {
    /// Parse a settings map, rejecting unknown keys.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Overlay `overrides` on top of these settings; override wins on key
    /// collision. Unknown keys in the override map are rejected.
    pub fn merged_with(&self, overrides: &Value) -> Result<Self> {
        let Value::Object(overrides) = overrides else {
            return Err(Error::Configuration(
                "override settings must be a JSON object".into(),
            ));
        };
        let mut base = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => unreachable!("settings serialize to an object"),
        };
        for (key, value) in overrides {
            base.insert(key.clone(), value.clone());
        }
        Self::from_value(Value::Object(base))
    }

    /// Whether `speaker` is assistant-side and should bypass the pipeline.
    pub fn is_assistant_speaker(&self, speaker: &str) -> bool {
        let speaker = speaker.trim();
        self.assistant_speakers
            .iter()
            .any(|s| s.trim().eq_ignore_ascii_case(speaker))
    }

    /// Rate lookup for cost computation; zero when the model has no entry.
    pub fn cost_for(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        self.cost_rates
            .get(model)
            .map(|r| r.estimate(input_tokens, output_tokens))
            .unwrap_or(0.0)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_model() -> String {
    "gemini-2.0-flash".into()
}
fn d_10() -> usize {
    10
}
fn d_20() -> usize {
    20
}
fn d_3000() -> u64 {
    3_000
}
fn d_500() -> u64 {
    500
}
fn d_true() -> bool {
    true
}
fn d_assistant_speakers() -> Vec<String> {
    vec!["Lumen".into(), "AI".into(), "Assistant".into()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_documented_values() {
        let s = EvalSettings::default();
        assert_eq!(s.cleaning_level, CleaningLevel::Full);
        assert_eq!(s.sliding_window_cleaner, 10);
        assert_eq!(s.sliding_window_decider, 20);
        assert_eq!(s.sliding_window_functions, 10);
        assert_eq!(s.cleaner_timeout_ms, 3_000);
        assert_eq!(s.decider_timeout_ms, 3_000);
        assert_eq!(s.function_exec_timeout_ms, 500);
        assert!(s.enable_function_calling);
        assert!(!s.strict_cleaner);
        assert!(!s.strict_pipeline);
        assert!(s.cost_rates.is_empty());
    }

    #[test]
    fn unknown_key_is_a_configuration_error() {
        let err = EvalSettings::from_value(json!({ "sliding_windw_cleaner": 5 })).unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
    }

    #[test]
    fn merge_override_wins() {
        let base = EvalSettings::from_value(json!({ "sliding_window_cleaner": 4 })).unwrap();
        let merged = base
            .merged_with(&json!({ "sliding_window_cleaner": 7, "strict_cleaner": true }))
            .unwrap();
        assert_eq!(merged.sliding_window_cleaner, 7);
        assert!(merged.strict_cleaner);
        // Untouched keys survive the merge.
        assert_eq!(merged.sliding_window_decider, 20);
    }

    #[test]
    fn merge_rejects_non_object() {
        let base = EvalSettings::default();
        assert!(base.merged_with(&json!([1, 2])).is_err());
    }

    #[test]
    fn assistant_speaker_match_is_trimmed_and_case_insensitive() {
        let s = EvalSettings::default();
        assert!(s.is_assistant_speaker("Lumen"));
        assert!(s.is_assistant_speaker("  lumen "));
        assert!(s.is_assistant_speaker("ASSISTANT"));
        assert!(!s.is_assistant_speaker("User"));
        assert!(!s.is_assistant_speaker("Lumens"));
    }

    #[test]
    fn cost_rate_estimate() {
        let rate = CostRate {
            input_per_1k: 0.00025,
            output_per_1k: 0.0005,
        };
        // 1000 in @ 0.00025 + 2000 out @ 0.0005 = 0.00125
        let cost = rate.estimate(1_000, 2_000);
        assert!((cost - 0.00125).abs() < 1e-12);
    }

    #[test]
    fn cost_for_unknown_model_is_zero() {
        let s = EvalSettings::default();
        assert_eq!(s.cost_for("gemini-2.0-flash", 1_000, 1_000), 0.0);
    }
}
