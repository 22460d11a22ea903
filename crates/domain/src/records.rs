use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::customer::CustomerRecord;
use crate::settings::{CleaningLevel, EvalSettings};
use crate::timing::TimingBreakdown;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation input
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A recorded conversation. Immutable after ingestion.
///
/// `turns` is kept sorted by `turn_sequence`; that sequence is the sole
/// ordering key for every context window derived from the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    /// Source customer record this conversation was captured against.
    /// Each evaluation gets its own mutable copy seeded from this.
    #[serde(default)]
    pub source_customer: CustomerRecord,
    pub turns: Vec<Turn>,
}

/// One raw speech-to-text turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub conversation_id: Uuid,
    /// Monotonic per conversation, unique.
    pub turn_sequence: u32,
    pub speaker: String,
    pub raw_text: String,
}

impl Conversation {
    /// Build a conversation from `(speaker, raw_text)` pairs, assigning
    /// sequential turn numbers starting at 1.
    pub fn from_lines(id: Uuid, lines: &[(&str, &str)]) -> Self {
        let turns = lines
            .iter()
            .enumerate()
            .map(|(i, (speaker, text))| Turn {
                id: Uuid::new_v4(),
                conversation_id: id,
                turn_sequence: i as u32 + 1,
                speaker: (*speaker).to_owned(),
                raw_text: (*text).to_owned(),
            })
            .collect();
        Self {
            id,
            source_customer: CustomerRecord::default(),
            turns,
        }
    }

    pub fn turn(&self, turn_id: Uuid) -> Option<&Turn> {
        self.turns.iter().find(|t| t.id == turn_id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Evaluation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationStatus {
    Active,
    Complete,
    Errored,
}

/// A reproducible run of one conversation through the two-stage pipeline.
///
/// `status` and `turns_processed` are the only fields that change after
/// creation; everything else is pinned at create time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: Uuid,
    pub conversation_id: Uuid,
    /// Cleaner prompt template.
    pub prompt_template_id: Uuid,
    /// Function-decision prompt template.
    pub function_prompt_template_id: Uuid,
    pub settings: EvalSettings,
    pub user_id: String,
    pub status: EvaluationStatus,
    pub turns_processed: u32,
    pub created_at: DateTime<Utc>,
}

/// A stored prompt template. Immutable once referenced by an evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: Uuid,
    pub name: String,
    pub template_text: String,
    /// Variable names the template declares.
    #[serde(default)]
    pub variables: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-turn output rows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// A single correction the cleaner reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    pub original: String,
    pub corrected: String,
    #[serde(default)]
    pub confidence: Option<Confidence>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// The persisted result of the cleaner stage for one turn.
///
/// Unique on (`evaluation_id`, `turn_id`); immutable after insert.
/// `turn_sequence` and `speaker` are denormalized from the raw turn so the
/// cleaned-turn log can be rebuilt from these rows alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanedTurn {
    pub id: Uuid,
    pub evaluation_id: Uuid,
    pub turn_id: Uuid,
    pub turn_sequence: u32,
    pub speaker: String,
    pub cleaned_text: String,
    pub confidence_score: Confidence,
    pub cleaning_applied: bool,
    pub cleaning_level: CleaningLevel,
    pub processing_time_ms: u64,
    #[serde(default)]
    pub corrections: Vec<Correction>,
    pub context_detected: String,
    pub ai_model_used: String,
    pub timing_breakdown: TimingBreakdown,
    #[serde(default)]
    pub gemini_prompt: Option<String>,
    #[serde(default)]
    pub gemini_response: Option<String>,
    #[serde(default)]
    pub template_variables: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

/// One function the decider chose and the executor ran (or rejected).
///
/// Rows are ordered per (`evaluation_id`, `turn_id`) by insertion time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalledFunction {
    pub id: Uuid,
    pub evaluation_id: Uuid,
    pub turn_id: Uuid,
    pub function_name: String,
    pub parameters: Value,
    pub result: Value,
    /// Whether the function actually mutated the mirrored customer.
    pub executed: bool,
    #[serde(default)]
    pub confidence_score: Option<Confidence>,
    #[serde(default)]
    pub decision_reasoning: Option<String>,
    pub processing_time_ms: u64,
    pub timing_breakdown: TimingBreakdown,
    pub function_template_id: Uuid,
    #[serde(default)]
    pub gemini_prompt: Option<String>,
    #[serde(default)]
    pub gemini_response: Option<String>,
    pub mock_data_before: Value,
    pub mock_data_after: Value,
    #[serde(default)]
    pub template_variables: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

/// Token and dollar accounting for one processed turn.
///
/// Unique on (`evaluation_id`, `turn_id`); upserted once per turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    pub id: Uuid,
    pub evaluation_id: Uuid,
    pub turn_id: Uuid,
    pub cleaning_input_tokens: u32,
    pub cleaning_output_tokens: u32,
    pub cleaning_cost: f64,
    pub function_input_tokens: u32,
    pub function_output_tokens: u32,
    pub function_cost: f64,
    pub total_tokens: u32,
    pub total_cost: f64,
    pub model_used: String,
    pub created_at: DateTime<Utc>,
}
