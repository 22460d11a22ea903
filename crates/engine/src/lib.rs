//! Evaluation execution engine.
//!
//! Re-runs recorded conversations through a two-stage LLM pipeline (a
//! speech-to-text cleaner, then a function decider) against a mirrored
//! customer record, persisting every prompt, response, timing, and mutation
//! per turn. The [`manager::EvaluationManager`] is the entry point; the
//! HTTP/WebSocket surface, template authoring, and the LLM provider itself
//! live outside this workspace and talk to it through [`rp_store::Store`],
//! [`rp_llm::CompletionProvider`], and [`broadcast::UpdateSink`].

pub mod broadcast;
pub mod cleaner;
pub mod config;
pub mod context;
pub mod decision;
pub mod manager;
pub mod state;

pub use broadcast::{ChannelSink, EvalUpdate, NoopSink, UpdateSink};
pub use config::EngineConfig;
pub use manager::{
    CreateEvaluation, EvaluationDetails, EvaluationManager, GeminiDetails, TurnError, TurnResult,
};
pub use state::{EvaluationState, StateCache};
