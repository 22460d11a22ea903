//! LLM gateway: a single timeout-bounded, capture-everything entry point to
//! the completion provider, plus the provider implementations.
//!
//! No provider specifics leak past this crate: the rest of the engine only
//! sees [`LlmGateway`] and [`LlmExchange`].

pub mod capture;
pub mod gateway;
pub mod gemini;
pub mod provider;
pub mod scripted;

pub use capture::CaptureLog;
pub use gateway::{GatewayError, GatewayReply, LlmExchange, LlmGateway};
pub use gemini::GeminiProvider;
pub use provider::{CompletionProvider, CompletionRequest, CompletionResponse};
pub use scripted::{ScriptedProvider, ScriptedReply};
