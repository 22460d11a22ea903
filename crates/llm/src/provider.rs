use rp_domain::settings::ModelParams;
use rp_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic completion request: one rendered prompt plus the
/// model parameters for this stage.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub params: ModelParams,
}

/// A provider-agnostic completion response.
///
/// Token counts are `None` when the provider did not report usage; the
/// gateway treats missing counts as zero for accounting.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every completion backend implements.
///
/// Implementations translate between [`CompletionRequest`] and the wire
/// format of their API. Blocking backends wrap their call in
/// `spawn_blocking` internally; the gateway only ever awaits this future.
#[async_trait::async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Send one completion request and wait for the full response.
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}
