use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rp_domain::settings::ModelParams;
use rp_domain::Error;

use crate::capture::CaptureLog;
use crate::provider::{CompletionProvider, CompletionRequest};

const DEFAULT_CAPTURE_CAPACITY: usize = 32;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Exchange capture
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The raw record of one gateway call: exactly what was sent, what came
/// back (or why nothing did), and when.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmExchange {
    /// Which pipeline stage issued the call ("cleaner" or "decider").
    pub stage: String,
    pub model_params: ModelParams,
    pub prompt: String,
    /// `None` when the call failed before producing text.
    pub response_text: Option<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// A successful gateway call: the text plus the paired capture.
#[derive(Debug, Clone)]
pub struct GatewayReply {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub exchange: LlmExchange,
}

/// A failed gateway call.
///
/// Carries the captured exchange of the attempt inline, so the caller can
/// persist what was sent without consulting shared state. Tasks from other
/// evaluations may be calling through the same gateway concurrently; only
/// this value is guaranteed to describe *this* call.
#[derive(Debug)]
pub struct GatewayError {
    pub error: Error,
    pub exchange: LlmExchange,
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        self.error.kind()
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gateway
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The single entry point for LLM calls.
///
/// Applies a hard per-call timeout (the in-flight future is dropped on
/// expiry, never awaited further) and normalizes token accounting (absent
/// counts become zero). Every exchange is returned inline with its reply or
/// error and additionally mirrored into the capture log for diagnostics.
pub struct LlmGateway {
    provider: Arc<dyn CompletionProvider>,
    captures: CaptureLog,
}

impl LlmGateway {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self::with_capture_capacity(provider, DEFAULT_CAPTURE_CAPACITY)
    }

    pub fn with_capture_capacity(provider: Arc<dyn CompletionProvider>, capacity: usize) -> Self {
        Self {
            provider,
            captures: CaptureLog::new(capacity),
        }
    }

    /// Issue one completion call with a hard timeout.
    ///
    /// On timeout the provider future is abandoned and the error is
    /// [`Error::LlmTimeout`]; provider errors pass through unchanged. Both
    /// outcomes carry the exchange of this exact call.
    pub async fn call(
        &self,
        stage: &'static str,
        prompt: &str,
        params: &ModelParams,
        timeout: Duration,
    ) -> std::result::Result<GatewayReply, GatewayError> {
        let started_at = Utc::now();
        let started = Instant::now();
        let req = CompletionRequest {
            prompt: prompt.to_owned(),
            params: params.clone(),
        };

        let outcome = tokio::time::timeout(timeout, self.provider.complete(&req)).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        let finished_at = Utc::now();

        let base = LlmExchange {
            stage: stage.to_owned(),
            model_params: params.clone(),
            prompt: prompt.to_owned(),
            response_text: None,
            input_tokens: 0,
            output_tokens: 0,
            started_at,
            finished_at,
            duration_ms,
            success: false,
            error: None,
        };

        match outcome {
            Err(_elapsed) => {
                let error = Error::LlmTimeout {
                    stage,
                    timeout_ms: timeout.as_millis() as u64,
                };
                tracing::warn!(stage, duration_ms, "LLM call timed out");
                let exchange = LlmExchange {
                    error: Some(error.to_string()),
                    ..base
                };
                self.captures.record(exchange.clone());
                Err(GatewayError { error, exchange })
            }
            Ok(Err(error)) => {
                tracing::warn!(stage, error = %error, "LLM call failed");
                let exchange = LlmExchange {
                    error: Some(error.to_string()),
                    ..base
                };
                self.captures.record(exchange.clone());
                Err(GatewayError { error, exchange })
            }
            Ok(Ok(resp)) => {
                let input_tokens = resp.input_tokens.unwrap_or(0);
                let output_tokens = resp.output_tokens.unwrap_or(0);
                let exchange = LlmExchange {
                    response_text: Some(resp.text.clone()),
                    input_tokens,
                    output_tokens,
                    success: true,
                    ..base
                };
                self.captures.record(exchange.clone());
                tracing::debug!(
                    stage,
                    duration_ms,
                    input_tokens,
                    output_tokens,
                    "LLM call completed"
                );
                Ok(GatewayReply {
                    text: resp.text,
                    input_tokens,
                    output_tokens,
                    exchange,
                })
            }
        }
    }

    /// Diagnostic view of recent exchanges across all callers of this
    /// gateway. Pipeline code never pairs rows from here; see
    /// [`GatewayError`] and [`GatewayReply`].
    pub fn captures(&self) -> &CaptureLog {
        &self.captures
    }

    pub fn provider_id(&self) -> &str {
        self.provider.provider_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{ScriptedProvider, ScriptedReply};

    fn gateway_with(replies: Vec<ScriptedReply>) -> LlmGateway {
        let provider = ScriptedProvider::new();
        for r in replies {
            provider.push(r);
        }
        LlmGateway::new(Arc::new(provider))
    }

    #[tokio::test]
    async fn successful_call_captures_exchange() {
        let gateway = gateway_with(vec![ScriptedReply::TextWithUsage {
            text: "cleaned".into(),
            input_tokens: 12,
            output_tokens: 3,
        }]);

        let reply = gateway
            .call(
                "cleaner",
                "fix this",
                &ModelParams::default(),
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        assert_eq!(reply.text, "cleaned");
        assert_eq!(reply.input_tokens, 12);
        assert_eq!(reply.output_tokens, 3);
        assert!(reply.exchange.success);
        assert_eq!(reply.exchange.prompt, "fix this");
        assert_eq!(reply.exchange.response_text.as_deref(), Some("cleaned"));

        // Mirrored into the diagnostic log as well.
        assert_eq!(gateway.captures().len(), 1);
    }

    #[tokio::test]
    async fn missing_usage_counts_as_zero() {
        let gateway = gateway_with(vec![ScriptedReply::Text("ok".into())]);
        let reply = gateway
            .call(
                "cleaner",
                "p",
                &ModelParams::default(),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(reply.input_tokens, 0);
        assert_eq!(reply.output_tokens, 0);
    }

    #[tokio::test]
    async fn timeout_abandons_call_and_returns_its_exchange() {
        let gateway = gateway_with(vec![ScriptedReply::Hang(Duration::from_secs(30))]);
        let err = gateway
            .call(
                "decider",
                "slow prompt",
                &ModelParams::default(),
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "llm_timeout");
        // The failed exchange travels with the error itself.
        assert!(!err.exchange.success);
        assert_eq!(err.exchange.prompt, "slow prompt");
        assert!(err.exchange.error.as_deref().unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn quota_error_keeps_its_kind() {
        let gateway = gateway_with(vec![ScriptedReply::QuotaError("rate limited".into())]);
        let err = gateway
            .call(
                "decider",
                "p",
                &ModelParams::default(),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "llm_quota_error");
    }

    #[tokio::test]
    async fn failed_exchange_is_not_confused_by_later_calls() {
        // A failure followed by another caller's success through the same
        // gateway: the error must still describe its own call even though
        // the capture log has moved on.
        let gateway = gateway_with(vec![
            ScriptedReply::TransportError("down".into()),
            ScriptedReply::Text("other evaluation's reply".into()),
        ]);

        let err = gateway
            .call(
                "cleaner",
                "prompt A",
                &ModelParams::default(),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        gateway
            .call(
                "cleaner",
                "prompt B",
                &ModelParams::default(),
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        assert_eq!(err.exchange.prompt, "prompt A");
        assert!(err.exchange.response_text.is_none());
        // The shared diagnostic log now ends with the other call.
        assert_eq!(gateway.captures().last().unwrap().prompt, "prompt B");
    }
}
