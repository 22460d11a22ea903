use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

use rp_domain::{Error, Result};

use crate::provider::{CompletionProvider, CompletionRequest, CompletionResponse};

/// One canned reply for the scripted provider.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Plain text, no usage reported.
    Text(String),
    /// Text with explicit token counts.
    TextWithUsage {
        text: String,
        input_tokens: u32,
        output_tokens: u32,
    },
    TransportError(String),
    QuotaError(String),
    /// Sleep for the given duration, then fail. Used to trip the gateway
    /// timeout in tests; the gateway abandons the future long before the
    /// sleep completes.
    Hang(Duration),
}

/// Deterministic in-process provider: pops canned replies in FIFO order and
/// records every request it receives.
///
/// An exhausted script fails with a transport error, which exercises the
/// engine's degradation paths; the CLI's dry-run mode relies on this.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next reply.
    pub fn push(&self, reply: ScriptedReply) {
        self.replies.lock().push_back(reply);
    }

    /// Number of completion calls received so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// Copies of every request received, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        self.requests.lock().push(req.clone());
        let reply = self.replies.lock().pop_front();

        match reply {
            None => Err(Error::LlmTransport("script exhausted".into())),
            Some(ScriptedReply::Text(text)) => Ok(CompletionResponse {
                text,
                input_tokens: None,
                output_tokens: None,
            }),
            Some(ScriptedReply::TextWithUsage {
                text,
                input_tokens,
                output_tokens,
            }) => Ok(CompletionResponse {
                text,
                input_tokens: Some(input_tokens),
                output_tokens: Some(output_tokens),
            }),
            Some(ScriptedReply::TransportError(msg)) => Err(Error::LlmTransport(msg)),
            Some(ScriptedReply::QuotaError(msg)) => Err(Error::LlmQuota(msg)),
            Some(ScriptedReply::Hang(duration)) => {
                tokio::time::sleep(duration).await;
                Err(Error::LlmTransport("hung call finished".into()))
            }
        }
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rp_domain::settings::ModelParams;

    fn req(prompt: &str) -> CompletionRequest {
        CompletionRequest {
            prompt: prompt.into(),
            params: ModelParams::default(),
        }
    }

    #[tokio::test]
    async fn replies_pop_in_fifo_order() {
        let provider = ScriptedProvider::new();
        provider.push(ScriptedReply::Text("first".into()));
        provider.push(ScriptedReply::Text("second".into()));

        assert_eq!(provider.complete(&req("a")).await.unwrap().text, "first");
        assert_eq!(provider.complete(&req("b")).await.unwrap().text, "second");
        assert_eq!(provider.calls(), 2);
        assert_eq!(provider.requests()[0].prompt, "a");
    }

    #[tokio::test]
    async fn exhausted_script_is_a_transport_error() {
        let provider = ScriptedProvider::new();
        let err = provider.complete(&req("x")).await.unwrap_err();
        assert_eq!(err.kind(), "llm_transport_error");
    }
}
