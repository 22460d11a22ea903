//! Google Gemini adapter.
//!
//! Implements the Gemini `generateContent` API for single-prompt
//! completions. Auth is via an API key passed as a query parameter
//! (`key={api_key}`).

use serde_json::Value;

use rp_domain::{Error, Result};

use crate::provider::{CompletionProvider, CompletionRequest, CompletionResponse};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// A completion provider backed by the Google Gemini REST API.
pub struct GeminiProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| Error::LlmTransport(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn generate_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        )
    }

    fn build_body(req: &CompletionRequest) -> Value {
        let mut body = serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [{"text": req.prompt}],
            }],
        });

        let params = &req.params;
        let mut gen_config = serde_json::json!({});
        if let Some(temp) = params.temperature {
            gen_config["temperature"] = serde_json::json!(temp);
        }
        if let Some(top_p) = params.top_p {
            gen_config["topP"] = serde_json::json!(top_p);
        }
        if let Some(top_k) = params.top_k {
            gen_config["topK"] = serde_json::json!(top_k);
        }
        if let Some(max) = params.max_tokens {
            gen_config["maxOutputTokens"] = serde_json::json!(max);
        }
        if gen_config.as_object().is_some_and(|o| !o.is_empty()) {
            body["generationConfig"] = gen_config;
        }

        if let Some(safety) = &params.safety_settings {
            body["safetySettings"] = safety.clone();
        }

        body
    }

    fn parse_response(value: &Value) -> Result<CompletionResponse> {
        let parts = value
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::LlmTransport("response has no candidates".into()))?;

        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("");

        let usage = value.get("usageMetadata");
        let input_tokens = usage
            .and_then(|u| u.get("promptTokenCount"))
            .and_then(Value::as_u64)
            .map(|n| n as u32);
        let output_tokens = usage
            .and_then(|u| u.get("candidatesTokenCount"))
            .and_then(Value::as_u64)
            .map(|n| n as u32);

        Ok(CompletionResponse {
            text,
            input_tokens,
            output_tokens,
        })
    }
}

#[async_trait::async_trait]
impl CompletionProvider for GeminiProvider {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        let url = self.generate_url(&req.params.model_name);
        let body = Self::build_body(req);

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::LlmTransport(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let detail = resp.text().await.unwrap_or_default();
            return Err(Error::LlmQuota(format!("Gemini rate limit: {detail}")));
        }
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(Error::LlmTransport(format!("Gemini HTTP {status}: {detail}")));
        }

        let value: Value = resp
            .json()
            .await
            .map_err(|e| Error::LlmTransport(format!("invalid Gemini response: {e}")))?;
        Self::parse_response(&value)
    }

    fn provider_id(&self) -> &str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rp_domain::settings::ModelParams;

    fn request_with(params: ModelParams) -> CompletionRequest {
        CompletionRequest {
            prompt: "hello".into(),
            params,
        }
    }

    #[test]
    fn body_includes_generation_config_when_params_set() {
        let params = ModelParams {
            temperature: Some(0.2),
            top_p: Some(0.9),
            top_k: Some(40),
            max_tokens: Some(512),
            ..Default::default()
        };
        let body = GeminiProvider::build_body(&request_with(params));

        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        let gen = &body["generationConfig"];
        assert_eq!(gen["temperature"], 0.2);
        assert_eq!(gen["topP"], 0.9);
        assert_eq!(gen["topK"], 40);
        assert_eq!(gen["maxOutputTokens"], 512);
    }

    #[test]
    fn body_omits_generation_config_by_default() {
        let body = GeminiProvider::build_body(&request_with(ModelParams::default()));
        assert!(body.get("generationConfig").is_none());
        assert!(body.get("safetySettings").is_none());
    }

    #[test]
    fn parses_text_and_usage() {
        let value = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{"text": "one "}, {"text": "two"}] }
            }],
            "usageMetadata": { "promptTokenCount": 10, "candidatesTokenCount": 4 }
        });
        let resp = GeminiProvider::parse_response(&value).unwrap();
        assert_eq!(resp.text, "one two");
        assert_eq!(resp.input_tokens, Some(10));
        assert_eq!(resp.output_tokens, Some(4));
    }

    #[test]
    fn missing_usage_yields_none() {
        let value = serde_json::json!({
            "candidates": [{ "content": { "parts": [{"text": "hi"}] } }]
        });
        let resp = GeminiProvider::parse_response(&value).unwrap();
        assert_eq!(resp.input_tokens, None);
        assert_eq!(resp.output_tokens, None);
    }

    #[test]
    fn empty_candidates_is_transport_error() {
        let err = GeminiProvider::parse_response(&serde_json::json!({})).unwrap_err();
        assert_eq!(err.kind(), "llm_transport_error");
    }
}
