//! The cleaner stage.
//!
//! Assistant-side turns bypass the LLM entirely; user turns get one
//! completion call whose result is parsed leniently (a structured JSON
//! answer when the template asks for one, plain text otherwise). Timeouts
//! and transport failures degrade to a raw-text fallback rather than
//! failing the turn, unless the evaluation runs with `strict_cleaner`.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::Value;

use rp_domain::{
    CleaningLevel, Confidence, Correction, EvalSettings, PromptTemplate, Result, Turn,
};
use rp_llm::{LlmExchange, LlmGateway};

use crate::context::cleaner_context;
use crate::decision::extract_first_json_object;
use crate::state::CleanedLogEntry;

/// Sentinel model name recorded for bypassed turns.
pub const BYPASS_MODEL: &str = "bypass";

/// What the cleaner produced for one turn, plus how it got there.
#[derive(Debug, Clone)]
pub struct CleanerOutput {
    pub cleaned_text: String,
    pub confidence: Confidence,
    pub cleaning_applied: bool,
    pub cleaning_level: CleaningLevel,
    pub corrections: Vec<Correction>,
    pub context_detected: String,
    pub ai_model_used: String,
    /// The raw LLM exchange; `None` for bypassed turns.
    pub exchange: Option<LlmExchange>,
    pub template_variables: BTreeMap<String, Value>,
    /// Failure kind when the fallback path was taken.
    pub degraded: Option<&'static str>,
    pub prompt_preparation_ms: f64,
    pub api_ms: f64,
    pub parsing_ms: f64,
}

/// The structured answer the cleaner template may request.
#[derive(Debug, Deserialize)]
struct StructuredCleanResult {
    cleaned_text: String,
    #[serde(default)]
    confidence_score: Option<Confidence>,
    #[serde(default)]
    corrections: Vec<Correction>,
    #[serde(default)]
    context_detected: Option<String>,
}

/// Run the cleaner for `turn`.
///
/// Errors are fatal only for template rendering (deterministic: every
/// retry would fail the same way) and, when `strict_cleaner` is set, for
/// LLM failures; everything else comes back as a degraded [`CleanerOutput`].
pub async fn run_cleaner(
    gateway: &LlmGateway,
    template: &PromptTemplate,
    turn: &Turn,
    cleaned_log: &[CleanedLogEntry],
    settings: &EvalSettings,
) -> Result<CleanerOutput> {
    // ── Bypass: assistant-side turns never reach the LLM ────────────
    if settings.is_assistant_speaker(&turn.speaker) {
        return Ok(CleanerOutput {
            cleaned_text: turn.raw_text.clone(),
            confidence: Confidence::High,
            cleaning_applied: false,
            cleaning_level: CleaningLevel::None,
            corrections: Vec::new(),
            context_detected: "ai_response".into(),
            ai_model_used: BYPASS_MODEL.into(),
            exchange: None,
            template_variables: BTreeMap::new(),
            degraded: None,
            prompt_preparation_ms: 0.0,
            api_ms: 0.0,
            parsing_ms: 0.0,
        });
    }

    // ── Prompt preparation ──────────────────────────────────────────
    let prep_started = Instant::now();
    let context = cleaner_context(cleaned_log, settings.sliding_window_cleaner);
    let mut vars = BTreeMap::new();
    vars.insert("raw_text".to_owned(), Value::String(turn.raw_text.clone()));
    vars.insert("speaker".to_owned(), Value::String(turn.speaker.clone()));
    vars.insert("cleaned_context".to_owned(), Value::String(context));
    vars.insert(
        "cleaning_level".to_owned(),
        Value::String(settings.cleaning_level.as_str().to_owned()),
    );
    let rendered = rp_templates::render(&template.template_text, &vars)?;
    let prompt_preparation_ms = prep_started.elapsed().as_secs_f64() * 1_000.0;

    let params = &settings.cleaner_model_params;

    // ── LLM call ────────────────────────────────────────────────────
    let api_started = Instant::now();
    let reply = gateway
        .call(
            "cleaner",
            &rendered.text,
            params,
            Duration::from_millis(settings.cleaner_timeout_ms),
        )
        .await;
    let api_ms = api_started.elapsed().as_secs_f64() * 1_000.0;

    let reply = match reply {
        Ok(reply) => reply,
        Err(failed) => {
            if settings.strict_cleaner {
                return Err(failed.error);
            }
            tracing::info!(
                turn_sequence = turn.turn_sequence,
                kind = failed.kind(),
                "cleaner degraded to raw-text fallback"
            );
            // The failed exchange rides on the error itself; the shared
            // capture log may already hold another evaluation's call.
            return Ok(CleanerOutput {
                cleaned_text: turn.raw_text.clone(),
                confidence: Confidence::Low,
                cleaning_applied: false,
                cleaning_level: settings.cleaning_level,
                corrections: Vec::new(),
                context_detected: "api_error".into(),
                ai_model_used: params.model_name.clone(),
                degraded: Some(failed.error.kind()),
                exchange: Some(failed.exchange),
                template_variables: rendered.variables,
                prompt_preparation_ms,
                api_ms,
                parsing_ms: 0.0,
            });
        }
    };

    // ── Response parsing ────────────────────────────────────────────
    let parse_started = Instant::now();
    let raw_trimmed = turn.raw_text.trim();
    let structured = extract_first_json_object(&reply.text)
        .and_then(|json| serde_json::from_str::<StructuredCleanResult>(json).ok());

    let (cleaned_text, doc_confidence, corrections, context_detected, structured_mode) =
        match structured {
            Some(doc) => (
                doc.cleaned_text.trim().to_owned(),
                doc.confidence_score,
                doc.corrections,
                doc.context_detected
                    .unwrap_or_else(|| "conversation".to_owned()),
                true,
            ),
            // Any parse failure degrades to text mode.
            None => (
                reply.text.trim().to_owned(),
                None,
                Vec::new(),
                "conversation".to_owned(),
                false,
            ),
        };

    let cleaning_applied = cleaned_text != raw_trimmed;
    let confidence = match (doc_confidence, structured_mode, cleaning_applied) {
        (Some(c), _, _) => c,
        // An LLM round-trip that changed nothing is only medium-trust, as
        // is a response we had to take as plain text.
        (None, true, true) => Confidence::High,
        _ => Confidence::Medium,
    };
    let parsing_ms = parse_started.elapsed().as_secs_f64() * 1_000.0;

    Ok(CleanerOutput {
        cleaned_text,
        confidence,
        cleaning_applied,
        cleaning_level: settings.cleaning_level,
        corrections,
        context_detected,
        ai_model_used: params.model_name.clone(),
        exchange: Some(reply.exchange),
        template_variables: rendered.variables,
        degraded: None,
        prompt_preparation_ms,
        api_ms,
        parsing_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rp_llm::{ScriptedProvider, ScriptedReply};
    use std::sync::Arc;
    use uuid::Uuid;

    fn make_turn(speaker: &str, text: &str) -> Turn {
        Turn {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            turn_sequence: 1,
            speaker: speaker.into(),
            raw_text: text.into(),
        }
    }

    fn cleaner_template() -> PromptTemplate {
        PromptTemplate {
            id: Uuid::new_v4(),
            name: "cleaner".into(),
            template_text:
                "Context:\n{{ cleaned_context }}\nLevel: {{ cleaning_level }}\n{{ speaker }}: {{ raw_text }}"
                    .into(),
            variables: vec![
                "raw_text".into(),
                "speaker".into(),
                "cleaned_context".into(),
                "cleaning_level".into(),
            ],
        }
    }

    fn gateway_with(replies: Vec<ScriptedReply>) -> LlmGateway {
        let provider = ScriptedProvider::new();
        for r in replies {
            provider.push(r);
        }
        LlmGateway::new(Arc::new(provider))
    }

    #[tokio::test]
    async fn assistant_turn_bypasses_without_llm_call() {
        let provider = Arc::new(ScriptedProvider::new());
        let gateway = LlmGateway::new(provider.clone());
        let turn = make_turn("Lumen", "OK.");

        let out = run_cleaner(
            &gateway,
            &cleaner_template(),
            &turn,
            &[],
            &EvalSettings::default(),
        )
        .await
        .unwrap();

        assert_eq!(out.cleaned_text, "OK.");
        assert!(!out.cleaning_applied);
        assert_eq!(out.cleaning_level, CleaningLevel::None);
        assert_eq!(out.confidence, Confidence::High);
        assert_eq!(out.ai_model_used, BYPASS_MODEL);
        assert_eq!(out.context_detected, "ai_response");
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn structured_response_is_parsed() {
        let gateway = gateway_with(vec![ScriptedReply::Text(
            r#"{"cleaned_text": "I am the Director of Marketing",
                "corrections": [{"original": "vector", "corrected": "Director"}]}"#
                .into(),
        )]);
        let turn = make_turn("User", "I am the vector of Marketing");

        let out = run_cleaner(
            &gateway,
            &cleaner_template(),
            &turn,
            &[],
            &EvalSettings::default(),
        )
        .await
        .unwrap();

        assert_eq!(out.cleaned_text, "I am the Director of Marketing");
        assert!(out.cleaning_applied);
        assert_eq!(out.confidence, Confidence::High);
        assert_eq!(out.corrections.len(), 1);
        assert!(out.exchange.is_some());
    }

    #[tokio::test]
    async fn plain_text_response_degrades_to_medium() {
        let gateway = gateway_with(vec![ScriptedReply::Text(
            "I am the Director of Marketing\n".into(),
        )]);
        let turn = make_turn("User", "I am the vector of Marketing");

        let out = run_cleaner(
            &gateway,
            &cleaner_template(),
            &turn,
            &[],
            &EvalSettings::default(),
        )
        .await
        .unwrap();

        assert_eq!(out.cleaned_text, "I am the Director of Marketing");
        assert!(out.cleaning_applied);
        assert_eq!(out.confidence, Confidence::Medium);
        assert!(out.corrections.is_empty());
    }

    #[tokio::test]
    async fn identical_cleaning_is_medium_confidence() {
        let gateway = gateway_with(vec![ScriptedReply::Text(
            r#"{"cleaned_text": "Yes"}"#.into(),
        )]);
        let turn = make_turn("User", "Yes");

        let out = run_cleaner(
            &gateway,
            &cleaner_template(),
            &turn,
            &[],
            &EvalSettings::default(),
        )
        .await
        .unwrap();

        assert!(!out.cleaning_applied);
        assert_eq!(out.confidence, Confidence::Medium);
    }

    #[tokio::test]
    async fn transport_failure_falls_back_to_raw_text() {
        let gateway = gateway_with(vec![ScriptedReply::TransportError("down".into())]);
        let turn = make_turn("User", "I am the vector of Marketing");

        let out = run_cleaner(
            &gateway,
            &cleaner_template(),
            &turn,
            &[],
            &EvalSettings::default(),
        )
        .await
        .unwrap();

        assert_eq!(out.cleaned_text, "I am the vector of Marketing");
        assert_eq!(out.confidence, Confidence::Low);
        assert!(!out.cleaning_applied);
        assert_eq!(out.context_detected, "api_error");
        assert_eq!(out.degraded, Some("llm_transport_error"));
        // The failed exchange rode back with the error and describes this
        // turn's own prompt.
        let exchange = out.exchange.unwrap();
        assert!(!exchange.success);
        assert!(exchange.prompt.contains("I am the vector of Marketing"));
        assert!(exchange.response_text.is_none());
    }

    #[tokio::test]
    async fn strict_cleaner_promotes_failure_to_error() {
        let gateway = gateway_with(vec![ScriptedReply::TransportError("down".into())]);
        let turn = make_turn("User", "hello");
        let settings = EvalSettings::from_value(serde_json::json!({"strict_cleaner": true})).unwrap();

        let err = run_cleaner(&gateway, &cleaner_template(), &turn, &[], &settings)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "llm_transport_error");
    }

    #[tokio::test]
    async fn timeout_yields_api_error_fallback() {
        let gateway = gateway_with(vec![ScriptedReply::Hang(Duration::from_secs(5))]);
        let turn = make_turn("User", "slow request");
        let settings =
            EvalSettings::from_value(serde_json::json!({"cleaner_timeout_ms": 30})).unwrap();

        let out = run_cleaner(&gateway, &cleaner_template(), &turn, &[], &settings)
            .await
            .unwrap();
        assert_eq!(out.degraded, Some("llm_timeout"));
        assert_eq!(out.context_detected, "api_error");
        assert!(out.api_ms >= 25.0);
    }

    #[tokio::test]
    async fn template_with_unknown_placeholder_is_fatal() {
        let gateway = gateway_with(vec![]);
        let turn = make_turn("User", "x");
        let template = PromptTemplate {
            id: Uuid::new_v4(),
            name: "bad".into(),
            template_text: "{{ not_a_variable }}".into(),
            variables: vec![],
        };

        let err = run_cleaner(&gateway, &template, &turn, &[], &EvalSettings::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "template_render_error");
    }
}
