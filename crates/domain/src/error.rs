/// Shared error type used across all replay crates.
///
/// Variants map one-to-one onto the failure kinds the engine reports:
/// the `kind()` string is what lands in turn results and metadata.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("template: {0}")]
    Template(String),

    #[error("LLM timeout after {timeout_ms}ms in {stage}")]
    LlmTimeout { stage: &'static str, timeout_ms: u64 },

    #[error("LLM transport: {0}")]
    LlmTransport(String),

    #[error("LLM quota: {0}")]
    LlmQuota(String),

    #[error("decision parse: {0}")]
    DecisionParse(String),

    #[error("function validation: {0}")]
    FunctionValidation(String),

    #[error("function execution: {0}")]
    FunctionExecution(String),

    #[error("persistence: {0}")]
    Persistence(String),

    #[error("configuration: {0}")]
    Configuration(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Stable machine-readable kind for structured reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Template(_) => "template_render_error",
            Error::LlmTimeout { .. } => "llm_timeout",
            Error::LlmTransport(_) => "llm_transport_error",
            Error::LlmQuota(_) => "llm_quota_error",
            Error::DecisionParse(_) => "decision_parse_error",
            Error::FunctionValidation(_) => "function_validation_error",
            Error::FunctionExecution(_) => "function_execution_error",
            Error::Persistence(_) => "persistence_error",
            Error::Configuration(_) => "configuration_error",
            Error::NotFound(_) => "not_found",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(
            Error::LlmTimeout {
                stage: "cleaner",
                timeout_ms: 3000
            }
            .kind(),
            "llm_timeout"
        );
        assert_eq!(Error::Template("x".into()).kind(), "template_render_error");
        assert_eq!(Error::Persistence("x".into()).kind(), "persistence_error");
    }

    #[test]
    fn timeout_display_names_stage() {
        let e = Error::LlmTimeout {
            stage: "decider",
            timeout_ms: 250,
        };
        let msg = e.to_string();
        assert!(msg.contains("decider"));
        assert!(msg.contains("250"));
    }
}
