use serde::{Deserialize, Serialize};

use rp_domain::{Error, Result};

/// Process-level engine configuration.
///
/// Distinct from per-evaluation settings: these knobs size shared resources
/// and are read once at startup, typically from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
}

/// Evaluation state cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "d_64")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: d_64() }
    }
}

/// Background persistence pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    #[serde(default = "d_5")]
    pub workers: usize,
    #[serde(default = "d_256")]
    pub queue_capacity: usize,
    /// Above this many pending batches, writes fall back to synchronous.
    #[serde(default = "d_192")]
    pub high_water: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            workers: d_5(),
            queue_capacity: d_256(),
            high_water: d_192(),
        }
    }
}

/// LLM provider wiring, used by the CLI to construct the Gemini adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Override the provider base URL (e.g. for a local proxy).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default = "d_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_model")]
    pub default_model: String,
    /// Capture-log capacity of the gateway.
    #[serde(default = "d_64")]
    pub capture_capacity: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: d_key_env(),
            default_model: d_model(),
            capture_capacity: d_64(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Configuration(e.to_string()))
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        Self::from_toml_str(&raw)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_5() -> usize {
    5
}
fn d_64() -> usize {
    64
}
fn d_192() -> usize {
    192
}
fn d_256() -> usize {
    256
}
fn d_key_env() -> String {
    "GEMINI_API_KEY".into()
}
fn d_model() -> String {
    "gemini-2.0-flash".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.cache.capacity, 64);
        assert_eq!(config.writer.workers, 5);
        assert_eq!(config.writer.high_water, 192);
        assert_eq!(config.provider.api_key_env, "GEMINI_API_KEY");
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config = EngineConfig::from_toml_str(
            r#"
            [writer]
            workers = 2

            [provider]
            default_model = "gemini-2.0-pro"
            "#,
        )
        .unwrap();
        assert_eq!(config.writer.workers, 2);
        assert_eq!(config.writer.queue_capacity, 256);
        assert_eq!(config.provider.default_model, "gemini-2.0-pro");
    }

    #[test]
    fn malformed_toml_is_a_configuration_error() {
        let err = EngineConfig::from_toml_str("writer = 3").unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
    }
}
