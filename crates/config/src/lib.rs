use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Model identifier at the runtime, e.g. `llama3.1:8b`.
    pub model: String,
    /// Base URL of the Ollama-compatible runtime.  Overridden at runtime by
    /// the `OLLAMA_BASE_URL` environment variable when set.
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "llama3.1:8b".to_string(),
            base_url: "http://localhost:11434".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub ruleset: String,
    pub clinical_data_model: String,
    /// Root for per-turn persistence and finalize-time reports.
    pub output_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            ruleset: "data/ruleset.json".to_string(),
            clinical_data_model: "data/clinical_data_model.json".to_string(),
            output_dir: "outputs/consultations".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    /// Treat an utterance that references no problem at all as safe to
    /// extract rather than soft-blocking it.
    pub zero_hypothesis_safe: bool,
    /// Size of the lookahead window added to extraction prompts.
    pub lookahead: usize,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self { zero_hypothesis_safe: true, lookahead: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_addr: "127.0.0.1:8900".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub paths: PathsConfig,
    pub triage: TriageConfig,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load from a TOML file; a missing file yields the defaults so a fresh
    /// checkout runs without any configuration step.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::AppConfig;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_from("/definitely/not/here.toml").unwrap();
        assert_eq!(config.paths.ruleset, "data/ruleset.json");
        assert!(config.triage.zero_hypothesis_safe);
        assert_eq!(config.triage.lookahead, 3);
    }

    #[test]
    fn partial_files_keep_defaults_for_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[llm]\nmodel = \"qwen2.5:7b\"\n").unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.llm.model, "qwen2.5:7b");
        assert_eq!(config.llm.base_url, "http://localhost:11434");
        assert_eq!(config.server.bind_addr, "127.0.0.1:8900");
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.triage.lookahead = 5;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.triage.lookahead, 5);
    }
}
