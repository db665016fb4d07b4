use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::body::BodyLimits;
use crate::http1::HttpLimits;
use crate::websocket::WebSocketConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialization failed: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Limits for every protocol layer, stored as TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub http: HttpLimits,
    pub body: BodyLimits,
    pub websocket: WebSocketConfig,
}

impl EngineConfig {
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            Self::from_toml_str(&raw)
        } else {
            let config = Self::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::{ConfigError, EngineConfig};

    #[test]
    fn defaults_match_documented_limits() {
        let config = EngineConfig::default();
        assert_eq!(config.http.max_header_bytes, 16384);
        assert_eq!(config.body.max_memory_bytes, 32768);
        assert_eq!(config.body.max_file_count, 4);
        assert_eq!(config.websocket.max_message_size, 8192);
        assert_eq!(config.websocket.max_frame_payload, 16384);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = EngineConfig::from_toml_str(
            "[http]\nmax_header_bytes = 512\n\n[websocket]\nmax_message_size = 1024\n",
        )
        .unwrap();
        assert_eq!(config.http.max_header_bytes, 512);
        assert_eq!(config.http.max_start_line_bytes, 4096);
        assert_eq!(config.websocket.max_message_size, 1024);
        assert_eq!(config.body, Default::default());
    }

    #[test]
    fn rejects_wrong_types() {
        assert_matches!(
            EngineConfig::from_toml_str("[body]\nmax_file_count = \"many\"\n"),
            Err(ConfigError::Parse(_))
        );
    }

    #[test]
    fn load_or_create_writes_defaults_then_reads_them_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        let created = EngineConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created, EngineConfig::default());

        let mut changed = created.clone();
        changed.body.max_file_bytes = 1024;
        changed.body.temp_dir = dir.path().display().to_string();
        changed.save(&path).unwrap();
        assert_eq!(EngineConfig::load_or_create(&path).unwrap(), changed);
    }
}
