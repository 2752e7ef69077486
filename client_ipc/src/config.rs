//! Per-context bus configuration
//!
//! Configuration is a typed value handed to the channel proxy when the
//! context is created. There are no config files or environment lookups;
//! embedders that persist settings store the JSON form.

use ipc::DEFAULT_MAX_FRAME_LEN;
use serde::{Deserialize, Serialize};
use structured_value::{CodecLimits, DEFAULT_MAX_DEPTH, MAX_SUPPORTED_DEPTH};
use thiserror::Error;

/// Errors when loading a configuration
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration document: {0}")]
    Parse(String),

    #[error("Invalid configuration value: {0} must be greater than zero")]
    Zero(&'static str),

    #[error("Invalid configuration value: max_depth {max_depth} exceeds the wire limit of {limit}")]
    DepthBeyondWire { max_depth: usize, limit: usize },
}

/// Limits applied by one channel proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Nesting limit for outgoing values, at most [`MAX_SUPPORTED_DEPTH`]
    pub max_depth: usize,
    /// Outstanding `invoke`/`send_sync` calls allowed at once
    pub max_pending_calls: usize,
    /// Largest inbound frame accepted, in bytes
    pub max_frame_len: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_pending_calls: 1024,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl BridgeConfig {
    /// Parses and validates a JSON document; missing fields take defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig =
            serde_json::from_str(json).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth == 0 {
            return Err(ConfigError::Zero("max_depth"));
        }
        if self.max_depth > MAX_SUPPORTED_DEPTH {
            return Err(ConfigError::DepthBeyondWire {
                max_depth: self.max_depth,
                limit: MAX_SUPPORTED_DEPTH,
            });
        }
        if self.max_pending_calls == 0 {
            return Err(ConfigError::Zero("max_pending_calls"));
        }
        if self.max_frame_len == 0 {
            return Err(ConfigError::Zero("max_frame_len"));
        }
        Ok(())
    }

    pub fn codec_limits(&self) -> CodecLimits {
        CodecLimits {
            max_depth: self.max_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_uses_defaults() {
        let config = BridgeConfig::from_json(r#"{ "max_pending_calls": 8 }"#).unwrap();
        assert_eq!(config.max_pending_calls, 8);
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(config.max_frame_len, DEFAULT_MAX_FRAME_LEN);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result = BridgeConfig::from_json(r#"{ "max_pendng_calls": 8 }"#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_zero_limits_rejected() {
        assert_eq!(
            BridgeConfig::from_json(r#"{ "max_depth": 0 }"#),
            Err(ConfigError::Zero("max_depth"))
        );
    }

    #[test]
    fn test_depth_beyond_wire_rejected() {
        let json = format!(r#"{{ "max_depth": {} }}"#, MAX_SUPPORTED_DEPTH + 1);
        assert_eq!(
            BridgeConfig::from_json(&json),
            Err(ConfigError::DepthBeyondWire {
                max_depth: MAX_SUPPORTED_DEPTH + 1,
                limit: MAX_SUPPORTED_DEPTH,
            })
        );

        let json = format!(r#"{{ "max_depth": {} }}"#, MAX_SUPPORTED_DEPTH);
        assert!(BridgeConfig::from_json(&json).is_ok());
        assert!(BridgeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = BridgeConfig {
            max_depth: 10,
            max_pending_calls: 3,
            max_frame_len: 4096,
        };
        let json = config.to_json().unwrap();
        assert_eq!(BridgeConfig::from_json(&json).unwrap(), config);
        assert_eq!(config.codec_limits().max_depth, 10);
    }
}
