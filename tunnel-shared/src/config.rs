//! On-disk configuration for the tunnel's timing knobs.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TunnelError};

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    60_000
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        TunnelConfig {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl TunnelConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            TunnelError::HandshakeFailed {
                reason: format!("reading config {}: {e}", path.as_ref().display()),
            }
        })?;
        toml::from_str(&contents).map_err(|e| TunnelError::HandshakeFailed {
            reason: format!("parsing config: {e}"),
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self).map_err(|e| TunnelError::HandshakeFailed {
            reason: format!("serializing config: {e}"),
        })?;
        std::fs::write(path.as_ref(), contents).map_err(|e| TunnelError::HandshakeFailed {
            reason: format!("writing config {}: {e}", path.as_ref().display()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = TunnelConfig::default();
        assert_eq!(cfg.heartbeat_interval_ms, 30_000);
        assert_eq!(cfg.heartbeat_timeout_ms, 60_000);
        assert_eq!(cfg.reconnect_delay_ms, 1_000);
        assert_eq!(cfg.request_timeout_ms, 30_000);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = TunnelConfig {
            heartbeat_interval_ms: 5_000,
            ..TunnelConfig::default()
        };
        let s = toml::to_string_pretty(&cfg).unwrap();
        let back: TunnelConfig = toml::from_str(&s).unwrap();
        assert_eq!(back.heartbeat_interval_ms, 5_000);
    }
}
