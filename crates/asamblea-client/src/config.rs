use std::time::Duration;

use serde::Deserialize;

/// Poll band within which the fallback re-fetch stays useful.
const MIN_POLL_MS: u64 = 1_000;
const MAX_POLL_MS: u64 = 5_000;

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Assembly access code forwarded on every request. Configuration
    /// input, never baked into the binary.
    #[serde(default)]
    pub codigo: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl ClientConfig {
    /// Reads `ASAMBLEA_*` environment variables, falling back to defaults
    /// when unset or unparsable.
    pub fn from_env() -> Self {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("ASAMBLEA"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map(ClientConfig::normalize)
            .unwrap_or_else(|_| ClientConfig::default().normalize())
    }

    fn normalize(mut self) -> Self {
        self.codigo = Self::normalize_opt(self.codigo.take());
        self.poll_interval_ms = self.poll_interval_ms.clamp(MIN_POLL_MS, MAX_POLL_MS);
        self.tick_interval_ms = self.tick_interval_ms.max(100);
        self
    }

    fn normalize_opt(value: Option<String>) -> Option<String> {
        value.and_then(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            codigo: None,
            poll_interval_ms: default_poll_interval_ms(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:54321".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_stay_in_the_poll_band() {
        let config = ClientConfig::default().normalize();
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
    }

    #[test]
    fn out_of_band_polls_are_clamped() {
        let config = ClientConfig {
            poll_interval_ms: 50,
            ..ClientConfig::default()
        }
        .normalize();
        assert_eq!(config.poll_interval_ms, MIN_POLL_MS);

        let config = ClientConfig {
            poll_interval_ms: 60_000,
            ..ClientConfig::default()
        }
        .normalize();
        assert_eq!(config.poll_interval_ms, MAX_POLL_MS);
    }

    #[test]
    fn blank_codigo_normalizes_to_none() {
        let config = ClientConfig {
            codigo: Some("   ".into()),
            ..ClientConfig::default()
        }
        .normalize();
        assert_eq!(config.codigo, None);
    }
}
