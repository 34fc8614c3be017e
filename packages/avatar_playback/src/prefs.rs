//! Client playback preferences.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Slowest reveal speed maps to this per-character delay.
const MAX_REVEAL_DELAY_MS: u64 = 200;

/// User-tunable playback settings, persisted by the client between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub auto_read_enabled: bool,
    #[serde(default = "default_auto_read_interval_ms")]
    pub auto_read_interval_ms: u64,
    #[serde(default)]
    pub auto_record_enabled: bool,
    /// Higher is faster; the reveal delay is `200 - text_speed` ms
    #[serde(default = "default_text_speed")]
    pub text_speed: u64,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            auto_read_enabled: false,
            auto_read_interval_ms: default_auto_read_interval_ms(),
            auto_record_enabled: false,
            text_speed: default_text_speed(),
        }
    }
}

fn default_auto_read_interval_ms() -> u64 {
    2000
}

fn default_text_speed() -> u64 {
    50
}

impl Preferences {
    pub fn auto_read_interval(&self) -> Duration {
        Duration::from_millis(self.auto_read_interval_ms)
    }

    /// Per-character delay of the text reveal.
    pub fn reveal_delay(&self) -> Duration {
        Duration::from_millis(MAX_REVEAL_DELAY_MS.saturating_sub(self.text_speed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let p = Preferences::default();
        assert!(!p.auto_read_enabled);
        assert!(!p.auto_record_enabled);
        assert_eq!(p.auto_read_interval(), Duration::from_millis(2000));
        assert_eq!(p.reveal_delay(), Duration::from_millis(150));
    }

    #[test]
    fn reveal_delay_saturates() {
        let p = Preferences {
            text_speed: 500,
            ..Default::default()
        };
        assert_eq!(p.reveal_delay(), Duration::ZERO);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let p: Preferences = serde_json::from_str(r#"{"auto_read_enabled":true}"#).unwrap();
        assert!(p.auto_read_enabled);
        assert_eq!(p.auto_read_interval_ms, 2000);
        assert_eq!(p.text_speed, 50);
    }
}
