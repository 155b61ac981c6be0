//! Operational modes for simulated instruments.

use serde::Deserialize;

/// Operational modes for simulated instruments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockMode {
    /// Zero delays, deterministic - for unit tests
    #[default]
    Instant,
    /// Hardware-like timing - for demos and integration runs
    Realistic,
}

impl MockMode {
    pub fn is_realistic(self) -> bool {
        matches!(self, MockMode::Realistic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode() {
        assert_eq!(MockMode::default(), MockMode::Instant);
        assert!(!MockMode::Instant.is_realistic());
    }

    #[test]
    fn test_mode_from_config() {
        #[derive(Deserialize)]
        struct Cfg {
            mode: MockMode,
        }
        let cfg: Cfg = toml::from_str("mode = \"realistic\"").unwrap();
        assert_eq!(cfg.mode, MockMode::Realistic);
    }
}
