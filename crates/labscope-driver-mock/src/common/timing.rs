//! Timing configuration for realistic mode.

use std::time::Duration;

/// Hardware-like delays
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingConfig {
    /// Detector readout after exposure, milliseconds
    pub readout_ms: u64,
    /// Settling after a move, milliseconds
    pub settling_time_ms: u64,
    /// Per-call communication delay, milliseconds
    pub communication_delay_ms: u64,
}

impl TimingConfig {
    /// Spectroscopy CCD: full vertical binning readout of a 1600 px sensor
    pub fn ccd() -> Self {
        Self {
            readout_ms: 15,
            settling_time_ms: 0,
            communication_delay_ms: 1,
        }
    }

    /// Piezo / stepper stage
    pub fn stage() -> Self {
        Self {
            readout_ms: 0,
            settling_time_ms: 20,
            communication_delay_ms: 2,
        }
    }

    pub fn readout(&self) -> Duration {
        Duration::from_millis(self.readout_ms)
    }

    pub fn settling(&self) -> Duration {
        Duration::from_millis(self.settling_time_ms)
    }

    pub fn communication(&self) -> Duration {
        Duration::from_millis(self.communication_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing_is_zero() {
        let config = TimingConfig::default();
        assert_eq!(config.readout(), Duration::ZERO);
        assert_eq!(config.settling(), Duration::ZERO);
    }

    #[test]
    fn test_presets() {
        assert_eq!(TimingConfig::ccd().readout_ms, 15);
        assert_eq!(TimingConfig::stage().settling_time_ms, 20);
    }
}
