//! Error injection for simulated instruments.
//!
//! Failures surface as [`DriverError`]s so callers see the same error type a
//! vendor driver would produce.

use super::rng::MockRng;
use labscope_core::error::{DriverError, DriverErrorKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Error injection configuration
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Per-operation failure rate (0.0 to 1.0); "*" matches every operation
    failure_rates: Arc<HashMap<&'static str, f64>>,
    scenarios: Arc<Vec<ErrorScenario>>,
    rng: Arc<MockRng>,
    counts: Arc<Mutex<HashMap<&'static str, u32>>>,
}

#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Fail every call of `operation` after `count` successful ones
    FailAfterN { operation: &'static str, count: u32 },
    /// Every call of `operation` times out
    Timeout { operation: &'static str },
}

impl ErrorConfig {
    /// No injected errors (default)
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    /// Uniform random failures on every operation
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*", rate);
        Self::build(rates, Vec::new(), seed)
    }

    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::build(HashMap::new(), vec![scenario], None)
    }

    fn build(
        rates: HashMap<&'static str, f64>,
        scenarios: Vec<ErrorScenario>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            failure_rates: Arc::new(rates),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(seed)),
            counts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check whether `operation` should fail now.
    pub fn check_operation(
        &self,
        driver_type: &str,
        operation: &'static str,
    ) -> Result<(), DriverError> {
        let mut counts = self.counts.lock();
        let seen = counts.entry(operation).or_insert(0);
        *seen += 1;

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation && *seen > *count => {
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Hardware,
                        format!("Injected failure after {} operations", count),
                    ));
                }
                ErrorScenario::Timeout { operation: op } if *op == operation => {
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Timeout,
                        format!("Operation '{}' timed out", operation),
                    ));
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);

        if self.rng.should_fail(rate) {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Hardware,
                format!("Random failure on operation '{}'", operation),
            ));
        }
        Ok(())
    }

    /// Clear operation counters.
    pub fn reset(&self) {
        self.counts.lock().clear();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_errors() {
        let config = ErrorConfig::none();
        for _ in 0..100 {
            assert!(config.check_operation("mock_ccd", "start_acquisition").is_ok());
        }
    }

    #[test]
    fn test_fail_after_n() {
        let config = ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "start_acquisition",
            count: 3,
        });
        for _ in 0..3 {
            assert!(config.check_operation("mock_ccd", "start_acquisition").is_ok());
        }
        let err = config
            .check_operation("mock_ccd", "start_acquisition")
            .unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Hardware);
        // other operations are unaffected
        assert!(config.check_operation("mock_ccd", "status").is_ok());

        config.reset();
        assert!(config.check_operation("mock_ccd", "start_acquisition").is_ok());
    }

    #[test]
    fn test_timeout() {
        let config = ErrorConfig::scenario(ErrorScenario::Timeout { operation: "move" });
        let err = config.check_operation("mock_axis", "move").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Timeout);
    }

    #[test]
    fn test_random_failures() {
        let config = ErrorConfig::random_failures_seeded(0.5, Some(42));
        let failures = (0..1000)
            .filter(|_| config.check_operation("mock_ccd", "status").is_err())
            .count();
        assert!(failures > 400 && failures < 600, "Got {} failures", failures);
    }
}
