//! Simulated single positioning axis.
//!
//! Records every commanded target so scan tests can check the exact move
//! sequence (including backlash overshoots). Optional mechanical backlash
//! makes the reached position lag the command whenever the direction of
//! travel reverses.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use labscope_core::{Movable, Parameter, ParameterSet, Parameterized};
use parking_lot::Mutex;
use tokio::time::sleep;

use crate::common::{ErrorConfig, MockMode, TimingConfig};

/// What happens to targets outside the travel range
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimitBehavior {
    HardStop,
    Clamp,
}

/// Axis travel range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisLimits {
    pub min_position: f64,
    pub max_position: f64,
    pub behavior: LimitBehavior,
}

impl AxisLimits {
    pub fn hard_stop(min: f64, max: f64) -> Self {
        Self {
            min_position: min,
            max_position: max,
            behavior: LimitBehavior::HardStop,
        }
    }

    pub fn clamp(min: f64, max: f64) -> Self {
        Self {
            min_position: min,
            max_position: max,
            behavior: LimitBehavior::Clamp,
        }
    }

    fn enforce(&self, target: f64) -> Result<f64> {
        match self.behavior {
            LimitBehavior::Clamp => Ok(target.clamp(self.min_position, self.max_position)),
            LimitBehavior::HardStop => {
                if target < self.min_position || target > self.max_position {
                    Err(anyhow!(
                        "Position {:.3}um exceeds limits [{:.3}, {:.3}]um",
                        target,
                        self.min_position,
                        self.max_position
                    ))
                } else {
                    Ok(target)
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct AxisState {
    commanded: f64,
    actual: f64,
    /// +1 / -1 for the last direction of travel, 0 before the first move
    direction: f64,
    history: Vec<f64>,
}

/// Simulated axis
pub struct MockAxis {
    name: String,
    limits: Option<AxisLimits>,
    backlash: f64,
    speed: f64,
    mode: MockMode,
    timing: TimingConfig,
    errors: ErrorConfig,
    state: Mutex<AxisState>,
    position: Parameter<f64>,
    params: ParameterSet,
}

impl MockAxis {
    pub fn new(name: impl Into<String>) -> Self {
        Self::builder(name).build()
    }

    pub fn builder(name: impl Into<String>) -> MockAxisBuilder {
        MockAxisBuilder {
            name: name.into(),
            initial_position: 0.0,
            limits: None,
            backlash: 0.0,
            speed: 100.0,
            mode: MockMode::Instant,
            errors: ErrorConfig::none(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every commanded target, in order.
    pub fn history(&self) -> Vec<f64> {
        self.state.lock().history.clone()
    }

    pub fn clear_history(&self) {
        self.state.lock().history.clear();
    }

    /// Position the mechanics actually reached (differs from the command by
    /// the backlash after a reversal).
    pub fn actual_position(&self) -> f64 {
        self.state.lock().actual
    }
}

/// Builder for [`MockAxis`]
pub struct MockAxisBuilder {
    name: String,
    initial_position: f64,
    limits: Option<AxisLimits>,
    backlash: f64,
    speed: f64,
    mode: MockMode,
    errors: ErrorConfig,
}

impl MockAxisBuilder {
    pub fn initial_position(mut self, position: f64) -> Self {
        self.initial_position = position;
        self
    }

    pub fn limits(mut self, limits: AxisLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Mechanical slack in micrometres.
    pub fn backlash(mut self, backlash: f64) -> Self {
        self.backlash = backlash.abs();
        self
    }

    /// Travel speed in um/s (realistic mode only).
    pub fn speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    pub fn build(self) -> MockAxis {
        let mut params = ParameterSet::new();
        let position = params.add(
            Parameter::new(format!("{}_position", self.name), self.initial_position)
                .with_unit("um")
                .read_only(),
        );
        MockAxis {
            limits: self.limits,
            backlash: self.backlash,
            speed: self.speed,
            timing: if self.mode.is_realistic() {
                TimingConfig::stage()
            } else {
                TimingConfig::default()
            },
            mode: self.mode,
            errors: self.errors,
            state: Mutex::new(AxisState {
                commanded: self.initial_position,
                actual: self.initial_position,
                ..AxisState::default()
            }),
            position,
            params,
            name: self.name,
        }
    }
}

#[async_trait]
impl Movable for MockAxis {
    async fn move_abs(&self, position: f64) -> Result<()> {
        self.errors.check_operation("mock_axis", "move")?;
        let target = match &self.limits {
            Some(limits) => limits.enforce(position)?,
            None => position,
        };

        let distance = {
            let mut state = self.state.lock();
            let delta = target - state.commanded;
            let distance = delta.abs();
            if delta != 0.0 {
                let direction = delta.signum();
                // the first `backlash` of travel after a reversal takes up slack
                let slack = if state.direction != 0.0 && direction != state.direction {
                    self.backlash.min(distance)
                } else {
                    0.0
                };
                state.actual += direction * (distance - slack);
                state.direction = direction;
            }
            state.commanded = target;
            state.history.push(target);
            distance
        };

        if self.mode.is_realistic() && self.speed > 0.0 {
            sleep(std::time::Duration::from_secs_f64(distance / self.speed)).await;
            sleep(self.timing.settling()).await;
        }
        self.position.store(target);
        Ok(())
    }

    async fn position(&self) -> Result<f64> {
        Ok(self.state.lock().commanded)
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

impl Parameterized for MockAxis {
    fn parameters(&self) -> &ParameterSet {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_history_and_position() {
        let axis = MockAxis::new("x");
        axis.move_abs(10.0).await.unwrap();
        axis.move_rel(-2.5).await.unwrap();
        assert_eq!(axis.position().await.unwrap(), 7.5);
        assert_eq!(axis.history(), vec![10.0, 7.5]);
        assert_eq!(axis.parameters().names(), &["x_position"]);
    }

    #[tokio::test]
    async fn limits() {
        let axis = MockAxis::builder("y")
            .limits(AxisLimits::hard_stop(0.0, 100.0))
            .build();
        assert!(axis.move_abs(150.0).await.is_err());
        assert!(axis.history().is_empty());

        let axis = MockAxis::builder("y")
            .limits(AxisLimits::clamp(0.0, 100.0))
            .build();
        axis.move_abs(150.0).await.unwrap();
        assert_eq!(axis.position().await.unwrap(), 100.0);
    }

    #[tokio::test]
    async fn backlash_lags_on_reversal() {
        let axis = MockAxis::builder("x").backlash(0.5).build();
        axis.move_abs(10.0).await.unwrap();
        assert_eq!(axis.actual_position(), 10.0);

        // reversal: the first 0.5 um only takes up slack
        axis.move_abs(8.0).await.unwrap();
        assert!((axis.actual_position() - 8.5).abs() < 1e-12);

        // same direction again: full travel
        axis.move_abs(6.0).await.unwrap();
        assert!((axis.actual_position() - 6.5).abs() < 1e-12);
    }
}
