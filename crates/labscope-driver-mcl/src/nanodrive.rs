//! NanoDrive piezo controller.
//!
//! Unlike the MicroDrive the NanoDrive is absolute: moves write the target
//! position and positions come from the sensor readback.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{ensure, Result};
use tracing::{debug, info, warn};

use crate::error::{MclError, MCL_INVALID_AXIS};
use crate::motion::{paced, slow_step_count};
use crate::sdk::{axes_from_bitmap, NanoDriveSdk, DEFAULT_MAX_SPEED, SLOW_STEP_PERIOD};

const ATTACH_TIMEOUT_MS: u32 = 2000;

pub struct MclNanoDrive {
    sdk: Box<dyn NanoDriveSdk>,
    handle: i32,
    debug: bool,
    pub serial_number: i32,
    /// Travel range per axis (um).
    pub cal: BTreeMap<u32, f64>,
    max_speed: f64,
    step_period: Duration,
    closed: bool,
}

impl std::fmt::Debug for MclNanoDrive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MclNanoDrive")
            .field("handle", &self.handle)
            .field("serial_number", &self.serial_number)
            .field("cal", &self.cal)
            .finish_non_exhaustive()
    }
}

impl MclNanoDrive {
    pub fn open(mut sdk: Box<dyn NanoDriveSdk>, debug: bool) -> Result<Self> {
        let handle = sdk.init_handle();
        ensure!(handle > 0, "NanoDrive failed to grab device handle ({handle})");
        if !sdk.device_attached(ATTACH_TIMEOUT_MS, handle) {
            warn!(handle, "NanoDrive did not report attached");
        }

        let serial_number = sdk.serial_number(handle)?;
        let mut cal = BTreeMap::new();
        for axis in axes_from_bitmap(sdk.axis_info(handle)?) {
            let travel = sdk.calibration(axis, handle)?;
            if debug {
                debug!(axis, travel, "NanoDrive calibration");
            }
            cal.insert(axis, travel);
        }

        info!(serial_number, axes = cal.len(), "NanoDrive opened");
        Ok(Self {
            sdk,
            handle,
            debug,
            serial_number,
            cal,
            max_speed: DEFAULT_MAX_SPEED,
            step_period: SLOW_STEP_PERIOD,
            closed: false,
        })
    }

    pub fn with_step_period(mut self, period: Duration) -> Self {
        self.step_period = period;
        self
    }

    pub fn num_axes(&self) -> usize {
        self.cal.len()
    }

    /// Travel range of an axis (um).
    pub fn cal(&self, axis: u32) -> Result<f64> {
        self.cal
            .get(&axis)
            .copied()
            .ok_or_else(|| MclError::from_code(MCL_INVALID_AXIS).into())
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    pub fn set_max_speed(&mut self, max_speed: f64) -> Result<()> {
        ensure!(
            max_speed.is_finite() && max_speed > 0.0,
            "max speed must be positive, got {max_speed}"
        );
        self.max_speed = max_speed;
        Ok(())
    }

    /// Sensor readback of one axis (um).
    pub fn pos_ax(&mut self, axis: u32) -> Result<f64> {
        self.cal(axis)?;
        Ok(self.sdk.single_read_n(axis, self.handle)?)
    }

    /// Absolute move of one axis, clamped to `[0, cal]`.
    pub fn set_pos_ax(&mut self, pos: f64, axis: u32) -> Result<()> {
        let pos = pos.clamp(0.0, self.cal(axis)?);
        if self.debug {
            debug!(pos, axis, "set_pos_ax");
        }
        Ok(self.sdk.single_write_n(pos, axis, self.handle)?)
    }

    /// Move any of axes 1..=3; `None` leaves an axis where it is.
    pub fn set_pos(&mut self, targets: [Option<f64>; 3]) -> Result<()> {
        for (axis, pos) in (1u32..).zip(targets) {
            if let Some(pos) = pos {
                self.set_pos_ax(pos, axis)?;
            }
        }
        Ok(())
    }

    /// Straight-line move limited to `max_speed`.
    pub fn set_pos_slow(&mut self, targets: [Option<f64>; 3]) -> Result<()> {
        let mut start = [0.0; 3];
        let mut delta = [0.0; 3];
        for (i, target) in targets.iter().enumerate() {
            if let Some(t) = target {
                let axis = i as u32 + 1;
                start[i] = self.pos_ax(axis)?;
                delta[i] = t.clamp(0.0, self.cal(axis)?) - start[i];
            }
        }
        let distance = delta.iter().map(|d| d * d).sum::<f64>().sqrt();
        let steps = slow_step_count(distance, self.max_speed, self.step_period);
        if steps == 0 {
            return Ok(());
        }
        let period = self.step_period;
        paced(steps, period, |i| {
            let frac = i as f64 / steps as f64;
            let mut next = [None; 3];
            for (k, slot) in next.iter_mut().enumerate() {
                if targets[k].is_some() {
                    *slot = Some(start[k] + frac * delta[k]);
                }
            }
            self.set_pos(next)
        })
    }

    /// Slow move of one axis.
    pub fn set_pos_ax_slow(&mut self, pos: f64, axis: u32) -> Result<()> {
        let pos = pos.clamp(0.0, self.cal(axis)?);
        let start = self.pos_ax(axis)?;
        let dl = pos - start;
        let steps = slow_step_count(dl, self.max_speed, self.step_period);
        if steps == 0 {
            return Ok(());
        }
        let l_step = dl / steps as f64;
        let period = self.step_period;
        paced(steps, period, |i| {
            self.set_pos_ax(start + i as f64 * l_step, axis)
        })
    }

    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.sdk.release_handle(self.handle);
        self.closed = true;
        info!(serial_number = self.serial_number, "NanoDrive closed");
        Ok(())
    }
}

impl Drop for MclNanoDrive {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("failed to release NanoDrive handle on drop: {e}");
        }
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::mock::MockNanoDrive;

    fn open(mock: &MockNanoDrive) -> MclNanoDrive {
        MclNanoDrive::open(Box::new(mock.clone()), false)
            .unwrap()
            .with_step_period(Duration::from_millis(1))
    }

    #[test]
    fn calibration_per_axis() {
        let nd = open(&MockNanoDrive::new().with_axes(0b101));
        assert_eq!(nd.num_axes(), 2);
        assert_eq!(nd.cal(3).unwrap(), 200.0);
        assert!(nd.cal(2).is_err());
    }

    #[test]
    fn absolute_moves_clamp_to_calibration() {
        let mut nd = open(&MockNanoDrive::new());
        nd.set_pos_ax(250.0, 3).unwrap();
        assert_eq!(nd.pos_ax(3).unwrap(), 200.0);
        nd.set_pos_ax(-3.0, 3).unwrap();
        assert_eq!(nd.pos_ax(3).unwrap(), 0.0);
    }

    #[test]
    fn slow_axis_move_is_chunked() {
        let mock = MockNanoDrive::new();
        let mut nd = open(&mock);
        nd.set_max_speed(1000.0).unwrap();
        // 20 um at 1000 um/s = 20 ms = 20 steps of 1 ms
        nd.set_pos_ax_slow(20.0, 3).unwrap();
        let writes = mock.writes();
        assert_eq!(writes.len(), 20);
        assert!((writes[0].1 - 1.0).abs() < 1e-9);
        assert!((nd.pos_ax(3).unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn slow_move_touches_only_given_axes() {
        let mock = MockNanoDrive::new();
        let mut nd = open(&mock);
        nd.set_max_speed(1000.0).unwrap();
        nd.set_pos_slow([None, Some(6.0), Some(8.0)]).unwrap();
        assert!(mock.writes().iter().all(|(axis, _)| *axis != 1));
        assert!((nd.pos_ax(2).unwrap() - 6.0).abs() < 1e-9);
        assert!((nd.pos_ax(3).unwrap() - 8.0).abs() < 1e-9);
        // zero-length move
        let n = mock.writes().len();
        nd.set_pos_slow([None, Some(6.0), None]).unwrap();
        assert_eq!(mock.writes().len(), n);
    }
}
