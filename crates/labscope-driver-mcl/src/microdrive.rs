//! MicroDrive stepper controller.
//!
//! The controller only takes relative microstep moves, so absolute positions
//! are bookkeeping: both axes start at 0 when the handle is opened and every
//! move records the commanded position.

use std::time::Duration;

use anyhow::{ensure, Result};
use tracing::{debug, info, warn};

use crate::error::{MclError, MCL_INVALID_AXIS};
use crate::motion::{paced, slow_step_count};
use crate::sdk::{
    axes_from_bitmap, MicroDriveSdk, DEFAULT_MAX_SPEED, DEFAULT_VELOCITY, POSITION_MAX,
    POSITION_MIN, SLOW_STEP_PERIOD, STEP_SIZE,
};

const ATTACH_TIMEOUT_MS: u32 = 2000;

pub struct MclMicroDrive {
    sdk: Box<dyn MicroDriveSdk>,
    handle: i32,
    debug: bool,
    pub serial_number: i32,
    num_axes: u32,
    positions: [f64; 2],
    travel: f64,
    velocity: f64,
    max_speed: f64,
    step_period: Duration,
    closed: bool,
}

impl std::fmt::Debug for MclMicroDrive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MclMicroDrive")
            .field("handle", &self.handle)
            .field("serial_number", &self.serial_number)
            .field("positions", &self.positions)
            .finish_non_exhaustive()
    }
}

impl MclMicroDrive {
    /// Acquire a handle and discover the X/Y axes.
    pub fn open(mut sdk: Box<dyn MicroDriveSdk>, debug: bool) -> Result<Self> {
        let (version, revision) = sdk.dll_version();
        if debug {
            debug!(version, revision, "MicroDrive DLL version");
        }
        if !sdk.correct_driver_version() {
            warn!("MCL driver version does not match the DLL");
        }

        let handle = sdk.init_handle();
        ensure!(handle > 0, "MicroDrive failed to grab device handle ({handle})");

        let attached = sdk.device_attached(ATTACH_TIMEOUT_MS, handle);
        if !attached {
            warn!(handle, "MicroDrive did not report attached");
        }

        let serial_number = sdk.serial_number(handle)?;
        let bitmap = sdk.axis_info(handle)?;
        let num_axes = axes_from_bitmap(bitmap)
            .into_iter()
            .filter(|axis| *axis <= 2)
            .count() as u32;

        info!(serial_number, num_axes, "MicroDrive opened");
        Ok(Self {
            sdk,
            handle,
            debug,
            serial_number,
            num_axes,
            positions: [0.0, 0.0],
            travel: POSITION_MAX,
            velocity: DEFAULT_VELOCITY,
            max_speed: DEFAULT_MAX_SPEED,
            step_period: SLOW_STEP_PERIOD,
            closed: false,
        })
    }

    /// Override the slow-move step period.
    pub fn with_step_period(mut self, period: Duration) -> Self {
        self.step_period = period;
        self
    }

    /// Override the travel range reported by [`cal`](Self::cal).
    pub fn with_travel(mut self, travel: f64) -> Self {
        self.travel = travel;
        self
    }

    pub fn num_axes(&self) -> u32 {
        self.num_axes
    }

    fn check_axis(&self, axis: u32) -> Result<usize> {
        if axis < 1 || axis > self.num_axes {
            return Err(MclError::from_code(MCL_INVALID_AXIS).into());
        }
        Ok((axis - 1) as usize)
    }

    /// Travel range of an axis (um).
    pub fn cal(&self, axis: u32) -> Result<f64> {
        self.check_axis(axis)?;
        Ok(self.travel)
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    /// Speed limit for slow moves (um/s).
    pub fn set_max_speed(&mut self, max_speed: f64) -> Result<()> {
        ensure!(
            max_speed.is_finite() && max_speed > 0.0,
            "max speed must be positive, got {max_speed}"
        );
        self.max_speed = max_speed;
        Ok(())
    }

    pub fn pos_ax(&self, axis: u32) -> Result<f64> {
        let idx = self.check_axis(axis)?;
        Ok(self.positions[idx])
    }

    /// Positions of axes 1 and 2.
    pub fn pos(&self) -> (f64, f64) {
        (self.positions[0], self.positions[1])
    }

    /// Absolute move of one axis in whole microsteps.
    pub fn set_pos_ax(&mut self, pos: f64, axis: u32) -> Result<()> {
        let idx = self.check_axis(axis)?;
        let rel_steps = ((pos - self.positions[idx]) / STEP_SIZE).floor() as i32;
        if self.debug {
            debug!(pos, axis, rel_steps, "set_pos_ax");
        }
        if rel_steps != 0 {
            self.sdk
                .md_move_m(axis, self.velocity, rel_steps, self.handle)?;
            self.sdk.micro_drive_wait(self.handle)?;
        }
        self.positions[idx] = pos;
        Ok(())
    }

    /// Move axis 1 and/or axis 2. Both targets must lie in the position window.
    pub fn set_pos(&mut self, ax1: Option<f64>, ax2: Option<f64>) -> Result<()> {
        for pos in [ax1, ax2].into_iter().flatten() {
            ensure!(
                (POSITION_MIN..=POSITION_MAX).contains(&pos),
                "position {pos} outside [{POSITION_MIN}, {POSITION_MAX}]"
            );
        }
        if let Some(pos) = ax1 {
            self.set_pos_ax(pos, 1)?;
        }
        if let Some(pos) = ax2 {
            self.set_pos_ax(pos, 2)?;
        }
        Ok(())
    }

    /// Straight-line move of both axes limited to `max_speed`.
    pub fn set_pos_slow(&mut self, ax1: Option<f64>, ax2: Option<f64>) -> Result<()> {
        let (start1, start2) = self.pos();
        let d1 = ax1.map_or(0.0, |p| p - start1);
        let d2 = ax2.map_or(0.0, |p| p - start2);
        let steps = slow_step_count(d1.hypot(d2), self.max_speed, self.step_period);
        if steps == 0 {
            return Ok(());
        }
        let (s1, s2) = (d1 / steps as f64, d2 / steps as f64);
        let period = self.step_period;
        paced(steps, period, |i| {
            let i = i as f64;
            self.set_pos(
                ax1.map(|_| start1 + i * s1),
                ax2.map(|_| start2 + i * s2),
            )
        })
    }

    /// Slow move of one axis, clamped to `[0, cal]`.
    pub fn set_pos_ax_slow(&mut self, pos: f64, axis: u32) -> Result<()> {
        let pos = pos.clamp(0.0, self.cal(axis)?);
        let start = self.pos_ax(axis)?;
        let dl = pos - start;
        let steps = slow_step_count(dl, self.max_speed, self.step_period);
        if self.debug {
            debug!(axis, steps, dl, start, "set_pos_ax_slow");
        }
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
        info!(serial_number = self.serial_number, "MicroDrive closed");
        Ok(())
    }
}

impl Drop for MclMicroDrive {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("failed to release MicroDrive handle on drop: {e}");
        }
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::mock::MockMicroDrive;

    fn open(mock: &MockMicroDrive) -> MclMicroDrive {
        MclMicroDrive::open(Box::new(mock.clone()), false)
            .unwrap()
            .with_step_period(Duration::from_millis(1))
    }

    #[test]
    fn open_requires_a_handle() {
        let err = MclMicroDrive::open(Box::new(MockMicroDrive::new().unplugged()), false)
            .unwrap_err();
        assert!(err.to_string().contains("handle"));
    }

    #[test]
    fn set_pos_ax_floors_microsteps() {
        let mock = MockMicroDrive::new();
        let mut md = open(&mock);
        md.set_pos_ax(1.0, 1).unwrap();
        // 1.0 / 0.095 = 10.53 -> 10 steps
        assert_eq!(mock.moves().last().map(|m| (m.axis, m.microsteps)), Some((1, 10)));
        md.set_pos_ax(0.5, 1).unwrap();
        // -0.5 / 0.095 = -5.26 -> -6 steps
        assert_eq!(mock.moves().last().map(|m| m.microsteps), Some(-6));
        assert_eq!(md.pos_ax(1).unwrap(), 0.5);
        assert_eq!(mock.moves()[0].velocity, DEFAULT_VELOCITY);
    }

    #[test]
    fn set_pos_enforces_window_and_axes() {
        let mut md = open(&MockMicroDrive::new());
        assert!(md.set_pos(Some(150.0), None).is_err());
        assert!(md.set_pos_ax(1.0, 3).is_err());
        md.set_pos(Some(-20.0), Some(30.0)).unwrap();
        assert_eq!(md.pos(), (-20.0, 30.0));
    }

    #[test]
    fn slow_move_is_chunked() {
        let mock = MockMicroDrive::new();
        let mut md = open(&mock);
        md.set_max_speed(100.0).unwrap();
        // 10 um at 100 um/s with 1 ms period: 0.1 s / 1 ms = 100 steps
        md.set_pos_ax_slow(10.0, 2).unwrap();
        assert_eq!(mock.moves().iter().filter(|m| m.axis == 2).count(), 100);
        assert!((md.pos_ax(2).unwrap() - 10.0).abs() < 1e-9);

        let before = mock.moves().len();
        md.set_pos_ax_slow(10.0, 2).unwrap();
        assert_eq!(mock.moves().len(), before);
    }

    #[test]
    fn slow_move_clamps_to_travel() {
        let mut md = open(&MockMicroDrive::new()).with_travel(20.0);
        md.set_max_speed(1000.0).unwrap();
        md.set_pos_ax_slow(35.0, 1).unwrap();
        assert_eq!(md.pos_ax(1).unwrap(), 20.0);
        md.set_pos_ax_slow(-5.0, 1).unwrap();
        assert_eq!(md.pos_ax(1).unwrap(), 0.0);
    }

    #[test]
    fn diagonal_slow_move_reaches_target() {
        let mut md = open(&MockMicroDrive::new());
        md.set_max_speed(1000.0).unwrap();
        md.set_pos_slow(Some(3.0), Some(4.0)).unwrap();
        let (a, b) = md.pos();
        assert!((a - 3.0).abs() < 1e-9 && (b - 4.0).abs() < 1e-9);
    }

    #[test]
    fn max_speed_must_be_positive() {
        let mut md = open(&MockMicroDrive::new());
        assert!(md.set_max_speed(0.0).is_err());
        assert_eq!(md.max_speed(), DEFAULT_MAX_SPEED);
    }

    #[test]
    fn close_releases_once() {
        let mock = MockMicroDrive::new();
        let mut md = open(&mock);
        md.close().unwrap();
        md.close().unwrap();
        drop(md);
        assert_eq!(mock.release_count(), 1);
    }
}
