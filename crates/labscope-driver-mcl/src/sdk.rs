//! MCL library seams.
//!
//! Two vendor libraries are wrapped: `MicroDrive` for the stepper
//! controllers and `Madlib` for the NanoDrive piezo controllers. Both use an
//! integer handle returned by `MCL_InitHandle`; every other call takes it as
//! its last argument.

use std::time::Duration;

use crate::error::MclResult;

/// Time between successive steps of a slow move.
pub const SLOW_STEP_PERIOD: Duration = Duration::from_millis(50);
/// Distance moved by one MicroDrive microstep (um).
pub const STEP_SIZE: f64 = 0.095;
/// MicroDrive move velocity used for every step (mm/s).
pub const DEFAULT_VELOCITY: f64 = 0.1905;
/// Speed limit for slow moves (um/s).
pub const DEFAULT_MAX_SPEED: f64 = 100.0;
/// Commanded MicroDrive positions must stay inside this window (um).
pub const POSITION_MIN: f64 = -100.0;
pub const POSITION_MAX: f64 = 100.0;

/// Bits of the axis bitmap reported by `MCL_GetAxisInfo`.
pub const AXIS_BITS: [(u32, u8); 3] = [(1, 0b001), (2, 0b010), (3, 0b100)];

/// `MicroDrive.dll`.
pub trait MicroDriveSdk: Send {
    fn dll_version(&mut self) -> (i16, i16);
    fn correct_driver_version(&mut self) -> bool;
    /// Returns 0 when no device could be opened.
    fn init_handle(&mut self) -> i32;
    fn release_handle(&mut self, handle: i32);
    /// Blocks up to `timeout_ms` waiting for the device.
    fn device_attached(&mut self, timeout_ms: u32, handle: i32) -> bool;
    fn serial_number(&mut self, handle: i32) -> MclResult<i32>;
    fn axis_info(&mut self, handle: i32) -> MclResult<u8>;
    /// Relative move of `microsteps` at `velocity`.
    fn md_move_m(&mut self, axis: u32, velocity: f64, microsteps: i32, handle: i32)
        -> MclResult<()>;
    fn micro_drive_wait(&mut self, handle: i32) -> MclResult<()>;
}

/// `Madlib.dll` (NanoDrive).
pub trait NanoDriveSdk: Send {
    fn init_handle(&mut self) -> i32;
    fn release_handle(&mut self, handle: i32);
    fn device_attached(&mut self, timeout_ms: u32, handle: i32) -> bool;
    fn serial_number(&mut self, handle: i32) -> MclResult<i32>;
    fn axis_info(&mut self, handle: i32) -> MclResult<u8>;
    /// Travel range of `axis` (um).
    fn calibration(&mut self, axis: u32, handle: i32) -> MclResult<f64>;
    /// Position sensor readback (um).
    fn single_read_n(&mut self, axis: u32, handle: i32) -> MclResult<f64>;
    /// Absolute move (um).
    fn single_write_n(&mut self, position: f64, axis: u32, handle: i32) -> MclResult<()>;
}

impl<S: MicroDriveSdk + ?Sized> MicroDriveSdk for Box<S> {
    fn dll_version(&mut self) -> (i16, i16) {
        (**self).dll_version()
    }
    fn correct_driver_version(&mut self) -> bool {
        (**self).correct_driver_version()
    }
    fn init_handle(&mut self) -> i32 {
        (**self).init_handle()
    }
    fn release_handle(&mut self, handle: i32) {
        (**self).release_handle(handle)
    }
    fn device_attached(&mut self, timeout_ms: u32, handle: i32) -> bool {
        (**self).device_attached(timeout_ms, handle)
    }
    fn serial_number(&mut self, handle: i32) -> MclResult<i32> {
        (**self).serial_number(handle)
    }
    fn axis_info(&mut self, handle: i32) -> MclResult<u8> {
        (**self).axis_info(handle)
    }
    fn md_move_m(
        &mut self,
        axis: u32,
        velocity: f64,
        microsteps: i32,
        handle: i32,
    ) -> MclResult<()> {
        (**self).md_move_m(axis, velocity, microsteps, handle)
    }
    fn micro_drive_wait(&mut self, handle: i32) -> MclResult<()> {
        (**self).micro_drive_wait(handle)
    }
}

impl<S: NanoDriveSdk + ?Sized> NanoDriveSdk for Box<S> {
    fn init_handle(&mut self) -> i32 {
        (**self).init_handle()
    }
    fn release_handle(&mut self, handle: i32) {
        (**self).release_handle(handle)
    }
    fn device_attached(&mut self, timeout_ms: u32, handle: i32) -> bool {
        (**self).device_attached(timeout_ms, handle)
    }
    fn serial_number(&mut self, handle: i32) -> MclResult<i32> {
        (**self).serial_number(handle)
    }
    fn axis_info(&mut self, handle: i32) -> MclResult<u8> {
        (**self).axis_info(handle)
    }
    fn calibration(&mut self, axis: u32, handle: i32) -> MclResult<f64> {
        (**self).calibration(axis, handle)
    }
    fn single_read_n(&mut self, axis: u32, handle: i32) -> MclResult<f64> {
        (**self).single_read_n(axis, handle)
    }
    fn single_write_n(&mut self, position: f64, axis: u32, handle: i32) -> MclResult<()> {
        (**self).single_write_n(position, axis, handle)
    }
}

/// Axes present in an `MCL_GetAxisInfo` bitmap.
pub fn axes_from_bitmap(bitmap: u8) -> Vec<u32> {
    AXIS_BITS
        .iter()
        .filter(|(_, bit)| bitmap & bit != 0)
        .map(|(axis, _)| *axis)
        .collect()
}
