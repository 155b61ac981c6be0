//! Simulated MCL controllers.
//!
//! Clones share state, so a test can keep one handle while the device owns
//! another and inspect every call afterwards.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{
    MclError, MclResult, MCL_ARGUMENT_ERROR, MCL_INVALID_AXIS, MCL_INVALID_HANDLE,
};
use crate::sdk::{MicroDriveSdk, NanoDriveSdk};

const MOCK_HANDLE: i32 = 1;

fn invalid(code: i32) -> MclError {
    MclError::from_code(code)
}

/// One `MCL_MDMoveM` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MicroMove {
    pub axis: u32,
    pub velocity: f64,
    pub microsteps: i32,
}

#[derive(Debug)]
struct MicroState {
    plugged: bool,
    open: bool,
    bitmap: u8,
    microsteps: [i64; 3],
    moves: Vec<MicroMove>,
    releases: usize,
}

/// Two-axis MicroDrive.
#[derive(Debug, Clone)]
pub struct MockMicroDrive {
    state: Arc<Mutex<MicroState>>,
}

impl MockMicroDrive {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MicroState {
                plugged: true,
                open: false,
                bitmap: 0b011,
                microsteps: [0; 3],
                moves: Vec::new(),
                releases: 0,
            })),
        }
    }

    /// No controller on the bus: `init_handle` returns 0.
    pub fn unplugged(self) -> Self {
        self.state.lock().plugged = false;
        self
    }

    pub fn with_axes(self, bitmap: u8) -> Self {
        self.state.lock().bitmap = bitmap;
        self
    }

    pub fn moves(&self) -> Vec<MicroMove> {
        self.state.lock().moves.clone()
    }

    /// Net microsteps sent to `axis`.
    pub fn microsteps(&self, axis: u32) -> i64 {
        let idx = (axis as usize).wrapping_sub(1);
        self.state.lock().microsteps.get(idx).copied().unwrap_or(0)
    }

    pub fn release_count(&self) -> usize {
        self.state.lock().releases
    }

    fn ready(state: &MicroState, handle: i32) -> MclResult<()> {
        if !state.open || handle != MOCK_HANDLE {
            return Err(invalid(MCL_INVALID_HANDLE));
        }
        Ok(())
    }
}

impl Default for MockMicroDrive {
    fn default() -> Self {
        Self::new()
    }
}

impl MicroDriveSdk for MockMicroDrive {
    fn dll_version(&mut self) -> (i16, i16) {
        (2, 0)
    }

    fn correct_driver_version(&mut self) -> bool {
        true
    }

    fn init_handle(&mut self) -> i32 {
        let mut s = self.state.lock();
        if !s.plugged {
            return 0;
        }
        s.open = true;
        MOCK_HANDLE
    }

    fn release_handle(&mut self, handle: i32) {
        let mut s = self.state.lock();
        if handle == MOCK_HANDLE && s.open {
            s.open = false;
            s.releases += 1;
        }
    }

    fn device_attached(&mut self, _timeout_ms: u32, handle: i32) -> bool {
        let s = self.state.lock();
        s.open && handle == MOCK_HANDLE
    }

    fn serial_number(&mut self, handle: i32) -> MclResult<i32> {
        let s = self.state.lock();
        Self::ready(&s, handle)?;
        Ok(2291)
    }

    fn axis_info(&mut self, handle: i32) -> MclResult<u8> {
        let s = self.state.lock();
        Self::ready(&s, handle)?;
        Ok(s.bitmap)
    }

    fn md_move_m(
        &mut self,
        axis: u32,
        velocity: f64,
        microsteps: i32,
        handle: i32,
    ) -> MclResult<()> {
        let mut s = self.state.lock();
        Self::ready(&s, handle)?;
        if axis == 0 || axis > 3 || s.bitmap & (1 << (axis - 1)) == 0 {
            return Err(invalid(MCL_INVALID_AXIS));
        }
        if !(velocity > 0.0) {
            return Err(invalid(MCL_ARGUMENT_ERROR));
        }
        s.microsteps[(axis - 1) as usize] += microsteps as i64;
        s.moves.push(MicroMove {
            axis,
            velocity,
            microsteps,
        });
        Ok(())
    }

    fn micro_drive_wait(&mut self, handle: i32) -> MclResult<()> {
        let s = self.state.lock();
        Self::ready(&s, handle)
    }
}

#[derive(Debug)]
struct NanoState {
    plugged: bool,
    open: bool,
    bitmap: u8,
    calibration: [f64; 3],
    positions: [f64; 3],
    writes: Vec<(u32, f64)>,
    releases: usize,
}

/// Three-axis NanoDrive piezo controller.
#[derive(Debug, Clone)]
pub struct MockNanoDrive {
    state: Arc<Mutex<NanoState>>,
}

impl MockNanoDrive {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(NanoState {
                plugged: true,
                open: false,
                bitmap: 0b111,
                calibration: [100.0, 100.0, 200.0],
                positions: [0.0; 3],
                writes: Vec::new(),
                releases: 0,
            })),
        }
    }

    pub fn unplugged(self) -> Self {
        self.state.lock().plugged = false;
        self
    }

    pub fn with_axes(self, bitmap: u8) -> Self {
        self.state.lock().bitmap = bitmap;
        self
    }

    pub fn with_calibration(self, axis: u32, travel: f64) -> Self {
        if let Some(c) = self
            .state
            .lock()
            .calibration
            .get_mut((axis as usize).wrapping_sub(1))
        {
            *c = travel;
        }
        self
    }

    /// Every `MCL_SingleWriteN` as (axis, position).
    pub fn writes(&self) -> Vec<(u32, f64)> {
        self.state.lock().writes.clone()
    }

    pub fn release_count(&self) -> usize {
        self.state.lock().releases
    }

    fn axis_index(state: &NanoState, handle: i32, axis: u32) -> MclResult<usize> {
        if !state.open || handle != MOCK_HANDLE {
            return Err(invalid(MCL_INVALID_HANDLE));
        }
        if axis == 0 || axis > 3 || state.bitmap & (1 << (axis - 1)) == 0 {
            return Err(invalid(MCL_INVALID_AXIS));
        }
        Ok((axis - 1) as usize)
    }
}

impl Default for MockNanoDrive {
    fn default() -> Self {
        Self::new()
    }
}

impl NanoDriveSdk for MockNanoDrive {
    fn init_handle(&mut self) -> i32 {
        let mut s = self.state.lock();
        if !s.plugged {
            return 0;
        }
        s.open = true;
        MOCK_HANDLE
    }

    fn release_handle(&mut self, handle: i32) {
        let mut s = self.state.lock();
        if handle == MOCK_HANDLE && s.open {
            s.open = false;
            s.releases += 1;
        }
    }

    fn device_attached(&mut self, _timeout_ms: u32, handle: i32) -> bool {
        let s = self.state.lock();
        s.open && handle == MOCK_HANDLE
    }

    fn serial_number(&mut self, handle: i32) -> MclResult<i32> {
        let s = self.state.lock();
        if !s.open || handle != MOCK_HANDLE {
            return Err(invalid(MCL_INVALID_HANDLE));
        }
        Ok(4417)
    }

    fn axis_info(&mut self, handle: i32) -> MclResult<u8> {
        let s = self.state.lock();
        if !s.open || handle != MOCK_HANDLE {
            return Err(invalid(MCL_INVALID_HANDLE));
        }
        Ok(s.bitmap)
    }

    fn calibration(&mut self, axis: u32, handle: i32) -> MclResult<f64> {
        let s = self.state.lock();
        let idx = Self::axis_index(&s, handle, axis)?;
        Ok(s.calibration[idx])
    }

    fn single_read_n(&mut self, axis: u32, handle: i32) -> MclResult<f64> {
        let s = self.state.lock();
        let idx = Self::axis_index(&s, handle, axis)?;
        Ok(s.positions[idx])
    }

    fn single_write_n(&mut self, position: f64, axis: u32, handle: i32) -> MclResult<()> {
        let mut s = self.state.lock();
        let idx = Self::axis_index(&s, handle, axis)?;
        if !(0.0..=s.calibration[idx]).contains(&position) {
            return Err(invalid(MCL_ARGUMENT_ERROR));
        }
        s.positions[idx] = position;
        s.writes.push((axis, position));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micro_drive_rejects_missing_axis() {
        let mut md = MockMicroDrive::new().with_axes(0b001);
        let h = md.init_handle();
        assert!(md.md_move_m(1, 0.19, 5, h).is_ok());
        assert_eq!(md.md_move_m(2, 0.19, 5, h).unwrap_err().code, MCL_INVALID_AXIS);
        assert_eq!(md.md_move_m(1, 0.19, 5, 9).unwrap_err().code, MCL_INVALID_HANDLE);
        assert_eq!(md.microsteps(1), 5);
    }

    #[test]
    fn nano_drive_writes_within_calibration() {
        let mut nd = MockNanoDrive::new();
        let h = nd.init_handle();
        nd.single_write_n(50.0, 3, h).unwrap();
        assert_eq!(nd.single_read_n(3, h).unwrap(), 50.0);
        assert_eq!(
            nd.single_write_n(250.0, 3, h).unwrap_err().code,
            MCL_ARGUMENT_ERROR
        );
    }
}
