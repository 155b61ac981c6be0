//! MCL libraries resolved at runtime.
//!
//! `MicroDrive.dll` and `Madlib.dll` export the same handle functions plus
//! their own motion calls, so one wrapper serves both: symbols are looked up
//! at call time. All MCL entry points use the C calling
//! convention.

use std::ffi::{c_double, c_int, c_short, c_uchar, c_uint, CString};
use std::path::Path;

use anyhow::{Context, Result};
use libloading::Library;
use tracing::{info, warn};

use crate::error::{check, check_f64, MclError, MclResult, MCL_ARGUMENT_ERROR, MCL_GENERAL_ERROR};
use crate::sdk::{MicroDriveSdk, NanoDriveSdk};

pub const MICRODRIVE_DEFAULT_PATH: &str = r"C:\Program Files\Mad City Labs\MicroDrive\MicroDrive.dll";
pub const NANODRIVE_DEFAULT_PATH: &str = r"C:\Program Files\Mad City Labs\NanoDrive\Madlib.dll";

type FnVersion = unsafe extern "C" fn(*mut c_short, *mut c_short);
type FnBool = unsafe extern "C" fn() -> bool;
type FnInit = unsafe extern "C" fn() -> c_int;
type FnRelease = unsafe extern "C" fn(c_int);
type FnAttached = unsafe extern "C" fn(c_uint, c_int) -> bool;
type FnHandleInt = unsafe extern "C" fn(c_int) -> c_int;
type FnAxisInfo = unsafe extern "C" fn(*mut c_uchar, c_int) -> c_int;
type FnMoveM = unsafe extern "C" fn(c_uint, c_double, c_int, c_int) -> c_int;
type FnAxisDouble = unsafe extern "C" fn(c_uint, c_int) -> c_double;
type FnWriteN = unsafe extern "C" fn(c_double, c_uint, c_int) -> c_int;

/// One loaded MCL library.
pub struct MadLibrary {
    lib: Library,
}

impl MadLibrary {
    pub fn load_microdrive() -> Result<Self> {
        Self::load_from(MICRODRIVE_DEFAULT_PATH)
    }

    pub fn load_nanodrive() -> Result<Self> {
        Self::load_from(NANODRIVE_DEFAULT_PATH)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        // SAFETY: the MCL libraries have no load-time side effects.
        let lib = unsafe { Library::new(path) }
            .with_context(|| format!("failed to load {}", path.display()))?;
        info!(path = %path.display(), "MCL library loaded");
        Ok(Self { lib })
    }

    /// Resolve a symbol.
    ///
    /// # Safety
    /// `T` must be the function pointer type of the exported symbol.
    unsafe fn func<T: Copy>(&self, name: &str) -> MclResult<T> {
        let cname = CString::new(name).map_err(|_| MclError::from_code(MCL_ARGUMENT_ERROR))?;
        match self.lib.get::<T>(cname.as_bytes_with_nul()) {
            Ok(sym) => Ok(*sym),
            Err(e) => {
                warn!(symbol = name, "MCL symbol missing: {e}");
                Err(MclError::from_code(MCL_GENERAL_ERROR))
            }
        }
    }

    fn init(&mut self) -> i32 {
        // SAFETY: signature from Madlib.h / MicroDrive.h.
        match unsafe { self.func::<FnInit>("MCL_InitHandle") } {
            Ok(f) => unsafe { f() },
            Err(_) => 0,
        }
    }

    fn release(&mut self, handle: i32) {
        if let Ok(f) = unsafe { self.func::<FnRelease>("MCL_ReleaseHandle") } {
            unsafe { f(handle) }
        }
    }

    fn attached(&mut self, timeout_ms: u32, handle: i32) -> bool {
        match unsafe { self.func::<FnAttached>("MCL_DeviceAttached") } {
            Ok(f) => unsafe { f(timeout_ms, handle) },
            Err(_) => false,
        }
    }

    fn serial(&mut self, handle: i32) -> MclResult<i32> {
        let f = unsafe { self.func::<FnHandleInt>("MCL_GetSerialNumber")? };
        check(unsafe { f(handle) })
    }

    fn axes(&mut self, handle: i32) -> MclResult<u8> {
        let f = unsafe { self.func::<FnAxisInfo>("MCL_GetAxisInfo")? };
        let mut bitmap: c_uchar = 0;
        check(unsafe { f(&mut bitmap, handle) })?;
        Ok(bitmap)
    }
}

// SAFETY (all calls below): symbols are resolved from the loaded library,
// which outlives `self`; pointer arguments reference live stack values.
impl MicroDriveSdk for MadLibrary {
    fn dll_version(&mut self) -> (i16, i16) {
        let (mut version, mut revision): (c_short, c_short) = (0, 0);
        if let Ok(f) = unsafe { self.func::<FnVersion>("MCL_DLLVersion") } {
            unsafe { f(&mut version, &mut revision) };
        }
        (version, revision)
    }

    fn correct_driver_version(&mut self) -> bool {
        match unsafe { self.func::<FnBool>("MCL_CorrectDriverVersion") } {
            Ok(f) => unsafe { f() },
            Err(_) => false,
        }
    }

    fn init_handle(&mut self) -> i32 {
        self.init()
    }

    fn release_handle(&mut self, handle: i32) {
        self.release(handle)
    }

    fn device_attached(&mut self, timeout_ms: u32, handle: i32) -> bool {
        self.attached(timeout_ms, handle)
    }

    fn serial_number(&mut self, handle: i32) -> MclResult<i32> {
        self.serial(handle)
    }

    fn axis_info(&mut self, handle: i32) -> MclResult<u8> {
        self.axes(handle)
    }

    fn md_move_m(
        &mut self,
        axis: u32,
        velocity: f64,
        microsteps: i32,
        handle: i32,
    ) -> MclResult<()> {
        let f = unsafe { self.func::<FnMoveM>("MCL_MDMoveM")? };
        check(unsafe { f(axis, velocity, microsteps, handle) }).map(|_| ())
    }

    fn micro_drive_wait(&mut self, handle: i32) -> MclResult<()> {
        let f = unsafe { self.func::<FnHandleInt>("MCL_MicroDriveWait")? };
        check(unsafe { f(handle) }).map(|_| ())
    }
}

impl NanoDriveSdk for MadLibrary {
    fn init_handle(&mut self) -> i32 {
        self.init()
    }

    fn release_handle(&mut self, handle: i32) {
        self.release(handle)
    }

    fn device_attached(&mut self, timeout_ms: u32, handle: i32) -> bool {
        self.attached(timeout_ms, handle)
    }

    fn serial_number(&mut self, handle: i32) -> MclResult<i32> {
        self.serial(handle)
    }

    fn axis_info(&mut self, handle: i32) -> MclResult<u8> {
        self.axes(handle)
    }

    fn calibration(&mut self, axis: u32, handle: i32) -> MclResult<f64> {
        let f = unsafe { self.func::<FnAxisDouble>("MCL_GetCalibration")? };
        check_f64(unsafe { f(axis, handle) })
    }

    fn single_read_n(&mut self, axis: u32, handle: i32) -> MclResult<f64> {
        let f = unsafe { self.func::<FnAxisDouble>("MCL_SingleReadN")? };
        check_f64(unsafe { f(axis, handle) })
    }

    fn single_write_n(&mut self, position: f64, axis: u32, handle: i32) -> MclResult<()> {
        let f = unsafe { self.func::<FnWriteN>("MCL_SingleWriteN")? };
        check(unsafe { f(position, axis, handle) }).map(|_| ())
    }
}
