//! Shamrock SDK resolved from the vendor libraries at runtime.
//!
//! `ShamrockCIF` is loaded first because `atshamrock` links against it; both
//! handles stay alive for as long as the function table is in use. Calls
//! use the `stdcall` convention on 32-bit Windows, hence `extern "system"`.

use std::ffi::{c_char, c_float, c_int, CStr, CString};
use std::path::Path;

use anyhow::{Context, Result};
use libloading::Library;
use tracing::info;

use crate::error::{check, ShamrockResult};
use crate::sdk::{
    Flipper, GratingInfo, OpticalParams, Port, ShamrockSdk, Slit, SHAMROCK_ERRORLENGTH,
};

type FnInitialize = unsafe extern "system" fn(*const c_char) -> c_int;
type FnVoid = unsafe extern "system" fn() -> c_int;
type FnOutInt = unsafe extern "system" fn(*mut c_int) -> c_int;
type FnDevOutInt = unsafe extern "system" fn(c_int, *mut c_int) -> c_int;
type FnDevInt = unsafe extern "system" fn(c_int, c_int) -> c_int;
type FnDevIntOutInt = unsafe extern "system" fn(c_int, c_int, *mut c_int) -> c_int;
type FnDevIntInt = unsafe extern "system" fn(c_int, c_int, c_int) -> c_int;
type FnDevIntIntOutInt = unsafe extern "system" fn(c_int, c_int, c_int, *mut c_int) -> c_int;
type FnDevIntIntInt = unsafe extern "system" fn(c_int, c_int, c_int, c_int) -> c_int;
type FnDevOutFloat = unsafe extern "system" fn(c_int, *mut c_float) -> c_int;
type FnDevFloat = unsafe extern "system" fn(c_int, c_float) -> c_int;
type FnDevIntOutFloat = unsafe extern "system" fn(c_int, c_int, *mut c_float) -> c_int;
type FnDevIntFloat = unsafe extern "system" fn(c_int, c_int, c_float) -> c_int;
type FnDevOutStr = unsafe extern "system" fn(c_int, *mut c_char) -> c_int;
type FnOpticalParams =
    unsafe extern "system" fn(c_int, *mut c_float, *mut c_float, *mut c_float) -> c_int;
type FnGratingInfo = unsafe extern "system" fn(
    c_int,
    c_int,
    *mut c_float,
    *mut c_char,
    *mut c_int,
    *mut c_int,
) -> c_int;

struct ShamrockFns {
    initialize: FnInitialize,
    close: FnVoid,
    get_number_devices: FnOutInt,
    get_serial_number: FnDevOutStr,
    eeprom_get_optical_params: FnOpticalParams,
    get_number_gratings: FnDevOutInt,
    get_grating_info: FnGratingInfo,
    get_grating: FnDevOutInt,
    set_grating: FnDevInt,
    get_turret: FnDevOutInt,
    get_grating_offset: FnDevIntOutInt,
    set_grating_offset: FnDevIntInt,
    get_detector_offset_ex: FnDevIntIntOutInt,
    set_detector_offset_ex: FnDevIntIntInt,
    get_wavelength: FnDevOutFloat,
    set_wavelength: FnDevFloat,
    auto_slit_is_present: FnDevIntOutInt,
    get_auto_slit_width: FnDevIntOutFloat,
    set_auto_slit_width: FnDevIntFloat,
    get_focus_mirror: FnDevOutInt,
    set_focus_mirror: FnDevInt,
    get_focus_mirror_max_steps: FnDevOutInt,
    flipper_mirror_is_present: FnDevIntOutInt,
    get_flipper_mirror: FnDevIntOutInt,
    set_flipper_mirror: FnDevIntInt,
}

/// Resolve `name` in `lib` and copy the function pointer out.
///
/// # Safety
/// `T` must match the C signature of the exported symbol.
unsafe fn symbol<T: Copy>(lib: &Library, name: &str) -> Result<T> {
    let cname = CString::new(name)?;
    let sym = lib
        .get::<T>(cname.as_bytes_with_nul())
        .with_context(|| format!("symbol {name} not found in Shamrock SDK"))?;
    Ok(*sym)
}

/// The vendor Shamrock SDK.
pub struct ShamrockLibrary {
    fns: ShamrockFns,
    _lib: Library,
    _cif: Library,
}

impl ShamrockLibrary {
    /// Load `ShamrockCIF` and `atshamrock` from the default search path.
    pub fn load() -> Result<Self> {
        Self::load_from(
            libloading::library_filename("ShamrockCIF"),
            libloading::library_filename("atshamrock"),
        )
    }

    /// Load from explicit paths (useful when the SDK is not on `PATH`).
    pub fn load_from(cif: impl AsRef<Path>, atshamrock: impl AsRef<Path>) -> Result<Self> {
        // SAFETY: loading vendor libraries runs their initialisers; the
        // Shamrock DLLs have no load-time side effects beyond symbol setup.
        let cif_lib = unsafe { Library::new(cif.as_ref()) }
            .with_context(|| format!("failed to load {}", cif.as_ref().display()))?;
        let lib = unsafe { Library::new(atshamrock.as_ref()) }
            .with_context(|| format!("failed to load {}", atshamrock.as_ref().display()))?;

        // SAFETY: every type alias above matches the ShamrockSDK.h prototype.
        let fns = unsafe {
            ShamrockFns {
                initialize: symbol(&lib, "ShamrockInitialize")?,
                close: symbol(&lib, "ShamrockClose")?,
                get_number_devices: symbol(&lib, "ShamrockGetNumberDevices")?,
                get_serial_number: symbol(&lib, "ShamrockGetSerialNumber")?,
                eeprom_get_optical_params: symbol(&lib, "ShamrockEepromGetOpticalParams")?,
                get_number_gratings: symbol(&lib, "ShamrockGetNumberGratings")?,
                get_grating_info: symbol(&lib, "ShamrockGetGratingInfo")?,
                get_grating: symbol(&lib, "ShamrockGetGrating")?,
                set_grating: symbol(&lib, "ShamrockSetGrating")?,
                get_turret: symbol(&lib, "ShamrockGetTurret")?,
                get_grating_offset: symbol(&lib, "ShamrockGetGratingOffset")?,
                set_grating_offset: symbol(&lib, "ShamrockSetGratingOffset")?,
                get_detector_offset_ex: symbol(&lib, "ShamrockGetDetectorOffsetEx")?,
                set_detector_offset_ex: symbol(&lib, "ShamrockSetDetectorOffsetEx")?,
                get_wavelength: symbol(&lib, "ShamrockGetWavelength")?,
                set_wavelength: symbol(&lib, "ShamrockSetWavelength")?,
                auto_slit_is_present: symbol(&lib, "ShamrockAutoSlitIsPresent")?,
                get_auto_slit_width: symbol(&lib, "ShamrockGetAutoSlitWidth")?,
                set_auto_slit_width: symbol(&lib, "ShamrockSetAutoSlitWidth")?,
                get_focus_mirror: symbol(&lib, "ShamrockGetFocusMirror")?,
                set_focus_mirror: symbol(&lib, "ShamrockSetFocusMirror")?,
                get_focus_mirror_max_steps: symbol(&lib, "ShamrockGetFocusMirrorMaxSteps")?,
                flipper_mirror_is_present: symbol(&lib, "ShamrockFlipperMirrorIsPresent")?,
                get_flipper_mirror: symbol(&lib, "ShamrockGetFlipperMirror")?,
                set_flipper_mirror: symbol(&lib, "ShamrockSetFlipperMirror")?,
            }
        };
        info!("Shamrock SDK loaded");
        Ok(Self {
            fns,
            _lib: lib,
            _cif: cif_lib,
        })
    }
}

fn buffer_to_string(buf: &[c_char]) -> String {
    // SAFETY: the buffer was zero-initialised and the SDK writes a
    // NUL-terminated string shorter than SHAMROCK_ERRORLENGTH.
    unsafe { CStr::from_ptr(buf.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

// SAFETY (all calls below): function pointers come from the loaded SDK and
// outlive `self`; out-pointers reference live stack values.
impl ShamrockSdk for ShamrockLibrary {
    fn initialize(&mut self) -> ShamrockResult<()> {
        let ini = [0 as c_char];
        check(unsafe { (self.fns.initialize)(ini.as_ptr()) })
    }

    fn close(&mut self) -> ShamrockResult<()> {
        check(unsafe { (self.fns.close)() })
    }

    fn number_devices(&mut self) -> ShamrockResult<i32> {
        let mut n: c_int = 0;
        check(unsafe { (self.fns.get_number_devices)(&mut n) })?;
        Ok(n)
    }

    fn serial_number(&mut self, device: i32) -> ShamrockResult<String> {
        let mut buf = [0 as c_char; SHAMROCK_ERRORLENGTH];
        check(unsafe { (self.fns.get_serial_number)(device, buf.as_mut_ptr()) })?;
        Ok(buffer_to_string(&buf))
    }

    fn eeprom_optical_params(&mut self, device: i32) -> ShamrockResult<OpticalParams> {
        let (mut focal_length, mut angular_deviation, mut focal_tilt) = (0.0f32, 0.0f32, 0.0f32);
        check(unsafe {
            (self.fns.eeprom_get_optical_params)(
                device,
                &mut focal_length,
                &mut angular_deviation,
                &mut focal_tilt,
            )
        })?;
        Ok(OpticalParams {
            focal_length: focal_length as f64,
            angular_deviation: angular_deviation as f64,
            focal_tilt: focal_tilt as f64,
        })
    }

    fn number_gratings(&mut self, device: i32) -> ShamrockResult<i32> {
        let mut n: c_int = 0;
        check(unsafe { (self.fns.get_number_gratings)(device, &mut n) })?;
        Ok(n)
    }

    fn grating_info(&mut self, device: i32, grating: i32) -> ShamrockResult<GratingInfo> {
        let mut lines: c_float = 0.0;
        let mut blaze = [0 as c_char; SHAMROCK_ERRORLENGTH];
        let (mut home, mut offset): (c_int, c_int) = (0, 0);
        check(unsafe {
            (self.fns.get_grating_info)(
                device,
                grating,
                &mut lines,
                blaze.as_mut_ptr(),
                &mut home,
                &mut offset,
            )
        })?;
        Ok(GratingInfo {
            lines: lines as f64,
            blaze: buffer_to_string(&blaze),
            home,
            offset,
        })
    }

    fn grating(&mut self, device: i32) -> ShamrockResult<i32> {
        let mut g: c_int = 0;
        check(unsafe { (self.fns.get_grating)(device, &mut g) })?;
        Ok(g)
    }

    fn set_grating(&mut self, device: i32, grating: i32) -> ShamrockResult<()> {
        check(unsafe { (self.fns.set_grating)(device, grating) })
    }

    fn turret(&mut self, device: i32) -> ShamrockResult<i32> {
        let mut t: c_int = 0;
        check(unsafe { (self.fns.get_turret)(device, &mut t) })?;
        Ok(t)
    }

    fn grating_offset(&mut self, device: i32, grating: i32) -> ShamrockResult<i32> {
        let mut offset: c_int = 0;
        check(unsafe { (self.fns.get_grating_offset)(device, grating, &mut offset) })?;
        Ok(offset)
    }

    fn set_grating_offset(
        &mut self,
        device: i32,
        grating: i32,
        offset: i32,
    ) -> ShamrockResult<()> {
        check(unsafe { (self.fns.set_grating_offset)(device, grating, offset) })
    }

    fn detector_offset(&mut self, device: i32, entrance: Port, exit: Port) -> ShamrockResult<i32> {
        let mut offset: c_int = 0;
        check(unsafe {
            (self.fns.get_detector_offset_ex)(device, entrance as c_int, exit as c_int, &mut offset)
        })?;
        Ok(offset)
    }

    fn set_detector_offset(
        &mut self,
        device: i32,
        entrance: Port,
        exit: Port,
        offset: i32,
    ) -> ShamrockResult<()> {
        check(unsafe {
            (self.fns.set_detector_offset_ex)(device, entrance as c_int, exit as c_int, offset)
        })
    }

    fn wavelength(&mut self, device: i32) -> ShamrockResult<f32> {
        let mut wl: c_float = 0.0;
        check(unsafe { (self.fns.get_wavelength)(device, &mut wl) })?;
        Ok(wl)
    }

    fn set_wavelength(&mut self, device: i32, wavelength: f32) -> ShamrockResult<()> {
        check(unsafe { (self.fns.set_wavelength)(device, wavelength) })
    }

    fn auto_slit_is_present(&mut self, device: i32, slit: Slit) -> ShamrockResult<bool> {
        let mut present: c_int = 0;
        check(unsafe { (self.fns.auto_slit_is_present)(device, slit as c_int, &mut present) })?;
        Ok(present != 0)
    }

    fn auto_slit_width(&mut self, device: i32, slit: Slit) -> ShamrockResult<f32> {
        let mut width: c_float = 0.0;
        check(unsafe { (self.fns.get_auto_slit_width)(device, slit as c_int, &mut width) })?;
        Ok(width)
    }

    fn set_auto_slit_width(&mut self, device: i32, slit: Slit, width: f32) -> ShamrockResult<()> {
        check(unsafe { (self.fns.set_auto_slit_width)(device, slit as c_int, width) })
    }

    fn focus_mirror(&mut self, device: i32) -> ShamrockResult<i32> {
        let mut pos: c_int = 0;
        check(unsafe { (self.fns.get_focus_mirror)(device, &mut pos) })?;
        Ok(pos)
    }

    fn set_focus_mirror(&mut self, device: i32, steps: i32) -> ShamrockResult<()> {
        check(unsafe { (self.fns.set_focus_mirror)(device, steps) })
    }

    fn focus_mirror_max_steps(&mut self, device: i32) -> ShamrockResult<i32> {
        let mut steps: c_int = 0;
        check(unsafe { (self.fns.get_focus_mirror_max_steps)(device, &mut steps) })?;
        Ok(steps)
    }

    fn flipper_mirror_is_present(&mut self, device: i32, flipper: Flipper) -> ShamrockResult<bool> {
        let mut present: c_int = 0;
        check(unsafe {
            (self.fns.flipper_mirror_is_present)(device, flipper as c_int, &mut present)
        })?;
        Ok(present != 0)
    }

    fn flipper_mirror(&mut self, device: i32, flipper: Flipper) -> ShamrockResult<i32> {
        let mut port: c_int = 0;
        check(unsafe { (self.fns.get_flipper_mirror)(device, flipper as c_int, &mut port) })?;
        Ok(port)
    }

    fn set_flipper_mirror(
        &mut self,
        device: i32,
        flipper: Flipper,
        port: Port,
    ) -> ShamrockResult<()> {
        check(unsafe { (self.fns.set_flipper_mirror)(device, flipper as c_int, port as c_int) })
    }
}
