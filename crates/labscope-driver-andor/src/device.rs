//! Andor Shamrock spectrograph device.
//!
//! Opens one spectrograph through any [`ShamrockSdk`] and caches the static
//! description read at connect time: serial number, optical parameters,
//! grating labels, fitted slits and flippers, focus mirror travel.

use std::collections::BTreeMap;

use anyhow::{bail, ensure, Result};
use tracing::{debug, info, warn};

use crate::sdk::{
    Flipper, OpticalParams, Port, ShamrockSdk, Slit, SHAMROCK_DET_OFFSET_MAX,
    SHAMROCK_DET_OFFSET_MIN, SHAMROCK_GRAT_OFFSET_MAX, SHAMROCK_GRAT_OFFSET_MIN,
    SHAMROCK_SLITWIDTHMAX, SHAMROCK_SLITWIDTHMIN,
};

/// One connected Shamrock spectrograph.
pub struct AndorShamrockSpec {
    sdk: Box<dyn ShamrockSdk>,
    dev_id: i32,
    debug: bool,
    pub serial_number: String,
    pub optics: OpticalParams,
    /// Grating number (1-based) to display label.
    pub gratings: BTreeMap<i32, String>,
    pub slit_present: BTreeMap<i32, bool>,
    pub focus_mirror_max_steps: i32,
    pub flipper_present: BTreeMap<i32, bool>,
    closed: bool,
}

impl std::fmt::Debug for AndorShamrockSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AndorShamrockSpec")
            .field("dev_id", &self.dev_id)
            .field("serial_number", &self.serial_number)
            .field("gratings", &self.gratings)
            .finish_non_exhaustive()
    }
}

impl AndorShamrockSpec {
    /// Initialise the SDK and read the instrument description.
    pub fn open(mut sdk: Box<dyn ShamrockSdk>, dev_id: i32, debug: bool) -> Result<Self> {
        sdk.initialize()?;
        let n_devices = sdk.number_devices()?;
        ensure!(
            dev_id >= 0 && dev_id < n_devices,
            "Shamrock device {dev_id} not found ({n_devices} attached)"
        );

        let serial_number = sdk.serial_number(dev_id)?;
        let optics = sdk.eeprom_optical_params(dev_id)?;

        let mut gratings = BTreeMap::new();
        for grating in 1..=sdk.number_gratings(dev_id)? {
            let info = sdk.grating_info(dev_id, grating)?;
            gratings.insert(grating, info.label());
        }

        let mut slit_present = BTreeMap::new();
        for slit in Slit::ALL {
            slit_present.insert(slit as i32, sdk.auto_slit_is_present(dev_id, slit)?);
        }

        let focus_mirror_max_steps = sdk.focus_mirror_max_steps(dev_id)?;

        let mut flipper_present = BTreeMap::new();
        for flipper in [Flipper::Input, Flipper::Output] {
            flipper_present.insert(
                flipper as i32,
                sdk.flipper_mirror_is_present(dev_id, flipper)?,
            );
        }

        info!(
            serial = %serial_number,
            focal_length = optics.focal_length,
            gratings = gratings.len(),
            "Shamrock spectrograph opened"
        );

        Ok(Self {
            sdk,
            dev_id,
            debug,
            serial_number,
            optics,
            gratings,
            slit_present,
            focus_mirror_max_steps,
            flipper_present,
            closed: false,
        })
    }

    pub fn dev_id(&self) -> i32 {
        self.dev_id
    }

    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.sdk.close()?;
        self.closed = true;
        info!(serial = %self.serial_number, "Shamrock spectrograph closed");
        Ok(())
    }

    pub fn turret(&mut self) -> Result<i32> {
        Ok(self.sdk.turret(self.dev_id)?)
    }

    pub fn grating(&mut self) -> Result<i32> {
        Ok(self.sdk.grating(self.dev_id)?)
    }

    pub fn set_grating(&mut self, grating: i32) -> Result<()> {
        ensure!(
            self.gratings.contains_key(&grating),
            "grating {grating} not installed on turret"
        );
        if self.debug {
            debug!(grating, "set_grating");
        }
        Ok(self.sdk.set_grating(self.dev_id, grating)?)
    }

    /// Label of a grating (`None` if not installed).
    pub fn grating_name(&self, grating: i32) -> Option<&str> {
        self.gratings.get(&grating).map(String::as_str)
    }

    pub fn grating_offset(&mut self, grating: i32) -> Result<i32> {
        Ok(self.sdk.grating_offset(self.dev_id, grating)?)
    }

    pub fn set_grating_offset(&mut self, grating: i32, offset: i32) -> Result<()> {
        ensure!(
            (SHAMROCK_GRAT_OFFSET_MIN..=SHAMROCK_GRAT_OFFSET_MAX).contains(&offset),
            "grating offset {offset} outside [{SHAMROCK_GRAT_OFFSET_MIN}, {SHAMROCK_GRAT_OFFSET_MAX}]"
        );
        Ok(self.sdk.set_grating_offset(self.dev_id, grating, offset)?)
    }

    pub fn detector_offset(&mut self, entrance: Port, exit: Port) -> Result<i32> {
        Ok(self.sdk.detector_offset(self.dev_id, entrance, exit)?)
    }

    pub fn set_detector_offset(&mut self, entrance: Port, exit: Port, offset: i32) -> Result<()> {
        ensure!(
            (SHAMROCK_DET_OFFSET_MIN..=SHAMROCK_DET_OFFSET_MAX).contains(&offset),
            "detector offset {offset} outside [{SHAMROCK_DET_OFFSET_MIN}, {SHAMROCK_DET_OFFSET_MAX}]"
        );
        Ok(self
            .sdk
            .set_detector_offset(self.dev_id, entrance, exit, offset)?)
    }

    /// Centre wavelength in nm.
    pub fn wavelength(&mut self) -> Result<f64> {
        Ok(self.sdk.wavelength(self.dev_id)? as f64)
    }

    pub fn set_wavelength(&mut self, wavelength_nm: f64) -> Result<()> {
        if self.debug {
            debug!(wavelength_nm, "set_wavelength");
        }
        Ok(self
            .sdk
            .set_wavelength(self.dev_id, wavelength_nm as f32)?)
    }

    /// Slit width in um.
    pub fn slit_width(&mut self, slit: Slit) -> Result<f64> {
        self.require_slit(slit)?;
        Ok(self.sdk.auto_slit_width(self.dev_id, slit)? as f64)
    }

    pub fn set_slit_width(&mut self, slit: Slit, width_um: f64) -> Result<()> {
        self.require_slit(slit)?;
        ensure!(
            (SHAMROCK_SLITWIDTHMIN..=SHAMROCK_SLITWIDTHMAX).contains(&width_um),
            "slit width {width_um}um outside [{SHAMROCK_SLITWIDTHMIN}, {SHAMROCK_SLITWIDTHMAX}]"
        );
        Ok(self
            .sdk
            .set_auto_slit_width(self.dev_id, slit, width_um as f32)?)
    }

    fn require_slit(&self, slit: Slit) -> Result<()> {
        if !self.slit_present.get(&(slit as i32)).copied().unwrap_or(false) {
            bail!("slit {:?} is not fitted", slit);
        }
        Ok(())
    }

    pub fn focus_mirror_position(&mut self) -> Result<i32> {
        Ok(self.sdk.focus_mirror(self.dev_id)?)
    }

    /// Move the focus mirror by `delta` steps.
    pub fn set_focus_mirror_position_rel(&mut self, delta: i32) -> Result<()> {
        Ok(self.sdk.set_focus_mirror(self.dev_id, delta)?)
    }

    /// Move the focus mirror to `position` in `[0, focus_mirror_max_steps]`.
    pub fn set_focus_mirror_position_abs(&mut self, position: i32) -> Result<()> {
        ensure!(
            (0..=self.focus_mirror_max_steps).contains(&position),
            "focus mirror position {position} outside [0, {}]",
            self.focus_mirror_max_steps
        );
        let current = self.focus_mirror_position()?;
        let delta = position - current;
        if delta != 0 {
            self.set_focus_mirror_position_rel(delta)?;
        }
        Ok(())
    }

    pub fn flipper_mirror(&mut self, flipper: Flipper) -> Result<Port> {
        let raw = self.sdk.flipper_mirror(self.dev_id, flipper)?;
        match Port::from_raw(raw) {
            Some(port) => Ok(port),
            None => {
                warn!(raw, ?flipper, "unexpected flipper port");
                bail!("flipper {:?} reported unknown port {}", flipper, raw)
            }
        }
    }

    pub fn set_flipper_mirror(&mut self, flipper: Flipper, port: Port) -> Result<()> {
        ensure!(
            self.flipper_present
                .get(&(flipper as i32))
                .copied()
                .unwrap_or(false),
            "flipper mirror {:?} is not fitted",
            flipper
        );
        Ok(self.sdk.set_flipper_mirror(self.dev_id, flipper, port)?)
    }
}

impl Drop for AndorShamrockSpec {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("failed to close Shamrock on drop: {e}");
        }
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::error::ShamrockError;
    use crate::mock::MockShamrock;

    fn open() -> AndorShamrockSpec {
        AndorShamrockSpec::open(Box::new(MockShamrock::new()), 0, false).unwrap()
    }

    #[test]
    fn open_reads_description() {
        let spec = open();
        assert_eq!(spec.serial_number, "SR-3031-MOCK");
        assert_eq!(spec.grating_name(1), Some("150g/mm 500nm"));
        assert_eq!(spec.grating_name(3), Some("1200g/mm 750nm"));
        assert_eq!(spec.slit_present[&(Slit::InputSide as i32)], true);
        assert_eq!(spec.slit_present[&(Slit::OutputDirect as i32)], false);
        assert_eq!(spec.focus_mirror_max_steps, 500);
    }

    #[test]
    fn open_rejects_missing_device() {
        let err = AndorShamrockSpec::open(Box::new(MockShamrock::new()), 3, false).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn focus_mirror_abs_moves_by_delta() {
        let mut spec = open();
        spec.set_focus_mirror_position_abs(120).unwrap();
        assert_eq!(spec.focus_mirror_position().unwrap(), 120);
        spec.set_focus_mirror_position_abs(80).unwrap();
        assert_eq!(spec.focus_mirror_position().unwrap(), 80);
        assert!(spec.set_focus_mirror_position_abs(501).is_err());
        assert!(spec.set_focus_mirror_position_abs(-1).is_err());
    }

    #[test]
    fn slits_and_flippers() {
        let mut spec = open();
        spec.set_slit_width(Slit::InputSide, 50.0).unwrap();
        assert_eq!(spec.slit_width(Slit::InputSide).unwrap(), 50.0);
        assert!(spec.set_slit_width(Slit::InputSide, 5.0).is_err());
        assert!(spec.slit_width(Slit::OutputSide).is_err());

        spec.set_flipper_mirror(Flipper::Input, Port::Side).unwrap();
        assert_eq!(spec.flipper_mirror(Flipper::Input).unwrap(), Port::Side);

        let mut no_output = AndorShamrockSpec::open(
            Box::new(MockShamrock::new().without_flipper(Flipper::Output)),
            0,
            false,
        )
        .unwrap();
        assert!(no_output
            .set_flipper_mirror(Flipper::Output, Port::Side)
            .is_err());
    }

    #[test]
    fn sdk_codes_surface_as_shamrock_errors() {
        let mut spec = open();
        let err = spec.set_wavelength(5000.0).unwrap_err();
        let shamrock = err.downcast_ref::<ShamrockError>().unwrap();
        assert_eq!(shamrock.name, "SHAMROCK_P2INVALID");
    }
}
