//! Simulated Shamrock SDK.
//!
//! Behaves like a single SR-303i with a three-grating turret, one motorised
//! input slit and both flipper mirrors fitted. Out-of-range arguments come
//! back as the same `P*INVALID` codes the vendor library returns, so the
//! error paths of the device layer can be exercised without hardware.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{
    ShamrockError, ShamrockResult, SHAMROCK_NOT_AVAILABLE, SHAMROCK_NOT_INITIALIZED,
    SHAMROCK_P1INVALID, SHAMROCK_P2INVALID, SHAMROCK_P3INVALID, SHAMROCK_P4INVALID,
};
use crate::sdk::{
    Flipper, GratingInfo, OpticalParams, Port, ShamrockSdk, Slit, SHAMROCK_DET_OFFSET_MAX,
    SHAMROCK_DET_OFFSET_MIN, SHAMROCK_GRAT_OFFSET_MAX, SHAMROCK_GRAT_OFFSET_MIN,
    SHAMROCK_SLITWIDTHMAX, SHAMROCK_SLITWIDTHMIN,
};

/// In-memory spectrograph state.
#[derive(Debug, Clone)]
pub struct MockShamrock {
    initialized: bool,
    devices: i32,
    serial: String,
    optics: OpticalParams,
    gratings: Vec<GratingInfo>,
    grating: i32,
    turret: i32,
    grating_offsets: HashMap<i32, i32>,
    detector_offsets: HashMap<(Port, Port), i32>,
    wavelength: f32,
    slit_widths: HashMap<Slit, f32>,
    focus_mirror: i32,
    focus_mirror_max: i32,
    flippers: HashMap<Flipper, i32>,
}

impl MockShamrock {
    pub fn new() -> Self {
        let gratings = [(150.0, "500nm"), (600.0, "500nm"), (1200.0, "750nm")]
            .into_iter()
            .map(|(lines, blaze)| GratingInfo {
                lines,
                blaze: blaze.to_string(),
                home: 0,
                offset: 0,
            })
            .collect();
        Self {
            initialized: false,
            devices: 1,
            serial: "SR-3031-MOCK".to_string(),
            optics: OpticalParams {
                focal_length: 0.3,
                angular_deviation: 30.3,
                focal_tilt: 0.0,
            },
            gratings,
            grating: 1,
            turret: 1,
            grating_offsets: HashMap::new(),
            detector_offsets: HashMap::new(),
            wavelength: 500.0,
            slit_widths: HashMap::from([(Slit::InputSide, 100.0)]),
            focus_mirror: 0,
            focus_mirror_max: 500,
            flippers: HashMap::from([(Flipper::Input, 0), (Flipper::Output, 0)]),
        }
    }

    /// Remove a flipper mirror from the simulated instrument.
    pub fn without_flipper(mut self, flipper: Flipper) -> Self {
        self.flippers.remove(&flipper);
        self
    }

    fn ready(&self, device: i32) -> ShamrockResult<()> {
        if !self.initialized {
            return Err(ShamrockError::from_code(SHAMROCK_NOT_INITIALIZED));
        }
        if device < 0 || device >= self.devices {
            return Err(ShamrockError::from_code(SHAMROCK_P1INVALID));
        }
        Ok(())
    }

    fn valid_grating(&self, grating: i32, code: i32) -> ShamrockResult<()> {
        if grating < 1 || grating as usize > self.gratings.len() {
            Err(ShamrockError::from_code(code))
        } else {
            Ok(())
        }
    }
}

impl Default for MockShamrock {
    fn default() -> Self {
        Self::new()
    }
}

impl ShamrockSdk for MockShamrock {
    fn initialize(&mut self) -> ShamrockResult<()> {
        self.initialized = true;
        debug!("mock Shamrock initialised");
        Ok(())
    }

    fn close(&mut self) -> ShamrockResult<()> {
        self.initialized = false;
        Ok(())
    }

    fn number_devices(&mut self) -> ShamrockResult<i32> {
        if !self.initialized {
            return Err(ShamrockError::from_code(SHAMROCK_NOT_INITIALIZED));
        }
        Ok(self.devices)
    }

    fn serial_number(&mut self, device: i32) -> ShamrockResult<String> {
        self.ready(device)?;
        Ok(self.serial.clone())
    }

    fn eeprom_optical_params(&mut self, device: i32) -> ShamrockResult<OpticalParams> {
        self.ready(device)?;
        Ok(self.optics)
    }

    fn number_gratings(&mut self, device: i32) -> ShamrockResult<i32> {
        self.ready(device)?;
        Ok(self.gratings.len() as i32)
    }

    fn grating_info(&mut self, device: i32, grating: i32) -> ShamrockResult<GratingInfo> {
        self.ready(device)?;
        self.valid_grating(grating, SHAMROCK_P2INVALID)?;
        let mut info = self.gratings[(grating - 1) as usize].clone();
        info.offset = self.grating_offsets.get(&grating).copied().unwrap_or(0);
        Ok(info)
    }

    fn grating(&mut self, device: i32) -> ShamrockResult<i32> {
        self.ready(device)?;
        Ok(self.grating)
    }

    fn set_grating(&mut self, device: i32, grating: i32) -> ShamrockResult<()> {
        self.ready(device)?;
        self.valid_grating(grating, SHAMROCK_P2INVALID)?;
        self.grating = grating;
        // a grating change re-homes the focus mirror
        self.focus_mirror = 0;
        Ok(())
    }

    fn turret(&mut self, device: i32) -> ShamrockResult<i32> {
        self.ready(device)?;
        Ok(self.turret)
    }

    fn grating_offset(&mut self, device: i32, grating: i32) -> ShamrockResult<i32> {
        self.ready(device)?;
        self.valid_grating(grating, SHAMROCK_P2INVALID)?;
        Ok(self.grating_offsets.get(&grating).copied().unwrap_or(0))
    }

    fn set_grating_offset(
        &mut self,
        device: i32,
        grating: i32,
        offset: i32,
    ) -> ShamrockResult<()> {
        self.ready(device)?;
        self.valid_grating(grating, SHAMROCK_P2INVALID)?;
        if !(SHAMROCK_GRAT_OFFSET_MIN..=SHAMROCK_GRAT_OFFSET_MAX).contains(&offset) {
            return Err(ShamrockError::from_code(SHAMROCK_P3INVALID));
        }
        self.grating_offsets.insert(grating, offset);
        Ok(())
    }

    fn detector_offset(&mut self, device: i32, entrance: Port, exit: Port) -> ShamrockResult<i32> {
        self.ready(device)?;
        Ok(self
            .detector_offsets
            .get(&(entrance, exit))
            .copied()
            .unwrap_or(0))
    }

    fn set_detector_offset(
        &mut self,
        device: i32,
        entrance: Port,
        exit: Port,
        offset: i32,
    ) -> ShamrockResult<()> {
        self.ready(device)?;
        if !(SHAMROCK_DET_OFFSET_MIN..=SHAMROCK_DET_OFFSET_MAX).contains(&offset) {
            return Err(ShamrockError::from_code(SHAMROCK_P4INVALID));
        }
        self.detector_offsets.insert((entrance, exit), offset);
        Ok(())
    }

    fn wavelength(&mut self, device: i32) -> ShamrockResult<f32> {
        self.ready(device)?;
        Ok(self.wavelength)
    }

    fn set_wavelength(&mut self, device: i32, wavelength: f32) -> ShamrockResult<()> {
        self.ready(device)?;
        if !(0.0..=2000.0).contains(&wavelength) {
            return Err(ShamrockError::from_code(SHAMROCK_P2INVALID));
        }
        // the turret drive resolves to 0.01 nm
        self.wavelength = (wavelength * 100.0).round() / 100.0;
        Ok(())
    }

    fn auto_slit_is_present(&mut self, device: i32, slit: Slit) -> ShamrockResult<bool> {
        self.ready(device)?;
        Ok(self.slit_widths.contains_key(&slit))
    }

    fn auto_slit_width(&mut self, device: i32, slit: Slit) -> ShamrockResult<f32> {
        self.ready(device)?;
        self.slit_widths
            .get(&slit)
            .copied()
            .ok_or_else(|| ShamrockError::from_code(SHAMROCK_NOT_AVAILABLE))
    }

    fn set_auto_slit_width(&mut self, device: i32, slit: Slit, width: f32) -> ShamrockResult<()> {
        self.ready(device)?;
        if !self.slit_widths.contains_key(&slit) {
            return Err(ShamrockError::from_code(SHAMROCK_NOT_AVAILABLE));
        }
        let w = width as f64;
        if !(SHAMROCK_SLITWIDTHMIN..=SHAMROCK_SLITWIDTHMAX).contains(&w) {
            return Err(ShamrockError::from_code(SHAMROCK_P3INVALID));
        }
        self.slit_widths.insert(slit, width);
        Ok(())
    }

    fn focus_mirror(&mut self, device: i32) -> ShamrockResult<i32> {
        self.ready(device)?;
        Ok(self.focus_mirror)
    }

    fn set_focus_mirror(&mut self, device: i32, steps: i32) -> ShamrockResult<()> {
        self.ready(device)?;
        let target = self.focus_mirror + steps;
        if target < 0 || target > self.focus_mirror_max {
            return Err(ShamrockError::from_code(SHAMROCK_P2INVALID));
        }
        self.focus_mirror = target;
        Ok(())
    }

    fn focus_mirror_max_steps(&mut self, device: i32) -> ShamrockResult<i32> {
        self.ready(device)?;
        Ok(self.focus_mirror_max)
    }

    fn flipper_mirror_is_present(&mut self, device: i32, flipper: Flipper) -> ShamrockResult<bool> {
        self.ready(device)?;
        Ok(self.flippers.contains_key(&flipper))
    }

    fn flipper_mirror(&mut self, device: i32, flipper: Flipper) -> ShamrockResult<i32> {
        self.ready(device)?;
        self.flippers
            .get(&flipper)
            .copied()
            .ok_or_else(|| ShamrockError::from_code(SHAMROCK_NOT_AVAILABLE))
    }

    fn set_flipper_mirror(
        &mut self,
        device: i32,
        flipper: Flipper,
        port: Port,
    ) -> ShamrockResult<()> {
        self.ready(device)?;
        match self.flippers.get_mut(&flipper) {
            Some(p) => {
                *p = port as i32;
                Ok(())
            }
            None => Err(ShamrockError::from_code(SHAMROCK_NOT_AVAILABLE)),
        }
    }
}
