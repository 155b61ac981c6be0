//! The Shamrock SDK seam.
//!
//! [`ShamrockSdk`] mirrors the vendor function table one call per method.
//! Implementations translate return codes with [`check`](crate::error::check)
//! and never interpret the values; range checks and bookkeeping live in
//! [`AndorShamrockSpec`](crate::device::AndorShamrockSpec).

use serde::{Deserialize, Serialize};

use crate::error::ShamrockResult;

pub const SHAMROCK_ACCESSORYMIN: i32 = 0;
pub const SHAMROCK_ACCESSORYMAX: i32 = 1;
pub const SHAMROCK_FILTERMIN: i32 = 1;
pub const SHAMROCK_FILTERMAX: i32 = 6;
pub const SHAMROCK_TURRETMIN: i32 = 1;
pub const SHAMROCK_TURRETMAX: i32 = 3;
pub const SHAMROCK_GRATINGMIN: i32 = 1;
pub const SHAMROCK_SLITWIDTHMIN: f64 = 10.0;
pub const SHAMROCK_SLITWIDTHMAX: f64 = 2500.0;
pub const SHAMROCK_I24SLITWIDTHMAX: f64 = 24000.0;
pub const SHAMROCK_SHUTTERMODEMIN: i32 = 0;
pub const SHAMROCK_SHUTTERMODEMAX: i32 = 1;
pub const SHAMROCK_DET_OFFSET_MIN: i32 = -240000;
pub const SHAMROCK_DET_OFFSET_MAX: i32 = 240000;
pub const SHAMROCK_GRAT_OFFSET_MIN: i32 = -20000;
pub const SHAMROCK_GRAT_OFFSET_MAX: i32 = 20000;
pub const SHAMROCK_SLIT_INDEX_MIN: i32 = 1;
pub const SHAMROCK_SLIT_INDEX_MAX: i32 = 4;
pub const SHAMROCK_FLIPPER_INDEX_MIN: i32 = 1;
pub const SHAMROCK_FLIPPER_INDEX_MAX: i32 = 2;
pub const SHAMROCK_PORTMIN: i32 = 0;
pub const SHAMROCK_PORTMAX: i32 = 1;
/// Size of every string buffer handed to the SDK.
pub const SHAMROCK_ERRORLENGTH: usize = 64;

/// Entrance / exit port of the spectrograph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Port {
    Direct = 0,
    Side = 1,
}

impl Port {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Port::Direct),
            1 => Some(Port::Side),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Port::Direct => "direct",
            Port::Side => "side",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "direct" => Some(Port::Direct),
            "side" => Some(Port::Side),
            _ => None,
        }
    }
}

/// Motorised slit positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slit {
    InputSide = 1,
    InputDirect = 2,
    OutputSide = 3,
    OutputDirect = 4,
}

impl Slit {
    pub const ALL: [Slit; 4] = [
        Slit::InputSide,
        Slit::InputDirect,
        Slit::OutputSide,
        Slit::OutputDirect,
    ];
}

/// Flipper mirrors selecting between the direct and side ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flipper {
    Input = 1,
    Output = 2,
}

/// EEPROM optical parameters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OpticalParams {
    pub focal_length: f64,
    pub angular_deviation: f64,
    pub focal_tilt: f64,
}

/// One turret grating as reported by `ShamrockGetGratingInfo`.
#[derive(Debug, Clone, PartialEq)]
pub struct GratingInfo {
    /// Lines per millimetre.
    pub lines: f64,
    pub blaze: String,
    pub home: i32,
    pub offset: i32,
}

impl GratingInfo {
    /// Display label, e.g. `1200g/mm 500nm`.
    pub fn label(&self) -> String {
        format!("{:.0}g/mm {}", self.lines, self.blaze)
    }
}

/// The Shamrock vendor function table.
///
/// `device` is the zero-based device index used by every SDK call.
pub trait ShamrockSdk: Send {
    fn initialize(&mut self) -> ShamrockResult<()>;
    fn close(&mut self) -> ShamrockResult<()>;
    fn number_devices(&mut self) -> ShamrockResult<i32>;
    fn serial_number(&mut self, device: i32) -> ShamrockResult<String>;
    fn eeprom_optical_params(&mut self, device: i32) -> ShamrockResult<OpticalParams>;

    fn number_gratings(&mut self, device: i32) -> ShamrockResult<i32>;
    fn grating_info(&mut self, device: i32, grating: i32) -> ShamrockResult<GratingInfo>;
    fn grating(&mut self, device: i32) -> ShamrockResult<i32>;
    fn set_grating(&mut self, device: i32, grating: i32) -> ShamrockResult<()>;
    fn turret(&mut self, device: i32) -> ShamrockResult<i32>;
    fn grating_offset(&mut self, device: i32, grating: i32) -> ShamrockResult<i32>;
    fn set_grating_offset(&mut self, device: i32, grating: i32, offset: i32)
        -> ShamrockResult<()>;

    fn detector_offset(&mut self, device: i32, entrance: Port, exit: Port) -> ShamrockResult<i32>;
    fn set_detector_offset(
        &mut self,
        device: i32,
        entrance: Port,
        exit: Port,
        offset: i32,
    ) -> ShamrockResult<()>;

    fn wavelength(&mut self, device: i32) -> ShamrockResult<f32>;
    fn set_wavelength(&mut self, device: i32, wavelength: f32) -> ShamrockResult<()>;

    fn auto_slit_is_present(&mut self, device: i32, slit: Slit) -> ShamrockResult<bool>;
    fn auto_slit_width(&mut self, device: i32, slit: Slit) -> ShamrockResult<f32>;
    fn set_auto_slit_width(&mut self, device: i32, slit: Slit, width: f32) -> ShamrockResult<()>;

    fn focus_mirror(&mut self, device: i32) -> ShamrockResult<i32>;
    /// Move the focus mirror by `steps` relative to its current position.
    fn set_focus_mirror(&mut self, device: i32, steps: i32) -> ShamrockResult<()>;
    fn focus_mirror_max_steps(&mut self, device: i32) -> ShamrockResult<i32>;

    fn flipper_mirror_is_present(&mut self, device: i32, flipper: Flipper) -> ShamrockResult<bool>;
    fn flipper_mirror(&mut self, device: i32, flipper: Flipper) -> ShamrockResult<i32>;
    fn set_flipper_mirror(&mut self, device: i32, flipper: Flipper, port: Port)
        -> ShamrockResult<()>;
}

impl<S: ShamrockSdk + ?Sized> ShamrockSdk for Box<S> {
    fn initialize(&mut self) -> ShamrockResult<()> {
        (**self).initialize()
    }
    fn close(&mut self) -> ShamrockResult<()> {
        (**self).close()
    }
    fn number_devices(&mut self) -> ShamrockResult<i32> {
        (**self).number_devices()
    }
    fn serial_number(&mut self, device: i32) -> ShamrockResult<String> {
        (**self).serial_number(device)
    }
    fn eeprom_optical_params(&mut self, device: i32) -> ShamrockResult<OpticalParams> {
        (**self).eeprom_optical_params(device)
    }
    fn number_gratings(&mut self, device: i32) -> ShamrockResult<i32> {
        (**self).number_gratings(device)
    }
    fn grating_info(&mut self, device: i32, grating: i32) -> ShamrockResult<GratingInfo> {
        (**self).grating_info(device, grating)
    }
    fn grating(&mut self, device: i32) -> ShamrockResult<i32> {
        (**self).grating(device)
    }
    fn set_grating(&mut self, device: i32, grating: i32) -> ShamrockResult<()> {
        (**self).set_grating(device, grating)
    }
    fn turret(&mut self, device: i32) -> ShamrockResult<i32> {
        (**self).turret(device)
    }
    fn grating_offset(&mut self, device: i32, grating: i32) -> ShamrockResult<i32> {
        (**self).grating_offset(device, grating)
    }
    fn set_grating_offset(
        &mut self,
        device: i32,
        grating: i32,
        offset: i32,
    ) -> ShamrockResult<()> {
        (**self).set_grating_offset(device, grating, offset)
    }
    fn detector_offset(&mut self, device: i32, entrance: Port, exit: Port) -> ShamrockResult<i32> {
        (**self).detector_offset(device, entrance, exit)
    }
    fn set_detector_offset(
        &mut self,
        device: i32,
        entrance: Port,
        exit: Port,
        offset: i32,
    ) -> ShamrockResult<()> {
        (**self).set_detector_offset(device, entrance, exit, offset)
    }
    fn wavelength(&mut self, device: i32) -> ShamrockResult<f32> {
        (**self).wavelength(device)
    }
    fn set_wavelength(&mut self, device: i32, wavelength: f32) -> ShamrockResult<()> {
        (**self).set_wavelength(device, wavelength)
    }
    fn auto_slit_is_present(&mut self, device: i32, slit: Slit) -> ShamrockResult<bool> {
        (**self).auto_slit_is_present(device, slit)
    }
    fn auto_slit_width(&mut self, device: i32, slit: Slit) -> ShamrockResult<f32> {
        (**self).auto_slit_width(device, slit)
    }
    fn set_auto_slit_width(&mut self, device: i32, slit: Slit, width: f32) -> ShamrockResult<()> {
        (**self).set_auto_slit_width(device, slit, width)
    }
    fn focus_mirror(&mut self, device: i32) -> ShamrockResult<i32> {
        (**self).focus_mirror(device)
    }
    fn set_focus_mirror(&mut self, device: i32, steps: i32) -> ShamrockResult<()> {
        (**self).set_focus_mirror(device, steps)
    }
    fn focus_mirror_max_steps(&mut self, device: i32) -> ShamrockResult<i32> {
        (**self).focus_mirror_max_steps(device)
    }
    fn flipper_mirror_is_present(&mut self, device: i32, flipper: Flipper) -> ShamrockResult<bool> {
        (**self).flipper_mirror_is_present(device, flipper)
    }
    fn flipper_mirror(&mut self, device: i32, flipper: Flipper) -> ShamrockResult<i32> {
        (**self).flipper_mirror(device, flipper)
    }
    fn set_flipper_mirror(
        &mut self,
        device: i32,
        flipper: Flipper,
        port: Port,
    ) -> ShamrockResult<()> {
        (**self).set_flipper_mirror(device, flipper, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_names_roundtrip() {
        for port in [Port::Direct, Port::Side] {
            assert_eq!(Port::parse(port.as_str()), Some(port));
            assert_eq!(Port::from_raw(port as i32), Some(port));
        }
        assert_eq!(Port::from_raw(2), None);
    }

    #[test]
    fn grating_label() {
        let info = GratingInfo {
            lines: 1199.7,
            blaze: "500nm".into(),
            home: 0,
            offset: 0,
        };
        assert_eq!(info.label(), "1200g/mm 500nm");
    }
}
