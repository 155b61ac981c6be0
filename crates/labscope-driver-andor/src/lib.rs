//! Andor Shamrock spectrograph driver.
//!
//! Layers, bottom up:
//!
//! - [`sdk`]: the [`ShamrockSdk`] call surface, backed either by the vendor
//!   libraries ([`library`], feature `shamrock_sdk`) or by [`mock`]
//! - [`device`]: one opened spectrograph with range checks and cached description
//! - [`hw`]: the `andor_spec` component binding settings to the device
//! - [`calibration`]: pixel to wavelength conversion per grating

pub mod calibration;
pub mod device;
pub mod error;
pub mod hw;
#[cfg(feature = "shamrock_sdk")]
pub mod library;
#[cfg(feature = "mock")]
pub mod mock;
pub mod sdk;

pub use calibration::{wl_p_calib, GratingCalibration, DEFAULT_CALIBRATION_ROW};
pub use device::AndorShamrockSpec;
pub use error::{ShamrockError, ShamrockResult};
pub use hw::{default_sdk_factory, AndorSpecHw, SdkFactory};
#[cfg(feature = "shamrock_sdk")]
pub use library::ShamrockLibrary;
#[cfg(feature = "mock")]
pub use mock::MockShamrock;
pub use sdk::{Flipper, Port, ShamrockSdk, Slit};
