//! Mad City Labs stage drivers.
//!
//! - [`microdrive`]: stepper XY controller with bookkeeping positions
//! - [`nanodrive`]: absolute piezo controller with sensor readback
//! - [`xy_stage`] / [`xyz_stage`]: the `mcl_xy_stage` and `mcl_z_stage`
//!   components
//!
//! Vendor calls go through [`sdk::MicroDriveSdk`] / [`sdk::NanoDriveSdk`],
//! implemented by [`library::MadLibrary`] (feature `mcl_sdk`) and the
//! simulated controllers in [`mock`].

pub mod axis;
pub mod error;
#[cfg(feature = "mcl_sdk")]
pub mod library;
pub mod microdrive;
#[cfg(feature = "mock")]
pub mod mock;
pub mod motion;
pub mod nanodrive;
pub mod sdk;
pub mod xy_stage;
pub mod xyz_stage;

pub use axis::{StageAxis, XyAxisMap};
pub use error::{MclError, MclResult};
#[cfg(feature = "mcl_sdk")]
pub use library::MadLibrary;
pub use microdrive::MclMicroDrive;
#[cfg(feature = "mock")]
pub use mock::{MockMicroDrive, MockNanoDrive};
pub use nanodrive::MclNanoDrive;
pub use sdk::{MicroDriveSdk, NanoDriveSdk, SLOW_STEP_PERIOD, STEP_SIZE};
pub use xy_stage::{default_microdrive_factory, MclXyStageHw, MicroDriveFactory};
pub use xyz_stage::{default_nanodrive_factory, MclXyzStageHw, NanoDriveFactory};
