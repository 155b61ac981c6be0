//! Common infrastructure for simulated instruments.
//!
//! - **mode**: Instant (unit tests) or Realistic (hardware-like delays)
//! - **timing**: delays used in realistic mode
//! - **errors**: error injection
//! - **rng**: seeded random number generator

pub mod errors;
pub mod mode;
pub mod rng;
pub mod timing;

pub use errors::{ErrorConfig, ErrorScenario};
pub use mode::MockMode;
pub use rng::MockRng;
pub use timing::TimingConfig;
