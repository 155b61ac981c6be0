//! Core types for labscope.
//!
//! - [`parameter`]: hardware-bound settings ([`Parameter`], [`ParameterSet`])
//! - [`observable`]: the reactive value underneath a setting
//! - [`capabilities`]: async traits drivers implement (`Movable`, `SpectrumAcquisition`, ...)
//! - [`hardware`]: the [`HardwareComponent`] lifecycle and blocking-call helper
//! - [`error`]: [`ScopeError`] and vendor [`DriverError`]

pub mod capabilities;
pub mod error;
pub mod hardware;
pub mod observable;
pub mod parameter;

pub use capabilities::{
    AcquisitionStatus, Movable, Parameterized, Readable, SpectrumAcquisition, WavelengthTunable,
};
pub use error::{DriverError, DriverErrorKind, ScopeError, ScopeResult};
pub use hardware::{run_blocking, ComponentBase, HardwareComponent, SharedDevice};
pub use observable::{Observable, ObservableMetadata};
pub use parameter::{Parameter, ParameterAny, ParameterSet, ParameterValue};
