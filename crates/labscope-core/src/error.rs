//! Error types shared across labscope crates.
//!
//! `ScopeError` is the primary error enum. Vendor SDK wrappers translate their
//! numeric return codes into [`DriverError`], which carries the raw code so a
//! caller can still match on it after the error has crossed an `anyhow`
//! boundary (see [`DriverError::code`]).
//!
//! Capability traits and hardware components return `anyhow::Result`; both
//! error types here convert into `anyhow::Error` through `?`.

use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    Initialization,
    Communication,
    Shutdown,
    Hardware,
    Timeout,
    InvalidParameter,
    NotAvailable,
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Shutdown => "shutdown",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::NotAvailable => "not_available",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Error raised by a vendor driver, optionally carrying the SDK return code.
#[derive(Error, Debug, Clone)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    pub driver_type: String,
    pub kind: DriverErrorKind,
    pub code: Option<i64>,
    pub message: String,
}

impl DriverError {
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            code: None,
            message: message.into(),
        }
    }

    /// Attach the raw SDK return code.
    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn code(&self) -> Option<i64> {
        self.code
    }
}

/// Convenience alias for results using the shared error type.
pub type ScopeResult<T> = std::result::Result<T, ScopeError>;

/// Primary error type for labscope.
#[derive(Error, Debug)]
pub enum ScopeError {
    /// Semantic configuration error (value parses but is not usable).
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// General instrument failure not covered by a driver-specific code.
    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Hardware operation attempted on a component that is not connected.
    #[error("Hardware '{0}' is not connected")]
    NotConnected(String),

    /// Functionality compiled out by feature flags.
    #[error("Feature '{0}' is not enabled; rebuild with --features {0}")]
    FeatureNotEnabled(String),

    #[error("Parameter '{0}' is read-only")]
    ParameterReadOnly(String),

    #[error("Invalid choice for parameter '{0}'")]
    ParameterInvalidChoice(String),

    #[error("Value {value} for parameter '{name}' outside [{min}, {max}]")]
    ParameterOutOfRange {
        name: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Parameter '{0}' has no hardware reader connected")]
    ParameterNoHardwareReader(String),

    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    /// Raised inside a measurement loop after the interrupt flag was observed.
    #[error("Measurement interrupted")]
    Interrupted,

    #[error("Data processing error: {0}")]
    Processing(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_error_keeps_code_across_anyhow() {
        let err: anyhow::Error = DriverError::new(
            "mcl_microdrive",
            DriverErrorKind::Hardware,
            "MCL_DEV_NOT_ATTACHED",
        )
        .with_code(-3)
        .into();

        let driver = err.downcast_ref::<DriverError>().unwrap();
        assert_eq!(driver.code(), Some(-3));
        assert_eq!(
            err.to_string(),
            "Driver 'mcl_microdrive' hardware error: MCL_DEV_NOT_ATTACHED"
        );
    }

    #[test]
    fn out_of_range_message() {
        let err = ScopeError::ParameterOutOfRange {
            name: "center_wl".into(),
            value: "2500".into(),
            min: "-100".into(),
            max: "2000".into(),
        };
        assert_eq!(
            err.to_string(),
            "Value 2500 for parameter 'center_wl' outside [-100, 2000]"
        );
    }
}
