//! MCL return codes.

use labscope_core::error::{DriverError, DriverErrorKind};
use thiserror::Error;

pub const MCL_SUCCESS: i32 = 0;
pub const MCL_GENERAL_ERROR: i32 = -1;
pub const MCL_DEV_ERROR: i32 = -2;
pub const MCL_DEV_NOT_ATTACHED: i32 = -3;
pub const MCL_USAGE_ERROR: i32 = -4;
pub const MCL_DEV_NOT_READY: i32 = -5;
pub const MCL_ARGUMENT_ERROR: i32 = -6;
pub const MCL_INVALID_AXIS: i32 = -7;
pub const MCL_INVALID_HANDLE: i32 = -8;

pub fn code_name(code: i32) -> &'static str {
    match code {
        MCL_SUCCESS => "MCL_SUCCESS",
        MCL_GENERAL_ERROR => "MCL_GENERAL_ERROR",
        MCL_DEV_ERROR => "MCL_DEV_ERROR",
        MCL_DEV_NOT_ATTACHED => "MCL_DEV_NOT_ATTACHED",
        MCL_USAGE_ERROR => "MCL_USAGE_ERROR",
        MCL_DEV_NOT_READY => "MCL_DEV_NOT_READY",
        MCL_ARGUMENT_ERROR => "MCL_ARGUMENT_ERROR",
        MCL_INVALID_AXIS => "MCL_INVALID_AXIS",
        MCL_INVALID_HANDLE => "MCL_INVALID_HANDLE",
        _ => "MCL_UNKNOWN_ERROR",
    }
}

/// Negative return code from an MCL library call.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{name} ({code})")]
pub struct MclError {
    pub code: i32,
    pub name: &'static str,
}

impl MclError {
    pub fn from_code(code: i32) -> Self {
        Self {
            code,
            name: code_name(code),
        }
    }
}

pub type MclResult<T> = std::result::Result<T, MclError>;

/// Pass non-negative codes through, turn negative ones into errors.
pub fn check(code: i32) -> MclResult<i32> {
    if code < 0 {
        Err(MclError::from_code(code))
    } else {
        Ok(code)
    }
}

/// Calls returning a double encode errors as negative whole numbers.
pub fn check_f64(value: f64) -> MclResult<f64> {
    if value < 0.0 && value.fract() == 0.0 && value >= MCL_INVALID_HANDLE as f64 {
        Err(MclError::from_code(value as i32))
    } else {
        Ok(value)
    }
}

impl From<MclError> for DriverError {
    fn from(err: MclError) -> Self {
        let kind = match err.code {
            MCL_DEV_NOT_ATTACHED | MCL_INVALID_HANDLE => DriverErrorKind::Communication,
            MCL_DEV_NOT_READY => DriverErrorKind::Timeout,
            MCL_ARGUMENT_ERROR | MCL_INVALID_AXIS => DriverErrorKind::InvalidParameter,
            MCL_DEV_ERROR => DriverErrorKind::Hardware,
            _ => DriverErrorKind::Unknown,
        };
        DriverError::new("mcl", kind, err.to_string()).with_code(err.code as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_codes_are_errors() {
        assert_eq!(check(3).unwrap(), 3);
        let err = check(MCL_INVALID_AXIS).unwrap_err();
        assert_eq!(err.to_string(), "MCL_INVALID_AXIS (-7)");
        assert_eq!(check(-42).unwrap_err().name, "MCL_UNKNOWN_ERROR");
    }

    #[test]
    fn double_returns() {
        assert_eq!(check_f64(12.5).unwrap(), 12.5);
        assert_eq!(check_f64(0.0).unwrap(), 0.0);
        assert_eq!(check_f64(-5.0).unwrap_err().code, MCL_DEV_NOT_READY);
        // readback noise below zero is a position, not a code
        assert!(check_f64(-0.003).is_ok());
    }

    #[test]
    fn driver_error_kind() {
        let driver: DriverError = MclError::from_code(MCL_DEV_NOT_ATTACHED).into();
        assert_eq!(driver.kind, DriverErrorKind::Communication);
        assert_eq!(driver.code(), Some(-3));
    }
}
