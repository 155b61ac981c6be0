//! Shamrock SDK return codes and their translation.

use labscope_core::error::{DriverError, DriverErrorKind};
use thiserror::Error;

pub const SHAMROCK_COMMUNICATION_ERROR: i32 = 20201;
pub const SHAMROCK_SUCCESS: i32 = 20202;
pub const SHAMROCK_P1INVALID: i32 = 20266;
pub const SHAMROCK_P2INVALID: i32 = 20267;
pub const SHAMROCK_P3INVALID: i32 = 20268;
pub const SHAMROCK_P4INVALID: i32 = 20269;
pub const SHAMROCK_P5INVALID: i32 = 20270;
pub const SHAMROCK_NOT_INITIALIZED: i32 = 20275;
pub const SHAMROCK_NOT_AVAILABLE: i32 = 20292;

/// Name of a Shamrock return code, `UNKNOWN` for anything unlisted.
pub fn code_name(code: i32) -> &'static str {
    match code {
        SHAMROCK_COMMUNICATION_ERROR => "SHAMROCK_COMMUNICATION_ERROR",
        SHAMROCK_SUCCESS => "SHAMROCK_SUCCESS",
        SHAMROCK_P1INVALID => "SHAMROCK_P1INVALID",
        SHAMROCK_P2INVALID => "SHAMROCK_P2INVALID",
        SHAMROCK_P3INVALID => "SHAMROCK_P3INVALID",
        SHAMROCK_P4INVALID => "SHAMROCK_P4INVALID",
        SHAMROCK_P5INVALID => "SHAMROCK_P5INVALID",
        SHAMROCK_NOT_INITIALIZED => "SHAMROCK_NOT_INITIALIZED",
        SHAMROCK_NOT_AVAILABLE => "SHAMROCK_NOT_AVAILABLE",
        _ => "UNKNOWN",
    }
}

/// A non-success return code from the Shamrock SDK.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Andor SHAMROCK Failure {code}: {name}")]
pub struct ShamrockError {
    pub code: i32,
    pub name: &'static str,
}

impl ShamrockError {
    pub fn from_code(code: i32) -> Self {
        Self {
            code,
            name: code_name(code),
        }
    }
}

pub type ShamrockResult<T> = std::result::Result<T, ShamrockError>;

/// Turn a raw return code into a result.
pub fn check(code: i32) -> ShamrockResult<()> {
    if code == SHAMROCK_SUCCESS {
        Ok(())
    } else {
        Err(ShamrockError::from_code(code))
    }
}

impl From<ShamrockError> for DriverError {
    fn from(err: ShamrockError) -> Self {
        let kind = match err.code {
            SHAMROCK_COMMUNICATION_ERROR => DriverErrorKind::Communication,
            SHAMROCK_P1INVALID..=SHAMROCK_P5INVALID => DriverErrorKind::InvalidParameter,
            SHAMROCK_NOT_INITIALIZED => DriverErrorKind::Initialization,
            SHAMROCK_NOT_AVAILABLE => DriverErrorKind::NotAvailable,
            _ => DriverErrorKind::Unknown,
        };
        DriverError::new("andor_shamrock", kind, err.to_string()).with_code(err.code as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_ok() {
        assert!(check(SHAMROCK_SUCCESS).is_ok());
    }

    #[test]
    fn failure_message() {
        let err = check(SHAMROCK_P2INVALID).unwrap_err();
        assert_eq!(err.to_string(), "Andor SHAMROCK Failure 20267: SHAMROCK_P2INVALID");
        assert_eq!(
            check(12345).unwrap_err().to_string(),
            "Andor SHAMROCK Failure 12345: UNKNOWN"
        );
    }

    #[test]
    fn driver_error_kind() {
        let driver: DriverError = ShamrockError::from_code(SHAMROCK_NOT_AVAILABLE).into();
        assert_eq!(driver.kind, DriverErrorKind::NotAvailable);
        assert_eq!(driver.code(), Some(20292));
    }
}
