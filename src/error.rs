//! Error taxonomy for the invalidation subsystem.
//!
//! Startup faults (`DriverError`) are surfaced once and degrade the subsystem
//! to the no-op driver; purge-path faults (`PurgeCallError`) are recorded per
//! tag or URL and never abort a batch.

use thiserror::Error;

/// Local tag construction failure. Never propagates past the mapper.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagError {
    #[error("tag value must not be empty")]
    EmptyValue,
}

/// Startup-time driver configuration fault.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("unknown purge driver `{name}`")]
    UnknownDriver { name: String },
    #[error("invalid configuration for purge driver `{driver}`: missing `{field}`")]
    MissingField {
        driver: String,
        field: &'static str,
    },
    #[error("invalid configuration for purge driver `{driver}`: {reason}")]
    InvalidConfig { driver: String, reason: String },
}

impl DriverError {
    pub fn unknown(name: impl Into<String>) -> Self {
        Self::UnknownDriver { name: name.into() }
    }

    pub fn missing_field(driver: impl Into<String>, field: &'static str) -> Self {
        Self::MissingField {
            driver: driver.into(),
            field,
        }
    }

    pub fn invalid(driver: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            driver: driver.into(),
            reason: reason.into(),
        }
    }
}

/// Per-tag / per-URL transient fault on the purge path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PurgeCallError {
    #[error("purge endpoint returned status {status}")]
    BadStatus { status: u16 },
    #[error("purge call failed: {message}")]
    Transport { message: String },
    #[error("purge call exceeded {timeout_ms}ms deadline")]
    DeadlineExceeded { timeout_ms: u64 },
    #[error("driver cannot purge by tag")]
    TagPurgeUnsupported,
    #[error("tag index unavailable: {message}")]
    Index { message: String },
}

impl PurgeCallError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

/// Persistence fault in the local tag index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("tag index storage failed during `{op}`: {message}")]
    Storage { op: &'static str, message: String },
}

impl IndexError {
    pub fn storage(op: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            op,
            message: message.into(),
        }
    }
}

impl From<&IndexError> for PurgeCallError {
    fn from(err: &IndexError) -> Self {
        Self::Index {
            message: err.to_string(),
        }
    }
}
