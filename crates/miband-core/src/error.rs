//! Error types for miband-core.
//!
//! Every session-level failure carries the stage that produced it, so a
//! caller can tell "the band was not around" from "the key index is out of
//! sync" without parsing messages.
//!
//! # Recovery
//!
//! | Error | Meaning | What the caller should do |
//! |-------|---------|---------------------------|
//! | [`Error::InvalidConfig`] | Request built without an address or key | Fix the caller; never retry |
//! | [`Error::NoKeys`] | Key folder held no usable record | Tell the user no key was found |
//! | [`Error::DeviceNotFound`] | No band answered within the scan window | Report "device unavailable"; retry later if desired |
//! | [`Error::PermissionDenied`] | Radio off, no adapter or scan refused | Show an actionable message; do not retry |
//! | [`Error::MissingKey`] | A band matched the filters but has no key | Rebuild the key index; this is a data bug |
//! | [`Error::ConnectionFailed`] / [`Error::AuthenticationFailed`] | Band refused the link or the key | Check the key; retry the whole request |
//! | [`Error::LinkFailure`] | Link dropped mid-stream | Samples already persisted are safe; start a new request |
//! | [`Error::Persistence`] | The sink rejected a sample | Session stopped to avoid silent loss |
//! | [`Error::SessionBusy`] | A request is already active | Wait for it or cancel it |
//!
//! No stage retries internally. Retrying is a decision for the caller.

use std::time::Duration;

use thiserror::Error;

use miband_types::MacAddress;

/// Errors that can occur while binding to and streaming from a band.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// A monitoring request was built with missing or malformed parameters.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The key source produced an empty index.
    #[error("No key found")]
    NoKeys,

    /// No band answered the scan.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// The radio or scan capability is unavailable.
    #[error("Permission denied: {0}")]
    PermissionDenied(PermissionDeniedReason),

    /// A band was resolved but the key index has no entry for it.
    #[error("Missing key for resolved device {address}")]
    MissingKey {
        /// Address of the resolved band.
        address: MacAddress,
    },

    /// Connection failed with specific reason.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// The device that failed to connect.
        device_id: Option<String>,
        /// The structured reason for the failure.
        reason: ConnectionFailureReason,
    },

    /// The band rejected the authentication exchange.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The authenticated link dropped while streaming.
    #[error("Link to device lost after {samples_persisted} sample(s): {reason}")]
    LinkFailure {
        /// Samples persisted before the drop.
        samples_persisted: u64,
        /// What the producer observed.
        reason: String,
    },

    /// The persistence sink failed to store a sample.
    #[error("Failed to persist sample: {0}")]
    Persistence(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A monitoring request is already active.
    #[error("A monitoring session is already active")]
    SessionBusy,

    /// Operation attempted while not connected to device.
    #[error("Not connected to device")]
    NotConnected,

    /// Required BLE characteristic not found on device.
    #[error("Characteristic not found: {uuid} (searched in {service_count} services)")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// Number of services that were searched.
        service_count: usize,
    },

    /// Failed to parse data received from device.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Structured reasons for connection failures.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionFailureReason {
    /// The band is no longer known to the adapter.
    UnknownDevice,
    /// Connection attempt timed out.
    Timeout,
    /// Generic BLE error.
    BleError(String),
    /// Other/unknown error.
    Other(String),
}

impl std::fmt::Display for ConnectionFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownDevice => write!(f, "device unknown to the adapter"),
            Self::Timeout => write!(f, "connection timed out"),
            Self::BleError(msg) => write!(f, "BLE error: {}", msg),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// Reason why a device was not found.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// The candidate set was empty, so there was nothing to look for.
    NoCandidates,
    /// Scan window elapsed without a match.
    ScanTimeout { duration: Duration },
    /// The scan ended before any candidate answered.
    ScanEnded,
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoCandidates => write!(f, "no candidate addresses"),
            Self::ScanTimeout { duration } => write!(f, "scan timed out after {:?}", duration),
            Self::ScanEnded => write!(f, "scan ended without a match"),
        }
    }
}

/// Reason why the radio could not be used.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum PermissionDeniedReason {
    /// No Bluetooth adapter is available.
    NoAdapter,
    /// The adapter refused to start scanning (powered off or not permitted).
    ScanRefused(String),
}

impl std::fmt::Display for PermissionDeniedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
            Self::ScanRefused(msg) => write!(f, "scan refused: {}", msg),
        }
    }
}

impl Error {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>, service_count: usize) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.into(),
            service_count,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a connection failure with structured reason.
    pub fn connection_failed(device_id: Option<String>, reason: ConnectionFailureReason) -> Self {
        Self::ConnectionFailed { device_id, reason }
    }

    /// Wrap a sink error.
    pub fn persistence(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Persistence(err.into())
    }

    /// True for the "device unavailable" family of outcomes.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::DeviceNotFound(_))
    }
}

impl From<miband_types::ParseError> for Error {
    fn from(err: miband_types::ParseError) -> Self {
        Error::InvalidData(err.to_string())
    }
}

/// Result type alias using miband-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotConnected;
        assert_eq!(err.to_string(), "Not connected to device");

        let err = Error::characteristic_not_found("00002a37", 4);
        assert!(err.to_string().contains("00002a37"));
        assert!(err.to_string().contains("4 services"));

        let err = Error::timeout("connect", Duration::from_secs(15));
        assert!(err.to_string().contains("connect"));
        assert!(err.to_string().contains("15s"));

        assert_eq!(Error::NoKeys.to_string(), "No key found");
    }

    #[test]
    fn test_missing_key_is_distinct_from_not_found() {
        let missing = Error::MissingKey {
            address: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
        };
        let not_found = Error::DeviceNotFound(DeviceNotFoundReason::ScanTimeout {
            duration: Duration::from_secs(10),
        });
        assert!(missing.to_string().contains("AA:BB:CC:DD:EE:FF"));
        assert!(!missing.is_not_found());
        assert!(not_found.is_not_found());
        assert!(not_found.to_string().contains("10s"));
    }

    #[test]
    fn test_permission_denied_reasons() {
        let err = Error::PermissionDenied(PermissionDeniedReason::NoAdapter);
        assert!(err.to_string().contains("no Bluetooth adapter"));

        let err = Error::PermissionDenied(PermissionDeniedReason::ScanRefused("off".into()));
        assert!(err.to_string().contains("scan refused: off"));
    }

    #[test]
    fn test_link_failure_reports_progress() {
        let err = Error::LinkFailure {
            samples_persisted: 3,
            reason: "notification stream ended".into(),
        };
        assert!(err.to_string().contains("3 sample(s)"));
    }

    #[test]
    fn test_persistence_keeps_source() {
        use std::error::Error as _;
        let io = std::io::Error::other("disk full");
        let err = Error::persistence(io);
        assert!(err.source().is_some());
        assert!(err.to_string().contains("persist"));
    }

    #[test]
    fn test_parse_error_conversion() {
        let err: Error = miband_types::ParseError::InvalidValue("x".into()).into();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[test]
    fn test_btleplug_error_conversion() {
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<Error>();
    }
}
