//! Error types for the bridge.
//!
//! All errors are strongly typed using thiserror. The four families map
//! onto the session policy: only [`ApplyError`] is recovered locally (it is
//! reported back to the controller as a failed response); every other kind
//! ends the bridge session.

use std::path::PathBuf;

use thiserror::Error;

/// Errors in how the bridge was configured or registered with the host.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Required option '{option}' was not supplied (use -{option} <value> or +{option}+<value>)")]
    MissingOption {
        option: String,
    },

    #[error("Option '{option}' has invalid value '{value}': {reason}")]
    InvalidOption {
        option: String,
        value: String,
        reason: String,
    },

    #[error("Simulator rejected callback registration for {trigger}")]
    RegistrationRejected {
        trigger: String,
    },
}

/// Errors on the channel to the controller process.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("No controller listening at {}: {message}", path.display())]
    NoListener {
        path: PathBuf,
        message: String,
    },

    #[error("Permission denied connecting to {}", path.display())]
    PermissionDenied {
        path: PathBuf,
    },

    #[error("Connection failed: {message}")]
    ConnectFailed {
        message: String,
    },

    #[error("Read from controller failed: {message}")]
    ReadFailed {
        message: String,
    },

    #[error("Write to controller failed: {message}")]
    WriteFailed {
        message: String,
    },

    #[error("Connection is closed")]
    Closed,
}

/// Errors in the framing or content of a message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unsupported frame version: {found} (expected {expected})")]
    UnsupportedVersion {
        found: u8,
        expected: u8,
    },

    #[error("Frame size {len} exceeds maximum {max}")]
    FrameTooLarge {
        len: usize,
        max: usize,
    },

    #[error("Truncated frame: connection ended inside the {section}")]
    Truncated {
        section: &'static str,
    },

    #[error("CRC mismatch: stored={stored:08x}, computed={computed:08x}")]
    ChecksumMismatch {
        stored: u32,
        computed: u32,
    },

    #[error("Malformed command: {message}")]
    Malformed {
        message: String,
    },

    #[error("Failed to serialize response: {message}")]
    SerializationFailed {
        message: String,
    },
}

/// Errors raised while applying a command to the simulation.
///
/// These are reported back to the controller; the session stays open.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("Object not found: {path}")]
    UnknownObject {
        path: String,
    },

    #[error("Invalid value for {path}: {reason}")]
    InvalidValue {
        path: String,
        reason: String,
    },

    #[error("Simulator rejected {operation} on {path}: {reason}")]
    Rejected {
        operation: &'static str,
        path: String,
        reason: String,
    },
}

impl ApplyError {
    /// Short machine-readable label carried in error responses.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownObject { .. } => "unknown_object",
            Self::InvalidValue { .. } => "invalid_value",
            Self::Rejected { .. } => "rejected",
        }
    }
}

/// Top-level error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),
}

impl BridgeError {
    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns true if this is a connection error.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Returns true if this is a protocol error.
    #[must_use]
    pub const fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// Returns true if the session can continue after this error.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Apply(_))
    }

    /// Returns true if this error ends the bridge session.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }
}

/// Result type alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
