use std::io;
use thiserror::Error;

use crate::ids::PeerId;

/// Errors that can occur while synchronizing clocks
#[derive(Debug, Error)]
pub enum SyncError {
    // ===== Value Errors =====
    /// A clock was asked to jump to a time that is not a non-negative integer
    #[error("invalid time value: {value} (time must be a non-negative integer)")]
    InvalidTimeValue {
        /// The rejected value
        value: i64,
    },

    /// A message field did not match its numeric or string shape
    #[error("invalid value for field {field}: {value}")]
    InvalidFieldValue {
        /// Name of the offending attribute
        field: &'static str,
        /// The raw value as received
        value: String,
    },

    // ===== Codec Errors =====
    /// A required message attribute was absent or empty
    #[error("message is missing the attribute {attribute}")]
    MissingAttribute {
        /// Name of the missing attribute
        attribute: &'static str,
    },

    /// A payload was not a JSON object
    #[error("message payload must be an object, got {found}")]
    MalformedPayload {
        /// Short description of what was received instead
        found: String,
    },

    /// A wire event name is not part of the protocol
    #[error("unknown event: {event}")]
    UnknownEvent {
        /// The unrecognised event name
        event: String,
    },

    // ===== Registration Errors =====
    /// A peer tried to register twice
    #[error("a peer with id {peer_id} is already registered")]
    DuplicateRegistration {
        /// The duplicated peer id
        peer_id: PeerId,
    },

    /// The authority did not accept a registration request
    #[error("registration of {peer_id} refused: {reason}")]
    RegistrationRefused {
        /// The peer id that asked to register
        peer_id: PeerId,
        /// Acknowledgement text returned by the authority
        reason: String,
    },

    /// The peer is not registered with the authority
    #[error("no registered peer with id {peer_id}")]
    UnknownPeer {
        /// The peer id that could not be found
        peer_id: PeerId,
    },

    // ===== State Errors =====
    /// A setting was changed at a time it must stay fixed
    #[error("configuration misuse: {message}")]
    ConfigurationMisuse {
        /// Description of the misuse
        message: String,
    },

    /// The authority task has shut down
    #[error("sync authority is no longer running")]
    AuthorityStopped,

    // ===== Transport Errors =====
    /// The transport could not deliver a frame
    #[error("transport error: {message}")]
    Transport {
        /// Description of the failure
        message: String,
    },

    /// Network I/O error
    #[error("network error: {0}")]
    Io(#[from] io::Error),

    /// JSON framing error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Check if this error was caused by a malformed value or message
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTimeValue { .. }
                | Self::InvalidFieldValue { .. }
                | Self::MissingAttribute { .. }
                | Self::MalformedPayload { .. }
                | Self::UnknownEvent { .. }
        )
    }

    /// Check if this error comes from misuse of peer registration
    #[must_use]
    pub fn is_registration_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateRegistration { .. }
                | Self::RegistrationRefused { .. }
                | Self::UnknownPeer { .. }
        )
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub(crate) fn misuse(message: impl Into<String>) -> Self {
        Self::ConfigurationMisuse {
            message: message.into(),
        }
    }
}

/// Result type alias for synchronization operations
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::DuplicateRegistration {
            peer_id: PeerId::from("screen-1"),
        };
        assert_eq!(
            err.to_string(),
            "a peer with id screen-1 is already registered"
        );

        let err = SyncError::MissingAttribute {
            attribute: "peerId",
        };
        assert_eq!(err.to_string(), "message is missing the attribute peerId");
    }

    #[test]
    fn test_error_classification() {
        let err = SyncError::InvalidFieldValue {
            field: "drift",
            value: "abc".to_string(),
        };
        assert!(err.is_validation_error());
        assert!(!err.is_registration_error());

        let err = SyncError::UnknownPeer {
            peer_id: PeerId::from("ghost"),
        };
        assert!(err.is_registration_error());
        assert!(!err.is_validation_error());

        let err = SyncError::RegistrationRefused {
            peer_id: PeerId::from("screen-1"),
            reason: "registration failed".to_string(),
        };
        assert!(err.is_registration_error());
        assert_eq!(
            err.to_string(),
            "registration of screen-1 refused: registration failed"
        );

        assert!(!SyncError::AuthorityStopped.is_validation_error());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err: SyncError = io_err.into();

        assert!(matches!(err, SyncError::Io(_)));
    }

    #[test]
    fn test_error_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SyncError>();
    }
}
