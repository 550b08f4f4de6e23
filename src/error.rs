//! Error types for lwm2m-engine

use thiserror::Error;

use crate::outcome::Outcome;

/// Main error type for dispatch and observation
#[derive(Debug, Error)]
pub enum LwM2mError {
    /// Path string is not a well-formed object/instance/resource path
    #[error("Malformed path: {0}")]
    MalformedPath(String),

    /// No enabler registered for the object id (maps to 4.04)
    #[error("Unknown object: {0}")]
    UnknownObject(u16),

    /// Object exists but the instance does not (maps to 4.04)
    #[error("Unknown instance: /{0}/{1}")]
    UnknownInstance(u16, u16),

    /// Resource not defined or not present (maps to 4.04)
    #[error("Unknown resource: /{0}/{1}/{2}")]
    UnknownResource(u16, u16, u16),

    /// Create targeted an instance id that is already in use (maps to 4.00)
    #[error("Instance already exists: /{0}/{1}")]
    InstanceExists(u16, u16),

    /// Decoded value does not match the declared type (maps to 4.00)
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// Operation is invalid for the path level or resource (maps to 4.05)
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// More than one routing rule matched the exchange (maps to 4.00)
    #[error("Ambiguous operation: {0}")]
    AmbiguousOperation(String),

    /// Write-attributes query is invalid (maps to 4.00)
    #[error("Invalid attributes: {0}")]
    InvalidAttributes(String),

    /// Content-format code is unknown or unusable here (maps to 4.00)
    #[error("Unsupported content format: {0}")]
    UnsupportedContentFormat(u16),

    /// Payload could not be decoded (maps to 4.00)
    #[error("Decode error: {0}")]
    Decode(String),

    /// Payload could not be encoded (maps to 5.00)
    #[error("Encode error: {0}")]
    Encode(String),

    /// Access policy refused the peer (maps to 4.01)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Outcome code without a transport mapping; always a defect
    #[error("No transport mapping for outcome code {0}")]
    TranslationGap(u8),

    /// Notification could not be pushed to the peer; subscription is kept
    #[error("Notification to {peer} for {path} failed: {reason}")]
    NotificationDeliveryFailed {
        peer: String,
        path: String,
        reason: String,
    },

    /// Invalid object definition document
    #[error("Invalid object definition: {0}")]
    InvalidDefinition(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing/serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LwM2mError {
    /// Protocol-domain outcome reported to the peer for this error
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::MalformedPath(_)
            | Self::TypeMismatch(_)
            | Self::InstanceExists(..)
            | Self::AmbiguousOperation(_)
            | Self::InvalidAttributes(_)
            | Self::UnsupportedContentFormat(_)
            | Self::Decode(_) => Outcome::BadRequest,
            Self::UnknownObject(_) | Self::UnknownInstance(..) | Self::UnknownResource(..) => {
                Outcome::NotFound
            }
            Self::MethodNotAllowed(_) => Outcome::MethodNotAllowed,
            Self::Unauthorized(_) => Outcome::Unauthorized,
            Self::Encode(_)
            | Self::TranslationGap(_)
            | Self::NotificationDeliveryFailed { .. }
            | Self::InvalidDefinition(_)
            | Self::Io(_)
            | Self::Json(_) => Outcome::InternalError,
        }
    }

    /// Whether the dispatcher may answer this error normally
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::TranslationGap(_))
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, LwM2mError>;
