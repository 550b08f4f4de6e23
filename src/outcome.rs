//! Protocol-domain outcomes and their translation to CoAP status codes

use std::fmt;

use crate::coap_types::ResponseCode;
use crate::error::{LwM2mError, Result};
use crate::node::Node;
use crate::path::Path;

/// Result of an LwM2M operation, before transport translation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Created,
    Deleted,
    Changed,
    Content,
    BadRequest,
    Unauthorized,
    NotFound,
    MethodNotAllowed,
    InternalError,
}

impl Outcome {
    pub const ALL: [Self; 9] = [
        Self::Created,
        Self::Deleted,
        Self::Changed,
        Self::Content,
        Self::BadRequest,
        Self::Unauthorized,
        Self::NotFound,
        Self::MethodNotAllowed,
        Self::InternalError,
    ];

    /// Stable numeric code of the outcome in the LwM2M domain
    pub fn code(self) -> u8 {
        match self {
            Self::Created => 1,
            Self::Deleted => 2,
            Self::Changed => 3,
            Self::Content => 4,
            Self::BadRequest => 5,
            Self::Unauthorized => 6,
            Self::NotFound => 7,
            Self::MethodNotAllowed => 8,
            Self::InternalError => 9,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.code() == code)
    }

    pub fn is_success(self) -> bool {
        matches!(
            self,
            Self::Created | Self::Deleted | Self::Changed | Self::Content
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "CREATED",
            Self::Deleted => "DELETED",
            Self::Changed => "CHANGED",
            Self::Content => "CONTENT",
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotFound => "NOT_FOUND",
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            Self::InternalError => "INTERNAL_SERVER_ERROR",
        };
        f.write_str(name)
    }
}

/// Outcome of one operation with its optional content and location
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResponse {
    pub outcome: Outcome,
    pub content: Option<Node>,
    /// Only set for [`Outcome::Created`]
    pub location: Option<Path>,
}

impl OperationResponse {
    pub fn content(node: Node) -> Self {
        Self {
            outcome: Outcome::Content,
            content: Some(node),
            location: None,
        }
    }

    pub fn created(location: Path) -> Self {
        Self {
            outcome: Outcome::Created,
            content: None,
            location: Some(location),
        }
    }

    /// Outcome without content
    pub fn status(outcome: Outcome) -> Self {
        Self {
            outcome,
            content: None,
            location: None,
        }
    }
}

/// Maps LwM2M outcomes onto CoAP response codes
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseCodeTranslator;

impl ResponseCodeTranslator {
    /// Total mapping of the outcome enumeration
    pub fn translate(outcome: Outcome) -> ResponseCode {
        match outcome {
            Outcome::Created => ResponseCode::Created,
            Outcome::Deleted => ResponseCode::Deleted,
            Outcome::Changed => ResponseCode::Changed,
            Outcome::Content => ResponseCode::Content,
            Outcome::BadRequest => ResponseCode::BadRequest,
            Outcome::Unauthorized => ResponseCode::Unauthorized,
            Outcome::NotFound => ResponseCode::NotFound,
            Outcome::MethodNotAllowed => ResponseCode::MethodNotAllowed,
            Outcome::InternalError => ResponseCode::InternalServerError,
        }
    }

    /// Translate a raw outcome code, failing on anything unmapped
    pub fn translate_code(code: u8) -> Result<ResponseCode> {
        Outcome::from_code(code)
            .map(Self::translate)
            .ok_or(LwM2mError::TranslationGap(code))
    }
}
