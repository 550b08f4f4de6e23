//! CoAP surface types for LwM2M exchanges
//!
//! These abstractions allow the engine to sit behind any CoAP implementation:
//! the transport decodes its packets into an [`Exchange`] and encodes the
//! returned [`Response`].

use std::fmt;

/// CoAP Content-Format identifiers used by LwM2M
/// See: OMA-TS-LightweightM2M-V1_0, section 6.4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ContentFormat {
    /// text/plain
    Text = 0,
    /// application/link-format
    LinkFormat = 40,
    /// application/octet-stream
    Opaque = 42,
    /// application/vnd.oma.lwm2m+tlv
    Tlv = 11542,
    /// application/vnd.oma.lwm2m+json
    Json = 11543,
}

impl ContentFormat {
    /// Convert from raw content-format ID
    ///
    /// The pre-registration codes 1542/1543 are still sent by older servers.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Text),
            40 => Some(Self::LinkFormat),
            42 => Some(Self::Opaque),
            11542 | 1542 => Some(Self::Tlv),
            11543 | 1543 => Some(Self::Json),
            _ => None,
        }
    }

    /// Get the raw content-format ID
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Request methods handled by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Put => f.write_str("PUT"),
            Method::Post => f.write_str("POST"),
            Method::Delete => f.write_str("DELETE"),
        }
    }
}

/// CoAP response codes produced by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    // Success codes
    /// 2.01 Created
    Created,
    /// 2.02 Deleted
    Deleted,
    /// 2.04 Changed
    Changed,
    /// 2.05 Content
    Content,

    // Client error codes
    /// 4.00 Bad Request
    BadRequest,
    /// 4.01 Unauthorized
    Unauthorized,
    /// 4.04 Not Found
    NotFound,
    /// 4.05 Method Not Allowed
    MethodNotAllowed,

    // Server error codes
    /// 5.00 Internal Server Error
    InternalServerError,
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (class, detail) = self.to_code_pair();
        write!(f, "{}.{:02}", class, detail)
    }
}

impl ResponseCode {
    /// Convert to CoAP response code format (class.detail)
    pub fn to_code_pair(self) -> (u8, u8) {
        match self {
            Self::Created => (2, 1),
            Self::Deleted => (2, 2),
            Self::Changed => (2, 4),
            Self::Content => (2, 5),
            Self::BadRequest => (4, 0),
            Self::Unauthorized => (4, 1),
            Self::NotFound => (4, 4),
            Self::MethodNotAllowed => (4, 5),
            Self::InternalServerError => (5, 0),
        }
    }

    /// Check if this is a success code
    pub fn is_success(self) -> bool {
        matches!(
            self,
            Self::Created | Self::Deleted | Self::Changed | Self::Content
        )
    }
}

/// Observe option values (RFC 7641)
pub mod observe_option {
    /// Register an observation
    pub const REGISTER: u32 = 0;
    /// Deregister an observation
    pub const DEREGISTER: u32 = 1;
}

/// Identity of a remote peer (typically a server address or endpoint name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<std::net::SocketAddr> for PeerId {
    fn from(value: std::net::SocketAddr) -> Self {
        Self(value.to_string())
    }
}

/// A decoded inbound request (transport-agnostic)
#[derive(Debug, Clone)]
pub struct Exchange {
    /// The peer that sent the request
    pub peer: PeerId,
    /// The request method
    pub method: Method,
    /// Uri-Path joined with '/'
    pub path: String,
    /// Observe option value, if present
    pub observe: Option<u32>,
    /// Accept option value, if present
    pub accept: Option<u16>,
    /// Content-Format option value, if present
    pub content_format: Option<u16>,
    /// Uri-Query options, one entry per option
    pub query: Vec<String>,
    /// Raw payload
    pub payload: Vec<u8>,
}

impl Exchange {
    /// Create a new exchange
    pub fn new(peer: impl Into<PeerId>, method: Method, path: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            method,
            path: path.into(),
            observe: None,
            accept: None,
            content_format: None,
            query: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// Set the payload
    pub fn with_payload(mut self, payload: Vec<u8>, format: ContentFormat) -> Self {
        self.payload = payload;
        self.content_format = Some(format.as_u16());
        self
    }

    /// Set the Accept option
    pub fn with_accept(mut self, format: ContentFormat) -> Self {
        self.accept = Some(format.as_u16());
        self
    }

    /// Set the Observe option
    pub fn with_observe(mut self, value: u32) -> Self {
        self.observe = Some(value);
        self
    }

    /// Add a Uri-Query option like `pmin=10`
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query.push(query.into());
        self
    }
}

/// A response to send back (transport-agnostic)
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Response code
    pub code: ResponseCode,
    /// Location-Path for 2.01 Created, e.g. `/3/1`
    pub location: Option<String>,
    /// Encoded payload
    pub payload: Vec<u8>,
    /// Content format of the payload
    pub content_format: Option<ContentFormat>,
}

impl Response {
    /// Create a response with content
    pub fn content(payload: Vec<u8>, format: ContentFormat) -> Self {
        Self {
            code: ResponseCode::Content,
            location: None,
            payload,
            content_format: Some(format),
        }
    }

    /// Create a response without payload
    pub fn empty(code: ResponseCode) -> Self {
        Self {
            code,
            location: None,
            payload: Vec::new(),
            content_format: None,
        }
    }

    /// Create a 2.01 response with a Location-Path
    pub fn created(location: String) -> Self {
        Self {
            location: Some(location),
            ..Self::empty(ResponseCode::Created)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_format_conversion() {
        assert_eq!(ContentFormat::from_u16(11542), Some(ContentFormat::Tlv));
        assert_eq!(ContentFormat::from_u16(1543), Some(ContentFormat::Json));
        assert_eq!(ContentFormat::from_u16(60), None);
        assert_eq!(ContentFormat::LinkFormat.as_u16(), 40);
    }

    #[test]
    fn test_response_code() {
        assert_eq!(ResponseCode::Content.to_code_pair(), (2, 5));
        assert_eq!(ResponseCode::Deleted.to_string(), "2.02");
        assert!(ResponseCode::Changed.is_success());
        assert!(!ResponseCode::NotFound.is_success());
    }

    #[test]
    fn test_exchange_builder() {
        let exchange = Exchange::new("server-1", Method::Put, "/1/0/1")
            .with_query("pmin=10")
            .with_query("pmax=60");
        assert_eq!(exchange.query, vec!["pmin=10", "pmax=60"]);
        assert_eq!(exchange.peer.as_str(), "server-1");
        assert!(exchange.content_format.is_none());
    }
}
