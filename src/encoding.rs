//! Content-format negotiation
//!
//! Picks the wire encoding for a node from the path level and the resource
//! definition, falling back to the node's own runtime shape when no
//! definition is available. Both branches classify a node into the same
//! [`Shape`], so they agree for a given value shape.

use crate::coap_types::ContentFormat;
use crate::error::{LwM2mError, Result};
use crate::model::{ResourceSpec, ResourceType};
use crate::node::Node;
use crate::path::Path;

/// Wire encodings a node can be carried in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Plain text scalar
    Text,
    /// Raw bytes
    Opaque,
    /// Structured multi-value encoding (TLV)
    StructuredMulti,
    /// Structured application encoding (JSON)
    ApplicationStructured,
}

impl Format {
    pub fn content_format(self) -> ContentFormat {
        match self {
            Self::Text => ContentFormat::Text,
            Self::Opaque => ContentFormat::Opaque,
            Self::StructuredMulti => ContentFormat::Tlv,
            Self::ApplicationStructured => ContentFormat::Json,
        }
    }

    /// Value formats only; link-format is not a node encoding
    pub fn from_content_format(format: ContentFormat) -> Option<Self> {
        match format {
            ContentFormat::Text => Some(Self::Text),
            ContentFormat::Opaque => Some(Self::Opaque),
            ContentFormat::Tlv => Some(Self::StructuredMulti),
            ContentFormat::Json => Some(Self::ApplicationStructured),
            ContentFormat::LinkFormat => None,
        }
    }

    /// Resolve a raw content-format code
    pub fn from_code(code: u16) -> Result<Self> {
        ContentFormat::from_u16(code)
            .and_then(Self::from_content_format)
            .ok_or(LwM2mError::UnsupportedContentFormat(code))
    }

    /// Whether this format can carry a node of the given shape
    pub fn supports(self, shape: Shape) -> bool {
        match self {
            Self::Text => shape == Shape::Scalar,
            Self::Opaque => shape == Shape::Bytes,
            Self::StructuredMulti | Self::ApplicationStructured => true,
        }
    }
}

/// Encoding-relevant shape of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Single-instance resource with a non-opaque value
    Scalar,
    /// Single-instance opaque resource
    Bytes,
    /// Multi-instance resource
    MultiResource,
    /// Instance or object
    Composite,
}

/// Chooses content formats for responses, notifications and payload decoding
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodingSelector;

impl EncodingSelector {
    /// Pick the format for an outgoing node
    ///
    /// An explicit format wins when it can carry the node; otherwise the
    /// default for the node's shape is used.
    pub fn select(
        path: &Path,
        node: &Node,
        explicit: Option<Format>,
        schema: Option<&ResourceSpec>,
    ) -> Format {
        let shape = Self::shape(path, node, schema);
        match explicit {
            Some(format) if format.supports(shape) => format,
            _ => Self::default_for(shape),
        }
    }

    /// Pick the format to decode an inbound payload with
    ///
    /// Unlike [`select`](Self::select), an explicit format that is unknown or
    /// cannot carry the addressed node is an error.
    pub fn decode_format(
        path: &Path,
        explicit: Option<u16>,
        schema: Option<&ResourceSpec>,
    ) -> Result<Format> {
        let shape = Self::declared_shape(path, schema);
        match explicit {
            Some(code) => {
                let format = Format::from_code(code)?;
                match shape {
                    Some(shape) if !format.supports(shape) => {
                        Err(LwM2mError::UnsupportedContentFormat(code))
                    }
                    _ => Ok(format),
                }
            }
            None => Ok(shape.map_or(Format::StructuredMulti, Self::default_for)),
        }
    }

    /// Default format for a shape
    pub fn default_for(shape: Shape) -> Format {
        match shape {
            Shape::Scalar => Format::Text,
            Shape::Bytes => Format::Opaque,
            Shape::MultiResource | Shape::Composite => Format::StructuredMulti,
        }
    }

    /// Classify a node, from its definition if known, else from its value
    pub fn shape(path: &Path, node: &Node, schema: Option<&ResourceSpec>) -> Shape {
        if let Some(shape) = Self::declared_shape(path, schema) {
            return shape;
        }
        match node.as_resource() {
            Some(resource) if resource.is_multiple() => Shape::MultiResource,
            Some(resource) if resource.kind() == Some(ResourceType::Opaque) => Shape::Bytes,
            Some(_) => Shape::Scalar,
            None => Shape::Composite,
        }
    }

    fn declared_shape(path: &Path, schema: Option<&ResourceSpec>) -> Option<Shape> {
        if !path.is_resource() {
            return Some(Shape::Composite);
        }
        let spec = schema?;
        Some(if spec.multiple {
            Shape::MultiResource
        } else if spec.kind == ResourceType::Opaque {
            Shape::Bytes
        } else {
            Shape::Scalar
        })
    }
}
