//! LwM2M request dispatch
//!
//! Transport-agnostic: decode a CoAP message into an [`Exchange`], pass it to
//! [`RequestHandler::handle`] and send back the returned [`Response`].

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::attributes::AttributeUpdate;
use crate::coap_types::{
    ContentFormat, Exchange, Method, PeerId, Response, ResponseCode, observe_option,
};
use crate::codec::{DefaultCodec, NodeCodec};
use crate::encoding::{EncodingSelector, Format};
use crate::error::{LwM2mError, Result};
use crate::node::Node;
use crate::observe::ObservationRegistry;
use crate::outcome::{OperationResponse, Outcome, ResponseCodeTranslator};
use crate::path::Path;
use crate::tree::ResourceTree;

/// The operation an exchange asks for
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Intent {
    Read,
    Discover,
    Observe,
    /// Observe option 1: drop the observation, then read
    CancelObserve,
    Write { replace: bool },
    WriteAttributes(AttributeUpdate),
    Execute,
    Create,
    Delete,
}

impl Intent {
    /// Classify an exchange in one decision over method, options and path level
    pub fn classify(exchange: &Exchange, path: &Path) -> Result<Self> {
        match exchange.method {
            Method::Get => {
                let discover = exchange.accept == Some(ContentFormat::LinkFormat.as_u16());
                // link-format accept wins over any observe option
                match (discover, exchange.observe) {
                    (true, _) => Ok(Self::Discover),
                    (false, Some(observe_option::REGISTER)) => Ok(Self::Observe),
                    (false, Some(observe_option::DEREGISTER)) => Ok(Self::CancelObserve),
                    (false, Some(other)) => Err(LwM2mError::Decode(format!(
                        "invalid observe option value {other}"
                    ))),
                    (false, None) => Ok(Self::Read),
                }
            }
            Method::Put => Ok(match AttributeUpdate::parse(&exchange.query)? {
                Some(update) => Self::WriteAttributes(update),
                None => Self::Write { replace: true },
            }),
            Method::Post if path.is_resource() => Ok(Self::Execute),
            Method::Post => Ok(Self::Create),
            Method::Delete => Ok(Self::Delete),
        }
    }
}

/// Decides whether a peer may perform an operation
pub trait AccessPolicy: Send + Sync {
    fn authorize(&self, peer: &PeerId, intent: &Intent, path: &Path) -> Result<()>;
}

/// Grants everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn authorize(&self, _peer: &PeerId, _intent: &Intent, _path: &Path) -> Result<()> {
        Ok(())
    }
}

/// Main LwM2M request handler
///
/// `handle` takes `&self`; exchanges from independent peers can be
/// dispatched concurrently from several threads.
///
/// # Example
/// ```ignore
/// let handler = RequestHandler::new(tree, registry);
/// let response = handler.handle(&exchange);
/// // Send response via your CoAP transport
/// ```
pub struct RequestHandler {
    tree: Arc<ResourceTree>,
    registry: Arc<ObservationRegistry>,
    codec: Arc<dyn NodeCodec>,
    policy: Arc<dyn AccessPolicy>,
}

impl std::fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandler")
            .field("tree", &self.tree)
            .field("observations", &self.registry.len())
            .finish()
    }
}

impl RequestHandler {
    /// Create a handler over a tree and an observation registry
    pub fn new(tree: Arc<ResourceTree>, registry: Arc<ObservationRegistry>) -> Self {
        Self {
            tree,
            registry,
            codec: Arc::new(DefaultCodec),
            policy: Arc::new(AllowAll),
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn NodeCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_access_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn tree(&self) -> &ResourceTree {
        &self.tree
    }

    pub fn registry(&self) -> &ObservationRegistry {
        &self.registry
    }

    /// Handle an incoming exchange
    ///
    /// Always returns a well-formed response; errors become status codes.
    pub fn handle(&self, exchange: &Exchange) -> Response {
        match self.dispatch(exchange) {
            Ok(response) => response,
            Err(e) if !e.is_recoverable() => {
                error!(peer = %exchange.peer, path = %exchange.path, error = %e, "Response aborted");
                Response::empty(ResponseCode::InternalServerError)
            }
            Err(e) => {
                debug!(peer = %exchange.peer, method = %exchange.method, path = %exchange.path, error = %e, "Request failed");
                Response::empty(translate(e.outcome()))
            }
        }
    }

    /// Peer went away: drop all of its observations
    pub fn disconnect(&self, peer: &PeerId) -> usize {
        self.registry.cancel_all(peer)
    }

    fn dispatch(&self, exchange: &Exchange) -> Result<Response> {
        let path = Path::parse(&exchange.path)?;
        let intent = Intent::classify(exchange, &path)?;
        debug!(peer = %exchange.peer, method = %exchange.method, path = %path, ?intent, "Dispatching");
        self.policy.authorize(&exchange.peer, &intent, &path)?;

        let peer = &exchange.peer;
        let result = match intent {
            Intent::Read => {
                if self.registry.cancel(peer, &path) {
                    info!(peer = %peer, path = %path, "Plain read ends observation");
                }
                OperationResponse::content(self.tree.read(&path)?)
            }
            Intent::CancelObserve => {
                self.registry.cancel(peer, &path);
                OperationResponse::content(self.tree.read(&path)?)
            }
            Intent::Observe => {
                // registered before the read so no change can fall between the two
                let replaced = self.registry.is_observing(peer, &path);
                self.registry.register(peer, path, requested_format(exchange));
                match self.tree.read(&path) {
                    Ok(node) => OperationResponse::content(node),
                    Err(e) => {
                        if !replaced {
                            self.registry.cancel(peer, &path);
                        }
                        return Err(e);
                    }
                }
            }
            Intent::Discover => {
                let links = self.tree.discover(&path)?;
                let payload = self.codec.encode_links(&links);
                return Ok(Response::content(payload, ContentFormat::LinkFormat));
            }
            Intent::Write { replace } => {
                if path.is_object() {
                    return Err(LwM2mError::MethodNotAllowed(format!(
                        "write on object path {path}"
                    )));
                }
                let node = self.decode(exchange, &path)?;
                self.tree.write(&path, node, replace)?;
                OperationResponse::status(Outcome::Changed)
            }
            Intent::WriteAttributes(update) => {
                self.tree.write_attributes(&path, update)?;
                OperationResponse::status(Outcome::Changed)
            }
            Intent::Execute => {
                self.tree.execute(&path, &exchange.payload)?;
                OperationResponse::status(Outcome::Changed)
            }
            Intent::Create => {
                let target = Path::instance(path.object_id(), path.instance_id().unwrap_or(0));
                let instance = self
                    .decode(exchange, &target)?
                    .into_instance()
                    .ok_or_else(|| LwM2mError::Decode("payload is not an instance".into()))?;
                OperationResponse::created(self.tree.create(&path, instance)?)
            }
            Intent::Delete => {
                self.tree.delete(&path)?;
                self.registry.cancel_within(&path);
                OperationResponse::status(Outcome::Deleted)
            }
        };

        Ok(self.respond(result, &path, requested_format(exchange)))
    }

    fn decode(&self, exchange: &Exchange, path: &Path) -> Result<Node> {
        let spec = self.tree.enabler(path.object_id())?.spec();
        let format = EncodingSelector::decode_format(
            path,
            exchange.content_format,
            self.tree.resource_spec(path),
        )?;
        self.codec.decode(&exchange.payload, format, path, spec)
    }

    /// Turn an operation result into a transport response
    fn respond(&self, result: OperationResponse, path: &Path, requested: Option<Format>) -> Response {
        let code = translate(result.outcome);

        match (result.content, result.location) {
            (Some(node), _) => {
                let schema = self.tree.resource_spec(path);
                let format = EncodingSelector::select(path, &node, requested, schema);
                match self.codec.encode(&node, format, path) {
                    Ok(payload) => Response {
                        code,
                        location: None,
                        payload,
                        content_format: Some(format.content_format()),
                    },
                    Err(e) => {
                        error!(path = %path, ?format, error = %e, "Encoding failed");
                        Response::empty(translate(e.outcome()))
                    }
                }
            }
            (None, Some(location)) => Response {
                code,
                ..Response::created(location.to_string())
            },
            (None, None) => Response::empty(code),
        }
    }
}

/// Map an outcome to its CoAP code; a gap aborts with 5.00 instead of guessing
fn translate(outcome: Outcome) -> ResponseCode {
    match ResponseCodeTranslator::translate_code(outcome.code()) {
        Ok(code) => code,
        Err(e) => {
            error!(outcome = %outcome, error = %e, "Response aborted");
            ResponseCode::InternalServerError
        }
    }
}

/// Accept option as a value format; unusable codes are ignored for responses
fn requested_format(exchange: &Exchange) -> Option<Format> {
    exchange.accept.and_then(|code| Format::from_code(code).ok())
}
