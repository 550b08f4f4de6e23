//! lwm2m-engine - request dispatch and observation core for LwM2M clients
//!
//! This library routes decoded CoAP exchanges onto a device's object tree
//! (Read, Discover, Observe, Write, Write-Attributes, Execute, Create, Delete),
//! picks the content format of every reply, translates outcomes to CoAP codes
//! and pushes notifications to observers when values change.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lwm2m_engine::{ObjectModel, ObservationRegistry, RequestHandler, ResourceTree};
//! use lwm2m_engine::coap_types::{Exchange, Method};
//!
//! // Load object definitions and initial instances
//! let model = ObjectModel::from_file("objects.json").unwrap();
//! let tree = ResourceTree::from_json(&model, r#"{"3": {"0": {"0": "ACME"}}}"#).unwrap();
//!
//! // Create request handler
//! let handler = RequestHandler::new(Arc::new(tree), Arc::new(ObservationRegistry::new()));
//!
//! // Handle incoming requests
//! let exchange = Exchange::new("server-1", Method::Get, "/3/0/0");
//! let response = handler.handle(&exchange);
//! ```

pub mod attributes;
pub mod bootstrap;
pub mod coap_types;
pub mod codec;
pub mod config;
pub mod encoding;
mod error;
pub mod handler;
mod model;
pub mod node;
pub mod observe;
pub mod outcome;
mod path;
pub mod tree;

pub use attributes::{AttributeUpdate, Attributes};
pub use bootstrap::{BootstrapRequest, PendingResponses};
pub use codec::{DefaultCodec, NodeCodec};
pub use config::ClientConfig;
pub use encoding::{EncodingSelector, Format};
pub use error::{LwM2mError, Result};
pub use handler::{AccessPolicy, Intent, RequestHandler};
pub use model::{ObjectModel, ObjectSpec, Operations, ResourceSpec, ResourceType};
pub use node::{Instance, Node, Object, Resource, ResourceValue, Value};
pub use observe::{NotificationDispatcher, NotificationSink, ObservationRegistry};
pub use outcome::{Outcome, ResponseCodeTranslator};
pub use path::{Path, PathLevel};
pub use tree::{ChangeListener, ExecuteHandler, ResourceTree, ValueChanged};
