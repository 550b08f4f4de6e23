//! Client configuration
//!
//! ```json
//! {
//!   "endpoint": "urn:dev:demo-1",
//!   "objects": "objects.json",
//!   "data": "instances.json",
//!   "notification_format": 11543
//! }
//! ```
//!
//! Relative file paths are resolved against the configuration file's
//! directory when loaded with [`ClientConfig::from_file`].

use std::fs;
use std::path::{Path as FsPath, PathBuf};

use serde::Deserialize;

use crate::bootstrap::BootstrapRequest;
use crate::encoding::Format;
use crate::error::Result;
use crate::model::ObjectModel;
use crate::tree::ResourceTree;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Client endpoint identifier
    pub endpoint: String,
    /// Object definition document
    pub objects: PathBuf,
    /// Initial instance data
    #[serde(default)]
    pub data: Option<PathBuf>,
    /// Content-format code for observers that do not request one
    #[serde(default)]
    pub notification_format: Option<u16>,
}

impl ClientConfig {
    pub fn from_file(path: impl AsRef<FsPath>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::from_json_str(&fs::read_to_string(path)?)?;
        if let Some(dir) = path.parent() {
            config.objects = dir.join(&config.objects);
            config.data = config.data.map(|d| dir.join(d));
        }
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn load_model(&self) -> Result<ObjectModel> {
        ObjectModel::from_file(&self.objects)
    }

    /// Build the tree, populated from `data` when configured
    pub fn load_tree(&self, model: &ObjectModel) -> Result<ResourceTree> {
        match &self.data {
            Some(data) => ResourceTree::from_json(model, &fs::read_to_string(data)?),
            None => Ok(ResourceTree::new(model)),
        }
    }

    pub fn notification_format(&self) -> Result<Option<Format>> {
        self.notification_format.map(Format::from_code).transpose()
    }

    pub fn bootstrap_request(&self) -> Result<BootstrapRequest> {
        BootstrapRequest::new(self.endpoint.clone())
    }
}
