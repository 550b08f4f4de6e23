//! Object definitions (schema) for the device data model
//!
//! Definitions are loaded from a JSON document listing objects and their
//! resources, in the shape of the OMA object registry exports:
//!
//! ```json
//! [{"id": 3, "name": "Device", "instances": "single", "mandatory": true,
//!   "resources": [{"id": 0, "name": "Manufacturer", "operations": "R",
//!                  "instances": "single", "mandatory": false, "type": "string"}]}]
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path as FsPath;

use serde::Deserialize;

use crate::error::{LwM2mError, Result};

/// Declared resource data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    String,
    Integer,
    Float,
    Boolean,
    Opaque,
    Time,
    /// Executable resources carry no value
    #[serde(alias = "")]
    None,
}

impl ResourceType {
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float | Self::Time)
    }
}

/// Operations a peer may perform on a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Operations {
    #[default]
    #[serde(rename = "NONE", alias = "")]
    None,
    #[serde(rename = "R")]
    Read,
    #[serde(rename = "W")]
    Write,
    #[serde(rename = "RW")]
    ReadWrite,
    #[serde(rename = "E")]
    Execute,
}

impl Operations {
    pub fn is_readable(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }

    pub fn is_executable(self) -> bool {
        self == Self::Execute
    }
}

/// Single or multiple instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Multiplicity {
    Single,
    Multiple,
}

/// Definition of one resource inside an object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    pub id: u16,
    pub name: String,
    pub operations: Operations,
    pub multiple: bool,
    pub mandatory: bool,
    pub kind: ResourceType,
}

/// Definition of one object type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSpec {
    pub id: u16,
    pub name: String,
    pub multiple: bool,
    pub mandatory: bool,
    pub resources: BTreeMap<u16, ResourceSpec>,
}

impl ObjectSpec {
    /// Get a resource definition by id
    pub fn resource(&self, id: u16) -> Option<&ResourceSpec> {
        self.resources.get(&id)
    }
}

/// Raw definition structures for deserialization
#[derive(Debug, Deserialize)]
struct RawObjectSpec {
    id: u16,
    name: String,
    instances: Multiplicity,
    #[serde(default)]
    mandatory: bool,
    #[serde(default)]
    resources: Vec<RawResourceSpec>,
    #[allow(dead_code)]
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawResourceSpec {
    id: u16,
    name: String,
    #[serde(default)]
    operations: Operations,
    instances: Multiplicity,
    #[serde(default)]
    mandatory: bool,
    #[serde(rename = "type", default = "default_type")]
    kind: ResourceType,
    #[allow(dead_code)]
    #[serde(default)]
    description: Option<String>,
}

fn default_type() -> ResourceType {
    ResourceType::None
}

/// The set of object definitions known to the client
#[derive(Debug, Clone, Default)]
pub struct ObjectModel {
    objects: BTreeMap<u16, ObjectSpec>,
}

impl ObjectModel {
    /// Parse object definitions from the given file
    pub fn from_file(path: impl AsRef<FsPath>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Parse object definitions from a JSON string
    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: Vec<RawObjectSpec> = serde_json::from_str(content)?;
        let mut model = Self::default();
        for object in raw {
            model.add(object.into_spec()?)?;
        }
        Ok(model)
    }

    /// Add one definition; object ids must be unique
    pub fn add(&mut self, spec: ObjectSpec) -> Result<()> {
        if self.objects.contains_key(&spec.id) {
            return Err(LwM2mError::InvalidDefinition(format!(
                "duplicate object id {}",
                spec.id
            )));
        }
        self.objects.insert(spec.id, spec);
        Ok(())
    }

    /// Get an object definition by id
    pub fn object(&self, id: u16) -> Option<&ObjectSpec> {
        self.objects.get(&id)
    }

    /// Get a resource definition by object and resource id
    pub fn resource(&self, object_id: u16, resource_id: u16) -> Option<&ResourceSpec> {
        self.object(object_id)?.resource(resource_id)
    }

    pub fn objects(&self) -> impl Iterator<Item = &ObjectSpec> {
        self.objects.values()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl RawObjectSpec {
    fn into_spec(self) -> Result<ObjectSpec> {
        let mut resources = BTreeMap::new();
        for res in self.resources {
            if res.operations.is_executable() != (res.kind == ResourceType::None) {
                return Err(LwM2mError::InvalidDefinition(format!(
                    "/{}/{}: executable resources and only those have no type",
                    self.id, res.id
                )));
            }
            let spec = ResourceSpec {
                id: res.id,
                name: res.name,
                operations: res.operations,
                multiple: res.instances == Multiplicity::Multiple,
                mandatory: res.mandatory,
                kind: res.kind,
            };
            if resources.insert(spec.id, spec).is_some() {
                return Err(LwM2mError::InvalidDefinition(format!(
                    "/{}: duplicate resource id {}",
                    self.id, res.id
                )));
            }
        }
        Ok(ObjectSpec {
            id: self.id,
            name: self.name,
            multiple: self.instances == Multiplicity::Multiple,
            mandatory: self.mandatory,
            resources,
        })
    }
}

impl std::str::FromStr for ObjectModel {
    type Err = LwM2mError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_json_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE_OBJECTS: &str = r#"[
        {"id": 3, "name": "Device", "instances": "single", "mandatory": true, "resources": [
            {"id": 0, "name": "Manufacturer", "operations": "R", "instances": "single", "type": "string"},
            {"id": 4, "name": "Reboot", "operations": "E", "instances": "single", "mandatory": true},
            {"id": 6, "name": "Available Power Sources", "operations": "R", "instances": "multiple", "type": "integer"}
        ]}
    ]"#;

    #[test]
    fn test_parse_objects() {
        let model: ObjectModel = SAMPLE_OBJECTS.parse().unwrap();

        assert_eq!(model.len(), 1);
        let device = model.object(3).unwrap();
        assert_eq!(device.name, "Device");
        assert!(!device.multiple);
        assert!(device.mandatory);
    }

    #[test]
    fn test_resource_lookup() {
        let model: ObjectModel = SAMPLE_OBJECTS.parse().unwrap();

        let reboot = model.resource(3, 4).unwrap();
        assert!(reboot.operations.is_executable());
        assert_eq!(reboot.kind, ResourceType::None);

        let sources = model.resource(3, 6).unwrap();
        assert!(sources.multiple);
        assert!(sources.operations.is_readable());
        assert!(!sources.operations.is_writable());
        assert!(model.resource(3, 99).is_none());
    }

    #[test]
    fn test_reject_duplicate_object() {
        let doubled = r#"[
            {"id": 1, "name": "A", "instances": "single"},
            {"id": 1, "name": "B", "instances": "multiple"}
        ]"#;
        assert!(matches!(
            ObjectModel::from_json_str(doubled),
            Err(LwM2mError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn test_reject_typed_executable() {
        let bad = r#"[{"id": 1, "name": "A", "instances": "single", "resources": [
            {"id": 8, "name": "Trigger", "operations": "E", "instances": "single", "type": "integer"}
        ]}]"#;
        assert!(ObjectModel::from_json_str(bad).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_OBJECTS.as_bytes()).unwrap();

        let model = ObjectModel::from_file(file.path()).unwrap();
        assert!(model.object(3).is_some());
    }
}
