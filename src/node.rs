//! Resource values and data-model nodes

use std::collections::BTreeMap;
use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde_json::Value as Json;

use crate::error::{LwM2mError, Result};
use crate::model::{ObjectSpec, ResourceSpec, ResourceType};

/// A single typed resource value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Opaque(Vec<u8>),
    /// Seconds since the Unix epoch
    Time(i64),
}

impl Value {
    /// Runtime type tag of this value
    pub fn kind(&self) -> ResourceType {
        match self {
            Self::Integer(_) => ResourceType::Integer,
            Self::Float(_) => ResourceType::Float,
            Self::String(_) => ResourceType::String,
            Self::Boolean(_) => ResourceType::Boolean,
            Self::Opaque(_) => ResourceType::Opaque,
            Self::Time(_) => ResourceType::Time,
        }
    }

    /// Convert to the declared type, widening integers where that is lossless
    pub fn coerce(self, declared: ResourceType) -> Result<Self> {
        match (self, declared) {
            (v, d) if v.kind() == d => Ok(v),
            (Self::Integer(i), ResourceType::Float) => Ok(Self::Float(i as f64)),
            (Self::Integer(i), ResourceType::Time) => Ok(Self::Time(i)),
            (Self::Time(t), ResourceType::Integer) => Ok(Self::Integer(t)),
            (v, d) => Err(LwM2mError::TypeMismatch(format!(
                "{:?} value for {:?} resource",
                v.kind(),
                d
            ))),
        }
    }

    /// Parse the plain-text representation of a value of the declared type
    pub fn from_text(text: &str, declared: ResourceType) -> Result<Self> {
        let mismatch = || LwM2mError::TypeMismatch(format!("{text:?} is not {declared:?}"));
        match declared {
            ResourceType::String => Ok(Self::String(text.to_string())),
            ResourceType::Integer => text.trim().parse().map(Self::Integer).map_err(|_| mismatch()),
            ResourceType::Time => text.trim().parse().map(Self::Time).map_err(|_| mismatch()),
            ResourceType::Float => text.trim().parse().map(Self::Float).map_err(|_| mismatch()),
            ResourceType::Boolean => match text.trim() {
                "1" | "true" => Ok(Self::Boolean(true)),
                "0" | "false" => Ok(Self::Boolean(false)),
                _ => Err(mismatch()),
            },
            ResourceType::Opaque | ResourceType::None => Err(mismatch()),
        }
    }

    /// Cast a JSON value to the declared type
    pub fn from_json(value: &Json, declared: ResourceType) -> Result<Self> {
        let mismatch = || LwM2mError::TypeMismatch(format!("{value} is not {declared:?}"));
        match (value, declared) {
            (Json::String(s), ResourceType::String) => Ok(Self::String(s.clone())),
            (Json::String(s), ResourceType::Opaque) => BASE64
                .decode(s)
                .map(Self::Opaque)
                .map_err(|e| LwM2mError::Decode(e.to_string())),
            (Json::Bool(b), ResourceType::Boolean) => Ok(Self::Boolean(*b)),
            (Json::Number(n), ResourceType::Integer) => {
                n.as_i64().map(Self::Integer).ok_or_else(mismatch)
            }
            (Json::Number(n), ResourceType::Time) => n.as_i64().map(Self::Time).ok_or_else(mismatch),
            (Json::Number(n), ResourceType::Float) => n.as_f64().map(Self::Float).ok_or_else(mismatch),
            _ => Err(mismatch()),
        }
    }

    /// JSON rendering, opaque values as base64
    pub fn to_json(&self) -> Json {
        match self {
            Self::Integer(i) | Self::Time(i) => Json::from(*i),
            Self::Float(f) => Json::from(*f),
            Self::String(s) => Json::String(s.clone()),
            Self::Boolean(b) => Json::Bool(*b),
            Self::Opaque(bytes) => Json::String(BASE64.encode(bytes)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(i) | Self::Time(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => f.write_str(s),
            Self::Boolean(b) => f.write_str(if *b { "1" } else { "0" }),
            Self::Opaque(bytes) => f.write_str(&BASE64.encode(bytes)),
        }
    }
}

/// Value of a resource: one value or an indexed set of values
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceValue {
    Single(Value),
    Multiple(BTreeMap<u16, Value>),
}

/// A resource and its value
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: u16,
    pub value: ResourceValue,
}

impl Resource {
    pub fn single(id: u16, value: Value) -> Self {
        Self {
            id,
            value: ResourceValue::Single(value),
        }
    }

    pub fn multiple(id: u16, values: BTreeMap<u16, Value>) -> Self {
        Self {
            id,
            value: ResourceValue::Multiple(values),
        }
    }

    pub fn is_multiple(&self) -> bool {
        matches!(self.value, ResourceValue::Multiple(_))
    }

    /// Runtime type tag of the (first) value, if any
    pub fn kind(&self) -> Option<ResourceType> {
        match &self.value {
            ResourceValue::Single(v) => Some(v.kind()),
            ResourceValue::Multiple(values) => values.values().next().map(Value::kind),
        }
    }

    /// Check multiplicity and type against the definition, coercing values
    pub fn conform(self, spec: &ResourceSpec) -> Result<Self> {
        let value = match (self.value, spec.multiple) {
            (ResourceValue::Single(v), false) => ResourceValue::Single(v.coerce(spec.kind)?),
            (ResourceValue::Multiple(values), true) => ResourceValue::Multiple(
                values
                    .into_iter()
                    .map(|(i, v)| v.coerce(spec.kind).map(|v| (i, v)))
                    .collect::<Result<_>>()?,
            ),
            (ResourceValue::Single(_), true) => {
                return Err(LwM2mError::TypeMismatch(format!(
                    "resource {} is multi-instance, got a single value",
                    spec.id
                )));
            }
            (ResourceValue::Multiple(_), false) => {
                return Err(LwM2mError::TypeMismatch(format!(
                    "resource {} is single-instance, got multiple values",
                    spec.id
                )));
            }
        };
        Ok(Self { id: self.id, value })
    }
}

/// An object instance and its resources
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Instance {
    pub id: u16,
    pub resources: BTreeMap<u16, Resource>,
}

impl Instance {
    pub fn new(id: u16, resources: impl IntoIterator<Item = Resource>) -> Self {
        Self {
            id,
            resources: resources.into_iter().map(|r| (r.id, r)).collect(),
        }
    }

    /// Build an instance from a JSON object `{"<rid>": value | [values]}`
    pub fn from_json(id: u16, value: &Json, spec: &ObjectSpec) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| LwM2mError::Decode(format!("instance /{}/{id} is not an object", spec.id)))?;

        let mut resources = BTreeMap::new();
        for (key, v) in map {
            let rid: u16 = key
                .parse()
                .map_err(|_| LwM2mError::Decode(format!("invalid resource id: {key}")))?;
            let rspec = spec
                .resource(rid)
                .ok_or(LwM2mError::UnknownResource(spec.id, id, rid))?;
            let resource = match v {
                Json::Array(items) => {
                    let values = items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| -> Result<(u16, Value)> {
                            Ok((i as u16, Value::from_json(item, rspec.kind)?))
                        })
                        .collect::<Result<BTreeMap<_, _>>>()?;
                    Resource::multiple(rid, values)
                }
                other => Resource::single(rid, Value::from_json(other, rspec.kind)?),
            };
            resources.insert(rid, resource.conform(rspec)?);
        }
        Ok(Self { id, resources })
    }
}

/// All instances of one object
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Object {
    pub id: u16,
    pub instances: BTreeMap<u16, Instance>,
}

/// Any addressable node of the data model
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Object(Object),
    Instance(Instance),
    Resource(Resource),
}

impl Node {
    pub fn as_resource(&self) -> Option<&Resource> {
        match self {
            Self::Resource(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_instance(self) -> Option<Instance> {
        match self {
            Self::Instance(i) => Some(i),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Operations;
    use serde_json::json;

    fn spec(kind: ResourceType, multiple: bool) -> ResourceSpec {
        ResourceSpec {
            id: 1,
            name: "test".into(),
            operations: Operations::ReadWrite,
            multiple,
            mandatory: false,
            kind,
        }
    }

    #[test]
    fn test_value_coerce() {
        assert_eq!(
            Value::Integer(3).coerce(ResourceType::Float).unwrap(),
            Value::Float(3.0)
        );
        assert!(Value::String("x".into()).coerce(ResourceType::Opaque).is_err());
    }

    #[test]
    fn test_value_text() {
        assert_eq!(
            Value::from_text("42", ResourceType::Integer).unwrap(),
            Value::Integer(42)
        );
        assert_eq!(
            Value::from_text("1", ResourceType::Boolean).unwrap(),
            Value::Boolean(true)
        );
        assert!(Value::from_text("abc", ResourceType::Integer).is_err());
        assert_eq!(Value::Boolean(false).to_string(), "0");
    }

    #[test]
    fn test_value_json_opaque() {
        let v = Value::from_json(&json!("AQID"), ResourceType::Opaque).unwrap();
        assert_eq!(v, Value::Opaque(vec![1, 2, 3]));
        assert_eq!(v.to_json(), json!("AQID"));
    }

    #[test]
    fn test_conform_multiplicity() {
        let multi = Resource::multiple(1, BTreeMap::from([(0, Value::Integer(1))]));
        assert!(matches!(
            multi.clone().conform(&spec(ResourceType::Opaque, false)),
            Err(LwM2mError::TypeMismatch(_))
        ));
        assert!(multi.conform(&spec(ResourceType::Integer, true)).is_ok());
    }
}
