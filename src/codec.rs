//! Node encoding and decoding
//!
//! The engine only decides *which* format is used; turning nodes into bytes
//! is delegated to a [`NodeCodec`]. [`DefaultCodec`] is a self-contained
//! implementation:
//!
//! - Text: the scalar rendering of a single value
//! - Opaque: the raw bytes of a single opaque value
//! - StructuredMulti: a CBOR map keyed by numeric ids, nested per level
//! - ApplicationStructured: LwM2M JSON (`{"bn": "/3/0/", "e": [...]}`)

use std::collections::BTreeMap;

use ciborium::value::Value as Cbor;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::encoding::Format;
use crate::error::{LwM2mError, Result};
use crate::model::{ObjectSpec, ResourceSpec, ResourceType};
use crate::node::{Instance, Node, Object, Resource, ResourceValue, Value};
use crate::path::{Path, PathLevel};
use crate::tree::Link;

/// Byte-level encoder/decoder for nodes
pub trait NodeCodec: Send + Sync {
    /// Encode a node read at `path`
    fn encode(&self, node: &Node, format: Format, path: &Path) -> Result<Vec<u8>>;

    /// Decode a payload addressed to `path`
    ///
    /// The returned node has the shape of the path level: a resource for a
    /// resource path, an instance for an instance path, an object otherwise.
    fn decode(&self, payload: &[u8], format: Format, path: &Path, spec: &ObjectSpec)
    -> Result<Node>;

    /// Render discover results as application/link-format
    fn encode_links(&self, links: &[Link]) -> Vec<u8> {
        links
            .iter()
            .map(|link| format!("<{}>{}", link.path, link.attributes))
            .collect::<Vec<_>>()
            .join(",")
            .into_bytes()
    }
}

/// Built-in codec for the four value formats
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCodec;

impl NodeCodec for DefaultCodec {
    fn encode(&self, node: &Node, format: Format, path: &Path) -> Result<Vec<u8>> {
        match format {
            Format::Text => match single_value(node) {
                Some(Value::Opaque(_)) | None => Err(unencodable(format, path)),
                Some(value) => Ok(value.to_string().into_bytes()),
            },
            Format::Opaque => match single_value(node) {
                Some(Value::Opaque(bytes)) => Ok(bytes.clone()),
                _ => Err(unencodable(format, path)),
            },
            Format::StructuredMulti => {
                let mut bytes = Vec::new();
                ciborium::into_writer(&node_to_cbor(node), &mut bytes)
                    .map_err(|e| LwM2mError::Encode(e.to_string()))?;
                Ok(bytes)
            }
            Format::ApplicationStructured => {
                let pack = JsonPack {
                    bn: Some(format!("{path}/")),
                    e: json_entries(node),
                };
                Ok(serde_json::to_vec(&pack)?)
            }
        }
    }

    fn decode(
        &self,
        payload: &[u8],
        format: Format,
        path: &Path,
        spec: &ObjectSpec,
    ) -> Result<Node> {
        match format {
            Format::Text | Format::Opaque => {
                let (iid, rid) = match (path.instance_id(), path.resource_id()) {
                    (Some(iid), Some(rid)) => (iid, rid),
                    _ => {
                        return Err(LwM2mError::Decode(format!(
                            "{format:?} payload can only target a resource, not {path}"
                        )));
                    }
                };
                let rspec = resource_spec(spec, iid, rid)?;
                let value = if format == Format::Opaque {
                    Value::Opaque(payload.to_vec())
                } else {
                    let text = std::str::from_utf8(payload)
                        .map_err(|e| LwM2mError::Decode(e.to_string()))?;
                    Value::from_text(text, rspec.kind)?
                };
                Ok(Node::Resource(Resource::single(rid, value)))
            }
            Format::StructuredMulti => {
                let cbor: Cbor = ciborium::from_reader(payload)
                    .map_err(|e| LwM2mError::Decode(e.to_string()))?;
                cbor_to_node(&cbor, path)
            }
            Format::ApplicationStructured => {
                let pack: JsonPack = serde_json::from_slice(payload)
                    .map_err(|e| LwM2mError::Decode(e.to_string()))?;
                json_to_node(&pack, path, spec)
            }
        }
    }
}

fn unencodable(format: Format, path: &Path) -> LwM2mError {
    LwM2mError::Encode(format!("{format:?} cannot carry the node at {path}"))
}

fn single_value(node: &Node) -> Option<&Value> {
    match node.as_resource()?.value {
        ResourceValue::Single(ref v) => Some(v),
        ResourceValue::Multiple(_) => None,
    }
}

fn resource_spec(spec: &ObjectSpec, iid: u16, rid: u16) -> Result<&ResourceSpec> {
    spec.resource(rid)
        .ok_or(LwM2mError::UnknownResource(spec.id, iid, rid))
}

// --- StructuredMulti (CBOR) ---

fn value_to_cbor(value: &Value) -> Cbor {
    match value {
        Value::Integer(i) | Value::Time(i) => Cbor::Integer((*i).into()),
        Value::Float(f) => Cbor::Float(*f),
        Value::String(s) => Cbor::Text(s.clone()),
        Value::Boolean(b) => Cbor::Bool(*b),
        Value::Opaque(bytes) => Cbor::Bytes(bytes.clone()),
    }
}

fn id_map<'a, T: 'a>(
    items: impl Iterator<Item = (&'a u16, &'a T)>,
    f: impl Fn(&T) -> Cbor,
) -> Cbor {
    Cbor::Map(
        items
            .map(|(id, item)| (Cbor::Integer((*id).into()), f(item)))
            .collect(),
    )
}

fn resource_value_to_cbor(resource: &Resource) -> Cbor {
    match &resource.value {
        ResourceValue::Single(v) => value_to_cbor(v),
        ResourceValue::Multiple(values) => id_map(values.iter(), value_to_cbor),
    }
}

fn instance_to_cbor(instance: &Instance) -> Cbor {
    id_map(instance.resources.iter(), resource_value_to_cbor)
}

fn node_to_cbor(node: &Node) -> Cbor {
    match node {
        Node::Resource(r) => Cbor::Map(vec![(
            Cbor::Integer(r.id.into()),
            resource_value_to_cbor(r),
        )]),
        Node::Instance(i) => instance_to_cbor(i),
        Node::Object(o) => id_map(o.instances.iter(), instance_to_cbor),
    }
}

fn cbor_id(key: &Cbor) -> Result<u16> {
    key.as_integer()
        .and_then(|i| u16::try_from(i).ok())
        .ok_or_else(|| LwM2mError::Decode(format!("invalid id key: {key:?}")))
}

fn cbor_entries(value: &Cbor) -> Result<&Vec<(Cbor, Cbor)>> {
    value
        .as_map()
        .ok_or_else(|| LwM2mError::Decode(format!("expected a map, got {value:?}")))
}

fn cbor_to_value(value: &Cbor) -> Result<Value> {
    match value {
        Cbor::Integer(i) => i64::try_from(*i)
            .map(Value::Integer)
            .map_err(|e| LwM2mError::Decode(e.to_string())),
        Cbor::Float(f) => Ok(Value::Float(*f)),
        Cbor::Text(s) => Ok(Value::String(s.clone())),
        Cbor::Bool(b) => Ok(Value::Boolean(*b)),
        Cbor::Bytes(b) => Ok(Value::Opaque(b.clone())),
        other => Err(LwM2mError::Decode(format!("unsupported value: {other:?}"))),
    }
}

fn cbor_to_resource(rid: u16, value: &Cbor) -> Result<Resource> {
    if value.is_map() {
        let values = cbor_entries(value)?
            .iter()
            .map(|(k, v)| -> Result<(u16, Value)> { Ok((cbor_id(k)?, cbor_to_value(v)?)) })
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Resource::multiple(rid, values))
    } else {
        Ok(Resource::single(rid, cbor_to_value(value)?))
    }
}

fn cbor_to_instance(iid: u16, value: &Cbor) -> Result<Instance> {
    let resources = cbor_entries(value)?
        .iter()
        .map(|(k, v)| cbor_to_resource(cbor_id(k)?, v))
        .collect::<Result<Vec<_>>>()?;
    Ok(Instance::new(iid, resources))
}

fn cbor_to_node(value: &Cbor, path: &Path) -> Result<Node> {
    match (path.level(), path.instance_id(), path.resource_id()) {
        (PathLevel::Resource, _, Some(rid)) => {
            let entries = cbor_entries(value)?;
            match entries.as_slice() {
                [(k, v)] if cbor_id(k)? == rid => Ok(Node::Resource(cbor_to_resource(rid, v)?)),
                _ => Err(LwM2mError::Decode(format!(
                    "payload is not a single resource {rid}"
                ))),
            }
        }
        (PathLevel::Instance, Some(iid), _) => Ok(Node::Instance(cbor_to_instance(iid, value)?)),
        _ => {
            let instances = cbor_entries(value)?
                .iter()
                .map(|(k, v)| -> Result<(u16, Instance)> {
                    let iid = cbor_id(k)?;
                    Ok((iid, cbor_to_instance(iid, v)?))
                })
                .collect::<Result<BTreeMap<_, _>>>()?;
            Ok(Node::Object(Object {
                id: path.object_id(),
                instances,
            }))
        }
    }
}

// --- ApplicationStructured (LwM2M JSON) ---

#[derive(Debug, Serialize, Deserialize)]
struct JsonPack {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bn: Option<String>,
    e: Vec<JsonEntry>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct JsonEntry {
    #[serde(default)]
    n: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    v: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bv: Option<bool>,
}

fn json_entry(name: String, value: &Value) -> JsonEntry {
    let mut entry = JsonEntry {
        n: name,
        ..Default::default()
    };
    match value {
        Value::Boolean(b) => entry.bv = Some(*b),
        Value::String(_) | Value::Opaque(_) => entry.sv = Some(value.to_string()),
        Value::Integer(_) | Value::Float(_) | Value::Time(_) => entry.v = Some(value.to_json()),
    }
    entry
}

fn push_resource(entries: &mut Vec<JsonEntry>, prefix: &str, resource: &Resource, named: bool) {
    let base = match (named, prefix.is_empty()) {
        (false, _) => String::new(),
        (true, true) => resource.id.to_string(),
        (true, false) => format!("{prefix}/{}", resource.id),
    };
    match &resource.value {
        ResourceValue::Single(v) => entries.push(json_entry(base, v)),
        ResourceValue::Multiple(values) => {
            for (idx, v) in values {
                let name = if base.is_empty() {
                    idx.to_string()
                } else {
                    format!("{base}/{idx}")
                };
                entries.push(json_entry(name, v));
            }
        }
    }
}

fn json_entries(node: &Node) -> Vec<JsonEntry> {
    let mut entries = Vec::new();
    match node {
        Node::Resource(r) => push_resource(&mut entries, "", r, false),
        Node::Instance(i) => {
            for r in i.resources.values() {
                push_resource(&mut entries, "", r, true);
            }
        }
        Node::Object(o) => {
            for i in o.instances.values() {
                let prefix = i.id.to_string();
                for r in i.resources.values() {
                    push_resource(&mut entries, &prefix, r, true);
                }
            }
        }
    }
    entries
}

fn json_value(entry: &JsonEntry, kind: ResourceType) -> Result<Value> {
    let raw = match (&entry.v, &entry.sv, entry.bv) {
        (Some(v), None, None) => v.clone(),
        (None, Some(sv), None) => Json::String(sv.clone()),
        (None, None, Some(bv)) => Json::Bool(bv),
        _ => {
            return Err(LwM2mError::Decode(format!(
                "entry {:?} must carry exactly one of v, sv, bv",
                entry.n
            )));
        }
    };
    Value::from_json(&raw, kind)
}

fn json_to_node(pack: &JsonPack, path: &Path, spec: &ObjectSpec) -> Result<Node> {
    // (instance, resource, index) -> value
    let mut cells: Vec<(u16, u16, Option<u16>, Value)> = Vec::with_capacity(pack.e.len());
    for entry in &pack.e {
        let ids = entry
            .n
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u16>()
                    .map_err(|_| LwM2mError::Decode(format!("invalid entry name {:?}", entry.n)))
            })
            .collect::<Result<Vec<_>>>()?;
        let (iid, rid, idx) = match (path.instance_id(), path.resource_id(), ids.as_slice()) {
            (Some(iid), Some(rid), []) => (iid, rid, None),
            (Some(iid), Some(rid), [idx]) => (iid, rid, Some(*idx)),
            (Some(iid), None, [rid]) => (iid, *rid, None),
            (Some(iid), None, [rid, idx]) => (iid, *rid, Some(*idx)),
            (None, None, [iid, rid]) => (*iid, *rid, None),
            (None, None, [iid, rid, idx]) => (*iid, *rid, Some(*idx)),
            _ => {
                return Err(LwM2mError::Decode(format!(
                    "entry {:?} does not fit {path}",
                    entry.n
                )));
            }
        };
        let kind = resource_spec(spec, iid, rid)?.kind;
        cells.push((iid, rid, idx, json_value(entry, kind)?));
    }

    let mut object = Object {
        id: path.object_id(),
        instances: BTreeMap::new(),
    };
    for (iid, rid, idx, value) in cells {
        let instance = object.instances.entry(iid).or_insert_with(|| Instance {
            id: iid,
            resources: BTreeMap::new(),
        });
        match idx {
            None => {
                instance.resources.insert(rid, Resource::single(rid, value));
            }
            Some(idx) => {
                let resource = instance
                    .resources
                    .entry(rid)
                    .or_insert_with(|| Resource::multiple(rid, BTreeMap::new()));
                match &mut resource.value {
                    ResourceValue::Multiple(values) => {
                        values.insert(idx, value);
                    }
                    ResourceValue::Single(_) => {
                        return Err(LwM2mError::Decode(format!(
                            "resource {rid} is both single and multiple"
                        )));
                    }
                }
            }
        }
    }

    match (path.instance_id(), path.resource_id()) {
        (Some(iid), rid) => {
            let instance = object.instances.remove(&iid).unwrap_or(Instance {
                id: iid,
                resources: BTreeMap::new(),
            });
            match rid {
                None => Ok(Node::Instance(instance)),
                Some(rid) => instance
                    .resources
                    .into_values()
                    .next()
                    .filter(|r| r.id == rid)
                    .map(Node::Resource)
                    .ok_or_else(|| LwM2mError::Decode(format!("no value for resource {rid}"))),
            }
        }
        (None, _) => Ok(Node::Object(object)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Attributes;
    use crate::model::ObjectModel;

    const OBJECTS: &str = r#"[
        {"id": 3, "name": "Device", "instances": "single", "resources": [
            {"id": 0, "name": "Manufacturer", "operations": "R", "instances": "single", "type": "string"},
            {"id": 6, "name": "Power Sources", "operations": "R", "instances": "multiple", "type": "integer"},
            {"id": 9, "name": "Battery", "operations": "R", "instances": "single", "type": "integer"},
            {"id": 17, "name": "Blob", "operations": "RW", "instances": "single", "type": "opaque"}
        ]}
    ]"#;

    fn device() -> ObjectSpec {
        let model: ObjectModel = OBJECTS.parse().unwrap();
        model.object(3).unwrap().clone()
    }

    fn sample_instance() -> Instance {
        Instance::new(
            0,
            [
                Resource::single(0, Value::String("ACME".into())),
                Resource::multiple(6, BTreeMap::from([(0, Value::Integer(1)), (1, Value::Integer(5))])),
            ],
        )
    }

    #[test]
    fn test_text_roundtrip() {
        let path = Path::resource(3, 0, 9);
        let node = Node::Resource(Resource::single(9, Value::Integer(87)));
        let bytes = DefaultCodec.encode(&node, Format::Text, &path).unwrap();
        assert_eq!(bytes, b"87");
        assert_eq!(
            DefaultCodec.decode(&bytes, Format::Text, &path, &device()).unwrap(),
            node
        );
    }

    #[test]
    fn test_text_rejects_instance() {
        let node = Node::Instance(sample_instance());
        assert!(matches!(
            DefaultCodec.encode(&node, Format::Text, &Path::instance(3, 0)),
            Err(LwM2mError::Encode(_))
        ));
        assert!(DefaultCodec
            .decode(b"x", Format::Text, &Path::instance(3, 0), &device())
            .is_err());
    }

    #[test]
    fn test_cbor_instance() {
        let path = Path::instance(3, 0);
        let node = Node::Instance(sample_instance());
        let bytes = DefaultCodec.encode(&node, Format::StructuredMulti, &path).unwrap();
        println!("CBOR hex: {}", hex::encode(&bytes));
        let decoded = DefaultCodec
            .decode(&bytes, Format::StructuredMulti, &path, &device())
            .unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_cbor_multi_resource_into_resource_path() {
        let path = Path::resource(3, 0, 17);
        let multi = Node::Resource(Resource::multiple(
            17,
            BTreeMap::from([(0, Value::Opaque(vec![1])), (1, Value::Opaque(vec![2]))]),
        ));
        let bytes = DefaultCodec.encode(&multi, Format::StructuredMulti, &path).unwrap();
        let decoded = DefaultCodec
            .decode(&bytes, Format::StructuredMulti, &path, &device())
            .unwrap();
        assert!(decoded.as_resource().unwrap().is_multiple());
    }

    #[test]
    fn test_json_instance() {
        let path = Path::instance(3, 0);
        let node = Node::Instance(sample_instance());
        let bytes = DefaultCodec
            .encode(&node, Format::ApplicationStructured, &path)
            .unwrap();
        let json: Json = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["bn"], "/3/0/");
        assert_eq!(json["e"][0]["n"], "0");
        assert_eq!(json["e"][0]["sv"], "ACME");
        assert_eq!(json["e"][2]["n"], "6/1");

        let decoded = DefaultCodec
            .decode(&bytes, Format::ApplicationStructured, &path, &device())
            .unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_links() {
        let links = vec![
            Link {
                path: Path::instance(3, 0),
                attributes: Attributes::default(),
            },
            Link {
                path: Path::resource(3, 0, 9),
                attributes: Attributes {
                    min_period: Some(10),
                    ..Default::default()
                },
            },
        ];
        assert_eq!(
            DefaultCodec.encode_links(&links),
            b"</3/0>,</3/0/9>;pmin=10".to_vec()
        );
    }
}
