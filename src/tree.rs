//! Device-side resource tree
//!
//! The [`ResourceTree`] owns one [`ObjectEnabler`] per object id and routes
//! every operation to it. Each enabler keeps its instances behind their own
//! read/write lock: reads of one instance run concurrently, writes to it are
//! serialized, and unrelated instances or objects never contend.
//!
//! Successful mutations raise [`ValueChanged`] events to the registered
//! [`ChangeListener`]s once the change is applied and all locks are released.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value as Json;
use tracing::{debug, info};

use crate::attributes::{AttributeUpdate, Attributes};
use crate::error::{LwM2mError, Result};
use crate::model::{ObjectModel, ObjectSpec, ResourceSpec};
use crate::node::{Instance, Node, Object, Resource};
use crate::path::{Path, PathLevel};

/// A node changed; carries a snapshot taken under the lock that changed it
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChanged {
    pub path: Path,
    pub node: Node,
    /// Tree-wide change sequence; later changes have larger values
    pub seq: u64,
}

/// Receives value-changed events from the tree
pub trait ChangeListener: Send + Sync {
    fn value_changed(&self, event: &ValueChanged);

    /// An instance and everything below it was deleted at change `seq`
    fn removed(&self, _path: &Path, _seq: u64) {}
}

/// Behaviour behind an executable resource
///
/// Runs with exclusive access to the target instance.
pub trait ExecuteHandler: Send + Sync {
    fn execute(&self, instance: &mut Instance, args: &[u8]) -> Result<()>;
}

impl<F> ExecuteHandler for F
where
    F: Fn(&mut Instance, &[u8]) -> Result<()> + Send + Sync,
{
    fn execute(&self, instance: &mut Instance, args: &[u8]) -> Result<()> {
        self(instance, args)
    }
}

/// One discover entry: a path and the attributes attached to it
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub path: Path,
    pub attributes: Attributes,
}

type SharedInstance = Arc<RwLock<Instance>>;

/// All instances of one object type
pub struct ObjectEnabler {
    spec: ObjectSpec,
    instances: RwLock<BTreeMap<u16, SharedInstance>>,
    attributes: RwLock<HashMap<Path, Attributes>>,
    executors: HashMap<u16, Arc<dyn ExecuteHandler>>,
}

impl std::fmt::Debug for ObjectEnabler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectEnabler")
            .field("id", &self.spec.id)
            .field("instances", &self.instance_ids())
            .finish()
    }
}

impl ObjectEnabler {
    fn new(spec: ObjectSpec) -> Self {
        Self {
            spec,
            instances: RwLock::new(BTreeMap::new()),
            attributes: RwLock::new(HashMap::new()),
            executors: HashMap::new(),
        }
    }

    pub fn id(&self) -> u16 {
        self.spec.id
    }

    pub fn spec(&self) -> &ObjectSpec {
        &self.spec
    }

    pub fn instance_ids(&self) -> Vec<u16> {
        self.instances.read().keys().copied().collect()
    }

    fn instance(&self, iid: u16) -> Result<SharedInstance> {
        self.instances
            .read()
            .get(&iid)
            .cloned()
            .ok_or(LwM2mError::UnknownInstance(self.spec.id, iid))
    }

    fn resource_spec(&self, iid: u16, rid: u16) -> Result<&ResourceSpec> {
        self.spec
            .resource(rid)
            .ok_or(LwM2mError::UnknownResource(self.spec.id, iid, rid))
    }

    /// The instance as a peer may see it: readable resources only
    fn readable(&self, instance: &Instance) -> Instance {
        Instance {
            id: instance.id,
            resources: instance
                .resources
                .iter()
                .filter(|(rid, _)| {
                    self.spec
                        .resource(**rid)
                        .is_some_and(|s| s.operations.is_readable())
                })
                .map(|(rid, r)| (*rid, r.clone()))
                .collect(),
        }
    }

    fn snapshot(&self, instances: &BTreeMap<u16, SharedInstance>) -> Object {
        Object {
            id: self.spec.id,
            instances: instances
                .iter()
                .map(|(iid, inst)| (*iid, self.readable(&inst.read())))
                .collect(),
        }
    }

    fn read(&self, path: &Path) -> Result<Node> {
        match (path.instance_id(), path.resource_id()) {
            (None, _) => Ok(Node::Object(self.snapshot(&self.instances.read()))),
            (Some(iid), None) => {
                let instance = self.instance(iid)?;
                let guard = instance.read();
                Ok(Node::Instance(self.readable(&guard)))
            }
            (Some(iid), Some(rid)) => {
                let instance = self.instance(iid)?;
                let spec = self.resource_spec(iid, rid)?;
                if !spec.operations.is_readable() {
                    return Err(LwM2mError::MethodNotAllowed(format!(
                        "resource {path} is not readable"
                    )));
                }
                let guard = instance.read();
                guard
                    .resources
                    .get(&rid)
                    .cloned()
                    .map(Node::Resource)
                    .ok_or(LwM2mError::UnknownResource(self.spec.id, iid, rid))
            }
        }
    }

    fn discover(&self, path: &Path) -> Result<Vec<Link>> {
        let mut paths = Vec::new();
        match (path.instance_id(), path.resource_id()) {
            (None, _) => {
                paths.push(*path);
                for (iid, instance) in self.instances.read().iter() {
                    let base = Path::instance(self.spec.id, *iid);
                    paths.push(base);
                    paths.extend(instance.read().resources.keys().filter_map(|r| base.child(*r)));
                }
            }
            (Some(iid), None) => {
                let instance = self.instance(iid)?;
                paths.push(*path);
                paths.extend(instance.read().resources.keys().filter_map(|r| path.child(*r)));
            }
            (Some(iid), Some(rid)) => {
                let instance = self.instance(iid)?;
                self.resource_spec(iid, rid)?;
                if !instance.read().resources.contains_key(&rid) {
                    return Err(LwM2mError::UnknownResource(self.spec.id, iid, rid));
                }
                paths.push(*path);
            }
        }

        // attributes are locked only after the instance locks are released
        let attributes = self.attributes.read();
        Ok(paths
            .into_iter()
            .map(|path| Link {
                attributes: attributes.get(&path).copied().unwrap_or_default(),
                path,
            })
            .collect())
    }

    /// Apply resources to an instance
    ///
    /// `from_peer` enforces the writable flag; device-side updates skip it.
    fn write(
        &self,
        path: &Path,
        node: Node,
        replace: bool,
        from_peer: bool,
        seq: &AtomicU64,
    ) -> Result<Vec<ValueChanged>> {
        let iid = path.instance_id().ok_or_else(|| {
            LwM2mError::MethodNotAllowed(format!("write on object path {path}"))
        })?;
        let instance = self.instance(iid)?;

        let incoming: Vec<Resource> = match (path.resource_id(), node) {
            (Some(rid), Node::Resource(r)) if r.id == rid => vec![r],
            (None, Node::Instance(i)) => i.resources.into_values().collect(),
            _ => {
                return Err(LwM2mError::TypeMismatch(format!(
                    "payload shape does not match {path}"
                )));
            }
        };
        let resources = incoming
            .into_iter()
            .map(|r| {
                let spec = self.resource_spec(iid, r.id)?;
                if spec.operations.is_executable() || (from_peer && !spec.operations.is_writable())
                {
                    return Err(LwM2mError::MethodNotAllowed(format!(
                        "resource /{}/{iid}/{} is not writable",
                        self.spec.id, r.id
                    )));
                }
                r.conform(spec)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut guard = instance.write();
        let before = guard.clone();
        if replace && path.is_instance() {
            guard.resources.retain(|rid, _| {
                self.spec
                    .resource(*rid)
                    .is_none_or(|s| !s.operations.is_writable() || s.mandatory)
            });
        }
        for resource in resources {
            guard.resources.insert(resource.id, resource);
        }
        Ok(self.changes(&before, &guard, seq))
    }

    fn execute(&self, path: &Path, args: &[u8], seq: &AtomicU64) -> Result<Vec<ValueChanged>> {
        let (iid, rid) = match (path.instance_id(), path.resource_id()) {
            (Some(iid), Some(rid)) => (iid, rid),
            _ => {
                return Err(LwM2mError::MethodNotAllowed(format!(
                    "execute on non-resource path {path}"
                )));
            }
        };
        let instance = self.instance(iid)?;
        if !self.resource_spec(iid, rid)?.operations.is_executable() {
            return Err(LwM2mError::MethodNotAllowed(format!(
                "resource {path} is not executable"
            )));
        }

        let mut guard = instance.write();
        let before = guard.clone();
        if let Some(handler) = self.executors.get(&rid) {
            handler.execute(&mut guard, args)?;
        }
        Ok(self.changes(&before, &guard, seq))
    }

    fn create(
        &self,
        requested: Option<u16>,
        instance: Instance,
        seq: &AtomicU64,
    ) -> Result<(Path, Vec<ValueChanged>)> {
        let oid = self.spec.id;
        let resources = instance
            .resources
            .into_values()
            .map(|r| {
                let spec = self
                    .spec
                    .resource(r.id)
                    .filter(|s| !s.operations.is_executable())
                    .ok_or_else(|| {
                        LwM2mError::Decode(format!("resource {} cannot be set on /{oid}", r.id))
                    })?;
                r.conform(spec)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut instances = self.instances.write();
        if !self.spec.multiple && !instances.is_empty() {
            return Err(LwM2mError::MethodNotAllowed(format!(
                "object /{oid} is single-instance"
            )));
        }
        let iid = match requested {
            Some(iid) if instances.contains_key(&iid) => {
                return Err(LwM2mError::InstanceExists(oid, iid));
            }
            Some(iid) => iid,
            // 65535 is reserved
            None => (0..u16::MAX)
                .find(|id| !instances.contains_key(id))
                .ok_or_else(|| LwM2mError::MethodNotAllowed(format!("object /{oid} is full")))?,
        };

        let created = Instance::new(iid, resources);
        let view = self.readable(&created);
        instances.insert(iid, Arc::new(RwLock::new(created)));
        let object = self.snapshot(&instances);
        drop(instances);

        let path = Path::instance(oid, iid);
        let events = vec![
            ValueChanged {
                path,
                node: Node::Instance(view),
                seq: next_seq(seq),
            },
            ValueChanged {
                path: Path::object(oid),
                node: Node::Object(object),
                seq: next_seq(seq),
            },
        ];
        Ok((path, events))
    }

    fn delete(&self, path: &Path, seq: &AtomicU64) -> Result<Vec<ValueChanged>> {
        let iid = match (path.level(), path.instance_id()) {
            (PathLevel::Instance, Some(iid)) => iid,
            _ => {
                return Err(LwM2mError::MethodNotAllowed(format!(
                    "delete on non-instance path {path}"
                )));
            }
        };

        let mut instances = self.instances.write();
        if instances.remove(&iid).is_none() {
            return Err(LwM2mError::UnknownInstance(self.spec.id, iid));
        }
        let object = self.snapshot(&instances);
        let event = ValueChanged {
            path: Path::object(self.spec.id),
            node: Node::Object(object),
            seq: next_seq(seq),
        };
        drop(instances);

        self.attributes.write().retain(|p, _| !path.contains(p));
        Ok(vec![event])
    }

    fn write_attributes(&self, path: &Path, update: AttributeUpdate) -> Result<()> {
        if let Some(iid) = path.instance_id() {
            self.instance(iid)?;
        }
        if let (Some(iid), Some(rid)) = (path.instance_id(), path.resource_id()) {
            let spec = self.resource_spec(iid, rid)?;
            if let AttributeUpdate::Set(attrs) = &update
                && (attrs.greater_than.is_some() || attrs.less_than.is_some() || attrs.step.is_some())
                && (spec.multiple || !spec.kind.is_numeric())
            {
                return Err(LwM2mError::InvalidAttributes(format!(
                    "gt/lt/st need a single numeric resource, {path} is not"
                )));
            }
        }

        let mut store = self.attributes.write();
        match update {
            AttributeUpdate::Cancel => {
                store.remove(path);
            }
            AttributeUpdate::Set(attrs) => {
                let merged = store.get(path).copied().unwrap_or_default().merge(&attrs);
                merged.validate(path)?;
                store.insert(*path, merged);
            }
        }
        Ok(())
    }

    /// Stored attributes for a path
    pub fn attributes(&self, path: &Path) -> Attributes {
        self.attributes.read().get(path).copied().unwrap_or_default()
    }

    /// Events for every resource that differs, then for the instance
    fn changes(&self, before: &Instance, after: &Instance, seq: &AtomicU64) -> Vec<ValueChanged> {
        let changed: BTreeSet<u16> = before
            .resources
            .keys()
            .chain(after.resources.keys())
            .filter(|rid| before.resources.get(rid) != after.resources.get(rid))
            .copied()
            .collect();
        if changed.is_empty() {
            return Vec::new();
        }

        let mut events = Vec::with_capacity(changed.len() + 1);
        for rid in changed {
            let readable = self
                .spec
                .resource(rid)
                .is_some_and(|s| s.operations.is_readable());
            if let Some(resource) = after.resources.get(&rid)
                && readable
            {
                events.push(ValueChanged {
                    path: Path::resource(self.spec.id, after.id, rid),
                    node: Node::Resource(resource.clone()),
                    seq: next_seq(seq),
                });
            }
        }
        events.push(ValueChanged {
            path: Path::instance(self.spec.id, after.id),
            node: Node::Instance(self.readable(after)),
            seq: next_seq(seq),
        });
        events
    }
}

fn next_seq(seq: &AtomicU64) -> u64 {
    seq.fetch_add(1, Ordering::Relaxed) + 1
}

/// The device data model: object id → enabler
pub struct ResourceTree {
    enablers: BTreeMap<u16, ObjectEnabler>,
    listeners: RwLock<Vec<Arc<dyn ChangeListener>>>,
    seq: AtomicU64,
}

impl std::fmt::Debug for ResourceTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceTree")
            .field("enablers", &self.enablers)
            .finish()
    }
}

impl ResourceTree {
    /// Create an empty tree with one enabler per defined object
    pub fn new(model: &ObjectModel) -> Self {
        Self {
            enablers: model
                .objects()
                .map(|spec| (spec.id, ObjectEnabler::new(spec.clone())))
                .collect(),
            listeners: RwLock::new(Vec::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Create a tree populated from JSON instance data
    ///
    /// Format: `{"<oid>": {"<iid>": {"<rid>": value | [values]}}}`
    pub fn from_json(model: &ObjectModel, json: &str) -> Result<Self> {
        let tree = Self::new(model);
        let data: Json = serde_json::from_str(json)?;
        let objects = data
            .as_object()
            .ok_or_else(|| LwM2mError::Decode("instance data must be an object".into()))?;

        for (oid, instances) in objects {
            let oid: u16 = oid
                .parse()
                .map_err(|_| LwM2mError::Decode(format!("invalid object id: {oid}")))?;
            let spec = tree.enabler(oid)?.spec();
            let instances = instances.as_object().ok_or_else(|| {
                LwM2mError::Decode(format!("instances of /{oid} must be an object"))
            })?;
            for (iid, value) in instances {
                let iid: u16 = iid
                    .parse()
                    .map_err(|_| LwM2mError::Decode(format!("invalid instance id: {iid}")))?;
                let instance = Instance::from_json(iid, value, spec)?;
                tree.create(&Path::instance(oid, iid), instance)?;
            }
        }
        Ok(tree)
    }

    /// Register the behaviour of an executable resource
    pub fn with_execute_handler(
        mut self,
        object_id: u16,
        resource_id: u16,
        handler: impl ExecuteHandler + 'static,
    ) -> Result<Self> {
        let enabler = self
            .enablers
            .get_mut(&object_id)
            .ok_or(LwM2mError::UnknownObject(object_id))?;
        let executable = enabler
            .spec
            .resource(resource_id)
            .is_some_and(|s| s.operations.is_executable());
        if !executable {
            return Err(LwM2mError::InvalidDefinition(format!(
                "/{object_id}/x/{resource_id} is not an executable resource"
            )));
        }
        enabler.executors.insert(resource_id, Arc::new(handler));
        Ok(self)
    }

    /// Subscribe to value-changed events
    pub fn add_listener(&self, listener: Arc<dyn ChangeListener>) {
        self.listeners.write().push(listener);
    }

    /// Get the enabler for an object id
    pub fn enabler(&self, object_id: u16) -> Result<&ObjectEnabler> {
        self.enablers
            .get(&object_id)
            .ok_or(LwM2mError::UnknownObject(object_id))
    }

    pub fn enablers(&self) -> impl Iterator<Item = &ObjectEnabler> {
        self.enablers.values()
    }

    /// Resource definition for a resource path
    pub fn resource_spec(&self, path: &Path) -> Option<&ResourceSpec> {
        self.enablers
            .get(&path.object_id())?
            .spec
            .resource(path.resource_id()?)
    }

    /// Snapshot of the node at `path`
    pub fn read(&self, path: &Path) -> Result<Node> {
        self.enabler(path.object_id())?.read(path)
    }

    /// Paths below `path` with their attributes
    pub fn discover(&self, path: &Path) -> Result<Vec<Link>> {
        self.enabler(path.object_id())?.discover(path)
    }

    /// Peer write on an instance or resource
    pub fn write(&self, path: &Path, node: Node, replace: bool) -> Result<()> {
        let events = self
            .enabler(path.object_id())?
            .write(path, node, replace, true, &self.seq)?;
        debug!(path = %path, replace, changes = events.len(), "Write applied");
        self.emit(events);
        Ok(())
    }

    /// Device-side update of a resource value; not subject to the writable flag
    pub fn set_value(&self, path: &Path, resource: Resource) -> Result<()> {
        if !path.is_resource() {
            return Err(LwM2mError::MethodNotAllowed(format!(
                "set_value needs a resource path, got {path}"
            )));
        }
        let events = self.enabler(path.object_id())?.write(
            path,
            Node::Resource(resource),
            false,
            false,
            &self.seq,
        )?;
        self.emit(events);
        Ok(())
    }

    pub fn write_attributes(&self, path: &Path, update: AttributeUpdate) -> Result<()> {
        self.enabler(path.object_id())?.write_attributes(path, update)
    }

    pub fn execute(&self, path: &Path, args: &[u8]) -> Result<()> {
        let events = self.enabler(path.object_id())?.execute(path, args, &self.seq)?;
        debug!(path = %path, changes = events.len(), "Executed");
        self.emit(events);
        Ok(())
    }

    /// Create an instance; an instance-level path names the new id
    ///
    /// Returns the path of the new instance.
    pub fn create(&self, path: &Path, instance: Instance) -> Result<Path> {
        if path.is_resource() {
            return Err(LwM2mError::MethodNotAllowed(format!(
                "create on resource path {path}"
            )));
        }
        let (location, events) =
            self.enabler(path.object_id())?
                .create(path.instance_id(), instance, &self.seq)?;
        info!(location = %location, "Instance created");
        self.emit(events);
        Ok(location)
    }

    pub fn delete(&self, path: &Path) -> Result<()> {
        let events = self.enabler(path.object_id())?.delete(path, &self.seq)?;
        let seq = events.iter().map(|e| e.seq).max().unwrap_or_default();
        info!(path = %path, "Instance deleted");
        self.emit(events);
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            listener.removed(path, seq);
        }
        Ok(())
    }

    fn emit(&self, events: Vec<ValueChanged>) {
        if events.is_empty() {
            return;
        }
        let listeners = self.listeners.read().clone();
        for event in &events {
            for listener in &listeners {
                listener.value_changed(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Value;
    use parking_lot::Mutex;

    const OBJECTS: &str = r#"[
        {"id": 3, "name": "Device", "instances": "single", "resources": [
            {"id": 0, "name": "Manufacturer", "operations": "R", "instances": "single", "type": "string"},
            {"id": 4, "name": "Reboot", "operations": "E", "instances": "single"},
            {"id": 13, "name": "Current Time", "operations": "RW", "instances": "single", "type": "time"},
            {"id": 14, "name": "UTC Offset", "operations": "RW", "instances": "single", "type": "string"}
        ]},
        {"id": 1, "name": "Server", "instances": "multiple", "resources": [
            {"id": 0, "name": "Short Server ID", "operations": "R", "instances": "single", "mandatory": true, "type": "integer"},
            {"id": 1, "name": "Lifetime", "operations": "RW", "instances": "single", "mandatory": true, "type": "integer"},
            {"id": 2, "name": "Default Minimum Period", "operations": "RW", "instances": "single", "type": "integer"}
        ]}
    ]"#;

    const DATA: &str = r#"{
        "3": {"0": {"0": "ACME", "13": 1700000000, "14": "+01:00"}},
        "1": {"0": {"0": 101, "1": 300}}
    }"#;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ValueChanged>>);

    impl ChangeListener for Recorder {
        fn value_changed(&self, event: &ValueChanged) {
            self.0.lock().push(event.clone());
        }
    }

    impl Recorder {
        fn paths(&self) -> Vec<String> {
            self.0.lock().iter().map(|e| e.path.to_string()).collect()
        }
    }

    fn create_tree() -> (ResourceTree, Arc<Recorder>) {
        let model: ObjectModel = OBJECTS.parse().unwrap();
        let tree = ResourceTree::from_json(&model, DATA).unwrap();
        let recorder = Arc::new(Recorder::default());
        tree.add_listener(recorder.clone());
        (tree, recorder)
    }

    #[test]
    fn test_read_levels() {
        let (tree, _) = create_tree();

        let node = tree.read(&Path::resource(3, 0, 0)).unwrap();
        assert_eq!(
            node,
            Node::Resource(Resource::single(0, Value::String("ACME".into())))
        );
        let Node::Object(object) = tree.read(&Path::object(1)).unwrap() else {
            panic!("expected object");
        };
        assert_eq!(object.instances.len(), 1);
    }

    #[test]
    fn test_read_errors() {
        let (tree, _) = create_tree();

        assert!(matches!(
            tree.read(&Path::object(42)),
            Err(LwM2mError::UnknownObject(42))
        ));
        assert!(matches!(
            tree.read(&Path::instance(1, 7)),
            Err(LwM2mError::UnknownInstance(1, 7))
        ));
        assert!(matches!(
            tree.read(&Path::resource(1, 0, 2)),
            Err(LwM2mError::UnknownResource(1, 0, 2))
        ));
        assert!(matches!(
            tree.read(&Path::resource(3, 0, 4)),
            Err(LwM2mError::MethodNotAllowed(_))
        ));
    }

    #[test]
    fn test_write_resource_raises_events() {
        let (tree, recorder) = create_tree();

        let path = Path::resource(1, 0, 1);
        tree.write(&path, Node::Resource(Resource::single(1, Value::Integer(60))), true)
            .unwrap();

        assert_eq!(recorder.paths(), vec!["/1/0/1", "/1/0"]);
        assert_eq!(
            tree.read(&path).unwrap(),
            Node::Resource(Resource::single(1, Value::Integer(60)))
        );

        // unchanged value: nothing to report
        tree.write(&path, Node::Resource(Resource::single(1, Value::Integer(60))), true)
            .unwrap();
        assert_eq!(recorder.paths().len(), 2);
    }

    #[test]
    fn test_write_rejections() {
        let (tree, _) = create_tree();

        let readonly = Path::resource(1, 0, 0);
        assert!(matches!(
            tree.write(&readonly, Node::Resource(Resource::single(0, Value::Integer(1))), true),
            Err(LwM2mError::MethodNotAllowed(_))
        ));
        assert!(matches!(
            tree.write(
                &Path::object(1),
                Node::Instance(Instance::default()),
                true
            ),
            Err(LwM2mError::MethodNotAllowed(_))
        ));
        assert!(matches!(
            tree.write(
                &Path::resource(1, 0, 1),
                Node::Resource(Resource::single(1, Value::String("x".into()))),
                true
            ),
            Err(LwM2mError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_replace_instance_keeps_readonly_and_mandatory() {
        let (tree, _) = create_tree();
        tree.write(
            &Path::resource(1, 0, 2),
            Node::Resource(Resource::single(2, Value::Integer(5))),
            true,
        )
        .unwrap();

        let payload = Instance::new(0, [Resource::single(1, Value::Integer(120))]);
        tree.write(&Path::instance(1, 0), Node::Instance(payload), true)
            .unwrap();

        let Node::Instance(instance) = tree.read(&Path::instance(1, 0)).unwrap() else {
            panic!("expected instance");
        };
        assert!(instance.resources.contains_key(&0));
        assert_eq!(
            instance.resources[&1],
            Resource::single(1, Value::Integer(120))
        );
        assert!(!instance.resources.contains_key(&2));
    }

    #[test]
    fn test_create_and_delete() {
        let (tree, recorder) = create_tree();

        let instance = Instance::new(0, [Resource::single(0, Value::Integer(102))]);
        let location = tree.create(&Path::object(1), instance).unwrap();
        assert_eq!(location, Path::instance(1, 1));
        assert_eq!(recorder.paths(), vec!["/1/1", "/1"]);

        assert!(matches!(
            tree.create(&Path::instance(1, 1), Instance::default()),
            Err(LwM2mError::InstanceExists(1, 1))
        ));
        assert!(matches!(
            tree.create(&Path::object(3), Instance::default()),
            Err(LwM2mError::MethodNotAllowed(_))
        ));

        tree.delete(&location).unwrap();
        assert!(matches!(
            tree.delete(&location),
            Err(LwM2mError::UnknownInstance(1, 1))
        ));
        assert!(matches!(
            tree.delete(&Path::object(1)),
            Err(LwM2mError::MethodNotAllowed(_))
        ));
    }

    #[test]
    fn test_execute_handler() {
        let model: ObjectModel = OBJECTS.parse().unwrap();
        let tree = ResourceTree::from_json(&model, DATA)
            .unwrap()
            .with_execute_handler(3, 4, |instance: &mut Instance, _: &[u8]| -> Result<()> {
                instance
                    .resources
                    .insert(13, Resource::single(13, Value::Time(0)));
                Ok(())
            })
            .unwrap();
        let recorder = Arc::new(Recorder::default());
        tree.add_listener(recorder.clone());

        tree.execute(&Path::resource(3, 0, 4), &[]).unwrap();
        assert_eq!(recorder.paths(), vec!["/3/0/13", "/3/0"]);

        assert!(matches!(
            tree.execute(&Path::instance(3, 0), &[]),
            Err(LwM2mError::MethodNotAllowed(_))
        ));
        assert!(matches!(
            tree.execute(&Path::resource(3, 0, 13), &[]),
            Err(LwM2mError::MethodNotAllowed(_))
        ));
    }

    #[test]
    fn test_handler_must_target_executable() {
        let model: ObjectModel = OBJECTS.parse().unwrap();
        let result = ResourceTree::new(&model)
            .with_execute_handler(3, 0, |_: &mut Instance, _: &[u8]| -> Result<()> {
                Ok(())
            });
        assert!(result.is_err());
    }

    #[test]
    fn test_discover_with_attributes() {
        let (tree, _) = create_tree();
        tree.write_attributes(
            &Path::resource(1, 0, 1),
            AttributeUpdate::Set(Attributes {
                min_period: Some(10),
                ..Default::default()
            }),
        )
        .unwrap();

        let links = tree.discover(&Path::instance(1, 0)).unwrap();
        let paths: Vec<String> = links.iter().map(|l| l.path.to_string()).collect();
        assert_eq!(paths, vec!["/1/0", "/1/0/0", "/1/0/1"]);
        assert_eq!(links[2].attributes.min_period, Some(10));

        tree.write_attributes(&Path::resource(1, 0, 1), AttributeUpdate::Cancel)
            .unwrap();
        assert!(
            tree.enabler(1)
                .unwrap()
                .attributes(&Path::resource(1, 0, 1))
                .is_empty()
        );
    }

    #[test]
    fn test_threshold_needs_numeric_resource() {
        let (tree, _) = create_tree();
        let gt = AttributeUpdate::Set(Attributes {
            greater_than: Some(1.0),
            ..Default::default()
        });
        assert!(tree.write_attributes(&Path::resource(1, 0, 1), gt).is_ok());
        assert!(matches!(
            tree.write_attributes(&Path::resource(3, 0, 14), gt),
            Err(LwM2mError::InvalidAttributes(_))
        ));
    }

    #[test]
    fn test_set_value_bypasses_writable() {
        let (tree, recorder) = create_tree();
        tree.set_value(
            &Path::resource(3, 0, 0),
            Resource::single(0, Value::String("Other".into())),
        )
        .unwrap();
        assert_eq!(recorder.paths(), vec!["/3/0/0", "/3/0"]);
    }

    #[test]
    fn test_event_sequence_increases() {
        let (tree, recorder) = create_tree();
        for v in 1..=3 {
            tree.write(
                &Path::resource(1, 0, 1),
                Node::Resource(Resource::single(1, Value::Integer(v))),
                true,
            )
            .unwrap();
        }
        let seqs: Vec<u64> = recorder.0.lock().iter().map(|e| e.seq).collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    }
}
