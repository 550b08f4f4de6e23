//! LwM2M object / instance / resource paths
//!
//! A path addresses one node of the device data model. It is written as a
//! slash-delimited string of up to three numeric segments, e.g. `/3`, `/3/0`
//! or `/3/0/13`.

use std::fmt;
use std::str::FromStr;

use crate::error::{LwM2mError, Result};

/// Depth of a path in the object/instance/resource hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathLevel {
    Object,
    Instance,
    Resource,
}

/// An immutable, structurally valid path
///
/// The representation makes a resource id without an instance id
/// unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    object_id: u16,
    instance: Option<(u16, Option<u16>)>,
}

impl Path {
    /// Path to a whole object, e.g. `/3`
    pub const fn object(object_id: u16) -> Self {
        Self {
            object_id,
            instance: None,
        }
    }

    /// Path to an object instance, e.g. `/3/0`
    pub const fn instance(object_id: u16, instance_id: u16) -> Self {
        Self {
            object_id,
            instance: Some((instance_id, None)),
        }
    }

    /// Path to a single resource, e.g. `/3/0/1`
    pub const fn resource(object_id: u16, instance_id: u16, resource_id: u16) -> Self {
        Self {
            object_id,
            instance: Some((instance_id, Some(resource_id))),
        }
    }

    /// Parse a slash-delimited path
    ///
    /// A leading `/` is optional and a single trailing `/` is tolerated.
    /// Any non-numeric, negative or out-of-range segment, an empty segment,
    /// or more than three segments yields [`LwM2mError::MalformedPath`].
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.strip_prefix('/').unwrap_or(raw);
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Err(LwM2mError::MalformedPath(raw.to_string()));
        }

        let mut ids = [0u16; 3];
        let mut count = 0;
        for segment in trimmed.split('/') {
            if count == ids.len() {
                return Err(LwM2mError::MalformedPath(raw.to_string()));
            }
            ids[count] = parse_segment(segment).ok_or_else(|| {
                LwM2mError::MalformedPath(raw.to_string())
            })?;
            count += 1;
        }

        Ok(match count {
            1 => Self::object(ids[0]),
            2 => Self::instance(ids[0], ids[1]),
            _ => Self::resource(ids[0], ids[1], ids[2]),
        })
    }

    pub fn object_id(&self) -> u16 {
        self.object_id
    }

    pub fn instance_id(&self) -> Option<u16> {
        self.instance.map(|(iid, _)| iid)
    }

    pub fn resource_id(&self) -> Option<u16> {
        self.instance.and_then(|(_, rid)| rid)
    }

    /// Classify the path
    pub fn level(&self) -> PathLevel {
        match self.instance {
            None => PathLevel::Object,
            Some((_, None)) => PathLevel::Instance,
            Some((_, Some(_))) => PathLevel::Resource,
        }
    }

    pub fn is_object(&self) -> bool {
        self.level() == PathLevel::Object
    }

    pub fn is_instance(&self) -> bool {
        self.level() == PathLevel::Instance
    }

    pub fn is_resource(&self) -> bool {
        self.level() == PathLevel::Resource
    }

    /// The enclosing path, or `None` for an object path
    pub fn parent(&self) -> Option<Self> {
        match self.instance {
            None => None,
            Some((_, None)) => Some(Self::object(self.object_id)),
            Some((iid, Some(_))) => Some(Self::instance(self.object_id, iid)),
        }
    }

    /// Child of an object or instance path
    pub fn child(&self, id: u16) -> Option<Self> {
        match self.instance {
            None => Some(Self::instance(self.object_id, id)),
            Some((iid, None)) => Some(Self::resource(self.object_id, iid, id)),
            Some((_, Some(_))) => None,
        }
    }

    /// Whether `other` is this path or lies below it
    pub fn contains(&self, other: &Path) -> bool {
        if self.object_id != other.object_id {
            return false;
        }
        match (self.instance, other.instance) {
            (None, _) => true,
            (Some((a, None)), Some((b, _))) => a == b,
            (Some((a, Some(ra))), Some((b, Some(rb)))) => a == b && ra == rb,
            _ => false,
        }
    }
}

fn parse_segment(segment: &str) -> Option<u16> {
    // u16::from_str accepts a leading '+', which is not a valid segment
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.object_id)?;
        if let Some((iid, rid)) = self.instance {
            write!(f, "/{}", iid)?;
            if let Some(rid) = rid {
                write!(f, "/{}", rid)?;
            }
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = LwM2mError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!(Path::parse("/3").unwrap().level(), PathLevel::Object);
        assert_eq!(Path::parse("/3/0").unwrap().level(), PathLevel::Instance);
        assert_eq!(
            Path::parse("/3/0/1").unwrap(),
            Path::resource(3, 0, 1)
        );
        assert_eq!(Path::parse("3/0/").unwrap(), Path::instance(3, 0));
    }

    #[test]
    fn test_parse_malformed() {
        for raw in [
            "", "/", "/a", "/3/-1", "/-3", "/3//1", "/3/0/1/2", "/3/x/1", "/+3", "/70000", "//3",
        ] {
            assert!(
                matches!(Path::parse(raw), Err(LwM2mError::MalformedPath(_))),
                "expected {raw:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_parent_and_contains() {
        let res = Path::resource(3, 0, 1);
        assert_eq!(res.parent(), Some(Path::instance(3, 0)));
        assert_eq!(Path::instance(3, 0).parent(), Some(Path::object(3)));
        assert_eq!(Path::object(3).parent(), None);

        assert!(Path::object(3).contains(&res));
        assert!(Path::instance(3, 0).contains(&res));
        assert!(!Path::instance(3, 1).contains(&res));
        assert!(!res.contains(&Path::instance(3, 0)));
        assert_eq!(Path::instance(3, 0).child(7), Some(Path::resource(3, 0, 7)));
    }

    fn arb_path() -> impl Strategy<Value = Path> {
        prop_oneof![
            any::<u16>().prop_map(Path::object),
            (any::<u16>(), any::<u16>()).prop_map(|(o, i)| Path::instance(o, i)),
            (any::<u16>(), any::<u16>(), any::<u16>())
                .prop_map(|(o, i, r)| Path::resource(o, i, r)),
        ]
    }

    proptest! {
        #[test]
        fn test_path_display_parse_roundtrip(path in arb_path()) {
            prop_assert_eq!(Path::parse(&path.to_string()).unwrap(), path);
        }

        #[test]
        fn test_non_numeric_segment_rejected(
            head in 0u16..100,
            bad in "[a-z\\-][a-z0-9]{0,4}",
        ) {
            let raw = format!("/{head}/{bad}");
            prop_assert!(matches!(Path::parse(&raw), Err(LwM2mError::MalformedPath(_))));
        }
    }
}
