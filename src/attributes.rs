//! Write-attributes: notification attributes attached to a path
//!
//! Parsed from Uri-Query options of a PUT (`pmin=10`, `gt=20.5`, ...).

use std::fmt;

use crate::error::{LwM2mError, Result};
use crate::path::Path;

/// Notification attributes for one path
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Attributes {
    /// Minimum period between notifications, seconds
    pub min_period: Option<u32>,
    /// Maximum period between notifications, seconds
    pub max_period: Option<u32>,
    /// Notify when the value rises above
    pub greater_than: Option<f64>,
    /// Notify when the value falls below
    pub less_than: Option<f64>,
    /// Notify when the value moves by at least
    pub step: Option<f64>,
}

/// A parsed write-attributes request
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttributeUpdate {
    /// Merge the given attributes into the stored ones
    Set(Attributes),
    /// Remove all attributes stored for the path
    Cancel,
}

impl Attributes {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overlay `other` on top of `self`
    pub fn merge(&self, other: &Attributes) -> Attributes {
        Attributes {
            min_period: other.min_period.or(self.min_period),
            max_period: other.max_period.or(self.max_period),
            greater_than: other.greater_than.or(self.greater_than),
            less_than: other.less_than.or(self.less_than),
            step: other.step.or(self.step),
        }
    }

    /// Check the combination for a given target path
    pub fn validate(&self, path: &Path) -> Result<()> {
        let invalid = |msg: String| Err(LwM2mError::InvalidAttributes(msg));

        if let (Some(min), Some(max)) = (self.min_period, self.max_period)
            && min > max
        {
            return invalid(format!("pmin {min} > pmax {max}"));
        }
        let has_threshold =
            self.greater_than.is_some() || self.less_than.is_some() || self.step.is_some();
        if has_threshold && !path.is_resource() {
            return invalid(format!("gt/lt/st only apply to resources, not {path}"));
        }
        if let (Some(lt), Some(gt)) = (self.less_than, self.greater_than)
            && lt >= gt
        {
            return invalid(format!("lt {lt} >= gt {gt}"));
        }
        if let Some(st) = self.step
            && st < 0.0
        {
            return invalid(format!("st {st} is negative"));
        }
        Ok(())
    }
}

impl AttributeUpdate {
    /// Parse Uri-Query options
    ///
    /// Returns `Ok(None)` when no query options are present.
    pub fn parse<S: AsRef<str>>(queries: &[S]) -> Result<Option<Self>> {
        if queries.is_empty() {
            return Ok(None);
        }

        let mut attrs = Attributes::default();
        let mut cancel = false;
        for query in queries {
            let query = query.as_ref();
            let (key, value) = match query.split_once('=') {
                Some((k, v)) => (k, Some(v)),
                None => (query, None),
            };
            match (key, value) {
                ("cancel", None) => cancel = true,
                ("pmin", Some(v)) => attrs.min_period = Some(parse_period(key, v)?),
                ("pmax", Some(v)) => attrs.max_period = Some(parse_period(key, v)?),
                ("gt", Some(v)) => attrs.greater_than = Some(parse_number(key, v)?),
                ("lt", Some(v)) => attrs.less_than = Some(parse_number(key, v)?),
                ("st", Some(v)) => attrs.step = Some(parse_number(key, v)?),
                _ => {
                    return Err(LwM2mError::InvalidAttributes(format!(
                        "unsupported attribute: {query}"
                    )));
                }
            }
        }

        if cancel {
            if !attrs.is_empty() {
                return Err(LwM2mError::InvalidAttributes(
                    "cancel cannot be combined with other attributes".into(),
                ));
            }
            return Ok(Some(Self::Cancel));
        }
        Ok(Some(Self::Set(attrs)))
    }
}

fn parse_period(key: &str, value: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| LwM2mError::InvalidAttributes(format!("{key}={value} is not a period")))
}

fn parse_number(key: &str, value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| LwM2mError::InvalidAttributes(format!("{key}={value} is not a number")))
}

impl fmt::Display for Attributes {
    /// Link-format parameters, e.g. `;pmin=10;gt=5`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(v) = self.min_period {
            write!(f, ";pmin={v}")?;
        }
        if let Some(v) = self.max_period {
            write!(f, ";pmax={v}")?;
        }
        if let Some(v) = self.greater_than {
            write!(f, ";gt={v}")?;
        }
        if let Some(v) = self.less_than {
            write!(f, ";lt={v}")?;
        }
        if let Some(v) = self.step {
            write!(f, ";st={v}")?;
        }
        Ok(())
    }
}
