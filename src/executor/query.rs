//! Query model for iterative scans: object types, filters, search options and
//! the scanned objects themselves.

use crate::error::ScanError;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Object types a scan can target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    User,
    Role,
    Org,
    Service,
    Shadow,
    Resource,
    Task,
    Node,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::User => "user",
            ObjectType::Role => "role",
            ObjectType::Org => "org",
            ObjectType::Service => "service",
            ObjectType::Shadow => "shadow",
            ObjectType::Resource => "resource",
            ObjectType::Task => "task",
            ObjectType::Node => "node",
        }
    }
}

impl FromStr for ObjectType {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(ObjectType::User),
            "role" => Ok(ObjectType::Role),
            "org" => Ok(ObjectType::Org),
            "service" => Ok(ObjectType::Service),
            "shadow" => Ok(ObjectType::Shadow),
            "resource" => Ok(ObjectType::Resource),
            "task" => Ok(ObjectType::Task),
            "node" => Ok(ObjectType::Node),
            other => Err(ScanError::Configuration(format!(
                "unsupported object type '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One object yielded by a search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectRecord {
    pub id: String,
    pub object_type: ObjectType,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl ObjectRecord {
    pub fn new(id: impl Into<String>, object_type: ObjectType) -> Self {
        Self {
            id: id.into(),
            object_type,
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    /// Attribute lookup; `id` resolves to the object id.
    pub fn value(&self, path: &str) -> Option<Value> {
        if path == "id" {
            return Some(Value::String(self.id.clone()));
        }
        self.attributes.get(path).cloned()
    }
}

/// Search filter. Narrowing only ever conjoins (`and`), so a filter cannot
/// get wider once a bucket has been applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Filter {
    /// Matches everything.
    All,
    /// Matches nothing.
    None,
    Equal {
        path: String,
        value: Value,
    },
    /// Numeric half-open interval `[from, to)`.
    Range {
        path: String,
        from: Option<i64>,
        to: Option<i64>,
    },
    /// Stable hash of the attribute value modulo `of` equals `bucket`.
    HashBucket {
        path: String,
        bucket: u32,
        of: u32,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn is_none(&self) -> bool {
        matches!(self, Filter::None)
    }

    /// Conjunction with basic simplification.
    pub fn and(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::None, _) | (_, Filter::None) => Filter::None,
            (Filter::And(mut left), Filter::And(right)) => {
                left.extend(right);
                Filter::And(left)
            }
            (Filter::And(mut left), f) => {
                left.push(f);
                Filter::And(left)
            }
            (f, Filter::And(mut right)) => {
                right.insert(0, f);
                Filter::And(right)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    pub fn matches(&self, object: &ObjectRecord) -> bool {
        match self {
            Filter::All => true,
            Filter::None => false,
            Filter::Equal { path, value } => object.value(path).as_ref() == Some(value),
            Filter::Range { path, from, to } => match object.value(path).and_then(|v| v.as_i64()) {
                Some(n) => from.is_none_or(|f| n >= f) && to.is_none_or(|t| n < t),
                None => false,
            },
            Filter::HashBucket { path, bucket, of } => match object.value(path) {
                Some(value) => *of > 0 && hash_bucket(&value, *of) == *bucket,
                None => false,
            },
            Filter::And(filters) => filters.iter().all(|f| f.matches(object)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(object)),
            Filter::Not(inner) => !inner.matches(object),
        }
    }
}

/// Bucket index of a value among `of` hash buckets.
///
/// Workers on different nodes must agree on the split, so the bucket comes
/// from a fixed digest (first 8 bytes of SHA-256, big endian) of the value's text.
pub fn hash_bucket(value: &Value, of: u32) -> u32 {
    let key = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % of as u64) as u32
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum IterationMethod {
    #[default]
    Default,
    /// Single streaming search.
    SimpleSearch,
    /// Paged search ordered by object id.
    KeyOrdered,
}

/// Fetch controls and iteration hints passed through to the object source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchOptions {
    #[serde(default)]
    pub iteration_method: IterationMethod,
    pub fetch_batch_size: Option<usize>,
    #[serde(default)]
    pub read_only: bool,
}
