//! Work buckets and bucket narrowing
//!
//! A bucket is an opaque slice of an object collection handed to exactly one
//! run. How buckets are generated and assigned happens upstream; this module
//! only turns a bucket into a filter restriction.

use super::query::{Filter, ObjectType};
use crate::error::ScanError;

use serde::{Deserialize, Serialize};

/// Boundary descriptor of one bucket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum BucketContent {
    /// No partitioning: the whole collection.
    Null,
    /// Numeric half-open interval `[from, to)` over the discriminator attribute.
    NumericInterval {
        discriminator: Option<String>,
        from: Option<i64>,
        to: Option<i64>,
    },
    /// Hash partition `index` out of `count` over the discriminator attribute.
    HashPartition {
        discriminator: Option<String>,
        index: u32,
        count: u32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkBucket {
    pub sequential_number: u32,
    pub content: BucketContent,
}

impl WorkBucket {
    pub fn interval(sequential_number: u32, path: &str, from: i64, to: i64) -> Self {
        Self {
            sequential_number,
            content: BucketContent::NumericInterval {
                discriminator: Some(path.to_string()),
                from: Some(from),
                to: Some(to),
            },
        }
    }

    pub fn hash_partition(sequential_number: u32, path: &str, index: u32, count: u32) -> Self {
        Self {
            sequential_number,
            content: BucketContent::HashPartition {
                discriminator: Some(path.to_string()),
                index,
                count,
            },
        }
    }
}

/// Result of narrowing a filter by a bucket.
#[derive(Debug, Clone, PartialEq)]
pub enum Narrowing {
    /// The bucket does not limit the scan.
    NoNarrowing,
    /// The filter restricted to the bucket (possibly `Filter::None`).
    Narrowed(Filter),
}

/// Supplies the attribute a bucket discriminates on when the bucket itself
/// does not name one.
pub trait AttributeResolver: Send + Sync {
    fn resolve(&self, object_type: ObjectType) -> Option<String>;
}

/// Resolves every object type to the same attribute.
pub struct FixedAttribute(pub String);

impl AttributeResolver for FixedAttribute {
    fn resolve(&self, _object_type: ObjectType) -> Option<String> {
        Some(self.0.clone())
    }
}

pub trait BucketNarrowing: Send + Sync {
    fn narrow(
        &self,
        filter: &Filter,
        object_type: ObjectType,
        resolver: Option<&dyn AttributeResolver>,
        bucket: Option<&WorkBucket>,
    ) -> Result<Narrowing, ScanError>;
}

/// Narrowing for the bucket contents defined in this module.
#[derive(Debug, Default)]
pub struct StandardBucketNarrowing;

impl StandardBucketNarrowing {
    fn discriminator(
        declared: &Option<String>,
        object_type: ObjectType,
        resolver: Option<&dyn AttributeResolver>,
    ) -> Result<String, ScanError> {
        declared
            .clone()
            .or_else(|| resolver.and_then(|r| r.resolve(object_type)))
            .ok_or_else(|| {
                ScanError::Configuration(format!(
                    "bucket declares no discriminator and none is known for {}",
                    object_type
                ))
            })
    }
}

impl BucketNarrowing for StandardBucketNarrowing {
    fn narrow(
        &self,
        filter: &Filter,
        object_type: ObjectType,
        resolver: Option<&dyn AttributeResolver>,
        bucket: Option<&WorkBucket>,
    ) -> Result<Narrowing, ScanError> {
        let Some(bucket) = bucket else {
            return Ok(Narrowing::NoNarrowing);
        };

        match &bucket.content {
            BucketContent::Null => Ok(Narrowing::NoNarrowing),

            BucketContent::NumericInterval {
                discriminator,
                from,
                to,
            } => {
                if from.is_none() && to.is_none() {
                    return Ok(Narrowing::NoNarrowing);
                }
                if let (Some(f), Some(t)) = (from, to)
                    && f >= t
                {
                    return Ok(Narrowing::Narrowed(Filter::None));
                }
                let path = Self::discriminator(discriminator, object_type, resolver)?;
                Ok(Narrowing::Narrowed(filter.clone().and(Filter::Range {
                    path,
                    from: *from,
                    to: *to,
                })))
            }

            BucketContent::HashPartition {
                discriminator,
                index,
                count,
            } => {
                if *count == 0 || index >= count {
                    return Err(ScanError::Configuration(format!(
                        "invalid hash partition {} of {}",
                        index, count
                    )));
                }
                if *count == 1 {
                    return Ok(Narrowing::NoNarrowing);
                }
                let path = Self::discriminator(discriminator, object_type, resolver)?;
                Ok(Narrowing::Narrowed(filter.clone().and(Filter::HashBucket {
                    path,
                    bucket: *index,
                    of: *count,
                })))
            }
        }
    }
}
