//! 集合核心 - 桶表与编排逻辑

pub mod bucket;
pub mod cuckoo_set;

pub use bucket::{Bucket, BucketTable, Slot};
pub use cuckoo_set::{CuckooHashSet, CuckooSetConfig};
