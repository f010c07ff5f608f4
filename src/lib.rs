//! 基于分段锁的高并发Cuckoo哈希集合
//!
//! 每个元素驻留在两个候选桶之一；插入受阻时沿交替桶链随机游走，
//! 把空位逐步换回目标桶（cuckoo驱逐）。并发控制采用固定数量的
//! 分段自旋锁（锁数量与桶数量解耦），配合"快照/校验"乐观协议：
//! 操作开始时记录桶数量快照，提交前校验快照未失效，失效则整体重试。
//!
//! ## 主要特性
//! - 细粒度分段锁，锁数量固定，表扩容不增加锁开销
//! - 驱逐分为"探测"与"提交"两阶段，探测只短暂持单锁
//! - 在线扩容：stripe 0 作为单写者闸门，全锁独占后倍增桶数量
//! - 所有公开操作返回确定的bool结果，内部冲突自动重试
//!
//! ## 快速开始
//!
//! ```rust
//! use cuckoo_hashset::CuckooHashSet;
//!
//! let set: CuckooHashSet<u64> = CuckooHashSet::new();
//! assert!(set.insert(42));
//! assert!(set.contains(&42));
//! assert!(set.remove(&42));
//! assert_eq!(set.len(), 0);
//! ```

#![warn(clippy::all)]

#[cfg(feature = "logging")]
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        log::debug!($($arg)*)
    };
}

#[cfg(feature = "logging")]
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        log::info!($($arg)*)
    };
}

#[cfg(feature = "logging")]
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        log::warn!($($arg)*)
    };
}

#[cfg(not(feature = "logging"))]
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{}};
}

#[cfg(not(feature = "logging"))]
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{}};
}

#[cfg(not(feature = "logging"))]
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{}};
}

// 核心模块
pub mod error;
pub mod hash;
pub mod lock;
pub mod set;

// 公共接口导出
pub use crate::{
    error::CuckooError,
    hash::{CuckooHasher, ElementHash},
    lock::{LockManager, LockSet, StripeLock},
    set::{
        bucket::{Bucket, BucketTable, Slot},
        cuckoo_set::{CuckooHashSet, CuckooSetConfig},
    },
};
