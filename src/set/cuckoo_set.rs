//! Cuckoo哈希集合核心实现 - 编排、驱逐与在线扩容

use crate::{
    error::CuckooError,
    hash::{CuckooHasher, ElementHash},
    lock::{LockManager, LockSet},
    set::bucket::{Bucket, BucketTable},
};
use ahash::RandomState;
use rand::Rng;
use std::fmt;
use std::hash::{BuildHasher, Hash};

/// 哈希集合配置
#[derive(Clone, Debug)]
pub struct CuckooSetConfig {
    /// 条带锁数量，表生命周期内固定
    pub concurrency_level: usize,
    /// 每桶槽位数，固定
    pub bucket_width: usize,
    /// 单次随机游走的最大路径长度
    pub max_path_length: usize,
    /// 每次路径搜索允许的游走次数
    pub max_path_retries: usize,
    /// 每次驱逐允许的搜索+提交轮数
    pub max_evict_retries: usize,
}

impl Default for CuckooSetConfig {
    fn default() -> Self {
        Self {
            concurrency_level: 32,
            bucket_width: 4,
            max_path_length: 10,
            max_path_retries: 16,
            max_evict_retries: 16,
        }
    }
}

impl CuckooSetConfig {
    /// 初始桶数量由并发级别派生
    fn initial_bucket_count(&self) -> usize {
        (self.concurrency_level * 2).max(4)
    }
}

/// 驱逐路径上的一个落点
#[derive(Debug, Clone, Copy)]
struct PathSlot {
    bucket: usize,
    slot: usize,
}

/// 以空槽位收尾的增广路径
type CuckooPath = Vec<PathSlot>;

/// 分段锁并发Cuckoo哈希集合
///
/// 每个公开操作都是一个尝试循环：记录桶数量快照，用快照计算两个
/// 候选桶并加锁，校验快照仍然有效后执行。并发扩容使快照失效
/// （[`CuckooError::TableExpanded`]）则整体重试；驱逐预算耗尽
/// （[`CuckooError::TableOvercrowded`]）则先扩容再重试。两种信号
/// 都不会穿透到调用者，公开操作总是返回确定的bool。
pub struct CuckooHashSet<T, S = RandomState> {
    hasher: CuckooHasher<S>,
    lock_manager: LockManager,
    table: BucketTable<T>,
    config: CuckooSetConfig,
}

impl<T: Hash + Eq> CuckooHashSet<T> {
    pub fn new() -> Self {
        Self::with_config(CuckooSetConfig::default())
    }

    pub fn with_config(config: CuckooSetConfig) -> Self {
        Self::with_hasher(config, RandomState::new())
    }
}

impl<T: Hash + Eq> Default for CuckooHashSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Hash + Eq, S: BuildHasher> CuckooHashSet<T, S> {
    /// 使用自定义标量哈希器构造
    pub fn with_hasher(config: CuckooSetConfig, build_hasher: S) -> Self {
        assert!(config.bucket_width > 0, "桶宽度必须大于0");
        assert!(config.max_path_length > 0, "路径长度上限必须大于0");
        let bucket_count = config.initial_bucket_count();
        Self {
            hasher: CuckooHasher::with_hasher(build_hasher),
            lock_manager: LockManager::new(config.concurrency_level),
            table: BucketTable::new(bucket_count, config.bucket_width),
            config,
        }
    }

    /// 当前元素数量（簿记值，静止点精确）
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// 负载因子 = 元素数量 / (桶数量 × 桶宽度)
    pub fn load_factor(&self) -> f64 {
        let capacity = self.table.bucket_count() * self.table.bucket_width();
        self.table.len() as f64 / capacity as f64
    }

    /// 插入元素，当且仅当此前不存在时返回true
    pub fn insert(&self, element: T) -> bool {
        let hash = self.hasher.hash(&element);
        let mut pending = Some(element);
        loop {
            let expected = self.table.bucket_count();
            match self.try_insert(&mut pending, hash, expected) {
                Ok(inserted) => return inserted,
                Err(CuckooError::TableExpanded) => {
                    log_debug!("insert: 表已扩容，携带新快照重试");
                }
                Err(CuckooError::TableOvercrowded) => {
                    log_info!("insert: 表过度拥挤，触发扩容");
                    self.expand(expected);
                }
            }
        }
    }

    /// 删除元素，当且仅当存在并被删除时返回true
    pub fn remove(&self, element: &T) -> bool {
        let hash = self.hasher.hash(element);
        loop {
            let expected = self.table.bucket_count();
            match self.try_remove(element, hash, expected) {
                Ok(removed) => return removed,
                Err(_) => log_debug!("remove: 表已扩容，重试"),
            }
        }
    }

    /// 成员测试，不做任何修改
    pub fn contains(&self, element: &T) -> bool {
        let hash = self.hasher.hash(element);
        loop {
            let expected = self.table.bucket_count();
            match self.try_contains(element, hash, expected) {
                Ok(found) => return found,
                Err(_) => log_debug!("contains: 表已扩容，重试"),
            }
        }
    }

    // ---- 单次尝试（快照 → 加锁 → 校验 → 执行） ----

    fn try_contains(
        &self,
        element: &T,
        hash: ElementHash,
        expected: usize,
    ) -> Result<bool, CuckooError> {
        let (primary, alternate) = self.candidate_buckets(hash, expected);
        let _guard = self.lock_buckets(primary, alternate);
        self.validate(expected)?;

        // SAFETY: 持有两候选桶的条带锁
        let found = unsafe {
            self.table.bucket(primary).find(element).is_some()
                || self.table.bucket(alternate).find(element).is_some()
        };
        Ok(found)
    }

    fn try_remove(
        &self,
        element: &T,
        hash: ElementHash,
        expected: usize,
    ) -> Result<bool, CuckooError> {
        let (primary, alternate) = self.candidate_buckets(hash, expected);
        let _guard = self.lock_buckets(primary, alternate);
        self.validate(expected)?;

        for bucket_index in [primary, alternate] {
            // SAFETY: 持有两候选桶的条带锁
            unsafe {
                if let Some(slot_index) = self.table.bucket(bucket_index).find(element) {
                    self.table
                        .bucket_mut(bucket_index)
                        .slot_mut(slot_index)
                        .clear();
                    self.table.decrement_size();
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn try_insert(
        &self,
        pending: &mut Option<T>,
        hash: ElementHash,
        expected: usize,
    ) -> Result<bool, CuckooError> {
        let (primary, alternate) = self.candidate_buckets(hash, expected);
        let mut rng = rand::thread_rng();
        loop {
            let use_alternate = {
                let _guard = self.lock_buckets(primary, alternate);
                self.validate(expected)?;

                let Some(element) = pending.as_ref() else {
                    return Ok(false);
                };
                // SAFETY: 持有两候选桶的条带锁
                let already_present = unsafe {
                    self.table.bucket(primary).find(element).is_some()
                        || self.table.bucket(alternate).find(element).is_some()
                };
                if already_present {
                    return Ok(false);
                }

                // 随机选边，均衡两个候选桶的负载
                let use_alternate = rng.gen_bool(0.5);
                let target = if use_alternate { alternate } else { primary };
                // SAFETY: 同上
                let bucket = unsafe { self.table.bucket_mut(target) };
                if let Some(slot_index) = bucket.free_slot() {
                    let Some(element) = pending.take() else {
                        return Ok(false);
                    };
                    let mut placed_hash = hash;
                    if use_alternate {
                        // 槽内哈希对以驻留桶为主候选
                        placed_hash.alternate();
                    }
                    bucket.slot_mut(slot_index).set(element, placed_hash);
                    self.table.increment_size();
                    return Ok(true);
                }
                use_alternate
            }; // 释放候选桶锁，驱逐自行取锁

            let target = if use_alternate { alternate } else { primary };
            self.evict(target, expected)?;
            // 回到循环头：重新加锁、重新校验、重查存在性后再落位。
            // 腾出的槽位可能已被并发插入占走，此时再次驱逐。
        }
    }

    // ---- 驱逐：随机游走搜索 + 校验式回移提交 ----

    /// 为 `start_bucket` 腾出一个空槽位
    fn evict(&self, start_bucket: usize, expected: usize) -> Result<(), CuckooError> {
        for _round in 0..self.config.max_evict_retries {
            let path = self.find_cuckoo_path(start_bucket, expected)?;
            if self.shift_hole_backward(&path, expected)? {
                log_debug!("evict: 提交成功，路径长度{}", path.len());
                return Ok(());
            }
            log_debug!("evict: 第{}轮提交校验失败，重新搜索", _round);
        }
        log_warn!("evict: {}轮驱逐尝试耗尽", self.config.max_evict_retries);
        Err(CuckooError::TableOvercrowded)
    }

    fn find_cuckoo_path(
        &self,
        start_bucket: usize,
        expected: usize,
    ) -> Result<CuckooPath, CuckooError> {
        for _ in 0..self.config.max_path_retries {
            if let Some(path) = self.random_walk(start_bucket, expected)? {
                return Ok(path);
            }
        }
        Err(CuckooError::TableOvercrowded)
    }

    /// 随机游走一条以空槽位收尾的路径
    ///
    /// 每步只持起点桶一把锁：桶内有空槽位则路径就此结束；否则随机挑
    /// 一个占用槽位记入路径，放锁后跳到它的交替桶继续。读到的内容
    /// 放锁后即可能过期，正确性由提交阶段逐步复核保证。
    fn random_walk(
        &self,
        start_bucket: usize,
        expected: usize,
    ) -> Result<Option<CuckooPath>, CuckooError> {
        let mut rng = rand::thread_rng();
        let mut path = CuckooPath::with_capacity(self.config.max_path_length);
        let mut bucket_index = start_bucket;
        for _ in 0..self.config.max_path_length {
            let guard = self
                .lock_manager
                .lock_one(self.lock_manager.stripe_of(bucket_index));
            self.validate(expected)?;

            // SAFETY: 持有该桶的条带锁
            let bucket = unsafe { self.table.bucket(bucket_index) };
            if let Some(free) = bucket.free_slot() {
                path.push(PathSlot {
                    bucket: bucket_index,
                    slot: free,
                });
                return Ok(Some(path));
            }

            let slot_index = rng.gen_range(0..bucket.width());
            let Some(occupant_hash) = bucket.slot(slot_index).hash() else {
                // 同一锁内free_slot扫描已排除空槽；按空槽收尾依然正确
                path.push(PathSlot {
                    bucket: bucket_index,
                    slot: slot_index,
                });
                return Ok(Some(path));
            };
            path.push(PathSlot {
                bucket: bucket_index,
                slot: slot_index,
            });
            let next = occupant_hash.alternate_bucket(expected);
            guard.unlock();
            bucket_index = next;
        }
        Ok(None)
    }

    /// 沿路径从尾到头把空位换回起始桶
    ///
    /// 每步锁相邻桶对并重新校验：源槽位已被并发清空则跳过（空位已
    /// 在更靠前的位置）；目标槽位被占、或源元素的交替桶不再指向
    /// 目标桶，说明探测结果过期，放弃整条路径交由上层重试。
    fn shift_hole_backward(
        &self,
        path: &CuckooPath,
        expected: usize,
    ) -> Result<bool, CuckooError> {
        for pair in path.windows(2).rev() {
            let (from, to) = (pair[0], pair[1]);
            let _guard = self.lock_buckets(from.bucket, to.bucket);
            self.validate(expected)?;

            // SAFETY: 持有两桶的条带锁；from与to必为不同桶
            unsafe {
                let Some(occupant_hash) = self.table.bucket(from.bucket).slot(from.slot).hash()
                else {
                    continue;
                };
                if self.table.bucket(to.bucket).slot(to.slot).is_occupied()
                    || occupant_hash.alternate_bucket(expected) != to.bucket
                {
                    return Ok(false);
                }
                let moved = self
                    .table
                    .bucket_mut(from.bucket)
                    .slot_mut(from.slot)
                    .clear();
                if let Some((element, mut hash)) = moved {
                    hash.alternate();
                    self.table
                        .bucket_mut(to.bucket)
                        .slot_mut(to.slot)
                        .set(element, hash);
                }
            }
        }
        Ok(true)
    }

    // ---- 扩容 ----

    /// 倍增桶数量并按新模数重放全部元素
    ///
    /// stripe 0 作为单写者闸门：拿到后若桶数量已不等于触发者的快照，
    /// 说明其他线程已完成扩容，直接返回。否则升序锁住其余全部条带
    /// （全表独占），倍增桶数量并把每个元素重放到新模数下的主候选桶；
    /// 交替侧的平衡交由后续驱逐按需恢复，不做即时重排。持旧快照的
    /// 在途操作会在下一次校验时发现失配并重启。
    fn expand(&self, expected: usize) {
        let _gate = self.lock_manager.lock_one(0);
        if self.table.bucket_count() != expected {
            log_debug!("expand: 其他线程已完成扩容");
            return;
        }
        let _rest = self.lock_manager.lock_all_from(1);

        // SAFETY: 已独占全部条带锁
        unsafe {
            let mut entries = self.table.drain_entries();
            let mut new_count = expected * 2;
            let new_buckets = loop {
                match Self::rehash_entries(entries, new_count, self.table.bucket_width()) {
                    Ok(buckets) => break buckets,
                    Err(returned) => {
                        entries = returned;
                        new_count *= 2;
                        log_debug!("expand: 重放溢出，继续倍增至{}", new_count);
                    }
                }
            };
            self.table.replace_buckets(new_buckets);
        }
        log_info!("expand: 桶数量 {} -> {}", expected, self.table.bucket_count());
    }

    /// 把条目重放到 `bucket_count` 个新桶，放不下则全部返还
    ///
    /// 首选主候选桶；主桶满时落交替桶（先交替哈希对以维持驻留侧
    /// 约定）。两侧都满说明新模数下仍过度聚集，由调用方再倍增。
    fn rehash_entries(
        entries: Vec<(T, ElementHash)>,
        bucket_count: usize,
        bucket_width: usize,
    ) -> Result<Vec<Bucket<T>>, Vec<(T, ElementHash)>> {
        let mut buckets = BucketTable::allocate_buckets(bucket_count, bucket_width);
        let mut overflow = Vec::new();
        for (element, mut hash) in entries {
            let primary = hash.primary_bucket(bucket_count);
            if let Some(slot) = buckets[primary].free_slot() {
                buckets[primary].slot_mut(slot).set(element, hash);
                continue;
            }
            let alternate = hash.alternate_bucket(bucket_count);
            if let Some(slot) = buckets[alternate].free_slot() {
                hash.alternate();
                buckets[alternate].slot_mut(slot).set(element, hash);
                continue;
            }
            overflow.push((element, hash));
        }
        if overflow.is_empty() {
            return Ok(buckets);
        }
        // 收回已落位的条目，连同溢出部分一起返还
        for bucket in buckets.iter_mut() {
            for index in 0..bucket.width() {
                if let Some(entry) = bucket.slot_mut(index).clear() {
                    overflow.push(entry);
                }
            }
        }
        Err(overflow)
    }

    // ---- 快照/校验辅助 ----

    /// 在同一快照下计算两个候选桶
    fn candidate_buckets(&self, hash: ElementHash, expected: usize) -> (usize, usize) {
        (
            hash.primary_bucket(expected),
            hash.alternate_bucket(expected),
        )
    }

    fn lock_buckets(&self, first: usize, second: usize) -> LockSet<'_> {
        self.lock_manager.lock_pair(
            self.lock_manager.stripe_of(first),
            self.lock_manager.stripe_of(second),
        )
    }

    /// 校验桶数量快照仍然有效
    fn validate(&self, expected: usize) -> Result<(), CuckooError> {
        if self.table.bucket_count() == expected {
            Ok(())
        } else {
            Err(CuckooError::TableExpanded)
        }
    }
}

impl<T: Hash + Eq, S: BuildHasher> fmt::Debug for CuckooHashSet<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CuckooHashSet")
            .field("size", &self.len())
            .field("bucket_count", &self.table.bucket_count())
            .field("load_factor", &self.load_factor())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operations() {
        let set: CuckooHashSet<u64> = CuckooHashSet::new();
        assert!(set.is_empty());

        assert!(set.insert(1));
        assert!(set.insert(2));
        assert!(!set.insert(1), "重复插入应返回false");
        assert_eq!(set.len(), 2);

        assert!(set.contains(&1));
        assert!(set.contains(&2));
        assert!(!set.contains(&3));

        assert!(set.remove(&1));
        assert!(!set.remove(&1), "重复删除应返回false");
        assert!(!set.contains(&1));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_insert_remove_round_trip() {
        let set: CuckooHashSet<String> = CuckooHashSet::new();
        assert!(set.insert("hello".to_string()));
        assert!(set.remove(&"hello".to_string()));
        assert!(!set.contains(&"hello".to_string()));
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_eviction_and_expansion_single_thread() {
        // 小表逼出驱逐与扩容路径
        let config = CuckooSetConfig {
            concurrency_level: 2,
            bucket_width: 2,
            ..CuckooSetConfig::default()
        };
        let set: CuckooHashSet<u64> = CuckooHashSet::with_config(config);

        const COUNT: u64 = 500;
        for key in 0..COUNT {
            assert!(set.insert(key), "插入{}应成功", key);
        }
        assert_eq!(set.len(), COUNT as usize);
        for key in 0..COUNT {
            assert!(set.contains(&key), "扩容后{}应仍可检索", key);
        }
        assert!(set.load_factor() > 0.0 && set.load_factor() <= 1.0);
    }

    #[test]
    fn test_load_factor_accounting() {
        let config = CuckooSetConfig {
            concurrency_level: 2,
            bucket_width: 4,
            ..CuckooSetConfig::default()
        };
        // 初始桶数量 = max(2*2, 4) = 4，容量 = 16
        let set: CuckooHashSet<u64> = CuckooHashSet::with_config(config);
        assert_eq!(set.load_factor(), 0.0);
        for key in 0..8 {
            set.insert(key);
        }
        assert!(set.load_factor() > 0.0 && set.load_factor() <= 0.5);
    }

    #[test]
    fn test_debug_format_reports_size() {
        let set: CuckooHashSet<u64> = CuckooHashSet::new();
        set.insert(9);
        let rendered = format!("{:?}", set);
        assert!(rendered.contains("size"), "Debug输出应包含size字段");
    }
}
