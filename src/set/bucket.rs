//! 桶表 - 槽位、定宽桶与可整体替换的桶数组

use crate::hash::ElementHash;
use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 单个槽位：空或持有一个元素及其哈希对
///
/// 槽内存储的哈希对始终以所在桶为主候选：插入交替桶或被驱逐
/// 搬移时先调用 `alternate` 再落位。仅在持有所属条带锁时可变。
pub struct Slot<T> {
    entry: Option<(T, ElementHash)>,
}

impl<T> Slot<T> {
    fn empty() -> Self {
        Self { entry: None }
    }

    pub fn is_occupied(&self) -> bool {
        self.entry.is_some()
    }

    pub fn element(&self) -> Option<&T> {
        self.entry.as_ref().map(|(element, _)| element)
    }

    pub fn hash(&self) -> Option<ElementHash> {
        self.entry.as_ref().map(|(_, hash)| *hash)
    }

    pub fn set(&mut self, element: T, hash: ElementHash) {
        debug_assert!(self.entry.is_none(), "不能覆盖已占用的槽位");
        self.entry = Some((element, hash));
    }

    pub fn clear(&mut self) -> Option<(T, ElementHash)> {
        self.entry.take()
    }
}

/// 定宽桶：构造时确定槽位数量，之后不变
pub struct Bucket<T> {
    slots: Box<[Slot<T>]>,
}

impl<T> Bucket<T> {
    pub fn new(width: usize) -> Self {
        let slots = (0..width).map(|_| Slot::empty()).collect();
        Self { slots }
    }

    pub fn width(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> &Slot<T> {
        &self.slots[index]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut Slot<T> {
        &mut self.slots[index]
    }

    /// 第一个空槽位的下标
    pub fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|slot| !slot.is_occupied())
    }

    pub fn occupied_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_occupied())
            .map(|(index, _)| index)
    }

    /// 线性扫描查找元素
    pub fn find<Q>(&self, element: &Q) -> Option<usize>
    where
        T: PartialEq<Q>,
    {
        self.slots.iter().position(|slot| {
            slot.element()
                .map(|occupant| occupant == element)
                .unwrap_or(false)
        })
    }
}

impl<T> fmt::Debug for Bucket<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let occupied = self.occupied_slots().count();
        write!(f, "Bucket({}/{})", occupied, self.slots.len())
    }
}

/// 可在线扩容的桶数组
///
/// `bucket_count` 是快照/校验协议的基准：操作开始时读取一次，
/// 所有桶索引计算复用该快照，提交前与实时值比对。数组本体仅在
/// 持有全部条带锁时才可整体替换，单个桶仅在持有对应条带锁时可访问，
/// 访问方法因此标记为 `unsafe`，由调用侧保证锁契约。
///
/// `size` 是独立的原子计数，只做簿记，不参与桶级不变式。
pub struct BucketTable<T> {
    buckets: UnsafeCell<Vec<Bucket<T>>>,
    bucket_count: AtomicUsize,
    size: AtomicUsize,
    bucket_width: usize,
}

// SAFETY: 桶数组的一切访问都由条带锁串行化（访问方法的unsafe契约），
// 原子字段本身线程安全，因此 T: Send 时跨线程共享是安全的。
unsafe impl<T: Send> Sync for BucketTable<T> {}

impl<T> BucketTable<T> {
    pub fn new(bucket_count: usize, bucket_width: usize) -> Self {
        assert!(bucket_count > 1, "桶数量必须大于1");
        assert!(bucket_width > 0, "桶宽度必须大于0");
        let buckets = Self::allocate_buckets(bucket_count, bucket_width);
        Self {
            buckets: UnsafeCell::new(buckets),
            bucket_count: AtomicUsize::new(bucket_count),
            size: AtomicUsize::new(0),
            bucket_width,
        }
    }

    pub fn allocate_buckets(bucket_count: usize, bucket_width: usize) -> Vec<Bucket<T>> {
        (0..bucket_count).map(|_| Bucket::new(bucket_width)).collect()
    }

    /// 当前桶数量（快照协议的读取点）
    pub fn bucket_count(&self) -> usize {
        self.bucket_count.load(Ordering::SeqCst)
    }

    pub fn bucket_width(&self) -> usize {
        self.bucket_width
    }

    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 元素计数自增（簿记，不要求与槽位状态瞬时一致）
    pub fn increment_size(&self) {
        self.size.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_size(&self) {
        self.size.fetch_sub(1, Ordering::Relaxed);
    }

    /// 只读访问一个桶
    ///
    /// # Safety
    /// 调用者必须持有覆盖 `index` 的条带锁，且 `index` 在当前桶数量内。
    pub unsafe fn bucket(&self, index: usize) -> &Bucket<T> {
        &(&*self.buckets.get())[index]
    }

    /// 可变访问一个桶
    ///
    /// # Safety
    /// 同 [`bucket`](Self::bucket)；同一时刻不得对同一桶持有其他引用。
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn bucket_mut(&self, index: usize) -> &mut Bucket<T> {
        &mut (&mut *self.buckets.get())[index]
    }

    /// 整体替换桶数组并发布新桶数量
    ///
    /// # Safety
    /// 调用者必须独占全部条带锁（扩容路径）。
    pub unsafe fn replace_buckets(&self, new_buckets: Vec<Bucket<T>>) {
        let new_count = new_buckets.len();
        *self.buckets.get() = new_buckets;
        self.bucket_count.store(new_count, Ordering::SeqCst);
    }

    /// 取出全部已占用槽位的条目，桶数组就地清空
    ///
    /// # Safety
    /// 调用者必须独占全部条带锁。
    pub unsafe fn drain_entries(&self) -> Vec<(T, ElementHash)> {
        let buckets = &mut *self.buckets.get();
        let mut entries = Vec::with_capacity(self.len());
        for bucket in buckets.iter_mut() {
            for index in 0..bucket.width() {
                if let Some(entry) = bucket.slot_mut(index).clear() {
                    entries.push(entry);
                }
            }
        }
        entries
    }
}

impl<T> fmt::Debug for BucketTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketTable")
            .field("bucket_count", &self.bucket_count())
            .field("bucket_width", &self.bucket_width)
            .field("size", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::CuckooHasher;

    #[test]
    fn test_slot_lifecycle() {
        let hash = <CuckooHasher>::default().hash(&7u64);
        let mut slot: Slot<u64> = Slot::empty();
        assert!(!slot.is_occupied());

        slot.set(7, hash);
        assert!(slot.is_occupied());
        assert_eq!(slot.element(), Some(&7));
        assert_eq!(slot.hash(), Some(hash));

        let (element, _) = slot.clear().unwrap();
        assert_eq!(element, 7);
        assert!(!slot.is_occupied(), "清除后槽位应为空");
    }

    #[test]
    fn test_bucket_find_and_free_slot() {
        let hasher: CuckooHasher = CuckooHasher::default();
        let mut bucket: Bucket<u64> = Bucket::new(4);
        assert_eq!(bucket.free_slot(), Some(0));
        assert_eq!(bucket.find(&1), None);

        bucket.slot_mut(0).set(1, hasher.hash(&1u64));
        bucket.slot_mut(1).set(2, hasher.hash(&2u64));
        assert_eq!(bucket.find(&2), Some(1));
        assert_eq!(bucket.free_slot(), Some(2));
        assert_eq!(bucket.occupied_slots().count(), 2);
    }

    #[test]
    fn test_table_replace_and_drain() {
        let hasher: CuckooHasher = CuckooHasher::default();
        let table: BucketTable<u64> = BucketTable::new(4, 2);
        assert_eq!(table.bucket_count(), 4);

        // 单线程测试，无并发访问，锁契约平凡成立
        unsafe {
            table.bucket_mut(1).slot_mut(0).set(10, hasher.hash(&10u64));
            table.bucket_mut(3).slot_mut(1).set(11, hasher.hash(&11u64));
        }
        table.increment_size();
        table.increment_size();

        let entries = unsafe { table.drain_entries() };
        assert_eq!(entries.len(), 2);

        unsafe { table.replace_buckets(BucketTable::allocate_buckets(8, 2)) };
        assert_eq!(table.bucket_count(), 8);
        assert!(unsafe { table.bucket(1) }.free_slot().is_some());
    }
}
