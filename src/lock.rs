//! 分段锁 - 固定数量的条带锁与有序多锁获取

use crossbeam_utils::Backoff;
use std::sync::atomic::{AtomicBool, Ordering};

/// TTAS自旋锁
///
/// 等待期间只做本地读自旋并指数退避，避免缓存行乒乓。
pub struct StripeLock {
    locked: AtomicBool,
}

impl StripeLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    pub fn lock(&self) {
        let backoff = Backoff::new();
        while self.locked.swap(true, Ordering::Acquire) {
            while self.locked.load(Ordering::Relaxed) {
                backoff.snooze();
            }
        }
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

impl Default for StripeLock {
    fn default() -> Self {
        Self::new()
    }
}

/// 一组已持有的条带锁，Drop时整体释放
///
/// 任何提前返回路径都经由Drop释放全部锁，不存在部分解锁状态。
pub struct LockSet<'a> {
    held: Vec<&'a StripeLock>,
}

impl<'a> LockSet<'a> {
    fn with_capacity(n: usize) -> Self {
        Self {
            held: Vec::with_capacity(n),
        }
    }

    fn acquire(&mut self, lock: &'a StripeLock) {
        lock.lock();
        self.held.push(lock);
    }

    /// 显式提前释放（等价于drop）
    pub fn unlock(self) {}
}

impl Drop for LockSet<'_> {
    fn drop(&mut self) {
        // 按获取顺序的逆序释放
        while let Some(lock) = self.held.pop() {
            lock.unlock();
        }
    }
}

/// 分段锁管理器
///
/// 固定 `concurrency_level` 把锁，桶索引按模映射到条带，锁数量与
/// 桶数量解耦。多锁获取一律按条带索引升序进行：任意线程同一时刻
/// 最多只会等待一把比自己已持有的锁索引更高的锁，这是全局唯一的
/// 死锁预防机制，任何路径都不允许例外。
pub struct LockManager {
    stripes: Box<[StripeLock]>,
}

impl LockManager {
    pub fn new(concurrency_level: usize) -> Self {
        assert!(concurrency_level > 0, "并发级别必须大于0");
        let stripes = (0..concurrency_level).map(|_| StripeLock::new()).collect();
        Self { stripes }
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// 桶索引到条带索引的映射
    pub fn stripe_of(&self, bucket_index: usize) -> usize {
        bucket_index % self.stripes.len()
    }

    pub fn lock_one(&self, i: usize) -> LockSet<'_> {
        let mut set = LockSet::with_capacity(1);
        set.acquire(&self.stripes[i]);
        set
    }

    /// 锁两个条带，升序获取，落在同一条带时去重
    pub fn lock_pair(&self, i: usize, j: usize) -> LockSet<'_> {
        let (lo, hi) = if i <= j { (i, j) } else { (j, i) };
        let mut set = LockSet::with_capacity(2);
        set.acquire(&self.stripes[lo]);
        if hi != lo {
            set.acquire(&self.stripes[hi]);
        }
        set
    }

    /// 锁任意条带子集，排序去重后升序获取
    pub fn lock_many(&self, mut indices: Vec<usize>) -> LockSet<'_> {
        indices.sort_unstable();
        indices.dedup();
        let mut set = LockSet::with_capacity(indices.len());
        for i in indices {
            set.acquire(&self.stripes[i]);
        }
        set
    }

    /// 锁从 `start` 到末尾的连续后缀
    pub fn lock_all_from(&self, start: usize) -> LockSet<'_> {
        let mut set = LockSet::with_capacity(self.stripes.len().saturating_sub(start));
        for lock in &self.stripes[start..] {
            set.acquire(lock);
        }
        set
    }
}
