//! Cuckoo哈希对 - 主哈希值与交替增量的派生及桶定位

use ahash::RandomState;
use std::hash::{BuildHasher, Hash};

/// 交替增量派生用的混合乘数
const ALT_MIX: u64 = 1_349_110_179_037;

/// 元素的哈希对：主哈希值 + 16位交替增量（强制为奇数）
///
/// `alternate` 对主哈希值异或增量，异或自反，连续调用两次还原，
/// 因此一个哈希对恰好编码两个候选桶，与元素当前驻留侧无关。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHash {
    primary: u64,
    alt_delta: u16,
}

impl ElementHash {
    pub fn new(primary: u64, alt_delta: u16) -> Self {
        debug_assert!(alt_delta & 1 == 1, "交替增量必须为奇数");
        Self { primary, alt_delta }
    }

    pub fn primary(&self) -> u64 {
        self.primary
    }

    pub fn alt_delta(&self) -> u16 {
        self.alt_delta
    }

    /// 切换到另一个候选侧（自反变换）
    pub fn alternate(&mut self) {
        self.primary ^= self.alt_delta as u64;
    }

    /// 主候选桶
    pub fn primary_bucket(&self, bucket_count: usize) -> usize {
        (self.primary % bucket_count as u64) as usize
    }

    /// 交替候选桶
    ///
    /// 与主桶碰撞时翻转主哈希值最低位后再取模。桶数量始终为偶数，
    /// 所以翻转后必然落在不同桶（bucket_count > 1 时两候选恒不同）。
    /// 该碰撞消解规则是承载正确性的固定策略，不可替换。
    pub fn alternate_bucket(&self, bucket_count: usize) -> usize {
        let count = bucket_count as u64;
        let alternative = self.primary ^ self.alt_delta as u64;
        if alternative % count == self.primary % count {
            ((self.primary ^ 1) % count) as usize
        } else {
            (alternative % count) as usize
        }
    }
}

/// 由标量哈希函数派生哈希对
///
/// 增量的派生：主哈希值乘以混合常数后按48/32/16位折叠异或，
/// 截取低16位并强制为奇数，保证增量非零且两候选桶哈希值不同。
#[derive(Debug, Clone, Default)]
pub struct CuckooHasher<S = RandomState> {
    build_hasher: S,
}

impl<S: BuildHasher> CuckooHasher<S> {
    pub fn with_hasher(build_hasher: S) -> Self {
        Self { build_hasher }
    }

    pub fn hash<T: Hash + ?Sized>(&self, element: &T) -> ElementHash {
        let primary = self.build_hasher.hash_one(element);
        ElementHash::new(primary, Self::compute_alt_delta(primary))
    }

    fn compute_alt_delta(primary: u64) -> u16 {
        let mixed = primary.wrapping_mul(ALT_MIX);
        let mut delta = ((mixed >> 48) ^ (mixed >> 32) ^ (mixed >> 16) ^ mixed) & 0xFFFF;
        if delta & 1 == 0 {
            delta ^= 1;
        }
        delta as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> CuckooHasher {
        CuckooHasher::default()
    }

    #[test]
    fn test_alternate_is_self_inverse() {
        let original = hasher().hash(&12345u64);
        let mut hash = original;
        hash.alternate();
        assert_ne!(hash.primary(), original.primary(), "交替后主哈希值应变化");
        hash.alternate();
        assert_eq!(hash, original, "连续两次交替应还原");
    }

    #[test]
    fn test_alt_delta_always_odd() {
        let hasher = hasher();
        for key in 0u64..10_000 {
            let hash = hasher.hash(&key);
            assert_eq!(hash.alt_delta() & 1, 1, "交替增量必须为奇数");
        }
    }

    #[test]
    fn test_candidate_buckets_distinct() {
        let hasher = hasher();
        // 桶数量始终为偶数；只要大于1，两候选桶必不同
        // （非2的幂的偶数会走低位翻转的碰撞消解分支）
        for bucket_count in [2usize, 4, 6, 8, 20, 36, 64, 1024] {
            for key in 0u64..1000 {
                let hash = hasher.hash(&key);
                assert_ne!(
                    hash.primary_bucket(bucket_count),
                    hash.alternate_bucket(bucket_count),
                    "候选桶不能重合 (key={}, count={})",
                    key,
                    bucket_count
                );
            }
        }
    }

    #[test]
    fn test_candidates_swap_after_alternate() {
        let hasher = hasher();
        // 64是2的幂且增量为奇数，取模后低位必变，翻转分支不会触发，
        // 因此交替后两候选桶严格互换角色
        for key in 0u64..1000 {
            let mut hash = hasher.hash(&key);
            let (p, a) = (hash.primary_bucket(64), hash.alternate_bucket(64));
            hash.alternate();
            assert_eq!(hash.primary_bucket(64), a, "交替后应驻留原交替桶");
            assert_eq!(hash.alternate_bucket(64), p, "交替后原主桶成为交替桶");
        }
    }

    #[test]
    fn test_same_key_same_hash() {
        let hasher = hasher();
        assert_eq!(hasher.hash(&"key"), hasher.hash(&"key"), "相同键应有相同哈希对");
    }
}
