//! 内部控制信号 - 可恢复的重试原因

/// 操作尝试被中断的原因
///
/// 两种信号都是预期内的瞬态状态，仅在内部尝试函数之间传递，
/// 驱动公开操作的重试循环，永远不会暴露给调用者。
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CuckooError {
    /// 桶数量快照已失效（并发扩容），需携带新快照重试整个尝试
    #[error("表已扩容，桶数量快照失效")]
    TableExpanded,

    /// 驱逐搜索预算耗尽，需触发扩容后重试
    #[error("表过度拥挤，驱逐路径搜索失败")]
    TableOvercrowded,
}
