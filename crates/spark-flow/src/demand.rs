//! 需求计数器：记录“已请求但尚未交付”的元素数量。
//!
//! # 契约（What）
//! - 计数器永不为负，增加操作在 [`MAX_DEMAND`] 处饱和；
//! - 一旦饱和即视为“无界需求”，此后的增加与消费都不再改变数值；
//! - 所有操作均可在任意线程并发调用，多个增加操作满足交换律（不会丢失更新）。
//!
//! 启用 `--cfg loom` 与 `loom-model` Feature 时切换为 Loom 提供的原子类型，
//! 以便模型检查穷举所有调度交错。

use core::num::NonZeroU64;

#[cfg(not(all(loom, feature = "loom-model")))]
use core::sync::atomic::{AtomicU64, Ordering};
#[cfg(all(loom, feature = "loom-model"))]
use loom::sync::atomic::{AtomicU64, Ordering};

/// 单个订阅允许累积的最大需求，等于 `request` 参数可表达的最大值。
pub const MAX_DEMAND: u64 = i64::MAX as u64;

/// 饱和、非负的需求累加器。
///
/// # 逻辑解析（How）
/// - `increase` 与 `try_consume_one` 均采用乐观的 `compare_exchange` 自旋更新，
///   与预算控制器的租借/归还实现一致；
/// - `take_all` 使用 `swap` 一次性取走全部需求，供处理器把积压的下游需求转发给上游。
///
/// # 风险提示（Trade-offs）
/// - 饱和后消费不再递减，因此“无界需求”一旦建立就不会退化为有界；
///   这与 `request(i64::MAX)` 表示“不限量”的约定一致。
#[derive(Debug)]
pub struct DemandCounter {
    value: AtomicU64,
}

impl DemandCounter {
    /// 创建值为 0 的计数器。
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// 读取当前需求。
    pub fn current(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// 是否没有未满足的需求。
    pub fn is_zero(&self) -> bool {
        self.current() == 0
    }

    /// 是否已饱和为无界需求。
    pub fn is_unbounded(&self) -> bool {
        self.current() == MAX_DEMAND
    }

    /// 增加 `n` 个单位的需求并返回增加后的值。
    ///
    /// 加法溢出或超过 [`MAX_DEMAND`] 时结果被钳制为 [`MAX_DEMAND`]。
    pub fn increase(&self, n: NonZeroU64) -> u64 {
        let mut current = self.value.load(Ordering::Acquire);
        loop {
            if current == MAX_DEMAND {
                return MAX_DEMAND;
            }
            let next = current.saturating_add(n.get()).min(MAX_DEMAND);
            match self
                .value
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// 尝试消费一个单位的需求。
    ///
    /// 计数为 0 时返回 `false` 且不修改计数；饱和状态下返回 `true` 且保持饱和。
    pub fn try_consume_one(&self) -> bool {
        let mut current = self.value.load(Ordering::Acquire);
        loop {
            match current {
                0 => return false,
                MAX_DEMAND => return true,
                _ => match self.value.compare_exchange(
                    current,
                    current - 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return true,
                    Err(actual) => current = actual,
                },
            }
        }
    }

    /// 取走全部需求并把计数归零，返回取走的数量。
    pub fn take_all(&self) -> u64 {
        self.value.swap(0, Ordering::AcqRel)
    }
}

impl Default for DemandCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(all(loom, feature = "loom-model"))))]
mod tests {
    use super::*;

    fn units(n: u64) -> NonZeroU64 {
        NonZeroU64::new(n).expect("测试数量必须为正")
    }

    #[test]
    fn consume_on_zero_leaves_counter_untouched() {
        let demand = DemandCounter::new();
        assert!(!demand.try_consume_one());
        assert_eq!(demand.current(), 0);
    }

    #[test]
    fn increase_then_consume_tracks_outstanding_units() {
        let demand = DemandCounter::new();
        assert_eq!(demand.increase(units(3)), 3);
        assert!(demand.try_consume_one());
        assert!(demand.try_consume_one());
        assert_eq!(demand.current(), 1);
    }

    #[test]
    fn saturation_is_sticky_and_never_wraps() {
        let demand = DemandCounter::new();
        demand.increase(units(MAX_DEMAND - 1));
        assert_eq!(demand.increase(units(5)), MAX_DEMAND);
        assert_eq!(demand.increase(units(u64::MAX)), MAX_DEMAND);
        assert!(demand.try_consume_one());
        assert!(demand.is_unbounded());
    }

    #[test]
    fn take_all_resets_to_zero() {
        let demand = DemandCounter::new();
        demand.increase(units(7));
        assert_eq!(demand.take_all(), 7);
        assert!(demand.is_zero());
        assert_eq!(demand.take_all(), 0);
    }
}
