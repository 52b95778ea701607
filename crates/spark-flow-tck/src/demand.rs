use crate::case::{TckCase, TckSuite};
use spark_flow::{DemandCounter, MAX_DEMAND};
use std::num::NonZeroU64;

const CASES: &[TckCase] = &[
    TckCase {
        name: "increase_accumulates_and_consume_decrements",
        test: increase_accumulates_and_consume_decrements,
    },
    TckCase {
        name: "saturation_is_sticky",
        test: saturation_is_sticky,
    },
    TckCase {
        name: "take_all_moves_demand_once",
        test: take_all_moves_demand_once,
    },
];

const SUITE: TckSuite = TckSuite {
    name: "demand",
    cases: CASES,
};

/// 返回“需求计数”主题的测试套件。
pub const fn suite() -> &'static TckSuite {
    &SUITE
}

fn units(n: u64) -> NonZeroU64 {
    NonZeroU64::new(n).unwrap_or(NonZeroU64::MIN)
}

/// 验证累加与逐个消费的基本契约。
///
/// # 教案式说明
/// - **意图 (Why)**：需求计数是背压的唯一依据，计数不准会直接表现为多发或少发。
/// - **契约 (What)**：累加 3 与 4 后恰好可以消费 7 次，第 8 次返回 `false` 且计数保持 0。
fn increase_accumulates_and_consume_decrements() {
    let demand = DemandCounter::new();
    assert!(demand.is_zero(), "新建计数器应为 0");
    assert_eq!(demand.increase(units(3)), 3);
    assert_eq!(demand.increase(units(4)), 7);

    let consumed = (0..8).filter(|_| demand.try_consume_one()).count();
    assert_eq!(consumed, 7, "消费次数应等于累积需求");
    assert!(demand.is_zero(), "耗尽后计数应回到 0");
}

/// 验证饱和之后的“无界需求”语义。
///
/// # 教案式说明
/// - **意图 (Why)**：`request(i64::MAX)` 表示不限量，饱和后消费不得让需求退化为有界。
/// - **契约 (What)**：任意累加都钳制在 [`MAX_DEMAND`]；饱和后消费成功且计数不变。
fn saturation_is_sticky() {
    let demand = DemandCounter::new();
    demand.increase(units(MAX_DEMAND - 1));
    assert_eq!(demand.increase(units(u64::MAX)), MAX_DEMAND, "溢出应钳制到上限");
    assert!(demand.is_unbounded());

    for _ in 0..16 {
        assert!(demand.try_consume_one());
    }
    assert_eq!(demand.current(), MAX_DEMAND, "饱和后消费不应递减");
}

/// 验证 `take_all` 一次性取走全部需求。
fn take_all_moves_demand_once() {
    let demand = DemandCounter::new();
    demand.increase(units(5));
    assert_eq!(demand.take_all(), 5);
    assert_eq!(demand.take_all(), 0, "第二次取走应为 0");
    assert!(!demand.try_consume_one());
}
