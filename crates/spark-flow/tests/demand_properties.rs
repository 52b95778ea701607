//! 需求计数与背压的性质测试。
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：需求计数是背压的唯一依据。计数溢出、回绕或丢失更新都会让生产方
//!   多发或少发元素，因此用随机序列覆盖“饱和”“有界投递”“非法请求”三类性质。
//! - **结构说明 (How)**：
//!   - `increase_sequences_saturate`：对任意正数序列求和，与饱和算术的影子模型比对；
//!   - `delivery_never_exceeds_requested`：任意请求序列下，已投递数量恰为 `min(累计请求, 来源长度)`；
//!   - `non_positive_request_fails_exactly_once`：任意非正数请求只产生一次 `on_error`。
//! - **合同与边界 (What)**：所有测试在调用线程上同步执行（默认蹦床调度器），
//!   因此每次 `request` 返回时投递已经完成。

use std::num::NonZeroU64;

use proptest::prelude::*;
use spark_flow::{
    DemandCounter, MAX_DEMAND, Publisher, codes, publisher,
    test_stubs::{DemandPlan, RecordingSubscriber, Signal},
};

fn shadow_sum(values: &[u64]) -> u64 {
    values
        .iter()
        .fold(0u64, |acc, value| acc.saturating_add(*value).min(MAX_DEMAND))
}

proptest! {
    #[test]
    fn increase_sequences_saturate(values in prop::collection::vec(1u64..=u64::MAX, 1..16)) {
        let demand = DemandCounter::new();
        for value in &values {
            let after = demand.increase(NonZeroU64::new(*value).expect("生成器只产出正数"));
            prop_assert!(after <= MAX_DEMAND);
        }
        prop_assert_eq!(demand.current(), shadow_sum(&values));
    }

    #[test]
    fn small_increases_then_drain_balance(values in prop::collection::vec(1u64..64, 0..32)) {
        let demand = DemandCounter::new();
        for value in &values {
            demand.increase(NonZeroU64::new(*value).expect("生成器只产出正数"));
        }
        let total: u64 = values.iter().sum();
        let mut consumed = 0u64;
        while demand.try_consume_one() {
            consumed += 1;
        }
        prop_assert_eq!(consumed, total);
        prop_assert!(demand.is_zero());
    }

    #[test]
    fn delivery_never_exceeds_requested(
        length in 0u64..40,
        requests in prop::collection::vec(1i64..8, 0..12),
    ) {
        let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::Manual);
        publisher::range(0, length).subscribe(Box::new(subscriber));

        let mut requested = 0u64;
        for n in &requests {
            recorder.request(*n);
            requested += *n as u64;
            let expected = requested.min(length);
            prop_assert_eq!(recorder.next_count() as u64, expected);
        }

        let items = recorder.items();
        prop_assert!(items.iter().copied().eq(0..items.len() as u64));
        // 需求覆盖来源长度后立即完成，否则不应出现终止信号。
        let expected_terminal = usize::from(requested >= length);
        prop_assert_eq!(recorder.terminal_count(), expected_terminal);
    }

    #[test]
    fn non_positive_request_fails_exactly_once(n in i64::MIN..=0, extra in 1i64..100) {
        let (subscriber, recorder) = RecordingSubscriber::<u64>::new(DemandPlan::Manual);
        publisher::range(0, 1_000).subscribe(Box::new(subscriber));

        recorder.request(n);
        recorder.request(extra);
        recorder.request(n);

        prop_assert_eq!(recorder.next_count(), 0);
        prop_assert_eq!(recorder.error_codes(), vec![codes::ILLEGAL_REQUEST]);
        let signals = recorder.signals();
        prop_assert!(matches!(signals.last(), Some(Signal::Error(_))));
    }
}
