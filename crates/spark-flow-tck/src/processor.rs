use crate::case::{TckCase, TckSuite};
use crate::support::ReleaseCounter;
use spark_flow::{
    Filter, Publisher, RelayProcessor, RelayStage, codes, publisher,
    test_stubs::{DemandPlan, RecordingSubscriber, Signal, StubSubscription},
    Subscriber,
};
use std::sync::Arc;

const CASES: &[TckCase] = &[
    TckCase {
        name: "relay_preserves_order_and_completion",
        test: relay_preserves_order_and_completion,
    },
    TckCase {
        name: "early_downstream_demand_is_forwarded_once",
        test: early_downstream_demand_is_forwarded_once,
    },
    TckCase {
        name: "downstream_cancel_releases_upstream",
        test: downstream_cancel_releases_upstream,
    },
    TckCase {
        name: "unicast_rejects_second_downstream",
        test: unicast_rejects_second_downstream,
    },
    TckCase {
        name: "filtered_items_do_not_starve_downstream",
        test: filtered_items_do_not_starve_downstream,
    },
];

const SUITE: TckSuite = TckSuite {
    name: "processor",
    cases: CASES,
};

/// 返回“处理器”主题的测试套件。
///
/// # 教案式说明
/// - **意图 (Why)**：处理器两侧共享同一条生命周期，需求、取消与终止必须跨两侧一致传递。
/// - **契约 (What)**：用例覆盖顺序转发、需求预存、取消传播、单播约束与丢弃补偿。
pub const fn suite() -> &'static TckSuite {
    &SUITE
}

/// 验证逐个请求时中继严格保序并转发完成信号。
fn relay_preserves_order_and_completion() {
    let processor = RelayProcessor::<u32, _>::identity();
    let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::OneByOne);
    processor.subscribe(Box::new(subscriber));
    publisher::from_iter(vec![10u32, 20, 30]).subscribe(Box::new(processor.clone()));

    assert_eq!(
        recorder.signals(),
        vec![
            Signal::Subscribed,
            Signal::Next(10),
            Signal::Next(20),
            Signal::Next(30),
            Signal::Complete,
        ]
    );
    assert_eq!(processor.stage(), RelayStage::Terminated);
}

/// 验证上游订阅之前到达的下游需求会在上游就绪时一次性转发。
///
/// # 教案式说明
/// - **逻辑 (How)**：下游先请求 3 再请求 2，此时上游尚未订阅；随后注入一个记录请求的上游订阅。
/// - **契约 (What)**：上游只收到一次 `request(5)`，阶段推进到 `Relaying`，积压需求清零。
fn early_downstream_demand_is_forwarded_once() {
    let processor = RelayProcessor::<u8, _>::identity();
    let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::Manual);
    processor.subscribe(Box::new(subscriber));
    recorder.request(3);
    recorder.request(2);
    assert_eq!(processor.stage(), RelayStage::AwaitingUpstreamSubscription);
    assert_eq!(processor.pending_upstream_demand(), 5);

    let upstream = Arc::new(StubSubscription::default());
    processor.clone().on_subscribe(upstream.clone());

    assert_eq!(upstream.requests(), vec![5], "积压需求应合并为一次请求");
    assert_eq!(processor.pending_upstream_demand(), 0);
    assert_eq!(processor.stage(), RelayStage::Relaying);
}

/// 验证下游取消会取消上游并释放上游来源。
fn downstream_cancel_releases_upstream() {
    let counter = ReleaseCounter::default();
    let processor = RelayProcessor::<u64, _>::identity();
    let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::CancelAfter(3));
    processor.subscribe(Box::new(subscriber));
    counter.endless().subscribe(Box::new(processor.clone()));

    assert_eq!(recorder.items(), vec![1, 2, 3]);
    assert_eq!(recorder.terminal_count(), 0, "取消后不应出现终止信号");
    assert_eq!(counter.released(), 1, "上游来源必须被释放");
    assert_eq!(processor.stage(), RelayStage::Terminated);
}

/// 验证单播约束：第二个下游收到惰性订阅与 `flow.subscriber_rejected`。
fn unicast_rejects_second_downstream() {
    let processor = RelayProcessor::<u8, _>::identity();
    let (first, first_recorder) = RecordingSubscriber::new(DemandPlan::Manual);
    let (second, second_recorder) = RecordingSubscriber::new(DemandPlan::Initial(4));
    processor.subscribe(Box::new(first));
    processor.subscribe(Box::new(second));

    assert!(first_recorder.is_subscribed());
    assert_eq!(first_recorder.terminal_count(), 0, "第一个下游不受影响");
    assert_eq!(second_recorder.signals().first(), Some(&Signal::Subscribed));
    assert_eq!(second_recorder.error_codes(), vec![codes::SUBSCRIBER_REJECTED]);
}

/// 验证被过滤的元素会向上游补充需求，下游需求仍能被满足。
fn filtered_items_do_not_starve_downstream() {
    let processor = RelayProcessor::<u64, _>::new(Filter(|n: &u64| n % 3 == 0));
    let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::Initial(4));
    processor.subscribe(Box::new(subscriber));
    publisher::range(1, 100).subscribe(Box::new(processor.clone()));

    assert_eq!(recorder.items(), vec![3, 6, 9, 12]);
    assert_eq!(recorder.terminal_count(), 0);
}
