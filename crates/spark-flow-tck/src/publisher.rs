use crate::case::{TckCase, TckSuite};
use spark_flow::{
    FlowError, IterSource, ProtocolRule, Publisher, SourcePublisher, codes, publisher,
    test_stubs::{DemandPlan, RecordingDiagnostics, RecordingSubscriber, Signal},
};
use std::{ops::Range, sync::Arc};

const CASES: &[TckCase] = &[
    TckCase {
        name: "signals_follow_subscribe_next_terminal_order",
        test: signals_follow_subscribe_next_terminal_order,
    },
    TckCase {
        name: "delivery_is_bounded_by_demand",
        test: delivery_is_bounded_by_demand,
    },
    TckCase {
        name: "exhausted_source_completes_without_extra_demand",
        test: exhausted_source_completes_without_extra_demand,
    },
    TckCase {
        name: "empty_source_completes_immediately",
        test: empty_source_completes_immediately,
    },
    TckCase {
        name: "source_error_terminates_after_prior_items",
        test: source_error_terminates_after_prior_items,
    },
    TckCase {
        name: "factory_failure_rejects_subscriber",
        test: factory_failure_rejects_subscriber,
    },
];

const SUITE: TckSuite = TckSuite {
    name: "publisher",
    cases: CASES,
};

/// 返回“生产方”主题的测试套件。
///
/// # 教案式说明
/// - **意图 (Why)**：集中验证 `on_subscribe → on_next* → 终止` 的信号顺序与有界投递。
/// - **契约 (What)**：所有用例在调用线程上同步完成，`request` 返回时投递已经结束。
pub const fn suite() -> &'static TckSuite {
    &SUITE
}

/// 验证信号顺序：首个信号为 `on_subscribe`，终止信号最后且唯一。
fn signals_follow_subscribe_next_terminal_order() {
    let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::Initial(i64::MAX));
    publisher::from_iter(vec![1, 2, 3, 4, 5]).subscribe(Box::new(subscriber));

    let signals = recorder.signals();
    assert_eq!(signals.first(), Some(&Signal::Subscribed), "首个信号必须是 on_subscribe");
    assert_eq!(signals.last(), Some(&Signal::Complete), "最后一个信号必须是终止信号");
    assert_eq!(recorder.items(), vec![1, 2, 3, 4, 5]);
    assert_eq!(recorder.terminal_count(), 1);
}

/// 验证有界投递：收到的元素数永远不超过累计请求数。
///
/// # 教案式说明
/// - **逻辑 (How)**：依次请求 2、1、4 个元素，每次请求后检查累计收到的数量。
/// - **契约 (What)**：累计收到数量依次为 2、3、7，期间不出现终止信号。
fn delivery_is_bounded_by_demand() {
    let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::Manual);
    publisher::range(0, 100).subscribe(Box::new(subscriber));
    assert_eq!(recorder.next_count(), 0, "无需求时不应投递");

    for (request, expected) in [(2, 2), (1, 3), (4, 7)] {
        recorder.request(request);
        assert_eq!(recorder.next_count(), expected, "投递数量必须等于累计需求");
    }
    assert_eq!(recorder.items(), (0..7).collect::<Vec<u64>>());
    assert_eq!(recorder.terminal_count(), 0);
}

/// 验证需求恰好等于来源长度时立即完成，不需要额外的 `request`。
fn exhausted_source_completes_without_extra_demand() {
    let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::Initial(3));
    publisher::from_iter(vec!["a", "b", "c"]).subscribe(Box::new(subscriber));

    assert_eq!(recorder.items(), vec!["a", "b", "c"]);
    assert!(recorder.is_completed(), "来源耗尽后应立即完成");
}

/// 验证空来源在没有任何需求时也会完成。
fn empty_source_completes_immediately() {
    let (subscriber, recorder) = RecordingSubscriber::<u64>::new(DemandPlan::Manual);
    publisher::range(0, 0).subscribe(Box::new(subscriber));

    assert_eq!(recorder.signals(), vec![Signal::Subscribed, Signal::Complete]);
}

/// 验证来源错误在此前元素之后以唯一一次 `on_error` 终止。
fn source_error_terminates_after_prior_items() {
    let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::Initial(10));
    publisher::from_result_iter(vec![
        Ok(7u8),
        Err(FlowError::source_failed("读取中断")),
        Ok(9u8),
    ])
    .subscribe(Box::new(subscriber));

    assert_eq!(recorder.items(), vec![7]);
    assert_eq!(recorder.error_codes(), vec![codes::SOURCE_FAILED]);
    assert_eq!(recorder.terminal_count(), 1);
}

/// 验证来源构造失败时的拒绝路径。
///
/// # 教案式说明
/// - **契约 (What)**：消费方先收到 `on_subscribe`（惰性订阅），随后收到唯一一次 `on_error`；
///   惰性订阅上的 `request`/`cancel` 不产生任何效果；诊断通道记录 `SubscriberRejected`。
fn factory_failure_rejects_subscriber() {
    let diagnostics = RecordingDiagnostics::new();
    let refusing = SourcePublisher::new(|| {
        Err::<IterSource<Range<u64>>, _>(FlowError::new(codes::SOURCE_UNAVAILABLE, "后端离线"))
    })
    .with_diagnostics(Arc::new(diagnostics.clone()));

    let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::Initial(5));
    refusing.subscribe(Box::new(subscriber));
    recorder.request(1);
    recorder.cancel();

    assert_eq!(recorder.signals().first(), Some(&Signal::Subscribed));
    assert_eq!(recorder.error_codes(), vec![codes::SOURCE_UNAVAILABLE]);
    assert_eq!(recorder.next_count(), 0);
    assert_eq!(diagnostics.rules(), vec![ProtocolRule::SubscriberRejected]);
}
