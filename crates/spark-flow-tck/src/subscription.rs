use crate::case::{TckCase, TckSuite};
use crate::support::ReleaseCounter;
use spark_flow::{
    ProtocolRule, Publisher, codes, publisher,
    test_stubs::{DemandPlan, RecordingDiagnostics, RecordingSubscriber, Signal},
};
use std::sync::Arc;

const CASES: &[TckCase] = &[
    TckCase {
        name: "non_positive_request_fails_once_and_releases_source",
        test: non_positive_request_fails_once_and_releases_source,
    },
    TckCase {
        name: "cancel_is_idempotent_and_silent",
        test: cancel_is_idempotent_and_silent,
    },
    TckCase {
        name: "reentrant_requests_stay_on_a_flat_stack",
        test: reentrant_requests_stay_on_a_flat_stack,
    },
    TckCase {
        name: "requests_after_terminal_are_ignored",
        test: requests_after_terminal_are_ignored,
    },
];

const SUITE: TckSuite = TckSuite {
    name: "subscription",
    cases: CASES,
};

/// 返回“订阅控制器”主题的测试套件。
pub const fn suite() -> &'static TckSuite {
    &SUITE
}

/// 验证 `request(n <= 0)` 的处理。
///
/// # 教案式说明
/// - **意图 (Why)**：非正数请求是消费方的协议错误，必须以唯一一次 `on_error` 终止，而不是静默忽略。
/// - **逻辑 (How)**：先给出合法需求拿到两个元素，再发送 `request(-3)`，随后继续发送合法与非法请求。
/// - **契约 (What)**：
///   - 只出现一次 `on_error(flow.illegal_request)`，之后不再有任何信号；
///   - 来源恰好释放一次；诊断通道记录一次 `NonPositiveRequest`。
fn non_positive_request_fails_once_and_releases_source() {
    let counter = ReleaseCounter::default();
    let diagnostics = RecordingDiagnostics::new();
    let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::Initial(2));
    counter
        .endless()
        .with_diagnostics(Arc::new(diagnostics.clone()))
        .subscribe(Box::new(subscriber));

    recorder.request(-3);
    recorder.request(4);
    recorder.request(0);

    assert_eq!(recorder.items(), vec![1, 2], "非法请求之后不应再投递元素");
    assert_eq!(recorder.error_codes(), vec![codes::ILLEGAL_REQUEST]);
    assert_eq!(recorder.terminal_count(), 1, "终止信号必须恰好一次");
    assert_eq!(counter.released(), 1, "来源必须恰好释放一次");
    assert_eq!(
        diagnostics.rules().first(),
        Some(&ProtocolRule::NonPositiveRequest),
        "首个违规应为非正数请求"
    );
}

/// 验证取消的幂等性与静默性。
///
/// # 教案式说明
/// - **契约 (What)**：多次 `cancel()` 只释放一次来源；取消后既没有元素也没有终止信号。
fn cancel_is_idempotent_and_silent() {
    let counter = ReleaseCounter::default();
    let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::Initial(3));
    counter.endless().subscribe(Box::new(subscriber));

    for _ in 0..3 {
        recorder.cancel();
    }
    recorder.request(10);

    assert_eq!(recorder.items(), vec![1, 2, 3]);
    assert_eq!(recorder.terminal_count(), 0, "取消后不应出现终止信号");
    assert_eq!(counter.created(), 1);
    assert_eq!(counter.released(), 1, "重复取消不应重复释放");
}

/// 验证 `on_next` 内部重入 `request(1)` 不会递归加深调用栈。
///
/// # 教案式说明
/// - **意图 (Why)**：逐个请求是最常见的背压形态；若每次重入都递归投递，十万级元素即可耗尽线程栈。
/// - **契约 (What)**：十万个元素全部按序到达，随后恰好一次完成信号。
fn reentrant_requests_stay_on_a_flat_stack() {
    let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::OneByOne);
    publisher::range(0, 100_000).subscribe(Box::new(subscriber));

    assert_eq!(recorder.next_count(), 100_000);
    assert!(recorder.is_completed());
}

/// 验证终止后的请求被忽略。
fn requests_after_terminal_are_ignored() {
    let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::Initial(2));
    publisher::from_iter(vec!['a', 'b']).subscribe(Box::new(subscriber));
    assert!(recorder.is_completed());

    recorder.request(5);
    recorder.request(-1);
    recorder.cancel();

    assert_eq!(
        recorder.signals(),
        vec![
            Signal::Subscribed,
            Signal::Next('a'),
            Signal::Next('b'),
            Signal::Complete,
        ],
        "终止后不应出现任何新信号"
    );
}
