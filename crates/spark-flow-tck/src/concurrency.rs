use crate::case::{TckCase, TckSuite};
use crate::support::{ReleaseCounter, WAIT};
use spark_flow::{
    Publisher, RelayProcessor, ThreadScheduler, codes, publisher,
    test_stubs::{DemandPlan, RecordingSubscriber},
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const CASES: &[TckCase] = &[
    TckCase {
        name: "concurrent_requests_deliver_exactly_requested",
        test: concurrent_requests_deliver_exactly_requested,
    },
    TckCase {
        name: "cancel_from_another_thread_stops_delivery",
        test: cancel_from_another_thread_stops_delivery,
    },
    TckCase {
        name: "illegal_request_from_another_thread_fails_once",
        test: illegal_request_from_another_thread_fails_once,
    },
    TckCase {
        name: "threaded_relay_completes_in_order",
        test: threaded_relay_completes_in_order,
    },
];

const SUITE: TckSuite = TckSuite {
    name: "concurrency",
    cases: CASES,
};

/// 返回“并发”主题的测试套件。
pub const fn suite() -> &'static TckSuite {
    &SUITE
}

/// 验证多线程并发 `request(1)` 时投递数量与顺序。
///
/// # 教案式说明
/// - **意图 (Why)**：每次 `request` 都可能触发一次线程调度的 drain，需求更新不得丢失，元素不得重复或乱序。
/// - **契约 (What)**：4 个线程各请求 25 次，来源长度 100；最终恰好收到 `0..100` 与一次完成信号。
fn concurrent_requests_deliver_exactly_requested() {
    let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::Manual);
    publisher::range(0, 100)
        .with_scheduler(Arc::new(ThreadScheduler::new("tck-request")))
        .subscribe(Box::new(subscriber));
    assert!(
        recorder.wait_until(WAIT, |signals| !signals.is_empty()),
        "on_subscribe 超时"
    );

    let requesters: Vec<_> = (0..4)
        .map(|_| {
            let recorder = recorder.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    recorder.request(1);
                }
            })
        })
        .collect();
    for requester in requesters {
        requester.join().expect("请求线程不应 panic");
    }

    assert!(recorder.wait_for_terminal(WAIT), "终止信号超时");
    assert_eq!(recorder.items(), (0..100).collect::<Vec<u64>>());
    assert!(recorder.is_completed());
}

/// 验证从其它线程取消后投递停止、来源被释放且没有终止信号。
fn cancel_from_another_thread_stops_delivery() {
    let counter = ReleaseCounter::default();
    let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::Initial(i64::MAX));
    counter
        .endless()
        .with_scheduler(Arc::new(ThreadScheduler::new("tck-cancel")))
        .subscribe(Box::new(subscriber));
    assert!(
        recorder.wait_until(WAIT, |signals| signals.len() > 20),
        "元素投递超时"
    );

    let canceller = {
        let recorder = recorder.clone();
        thread::spawn(move || recorder.cancel())
    };
    canceller.join().expect("取消线程不应 panic");
    let observed = recorder.next_count();

    let deadline = std::time::Instant::now() + WAIT;
    while counter.released() == 0 {
        assert!(std::time::Instant::now() < deadline, "来源释放超时");
        thread::sleep(Duration::from_millis(1));
    }
    assert!(recorder.next_count() <= observed + 1, "取消后至多一个在途元素");
    assert_eq!(recorder.terminal_count(), 0);
    assert_eq!(counter.released(), 1);
}

/// 验证投递进行中由其它线程发出的 `request(0)` 总以唯一一次 `on_error` 结束。
///
/// # 教案式说明
/// - **意图 (Why)**：非法请求的登记与取消标志分两步写入，drain 可能在两步之间观察到取消；
///   这种交错不得退化为静默释放。
/// - **契约 (What)**：每轮恰好一次 `on_error(flow.illegal_request)`，来源恰好释放一次。
fn illegal_request_from_another_thread_fails_once() {
    for _ in 0..100 {
        let counter = ReleaseCounter::default();
        let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::Initial(i64::MAX));
        counter
            .endless()
            .with_scheduler(Arc::new(ThreadScheduler::new("tck-illegal")))
            .subscribe(Box::new(subscriber));
        assert!(
            recorder.wait_until(WAIT, |signals| signals.len() > 50),
            "元素投递超时"
        );

        let requester = {
            let recorder = recorder.clone();
            thread::spawn(move || recorder.request(0))
        };
        requester.join().expect("请求线程不应 panic");

        assert!(recorder.wait_for_terminal(WAIT), "非法请求后未收到终止信号");
        assert_eq!(recorder.error_codes(), vec![codes::ILLEGAL_REQUEST]);
        assert_eq!(recorder.terminal_count(), 1);
        assert_eq!(counter.released(), 1);
    }
}

/// 验证两侧都运行在线程调度器上的中继。
fn threaded_relay_completes_in_order() {
    let processor = RelayProcessor::<u64, _>::builder(spark_flow::Identity)
        .with_scheduler(Arc::new(ThreadScheduler::new("tck-relay-down")))
        .build();
    let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::OneByOne);
    processor.subscribe(Box::new(subscriber));
    publisher::range(0, 64)
        .with_scheduler(Arc::new(ThreadScheduler::new("tck-relay-up")))
        .subscribe(Box::new(processor));

    assert!(recorder.wait_for_terminal(WAIT), "终止信号超时");
    assert_eq!(recorder.items(), (0..64).collect::<Vec<u64>>());
    assert!(recorder.is_completed());
}
