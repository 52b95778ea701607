//! 生产方协议契约：订阅顺序、有界投递、取消、终止信号与资源释放。

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use spark_flow::{
    FlowConfig, FlowError, ProtocolRule, Publisher, Source, SourceEvent, SourcePublisher,
    SyncSubscriber, codes, publisher,
    test_stubs::{DemandPlan, RecordingDiagnostics, RecordingSubscriber, Signal},
};

/// 记录自身被释放次数的来源。
struct DropTracked {
    next: u32,
    drops: Arc<AtomicUsize>,
}

impl Source for DropTracked {
    type Item = u32;

    fn pull(&mut self) -> SourceEvent<u32> {
        self.next += 1;
        SourceEvent::Item(self.next)
    }
}

impl Drop for DropTracked {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

fn tracked(
    drops: &Arc<AtomicUsize>,
) -> SourcePublisher<impl spark_flow::SourceFactory<Source = DropTracked>> {
    let drops = Arc::clone(drops);
    SourcePublisher::new(move || {
        Ok::<_, FlowError>(DropTracked {
            next: 0,
            drops: Arc::clone(&drops),
        })
    })
}

#[test]
fn five_items_with_unbounded_demand_then_one_completion() {
    let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::Initial(i64::MAX));
    publisher::from_iter(vec![1, 2, 3, 4, 5]).subscribe(Box::new(subscriber));

    assert_eq!(
        recorder.signals(),
        vec![
            Signal::Subscribed,
            Signal::Next(1),
            Signal::Next(2),
            Signal::Next(3),
            Signal::Next(4),
            Signal::Next(5),
            Signal::Complete,
        ]
    );
}

#[test]
fn exact_demand_completes_without_an_extra_request() {
    let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::Initial(5));
    publisher::range(10, 5).subscribe(Box::new(subscriber));

    assert_eq!(recorder.items(), vec![10, 11, 12, 13, 14]);
    assert!(recorder.is_completed());
}

#[test]
fn delivery_stops_at_requested_count_and_resumes() {
    let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::Initial(3));
    publisher::range(0, 10).subscribe(Box::new(subscriber));
    assert_eq!(recorder.items(), vec![0, 1, 2]);
    assert_eq!(recorder.terminal_count(), 0);

    recorder.request(2);
    assert_eq!(recorder.items(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn cancel_before_any_request_yields_no_signals() {
    let (subscriber, recorder) = RecordingSubscriber::<u64>::new(DemandPlan::CancelOnSubscribe);
    publisher::range(0, 10).subscribe(Box::new(subscriber));

    recorder.request(5);
    assert_eq!(recorder.signals(), vec![Signal::Subscribed]);
}

#[test]
fn repeated_cancel_releases_the_source_once() {
    let drops = Arc::new(AtomicUsize::new(0));
    let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::Initial(2));
    tracked(&drops).subscribe(Box::new(subscriber));

    assert_eq!(recorder.items(), vec![1, 2]);
    recorder.cancel();
    recorder.cancel();
    recorder.request(10);

    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.items(), vec![1, 2]);
    assert_eq!(recorder.terminal_count(), 0);
}

#[test]
fn source_failure_ends_with_a_single_error() {
    let source = publisher::from_result_iter(vec![
        Ok(1),
        Ok(2),
        Err(FlowError::source_failed("磁盘读取失败")),
        Ok(4),
    ]);
    let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::Initial(10));
    source.subscribe(Box::new(subscriber));

    assert_eq!(recorder.items(), vec![1, 2]);
    assert_eq!(recorder.error_codes(), vec![codes::SOURCE_FAILED]);
    assert_eq!(recorder.terminal_count(), 1);
}

#[test]
fn request_inside_on_next_does_not_grow_the_stack() {
    let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::OneByOne);
    publisher::range(0, 200_000).subscribe(Box::new(subscriber));

    assert_eq!(recorder.next_count(), 200_000);
    assert!(recorder.is_completed());
}

#[test]
fn sync_subscriber_stops_when_handler_declines() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscriber = SyncSubscriber::from_fn(move |n: u64| {
        sink.lock().expect("锁未中毒").push(n);
        Ok(n < 3)
    });
    let done = subscriber.done_handle();
    publisher::range(0, 100).subscribe(Box::new(subscriber));

    assert_eq!(*seen.lock().expect("锁未中毒"), vec![0, 1, 2, 3]);
    assert!(done.is_done());
}

#[test]
fn illegal_request_is_reported_with_the_configured_label() {
    let diagnostics = RecordingDiagnostics::new();
    let (subscriber, recorder) = RecordingSubscriber::<u64>::new(DemandPlan::Initial(0));
    publisher::range(0, 5)
        .with_config(FlowConfig::new().with_label("orders"))
        .with_diagnostics(Arc::new(diagnostics.clone()))
        .subscribe(Box::new(subscriber));

    assert_eq!(recorder.error_codes(), vec![codes::ILLEGAL_REQUEST]);
    let violations = diagnostics.violations();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].rule, ProtocolRule::NonPositiveRequest);
    assert!(violations[0].detail.starts_with("orders/"));
}

#[test]
fn subscriptions_are_independent() {
    let shared = publisher::range(0, 4);
    let (slow, slow_recorder) = RecordingSubscriber::new(DemandPlan::Initial(1));
    let (fast, fast_recorder) = RecordingSubscriber::new(DemandPlan::Initial(i64::MAX));
    shared.subscribe(Box::new(slow));
    shared.subscribe(Box::new(fast));

    slow_recorder.cancel();
    assert_eq!(slow_recorder.items(), vec![0]);
    assert_eq!(fast_recorder.items(), vec![0, 1, 2, 3]);
    assert!(fast_recorder.is_completed());
}

#[cfg(feature = "tracing")]
mod tracing_sink {
    use super::*;
    use spark_flow::TracingDiagnostics;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn violations_become_warn_events() {
        let (subscriber, recorder) = RecordingSubscriber::<u64>::new(DemandPlan::Manual);
        publisher::range(0, 3)
            .with_diagnostics(Arc::new(TracingDiagnostics))
            .subscribe(Box::new(subscriber));

        recorder.request(-1);

        assert!(logs_contain("protocol.non_positive_request"));
        assert!(logs_contain("protocol violation detected"));
    }
}
