use crate::case::{TckCase, TckSuite};
use crate::support::shared_vec;
use parking_lot::Mutex;
use spark_flow::{
    FlowError, NextHandler, ProtocolRule, Publisher, SubscriberCore, SubscriberState,
    SyncSubscriber, codes, publisher,
    test_stubs::{RecordingDiagnostics, StubSubscription},
};
use std::sync::Arc;

const CASES: &[TckCase] = &[
    TckCase {
        name: "core_walks_unsubscribed_subscribed_terminated",
        test: core_walks_unsubscribed_subscribed_terminated,
    },
    TckCase {
        name: "duplicate_subscription_is_cancelled",
        test: duplicate_subscription_is_cancelled,
    },
    TckCase {
        name: "signals_out_of_order_are_reported",
        test: signals_out_of_order_are_reported,
    },
    TckCase {
        name: "sync_subscriber_sees_every_item_then_completion",
        test: sync_subscriber_sees_every_item_then_completion,
    },
    TckCase {
        name: "handler_failure_cancels_upstream",
        test: handler_failure_cancels_upstream,
    },
];

const SUITE: TckSuite = TckSuite {
    name: "subscriber",
    cases: CASES,
};

/// 返回“消费方”主题的测试套件。
pub const fn suite() -> &'static TckSuite {
    &SUITE
}

/// 验证消费方状态机的正常路径。
///
/// # 教案式说明
/// - **契约 (What)**：`Unsubscribed → Subscribed → Terminated`；终止前 `active_subscription` 可用，
///   终止后不可用；正常路径不产生任何违规。
fn core_walks_unsubscribed_subscribed_terminated() {
    let diagnostics = RecordingDiagnostics::new();
    let core = SubscriberCore::new(Arc::new(diagnostics.clone()));
    assert_eq!(core.state(), SubscriberState::Unsubscribed);

    let subscription = Arc::new(StubSubscription::default());
    assert!(core.on_subscribe(subscription.clone()));
    assert_eq!(core.state(), SubscriberState::Subscribed);
    assert!(core.admit_next().is_some(), "订阅后应允许 on_next");
    assert!(core.active_subscription().is_some());

    assert!(core.admit_terminal("on_complete"));
    assert_eq!(core.state(), SubscriberState::Terminated);
    assert!(core.active_subscription().is_none(), "终止后不应再暴露订阅");
    assert!(diagnostics.is_empty(), "正常路径不应产生违规");
}

/// 验证重复 `on_subscribe` 的处理：取消新订阅并报告。
fn duplicate_subscription_is_cancelled() {
    let diagnostics = RecordingDiagnostics::new();
    let core = SubscriberCore::new(Arc::new(diagnostics.clone()));
    let first = Arc::new(StubSubscription::default());
    let second = Arc::new(StubSubscription::default());

    assert!(core.on_subscribe(first.clone()));
    assert!(!core.on_subscribe(second.clone()));

    assert_eq!(first.cancel_count(), 0, "已有订阅不应被取消");
    assert_eq!(second.cancel_count(), 1, "重复订阅必须被取消");
    assert_eq!(diagnostics.rules(), vec![ProtocolRule::DuplicateSubscription]);
}

/// 验证订阅前信号与终止后信号都会被报告并忽略。
fn signals_out_of_order_are_reported() {
    let diagnostics = RecordingDiagnostics::new();
    let core = SubscriberCore::new(Arc::new(diagnostics.clone()));

    assert!(core.admit_next().is_none());
    assert!(!core.admit_terminal("on_error"));

    assert!(core.on_subscribe(Arc::new(StubSubscription::default())));
    assert!(core.admit_terminal("on_complete"));
    assert!(!core.admit_terminal("on_complete"));
    assert!(core.admit_next().is_none());

    assert_eq!(
        diagnostics.rules(),
        vec![
            ProtocolRule::SignalBeforeSubscribe,
            ProtocolRule::SignalBeforeSubscribe,
            ProtocolRule::SignalAfterTerminal,
            ProtocolRule::SignalAfterTerminal,
        ]
    );
}

/// 记录元素与终止信号的处理器。
struct Collector {
    items: Arc<Mutex<Vec<u64>>>,
    completed: Arc<Mutex<bool>>,
}

impl NextHandler<u64> for Collector {
    fn when_next(&mut self, item: u64) -> Result<bool, FlowError> {
        self.items.lock().push(item);
        Ok(true)
    }

    fn when_complete(&mut self) {
        *self.completed.lock() = true;
    }
}

/// 验证同步消费方逐个请求直至完成。
fn sync_subscriber_sees_every_item_then_completion() {
    let items = shared_vec();
    let completed = Arc::new(Mutex::new(false));
    let subscriber = SyncSubscriber::new(Collector {
        items: Arc::clone(&items),
        completed: Arc::clone(&completed),
    });
    publisher::range(0, 32).subscribe(Box::new(subscriber));

    assert_eq!(*items.lock(), (0..32).collect::<Vec<_>>());
    assert!(*completed.lock(), "完成信号应转交给处理器");
}

/// 验证处理函数失败时报告 `HandlerFailed` 并取消上游。
///
/// # 教案式说明
/// - **契约 (What)**：失败元素之后不再收到任何元素，也不会把终止信号交给处理器。
fn handler_failure_cancels_upstream() {
    let diagnostics = RecordingDiagnostics::new();
    let seen = shared_vec();
    let sink = Arc::clone(&seen);
    let subscriber = SyncSubscriber::with_diagnostics(
        spark_flow::FnHandler::new(move |item: u64| -> Result<bool, FlowError> {
            sink.lock().push(item);
            if item == 2 {
                Err(FlowError::new(codes::HANDLER_FAILED, "写入下游失败"))
            } else {
                Ok(true)
            }
        }),
        Arc::new(diagnostics.clone()),
    );
    let done = subscriber.done_handle();
    publisher::range(0, 1_000).subscribe(Box::new(subscriber));

    assert_eq!(*seen.lock(), vec![0, 1, 2]);
    assert!(done.is_done());
    assert_eq!(diagnostics.rules(), vec![ProtocolRule::HandlerFailed]);
}
