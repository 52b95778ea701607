//! 协议测试常用的记录型桩对象。
//!
//! # 设计定位（Why）
//! - 几乎所有协议测试都需要“记录收到了哪些信号”的消费方，以及能断言违规报告的诊断通道；
//!   集中在这里定义，单元测试、集成测试与 TCK 共用同一套实现，契约演进时只需单点修改。
//!
//! # 使用方式（How）
//! - [`RecordingSubscriber::new`] 返回消费方与配套的 [`SignalRecorder`]：前者交给生产方，
//!   后者留在测试中读取信号序列，并可手动 `request`/`cancel`；
//! - [`DemandPlan`] 描述消费方在 `on_subscribe`/`on_next` 中自动发出的需求；
//! - [`RecordingDiagnostics`] 与 [`StubSubscription`] 分别记录违规报告与订阅调用。
//!
//! # 契约说明（What）
//! - 桩对象只记录，不校验信号顺序；顺序断言由测试自行完成；
//! - 所有类型满足 `Send + Sync`，可在线程调度器驱动的测试中跨线程使用。

use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::{Mutex, Once};

use crate::{
    contract::{Subscriber, Subscription},
    diagnostics::{DiagnosticSink, ProtocolRule, Violation},
    error::FlowError,
};

/// 消费方收到的一个信号。
#[derive(Clone, Debug, PartialEq)]
pub enum Signal<T> {
    Subscribed,
    Next(T),
    Error(FlowError),
    Complete,
}

impl<T> Signal<T> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Signal::Error(_) | Signal::Complete)
    }
}

/// 记录型消费方自动发出的需求。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DemandPlan {
    /// 不自动请求，完全由 [`SignalRecorder`] 驱动。
    Manual,
    /// 订阅时一次性请求 `n`（`n` 可以为非正数，用于验证非法请求）。
    Initial(i64),
    /// 订阅时请求 1，之后每收到一个元素再请求 1。
    OneByOne,
    /// 订阅时立即取消，不发出任何请求。
    CancelOnSubscribe,
    /// 请求无界需求，收到 `k` 个元素后取消。
    CancelAfter(usize),
}

struct Shared<T> {
    signals: Mutex<Vec<Signal<T>>>,
    subscription: Once<Arc<dyn Subscription>>,
}

/// 记录全部信号的消费方。
pub struct RecordingSubscriber<T> {
    plan: DemandPlan,
    received: usize,
    shared: Arc<Shared<T>>,
}

impl<T> RecordingSubscriber<T> {
    pub fn new(plan: DemandPlan) -> (Self, SignalRecorder<T>) {
        let shared = Arc::new(Shared {
            signals: Mutex::new(Vec::new()),
            subscription: Once::new(),
        });
        let recorder = SignalRecorder {
            shared: Arc::clone(&shared),
        };
        (
            Self {
                plan,
                received: 0,
                shared,
            },
            recorder,
        )
    }
}

impl<T: Send> Subscriber<T> for RecordingSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        self.shared.signals.lock().push(Signal::Subscribed);
        self.shared
            .subscription
            .call_once(|| Arc::clone(&subscription));
        match self.plan {
            DemandPlan::Manual => {}
            DemandPlan::Initial(n) => subscription.request(n),
            DemandPlan::OneByOne => subscription.request(1),
            DemandPlan::CancelOnSubscribe => subscription.cancel(),
            DemandPlan::CancelAfter(0) => subscription.cancel(),
            DemandPlan::CancelAfter(_) => subscription.request(i64::MAX),
        }
    }

    fn on_next(&mut self, item: T) {
        self.shared.signals.lock().push(Signal::Next(item));
        self.received += 1;
        let Some(subscription) = self.shared.subscription.get() else {
            return;
        };
        match self.plan {
            DemandPlan::OneByOne => subscription.request(1),
            DemandPlan::CancelAfter(limit) if self.received >= limit => subscription.cancel(),
            _ => {}
        }
    }

    fn on_error(&mut self, error: FlowError) {
        self.shared.signals.lock().push(Signal::Error(error));
    }

    fn on_complete(&mut self) {
        self.shared.signals.lock().push(Signal::Complete);
    }
}

/// 读取 [`RecordingSubscriber`] 记录结果并代其调用订阅的句柄。
pub struct SignalRecorder<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for SignalRecorder<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> SignalRecorder<T> {
    pub fn is_subscribed(&self) -> bool {
        self.shared.subscription.get().is_some()
    }

    /// 通过已收到的订阅请求 `n` 个元素；尚未订阅时忽略。
    pub fn request(&self, n: i64) {
        if let Some(subscription) = self.shared.subscription.get() {
            subscription.request(n);
        }
    }

    pub fn cancel(&self) {
        if let Some(subscription) = self.shared.subscription.get() {
            subscription.cancel();
        }
    }

    pub fn next_count(&self) -> usize {
        self.shared
            .signals
            .lock()
            .iter()
            .filter(|signal| matches!(signal, Signal::Next(_)))
            .count()
    }

    pub fn terminal_count(&self) -> usize {
        self.shared
            .signals
            .lock()
            .iter()
            .filter(|signal| signal.is_terminal())
            .count()
    }

    pub fn is_completed(&self) -> bool {
        self.shared
            .signals
            .lock()
            .iter()
            .any(|signal| matches!(signal, Signal::Complete))
    }

    /// 收到的全部错误码，按到达顺序排列。
    pub fn error_codes(&self) -> Vec<&'static str> {
        self.shared
            .signals
            .lock()
            .iter()
            .filter_map(|signal| match signal {
                Signal::Error(error) => Some(error.code()),
                _ => None,
            })
            .collect()
    }

    /// 在线程调度器驱动的测试中轮询等待，直到 `predicate` 成立或超时。
    #[cfg(feature = "std")]
    pub fn wait_until(
        &self,
        timeout: std::time::Duration,
        mut predicate: impl FnMut(&[Signal<T>]) -> bool,
    ) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if predicate(&self.shared.signals.lock()) {
                return true;
            }
            if std::time::Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    /// 等待终止信号到达。
    #[cfg(feature = "std")]
    pub fn wait_for_terminal(&self, timeout: std::time::Duration) -> bool {
        self.wait_until(timeout, |signals| signals.iter().any(Signal::is_terminal))
    }
}

impl<T: Clone> SignalRecorder<T> {
    pub fn signals(&self) -> Vec<Signal<T>> {
        self.shared.signals.lock().clone()
    }

    pub fn items(&self) -> Vec<T> {
        self.shared
            .signals
            .lock()
            .iter()
            .filter_map(|signal| match signal {
                Signal::Next(item) => Some(item.clone()),
                _ => None,
            })
            .collect()
    }
}

/// 记录全部违规报告的诊断通道，克隆后共享同一份记录。
#[derive(Clone, Default)]
pub struct RecordingDiagnostics {
    violations: Arc<Mutex<Vec<Violation>>>,
}

impl RecordingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn violations(&self) -> Vec<Violation> {
        self.violations.lock().clone()
    }

    pub fn rules(&self) -> Vec<ProtocolRule> {
        self.violations
            .lock()
            .iter()
            .map(|violation| violation.rule)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.lock().is_empty()
    }
}

impl DiagnosticSink for RecordingDiagnostics {
    fn report(&self, violation: &Violation) {
        self.violations.lock().push(violation.clone());
    }
}

/// 只记录调用的订阅对象，用于直接驱动消费方状态机。
#[derive(Default)]
pub struct StubSubscription {
    requests: Mutex<Vec<i64>>,
    cancels: AtomicUsize,
}

impl StubSubscription {
    pub fn requests(&self) -> Vec<i64> {
        self.requests.lock().clone()
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::Acquire)
    }
}

impl Subscription for StubSubscription {
    fn request(&self, n: i64) {
        self.requests.lock().push(n);
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::AcqRel);
    }
}
