//! 消费方侧的信号顺序状态机，以及基于它的同步消费方。
//!
//! # 设计背景（Why）
//! - 无论消费方如何处理元素，“先 `on_subscribe`、再若干 `on_next`、最多一个终止信号”的顺序都需要被校验；
//!   把这部分抽成 [`SubscriberCore`]，具体消费方只关心元素本身；
//! - 生产方违反顺序时不能把错误抛回去，只能报告给诊断通道并忽略该信号。
//!
//! # 逻辑解析（How）
//! - 状态是一个原子字节：`UNSUBSCRIBED → SUBSCRIBED → DONE → TERMINATED`，其中 `DONE` 表示消费方已主动停止；
//! - “标记完成并取消订阅”通过 CAS 完成，可与信号投递并发执行且恰好生效一次；
//! - 订阅对象存放在只写一次的槽位中，第二次 `on_subscribe` 无法覆盖它。
//!
//! # 契约说明（What）
//! - 终止之后收到的任何信号只报告，不会回调订阅对象；
//! - `Unsubscribed` 状态下收到的 `on_next`/`on_complete`/`on_error` 报告为
//!   [`ProtocolRule::SignalBeforeSubscribe`]，同样不回调订阅对象。

use alloc::sync::Arc;
use core::{
    fmt,
    marker::PhantomData,
    sync::atomic::{AtomicU8, Ordering},
};

use spin::Once;

use crate::{
    contract::{Subscriber, Subscription},
    diagnostics::{self, DiagnosticSink, ProtocolRule, Violation},
    error::FlowError,
};

const UNSUBSCRIBED: u8 = 0;
const SUBSCRIBED: u8 = 1;
const DONE: u8 = 2;
const TERMINATED: u8 = 3;

/// 对外可见的消费方状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriberState {
    Unsubscribed,
    Subscribed,
    Terminated,
}

/// 消费方信号顺序的守护者，可在线程间共享。
pub struct SubscriberCore {
    state: AtomicU8,
    subscription: Once<Arc<dyn Subscription>>,
    diagnostics: Arc<dyn DiagnosticSink>,
    component: &'static str,
}

impl SubscriberCore {
    pub fn new(diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        Self::for_component("subscriber", diagnostics)
    }

    /// 指定出现在违规报告中的组件名。
    pub fn for_component(component: &'static str, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            state: AtomicU8::new(UNSUBSCRIBED),
            subscription: Once::new(),
            diagnostics,
            component,
        }
    }

    pub fn state(&self) -> SubscriberState {
        match self.state.load(Ordering::Acquire) {
            UNSUBSCRIBED => SubscriberState::Unsubscribed,
            SUBSCRIBED | DONE => SubscriberState::Subscribed,
            _ => SubscriberState::Terminated,
        }
    }

    /// 消费方是否已停止（主动标记完成或已收到终止信号）。
    pub fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) >= DONE
    }

    /// 处于正常订阅状态时返回订阅对象。
    pub fn active_subscription(&self) -> Option<Arc<dyn Subscription>> {
        if self.state.load(Ordering::Acquire) == SUBSCRIBED {
            self.subscription.get().cloned()
        } else {
            None
        }
    }

    /// 处理 `on_subscribe`，返回 `true` 表示订阅被接受，调用方可以开始请求元素。
    ///
    /// - 已终止：报告 [`ProtocolRule::SignalAfterTerminal`]，不触碰新订阅；
    /// - 已有订阅：取消新订阅并报告 [`ProtocolRule::DuplicateSubscription`]；
    /// - 订阅前已被标记完成：接收后立即取消，返回 `false`。
    pub fn on_subscribe(&self, subscription: Arc<dyn Subscription>) -> bool {
        if self.state.load(Ordering::Acquire) == TERMINATED {
            self.report(ProtocolRule::SignalAfterTerminal, "on_subscribe", "流已终止");
            return false;
        }

        let mut installed = false;
        self.subscription.call_once(|| {
            installed = true;
            Arc::clone(&subscription)
        });
        if !installed {
            self.report(
                ProtocolRule::DuplicateSubscription,
                "on_subscribe",
                "已持有订阅，新的订阅被取消",
            );
            subscription.cancel();
            return false;
        }

        match self.state.compare_exchange(
            UNSUBSCRIBED,
            SUBSCRIBED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(DONE) => {
                subscription.cancel();
                false
            }
            Err(_) => false,
        }
    }

    /// 校验 `on_next` 是否可以被处理，可以时返回用于补充需求的订阅对象。
    ///
    /// 已标记完成的消费方静默丢弃在途元素；未订阅或已终止时报告违规。
    pub fn admit_next(&self) -> Option<Arc<dyn Subscription>> {
        match self.state.load(Ordering::Acquire) {
            SUBSCRIBED => self.subscription.get().cloned(),
            DONE => None,
            UNSUBSCRIBED => {
                self.report(
                    ProtocolRule::SignalBeforeSubscribe,
                    "on_next",
                    "尚未收到 on_subscribe",
                );
                None
            }
            _ => {
                self.report(ProtocolRule::SignalAfterTerminal, "on_next", "流已终止");
                None
            }
        }
    }

    /// 处理终止信号，返回 `true` 表示这是一次有效的终止且消费方此前仍在接收元素。
    ///
    /// 已标记完成的消费方会静默转入终止状态并返回 `false`。
    pub fn admit_terminal(&self, signal: &'static str) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            match current {
                UNSUBSCRIBED => {
                    self.report(ProtocolRule::SignalBeforeSubscribe, signal, "尚未收到 on_subscribe");
                    return false;
                }
                TERMINATED => {
                    self.report(ProtocolRule::SignalAfterTerminal, signal, "重复的终止信号");
                    return false;
                }
                _ => match self.state.compare_exchange(
                    current,
                    TERMINATED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(previous) => return previous == SUBSCRIBED,
                    Err(actual) => current = actual,
                },
            }
        }
    }

    /// 标记消费方已停止并取消订阅；只有第一次调用返回 `true`。
    pub fn mark_done(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= DONE {
                return false;
            }
            match self
                .state
                .compare_exchange(current, DONE, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        if let Some(subscription) = self.subscription.get() {
            subscription.cancel();
        }
        true
    }

    pub(crate) fn report_handler_failure(&self, error: &FlowError) {
        self.report(
            ProtocolRule::HandlerFailed,
            "on_next",
            alloc::format!("{error}"),
        );
    }

    fn report(
        &self,
        rule: ProtocolRule,
        signal: &'static str,
        detail: impl Into<alloc::borrow::Cow<'static, str>>,
    ) {
        self.diagnostics
            .report(&Violation::new(rule, self.component, signal, detail));
    }
}

impl fmt::Debug for SubscriberCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberCore")
            .field("component", &self.component)
            .field("state", &self.state())
            .field("done", &self.is_done())
            .finish()
    }
}

/// 同步消费方的元素处理逻辑。
pub trait NextHandler<T>: Send {
    /// 处理一个元素；返回 `Ok(true)` 继续请求下一个，`Ok(false)` 停止并取消订阅。
    ///
    /// 返回错误时消费方报告 [`ProtocolRule::HandlerFailed`] 并停止。
    fn when_next(&mut self, item: T) -> Result<bool, FlowError>;

    fn when_complete(&mut self) {}

    fn when_error(&mut self, _error: FlowError) {}
}

/// 把闭包适配为 [`NextHandler`]。
pub struct FnHandler<F>(F);

impl<F> FnHandler<F> {
    pub fn new(handler: F) -> Self {
        Self(handler)
    }
}

impl<T, F> NextHandler<T> for FnHandler<F>
where
    F: FnMut(T) -> Result<bool, FlowError> + Send,
{
    fn when_next(&mut self, item: T) -> Result<bool, FlowError> {
        (self.0)(item)
    }
}

/// 跨线程标记消费方完成的句柄。
#[derive(Clone, Debug)]
pub struct DoneHandle {
    core: Arc<SubscriberCore>,
}

impl DoneHandle {
    /// 标记完成并取消订阅，可重复调用。
    pub fn mark_done(&self) -> bool {
        self.core.mark_done()
    }

    pub fn is_done(&self) -> bool {
        self.core.is_done()
    }
}

/// 每次请求一个元素的同步消费方。
///
/// # 逻辑解析（How）
/// - `on_subscribe` 被接受后立即 `request(1)`；
/// - 每个被接受的元素交给 [`NextHandler::when_next`]，根据返回值 `request(1)` 或标记完成；
/// - 终止信号只在消费方仍处于接收状态时转交给处理器。
pub struct SyncSubscriber<T, H> {
    core: Arc<SubscriberCore>,
    handler: H,
    _marker: PhantomData<fn(T)>,
}

impl<T, H: NextHandler<T>> SyncSubscriber<T, H> {
    pub fn new(handler: H) -> Self {
        Self::with_diagnostics(handler, diagnostics::default_sink())
    }

    pub fn with_diagnostics(handler: H, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            core: Arc::new(SubscriberCore::new(diagnostics)),
            handler,
            _marker: PhantomData,
        }
    }

    pub fn state(&self) -> SubscriberState {
        self.core.state()
    }

    pub fn done_handle(&self) -> DoneHandle {
        DoneHandle {
            core: Arc::clone(&self.core),
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }
}

impl<T, F> SyncSubscriber<T, FnHandler<F>>
where
    F: FnMut(T) -> Result<bool, FlowError> + Send,
{
    /// 以闭包作为元素处理逻辑。
    pub fn from_fn(handler: F) -> Self {
        Self::new(FnHandler(handler))
    }
}

impl<T, H: NextHandler<T>> Subscriber<T> for SyncSubscriber<T, H> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        if self.core.on_subscribe(Arc::clone(&subscription)) {
            subscription.request(1);
        }
    }

    fn on_next(&mut self, item: T) {
        let Some(subscription) = self.core.admit_next() else {
            return;
        };
        match self.handler.when_next(item) {
            Ok(true) => subscription.request(1),
            Ok(false) => {
                self.core.mark_done();
            }
            Err(error) => {
                self.core.report_handler_failure(&error);
                self.core.mark_done();
            }
        }
    }

    fn on_error(&mut self, error: FlowError) {
        if self.core.admit_terminal("on_error") {
            self.handler.when_error(error);
        }
    }

    fn on_complete(&mut self) {
        if self.core.admit_terminal("on_complete") {
            self.handler.when_complete();
        }
    }
}

impl<T, H> fmt::Debug for SyncSubscriber<T, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSubscriber")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}
