//! 变换阶段：面向上游是消费方，面向下游是生产方，两侧共享一条生命周期。
//!
//! # 设计背景（Why）
//! - 处理器不能暴露两个独立的生命周期：下游的需求决定上游的需求，下游的取消传递给上游，
//!   上游的终止在已校验元素全部投递后传递给下游；
//! - 下游投递复用 [`SubscriptionController`] 的发射循环，处理器只提供一个缓冲来源，
//!   因此串行投递、取消与终止语义与普通生产方完全一致。
//!
//! # 逻辑解析（How）
//! - 上游元素经 [`Transform`] 变换后进入缓冲区，并唤醒下游发射循环；缓冲为空时来源返回
//!   [`SourceEvent::Pending`]；
//! - 下游 `request(n)` 先累加到 `pending_upstream`，在上游订阅就绪后一次性转发；
//!   两侧通过同一把锁串行化“累加需求”与“安装上游订阅”，不会丢失需求；
//! - 被变换丢弃的元素立即向上游补充一个单位需求，保证上游需求与下游需求一一对应；
//! - 下游以任何方式结束（完成、错误、取消、非法请求）时缓冲来源被释放，释放时取消仍然存活的上游。
//!
//! # 契约说明（What）
//! - 单播：第二个下游收到惰性订阅与 `on_error(flow.subscriber_rejected)`；
//! - 下游收到的元素数不超过上游已送达且变换成功的元素数；向上游请求的数量总是正数；
//! - [`RelayStage`] 单调推进：`Idle → AwaitingUpstreamSubscription → Relaying → Terminated`。
//!
//! # 风险提示（Trade-offs）
//! - 上游先于下游订阅时阶段停留在 `Idle`，直到下游到来后直接进入 `Relaying`。

use alloc::{boxed::Box, collections::VecDeque, sync::Arc, sync::Weak};
use core::{
    fmt,
    marker::PhantomData,
    num::NonZeroU64,
    sync::atomic::{AtomicBool, AtomicU8, Ordering},
};

use spin::{Mutex, Once};

use crate::{
    config::FlowConfig,
    contract::{BoxSubscriber, Publisher, Subscriber, Subscription},
    demand::DemandCounter,
    diagnostics::DiagnosticSink,
    error::FlowError,
    publisher::reject,
    scheduler::Scheduler,
    source::{Source, SourceEvent},
    subscriber::SubscriberCore,
    subscription::{Environment, SubscriptionController, Wake},
};

/// 逐元素变换逻辑。
///
/// 返回 `Ok(None)` 表示丢弃该元素；返回错误时流以该错误终止，上游被取消。
pub trait Transform<T>: Send + 'static {
    type Output: Send + 'static;

    fn apply(&mut self, item: T) -> Result<Option<Self::Output>, FlowError>;
}

/// 原样转发。
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl<T: Send + 'static> Transform<T> for Identity {
    type Output = T;

    fn apply(&mut self, item: T) -> Result<Option<T>, FlowError> {
        Ok(Some(item))
    }
}

/// 一对一映射。
#[derive(Clone, Copy, Debug)]
pub struct Map<F>(pub F);

impl<T, U, F> Transform<T> for Map<F>
where
    F: FnMut(T) -> U + Send + 'static,
    U: Send + 'static,
{
    type Output = U;

    fn apply(&mut self, item: T) -> Result<Option<U>, FlowError> {
        Ok(Some((self.0)(item)))
    }
}

/// 仅保留满足谓词的元素。
#[derive(Clone, Copy, Debug)]
pub struct Filter<F>(pub F);

impl<T, F> Transform<T> for Filter<F>
where
    F: FnMut(&T) -> bool + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn apply(&mut self, item: T) -> Result<Option<T>, FlowError> {
        Ok((self.0)(&item).then_some(item))
    }
}

/// 可能失败的映射。
#[derive(Clone, Copy, Debug)]
pub struct TryMap<F>(pub F);

impl<T, U, F> Transform<T> for TryMap<F>
where
    F: FnMut(T) -> Result<U, FlowError> + Send + 'static,
    U: Send + 'static,
{
    type Output = U;

    fn apply(&mut self, item: T) -> Result<Option<U>, FlowError> {
        (self.0)(item).map(Some)
    }
}

/// 处理器生命周期阶段。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RelayStage {
    /// 尚无下游。
    Idle = 0,
    /// 下游已注册，等待上游 `on_subscribe`。
    AwaitingUpstreamSubscription = 1,
    /// 两侧均已就绪。
    Relaying = 2,
    /// 任一侧完成或失败，不可逆。
    Terminated = 3,
}

impl RelayStage {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RelayStage::Idle,
            1 => RelayStage::AwaitingUpstreamSubscription,
            2 => RelayStage::Relaying,
            _ => RelayStage::Terminated,
        }
    }
}

struct RelayBuffer<U> {
    items: VecDeque<U>,
    terminal: Option<Result<(), FlowError>>,
}

struct Relay<T, X: Transform<T>> {
    stage: AtomicU8,
    inlet: SubscriberCore,
    upstream: Mutex<Option<Arc<dyn Subscription>>>,
    pending_upstream: DemandCounter,
    transform: Mutex<X>,
    buffer: Mutex<RelayBuffer<X::Output>>,
    downstream_claimed: AtomicBool,
    waker: Once<Weak<dyn Wake>>,
    env: Environment,
    _marker: PhantomData<fn(T)>,
}

impl<T: Send + 'static, X: Transform<T>> Relay<T, X> {
    fn stage(&self) -> RelayStage {
        RelayStage::from_u8(self.stage.load(Ordering::Acquire))
    }

    fn advance(&self, to: RelayStage) {
        let previous = self.stage.fetch_max(to as u8, Ordering::AcqRel);
        if previous < to as u8 {
            flow_trace!(label = %self.env.config.label, stage = ?to, "relay stage advanced");
        }
    }

    fn wake_downstream(&self) {
        if let Some(waker) = self.waker.get().and_then(Weak::upgrade) {
            waker.wake();
        }
    }

    /// 累加下游需求，上游就绪时立即转发。
    fn demand_upstream(&self, n: NonZeroU64) {
        let forward = {
            let slot = self.upstream.lock();
            self.pending_upstream.increase(n);
            self.take_forwardable(&slot)
        };
        if let Some((subscription, units)) = forward {
            subscription.request(units);
        }
    }

    fn take_forwardable(
        &self,
        slot: &Option<Arc<dyn Subscription>>,
    ) -> Option<(Arc<dyn Subscription>, i64)> {
        let subscription = slot.as_ref()?;
        if self.inlet.is_done() {
            return None;
        }
        let units = self.pending_upstream.take_all();
        (units > 0).then(|| {
            (
                Arc::clone(subscription),
                i64::try_from(units).unwrap_or(i64::MAX),
            )
        })
    }

    fn install_upstream(&self, subscription: Arc<dyn Subscription>) {
        let forward = {
            let mut slot = self.upstream.lock();
            *slot = Some(subscription);
            if self.downstream_claimed.load(Ordering::Acquire) {
                self.advance(RelayStage::Relaying);
            }
            self.take_forwardable(&slot)
        };
        if let Some((subscription, units)) = forward {
            subscription.request(units);
        }
    }

    fn attach_downstream(&self) {
        let slot = self.upstream.lock();
        self.advance(RelayStage::AwaitingUpstreamSubscription);
        if slot.is_some() {
            self.advance(RelayStage::Relaying);
        }
    }

    fn finish_upstream(&self, outcome: Result<(), FlowError>) {
        {
            let mut buffer = self.buffer.lock();
            if buffer.terminal.is_none() {
                buffer.terminal = Some(outcome);
            }
        }
        self.advance(RelayStage::Terminated);
        self.wake_downstream();
    }

    /// 下游结束：取消仍然存活的上游。
    fn detach_downstream(&self) {
        self.inlet.mark_done();
        self.advance(RelayStage::Terminated);
    }
}

/// 下游发射循环使用的缓冲来源。
struct RelaySource<T, X: Transform<T>> {
    relay: Arc<Relay<T, X>>,
}

impl<T: Send + 'static, X: Transform<T>> Source for RelaySource<T, X> {
    type Item = X::Output;

    fn pull(&mut self) -> SourceEvent<X::Output> {
        let mut buffer = self.relay.buffer.lock();
        if let Some(item) = buffer.items.pop_front() {
            return SourceEvent::Item(item);
        }
        match buffer.terminal.take() {
            Some(Ok(())) => SourceEvent::Complete,
            Some(Err(error)) => SourceEvent::Error(error),
            None => SourceEvent::Pending,
        }
    }

    fn poll_terminal(&mut self) -> Option<Result<(), FlowError>> {
        let mut buffer = self.relay.buffer.lock();
        if buffer.items.is_empty() {
            buffer.terminal.take()
        } else {
            None
        }
    }
}

impl<T, X: Transform<T>> Drop for RelaySource<T, X> {
    fn drop(&mut self) {
        self.relay.inlet.mark_done();
        self.relay
            .stage
            .fetch_max(RelayStage::Terminated as u8, Ordering::AcqRel);
    }
}

/// 交给下游消费方的订阅：在下游控制器之外同步转发需求与取消。
struct RelaySubscription<T, X: Transform<T>> {
    downstream: Arc<dyn Subscription>,
    relay: Arc<Relay<T, X>>,
}

impl<T: Send + 'static, X: Transform<T>> Subscription for RelaySubscription<T, X> {
    fn request(&self, n: i64) {
        self.downstream.request(n);
        if let Some(units) = u64::try_from(n).ok().and_then(NonZeroU64::new) {
            self.relay.demand_upstream(units);
        }
    }

    fn cancel(&self) {
        self.downstream.cancel();
        self.relay.detach_downstream();
    }
}

/// 包装下游消费方，把控制器交给它之前替换为 [`RelaySubscription`]。
struct RelayOutlet<T, X: Transform<T>> {
    inner: BoxSubscriber<X::Output>,
    relay: Arc<Relay<T, X>>,
}

impl<T: Send + 'static, X: Transform<T>> Subscriber<X::Output> for RelayOutlet<T, X> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        self.inner.on_subscribe(Arc::new(RelaySubscription {
            downstream: subscription,
            relay: Arc::clone(&self.relay),
        }));
    }

    fn on_next(&mut self, item: X::Output) {
        self.inner.on_next(item);
    }

    fn on_error(&mut self, error: FlowError) {
        self.inner.on_error(error);
    }

    fn on_complete(&mut self) {
        self.inner.on_complete();
    }
}

/// 单播中继处理器的句柄，克隆后共享同一个中继。
///
/// 作为上游的消费方订阅某个生产方，同时作为生产方接受一个下游消费方。
pub struct RelayProcessor<T, X: Transform<T>> {
    relay: Arc<Relay<T, X>>,
}

impl<T: Send + 'static, X: Transform<T>> RelayProcessor<T, X> {
    pub fn new(transform: X) -> Self {
        Self::builder(transform).build()
    }

    pub fn builder(transform: X) -> RelayBuilder<X> {
        RelayBuilder {
            transform,
            env: Environment::default(),
        }
    }

    pub fn stage(&self) -> RelayStage {
        self.relay.stage()
    }

    /// 已从下游累积、尚未转发给上游的需求。
    pub fn pending_upstream_demand(&self) -> u64 {
        self.relay.pending_upstream.current()
    }
}

impl<T: Send + 'static> RelayProcessor<T, Identity> {
    /// 一对一转发的中继。
    pub fn identity() -> Self {
        Self::new(Identity)
    }
}

impl<T, X: Transform<T>> Clone for RelayProcessor<T, X> {
    fn clone(&self) -> Self {
        Self {
            relay: Arc::clone(&self.relay),
        }
    }
}

impl<T: Send + 'static, X: Transform<T>> fmt::Debug for RelayProcessor<T, X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayProcessor")
            .field("label", &self.relay.env.config.label)
            .field("stage", &self.relay.stage())
            .field("pending_upstream", &self.relay.pending_upstream.current())
            .finish()
    }
}

impl<T: Send + 'static, X: Transform<T>> Subscriber<T> for RelayProcessor<T, X> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        if self.relay.inlet.on_subscribe(Arc::clone(&subscription)) {
            self.relay.install_upstream(subscription);
        }
    }

    fn on_next(&mut self, item: T) {
        let Some(upstream) = self.relay.inlet.admit_next() else {
            return;
        };
        let outcome = self.relay.transform.lock().apply(item);
        match outcome {
            Ok(Some(output)) => {
                self.relay.buffer.lock().items.push_back(output);
                self.relay.wake_downstream();
            }
            Ok(None) => upstream.request(1),
            Err(error) => {
                flow_debug!(code = error.code(), "transform failed, cancelling upstream");
                self.relay.inlet.mark_done();
                self.relay.finish_upstream(Err(error));
            }
        }
    }

    fn on_error(&mut self, error: FlowError) {
        if self.relay.inlet.admit_terminal("on_error") {
            self.relay.finish_upstream(Err(error));
        }
    }

    fn on_complete(&mut self) {
        if self.relay.inlet.admit_terminal("on_complete") {
            self.relay.finish_upstream(Ok(()));
        }
    }
}

impl<T: Send + 'static, X: Transform<T>> Publisher for RelayProcessor<T, X> {
    type Item = X::Output;

    fn subscribe(&self, subscriber: BoxSubscriber<X::Output>) {
        let relay = &self.relay;
        if relay.downstream_claimed.swap(true, Ordering::AcqRel) {
            reject(
                subscriber,
                FlowError::subscriber_rejected("处理器只允许一个下游消费方"),
                &relay.env,
                "processor",
            );
            return;
        }

        let source = RelaySource {
            relay: Arc::clone(relay),
        };
        let outlet = RelayOutlet {
            inner: subscriber,
            relay: Arc::clone(relay),
        };
        let controller = SubscriptionController::new(source, Box::new(outlet), &relay.env);
        let waker = Arc::downgrade(&controller);
        let waker: Weak<dyn Wake> = waker;
        relay.waker.call_once(|| waker);
        relay.attach_downstream();
        controller.start();
    }
}

/// [`RelayProcessor`] 的构建器。
pub struct RelayBuilder<X> {
    transform: X,
    env: Environment,
}

impl<X> RelayBuilder<X> {
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.env.scheduler = Some(scheduler);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        self.env.diagnostics = diagnostics;
        self
    }

    pub fn with_config(mut self, config: FlowConfig) -> Self {
        self.env.config = Arc::new(config);
        self
    }

    pub fn build<T>(self) -> RelayProcessor<T, X>
    where
        T: Send + 'static,
        X: Transform<T>,
    {
        let inlet = SubscriberCore::for_component("processor", Arc::clone(&self.env.diagnostics));
        RelayProcessor {
            relay: Arc::new(Relay {
                stage: AtomicU8::new(RelayStage::Idle as u8),
                inlet,
                upstream: Mutex::new(None),
                pending_upstream: DemandCounter::new(),
                transform: Mutex::new(self.transform),
                buffer: Mutex::new(RelayBuffer {
                    items: VecDeque::new(),
                    terminal: None,
                }),
                downstream_claimed: AtomicBool::new(false),
                waker: Once::new(),
                env: self.env,
                _marker: PhantomData,
            }),
        }
    }
}
