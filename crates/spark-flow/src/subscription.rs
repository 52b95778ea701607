//! 订阅控制器：把一个生产方来源绑定到一个消费方的一次流实例。
//!
//! # 设计背景（Why）
//! - `request`/`cancel` 可能来自任意线程，而投递到同一消费方的信号必须严格串行；
//! - 引擎需要在 `no_std` 下工作，不能依赖条件变量阻塞等待需求。
//!
//! # 逻辑解析（How）
//! - 控制器持有一个“待处理工作”计数 `wip`：每次 `request`/`cancel`/唤醒都执行一次 `fetch_add`，
//!   只有把计数从 0 推高的调用方获得投递权，并通过 [`Scheduler`] 安排一次 drain；
//! - drain 的拥有者独占 `emission` 锁，按“非法请求 → 取消 → 订阅 → 需求 → 拉取”的顺序推进，
//!   一轮结束后用 `fetch_sub(missed)` 归还已处理的工作，若期间有新的信号到达则继续下一轮；
//! - 因为拥有者在投递每个元素之前都会重新检查取消标记，取消后至多还有一个已在投递中的元素到达消费方；
//! - 需求为 0 时不拉取来源，只通过 [`Source::poll_terminal`] 探测是否可以立即完成。
//!
//! # 契约说明（What）
//! - `on_subscribe` 总是第一个信号；终止信号恰好一次；终止或取消后来源与消费方各被释放一次；
//! - `request(n <= 0)`：立即把订阅标记为取消，报告 [`ProtocolRule::NonPositiveRequest`]，
//!   随后由 drain 投递唯一一次 `on_error(flow.illegal_request)`；
//! - 终止或取消后的 `request`/`cancel` 均为空操作。
//!
//! # 风险提示（Trade-offs）
//! - 消费方回调在持有 `emission` 锁时执行。回调中对同一订阅的 `request`/`cancel` 只会累加 `wip`，
//!   不会尝试获取该锁，因此不存在自锁。

use alloc::{boxed::Box, format, sync::Arc, sync::Weak};
use core::{
    fmt,
    num::NonZeroU64,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};

use spin::Mutex;

use crate::{
    config::FlowConfig,
    contract::{BoxSubscriber, Cancellation, Subscription},
    demand::DemandCounter,
    diagnostics::{self, DiagnosticSink, ProtocolRule, Violation},
    error::FlowError,
    scheduler::{InlineScheduler, Scheduler},
    source::{Source, SourceEvent},
};

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// 进程内唯一的订阅编号，仅用于日志关联。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// 内部唤醒能力：缓冲来源在有新元素或终止信号时借此重新调度下游 drain。
pub(crate) trait Wake: Send + Sync {
    fn wake(&self);
}

/// 构造订阅控制器所需的运行环境，由生产方与处理器的构建器方法填充。
#[derive(Clone)]
pub(crate) struct Environment {
    pub(crate) scheduler: Option<Arc<dyn Scheduler>>,
    pub(crate) diagnostics: Arc<dyn DiagnosticSink>,
    pub(crate) config: Arc<FlowConfig>,
}

impl Environment {
    /// 未显式配置调度器时，每个订阅使用独立的蹦床调度器。
    fn scheduler_for_subscription(&self) -> Arc<dyn Scheduler> {
        match &self.scheduler {
            Some(scheduler) => Arc::clone(scheduler),
            None => Arc::new(InlineScheduler::new()),
        }
    }

    pub(crate) fn report(&self, violation: Violation) {
        self.diagnostics.report(&violation);
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            scheduler: None,
            diagnostics: diagnostics::default_sink(),
            config: Arc::new(FlowConfig::default()),
        }
    }
}

/// 已经失效的订阅：`request` 与 `cancel` 均不产生任何效果。
///
/// 用于拒绝订阅的场景，消费方仍然先收到 `on_subscribe`，再收到唯一的 `on_error`。
#[derive(Clone, Copy, Debug, Default)]
pub struct InertSubscription;

impl Subscription for InertSubscription {
    fn request(&self, _n: i64) {}

    fn cancel(&self) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Active,
    Terminated,
}

/// 只有 drain 拥有者才能访问的投递状态。
struct Emission<S: Source> {
    phase: Phase,
    subscribed: bool,
    source: Option<S>,
    subscriber: Option<BoxSubscriber<S::Item>>,
}

enum Pass {
    /// 没有可做的工作，归还 `wip`。
    Idle,
    /// 达到批量上限，保留投递权并重新调度。
    Yield,
}

/// 单次 drain 的批量配额；未设上限时不计数。
struct BatchBudget {
    limit: Option<u32>,
    emitted: u32,
}

impl BatchBudget {
    fn new(limit: Option<u32>) -> Self {
        Self { limit, emitted: 0 }
    }

    fn exhausted(&self) -> bool {
        self.limit.is_some_and(|limit| self.emitted >= limit)
    }

    fn record(&mut self) {
        if self.limit.is_some() {
            self.emitted += 1;
        }
    }
}

/// 一次流实例的订阅控制器，实现 [`Subscription`] 契约。
pub struct SubscriptionController<S: Source> {
    id: SubscriptionId,
    me: Weak<Self>,
    demand: DemandCounter,
    cancellation: Cancellation,
    rejected_request: Mutex<Option<i64>>,
    wip: AtomicUsize,
    emission: Mutex<Emission<S>>,
    scheduler: Arc<dyn Scheduler>,
    diagnostics: Arc<dyn DiagnosticSink>,
    config: Arc<FlowConfig>,
}

impl<S: Source> SubscriptionController<S> {
    /// 创建尚未启动的控制器；调用 [`start`](Self::start) 之前不会向消费方发送任何信号。
    pub(crate) fn new(
        source: S,
        subscriber: BoxSubscriber<S::Item>,
        env: &Environment,
    ) -> Arc<Self> {
        let controller = Arc::new_cyclic(|me| Self {
            id: SubscriptionId::next(),
            me: me.clone(),
            demand: DemandCounter::new(),
            cancellation: Cancellation::new(),
            rejected_request: Mutex::new(None),
            wip: AtomicUsize::new(0),
            emission: Mutex::new(Emission {
                phase: Phase::Active,
                subscribed: false,
                source: Some(source),
                subscriber: Some(subscriber),
            }),
            scheduler: env.scheduler_for_subscription(),
            diagnostics: Arc::clone(&env.diagnostics),
            config: Arc::clone(&env.config),
        });
        flow_debug!(
            subscription = %controller.id,
            label = %controller.config.label,
            "subscription created"
        );
        controller
    }

    /// 安排首次 drain，由它投递 `on_subscribe`。
    pub(crate) fn start(&self) {
        self.signal();
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// 当前尚未满足的需求。
    pub fn outstanding_demand(&self) -> u64 {
        self.demand.current()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    fn signal(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) == 0 {
            self.schedule_drain(1);
        }
    }

    fn schedule_drain(&self, missed: usize) {
        if let Some(me) = self.me.upgrade() {
            self.scheduler.schedule(Box::new(move || me.drain(missed)));
        }
    }

    fn drain(&self, mut missed: usize) {
        let mut budget = BatchBudget::new(self.config.batch_limit());
        loop {
            let pass = {
                let mut emission = self.emission.lock();
                self.run_pass(&mut emission, &mut budget)
            };
            if let Pass::Yield = pass {
                flow_trace!(subscription = %self.id, "drain yielded after batch");
                self.schedule_drain(missed);
                return;
            }
            let previous = self.wip.fetch_sub(missed, Ordering::AcqRel);
            missed = previous - missed;
            if missed == 0 {
                return;
            }
        }
    }

    fn run_pass(&self, emission: &mut Emission<S>, budget: &mut BatchBudget) -> Pass {
        loop {
            if emission.phase == Phase::Terminated {
                return Pass::Idle;
            }
            let rejected = self.rejected_request.lock().take();
            if let Some(n) = rejected {
                self.terminate(emission, Err(FlowError::illegal_request(n)));
                return Pass::Idle;
            }
            if self.cancellation.is_cancelled() {
                // 非法请求先登记再置取消标志；两次读取之间可能恰好完成登记。
                let rejected = self.rejected_request.lock().take();
                match rejected {
                    Some(n) => self.terminate(emission, Err(FlowError::illegal_request(n))),
                    None => self.release(emission),
                }
                return Pass::Idle;
            }
            if !emission.subscribed {
                emission.subscribed = true;
                if let (Some(subscriber), Some(me)) =
                    (emission.subscriber.as_mut(), self.me.upgrade())
                {
                    subscriber.on_subscribe(me);
                }
                continue;
            }

            let Some(source) = emission.source.as_mut() else {
                self.release(emission);
                return Pass::Idle;
            };
            if self.demand.is_zero() {
                if let Some(outcome) = source.poll_terminal() {
                    self.terminate(emission, outcome);
                }
                return Pass::Idle;
            }
            if budget.exhausted() {
                return Pass::Yield;
            }

            match source.pull() {
                SourceEvent::Item(item) => {
                    self.demand.try_consume_one();
                    budget.record();
                    if let Some(subscriber) = emission.subscriber.as_mut() {
                        subscriber.on_next(item);
                    }
                }
                SourceEvent::Pending => return Pass::Idle,
                SourceEvent::Complete => {
                    self.terminate(emission, Ok(()));
                    return Pass::Idle;
                }
                SourceEvent::Error(error) => {
                    self.terminate(emission, Err(error));
                    return Pass::Idle;
                }
            }
        }
    }

    /// 投递唯一的终止信号并释放资源。
    fn terminate(&self, emission: &mut Emission<S>, outcome: Result<(), FlowError>) {
        emission.phase = Phase::Terminated;
        self.cancellation.cancel();
        drop(emission.source.take());
        let Some(mut subscriber) = emission.subscriber.take() else {
            return;
        };
        match outcome {
            Ok(()) => {
                flow_debug!(subscription = %self.id, "subscription completed");
                subscriber.on_complete();
            }
            Err(error) => {
                flow_debug!(subscription = %self.id, code = error.code(), "subscription failed");
                subscriber.on_error(error);
            }
        }
    }

    /// 取消后的静默释放：不发送任何信号。
    fn release(&self, emission: &mut Emission<S>) {
        emission.phase = Phase::Terminated;
        let source = emission.source.take();
        let subscriber = emission.subscriber.take();
        if source.is_some() || subscriber.is_some() {
            flow_trace!(subscription = %self.id, "subscription resources released");
        }
    }
}

impl<S: Source> Subscription for SubscriptionController<S> {
    fn request(&self, n: i64) {
        if self.cancellation.is_cancelled() {
            return;
        }
        match u64::try_from(n).ok().and_then(NonZeroU64::new) {
            Some(units) => {
                self.demand.increase(units);
            }
            None => {
                {
                    let mut slot = self.rejected_request.lock();
                    if self.cancellation.is_cancelled() || slot.is_some() {
                        return;
                    }
                    *slot = Some(n);
                }
                self.cancellation.cancel();
                self.diagnostics.report(&Violation::new(
                    ProtocolRule::NonPositiveRequest,
                    "subscription",
                    "request",
                    format!("{}/{}: request({n})", self.config.label, self.id),
                ));
            }
        }
        self.signal();
    }

    fn cancel(&self) {
        if self.cancellation.cancel() {
            flow_debug!(subscription = %self.id, "subscription cancelled");
            self.signal();
        }
    }
}

impl<S: Source> Wake for SubscriptionController<S> {
    fn wake(&self) {
        self.signal();
    }
}

impl<S: Source> fmt::Debug for SubscriptionController<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionController")
            .field("id", &self.id)
            .field("demand", &self.demand.current())
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        source::IterSource,
        test_stubs::{DemandPlan, RecordingDiagnostics, RecordingSubscriber, Signal},
    };
    use alloc::vec::Vec;

    fn env_with(diagnostics: &RecordingDiagnostics) -> Environment {
        Environment {
            diagnostics: Arc::new(diagnostics.clone()),
            ..Environment::default()
        }
    }

    #[test]
    fn on_subscribe_precedes_items_and_completion() {
        let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::Initial(10));
        let controller = SubscriptionController::new(
            IterSource::new(1..=3),
            Box::new(subscriber),
            &Environment::default(),
        );
        controller.start();

        assert_eq!(
            recorder.signals(),
            [
                Signal::Subscribed,
                Signal::Next(1),
                Signal::Next(2),
                Signal::Next(3),
                Signal::Complete,
            ]
        );
        assert!(controller.is_cancelled());
    }

    #[test]
    fn zero_request_fails_once_and_is_reported() {
        let diagnostics = RecordingDiagnostics::new();
        let (subscriber, recorder) = RecordingSubscriber::<u32>::new(DemandPlan::Manual);
        let controller = SubscriptionController::new(
            IterSource::new(0..100u32),
            Box::new(subscriber),
            &env_with(&diagnostics),
        );
        controller.start();

        recorder.request(0);
        recorder.request(-7);
        recorder.request(5);

        assert_eq!(recorder.items(), Vec::<u32>::new());
        assert_eq!(recorder.error_codes(), ["flow.illegal_request"]);
        assert_eq!(recorder.terminal_count(), 1);
        assert_eq!(diagnostics.rules(), [ProtocolRule::NonPositiveRequest]);
    }

    #[test]
    fn batch_limit_yields_without_losing_items() {
        let env = Environment {
            config: Arc::new(FlowConfig::default().with_drain_batch(2)),
            ..Environment::default()
        };
        let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::Initial(i64::MAX));
        SubscriptionController::new(IterSource::new(0..7), Box::new(subscriber), &env).start();

        assert_eq!(recorder.items(), (0..7).collect::<Vec<_>>());
        assert!(recorder.is_completed());
    }

    #[test]
    fn unbounded_budget_never_counts_or_yields() {
        let mut budget = BatchBudget::new(None);
        budget.emitted = u32::MAX;
        budget.record();
        assert_eq!(budget.emitted, u32::MAX);
        assert!(!budget.exhausted());

        let mut bounded = BatchBudget::new(Some(2));
        bounded.record();
        assert!(!bounded.exhausted());
        bounded.record();
        assert!(bounded.exhausted());
    }

    #[test]
    fn zero_drain_batch_delivers_everything_in_one_drain() {
        let env = Environment {
            config: Arc::new(FlowConfig::default().with_drain_batch(0)),
            ..Environment::default()
        };
        let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::Initial(i64::MAX));
        SubscriptionController::new(IterSource::new(0..10_000u32), Box::new(subscriber), &env)
            .start();

        assert_eq!(recorder.next_count(), 10_000);
        assert!(recorder.is_completed());
    }
}
