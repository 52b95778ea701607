//! 基于 [`SourceFactory`] 的生产方实现。
//!
//! # 设计背景（Why）
//! - 每次 `subscribe` 都是一条独立的生命周期：同一生产方描述被多个消费方订阅时，
//!   每个订阅各自从头拉取一个新的来源；
//! - 生产方本身不保存任何订阅，订阅控制器与消费方之间的引用在终止或取消时解除。
//!
//! # 契约说明（What）
//! - `subscribe` 先于任何其它信号投递 `on_subscribe`；
//! - 来源构造失败时，消费方收到一个惰性订阅与唯一一次 `on_error`，并向诊断通道报告
//!   [`ProtocolRule::SubscriberRejected`]。

use alloc::{format, sync::Arc};
use core::{fmt, ops::Range};

use crate::{
    config::FlowConfig,
    contract::{BoxSubscriber, Publisher},
    diagnostics::{DiagnosticSink, ProtocolRule, Violation},
    error::FlowError,
    scheduler::Scheduler,
    source::{FnSource, IterSource, Source, SourceFactory, TryIterSource},
    subscription::{Environment, InertSubscription, SubscriptionController},
};

/// 为每个订阅构造独立来源并驱动发射循环的生产方。
pub struct SourcePublisher<F> {
    factory: F,
    env: Environment,
}

impl<F: SourceFactory> SourcePublisher<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            env: Environment::default(),
        }
    }

    /// 指定执行 drain 的调度器；未指定时每个订阅在调用线程上以蹦床方式推进。
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

    pub fn config(&self) -> &FlowConfig {
        &self.env.config
    }
}

impl<F: SourceFactory> Publisher for SourcePublisher<F> {
    type Item = <F::Source as Source>::Item;

    fn subscribe(&self, subscriber: BoxSubscriber<Self::Item>) {
        match self.factory.create() {
            Ok(source) => SubscriptionController::new(source, subscriber, &self.env).start(),
            Err(error) => reject(subscriber, error, &self.env, "publisher"),
        }
    }
}

impl<F> fmt::Debug for SourcePublisher<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourcePublisher")
            .field("label", &self.env.config.label)
            .field("scheduler", &self.env.scheduler.is_some())
            .finish()
    }
}

/// 以“惰性订阅 + 唯一 `on_error`”拒绝一个消费方。
pub(crate) fn reject<T>(
    mut subscriber: BoxSubscriber<T>,
    error: FlowError,
    env: &Environment,
    component: &'static str,
) {
    env.report(Violation::new(
        ProtocolRule::SubscriberRejected,
        component,
        "subscribe",
        format!("{}: {}", env.config.label, error),
    ));
    flow_debug!(component, code = error.code(), "subscriber rejected");
    subscriber.on_subscribe(Arc::new(InertSubscription));
    subscriber.on_error(error);
}

/// 每个订阅重新遍历 `items` 的克隆。
pub fn from_iter<I>(
    items: I,
) -> SourcePublisher<impl SourceFactory<Source = IterSource<I::IntoIter>>>
where
    I: IntoIterator + Clone + Send + Sync + 'static,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
{
    SourcePublisher::new(move || Ok::<_, FlowError>(IterSource::new(items.clone())))
}

/// 每个订阅重新遍历 `items` 的克隆，遇到第一个 `Err` 即以错误终止。
pub fn from_result_iter<I, T>(
    items: I,
) -> SourcePublisher<impl SourceFactory<Source = TryIterSource<I::IntoIter>>>
where
    I: IntoIterator<Item = Result<T, FlowError>> + Clone + Send + Sync + 'static,
    I::IntoIter: Send + 'static,
    T: Send + 'static,
{
    SourcePublisher::new(move || Ok::<_, FlowError>(TryIterSource::new(items.clone())))
}

/// 从 `start` 开始的 `count` 个连续整数。
pub fn range(
    start: u64,
    count: u64,
) -> SourcePublisher<impl SourceFactory<Source = IterSource<Range<u64>>>> {
    let end = start.saturating_add(count);
    SourcePublisher::new(move || Ok::<_, FlowError>(IterSource::new(start..end)))
}

/// 由生成器驱动的生产方；`make` 为每个订阅构造一个新的生成器。
pub fn generate<T, G, M>(make: M) -> SourcePublisher<impl SourceFactory<Source = FnSource<G>>>
where
    M: Fn() -> G + Send + Sync + 'static,
    G: FnMut() -> Option<Result<T, FlowError>> + Send + 'static,
    T: Send + 'static,
{
    SourcePublisher::new(move || Ok::<_, FlowError>(FnSource::new(make())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::codes,
        test_stubs::{DemandPlan, RecordingDiagnostics, RecordingSubscriber, Signal},
    };
    use alloc::{boxed::Box, vec, vec::Vec};

    #[test]
    fn every_subscribe_replays_from_the_start() {
        let publisher = from_iter(vec!['a', 'b']);
        let (first, first_recorder) = RecordingSubscriber::new(DemandPlan::Initial(5));
        let (second, second_recorder) = RecordingSubscriber::new(DemandPlan::OneByOne);
        publisher.subscribe(Box::new(first));
        publisher.subscribe(Box::new(second));

        assert_eq!(first_recorder.items(), ['a', 'b']);
        assert_eq!(second_recorder.items(), ['a', 'b']);
        assert!(first_recorder.is_completed() && second_recorder.is_completed());
    }

    #[test]
    fn factory_failure_rejects_with_inert_subscription() {
        let diagnostics = RecordingDiagnostics::new();
        let publisher = SourcePublisher::new(|| {
            Err::<IterSource<Range<u64>>, _>(FlowError::new(
                codes::SOURCE_UNAVAILABLE,
                "连接池耗尽",
            ))
        })
        .with_diagnostics(Arc::new(diagnostics.clone()));

        let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::Initial(3));
        publisher.subscribe(Box::new(subscriber));

        assert!(matches!(recorder.signals().first(), Some(Signal::Subscribed)));
        assert_eq!(recorder.error_codes(), [codes::SOURCE_UNAVAILABLE]);
        assert_eq!(recorder.items(), Vec::<u64>::new());
        assert_eq!(diagnostics.rules(), [ProtocolRule::SubscriberRejected]);
    }

    #[test]
    fn generator_state_is_fresh_per_subscription() {
        let publisher = generate(|| {
            let mut next = 0u32;
            move || {
                next += 1;
                Some(Ok::<_, FlowError>(next))
            }
        });
        for _ in 0..2 {
            let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::CancelAfter(3));
            publisher.subscribe(Box::new(subscriber));
            assert_eq!(recorder.items(), [1, 2, 3]);
            assert_eq!(recorder.terminal_count(), 0);
        }
    }

    #[test]
    fn range_saturates_at_the_upper_bound() {
        let publisher = range(u64::MAX - 1, 10);
        let (subscriber, recorder) = RecordingSubscriber::new(DemandPlan::Initial(i64::MAX));
        publisher.subscribe(Box::new(subscriber));
        assert_eq!(recorder.items(), [u64::MAX - 1]);
        assert!(recorder.is_completed());
    }
}
