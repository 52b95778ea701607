#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![doc = "spark-flow: 以消费方需求驱动背压（backpressure）的异步流协议引擎。"]
#![doc = ""]
#![doc = "== 角色划分 =="]
#![doc = "1. 生产方 [`Publisher`]：每次 `subscribe` 都开启一条独立的订阅生命周期。"]
#![doc = "2. 消费方 [`Subscriber`]：按 `on_subscribe → on_next* → (on_complete | on_error)` 的顺序接收信号。"]
#![doc = "3. 订阅 [`Subscription`]：消费方通过 `request(n)` 声明需求、通过 `cancel()` 终止。"]
#![doc = "4. 变换阶段 [`Processor`]：同时扮演上游消费方与下游生产方。"]
#![doc = ""]
#![doc = "== 内存分配依赖 =="]
#![doc = "`spark-flow` 定位于 `no_std + alloc` 场景：订阅控制器、信号缓冲与调度任务都依赖 `Arc`、`Box`、`VecDeque`。"]
#![doc = "`std` Feature 额外开启基于线程的调度器与 TOML 配置解析。"]

extern crate alloc;

#[macro_use]
mod macros;

pub mod config;
pub mod contract;
pub mod demand;
pub mod diagnostics;
pub mod error;
pub mod processor;
pub mod publisher;
pub mod scheduler;
pub mod source;
pub mod subscriber;
pub mod subscription;
/// 测试桩命名空间，集中暴露记录型消费方与诊断汇聚器，供集成测试与 TCK 复用。
///
/// # 设计背景（Why）
/// - 协议测试几乎都需要“记录收到了哪些信号”的消费方，集中维护可避免各处重复定义；
/// - 当契约演进时，通过单点更新保证所有测试同步适配。
pub mod test_stubs;

pub use config::FlowConfig;
pub use contract::{BoxSubscriber, Cancellation, Processor, Publisher, Subscriber, Subscription};
pub use demand::{DemandCounter, MAX_DEMAND};
pub use diagnostics::{DiagnosticSink, NoopDiagnostics, ProtocolRule, Violation, default_sink};
#[cfg(feature = "tracing")]
pub use diagnostics::TracingDiagnostics;
pub use error::{FlowError, FlowErrorKind, Result, codes};
pub use processor::{
    Filter, Identity, Map, RelayBuilder, RelayProcessor, RelayStage, Transform, TryMap,
};
pub use publisher::SourcePublisher;
pub use scheduler::{InlineScheduler, Scheduler, Task};
#[cfg(feature = "std")]
pub use scheduler::ThreadScheduler;
pub use source::{FnSource, IterSource, Source, SourceEvent, SourceFactory, TryIterSource};
pub use subscriber::{
    DoneHandle, FnHandler, NextHandler, SubscriberCore, SubscriberState, SyncSubscriber,
};
pub use subscription::{InertSubscription, SubscriptionController, SubscriptionId};
