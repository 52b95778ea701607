//! 四类协议角色的能力契约，以及跨角色共享的取消原语。
//!
//! # 设计背景（Why）
//! - 生产方、消费方、订阅与变换阶段之间只通过这里声明的 trait 交互，
//!   示例程序、日志适配器与 TCK 都只依赖这一层；
//! - 角色之间不存在继承关系，变换阶段通过 blanket 实现同时具备消费方与生产方能力。
//!
//! # 契约说明（What）
//! - 投递到同一消费方的信号必须严格串行，因此 [`Subscriber`] 的回调全部接收 `&mut self`；
//! - [`Subscription`] 的方法可在任意线程、任意时刻并发调用，因此只接收 `&self`；
//! - 消费方不得在 `on_error`/`on_complete` 回调中回调订阅对象。

use alloc::{boxed::Box, sync::Arc};

#[cfg(not(all(loom, feature = "loom-model")))]
use core::sync::atomic::{AtomicBool, Ordering};
#[cfg(all(loom, feature = "loom-model"))]
use loom::sync::atomic::{AtomicBool, Ordering};

use crate::error::FlowError;

/// 一个生产方与一个消费方之间的活动绑定，是需求与取消的最小单位。
///
/// # 契约说明（What）
/// - `request(n)`：`n > 0` 时累加需求并唤醒发射循环；`n <= 0` 时以唯一一次
///   `on_error(flow.illegal_request)` 终止流；
/// - `cancel()`：幂等，第一次调用生效，之后的调用均为空操作；
/// - 两个方法在订阅终止后仍可安全调用，但不再产生任何效果。
pub trait Subscription: Send + Sync {
    /// 声明额外的 `n` 个元素需求。
    fn request(&self, n: i64);

    /// 请求生产方停止发送信号并释放资源。
    fn cancel(&self);
}

/// 接收元素与终止信号的消费方。
///
/// # 契约说明（What）
/// - 信号顺序：`on_subscribe → on_next* → (on_complete | on_error)?`；
/// - `on_subscribe` 至多一次且先于其它信号；终止信号至多一次；
/// - 回调之间不会并发执行，实现方无需额外加锁即可修改自身状态。
pub trait Subscriber<T>: Send {
    /// 收到订阅对象。消费方通常在这里调用 `request` 声明初始需求。
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>);

    /// 收到一个元素。
    fn on_next(&mut self, item: T);

    /// 流以错误终止。
    fn on_error(&mut self, error: FlowError);

    /// 流正常结束。
    fn on_complete(&mut self);
}

impl<T, S> Subscriber<T> for Box<S>
where
    S: Subscriber<T> + ?Sized,
{
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        (**self).on_subscribe(subscription);
    }

    fn on_next(&mut self, item: T) {
        (**self).on_next(item);
    }

    fn on_error(&mut self, error: FlowError) {
        (**self).on_error(error);
    }

    fn on_complete(&mut self) {
        (**self).on_complete();
    }
}

/// 生产方持有的类型擦除消费方。
pub type BoxSubscriber<T> = Box<dyn Subscriber<T>>;

/// 按需产出元素序列的生产方。
///
/// 每次 `subscribe` 都开启一条独立的订阅生命周期；同一消费方实例至多订阅一次。
pub trait Publisher: Send + Sync {
    /// 产出的元素类型。
    type Item: Send + 'static;

    /// 为 `subscriber` 建立新的订阅，并先于任何其它信号调用其 `on_subscribe`。
    fn subscribe(&self, subscriber: BoxSubscriber<Self::Item>);
}

/// 变换阶段：面向上游是消费方，面向下游是生产方。
pub trait Processor<T>: Subscriber<T> + Publisher {}

impl<T, P> Processor<T> for P where P: Subscriber<T> + Publisher {}

/// 单调的取消标记。
///
/// # 逻辑解析（How）
/// - 内部是共享的 `AtomicBool`，`cancel` 通过 `compare_exchange(false, true)` 实现，
///   因此只有第一次调用返回 `true`，调用方据此保证“资源只释放一次”；
/// - `clone` 得到的句柄共享同一原子位。
///
/// # 契约说明（What）
/// - 一旦变为已取消，永远不会恢复。
#[derive(Clone, Debug)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    /// 创建处于“未取消”状态的标记。
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 查询是否已取消。
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// 标记取消；仅首次成功时返回 `true`。
    pub fn cancel(&self) -> bool {
        self.flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(all(loom, feature = "loom-model"))))]
mod tests {
    use super::*;

    #[test]
    fn only_first_cancel_reports_transition() {
        let token = Cancellation::new();
        let shared = token.clone();
        assert!(!token.is_cancelled());
        assert!(shared.cancel());
        assert!(!token.cancel());
        assert!(token.is_cancelled());
    }
}
