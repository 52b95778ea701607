//! 协议违规的诊断通道。
//!
//! # 设计背景（Why）
//! - 协议违规（例如在 `on_subscribe` 之前收到 `on_next`）不能抛回违规方，
//!   只能由接收方采取安全默认动作，并把事实写入一个只写的旁路通道；
//! - 通道以 trait 形式注入每个组件，测试可以替换为记录型实现并对违规报告断言。
//!
//! # 契约说明（What）
//! - [`DiagnosticSink::report`] 可能在任意线程、任意信号回调内部被调用，实现必须无阻塞且不得回调协议对象；
//! - 默认实现由 [`default_sink`] 给出：启用 `tracing` Feature 时为 [`TracingDiagnostics`]，
//!   否则为 [`NoopDiagnostics`]。

use alloc::{borrow::Cow, sync::Arc};
use core::fmt;

/// 可被检测到的协议规则。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ProtocolRule {
    /// 在 `on_subscribe` 之前收到了 `on_next`/`on_complete`/`on_error`。
    SignalBeforeSubscribe,
    /// 终止信号之后又收到了信号。
    SignalAfterTerminal,
    /// 同一消费方收到了第二次 `on_subscribe`。
    DuplicateSubscription,
    /// `request(n)` 携带了非正数。
    NonPositiveRequest,
    /// 消费方的元素处理回调返回错误。
    HandlerFailed,
    /// 生产方拒绝了订阅。
    SubscriberRejected,
}

impl ProtocolRule {
    /// 稳定的规则码，用于日志检索与告警规则。
    pub const fn code(self) -> &'static str {
        match self {
            ProtocolRule::SignalBeforeSubscribe => "protocol.signal_before_subscribe",
            ProtocolRule::SignalAfterTerminal => "protocol.signal_after_terminal",
            ProtocolRule::DuplicateSubscription => "protocol.duplicate_subscription",
            ProtocolRule::NonPositiveRequest => "protocol.non_positive_request",
            ProtocolRule::HandlerFailed => "protocol.handler_failed",
            ProtocolRule::SubscriberRejected => "protocol.subscriber_rejected",
        }
    }
}

impl fmt::Display for ProtocolRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// 一条违规记录。
///
/// `component` 标识检测到违规的组件（例如 `"subscriber"`），`signal` 标识触发违规的信号名。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    pub rule: ProtocolRule,
    pub component: &'static str,
    pub signal: &'static str,
    pub detail: Cow<'static, str>,
}

impl Violation {
    pub fn new(
        rule: ProtocolRule,
        component: &'static str,
        signal: &'static str,
        detail: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            rule,
            component,
            signal,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}::{}: {}",
            self.rule.code(),
            self.component,
            self.signal,
            self.detail
        )
    }
}

/// 违规报告的汇聚点。
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, violation: &Violation);
}

impl<F> DiagnosticSink for F
where
    F: Fn(&Violation) + Send + Sync,
{
    fn report(&self, violation: &Violation) {
        self(violation)
    }
}

/// 丢弃所有报告。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopDiagnostics;

impl DiagnosticSink for NoopDiagnostics {
    fn report(&self, _violation: &Violation) {}
}

/// 把违规转写为 `tracing` 的 `WARN` 事件。
///
/// # 契约说明（What）
/// - 事件目标固定为 `spark_flow::protocol`，字段包括 `rule`、`code`、`component`、`signal`、`detail`；
/// - 订阅器未安装时事件被 `tracing` 自身丢弃，不会产生额外开销。
#[cfg(feature = "tracing")]
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingDiagnostics;

#[cfg(feature = "tracing")]
impl DiagnosticSink for TracingDiagnostics {
    fn report(&self, violation: &Violation) {
        tracing::warn!(
            target: "spark_flow::protocol",
            rule = ?violation.rule,
            code = violation.rule.code(),
            component = violation.component,
            signal = violation.signal,
            detail = %violation.detail,
            "protocol violation detected"
        );
    }
}

/// 构造默认诊断通道。
pub fn default_sink() -> Arc<dyn DiagnosticSink> {
    #[cfg(feature = "tracing")]
    {
        Arc::new(TracingDiagnostics)
    }
    #[cfg(not(feature = "tracing"))]
    {
        Arc::new(NoopDiagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use core::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn closures_act_as_sinks() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let sink: Arc<dyn DiagnosticSink> = Arc::new(move |violation: &Violation| {
            assert_eq!(violation.rule, ProtocolRule::NonPositiveRequest);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sink.report(&Violation::new(
            ProtocolRule::NonPositiveRequest,
            "subscription",
            "request",
            "n = 0",
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn violation_display_leads_with_rule_code() {
        let violation = Violation::new(
            ProtocolRule::SignalAfterTerminal,
            "subscriber",
            "on_next",
            "流已终止",
        );
        assert_eq!(
            violation.to_string(),
            "[protocol.signal_after_terminal] subscriber::on_next: 流已终止"
        );
    }
}
