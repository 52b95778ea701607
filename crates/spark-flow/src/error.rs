use alloc::{borrow::Cow, format, sync::Arc};
use core::{error::Error, fmt};

/// 引擎统一的 `Result` 别名。
pub type Result<T, E = FlowError> = core::result::Result<T, E>;

/// 稳定错误码集合。
///
/// 错误码遵循 `flow.<语义>` 命名，一经发布不得改名；日志、告警与 TCK 断言均依赖这些字符串。
pub mod codes {
    /// 消费方调用 `request(n)` 时 `n <= 0`。
    pub const ILLEGAL_REQUEST: &str = "flow.illegal_request";
    /// 生产方拒绝了订阅请求（例如单播处理器已有下游）。
    pub const SUBSCRIBER_REJECTED: &str = "flow.subscriber_rejected";
    /// 数据源在产出元素时失败。
    pub const SOURCE_FAILED: &str = "flow.source_failed";
    /// 无法为本次订阅构造数据源。
    pub const SOURCE_UNAVAILABLE: &str = "flow.source_unavailable";
    /// 变换阶段处理元素失败。
    pub const TRANSFORM_FAILED: &str = "flow.transform_failed";
    /// 消费方的元素处理回调失败。
    pub const HANDLER_FAILED: &str = "flow.handler_failed";
    /// 配置文本无法解析。
    pub const CONFIG_INVALID: &str = "flow.config_invalid";
}

/// 错误大类，区分“调用方违反契约”与“业务域失败”。
///
/// # 契约说明（What）
/// - `IllegalArgument`：参数不合法，例如 `request(0)`；
/// - `IllegalState`：调用时机不合法，例如单播处理器的第二个订阅者；
/// - `Domain`：元素生产或变换过程中的业务失败，以唯一一次 `on_error` 传播。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum FlowErrorKind {
    IllegalArgument,
    IllegalState,
    Domain,
}

/// `FlowError` 是经由 `on_error` 传递给消费方的唯一错误载体。
///
/// # 设计背景（Why）
/// - 终止信号只允许出现一次，因此错误需要携带足够的机读上下文（稳定错误码、大类），
///   让消费方与日志系统无需解析字符串即可分流；
/// - 引擎需要兼容 `no_std + alloc`，因此只依赖 [`core::error::Error`]。
///
/// # 逻辑解析（How）
/// - `code` 始终为 `'static` 字符串，承载稳定语义；`message` 面向排障人员；
/// - 底层原因以 `Arc` 共享，使错误可以廉价克隆（处理器在上下游之间转发同一个错误）。
///
/// # 契约说明（What）
/// - **前置条件**：调用方应使用 [`codes`] 中的码值，或遵循 `<域>.<语义>` 约定的自定义码值；
/// - **后置条件**：构造出的错误满足 `Send + Sync + 'static`，可跨线程移动。
#[derive(Clone)]
pub struct FlowError {
    code: &'static str,
    kind: FlowErrorKind,
    message: Cow<'static, str>,
    cause: Option<Arc<dyn Error + Send + Sync + 'static>>,
}

impl FlowError {
    /// 构造业务域错误。
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self::with_kind(code, FlowErrorKind::Domain, message)
    }

    /// 以指定错误大类构造错误。
    pub fn with_kind(
        code: &'static str,
        kind: FlowErrorKind,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code,
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// `request(n)` 收到非正数时的标准错误。
    pub fn illegal_request(n: i64) -> Self {
        Self::with_kind(
            codes::ILLEGAL_REQUEST,
            FlowErrorKind::IllegalArgument,
            format!("request 的数量必须为正数，实际收到 {n}"),
        )
    }

    /// 订阅被生产方拒绝时的标准错误。
    pub fn subscriber_rejected(message: impl Into<Cow<'static, str>>) -> Self {
        Self::with_kind(
            codes::SUBSCRIBER_REJECTED,
            FlowErrorKind::IllegalState,
            message,
        )
    }

    /// 数据源产出失败。
    pub fn source_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::SOURCE_FAILED, message)
    }

    /// 变换阶段失败。
    pub fn transform_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::TRANSFORM_FAILED, message)
    }

    /// 附带底层原因并返回新的错误。
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// 获取稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 获取错误大类。
    pub fn kind(&self) -> FlowErrorKind {
        self.kind
    }

    /// 获取描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 是否为参数违规（对应 `request(n <= 0)`）。
    pub fn is_illegal_argument(&self) -> bool {
        self.kind == FlowErrorKind::IllegalArgument
    }
}

impl fmt::Debug for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowError")
            .field("code", &self.code)
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("has_cause", &self.cause.is_some())
            .finish()
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl Error for FlowError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn Error + 'static))
    }
}

impl PartialEq for FlowError {
    /// 两个错误在错误码、大类与描述一致时视为相等；底层原因不参与比较。
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.kind == other.kind && self.message == other.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[derive(Debug)]
    struct Disk;

    impl fmt::Display for Disk {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("disk offline")
        }
    }

    impl Error for Disk {}

    #[test]
    fn illegal_request_carries_argument_kind() {
        let err = FlowError::illegal_request(-3);
        assert_eq!(err.code(), codes::ILLEGAL_REQUEST);
        assert!(err.is_illegal_argument());
        assert!(err.message().contains("-3"));
    }

    #[test]
    fn cause_is_exposed_through_source_and_survives_clone() {
        let err = FlowError::source_failed("读取失败").with_cause(Disk);
        let cloned = err.clone();
        assert_eq!(
            cloned.source().map(|cause| cause.to_string()),
            Some("disk offline".to_string())
        );
        assert_eq!(err, cloned);
        assert_eq!(err.to_string(), "[flow.source_failed] 读取失败");
    }
}
