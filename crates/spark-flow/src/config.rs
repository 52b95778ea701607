use alloc::string::String;

use serde::{Deserialize, Serialize};

#[cfg(feature = "toml-config")]
use crate::error::{FlowError, FlowErrorKind, codes};

/// 默认标签，出现在诊断与线程名中。
pub const DEFAULT_LABEL: &str = "spark-flow";
/// 发射循环在让出执行权之前连续投递的默认元素数。
pub const DEFAULT_DRAIN_BATCH: u32 = 256;

/// 生产方与处理器共享的运行参数。
///
/// # 契约说明（What）
/// - `label`：出现在诊断记录的 `detail` 与线程调度器的线程名中；
/// - `drain_batch`：单次 drain 连续投递的上限，达到后重新调度自身，为其它订阅让出执行上下文；
///   `0` 表示不设上限。
///
/// 所有字段都带有 `#[serde(default)]`，缺省字段回落到默认值。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub label: String,
    pub drain_batch: u32,
}

impl FlowConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_drain_batch(mut self, drain_batch: u32) -> Self {
        self.drain_batch = drain_batch;
        self
    }

    /// 返回实际生效的批量上限，`None` 表示不限。
    pub fn batch_limit(&self) -> Option<u32> {
        (self.drain_batch != 0).then_some(self.drain_batch)
    }

    /// 从 TOML 文本解析配置。
    ///
    /// 文本可以把字段放在 `[flow]` 表下，也可以直接写在顶层；两者同时出现时以 `[flow]` 为准。
    ///
    /// # 错误
    /// 语法错误或字段类型不匹配时返回错误码为 `flow.config_invalid` 的 [`FlowError`]，底层
    /// `toml` 错误作为 `source()` 保留。
    #[cfg(feature = "toml-config")]
    pub fn from_toml_str(text: &str) -> crate::Result<Self> {
        let mut table: toml::Table = toml::from_str(text).map_err(invalid)?;
        let value = match table.remove("flow") {
            Some(flow) => flow,
            None => toml::Value::Table(table),
        };
        value.try_into().map_err(invalid)
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            label: String::from(DEFAULT_LABEL),
            drain_batch: DEFAULT_DRAIN_BATCH,
        }
    }
}

#[cfg(feature = "toml-config")]
fn invalid(error: toml::de::Error) -> FlowError {
    FlowError::with_kind(
        codes::CONFIG_INVALID,
        FlowErrorKind::IllegalArgument,
        alloc::format!("无法解析 FlowConfig: {}", error.message()),
    )
    .with_cause(error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_override_defaults() {
        let config = FlowConfig::new().with_label("orders").with_drain_batch(0);
        assert_eq!(config.label, "orders");
        assert_eq!(config.batch_limit(), None);
        assert_eq!(FlowConfig::default().batch_limit(), Some(DEFAULT_DRAIN_BATCH));
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn parses_flow_table_and_bare_table() {
        let nested = FlowConfig::from_toml_str("[flow]\nlabel = \"ingest\"\ndrain_batch = 8\n")
            .expect("合法配置");
        assert_eq!(nested, FlowConfig::new().with_label("ingest").with_drain_batch(8));

        let bare = FlowConfig::from_toml_str("drain_batch = 3").expect("合法配置");
        assert_eq!(bare.label, DEFAULT_LABEL);
        assert_eq!(bare.drain_batch, 3);
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn malformed_text_maps_to_config_invalid() {
        let err = FlowConfig::from_toml_str("drain_batch = \"many\"").expect_err("类型不匹配");
        assert_eq!(err.code(), codes::CONFIG_INVALID);
        assert!(core::error::Error::source(&err).is_some());
    }
}
