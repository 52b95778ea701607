//! 内部日志宏。
//!
//! 启用 `tracing` Feature 时转发到 `tracing` 对应级别的事件宏；关闭时整段展开为空，
//! 因此宏参数中只应引用在其他路径上同样会被使用的值。

macro_rules! flow_trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            ::tracing::trace!(target: "spark_flow::lifecycle", $($arg)*);
        }
    };
}

macro_rules! flow_debug {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            ::tracing::debug!(target: "spark_flow::lifecycle", $($arg)*);
        }
    };
}
