use parking_lot::Mutex;
use spark_flow::{
    FlowError, Source, SourceEvent, SourceFactory, SourcePublisher,
};
use std::any::Any;
use std::panic;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

/// 等待异步信号的统一上限。
pub const WAIT: Duration = Duration::from_secs(5);

/// 用例失败时的 panic 消息前缀，调试者据此定位到具体套件与用例。
fn case_label(suite: &str, case: &str) -> String {
    format!("[spark-flow-tck::{suite}::{case}]")
}

/// 取出 `assert!`/`panic!` 携带的文本；其它 payload 类型返回 `None`。
fn payload_text(payload: &(dyn Any + Send)) -> Option<&str> {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
}

/// 把用例的 panic 改写为带套件与用例名的消息后继续展开。
///
/// 只能在 `catch_unwind` 的错误分支中调用。
pub fn rethrow_case_failure(suite: &str, case: &str, payload: Box<dyn Any + Send>) -> ! {
    let label = case_label(suite, case);
    let message = match payload_text(&*payload) {
        Some(text) => format!("{label} {text}"),
        None => format!("{label} 用例以非文本 payload 失败"),
    };
    panic::resume_unwind(Box::new(message))
}

/// 创建线程安全的 `Vec` 收集器，供同步消费方的处理函数跨线程记录元素。
pub fn shared_vec<T>() -> Arc<Mutex<Vec<T>>> {
    Arc::new(Mutex::new(Vec::new()))
}

/// 释放计数器：记录来源被创建与释放的次数。
///
/// # 设计动机（Why）
/// - “取消或终止后来源恰好释放一次”是资源契约的核心，需要一个可观测的来源实现。
#[derive(Clone, Default)]
pub struct ReleaseCounter {
    created: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl ReleaseCounter {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// 产出 `1..` 的无界来源构成的生产方，每个订阅各自计数。
    pub fn endless(&self) -> SourcePublisher<impl SourceFactory<Source = CountedSource>> {
        let counter = self.clone();
        SourcePublisher::new(move || {
            counter.created.fetch_add(1, Ordering::SeqCst);
            Ok::<_, FlowError>(CountedSource {
                next: 0,
                counter: counter.clone(),
            })
        })
    }
}

/// 由 [`ReleaseCounter::endless`] 创建的无界来源。
pub struct CountedSource {
    next: u64,
    counter: ReleaseCounter,
}

impl Source for CountedSource {
    type Item = u64;

    fn pull(&mut self) -> SourceEvent<u64> {
        self.next += 1;
        SourceEvent::Item(self.next)
    }
}

impl Drop for CountedSource {
    fn drop(&mut self) {
        self.counter.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rethrown_failure_names_suite_and_case() {
        let caught = panic::catch_unwind(|| {
            let payload: Box<dyn Any + Send> = Box::new("需求超发");
            rethrow_case_failure("publisher", "bounded", payload);
        });
        let payload = caught.expect_err("必须继续展开");
        let message = payload.downcast_ref::<String>().expect("改写后的消息是 String");
        assert_eq!(message, "[spark-flow-tck::publisher::bounded] 需求超发");
    }

    #[test]
    fn non_text_payload_keeps_the_label() {
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert!(payload_text(&*payload).is_none());
        assert_eq!(case_label("demand", "saturates"), "[spark-flow-tck::demand::saturates]");
    }
}
