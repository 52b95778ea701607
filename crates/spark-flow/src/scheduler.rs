//! 发射循环的执行上下文。
//!
//! # 设计背景（Why）
//! - 协议不规定线程模型：同一套订阅控制器既要能在调用线程上同步推进，也要能交给独立线程执行；
//! - 把“在哪儿运行 drain”抽象为 [`Scheduler`]，订阅控制器只负责“何时需要 drain”。
//!
//! # 契约说明（What）
//! - `schedule` 接收的任务必须最终被执行恰好一次；
//! - 实现不得在 `schedule` 内部阻塞等待任务完成。

use alloc::{boxed::Box, collections::VecDeque};
#[cfg(feature = "std")]
use alloc::string::String;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

/// 可调度的一次性任务。
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// 执行任务的上下文抽象。
pub trait Scheduler: Send + Sync {
    fn schedule(&self, task: Task);
}

/// 在调用线程上以蹦床（trampoline）方式执行任务。
///
/// # 逻辑解析（How）
/// - 任务先入队；只有把 `running` 从 `false` 置为 `true` 的调用方负责出队执行，其它调用立即返回；
/// - 执行中的任务再次调度（例如在 `on_next` 内调用 `request`）只会入队，避免递归加深调用栈；
/// - 置回 `false` 后重新检查队列，防止与并发入队者之间丢失唤醒。
///
/// # 风险提示（Trade-offs）
/// - 若多个线程共享同一实例，任务会在当前持有 `running` 的线程上执行。
#[derive(Default)]
pub struct InlineScheduler {
    queue: Mutex<VecDeque<Task>>,
    running: AtomicBool,
}

impl InlineScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn run_pending(&self) {
        loop {
            let next = self.queue.lock().pop_front();
            match next {
                Some(task) => task(),
                None => return,
            }
        }
    }
}

impl Scheduler for InlineScheduler {
    fn schedule(&self, task: Task) {
        self.queue.lock().push_back(task);
        loop {
            if self
                .running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            self.run_pending();
            self.running.store(false, Ordering::Release);
            if self.queue.lock().is_empty() {
                return;
            }
        }
    }
}

impl core::fmt::Debug for InlineScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InlineScheduler")
            .field("queued", &self.queue.lock().len())
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

/// 为每个任务派生一个具名线程。
///
/// 线程名取自构造时给定的前缀，便于在线程转储中定位订阅。创建线程失败时在调用线程上直接执行任务，
/// 保证任务不会丢失。
#[cfg(feature = "std")]
#[derive(Clone, Debug)]
pub struct ThreadScheduler {
    name: String,
}

#[cfg(feature = "std")]
impl ThreadScheduler {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(feature = "std")]
impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new("spark-flow")
    }
}

#[cfg(feature = "std")]
impl Scheduler for ThreadScheduler {
    fn schedule(&self, task: Task) {
        // 任务放进共享槽位，spawn 失败时由当前线程取回执行。
        let slot = alloc::sync::Arc::new(Mutex::new(Some(task)));
        let remote = alloc::sync::Arc::clone(&slot);
        let spawned = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let task = remote.lock().take();
                if let Some(task) = task {
                    task();
                }
            });
        if let Err(_error) = spawned {
            flow_debug!(error = %_error, "线程创建失败，回退到调用线程执行");
            let task = slot.lock().take();
            if let Some(task) = task {
                task();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::{sync::Arc, vec::Vec};

    #[test]
    fn nested_schedule_is_queued_not_recursed() {
        let scheduler = Arc::new(InlineScheduler::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let inner_scheduler = Arc::clone(&scheduler);
        let outer_order = Arc::clone(&order);
        scheduler.schedule(Box::new(move || {
            outer_order.lock().push("outer-start");
            let nested_order = Arc::clone(&outer_order);
            inner_scheduler.schedule(Box::new(move || nested_order.lock().push("nested")));
            outer_order.lock().push("outer-end");
        }));

        assert_eq!(*order.lock(), ["outer-start", "outer-end", "nested"]);
    }

    #[cfg(feature = "std")]
    #[test]
    fn thread_scheduler_names_its_threads() {
        let (tx, rx) = std::sync::mpsc::channel();
        ThreadScheduler::new("flow-test").schedule(Box::new(move || {
            let name = std::thread::current().name().map(String::from);
            let _ = tx.send(name);
        }));
        let name = rx.recv().expect("任务必须被执行");
        assert_eq!(name.as_deref(), Some("flow-test"));
    }

    #[cfg(feature = "std")]
    #[test]
    fn thread_scheduler_runs_each_task_exactly_once() {
        use core::sync::atomic::AtomicUsize;

        let scheduler = ThreadScheduler::default();
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = std::sync::mpsc::channel();
        for _ in 0..32 {
            let runs = Arc::clone(&runs);
            let tx = tx.clone();
            scheduler.schedule(Box::new(move || {
                runs.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(());
            }));
        }
        for _ in 0..32 {
            rx.recv_timeout(std::time::Duration::from_secs(5))
                .expect("任务必须被执行");
        }
        assert_eq!(runs.load(Ordering::SeqCst), 32);
        assert_eq!(scheduler.name(), "spark-flow");
    }
}
