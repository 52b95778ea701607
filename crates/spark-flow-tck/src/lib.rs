//! spark-flow 协议兼容性测试套件（TCK）入口。
//!
//! # 教案式综述（Why / How / What）
//! - **为什么存在**：生产方、消费方与处理器的协议约束（串行投递、有界投递、终止信号恰好一次、
//!   取消后静默）无法只靠类型系统表达，需要一组可复用的行为用例作为统一准绳。
//! - **如何集成**：在目标仓库的 `tests` 目录下引入 `#[flow_tck]` 宏（或直接调用 `run_*_suite` 入口），
//!   即可把全部套件编译为标准 Rust 测试；宏支持 `suites(...)` 选择性启用。
//! - **测试对象**：所有用例均以 `spark-flow` 的公开 API 为边界，覆盖需求计数、订阅控制器、
//!   生产方、同步消费方、中继处理器与跨线程场景六个主题。
//!
//! # 契约说明（What）
//! - **输出保证**：全部用例通过即表示实现满足协议对背压、取消、终止与诊断的显式约束；
//! - **失败信息**：用例 panic 时会附加 `[spark-flow-tck::套件::用例]` 前缀。
//!
//! # 风险提示（Trade-offs）
//! - `concurrency` 套件依赖真实线程与超时等待，在极端负载的 CI 机器上可能变慢，但不会误报。

mod concurrency;
mod demand;
mod processor;
mod publisher;
mod subscriber;
mod subscription;
mod support;

pub use case::{TckCase, TckSuite};
use case::run_suite;
pub use spark_flow_tck_macros::flow_tck;

const ALL_SUITES: [&TckSuite; 6] = [
    demand::suite(),
    subscription::suite(),
    publisher::suite(),
    subscriber::suite(),
    processor::suite(),
    concurrency::suite(),
];

mod case {
    use super::support;
    use std::panic;

    /// 单个 TCK 用例的元信息。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：把测试函数与名称绑定在一起，失败时可以打印定位信息。
    /// - **契约 (What)**：`test` 必须在失败时 `panic`；名称会出现在错误提示里。
    #[derive(Clone, Copy)]
    pub struct TckCase {
        /// 用例的人类可读名称。
        pub name: &'static str,
        /// 实际执行的断言逻辑。
        pub test: fn(),
    }

    /// 同一主题的一组用例。
    #[derive(Clone, Copy)]
    pub struct TckSuite {
        /// 套件名称，与 `run_*_suite` 函数名一一对应。
        pub name: &'static str,
        /// 归属该套件的用例集合，不允许为空。
        pub cases: &'static [TckCase],
    }

    /// 在捕获 panic 的前提下依次执行套件内的全部用例。
    ///
    /// 任一用例失败时附加“套件/用例”上下文后重新 panic，后续用例不再执行。
    pub fn run_suite(suite: &TckSuite) {
        assert!(!suite.cases.is_empty(), "TCK 套件不应为空");
        for case in suite.cases {
            let outcome = panic::catch_unwind(panic::AssertUnwindSafe(|| (case.test)()));
            if let Err(payload) = outcome {
                support::rethrow_case_failure(suite.name, case.name, payload);
            }
        }
    }
}

/// 返回所有已注册的 TCK 套件，顺序与宏的默认展开顺序一致。
pub fn all_suites() -> &'static [&'static TckSuite] {
    &ALL_SUITES
}

/// 运行“需求计数”主题：饱和、消费与一次性取走。
pub fn run_demand_suite() {
    run_suite(demand::suite());
}

/// 运行“订阅控制器”主题：非法请求、取消幂等与重入请求。
pub fn run_subscription_suite() {
    run_suite(subscription::suite());
}

/// 运行“生产方”主题：信号顺序、有界投递、拒绝订阅与错误终止。
pub fn run_publisher_suite() {
    run_suite(publisher::suite());
}

/// 运行“消费方”主题：订阅状态机、重复订阅与处理函数失败。
pub fn run_subscriber_suite() {
    run_suite(subscriber::suite());
}

/// 运行“处理器”主题：需求转发、取消传播与单播约束。
pub fn run_processor_suite() {
    run_suite(processor::suite());
}

/// 运行“并发”主题：多线程请求下的串行投递与取消竞争。
///
/// # 教案式说明
/// - **意图 (Why)**：串行投递与“取消后至多一个在途元素”只有在真实线程竞争下才可能被破坏；
/// - **流程 (How)**：用例使用 `ThreadScheduler` 驱动发射循环，并从多个线程并发调用 `request`/`cancel`；
/// - **契约 (What)**：每个用例的等待上限为 5 秒，超时即视为失败。
pub fn run_concurrency_suite() {
    run_suite(concurrency::suite());
}
