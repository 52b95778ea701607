//! 需求计数器与取消标记的 Loom 并发模型。
//!
//! ## 教案级导览
//!
//! - **核心目标 (Why)**：`DemandCounter` 与 `Cancellation` 是订阅控制器里仅有的两个跨线程
//!   “先读后写”原语，线程测试只能偶发触发竞争，Loom 可以穷举全部交错。
//! - **运行方式 (How)**：`RUSTFLAGS="--cfg loom" cargo test -p spark-flow --features loom-model --test loom_concurrency`；
//!   未开启时本文件编译为空。
//! - **契约 (What)**：
//!   - 并发增加满足交换律，不丢失更新；
//!   - 增加与消费交错时，消费成功次数不超过此前累积的需求；
//!   - 饱和后的消费不会让计数退化；
//!   - 多个线程同时取消时恰有一个线程胜出。
#![cfg(all(loom, feature = "loom-model"))]

use std::num::NonZeroU64;

use loom::{
    model,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};
use spark_flow::{Cancellation, DemandCounter, MAX_DEMAND};

fn units(n: u64) -> NonZeroU64 {
    NonZeroU64::new(n).expect("模型只使用正数")
}

#[test]
fn concurrent_increases_are_not_lost() {
    model(|| {
        let demand = Arc::new(DemandCounter::new());
        let workers: Vec<_> = [2u64, 3]
            .into_iter()
            .map(|n| {
                let demand = Arc::clone(&demand);
                thread::spawn(move || {
                    demand.increase(units(n));
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("模型线程不应 panic");
        }
        assert_eq!(demand.current(), 5);
    });
}

#[test]
fn consumption_never_exceeds_granted_demand() {
    model(|| {
        let demand = Arc::new(DemandCounter::new());
        let consumed = Arc::new(AtomicUsize::new(0));

        let producer = {
            let demand = Arc::clone(&demand);
            thread::spawn(move || {
                demand.increase(units(1));
                demand.increase(units(1));
            })
        };
        let consumer = {
            let demand = Arc::clone(&demand);
            let consumed = Arc::clone(&consumed);
            thread::spawn(move || {
                for _ in 0..3 {
                    if demand.try_consume_one() {
                        consumed.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        };
        producer.join().expect("模型线程不应 panic");
        consumer.join().expect("模型线程不应 panic");

        let taken = consumed.load(Ordering::SeqCst) as u64;
        assert!(taken <= 2);
        assert_eq!(demand.current() + taken, 2);
    });
}

#[test]
fn saturated_demand_stays_unbounded() {
    model(|| {
        let demand = Arc::new(DemandCounter::new());
        demand.increase(units(MAX_DEMAND - 1));

        let bump = {
            let demand = Arc::clone(&demand);
            thread::spawn(move || {
                demand.increase(units(5));
            })
        };
        let drain = {
            let demand = Arc::clone(&demand);
            thread::spawn(move || demand.try_consume_one())
        };
        bump.join().expect("模型线程不应 panic");
        assert!(drain.join().expect("模型线程不应 panic"));

        // 消费先于饱和发生时计数先减一再被推到上限；两种顺序最终都停在上限。
        assert_eq!(demand.current(), MAX_DEMAND);
        assert!(demand.try_consume_one());
        assert!(demand.is_unbounded());
    });
}

#[test]
fn exactly_one_cancel_wins() {
    model(|| {
        let token = Cancellation::new();
        let winners = Arc::new(AtomicUsize::new(0));
        let workers: Vec<_> = (0..2)
            .map(|_| {
                let token = token.clone();
                let winners = Arc::clone(&winners);
                thread::spawn(move || {
                    if token.cancel() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("模型线程不应 panic");
        }
        assert!(token.is_cancelled());
        assert_eq!(winners.load(Ordering::SeqCst), 1);
    });
}
