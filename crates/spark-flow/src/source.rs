//! 元素来源：发射循环从 [`Source`] 拉取元素，从 [`SourceFactory`] 为每个订阅构造新的来源。
//!
//! # 契约说明（What）
//! - `pull` 只会在发射循环持有投递权且至少有一个单位需求时调用，且不会并发调用；
//! - 返回 [`SourceEvent::Pending`] 表示“暂时没有元素”，来源需在元素就绪后自行唤醒发射循环
//!   （处理器的缓冲来源即如此）；普通来源不应返回 `Pending`；
//! - `Complete` 与 `Error` 之后来源不会再被拉取。

use core::iter::Peekable;

use crate::error::FlowError;

/// 一次拉取的结果。
#[derive(Debug)]
pub enum SourceEvent<T> {
    /// 产出一个元素。
    Item(T),
    /// 当前没有元素，但流尚未结束。
    Pending,
    /// 来源已耗尽。
    Complete,
    /// 产出失败，流以错误终止。
    Error(FlowError),
}

/// 按订阅独占的元素来源。
pub trait Source: Send + 'static {
    type Item: Send + 'static;

    /// 拉取下一个元素。
    fn pull(&mut self) -> SourceEvent<Self::Item>;

    /// 在需求为 0 时探测来源是否已经结束。
    ///
    /// 返回 `Some(Ok(()))` 表示来源已耗尽、可以立即完成；`Some(Err(_))` 表示应立即以错误终止；
    /// `None` 表示未知或尚有元素。默认实现返回 `None`，此时流要等到下一次拉取才会终止。
    fn poll_terminal(&mut self) -> Option<Result<(), FlowError>> {
        None
    }
}

/// 为每次 `subscribe` 构造独立来源的描述。
///
/// 构造失败视为拒绝订阅：消费方先收到一个惰性订阅，随后收到唯一一次 `on_error`。
pub trait SourceFactory: Send + Sync + 'static {
    type Source: Source;

    fn create(&self) -> Result<Self::Source, FlowError>;
}

impl<F, S> SourceFactory for F
where
    F: Fn() -> Result<S, FlowError> + Send + Sync + 'static,
    S: Source,
{
    type Source = S;

    fn create(&self) -> Result<S, FlowError> {
        self()
    }
}

/// 包装不会失败的迭代器。
///
/// 内部使用 [`Peekable`]，因此在最后一个元素投递后即可判定耗尽，不必等待额外需求即可完成。
pub struct IterSource<I: Iterator> {
    iter: Peekable<I>,
}

impl<I: Iterator> IterSource<I> {
    pub fn new(iter: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            iter: iter.into_iter().peekable(),
        }
    }
}

impl<I> Source for IterSource<I>
where
    I: Iterator + Send + 'static,
    I::Item: Send + 'static,
{
    type Item = I::Item;

    fn pull(&mut self) -> SourceEvent<I::Item> {
        match self.iter.next() {
            Some(item) => SourceEvent::Item(item),
            None => SourceEvent::Complete,
        }
    }

    fn poll_terminal(&mut self) -> Option<Result<(), FlowError>> {
        self.iter.peek().is_none().then_some(Ok(()))
    }
}

/// 包装产出 `Result` 的迭代器，第一个 `Err` 终止流。
pub struct TryIterSource<I> {
    iter: I,
}

impl<I> TryIterSource<I> {
    pub fn new(iter: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            iter: iter.into_iter(),
        }
    }
}

impl<I, T> Source for TryIterSource<I>
where
    I: Iterator<Item = Result<T, FlowError>> + Send + 'static,
    T: Send + 'static,
{
    type Item = T;

    fn pull(&mut self) -> SourceEvent<T> {
        match self.iter.next() {
            Some(Ok(item)) => SourceEvent::Item(item),
            Some(Err(error)) => SourceEvent::Error(error),
            None => SourceEvent::Complete,
        }
    }
}

/// 由闭包驱动的来源，适合无界生成器。
///
/// 闭包返回 `Some(Ok(item))` 产出元素，`Some(Err(e))` 以错误终止，`None` 表示结束。
pub struct FnSource<F> {
    generate: F,
}

impl<F> FnSource<F> {
    pub fn new(generate: F) -> Self {
        Self { generate }
    }
}

impl<F, T> Source for FnSource<F>
where
    F: FnMut() -> Option<Result<T, FlowError>> + Send + 'static,
    T: Send + 'static,
{
    type Item = T;

    fn pull(&mut self) -> SourceEvent<T> {
        match (self.generate)() {
            Some(Ok(item)) => SourceEvent::Item(item),
            Some(Err(error)) => SourceEvent::Error(error),
            None => SourceEvent::Complete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn iter_source_reports_exhaustion_eagerly() {
        let mut source = IterSource::new(vec![1, 2]);
        assert!(source.poll_terminal().is_none());
        assert!(matches!(source.pull(), SourceEvent::Item(1)));
        assert!(matches!(source.pull(), SourceEvent::Item(2)));
        assert!(matches!(source.poll_terminal(), Some(Ok(()))));
        assert!(matches!(source.pull(), SourceEvent::Complete));
    }

    #[test]
    fn try_iter_source_surfaces_first_error() {
        let mut source = TryIterSource::new(vec![
            Ok(1),
            Err(FlowError::source_failed("坏块")),
            Ok(3),
        ]);
        assert!(matches!(source.pull(), SourceEvent::Item(1)));
        match source.pull() {
            SourceEvent::Error(error) => assert_eq!(error.message(), "坏块"),
            other => panic!("期望错误，实际 {other:?}"),
        }
    }

    #[test]
    fn fn_source_counts_until_none() {
        let mut next = 0;
        let mut source = FnSource::new(move || {
            next += 1;
            (next <= 2).then_some(Ok(next))
        });
        assert!(matches!(source.pull(), SourceEvent::Item(1)));
        assert!(matches!(source.pull(), SourceEvent::Item(2)));
        assert!(matches!(source.pull(), SourceEvent::Complete));
    }
}
