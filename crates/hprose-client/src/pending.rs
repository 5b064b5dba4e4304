use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use hprose_common::{HproseError, Result, Value};
use tokio::sync::oneshot;

/// Future of a call that is already under way.
///
/// Calls start when they are made, not when this future is first polled, so
/// dropping it does not cancel the request; the result is simply discarded.
#[must_use = "the call runs regardless, but its result is only seen by awaiting"]
pub struct Pending<T> {
    rx: oneshot::Receiver<Result<T>>,
}

/// Result of [`Client::invoke`](crate::Client::invoke).
pub type Call = Pending<Value>;

/// Completes a [`Pending`] exactly once.
pub(crate) struct Resolver<T> {
    tx: oneshot::Sender<Result<T>>,
}

pub(crate) fn channel<T>() -> (Resolver<T>, Pending<T>) {
    let (tx, rx) = oneshot::channel();
    (Resolver { tx }, Pending { rx })
}

impl<T> Resolver<T> {
    pub(crate) fn resolve(self, result: Result<T>) {
        // The caller may have dropped its future.
        let _ = self.tx.send(result);
    }
}

impl<T> Pending<T> {
    /// A future that is already complete.
    pub fn ready(result: Result<T>) -> Self {
        let (resolver, pending) = channel();
        resolver.resolve(result);
        pending
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(HproseError::Transport(
                "call abandoned before completion".into(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}
