//! A set-once boolean gate.
//!
//! The request-body sender parks on the gate; whichever of the response
//! receiver or the continue-timeout fires first resolves it. Both routes go
//! through the same idempotent `set`, so there is no race on shared state
//! beyond one atomic.

use std::future::poll_fn;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{self, Poll};

use atomic_waker::AtomicWaker;

const PENDING: usize = 0;
const SEND: usize = 1;
const SKIP: usize = 2;

pub(crate) struct Gate {
    state: AtomicUsize,
    waker: AtomicWaker,
}

impl Gate {
    pub(crate) fn new() -> Gate {
        Gate {
            state: AtomicUsize::new(PENDING),
            waker: AtomicWaker::new(),
        }
    }

    /// Resolves the gate. The first call wins; later calls are no-ops.
    /// Returns whether this call was the one that resolved it.
    pub(crate) fn set(&self, send: bool) -> bool {
        let value = if send { SEND } else { SKIP };
        let won = self
            .state
            .compare_exchange(PENDING, value, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.waker.wake();
        }
        won
    }

    /// The resolved value, if any. Never blocks.
    pub(crate) fn peek(&self) -> Option<bool> {
        match self.state.load(Ordering::Acquire) {
            PENDING => None,
            SEND => Some(true),
            _ => Some(false),
        }
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.peek().is_some()
    }

    fn poll_wait(&self, cx: &mut task::Context<'_>) -> Poll<bool> {
        if let Some(send) = self.peek() {
            return Poll::Ready(send);
        }
        self.waker.register(cx.waker());
        match self.peek() {
            Some(send) => Poll::Ready(send),
            None => Poll::Pending,
        }
    }

    /// Waits until the gate resolves, yielding whether to send.
    pub(crate) async fn wait(&self) -> bool {
        poll_fn(|cx| self.poll_wait(cx)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_set_wins() {
        let gate = Gate::new();
        assert!(gate.peek().is_none());
        assert!(gate.set(false));
        assert!(!gate.set(true));
        assert_eq!(gate.peek(), Some(false));
    }

    #[tokio::test]
    async fn wait_sees_prior_set() {
        let gate = Gate::new();
        gate.set(true);
        assert!(gate.wait().await);
    }

    #[tokio::test]
    async fn wait_wakes_on_set() {
        use std::sync::Arc;

        let gate = Arc::new(Gate::new());
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait().await })
        };
        tokio::task::yield_now().await;
        gate.set(true);
        assert!(waiter.await.unwrap());
    }
}
