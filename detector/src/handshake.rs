//! One-shot handoff of an asynchronously delivered result to a waiting caller.
//!
//! A [`SessionHandshake`] is created together with a [`Completer`]. The
//! completer travels into whatever callback will eventually produce the
//! result, possibly on another thread; the handshake stays with the caller,
//! which waits on it with a finite deadline and a [`CancelToken`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::warn;

/// Waiting half. Single use: `wait` consumes it.
pub struct SessionHandshake<T> {
    rx: oneshot::Receiver<T>,
}

/// Finishing half. Clones share one slot, so only the first `finish`
/// across all clones delivers.
pub struct Completer<T> {
    slot: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("no result within {0:?}")]
    TimedOut(Duration),
    #[error("wait was cancelled")]
    Cancelled,
    #[error("every completer was dropped without finishing")]
    Abandoned,
}

/// Rejected `finish`. The undelivered value is handed back so the caller
/// can release whatever it owns.
pub enum FinishError<T> {
    /// Some completer already finished this handshake.
    AlreadyFinished(T),
    /// The waiter gave up (deadline, cancellation) before the result came.
    WaiterGone(T),
}

impl<T> FinishError<T> {
    pub fn into_inner(self) -> T {
        match self {
            FinishError::AlreadyFinished(value) | FinishError::WaiterGone(value) => value,
        }
    }
}

impl<T> fmt::Debug for FinishError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishError::AlreadyFinished(_) => f.write_str("AlreadyFinished(..)"),
            FinishError::WaiterGone(_) => f.write_str("WaiterGone(..)"),
        }
    }
}

impl<T> fmt::Display for FinishError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishError::AlreadyFinished(_) => f.write_str("handshake was already finished"),
            FinishError::WaiterGone(_) => f.write_str("handshake waiter is no longer waiting"),
        }
    }
}

impl<T> std::error::Error for FinishError<T> {}

impl<T> SessionHandshake<T> {
    pub fn new() -> (Self, Completer<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self { rx },
            Completer {
                slot: Arc::new(Mutex::new(Some(tx))),
            },
        )
    }

    /// Wait for `finish`, at most `deadline`, giving up early on `cancel`.
    ///
    /// A cancelled token stays cancelled after this returns.
    pub async fn wait(self, deadline: Duration, cancel: &CancelToken) -> Result<T, HandshakeError> {
        self.wait_or_reclaim(deadline, cancel)
            .await
            .map_err(|(error, _)| error)
    }

    /// Like [`wait`](Self::wait), but a value that was delivered before the
    /// waiter gave up is returned next to the error instead of being
    /// dropped. Once this returns, later `finish` calls get
    /// [`FinishError::WaiterGone`].
    pub async fn wait_or_reclaim(
        mut self,
        deadline: Duration,
        cancel: &CancelToken,
    ) -> Result<T, (HandshakeError, Option<T>)> {
        let error = if cancel.is_cancelled() {
            HandshakeError::Cancelled
        } else {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(HandshakeError::Cancelled),
                result = tokio::time::timeout(deadline, &mut self.rx) => match result {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(_)) => Err(HandshakeError::Abandoned),
                    Err(_) => Err(HandshakeError::TimedOut(deadline)),
                },
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(error) => error,
            }
        };
        // After close, a racing `finish` has either landed or gets `WaiterGone`.
        self.rx.close();
        Err((error, self.rx.try_recv().ok()))
    }
}

impl<T> Completer<T> {
    /// Deliver `value` to the waiter. Only the first call succeeds.
    pub fn finish(&self, value: T) -> Result<(), FinishError<T>> {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => tx.send(value).map_err(FinishError::WaiterGone),
            None => {
                warn!("handshake finished more than once; ignoring the later result");
                Err(FinishError::AlreadyFinished(value))
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// Cooperative cancellation flag shared between a waiter and whoever may
/// want to abort it. Once raised it stays raised until `reset`.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
