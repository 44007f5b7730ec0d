//! Run-wide cancellation and cancellable channel sends.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::error::{Error, Result};

/// Cancellation token plus the first fatal error that raised it.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    token: CancellationToken,
    fatal: Arc<Mutex<Option<String>>>,
}

impl RunControl {
    /// Creates a fresh control.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token observed by every stage.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether the run was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Records a fatal error and cancels the run. Only the first error is kept.
    pub fn fail(&self, stage: &str, err: &Error) {
        {
            let mut fatal = self.fatal.lock();
            if fatal.is_none() {
                error!(stage, "Fatal error, cancelling run: {}", err);
                *fatal = Some(format!("{stage}: {err}"));
            }
        }
        self.token.cancel();
    }

    /// First fatal error, if any.
    #[must_use]
    pub fn fatal_error(&self) -> Option<String> {
        self.fatal.lock().clone()
    }

    /// Handles the result of a stage: fatal errors cancel the run,
    /// cancellation itself is ignored.
    pub fn settle(&self, stage: &str, result: Result<()>) {
        match result {
            Ok(()) | Err(Error::Cancelled) => {}
            Err(e) => self.fail(stage, &e),
        }
    }
}

/// Sending half of a bounded channel that gives up on cancellation.
#[derive(Debug)]
pub struct Sink<T> {
    tx: mpsc::Sender<T>,
    cancel: CancellationToken,
}

impl<T> Clone for Sink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<T> Sink<T> {
    /// Wraps `tx`.
    #[must_use]
    pub fn new(tx: mpsc::Sender<T>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// Sends `item`, or fails with [`Error::Cancelled`] when the run is
    /// cancelled or the receiver is gone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`].
    pub async fn send(&self, item: T) -> Result<()> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            res = self.tx.send(item) => res.map_err(|_| Error::Cancelled),
        }
    }

    /// Token this sink observes.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Creates a bounded channel whose sender observes `cancel`.
#[must_use]
pub fn channel<T>(capacity: usize, cancel: &CancellationToken) -> (Sink<T>, mpsc::Receiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (Sink::new(tx, cancel.clone()), rx)
}
