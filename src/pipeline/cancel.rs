//! Cancellation signal shared by every stage of a running pipeline.
//!
//! A [`CancellationToken`] is a cloneable handle. Cancelling any clone
//! cancels all of them, and every child token derived through
//! [`CancellationToken::child_token`]. Cancelling a child leaves its parent
//! untouched.
//!
//! Internally the token owns the only sender of a zero-capacity crossbeam
//! channel. Cancelling drops that sender, so every receiver parked on
//! [`CancellationToken::cancelled`] wakes up with a disconnection. This makes
//! the token usable directly inside `crossbeam_channel::select!`:
//!
//! ```ignore
//! crossbeam_channel::select! {
//!     recv(token.cancelled()) -> _ => return,
//!     recv(input) -> msg => handle(msg),
//! }
//! ```

use crate::error::Result;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

struct Inner {
    cancelled: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
    children: Mutex<Vec<Weak<Inner>>>,
}

/// Cloneable, hierarchical cancellation signal.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (trigger, signal) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                signal,
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Cancel this token and all of its children. Idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner
            .trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let children = std::mem::take(
            &mut *self
                .inner
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for inner in children.iter().filter_map(Weak::upgrade) {
            CancellationToken { inner }.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Create a token that is cancelled together with this one, but can also
    /// be cancelled on its own.
    ///
    /// The parent only holds a weak reference to each child. Children that
    /// were dropped or cancelled are pruned whenever a new one is created.
    pub fn child_token(&self) -> CancellationToken {
        let child = CancellationToken::new();
        let mut children = self
            .inner
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Checked under the lock: `cancel` sets the flag before draining.
        if self.is_cancelled() {
            drop(children);
            child.cancel();
        } else {
            children.retain(|weak| {
                weak.upgrade()
                    .is_some_and(|inner| !inner.cancelled.load(Ordering::SeqCst))
            });
            children.push(Arc::downgrade(&child.inner));
        }
        child
    }

    /// Receiver that becomes ready (disconnected) once the token is cancelled.
    ///
    /// No value is ever delivered on it; only use it as a wake-up source.
    pub fn cancelled(&self) -> &Receiver<()> {
        &self.inner.signal
    }

    /// Block until the token is cancelled.
    pub fn wait(&self) {
        let _ = self.inner.signal.recv();
    }

    /// Block until the token is cancelled or `timeout` elapses.
    /// Returns `true` if the token was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.inner.signal.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => self.is_cancelled(),
        }
    }

    /// Cancel the token once `delay` has elapsed, unless it is cancelled
    /// sooner. The timer runs on a small helper thread.
    pub fn cancel_after(&self, delay: Duration) -> Result<()> {
        let token = self.clone();
        std::thread::Builder::new()
            .name("cancel-timer".to_string())
            .spawn(move || {
                if !token.wait_timeout(delay) {
                    tracing::debug!("Cancellation deadline of {:?} reached", delay);
                    token.cancel();
                }
            })?;
        Ok(())
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
