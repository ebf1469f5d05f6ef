use crate::pipeline::{AnyLink, CancellationToken, Link, Stage, StageId};
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sink stage that logs every value it receives at `info` level.
pub struct Printer<T> {
    id: StageId,
    received: AtomicU64,
    pub input: Link<T>,
}

impl<T: Debug + Send + 'static> Printer<T> {
    pub fn new() -> Self {
        Self {
            id: StageId::next(),
            received: AtomicU64::new(0),
            input: Link::receiver(),
        }
    }

    /// Number of values received so far.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

impl<T: Debug + Send + 'static> Default for Printer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Debug + Send + 'static> Stage for Printer<T> {
    fn id(&self) -> StageId {
        self.id
    }

    fn name(&self) -> &str {
        "printer"
    }

    fn links(&self) -> Vec<Box<dyn AnyLink>> {
        vec![self.input.erased()]
    }

    fn run(&self, token: &CancellationToken) {
        tracing::info!("Printer {} starting", self.id);
        for value in self.input.iter(token) {
            self.received.fetch_add(1, Ordering::Relaxed);
            tracing::info!("Printer {} received {:?}", self.id, value);
        }
        tracing::info!("Printer {} exiting after {} values", self.id, self.received());
    }
}
