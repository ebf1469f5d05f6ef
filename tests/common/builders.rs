//! Test stages for building pipelines

use stagepipe::{AnyLink, CancellationToken, Link, Stage, StageId};
use std::sync::{Arc, Mutex};

/// Source that sends a fixed list of values, then returns
pub struct IterSource<T> {
    id: StageId,
    values: Vec<T>,
    pub output: Link<T>,
}

impl<T: Clone + Send + Sync + 'static> IterSource<T> {
    pub fn new(values: impl IntoIterator<Item = T>) -> Arc<Self> {
        Arc::new(Self {
            id: StageId::next(),
            values: values.into_iter().collect(),
            output: Link::sender(),
        })
    }
}

impl<T: Clone + Send + Sync + 'static> Stage for IterSource<T> {
    fn id(&self) -> StageId {
        self.id
    }

    fn links(&self) -> Vec<Box<dyn AnyLink>> {
        vec![self.output.erased()]
    }

    fn run(&self, token: &CancellationToken) {
        for value in &self.values {
            if self.output.send_or_cancel(value.clone(), token).is_err() {
                return;
            }
        }
    }
}

/// Sink that records every value it receives
pub struct Recorder<T> {
    id: StageId,
    seen: Mutex<Vec<T>>,
    pub input: Link<T>,
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: StageId::next(),
            seen: Mutex::new(Vec::new()),
            input: Link::receiver(),
        })
    }

    pub fn seen(&self) -> Vec<T> {
        self.seen.lock().unwrap().clone()
    }
}

impl<T: Clone + Send + 'static> Stage for Recorder<T> {
    fn id(&self) -> StageId {
        self.id
    }

    fn links(&self) -> Vec<Box<dyn AnyLink>> {
        vec![self.input.erased()]
    }

    fn run(&self, token: &CancellationToken) {
        for value in self.input.iter(token) {
            self.seen.lock().unwrap().push(value);
        }
    }
}

/// Stage that applies a function to every value it forwards
pub struct Relay<T> {
    id: StageId,
    map: fn(T) -> T,
    pub input: Link<T>,
    pub output: Link<T>,
}

impl<T: Send + 'static> Relay<T> {
    pub fn new() -> Arc<Self> {
        Self::mapping(|v| v)
    }

    pub fn mapping(map: fn(T) -> T) -> Arc<Self> {
        Arc::new(Self {
            id: StageId::next(),
            map,
            input: Link::receiver(),
            output: Link::sender(),
        })
    }
}

impl<T: Send + 'static> Stage for Relay<T> {
    fn id(&self) -> StageId {
        self.id
    }

    fn links(&self) -> Vec<Box<dyn AnyLink>> {
        vec![self.input.erased(), self.output.erased()]
    }

    fn run(&self, token: &CancellationToken) {
        for value in self.input.iter(token) {
            if self.output.send_or_cancel((self.map)(value), token).is_err() {
                return;
            }
        }
    }
}

/// Stage with no links that blocks until cancelled
pub struct Idle {
    id: StageId,
}

impl Idle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { id: StageId::next() })
    }
}

impl Stage for Idle {
    fn id(&self) -> StageId {
        self.id
    }

    fn links(&self) -> Vec<Box<dyn AnyLink>> {
        Vec::new()
    }

    fn run(&self, token: &CancellationToken) {
        token.wait();
    }
}
