use crate::error::PipelineError;
use crate::pipeline::{AnyLink, CancellationToken, Link, Stage, StageId};
use crossbeam_channel::{select, tick};
use std::time::Duration;

/// Source stage that sends an increasing tick count every `period`.
pub struct Timer {
    id: StageId,
    period: Duration,
    limit: Option<u64>,
    pub output: Link<u64>,
}

impl Timer {
    pub fn new(period: Duration) -> Self {
        Self {
            id: StageId::next(),
            period,
            limit: None,
            output: Link::sender(),
        }
    }

    /// Stop after sending `limit` ticks.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Stage for Timer {
    fn id(&self) -> StageId {
        self.id
    }

    fn name(&self) -> &str {
        "timer"
    }

    fn links(&self) -> Vec<Box<dyn AnyLink>> {
        vec![self.output.erased()]
    }

    fn run(&self, token: &CancellationToken) {
        tracing::info!("Timer {} starting, period {:?}", self.id, self.period);
        let ticker = tick(self.period);
        let mut sent = 0u64;

        while self.limit.map_or(true, |limit| sent < limit) {
            select! {
                recv(token.cancelled()) -> _ => break,
                recv(ticker) -> _ => {
                    sent += 1;
                    tracing::debug!("Timer {} sending tick {}", self.id, sent);
                    match self.output.send_or_cancel(sent, token) {
                        Ok(()) => {}
                        Err(PipelineError::Cancelled) => break,
                        Err(e) => {
                            tracing::warn!("Timer {} stopped: {}", self.id, e);
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!("Timer {} exiting after {} ticks", self.id, sent);
    }
}
