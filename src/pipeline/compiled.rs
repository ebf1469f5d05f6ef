//! Compiled pipeline: runs every stage on its own thread.
//!
//! The graph is frozen at this point. [`CompiledPipeline::start`] spawns one
//! named thread per stage, in topological order, and hands each the same
//! child cancellation token. Every thread owns a [`StageGuard`]; dropping it
//! (on return or unwind) closes the stage's outputs, decrements the running
//! count and releases one clone of the completion sender. The completion
//! signal fires once every clone is gone.

use super::builder::Graph;
use super::compiled_plan::{CompiledPlan, PlanStats};
use crate::config::PipelineOptions;
use crate::error::{PipelineError, Result};
use crate::pipeline::cancel::CancellationToken;
use crate::pipeline::id::{PipelineId, StageId};
use crate::pipeline::link::AnyLink;
use crate::pipeline::snapshot::TopologySnapshot;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Signal that fires once every stage thread of a run has finished.
///
/// Cloning is cheap; all clones observe the same run.
#[derive(Debug, Clone)]
pub struct Completion {
    signal: Receiver<()>,
}

impl Completion {
    /// A completion with nothing left to wait for.
    fn finished() -> Self {
        let (_tx, signal) = bounded(0);
        Self { signal }
    }

    /// Block until every stage thread has finished.
    pub fn wait(&self) {
        // Nothing is ever sent: recv returns once every sender is dropped.
        let _ = self.signal.recv();
    }

    /// Wait at most `timeout`. Returns whether the run completed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.signal.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.signal.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Receiver that disconnects on completion, for use in `select!`.
    pub fn signal(&self) -> &Receiver<()> {
        &self.signal
    }
}

/// Per-thread bookkeeping released when the stage's entry point ends.
struct StageGuard {
    stage: StageId,
    running: Arc<AtomicUsize>,
    outputs: Vec<Box<dyn AnyLink>>,
    _done: Sender<()>,
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            tracing::warn!("Stage {} panicked", self.stage);
        }
        for link in &self.outputs {
            link.close();
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!("Stage {} finished", self.stage);
    }
}

struct RunState {
    token: CancellationToken,
    done: Receiver<()>,
    running: Arc<AtomicUsize>,
}

/// A validated, frozen pipeline ready to run.
pub struct CompiledPipeline {
    id: PipelineId,
    options: PipelineOptions,
    graph: Graph,
    plan: CompiledPlan,
    run: Option<RunState>,
}

impl CompiledPipeline {
    pub(crate) fn new(
        id: PipelineId,
        options: PipelineOptions,
        graph: Graph,
        plan: CompiledPlan,
    ) -> Self {
        Self {
            id,
            options,
            graph,
            plan,
            run: None,
        }
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn plan(&self) -> &CompiledPlan {
        &self.plan
    }

    pub fn stats(&self) -> &PlanStats {
        &self.plan.stats
    }

    /// Stage ids in topological order.
    pub fn order(&self) -> &[StageId] {
        &self.plan.order
    }

    pub fn is_started(&self) -> bool {
        self.run.is_some()
    }

    /// Launch every stage on its own thread.
    ///
    /// Stages receive a child of `token`: cancelling `token` stops them, and
    /// so does [`CompiledPipeline::stop`], without touching `token` itself.
    /// If a thread cannot be spawned, the stages already launched are
    /// cancelled and the error is returned.
    pub fn start(&mut self, token: &CancellationToken) -> Result<()> {
        if self.run.is_some() {
            return Err(PipelineError::AlreadyStarted(self.id));
        }

        let child = token.child_token();
        let (done_tx, done_rx) = bounded::<()>(0);
        let running = Arc::new(AtomicUsize::new(0));
        let mut spawn_error = None;

        for &stage_id in &self.plan.order {
            let Some(node) = self.graph.stages.get(&stage_id) else {
                continue;
            };

            let outputs = if self.options.close_outputs_on_exit {
                node.outputs
                    .iter()
                    .filter_map(|id| self.graph.links.get(id))
                    .map(|n| n.link.clone_box())
                    .collect()
            } else {
                Vec::new()
            };

            running.fetch_add(1, Ordering::SeqCst);
            let guard = StageGuard {
                stage: stage_id,
                running: Arc::clone(&running),
                outputs,
                _done: done_tx.clone(),
            };
            let stage = Arc::clone(&node.stage);
            let stage_token = child.clone();

            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.options.thread_name_prefix, stage_id.0))
                .spawn(move || {
                    let _guard = guard;
                    tracing::debug!("Stage {} ({}) running", stage_id, stage.name());
                    stage.run(&stage_token);
                });

            if let Err(e) = spawned {
                tracing::warn!("Failed to spawn thread for {}: {}", stage_id, e);
                spawn_error = Some(e);
                break;
            }
        }
        drop(done_tx);

        self.run = Some(RunState {
            token: child.clone(),
            done: done_rx,
            running,
        });

        if let Some(e) = spawn_error {
            child.cancel();
            return Err(PipelineError::Spawn(e));
        }

        tracing::info!(
            "Started {} with {} stages",
            self.options.label(self.id),
            self.plan.order.len()
        );
        Ok(())
    }

    /// Cancel every stage and return the completion signal.
    ///
    /// The signal fires only after every stage thread has returned.
    pub fn stop(&self) -> Completion {
        match &self.run {
            Some(run) => {
                if !run.token.is_cancelled() {
                    tracing::info!("Stopping {}", self.options.label(self.id));
                }
                run.token.cancel();
                Completion {
                    signal: run.done.clone(),
                }
            }
            None => Completion::finished(),
        }
    }

    /// Completion signal for the current run, without cancelling it.
    pub fn completion(&self) -> Completion {
        match &self.run {
            Some(run) => Completion {
                signal: run.done.clone(),
            },
            None => Completion::finished(),
        }
    }

    /// Number of stage threads whose entry point has not returned yet.
    pub fn running_stages(&self) -> usize {
        self.run
            .as_ref()
            .map_or(0, |run| run.running.load(Ordering::SeqCst))
    }

    /// Current topology, stages in topological order.
    pub fn snapshot(&self) -> TopologySnapshot {
        TopologySnapshot::capture(
            self.id,
            self.options.name.clone(),
            &self.graph,
            &self.plan.order,
        )
    }

    /// Emit the topology at `info` level.
    pub fn log(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            "Pipeline {}: {} stages, {} edges",
            self.options.label(self.id),
            snapshot.stages.len(),
            self.plan.stats.edges
        );
        for stage in &snapshot.stages {
            tracing::info!("{}", stage);
        }
    }
}

impl std::fmt::Debug for CompiledPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledPipeline")
            .field("id", &self.id)
            .field("order", &self.plan.order)
            .field("started", &self.run.is_some())
            .finish()
    }
}
