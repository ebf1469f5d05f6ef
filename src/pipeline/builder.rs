//! Graph builder: the mutable registry of stages and links.
//!
//! Stages are registered with [`Pipeline::add`], which files every link the
//! stage declares under the stage's inputs or outputs. [`Pipeline::link`]
//! then wires an output to one or more inputs, recording a stage edge and
//! aliasing the input onto the output's buffer.
//!
//! Both maps are keyed by ids that grow with creation time, so iterating them
//! visits stages and links in discovery order.

use crate::config::PipelineOptions;
use crate::error::{PipelineError, Result};
use crate::pipeline::compiled::CompiledPipeline;
use crate::pipeline::compiler::PipelineCompiler;
use crate::pipeline::id::{LinkId, PipelineId, StageId};
use crate::pipeline::link::{AnyLink, Direction};
use crate::pipeline::snapshot::TopologySnapshot;
use crate::pipeline::stage::Stage;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A registered stage and the graph edges leaving it.
pub(crate) struct StageNode {
    pub(crate) stage: Arc<dyn Stage>,
    /// Stages this one has a directed edge to.
    pub(crate) feeds: BTreeSet<StageId>,
    pub(crate) inputs: BTreeSet<LinkId>,
    pub(crate) outputs: BTreeSet<LinkId>,
}

impl StageNode {
    fn new(stage: Arc<dyn Stage>) -> Self {
        Self {
            stage,
            feeds: BTreeSet::new(),
            inputs: BTreeSet::new(),
            outputs: BTreeSet::new(),
        }
    }
}

/// A registered link and its wiring.
pub(crate) struct LinkNode {
    pub(crate) link: Box<dyn AnyLink>,
    /// Receive links this send link has been linked to.
    pub(crate) feeds: BTreeSet<LinkId>,
    /// Send links this receive link has been linked from.
    pub(crate) fed_by: BTreeSet<LinkId>,
    pub(crate) parent: StageId,
}

impl LinkNode {
    fn new(link: Box<dyn AnyLink>, parent: StageId) -> Self {
        Self {
            link,
            feeds: BTreeSet::new(),
            fed_by: BTreeSet::new(),
            parent,
        }
    }

    pub(crate) fn is_consumed(&self) -> bool {
        !self.feeds.is_empty()
    }
}

/// Stage and link tables shared by the builder, compiler and executor.
#[derive(Default)]
pub(crate) struct Graph {
    pub(crate) stages: BTreeMap<StageId, StageNode>,
    pub(crate) links: BTreeMap<LinkId, LinkNode>,
}

impl Graph {
    pub(crate) fn edge_count(&self) -> usize {
        self.stages.values().map(|s| s.feeds.len()).sum()
    }
}

/// Pipeline graph builder.
///
/// ```ignore
/// let mut pipeline = Pipeline::new();
/// pipeline.add(timer.clone()).add(printer.clone());
/// pipeline.link(&timer.output, &[&printer.input])?;
/// let mut compiled = pipeline.compile(16)?;
/// compiled.start(&token)?;
/// ```
pub struct Pipeline {
    id: PipelineId,
    options: PipelineOptions,
    graph: Graph,
    compiled: bool,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::with_options(PipelineOptions::default())
    }

    pub fn with_options(options: PipelineOptions) -> Self {
        let id = PipelineId::next();
        tracing::debug!("Created pipeline builder {}", options.label(id));
        Self {
            id,
            options,
            graph: Graph::default(),
            compiled: false,
        }
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn stage_count(&self) -> usize {
        self.graph.stages.len()
    }

    pub fn link_count(&self) -> usize {
        self.graph.links.len()
    }

    pub fn contains_stage(&self, id: StageId) -> bool {
        self.graph.stages.contains_key(&id)
    }

    /// Whether `compile` has already succeeded on this builder.
    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    /// Register a stage and every link it declares.
    ///
    /// Adding a stage that is already registered does nothing.
    pub fn add(&mut self, stage: Arc<dyn Stage>) -> &mut Self {
        if self.compiled {
            tracing::warn!(
                "Ignoring stage {} added to already compiled {}",
                stage.id(),
                self.id
            );
            return self;
        }

        let stage_id = stage.id();
        if self.graph.stages.contains_key(&stage_id) {
            return self;
        }

        let mut node = StageNode::new(Arc::clone(&stage));
        for link in stage.links() {
            let link_id = link.id();
            if let Some(existing) = self.graph.links.get(&link_id) {
                tracing::warn!(
                    "Link {} is already owned by {}, not registering it for {}",
                    link_id,
                    existing.parent,
                    stage_id
                );
                continue;
            }
            match link.direction() {
                Direction::Receive => node.inputs.insert(link_id),
                Direction::Send => node.outputs.insert(link_id),
            };
            self.graph.links.insert(link_id, LinkNode::new(link, stage_id));
        }

        tracing::debug!(
            "Added {} ({}) with {} inputs and {} outputs",
            stage_id,
            stage.name(),
            node.inputs.len(),
            node.outputs.len()
        );
        self.graph.stages.insert(stage_id, node);
        self
    }

    /// Register several stages.
    pub fn add_all<I>(&mut self, stages: I) -> &mut Self
    where
        I: IntoIterator<Item = Arc<dyn Stage>>,
    {
        for stage in stages {
            self.add(stage);
        }
        self
    }

    /// Wire the send link `from` to every receive link in `to`.
    ///
    /// All targets are validated before anything is mutated, so a failed call
    /// leaves the graph unchanged. Receivers that end up sharing one buffer
    /// compete for its values; nothing is broadcast.
    ///
    /// When a target already has a producer, both buffers merge. Every
    /// producer of the merged buffer then feeds every receiver of it, and an
    /// edge is recorded for each such pair so the compiler sees the real flow.
    pub fn link(&mut self, from: &dyn AnyLink, to: &[&dyn AnyLink]) -> Result<()> {
        if self.compiled {
            return Err(PipelineError::Recompile(self.id));
        }

        if from.direction() != Direction::Send {
            return Err(PipelineError::Direction {
                link: from.id(),
                expected: Direction::Send,
                actual: from.direction(),
            });
        }
        if let Some(target) = to.iter().find(|t| t.direction() != Direction::Receive) {
            return Err(PipelineError::Direction {
                link: target.id(),
                expected: Direction::Receive,
                actual: target.direction(),
            });
        }

        let from_stage = self.parent_of(from)?;
        let mut targets = Vec::with_capacity(to.len());
        for &target in to {
            let to_stage = self.parent_of(target)?;
            if target.payload_type_id() != from.payload_type_id() {
                return Err(PipelineError::TypeMismatch {
                    from: from.id(),
                    to: target.id(),
                    expected: target.payload_type(),
                    found: from.payload_type(),
                });
            }
            targets.push((target, to_stage));
        }

        for (target, to_stage) in targets {
            self.alias(from, target)?;
            tracing::debug!(
                "Linked {} ({}) -> {} ({})",
                from.id(),
                from_stage,
                target.id(),
                to_stage
            );
        }

        if !to.is_empty() {
            self.record_flow(from);
        }
        Ok(())
    }

    fn parent_of(&self, link: &dyn AnyLink) -> Result<StageId> {
        self.graph
            .links
            .get(&link.id())
            .map(|n| n.parent)
            .ok_or(PipelineError::UnknownLink(link.id()))
    }

    /// Point `to` at `from`'s buffer, or, when `to` already has a producer,
    /// move `from` and everything sharing its buffer onto `to`'s buffer.
    fn alias(&self, from: &dyn AnyLink, to: &dyn AnyLink) -> Result<()> {
        if to.shares_buffer_with(from) {
            return Ok(());
        }

        let has_producer = self
            .graph
            .links
            .get(&to.id())
            .is_some_and(|n| !n.fed_by.is_empty());
        if !has_producer {
            return to.receive_from(from);
        }

        let group: Vec<LinkId> = self
            .graph
            .links
            .values()
            .filter(|n| n.link.shares_buffer_with(from))
            .map(|n| n.link.id())
            .collect();
        if group.len() > 1 {
            tracing::debug!(
                "Merging buffer of {} ({} views) into buffer of {}",
                from.id(),
                group.len(),
                to.id()
            );
        }
        for id in group {
            if let Some(node) = self.graph.links.get(&id) {
                node.link.receive_from(to)?;
            }
        }
        Ok(())
    }

    /// Record stage and link edges between every producer and every receiver
    /// sharing `anchor`'s buffer.
    fn record_flow(&mut self, anchor: &dyn AnyLink) {
        let mut producers = Vec::new();
        let mut receivers = Vec::new();
        for node in self.graph.links.values() {
            if !node.link.shares_buffer_with(anchor) {
                continue;
            }
            let entry = (node.link.id(), node.parent);
            match node.link.direction() {
                Direction::Send => producers.push(entry),
                Direction::Receive => receivers.push(entry),
            }
        }

        for &(out_id, out_stage) in &producers {
            for &(in_id, in_stage) in &receivers {
                if let Some(node) = self.graph.stages.get_mut(&out_stage) {
                    node.feeds.insert(in_stage);
                }
                if let Some(node) = self.graph.links.get_mut(&out_id) {
                    node.feeds.insert(in_id);
                }
                if let Some(node) = self.graph.links.get_mut(&in_id) {
                    node.fed_by.insert(out_id);
                }
            }
        }
    }

    /// Validate the graph, allocate every buffer with `buffer_size` slots, and
    /// produce a runnable pipeline.
    ///
    /// A builder can be compiled once; later calls fail with
    /// [`PipelineError::Recompile`].
    pub fn compile(&mut self, buffer_size: usize) -> Result<CompiledPipeline> {
        if self.compiled {
            return Err(PipelineError::Recompile(self.id));
        }

        let plan = PipelineCompiler::compile(&self.graph, buffer_size)?;

        tracing::info!(
            "Compiled {}: {} stages, {} links, {} edges in {}us",
            self.options.label(self.id),
            plan.stats.total_stages,
            plan.stats.total_links,
            plan.stats.edges,
            plan.stats.compile_time_us
        );

        self.compiled = true;
        let graph = std::mem::take(&mut self.graph);
        Ok(CompiledPipeline::new(
            self.id,
            self.options.clone(),
            graph,
            plan,
        ))
    }

    /// Compile with the buffer size from the builder's options.
    pub fn compile_default(&mut self) -> Result<CompiledPipeline> {
        self.compile(self.options.buffer_size)
    }

    /// Current topology, stages in discovery order.
    pub fn snapshot(&self) -> TopologySnapshot {
        let order: Vec<StageId> = self.graph.stages.keys().copied().collect();
        TopologySnapshot::capture(self.id, self.options.name.clone(), &self.graph, &order)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::cancel::CancellationToken;
    use crate::pipeline::link::Link;

    struct Relay {
        id: StageId,
        input: Link<u32>,
        output: Link<u32>,
    }

    impl Relay {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: StageId::next(),
                input: Link::receiver(),
                output: Link::sender(),
            })
        }
    }

    impl Stage for Relay {
        fn id(&self) -> StageId {
            self.id
        }

        fn links(&self) -> Vec<Box<dyn AnyLink>> {
            vec![self.input.erased(), self.output.erased()]
        }

        fn run(&self, token: &CancellationToken) {
            for v in self.input.iter(token) {
                if self.output.send_or_cancel(v, token).is_err() {
                    return;
                }
            }
        }
    }

    struct Words {
        id: StageId,
        input: Link<String>,
    }

    impl Stage for Words {
        fn id(&self) -> StageId {
            self.id
        }

        fn links(&self) -> Vec<Box<dyn AnyLink>> {
            vec![self.input.erased()]
        }

        fn run(&self, _token: &CancellationToken) {}
    }

    #[test]
    fn test_add_classifies_links() {
        let relay = Relay::new();
        let mut pipeline = Pipeline::new();
        pipeline.add(relay.clone());

        assert_eq!(pipeline.stage_count(), 1);
        assert_eq!(pipeline.link_count(), 2);

        let node = &pipeline.graph.stages[&relay.id];
        assert!(node.inputs.contains(&relay.input.id()));
        assert!(node.outputs.contains(&relay.output.id()));
        assert_eq!(pipeline.graph.links[&relay.output.id()].parent, relay.id);
    }

    #[test]
    fn test_add_is_idempotent() {
        let relay = Relay::new();
        let mut pipeline = Pipeline::new();
        pipeline.add(relay.clone()).add(relay.clone());
        pipeline.add_all([relay.clone() as Arc<dyn Stage>]);

        assert_eq!(pipeline.stage_count(), 1);
        assert_eq!(pipeline.link_count(), 2);
    }

    #[test]
    fn test_link_records_edges_and_aliases() {
        let a = Relay::new();
        let b = Relay::new();
        let mut pipeline = Pipeline::new();
        pipeline.add(a.clone()).add(b.clone());

        pipeline.link(&a.output, &[&b.input]).unwrap();

        assert!(pipeline.graph.stages[&a.id].feeds.contains(&b.id));
        assert!(pipeline.graph.links[&a.output.id()].is_consumed());
        assert!(pipeline.graph.links[&b.input.id()]
            .fed_by
            .contains(&a.output.id()));
        assert!(b.input.shares_buffer_with(&a.output));
    }

    #[test]
    fn test_link_twice_is_deduplicated() {
        let a = Relay::new();
        let b = Relay::new();
        let mut pipeline = Pipeline::new();
        pipeline.add(a.clone()).add(b.clone());

        pipeline.link(&a.output, &[&b.input]).unwrap();
        pipeline.link(&a.output, &[&b.input]).unwrap();

        assert_eq!(pipeline.graph.edge_count(), 1);
        assert_eq!(pipeline.graph.links[&a.output.id()].feeds.len(), 1);
    }

    #[test]
    fn test_link_from_receive_is_direction_error() {
        let a = Relay::new();
        let b = Relay::new();
        let mut pipeline = Pipeline::new();
        pipeline.add(a.clone()).add(b.clone());

        let err = pipeline.link(&a.input, &[&b.input]).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Direction { link, expected: Direction::Send, .. } if link == a.input.id()
        ));
    }

    #[test]
    fn test_link_to_send_is_direction_error() {
        let a = Relay::new();
        let b = Relay::new();
        let mut pipeline = Pipeline::new();
        pipeline.add(a.clone()).add(b.clone());

        let err = pipeline.link(&a.output, &[&b.input, &b.output]).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Direction { link, expected: Direction::Receive, .. } if link == b.output.id()
        ));
        // Validation happens before mutation.
        assert!(!pipeline.graph.links[&a.output.id()].is_consumed());
        assert!(!b.input.shares_buffer_with(&a.output));
    }

    #[test]
    fn test_link_to_unknown_stage() {
        let a = Relay::new();
        let stranger = Relay::new();
        let mut pipeline = Pipeline::new();
        pipeline.add(a.clone());

        let err = pipeline.link(&a.output, &[&stranger.input]).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownLink(id) if id == stranger.input.id()));
    }

    #[test]
    fn test_link_from_unknown_stage() {
        let a = Relay::new();
        let stranger = Relay::new();
        let mut pipeline = Pipeline::new();
        pipeline.add(a.clone());

        let err = pipeline.link(&stranger.output, &[&a.input]).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownLink(id) if id == stranger.output.id()));
    }

    #[test]
    fn test_link_type_mismatch() {
        let a = Relay::new();
        let words = Arc::new(Words {
            id: StageId::next(),
            input: Link::receiver(),
        });
        let mut pipeline = Pipeline::new();
        pipeline.add(a.clone()).add(words.clone());

        let err = pipeline.link(&a.output, &[&words.input]).unwrap_err();
        assert!(matches!(err, PipelineError::TypeMismatch { .. }));
        assert!(err.to_string().contains("u32"));
    }

    #[test]
    fn test_direct_fan_in_merges_buffers() {
        let a = Relay::new();
        let b = Relay::new();
        let sink = Relay::new();
        let mut pipeline = Pipeline::new();
        pipeline.add(a.clone()).add(b.clone()).add(sink.clone());

        pipeline.link(&a.output, &[&sink.input]).unwrap();
        pipeline.link(&b.output, &[&sink.input]).unwrap();

        assert!(a.output.shares_buffer_with(&b.output));
        assert!(sink.input.shares_buffer_with(&a.output));
    }

    #[test]
    fn test_direction_checked_before_registration() {
        let a = Relay::new();
        let stranger = Relay::new();
        let mut pipeline = Pipeline::new();
        pipeline.add(a.clone());

        let err = pipeline.link(&stranger.output, &[&a.output]).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Direction { link, expected: Direction::Receive, .. } if link == a.output.id()
        ));
    }

    #[test]
    fn test_merge_after_fan_out_records_every_flow() {
        // a -> x, b -> y, then a -> y merges both buffers: b now also feeds x.
        let a = Relay::new();
        let b = Relay::new();
        let x = Relay::new();
        let y = Relay::new();
        let mut pipeline = Pipeline::new();
        pipeline
            .add(a.clone())
            .add(b.clone())
            .add(x.clone())
            .add(y.clone());
        pipeline.link(&a.output, &[&x.input]).unwrap();
        pipeline.link(&b.output, &[&y.input]).unwrap();
        pipeline.link(&a.output, &[&y.input]).unwrap();

        assert!(x.input.shares_buffer_with(&b.output));
        assert!(pipeline.graph.stages[&b.id].feeds.contains(&x.id));
        assert!(pipeline.graph.stages[&a.id].feeds.contains(&y.id));
        assert!(pipeline.graph.links[&x.input.id()]
            .fed_by
            .contains(&b.output.id()));
        assert!(pipeline.graph.links[&b.output.id()]
            .feeds
            .contains(&x.input.id()));
        assert_eq!(pipeline.graph.edge_count(), 4);
    }

    #[test]
    fn test_merge_that_closes_a_loop_is_a_cycle() {
        // x -> y, then source -> x, then source -> y: x's input joins the
        // buffer x writes into, so x feeds itself.
        let source = Relay::new();
        let x = Relay::new();
        let y = Relay::new();
        let mut pipeline = Pipeline::new();
        pipeline.add(source.clone()).add(x.clone()).add(y.clone());
        pipeline.link(&x.output, &[&y.input]).unwrap();
        pipeline.link(&source.output, &[&x.input]).unwrap();
        pipeline.link(&source.output, &[&y.input]).unwrap();

        assert!(x.input.shares_buffer_with(&x.output));
        assert!(pipeline.graph.stages[&x.id].feeds.contains(&x.id));
        assert!(matches!(
            pipeline.compile(1),
            Err(PipelineError::Cycle { .. })
        ));
    }

    #[test]
    fn test_compile_twice_is_recompile_error() {
        let mut pipeline = Pipeline::new();
        pipeline.compile(1).unwrap();
        assert!(pipeline.is_compiled());

        let err = pipeline.compile(1).unwrap_err();
        assert!(matches!(err, PipelineError::Recompile(id) if id == pipeline.id()));
    }

    #[test]
    fn test_link_after_compile_fails() {
        let a = Relay::new();
        let b = Relay::new();
        let c = Relay::new();
        let mut pipeline = Pipeline::new();
        pipeline.add(a.clone()).add(b.clone()).add(c.clone());
        pipeline.link(&a.output, &[&b.input]).unwrap();
        pipeline.link(&b.output, &[&c.input]).unwrap();
        pipeline.link(&c.output, &[&a.input]).unwrap();

        // The cycle is only reported by compile, which leaves the builder usable.
        assert!(matches!(pipeline.compile(1), Err(PipelineError::Cycle { .. })));
        assert!(!pipeline.is_compiled());

        let mut empty = Pipeline::new();
        empty.compile(1).unwrap();
        let err = empty.link(&a.output, &[&b.input]).unwrap_err();
        assert!(matches!(err, PipelineError::Recompile(_)));
    }

    #[test]
    fn test_compile_default_uses_options() {
        let a = Relay::new();
        let b = Relay::new();
        let mut pipeline = Pipeline::with_options(PipelineOptions::new().with_buffer_size(3));
        pipeline.add(a.clone()).add(b.clone());
        pipeline.link(&a.output, &[&b.input]).unwrap();
        pipeline.link(&b.output, &[]).unwrap();

        // b.output is unconsumed: compile must reject it.
        assert!(matches!(
            pipeline.compile_default(),
            Err(PipelineError::UnconsumedOutput { link, .. }) if link == b.output.id()
        ));
        assert!(!pipeline.is_compiled());
    }

    #[test]
    fn test_snapshot_lists_stages() {
        let a = Relay::new();
        let b = Relay::new();
        let mut pipeline = Pipeline::with_options(PipelineOptions::new().with_name("snap"));
        pipeline.add(a.clone()).add(b.clone());
        pipeline.link(&a.output, &[&b.input]).unwrap();

        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.name.as_deref(), Some("snap"));
        assert_eq!(snapshot.stages.len(), 2);
        assert_eq!(snapshot.stages[0].id, a.id);
        assert_eq!(snapshot.stages[0].feeds, vec![b.id]);
    }
}
