use super::builder::Graph;
use super::compiled_plan::{CompiledPlan, PlanStats};
use crate::error::{PipelineError, Result};
use crate::pipeline::id::StageId;
use crate::pipeline::link::Direction;
use std::collections::{HashMap, HashSet};

/// Validates a pipeline graph and turns it into an execution plan
pub struct PipelineCompiler;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnStack,
    Done,
}

impl PipelineCompiler {
    /// Compile a pipeline graph.
    ///
    /// Each step gates the next:
    /// 1. reject cycles (self-loops included),
    /// 2. reject send links that feed nothing,
    /// 3. order stages topologically,
    /// 4. allocate every buffer, walking stages in that order.
    pub(crate) fn compile(graph: &Graph, buffer_size: usize) -> Result<CompiledPlan> {
        let start_time = std::time::Instant::now();

        if let Some(stage) = Self::find_cycle(graph) {
            return Err(PipelineError::Cycle { stage });
        }

        Self::check_consumed(graph)?;

        let order = Self::topological_order(graph);
        let dangling_inputs = Self::materialize(graph, &order, buffer_size);

        let stats = PlanStats {
            total_stages: graph.stages.len(),
            total_links: graph.links.len(),
            edges: graph.edge_count(),
            source_stages: graph.stages.values().filter(|s| s.inputs.is_empty()).count(),
            sink_stages: graph.stages.values().filter(|s| s.outputs.is_empty()).count(),
            dangling_inputs,
            compile_time_us: start_time.elapsed().as_micros() as u64,
        };

        Ok(CompiledPlan { order, stats })
    }

    /// Find a stage that closes a cycle, using an iterative DFS.
    ///
    /// A stage is `OnStack` while its subtree is being explored; reaching such
    /// a stage again means a back edge.
    fn find_cycle(graph: &Graph) -> Option<StageId> {
        let mut marks: HashMap<StageId, Mark> = HashMap::with_capacity(graph.stages.len());

        for (&root, root_node) in &graph.stages {
            if marks.contains_key(&root) {
                continue;
            }

            marks.insert(root, Mark::OnStack);
            let mut stack = vec![(root, root_node.feeds.iter())];

            while let Some((node, children)) = stack.last_mut() {
                let node = *node;
                match children.next().copied() {
                    Some(next) => match marks.get(&next) {
                        Some(Mark::OnStack) => return Some(next),
                        Some(Mark::Done) => {}
                        None => {
                            if let Some(next_node) = graph.stages.get(&next) {
                                marks.insert(next, Mark::OnStack);
                                stack.push((next, next_node.feeds.iter()));
                            }
                        }
                    },
                    None => {
                        marks.insert(node, Mark::Done);
                        stack.pop();
                    }
                }
            }
        }

        None
    }

    /// Every send link must feed at least one receive link.
    fn check_consumed(graph: &Graph) -> Result<()> {
        match graph
            .links
            .values()
            .find(|n| n.link.direction() == Direction::Send && !n.is_consumed())
        {
            Some(node) => Err(PipelineError::UnconsumedOutput {
                link: node.link.id(),
                stage: node.parent,
            }),
            None => Ok(()),
        }
    }

    /// Reverse postorder of an iterative DFS over stages in discovery order.
    fn topological_order(graph: &Graph) -> Vec<StageId> {
        let mut visited: HashSet<StageId> = HashSet::with_capacity(graph.stages.len());
        let mut postorder = Vec::with_capacity(graph.stages.len());

        for (&root, root_node) in &graph.stages {
            if !visited.insert(root) {
                continue;
            }

            let mut stack = vec![(root, root_node.feeds.iter())];
            while let Some((node, children)) = stack.last_mut() {
                let node = *node;
                match children.next().copied() {
                    Some(next) => {
                        if let Some(next_node) = graph.stages.get(&next) {
                            if visited.insert(next) {
                                stack.push((next, next_node.feeds.iter()));
                            }
                        }
                    }
                    None => {
                        postorder.push(node);
                        stack.pop();
                    }
                }
            }
        }

        postorder.reverse();
        postorder
    }

    /// Allocate output buffers in topological order, so every buffer a stage
    /// reads from exists before that stage can run. Inputs nothing was linked
    /// into get a buffer too; with no writer it reports end-of-stream at once.
    ///
    /// Returns the number of such dangling inputs.
    fn materialize(graph: &Graph, order: &[StageId], buffer_size: usize) -> usize {
        for stage_id in order {
            let Some(stage) = graph.stages.get(stage_id) else {
                continue;
            };
            for link_id in &stage.outputs {
                if let Some(node) = graph.links.get(link_id) {
                    node.link.make(buffer_size);
                }
            }
        }

        let mut dangling = 0;
        for stage_id in order {
            let Some(stage) = graph.stages.get(stage_id) else {
                continue;
            };
            for link_id in &stage.inputs {
                if let Some(node) = graph.links.get(link_id) {
                    if node.fed_by.is_empty() {
                        tracing::debug!("Input {} of {} is not linked", link_id, stage_id);
                        dangling += 1;
                    }
                    node.link.make(buffer_size);
                }
            }
        }
        dangling
    }
}
