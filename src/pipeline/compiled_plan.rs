use crate::pipeline::id::StageId;
use serde::Serialize;

/// Result of compiling a pipeline graph.
#[derive(Debug, Clone, Default)]
pub struct CompiledPlan {
    /// Stage ids in topological order
    pub order: Vec<StageId>,

    /// Compilation statistics
    pub stats: PlanStats,
}

/// Statistics about the compiled plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanStats {
    /// Number of stages in the graph
    pub total_stages: usize,

    /// Number of links declared by those stages
    pub total_links: usize,

    /// Number of distinct stage-to-stage edges
    pub edges: usize,

    /// Stages without inputs
    pub source_stages: usize,

    /// Stages without outputs
    pub sink_stages: usize,

    /// Inputs that nothing was linked into
    pub dangling_inputs: usize,

    /// Compilation time in microseconds
    pub compile_time_us: u64,
}

impl CompiledPlan {
    /// Check if the plan has any stages
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Position of a stage in the topological order
    pub fn position(&self, stage: StageId) -> Option<usize> {
        self.order.iter().position(|&s| s == stage)
    }
}
