//! Dataflow pipeline: stages connected by typed, bounded links.
//!
//! Stages are registered with a [`Pipeline`] builder, their outputs linked to
//! other stages' inputs, and the graph compiled into a [`CompiledPipeline`]
//! that runs every stage on its own thread.
//!
//! # Architecture
//!
//! ```text
//! Pipeline::add / link ──► PipelineCompiler ──► CompiledPipeline::start
//!   (StageNode, LinkNode)    cycle check          one thread per stage
//!                            unconsumed outputs   shared CancellationToken
//!                            topological order
//!                            buffer allocation
//! ```
//!
//! # Design
//!
//! - **Aliased buffers**: linking makes the input a view over the output's
//!   queue; fan-in by direct linking merges producers into one queue.
//! - **Competing consumers**: receivers sharing a queue split its values.
//! - **Backpressure**: every queue is a bounded crossbeam channel.
//! - **Cooperative cancellation**: stages watch one token at every wait.

pub mod builder;
pub mod cancel;
pub mod compiled;
pub mod compiled_plan;
pub mod compiler;
pub mod fanin;
pub mod id;
pub mod link;
pub mod snapshot;
pub mod stage;

pub use builder::Pipeline;
pub use cancel::CancellationToken;
pub use compiled::{CompiledPipeline, Completion};
pub use compiled_plan::{CompiledPlan, PlanStats};
pub use compiler::PipelineCompiler;
pub use fanin::{fan_in, fan_in_until};
pub use id::{LinkId, PipelineId, StageId};
pub use link::{AnyLink, Direction, Link};
pub use snapshot::{LinkSnapshot, StageSnapshot, TopologySnapshot};
pub use stage::Stage;
