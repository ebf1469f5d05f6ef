//! The contract implemented by every pipeline stage.
//!
//! A stage owns its links as ordinary fields and hands type-erased handles to
//! them out through [`Stage::links`]. The builder classifies them by
//! direction when the stage is added; no runtime introspection is involved.
//!
//! ```ignore
//! struct Doubler {
//!     id: StageId,
//!     input: Link<u32>,
//!     output: Link<u32>,
//! }
//!
//! impl Stage for Doubler {
//!     fn id(&self) -> StageId {
//!         self.id
//!     }
//!
//!     fn links(&self) -> Vec<Box<dyn AnyLink>> {
//!         vec![self.input.erased(), self.output.erased()]
//!     }
//!
//!     fn run(&self, token: &CancellationToken) {
//!         for v in self.input.iter(token) {
//!             if self.output.send_or_cancel(v * 2, token).is_err() {
//!                 return;
//!             }
//!         }
//!     }
//! }
//! ```

use crate::pipeline::cancel::CancellationToken;
use crate::pipeline::id::StageId;
use crate::pipeline::link::AnyLink;

/// An independently scheduled unit of pipeline work.
///
/// # Cancellation
///
/// `run` executes on its own thread and must return promptly once `token` is
/// cancelled. Every blocking wait inside a stage should go through
/// [`Link::receive`], [`Link::send_or_cancel`], or a `select!` on
/// [`CancellationToken::cancelled`]. A stage that blocks elsewhere keeps its
/// thread alive past cancellation, and the pipeline's completion signal will
/// not fire until it returns. The runtime cannot enforce this.
///
/// [`Link::receive`]: crate::pipeline::link::Link::receive
/// [`Link::send_or_cancel`]: crate::pipeline::link::Link::send_or_cancel
pub trait Stage: Send + Sync + 'static {
    /// Stable, unique identifier of this stage.
    fn id(&self) -> StageId;

    /// Human-readable name, used in logs and topology dumps.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Every link this stage owns, inputs and outputs alike.
    fn links(&self) -> Vec<Box<dyn AnyLink>>;

    /// Entry point. Runs until the work is done or `token` is cancelled.
    fn run(&self, token: &CancellationToken);
}
