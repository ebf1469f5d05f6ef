//! # stagepipe: a threaded dataflow pipeline runtime
//!
//! Declare a directed graph of stages connected by typed, bounded links,
//! validate it, and run every stage concurrently until cancellation.
//!
//! ## Architecture
//!
//! - **Links**: directional, typed views over a shared bounded queue
//! - **Builder**: registers stages and wires outputs to inputs
//! - **Compiler**: rejects cycles and unconsumed outputs, orders stages
//!   topologically and allocates every buffer
//! - **Compiled pipeline**: one OS thread per stage, stopped through a
//!   cancellation token, with a completion signal
//!
//! ## Example
//!
//! ```no_run
//! use stagepipe::{stages::{Printer, Timer}, CancellationToken, Pipeline};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! fn main() -> stagepipe::Result<()> {
//!     let timer = Arc::new(Timer::new(Duration::from_millis(100)));
//!     let printer = Arc::new(Printer::<u64>::new());
//!
//!     let mut pipeline = Pipeline::new();
//!     pipeline.add(timer.clone()).add(printer.clone());
//!     pipeline.link(&timer.output, &[&printer.input])?;
//!
//!     let mut compiled = pipeline.compile(16)?;
//!     let token = CancellationToken::new();
//!     compiled.start(&token)?;
//!
//!     std::thread::sleep(Duration::from_secs(1));
//!     compiled.stop().wait();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod stages;

// Re-export commonly used types
pub use config::PipelineOptions;
pub use error::{PipelineError, Result, ResultExt};
pub use pipeline::{
    fan_in, fan_in_until, AnyLink, CancellationToken, CompiledPipeline, Completion, Direction,
    Link, LinkId, Pipeline, PipelineId, Stage, StageId, TopologySnapshot,
};
