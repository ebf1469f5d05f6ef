//! Reference stages.
//!
//! - [`Timer`]: emits a tick counter at a fixed period
//! - [`Printer`]: logs every value it receives

mod printer;
mod timer;

pub use printer::Printer;
pub use timer::Timer;
