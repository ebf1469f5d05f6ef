//! stagepipe demo: a timer feeding a printer.
//!
//! Usage: `stagepipe [options.toml]`. The pipeline runs for ten seconds, then
//! stops and waits for every stage to finish.

use anyhow::Context;
use stagepipe::{
    stages::{Printer, Timer},
    CancellationToken, Pipeline, PipelineOptions, Stage,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const RUN_FOR: Duration = Duration::from_secs(10);
const DEMO_BUFFER_SIZE: usize = 16;

/// Options from the file at `path`, or the demo defaults when none is given.
fn demo_options(path: Option<&str>) -> anyhow::Result<PipelineOptions> {
    match path {
        Some(path) => PipelineOptions::load(path)
            .with_context(|| format!("Failed to load options from {}", path)),
        None => Ok(PipelineOptions::default()
            .with_name("timer-printer")
            .with_buffer_size(DEMO_BUFFER_SIZE)),
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,stagepipe=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let options = demo_options(std::env::args().nth(1).as_deref())?;

    let timer = Arc::new(Timer::new(Duration::from_secs(1)));
    let printer = Arc::new(Printer::<u64>::new());
    tracing::info!("Timer stage {}, printer stage {}", timer.id(), printer.id());

    let mut pipeline = Pipeline::with_options(options);
    pipeline.add(timer.clone()).add(printer.clone());
    pipeline.link(&timer.output, &[&printer.input])?;

    let mut compiled = pipeline.compile_default()?;
    compiled.log();

    let token = CancellationToken::new();
    token.cancel_after(RUN_FOR)?;
    compiled.start(&token)?;

    token.wait();
    compiled.stop().wait();
    tracing::info!("Printer received {} ticks", printer.received());

    Ok(())
}
