//! Merge several receive links into one stream.
//!
//! One drainer thread per input forwards values into a rendezvous channel.
//! Each drainer holds its own clone of the output sender, so the merged
//! stream ends once every input has ended and every drainer has exited.
//! Values from one input keep their order; across inputs order is
//! unspecified.

use crate::error::Result;
use crate::pipeline::cancel::CancellationToken;
use crate::pipeline::link::Link;
use crossbeam_channel::{bounded, never, select, Receiver, Sender};
use std::thread;

/// Merge `inputs` until every one of them reaches end-of-stream.
pub fn fan_in<T: Send + 'static>(inputs: &[Link<T>]) -> Result<Receiver<T>> {
    spawn_drainers(inputs, None)
}

/// Merge `inputs` until they end or `token` is cancelled.
pub fn fan_in_until<T: Send + 'static>(
    inputs: &[Link<T>],
    token: &CancellationToken,
) -> Result<Receiver<T>> {
    spawn_drainers(inputs, Some(token))
}

fn spawn_drainers<T: Send + 'static>(
    inputs: &[Link<T>],
    token: Option<&CancellationToken>,
) -> Result<Receiver<T>> {
    // Validate every input before spawning anything.
    let sources = inputs
        .iter()
        .map(|link| link.raw_receiver().map(|rx| (link.id(), rx)))
        .collect::<Result<Vec<_>>>()?;

    let (out_tx, out_rx) = bounded(0);
    for (id, source) in sources {
        let out = out_tx.clone();
        let cancelled = token.map_or_else(never, |t| t.cancelled().clone());
        thread::Builder::new()
            .name(format!("fanin-{}", id.0))
            .spawn(move || drain(source, out, cancelled))?;
        tracing::debug!("Draining {} into fan-in output", id);
    }

    Ok(out_rx)
}

fn drain<T>(source: Receiver<T>, out: Sender<T>, cancelled: Receiver<()>) {
    loop {
        let value = select! {
            recv(source) -> msg => match msg {
                Ok(value) => value,
                Err(_) => return,
            },
            recv(cancelled) -> _ => return,
        };
        select! {
            send(out, value) -> res => if res.is_err() { return },
            recv(cancelled) -> _ => return,
        }
    }
}
