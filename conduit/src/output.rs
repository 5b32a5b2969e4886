//! The output adapter contract and the worker loop that drains one
//! output's delivery queue, signalling each event's batch as it goes.
//!
//! Grounded on the teacher's `modules::outputs::run_output`: read from a
//! channel until it closes, write, and translate the outcome into a state
//! signal. Here "the state signal" is whichever of the batch's four
//! channels applies (section 4.5), sent directly through the event's own
//! [`crate::batch::BatchHandle`] rather than through a second mediating
//! channel back to a runtime task.

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, Stdout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec::Codec;
use crate::event::Event;
use crate::input::Closer;
use crate::Error;

/// An event sink. Implementations report per-event failures by returning
/// `Err`; the worker loop treats that as non-fatal to the output itself
/// and signals the event's batch accordingly.
#[async_trait]
pub trait Output: Closer {
    /// Delivers one event.
    async fn write(&mut self, event: &Event) -> Result<(), Error>;
}

/// Drains `input` into `output` until the channel closes or `cancel`
/// fires, signalling each event's batch handle (if any) with the outcome.
pub async fn run_output(
    input: flume::Receiver<Event>,
    mut output: Box<dyn Output>,
    cancel: CancellationToken,
) -> Result<(), Error> {
    debug!("output connected");
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                output.close().await?;
                debug!("output closed by cancellation");
                return Ok(());
            }
            recv = input.recv_async() => {
                match recv {
                    Ok(event) => {
                        trace!("delivering event to output");
                        match output.write(&event).await {
                            Ok(()) => {
                                if let Some(batch) = event.batch() {
                                    batch.output_burndown();
                                }
                            }
                            Err(e) => {
                                if let Some(batch) = event.batch() {
                                    batch.error_signal(e.to_string());
                                } else {
                                    warn!(error = %e, "output failed for an event with no batch attached");
                                }
                            }
                        }
                    }
                    Err(_) => {
                        output.close().await?;
                        debug!("output closed");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Writes events to standard output, one encoded frame per line. Grounded
/// on the teacher's `stdout` output.
pub struct StdoutOutput {
    codec: Box<dyn Codec>,
    stdout: Stdout,
}

impl StdoutOutput {
    /// Builds an output that encodes every event with `codec` before
    /// writing it, newline-terminated, to standard output.
    pub fn new(codec: Box<dyn Codec>) -> Self {
        StdoutOutput {
            codec,
            stdout: tokio::io::stdout(),
        }
    }
}

#[async_trait]
impl Closer for StdoutOutput {}

#[async_trait]
impl Output for StdoutOutput {
    async fn write(&mut self, event: &Event) -> Result<(), Error> {
        let mut frame = self.codec.encode(event)?;
        frame.push(b'\n');
        self.stdout.write_all(&frame).await.map_err(Error::Io)?;
        Ok(())
    }
}

/// Discards every event. Grounded on the teacher's `drop` output; useful
/// as a pipeline's terminal sink in tests and in lint-only runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct DropOutput;

#[async_trait]
impl Closer for DropOutput {}

#[async_trait]
impl Output for DropOutput {
    async fn write(&mut self, _event: &Event) -> Result<(), Error> {
        Ok(())
    }
}
