//! The input adapter contract and the worker loop that pumps an input's
//! reads into a [`crate::sender::Sender`].
//!
//! Grounded on the teacher's `modules::inputs::run_input`: read-error
//! backoff on `Error::NoInputToReturn`, clean shutdown on
//! `Error::EndOfInput`, and a `kill_switch`/cancellation race around the
//! read call. The teacher additionally threads a `MessageHandle` state
//! channel through this loop for its own batch bookkeeping; here that
//! bookkeeping lives entirely inside the [`crate::sender::Sender`] the
//! input is handed, so the loop itself only needs to call `read`/`close`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::event::Event;
use crate::sender::Sender;
use crate::Error;

const NO_INPUT_BACKOFF_MIN_US: u64 = 1;
const NO_INPUT_BACKOFF_MAX_MS: u64 = 10;

/// Resource cleanup shared by both ends of the pipeline boundary
/// ([`Input`] and [`crate::output::Output`]).
#[async_trait]
pub trait Closer: Send + Sync {
    /// Releases any held resources. Called exactly once, whether the
    /// adapter ran to completion or was cancelled.
    async fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// An event source. Implementations signal "nothing available right now,
/// try again" with [`Error::NoInputToReturn`] and a clean end of stream
/// with [`Error::EndOfInput`]; any other error is fatal to the input.
#[async_trait]
pub trait Input: Closer {
    /// Reads the next event.
    async fn read(&mut self) -> Result<Event, Error>;
}

/// Drives one input: reads events and publishes them through `sender`
/// until the input reports end-of-stream or `cancel` fires.
pub async fn run_input(
    mut input: Box<dyn Input>,
    sender: Arc<Sender>,
    cancel: CancellationToken,
) -> Result<(), Error> {
    debug!("input connected");
    let mut no_input_count: u32 = 0;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                input.close().await?;
                debug!("input closed by cancellation");
                return Ok(());
            }
            read = input.read() => {
                match read {
                    Ok(event) => {
                        no_input_count = 0;
                        trace!("input produced an event");
                        sender.send(vec![event]).await?;
                    }
                    Err(Error::EndOfInput) => {
                        input.close().await?;
                        debug!("input reached end of stream");
                        return Ok(());
                    }
                    Err(Error::NoInputToReturn) => {
                        let backoff_us = NO_INPUT_BACKOFF_MIN_US
                            .saturating_mul(1u64 << no_input_count.min(20))
                            .min(NO_INPUT_BACKOFF_MAX_MS * 1000);
                        sleep(Duration::from_micros(backoff_us)).await;
                        no_input_count = no_input_count.saturating_add(1);
                    }
                    Err(e) => {
                        input.close().await?;
                        return Err(e);
                    }
                }
            }
        }
    }
}

/// Reads newline-delimited text from standard input, one event per line,
/// each with a single `message` field. Grounded on the teacher's `stdin`
/// input, replacing its `async_std::io::stdin` with tokio's own reader so
/// the crate does not need a second async runtime's I/O traits.
pub struct StdinInput {
    lines: tokio::io::Lines<BufReader<tokio::io::Stdin>>,
}

impl Default for StdinInput {
    fn default() -> Self {
        Self::new()
    }
}

impl StdinInput {
    /// Builds an input reading from the process's standard input.
    pub fn new() -> Self {
        StdinInput {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

#[async_trait]
impl Closer for StdinInput {}

#[async_trait]
impl Input for StdinInput {
    async fn read(&mut self) -> Result<Event, Error> {
        match self.lines.next_line().await {
            Ok(Some(line)) => {
                let mut event = Event::new();
                event.set("message", line);
                Ok(event)
            }
            Ok(None) => Err(Error::EndOfInput),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// Reads newline-delimited text from a file, one event per line. Grounded
/// on the teacher's `file` input's `Lines` codec mode; the position-
/// tracking `Tail` mode is out of scope here (section 9's non-goals).
pub struct FileInput {
    lines: tokio::io::Lines<BufReader<tokio::fs::File>>,
}

impl FileInput {
    /// Opens `path` for line-oriented reading.
    pub async fn open(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let file = tokio::fs::File::open(path).await.map_err(Error::Io)?;
        Ok(FileInput {
            lines: BufReader::new(file).lines(),
        })
    }
}

#[async_trait]
impl Closer for FileInput {}

#[async_trait]
impl Input for FileInput {
    async fn read(&mut self) -> Result<Event, Error> {
        match self.lines.next_line().await {
            Ok(Some(line)) => {
                let mut event = Event::new();
                event.set("message", line);
                Ok(event)
            }
            Ok(None) => Err(Error::EndOfInput),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// Wraps a channel as an input, for test harnesses and for
/// programmatically-fed pipelines. Closing the sending half signals
/// end-of-stream.
pub struct ChannelInput {
    rx: flume::Receiver<Event>,
}

impl ChannelInput {
    /// Builds an input reading from `rx` until it is closed.
    pub fn new(rx: flume::Receiver<Event>) -> Self {
        ChannelInput { rx }
    }
}

#[async_trait]
impl Closer for ChannelInput {}

#[async_trait]
impl Input for ChannelInput {
    async fn read(&mut self) -> Result<Event, Error> {
        self.rx.recv_async().await.map_err(|_| Error::EndOfInput)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::batch::BatchThresholds;

    #[tokio::test]
    async fn channel_input_forwards_until_closed() {
        let (tx, rx) = flume::unbounded();
        let mut input = ChannelInput::new(rx);
        tx.send_async(Event::new()).await.unwrap();
        drop(tx);

        assert!(input.read().await.is_ok());
        assert!(matches!(input.read().await, Err(Error::EndOfInput)));
    }

    #[tokio::test]
    async fn run_input_forwards_events_to_sender() {
        let (rx_tx, rx_rx) = flume::unbounded();
        let input: Box<dyn Input> = Box::new(ChannelInput::new(rx_rx));
        let (to_pipeline, pipeline_rx) = flume::unbounded();
        let sender = Arc::new(Sender::new(
            to_pipeline,
            1,
            BatchThresholds::default(),
            CancellationToken::new(),
        ));

        let mut event = Event::new();
        event.set("message", "hi");
        rx_tx.send_async(event).await.unwrap();
        drop(rx_tx);

        run_input(input, sender, CancellationToken::new()).await.unwrap();
        let forwarded = pipeline_rx.recv_async().await.unwrap();
        assert_eq!(
            forwarded.get("message"),
            Some(&crate::event::Value::String("hi".into()))
        );
    }
}
