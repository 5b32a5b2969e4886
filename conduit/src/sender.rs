//! The object handed to each input for publishing events and byte streams.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::batch::{Batch, BatchResult, BatchThresholds};
use crate::codec::Codec;
use crate::event::Event;
use crate::extractor;
use crate::framing::Framing;
use crate::Error;

/// The surface an input uses to publish events, mirroring the teacher's
/// `MessageHandle` registration plus the `Runtime`'s channel wiring, but
/// collapsed into the single object section 4.4 describes.
pub struct Sender {
    to_pipeline: flume::Sender<Event>,
    fanout: u32,
    thresholds: BatchThresholds,
    e2e: AtomicBool,
    cancel: CancellationToken,
}

impl Sender {
    /// Builds a sender that forwards to `to_pipeline` (the merge-point
    /// channel for this input's per-input filter chain).
    pub fn new(
        to_pipeline: flume::Sender<Event>,
        fanout: u32,
        thresholds: BatchThresholds,
        cancel: CancellationToken,
    ) -> Self {
        Sender {
            to_pipeline,
            fanout,
            thresholds,
            e2e: AtomicBool::new(false),
            cancel,
        }
    }

    /// Toggles end-to-end acknowledgement for subsequent sends.
    pub fn set_e2e(&self, enabled: bool) {
        self.e2e.store(enabled, Ordering::SeqCst);
    }

    fn e2e_enabled(&self) -> bool {
        self.e2e.load(Ordering::SeqCst)
    }

    /// Publishes fully-formed events. Returns `None` when end-to-end
    /// acknowledgement is disabled (enqueues and returns immediately);
    /// otherwise attaches a fresh batch to every event and waits for the
    /// batch to complete.
    pub async fn send(&self, mut events: Vec<Event>) -> Result<Option<BatchResult>, Error> {
        if !self.e2e_enabled() {
            for event in events {
                self.to_pipeline.send_async(event).await?;
            }
            return Ok(None);
        }

        let batch = Batch::new(self.fanout, self.thresholds);
        let handle = batch.handle();
        let count = events.len() as u64;
        for event in &mut events {
            event.attach_batch(handle.clone());
        }
        for event in events {
            self.to_pipeline.send_async(event).await?;
        }
        let result = batch.set_target(count).wait_for_result().await;
        Ok(Some(result))
    }

    /// Treats `reader` as one logical batch, using the input's own
    /// configured framing/codec.
    pub async fn send_raw<R: AsyncRead + Unpin>(
        &self,
        template: &Event,
        framing: &[Arc<dyn Framing>],
        codec: &dyn Codec,
        reader: R,
    ) -> Result<Option<BatchResult>, Error> {
        self.send_with_framing_codec(template, framing, codec, reader)
            .await
    }

    /// Like [`Sender::send_raw`], but with an explicit framing/codec
    /// choice, bypassing whatever the input itself is configured with.
    /// Used by collaborators that dispatch on content type.
    ///
    /// Unlike [`Sender::send`], the batch (when end-to-end acknowledgement
    /// is enabled) starts in its `collecting` state: each event is
    /// attached and forwarded to the pipeline as soon as [`extractor::extract`]
    /// decodes it, rather than after the whole stream has been buffered,
    /// so a long-lived stream starts flowing immediately instead of
    /// waiting for EOF. The batch only moves to `finalizing` (`set_target`)
    /// once extraction itself reports how many events it produced.
    pub async fn send_with_framing_codec<R: AsyncRead + Unpin>(
        &self,
        template: &Event,
        framing: &[Arc<dyn Framing>],
        codec: &dyn Codec,
        reader: R,
    ) -> Result<Option<BatchResult>, Error> {
        let (decoded_tx, decoded_rx) = flume::bounded::<Event>(2);

        if !self.e2e_enabled() {
            let to_pipeline = self.to_pipeline.clone();
            let forward = tokio::spawn(async move {
                while let Ok(event) = decoded_rx.recv_async().await {
                    if to_pipeline.send_async(event).await.is_err() {
                        break;
                    }
                }
            });
            let result = extractor::extract(reader, framing, codec, template, &decoded_tx, self.cancel.clone()).await;
            drop(decoded_tx);
            let _ = forward.await;
            result?;
            return Ok(None);
        }

        let batch = Batch::new(self.fanout, self.thresholds);
        let handle = batch.handle();
        let to_pipeline = self.to_pipeline.clone();
        let forward = tokio::spawn(async move {
            while let Ok(mut event) = decoded_rx.recv_async().await {
                event.attach_batch(handle.clone());
                if to_pipeline.send_async(event).await.is_err() {
                    break;
                }
            }
        });

        let count = extractor::extract(reader, framing, codec, template, &decoded_tx, self.cancel.clone()).await;
        drop(decoded_tx);
        let _ = forward.await;
        let count = count?;

        let result = batch.set_target(count).wait_for_result().await;
        Ok(Some(result))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::framing::LineFraming;

    #[tokio::test]
    async fn send_without_e2e_returns_none() {
        let (tx, rx) = flume::unbounded();
        let sender = Sender::new(tx, 1, BatchThresholds::default(), CancellationToken::new());
        let result = sender.send(vec![Event::new()]).await.unwrap();
        assert!(result.is_none());
        assert!(rx.recv_async().await.is_ok());
    }

    #[tokio::test]
    async fn send_with_e2e_waits_for_batch() {
        let (tx, rx) = flume::unbounded();
        let sender = Sender::new(tx, 1, BatchThresholds::default(), CancellationToken::new());
        sender.set_e2e(true);

        let handle = tokio::spawn(async move { sender.send(vec![Event::new()]).await });

        let event = rx.recv_async().await.unwrap();
        event.batch().unwrap().output_burndown();

        let result = handle.await.unwrap().unwrap().unwrap();
        assert!(result.ok);
        assert_eq!(result.success_count, 1);
    }

    #[tokio::test]
    async fn send_raw_decodes_and_enqueues() {
        let (tx, rx) = flume::unbounded();
        let sender = Sender::new(tx, 1, BatchThresholds::default(), CancellationToken::new());
        let framing: Vec<Arc<dyn Framing>> = vec![Arc::new(LineFraming)];
        let data = b"{\"a\":1}\n".to_vec();
        sender
            .send_raw(&Event::new(), &framing, &JsonCodec, &data[..])
            .await
            .unwrap();
        assert!(rx.recv_async().await.is_ok());
    }

    #[tokio::test]
    async fn send_raw_with_e2e_discovers_target_after_extraction() {
        let (tx, rx) = flume::unbounded();
        let sender = Sender::new(tx, 1, BatchThresholds::default(), CancellationToken::new());
        sender.set_e2e(true);
        let framing: Vec<Arc<dyn Framing>> = vec![Arc::new(LineFraming)];
        let data = b"{\"a\":1}\n{\"a\":2}\n{\"a\":3}\n".to_vec();

        let handle = tokio::spawn(async move {
            sender
                .send_raw(&Event::new(), &framing, &JsonCodec, &data[..])
                .await
        });

        for _ in 0..3 {
            let event = rx.recv_async().await.unwrap();
            event.batch().unwrap().output_burndown();
        }

        let result = handle.await.unwrap().unwrap().unwrap();
        assert!(result.ok);
        assert_eq!(result.total_count, 3);
        assert_eq!(result.success_count, 3);
    }
}
