//! Lightweight in-process runtime counters.
//!
//! Grounded on the teacher's `modules::metrics::Metrics` trait and
//! `MessageMetrics` struct, narrowed per `SPEC_FULL.md` section 2
//! (component 12): no external exporter backend (the teacher's
//! Prometheus integration is out of scope here), just atomics a pipeline
//! can snapshot and log periodically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::event::Event;
use crate::filter::{Filter, FilterOutcome};
use crate::input::{Closer, Input};
use crate::output::Output;
use crate::Error;

/// Atomic counters updated by the pipeline's stages as events move
/// through them. Cheap to clone (an `Arc` internally would also work, but
/// every field here is itself shareable, so the struct is handed out by
/// reference).
#[derive(Debug)]
pub struct Metrics {
    received: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
    started_at: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            received: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }
}

/// A point-in-time snapshot of [`Metrics`], suitable for logging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub errors: u64,
    pub throughput_per_sec: f64,
}

impl Metrics {
    /// Builds a fresh counter set, starting the throughput clock now.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads every counter and computes throughput since this `Metrics`
    /// was created.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let delivered = self.delivered.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            delivered,
            dropped: self.dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            throughput_per_sec: if elapsed > 0.0 {
                delivered as f64 / elapsed
            } else {
                0.0
            },
        }
    }
}

/// Wraps an [`Input`], recording one `received` count per event it
/// produces. Installed by [`crate::pipeline::Pipeline::run`] around every
/// configured input.
pub(crate) struct MetricsInput {
    inner: Box<dyn Input>,
    metrics: Arc<Metrics>,
}

impl MetricsInput {
    pub(crate) fn wrap(inner: Box<dyn Input>, metrics: Arc<Metrics>) -> Box<dyn Input> {
        Box::new(MetricsInput { inner, metrics })
    }
}

#[async_trait]
impl Closer for MetricsInput {
    async fn close(&mut self) -> Result<(), Error> {
        self.inner.close().await
    }
}

#[async_trait]
impl Input for MetricsInput {
    async fn read(&mut self) -> Result<Event, Error> {
        let event = self.inner.read().await?;
        self.metrics.record_received();
        Ok(event)
    }
}

/// Wraps an [`Output`], recording `delivered`/`errors` counts per write.
/// Installed by [`crate::pipeline::Pipeline::run`] around every configured
/// output.
pub(crate) struct MetricsOutput {
    inner: Box<dyn Output>,
    metrics: Arc<Metrics>,
}

impl MetricsOutput {
    pub(crate) fn wrap(inner: Box<dyn Output>, metrics: Arc<Metrics>) -> Box<dyn Output> {
        Box::new(MetricsOutput { inner, metrics })
    }
}

#[async_trait]
impl Closer for MetricsOutput {
    async fn close(&mut self) -> Result<(), Error> {
        self.inner.close().await
    }
}

#[async_trait]
impl Output for MetricsOutput {
    async fn write(&mut self, event: &Event) -> Result<(), Error> {
        match self.inner.write(event).await {
            Ok(()) => {
                self.metrics.record_delivered();
                Ok(())
            }
            Err(e) => {
                self.metrics.record_error();
                Err(e)
            }
        }
    }
}

/// Wraps a [`Filter`], recording `dropped`/`errors` counts per outcome.
/// Installed by [`crate::pipeline::Pipeline::run`] around every configured
/// filter, global or per-input.
pub(crate) struct MetricsFilter {
    inner: Arc<dyn Filter>,
    metrics: Arc<Metrics>,
}

impl MetricsFilter {
    pub(crate) fn wrap(inner: Arc<dyn Filter>, metrics: Arc<Metrics>) -> Arc<dyn Filter> {
        Arc::new(MetricsFilter { inner, metrics })
    }
}

#[async_trait]
impl Filter for MetricsFilter {
    async fn apply(&self, event: Event) -> FilterOutcome {
        let outcome = self.inner.apply(event).await;
        match &outcome {
            FilterOutcome::Drop(_) => self.metrics.record_dropped(),
            FilterOutcome::Fail(_, _) => self.metrics.record_error(),
            FilterOutcome::Pass(_) | FilterOutcome::Inject(_, _) => {}
        }
        outcome
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        metrics.record_received();
        metrics.record_received();
        metrics.record_delivered();
        metrics.record_dropped();
        metrics.record_error();

        let snap = metrics.snapshot();
        assert_eq!(snap.received, 2);
        assert_eq!(snap.delivered, 1);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.errors, 1);
    }

    #[tokio::test]
    async fn metrics_output_records_delivered_and_errors() {
        let metrics = Arc::new(Metrics::new());
        let mut wrapped = MetricsOutput::wrap(Box::new(crate::output::DropOutput), metrics.clone());
        wrapped.write(&Event::new()).await.unwrap();
        assert_eq!(metrics.snapshot().delivered, 1);
    }

    #[tokio::test]
    async fn metrics_filter_records_drops() {
        use crate::filter::FnFilter;

        let metrics = Arc::new(Metrics::new());
        let dropper: Arc<dyn Filter> = Arc::new(FnFilter::new(FilterOutcome::Drop));
        let wrapped = MetricsFilter::wrap(dropper, metrics.clone());

        match wrapped.apply(Event::new()).await {
            FilterOutcome::Drop(_) => {}
            _ => panic!("expected a drop outcome"),
        }
        assert_eq!(metrics.snapshot().dropped, 1);
    }
}
