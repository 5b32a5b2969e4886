//! Pipeline wiring: per-input filter chains merging into a global filter
//! chain, fanning out to per-output queues and deliverer workers.
//!
//! Grounded on the teacher's `Runtime::run`/`Runtime::pipeline`/
//! `Runtime::output` for the spawn order (outputs, then the filter chain,
//! then inputs) and on `original_source/pipeline.go`'s `NewPipeline`/
//! `Run`/`RunFilterChain` for the default-filter installation and the
//! N+1-channel chain shape section 4.1 describes. Batch-tracking state
//! lives in [`crate::batch`] rather than in a central `Runtime` struct, so
//! there is no analogue of the teacher's `message_handler` task here.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::batch::BatchThresholds;
use crate::event::Event;
use crate::filter::{spawn_chain, Filter, FilterOutcome};
use crate::input::Input;
use crate::metrics::{Metrics, MetricsFilter, MetricsInput, MetricsOutput};
use crate::output::Output;
use crate::sender::Sender;
use crate::Error;

/// One input plus the filter chain that runs on its events before they
/// join the global stream. Mirrors the per-input chain section 4.1 names
/// as a distinct stage from the post-merge global chain.
pub struct PipelineInput {
    pub input: Box<dyn Input>,
    pub filters: Vec<Arc<dyn Filter>>,
}

impl PipelineInput {
    /// Builds an input with no per-input filters.
    pub fn new(input: Box<dyn Input>) -> Self {
        PipelineInput {
            input,
            filters: Vec::new(),
        }
    }

    /// Adds a per-input filter, preserving call order as chain order.
    pub fn with_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }
}

/// The declarative shape a YAML pipeline document is deserialized into
/// before its named plugins are resolved through the config registry
/// (`crate::config`). Kept separate from [`PipelineOptions`], which holds
/// already-resolved trait objects: `SchemaModel` is what a config file
/// looks like, `PipelineOptions` is what the pipeline actually runs with.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SchemaModel {
    /// A human-readable label, surfaced in logs.
    #[serde(default)]
    pub label: Option<String>,
    /// Named input plugin configs, keyed by plugin name.
    pub inputs: Vec<serde_yaml::Value>,
    /// Named global filter plugin configs, in chain order.
    #[serde(default)]
    pub filters: Vec<serde_yaml::Value>,
    /// Named output plugin configs.
    pub outputs: Vec<serde_yaml::Value>,
    /// Number of worker threads per filter stage; defaults to the number
    /// of available CPUs, mirroring the teacher's `num_threads`.
    #[serde(default)]
    pub num_threads: Option<usize>,
    /// Optional hard wall-clock timeout for the whole run.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Everything [`Pipeline::run`] needs: resolved inputs, the global filter
/// chain, and resolved outputs.
pub struct PipelineOptions {
    pub inputs: Vec<PipelineInput>,
    pub global_filters: Vec<Arc<dyn Filter>>,
    pub outputs: Vec<Box<dyn Output>>,
    pub thresholds: BatchThresholds,
    pub timeout: Option<Duration>,
    /// Installs the teacher's `default @timestamp` filter as the first
    /// global filter, per `original_source/pipeline.go`'s `NewPipeline`.
    pub install_default_timestamp: bool,
    /// Counters shared across every stage of this run. Wrapped around
    /// every input, filter, and output by [`Pipeline::run`]; a caller
    /// that wants to observe throughput should clone this out before
    /// calling `run` and poll [`Metrics::snapshot`] on its own clock.
    pub metrics: Arc<Metrics>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            inputs: Vec::new(),
            global_filters: Vec::new(),
            outputs: Vec::new(),
            thresholds: BatchThresholds::default(),
            timeout: None,
            install_default_timestamp: true,
            metrics: Arc::new(Metrics::new()),
        }
    }
}

/// A filter that writes the current UTC time into `@timestamp` if the
/// event does not already have one. Installed by default, matching the
/// reference implementation this specification was distilled from.
fn default_timestamp_filter() -> Arc<dyn Filter> {
    Arc::new(crate::filter::FnFilter::new(|mut event: Event| {
        let now = chrono::Utc::now().to_rfc3339();
        event.field(&["@timestamp"]).default(&mut event, now.into());
        FilterOutcome::Pass(event)
    }))
}

/// A running (or about-to-run) pipeline: the wired-together stages plus
/// the cancellation token that tears them all down together.
pub struct Pipeline {
    options: PipelineOptions,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Builds a pipeline from already-resolved inputs/filters/outputs.
    pub fn new(options: PipelineOptions) -> Self {
        Pipeline {
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// A token that, when cancelled, stops every stage of this pipeline.
    /// Cloning it out before [`Pipeline::run`] lets a caller (e.g. a
    /// signal handler) cancel with a cause attached.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The counters this pipeline's stages report into. Clone this out
    /// before calling [`Pipeline::run`] to poll [`Metrics::snapshot`]
    /// while it runs.
    pub fn metrics(&self) -> Arc<Metrics> {
        self.options.metrics.clone()
    }

    /// Wires and runs every stage: outputs and their deliverer workers
    /// first, then the global filter chain, then each input and its
    /// per-input chain — mirroring the teacher's spawn order — and blocks
    /// until every stage has shut down (inputs exhausted, or the
    /// cancellation token fires).
    pub async fn run(self) -> Result<(), Error> {
        let Pipeline { mut options, cancel } = self;
        let mut joins: JoinSet<Result<(), Error>> = JoinSet::new();
        let metrics = options.metrics.clone();

        let fanout = options.outputs.len().max(1) as u32;

        let mut output_txs = Vec::new();
        if options.outputs.is_empty() {
            let (tx, rx) = flume::bounded::<Event>(2);
            output_txs.push(tx);
            let output = MetricsOutput::wrap(Box::new(crate::output::DropOutput), metrics.clone());
            joins.spawn(crate::output::run_output(rx, output, cancel.clone()));
        } else {
            for output in options.outputs.drain(..) {
                let (tx, rx) = flume::bounded::<Event>(2);
                output_txs.push(tx);
                let output = MetricsOutput::wrap(output, metrics.clone());
                joins.spawn(crate::output::run_output(rx, output, cancel.clone()));
            }
        }
        info!(outputs = output_txs.len(), "outputs connected");

        let mut global_filters = std::mem::take(&mut options.global_filters);
        if options.install_default_timestamp {
            global_filters.insert(0, default_timestamp_filter());
        }
        let global_filters: Vec<Arc<dyn Filter>> = global_filters
            .into_iter()
            .map(|f| MetricsFilter::wrap(f, metrics.clone()))
            .collect();

        let (merge_tx, merge_rx) = flume::bounded::<Event>(2);
        let post_global = spawn_chain(global_filters, merge_rx, cancel.clone(), &mut joins);

        joins.spawn(async move {
            while let Ok(event) = post_global.recv_async().await {
                for tx in &output_txs {
                    if tx.send_async(event.clone()).await.is_err() {
                        debug!("an output deliverer disconnected");
                    }
                }
            }
            Ok(())
        });

        for pinput in options.inputs.drain(..) {
            let (in_tx, in_rx) = flume::bounded::<Event>(2);
            let input_filters: Vec<Arc<dyn Filter>> = pinput
                .filters
                .into_iter()
                .map(|f| MetricsFilter::wrap(f, metrics.clone()))
                .collect();
            let chain_out = spawn_chain(input_filters, in_rx, cancel.clone(), &mut joins);
            let merge_tx = merge_tx.clone();
            joins.spawn(async move {
                while let Ok(event) = chain_out.recv_async().await {
                    if merge_tx.send_async(event).await.is_err() {
                        break;
                    }
                }
                Ok(())
            });

            let sender = Arc::new(Sender::new(in_tx, fanout, options.thresholds, cancel.clone()));
            let input = MetricsInput::wrap(pinput.input, metrics.clone());
            joins.spawn(crate::input::run_input(input, sender, cancel.clone()));
        }
        drop(merge_tx);

        if let Some(timeout) = options.timeout {
            let timeout_cancel = cancel.clone();
            joins.spawn(async move {
                tokio::time::sleep(timeout).await;
                timeout_cancel.cancel();
                Ok(())
            });
        }

        info!("pipeline started");
        while let Some(res) = joins.join_next().await {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    cancel.cancel();
                    return Err(e);
                }
                Err(e) => {
                    cancel.cancel();
                    return Err(Error::ExecutionError(e.to_string()));
                }
            }
        }
        info!("pipeline finished");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::event::Value;
    use crate::input::ChannelInput;

    #[tokio::test]
    async fn pass_through_single_input_single_output() {
        let (tx, rx) = flume::unbounded();
        let mut event = Event::new();
        event.set("message", "hello");
        tx.send_async(event).await.unwrap();
        drop(tx);

        let options = PipelineOptions {
            inputs: vec![PipelineInput::new(Box::new(ChannelInput::new(rx)))],
            install_default_timestamp: false,
            ..Default::default()
        };
        Pipeline::new(options).run().await.unwrap();
    }

    #[tokio::test]
    async fn default_timestamp_is_installed_when_absent() {
        let (tx, rx) = flume::unbounded();
        tx.send_async(Event::new()).await.unwrap();
        drop(tx);

        let (out_tx, out_rx) = flume::bounded(2);
        struct Capture(flume::Sender<Event>);
        #[async_trait::async_trait]
        impl crate::input::Closer for Capture {}
        #[async_trait::async_trait]
        impl crate::output::Output for Capture {
            async fn write(&mut self, event: &Event) -> Result<(), Error> {
                self.0.send_async(event.clone()).await.map_err(|e| Error::UnableToSendToChannel(e.to_string()))
            }
        }

        let options = PipelineOptions {
            inputs: vec![PipelineInput::new(Box::new(ChannelInput::new(rx)))],
            outputs: vec![Box::new(Capture(out_tx))],
            install_default_timestamp: true,
            ..Default::default()
        };
        Pipeline::new(options).run().await.unwrap();

        let seen = out_rx.recv_async().await.unwrap();
        assert!(matches!(seen.get("@timestamp"), Some(Value::String(_))));
    }

    #[tokio::test]
    async fn metrics_reflect_delivery_and_drops() {
        let (tx, rx) = flume::unbounded();
        let mut keep = Event::new();
        keep.set("status", "active");
        let mut drop_me = Event::new();
        drop_me.set("status", "inactive");
        tx.send_async(keep).await.unwrap();
        tx.send_async(drop_me).await.unwrap();
        drop(tx);

        let status_filter: Arc<dyn Filter> = Arc::new(crate::filter::FnFilter::new(|event: Event| {
            if event.get("status") == Some(&Value::String("active".into())) {
                FilterOutcome::Pass(event)
            } else {
                FilterOutcome::Drop(event)
            }
        }));

        let pipeline = Pipeline::new(PipelineOptions {
            inputs: vec![PipelineInput::new(Box::new(ChannelInput::new(rx)))],
            global_filters: vec![status_filter],
            install_default_timestamp: false,
            ..Default::default()
        });
        let metrics = pipeline.metrics();
        pipeline.run().await.unwrap();

        let snap = metrics.snapshot();
        assert_eq!(snap.received, 2);
        assert_eq!(snap.delivered, 1);
        assert_eq!(snap.dropped, 1);
    }
}
