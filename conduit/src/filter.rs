//! The per-event transform stage and the chain that pumps events through a
//! sequence of them.
//!
//! Grounded on the teacher's `modules::processors::run_processor`, which
//! receives an `InternalMessage` from the previous stage's channel, calls
//! the processor, and forwards the result (fanning out one state update per
//! extra message). Here the contract is narrower and closer to the
//! specification's own redesign note (section 9): a filter returns a single
//! [`FilterOutcome`] rather than writing into an `inject` channel and
//! separately calling a `drop` callback, which makes "inject and drop in
//! the same call" structurally impossible instead of merely disallowed.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::event::Event;
use crate::Error;

/// What a filter decided to do with one event.
pub enum FilterOutcome {
    /// Forward the event unchanged (or mutated in place) to the next stage.
    Pass(Event),
    /// Drop the event: it is not forwarded, and its batch (if any) is
    /// signalled via the drop channel instead of output-burndown.
    Drop(Event),
    /// Forward the event, plus additional synthetic events that enter the
    /// next stage but do not belong to the original event's batch.
    Inject(Event, Vec<Event>),
    /// The filter failed. The event is still forwarded (filter failures are
    /// recoverable) and the batch's error channel is signalled.
    Fail(Event, Error),
}

/// A per-event transformation stage. Implementations must not retain the
/// event reference after `apply` returns.
#[async_trait]
pub trait Filter: Send + Sync {
    /// Applies this filter to one event, returning what happened.
    async fn apply(&self, event: Event) -> FilterOutcome;
}

/// Adapts a plain closure into a [`Filter`], for the common case of a
/// stateless transform with no async work.
pub struct FnFilter<F>(F)
where
    F: Fn(Event) -> FilterOutcome + Send + Sync;

impl<F> FnFilter<F>
where
    F: Fn(Event) -> FilterOutcome + Send + Sync,
{
    /// Wraps `f` as a [`Filter`].
    pub fn new(f: F) -> Self {
        FnFilter(f)
    }
}

#[async_trait]
impl<F> Filter for FnFilter<F>
where
    F: Fn(Event) -> FilterOutcome + Send + Sync,
{
    async fn apply(&self, event: Event) -> FilterOutcome {
        (self.0)(event)
    }
}

fn signal_outcome(outcome: &FilterOutcome) {
    match outcome {
        FilterOutcome::Pass(e) => {
            if let Some(b) = e.batch() {
                b.filter_burndown();
            }
        }
        FilterOutcome::Drop(e) => {
            if let Some(b) = e.batch() {
                b.drop_signal();
            } else {
                debug!("dropped event with no batch attached");
            }
        }
        FilterOutcome::Inject(e, extras) => {
            if let Some(b) = e.batch() {
                b.filter_burndown();
            }
            if extras.iter().any(|e| e.batch().is_some()) {
                warn!("injected event unexpectedly carries a batch handle");
            }
        }
        FilterOutcome::Fail(e, err) => {
            if let Some(b) = e.batch() {
                b.error_signal(err.to_string());
            }
        }
    }
}

/// Runs `filters` in sequence as N+1 channels and N workers: stage *i* reads
/// from channel *i* and writes to channel *i+1*. Channel 0 is `input`;
/// the last stage's output channel is returned as the pre-fanout channel.
///
/// Each worker also observes `cancel` and closes its outgoing channel (by
/// being dropped) when cancellation fires or its inbound channel closes.
pub fn spawn_chain(
    filters: Vec<Arc<dyn Filter>>,
    input: flume::Receiver<Event>,
    cancel: CancellationToken,
    join_set: &mut tokio::task::JoinSet<Result<(), Error>>,
) -> flume::Receiver<Event> {
    let mut current_rx = input;

    for filter in filters {
        let (tx, rx) = flume::bounded::<Event>(2);
        let stage_cancel = cancel.clone();
        let stage_rx = current_rx;
        join_set.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = stage_cancel.cancelled() => {
                        debug!("filter stage cancelled");
                        break;
                    }
                    recv = stage_rx.recv_async() => {
                        match recv {
                            Ok(event) => {
                                let outcome = filter.apply(event).await;
                                signal_outcome(&outcome);
                                match outcome {
                                    FilterOutcome::Pass(e) | FilterOutcome::Fail(e, _) => {
                                        if tx.send_async(e).await.is_err() {
                                            break;
                                        }
                                    }
                                    FilterOutcome::Drop(_) => {}
                                    FilterOutcome::Inject(e, extras) => {
                                        if tx.send_async(e).await.is_err() {
                                            break;
                                        }
                                        for extra in extras {
                                            if tx.send_async(extra).await.is_err() {
                                                break;
                                            }
                                        }
                                    }
                                }
                            }
                            Err(_) => break,
                        }
                    }
                }
            }
            Ok(())
        });
        current_rx = rx;
    }

    current_rx
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::event::Value;

    fn pass_through() -> Arc<dyn Filter> {
        Arc::new(FnFilter::new(FilterOutcome::Pass))
    }

    fn dropper() -> Arc<dyn Filter> {
        Arc::new(FnFilter::new(|e: Event| {
            if e.get("discard") == Some(&Value::Bool(true)) {
                FilterOutcome::Drop(e)
            } else {
                FilterOutcome::Pass(e)
            }
        }))
    }

    #[tokio::test]
    async fn chain_forwards_events() {
        let (tx, rx) = flume::bounded(2);
        let cancel = CancellationToken::new();
        let mut joins = tokio::task::JoinSet::new();
        let out = spawn_chain(vec![pass_through()], rx, cancel, &mut joins);

        let mut e = Event::new();
        e.set("message", "hi");
        tx.send_async(e).await.unwrap();
        drop(tx);

        let got = out.recv_async().await.unwrap();
        assert_eq!(got.get("message"), Some(&Value::String("hi".into())));
    }

    #[tokio::test]
    async fn chain_drops_marked_events() {
        let (tx, rx) = flume::bounded(2);
        let cancel = CancellationToken::new();
        let mut joins = tokio::task::JoinSet::new();
        let out = spawn_chain(vec![dropper()], rx, cancel, &mut joins);

        let mut keep = Event::new();
        keep.set("discard", false);
        let mut drop_me = Event::new();
        drop_me.set("discard", true);

        tx.send_async(keep).await.unwrap();
        tx.send_async(drop_me).await.unwrap();
        drop(tx);

        let first = out.recv_async().await.unwrap();
        assert_eq!(first.get("discard"), Some(&Value::Bool(false)));
        assert!(out.recv_async().await.is_err());
    }
}
