//! End-to-end acknowledgement for a group of events: the four signalling
//! channels, the accounting state machine, and the result handed back to
//! the sender once every event has been delivered, dropped, or timed out.
//!
//! Grounded on the teacher's `runtime::process_state`/`message_handler`
//! pair: one task owns all batch state and is driven exclusively by a
//! `tokio::select!` over its inbound signals plus a slow-warning and a
//! hard-deadline timer. The teacher folds every signal into one
//! `MessageStatus` channel; here they are the four channels the
//! specification names, since that is what keeps each producing stage
//! (filter worker, output deliverer) entirely stateless.

use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::warn;

/// One of the four signals a batch tracker consumes, tagged with the
/// producing event's slot so multiple concurrent stages can signal
/// concurrently without coordinating with each other.
#[derive(Debug)]
enum Signal {
    /// An event passed a global filter stage.
    FilterBurndown,
    /// An event was successfully delivered to one output.
    OutputBurndown,
    /// A filter dropped this event; counts as delivered to every output.
    Drop,
    /// A non-fatal error occurred somewhere along this event's path.
    Error(String),
}

/// The sending half of a batch's four signal channels, cloned onto every
/// event that batch is attached to. Holds no reference back to any event,
/// so there is no ownership cycle between `Event` and `Batch`.
#[derive(Debug)]
pub struct BatchHandle {
    tx: flume::Sender<Signal>,
}

impl BatchHandle {
    /// Signals that this event passed a global filter stage.
    pub fn filter_burndown(&self) {
        let _ = self.tx.send(Signal::FilterBurndown);
    }

    /// Signals that this event was delivered to one output.
    pub fn output_burndown(&self) {
        let _ = self.tx.send(Signal::OutputBurndown);
    }

    /// Signals that a filter dropped this event.
    pub fn drop_signal(&self) {
        let _ = self.tx.send(Signal::Drop);
    }

    /// Signals a non-fatal error on this event's path.
    pub fn error_signal(&self, message: impl Into<String>) {
        let _ = self.tx.send(Signal::Error(message.into()));
    }
}

/// The outcome of a single batch, produced exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    /// Total number of events the batch eventually contained.
    pub total_count: u64,
    /// Events fully delivered to every output.
    pub success_count: u64,
    /// Events dropped by a filter.
    pub drop_count: u64,
    /// Events that reported at least one error.
    pub error_count: u64,
    /// Whether the batch completed normally (`false` on timeout or cancellation).
    pub ok: bool,
    /// Accumulated non-fatal error messages.
    pub errors: Vec<String>,
    /// When the batch was created.
    pub start: Instant,
    /// When the batch reached a terminal state.
    pub finish: Instant,
}

/// Timing thresholds that govern a batch's lifecycle.
#[derive(Debug, Clone, Copy)]
pub struct BatchThresholds {
    /// Log a warning once a batch has been open this long, without failing it.
    pub slow_warning: Duration,
    /// Fail the batch once it has been open this long.
    pub timeout: Duration,
}

impl Default for BatchThresholds {
    fn default() -> Self {
        BatchThresholds {
            slow_warning: Duration::from_secs(3),
            timeout: Duration::from_secs(60),
        }
    }
}

/// A batch of events tracked end-to-end. Created by the [`crate::sender::Sender`]
/// when end-to-end acknowledgement is enabled; destroyed once
/// [`Batch::wait_for_result`] returns.
pub struct Batch {
    handle: std::sync::Arc<BatchHandle>,
    rx: flume::Receiver<Signal>,
    fanout: u32,
    thresholds: BatchThresholds,
}

impl Batch {
    /// Starts a new batch tracked against `fanout` outputs.
    pub fn new(fanout: u32, thresholds: BatchThresholds) -> Self {
        let (tx, rx) = flume::unbounded();
        Batch {
            handle: std::sync::Arc::new(BatchHandle { tx }),
            rx,
            fanout,
            thresholds,
        }
    }

    /// The handle to clone onto every event this batch tracks.
    pub fn handle(&self) -> std::sync::Arc<BatchHandle> {
        self.handle.clone()
    }

    /// Called once extraction has finished producing events for this batch,
    /// fixing the number of events the tracker should expect to fully
    /// account for. Before this is called the tracker is in its
    /// `collecting` state (target unknown); afterward it is `finalizing`.
    pub fn set_target(self, count: u64) -> FinalizingBatch {
        FinalizingBatch {
            rx: self.rx,
            fanout: self.fanout,
            thresholds: self.thresholds,
            target: count,
        }
    }
}

/// A batch whose expected event count is now known; waiting for every
/// event to be accounted for, or for the deadline to fire.
pub struct FinalizingBatch {
    rx: flume::Receiver<Signal>,
    fanout: u32,
    thresholds: BatchThresholds,
    target: u64,
}

impl FinalizingBatch {
    /// Drives the state machine to completion: reads signals until every
    /// targeted event has been fully delivered or dropped, or the hard
    /// deadline fires. Emits one slow-warning log if the soft threshold is
    /// crossed first.
    pub async fn wait_for_result(self) -> BatchResult {
        let start = Instant::now();
        let deadline = sleep(self.thresholds.timeout);
        tokio::pin!(deadline);
        let slow_warning = sleep(self.thresholds.slow_warning);
        tokio::pin!(slow_warning);

        let mut delivered: u64 = 0;
        let mut dropped: u64 = 0;
        let mut errored: u64 = 0;
        let mut errors = Vec::new();
        let mut warned = false;
        let mut output_marked: u64 = 0;

        loop {
            if delivered + dropped >= self.target {
                break;
            }

            tokio::select! {
                biased;
                () = &mut deadline => {
                    return BatchResult {
                        total_count: self.target,
                        success_count: delivered,
                        drop_count: dropped,
                        error_count: errored,
                        ok: false,
                        errors,
                        start,
                        finish: Instant::now(),
                    };
                }
                () = &mut slow_warning, if !warned => {
                    warned = true;
                    warn!(elapsed = ?start.elapsed(), "batch exceeded slow-warning threshold");
                }
                signal = self.rx.recv_async() => {
                    match signal {
                        Ok(Signal::FilterBurndown) => {}
                        Ok(Signal::OutputBurndown) => {
                            // Every event contributes either exactly `fanout`
                            // output-burndown signals (full delivery) or is
                            // replaced by a single drop signal; a partial
                            // failure contributes fewer than `fanout` and
                            // simply never completes, leaving the batch to
                            // the deadline timer. So the running total over
                            // all events, divided by fanout, is the count of
                            // fully-delivered events without needing a
                            // per-event identity.
                            output_marked += 1;
                            if output_marked % u64::from(self.fanout.max(1)) == 0 {
                                delivered += 1;
                            }
                        }
                        Ok(Signal::Drop) => {
                            dropped += 1;
                        }
                        Ok(Signal::Error(msg)) => {
                            errored += 1;
                            errors.push(msg);
                        }
                        Err(_) => break,
                    }
                }
            }
        }

        BatchResult {
            total_count: self.target,
            success_count: delivered,
            drop_count: dropped,
            error_count: errored,
            ok: true,
            errors,
            start,
            finish: Instant::now(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn single_output_delivery_completes() {
        let batch = Batch::new(1, BatchThresholds::default());
        let handle = batch.handle();
        let finalizing = batch.set_target(1);
        handle.filter_burndown();
        handle.output_burndown();
        let result = finalizing.wait_for_result().await;
        assert!(result.ok);
        assert_eq!(result.success_count, 1);
        assert_eq!(result.drop_count, 0);
    }

    #[tokio::test]
    async fn fan_out_requires_every_output() {
        let batch = Batch::new(2, BatchThresholds::default());
        let handle = batch.handle();
        let finalizing = batch.set_target(1);
        handle.output_burndown();
        handle.output_burndown();
        let result = finalizing.wait_for_result().await;
        assert!(result.ok);
        assert_eq!(result.success_count, 1);
    }

    #[tokio::test]
    async fn drop_counts_as_delivered() {
        let batch = Batch::new(2, BatchThresholds::default());
        let handle = batch.handle();
        let finalizing = batch.set_target(2);
        handle.output_burndown();
        handle.output_burndown();
        handle.drop_signal();
        let result = finalizing.wait_for_result().await;
        assert!(result.ok);
        assert_eq!(result.success_count, 1);
        assert_eq!(result.drop_count, 1);
    }

    #[tokio::test]
    async fn timeout_reports_not_ok() {
        let batch = Batch::new(
            1,
            BatchThresholds {
                slow_warning: Duration::from_millis(1),
                timeout: Duration::from_millis(20),
            },
        );
        let finalizing = batch.set_target(1);
        let result = finalizing.wait_for_result().await;
        assert!(!result.ok);
        assert_eq!(result.success_count, 0);
    }

    #[tokio::test]
    async fn error_signal_is_recorded_but_non_fatal() {
        let batch = Batch::new(1, BatchThresholds::default());
        let handle = batch.handle();
        let finalizing = batch.set_target(1);
        handle.error_signal("processor blew up");
        handle.output_burndown();
        let result = finalizing.wait_for_result().await;
        assert!(result.ok);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.errors, vec!["processor blew up".to_string()]);
    }
}
