//! A log and event processing pipeline: ingest structured or semi-structured
//! records from heterogeneous inputs, run them through a filter chain, and
//! fan them out to one or more outputs with end-to-end batch acknowledgement.
//!
//! The crate is organized the way a [`Pipeline`] is wired: [`event`] holds
//! the in-flight record, [`batch`] tracks a group of events end-to-end,
//! [`filter`] is the per-event transform stage, [`codec`]/[`framing`] turn
//! byte streams into events and back, [`input`]/[`output`] are the adapter
//! contracts at the boundary, and [`pipeline`] wires all of it together.

#![allow(clippy::needless_return)]

pub mod batch;
pub mod codec;
pub mod config;
pub mod event;
pub mod extractor;
pub mod filter;
pub mod framing;
pub mod input;
pub mod metrics;
pub mod modules;
pub mod output;
pub mod pipeline;
pub mod sender;

pub use batch::{Batch, BatchResult};
pub use codec::Codec;
pub use conduit_macros::conduit_registration_func;
pub use event::{Event, Field, Value};
pub use filter::{Filter, FilterOutcome};
pub use framing::Framing;
pub use input::{Closer, Input};
pub use metrics::Metrics;
pub use output::Output;
pub use pipeline::{Pipeline, PipelineOptions, SchemaModel};
pub use sender::Sender;

use thiserror::Error as ThisError;

/// The crate-wide error type. Transient per-event failures and fatal wiring
/// failures share this enum; see `SPEC_FULL.md` section 7 for the
/// propagation policy each variant implies.
#[derive(ThisError, Debug)]
pub enum Error {
    /// A value failed to serialize to YAML.
    #[error("unable to serialize yaml object: {0}")]
    UnableToSerializeYamlObject(#[from] serde_yaml::Error),
    /// A value failed to serialize to JSON.
    #[error("unable to serialize json object: {0}")]
    UnableToSerializeJsonObject(#[from] serde_json::Error),
    /// A config payload failed schema validation.
    #[error("validation error: {0}")]
    Validation(String),
    /// A filter or processor raised a non-transient failure.
    #[error("execution error: {0}")]
    ExecutionError(String),
    /// An input has no more events to produce.
    #[error("end of input")]
    EndOfInput,
    /// Internal lock could not be acquired; indicates a poisoned mutex.
    #[error("unable to secure lock")]
    UnableToSecureLock,
    /// A plugin name was registered twice.
    #[error("plugin already registered under name: {0}")]
    DuplicateRegisteredName(String),
    /// A plugin's declared JSON schema itself did not compile.
    #[error("invalid validation schema: {0}")]
    InvalidValidationSchema(String),
    /// A plugin's config payload did not satisfy its declared schema.
    #[error("config failed validation: {0}")]
    ConfigFailedValidation(String),
    /// A named plugin or config key was not found in the registry.
    #[error("configuration item not found: {0}")]
    ConfigurationItemNotFound(String),
    /// Sending onto an internal channel failed because the receiver is gone.
    #[error("unable to send to channel: {0}")]
    UnableToSendToChannel(String),
    /// Receiving from an internal channel failed because the sender is gone.
    #[error("receive channel error: {0}")]
    RecvChannelError(String),
    /// A filter or codec failed to process an event or frame.
    #[error("processing error: {0}")]
    ProcessingError(String),
    /// A framing implementation was asked to run in a direction it does not support.
    #[error("framing does not support this direction: {0}")]
    FramingUnsupportedDirection(String),
    /// An input adapter failed.
    #[error("input error: {0}")]
    InputError(String),
    /// An output adapter failed to deliver a batch.
    #[error("output error: {0}")]
    OutputError(String),
    /// An input has no data available right now (not an error, a backoff signal).
    #[error("no input available")]
    NoInputToReturn,
    /// A batch did not complete before its deadline.
    #[error("batch timed out after {0:?}: {1} of {2} events delivered")]
    BatchTimeout(std::time::Duration, u64, u64),
    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl<T> From<flume::SendError<T>> for Error {
    fn from(e: flume::SendError<T>) -> Self {
        Error::UnableToSendToChannel(e.to_string())
    }
}

impl From<flume::RecvError> for Error {
    fn from(e: flume::RecvError) -> Self {
        Error::RecvChannelError(e.to_string())
    }
}
