//! The plugin registry and the declarative YAML config loader built on it.
//!
//! Grounded on the teacher's `config::{registration, validate}` pair: a
//! process-wide registry maps a plugin name to a creator function plus its
//! declared [`ConfigSpec`]; `register_plugin` populates it and
//! `parse_configuration_item` resolves one YAML item against it. Adapted
//! from the teacher's single-input/single-output/Processor item types to
//! the five this crate's pipeline actually wires: input, filter, codec,
//! framing, output (section 2, component 10).

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use handlebars::Handlebars;
use jsonschema::{Draft, JSONSchema};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::{debug, error, trace};

mod registration;
mod validate;
pub use registration::register_plugin;
pub(crate) use validate::parse_configuration_item;

use crate::codec::Codec;
use crate::filter::Filter;
use crate::framing::Framing;
use crate::input::Input;
use crate::output::Output;
use crate::Error;

/// The pinned async function a plugin registers to build its runtime
/// instance from a YAML config payload.
pub type Callback = fn(Value) -> Pin<Box<dyn Future<Output = Result<ExecutionType, Error>> + Send>>;

/// Which registry bucket a plugin name lives in.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum ItemType {
    Input,
    Filter,
    Codec,
    Framing,
    Output,
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            ItemType::Input => "input",
            ItemType::Filter => "filter",
            ItemType::Codec => "codec",
            ItemType::Framing => "framing",
            ItemType::Output => "output",
        };
        write!(f, "{msg}")
    }
}

/// A constructed plugin instance, ready to be wired into a [`crate::pipeline::Pipeline`].
pub enum ExecutionType {
    Input(Box<dyn Input>),
    Filter(Arc<dyn Filter>),
    Codec(Arc<dyn Codec>),
    Framing(Arc<dyn Framing>),
    Output(Box<dyn Output>),
}

static ENV: Lazy<Mutex<HashMap<ItemType, HashMap<String, RegisteredItem>>>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(ItemType::Input, HashMap::new());
    m.insert(ItemType::Filter, HashMap::new());
    m.insert(ItemType::Codec, HashMap::new());
    m.insert(ItemType::Framing, HashMap::new());
    m.insert(ItemType::Output, HashMap::new());
    Mutex::new(m)
});

#[derive(Clone)]
pub(crate) struct RegisteredItem {
    pub creator: Callback,
    pub format: ConfigSpec,
}

#[derive(Clone)]
pub(crate) struct ParsedRegisteredItem {
    pub creator: Callback,
    pub config: Value,
}

/// One named YAML item (`{name: {..config..}}`), as it appears in a
/// pipeline document's `inputs`/`filters`/`outputs` lists.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub(crate) struct Item {
    pub label: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// The raw, unvalidated shape of a pipeline YAML document. Renders through
/// Handlebars against the process environment before parsing, the way the
/// teacher's `Config::from_str` does, so `{{FOO}}` placeholders resolve to
/// `$FOO` at load time.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub label: Option<String>,
    pub num_threads: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub inputs: Vec<Item>,
    #[serde(default)]
    pub filters: Vec<Item>,
    pub outputs: Vec<Item>,
}

impl std::str::FromStr for Config {
    type Err = Error;
    fn from_str(conf: &str) -> Result<Self, Self::Err> {
        let environment_variables: HashMap<String, String> = env::vars().collect();

        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);

        let populated = handlebars
            .render_template(conf, &environment_variables)
            .map_err(|e| Error::ConfigFailedValidation(e.to_string()))?;

        Ok(serde_yaml::from_str(&populated)?)
    }
}

impl Config {
    /// Resolves every named item against the plugin registry, validating
    /// each payload against its declared [`ConfigSpec`].
    pub async fn validate(self) -> Result<ParsedConfig, Error> {
        if self.inputs.is_empty() {
            return Err(Error::Validation("at least one input is required".into()));
        }
        if self.outputs.is_empty() {
            return Err(Error::Validation("at least one output is required".into()));
        }

        let mut inputs = Vec::new();
        for item in &self.inputs {
            inputs.push(parse_configuration_item(ItemType::Input, &item.extra).await?);
        }

        let mut filters = Vec::new();
        for item in &self.filters {
            filters.push(parse_configuration_item(ItemType::Filter, &item.extra).await?);
        }

        let mut outputs = Vec::new();
        for item in &self.outputs {
            outputs.push(parse_configuration_item(ItemType::Output, &item.extra).await?);
        }

        let num_threads = self.num_threads.unwrap_or_else(num_cpus::get);
        trace!(num_threads, "configuration is valid");

        Ok(ParsedConfig {
            label: self.label,
            num_threads,
            timeout_secs: self.timeout_secs,
            inputs,
            filters,
            outputs,
        })
    }
}

/// A [`Config`] whose items have all been resolved against the registry.
#[derive(Clone)]
pub struct ParsedConfig {
    pub label: Option<String>,
    pub num_threads: usize,
    pub timeout_secs: Option<u64>,
    pub(crate) inputs: Vec<ParsedRegisteredItem>,
    pub(crate) filters: Vec<ParsedRegisteredItem>,
    pub(crate) outputs: Vec<ParsedRegisteredItem>,
}

impl ParsedConfig {
    /// Instantiates every resolved item, producing a pipeline ready to run.
    pub async fn build(&self) -> Result<crate::pipeline::PipelineOptions, Error> {
        let mut inputs = Vec::new();
        for item in &self.inputs {
            match (item.creator)(item.config.clone()).await? {
                ExecutionType::Input(input) => {
                    inputs.push(crate::pipeline::PipelineInput::new(input))
                }
                _ => return Err(Error::Validation("expected an input plugin".into())),
            }
        }

        let mut global_filters = Vec::new();
        for item in &self.filters {
            match (item.creator)(item.config.clone()).await? {
                ExecutionType::Filter(filter) => global_filters.push(filter),
                _ => return Err(Error::Validation("expected a filter plugin".into())),
            }
        }

        let mut outputs = Vec::new();
        for item in &self.outputs {
            match (item.creator)(item.config.clone()).await? {
                ExecutionType::Output(output) => outputs.push(output),
                _ => return Err(Error::Validation("expected an output plugin".into())),
            }
        }

        Ok(crate::pipeline::PipelineOptions {
            inputs,
            global_filters,
            outputs,
            timeout: self.timeout_secs.map(std::time::Duration::from_secs),
            ..Default::default()
        })
    }
}

/// A compiled JSON Schema (Draft 7) snippet a plugin validates its config
/// payload against before being instantiated.
pub struct ConfigSpec {
    raw_schema: String,
    schema: Arc<JSONSchema>,
}

impl std::fmt::Debug for ConfigSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigSpec")
            .field("raw_schema", &self.raw_schema)
            .finish()
    }
}

impl Clone for ConfigSpec {
    fn clone(&self) -> Self {
        ConfigSpec {
            raw_schema: self.raw_schema.clone(),
            schema: Arc::clone(&self.schema),
        }
    }
}

impl ConfigSpec {
    /// Compiles a YAML-encoded JSON Schema document.
    pub fn from_schema(conf: &str) -> Result<Self, Error> {
        let v: Value = serde_yaml::from_str(conf)?;
        let intermediate = serde_json::to_string(&v)?;
        let f: serde_json::Value = serde_json::from_str(&intermediate)?;

        let schema = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&f)
            .map_err(|e| Error::InvalidValidationSchema(e.to_string()))?;

        Ok(ConfigSpec {
            raw_schema: conf.into(),
            schema: Arc::new(schema),
        })
    }

    /// Validates a YAML-encoded config payload against this schema.
    pub fn validate(&self, content: &str) -> Result<(), Error> {
        let v: Value = serde_yaml::from_str(content)?;
        let intermediate = serde_json::to_string(&v)?;
        let f: serde_json::Value = serde_json::from_str(&intermediate)?;
        if let Err(errors) = self.schema.validate(&f) {
            let errs: Vec<String> = errors.map(|e| e.to_string()).collect();
            error!(errors = errs.join(" "), "validation failed");
            return Err(Error::ConfigFailedValidation(errs.join(" ")));
        }
        debug!("config payload validated");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn validate_configuration_item() {
        let schema = "properties:
  scanner:
    type: object
    properties:
      lines:
        type: boolean";
        let input = "scanner:
  lines: true";

        let conf = ConfigSpec::from_schema(schema).unwrap();
        conf.validate(input).unwrap();
    }

    #[test]
    fn expect_schema_failure() {
        let schema = "properties:
  scanner:
    type: object
    properties:
      lines:
        type: number";
        let input = "scanner:
  lines: true";

        let conf = ConfigSpec::from_schema(schema).unwrap();
        assert!(conf.validate(input).is_err());
    }

    #[test]
    fn parses_multi_input_multi_output_document() {
        let doc = "inputs:
  - stdin: {}
outputs:
  - drop: {}
  - stdout: {}";
        let config: Config = serde_yaml::from_str(doc).unwrap();
        assert_eq!(config.inputs.len(), 1);
        assert_eq!(config.outputs.len(), 2);
    }
}
