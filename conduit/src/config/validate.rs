use std::collections::HashMap;

use serde_yaml::Value;
use tracing::trace;

use super::{ItemType, ParsedRegisteredItem, RegisteredItem, ENV};
use crate::Error;

/// Looks up the single top-level key of `map` (e.g. `{stdin: {...}}`) in
/// the registry bucket for `itype`, validates its payload against the
/// plugin's declared schema, and returns a [`ParsedRegisteredItem`] ready
/// to be instantiated.
pub async fn parse_configuration_item(
    itype: ItemType,
    map: &HashMap<String, Value>,
) -> Result<ParsedRegisteredItem, Error> {
    let first_key = map
        .keys()
        .next()
        .ok_or_else(|| Error::ConfigFailedValidation(format!("unable to determine {itype} key")))?;
    trace!(key = first_key, plugin_type = %itype, "validating item");

    let item = get_item(&itype, first_key)?;

    let content = map.get(first_key).ok_or_else(|| {
        Error::ConfigFailedValidation(format!("unable to validate {itype} key {first_key}"))
    })?;

    let content_str = serde_yaml::to_string(content)?;
    item.format.validate(&content_str)?;

    Ok(ParsedRegisteredItem {
        creator: item.creator,
        config: content.clone(),
    })
}

fn get_item(itype: &ItemType, key: &str) -> Result<RegisteredItem, Error> {
    let lock = ENV.lock().map_err(|_| Error::UnableToSecureLock)?;
    let bucket = lock.get(itype).ok_or(Error::UnableToSecureLock)?;
    bucket
        .get(key)
        .cloned()
        .ok_or_else(|| Error::ConfigurationItemNotFound(key.to_string()))
}
