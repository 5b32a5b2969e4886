use super::{Callback, ConfigSpec, ItemType, RegisteredItem, ENV};
use crate::Error;
use tracing::{debug, error};

/// Registers `name` as a plugin of kind `itype`, callable through
/// `creator` once its config payload passes `format`. Returns
/// [`Error::DuplicateRegisteredName`] if `name` is already registered
/// under `itype`.
pub fn register_plugin(
    name: String,
    itype: ItemType,
    format: ConfigSpec,
    creator: Callback,
) -> Result<(), Error> {
    let registered = RegisteredItem { creator, format };

    let mut lock = ENV.lock().map_err(|_| {
        error!("unable to secure registry lock");
        Error::UnableToSecureLock
    })?;

    let bucket = lock.get_mut(&itype).ok_or(Error::UnableToSecureLock)?;
    if bucket.insert(name.clone(), registered).is_some() {
        error!(name, "plugin is already registered");
        return Err(Error::DuplicateRegisteredName(name));
    }
    debug!(name, plugin_type = %itype, "plugin registered");
    Ok(())
}
