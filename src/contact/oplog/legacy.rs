//! One-time migration of the undated operation list.
//!
//! Older builds stored a bare `Vec<ContactOperation>` with no timestamps or
//! identifiers. On first load the list is stamped with the load time, given
//! fresh identifiers, written under the current key, and the old key dropped.

use anyhow::Result;

use crate::clock::Timestamp;
use crate::contact::domain::{ContactOperation, OperationEntry};
use crate::contact::oplog::OPERATIONS_KEY;
use crate::persistence::{KeyValueStore, KeyValueStoreExt};

pub(crate) const LEGACY_OPERATIONS_KEY: &str = "Contact.operations";

pub(crate) fn migrate(store: &dyn KeyValueStore, now: Timestamp) -> Result<Option<Vec<OperationEntry>>> {
    let Some(operations) = store.get_json::<Vec<ContactOperation>>(LEGACY_OPERATIONS_KEY)? else {
        return Ok(None);
    };

    let entries: Vec<OperationEntry> = operations
        .into_iter()
        .map(|op| OperationEntry::new(op, now))
        .collect();

    store.set_json(OPERATIONS_KEY, &entries)?;
    store.remove(LEGACY_OPERATIONS_KEY)?;
    log::info!("[OPLOG] migrated {} legacy operations", entries.len());

    Ok(Some(entries))
}
