//! Durable, ordered operation log.
//!
//! Every mutation is written through to the [`KeyValueStore`] before the
//! in-memory copy changes, so a failed write leaves both sides at the last
//! persisted state.

mod legacy;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;

use crate::clock::Timestamp;
use crate::contact::domain::{ContactOperation, OperationEntry};
use crate::persistence::{KeyValueStore, KeyValueStoreExt};

pub const OPERATIONS_KEY: &str = "Contact.operationEntries";

pub struct OperationLog {
    store: Arc<dyn KeyValueStore>,
    entries: Vec<OperationEntry>,
}

impl std::fmt::Debug for OperationLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationLog")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

impl OperationLog {
    /// Loads the log, migrating the undated legacy format if that is all the
    /// store holds.
    pub fn load(store: Arc<dyn KeyValueStore>, now: Timestamp) -> Result<Self> {
        let entries = match store.get_json::<Vec<OperationEntry>>(OPERATIONS_KEY)? {
            Some(entries) => entries,
            None => legacy::migrate(store.as_ref(), now)?.unwrap_or_default(),
        };
        log::debug!("[OPLOG] loaded {} entries", entries.len());
        Ok(Self { store, entries })
    }

    pub fn append(&mut self, operation: ContactOperation, now: Timestamp) -> Result<String> {
        let entry = OperationEntry::new(operation, now);
        let id = entry.id.clone();

        let mut next = self.entries.clone();
        next.push(entry);
        self.commit(next)?;

        log::trace!("[OPLOG] appended {}", id);
        Ok(id)
    }

    /// Removes every entry matching `predicate`, returning how many went.
    pub fn remove_all<F>(&mut self, predicate: F) -> Result<usize>
    where
        F: Fn(&OperationEntry) -> bool,
    {
        let next: Vec<OperationEntry> = self
            .entries
            .iter()
            .filter(|e| !predicate(e))
            .cloned()
            .collect();
        let removed = self.entries.len() - next.len();
        if removed > 0 {
            self.commit(next)?;
        }
        Ok(removed)
    }

    pub fn remove_ids(&mut self, ids: &[String]) -> Result<usize> {
        let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
        self.remove_all(|e| ids.contains(e.id.as_str()))
    }

    pub fn replace(&mut self, entries: Vec<OperationEntry>) -> Result<()> {
        self.commit(entries)
    }

    pub fn snapshot(&self) -> Vec<OperationEntry> {
        self.entries.clone()
    }

    pub fn entries(&self) -> &[OperationEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn commit(&mut self, next: Vec<OperationEntry>) -> Result<()> {
        self.store.set_json(OPERATIONS_KEY, &next)?;
        self.entries = next;
        Ok(())
    }
}
