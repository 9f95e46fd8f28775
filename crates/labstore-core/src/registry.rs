//! Process-wide global metadata.
//!
//! Every storage instance holds an `Arc<GlobalMetadata>` and merges a
//! snapshot of it into each header it writes (unless disabled). The mapping
//! is guarded by a single mutex; every operation takes the lock exactly once
//! and never performs I/O while holding it.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{LabstoreError, Result};
use crate::models::{Metadata, MetadataValue};

static SHARED: Lazy<Arc<GlobalMetadata>> = Lazy::new(|| Arc::new(GlobalMetadata::new()));

#[derive(Debug, Default)]
pub struct GlobalMetadata {
    entries: Mutex<Metadata>,
}

impl GlobalMetadata {
    /// A fresh, empty registry. Mostly useful for isolated tests; storage
    /// instances normally use [`GlobalMetadata::shared`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by the whole process.
    pub fn shared() -> Arc<GlobalMetadata> {
        Arc::clone(&SHARED)
    }

    /// Snapshot of the current entries.
    pub fn get(&self) -> Metadata {
        self.entries.lock().clone()
    }

    /// Merge `entries` into the registry. Without `overwrite`, any key that
    /// is already present rejects the whole batch.
    pub fn add(&self, entries: Metadata, overwrite: bool) -> Result<()> {
        entries.validate()?;
        let count = entries.len();
        {
            let mut current = self.entries.lock();
            if !overwrite {
                let duplicates: Vec<String> = entries
                    .keys()
                    .filter(|key| current.contains_key(key))
                    .map(str::to_string)
                    .collect();
                if !duplicates.is_empty() {
                    return Err(LabstoreError::DuplicateKey(duplicates));
                }
            }
            current.extend(entries);
        }
        debug!(count, overwrite, "Added global metadata");
        Ok(())
    }

    pub fn add_one(
        &self,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
        overwrite: bool,
    ) -> Result<()> {
        self.add(Metadata::new().with(key, value), overwrite)
    }

    /// Remove keys; missing keys are ignored.
    pub fn remove<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut current = self.entries.lock();
        for key in keys {
            current.remove(key.as_ref());
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
