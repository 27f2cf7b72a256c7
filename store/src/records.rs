//! One serialized value per record.
//!
//! `RecordMap<T>` keeps each record under `<namespace>/<id>` as a single JSON
//! value. A mutation is one `set`, so peers never observe half a record, and
//! `remove` deletes the key outright instead of leaving a tombstone and
//! orphaned fields behind.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::StoreError;
use crate::map::{SharedMap, SharedMapExt};
use crate::observer::Subscription;
use crate::schema::TypedSchema;

/// Typed records of one kind stored in a shared map.
pub struct RecordMap<M: SharedMap + ?Sized, T> {
    map: Arc<M>,
    prefix: String,
    schema: TypedSchema<T>,
}

impl<M, T> RecordMap<M, T>
where
    M: SharedMap + ?Sized,
    T: Serialize + DeserializeOwned,
{
    pub fn new(map: Arc<M>, namespace: &str) -> Self {
        Self { map, prefix: format!("{namespace}/"), schema: TypedSchema::new() }
    }

    #[must_use]
    pub fn key(&self, id: &str) -> String {
        format!("{}{id}", self.prefix)
    }

    /// Write the whole record.
    ///
    /// # Errors
    ///
    /// `StoreError::Encode` if `record` cannot be serialized.
    pub fn insert(&self, id: &str, record: &T) -> Result<(), StoreError> {
        self.map.set_as(&self.key(id), record)
    }

    /// # Errors
    ///
    /// `StoreError::Schema` if the stored value is not a valid `T`.
    pub fn get(&self, id: &str) -> Result<Option<T>, StoreError> {
        let key = self.key(id);
        let Some(value) = self.map.get(&key) else {
            return Ok(None);
        };
        self.schema
            .parse(&value)
            .map(Some)
            .map_err(|source| StoreError::Schema { key, source })
    }

    /// Read, modify and write back in one `set`. Returns `false` if the
    /// record does not exist.
    ///
    /// # Errors
    ///
    /// Propagates decode and encode failures.
    pub fn update(&self, id: &str, f: impl FnOnce(&mut T)) -> Result<bool, StoreError> {
        let Some(mut record) = self.get(id)? else {
            return Ok(false);
        };
        f(&mut record);
        self.insert(id, &record)?;
        Ok(true)
    }

    /// Delete the record. Returns whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        self.map.delete(&self.key(id))
    }

    /// Ids in insertion order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.map
            .keys()
            .into_iter()
            .filter_map(|key| key.strip_prefix(&self.prefix).map(str::to_owned))
            .collect()
    }

    /// Every valid record in insertion order. Malformed ones are skipped.
    #[must_use]
    pub fn list(&self) -> Vec<(String, T)> {
        self.map
            .entries()
            .into_iter()
            .filter_map(|(key, value)| {
                let id = key.strip_prefix(&self.prefix)?;
                match self.schema.parse(&value) {
                    Ok(record) => Some((id.to_owned(), record)),
                    Err(e) => {
                        warn!(key = %key, error = %e, "records: skipping malformed record");
                        None
                    }
                }
            })
            .collect()
    }

    /// Called with the record id after every change in this namespace.
    pub fn subscribe(&self, listener: impl Fn(&str) + Send + Sync + 'static) -> Subscription {
        let prefix = self.prefix.clone();
        self.map.on_change(move |event| {
            if let Some(id) = event.key.strip_prefix(&prefix) {
                listener(id);
            }
        })
    }
}

#[cfg(test)]
#[path = "records_test.rs"]
mod tests;
