//! Pure derivations over a key/value snapshot.
//!
//! DESIGN
//! ======
//! Every function here takes the full entry list and re-scans it. There is
//! no index: projections are re-run in full on each change notification and
//! must stay idempotent and side-effect free. Output order follows the input
//! order, which is insertion order of first write. Two clients that created
//! keys concurrently can therefore list them in different orders.
//!
//! `RecordLayout` describes the prefix-encoded record scheme: one key per
//! field (`<prefix><id>`) plus an existence flag whose sentinel value marks
//! deletion. Nothing ties the keys together at write time, so partial and
//! orphaned records are normal states that readers must filter.

use std::collections::HashMap;

use serde_json::Value;

/// Entries whose key starts with `prefix`, in input order.
#[must_use]
pub fn with_prefix<'a>(entries: &'a [(String, Value)], prefix: &str) -> Vec<(&'a str, &'a Value)> {
    entries
        .iter()
        .filter(|(key, _)| key.starts_with(prefix))
        .map(|(key, value)| (key.as_str(), value))
        .collect()
}

/// The suffixes after `prefix` for every matching key, in input order.
#[must_use]
pub fn ids_with_prefix<'a>(entries: &'a [(String, Value)], prefix: &str) -> Vec<&'a str> {
    entries
        .iter()
        .filter_map(|(key, _)| key.strip_prefix(prefix))
        .collect()
}

/// Count matching keys whose value is defined (non-null) and passes `predicate`.
pub fn count_defined(entries: &[(String, Value)], prefix: &str, predicate: impl Fn(&str, &Value) -> bool) -> usize {
    entries
        .iter()
        .filter(|(key, value)| key.starts_with(prefix) && !value.is_null() && predicate(key.as_str(), value))
        .count()
}

/// Lifecycle position of a prefix-encoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// No key for this id exists.
    Absent,
    /// Some keys exist but the record is not complete and live.
    Partial,
    /// Flag set (not to the sentinel) and every required field present.
    Live,
    /// Flag holds the delete sentinel, whatever the fields say.
    Deleted,
}

/// Key layout of a prefix-encoded record type.
#[derive(Debug, Clone)]
pub struct RecordLayout {
    flag_prefix: String,
    required_prefixes: Vec<String>,
    delete_sentinel: Value,
}

impl RecordLayout {
    pub fn new(flag_prefix: impl Into<String>, required_prefixes: &[&str], delete_sentinel: Value) -> Self {
        Self {
            flag_prefix: flag_prefix.into(),
            required_prefixes: required_prefixes.iter().map(|p| (*p).to_owned()).collect(),
            delete_sentinel,
        }
    }

    #[must_use]
    pub fn flag_key(&self, id: &str) -> String {
        format!("{}{id}", self.flag_prefix)
    }

    #[must_use]
    pub fn delete_sentinel(&self) -> &Value {
        &self.delete_sentinel
    }

    /// Classify one record id.
    #[must_use]
    pub fn state_of(&self, entries: &[(String, Value)], id: &str) -> RecordState {
        let lookup = Lookup::new(entries);
        self.classify(&lookup, id)
    }

    /// Ids of live records, ordered by their flag key's position.
    #[must_use]
    pub fn active_ids<'a>(&self, entries: &'a [(String, Value)]) -> Vec<&'a str> {
        let lookup = Lookup::new(entries);
        ids_with_prefix(entries, &self.flag_prefix)
            .into_iter()
            .filter(|id| self.classify(&lookup, id) == RecordState::Live)
            .collect()
    }

    fn classify(&self, lookup: &Lookup<'_>, id: &str) -> RecordState {
        let flag = lookup.get(&self.flag_key(id));
        if flag == Some(&self.delete_sentinel) {
            return RecordState::Deleted;
        }

        let present: Vec<bool> = self
            .required_prefixes
            .iter()
            .map(|prefix| lookup.get(&format!("{prefix}{id}")).is_some_and(|v| !v.is_null()))
            .collect();
        let defined_flag = flag.is_some_and(|v| !v.is_null());

        if defined_flag && present.iter().all(|p| *p) {
            RecordState::Live
        } else if flag.is_some() || present.iter().any(|p| *p) {
            RecordState::Partial
        } else {
            RecordState::Absent
        }
    }
}

/// Per-call key lookup over an entry slice.
struct Lookup<'a> {
    by_key: HashMap<&'a str, &'a Value>,
}

impl<'a> Lookup<'a> {
    fn new(entries: &'a [(String, Value)]) -> Self {
        Self { by_key: entries.iter().map(|(k, v)| (k.as_str(), v)).collect() }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.by_key.get(key).copied()
    }
}

#[cfg(test)]
#[path = "projection_test.rs"]
mod tests;
