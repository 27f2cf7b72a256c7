//! Brainstorm board over the prefix-encoded note layout.
//!
//! DESIGN
//! ======
//! A note is five kinds of keys in one flat map:
//!
//! ```text
//! position_<id>        {"x": f64, "y": f64}
//! author_<id>          {"id": str, "name"?: str}
//! text_<id>            str
//! vote_<id>_<userId>   true while that user votes for the note
//! noteId_<id>          1 = live, 0 = deleted
//! ```
//!
//! Creation is four independent writes (position, author, text, flag) and
//! deletion only flips the flag, leaving the field keys orphaned. Readers
//! see partial notes between writes and must filter them, which
//! `project_notes` does through `RecordLayout`. `records::RecordMap` is the
//! one-key-per-record alternative for new data.
//!
//! Note ids must not contain `_`: the vote scan for note `a` uses the prefix
//! `vote_a_`, which would also match votes of a note called `a_b`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapter::{StateAdapter, View};
use crate::error::StoreError;
use crate::map::SharedMap;
use crate::projection::{self, RecordLayout};
use crate::schema::{self, SchemaGuard};

pub const POSITION_PREFIX: &str = "position_";
pub const AUTHOR_PREFIX: &str = "author_";
pub const TEXT_PREFIX: &str = "text_";
pub const VOTE_PREFIX: &str = "vote_";
pub const FLAG_PREFIX: &str = "noteId_";

const FLAG_LIVE: i64 = 1;
const FLAG_DELETED: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Author {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), name: None }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A live note as seen by one user.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub id: String,
    pub position: Position,
    pub author: Author,
    pub text: String,
    pub votes: usize,
    pub voted_by_me: bool,
}

/// Layout of the note record: flag plus the three required fields.
#[must_use]
pub fn layout() -> RecordLayout {
    RecordLayout::new(FLAG_PREFIX, &[POSITION_PREFIX, AUTHOR_PREFIX, TEXT_PREFIX], json!(FLAG_DELETED))
}

/// Guards rejecting malformed note fields from peers.
#[must_use]
pub fn schema_guards() -> Vec<SchemaGuard> {
    vec![
        SchemaGuard::typed::<Position>(POSITION_PREFIX),
        SchemaGuard::typed::<Author>(AUTHOR_PREFIX),
        SchemaGuard::new(TEXT_PREFIX, schema::string_value),
    ]
}

#[must_use]
pub fn vote_key(note_id: &str, user_id: &str) -> String {
    format!("{VOTE_PREFIX}{note_id}_{user_id}")
}

type Lookup<'a> = HashMap<&'a str, &'a Value>;

fn field<T: DeserializeOwned>(lookup: &Lookup<'_>, prefix: &str, id: &str) -> Result<T, serde_json::Error> {
    let value = lookup.get(format!("{prefix}{id}").as_str()).copied().cloned().unwrap_or_default();
    serde_json::from_value(value)
}

fn decode_note(entries: &[(String, Value)], lookup: &Lookup<'_>, id: &str, me: &str) -> Result<Note, serde_json::Error> {
    Ok(Note {
        id: id.to_owned(),
        position: field(lookup, POSITION_PREFIX, id)?,
        author: field(lookup, AUTHOR_PREFIX, id)?,
        text: field(lookup, TEXT_PREFIX, id)?,
        votes: projection::count_defined(entries, &format!("{VOTE_PREFIX}{id}_"), |_, _| true),
        voted_by_me: lookup.get(vote_key(id, me).as_str()).is_some_and(|v| !v.is_null()),
    })
}

/// Live notes in flag order, as seen by `me`.
///
/// A note whose fields fail to decode is skipped.
#[must_use]
pub fn project_notes(entries: &[(String, Value)], me: &str) -> Vec<Note> {
    let lookup: Lookup<'_> = entries.iter().map(|(k, v)| (k.as_str(), v)).collect();
    layout()
        .active_ids(entries)
        .into_iter()
        .filter_map(|id| match decode_note(entries, &lookup, id, me) {
            Ok(note) => Some(note),
            Err(e) => {
                warn!(note_id = id, error = %e, "notes: skipping malformed note");
                None
            }
        })
        .collect()
}

fn check_id(id: &str) -> Result<(), StoreError> {
    if id.is_empty() {
        return Err(StoreError::InvalidId { id: id.to_owned(), reason: "empty" });
    }
    if id.contains('_') {
        return Err(StoreError::InvalidId { id: id.to_owned(), reason: "contains `_`" });
    }
    Ok(())
}

/// Mutation and projection entry point for one user's brainstorm board.
pub struct NoteBoard<M: SharedMap + ?Sized> {
    adapter: StateAdapter<M>,
    me: Author,
}

impl<M: SharedMap + ?Sized> NoteBoard<M> {
    pub fn new(map: Arc<M>, me: Author) -> Self {
        Self { adapter: StateAdapter::with_guards(map, schema_guards()), me }
    }

    pub fn adapter(&self) -> &StateAdapter<M> {
        &self.adapter
    }

    pub fn me(&self) -> &Author {
        &self.me
    }

    /// Create a note under a fresh id and return the id.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Encode` if a field cannot be serialized.
    pub fn create_note(&self, position: Position, text: &str) -> Result<String, StoreError> {
        let id = Uuid::new_v4().simple().to_string();
        self.create_note_with_id(&id, position, text)?;
        Ok(id)
    }

    /// Write position, author, text and finally the live flag.
    ///
    /// # Errors
    ///
    /// `StoreError::InvalidId` for an empty id or one containing `_`.
    pub fn create_note_with_id(&self, id: &str, position: Position, text: &str) -> Result<(), StoreError> {
        check_id(id)?;
        self.adapter.set_as(&format!("{POSITION_PREFIX}{id}"), &position)?;
        self.adapter.set_as(&format!("{AUTHOR_PREFIX}{id}"), &self.me)?;
        self.adapter.set(&format!("{TEXT_PREFIX}{id}"), Value::String(text.to_owned()));
        self.adapter.set(&layout().flag_key(id), json!(FLAG_LIVE));
        debug!(note_id = id, author = %self.me.id, "notes: note created");
        Ok(())
    }

    /// # Errors
    ///
    /// `StoreError::InvalidId` for a malformed id, `StoreError::Encode` if the
    /// position cannot be serialized.
    pub fn move_note(&self, id: &str, position: Position) -> Result<(), StoreError> {
        check_id(id)?;
        self.adapter.set_as(&format!("{POSITION_PREFIX}{id}"), &position)
    }

    /// # Errors
    ///
    /// `StoreError::InvalidId` for a malformed id.
    pub fn set_text(&self, id: &str, text: &str) -> Result<(), StoreError> {
        check_id(id)?;
        self.adapter.set(&format!("{TEXT_PREFIX}{id}"), Value::String(text.to_owned()));
        Ok(())
    }

    /// Flip this user's vote. Returns whether the user now votes for the note.
    ///
    /// # Errors
    ///
    /// `StoreError::InvalidId` for a malformed id. An id containing `_` would
    /// otherwise land under another note's vote prefix.
    pub fn toggle_vote(&self, id: &str) -> Result<bool, StoreError> {
        check_id(id)?;
        let key = vote_key(id, &self.me.id);
        if self.adapter.get(&key).is_some_and(|v| !v.is_null()) {
            self.adapter.delete(&key);
            Ok(false)
        } else {
            self.adapter.set(&key, Value::Bool(true));
            Ok(true)
        }
    }

    /// Mark the note deleted. Field keys stay behind.
    ///
    /// # Errors
    ///
    /// `StoreError::InvalidId` for a malformed id.
    pub fn delete_note(&self, id: &str) -> Result<(), StoreError> {
        check_id(id)?;
        self.adapter.set(&layout().flag_key(id), json!(FLAG_DELETED));
        debug!(note_id = id, "notes: note deleted");
        Ok(())
    }

    #[must_use]
    pub fn notes(&self) -> Vec<Note> {
        project_notes(&self.adapter.entries(), &self.me.id)
    }

    #[must_use]
    pub fn note(&self, id: &str) -> Option<Note> {
        self.notes().into_iter().find(|note| note.id == id)
    }

    /// Live note list recomputed on every change.
    pub fn watch(&self) -> View<Vec<Note>> {
        let me = self.me.id.clone();
        self.adapter.watch(move |entries| project_notes(entries, &me))
    }
}

#[cfg(test)]
#[path = "notes_test.rs"]
mod tests;
