//! Runtime schema validation for incoming values.
//!
//! Peers can write anything to any key. A validator decides whether a value
//! arriving from elsewhere is acceptable; consumers (the adapter cache and
//! `RecordMap` reads) drop values that fail rather than surfacing an error.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("expected {expected}: {reason}")]
    Mismatch { expected: &'static str, reason: String },
    #[error("value must not be null")]
    Null,
}

/// Accepts or rejects a JSON value.
pub trait Validator: Send + Sync {
    /// # Errors
    ///
    /// Returns a `SchemaError` describing why `value` is not acceptable.
    fn validate(&self, value: &Value) -> Result<(), SchemaError>;
}

impl<F> Validator for F
where
    F: Fn(&Value) -> Result<(), SchemaError> + Send + Sync,
{
    fn validate(&self, value: &Value) -> Result<(), SchemaError> {
        self(value)
    }
}

/// Validates by deserializing into `T`.
pub struct TypedSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> TypedSchema<T> {
    #[must_use]
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }

    /// Parse `value` as `T`. Null is rejected even when `T` would accept it,
    /// so a cleared key never passes for a record.
    ///
    /// # Errors
    ///
    /// `SchemaError::Null` for null, `SchemaError::Mismatch` if `T` rejects it.
    pub fn parse(&self, value: &Value) -> Result<T, SchemaError> {
        if value.is_null() {
            return Err(SchemaError::Null);
        }
        T::deserialize(value).map_err(|e| SchemaError::Mismatch {
            expected: std::any::type_name::<T>(),
            reason: e.to_string(),
        })
    }
}

impl<T: DeserializeOwned> Default for TypedSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Validator for TypedSchema<T> {
    fn validate(&self, value: &Value) -> Result<(), SchemaError> {
        self.parse(value).map(|_| ())
    }
}

/// A validator bound to every key under a prefix.
#[derive(Clone)]
pub struct SchemaGuard {
    prefix: String,
    validator: Arc<dyn Validator>,
}

impl SchemaGuard {
    pub fn new(prefix: impl Into<String>, validator: impl Validator + 'static) -> Self {
        Self { prefix: prefix.into(), validator: Arc::new(validator) }
    }

    /// Guard `prefix` with a `TypedSchema<T>`.
    pub fn typed<T: DeserializeOwned + 'static>(prefix: impl Into<String>) -> Self {
        Self::new(prefix, TypedSchema::<T>::new())
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn applies_to(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }

    /// # Errors
    ///
    /// Propagates the validator's rejection.
    pub fn check(&self, value: &Value) -> Result<(), SchemaError> {
        self.validator.validate(value)
    }
}

impl std::fmt::Debug for SchemaGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaGuard").field("prefix", &self.prefix).finish_non_exhaustive()
    }
}

/// Validator accepting only JSON strings.
///
/// # Errors
///
/// `SchemaError::Mismatch` for any non-string value.
pub fn string_value(value: &Value) -> Result<(), SchemaError> {
    if value.is_string() {
        Ok(())
    } else {
        Err(SchemaError::Mismatch { expected: "string", reason: format!("got {value}") })
    }
}

#[cfg(test)]
#[path = "schema_test.rs"]
mod tests;
