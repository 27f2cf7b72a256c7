//! Store error type.

use crate::schema::SchemaError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to encode value for `{key}`: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode value at `{key}`: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("value at `{key}` rejected by schema: {source}")]
    Schema {
        key: String,
        #[source]
        source: SchemaError,
    },
    #[error("invalid record id `{id}`: {reason}")]
    InvalidId { id: String, reason: &'static str },
}
