//! 💀 Every way a stored document can disagree with us.
//!
//! Reads are request-scoped, so none of these are retried. They are surfaced to
//! whoever asked for the record, with enough context to find the offending field.

use thiserror::Error;

use super::path::FieldPath;
use crate::records::BindError;

#[derive(Debug, Error)]
pub enum UnmarshallError {
    /// A document or reference names a type the schema has never heard of.
    #[error("reference to non-indexable type '{type_name}' at '{path}'")]
    UnknownType { type_name: String, path: FieldPath },

    /// Stored shape disagrees with the current schema.
    #[error("schema mismatch at {record_type}.{field} ('{path}'): {reason}")]
    SchemaMismatch {
        record_type: String,
        field: String,
        path: FieldPath,
        reason: String,
    },

    /// A custom converter refused the stored scalar.
    #[error("unable to unmarshall {record_type}.{field} using converter '{converter}': {reason}")]
    Conversion {
        record_type: String,
        field: String,
        converter: String,
        reason: String,
    },

    /// An identity could not be converted to its type's identity type.
    #[error("invalid identity for {type_name} at '{path}': {reason}")]
    InvalidIdentity {
        type_name: String,
        path: FieldPath,
        reason: String,
    },

    /// A reference that is not encoded as an object, or an object without an id.
    #[error("integrity error at {record_type}.{field} ('{path}'): {reason}")]
    Integrity {
        record_type: String,
        field: String,
        path: FieldPath,
        reason: String,
    },

    /// The referenced record is not in the store.
    #[error("{type_name}#{id} referenced from '{path}' was not found in the store")]
    DanglingReference {
        type_name: String,
        id: String,
        path: FieldPath,
    },

    /// The live fetch for a reference failed in transport.
    #[error("store lookup for {type_name}#{id} failed")]
    Store {
        type_name: String,
        id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// A cyclic back-pointer whose target never materialised.
    #[error("cyclic reference at '{at}' points to '{target}', which does not resolve")]
    UnresolvedCycle { at: FieldPath, target: FieldPath },

    #[error(transparent)]
    Bind(#[from] BindError),
}
