//! 🧾 Matching the store's verdicts back to the keys we sent.
//!
//! Results name the *store* type (`"book"`), keys name the *record* type (`"Book"`), so
//! every result goes through the schema's reverse lookup. A result for a store type
//! the schema doesn't know is logged and ignored, which leaves its key unacknowledged.
//! Unacknowledged keys are retried like failures.

use std::collections::HashMap;

use tracing::error;

use crate::common::{BulkItemResult, EntityKey};
use crate::schema::MappingSchema;

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Reconciliation {
    pub(crate) succeeded: Vec<EntityKey>,
    /// Failed or unacknowledged, with the reason.
    pub(crate) failed: Vec<(EntityKey, String)>,
}

/// Sort every submitted key into succeeded or failed. Each key lands in exactly one.
pub(crate) fn reconcile(schema: &MappingSchema, submitted: &[EntityKey], results: &[BulkItemResult]) -> Reconciliation {
    let mut verdicts: HashMap<EntityKey, &BulkItemResult> = HashMap::with_capacity(results.len());
    for result in results {
        let Some(type_mapping) = schema.find_by_store_type(&result.type_name) else {
            error!(
                "💀 Bulk result for unmapped store type '{}' (id {}), cannot match it to a queued write",
                result.type_name, result.id
            );
            continue;
        };
        verdicts.insert(EntityKey::new(type_mapping.name.clone(), result.id.clone()), result);
    }

    let mut reconciliation = Reconciliation::default();
    for key in submitted {
        match verdicts.get(key) {
            Some(result) if result.success => reconciliation.succeeded.push(key.clone()),
            Some(result) => reconciliation.failed.push((
                key.clone(),
                result.error.clone().unwrap_or_else(|| "failed without a reason".to_string()),
            )),
            None => reconciliation.failed.push((key.clone(), "no response from the store".to_string())),
        }
    }
    reconciliation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tests::library_schema;

    #[test]
    fn the_one_where_every_key_gets_exactly_one_verdict() {
        let schema = library_schema();
        let submitted = vec![
            EntityKey::new("Book", "1"),
            EntityKey::new("Book", "2"),
            EntityKey::new("Author", "7"),
            EntityKey::new("Book", "3"),
        ];
        let results = vec![
            BulkItemResult::ok("book", "1"),
            BulkItemResult::failed("book", "2", "version conflict"),
            BulkItemResult::ok("author", "7"),
            // 👻 nobody maps "pamphlet", so Book#3 never hears back
            BulkItemResult::ok("pamphlet", "3"),
        ];

        let reconciliation = reconcile(&schema, &submitted, &results);
        assert_eq!(
            reconciliation.succeeded,
            vec![EntityKey::new("Book", "1"), EntityKey::new("Author", "7")]
        );
        assert_eq!(
            reconciliation.failed,
            vec![
                (EntityKey::new("Book", "2"), "version conflict".to_string()),
                (EntityKey::new("Book", "3"), "no response from the store".to_string()),
            ]
        );
    }
}
