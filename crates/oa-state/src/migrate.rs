// migrate.rs — Bring persisted documents up to the current schema version.
//
// Each step turns a version-N document into a version-(N+1) document. The
// table is fixed at build time; a document whose version has no step is
// returned as-is and decoded with whatever defaults apply.

use serde_json::{Map, Value};

use crate::model::{PhaseStatus, PlanStatus};

/// Schema version written by this engine.
pub const CURRENT_VERSION: u32 = 1;

type MigrationStep = fn(Value) -> Value;

/// `(from_version, step)` pairs.
static MIGRATIONS: &[(u32, MigrationStep)] = &[(0, v0_to_v1)];

/// The document's `version` field, or 0 when absent.
pub fn document_version(document: &Value) -> u64 {
    document
        .get("version")
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

/// Apply migration steps until the document reaches `CURRENT_VERSION` or no
/// step is registered for its version. Never fails.
pub fn migrate_document(document: Option<Value>) -> Option<Value> {
    let mut document = document?;
    loop {
        let version = document_version(&document);
        if version >= u64::from(CURRENT_VERSION) {
            break;
        }
        let Some((_, step)) = MIGRATIONS
            .iter()
            .find(|(from, _)| u64::from(*from) == version)
        else {
            tracing::warn!(version, "no migration registered for document version; using it as-is");
            break;
        };

        document = step(document);
        let migrated_to = document_version(&document);
        tracing::info!(from = version, to = migrated_to, "migrated state document");
        if migrated_to <= version {
            break;
        }
    }
    Some(document)
}

fn v0_to_v1(mut document: Value) -> Value {
    let Some(root) = document.as_object_mut() else {
        return document;
    };
    root.insert("version".into(), Value::from(1));

    if let Some(plan) = root.get_mut("plan").and_then(Value::as_object_mut) {
        normalize_status(plan, PlanStatus::ALL.map(|s| s.as_str()).as_slice(), "active");
        if let Some(phases) = plan.get_mut("phases").and_then(Value::as_array_mut) {
            for phase in phases.iter_mut().filter_map(Value::as_object_mut) {
                normalize_status(
                    phase,
                    PhaseStatus::ALL.map(|s| s.as_str()).as_slice(),
                    "pending",
                );
            }
        }
    }

    for key in ["notes", "decisions", "errors"] {
        if !root.get(key).is_some_and(Value::is_array) {
            root.insert(key.into(), Value::Array(Vec::new()));
        }
    }
    document
}

fn normalize_status(record: &mut Map<String, Value>, legal: &[&str], fallback: &str) {
    let valid = record
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|status| legal.contains(&status));
    if !valid {
        record.insert("status".into(), Value::from(fallback));
    }
}
