//! Import/export document shapes.
//!
//! Two shapes exist in the wild: the current meta-wrapped document
//! `{meta: {from_store_id}, <entities>: [...]}` and the legacy flat one
//! `{from_store_id, <entities>: [...]}`. One explicit parser returns a
//! discriminated result instead of cascading key probes; export always writes
//! the meta-wrapped shape with enough per-record identity (source id +
//! natural key) for a later resumable import.

use chrono::Utc;
use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::ledger::EntityKind;
use crate::migration_ops::context::record_id;

#[derive(Debug, Clone, PartialEq)]
pub enum ImportDoc {
    RecognizedV3 {
        from_store_id: String,
        records: Vec<Value>,
    },
    RecognizedV1 {
        from_store_id: String,
        records: Vec<Value>,
    },
    Unrecognized,
}

impl ImportDoc {
    pub fn records(self) -> Option<(String, Vec<Value>)> {
        match self {
            ImportDoc::RecognizedV3 {
                from_store_id,
                records,
            }
            | ImportDoc::RecognizedV1 {
                from_store_id,
                records,
            } => Some((from_store_id, records)),
            ImportDoc::Unrecognized => None,
        }
    }
}

fn store_id_of(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse an uploaded document for `kind`. Meta-wrapped shape is preferred;
/// the legacy flat shape is accepted; anything else is `Unrecognized`.
pub fn parse_import(kind: EntityKind, doc: &Value) -> ImportDoc {
    let Some(obj) = doc.as_object() else {
        return ImportDoc::Unrecognized;
    };
    let records = obj
        .get(kind.doc_key())
        .and_then(Value::as_array)
        .cloned();

    if let Some(meta) = obj.get("meta").and_then(Value::as_object) {
        if let (Some(from), Some(records)) = (
            meta.get("from_store_id").and_then(store_id_of),
            records.clone(),
        ) {
            return ImportDoc::RecognizedV3 {
                from_store_id: from,
                records,
            };
        }
    }
    if let (Some(from), Some(records)) = (obj.get("from_store_id").and_then(store_id_of), records) {
        return ImportDoc::RecognizedV1 {
            from_store_id: from,
            records,
        };
    }
    ImportDoc::Unrecognized
}

/// Natural key carried per record in export documents, by kind.
pub fn natural_key_of(kind: EntityKind, record: &Value) -> Option<String> {
    let field = match kind {
        EntityKind::Category | EntityKind::Product => "slug",
        EntityKind::Contact => "email",
        EntityKind::Discount => "code",
        EntityKind::Order => "number",
    };
    match record.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => record
            .get("sku")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    }
}

/// Build the downloadable meta-wrapped export document.
pub fn export_doc(kind: EntityKind, from_store_id: &str, records: &[Value]) -> Value {
    let mut doc: IndexMap<String, Value> = IndexMap::new();
    doc.insert(
        "meta".into(),
        json!({
            "from_store_id": from_store_id,
            "exported_at": Utc::now().to_rfc3339(),
            "kind": kind.doc_key(),
        }),
    );
    doc.insert(kind.doc_key().into(), Value::Array(records.to_vec()));
    serde_json::to_value(doc).unwrap_or(Value::Null)
}

/// Identity pairs (source id, natural key) for append-only export ledgering.
pub fn export_identities(
    kind: EntityKind,
    records: &[Value],
) -> Vec<(Option<String>, Option<String>)> {
    records
        .iter()
        .map(|r| (record_id(r), natural_key_of(kind, r)))
        .collect()
}
