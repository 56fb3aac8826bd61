//! Cross-entity reference remapping.
//!
//! Discount-rule triggers arrive as a tree of composite boolean nodes
//! (`{"all": [...]}` / `{"any": [...]}`) of arbitrary depth, with leaf scopes
//! `{"scope": {"kind": "product", "ids": [...]}}`. Every embedded source id
//! must be rewritten to its destination counterpart before the payload can be
//! sent. Strict mode fails the whole record when any id cannot be resolved:
//! a partially-mapped rule would silently change what the rule applies to.

use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Per-kind source id -> destination id maps, loaded from the ledgers of the
/// referenced entity kinds.
pub type ReferenceMaps = HashMap<String, HashMap<String, String>>;

#[derive(Debug, Clone)]
pub struct RemapOutcome {
    pub ok: bool,
    /// Remapped payload when `ok`; the ORIGINAL, untouched payload when not.
    pub payload: Value,
    /// Successfully rewritten ids per kind.
    pub resolved: HashMap<String, usize>,
    /// Ids that had no mapping, per kind.
    pub unresolved: HashMap<String, Vec<String>>,
}

/// Walk `payload`'s trigger tree and rewrite scope id lists in place.
///
/// Strict mode returns the original payload whenever anything is unresolved;
/// non-strict drops unresolved ids from the scope lists (diagnostics tooling
/// only — migrations always run strict).
pub fn remap_references(payload: &Value, maps: &ReferenceMaps, strict: bool) -> RemapOutcome {
    let mut work = payload.clone();
    let mut resolved: HashMap<String, usize> = HashMap::new();
    let mut unresolved: HashMap<String, Vec<String>> = HashMap::new();

    walk(&mut work, maps, &mut resolved, &mut unresolved);

    let ok = unresolved.is_empty();
    debug!(?resolved, ?unresolved, strict, "reference remap finished");
    if !ok && strict {
        return RemapOutcome {
            ok: false,
            payload: payload.clone(),
            resolved,
            unresolved,
        };
    }
    RemapOutcome {
        ok,
        payload: work,
        resolved,
        unresolved,
    }
}

fn walk(
    node: &mut Value,
    maps: &ReferenceMaps,
    resolved: &mut HashMap<String, usize>,
    unresolved: &mut HashMap<String, Vec<String>>,
) {
    match node {
        Value::Object(obj) => {
            // Leaf scope?
            if let Some(scope) = obj.get_mut("scope") {
                remap_scope(scope, maps, resolved, unresolved);
            }
            // Composite branches; any other nested object may hold a subtree
            // (e.g. the trigger wrapper itself).
            for (key, child) in obj.iter_mut() {
                if key == "scope" {
                    continue;
                }
                walk(child, maps, resolved, unresolved);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                walk(item, maps, resolved, unresolved);
            }
        }
        _ => {}
    }
}

fn remap_scope(
    scope: &mut Value,
    maps: &ReferenceMaps,
    resolved: &mut HashMap<String, usize>,
    unresolved: &mut HashMap<String, Vec<String>>,
) {
    let Some(kind) = scope.get("kind").and_then(Value::as_str).map(str::to_string) else {
        return;
    };
    let Some(ids) = scope.get_mut("ids").and_then(Value::as_array_mut) else {
        return;
    };
    let map = maps.get(&kind);
    let mut kept: Vec<Value> = Vec::with_capacity(ids.len());
    for id in ids.iter() {
        let id_str = match id {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => continue,
        };
        match map.and_then(|m| m.get(&id_str)) {
            Some(dest) => {
                kept.push(Value::String(dest.clone()));
                *resolved.entry(kind.clone()).or_default() += 1;
            }
            None => {
                unresolved.entry(kind.clone()).or_default().push(id_str);
            }
        }
    }
    *ids = kept;
}
