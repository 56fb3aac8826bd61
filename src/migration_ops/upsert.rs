//! Destination upsert engine: CREATE vs UPDATE vs MATCH-BY-NATURAL-KEY, with
//! bounded slug-collision regeneration and singleton protection.

use anyhow::Result;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::context::DestIndex;
use super::write_failure_detail;
use crate::normalization::slug::next_free_slug;
use crate::platform::client::{ApiResponse, CommerceApi};

const MAX_CREATE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Created(String),
    /// Created under a known ledger mapping whose destination object had
    /// vanished (manual deletion upstream).
    Recreated(String),
    Updated(String),
    Skipped(Value),
    Failed(Value),
}

impl UpsertOutcome {
    pub fn destination_id(&self) -> Option<&str> {
        match self {
            UpsertOutcome::Created(id)
            | UpsertOutcome::Recreated(id)
            | UpsertOutcome::Updated(id) => Some(id),
            _ => None,
        }
    }
}

/// Entities that must never be created, only updated against a well-known
/// destination object (e.g. the platform's fixed root category).
#[derive(Debug, Clone)]
pub struct SingletonTarget {
    /// Natural keys that identify the singleton on the destination.
    pub lookup_keys: Vec<String>,
}

pub struct UpsertRequest {
    /// Destination collection path, e.g. `categories`.
    pub collection: &'static str,
    pub payload: Value,
    pub known_destination_id: Option<String>,
    pub singleton: Option<SingletonTarget>,
}

/// Immutable on update: the destination rejects (or worse, silently ignores)
/// slug changes on existing objects.
fn update_payload(payload: &Value) -> Value {
    let mut out = payload.clone();
    if let Some(obj) = out.as_object_mut() {
        obj.remove("slug");
    }
    out
}

fn payload_natural_key(payload: &Value) -> Option<String> {
    ["slug", "email", "code", "name"]
        .iter()
        .find_map(|f| {
            payload
                .get(*f)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
        })
        .map(str::to_lowercase)
}

/// A creation rejection that slug regeneration can fix: an explicit conflict,
/// or a validation failure the platform attributes to the slug field.
fn is_slug_conflict(resp: &ApiResponse) -> bool {
    if resp.status == 409 {
        return true;
    }
    if resp.status == 400 || resp.status == 422 {
        let field = resp
            .body
            .pointer("/error/field")
            .and_then(Value::as_str)
            .unwrap_or("");
        return field == "slug" || resp.raw.to_ascii_lowercase().contains("slug");
    }
    false
}

pub async fn upsert_entity(
    api: &dyn CommerceApi,
    store_id: &str,
    index: &mut DestIndex,
    req: UpsertRequest,
) -> Result<UpsertOutcome> {
    // Singletons: update-or-skip, never create.
    if let Some(singleton) = &req.singleton {
        let resolved = req.known_destination_id.clone().or_else(|| {
            singleton
                .lookup_keys
                .iter()
                .find_map(|k| index.lookup(k).cloned())
        });
        return match resolved {
            Some(dest_id) => {
                let path = format!("{}/{}", req.collection, dest_id);
                let resp = api.put(store_id, &path, &update_payload(&req.payload)).await?;
                if resp.ok() {
                    Ok(UpsertOutcome::Updated(dest_id))
                } else {
                    Ok(UpsertOutcome::Failed(write_failure_detail(
                        "singleton-update",
                        &req.payload,
                        &resp,
                    )))
                }
            }
            None => {
                info!(collection = req.collection, "singleton target unresolved; skipping");
                Ok(UpsertOutcome::Skipped(
                    json!({"reason": "singleton destination not resolved"}),
                ))
            }
        };
    }

    // 1. Known destination id: verify it still exists, then update.
    let mut vanished_mapping = false;
    if let Some(dest_id) = &req.known_destination_id {
        let path = format!("{}/{}", req.collection, dest_id);
        let current = api.get(store_id, &path, &[]).await?;
        if current.ok() {
            let resp = api.put(store_id, &path, &update_payload(&req.payload)).await?;
            return if resp.ok() {
                Ok(UpsertOutcome::Updated(dest_id.clone()))
            } else {
                Ok(UpsertOutcome::Failed(write_failure_detail(
                    "update",
                    &req.payload,
                    &resp,
                )))
            };
        }
        if current.not_found() {
            warn!(
                collection = req.collection,
                dest_id, "mapped destination object vanished; will re-create"
            );
            vanished_mapping = true;
        } else {
            return Ok(UpsertOutcome::Failed(write_failure_detail(
                "lookup",
                &req.payload,
                &current,
            )));
        }
    }

    // 2. Natural-key match against the pre-built destination index: heals a
    //    mapping lost to manual delete-and-recreate upstream.
    if let Some(key) = payload_natural_key(&req.payload) {
        if let Some(dest_id) = index.lookup(&key).cloned() {
            let path = format!("{}/{}", req.collection, dest_id);
            let resp = api.put(store_id, &path, &update_payload(&req.payload)).await?;
            return if resp.ok() {
                info!(collection = req.collection, key, dest_id, "healed mapping via natural key");
                Ok(UpsertOutcome::Updated(dest_id))
            } else {
                Ok(UpsertOutcome::Failed(write_failure_detail(
                    "keymatch-update",
                    &req.payload,
                    &resp,
                )))
            };
        }
    }

    // 3. Create, regenerating the slug on collision. Explicit attempt loop,
    //    bounded; each regeneration consults the taken-slug set so we do not
    //    rediscover the same collision against the server.
    let mut payload = req.payload.clone();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let resp = api.post(store_id, req.collection, &payload).await?;
        if resp.ok() {
            let Some(dest_id) = super::context::record_id(&resp.body) else {
                return Ok(UpsertOutcome::Failed(json!({
                    "stage": "create",
                    "reason": "created but response carried no id",
                    "response": resp.raw_clipped(super::MAX_DIAG_BYTES),
                })));
            };
            let slug = payload.get("slug").and_then(Value::as_str).map(str::to_string);
            if let Some(slug) = &slug {
                index.taken_slugs.insert(slug.clone());
            }
            if let Some(key) = payload_natural_key(&payload) {
                index.by_key.insert(key, dest_id.clone());
            }
            return Ok(if vanished_mapping {
                UpsertOutcome::Recreated(dest_id)
            } else {
                UpsertOutcome::Created(dest_id)
            });
        }

        if is_slug_conflict(&resp) && attempt < MAX_CREATE_ATTEMPTS {
            let base = payload
                .get("slug")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            // The server knows this slug even though our seed listing did not.
            index.taken_slugs.insert(base.clone());
            match next_free_slug(&base, &index.taken_slugs) {
                Some(fresh) => {
                    warn!(
                        collection = req.collection,
                        taken = base,
                        regenerated = fresh,
                        attempt,
                        "slug collision; retrying create with regenerated slug"
                    );
                    if let Some(obj) = payload.as_object_mut() {
                        obj.insert("slug".into(), Value::String(fresh));
                    }
                    continue;
                }
                None => {
                    return Ok(UpsertOutcome::Failed(json!({
                        "stage": "create",
                        "reason": "slug namespace exhausted",
                        "base": base,
                    })))
                }
            }
        }

        return Ok(UpsertOutcome::Failed(write_failure_detail(
            "create",
            &payload,
            &resp,
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration_ops::testutil::FakeApi;

    fn index_with(slug: &str, id: &str) -> DestIndex {
        let mut index = DestIndex::default();
        index.register(&[slug], Some(slug), id);
        index
    }

    #[tokio::test]
    async fn known_id_updates_without_slug() {
        let api = FakeApi::new();
        api.on("GET", "categories/c9", 200, json!({"id": "c9"}));
        api.on("PUT", "categories/c9", 200, json!({"id": "c9"}));
        let mut index = DestIndex::default();
        let out = upsert_entity(
            &api,
            "dst",
            &mut index,
            UpsertRequest {
                collection: "categories",
                payload: json!({"name": "Shoes", "slug": "shoes"}),
                known_destination_id: Some("c9".into()),
                singleton: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(out, UpsertOutcome::Updated("c9".into()));
        let calls = api.calls.lock().unwrap();
        let put = calls.iter().find(|c| c.method == "PUT").unwrap();
        assert!(put.body.get("slug").is_none());
    }

    #[tokio::test]
    async fn vanished_mapping_recreates() {
        let api = FakeApi::new();
        api.on("GET", "categories/gone", 404, Value::Null);
        api.on("POST", "categories", 201, json!({"id": "fresh"}));
        let mut index = DestIndex::default();
        let out = upsert_entity(
            &api,
            "dst",
            &mut index,
            UpsertRequest {
                collection: "categories",
                payload: json!({"name": "Shoes", "slug": "shoes"}),
                known_destination_id: Some("gone".into()),
                singleton: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(out, UpsertOutcome::Recreated("fresh".into()));
    }

    #[tokio::test]
    async fn natural_key_match_heals_mapping() {
        let api = FakeApi::new();
        api.on("PUT", "categories/c5", 200, json!({"id": "c5"}));
        let mut index = index_with("shoes", "c5");
        let out = upsert_entity(
            &api,
            "dst",
            &mut index,
            UpsertRequest {
                collection: "categories",
                payload: json!({"name": "Shoes", "slug": "shoes"}),
                known_destination_id: None,
                singleton: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(out, UpsertOutcome::Updated("c5".into()));
        assert_eq!(api.calls_to("POST", "categories"), 0);
    }

    #[tokio::test]
    async fn slug_conflict_regenerates_and_retries() {
        let api = FakeApi::new();
        api.on("POST", "categories", 409, json!({"error": {"field": "slug"}}));
        api.on("POST", "categories", 201, json!({"id": "c2"}));
        let mut index = DestIndex::default();
        let out = upsert_entity(
            &api,
            "dst",
            &mut index,
            UpsertRequest {
                collection: "categories",
                payload: json!({"name": "Shoes", "slug": "shoes"}),
                known_destination_id: None,
                singleton: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(out, UpsertOutcome::Created("c2".into()));
        let calls = api.calls.lock().unwrap();
        let posts: Vec<_> = calls.iter().filter(|c| c.method == "POST").collect();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[1].body["slug"], json!("shoes-2"));
    }

    #[tokio::test]
    async fn persistent_conflict_fails_after_bounded_attempts() {
        let api = FakeApi::new();
        // Single sticky response: every POST collides.
        api.on("POST", "categories", 409, json!({"error": {"field": "slug"}}));
        let mut index = DestIndex::default();
        let out = upsert_entity(
            &api,
            "dst",
            &mut index,
            UpsertRequest {
                collection: "categories",
                payload: json!({"name": "Shoes", "slug": "shoes"}),
                known_destination_id: None,
                singleton: None,
            },
        )
        .await
        .unwrap();
        assert!(matches!(out, UpsertOutcome::Failed(_)));
        assert_eq!(api.calls_to("POST", "categories"), MAX_CREATE_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn singleton_never_creates() {
        let api = FakeApi::new();
        let mut index = DestIndex::default();
        let out = upsert_entity(
            &api,
            "dst",
            &mut index,
            UpsertRequest {
                collection: "categories",
                payload: json!({"name": "All Products"}),
                known_destination_id: None,
                singleton: Some(SingletonTarget {
                    lookup_keys: vec!["all-products".into(), "All Products".into()],
                }),
            },
        )
        .await
        .unwrap();
        assert!(matches!(out, UpsertOutcome::Skipped(_)));
        assert_eq!(api.calls_to("POST", "categories"), 0);

        // Once resolvable, it updates in place.
        let mut index = index_with("all-products", "root-1");
        api.on("PUT", "categories/root-1", 200, json!({"id": "root-1"}));
        let out = upsert_entity(
            &api,
            "dst",
            &mut index,
            UpsertRequest {
                collection: "categories",
                payload: json!({"name": "All Products"}),
                known_destination_id: None,
                singleton: Some(SingletonTarget {
                    lookup_keys: vec!["all-products".into()],
                }),
            },
        )
        .await
        .unwrap();
        assert_eq!(out, UpsertOutcome::Updated("root-1".into()));
    }
}
