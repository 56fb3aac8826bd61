//! Drives paginated listing endpoints to exhaustion.
//!
//! The platform has two listing dialects: the current API pages with an opaque
//! `cursor` (`{items, paging: {next_cursor}}`), the legacy one with
//! `offset`/`limit` (`{items, total, offset, count}`). Both walkers funnel all
//! pages into one `Vec<Value>`; callers never see page boundaries.

use anyhow::{bail, Result};
use serde_json::Value;
use tracing::debug;

use super::client::{ApiResponse, CommerceApi};

// Guard against a server that keeps handing back the same cursor forever.
const MAX_PAGES: usize = 10_000;
const LEGACY_PAGE_LIMIT: u64 = 100;

fn items_of(resp: &ApiResponse) -> Vec<Value> {
    resp.body
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Cursor-style walk (current API).
pub async fn walk_cursor(
    api: &dyn CommerceApi,
    store_id: &str,
    path: &str,
    base_query: &[(String, String)],
) -> Result<Vec<Value>> {
    let first = api.get(store_id, path, base_query).await?;
    walk_cursor_from(api, store_id, path, base_query, first).await
}

/// Cursor walk seeded with an already-fetched first page, so callers that
/// probed the endpoint do not refetch it.
pub async fn walk_cursor_from(
    api: &dyn CommerceApi,
    store_id: &str,
    path: &str,
    base_query: &[(String, String)],
    first: ApiResponse,
) -> Result<Vec<Value>> {
    let mut out: Vec<Value> = Vec::new();
    let mut cursor: Option<String> = None;
    let mut resp = first;
    for page in 0..MAX_PAGES {
        if !resp.ok() {
            bail!(
                "listing {path} for store {store_id} failed ({}): {}",
                resp.status,
                resp.raw_clipped(256)
            );
        }
        let items = items_of(&resp);
        debug!(path, page, count = items.len(), "fetched page");
        out.extend(items);

        let next = resp
            .body
            .pointer("/paging/next_cursor")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        match next {
            Some(n) if Some(&n) != cursor.as_ref() => cursor = Some(n),
            _ => return Ok(out),
        }
        let mut query = base_query.to_vec();
        if let Some(c) = &cursor {
            query.push(("cursor".into(), c.clone()));
        }
        resp = api.get(store_id, path, &query).await?;
    }
    bail!("listing {path} for store {store_id} exceeded {MAX_PAGES} pages")
}

/// Offset/limit walk (legacy API).
pub async fn walk_offset(
    api: &dyn CommerceApi,
    store_id: &str,
    path: &str,
    base_query: &[(String, String)],
) -> Result<Vec<Value>> {
    let mut out: Vec<Value> = Vec::new();
    let mut offset: u64 = 0;
    for _page in 0..MAX_PAGES {
        let mut query = base_query.to_vec();
        query.push(("offset".into(), offset.to_string()));
        query.push(("limit".into(), LEGACY_PAGE_LIMIT.to_string()));
        let resp = api.get(store_id, path, &query).await?;
        if !resp.ok() {
            bail!(
                "listing {path} for store {store_id} failed ({}): {}",
                resp.status,
                resp.raw_clipped(256)
            );
        }
        let items = items_of(&resp);
        if items.is_empty() {
            return Ok(out);
        }
        let count = resp
            .body
            .get("count")
            .and_then(Value::as_u64)
            .unwrap_or(items.len() as u64);
        let total = resp.body.get("total").and_then(Value::as_u64);
        out.extend(items);
        offset += count.max(1);
        if let Some(total) = total {
            if offset >= total {
                return Ok(out);
            }
        }
    }
    bail!("listing {path} for store {store_id} exceeded {MAX_PAGES} pages")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Fake platform serving canned pages keyed by the incoming cursor/offset.
    struct PagedFake {
        pages: Vec<Value>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl CommerceApi for PagedFake {
        async fn get(
            &self,
            _store: &str,
            _path: &str,
            query: &[(String, String)],
        ) -> Result<ApiResponse> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            let idx = query
                .iter()
                .find(|(k, _)| k == "cursor")
                .map(|(_, v)| v.parse::<usize>().unwrap())
                .or_else(|| {
                    query
                        .iter()
                        .find(|(k, _)| k == "offset")
                        .map(|(_, v)| v.parse::<usize>().unwrap() / 2)
                })
                .unwrap_or(0);
            let body = self.pages.get(idx).cloned().unwrap_or(json!({"items": []}));
            Ok(ApiResponse {
                status: 200,
                raw: body.to_string(),
                body,
            })
        }

        async fn post(&self, _: &str, _: &str, _: &Value) -> Result<ApiResponse> {
            unreachable!()
        }
        async fn put(&self, _: &str, _: &str, _: &Value) -> Result<ApiResponse> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn cursor_walk_collects_all_pages() {
        let fake = PagedFake {
            pages: vec![
                json!({"items": [{"id": "a"}, {"id": "b"}], "paging": {"next_cursor": "1"}}),
                json!({"items": [{"id": "c"}], "paging": {"next_cursor": ""}}),
            ],
            calls: Mutex::new(0),
        };
        let items = walk_cursor(&fake, "s1", "products", &[]).await.unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(*fake.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn seeded_walk_continues_without_refetching_first_page() {
        let first_body =
            json!({"items": [{"id": "a"}, {"id": "b"}], "paging": {"next_cursor": "1"}});
        let fake = PagedFake {
            pages: vec![
                first_body.clone(),
                json!({"items": [{"id": "c"}], "paging": {"next_cursor": ""}}),
            ],
            calls: Mutex::new(0),
        };
        let first = ApiResponse {
            status: 200,
            raw: first_body.to_string(),
            body: first_body,
        };
        let items = walk_cursor_from(&fake, "s1", "products", &[], first)
            .await
            .unwrap();
        assert_eq!(items.len(), 3);
        // Only the second page hits the API.
        assert_eq!(*fake.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn cursor_walk_stops_on_repeated_cursor() {
        let fake = PagedFake {
            pages: vec![json!({"items": [{"id": "a"}], "paging": {"next_cursor": "0"}})],
            calls: Mutex::new(0),
        };
        // Server keeps returning cursor "0"; walker must terminate.
        let items = walk_cursor(&fake, "s1", "products", &[]).await.unwrap();
        assert_eq!(items.len(), 2); // initial page + one follow before repeat detected
    }

    #[tokio::test]
    async fn offset_walk_honors_total() {
        let fake = PagedFake {
            pages: vec![
                json!({"items": [{"id": 1}, {"id": 2}], "total": 3, "offset": 0, "count": 2}),
                json!({"items": [{"id": 3}], "total": 3, "offset": 2, "count": 1}),
            ],
            calls: Mutex::new(0),
        };
        let items = walk_offset(&fake, "s1", "orders", &[]).await.unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(*fake.calls.lock().unwrap(), 2);
    }
}
