//! Scriptable platform fake for migrator tests.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::platform::client::{ApiResponse, CommerceApi};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: &'static str,
    pub store_id: String,
    pub path: String,
    pub body: Value,
}

/// Routes canned responses by (method, path) and records every call.
/// Unscripted paths answer 404 so tests fail loudly on surprise traffic.
#[derive(Default)]
pub struct FakeApi {
    responses: Mutex<HashMap<(&'static str, String), VecDeque<ApiResponse>>>,
    pub calls: Mutex<Vec<RecordedCall>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, method: &'static str, path: &str, status: u16, body: Value) -> &Self {
        let resp = ApiResponse {
            status,
            raw: body.to_string(),
            body,
        };
        self.responses
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(resp);
        self
    }

    pub fn calls_to(&self, method: &'static str, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .count()
    }

    fn respond(&self, method: &'static str, store_id: &str, path: &str, body: Value) -> ApiResponse {
        self.calls.lock().unwrap().push(RecordedCall {
            method,
            store_id: store_id.to_string(),
            path: path.to_string(),
            body,
        });
        let mut responses = self.responses.lock().unwrap();
        if let Some(queue) = responses.get_mut(&(method, path.to_string())) {
            if queue.len() > 1 {
                if let Some(front) = queue.pop_front() {
                    return front;
                }
            } else if let Some(front) = queue.front() {
                // Last response sticks: repeat calls see the same answer.
                return front.clone();
            }
        }
        ApiResponse {
            status: 404,
            body: Value::Null,
            raw: format!("no fake route for {method} {path}"),
        }
    }
}

#[async_trait]
impl CommerceApi for FakeApi {
    async fn get(
        &self,
        store_id: &str,
        path: &str,
        _query: &[(String, String)],
    ) -> Result<ApiResponse> {
        Ok(self.respond("GET", store_id, path, Value::Null))
    }

    async fn post(&self, store_id: &str, path: &str, body: &Value) -> Result<ApiResponse> {
        Ok(self.respond("POST", store_id, path, body.clone()))
    }

    async fn put(&self, store_id: &str, path: &str, body: &Value) -> Result<ApiResponse> {
        Ok(self.respond("PUT", store_id, path, body.clone()))
    }
}
