//! Bearer credential lookup per store. Missing tokens are a run-level
//! precondition failure: nothing is migrated for a store we cannot talk to.

use anyhow::{anyhow, Result};

use crate::util::env::env_opt;

pub trait TokenProvider: Send + Sync {
    fn token_for(&self, store_id: &str) -> Result<String>;
}

/// Env-backed provider: `STORE_TOKEN_<ID>` (store id uppercased, non-alnum
/// mapped to `_`), falling back to a shared `PLATFORM_TOKEN`.
#[derive(Default)]
pub struct EnvTokenProvider;

impl EnvTokenProvider {
    fn var_name(store_id: &str) -> String {
        let suffix: String = store_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("STORE_TOKEN_{suffix}")
    }
}

impl TokenProvider for EnvTokenProvider {
    fn token_for(&self, store_id: &str) -> Result<String> {
        if let Some(tok) = env_opt(&Self::var_name(store_id)) {
            return Ok(tok);
        }
        env_opt("PLATFORM_TOKEN")
            .ok_or_else(|| anyhow!("no access token configured for store {store_id}"))
    }
}
