//! Groww API token cache.
//!
//! Lookup order is memory, then the `api_tokens` row, then the static
//! `GROWW_API_TOKEN` from the environment. The memory tier is trusted for
//! `TOKEN_CACHE_TTL_SECS`; after that the store is consulted again so a token
//! refreshed by another process is picked up.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::{GROWW_TOKEN_ID, TOKEN_CACHE_TTL_SECS, TOKEN_EXPIRY_MARGIN_SECS};
use crate::db::Store;
use crate::error::Result;
use crate::types::StoredToken;

#[derive(Debug, Clone, PartialEq)]
pub struct IssuedToken {
    pub token: String,
    pub expiry: Option<DateTime<Utc>>,
}

/// Anything that can mint a fresh access token.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(&self) -> Result<IssuedToken>;
}

#[derive(Debug, Clone)]
struct Cached {
    token: String,
    fetched_at: DateTime<Utc>,
    expiry: Option<DateTime<Utc>>,
}

impl Cached {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now - self.fetched_at < Duration::seconds(TOKEN_CACHE_TTL_SECS) && not_expired(self.expiry, now)
    }
}

/// A token with no stated expiry is assumed valid.
fn not_expired(expiry: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expiry.map_or(true, |e| now < e - Duration::seconds(TOKEN_EXPIRY_MARGIN_SECS))
}

pub struct TokenCache {
    store: Store,
    env_token: Option<String>,
    memory: RwLock<Option<Cached>>,
}

impl TokenCache {
    pub fn new(store: Store, env_token: Option<String>) -> Self {
        Self {
            store,
            env_token,
            memory: RwLock::new(None),
        }
    }

    pub async fn get(&self) -> Result<Option<String>> {
        self.get_at(Utc::now()).await
    }

    pub async fn get_at(&self, now: DateTime<Utc>) -> Result<Option<String>> {
        if let Some(cached) = self.memory.read().await.as_ref() {
            if cached.is_fresh(now) {
                return Ok(Some(cached.token.clone()));
            }
        }

        if let Some(token) = self.reload_from_store(now).await? {
            return Ok(Some(token));
        }

        Ok(self.env_token.clone())
    }

    /// Bypass the memory tier and re-read the persisted token.
    /// On a hit the memory tier is replaced.
    pub async fn reload_from_store(&self, now: DateTime<Utc>) -> Result<Option<String>> {
        match self.store.load_token(GROWW_TOKEN_ID).await? {
            Some(stored) if not_expired(stored.expiry, now) => {
                *self.memory.write().await = Some(Cached {
                    token: stored.token.clone(),
                    fetched_at: now,
                    expiry: stored.expiry,
                });
                Ok(Some(stored.token))
            }
            Some(stored) => {
                debug!(expiry = ?stored.expiry, "Stored Groww token has expired");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub async fn invalidate(&self) {
        *self.memory.write().await = None;
    }

    /// Mint a new token and write it to both tiers.
    pub async fn refresh(&self, issuer: &dyn TokenIssuer, now: DateTime<Utc>) -> Result<IssuedToken> {
        let issued = issuer.issue().await?;
        self.store
            .save_token(&StoredToken {
                id: GROWW_TOKEN_ID.to_string(),
                token: issued.token.clone(),
                expiry: issued.expiry,
                created_at: now,
            })
            .await?;
        *self.memory.write().await = Some(Cached {
            token: issued.token.clone(),
            fetched_at: now,
            expiry: issued.expiry,
        });
        info!(expiry = ?issued.expiry, "Groww token refreshed");
        Ok(issued)
    }
}
