//! Ceremony Store (C1) — keyed, TTL-bound storage of in-flight WebAuthn
//! registration/authentication options.
//!
//! `take` must be atomic (read-then-delete in a single round trip) so that a
//! given `request_id` can be consumed by at most one caller, even under
//! concurrent finish requests.

use crate::error::{AppError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CeremonyKind {
    Registration,
    Authentication,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CeremonyRecord {
    kind: CeremonyKind,
    payload: String,
}

#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait CeremonyStore: Send + Sync {
    /// Stores ceremony options under `request_id`. Fails with `Conflict` if
    /// `request_id` already exists (it is the caller's job to generate a
    /// fresh, high-entropy id per ceremony).
    async fn put(
        &self,
        request_id: &str,
        kind: CeremonyKind,
        payload: String,
        ttl: Duration,
    ) -> Result<()>;

    /// Atomically returns and removes the record for `request_id`. Returns
    /// `None` if absent or already expired.
    async fn take(&self, request_id: &str) -> Result<Option<(CeremonyKind, String)>>;
}

/// Production implementation backed by Redis, using server-side TTL for
/// liveness and a Lua script so the take is a single atomic round trip.
pub struct RedisCeremonyStore {
    conn: ConnectionManager,
    take_script: Script,
}

impl RedisCeremonyStore {
    pub fn new(conn: ConnectionManager) -> Self {
        let take_script = Script::new(
            r"
            local v = redis.call('GET', KEYS[1])
            if v then
                redis.call('DEL', KEYS[1])
            end
            return v
            ",
        );
        Self { conn, take_script }
    }

    fn key(request_id: &str) -> String {
        format!("ceremony:{request_id}")
    }
}

#[async_trait]
impl CeremonyStore for RedisCeremonyStore {
    async fn put(
        &self,
        request_id: &str,
        kind: CeremonyKind,
        payload: String,
        ttl: Duration,
    ) -> Result<()> {
        let record = serde_json::to_string(&CeremonyRecord { kind, payload })
            .map_err(|e| AppError::Internal(anyhow::anyhow!("ceremony serialize failed: {e}")))?;

        let mut conn = self.conn.clone();
        let set: Option<String> = redis::cmd("SET")
            .arg(Self::key(request_id))
            .arg(record)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;

        if set.is_none() {
            return Err(AppError::Conflict(format!(
                "ceremony request_id {request_id} already in use"
            )));
        }
        Ok(())
    }

    async fn take(&self, request_id: &str) -> Result<Option<(CeremonyKind, String)>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = self
            .take_script
            .key(Self::key(request_id))
            .invoke_async(&mut conn)
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        let record: CeremonyRecord = serde_json::from_str(&raw)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("ceremony deserialize failed: {e}")))?;
        Ok(Some((record.kind, record.payload)))
    }
}

/// In-memory implementation used by tests and local development. Each
/// record's own expiry (`put`'s `ttl`) is stored alongside it and checked
/// lazily on access (no background reaper) since the in-process lifetime of
/// test runs is short and `take`/`put` already check expiry per record.
#[derive(Default)]
pub struct InMemoryCeremonyStore {
    records: Mutex<HashMap<String, (Instant, CeremonyKind, String)>>,
}

impl InMemoryCeremonyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CeremonyStore for InMemoryCeremonyStore {
    async fn put(
        &self,
        request_id: &str,
        kind: CeremonyKind,
        payload: String,
        ttl: Duration,
    ) -> Result<()> {
        let mut records = self.records.lock().await;
        if let Some((expires_at, _, _)) = records.get(request_id) {
            if *expires_at > Instant::now() {
                return Err(AppError::Conflict(format!(
                    "ceremony request_id {request_id} already in use"
                )));
            }
        }
        records.insert(request_id.to_string(), (Instant::now() + ttl, kind, payload));
        Ok(())
    }

    async fn take(&self, request_id: &str) -> Result<Option<(CeremonyKind, String)>> {
        let mut records = self.records.lock().await;
        match records.remove(request_id) {
            Some((expires_at, kind, payload)) => {
                if Instant::now() > expires_at {
                    Ok(None)
                } else {
                    Ok(Some((kind, payload)))
                }
            }
            None => Ok(None),
        }
    }
}

/// Shared ceremony-store handle used by the WebAuthn Ceremony Engine.
pub type SharedCeremonyStore = Arc<dyn CeremonyStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_take_returns_payload_once() {
        let store = InMemoryCeremonyStore::new();
        store
            .put("r1", CeremonyKind::Registration, "payload".into(), Duration::from_secs(300))
            .await
            .unwrap();

        let taken = store.take("r1").await.unwrap();
        assert_eq!(taken, Some((CeremonyKind::Registration, "payload".to_string())));

        // second take is a miss: single-use
        let second = store.take("r1").await.unwrap();
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn take_unknown_id_returns_none() {
        let store = InMemoryCeremonyStore::new();
        assert_eq!(store.take("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_rejects_live_duplicate_with_conflict() {
        let store = InMemoryCeremonyStore::new();
        store
            .put("r1", CeremonyKind::Authentication, "a".into(), Duration::from_secs(300))
            .await
            .unwrap();

        let result = store
            .put("r1", CeremonyKind::Authentication, "b".into(), Duration::from_secs(300))
            .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }
}
