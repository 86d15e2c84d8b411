//! Key Store (C3) — durable JWT signing keys with a single-ACTIVE invariant
//! and an append-only audit log. Every mutation writes its audit entry in the
//! same transaction as the data change.

use crate::error::{AppError, Result};
use crate::model::{JwtSigningKey, KeyAuditEvent, KeyAuditRecord, KeyStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyRepository: Send + Sync {
    /// Inserts a new key (always PENDING or, for bootstrap, ACTIVE). Rejects
    /// ACTIVE inserts that would create a second ACTIVE row.
    async fn save(&self, key: JwtSigningKey) -> Result<()>;

    async fn get(&self, key_id: &str) -> Result<Option<JwtSigningKey>>;

    async fn get_active(&self) -> Result<Option<JwtSigningKey>>;

    async fn list_by_status(&self, status: KeyStatus) -> Result<Vec<JwtSigningKey>>;

    /// ACTIVE first, then RETIRED newest-first. PENDING and DELETED excluded.
    async fn list_publishable(&self) -> Result<Vec<JwtSigningKey>>;

    async fn update_status(
        &self,
        key_id: &str,
        new_status: KeyStatus,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;

    async fn update_expiration(&self, key_id: &str, expires_at: DateTime<Utc>) -> Result<()>;

    async fn delete(&self, key_id: &str) -> Result<()>;

    async fn audit_log(&self, key_id: &str) -> Result<Vec<KeyAuditRecord>>;
}

pub struct PgKeyRepository {
    pool: PgPool,
}

impl PgKeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn audit_event_for(status: KeyStatus) -> KeyAuditEvent {
        match status {
            KeyStatus::Pending => KeyAuditEvent::Generated,
            KeyStatus::Active => KeyAuditEvent::Activated,
            KeyStatus::Retired => KeyAuditEvent::Retired,
            KeyStatus::Deleted => KeyAuditEvent::Deleted,
        }
    }
}

#[async_trait]
impl KeyRepository for PgKeyRepository {
    async fn save(&self, key: JwtSigningKey) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if key.status == KeyStatus::Active {
            let existing: Option<(String,)> =
                sqlx::query_as("SELECT key_id FROM jwt_signing_keys WHERE status = 'ACTIVE'")
                    .fetch_optional(&mut *tx)
                    .await?;
            if existing.is_some() {
                return Err(AppError::Conflict(
                    "an ACTIVE key already exists".to_string(),
                ));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO jwt_signing_keys
                (key_id, private_key_encrypted, public_key_pem, algorithm, key_size, status,
                 created_at, activated_at, retired_at, expires_at, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&key.key_id)
        .bind(&key.private_key_encrypted)
        .bind(&key.public_key_pem)
        .bind(&key.algorithm)
        .bind(key.key_size)
        .bind(key.status)
        .bind(key.created_at)
        .bind(key.activated_at)
        .bind(key.retired_at)
        .bind(key.expires_at)
        .bind(&key.metadata)
        .execute(&mut *tx)
        .await?;

        insert_audit(&mut tx, &key.key_id, Self::audit_event_for(key.status), &key.metadata).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, key_id: &str) -> Result<Option<JwtSigningKey>> {
        let row = sqlx::query_as::<_, JwtSigningKey>(
            r#"
            SELECT key_id, private_key_encrypted, public_key_pem, algorithm, key_size, status,
                   created_at, activated_at, retired_at, expires_at, metadata
            FROM jwt_signing_keys WHERE key_id = $1
            "#,
        )
        .bind(key_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_active(&self) -> Result<Option<JwtSigningKey>> {
        let row = sqlx::query_as::<_, JwtSigningKey>(
            r#"
            SELECT key_id, private_key_encrypted, public_key_pem, algorithm, key_size, status,
                   created_at, activated_at, retired_at, expires_at, metadata
            FROM jwt_signing_keys WHERE status = 'ACTIVE'
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_by_status(&self, status: KeyStatus) -> Result<Vec<JwtSigningKey>> {
        let rows = sqlx::query_as::<_, JwtSigningKey>(
            r#"
            SELECT key_id, private_key_encrypted, public_key_pem, algorithm, key_size, status,
                   created_at, activated_at, retired_at, expires_at, metadata
            FROM jwt_signing_keys WHERE status = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_publishable(&self) -> Result<Vec<JwtSigningKey>> {
        let rows = sqlx::query_as::<_, JwtSigningKey>(
            r#"
            SELECT key_id, private_key_encrypted, public_key_pem, algorithm, key_size, status,
                   created_at, activated_at, retired_at, expires_at, metadata
            FROM jwt_signing_keys
            WHERE status IN ('ACTIVE', 'RETIRED')
            ORDER BY (status = 'ACTIVE') DESC, retired_at DESC NULLS LAST, created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn update_status(
        &self,
        key_id: &str,
        new_status: KeyStatus,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(KeyStatus,)> =
            sqlx::query_as("SELECT status FROM jwt_signing_keys WHERE key_id = $1")
                .bind(key_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((current_status,)) = current else {
            return Err(AppError::KeyBackendFailure(format!("unknown key {key_id}")));
        };
        if !current_status.can_transition_to(new_status) {
            return Err(AppError::KeyBackendFailure(format!(
                "illegal transition {current_status} -> {new_status} for key {key_id}"
            )));
        }

        if new_status == KeyStatus::Active {
            let existing: Option<(String,)> = sqlx::query_as(
                "SELECT key_id FROM jwt_signing_keys WHERE status = 'ACTIVE' AND key_id != $1",
            )
            .bind(key_id)
            .fetch_optional(&mut *tx)
            .await?;
            if existing.is_some() {
                return Err(AppError::Conflict(
                    "an ACTIVE key already exists".to_string(),
                ));
            }
        }

        match new_status {
            KeyStatus::Active => {
                sqlx::query(
                    "UPDATE jwt_signing_keys SET status = $2, activated_at = $3 WHERE key_id = $1",
                )
                .bind(key_id)
                .bind(new_status)
                .bind(timestamp)
                .execute(&mut *tx)
                .await?;
            }
            KeyStatus::Retired => {
                sqlx::query(
                    "UPDATE jwt_signing_keys SET status = $2, retired_at = $3 WHERE key_id = $1",
                )
                .bind(key_id)
                .bind(new_status)
                .bind(timestamp)
                .execute(&mut *tx)
                .await?;
            }
            _ => {
                sqlx::query("UPDATE jwt_signing_keys SET status = $2 WHERE key_id = $1")
                    .bind(key_id)
                    .bind(new_status)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        insert_audit(
            &mut tx,
            key_id,
            Self::audit_event_for(new_status),
            &serde_json::json!({}),
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_expiration(&self, key_id: &str, expires_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE jwt_signing_keys SET expires_at = $2 WHERE key_id = $1")
            .bind(key_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, key_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM jwt_signing_keys WHERE key_id = $1")
            .bind(key_id)
            .execute(&mut *tx)
            .await?;
        insert_audit(&mut tx, key_id, KeyAuditEvent::Deleted, &serde_json::json!({})).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn audit_log(&self, key_id: &str) -> Result<Vec<KeyAuditRecord>> {
        let rows = sqlx::query_as::<_, KeyAuditRecord>(
            r#"
            SELECT id, key_id, event, timestamp, metadata
            FROM jwt_key_audit_log WHERE key_id = $1 ORDER BY timestamp ASC
            "#,
        )
        .bind(key_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

async fn insert_audit(
    tx: &mut sqlx::PgConnection,
    key_id: &str,
    event: KeyAuditEvent,
    metadata: &serde_json::Value,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO jwt_key_audit_log (key_id, event, timestamp, metadata) VALUES ($1, $2, NOW(), $3)",
    )
    .bind(key_id)
    .bind(event)
    .bind(metadata)
    .execute(&mut *tx)
    .await?;
    Ok(())
}
