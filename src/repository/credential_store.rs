//! Credential Store (C2) — durable per-user credential records.

use crate::error::{AppError, Result};
use crate::model::{Credential, NewCredential};
use async_trait::async_trait;
use sqlx::PgPool;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Fails with `CredentialAlreadyExists` on a duplicate `credential_id`.
    async fn insert(&self, credential: NewCredential) -> Result<Credential>;

    async fn lookup_by_credential_id(&self, credential_id: &[u8]) -> Result<Option<Credential>>;

    /// Order unspecified; empty on unknown username — the store never
    /// distinguishes "no such user" from "no credentials" (enumeration
    /// resistance is enforced one layer up, in the ceremony engine).
    async fn lookup_by_username(&self, username: &str) -> Result<Vec<Credential>>;

    /// Fails with `CounterRegression` if `new_count < current`.
    async fn update_signature_counter(&self, credential_id: &[u8], new_count: i64) -> Result<()>;
}

pub struct PgCredentialRepository {
    pool: PgPool,
}

impl PgCredentialRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialRepository for PgCredentialRepository {
    async fn insert(&self, credential: NewCredential) -> Result<Credential> {
        let row = sqlx::query_as::<_, Credential>(
            r#"
            INSERT INTO credentials
                (credential_id, user_handle, username, display_name, public_key_cose, signature_count, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING credential_id, user_handle, username, display_name, public_key_cose, signature_count, created_at
            "#,
        )
        .bind(&credential.credential_id)
        .bind(&credential.user_handle)
        .bind(&credential.username)
        .bind(&credential.display_name)
        .bind(&credential.public_key_cose)
        .bind(credential.signature_count)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                AppError::CredentialAlreadyExists
            }
            _ => AppError::Database(e),
        })?;

        Ok(row)
    }

    async fn lookup_by_credential_id(&self, credential_id: &[u8]) -> Result<Option<Credential>> {
        let row = sqlx::query_as::<_, Credential>(
            r#"
            SELECT credential_id, user_handle, username, display_name, public_key_cose, signature_count, created_at
            FROM credentials
            WHERE credential_id = $1
            "#,
        )
        .bind(credential_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn lookup_by_username(&self, username: &str) -> Result<Vec<Credential>> {
        let rows = sqlx::query_as::<_, Credential>(
            r#"
            SELECT credential_id, user_handle, username, display_name, public_key_cose, signature_count, created_at
            FROM credentials
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn update_signature_counter(&self, credential_id: &[u8], new_count: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET signature_count = $2
            WHERE credential_id = $1 AND signature_count <= $2
            "#,
        )
        .bind(credential_id)
        .bind(new_count)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Either the credential doesn't exist, or the conditional update
            // lost because new_count < current: distinguish by re-reading.
            let current = self.lookup_by_credential_id(credential_id).await?;
            return match current {
                Some(existing) if existing.signature_count > new_count => {
                    Err(AppError::CounterRegression {
                        credential_id: hex_id(credential_id),
                    })
                }
                Some(_) => Ok(()), // new_count == current already, no-op
                None => Err(AppError::Internal(anyhow::anyhow!(
                    "update_signature_counter: credential not found"
                ))),
            };
        }

        Ok(())
    }
}

fn hex_id(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_id_formats_bytes() {
        assert_eq!(hex_id(&[0xde, 0xad, 0xbe, 0xef]), "deadbeef");
    }
}
