//! Key Rotation Engine (C5) — owns the JWT signing-key state machine,
//! generates/retires keys, and caches the decrypted active signing pair.

use crate::config::KeyRotationConfig;
use crate::crypto::{self, MasterKey};
use crate::error::{AppError, Result};
use crate::model::{JwtSigningKey, KeyStatus};
use crate::repository::key_store::KeyRepository;
use chrono::{DateTime, Utc};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Deterministic bootstrap key id, preserved for clients that cached it
/// historically (see SPEC_FULL.md Open Questions §C.1).
pub const BOOTSTRAP_KEY_ID: &str = "webauthn-2024-01";

/// A decrypted RSA key pair held only inside the active-key cache.
#[derive(Clone)]
pub struct SigningKeyPair {
    pub key_id: String,
    pub private_key_pem: String,
    pub public_key_pem: String,
}

/// Single-slot atomic cache for the decrypted active signing pair.
/// Invalidated on any key state change; readers race-read and one loader wins.
struct ActiveKeyCache {
    slot: RwLock<Option<SigningKeyPair>>,
}

impl ActiveKeyCache {
    fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    async fn get(&self) -> Option<SigningKeyPair> {
        self.slot.read().await.clone()
    }

    async fn set(&self, pair: SigningKeyPair) {
        *self.slot.write().await = Some(pair);
    }

    async fn invalidate(&self) {
        *self.slot.write().await = None;
    }
}

pub struct KeyRotationEngine {
    repo: Arc<dyn KeyRepository>,
    config: KeyRotationConfig,
    master_key: MasterKey,
    cache: ActiveKeyCache,
}

impl KeyRotationEngine {
    pub fn new(repo: Arc<dyn KeyRepository>, config: KeyRotationConfig) -> Self {
        let master_key = MasterKey::derive(&config.master_encryption_key);
        Self {
            repo,
            config,
            master_key,
            cache: ActiveKeyCache::new(),
        }
    }

    /// If no ACTIVE key exists, generates one directly into ACTIVE under the
    /// deterministic bootstrap id. Idempotent.
    pub async fn initialize(&self) -> Result<()> {
        if self.repo.get_active().await?.is_some() {
            return Ok(());
        }
        if self.repo.get(BOOTSTRAP_KEY_ID).await?.is_some() {
            // Bootstrap id exists but isn't ACTIVE (e.g. previously retired);
            // do not mint a duplicate, leave rotation to take its course.
            return Ok(());
        }

        let (private_pem, public_pem) = generate_rsa_pair(self.config.key_size)?;
        let encrypted = crypto::encrypt_to_string(&self.master_key, &private_pem)
            .map_err(|_| AppError::DecryptionFailure)?;

        let now = Utc::now();
        let key = JwtSigningKey {
            key_id: BOOTSTRAP_KEY_ID.to_string(),
            private_key_encrypted: encrypted,
            public_key_pem: public_pem,
            algorithm: "RS256".to_string(),
            key_size: self.config.key_size as i32,
            status: KeyStatus::Active,
            created_at: now,
            activated_at: Some(now),
            retired_at: None,
            expires_at: None,
            metadata: serde_json::json!({ "rotation_reason": "bootstrap" }),
        };
        self.repo.save(key).await?;
        tracing::info!(key_id = BOOTSTRAP_KEY_ID, "bootstrapped ACTIVE signing key");
        Ok(())
    }

    /// Returns the cached active pair, loading and decrypting from the store
    /// on cache miss.
    pub async fn get_active_signing_key(&self) -> Result<SigningKeyPair> {
        if let Some(pair) = self.cache.get().await {
            return Ok(pair);
        }

        let active = self
            .repo
            .get_active()
            .await?
            .ok_or_else(|| AppError::KeyBackendFailure("no ACTIVE signing key".to_string()))?;

        let private_key_pem = crypto::decrypt_from_string(&self.master_key, &active.private_key_encrypted)
            .map_err(|_| AppError::DecryptionFailure)?;

        let pair = SigningKeyPair {
            key_id: active.key_id,
            private_key_pem,
            public_key_pem: active.public_key_pem,
        };
        self.cache.set(pair.clone()).await;
        Ok(pair)
    }

    /// Creates a PENDING key and persists it. Does not touch the ACTIVE key.
    pub async fn rotate(&self, reason: &str) -> Result<String> {
        let previous_key_id = self.repo.get_active().await?.map(|k| k.key_id);

        let (private_pem, public_pem) = generate_rsa_pair(self.config.key_size)?;
        let encrypted = crypto::encrypt_to_string(&self.master_key, &private_pem)
            .map_err(|_| AppError::DecryptionFailure)?;

        let key_id = format!(
            "{}-{}",
            self.config.key_id_prefix,
            Utc::now().format("%Y-%m-%d-%H%M%S")
        );

        let key = JwtSigningKey {
            key_id: key_id.clone(),
            private_key_encrypted: encrypted,
            public_key_pem: public_pem,
            algorithm: "RS256".to_string(),
            key_size: self.config.key_size as i32,
            status: KeyStatus::Pending,
            created_at: Utc::now(),
            activated_at: None,
            retired_at: None,
            expires_at: None,
            metadata: serde_json::json!({
                "rotation_reason": reason,
                "previous_key_id": previous_key_id,
            }),
        };
        self.repo.save(key).await?;
        tracing::info!(key_id = %key_id, reason, "generated PENDING signing key");
        Ok(key_id)
    }

    /// Rotates if the ACTIVE key's age meets or exceeds `rotation_interval`,
    /// then always runs `cleanup_expired_keys`.
    pub async fn check_and_rotate_if_needed(&self) -> Result<()> {
        if !self.config.enabled {
            self.cleanup_expired_keys().await?;
            return Ok(());
        }

        if let Some(active) = self.repo.get_active().await? {
            let age = active.age(Utc::now());
            let interval = chrono::Duration::from_std(self.config.rotation_interval)
                .unwrap_or(chrono::Duration::zero());
            if age >= interval {
                self.rotate("Automatic rotation").await?;
            }
        }

        self.cleanup_expired_keys().await?;
        Ok(())
    }

    /// Activates every PENDING key whose age has reached `grace_period`.
    /// Skipped entirely if rotation is disabled.
    pub async fn check_and_activate_pending_keys(&self) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let grace_period = chrono::Duration::from_std(self.config.grace_period)
            .unwrap_or(chrono::Duration::zero());
        let now = Utc::now();

        let pending = self.repo.list_by_status(KeyStatus::Pending).await?;
        for key in pending {
            if now - key.created_at >= grace_period {
                self.activate(&key.key_id).await?;
            }
        }
        Ok(())
    }

    /// Deletes every RETIRED key whose `expires_at` has passed.
    pub async fn cleanup_expired_keys(&self) -> Result<()> {
        let now = Utc::now();
        let retired = self.repo.list_by_status(KeyStatus::Retired).await?;
        for key in retired {
            if let Some(expires_at) = key.expires_at {
                if now > expires_at {
                    self.repo.delete(&key.key_id).await?;
                    tracing::info!(key_id = %key.key_id, "deleted expired RETIRED key");
                }
            }
        }
        Ok(())
    }

    /// Retire-then-activate, in that order (the single-ACTIVE invariant would
    /// otherwise be briefly violated), then invalidate the cache.
    async fn activate(&self, pending_key_id: &str) -> Result<()> {
        let now: DateTime<Utc> = Utc::now();
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or(chrono::Duration::zero());

        if let Some(active) = self.repo.get_active().await? {
            self.repo
                .update_status(&active.key_id, KeyStatus::Retired, now)
                .await?;
            self.repo
                .update_expiration(&active.key_id, now + retention)
                .await?;
        }

        self.repo
            .update_status(pending_key_id, KeyStatus::Active, now)
            .await?;

        self.cache.invalidate().await;
        tracing::info!(key_id = %pending_key_id, "activated PENDING key");
        Ok(())
    }
}

fn generate_rsa_pair(key_size: u32) -> Result<(String, String)> {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, key_size as usize)
        .map_err(|e| AppError::KeyBackendFailure(format!("RSA key generation failed: {e}")))?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_pem = private_key
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| AppError::KeyBackendFailure(format!("PKCS1 PEM encode failed: {e}")))?
        .to_string();
    let public_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| AppError::KeyBackendFailure(format!("public key PEM encode failed: {e}")))?;

    Ok((private_pem, public_pem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::key_store::MockKeyRepository;
    use std::time::Duration as StdDuration;

    fn test_config() -> KeyRotationConfig {
        KeyRotationConfig {
            enabled: true,
            rotation_interval: StdDuration::from_secs(30),
            grace_period: StdDuration::from_secs(15),
            retention: StdDuration::from_secs(30),
            key_size: 2048,
            key_id_prefix: "webauthn".to_string(),
            master_encryption_key: "test-master-secret".to_string(),
        }
    }

    #[tokio::test]
    async fn initialize_bootstraps_when_empty() {
        let mut mock = MockKeyRepository::new();
        mock.expect_get_active().returning(|| Ok(None));
        mock.expect_get()
            .withf(|id| id == BOOTSTRAP_KEY_ID)
            .returning(|_| Ok(None));
        mock.expect_save().returning(|key| {
            assert_eq!(key.key_id, BOOTSTRAP_KEY_ID);
            assert_eq!(key.status, KeyStatus::Active);
            Ok(())
        });

        let engine = KeyRotationEngine::new(Arc::new(mock), test_config());
        engine.initialize().await.unwrap();
    }

    #[tokio::test]
    async fn initialize_is_idempotent_when_active_exists() {
        let mut mock = MockKeyRepository::new();
        mock.expect_get_active().returning(|| {
            Ok(Some(JwtSigningKey {
                key_id: "k1".to_string(),
                private_key_encrypted: "x".to_string(),
                public_key_pem: "y".to_string(),
                algorithm: "RS256".to_string(),
                key_size: 2048,
                status: KeyStatus::Active,
                created_at: Utc::now(),
                activated_at: Some(Utc::now()),
                retired_at: None,
                expires_at: None,
                metadata: serde_json::json!({}),
            }))
        });
        // save() must never be called
        let engine = KeyRotationEngine::new(Arc::new(mock), test_config());
        engine.initialize().await.unwrap();
    }

    #[tokio::test]
    async fn check_and_activate_pending_keys_skips_when_rotation_disabled() {
        let mut config = test_config();
        config.enabled = false;
        let mock = MockKeyRepository::new(); // expects no calls
        let engine = KeyRotationEngine::new(Arc::new(mock), config);
        engine.check_and_activate_pending_keys().await.unwrap();
    }

    #[tokio::test]
    async fn pending_key_younger_than_grace_period_is_not_activated() {
        let mut mock = MockKeyRepository::new();
        mock.expect_list_by_status()
            .withf(|s| *s == KeyStatus::Pending)
            .returning(|_| {
                Ok(vec![JwtSigningKey {
                    key_id: "p1".to_string(),
                    private_key_encrypted: "x".to_string(),
                    public_key_pem: "y".to_string(),
                    algorithm: "RS256".to_string(),
                    key_size: 2048,
                    status: KeyStatus::Pending,
                    created_at: Utc::now(), // age 0, grace period is 15s
                    activated_at: None,
                    retired_at: None,
                    expires_at: None,
                    metadata: serde_json::json!({}),
                }])
            });
        // get_active/update_status must never be called since nothing activates
        let engine = KeyRotationEngine::new(Arc::new(mock), test_config());
        engine.check_and_activate_pending_keys().await.unwrap();
    }
}
