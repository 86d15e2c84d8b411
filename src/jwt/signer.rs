//! Token Signer (C8) — issues RS256 bearer tokens using the Key Rotation
//! Engine's current active pair. No local caching: every call asks C5 fresh,
//! so a token's `kid` always matches the key that was ACTIVE at issuance.

use crate::error::{AppError, Result};
use crate::keys::rotation::KeyRotationEngine;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

pub struct TokenSigner {
    rotation_engine: Arc<KeyRotationEngine>,
    issuer: String,
    audience: String,
    token_lifetime_secs: i64,
}

impl TokenSigner {
    pub fn new(
        rotation_engine: Arc<KeyRotationEngine>,
        issuer: String,
        audience: String,
        token_lifetime_secs: i64,
    ) -> Self {
        Self {
            rotation_engine,
            issuer,
            audience,
            token_lifetime_secs,
        }
    }

    /// Issues a compact RS256 JWT for `subject`, with `kid` set to the
    /// currently-active signing key's id.
    pub async fn sign(&self, subject: &str) -> Result<String> {
        let pair = self.rotation_engine.get_active_signing_key().await?;

        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            sub: subject.to_string(),
            iat: now,
            exp: now + self.token_lifetime_secs,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(pair.key_id.clone());

        let encoding_key = EncodingKey::from_rsa_pem(pair.private_key_pem.as_bytes())
            .map_err(|e| AppError::KeyBackendFailure(format!("invalid private key PEM: {e}")))?;

        let token = encode(&header, &claims, &encoding_key)
            .map_err(|e| AppError::KeyBackendFailure(format!("JWT signing failed: {e}")))?;

        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyRotationConfig;
    use crate::error::Result as AppResult;
    use crate::model::{JwtSigningKey, KeyAuditRecord, KeyStatus};
    use crate::repository::key_store::KeyRepository;
    use async_trait::async_trait;
    use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Minimal in-memory Key Store used only to exercise the Token Signer
    /// end to end (generate -> encrypt -> store -> decrypt -> sign -> verify).
    #[derive(Default)]
    struct InMemoryKeyRepo {
        keys: Mutex<HashMap<String, JwtSigningKey>>,
    }

    #[async_trait]
    impl KeyRepository for InMemoryKeyRepo {
        async fn save(&self, key: JwtSigningKey) -> AppResult<()> {
            self.keys.lock().unwrap().insert(key.key_id.clone(), key);
            Ok(())
        }
        async fn get(&self, key_id: &str) -> AppResult<Option<JwtSigningKey>> {
            Ok(self.keys.lock().unwrap().get(key_id).cloned())
        }
        async fn get_active(&self) -> AppResult<Option<JwtSigningKey>> {
            Ok(self
                .keys
                .lock()
                .unwrap()
                .values()
                .find(|k| k.status == KeyStatus::Active)
                .cloned())
        }
        async fn list_by_status(&self, status: KeyStatus) -> AppResult<Vec<JwtSigningKey>> {
            Ok(self
                .keys
                .lock()
                .unwrap()
                .values()
                .filter(|k| k.status == status)
                .cloned()
                .collect())
        }
        async fn list_publishable(&self) -> AppResult<Vec<JwtSigningKey>> {
            unimplemented!("not exercised by signer tests")
        }
        async fn update_status(
            &self,
            _key_id: &str,
            _new_status: KeyStatus,
            _timestamp: chrono::DateTime<Utc>,
        ) -> AppResult<()> {
            unimplemented!("not exercised by signer tests")
        }
        async fn update_expiration(
            &self,
            _key_id: &str,
            _expires_at: chrono::DateTime<Utc>,
        ) -> AppResult<()> {
            unimplemented!("not exercised by signer tests")
        }
        async fn delete(&self, _key_id: &str) -> AppResult<()> {
            unimplemented!("not exercised by signer tests")
        }
        async fn audit_log(&self, _key_id: &str) -> AppResult<Vec<KeyAuditRecord>> {
            Ok(vec![])
        }
    }

    fn test_config() -> KeyRotationConfig {
        KeyRotationConfig {
            enabled: false,
            rotation_interval: Duration::from_secs(180 * 86400),
            grace_period: Duration::from_secs(3600),
            retention: Duration::from_secs(3600),
            key_size: 2048,
            key_id_prefix: "webauthn".to_string(),
            master_encryption_key: "test-master-secret".to_string(),
        }
    }

    async fn signer_with_bootstrap() -> TokenSigner {
        let engine = Arc::new(KeyRotationEngine::new(
            Arc::new(InMemoryKeyRepo::default()),
            test_config(),
        ));
        engine.initialize().await.unwrap();

        TokenSigner::new(
            engine,
            "https://rp.example".to_string(),
            "https://rp.example".to_string(),
            900,
        )
    }

    #[tokio::test]
    async fn sign_sets_kid_to_active_key_and_verifies_against_its_public_key() {
        let signer = signer_with_bootstrap().await;
        let token = signer.sign("alice").await.unwrap();

        let header = decode_header(&token).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some("webauthn-2024-01"));

        let active = signer
            .rotation_engine
            .get_active_signing_key()
            .await
            .unwrap();
        let decoding_key = DecodingKey::from_rsa_pem(active.public_key_pem.as_bytes()).unwrap();

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&["https://rp.example"]);
        validation.set_issuer(&["https://rp.example"]);
        let data = decode::<Claims>(&token, &decoding_key, &validation).unwrap();
        assert_eq!(data.claims.sub, "alice");
        assert_eq!(data.claims.exp - data.claims.iat, 900);
    }

    #[tokio::test]
    async fn sign_rejects_wrong_audience_on_verification() {
        let signer = signer_with_bootstrap().await;
        let token = signer.sign("alice").await.unwrap();

        let active = signer
            .rotation_engine
            .get_active_signing_key()
            .await
            .unwrap();
        let decoding_key = DecodingKey::from_rsa_pem(active.public_key_pem.as_bytes()).unwrap();

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&["someone-else"]);
        let result = decode::<Claims>(&token, &decoding_key, &validation);
        assert!(result.is_err());
    }
}
