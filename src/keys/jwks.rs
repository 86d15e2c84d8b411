//! JWKS Publisher (C7) — builds the JSON Web Key Set view from the Key
//! Store. PENDING keys are never published.

use crate::error::{AppError, Result};
use crate::model::KeyStatus;
use crate::repository::key_store::KeyRepository;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Jwk {
    pub kty: &'static str,
    #[serde(rename = "use")]
    pub use_: &'static str,
    pub alg: &'static str,
    pub kid: String,
    pub n: String,
    pub e: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

pub struct JwksPublisher {
    repo: Arc<dyn KeyRepository>,
}

impl JwksPublisher {
    pub fn new(repo: Arc<dyn KeyRepository>) -> Self {
        Self { repo }
    }

    /// Emits one JWK per publishable record (ACTIVE first, then RETIRED
    /// newest-first — the ordering is already guaranteed by
    /// `list_publishable`).
    pub async fn current_jwks(&self) -> Result<Jwks> {
        let records = self.repo.list_publishable().await?;

        debug_assert!(
            records.iter().all(|r| r.status != KeyStatus::Pending),
            "list_publishable must never surface a PENDING key"
        );

        let keys = records
            .into_iter()
            .map(|record| jwk_from_public_key_pem(&record.key_id, &record.public_key_pem))
            .collect::<Result<Vec<_>>>()?;

        Ok(Jwks { keys })
    }
}

fn jwk_from_public_key_pem(kid: &str, public_key_pem: &str) -> Result<Jwk> {
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| AppError::KeyBackendFailure(format!("invalid stored public key: {e}")))?;

    let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
    let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());

    Ok(Jwk {
        kty: "RSA",
        use_: "sig",
        alg: "RS256",
        kid: kid.to_string(),
        n,
        e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JwtSigningKey;
    use crate::repository::key_store::MockKeyRepository;
    use chrono::Utc;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};
    use rsa::RsaPrivateKey;

    fn test_key_record(key_id: &str, status: KeyStatus) -> JwtSigningKey {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public_pem = RsaPublicKey::from(&private)
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        JwtSigningKey {
            key_id: key_id.to_string(),
            private_key_encrypted: "unused".to_string(),
            public_key_pem: public_pem,
            algorithm: "RS256".to_string(),
            key_size: 2048,
            status,
            created_at: Utc::now(),
            activated_at: Some(Utc::now()),
            retired_at: None,
            expires_at: None,
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn jwks_contains_active_and_retired_kids() {
        let mut mock = MockKeyRepository::new();
        mock.expect_list_publishable().returning(|| {
            Ok(vec![
                test_key_record("k2", KeyStatus::Active),
                test_key_record("k1", KeyStatus::Retired),
            ])
        });

        let publisher = JwksPublisher::new(Arc::new(mock));
        let jwks = publisher.current_jwks().await.unwrap();

        let kids: Vec<&str> = jwks.keys.iter().map(|k| k.kid.as_str()).collect();
        assert_eq!(kids, vec!["k2", "k1"]);
        for key in &jwks.keys {
            assert_eq!(key.kty, "RSA");
            assert_eq!(key.use_, "sig");
            assert_eq!(key.alg, "RS256");
        }
    }

    #[tokio::test]
    async fn jwks_empty_when_no_publishable_keys() {
        let mut mock = MockKeyRepository::new();
        mock.expect_list_publishable().returning(|| Ok(vec![]));

        let publisher = JwksPublisher::new(Arc::new(mock));
        let jwks = publisher.current_jwks().await.unwrap();
        assert!(jwks.keys.is_empty());
    }
}
