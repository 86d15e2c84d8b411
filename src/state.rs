//! Shared application state threaded through axum handlers via `State`.

use crate::config::Config;
use crate::jwt::signer::TokenSigner;
use crate::keys::{JwksPublisher, KeyRotationEngine};
use crate::webauthn::WebAuthnCeremonyEngine;
use redis::aio::ConnectionManager as RedisConnectionManager;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db_pool: PgPool,
    pub redis: RedisConnectionManager,
    pub ceremony_engine: Arc<WebAuthnCeremonyEngine>,
    pub rotation_engine: Arc<KeyRotationEngine>,
    pub token_signer: Arc<TokenSigner>,
    pub jwks_publisher: Arc<JwksPublisher>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        db_pool: PgPool,
        redis: RedisConnectionManager,
        ceremony_engine: Arc<WebAuthnCeremonyEngine>,
        rotation_engine: Arc<KeyRotationEngine>,
        token_signer: Arc<TokenSigner>,
        jwks_publisher: Arc<JwksPublisher>,
    ) -> Self {
        Self {
            config,
            db_pool,
            redis,
            ceremony_engine,
            rotation_engine,
            token_signer,
            jwks_publisher,
        }
    }

    /// `/ready` pings both the database pool and Redis connection; a 503 on
    /// either tells an orchestrator to stop routing traffic here.
    pub async fn check_ready(&self) -> (bool, bool) {
        let db_ok = sqlx::query("SELECT 1").execute(&self.db_pool).await.is_ok();
        let mut redis_conn = self.redis.clone();
        let cache_ok = redis::cmd("PING")
            .query_async::<String>(&mut redis_conn)
            .await
            .is_ok();
        (db_ok, cache_ok)
    }
}
