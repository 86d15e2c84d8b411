//! Server initialization and routing.

use crate::ceremony::RedisCeremonyStore;
use crate::config::Config;
use crate::handlers;
use crate::jwt::signer::TokenSigner;
use crate::keys::{JwksPublisher, KeyRotationEngine, RotationScheduler};
use crate::repository::credential_store::PgCredentialRepository;
use crate::repository::key_store::PgKeyRepository;
use crate::state::AppState;
use crate::webauthn::WebAuthnCeremonyEngine;
use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use redis::aio::ConnectionManager as RedisConnectionManager;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use webauthn_rs::prelude::WebauthnBuilder;

/// Wires every component (C1-C9) together and serves the HTTP surface until
/// the process receives a shutdown signal.
pub async fn run(config: Config) -> Result<()> {
    let config = Arc::new(config);

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_pool_size)
        .connect(&config.database.connection_string())
        .await
        .context("failed to connect to the database")?;

    let redis_client = redis::Client::open(config.redis.connection_string())
        .context("failed to build redis client")?;
    let redis_conn = RedisConnectionManager::new(redis_client)
        .await
        .context("failed to connect to redis")?;

    let credential_repo = Arc::new(PgCredentialRepository::new(db_pool.clone()));
    let key_repo = Arc::new(PgKeyRepository::new(db_pool.clone()));
    let ceremony_store = Arc::new(RedisCeremonyStore::new(redis_conn.clone()));

    let rotation_engine = Arc::new(KeyRotationEngine::new(
        key_repo.clone(),
        config.key_rotation.clone(),
    ));
    rotation_engine
        .initialize()
        .await
        .context("failed to bootstrap the signing key")?;

    let scheduler = Arc::new(RotationScheduler::new(
        rotation_engine.clone(),
        config.key_rotation.rotation_interval,
    ));
    scheduler.start().await;

    let token_signer = Arc::new(TokenSigner::new(
        rotation_engine.clone(),
        config.token_issuer.clone(),
        config.token_audience.clone(),
        config.token_lifetime_secs,
    ));
    let jwks_publisher = Arc::new(JwksPublisher::new(key_repo.clone()));

    let rp_origin = config
        .relying_party
        .origin_url()
        .context("failed to derive relying party origin")?;
    let webauthn = Arc::new(
        WebauthnBuilder::new(&config.relying_party.id, &rp_origin)
            .context("invalid relying party configuration")?
            .rp_name(&config.relying_party.name)
            .build()
            .context("failed to build webauthn context")?,
    );

    let ceremony_engine = Arc::new(WebAuthnCeremonyEngine::new(
        webauthn,
        ceremony_store,
        credential_repo,
        token_signer.clone(),
    ));

    let state = AppState::new(
        config.clone(),
        db_pool,
        redis_conn,
        ceremony_engine,
        rotation_engine,
        token_signer,
        jwks_publisher,
    );

    let app = build_router(state);

    let addr = "0.0.0.0:8080";
    let listener = TcpListener::bind(addr).await.context("failed to bind listener")?;
    info!(addr, "webauthn relying-party service listening");

    axum::serve(listener, app)
        .await
        .context("server error")?;

    scheduler.stop().await;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/register/start", post(handlers::register_start))
        .route("/register/complete", post(handlers::register_complete))
        .route("/authenticate/start", post(handlers::authenticate_start))
        .route(
            "/authenticate/complete",
            post(handlers::authenticate_complete),
        )
        .route("/.well-known/jwks.json", get(handlers::jwks))
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/live", get(handlers::live))
        .route("/metrics", get(handlers::metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(30)))
                .layer(cors),
        )
        .with_state(state)
}
