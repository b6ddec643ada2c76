//! Gamification Engine API
//!
//! REST server over the gamification engine: event ingest, dry-run, user
//! state, and wallet operations.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Extension, Json, Path};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gamify::catalog::CatalogBuilder;
use gamify::models::{
    Badge, EventDefinition, EventDocument, Level, PointCategory, Rule, Trophy, UserState, Wallet,
    WalletTransfer,
};
use gamify::{DryRunResponse, EngineConfig, IngestAck};

mod error;
mod state;

use error::Result;
use state::AppState;

#[derive(Parser, Debug)]
#[command(name = "gamify-api", about = "Gamification engine API server")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Path to a JSON catalog file loaded at boot.
    #[arg(long)]
    catalog: Option<std::path::PathBuf>,
}

/// On-disk catalog document loaded at boot.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CatalogFile {
    event_definitions: Vec<EventDefinition>,
    point_categories: Vec<PointCategory>,
    badges: Vec<Badge>,
    trophies: Vec<Trophy>,
    levels: Vec<Level>,
    rules: Vec<Rule>,
}

impl CatalogFile {
    fn into_builder(self) -> CatalogBuilder {
        let mut builder = CatalogBuilder::new();
        for definition in self.event_definitions {
            builder = builder.event_definition(definition);
        }
        for category in self.point_categories {
            builder = builder.point_category(category);
        }
        for badge in self.badges {
            builder = builder.badge(badge);
        }
        for trophy in self.trophies {
            builder = builder.trophy(trophy);
        }
        for level in self.levels {
            builder = builder.level(level);
        }
        for rule in self.rules {
            builder = builder.rule(rule);
        }
        builder
    }
}

// API handlers

async fn ingest_event(
    Extension(state): Extension<Arc<AppState>>,
    Json(document): Json<EventDocument>,
) -> Result<(StatusCode, Json<IngestAck>)> {
    let ack = state.engine.ingest(document).await?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

async fn dry_run(
    Extension(state): Extension<Arc<AppState>>,
    Json(document): Json<EventDocument>,
) -> Result<Json<DryRunResponse>> {
    Ok(Json(state.engine.dry_run(document).await?))
}

async fn get_user_state(
    Extension(state): Extension<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<UserState>> {
    Ok(Json(state.engine.user_state(&user_id).await?))
}

async fn get_user_wallets(
    Extension(state): Extension<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Wallet>>> {
    Ok(Json(state.engine.wallets(&user_id).await?))
}

async fn get_wallet(
    Extension(state): Extension<Arc<AppState>>,
    Path((user_id, category)): Path<(String, String)>,
) -> Result<Json<Wallet>> {
    Ok(Json(state.engine.wallet(&user_id, &category).await?))
}

async fn get_user_history(
    Extension(state): Extension<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<gamify::models::RewardHistoryEntry>>> {
    Ok(Json(state.engine.reward_history(&user_id).await?))
}

#[derive(Debug, Deserialize)]
struct SpendRequest {
    amount: i64,
}

async fn spend(
    Extension(state): Extension<Arc<AppState>>,
    Path((user_id, category)): Path<(String, String)>,
    Json(request): Json<SpendRequest>,
) -> Result<Json<Wallet>> {
    Ok(Json(
        state
            .engine
            .spend(&user_id, &category, request.amount)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferRequest {
    from_user_id: String,
    to_user_id: String,
    category: String,
    amount: i64,
}

async fn transfer(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<TransferRequest>,
) -> Result<Json<WalletTransfer>> {
    Ok(Json(
        state
            .engine
            .transfer(
                &request.from_user_id,
                &request.to_user_id,
                &request.category,
                request.amount,
            )
            .await?,
    ))
}

async fn health_check() -> &'static str {
    "OK"
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Event pipeline
        .route("/events", post(ingest_event))
        .route("/dry-run", post(dry_run))
        // User state
        .route("/users/:user_id/state", get(get_user_state))
        .route("/users/:user_id/history", get(get_user_history))
        // Wallet operations
        .route("/users/:user_id/wallets", get(get_user_wallets))
        .route("/users/:user_id/wallets/:category", get(get_wallet))
        .route("/users/:user_id/wallets/:category/spend", post(spend))
        .route("/transfers", post(transfer))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = EngineConfig::from_env();
    let state = AppState::new(config);

    if let Some(path) = &args.catalog {
        let raw = std::fs::read_to_string(path)?;
        let catalog: CatalogFile = serde_json::from_str(&raw)?;
        state
            .engine
            .install_catalog(catalog.into_builder())
            .map_err(|err| anyhow::anyhow!("invalid catalog file: {}", err))?;
        tracing::info!(path = %path.display(), "catalog loaded");
    } else {
        tracing::warn!("no catalog file given, starting with an empty catalog");
    }

    state
        .engine
        .start()
        .await
        .map_err(|err| anyhow::anyhow!("engine startup failed: {}", err))?;

    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!("Listening on {}", args.bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    state.engine.shutdown(Duration::from_secs(10)).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_file_parses_wire_form() {
        let raw = serde_json::json!({
            "pointCategories": [
                {"id": "xp", "name": "Experience", "aggregation": "sum",
                 "allowNegative": false, "allowSpend": true}
            ],
            "badges": [
                {"id": "badge-commenter", "name": "Commenter",
                 "description": "left a comment", "visible": true}
            ],
            "levels": [
                {"id": "bronze", "name": "Bronze", "category": "xp", "minPoints": 0}
            ],
            "rules": [
                {
                    "ruleId": "first-comment",
                    "name": "First comment",
                    "triggers": ["USER_COMMENTED"],
                    "conditions": [
                        {"conditionId": "c1", "type": "firstOccurrence",
                         "parameters": {"eventType": "USER_COMMENTED"}}
                    ],
                    "rewards": [
                        {"rewardId": "rw1", "type": "badge", "targetId": "badge-commenter"}
                    ],
                    "isActive": true,
                    "updatedAt": "2026-01-01T00:00:00Z"
                }
            ]
        });
        let file: CatalogFile = serde_json::from_value(raw).unwrap();
        assert!(file.into_builder().build().is_ok());
    }

    #[test]
    fn spend_request_is_plain_json() {
        let request: SpendRequest = serde_json::from_str(r#"{"amount": 25}"#).unwrap();
        assert_eq!(request.amount, 25);
    }
}
