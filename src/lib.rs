//! MedSupply API Library
//!
//! Hospital internal-logistics order engine: department requests are split
//! across the warehouses that stock them, then driven through a role-gated
//! status workflow with an audit trail and a preparation log.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod migrator;
pub mod models;
pub mod services;

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::{
    auth::JwtAuth,
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        catalog::DbCatalog,
        order_number::{OrderNumberGenerator, RetryPolicy},
        orders::OrderService,
        preparation_log::PreparationLogRecorder,
        restrictions::{DbRestrictionOracle, RestrictionOracle, RestrictionService},
    },
};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub orders: Arc<OrderService>,
    pub preparation_logs: Arc<PreparationLogRecorder>,
    pub restrictions: Arc<RestrictionService>,
    pub oracle: Arc<dyn RestrictionOracle>,
    pub auth: Arc<JwtAuth>,
}

impl AppState {
    /// Wires the database-backed services.
    pub fn new(db: Arc<DbPool>, cfg: &AppConfig, event_sender: Option<Arc<EventSender>>) -> Self {
        let oracle: Arc<dyn RestrictionOracle> = Arc::new(DbRestrictionOracle::new(db.clone()));
        let orders = OrderService::new(
            db.clone(),
            Arc::new(DbCatalog::new(db.clone())),
            oracle.clone(),
            OrderNumberGenerator::new(RetryPolicy::from(cfg)),
            event_sender,
        );
        Self {
            orders: Arc::new(orders),
            preparation_logs: Arc::new(PreparationLogRecorder::new(db.clone())),
            restrictions: Arc::new(RestrictionService::new(db.clone())),
            oracle,
            auth: Arc::new(JwtAuth::new(&cfg.jwt_secret)),
            db,
        }
    }
}

impl FromRef<AppState> for Arc<JwtAuth> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

// Common response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(api_status))
        .merge(handlers::orders::order_routes())
        .merge(handlers::preparation_logs::preparation_log_routes())
        .merge(handlers::restrictions::restriction_routes())
}

/// Full application router with request tracing, CORS and a request timeout.
pub fn build_router(state: AppState, cfg: &AppConfig) -> Router {
    let cors = if cfg.is_production() {
        CorsLayer::new()
    } else {
        CorsLayer::permissive()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .nest("/api/v1", api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(cfg.request_timeout_secs)))
        .layer(cors)
        .with_state(state)
}

async fn api_status() -> ApiResult<Value> {
    Ok(Json(ApiResponse::success(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "medsupply-api",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))))
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let healthy = db::check_connection(&state.db).await.is_ok();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "checks": { "database": if healthy { "healthy" } else { "unhealthy" } },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}

async fn metrics_endpoint() -> Result<String, errors::ServiceError> {
    metrics::render()
}
