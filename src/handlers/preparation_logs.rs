use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::require_role;
use crate::{
    auth::AuthenticatedActor,
    entities::order_preparation_log,
    errors::ServiceError,
    models::Role,
    services::preparation_log::{
        PreparationEntry, PreparationStats, UnavailableItemsFilter, UnavailableItemsPage,
    },
    ApiResponse, ApiResult, AppState,
};

pub fn preparation_log_routes() -> Router<AppState> {
    Router::new()
        .route("/preparation-logs/bulk", post(bulk_record))
        .route("/preparation-logs/unavailable", get(unavailable_items))
        .route("/preparation-logs/warehouses/:id/stats", get(warehouse_stats))
        .route("/preparation-logs/staff/:id/recent", get(recent_for_staff))
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct BulkResult {
    pub inserted: u64,
}

pub async fn bulk_record(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(entries): Json<Vec<PreparationEntry>>,
) -> Result<(StatusCode, Json<ApiResponse<BulkResult>>), ServiceError> {
    require_role(&actor, &[Role::Admin], "backfill preparation logs")?;
    let inserted = state.preparation_logs.record_many(entries).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(BulkResult { inserted }))))
}

pub async fn warehouse_stats(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(warehouse_id): Path<Uuid>,
    Query(query): Query<StatsQuery>,
) -> ApiResult<PreparationStats> {
    require_role(&actor, &[Role::Admin, Role::Warehouse], "read warehouse statistics")?;
    if actor.role == Role::Warehouse && actor.warehouse_id.is_some_and(|w| w != warehouse_id) {
        return Err(ServiceError::Forbidden(
            "You can only read statistics of your own warehouse".to_string(),
        ));
    }
    let stats = state
        .preparation_logs
        .warehouse_stats(warehouse_id, query.from, query.to)
        .await?;
    Ok(Json(ApiResponse::success(stats)))
}

pub async fn recent_for_staff(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(staff_id): Path<Uuid>,
    Query(query): Query<RecentQuery>,
) -> ApiResult<Vec<order_preparation_log::Model>> {
    if !(actor.is_admin() || actor.id == staff_id) {
        return Err(ServiceError::Forbidden(
            "You can only read your own preparation activity".to_string(),
        ));
    }
    let logs = state
        .preparation_logs
        .recent_for_staff(staff_id, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(logs)))
}

pub async fn unavailable_items(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Query(filter): Query<UnavailableItemsFilter>,
) -> ApiResult<UnavailableItemsPage> {
    require_role(&actor, &[Role::Admin, Role::Warehouse], "read unavailable items")?;
    let page = state.preparation_logs.unavailable_items(filter).await?;
    Ok(Json(ApiResponse::success(page)))
}
