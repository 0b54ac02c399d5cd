use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use uuid::Uuid;

use super::require_role;
use crate::{
    auth::AuthenticatedActor,
    entities::user_restriction,
    models::Role,
    services::restrictions::{EffectiveRestrictions, RateLimitStatus, UpsertRestrictionRequest},
    ApiResponse, ApiResult, AppState,
};

pub fn restriction_routes() -> Router<AppState> {
    Router::new()
        .route("/restrictions/me/rate-limit", get(my_rate_limit))
        .route(
            "/restrictions/:user_id",
            get(get_restrictions)
                .put(upsert_restrictions)
                .delete(delete_restrictions),
        )
}

#[derive(Debug, Serialize)]
pub struct RestrictionView {
    /// Stored row, absent when the user runs on defaults.
    pub stored: Option<user_restriction::Model>,
    pub effective: EffectiveRestrictions,
}

pub async fn get_restrictions(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(user_id): Path<Uuid>,
) -> ApiResult<RestrictionView> {
    require_role(&actor, &[Role::Admin], "read user restrictions")?;
    let stored = state.restrictions.get(user_id).await?;
    let effective = EffectiveRestrictions::from(stored.clone());
    Ok(Json(ApiResponse::success(RestrictionView { stored, effective })))
}

pub async fn upsert_restrictions(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(user_id): Path<Uuid>,
    Json(body): Json<UpsertRestrictionRequest>,
) -> ApiResult<user_restriction::Model> {
    require_role(&actor, &[Role::Admin], "change user restrictions")?;
    let saved = state.restrictions.upsert(user_id, body).await?;
    Ok(Json(ApiResponse::success(saved)))
}

pub async fn delete_restrictions(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(user_id): Path<Uuid>,
) -> ApiResult<()> {
    require_role(&actor, &[Role::Admin], "remove user restrictions")?;
    state.restrictions.delete(user_id).await?;
    Ok(Json(ApiResponse::message("Restrictions removed")))
}

pub async fn my_rate_limit(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
) -> ApiResult<RateLimitStatus> {
    let status = state.oracle.check_order_rate_limit(actor.id).await?;
    Ok(Json(ApiResponse::success(status)))
}
