use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use super::require_role;
use crate::{
    auth::AuthenticatedActor,
    entities::{order_history, order_preparation_log},
    errors::ServiceError,
    models::{OrderStatus, Role},
    services::{
        distribution::RequestedItem,
        orders::{
            CreateOrderRequest, ItemPreparationRequest, OrderDetails, OrderFilter, PreparedLine,
            UpdateOrderRequest,
        },
    },
    ApiResponse, ApiResult, AppState,
};

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_orders).post(create_order))
        .route(
            "/orders/:id",
            get(get_order).put(update_order).delete(delete_order),
        )
        .route("/orders/:id/status", put(update_order_status))
        .route("/orders/:id/history", get(get_order_history))
        .route("/orders/:id/ready", post(mark_ready))
        .route("/orders/:id/preparation/start", post(start_preparation))
        .route("/orders/:id/preparation/items", put(replace_items))
        .route("/orders/:id/preparation/complete", post(complete_preparation))
        .route(
            "/orders/:id/preparation/logs",
            get(get_preparation_logs).post(log_item_preparation),
        )
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderBody {
    /// Admins must name the department; department users default to their own.
    pub department_id: Option<Uuid>,
    pub notes: Option<String>,
    pub items: Vec<RequestedItem>,
}

#[derive(Debug, Deserialize)]
pub struct StatusChangeBody {
    pub status: OrderStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotesBody {
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PreparationBody {
    pub items: Vec<PreparedLine>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderListQuery {
    /// Comma separated, e.g. `PENDING,APPROVED`.
    pub status: Option<String>,
    pub created_by: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub warehouse_id: Option<Uuid>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub limit: Option<u64>,
}

impl TryFrom<OrderListQuery> for OrderFilter {
    type Error = ServiceError;

    fn try_from(query: OrderListQuery) -> Result<Self, Self::Error> {
        let statuses = query
            .status
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        OrderStatus::from_str(s).map_err(|_| {
                            ServiceError::ValidationError(format!("Unknown order status: {s}"))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;

        Ok(OrderFilter {
            statuses,
            created_by: query.created_by,
            department_id: query.department_id,
            warehouse_id: query.warehouse_id,
            date_from: query.date_from,
            date_to: query.date_to,
            limit: query.limit,
        })
    }
}

pub async fn list_orders(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Query(query): Query<OrderListQuery>,
) -> ApiResult<Vec<OrderDetails>> {
    let orders = state.orders.list_orders(&actor, query.try_into()?).await?;
    Ok(Json(ApiResponse::success(orders)))
}

pub async fn create_order(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(body): Json<CreateOrderBody>,
) -> Result<(StatusCode, Json<ApiResponse<Vec<OrderDetails>>>), ServiceError> {
    let department_id = match actor.role {
        Role::Department => {
            let own = actor.department_id.ok_or_else(|| {
                ServiceError::Forbidden("Your account is not linked to a department".to_string())
            })?;
            if body.department_id.is_some_and(|d| d != own) {
                return Err(ServiceError::Forbidden(
                    "You can only order for your own department".to_string(),
                ));
            }
            own
        }
        Role::Admin => body.department_id.ok_or_else(|| {
            ServiceError::ValidationError("department_id is required".to_string())
        })?,
        _ => {
            return Err(ServiceError::Forbidden(
                "Only departments and admins can create orders".to_string(),
            ))
        }
    };

    let created = state
        .orders
        .create_order(CreateOrderRequest {
            department_id,
            requested_by: actor.id,
            notes: body.notes,
            items: body.items,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

pub async fn get_order(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderDetails> {
    let order = state.orders.get_order(&actor, id).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn update_order(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateOrderRequest>,
) -> ApiResult<OrderDetails> {
    let order = state.orders.update_order(id, &actor, body).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn delete_order(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    state.orders.delete_order(id, &actor).await?;
    Ok(Json(ApiResponse::message("Order deleted")))
}

pub async fn update_order_status(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
    Json(body): Json<StatusChangeBody>,
) -> ApiResult<OrderDetails> {
    let order = state
        .orders
        .update_order_status(id, body.status, &actor, body.notes)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn get_order_history(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<order_history::Model>> {
    let history = state.orders.order_history(&actor, id).await?;
    Ok(Json(ApiResponse::success(history)))
}

pub async fn mark_ready(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
    body: Option<Json<NotesBody>>,
) -> ApiResult<OrderDetails> {
    let notes = body.and_then(|Json(b)| b.notes);
    let order = state.orders.mark_ready(id, &actor, notes).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn start_preparation(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
    Json(body): Json<PreparationBody>,
) -> ApiResult<OrderDetails> {
    let order = state
        .orders
        .start_preparation(id, &actor, body.items, body.notes)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn replace_items(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
    Json(body): Json<PreparationBody>,
) -> ApiResult<OrderDetails> {
    let order = state
        .orders
        .replace_items_during_preparation(id, &actor, body.items, body.notes)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn complete_preparation(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
    Json(body): Json<PreparationBody>,
) -> ApiResult<OrderDetails> {
    let order = state
        .orders
        .complete_preparation(id, &actor, body.items, body.notes)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn log_item_preparation(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
    Json(body): Json<ItemPreparationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<order_preparation_log::Model>>), ServiceError> {
    let log = state.orders.log_item_preparation(id, &actor, body).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(log))))
}

pub async fn get_preparation_logs(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<order_preparation_log::Model>> {
    require_role(&actor, &[Role::Admin, Role::Warehouse], "read preparation logs")?;
    // Visibility of the order itself follows the usual read rules.
    state.orders.get_order(&actor, id).await?;
    let logs = state.preparation_logs.order_logs(id).await?;
    Ok(Json(ApiResponse::success(logs)))
}
