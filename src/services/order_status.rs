//! Role-gated status transitions and the audit rows they leave behind.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait,
    EntityTrait, QueryFilter,
};
use tracing::{debug, error};
use uuid::Uuid;

use super::{
    preparation_log::{PreparationEntry, PreparationLogRecorder},
    restrictions::RestrictionOracle,
};
use crate::{
    entities::{order, order_history, order_preparation_log},
    errors::ServiceError,
    models::{Actor, OrderStatus, PreparationAction},
};

/// Rows written by one committed transition.
#[derive(Debug, Clone)]
pub struct AppliedTransition {
    pub from: OrderStatus,
    pub order: order::Model,
    pub history: order_history::Model,
    pub log: Option<order_preparation_log::Model>,
}

pub fn default_transition_note(to: OrderStatus) -> String {
    format!("Status changed to {}", to)
}

/// Text stored on a transition's preparation log when the actor gave none.
pub fn default_log_note(to: OrderStatus) -> &'static str {
    match to {
        OrderStatus::Pending => "Order pending",
        OrderStatus::Approved => "Order approved",
        OrderStatus::Rejected => "Order rejected",
        OrderStatus::Preparing => "Order moved to preparation",
        OrderStatus::Ready => "Order ready for delivery",
        OrderStatus::Delivered => "Order delivered",
    }
}

#[derive(Clone)]
pub struct TransitionEngine {
    oracle: Arc<dyn RestrictionOracle>,
}

impl TransitionEngine {
    pub fn new(oracle: Arc<dyn RestrictionOracle>) -> Self {
        Self { oracle }
    }

    /// Role rules first, then the status table.
    pub async fn authorize(
        &self,
        actor: &Actor,
        current: OrderStatus,
        requested: OrderStatus,
    ) -> Result<(), ServiceError> {
        actor
            .role
            .authorize_transition(actor.id, current, requested, self.oracle.as_ref())
            .await?;
        if !current.can_transition_to(requested) {
            return Err(ServiceError::InvalidTransition {
                from: current,
                to: requested,
            });
        }
        Ok(())
    }
}

/// Appends one history row carrying `status`.
pub async fn append_history<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    status: OrderStatus,
    changed_by: Uuid,
    notes: Option<String>,
) -> Result<order_history::Model, ServiceError> {
    order_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        status: Set(status),
        changed_by: Set(changed_by),
        notes: Set(notes),
        timestamp: Set(Utc::now()),
    }
    .insert(conn)
    .await
    .map_err(|e| {
        error!(error = %e, %order_id, "Failed to append order history");
        ServiceError::db_error(e)
    })
}

/// Bumps `updated_at` on the order, matching the row only while its status is
/// one of `allowed`, then reads it back.
///
/// Run this as the first statement of a transaction: the write takes the row
/// lock before anything is read, so a concurrent change either waits for it or
/// makes it miss. A miss reports the status actually found via `on_mismatch`.
pub async fn guard_status<C, F>(
    conn: &C,
    order_id: Uuid,
    allowed: &[OrderStatus],
    on_mismatch: F,
) -> Result<order::Model, ServiceError>
where
    C: ConnectionTrait,
    F: FnOnce(OrderStatus) -> ServiceError,
{
    let touched = order::Entity::update_many()
        .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::Status.is_in(allowed.iter().copied()))
        .exec(conn)
        .await
        .map_err(|e| {
            error!(error = %e, %order_id, "Failed to lock order");
            ServiceError::db_error(e)
        })?;
    let current = reload(conn, order_id).await?;
    if touched.rows_affected == 0 {
        return Err(on_mismatch(current.status));
    }
    Ok(current)
}

/// Writes `from -> to` onto the order row, conditional on the row still being
/// in `from`. Loses cleanly to a concurrent move with `InvalidTransition`.
pub async fn claim_transition<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    from: OrderStatus,
    to: OrderStatus,
) -> Result<order::Model, ServiceError> {
    if !from.can_transition_to(to) {
        return Err(ServiceError::InvalidTransition { from, to });
    }

    let now = Utc::now();
    let mut update = order::Entity::update_many()
        .col_expr(order::Column::Status, Expr::value(to))
        .col_expr(order::Column::UpdatedAt, Expr::value(now))
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::Status.eq(from));
    if to == OrderStatus::Delivered {
        update = update.col_expr(order::Column::DeliveredAt, Expr::value(now));
    }
    let claimed = update.exec(conn).await.map_err(|e| {
        error!(error = %e, %order_id, "Failed to update order status");
        ServiceError::db_error(e)
    })?;

    let current = reload(conn, order_id).await?;
    if claimed.rows_affected == 0 {
        return Err(ServiceError::InvalidTransition {
            from: current.status,
            to,
        });
    }
    Ok(current)
}

/// History entry and matching preparation log for an order that has just
/// been moved out of `from` by [`claim_transition`].
pub async fn record_transition<C: ConnectionTrait>(
    conn: &C,
    order: order::Model,
    from: OrderStatus,
    changed_by: Uuid,
    notes: Option<String>,
) -> Result<AppliedTransition, ServiceError> {
    let order_id = order.id;
    let to = order.status;

    let history = append_history(
        conn,
        order_id,
        to,
        changed_by,
        Some(notes.clone().unwrap_or_else(|| default_transition_note(to))),
    )
    .await?;

    let log = match (order.warehouse_id, PreparationAction::for_transition(to)) {
        (Some(warehouse_id), Some(action)) => Some(
            PreparationLogRecorder::record_in(
                conn,
                PreparationEntry::order_event(
                    order_id,
                    warehouse_id,
                    changed_by,
                    action,
                    Some(notes.unwrap_or_else(|| default_log_note(to).to_string())),
                ),
            )
            .await?,
        ),
        _ => None,
    };

    debug!(%order_id, %from, %to, "Order status applied");
    Ok(AppliedTransition {
        from,
        order,
        history,
        log,
    })
}

async fn reload<C: ConnectionTrait>(conn: &C, order_id: Uuid) -> Result<order::Model, ServiceError> {
    order::Entity::find_by_id(order_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::not_found("Order", order_id))
}
