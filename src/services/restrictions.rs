use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{order, user_restriction},
    errors::ServiceError,
};

/// Policy questions the workflow asks about a user.
#[async_trait]
pub trait RestrictionOracle: Send + Sync {
    async fn can_approve_orders(&self, user_id: Uuid) -> Result<bool, ServiceError>;
    async fn can_reject_orders(&self, user_id: Uuid) -> Result<bool, ServiceError>;
    async fn can_view_all_orders(&self, user_id: Uuid) -> Result<bool, ServiceError>;
    async fn can_receive_ready_orders(&self, user_id: Uuid) -> Result<bool, ServiceError>;
    async fn can_view_pending_orders(&self, user_id: Uuid) -> Result<bool, ServiceError>;
    async fn check_order_rate_limit(&self, user_id: Uuid) -> Result<RateLimitStatus, ServiceError>;
}

/// Outcome of an order-rate check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub allowed: bool,
    /// `None` when the user has no limit.
    pub remaining: Option<i32>,
    pub limit: Option<i32>,
    pub period_hours: Option<i32>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimitStatus {
    pub fn unlimited() -> Self {
        Self {
            allowed: true,
            remaining: None,
            limit: None,
            period_hours: None,
            reset_at: None,
        }
    }

    /// Turns a denial into `ServiceError::RateLimited`.
    pub fn ensure_allowed(&self) -> Result<(), ServiceError> {
        if self.allowed {
            return Ok(());
        }
        let limit = self.limit.unwrap_or_default();
        let period_hours = self.period_hours.unwrap_or_default();
        Err(ServiceError::RateLimited {
            limit,
            period_hours,
            reset_at: self
                .reset_at
                .unwrap_or_else(|| Utc::now() + Duration::hours(period_hours as i64)),
        })
    }
}

/// Capabilities in force for a user, with defaults applied for users
/// without a restriction row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveRestrictions {
    pub order_rate_limit: Option<i32>,
    pub order_rate_period_hours: Option<i32>,
    pub can_approve_orders: bool,
    pub can_reject_orders: bool,
    pub can_view_all_orders: bool,
    pub can_receive_ready_orders: bool,
    pub can_view_pending_orders: bool,
    pub max_deliveries_per_day: Option<i32>,
}

impl Default for EffectiveRestrictions {
    fn default() -> Self {
        Self {
            order_rate_limit: None,
            order_rate_period_hours: None,
            can_approve_orders: true,
            can_reject_orders: true,
            can_view_all_orders: false,
            can_receive_ready_orders: false,
            can_view_pending_orders: false,
            max_deliveries_per_day: None,
        }
    }
}

impl From<Option<user_restriction::Model>> for EffectiveRestrictions {
    fn from(row: Option<user_restriction::Model>) -> Self {
        match row {
            None => Self::default(),
            Some(r) => Self {
                order_rate_limit: r.order_rate_limit,
                order_rate_period_hours: r.order_rate_period_hours,
                can_approve_orders: r.can_approve_orders,
                can_reject_orders: r.can_reject_orders,
                can_view_all_orders: r.can_view_all_orders,
                can_receive_ready_orders: r.can_receive_ready_orders,
                can_view_pending_orders: r.can_view_pending_orders,
                max_deliveries_per_day: r.max_deliveries_per_day,
            },
        }
    }
}

/// Oracle backed by the `user_restrictions` table.
#[derive(Clone)]
pub struct DbRestrictionOracle {
    db: Arc<DbPool>,
}

impl DbRestrictionOracle {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    async fn effective(&self, user_id: Uuid) -> Result<EffectiveRestrictions, ServiceError> {
        let row = user_restriction::Entity::find()
            .filter(user_restriction::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await
            .map_err(|e| {
                error!(error = %e, %user_id, "Failed to load user restrictions");
                ServiceError::db_error(e)
            })?;
        Ok(row.into())
    }
}

#[async_trait]
impl RestrictionOracle for DbRestrictionOracle {
    async fn can_approve_orders(&self, user_id: Uuid) -> Result<bool, ServiceError> {
        Ok(self.effective(user_id).await?.can_approve_orders)
    }

    async fn can_reject_orders(&self, user_id: Uuid) -> Result<bool, ServiceError> {
        Ok(self.effective(user_id).await?.can_reject_orders)
    }

    async fn can_view_all_orders(&self, user_id: Uuid) -> Result<bool, ServiceError> {
        Ok(self.effective(user_id).await?.can_view_all_orders)
    }

    async fn can_receive_ready_orders(&self, user_id: Uuid) -> Result<bool, ServiceError> {
        Ok(self.effective(user_id).await?.can_receive_ready_orders)
    }

    async fn can_view_pending_orders(&self, user_id: Uuid) -> Result<bool, ServiceError> {
        Ok(self.effective(user_id).await?.can_view_pending_orders)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn check_order_rate_limit(&self, user_id: Uuid) -> Result<RateLimitStatus, ServiceError> {
        let policy = self.effective(user_id).await?;
        let (limit, period_hours) = match (policy.order_rate_limit, policy.order_rate_period_hours)
        {
            (Some(limit), Some(period)) if limit > 0 && period > 0 => (limit, period),
            _ => return Ok(RateLimitStatus::unlimited()),
        };

        let period = Duration::hours(period_hours as i64);
        let window_start = Utc::now() - period;
        let in_window = order::Entity::find()
            .filter(order::Column::CreatedBy.eq(user_id))
            .filter(order::Column::CreatedAt.gte(window_start));

        let count = in_window
            .clone()
            .count(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        let remaining = limit as i64 - count as i64;
        let allowed = remaining > 0;

        let reset_at = if allowed {
            None
        } else {
            in_window
                .order_by_asc(order::Column::CreatedAt)
                .one(&*self.db)
                .await
                .map_err(ServiceError::db_error)?
                .map(|oldest| oldest.created_at + period)
        };

        Ok(RateLimitStatus {
            allowed,
            remaining: Some(remaining.max(0) as i32),
            limit: Some(limit),
            period_hours: Some(period_hours),
            reset_at,
        })
    }
}

/// Body for creating or replacing a user's restriction row. Absent flags keep
/// their current (or default) value; the numeric limits are always replaced.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpsertRestrictionRequest {
    #[validate(range(min = 1, message = "order_rate_limit must be at least 1"))]
    pub order_rate_limit: Option<i32>,
    #[validate(range(min = 1, message = "order_rate_period_hours must be at least 1"))]
    pub order_rate_period_hours: Option<i32>,
    pub can_approve_orders: Option<bool>,
    pub can_reject_orders: Option<bool>,
    pub can_view_all_orders: Option<bool>,
    pub can_receive_ready_orders: Option<bool>,
    pub can_view_pending_orders: Option<bool>,
    #[validate(range(min = 1, message = "max_deliveries_per_day must be at least 1"))]
    pub max_deliveries_per_day: Option<i32>,
}

/// Administration of per-user restriction rows.
#[derive(Clone)]
pub struct RestrictionService {
    db: Arc<DbPool>,
}

impl RestrictionService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    pub async fn get(&self, user_id: Uuid) -> Result<Option<user_restriction::Model>, ServiceError> {
        user_restriction::Entity::find()
            .filter(user_restriction::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Restrictions in force, defaults included.
    pub async fn effective(&self, user_id: Uuid) -> Result<EffectiveRestrictions, ServiceError> {
        Ok(self.get(user_id).await?.into())
    }

    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn upsert(
        &self,
        user_id: Uuid,
        request: UpsertRestrictionRequest,
    ) -> Result<user_restriction::Model, ServiceError> {
        request.validate()?;
        if request.order_rate_limit.is_some() != request.order_rate_period_hours.is_some() {
            return Err(ServiceError::ValidationError(
                "order_rate_limit and order_rate_period_hours must be set together".to_string(),
            ));
        }

        let now = Utc::now();
        let saved = match self.get(user_id).await? {
            Some(existing) => {
                let mut active: user_restriction::ActiveModel = existing.clone().into();
                active.order_rate_limit = Set(request.order_rate_limit);
                active.order_rate_period_hours = Set(request.order_rate_period_hours);
                active.max_deliveries_per_day = Set(request.max_deliveries_per_day);
                active.can_approve_orders =
                    Set(request.can_approve_orders.unwrap_or(existing.can_approve_orders));
                active.can_reject_orders =
                    Set(request.can_reject_orders.unwrap_or(existing.can_reject_orders));
                active.can_view_all_orders =
                    Set(request.can_view_all_orders.unwrap_or(existing.can_view_all_orders));
                active.can_receive_ready_orders = Set(request
                    .can_receive_ready_orders
                    .unwrap_or(existing.can_receive_ready_orders));
                active.can_view_pending_orders = Set(request
                    .can_view_pending_orders
                    .unwrap_or(existing.can_view_pending_orders));
                active.updated_at = Set(now);
                active.update(&*self.db).await
            }
            None => {
                let defaults = EffectiveRestrictions::default();
                user_restriction::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    order_rate_limit: Set(request.order_rate_limit),
                    order_rate_period_hours: Set(request.order_rate_period_hours),
                    can_approve_orders: Set(request
                        .can_approve_orders
                        .unwrap_or(defaults.can_approve_orders)),
                    can_reject_orders: Set(request
                        .can_reject_orders
                        .unwrap_or(defaults.can_reject_orders)),
                    can_view_all_orders: Set(request
                        .can_view_all_orders
                        .unwrap_or(defaults.can_view_all_orders)),
                    can_receive_ready_orders: Set(request
                        .can_receive_ready_orders
                        .unwrap_or(defaults.can_receive_ready_orders)),
                    can_view_pending_orders: Set(request
                        .can_view_pending_orders
                        .unwrap_or(defaults.can_view_pending_orders)),
                    max_deliveries_per_day: Set(request.max_deliveries_per_day),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&*self.db)
                .await
            }
        }
        .map_err(|e| {
            error!(error = %e, "Failed to save user restrictions");
            ServiceError::db_error(e)
        })?;

        info!("User restrictions saved");
        Ok(saved)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn delete(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let result = user_restriction::Entity::delete_many()
            .filter(user_restriction::Column::UserId.eq(user_id))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::not_found("Restrictions for user", user_id));
        }
        info!("User restrictions removed");
        Ok(())
    }
}
