use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait,
    EntityTrait, Order as SortDirection, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{item, order, order_preparation_log as prep_log},
    errors::ServiceError,
    metrics,
    models::PreparationAction,
};

pub const RECENT_LOGS_DEFAULT_LIMIT: u64 = 50;
pub const UNAVAILABLE_DEFAULT_PAGE: u64 = 1;
pub const UNAVAILABLE_DEFAULT_LIMIT: u64 = 10;

/// One preparation event to be recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparationEntry {
    pub order_id: Uuid,
    pub warehouse_id: Uuid,
    pub prepared_by: Uuid,
    pub item_name: Option<String>,
    pub action: PreparationAction,
    pub requested_qty: Option<i32>,
    pub available_qty: Option<i32>,
    pub notes: Option<String>,
}

impl PreparationEntry {
    /// An order-level event (approval, completion, ...).
    pub fn order_event(
        order_id: Uuid,
        warehouse_id: Uuid,
        prepared_by: Uuid,
        action: PreparationAction,
        notes: Option<String>,
    ) -> Self {
        Self {
            order_id,
            warehouse_id,
            prepared_by,
            item_name: None,
            action,
            requested_qty: None,
            available_qty: None,
            notes,
        }
    }

    fn merges(&self) -> Option<&str> {
        if self.action.is_item_decision() {
            self.item_name.as_deref()
        } else {
            None
        }
    }

    fn into_active_model(self, at: DateTime<Utc>) -> prep_log::ActiveModel {
        prep_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(self.order_id),
            warehouse_id: Set(self.warehouse_id),
            prepared_by: Set(self.prepared_by),
            item_name: Set(self.item_name),
            action: Set(self.action),
            requested_qty: Set(self.requested_qty),
            available_qty: Set(self.available_qty),
            notes: Set(self.notes),
            timestamp: Set(at),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreparationStats {
    pub total_orders: usize,
    pub total_items: usize,
    pub available_items: usize,
    pub unavailable_items: usize,
    pub quantity_adjustments: usize,
}

impl PreparationStats {
    pub fn from_logs(logs: &[prep_log::Model]) -> Self {
        let orders: HashSet<Uuid> = logs.iter().map(|l| l.order_id).collect();
        let count = |action: PreparationAction| logs.iter().filter(|l| l.action == action).count();
        Self {
            total_orders: orders.len(),
            total_items: logs.iter().filter(|l| l.item_name.is_some()).count(),
            available_items: count(PreparationAction::ItemAvailable),
            unavailable_items: count(PreparationAction::ItemUnavailable),
            quantity_adjustments: count(PreparationAction::QuantityAdjusted),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableSort {
    ItemName,
    Order,
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl From<SortOrder> for SortDirection {
    fn from(order: SortOrder) -> Self {
        match order {
            SortOrder::Asc => SortDirection::Asc,
            SortOrder::Desc => SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnavailableItemsFilter {
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub warehouse_id: Option<Uuid>,
    pub sort_by: Option<UnavailableSort>,
    pub sort_order: Option<SortOrder>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnavailableItem {
    #[serde(flatten)]
    pub log: prep_log::Model,
    pub order_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnavailableItemsPage {
    pub logs: Vec<UnavailableItem>,
    pub total: u64,
    pub page: u64,
    pub total_pages: u64,
}

/// Writes and reads the per-order preparation audit trail.
#[derive(Clone)]
pub struct PreparationLogRecorder {
    db: Arc<DbPool>,
}

impl PreparationLogRecorder {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Records one entry in its own transaction.
    #[instrument(skip(self, entry), fields(order_id = %entry.order_id, action = %entry.action))]
    pub async fn record(&self, entry: PreparationEntry) -> Result<prep_log::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin preparation log transaction");
            ServiceError::db_error(e)
        })?;
        let saved = Self::record_in(&txn, entry).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;
        Ok(saved)
    }

    /// Records one entry on an open connection or transaction.
    ///
    /// Item decisions are upserted on (order, item name). The order row is
    /// touched first so concurrent writers for the same order queue up behind
    /// the row lock before reading the current decision.
    pub async fn record_in<C: ConnectionTrait>(
        conn: &C,
        entry: PreparationEntry,
    ) -> Result<prep_log::Model, ServiceError> {
        let now = Utc::now();
        let action = entry.action;

        let saved = match entry.merges().map(str::to_owned) {
            Some(item_name) => {
                let touched = order::Entity::update_many()
                    .col_expr(order::Column::UpdatedAt, Expr::value(now))
                    .filter(order::Column::Id.eq(entry.order_id))
                    .exec(conn)
                    .await
                    .map_err(ServiceError::db_error)?;
                if touched.rows_affected == 0 {
                    return Err(ServiceError::not_found("Order", entry.order_id));
                }

                let current = prep_log::Entity::find()
                    .filter(prep_log::Column::OrderId.eq(entry.order_id))
                    .filter(prep_log::Column::ItemName.eq(item_name.as_str()))
                    .filter(prep_log::Column::Action.is_in(PreparationAction::ITEM_DECISIONS))
                    .order_by_desc(prep_log::Column::Timestamp)
                    .one(conn)
                    .await
                    .map_err(ServiceError::db_error)?;

                match current {
                    Some(row) => {
                        let mut active: prep_log::ActiveModel = row.into();
                        active.action = Set(entry.action);
                        active.prepared_by = Set(entry.prepared_by);
                        active.requested_qty = Set(entry.requested_qty);
                        active.available_qty = Set(entry.available_qty);
                        active.notes = Set(entry.notes);
                        active.timestamp = Set(now);
                        active.update(conn).await
                    }
                    None => entry.into_active_model(now).insert(conn).await,
                }
            }
            None => entry.into_active_model(now).insert(conn).await,
        }
        .map_err(|e| {
            error!(error = %e, "Failed to write preparation log");
            ServiceError::db_error(e)
        })?;

        metrics::PREPARATION_LOGS_RECORDED
            .with_label_values(&[&action.to_string()])
            .inc();
        Ok(saved)
    }

    /// Bulk backfill. Every entry is appended; nothing is merged.
    #[instrument(skip(self, entries), fields(count = entries.len()))]
    pub async fn record_many(&self, entries: Vec<PreparationEntry>) -> Result<u64, ServiceError> {
        if entries.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let count = entries.len() as u64;
        let models: Vec<prep_log::ActiveModel> = entries
            .into_iter()
            .map(|e| e.into_active_model(now))
            .collect();

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        prep_log::Entity::insert_many(models)
            .exec(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to insert preparation logs");
                ServiceError::db_error(e)
            })?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        metrics::PREPARATION_LOGS_RECORDED
            .with_label_values(&["BULK"])
            .inc_by(count);
        info!(count, "Preparation logs backfilled");
        Ok(count)
    }

    /// Full trail for an order, oldest first.
    pub async fn order_logs(&self, order_id: Uuid) -> Result<Vec<prep_log::Model>, ServiceError> {
        prep_log::Entity::find()
            .filter(prep_log::Column::OrderId.eq(order_id))
            .order_by_asc(prep_log::Column::Timestamp)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self), fields(warehouse_id = %warehouse_id))]
    pub async fn warehouse_stats(
        &self,
        warehouse_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<PreparationStats, ServiceError> {
        let mut query =
            prep_log::Entity::find().filter(prep_log::Column::WarehouseId.eq(warehouse_id));
        if let Some(from) = from {
            query = query.filter(prep_log::Column::Timestamp.gte(from));
        }
        if let Some(to) = to {
            query = query.filter(prep_log::Column::Timestamp.lte(to));
        }
        let logs = query
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(PreparationStats::from_logs(&logs))
    }

    /// Latest entries written by one staff member, newest first.
    pub async fn recent_for_staff(
        &self,
        staff_id: Uuid,
        limit: Option<u64>,
    ) -> Result<Vec<prep_log::Model>, ServiceError> {
        prep_log::Entity::find()
            .filter(prep_log::Column::PreparedBy.eq(staff_id))
            .order_by_desc(prep_log::Column::Timestamp)
            .limit(limit.unwrap_or(RECENT_LOGS_DEFAULT_LIMIT))
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self, filter))]
    pub async fn unavailable_items(
        &self,
        filter: UnavailableItemsFilter,
    ) -> Result<UnavailableItemsPage, ServiceError> {
        let page = filter.page.unwrap_or(UNAVAILABLE_DEFAULT_PAGE).max(1);
        let limit = filter.limit.unwrap_or(UNAVAILABLE_DEFAULT_LIMIT).max(1);

        let mut query = prep_log::Entity::find()
            .filter(prep_log::Column::Action.eq(PreparationAction::ItemUnavailable));
        if let Some(from) = filter.date_from {
            query = query.filter(prep_log::Column::Timestamp.gte(from));
        }
        if let Some(to) = filter.date_to {
            query = query.filter(prep_log::Column::Timestamp.lte(to));
        }
        if let Some(warehouse_id) = filter.warehouse_id {
            query = query.filter(prep_log::Column::WarehouseId.eq(warehouse_id));
        }
        if let Some(category) = filter.category.as_deref() {
            let names: Vec<String> = item::Entity::find()
                .filter(item::Column::Category.eq(category))
                .all(&*self.db)
                .await
                .map_err(ServiceError::db_error)?
                .into_iter()
                .map(|i| i.name)
                .collect();
            query = query.filter(prep_log::Column::ItemName.is_in(names));
        }

        let mut query = query.find_also_related(order::Entity);
        query = match filter.sort_by {
            None => query.order_by_desc(prep_log::Column::Timestamp),
            Some(sort) => {
                let direction: SortDirection = filter.sort_order.unwrap_or_default().into();
                match sort {
                    UnavailableSort::ItemName => query.order_by(prep_log::Column::ItemName, direction),
                    UnavailableSort::Order => query.order_by(order::Column::OrderNumber, direction),
                    UnavailableSort::Date => query.order_by(prep_log::Column::Timestamp, direction),
                }
            }
        };

        let paginator = query.paginate(&*self.db, limit);
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let rows = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(UnavailableItemsPage {
            logs: rows
                .into_iter()
                .map(|(log, order)| UnavailableItem {
                    log,
                    order_number: order.map(|o| o.order_number),
                })
                .collect(),
            total,
            page,
            total_pages: total.div_ceil(limit),
        })
    }
}
