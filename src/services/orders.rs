use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use super::{
    catalog::CatalogLookup,
    distribution::{
        normalize_items, plan_distribution, routed_notes, validate_items, RequestedItem,
        WarehouseGroup,
    },
    order_number::{utc_day_bounds, OrderNumberGenerator},
    order_status::{
        append_history, claim_transition, guard_status, record_transition, AppliedTransition,
        TransitionEngine,
    },
    preparation_log::{PreparationEntry, PreparationLogRecorder},
    restrictions::RestrictionOracle,
};
use crate::{
    db::DbPool,
    entities::{department_supervisor, order, order_history, order_item, order_preparation_log as prep_log},
    errors::ServiceError,
    events::{Event, EventSender},
    metrics,
    models::{Actor, OrderStatus, PreparationAction, Role},
};

pub const EDITED_NOTE: &str = "Order details edited";
pub const ITEMS_UPDATED_NOTE: &str = "Items updated during preparation";

/// A department's request, before it is split across warehouses.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub department_id: Uuid,
    pub requested_by: Uuid,
    pub notes: Option<String>,
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<RequestedItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateOrderRequest {
    pub notes: Option<String>,
    /// Replaces every line when present.
    pub items: Option<Vec<RequestedItem>>,
}

/// A warehouse decision about one requested line.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ItemPreparationRequest {
    #[validate(length(min = 1, message = "Item name is required"))]
    pub item_name: String,
    #[validate(range(min = 0))]
    pub requested_qty: Option<i32>,
    #[validate(range(min = 0))]
    pub available_qty: Option<i32>,
    #[serde(default)]
    pub unavailable: bool,
    pub notes: Option<String>,
}

/// One line submitted by warehouse staff while preparing an order.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PreparedLine {
    #[validate(length(min = 1, message = "Item name is required"))]
    pub item_name: String,
    #[validate(range(min = 0))]
    pub requested_qty: Option<i32>,
    #[validate(range(min = 0))]
    pub available_qty: Option<i32>,
    pub unit: Option<String>,
    #[serde(default)]
    pub unavailable: bool,
    pub notes: Option<String>,
}

impl PreparedLine {
    /// Quantity the line is kept with, if it is kept at all.
    fn kept_quantity(&self) -> Option<i32> {
        if self.unavailable {
            return None;
        }
        self.available_qty
            .or(self.requested_qty)
            .filter(|qty| *qty > 0)
    }

    fn to_entry(&self, order_id: Uuid, warehouse_id: Uuid, staff_id: Uuid) -> PreparationEntry {
        let available = if self.unavailable {
            Some(0)
        } else {
            self.available_qty.or(self.requested_qty)
        };
        PreparationEntry {
            order_id,
            warehouse_id,
            prepared_by: staff_id,
            item_name: Some(self.item_name.clone()),
            action: PreparationAction::for_item(self.unavailable, self.requested_qty, available),
            requested_qty: self.requested_qty,
            available_qty: available,
            notes: self.notes.clone(),
        }
    }
}

/// Lines that survive preparation, as order items.
pub fn kept_items(lines: &[PreparedLine]) -> Vec<RequestedItem> {
    lines
        .iter()
        .filter_map(|line| {
            line.kept_quantity().map(|quantity| RequestedItem {
                item_name: line.item_name.clone(),
                quantity,
                unit: line.unit.clone(),
                notes: line.notes.clone(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderFilter {
    pub statuses: Option<Vec<OrderStatus>>,
    pub created_by: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub warehouse_id: Option<Uuid>,
    pub date_from: Option<NaiveDate>,
    /// Inclusive through the end of the day.
    pub date_to: Option<NaiveDate>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparationProgress {
    pub total_items: usize,
    pub logged_items: usize,
    pub has_partial_preparation: bool,
}

impl PreparationProgress {
    pub fn from_rows(items: &[order_item::Model], logs: &[prep_log::Model]) -> Self {
        let logged: HashSet<&str> = logs
            .iter()
            .filter(|l| l.action.is_item_decision())
            .filter_map(|l| l.item_name.as_deref())
            .collect();
        let total_items = items.len();
        let logged_items = logged.len();
        Self {
            total_items,
            logged_items,
            has_partial_preparation: logged_items > 0 && logged_items < total_items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub progress: PreparationProgress,
}

/// Order lifecycle: creation with distribution, status moves, edits,
/// preparation and queries.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    catalog: Arc<dyn CatalogLookup>,
    oracle: Arc<dyn RestrictionOracle>,
    engine: TransitionEngine,
    numbers: OrderNumberGenerator,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        catalog: Arc<dyn CatalogLookup>,
        oracle: Arc<dyn RestrictionOracle>,
        numbers: OrderNumberGenerator,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            catalog,
            engine: TransitionEngine::new(oracle.clone()),
            oracle,
            numbers,
            event_sender,
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }

    async fn begin(&self) -> Result<sea_orm::DatabaseTransaction, ServiceError> {
        self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction");
            ServiceError::db_error(e)
        })
    }

    async fn load<C: ConnectionTrait>(conn: &C, order_id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(conn)
            .await
            .map_err(|e| {
                error!(error = %e, %order_id, "Failed to load order");
                ServiceError::db_error(e)
            })?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))
    }

    /// Splits the request by warehouse and creates one PENDING order per group.
    ///
    /// Each order commits on its own; a failure part way leaves the orders
    /// already created in place.
    #[instrument(skip(self, request), fields(department_id = %request.department_id, requested_by = %request.requested_by))]
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<Vec<OrderDetails>, ServiceError> {
        let result = self.create_order_inner(request).await;
        if let Err(e) = &result {
            metrics::record_creation_failure(e);
        }
        result
    }

    async fn create_order_inner(&self, mut request: CreateOrderRequest) -> Result<Vec<OrderDetails>, ServiceError> {
        normalize_items(&mut request.items);
        validate_items(&request.items)?;
        request.validate()?;
        for item in &request.items {
            item.validate()?;
        }

        self.oracle
            .check_order_rate_limit(request.requested_by)
            .await?
            .ensure_allowed()?;

        if !self.catalog.department_exists(request.department_id).await? {
            return Err(ServiceError::not_found("Department", request.department_id));
        }
        let linked = self.catalog.linked_warehouses(request.department_id).await?;

        let names: BTreeSet<&str> = request.items.iter().map(|i| i.item_name.as_str()).collect();
        let mut catalog = HashMap::with_capacity(names.len());
        for name in names {
            catalog.insert(name.to_string(), self.catalog.find_items(name).await?);
        }

        let groups = plan_distribution(&linked, &request.items, &catalog)?;

        let mut created = Vec::with_capacity(groups.len());
        for group in groups {
            let at = Utc::now();
            let (order, items) = self
                .numbers
                .allocate(&*self.db, at, |number| {
                    let db = self.db.clone();
                    let group = group.clone();
                    let notes = request.notes.clone();
                    let department_id = request.department_id;
                    let requested_by = request.requested_by;
                    async move {
                        Self::insert_routed_order(&db, number, department_id, requested_by, notes, group, at).await
                    }
                })
                .await?;

            metrics::ORDERS_CREATED.inc();
            info!(
                order_id = %order.id,
                order_number = %order.order_number,
                warehouse_id = %group.warehouse.warehouse_id,
                items = items.len(),
                "Order created"
            );
            self.emit(Event::OrderCreated {
                order_id: order.id,
                order_number: order.order_number.clone(),
                warehouse_id: group.warehouse.warehouse_id,
            })
            .await;

            let progress = PreparationProgress::from_rows(&items, &[]);
            created.push(OrderDetails { order, items, progress });
        }
        Ok(created)
    }

    async fn insert_routed_order(
        db: &DbPool,
        order_number: String,
        department_id: Uuid,
        requested_by: Uuid,
        notes: Option<String>,
        group: WarehouseGroup,
        at: DateTime<Utc>,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        // Raw DbErr so the allocator can recognise a number collision.
        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(order_number),
            department_id: Set(department_id),
            warehouse_id: Set(Some(group.warehouse.warehouse_id)),
            status: Set(OrderStatus::Pending),
            notes: Set(Some(routed_notes(notes.as_deref(), &group.warehouse.name))),
            delivered_at: Set(None),
            created_by: Set(requested_by),
            created_at: Set(at),
            updated_at: Set(at),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::DatabaseError)?;

        let items = insert_items(&txn, order.id, &group.items).await?;
        append_history(
            &txn,
            order.id,
            OrderStatus::Pending,
            requested_by,
            Some(format!("Order created and routed to warehouse {}", group.warehouse.name)),
        )
        .await?;

        txn.commit().await.map_err(ServiceError::db_error)?;
        Ok((order, items))
    }

    /// Authorizes and applies one status move.
    #[instrument(skip(self, actor, notes), fields(order_id = %order_id, new_status = %new_status, role = %actor.role))]
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        actor: &Actor,
        notes: Option<String>,
    ) -> Result<OrderDetails, ServiceError> {
        let result = self.transition(order_id, new_status, actor, notes, None).await;
        if let Err(e) = &result {
            metrics::record_transition_failure(e);
        }
        result
    }

    /// Shared path for every status move. The status is claimed first; `lines`
    /// are then applied to the item set in the same transaction.
    async fn transition(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        actor: &Actor,
        notes: Option<String>,
        lines: Option<&[PreparedLine]>,
    ) -> Result<OrderDetails, ServiceError> {
        let order = Self::load(&*self.db, order_id).await?;
        self.ensure_can_read(actor, &order).await?;
        let current = order.status;
        self.engine.authorize(actor, current, new_status).await?;

        let txn = self.begin().await?;
        let moved = claim_transition(&txn, order_id, current, new_status).await?;
        if let Some(lines) = lines {
            apply_prepared_lines(&txn, &moved, actor.id, lines).await?;
        }
        let AppliedTransition { from, order, .. } =
            record_transition(&txn, moved, current, actor.id, notes).await?;
        txn.commit().await.map_err(|e| {
            error!(error = %e, %order_id, "Failed to commit status change");
            ServiceError::db_error(e)
        })?;

        metrics::ORDER_STATUS_TRANSITIONS
            .with_label_values(&[&from.to_string(), &new_status.to_string()])
            .inc();
        info!(%order_id, %from, to = %new_status, changed_by = %actor.id, "Order status changed");
        self.emit(Event::OrderStatusChanged {
            order_id,
            old_status: from,
            new_status,
            changed_by: actor.id,
        })
        .await;

        self.details_of(order).await
    }

    /// Edits notes and/or replaces the item set of an open order.
    #[instrument(skip(self, actor, request), fields(order_id = %order_id, role = %actor.role))]
    pub async fn update_order(
        &self,
        order_id: Uuid,
        actor: &Actor,
        mut request: UpdateOrderRequest,
    ) -> Result<OrderDetails, ServiceError> {
        if !matches!(actor.role, Role::Admin | Role::Warehouse) {
            return Err(ServiceError::Forbidden(
                "Only admins and warehouse staff can edit orders".to_string(),
            ));
        }
        if let Some(items) = request.items.as_mut() {
            normalize_items(items);
            validate_items(items)?;
        }

        let order = Self::load(&*self.db, order_id).await?;
        self.ensure_can_read(actor, &order).await?;

        let txn = self.begin().await?;
        let fresh = guard_status(&txn, order_id, &OrderStatus::EDITABLE, |status| {
            ServiceError::ValidationError(format!("Cannot edit an order with status {}", status))
        })
        .await?;
        let status = fresh.status;

        let mut active: order::ActiveModel = fresh.into();
        if let Some(notes) = request.notes.clone() {
            active.notes = Set(Some(notes));
        }
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;

        let replaced = match &request.items {
            Some(items) => Some(replace_items(&txn, order_id, items).await?),
            None => None,
        };
        append_history(&txn, order_id, status, actor.id, Some(EDITED_NOTE.to_string())).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(%order_id, items_replaced = replaced.is_some(), "Order edited");
        self.emit(Event::OrderUpdated(order_id)).await;
        if let Some(items) = &replaced {
            self.emit(Event::OrderItemsReplaced {
                order_id,
                item_count: items.len(),
            })
            .await;
        }

        self.details_of(updated).await
    }

    /// Removes the order together with its logs, items and history.
    #[instrument(skip(self, actor), fields(order_id = %order_id, role = %actor.role))]
    pub async fn delete_order(&self, order_id: Uuid, actor: &Actor) -> Result<(), ServiceError> {
        let order = Self::load(&*self.db, order_id).await?;
        match actor.role {
            Role::Admin => {}
            Role::Department => {
                if actor.department_id != Some(order.department_id) {
                    return Err(ServiceError::Forbidden(
                        "You can only delete orders of your own department".to_string(),
                    ));
                }
            }
            _ => {
                return Err(ServiceError::Forbidden(
                    "You are not allowed to delete orders".to_string(),
                ))
            }
        }

        let deletable: &[OrderStatus] = match actor.role {
            Role::Department => &[OrderStatus::Pending],
            _ => &OrderStatus::ALL,
        };
        let txn = self.begin().await?;
        guard_status(&txn, order_id, deletable, |status| {
            ServiceError::ValidationError(format!(
                "Only pending orders can be deleted; processing has already started (status {})",
                status
            ))
        })
        .await?;
        prep_log::Entity::delete_many()
            .filter(prep_log::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        order_item::Entity::delete_many()
            .filter(order_item::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        order_history::Entity::delete_many()
            .filter(order_history::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        let deleted = order::Entity::delete_by_id(order_id)
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        if deleted.rows_affected == 0 {
            return Err(ServiceError::not_found("Order", order_id));
        }
        txn.commit().await.map_err(|e| {
            error!(error = %e, %order_id, "Failed to commit order deletion");
            ServiceError::db_error(e)
        })?;

        info!(%order_id, order_number = %order.order_number, "Order deleted");
        self.emit(Event::OrderDeleted(order_id)).await;
        Ok(())
    }

    /// Records a warehouse decision about one item of a PREPARING order.
    #[instrument(skip(self, actor, request), fields(order_id = %order_id, item_name = %request.item_name))]
    pub async fn log_item_preparation(
        &self,
        order_id: Uuid,
        actor: &Actor,
        request: ItemPreparationRequest,
    ) -> Result<prep_log::Model, ServiceError> {
        ensure_warehouse(actor)?;
        request.validate()?;

        let order = Self::load(&*self.db, order_id).await?;
        self.ensure_can_read(actor, &order).await?;
        let requested_qty = match request.requested_qty {
            Some(qty) => Some(qty),
            None => order_item::Entity::find()
                .filter(order_item::Column::OrderId.eq(order_id))
                .filter(order_item::Column::ItemName.eq(request.item_name.as_str()))
                .one(&*self.db)
                .await
                .map_err(ServiceError::db_error)?
                .map(|item| item.quantity),
        };
        let line = PreparedLine {
            item_name: request.item_name,
            requested_qty,
            available_qty: request.available_qty,
            unit: None,
            unavailable: request.unavailable,
            notes: request.notes,
        };

        let txn = self.begin().await?;
        let fresh = guard_status(&txn, order_id, &[OrderStatus::Preparing], |status| {
            ServiceError::ValidationError(format!(
                "Items can only be logged while the order is PREPARING (current: {})",
                status
            ))
        })
        .await?;
        let warehouse_id = fresh.warehouse_id.ok_or_else(|| {
            ServiceError::ValidationError("Order is not assigned to a warehouse".to_string())
        })?;
        let saved =
            PreparationLogRecorder::record_in(&txn, line.to_entry(order_id, warehouse_id, actor.id)).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        self.emit(Event::ItemPreparationLogged {
            order_id,
            item_name: line.item_name,
            action: saved.action,
        })
        .await;
        Ok(saved)
    }

    /// APPROVED → PREPARING, keeping only the lines that can be supplied.
    #[instrument(skip(self, actor, lines, notes), fields(order_id = %order_id))]
    pub async fn start_preparation(
        &self,
        order_id: Uuid,
        actor: &Actor,
        lines: Vec<PreparedLine>,
        notes: Option<String>,
    ) -> Result<OrderDetails, ServiceError> {
        ensure_warehouse(actor)?;
        validate_lines(&lines)?;
        self.ensure_status(order_id, &[OrderStatus::Approved], "start preparation")
            .await?;
        let result = self
            .transition(order_id, OrderStatus::Preparing, actor, notes, Some(&lines))
            .await;
        if let Err(e) = &result {
            metrics::record_transition_failure(e);
        }
        result
    }

    /// Rewrites the item set of a PREPARING order.
    #[instrument(skip(self, actor, lines, notes), fields(order_id = %order_id))]
    pub async fn replace_items_during_preparation(
        &self,
        order_id: Uuid,
        actor: &Actor,
        lines: Vec<PreparedLine>,
        notes: Option<String>,
    ) -> Result<OrderDetails, ServiceError> {
        ensure_warehouse(actor)?;
        validate_lines(&lines)?;
        let order = Self::load(&*self.db, order_id).await?;
        self.ensure_can_read(actor, &order).await?;

        let txn = self.begin().await?;
        let fresh = guard_status(&txn, order_id, &[OrderStatus::Preparing], |status| {
            ServiceError::ValidationError(format!(
                "Items can only be replaced while the order is PREPARING (current: {})",
                status
            ))
        })
        .await?;
        let items = apply_prepared_lines(&txn, &fresh, actor.id, &lines).await?;
        append_history(
            &txn,
            order_id,
            OrderStatus::Preparing,
            actor.id,
            Some(notes.unwrap_or_else(|| ITEMS_UPDATED_NOTE.to_string())),
        )
        .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        self.emit(Event::OrderItemsReplaced {
            order_id,
            item_count: items.len(),
        })
        .await;
        self.details_of(Self::load(&*self.db, order_id).await?).await
    }

    /// APPROVED or PREPARING → READY with the final item set.
    #[instrument(skip(self, actor, lines, notes), fields(order_id = %order_id))]
    pub async fn complete_preparation(
        &self,
        order_id: Uuid,
        actor: &Actor,
        lines: Vec<PreparedLine>,
        notes: Option<String>,
    ) -> Result<OrderDetails, ServiceError> {
        ensure_warehouse(actor)?;
        validate_lines(&lines)?;
        self.ensure_status(
            order_id,
            &[OrderStatus::Approved, OrderStatus::Preparing],
            "complete preparation",
        )
        .await?;
        let result = self
            .transition(order_id, OrderStatus::Ready, actor, notes, Some(&lines))
            .await;
        if let Err(e) = &result {
            metrics::record_transition_failure(e);
        }
        result
    }

    /// APPROVED or PREPARING → READY, items untouched.
    pub async fn mark_ready(
        &self,
        order_id: Uuid,
        actor: &Actor,
        notes: Option<String>,
    ) -> Result<OrderDetails, ServiceError> {
        ensure_warehouse(actor)?;
        self.ensure_status(
            order_id,
            &[OrderStatus::Approved, OrderStatus::Preparing],
            "mark the order ready",
        )
        .await?;
        self.update_order_status(order_id, OrderStatus::Ready, actor, notes)
            .await
    }

    async fn ensure_status(
        &self,
        order_id: Uuid,
        allowed: &[OrderStatus],
        what: &str,
    ) -> Result<(), ServiceError> {
        let order = Self::load(&*self.db, order_id).await?;
        if allowed.contains(&order.status) {
            Ok(())
        } else {
            Err(ServiceError::ValidationError(format!(
                "Cannot {} for an order with status {}",
                what, order.status
            )))
        }
    }

    /// Orders visible to `actor`, newest first.
    #[instrument(skip(self, actor, filter), fields(role = %actor.role))]
    pub async fn list_orders(&self, actor: &Actor, filter: OrderFilter) -> Result<Vec<OrderDetails>, ServiceError> {
        let mut cond = Condition::all();

        match actor.role {
            Role::Admin => {
                if let Some(created_by) = filter.created_by {
                    cond = cond.add(order::Column::CreatedBy.eq(created_by));
                }
                if let Some(department_id) = filter.department_id {
                    cond = cond.add(order::Column::DepartmentId.eq(department_id));
                }
                if let Some(warehouse_id) = filter.warehouse_id {
                    cond = cond.add(order::Column::WarehouseId.eq(warehouse_id));
                }
            }
            Role::Department => {
                if self.oracle.can_view_all_orders(actor.id).await? {
                    let departments = self.visible_departments(actor).await?;
                    if departments.is_empty() {
                        cond = cond.add(order::Column::CreatedBy.eq(actor.id));
                    } else {
                        cond = cond.add(order::Column::DepartmentId.is_in(departments));
                    }
                } else {
                    cond = cond.add(order::Column::CreatedBy.eq(actor.id));
                }
            }
            Role::Warehouse => {
                if let Some(warehouse_id) = actor.warehouse_id.or(filter.warehouse_id) {
                    cond = cond.add(order::Column::WarehouseId.eq(warehouse_id));
                }
            }
            Role::Driver => {
                cond = cond.add(order::Column::Status.is_in(OrderStatus::driver_visible()));
            }
        }

        if let Some(statuses) = filter.statuses.filter(|s| !s.is_empty()) {
            cond = cond.add(order::Column::Status.is_in(statuses));
        }
        if let Some(from) = filter.date_from {
            let (start, _) = utc_day_bounds(from.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc());
            cond = cond.add(order::Column::CreatedAt.gte(start));
        }
        if let Some(to) = filter.date_to {
            let (_, end) = utc_day_bounds(to.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc());
            cond = cond.add(order::Column::CreatedAt.lt(end));
        }

        let mut query = order::Entity::find()
            .filter(cond)
            .order_by_desc(order::Column::CreatedAt);
        if let Some(limit) = filter.limit {
            query = query.limit(limit);
        }
        let orders = query.all(&*self.db).await.map_err(|e| {
            error!(error = %e, "Failed to list orders");
            ServiceError::db_error(e)
        })?;

        self.with_details(orders).await
    }

    #[instrument(skip(self, actor), fields(order_id = %order_id))]
    pub async fn get_order(&self, actor: &Actor, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let order = Self::load(&*self.db, order_id).await?;
        self.ensure_can_read(actor, &order).await?;
        self.details_of(order).await
    }

    /// Audit trail, newest first.
    pub async fn order_history(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<Vec<order_history::Model>, ServiceError> {
        let order = Self::load(&*self.db, order_id).await?;
        self.ensure_can_read(actor, &order).await?;
        order_history::Entity::find()
            .filter(order_history::Column::OrderId.eq(order_id))
            .order_by_desc(order_history::Column::Timestamp)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Departments a department user may read: the ones they supervise, or
    /// their own.
    async fn visible_departments(&self, actor: &Actor) -> Result<Vec<Uuid>, ServiceError> {
        let supervised: Vec<Uuid> = department_supervisor::Entity::find()
            .filter(department_supervisor::Column::UserId.eq(actor.id))
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|s| s.department_id)
            .collect();
        if !supervised.is_empty() {
            return Ok(supervised);
        }
        Ok(actor.department_id.into_iter().collect())
    }

    async fn ensure_can_read(&self, actor: &Actor, order: &order::Model) -> Result<(), ServiceError> {
        match actor.role {
            Role::Admin => Ok(()),
            Role::Department => {
                if actor.department_id == Some(order.department_id) {
                    return Ok(());
                }
                if self.oracle.can_view_all_orders(actor.id).await?
                    && self.visible_departments(actor).await?.contains(&order.department_id)
                {
                    return Ok(());
                }
                Err(ServiceError::Forbidden(
                    "This order belongs to another department".to_string(),
                ))
            }
            Role::Warehouse => match actor.warehouse_id {
                Some(warehouse_id) if order.warehouse_id != Some(warehouse_id) => Err(
                    ServiceError::Forbidden("This order belongs to another warehouse".to_string()),
                ),
                _ => Ok(()),
            },
            Role::Driver => {
                if OrderStatus::driver_visible().contains(&order.status) {
                    Ok(())
                } else {
                    Err(ServiceError::Forbidden(
                        "Drivers can only access ready or delivered orders".to_string(),
                    ))
                }
            }
        }
    }

    async fn details_of(&self, order: order::Model) -> Result<OrderDetails, ServiceError> {
        let order_id = order.id;
        self.with_details(vec![order])
            .await?
            .pop()
            .ok_or_else(|| ServiceError::not_found("Order", order_id))
    }

    async fn with_details(&self, orders: Vec<order::Model>) -> Result<Vec<OrderDetails>, ServiceError> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();

        let mut items: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
        for item in order_item::Entity::find()
            .filter(order_item::Column::OrderId.is_in(ids.clone()))
            .order_by_asc(order_item::Column::ItemName)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
        {
            items.entry(item.order_id).or_default().push(item);
        }

        let mut logs: HashMap<Uuid, Vec<prep_log::Model>> = HashMap::new();
        for log in prep_log::Entity::find()
            .filter(prep_log::Column::OrderId.is_in(ids))
            .filter(prep_log::Column::Action.is_in(PreparationAction::ITEM_DECISIONS))
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
        {
            logs.entry(log.order_id).or_default().push(log);
        }

        Ok(orders
            .into_iter()
            .map(|order| {
                let items = items.remove(&order.id).unwrap_or_default();
                let progress = PreparationProgress::from_rows(
                    &items,
                    logs.get(&order.id).map(Vec::as_slice).unwrap_or(&[]),
                );
                OrderDetails { order, items, progress }
            })
            .collect())
    }
}

fn ensure_warehouse(actor: &Actor) -> Result<(), ServiceError> {
    if actor.role == Role::Warehouse {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "Only warehouse staff can prepare orders".to_string(),
        ))
    }
}

fn validate_lines(lines: &[PreparedLine]) -> Result<(), ServiceError> {
    if lines.is_empty() {
        return Err(ServiceError::ValidationError(
            "At least one item is required".to_string(),
        ));
    }
    for line in lines {
        line.validate()?;
    }
    if kept_items(lines).is_empty() {
        return Err(ServiceError::ValidationError(
            "At least one item must be available".to_string(),
        ));
    }
    Ok(())
}

async fn insert_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    items: &[RequestedItem],
) -> Result<Vec<order_item::Model>, ServiceError> {
    let mut saved = Vec::with_capacity(items.len());
    for item in items {
        let row = order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            item_name: Set(item.item_name.trim().to_string()),
            quantity: Set(item.quantity),
            unit: Set(item.unit_or_default()),
            notes: Set(item.notes.clone()),
        }
        .insert(conn)
        .await
        .map_err(|e| {
            error!(error = %e, %order_id, "Failed to insert order item");
            ServiceError::db_error(e)
        })?;
        saved.push(row);
    }
    Ok(saved)
}

/// Delete-all then recreate.
async fn replace_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    items: &[RequestedItem],
) -> Result<Vec<order_item::Model>, ServiceError> {
    order_item::Entity::delete_many()
        .filter(order_item::Column::OrderId.eq(order_id))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;
    insert_items(conn, order_id, items).await
}

/// Replaces the items with the kept lines and records a decision per line.
async fn apply_prepared_lines<C: ConnectionTrait>(
    conn: &C,
    order: &order::Model,
    staff_id: Uuid,
    lines: &[PreparedLine],
) -> Result<Vec<order_item::Model>, ServiceError> {
    let items = replace_items(conn, order.id, &kept_items(lines)).await?;
    match order.warehouse_id {
        Some(warehouse_id) => {
            for line in lines {
                PreparationLogRecorder::record_in(conn, line.to_entry(order.id, warehouse_id, staff_id))
                    .await?;
            }
        }
        None => warn!(order_id = %order.id, "Order has no warehouse; item decisions not logged"),
    }
    Ok(items)
}
