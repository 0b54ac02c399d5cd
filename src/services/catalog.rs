use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{department, department_warehouse, item, warehouse},
    errors::ServiceError,
};

/// A warehouse a department may order from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkedWarehouse {
    pub warehouse_id: Uuid,
    pub name: String,
    pub code: String,
    pub priority: i32,
    pub is_primary: bool,
}

/// A catalog entry as seen by distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogItem {
    pub item_id: Uuid,
    pub name: String,
    pub warehouse_id: Uuid,
    pub warehouse_name: String,
    /// Item and owning warehouse are both active.
    pub is_active: bool,
    pub unit: Option<String>,
}

#[async_trait]
pub trait CatalogLookup: Send + Sync {
    /// Active warehouses linked to the department, highest priority first.
    async fn linked_warehouses(&self, department_id: Uuid) -> Result<Vec<LinkedWarehouse>, ServiceError>;

    /// Every catalog entry carrying exactly this name.
    async fn find_items(&self, name: &str) -> Result<Vec<CatalogItem>, ServiceError>;

    async fn department_exists(&self, department_id: Uuid) -> Result<bool, ServiceError>;
}

#[derive(Clone)]
pub struct DbCatalog {
    db: Arc<DbPool>,
}

impl DbCatalog {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CatalogLookup for DbCatalog {
    async fn linked_warehouses(&self, department_id: Uuid) -> Result<Vec<LinkedWarehouse>, ServiceError> {
        let rows = department_warehouse::Entity::find()
            .filter(department_warehouse::Column::DepartmentId.eq(department_id))
            .find_also_related(warehouse::Entity)
            .order_by_asc(department_warehouse::Column::Priority)
            .all(&*self.db)
            .await
            .map_err(|e| {
                error!(error = %e, %department_id, "Failed to load department warehouses");
                ServiceError::db_error(e)
            })?;

        Ok(rows
            .into_iter()
            .filter_map(|(link, wh)| {
                let wh = wh.filter(|w| w.is_active)?;
                Some(LinkedWarehouse {
                    warehouse_id: wh.id,
                    name: wh.name,
                    code: wh.code,
                    priority: link.priority,
                    is_primary: link.is_primary,
                })
            })
            .collect())
    }

    async fn find_items(&self, name: &str) -> Result<Vec<CatalogItem>, ServiceError> {
        let rows = item::Entity::find()
            .filter(item::Column::Name.eq(name))
            .find_also_related(warehouse::Entity)
            .order_by_asc(item::Column::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(|e| {
                error!(error = %e, item_name = %name, "Failed to look up item");
                ServiceError::db_error(e)
            })?;

        Ok(rows
            .into_iter()
            .filter_map(|(item, wh)| {
                let wh = wh?;
                Some(CatalogItem {
                    item_id: item.id,
                    name: item.name,
                    warehouse_id: wh.id,
                    warehouse_name: wh.name,
                    is_active: item.is_active && wh.is_active,
                    unit: item.unit,
                })
            })
            .collect())
    }

    async fn department_exists(&self, department_id: Uuid) -> Result<bool, ServiceError> {
        let found = department::Entity::find_by_id(department_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(found.is_some())
    }
}
