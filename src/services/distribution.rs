//! Splits one department request into per-warehouse groups.
//!
//! Everything here is pure: catalog lookups happen before, writes after.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::catalog::{CatalogItem, LinkedWarehouse};
use crate::errors::ServiceError;

pub const DEFAULT_UNIT: &str = "piece";

/// One line of a department request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct RequestedItem {
    #[validate(length(min = 1, message = "Item name is required"))]
    pub item_name: String,
    #[validate(range(min = 1, message = "Quantity must be greater than zero"))]
    pub quantity: i32,
    pub unit: Option<String>,
    pub notes: Option<String>,
}

impl RequestedItem {
    pub fn new(item_name: impl Into<String>, quantity: i32) -> Self {
        Self {
            item_name: item_name.into(),
            quantity,
            unit: None,
            notes: None,
        }
    }

    pub fn unit_or_default(&self) -> String {
        self.unit
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or(DEFAULT_UNIT)
            .to_string()
    }
}

/// Items bound for a single warehouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseGroup {
    pub warehouse: LinkedWarehouse,
    pub items: Vec<RequestedItem>,
}

/// Trims item names and units in place so lookup, grouping and storage all
/// see the same name.
pub fn normalize_items(items: &mut [RequestedItem]) {
    for item in items {
        let trimmed = item.item_name.trim();
        if trimmed.len() != item.item_name.len() {
            item.item_name = trimmed.to_string();
        }
        if let Some(unit) = item.unit.as_mut() {
            *unit = unit.trim().to_string();
        }
    }
}

/// Checks the request shape before anything is looked up.
pub fn validate_items(items: &[RequestedItem]) -> Result<(), ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::ValidationError(
            "At least one item is required".to_string(),
        ));
    }
    for item in items {
        if item.item_name.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Item name is required".to_string(),
            ));
        }
        if item.quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Quantity for item '{}' must be greater than zero",
                item.item_name
            )));
        }
    }
    Ok(())
}

/// Picks the catalog entry an item resolves to for this department.
///
/// Among active candidates, one in the highest-priority linked warehouse wins.
fn resolve<'a>(
    item_name: &str,
    candidates: &'a [CatalogItem],
    priority: &HashMap<Uuid, usize>,
) -> Result<&'a CatalogItem, ServiceError> {
    let active: Vec<&CatalogItem> = candidates.iter().filter(|c| c.is_active).collect();
    if active.is_empty() {
        return Err(ServiceError::ValidationError(format!(
            "Item '{}' was not found or is inactive",
            item_name
        )));
    }

    active
        .iter()
        .filter_map(|c| priority.get(&c.warehouse_id).map(|rank| (*rank, *c)))
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, c)| c)
        .ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Item '{}' belongs to warehouse '{}' which is not linked to this department",
                item_name, active[0].warehouse_name
            ))
        })
}

/// Groups `items` by owning warehouse.
///
/// `catalog` maps each requested item name to its catalog candidates. Groups
/// come back in the order of `linked`; items keep their request order within
/// a group. The whole request is rejected on the first unresolvable item.
pub fn plan_distribution(
    linked: &[LinkedWarehouse],
    items: &[RequestedItem],
    catalog: &HashMap<String, Vec<CatalogItem>>,
) -> Result<Vec<WarehouseGroup>, ServiceError> {
    validate_items(items)?;
    if linked.is_empty() {
        return Err(ServiceError::ValidationError(
            "No warehouse is linked to this department".to_string(),
        ));
    }

    let priority: HashMap<Uuid, usize> = linked
        .iter()
        .enumerate()
        .map(|(rank, w)| (w.warehouse_id, rank))
        .collect();

    let mut buckets: HashMap<Uuid, Vec<RequestedItem>> = HashMap::new();
    for requested in items {
        let candidates = catalog
            .get(&requested.item_name)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let resolved = resolve(&requested.item_name, candidates, &priority)?;
        buckets
            .entry(resolved.warehouse_id)
            .or_default()
            .push(requested.clone());
    }

    Ok(linked
        .iter()
        .filter_map(|w| {
            buckets.remove(&w.warehouse_id).map(|items| WarehouseGroup {
                warehouse: w.clone(),
                items,
            })
        })
        .collect())
}

/// Order notes written for a routed sub-order.
pub fn routed_notes(requester_notes: Option<&str>, warehouse_name: &str) -> String {
    match requester_notes.map(str::trim).filter(|n| !n.is_empty()) {
        Some(notes) => format!("{} (auto-routed to {})", notes, warehouse_name),
        None => format!("auto-routed to {}", warehouse_name),
    }
}
