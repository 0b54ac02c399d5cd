use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::OrderStatus;

/// Tag attached to every preparation log row.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(24))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PreparationAction {
    #[sea_orm(string_value = "ITEM_AVAILABLE")]
    ItemAvailable,
    #[sea_orm(string_value = "ITEM_UNAVAILABLE")]
    ItemUnavailable,
    #[sea_orm(string_value = "QUANTITY_ADJUSTED")]
    QuantityAdjusted,
    #[sea_orm(string_value = "ORDER_APPROVED")]
    OrderApproved,
    #[sea_orm(string_value = "ORDER_REJECTED")]
    OrderRejected,
    #[sea_orm(string_value = "ORDER_COMPLETED")]
    OrderCompleted,
    #[sea_orm(string_value = "ORDER_DELIVERED")]
    OrderDelivered,
    #[sea_orm(string_value = "STATUS_CHANGED")]
    StatusChanged,
}

impl PreparationAction {
    /// Per-item availability decisions. At most one of these is current per
    /// (order, item name); re-logging overwrites it.
    pub const ITEM_DECISIONS: [PreparationAction; 3] = [
        PreparationAction::ItemAvailable,
        PreparationAction::ItemUnavailable,
        PreparationAction::QuantityAdjusted,
    ];

    pub fn is_item_decision(self) -> bool {
        Self::ITEM_DECISIONS.contains(&self)
    }

    /// Log action written when an order enters `status`.
    pub fn for_transition(status: OrderStatus) -> Option<PreparationAction> {
        match status {
            OrderStatus::Approved => Some(PreparationAction::OrderApproved),
            OrderStatus::Rejected => Some(PreparationAction::OrderRejected),
            OrderStatus::Preparing => Some(PreparationAction::StatusChanged),
            OrderStatus::Ready => Some(PreparationAction::OrderCompleted),
            OrderStatus::Delivered => Some(PreparationAction::OrderDelivered),
            OrderStatus::Pending => None,
        }
    }

    /// Chooses the decision tag for an item assessed during preparation.
    pub fn for_item(unavailable: bool, requested: Option<i32>, available: Option<i32>) -> Self {
        if unavailable {
            PreparationAction::ItemUnavailable
        } else if available != requested {
            PreparationAction::QuantityAdjusted
        } else {
            PreparationAction::ItemAvailable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_reachable_status_has_a_log_action() {
        for status in [
            OrderStatus::Approved,
            OrderStatus::Rejected,
            OrderStatus::Preparing,
            OrderStatus::Ready,
            OrderStatus::Delivered,
        ] {
            let action = PreparationAction::for_transition(status).unwrap();
            assert!(!action.is_item_decision());
        }
        assert!(PreparationAction::for_transition(OrderStatus::Pending).is_none());
    }

    #[test]
    fn item_decision_tagging() {
        assert_eq!(
            PreparationAction::for_item(true, Some(10), Some(10)),
            PreparationAction::ItemUnavailable
        );
        assert_eq!(
            PreparationAction::for_item(false, Some(10), Some(4)),
            PreparationAction::QuantityAdjusted
        );
        assert_eq!(
            PreparationAction::for_item(false, Some(10), Some(10)),
            PreparationAction::ItemAvailable
        );
    }
}
