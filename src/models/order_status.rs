use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle of a department order.
///
/// ```text
/// PENDING ──► APPROVED ──► PREPARING ──► READY ──► DELIVERED
///    │            └──────────────────────►┘
///    └──► REJECTED
/// ```
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
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum OrderStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "APPROVED")]
    Approved,
    #[sea_orm(string_value = "REJECTED")]
    Rejected,
    #[sea_orm(string_value = "PREPARING")]
    Preparing,
    #[sea_orm(string_value = "READY")]
    Ready,
    #[sea_orm(string_value = "DELIVERED")]
    Delivered,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Approved,
        OrderStatus::Rejected,
        OrderStatus::Preparing,
        OrderStatus::Ready,
        OrderStatus::Delivered,
    ];

    /// Statuses whose lines and notes may still be edited.
    pub const EDITABLE: [OrderStatus; 4] = [
        OrderStatus::Pending,
        OrderStatus::Approved,
        OrderStatus::Preparing,
        OrderStatus::Ready,
    ];

    /// Statuses reachable from `self` in one step.
    pub fn successors(self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Pending => &[OrderStatus::Approved, OrderStatus::Rejected],
            OrderStatus::Approved => &[OrderStatus::Preparing, OrderStatus::Ready],
            OrderStatus::Preparing => &[OrderStatus::Ready],
            OrderStatus::Ready => &[OrderStatus::Delivered],
            OrderStatus::Delivered | OrderStatus::Rejected => &[],
        }
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        self.successors().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }

    /// Statuses a driver is allowed to see.
    pub fn driver_visible() -> [OrderStatus; 2] {
        [OrderStatus::Ready, OrderStatus::Delivered]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Iterable;
    use std::str::FromStr;

    #[test]
    fn terminal_statuses_have_no_successors() {
        assert!(OrderStatus::Delivered.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Ready.is_terminal());
    }

    #[test]
    fn no_status_transitions_to_itself() {
        for status in OrderStatus::iter() {
            assert!(!status.can_transition_to(status), "{status} -> {status}");
        }
    }

    #[test]
    fn status_lists_cover_the_enum() {
        assert_eq!(OrderStatus::ALL.to_vec(), OrderStatus::iter().collect::<Vec<_>>());
        for status in OrderStatus::ALL {
            assert_eq!(
                OrderStatus::EDITABLE.contains(&status),
                !matches!(status, OrderStatus::Delivered | OrderStatus::Rejected)
            );
        }
    }

    #[test]
    fn display_and_parse_use_upper_snake_case() {
        assert_eq!(OrderStatus::Preparing.to_string(), "PREPARING");
        assert_eq!(
            OrderStatus::from_str("delivered").unwrap(),
            OrderStatus::Delivered
        );
        assert!(OrderStatus::from_str("shipped").is_err());
    }

    #[test]
    fn serde_matches_display() {
        let json = serde_json::to_string(&OrderStatus::Approved).unwrap();
        assert_eq!(json, "\"APPROVED\"");
    }
}
