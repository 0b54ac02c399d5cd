// Domain enums shared by entities, services and handlers
pub mod order_status;
pub mod preparation_action;
pub mod role;

pub use order_status::OrderStatus;
pub use preparation_action::PreparationAction;
pub use role::{Actor, Role};
