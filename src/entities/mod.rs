pub mod department;
pub mod department_supervisor;
pub mod department_warehouse;
pub mod item;
pub mod order;
pub mod order_history;
pub mod order_item;
pub mod order_preparation_log;
pub mod user_restriction;
pub mod warehouse;
