pub mod catalog;
pub mod distribution;
pub mod order_number;
pub mod order_status;
pub mod orders;
pub mod preparation_log;
pub mod restrictions;
