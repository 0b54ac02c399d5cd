//! Prometheus counters for the order workflow, exposed in text format at `/metrics`.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::error;

use crate::errors::ServiceError;

lazy_static! {
    pub static ref ORDERS_CREATED: IntCounter =
        IntCounter::new("orders_created_total", "Total number of orders created")
            .expect("metric can be created");
    pub static ref ORDER_CREATION_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "order_creation_failures_total",
            "Total number of failed order creation requests"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
    pub static ref ORDER_NUMBER_COLLISIONS: IntCounter = IntCounter::new(
        "order_number_collisions_total",
        "Order number unique-index collisions that triggered a retry"
    )
    .expect("metric can be created");
    pub static ref ORDER_STATUS_TRANSITIONS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "order_status_transitions_total",
            "Total number of committed order status transitions"
        ),
        &["from", "to"]
    )
    .expect("metric can be created");
    pub static ref ORDER_STATUS_TRANSITION_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "order_status_transition_failures_total",
            "Total number of rejected or failed status transitions"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
    pub static ref PREPARATION_LOGS_RECORDED: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "preparation_logs_recorded_total",
            "Preparation log rows inserted or overwritten"
        ),
        &["action"]
    )
    .expect("metric can be created");
    static ref REGISTRY: Registry = build_registry();
}

fn build_registry() -> Registry {
    let registry = Registry::new();
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ORDERS_CREATED.clone()),
        Box::new(ORDER_CREATION_FAILURES.clone()),
        Box::new(ORDER_NUMBER_COLLISIONS.clone()),
        Box::new(ORDER_STATUS_TRANSITIONS.clone()),
        Box::new(ORDER_STATUS_TRANSITION_FAILURES.clone()),
        Box::new(PREPARATION_LOGS_RECORDED.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            error!("Failed to register metric: {}", e);
        }
    }
    registry
}

/// Short label for the `error_type` dimension.
pub fn error_label(err: &ServiceError) -> &'static str {
    match err {
        ServiceError::ValidationError(_) => "validation",
        ServiceError::NotFound(_) => "not_found",
        ServiceError::Unauthorized(_) => "unauthorized",
        ServiceError::Forbidden(_) => "forbidden",
        ServiceError::RateLimited { .. } => "rate_limited",
        ServiceError::InvalidTransition { .. } => "invalid_transition",
        ServiceError::OrderNumberExhausted { .. } => "order_number_exhausted",
        ServiceError::DatabaseError(_) => "database",
        ServiceError::EventError(_) | ServiceError::InternalError(_) | ServiceError::Other(_) => {
            "internal"
        }
    }
}

pub fn record_creation_failure(err: &ServiceError) {
    ORDER_CREATION_FAILURES
        .with_label_values(&[error_label(err)])
        .inc();
}

pub fn record_transition_failure(err: &ServiceError) {
    ORDER_STATUS_TRANSITION_FAILURES
        .with_label_values(&[error_label(err)])
        .inc();
}

/// Renders every registered metric in the Prometheus text exposition format.
pub fn render() -> Result<String, ServiceError> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| ServiceError::InternalError(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| ServiceError::InternalError(format!("Metrics are not UTF-8: {}", e)))
}
