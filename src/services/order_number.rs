//! `ORD-YYYYMMDD-NNNN` order numbers.
//!
//! The sequence is a count of the day's orders, so two concurrent creators
//! can propose the same number. The unique index on `orders.order_number`
//! catches that and [`OrderNumberGenerator::allocate`] retries.

use std::future::Future;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::Rng;
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait, QueryFilter, SqlErr};
use tracing::{debug, warn};

use crate::{config::AppConfig, entities::order, errors::ServiceError, metrics};

pub const ORDER_NUMBER_PREFIX: &str = "ORD";

pub fn format_order_number(day: NaiveDate, sequence: u64) -> String {
    format!(
        "{}-{}-{:04}",
        ORDER_NUMBER_PREFIX,
        day.format("%Y%m%d"),
        sequence
    )
}

/// Start and end (exclusive) of the UTC calendar day containing `at`.
pub fn utc_day_bounds(at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = at
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc();
    (start, start + Duration::days(1))
}

pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_min: StdDuration,
    pub backoff_max: StdDuration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_min: StdDuration::from_millis(50),
            backoff_max: StdDuration::from_millis(150),
        }
    }
}

impl From<&AppConfig> for RetryPolicy {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            max_attempts: cfg.order_number_max_attempts.max(1),
            backoff_min: StdDuration::from_millis(cfg.order_number_backoff_min_ms),
            backoff_max: StdDuration::from_millis(cfg.order_number_backoff_max_ms),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> StdDuration {
        if self.backoff_max <= self.backoff_min {
            return self.backoff_min;
        }
        let min = self.backoff_min.as_millis() as u64;
        let max = self.backoff_max.as_millis() as u64;
        StdDuration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrderNumberGenerator {
    policy: RetryPolicy,
}

impl OrderNumberGenerator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Proposes a number for an order created at `at`. `attempt` (zero-based)
    /// is added to the sequence so a retry never re-proposes the number that
    /// just collided.
    pub async fn propose<C: ConnectionTrait>(
        &self,
        db: &C,
        at: DateTime<Utc>,
        attempt: u32,
    ) -> Result<String, ServiceError> {
        let (start, end) = utc_day_bounds(at);
        let todays = order::Entity::find()
            .filter(order::Column::CreatedAt.gte(start))
            .filter(order::Column::CreatedAt.lt(end))
            .count(db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(format_order_number(
            at.date_naive(),
            todays + 1 + attempt as u64,
        ))
    }

    /// Runs `insert` with freshly proposed numbers until it succeeds, fails
    /// with something other than a unique violation, or the budget runs out.
    pub async fn allocate<C, F, Fut, T>(
        &self,
        db: &C,
        at: DateTime<Utc>,
        mut insert: F,
    ) -> Result<T, ServiceError>
    where
        C: ConnectionTrait,
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        for attempt in 0..self.policy.max_attempts {
            let number = self.propose(db, at, attempt).await?;
            debug!(order_number = %number, attempt, "Trying order number");

            match insert(number.clone()).await {
                Err(ServiceError::DatabaseError(ref e)) if is_unique_violation(e) => {
                    metrics::ORDER_NUMBER_COLLISIONS.inc();
                    warn!(order_number = %number, attempt, "Order number collision, retrying");
                    if attempt + 1 < self.policy.max_attempts {
                        tokio::time::sleep(self.policy.backoff()).await;
                    }
                }
                other => return other,
            }
        }

        Err(ServiceError::OrderNumberExhausted {
            attempts: self.policy.max_attempts,
        })
    }
}
