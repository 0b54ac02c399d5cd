#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::{
    body::{self, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use medsupply_api::{
    config::AppConfig,
    db::{self, DbConfig, DbPool},
    entities::{
        department, department_supervisor, department_warehouse, item, order, order_history,
        order_preparation_log, warehouse,
    },
    events::{Event, EventSender},
    models::{Actor, OrderStatus, Role},
    services::{
        catalog::DbCatalog,
        distribution::RequestedItem,
        order_number::{format_order_number, OrderNumberGenerator, RetryPolicy},
        orders::{CreateOrderRequest, OrderDetails, OrderService},
        restrictions::{DbRestrictionOracle, UpsertRestrictionRequest},
    },
    AppState,
};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// Application state over a throwaway SQLite file with the real schema.
pub struct TestApp {
    pub state: AppState,
    pub db: Arc<DbPool>,
    pub cfg: AppConfig,
    router: Router,
    events: mpsc::Receiver<Event>,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_retry(RetryPolicy {
            max_attempts: 50,
            backoff_min: StdDuration::ZERO,
            backoff_max: StdDuration::from_millis(2),
        })
        .await
    }

    pub async fn with_retry(policy: RetryPolicy) -> Self {
        Self::build(policy, 1).await
    }

    /// Pool with several connections, for tests that race writers against
    /// each other. Blocked SQLite writers wait on the busy timeout.
    pub async fn with_connections(connections: u32) -> Self {
        Self::build(
            RetryPolicy {
                max_attempts: 50,
                backoff_min: StdDuration::ZERO,
                backoff_max: StdDuration::from_millis(2),
            },
            connections,
        )
        .await
    }

    async fn build(policy: RetryPolicy, connections: u32) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("medsupply.db").display());

        let mut cfg = AppConfig::new(url.clone(), TEST_JWT_SECRET.to_string(), "test".to_string());
        cfg.order_number_max_attempts = policy.max_attempts;

        // One connection by default: SQLite allows a single writer and the
        // services never hold a transaction while querying through the pool.
        let pool = db::establish_connection_with_config(&DbConfig {
            url,
            max_connections: connections,
            min_connections: 1,
            acquire_timeout: StdDuration::from_secs(30),
            ..Default::default()
        })
        .await
        .expect("failed to open test database");
        db::run_migrations(&pool).await.expect("migrations");
        let db = Arc::new(pool);

        let (event_tx, events) = mpsc::channel(1024);
        let sender = Some(Arc::new(EventSender::new(event_tx)));

        let mut state = AppState::new(db.clone(), &cfg, sender.clone());
        state.orders = Arc::new(OrderService::new(
            db.clone(),
            Arc::new(DbCatalog::new(db.clone())),
            Arc::new(DbRestrictionOracle::new(db.clone())),
            OrderNumberGenerator::new(policy),
            sender,
        ));
        let router = medsupply_api::build_router(state.clone(), &cfg);

        Self {
            state,
            db,
            cfg,
            router,
            events,
            _dir: dir,
        }
    }

    pub fn orders(&self) -> &OrderService {
        &self.state.orders
    }

    /// Events emitted so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    // ---- seeding ----

    pub async fn seed_department(&self, code: &str) -> department::Model {
        department::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(format!("{code} department")),
            code: Set(code.to_string()),
            is_active: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed department")
    }

    pub async fn seed_warehouse(&self, name: &str) -> warehouse::Model {
        self.seed_warehouse_with(name, true).await
    }

    pub async fn seed_warehouse_with(&self, name: &str, is_active: bool) -> warehouse::Model {
        warehouse::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            code: Set(name.to_uppercase().replace(' ', "_")),
            warehouse_type: Set("GENERAL".to_string()),
            is_active: Set(is_active),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed warehouse")
    }

    pub async fn link(&self, dept: &department::Model, wh: &warehouse::Model, priority: i32) {
        department_warehouse::ActiveModel {
            id: Set(Uuid::new_v4()),
            department_id: Set(dept.id),
            warehouse_id: Set(wh.id),
            priority: Set(priority),
            is_primary: Set(priority == 1),
        }
        .insert(&*self.db)
        .await
        .expect("link department to warehouse");
    }

    pub async fn seed_item(&self, name: &str, wh: &warehouse::Model) -> item::Model {
        self.seed_item_with(name, wh, None, true).await
    }

    pub async fn seed_item_with(
        &self,
        name: &str,
        wh: &warehouse::Model,
        category: Option<&str>,
        is_active: bool,
    ) -> item::Model {
        item::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            warehouse_id: Set(wh.id),
            category: Set(category.map(str::to_string)),
            unit: Set(Some("piece".to_string())),
            is_active: Set(is_active),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed item")
    }

    pub async fn supervise(&self, user_id: Uuid, dept: &department::Model) {
        department_supervisor::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            department_id: Set(dept.id),
        }
        .insert(&*self.db)
        .await
        .expect("seed supervisor");
    }

    pub async fn restrict(&self, user_id: Uuid, request: UpsertRestrictionRequest) {
        self.state
            .restrictions
            .upsert(user_id, request)
            .await
            .expect("seed restrictions");
    }

    /// Inserts an order directly in `status`, bypassing the workflow.
    pub async fn seed_order(
        &self,
        dept: &department::Model,
        wh: &warehouse::Model,
        status: OrderStatus,
        created_by: Uuid,
        items: &[(&str, i32)],
    ) -> order::Model {
        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(format!("SEED-{}", Uuid::new_v4().simple())),
            department_id: Set(dept.id),
            warehouse_id: Set(Some(wh.id)),
            status: Set(status),
            notes: Set(None),
            delivered_at: Set(None),
            created_by: Set(created_by),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed order");

        for (name, qty) in items {
            medsupply_api::entities::order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                item_name: Set(name.to_string()),
                quantity: Set(*qty),
                unit: Set("piece".to_string()),
                notes: Set(None),
            }
            .insert(&*self.db)
            .await
            .expect("seed order item");
        }
        order
    }

    /// An order numbered as if created yesterday, occupying `sequence` today.
    pub async fn occupy_order_number(
        &self,
        dept: &department::Model,
        wh: &warehouse::Model,
        sequence: u64,
    ) -> order::Model {
        let yesterday = Utc::now() - Duration::days(1);
        order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(format_order_number(Utc::now().date_naive(), sequence)),
            department_id: Set(dept.id),
            warehouse_id: Set(Some(wh.id)),
            status: Set(OrderStatus::Delivered),
            notes: Set(None),
            delivered_at: Set(Some(yesterday)),
            created_by: Set(Uuid::new_v4()),
            created_at: Set(yesterday),
            updated_at: Set(yesterday),
        }
        .insert(&*self.db)
        .await
        .expect("seed numbered order")
    }

    // ---- workflow shortcuts ----

    pub async fn create(
        &self,
        dept: &department::Model,
        requested_by: Uuid,
        items: &[(&str, i32)],
    ) -> Vec<OrderDetails> {
        self.orders()
            .create_order(CreateOrderRequest {
                department_id: dept.id,
                requested_by,
                notes: None,
                items: items
                    .iter()
                    .map(|(name, qty)| RequestedItem::new(*name, *qty))
                    .collect(),
            })
            .await
            .expect("create order")
    }

    pub async fn reload(&self, order_id: Uuid) -> order::Model {
        order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .expect("load order")
            .expect("order exists")
    }

    pub async fn history(&self, order_id: Uuid) -> Vec<order_history::Model> {
        order_history::Entity::find()
            .filter(order_history::Column::OrderId.eq(order_id))
            .order_by_asc(order_history::Column::Timestamp)
            .all(&*self.db)
            .await
            .expect("load history")
    }

    pub async fn prep_logs(&self, order_id: Uuid) -> Vec<order_preparation_log::Model> {
        order_preparation_log::Entity::find()
            .filter(order_preparation_log::Column::OrderId.eq(order_id))
            .order_by_asc(order_preparation_log::Column::Timestamp)
            .all(&*self.db)
            .await
            .expect("load preparation logs")
    }

    pub async fn order_count(&self) -> usize {
        order::Entity::find()
            .all(&*self.db)
            .await
            .expect("count orders")
            .len()
    }

    // ---- HTTP ----

    pub fn token(&self, actor: &Actor) -> String {
        self.state
            .auth
            .issue_token(actor, Duration::minutes(30))
            .expect("issue token")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        actor: Option<&Actor>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(actor) = actor {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", self.token(actor)));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = self.router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body bytes");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, json)
    }
}

pub fn admin() -> Actor {
    Actor::new(Uuid::new_v4(), Role::Admin)
}

pub fn warehouse_staff(wh: &warehouse::Model) -> Actor {
    Actor::new(Uuid::new_v4(), Role::Warehouse).with_warehouse(wh.id)
}

pub fn department_user(dept: &department::Model) -> Actor {
    Actor::new(Uuid::new_v4(), Role::Department).with_department(dept.id)
}

pub fn driver() -> Actor {
    Actor::new(Uuid::new_v4(), Role::Driver)
}

/// ICU linked to Pharmacy (priority 1: Paracetamol, Saline) and Supplies
/// (priority 2: Gloves, Gauze).
pub struct Hospital {
    pub dept: department::Model,
    pub pharmacy: warehouse::Model,
    pub supplies: warehouse::Model,
}

impl Hospital {
    pub async fn seed(app: &TestApp) -> Self {
        let dept = app.seed_department("ICU").await;
        let pharmacy = app.seed_warehouse("Pharmacy").await;
        let supplies = app.seed_warehouse("Supplies").await;
        app.link(&dept, &pharmacy, 1).await;
        app.link(&dept, &supplies, 2).await;
        app.seed_item_with("Paracetamol", &pharmacy, Some("Medication"), true).await;
        app.seed_item_with("Saline", &pharmacy, Some("Medication"), true).await;
        app.seed_item_with("Gloves", &supplies, Some("Consumables"), true).await;
        app.seed_item_with("Gauze", &supplies, Some("Consumables"), true).await;
        Self {
            dept,
            pharmacy,
            supplies,
        }
    }
}
