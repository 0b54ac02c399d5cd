//! Order creation: splitting a department request across warehouses.

mod common;

use assert_matches::assert_matches;
use common::{department_user, Hospital, TestApp};
use medsupply_api::{
    errors::ServiceError,
    events::Event,
    models::OrderStatus,
    services::{
        distribution::RequestedItem, orders::CreateOrderRequest,
        restrictions::UpsertRestrictionRequest,
    },
};
use uuid::Uuid;

fn request(dept: Uuid, user: Uuid, items: &[(&str, i32)]) -> CreateOrderRequest {
    CreateOrderRequest {
        department_id: dept,
        requested_by: user,
        notes: None,
        items: items
            .iter()
            .map(|(n, q)| RequestedItem::new(*n, *q))
            .collect(),
    }
}

#[tokio::test]
async fn request_spanning_two_warehouses_creates_two_orders() {
    let mut app = TestApp::new().await;
    let h = Hospital::seed(&app).await;
    let user = department_user(&h.dept);

    let created = app
        .create(&h.dept, user.id, &[("Gloves", 100), ("Paracetamol", 20)])
        .await;

    assert_eq!(created.len(), 2);
    // Priority order: Pharmacy first.
    assert_eq!(created[0].order.warehouse_id, Some(h.pharmacy.id));
    assert_eq!(created[1].order.warehouse_id, Some(h.supplies.id));

    let pharmacy = &created[0];
    assert_eq!(pharmacy.order.status, OrderStatus::Pending);
    assert_eq!(pharmacy.items.len(), 1);
    assert_eq!(pharmacy.items[0].item_name, "Paracetamol");
    assert_eq!(pharmacy.items[0].quantity, 20);
    assert_eq!(pharmacy.items[0].unit, "piece");
    assert_eq!(pharmacy.order.notes.as_deref(), Some("auto-routed to Pharmacy"));
    assert_eq!(pharmacy.order.created_by, user.id);

    let supplies = &created[1];
    assert_eq!(supplies.items[0].item_name, "Gloves");
    assert_eq!(supplies.items[0].quantity, 100);

    for details in &created {
        let history = app.history(details.order.id).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, OrderStatus::Pending);
        assert!(history[0]
            .notes
            .as_deref()
            .unwrap_or_default()
            .contains("routed to warehouse"));
        assert!(details.order.order_number.starts_with("ORD-"));
    }
    assert_ne!(created[0].order.order_number, created[1].order.order_number);

    let events = app.drain_events();
    let created_events = events
        .iter()
        .filter(|e| matches!(e, Event::OrderCreated { .. }))
        .count();
    assert_eq!(created_events, 2);
}

#[tokio::test]
async fn items_for_one_warehouse_share_an_order() {
    let app = TestApp::new().await;
    let h = Hospital::seed(&app).await;

    let mut req = request(
        h.dept.id,
        Uuid::new_v4(),
        &[("Gloves", 10), ("Gauze", 5), ("Saline", 2)],
    );
    req.notes = Some("urgent".to_string());
    let created = app.orders().create_order(req).await.unwrap();

    assert_eq!(created.len(), 2);
    let supplies = created
        .iter()
        .find(|d| d.order.warehouse_id == Some(h.supplies.id))
        .unwrap();
    let mut names: Vec<&str> = supplies.items.iter().map(|i| i.item_name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["Gauze", "Gloves"]);
    assert_eq!(
        supplies.order.notes.as_deref(),
        Some("urgent (auto-routed to Supplies)")
    );
    assert_eq!(supplies.progress.total_items, 2);
    assert_eq!(supplies.progress.logged_items, 0);
}

#[tokio::test]
async fn item_from_unlinked_warehouse_rejects_everything() {
    let app = TestApp::new().await;
    let h = Hospital::seed(&app).await;
    let radiology = app.seed_warehouse("Radiology Store").await;
    app.seed_item("Contrast", &radiology).await;

    let err = app
        .orders()
        .create_order(request(
            h.dept.id,
            Uuid::new_v4(),
            &[("Paracetamol", 1), ("Contrast", 1)],
        ))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::ValidationError(msg) if msg.contains("Radiology Store"));
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn unknown_and_inactive_items_are_rejected() {
    let app = TestApp::new().await;
    let h = Hospital::seed(&app).await;
    app.seed_item_with("Old Syringe", &h.pharmacy, None, false).await;

    for name in ["Old Syringe", "Unicorn Dust"] {
        let err = app
            .orders()
            .create_order(request(h.dept.id, Uuid::new_v4(), &[(name, 1)]))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(msg) if msg.contains(name));
    }
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn inactive_warehouse_does_not_receive_orders() {
    let app = TestApp::new().await;
    let dept = app.seed_department("ER").await;
    let closed = app.seed_warehouse_with("Closed Store", false).await;
    app.link(&dept, &closed, 1).await;
    app.seed_item("Gauze", &closed).await;

    let err = app
        .orders()
        .create_order(request(dept.id, Uuid::new_v4(), &[("Gauze", 1)]))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn department_without_warehouses_cannot_order() {
    let app = TestApp::new().await;
    let dept = app.seed_department("LAB").await;

    let err = app
        .orders()
        .create_order(request(dept.id, Uuid::new_v4(), &[("Gauze", 1)]))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(msg) if msg.contains("No warehouse"));
}

#[tokio::test]
async fn unknown_department_is_not_found() {
    let app = TestApp::new().await;
    let err = app
        .orders()
        .create_order(request(Uuid::new_v4(), Uuid::new_v4(), &[("Gauze", 1)]))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn empty_request_and_bad_quantity_fail_validation() {
    let app = TestApp::new().await;
    let h = Hospital::seed(&app).await;

    assert_matches!(
        app.orders()
            .create_order(request(h.dept.id, Uuid::new_v4(), &[]))
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        app.orders()
            .create_order(request(h.dept.id, Uuid::new_v4(), &[("Gloves", -3)]))
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn duplicate_item_names_route_to_the_preferred_warehouse() {
    let app = TestApp::new().await;
    let h = Hospital::seed(&app).await;
    // Gloves are stocked in both; Pharmacy has the higher priority.
    app.seed_item("Gloves", &h.pharmacy).await;

    let created = app.create(&h.dept, Uuid::new_v4(), &[("Gloves", 4)]).await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].order.warehouse_id, Some(h.pharmacy.id));
}

#[tokio::test]
async fn order_rate_limit_blocks_before_any_write() {
    let app = TestApp::new().await;
    let h = Hospital::seed(&app).await;
    let user = department_user(&h.dept);
    app.restrict(
        user.id,
        UpsertRestrictionRequest {
            order_rate_limit: Some(2),
            order_rate_period_hours: Some(24),
            ..Default::default()
        },
    )
    .await;

    // One request, two sub-orders: the request itself is checked once.
    let created = app
        .create(&h.dept, user.id, &[("Gloves", 1), ("Paracetamol", 1)])
        .await;
    assert_eq!(created.len(), 2);

    let err = app
        .orders()
        .create_order(request(h.dept.id, user.id, &[("Gauze", 1)]))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::RateLimited { limit: 2, period_hours: 24, .. }
    );
    assert!(err.to_string().contains("resets at"));
    assert_eq!(app.order_count().await, 2);

    // Another user is unaffected.
    let other = app.create(&h.dept, Uuid::new_v4(), &[("Gauze", 1)]).await;
    assert_eq!(other.len(), 1);
}

#[tokio::test]
async fn padded_item_names_resolve_and_are_stored_trimmed() {
    let app = TestApp::new().await;
    let h = Hospital::seed(&app).await;
    let user = department_user(&h.dept);

    let mut req = request(h.dept.id, user.id, &[("Paracetamol ", 5), ("  Gloves", 3)]);
    req.items[1].unit = Some(" box ".to_string());
    let created = app.orders().create_order(req).await.unwrap();

    assert_eq!(created.len(), 2);
    assert_eq!(created[0].order.warehouse_id, Some(h.pharmacy.id));
    assert_eq!(created[0].items[0].item_name, "Paracetamol");
    assert_eq!(created[1].items[0].item_name, "Gloves");
    assert_eq!(created[1].items[0].unit, "box");
}
