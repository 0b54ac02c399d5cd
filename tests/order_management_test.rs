//! Editing, deleting and querying orders, plus restriction administration.

mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::{admin, department_user, driver, warehouse_staff, Hospital, TestApp};
use medsupply_api::{
    entities::order,
    errors::ServiceError,
    events::Event,
    models::OrderStatus,
    services::{
        distribution::RequestedItem,
        orders::{OrderFilter, UpdateOrderRequest, EDITED_NOTE},
        restrictions::UpsertRestrictionRequest,
    },
};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, IntoActiveModel};
use uuid::Uuid;

#[tokio::test]
async fn edits_replace_notes_and_items() {
    let mut app = TestApp::new().await;
    let h = Hospital::seed(&app).await;
    let order_id = app.create(&h.dept, Uuid::new_v4(), &[("Saline", 2)]).await[0].order.id;
    let staff = warehouse_staff(&h.pharmacy);
    app.drain_events();

    let edited = app
        .orders()
        .update_order(
            order_id,
            &staff,
            UpdateOrderRequest {
                notes: Some("Deliver to bay 3".into()),
                items: Some(vec![
                    RequestedItem::new("Saline", 6),
                    RequestedItem::new("Paracetamol", 1),
                ]),
            },
        )
        .await
        .unwrap();

    assert_eq!(edited.order.notes.as_deref(), Some("Deliver to bay 3"));
    assert_eq!(edited.order.status, OrderStatus::Pending);
    let lines: Vec<_> = edited.items.iter().map(|i| (i.item_name.as_str(), i.quantity)).collect();
    assert_eq!(lines, vec![("Paracetamol", 1), ("Saline", 6)]);

    let history = app.history(order_id).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].notes.as_deref(), Some(EDITED_NOTE));
    assert_eq!(history[1].status, OrderStatus::Pending);
    assert_eq!(history[1].changed_by, staff.id);

    assert_eq!(
        app.drain_events(),
        vec![
            Event::OrderUpdated(order_id),
            Event::OrderItemsReplaced { order_id, item_count: 2 },
        ]
    );
}

#[tokio::test]
async fn notes_only_edit_keeps_items() {
    let app = TestApp::new().await;
    let h = Hospital::seed(&app).await;
    let order_id = app.create(&h.dept, Uuid::new_v4(), &[("Saline", 2)]).await[0].order.id;

    let edited = app
        .orders()
        .update_order(
            order_id,
            &admin(),
            UpdateOrderRequest {
                notes: Some("Urgent".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(edited.items.len(), 1);
    assert_eq!(edited.items[0].quantity, 2);
    assert!(edited.order.updated_at >= edited.order.created_at);
}

#[tokio::test]
async fn closed_orders_cannot_be_edited() {
    let app = TestApp::new().await;
    let h = Hospital::seed(&app).await;
    let delivered = app
        .seed_order(&h.dept, &h.pharmacy, OrderStatus::Delivered, Uuid::new_v4(), &[("Saline", 1)])
        .await;
    let rejected = app
        .seed_order(&h.dept, &h.pharmacy, OrderStatus::Rejected, Uuid::new_v4(), &[("Saline", 1)])
        .await;

    for id in [delivered.id, rejected.id] {
        assert_matches!(
            app.orders()
                .update_order(id, &admin(), UpdateOrderRequest { notes: Some("x".into()), items: None })
                .await,
            Err(ServiceError::ValidationError(_))
        );
        assert!(app.history(id).await.is_empty());
    }
}

#[tokio::test]
async fn departments_and_drivers_cannot_edit() {
    let app = TestApp::new().await;
    let h = Hospital::seed(&app).await;
    let nurse = department_user(&h.dept);
    let order = app
        .seed_order(&h.dept, &h.pharmacy, OrderStatus::Pending, nurse.id, &[("Saline", 1)])
        .await;

    for actor in [nurse, driver()] {
        assert_matches!(
            app.orders()
                .update_order(order.id, &actor, UpdateOrderRequest::default())
                .await,
            Err(ServiceError::Forbidden(_))
        );
    }
}

#[tokio::test]
async fn invalid_replacement_items_are_rejected() {
    let app = TestApp::new().await;
    let h = Hospital::seed(&app).await;
    let order = app
        .seed_order(&h.dept, &h.pharmacy, OrderStatus::Pending, Uuid::new_v4(), &[("Saline", 1)])
        .await;

    assert_matches!(
        app.orders()
            .update_order(
                order.id,
                &admin(),
                UpdateOrderRequest {
                    notes: None,
                    items: Some(vec![RequestedItem::new("Saline", 0)]),
                },
            )
            .await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn admin_delete_cascades() {
    let mut app = TestApp::new().await;
    let h = Hospital::seed(&app).await;
    let order = app
        .seed_order(&h.dept, &h.pharmacy, OrderStatus::Preparing, Uuid::new_v4(), &[("Saline", 1)])
        .await;
    app.orders()
        .log_item_preparation(
            order.id,
            &warehouse_staff(&h.pharmacy),
            medsupply_api::services::orders::ItemPreparationRequest {
                item_name: "Saline".into(),
                requested_qty: None,
                available_qty: None,
                unavailable: false,
                notes: None,
            },
        )
        .await
        .unwrap();
    app.drain_events();

    app.orders().delete_order(order.id, &admin()).await.unwrap();

    assert_eq!(app.order_count().await, 0);
    assert!(app.history(order.id).await.is_empty());
    assert!(app.prep_logs(order.id).await.is_empty());
    assert_eq!(app.drain_events(), vec![Event::OrderDeleted(order.id)]);
    assert_matches!(
        app.orders().delete_order(order.id, &admin()).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn departments_delete_only_their_pending_orders() {
    let app = TestApp::new().await;
    let h = Hospital::seed(&app).await;
    let other = app.seed_department("ER").await;
    let nurse = department_user(&h.dept);

    let own_pending = app
        .seed_order(&h.dept, &h.pharmacy, OrderStatus::Pending, nurse.id, &[("Saline", 1)])
        .await;
    let own_approved = app
        .seed_order(&h.dept, &h.pharmacy, OrderStatus::Approved, nurse.id, &[("Saline", 1)])
        .await;
    let foreign = app
        .seed_order(&other, &h.pharmacy, OrderStatus::Pending, Uuid::new_v4(), &[("Saline", 1)])
        .await;

    assert_matches!(
        app.orders().delete_order(own_approved.id, &nurse).await,
        Err(ServiceError::ValidationError(msg)) if msg.contains("APPROVED")
    );
    assert_eq!(app.reload(own_approved.id).await.status, OrderStatus::Approved);
    assert_matches!(
        app.orders().delete_order(foreign.id, &nurse).await,
        Err(ServiceError::Forbidden(_))
    );
    assert_matches!(
        app.orders()
            .delete_order(own_pending.id, &warehouse_staff(&h.pharmacy))
            .await,
        Err(ServiceError::Forbidden(_))
    );

    app.orders().delete_order(own_pending.id, &nurse).await.unwrap();
    assert_eq!(app.order_count().await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deletion_racing_approval_has_one_winner() {
    let app = TestApp::with_connections(4).await;
    let h = Hospital::seed(&app).await;
    let nurse = department_user(&h.dept);

    for _ in 0..10 {
        let order = app
            .seed_order(&h.dept, &h.pharmacy, OrderStatus::Pending, nurse.id, &[("Saline", 1)])
            .await;

        let admin_user = admin();
        let (approved, deleted) = tokio::join!(
            app.orders()
                .update_order_status(order.id, OrderStatus::Approved, &admin_user, None),
            app.orders().delete_order(order.id, &nurse),
        );

        match (approved, deleted) {
            (Ok(_), Err(e)) => {
                assert_matches!(e, ServiceError::ValidationError(_));
                assert_eq!(app.reload(order.id).await.status, OrderStatus::Approved);
                assert_eq!(app.prep_logs(order.id).await.len(), 1);
            }
            (Err(e), Ok(())) => {
                assert_matches!(e, ServiceError::NotFound(_));
                assert!(app.history(order.id).await.is_empty());
                assert!(app.prep_logs(order.id).await.is_empty());
            }
            other => panic!("expected exactly one winner, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn department_users_see_their_own_orders() {
    let app = TestApp::new().await;
    let h = Hospital::seed(&app).await;
    let nurse = department_user(&h.dept);
    let colleague = department_user(&h.dept);
    app.create(&h.dept, nurse.id, &[("Saline", 1)]).await;
    app.create(&h.dept, colleague.id, &[("Gloves", 1)]).await;

    let mine = app.orders().list_orders(&nurse, OrderFilter::default()).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].order.created_by, nurse.id);
}

#[tokio::test]
async fn supervisors_with_view_all_see_supervised_departments() {
    let app = TestApp::new().await;
    let h = Hospital::seed(&app).await;
    let er = app.seed_department("ER").await;
    app.link(&er, &h.pharmacy, 1).await;
    let head_nurse = department_user(&h.dept);
    app.restrict(
        head_nurse.id,
        UpsertRestrictionRequest {
            can_view_all_orders: Some(true),
            ..Default::default()
        },
    )
    .await;

    app.create(&h.dept, Uuid::new_v4(), &[("Saline", 1)]).await;
    let er_order = app.create(&er, Uuid::new_v4(), &[("Saline", 1)]).await;

    // Without supervision rows the own department is used.
    let own = app.orders().list_orders(&head_nurse, OrderFilter::default()).await.unwrap();
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].order.department_id, h.dept.id);
    assert_matches!(
        app.orders().get_order(&head_nurse, er_order[0].order.id).await,
        Err(ServiceError::Forbidden(_))
    );

    app.supervise(head_nurse.id, &er).await;
    let supervised = app.orders().list_orders(&head_nurse, OrderFilter::default()).await.unwrap();
    assert_eq!(supervised.len(), 1);
    assert_eq!(supervised[0].order.department_id, er.id);
    assert!(app.orders().get_order(&head_nurse, er_order[0].order.id).await.is_ok());
}

#[tokio::test]
async fn warehouse_staff_see_their_warehouse() {
    let app = TestApp::new().await;
    let h = Hospital::seed(&app).await;
    app.create(&h.dept, Uuid::new_v4(), &[("Saline", 1), ("Gloves", 1)]).await;

    let pharmacy = app
        .orders()
        .list_orders(&warehouse_staff(&h.pharmacy), OrderFilter::default())
        .await
        .unwrap();
    assert_eq!(pharmacy.len(), 1);
    assert_eq!(pharmacy[0].order.warehouse_id, Some(h.pharmacy.id));

    let unbound = medsupply_api::models::Actor::new(Uuid::new_v4(), medsupply_api::models::Role::Warehouse);
    let all = app.orders().list_orders(&unbound, OrderFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);
    let filtered = app
        .orders()
        .list_orders(
            &unbound,
            OrderFilter {
                warehouse_id: Some(h.supplies.id),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);
}

#[tokio::test]
async fn drivers_see_ready_and_delivered_only() {
    let app = TestApp::new().await;
    let h = Hospital::seed(&app).await;
    for status in [OrderStatus::Pending, OrderStatus::Ready, OrderStatus::Delivered] {
        app.seed_order(&h.dept, &h.pharmacy, status, Uuid::new_v4(), &[("Saline", 1)])
            .await;
    }

    let visible = app.orders().list_orders(&driver(), OrderFilter::default()).await.unwrap();
    assert_eq!(visible.len(), 2);
    assert!(visible
        .iter()
        .all(|d| matches!(d.order.status, OrderStatus::Ready | OrderStatus::Delivered)));
}

#[tokio::test]
async fn admin_filters_by_status_department_and_date() {
    let app = TestApp::new().await;
    let h = Hospital::seed(&app).await;
    let er = app.seed_department("ER").await;
    app.seed_order(&h.dept, &h.pharmacy, OrderStatus::Pending, Uuid::new_v4(), &[("Saline", 1)])
        .await;
    app.seed_order(&h.dept, &h.pharmacy, OrderStatus::Approved, Uuid::new_v4(), &[("Saline", 1)])
        .await;
    app.seed_order(&er, &h.pharmacy, OrderStatus::Pending, Uuid::new_v4(), &[("Saline", 1)])
        .await;
    let old = app
        .seed_order(&h.dept, &h.pharmacy, OrderStatus::Pending, Uuid::new_v4(), &[("Saline", 1)])
        .await;
    let last_week = Utc::now() - Duration::days(7);
    let mut active = old.into_active_model();
    active.created_at = Set(last_week);
    active.update(&*app.db).await.unwrap();

    let admin = admin();
    let list = |filter: OrderFilter| {
        let orders = app.orders();
        let admin = admin.clone();
        async move { orders.list_orders(&admin, filter).await.unwrap() }
    };

    assert_eq!(list(OrderFilter::default()).await.len(), 4);
    assert_eq!(
        list(OrderFilter {
            statuses: Some(vec![OrderStatus::Pending]),
            ..Default::default()
        })
        .await
        .len(),
        3
    );
    assert_eq!(
        list(OrderFilter {
            department_id: Some(er.id),
            ..Default::default()
        })
        .await
        .len(),
        1
    );

    let today = Utc::now().date_naive();
    assert_eq!(
        list(OrderFilter {
            date_from: Some(today),
            date_to: Some(today),
            ..Default::default()
        })
        .await
        .len(),
        3
    );
    assert_eq!(
        list(OrderFilter {
            date_to: Some(last_week.date_naive()),
            ..Default::default()
        })
        .await
        .len(),
        1
    );

    let newest_first = list(OrderFilter {
        limit: Some(2),
        ..Default::default()
    })
    .await;
    assert_eq!(newest_first.len(), 2);
    assert!(newest_first[0].order.created_at >= newest_first[1].order.created_at);
}

#[tokio::test]
async fn reading_a_single_order_checks_visibility() {
    let app = TestApp::new().await;
    let h = Hospital::seed(&app).await;
    let other = app.seed_department("ER").await;
    let order = app
        .seed_order(&other, &h.pharmacy, OrderStatus::Pending, Uuid::new_v4(), &[("Saline", 1)])
        .await;

    assert_matches!(
        app.orders().get_order(&admin(), Uuid::new_v4()).await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        app.orders().get_order(&department_user(&h.dept), order.id).await,
        Err(ServiceError::Forbidden(_))
    );
    assert_matches!(
        app.orders().get_order(&warehouse_staff(&h.supplies), order.id).await,
        Err(ServiceError::Forbidden(_))
    );
    assert_matches!(
        app.orders().order_history(&driver(), order.id).await,
        Err(ServiceError::Forbidden(_))
    );

    let details = app.orders().get_order(&department_user(&other), order.id).await.unwrap();
    assert_eq!(details.order.id, order.id);
    assert_eq!(details.items.len(), 1);
}

#[tokio::test]
async fn restriction_rows_can_be_managed() {
    let app = TestApp::new().await;
    let service = &app.state.restrictions;
    let user = Uuid::new_v4();

    assert!(service.get(user).await.unwrap().is_none());
    let defaults = service.effective(user).await.unwrap();
    assert!(defaults.can_approve_orders);
    assert!(!defaults.can_view_all_orders);

    let saved = service
        .upsert(
            user,
            UpsertRestrictionRequest {
                order_rate_limit: Some(5),
                order_rate_period_hours: Some(24),
                can_reject_orders: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(saved.order_rate_limit, Some(5));
    assert!(!saved.can_reject_orders);
    assert!(saved.can_approve_orders);

    let updated = service
        .upsert(
            user,
            UpsertRestrictionRequest {
                can_view_all_orders: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.id, saved.id);
    assert!(updated.can_view_all_orders);
    assert!(!updated.can_reject_orders);
    assert_eq!(updated.order_rate_limit, None);

    assert_matches!(
        service
            .upsert(
                user,
                UpsertRestrictionRequest {
                    order_rate_limit: Some(3),
                    ..Default::default()
                },
            )
            .await,
        Err(ServiceError::ValidationError(_))
    );

    service.delete(user).await.unwrap();
    assert!(service.get(user).await.unwrap().is_none());
    assert_matches!(service.delete(user).await, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn stored_orders_keep_their_department() {
    let app = TestApp::new().await;
    let h = Hospital::seed(&app).await;
    let created = app.create(&h.dept, Uuid::new_v4(), &[("Gauze", 3)]).await;
    let stored: order::Model = app.reload(created[0].order.id).await;
    assert_eq!(stored.department_id, h.dept.id);
    assert_eq!(stored.warehouse_id, Some(h.supplies.id));
}
