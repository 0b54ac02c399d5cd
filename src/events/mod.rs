use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{OrderStatus, PreparationAction};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends after a commit. The write already happened, so a closed
    /// channel only costs the notification.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Dropped domain event");
        }
    }
}

/// Domain events emitted after the owning transaction commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        warehouse_id: Uuid,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
        changed_by: Uuid,
    },
    OrderUpdated(Uuid),
    OrderItemsReplaced {
        order_id: Uuid,
        item_count: usize,
    },
    OrderDeleted(Uuid),
    ItemPreparationLogged {
        order_id: Uuid,
        item_name: String,
        action: PreparationAction,
    },
}

impl Event {
    pub fn order_id(&self) -> Uuid {
        match self {
            Event::OrderCreated { order_id, .. }
            | Event::OrderStatusChanged { order_id, .. }
            | Event::OrderItemsReplaced { order_id, .. }
            | Event::ItemPreparationLogged { order_id, .. } => *order_id,
            Event::OrderUpdated(order_id) | Event::OrderDeleted(order_id) => *order_id,
        }
    }
}

/// Handlers implementing this trait receive every event from the loop.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Writes each event to the structured log.
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        match event {
            Event::OrderCreated {
                order_id,
                order_number,
                warehouse_id,
            } => info!(%order_id, %order_number, %warehouse_id, "order created"),
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
                changed_by,
            } => info!(%order_id, %old_status, %new_status, %changed_by, "order status changed"),
            Event::OrderUpdated(order_id) => info!(%order_id, "order details edited"),
            Event::OrderItemsReplaced {
                order_id,
                item_count,
            } => info!(%order_id, item_count, "order items replaced"),
            Event::OrderDeleted(order_id) => info!(%order_id, "order deleted"),
            Event::ItemPreparationLogged {
                order_id,
                item_name,
                action,
            } => info!(%order_id, %item_name, %action, "item preparation logged"),
        }
        Ok(())
    }
}

/// Drains the channel, fanning each event out to every handler.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        let results = join_all(handlers.iter().map(|h| h.handle_event(&event))).await;
        for result in results {
            if let Err(e) = result {
                error!(order_id = %event.order_id(), error = %e, "Event handler failed");
            }
        }
    }

    warn!("Event processing loop has ended");
}
