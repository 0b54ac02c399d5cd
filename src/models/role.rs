use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::OrderStatus;
use crate::{errors::ServiceError, services::restrictions::RestrictionOracle};

/// Role carried by an authenticated caller.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Role {
    Admin,
    Warehouse,
    Department,
    Driver,
}

/// The caller on whose behalf an operation runs, as resolved by the auth layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
    /// Department the user belongs to (department users).
    pub department_id: Option<Uuid>,
    /// Warehouse the user supervises (warehouse staff).
    pub warehouse_id: Option<Uuid>,
}

impl Actor {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self {
            id,
            role,
            department_id: None,
            warehouse_id: None,
        }
    }

    pub fn with_department(mut self, department_id: Uuid) -> Self {
        self.department_id = Some(department_id);
        self
    }

    pub fn with_warehouse(mut self, warehouse_id: Uuid) -> Self {
        self.warehouse_id = Some(warehouse_id);
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl Role {
    /// Decides whether a caller holding this role may move an order from
    /// `current` to `requested`. Role rules are checked before the generic
    /// transition table; the oracle is consulted only where a rule needs a
    /// live permission.
    pub async fn authorize_transition(
        self,
        actor_id: Uuid,
        current: OrderStatus,
        requested: OrderStatus,
        oracle: &dyn RestrictionOracle,
    ) -> Result<(), ServiceError> {
        use OrderStatus::*;

        match self {
            Role::Admin => {
                if current != Pending {
                    return Err(ServiceError::Forbidden(
                        "Admins may only approve or reject pending orders".to_string(),
                    ));
                }
                if !matches!(requested, Approved | Rejected) {
                    return Err(ServiceError::Forbidden(
                        "Admins may only change status to APPROVED or REJECTED".to_string(),
                    ));
                }
                Ok(())
            }
            Role::Warehouse => match (current, requested) {
                (Pending, Approved) => {
                    if oracle.can_approve_orders(actor_id).await? {
                        Ok(())
                    } else {
                        Err(ServiceError::Forbidden(
                            "You are not allowed to approve orders".to_string(),
                        ))
                    }
                }
                (Pending, Rejected) => {
                    if oracle.can_reject_orders(actor_id).await? {
                        Ok(())
                    } else {
                        Err(ServiceError::Forbidden(
                            "You are not allowed to reject orders".to_string(),
                        ))
                    }
                }
                (Pending, _) => Err(ServiceError::Forbidden(
                    "Warehouse staff may only approve or reject pending orders".to_string(),
                )),
                (Approved, Preparing) | (Approved, Ready) | (Preparing, Ready) => Ok(()),
                (from, to) if from.can_transition_to(to) => Err(ServiceError::Forbidden(format!(
                    "Warehouse staff may not change status from {from} to {to}"
                ))),
                (from, to) => Err(ServiceError::InvalidTransition { from, to }),
            },
            Role::Department => {
                if (current, requested) != (Ready, Delivered) {
                    return Err(ServiceError::Forbidden(
                        "Departments cannot change order status".to_string(),
                    ));
                }
                if oracle.can_receive_ready_orders(actor_id).await? {
                    Ok(())
                } else {
                    Err(ServiceError::Forbidden(
                        "You are not allowed to receive ready orders".to_string(),
                    ))
                }
            }
            Role::Driver => {
                if (current, requested) == (Ready, Delivered) {
                    Ok(())
                } else {
                    Err(ServiceError::Forbidden(
                        "Drivers may only mark ready orders as delivered".to_string(),
                    ))
                }
            }
        }
    }
}
