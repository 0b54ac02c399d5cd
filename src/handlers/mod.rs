pub mod orders;
pub mod preparation_logs;
pub mod restrictions;

use crate::{errors::ServiceError, models::{Actor, Role}};

/// Rejects callers whose role is not in `allowed`.
pub(crate) fn require_role(actor: &Actor, allowed: &[Role], action: &str) -> Result<(), ServiceError> {
    if allowed.contains(&actor.role) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(format!(
            "Role {} may not {}",
            actor.role, action
        )))
    }
}
