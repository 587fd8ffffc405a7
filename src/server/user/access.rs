use crate::auth::Actor;
use crate::server::response::ApiError;
use crate::types::Permission;

/// Check the actor's pre-resolved permission set, returning forbidden if the
/// required permission is missing.
pub fn require_permission(actor: &Actor, required: Permission) -> Result<(), ApiError> {
    if !actor.can(required) {
        return Err(ApiError::forbidden("Insufficient permissions"));
    }
    Ok(())
}
