use crate::error::Result;
use crate::store::Store;
use crate::types::{Permission, User};

/// Request-scoped actor context: the authenticated user plus the effective
/// permission set, resolved once per request by the auth extractor and
/// passed into every handler and lifecycle operation.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user: User,
    pub permissions: Permission,
}

impl Actor {
    #[must_use]
    pub fn can(&self, required: Permission) -> bool {
        self.permissions.has(required)
    }
}

/// Computes the effective permission set for a user:
/// union of the bits of all active role memberships and the direct allow
/// bits, minus the direct deny bits, expanded for implied permissions.
///
/// A user with zero active roles and no direct grant resolves to the empty
/// set — default deny, not an implicit "viewer".
pub fn resolve_effective(store: &dyn Store, user_id: &str) -> Result<Permission> {
    let mut allow = Permission::default();
    for role in store.list_user_roles(user_id)? {
        allow = allow.union(role.permission_bits);
    }

    let mut deny = Permission::default();
    if let Some(grant) = store.get_user_grant(user_id)? {
        allow = allow.union(grant.allow_bits);
        deny = deny.union(grant.deny_bits);
    }

    // Deny bits are never expanded; they subtract exactly what they name.
    Ok(allow.expand_implied().difference(deny))
}

/// Fail-closed variant: a store failure during resolution is logged and
/// yields the empty permission set, so the request is denied downstream
/// rather than erroring.
pub fn resolve_or_deny(store: &dyn Store, user_id: &str) -> Permission {
    match resolve_effective(store, user_id) {
        Ok(permissions) => permissions,
        Err(e) => {
            tracing::error!("Permission resolution failed for user {user_id}: {e}");
            Permission::default()
        }
    }
}
