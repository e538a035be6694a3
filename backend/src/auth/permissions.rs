//! Authorization checks against resolved token claims
//!
//! Handlers receive a [`Claims`] value from `resolve_current_user` and call
//! these before proceeding. A failed check is an explicit
//! [`AuthError::Forbidden`].

use crate::auth::jwt::Claims;
use hypertrader_shared::{AuthError, Role};

impl Claims {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.role.as_deref() == Some(role.as_str())
    }
}

/// Require a permission on the caller's claims
pub fn require_permission(claims: &Claims, permission: &str) -> Result<(), AuthError> {
    if claims.has_permission(permission) {
        Ok(())
    } else {
        Err(AuthError::Forbidden(format!(
            "Permission '{}' required",
            permission
        )))
    }
}

/// Require an exact role on the caller's claims
pub fn require_role(claims: &Claims, role: Role) -> Result<(), AuthError> {
    if claims.has_role(role) {
        Ok(())
    } else {
        Err(AuthError::Forbidden(format!("Role '{}' required", role)))
    }
}
