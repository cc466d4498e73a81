//! API-side authorization guard.
//!
//! Every handler names the permission it needs and checks it before calling a
//! service, so services and domain types stay auth-agnostic.

use pelleterp_auth::{AuthzError, Permission, authorize};

use crate::context::PrincipalContext;

/// Check one permission (`area.action`) for the current request.
pub fn require(principal: &PrincipalContext, permission: &'static str) -> Result<(), AuthzError> {
    authorize(principal.principal(), &Permission::new(permission))
}
