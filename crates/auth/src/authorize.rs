use thiserror::Error;

use pelleterp_core::UserId;

use crate::{JwtClaims, Permission, Role, permissions_for_roles};

/// A fully resolved principal for authorization decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub name: Option<String>,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

impl Principal {
    /// Resolve a principal from validated token claims using the role policy.
    pub fn from_claims(claims: &JwtClaims) -> Self {
        Self {
            user_id: claims.sub,
            name: claims.name.clone(),
            roles: claims.roles.clone(),
            permissions: permissions_for_roles(&claims.roles),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Authorize a principal for one permission.
///
/// No IO, no panics: a pure policy check.
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.permissions.iter().any(|g| g.grants(required)) {
        Ok(())
    } else {
        tracing::debug!(
            user_id = %principal.user_id,
            permission = %required,
            "authorization denied"
        );
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn principal(role: &'static str) -> Principal {
        let now = Utc::now();
        Principal::from_claims(&JwtClaims {
            sub: UserId::new(),
            name: None,
            roles: vec![Role::new(role)],
            iat: now,
            exp: now + Duration::minutes(5),
        })
    }

    #[test]
    fn viewer_is_forbidden_from_writes() {
        let err = authorize(&principal("viewer"), &Permission::new("sales.create")).unwrap_err();
        assert_eq!(err, AuthzError::Forbidden("sales.create".to_string()));
    }

    #[test]
    fn operator_may_create_sales() {
        assert!(authorize(&principal("operator"), &Permission::new("sales.create")).is_ok());
    }
}
