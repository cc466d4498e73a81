use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::Permission;

/// Role identifier used for RBAC.
///
/// Roles are opaque strings in tokens; [`permissions_for_roles`] is the policy
/// that turns them into grants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const ADMIN: &'static str = "admin";
    pub const OPERATOR: &'static str = "operator";
    pub const VIEWER: &'static str = "viewer";

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Business areas an operator may write to.
const OPERATOR_AREAS: &[&str] = &[
    "clients", "suppliers", "stock", "supplies", "productions", "sales", "invoices", "payments",
    "checks",
];

/// Role → permission policy.
///
/// - `admin`: everything.
/// - `operator`: every read plus create/update/transition actions on business
///   areas; no deletes and no maintenance.
/// - `viewer`: reads only.
///
/// Unknown roles grant nothing.
pub fn permissions_for_roles(roles: &[Role]) -> Vec<Permission> {
    let mut grants = Vec::new();
    for role in roles {
        match role.as_str() {
            Role::ADMIN => grants.push(Permission::new("*")),
            Role::OPERATOR => {
                grants.push(Permission::new("*.read"));
                for area in OPERATOR_AREAS {
                    for action in ["create", "update", "transition", "credit"] {
                        grants.push(Permission::new(format!("{area}.{action}")));
                    }
                }
            }
            Role::VIEWER => grants.push(Permission::new("*.read")),
            _ => {}
        }
    }
    grants
}
