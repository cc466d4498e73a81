//! `pelleterp-auth` — authentication/authorization boundary.
//!
//! Decoupled from HTTP and storage: the API layer extracts a bearer token,
//! validates it here and checks permissions before invoking a service.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod roles;

pub use authorize::{AuthzError, Principal, authorize};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use permissions::Permission;
pub use roles::{Role, permissions_for_roles};
