use std::sync::Arc;

use axum::{Extension, response::Response};

use pelleterp_infra::Services;

use crate::app::dto;
use crate::app::errors::ApiError;
use crate::authz;
use crate::context::PrincipalContext;

pub async fn summary(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "dashboard.read")?;
    Ok(dto::ok(services.dashboard().await?))
}
