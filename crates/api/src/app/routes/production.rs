use std::sync::Arc;

use axum::{Extension, Router, extract::Path, response::Response, routing::get};

use pelleterp_infra::Services;
use pelleterp_infra::services::production::ProductionQuery;
use pelleterp_production::{NewProduction, ProductionId};

use crate::app::dto::{self, JsonBody, QueryParams};
use crate::app::errors::ApiError;
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_productions).post(register_production))
        .route("/yield", get(production_yield))
        .route("/:id", get(get_production).delete(delete_production))
}

/// Registers a batch with its consumptions and generations in one commit.
pub async fn register_production(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    body: JsonBody<NewProduction>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "productions.create")?;
    Ok(dto::created(services.register_production(dto::body(body)?).await?))
}

pub async fn list_productions(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    query: QueryParams<ProductionQuery>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "productions.read")?;
    let query = dto::params(query)?;
    Ok(dto::items(services.list_productions(&query).await?))
}

pub async fn get_production(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "productions.read")?;
    let id: ProductionId = dto::parse_id(&id)?;
    Ok(dto::ok(services.get_production(id).await?))
}

pub async fn delete_production(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "productions.delete")?;
    let id: ProductionId = dto::parse_id(&id)?;
    services.delete_production(id).await?;
    Ok(dto::no_content())
}

pub async fn production_yield(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    query: QueryParams<ProductionQuery>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "productions.read")?;
    let query = dto::params(query)?;
    Ok(dto::items(services.production_yield(&query).await?))
}
