use std::sync::Arc;

use axum::{
    Extension, Router,
    extract::Path,
    response::Response,
    routing::{get, post},
};

use pelleterp_infra::Services;
use pelleterp_infra::services::sales::SaleQuery;
use pelleterp_sales::{NewSale, SaleId, SalePatch};

use crate::app::dto::{self, JsonBody, QueryParams};
use crate::app::errors::ApiError;
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_sales).post(create_sale))
        .route("/:id", get(get_sale).patch(update_sale).delete(delete_sale))
        .route("/:id/cancel", post(cancel_sale))
}

pub async fn create_sale(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    body: JsonBody<NewSale>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "sales.create")?;
    Ok(dto::created(services.create_sale(dto::body(body)?).await?))
}

pub async fn list_sales(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    query: QueryParams<SaleQuery>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "sales.read")?;
    let query = dto::params(query)?;
    Ok(dto::items(services.list_sales(&query).await?))
}

pub async fn get_sale(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "sales.read")?;
    let id: SaleId = dto::parse_id(&id)?;
    Ok(dto::ok(services.get_sale(id).await?))
}

/// Only descriptive fields can change; lines and amounts are fixed once sold.
pub async fn update_sale(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: JsonBody<SalePatch>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "sales.update")?;
    let id: SaleId = dto::parse_id(&id)?;
    Ok(dto::ok(services.update_sale(id, dto::body(body)?).await?))
}

pub async fn cancel_sale(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "sales.update")?;
    let id: SaleId = dto::parse_id(&id)?;
    Ok(dto::ok(services.cancel_sale(id).await?))
}

pub async fn delete_sale(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "sales.delete")?;
    let id: SaleId = dto::parse_id(&id)?;
    services.delete_sale(id).await?;
    Ok(dto::no_content())
}
