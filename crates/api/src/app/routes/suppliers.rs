use std::sync::Arc;

use axum::{Extension, Router, extract::Path, response::Response, routing::get};

use pelleterp_infra::Services;
use pelleterp_infra::services::suppliers::SupplierQuery;
use pelleterp_parties::{NewSupplier, SupplierId, SupplierPatch};

use crate::app::dto::{self, JsonBody, QueryParams};
use crate::app::errors::ApiError;
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_suppliers).post(create_supplier))
        .route("/:id", get(get_supplier).patch(update_supplier).delete(delete_supplier))
}

pub async fn create_supplier(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    body: JsonBody<NewSupplier>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "suppliers.create")?;
    let supplier = services.create_supplier(dto::body(body)?).await?;
    Ok(dto::created(supplier))
}

pub async fn list_suppliers(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    query: QueryParams<SupplierQuery>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "suppliers.read")?;
    let query = dto::params(query)?;
    Ok(dto::items(services.list_suppliers(&query).await?))
}

pub async fn get_supplier(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "suppliers.read")?;
    let id: SupplierId = dto::parse_id(&id)?;
    Ok(dto::ok(services.get_supplier(id).await?))
}

pub async fn update_supplier(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: JsonBody<SupplierPatch>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "suppliers.update")?;
    let id: SupplierId = dto::parse_id(&id)?;
    Ok(dto::ok(services.update_supplier(id, dto::body(body)?).await?))
}

pub async fn delete_supplier(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "suppliers.delete")?;
    let id: SupplierId = dto::parse_id(&id)?;
    services.delete_supplier(id).await?;
    Ok(dto::no_content())
}
