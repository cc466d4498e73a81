use std::sync::Arc;

use axum::{
    Extension, Router,
    extract::Path,
    response::Response,
    routing::get,
};

use pelleterp_infra::Services;
use pelleterp_infra::services::clients::{ClientQuery, CreditAdjustment};
use pelleterp_parties::{ClientId, ClientPatch, NewClient};

use crate::app::dto::{self, JsonBody, QueryParams};
use crate::app::errors::ApiError;
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_clients).post(create_client))
        .route("/:id", get(get_client).patch(update_client).delete(delete_client))
        .route("/:id/credit", get(credit_ledger).post(adjust_credit))
}

pub async fn create_client(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    body: JsonBody<NewClient>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "clients.create")?;
    let client = services.create_client(dto::body(body)?).await?;
    Ok(dto::created(client))
}

pub async fn list_clients(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    query: QueryParams<ClientQuery>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "clients.read")?;
    let query = dto::params(query)?;
    Ok(dto::items(services.list_clients(&query).await?))
}

pub async fn get_client(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "clients.read")?;
    let id: ClientId = dto::parse_id(&id)?;
    Ok(dto::ok(services.get_client(id).await?))
}

pub async fn update_client(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: JsonBody<ClientPatch>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "clients.update")?;
    let id: ClientId = dto::parse_id(&id)?;
    Ok(dto::ok(services.update_client(id, dto::body(body)?).await?))
}

pub async fn delete_client(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "clients.delete")?;
    let id: ClientId = dto::parse_id(&id)?;
    services.delete_client(id).await?;
    Ok(dto::no_content())
}

pub async fn credit_ledger(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "clients.read")?;
    let id: ClientId = dto::parse_id(&id)?;
    Ok(dto::ok(services.credit_ledger(id).await?))
}

pub async fn adjust_credit(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: JsonBody<CreditAdjustment>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "clients.credit")?;
    let id: ClientId = dto::parse_id(&id)?;
    Ok(dto::ok(services.adjust_credit(id, dto::body(body)?).await?))
}
