use std::sync::Arc;

use axum::{
    Extension, Router,
    extract::Path,
    response::Response,
    routing::{get, post},
};

use pelleterp_infra::Services;
use pelleterp_infra::services::invoices::InvoiceQuery;
use pelleterp_invoicing::InvoiceId;

use crate::app::dto::{self, JsonBody, NewInvoiceRequest, QueryParams};
use crate::app::errors::ApiError;
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_invoices).post(create_invoice))
        .route("/:id", get(get_invoice).delete(delete_invoice))
        .route("/:id/cancel", post(cancel_invoice))
}

/// `kind` selects between a sale invoice (numbered here) and a supplier's
/// purchase invoice (numbered by the supplier).
pub async fn create_invoice(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    body: JsonBody<NewInvoiceRequest>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "invoices.create")?;
    let invoice = match dto::body(body)? {
        NewInvoiceRequest::Sale(input) => services.create_sale_invoice(input).await?,
        NewInvoiceRequest::Purchase(input) => services.create_purchase_invoice(input).await?,
    };
    Ok(dto::created(invoice))
}

pub async fn list_invoices(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    query: QueryParams<InvoiceQuery>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "invoices.read")?;
    let query = dto::params(query)?;
    Ok(dto::items(services.list_invoices(&query).await?))
}

pub async fn get_invoice(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "invoices.read")?;
    let id: InvoiceId = dto::parse_id(&id)?;
    Ok(dto::ok(services.get_invoice(id).await?))
}

pub async fn cancel_invoice(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "invoices.update")?;
    let id: InvoiceId = dto::parse_id(&id)?;
    Ok(dto::ok(services.cancel_invoice(id).await?))
}

pub async fn delete_invoice(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "invoices.delete")?;
    let id: InvoiceId = dto::parse_id(&id)?;
    services.delete_invoice(id).await?;
    Ok(dto::no_content())
}
