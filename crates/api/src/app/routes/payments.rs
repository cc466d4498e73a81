use std::sync::Arc;

use axum::{Extension, Router, extract::Path, response::Response, routing::get};

use pelleterp_infra::Services;
use pelleterp_infra::services::payments::{PaymentQuery, PaymentRequest};
use pelleterp_treasury::PaymentId;

use crate::app::dto::{self, JsonBody, QueryParams};
use crate::app::errors::ApiError;
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_payments).post(create_payment))
        .route("/:id", get(get_payment).delete(delete_payment))
}

pub async fn create_payment(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    body: JsonBody<PaymentRequest>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "payments.create")?;
    Ok(dto::created(services.create_payment(dto::body(body)?).await?))
}

pub async fn list_payments(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    query: QueryParams<PaymentQuery>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "payments.read")?;
    let query = dto::params(query)?;
    Ok(dto::items(services.list_payments(&query).await?))
}

pub async fn get_payment(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "payments.read")?;
    let id: PaymentId = dto::parse_id(&id)?;
    Ok(dto::ok(services.get_payment(id).await?))
}

/// Undoes the payment's allocations and credit before removing it.
pub async fn delete_payment(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "payments.delete")?;
    let id: PaymentId = dto::parse_id(&id)?;
    services.delete_payment(id).await?;
    Ok(dto::no_content())
}
