use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::Path,
    response::Response,
    routing::{get, post},
};

use pelleterp_infra::Services;
use pelleterp_infra::services::checks::{CheckQuery, EndorseRequest, Transition};
use pelleterp_treasury::{CheckAction, CheckId, NewCheck};

use crate::app::dto::{self, JsonBody, QueryParams, TransitionNote, UpcomingParams};
use crate::app::errors::ApiError;
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_checks).post(create_check))
        .route("/upcoming", get(upcoming_checks))
        .route("/:id", get(get_check))
        .route("/:id/deposit", post(deposit))
        .route("/:id/clear", post(clear))
        .route("/:id/reject", post(reject))
        .route("/:id/void", post(void))
        .route("/:id/debit", post(debit))
        .route("/:id/endorse", post(endorse_check))
}

pub async fn create_check(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    body: JsonBody<NewCheck>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "checks.create")?;
    Ok(dto::created(services.create_check(dto::body(body)?).await?))
}

pub async fn list_checks(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    query: QueryParams<CheckQuery>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "checks.read")?;
    let query = dto::params(query)?;
    Ok(dto::items(services.list_checks(&query).await?))
}

pub async fn upcoming_checks(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    params: QueryParams<UpcomingParams>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "checks.read")?;
    let params = dto::params(params)?;
    Ok(dto::items(services.upcoming_checks(params.days).await?))
}

pub async fn get_check(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "checks.read")?;
    let id: CheckId = dto::parse_id(&id)?;
    Ok(dto::ok(services.get_check(id).await?))
}

async fn transition(
    services: Arc<Services>,
    principal: PrincipalContext,
    id: String,
    action: CheckAction,
    note: Option<Json<TransitionNote>>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "checks.transition")?;
    let id: CheckId = dto::parse_id(&id)?;
    let note = note.and_then(|Json(n)| n.note);
    Ok(dto::ok(services.transition_check(id, Transition { action, note }).await?))
}

pub async fn deposit(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    note: Option<Json<TransitionNote>>,
) -> Result<Response, ApiError> {
    transition(services, principal, id, CheckAction::Deposit, note).await
}

pub async fn clear(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    note: Option<Json<TransitionNote>>,
) -> Result<Response, ApiError> {
    transition(services, principal, id, CheckAction::Clear, note).await
}

/// Bounced check: the payments it settled are reversed.
pub async fn reject(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    note: Option<Json<TransitionNote>>,
) -> Result<Response, ApiError> {
    transition(services, principal, id, CheckAction::Reject, note).await
}

pub async fn void(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    note: Option<Json<TransitionNote>>,
) -> Result<Response, ApiError> {
    transition(services, principal, id, CheckAction::Void, note).await
}

pub async fn debit(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    note: Option<Json<TransitionNote>>,
) -> Result<Response, ApiError> {
    transition(services, principal, id, CheckAction::Debit, note).await
}

pub async fn endorse_check(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: JsonBody<EndorseRequest>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "checks.transition")?;
    let id: CheckId = dto::parse_id(&id)?;
    Ok(dto::ok(services.endorse_check(id, dto::body(body)?).await?))
}
