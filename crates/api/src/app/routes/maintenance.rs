//! Repair jobs. Every job is a dry run unless `?dry_run=false` is given.

use std::sync::Arc;

use axum::{Extension, Router, response::Response, routing::post};

use pelleterp_infra::Services;
use pelleterp_infra::services::maintenance::MaintenanceOptions;

use crate::app::dto::{self, QueryParams};
use crate::app::errors::ApiError;
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/reconcile-payments", post(reconcile_payments))
        .route("/repair-production", post(repair_production))
        .route("/rebuild-stock", post(rebuild_stock))
        .route("/cleanup-invoices", post(cleanup_invoices))
        .route("/duplicate-sales", post(duplicate_sales))
}

fn options(
    principal: &PrincipalContext,
    raw: QueryParams<MaintenanceOptions>,
) -> Result<MaintenanceOptions, ApiError> {
    authz::require(principal, "maintenance.run")?;
    dto::params(raw)
}

pub async fn reconcile_payments(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    raw: QueryParams<MaintenanceOptions>,
) -> Result<Response, ApiError> {
    let options = options(&principal, raw)?;
    Ok(dto::ok(services.reconcile_payments(options).await?))
}

pub async fn repair_production(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    raw: QueryParams<MaintenanceOptions>,
) -> Result<Response, ApiError> {
    let options = options(&principal, raw)?;
    Ok(dto::ok(services.repair_production(options).await?))
}

pub async fn rebuild_stock(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    raw: QueryParams<MaintenanceOptions>,
) -> Result<Response, ApiError> {
    let options = options(&principal, raw)?;
    Ok(dto::ok(services.rebuild_stock(options).await?))
}

pub async fn cleanup_invoices(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    raw: QueryParams<MaintenanceOptions>,
) -> Result<Response, ApiError> {
    let options = options(&principal, raw)?;
    Ok(dto::ok(services.cleanup_invoices(options).await?))
}

pub async fn duplicate_sales(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    raw: QueryParams<MaintenanceOptions>,
) -> Result<Response, ApiError> {
    let options = options(&principal, raw)?;
    Ok(dto::ok(services.duplicate_sales(options).await?))
}
