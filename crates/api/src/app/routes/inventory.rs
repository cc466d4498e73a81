//! Finished stock (`/stock`) and supplies (`/supplies`). Both expose the same
//! shape: CRUD, manual adjustment, movement history and a low-level report.

use std::sync::Arc;

use axum::{
    Extension, Router,
    extract::Path,
    response::Response,
    routing::{get, post},
};

use pelleterp_infra::Services;
use pelleterp_infra::services::stock::{Adjustment, InventoryQuery};
use pelleterp_inventory::{NewStock, NewSupply, StockId, StockPatch, SupplyId, SupplyPatch};

use crate::app::dto::{self, DeleteParams, JsonBody, QueryParams};
use crate::app::errors::ApiError;
use crate::authz;
use crate::context::PrincipalContext;

pub fn stock_router() -> Router {
    Router::new()
        .route("/", get(list_stock).post(create_stock))
        .route("/low", get(low_stock))
        .route("/:id", get(get_stock).patch(update_stock).delete(delete_stock))
        .route("/:id/adjust", post(adjust_stock))
        .route("/:id/movements", get(stock_movements))
}

pub fn supplies_router() -> Router {
    Router::new()
        .route("/", get(list_supplies).post(create_supply))
        .route("/low", get(low_supplies))
        .route("/:id", get(get_supply).patch(update_supply).delete(delete_supply))
        .route("/:id/adjust", post(adjust_supply))
        .route("/:id/movements", get(supply_movements))
}

// ---- stock ----

pub async fn create_stock(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    body: JsonBody<NewStock>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "stock.create")?;
    Ok(dto::created(services.create_stock(dto::body(body)?).await?))
}

pub async fn list_stock(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    query: QueryParams<InventoryQuery>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "stock.read")?;
    let query = dto::params(query)?;
    Ok(dto::items(services.list_stock(&query).await?))
}

pub async fn low_stock(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "stock.read")?;
    Ok(dto::items(services.low_stock().await?))
}

pub async fn get_stock(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "stock.read")?;
    let id: StockId = dto::parse_id(&id)?;
    Ok(dto::ok(services.get_stock(id).await?))
}

pub async fn update_stock(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: JsonBody<StockPatch>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "stock.update")?;
    let id: StockId = dto::parse_id(&id)?;
    Ok(dto::ok(services.update_stock(id, dto::body(body)?).await?))
}

pub async fn adjust_stock(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: JsonBody<Adjustment>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "stock.update")?;
    let id: StockId = dto::parse_id(&id)?;
    Ok(dto::ok(services.adjust_stock(id, dto::body(body)?).await?))
}

pub async fn stock_movements(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "stock.read")?;
    let id: StockId = dto::parse_id(&id)?;
    Ok(dto::items(services.stock_movements(id).await?))
}

pub async fn delete_stock(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    params: QueryParams<DeleteParams>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "stock.delete")?;
    let id: StockId = dto::parse_id(&id)?;
    let params = dto::params(params)?;
    services.delete_stock(id, params.force).await?;
    Ok(dto::no_content())
}

// ---- supplies ----

pub async fn create_supply(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    body: JsonBody<NewSupply>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "supplies.create")?;
    Ok(dto::created(services.create_supply(dto::body(body)?).await?))
}

pub async fn list_supplies(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    query: QueryParams<InventoryQuery>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "supplies.read")?;
    let query = dto::params(query)?;
    Ok(dto::items(services.list_supplies(&query).await?))
}

pub async fn low_supplies(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "supplies.read")?;
    Ok(dto::items(services.low_supplies().await?))
}

pub async fn get_supply(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "supplies.read")?;
    let id: SupplyId = dto::parse_id(&id)?;
    Ok(dto::ok(services.get_supply(id).await?))
}

pub async fn update_supply(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: JsonBody<SupplyPatch>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "supplies.update")?;
    let id: SupplyId = dto::parse_id(&id)?;
    Ok(dto::ok(services.update_supply(id, dto::body(body)?).await?))
}

pub async fn adjust_supply(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: JsonBody<Adjustment>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "supplies.update")?;
    let id: SupplyId = dto::parse_id(&id)?;
    Ok(dto::ok(services.adjust_supply(id, dto::body(body)?).await?))
}

pub async fn supply_movements(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "supplies.read")?;
    let id: SupplyId = dto::parse_id(&id)?;
    Ok(dto::items(services.supply_movements(id).await?))
}

pub async fn delete_supply(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    params: QueryParams<DeleteParams>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "supplies.delete")?;
    let id: SupplyId = dto::parse_id(&id)?;
    let params = dto::params(params)?;
    services.delete_supply(id, params.force).await?;
    Ok(dto::no_content())
}
