//! Request extraction helpers and small request/response shapes.
//!
//! Most request bodies are the domain input types themselves (`NewSale`,
//! `ClientPatch`, ...); only transport-specific bits live here.

use std::str::FromStr;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use pelleterp_core::DomainError;

use super::errors::ApiError;

/// A JSON body whose rejection is turned into a 400 by [`body`].
pub type JsonBody<T> = Result<Json<T>, JsonRejection>;

/// Query parameters whose rejection is turned into a 400 by [`params`].
pub type QueryParams<T> = Result<Query<T>, QueryRejection>;

pub fn body<T>(raw: JsonBody<T>) -> Result<T, ApiError> {
    Ok(raw?.0)
}

pub fn params<T>(raw: QueryParams<T>) -> Result<T, ApiError> {
    Ok(raw?.0)
}

/// Parse an id taken from the path (`invalid_id` on failure).
pub fn parse_id<T>(raw: &str) -> Result<T, ApiError>
where
    T: FromStr<Err = DomainError>,
{
    Ok(raw.parse::<T>()?)
}

pub fn ok<T: Serialize>(value: T) -> Response {
    (StatusCode::OK, Json(value)).into_response()
}

pub fn created<T: Serialize>(value: T) -> Response {
    (StatusCode::CREATED, Json(value)).into_response()
}

pub fn items<T: Serialize>(items: Vec<T>) -> Response {
    ok(serde_json::json!({ "items": items }))
}

pub fn no_content() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteParams {
    /// Also delete the record's movement history.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpcomingParams {
    #[serde(default = "default_upcoming_days")]
    pub days: i64,
}

fn default_upcoming_days() -> i64 {
    30
}

/// Optional note attached to a check transition.
#[derive(Debug, Default, Deserialize)]
pub struct TransitionNote {
    #[serde(default)]
    pub note: Option<String>,
}

/// `POST /invoices` body, tagged by `kind`.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NewInvoiceRequest {
    Sale(pelleterp_invoicing::NewSaleInvoice),
    Purchase(pelleterp_invoicing::NewPurchaseInvoice),
}
