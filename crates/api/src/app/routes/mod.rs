use axum::{Router, routing::get};

pub mod checks;
pub mod clients;
pub mod dashboard;
pub mod inventory;
pub mod invoices;
pub mod maintenance;
pub mod payments;
pub mod production;
pub mod sales;
pub mod suppliers;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/dashboard", get(dashboard::summary))
        .nest("/clients", clients::router())
        .nest("/suppliers", suppliers::router())
        .nest("/stock", inventory::stock_router())
        .nest("/supplies", inventory::supplies_router())
        .nest("/productions", production::router())
        .nest("/sales", sales::router())
        .nest("/invoices", invoices::router())
        .nest("/payments", payments::router())
        .nest("/checks", checks::router())
        .nest("/maintenance", maintenance::router())
}
