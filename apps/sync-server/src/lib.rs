//! # Stockline Server
//!
//! Thin HTTP layer over [`SyncGateway`].
//!
//! ## Routes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  POST /api/v1/sync/transaction            envelope replay              │
//! │                                                                         │
//! │  POST /api/v1/transfers                   online transfer request      │
//! │  GET  /api/v1/transfers[?status=]         list                         │
//! │  GET  /api/v1/transfers/{id}                                           │
//! │  POST /api/v1/transfers/{id}/approve                                   │
//! │  POST /api/v1/transfers/{id}/ship                                      │
//! │  POST /api/v1/transfers/{id}/receive                                   │
//! │  POST /api/v1/transfers/{id}/cancel                                    │
//! │                                                                         │
//! │  GET  /api/v1/purchase-orders/{id}                                     │
//! │  POST /api/v1/purchase-orders/{id}/receive                             │
//! │  POST /api/v1/purchase-orders/{id}/cancel                              │
//! │  POST /api/v1/suppliers/{id}/payments     pay down supplier credit     │
//! │                                                                         │
//! │  GET  /api/v1/orders/{id}                                              │
//! │  POST /api/v1/orders/{id}/complete                                     │
//! │  POST /api/v1/orders/{id}/void                                         │
//! │                                                                         │
//! │  POST /api/v1/products/{id}/adjust                                     │
//! │  GET  /api/v1/products/{id}/movements     history + audit              │
//! │  GET  /api/v1/products/{id}/components                                 │
//! │  PUT  /api/v1/products/{id}/components    bundle contents              │
//! │                                                                         │
//! │  GET  /health                                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every `/api` route needs an `X-Tenant-Id` header; `X-Actor-Id` is
//! optional and is recorded on ledger movements.

pub mod routes;
pub mod tenant;

use axum::routing::{get, post};
use axum::Router;
use stockline_sync::SyncGateway;

/// Builds the full router around a gateway.
pub fn router(gateway: SyncGateway) -> Router {
    let api = Router::new()
        .route("/sync/transaction", post(routes::sync_transaction))
        .route("/transfers", post(routes::request_transfer).get(routes::list_transfers))
        .route("/transfers/{id}", get(routes::get_transfer))
        .route("/transfers/{id}/approve", post(routes::approve_transfer))
        .route("/transfers/{id}/ship", post(routes::ship_transfer))
        .route("/transfers/{id}/receive", post(routes::receive_transfer))
        .route("/transfers/{id}/cancel", post(routes::cancel_transfer))
        .route("/purchase-orders/{id}", get(routes::get_purchase_order))
        .route("/purchase-orders/{id}/receive", post(routes::receive_purchase_order))
        .route("/purchase-orders/{id}/cancel", post(routes::cancel_purchase_order))
        .route("/suppliers/{id}/payments", post(routes::supplier_payment))
        .route("/orders/{id}", get(routes::get_order))
        .route("/orders/{id}/complete", post(routes::complete_order))
        .route("/orders/{id}/void", post(routes::void_order))
        .route("/products/{id}/adjust", post(routes::adjust_stock))
        .route("/products/{id}/movements", get(routes::movements))
        .route("/products/{id}/components", get(routes::get_components).put(routes::set_components));

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(routes::health))
        .with_state(gateway)
}
