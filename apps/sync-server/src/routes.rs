//! HTTP handlers. Each one decodes, calls the gateway, and maps the result.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use stockline_core::{StockMovement, TransferStatus};
use stockline_sync::protocol::{
    AdjustPayload, ComponentsPayload, CreateTransferPayload, ReceivePoPayload, SupplierPaymentPayload,
};
use stockline_sync::{SyncError, SyncGateway, SyncReply, SyncResult, Synced, Transitioned};
use tracing::warn;

use crate::tenant::Tenant;

// =============================================================================
// Response helpers
// =============================================================================

/// Renders a [`SyncReply`] with its own status code.
pub fn reply(reply: SyncReply) -> impl IntoResponse {
    let status = StatusCode::from_u16(reply.http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(reply))
}

fn failure(err: SyncError) -> Response {
    reply(SyncReply::rejected(&err)).into_response()
}

fn respond<T: Serialize>(status: StatusCode, result: SyncResult<T>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(err) => failure(err),
    }
}

/// Entity after a transition, with `changed: false` on a repeated call.
#[derive(Serialize)]
struct TransitionBody<T> {
    changed: bool,
    #[serde(flatten)]
    entity: T,
}

fn transitioned<T: Serialize>(result: SyncResult<Transitioned<T>>) -> Response {
    respond(
        StatusCode::OK,
        result.map(|t| TransitionBody {
            changed: t.is_applied(),
            entity: t.entity,
        }),
    )
}

fn decode<T: DeserializeOwned>(kind: &str, body: &Bytes) -> SyncResult<T> {
    serde_json::from_slice(body).map_err(|e| SyncError::InvalidPayload {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

// =============================================================================
// Sync
// =============================================================================

pub async fn sync_transaction(State(gateway): State<SyncGateway>, Tenant(tenant): Tenant, body: Bytes) -> Response {
    let envelope: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            warn!(tenant_id = %tenant.tenant_id, error = %e, "Sync body is not JSON");
            return failure(SyncError::MalformedEnvelope(e.to_string()));
        }
    };
    reply(gateway.process(&tenant, &envelope).await).into_response()
}

// =============================================================================
// Transfers
// =============================================================================

pub async fn request_transfer(State(gateway): State<SyncGateway>, Tenant(tenant): Tenant, body: Bytes) -> Response {
    let payload: CreateTransferPayload = match decode("create_transfer", &body) {
        Ok(p) => p,
        Err(err) => return failure(err),
    };
    match gateway.transfers().request(&tenant, None, payload).await {
        Ok(Synced::Created(transfer)) => (StatusCode::CREATED, Json(transfer)).into_response(),
        Ok(Synced::AlreadySynced(record)) => (
            StatusCode::OK,
            Json(json!({"status": "exists", "id": record.entity_id, "reference": record.reference})),
        )
            .into_response(),
        Err(err) => failure(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListTransfers {
    pub status: Option<TransferStatus>,
}

pub async fn list_transfers(
    State(gateway): State<SyncGateway>,
    Tenant(tenant): Tenant,
    Query(query): Query<ListTransfers>,
) -> Response {
    respond(StatusCode::OK, gateway.transfers().list(&tenant.tenant_id, query.status).await)
}

pub async fn get_transfer(State(gateway): State<SyncGateway>, Tenant(tenant): Tenant, Path(id): Path<String>) -> Response {
    respond(StatusCode::OK, gateway.transfers().get(&tenant.tenant_id, &id).await)
}

pub async fn approve_transfer(
    State(gateway): State<SyncGateway>,
    Tenant(tenant): Tenant,
    Path(id): Path<String>,
) -> Response {
    transitioned(gateway.transfers().approve(&tenant, &id).await)
}

pub async fn ship_transfer(State(gateway): State<SyncGateway>, Tenant(tenant): Tenant, Path(id): Path<String>) -> Response {
    transitioned(gateway.transfers().ship(&tenant, &id).await)
}

pub async fn receive_transfer(
    State(gateway): State<SyncGateway>,
    Tenant(tenant): Tenant,
    Path(id): Path<String>,
) -> Response {
    transitioned(gateway.transfers().receive(&tenant, &id).await)
}

pub async fn cancel_transfer(
    State(gateway): State<SyncGateway>,
    Tenant(tenant): Tenant,
    Path(id): Path<String>,
) -> Response {
    transitioned(gateway.transfers().cancel(&tenant, &id).await)
}

// =============================================================================
// Purchase orders
// =============================================================================

pub async fn get_purchase_order(
    State(gateway): State<SyncGateway>,
    Tenant(tenant): Tenant,
    Path(id): Path<String>,
) -> Response {
    respond(StatusCode::OK, gateway.purchases().get(&tenant.tenant_id, &id).await)
}

/// An empty body receives every line as ordered.
pub async fn receive_purchase_order(
    State(gateway): State<SyncGateway>,
    Tenant(tenant): Tenant,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        ReceivePoPayload::default()
    } else {
        match decode("receive_purchase_order", &body) {
            Ok(p) => p,
            Err(err) => return failure(err),
        }
    };
    respond(
        StatusCode::OK,
        gateway.purchases().receive_purchase_order(&tenant, &id, payload).await,
    )
}

pub async fn cancel_purchase_order(
    State(gateway): State<SyncGateway>,
    Tenant(tenant): Tenant,
    Path(id): Path<String>,
) -> Response {
    transitioned(gateway.purchases().cancel_purchase_order(&tenant, &id).await)
}

pub async fn supplier_payment(
    State(gateway): State<SyncGateway>,
    Tenant(tenant): Tenant,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let payload: SupplierPaymentPayload = match decode("supplier_payment", &body) {
        Ok(p) => p,
        Err(err) => return failure(err),
    };
    respond(
        StatusCode::CREATED,
        gateway.purchases().record_supplier_payment(&tenant, &id, payload).await,
    )
}

// =============================================================================
// Orders
// =============================================================================

pub async fn get_order(State(gateway): State<SyncGateway>, Tenant(tenant): Tenant, Path(id): Path<String>) -> Response {
    respond(StatusCode::OK, gateway.orders().get(&tenant.tenant_id, &id).await)
}

pub async fn complete_order(State(gateway): State<SyncGateway>, Tenant(tenant): Tenant, Path(id): Path<String>) -> Response {
    transitioned(gateway.orders().complete_pending_order(&tenant, &id).await)
}

pub async fn void_order(State(gateway): State<SyncGateway>, Tenant(tenant): Tenant, Path(id): Path<String>) -> Response {
    transitioned(gateway.orders().void_order(&tenant, &id).await)
}

// =============================================================================
// Products
// =============================================================================

pub async fn adjust_stock(
    State(gateway): State<SyncGateway>,
    Tenant(tenant): Tenant,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let payload: AdjustPayload = match decode("adjust_stock", &body) {
        Ok(p) => p,
        Err(err) => return failure(err),
    };
    respond(
        StatusCode::CREATED,
        gateway
            .stock()
            .adjust_stock(&tenant, &id, payload)
            .await
            .map(|record| record.movement),
    )
}

pub async fn get_components(State(gateway): State<SyncGateway>, Tenant(tenant): Tenant, Path(id): Path<String>) -> Response {
    respond(StatusCode::OK, gateway.stock().components(&tenant, &id).await)
}

pub async fn set_components(
    State(gateway): State<SyncGateway>,
    Tenant(tenant): Tenant,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let payload: ComponentsPayload = match decode("set_components", &body) {
        Ok(p) => p,
        Err(err) => return failure(err),
    };
    respond(StatusCode::OK, gateway.stock().set_components(&tenant, &id, payload).await)
}

#[derive(Serialize)]
struct Movements {
    movements: Vec<StockMovement>,
    cached_quantity: i64,
    replayed_quantity: i64,
    consistent: bool,
}

pub async fn movements(State(gateway): State<SyncGateway>, Tenant(tenant): Tenant, Path(id): Path<String>) -> Response {
    let result = async {
        let movements = gateway.stock().history(&tenant, &id).await?;
        let audit = gateway.stock().audit(&tenant, &id).await?;
        Ok::<_, SyncError>(Movements {
            movements,
            consistent: audit.is_consistent(),
            cached_quantity: audit.cached_quantity,
            replayed_quantity: audit.replayed_quantity,
        })
    }
    .await;
    respond(StatusCode::OK, result)
}

// =============================================================================
// Health
// =============================================================================

pub async fn health(State(gateway): State<SyncGateway>) -> Response {
    let db = gateway.context().db().health().await;
    let status = if db.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if db.is_ready() { "ok" } else { "unavailable" },
            "database": db.reachable,
            "pending_migrations": db.pending_migrations,
        })),
    )
        .into_response()
}
