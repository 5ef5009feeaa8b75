//! Tenant extraction from request headers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use stockline_core::{TenantContext, ValidationError};
use stockline_sync::{SyncError, SyncReply};

use crate::routes::reply;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const ACTOR_HEADER: &str = "x-actor-id";

/// The calling tenant, taken from `X-Tenant-Id` / `X-Actor-Id`.
#[derive(Debug, Clone)]
pub struct Tenant(pub TenantContext);

impl<S> FromRequestParts<S> for Tenant
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let Some(tenant_id) = header(TENANT_HEADER) else {
            let err = SyncError::from(ValidationError::Required {
                field: "X-Tenant-Id".to_string(),
            });
            return Err(reply(SyncReply::rejected(&err)).into_response());
        };

        let mut tenant = TenantContext::new(tenant_id);
        if let Some(actor) = header(ACTOR_HEADER) {
            tenant = tenant.with_actor(actor);
        }
        Ok(Tenant(tenant))
    }
}
