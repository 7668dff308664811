//! Tenant context extracted from request headers.
//!
//! The trusted frontend authenticates the user and forwards the school
//! (tenant), the user and their role on every request.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

use crate::models::{Actor, ActorRole};

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const USER_HEADER: &str = "x-user-id";
pub const EMAIL_HEADER: &str = "x-user-email";
pub const ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: String,
    pub actor: Actor,
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant_id = header(parts, TENANT_HEADER).ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing X-Tenant-ID header"))
        })?;
        let user_id = header(parts, USER_HEADER)
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing X-User-ID header")))?;
        let email = header(parts, EMAIL_HEADER).map(str::to_string);
        let role = match header(parts, ROLE_HEADER) {
            None => ActorRole::Guardian,
            Some(raw) => ActorRole::from_header(raw).ok_or_else(|| {
                AppError::Forbidden(anyhow::anyhow!("Unrecognized role: {raw}"))
            })?,
        };

        let span = tracing::Span::current();
        span.record("tenant_id", tenant_id);
        span.record("user_id", user_id);

        Ok(TenantContext {
            tenant_id: tenant_id.to_string(),
            actor: Actor::new(user_id, email, role),
        })
    }
}
