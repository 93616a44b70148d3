//! Caller identity extractor.
//!
//! The gateway authenticates the user and forwards the verified identity as
//! the X-User-ID header. This service consumes that identity; it never issues
//! sessions itself. The gateway strips the header from external traffic.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

/// Verified caller identity extracted from request headers.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get("X-User-ID")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!(
                    "Missing X-User-ID header (required from gateway)"
                ))
            })?;

        let user_id = raw.parse::<Uuid>().map_err(|_| {
            AppError::Unauthorized(anyhow::anyhow!("X-User-ID header is not a valid user id"))
        })?;

        // Add to the tracing span for observability.
        let span = tracing::Span::current();
        span.record("user_id", raw);

        Ok(AuthenticatedUser { user_id })
    }
}
