//! Payment verification handler.

use axum::{extract::State, Json};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{VerifyPaymentRequest, VerifyPaymentResponse};
use crate::middleware::AuthenticatedUser;
use crate::services::verification;
use crate::AppState;

/// Verify a client-supplied payment reference and grant course access.
///
/// The caller always receives either a definitive success (including the
/// idempotent "already enrolled" variant) or a definitive, typed failure.
pub async fn verify_payment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<VerifyPaymentRequest>,
) -> Result<Json<VerifyPaymentResponse>, AppError> {
    payload.validate()?;

    tracing::info!(
        user_id = %user.user_id,
        course_id = %payload.course_id,
        reference = %payload.reference,
        "Verifying course payment"
    );

    let outcome = verification::verify_and_enroll(
        &state,
        user.user_id,
        &payload.reference,
        payload.course_id,
    )
    .await?;

    Ok(Json(outcome.into()))
}
