use crate::services::verification::VerificationOutcome;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Request to verify a payment and enroll the caller.
#[derive(Debug, Deserialize, Validate)]
pub struct VerifyPaymentRequest {
    /// Provider-issued transaction reference.
    #[validate(length(min = 1, max = 100))]
    pub reference: String,
    pub course_id: Uuid,
}

/// Response after a definitive verification outcome.
#[derive(Debug, Serialize)]
pub struct VerifyPaymentResponse {
    pub payment_id: Uuid,
    pub enrollment_id: Uuid,
    /// True when the caller already owned the course; lets the client render
    /// "already purchased" instead of a duplicate success message.
    pub already_enrolled: bool,
    pub course_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
}

impl From<VerificationOutcome> for VerifyPaymentResponse {
    fn from(outcome: VerificationOutcome) -> Self {
        Self {
            payment_id: outcome.payment_id,
            enrollment_id: outcome.enrollment_id,
            already_enrolled: outcome.already_enrolled,
            course_id: outcome.course_id,
            amount: outcome.amount,
            currency: outcome.currency,
        }
    }
}
