//! End-to-end payment verification pipeline.
//!
//! Composes the rate limiter, provider client, reconciliation and the
//! enrollment commit into one flow: gate -> external confirmation ->
//! idempotent durable commit -> normalized result. Only the commit step is
//! retried (transient database failures); provider and validation failures
//! are deterministic and surface immediately.

use crate::services::database::CommitEnrollment;
use crate::services::metrics::{PROVIDER_CALL_DURATION, VERIFICATIONS_TOTAL};
use crate::services::paystack::{ProviderError, PROVIDER_NAME};
use crate::services::reconcile;
use crate::AppState;
use rust_decimal::Decimal;
use service_core::error::AppError;
use service_core::retry::{retry_with_backoff, RetryConfig};
use std::time::Instant;
use uuid::Uuid;

/// Normalized result of a verification request.
#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    pub payment_id: Uuid,
    pub enrollment_id: Uuid,
    pub already_enrolled: bool,
    pub course_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
}

/// Verify a client-supplied payment reference and grant course access.
///
/// `already_enrolled` is surfaced so the caller can render "already
/// purchased" rather than a duplicate success message.
pub async fn verify_and_enroll(
    state: &AppState,
    user_id: Uuid,
    reference: &str,
    course_id: Uuid,
) -> Result<VerificationOutcome, AppError> {
    let settings = &state.config.verification;

    validate_reference(reference)?;

    let decision = state.limiter.check(&user_id.to_string());
    if !decision.allowed {
        VERIFICATIONS_TOTAL
            .with_label_values(&["rate_limited"])
            .inc();
        return Err(AppError::TooManyRequests(
            "Too many verification attempts. Please try again later.".to_string(),
            Some(decision.retry_after_secs()),
        ));
    }

    let course = state
        .db
        .get_course(course_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Course not found")))?;

    if course.is_free() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Course is free and cannot be purchased"
        )));
    }

    // External confirmation. Never retried within a request: the call has a
    // hard timeout and the client may safely retry later.
    let started = Instant::now();
    let verified = state.paystack.verify_transaction(reference).await;
    PROVIDER_CALL_DURATION
        .with_label_values(&[provider_result_label(&verified)])
        .observe(started.elapsed().as_secs_f64());

    let verified = verified.map_err(|e| match e {
        ProviderError::Timeout => {
            AppError::GatewayTimeout("Payment provider timed out. Please try again.".to_string())
        }
        ProviderError::Unreachable(msg) => {
            tracing::error!(reference = %reference, error = %msg, "Provider unreachable");
            AppError::BadGateway(
                "Payment provider is unreachable. Please try again later.".to_string(),
            )
        }
        ProviderError::Rejected(msg) => {
            VERIFICATIONS_TOTAL.with_label_values(&["rejected"]).inc();
            AppError::PaymentRejected(format!("Payment was not successful: {}", msg))
        }
    })?;

    // Reconciliation: the provider amount must cover the course price.
    let amount = reconcile::reconcile_amount(
        verified.amount_minor,
        course.price,
        settings.amount_tolerance,
    )
    .map_err(|mismatch| {
        tracing::error!(
            reference = %reference,
            course_id = %course_id,
            user_id = %user_id,
            received = %mismatch.received,
            expected = %mismatch.expected,
            "Payment amount mismatch"
        );
        VERIFICATIONS_TOTAL.with_label_values(&["rejected"]).inc();
        AppError::PaymentRejected("Payment amount does not match the course price".to_string())
    })?;

    let currency = reconcile::normalize_currency(
        verified.currency.as_deref(),
        &settings.allowed_currencies,
        &settings.home_currency,
    );

    let input = CommitEnrollment {
        user_id,
        course_id,
        amount,
        currency,
        provider: PROVIDER_NAME.to_string(),
        reference: reference.to_string(),
    };

    // Commit under the transient-failure retry policy. Conflicts from
    // duplicate submissions are resolved inside the coordinator and never
    // reach this classifier.
    let retry_config = RetryConfig::with_max_retries(settings.commit_max_retries);
    let outcome = retry_with_backoff(
        &retry_config,
        "commit_enrollment",
        |e: &AppError| matches!(e, AppError::DatabaseUnavailable(_)),
        || async { state.db.commit_enrollment(&input).await },
    )
    .await?;

    VERIFICATIONS_TOTAL
        .with_label_values(&[if outcome.already_enrolled {
            "already_enrolled"
        } else {
            "enrolled"
        }])
        .inc();

    Ok(VerificationOutcome {
        payment_id: outcome.payment.payment_id,
        enrollment_id: outcome.enrollment.enrollment_id,
        already_enrolled: outcome.already_enrolled,
        course_id,
        amount: outcome.payment.amount,
        currency: outcome.payment.currency,
    })
}

/// Shape validation for the provider reference. Runs before any provider or
/// database work.
fn validate_reference(reference: &str) -> Result<(), AppError> {
    if reference.trim().is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Payment reference must not be empty"
        )));
    }

    if !reference
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '='))
    {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Payment reference contains invalid characters"
        )));
    }

    Ok(())
}

fn provider_result_label<T>(result: &Result<T, ProviderError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(ProviderError::Rejected(_)) => "rejected",
        Err(ProviderError::Unreachable(_)) => "unreachable",
        Err(ProviderError::Timeout) => "timeout",
    }
}
