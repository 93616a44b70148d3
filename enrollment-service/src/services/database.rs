//! Database service for enrollment-service.
//!
//! Holds the connection pool and the enrollment coordinator: the single
//! atomic transaction that records a verified payment and grants course
//! access exactly once per (provider, reference), regardless of how many
//! times the request is retried or raced.

use crate::models::{Course, Enrollment, Payment};
use crate::services::metrics::DB_QUERY_DURATION;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Constraint names backing the uniqueness invariants. Must match the
/// migration; a duplicate-key failure on any other constraint is fatal.
const PAYMENT_REFERENCE_CONSTRAINT: &str = "payments_provider_reference_key";
const ACTIVE_ENROLLMENT_CONSTRAINT: &str = "enrollments_user_course_active_idx";

/// Input to the atomic commit step.
#[derive(Debug, Clone)]
pub struct CommitEnrollment {
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub provider: String,
    pub reference: String,
}

/// Result of a commit: the canonical payment and enrollment rows for this
/// (provider, reference), and whether they pre-existed this call.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub payment: Payment,
    pub enrollment: Enrollment,
    pub already_enrolled: bool,
}

/// Internal commit failure classification.
enum CommitError {
    /// Duplicate key on one of the known unique constraints: a concurrent
    /// writer won. Recoverable by re-reading the winner's rows.
    Conflict,
    Db(AppError),
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "enrollment-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error("Health check failed", e))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Read Operations
    // -------------------------------------------------------------------------

    /// Look up a course by id.
    #[instrument(skip(self), fields(course_id = %course_id))]
    pub async fn get_course(&self, course_id: Uuid) -> Result<Option<Course>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_course"])
            .start_timer();

        let course = sqlx::query_as::<_, Course>(
            r#"
            SELECT course_id, title, price, currency, is_premium, created_utc
            FROM courses
            WHERE course_id = $1
            "#,
        )
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_error("Failed to get course", e))?;

        timer.observe_duration();

        Ok(course)
    }

    /// Find a payment by its provider reference.
    pub async fn find_payment_by_reference(
        &self,
        provider: &str,
        reference: &str,
    ) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_payment_by_reference"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, user_id, course_id, amount, currency, provider,
                   provider_reference, status, created_utc
            FROM payments
            WHERE provider = $1 AND provider_reference = $2
            "#,
        )
        .bind(provider)
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_error("Failed to find payment", e))?;

        timer.observe_duration();

        Ok(payment)
    }

    /// Find the active enrollment for a (user, course) pair.
    pub async fn find_active_enrollment(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<Option<Enrollment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_active_enrollment"])
            .start_timer();

        let enrollment = sqlx::query_as::<_, Enrollment>(
            r#"
            SELECT enrollment_id, user_id, course_id, status, enrolled_utc
            FROM enrollments
            WHERE user_id = $1 AND course_id = $2 AND status = $3
            "#,
        )
        .bind(user_id)
        .bind(course_id)
        .bind(Enrollment::STATUS_ACTIVE)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_error("Failed to find enrollment", e))?;

        timer.observe_duration();

        Ok(enrollment)
    }

    // -------------------------------------------------------------------------
    // Enrollment Commit
    // -------------------------------------------------------------------------

    /// Durably record a verified payment and its enrollment as one unit.
    ///
    /// All steps run inside a single transaction:
    /// 1. If a payment already exists for (provider, reference), this call is
    ///    a pure duplicate: return the existing payment and active enrollment
    ///    without inserting anything.
    /// 2. Insert the payment row.
    /// 3. Reuse the active enrollment for (user, course) if one exists,
    ///    otherwise insert it.
    ///
    /// When a concurrent commit wins the race, the losing insert fails on one
    /// of the known unique constraints; that loser re-reads the winner's rows
    /// and returns them as its own result. If the winner's rows are not yet
    /// visible, the whole commit is retried once before giving up.
    #[instrument(
        skip(self, input),
        fields(
            user_id = %input.user_id,
            course_id = %input.course_id,
            reference = %input.reference,
        )
    )]
    pub async fn commit_enrollment(
        &self,
        input: &CommitEnrollment,
    ) -> Result<CommitOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["commit_enrollment"])
            .start_timer();

        let mut conflicts = 0u32;
        let outcome = loop {
            match self.try_commit(input).await {
                Ok(outcome) => break outcome,
                Err(CommitError::Conflict) => {
                    // A concurrent writer won; adopt its rows.
                    if let Some(outcome) = self.resolve_existing(input).await? {
                        break outcome;
                    }
                    conflicts += 1;
                    if conflicts > 1 {
                        return Err(AppError::EnrollmentFailed(anyhow::anyhow!(
                            "conflict on reference '{}' but winning rows not found",
                            input.reference
                        )));
                    }
                    // The winning transaction may not be visible yet.
                    warn!(
                        reference = %input.reference,
                        "Commit conflict without visible winner, retrying once"
                    );
                }
                Err(CommitError::Db(e)) => return Err(e),
            }
        };

        timer.observe_duration();

        info!(
            payment_id = %outcome.payment.payment_id,
            enrollment_id = %outcome.enrollment.enrollment_id,
            already_enrolled = outcome.already_enrolled,
            "Enrollment committed"
        );

        Ok(outcome)
    }

    /// One commit attempt inside a single transaction.
    async fn try_commit(&self, input: &CommitEnrollment) -> Result<CommitOutcome, CommitError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CommitError::Db(map_db_error("Failed to begin transaction", e)))?;

        // Step 1: pure-duplicate short circuit on (provider, reference).
        let existing = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, user_id, course_id, amount, currency, provider,
                   provider_reference, status, created_utc
            FROM payments
            WHERE provider = $1 AND provider_reference = $2
            "#,
        )
        .bind(&input.provider)
        .bind(&input.reference)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| CommitError::Db(map_db_error("Failed duplicate check", e)))?;

        if let Some(payment) = existing {
            let enrollment = sqlx::query_as::<_, Enrollment>(
                r#"
                SELECT enrollment_id, user_id, course_id, status, enrolled_utc
                FROM enrollments
                WHERE user_id = $1 AND course_id = $2 AND status = $3
                "#,
            )
            .bind(input.user_id)
            .bind(input.course_id)
            .bind(Enrollment::STATUS_ACTIVE)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| CommitError::Db(map_db_error("Failed enrollment lookup", e)))?;

            tx.rollback().await.ok();

            // A payment without its enrollment is a state this service never
            // writes; surface it instead of papering over.
            let enrollment = enrollment.ok_or_else(|| {
                CommitError::Db(AppError::EnrollmentFailed(anyhow::anyhow!(
                    "payment {} exists without an active enrollment",
                    payment.payment_id
                )))
            })?;

            return Ok(CommitOutcome {
                payment,
                enrollment,
                already_enrolled: true,
            });
        }

        // Step 2: insert the payment row.
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (payment_id, user_id, course_id, amount, currency,
                                  provider, provider_reference, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING payment_id, user_id, course_id, amount, currency, provider,
                      provider_reference, status, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.user_id)
        .bind(input.course_id)
        .bind(input.amount)
        .bind(&input.currency)
        .bind(&input.provider)
        .bind(&input.reference)
        .bind(Payment::STATUS_SUCCESS)
        .fetch_one(&mut *tx)
        .await
        .map_err(classify_commit_error)?;

        // Step 3: reuse the active enrollment if the user already owns the
        // course (re-purchase, or a race with another successful payment).
        let existing_enrollment = sqlx::query_as::<_, Enrollment>(
            r#"
            SELECT enrollment_id, user_id, course_id, status, enrolled_utc
            FROM enrollments
            WHERE user_id = $1 AND course_id = $2 AND status = $3
            "#,
        )
        .bind(input.user_id)
        .bind(input.course_id)
        .bind(Enrollment::STATUS_ACTIVE)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| CommitError::Db(map_db_error("Failed enrollment lookup", e)))?;

        let (enrollment, already_enrolled) = match existing_enrollment {
            Some(enrollment) => (enrollment, true),
            None => {
                let enrollment = sqlx::query_as::<_, Enrollment>(
                    r#"
                    INSERT INTO enrollments (enrollment_id, user_id, course_id, status)
                    VALUES ($1, $2, $3, $4)
                    RETURNING enrollment_id, user_id, course_id, status, enrolled_utc
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(input.user_id)
                .bind(input.course_id)
                .bind(Enrollment::STATUS_ACTIVE)
                .fetch_one(&mut *tx)
                .await
                .map_err(classify_commit_error)?;
                (enrollment, false)
            }
        };

        tx.commit()
            .await
            .map_err(|e| CommitError::Db(map_db_error("Failed to commit transaction", e)))?;

        Ok(CommitOutcome {
            payment,
            enrollment,
            already_enrolled,
        })
    }

    /// After a conflict, adopt the rows the winning transaction created.
    async fn resolve_existing(
        &self,
        input: &CommitEnrollment,
    ) -> Result<Option<CommitOutcome>, AppError> {
        let payment = self
            .find_payment_by_reference(&input.provider, &input.reference)
            .await?;
        let enrollment = self
            .find_active_enrollment(input.user_id, input.course_id)
            .await?;

        match (payment, enrollment) {
            (Some(payment), Some(enrollment)) => Ok(Some(CommitOutcome {
                payment,
                enrollment,
                already_enrolled: true,
            })),
            _ => Ok(None),
        }
    }
}

/// Classify an insert failure: duplicate key on one of the known unique
/// constraints is the expected race, everything else is fatal.
fn classify_commit_error(e: sqlx::Error) -> CommitError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.is_unique_violation()
            && matches!(
                db_err.constraint(),
                Some(PAYMENT_REFERENCE_CONSTRAINT) | Some(ACTIVE_ENROLLMENT_CONSTRAINT)
            )
        {
            return CommitError::Conflict;
        }
    }
    CommitError::Db(map_db_error("Failed to insert", e))
}

/// Wrap a raw sqlx error into the service taxonomy, separating transient
/// infrastructure failures (retried by the caller) from fatal ones.
fn map_db_error(context: &str, e: sqlx::Error) -> AppError {
    if is_transient(&e) {
        AppError::DatabaseUnavailable(anyhow::anyhow!("{}: {}", context, e))
    } else {
        AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
    }
}

/// Transient failure classes: connection loss, pool exhaustion, and the
/// serialization/lock-contention SQLSTATEs that clear on retry.
fn is_transient(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => matches!(
            db_err.code().as_deref(),
            Some("40001") // serialization_failure
                | Some("40P01") // deadlock_detected
                | Some("55P03") // lock_not_available
                | Some("57014") // query_canceled (statement timeout)
                | Some("08000") // connection_exception
                | Some("08006") // connection_failure
        ),
        _ => false,
    }
}
