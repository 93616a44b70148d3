//! Payment record model.
//!
//! A payment row is created exactly once per successful provider transaction
//! and never updated or deleted by this service. The (provider,
//! provider_reference) pair is unique system-wide; the provider guarantees
//! its reference is unique per completed transaction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: Uuid,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub provider: String,
    pub provider_reference: String,
    pub status: String,
    pub created_utc: DateTime<Utc>,
}

impl Payment {
    /// The only status this service writes.
    pub const STATUS_SUCCESS: &'static str = "success";
}
