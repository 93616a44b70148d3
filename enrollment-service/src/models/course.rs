//! Course catalog model (read-only for this service).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Course {
    pub course_id: Uuid,
    pub title: String,
    /// Price in the course currency's major unit, non-negative.
    pub price: Decimal,
    pub currency: String,
    pub is_premium: bool,
    pub created_utc: DateTime<Utc>,
}

impl Course {
    /// Free courses are not sold through the verification pipeline.
    pub fn is_free(&self) -> bool {
        self.price.is_zero()
    }
}
