//! Enrollment model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A user's enrollment in a course.
///
/// At most one row with status `active` exists per (user_id, course_id); the
/// schema enforces this with a partial unique index.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Enrollment {
    pub enrollment_id: Uuid,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub status: String,
    pub enrolled_utc: DateTime<Utc>,
}

impl Enrollment {
    pub const STATUS_ACTIVE: &'static str = "active";

    pub fn is_active(&self) -> bool {
        self.status == Self::STATUS_ACTIVE
    }
}
