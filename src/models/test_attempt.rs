use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "attempt_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TestAttempt {
    pub id: Uuid,
    pub student_id: i64,
    pub test_id: Uuid,
    pub status: AttemptStatus,
    /// Percentage in [0, 100]; stored at completion, never recomputed.
    pub score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TestAttempt {
    pub fn is_open(&self) -> bool {
        self.status == AttemptStatus::InProgress
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            AttemptStatus::Completed => Some(self.updated_at),
            AttemptStatus::InProgress => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StudentAnswer {
    pub id: Uuid,
    pub attempt_id: Uuid,
    pub question_id: Uuid,
    /// Decided when the answer was submitted.
    pub is_correct: bool,
    pub chosen_option_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An attempt joined with the title of the test it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AttemptSummary {
    pub attempt_id: Uuid,
    pub test_id: Uuid,
    pub test_title: String,
    pub status: AttemptStatus,
    pub score: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An attempt joined with the student who made it, for the author's result views.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StudentResult {
    pub attempt_id: Uuid,
    pub student_id: i64,
    pub student_email: String,
    pub student_login: String,
    pub status: AttemptStatus,
    pub score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentStats {
    pub total_tests_completed: i64,
    pub average_score: Option<f64>,
    pub in_progress_count: i64,
}
