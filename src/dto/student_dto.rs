use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::question::QuestionWithOptions;
use crate::models::test::{Test, TestWithQuestions};
use crate::models::test_attempt::{AttemptStatus, AttemptSummary, TestAttempt};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchAvailableQuery {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestListItem {
    pub test_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

impl From<Test> for TestListItem {
    fn from(test: Test) -> Self {
        Self {
            test_id: test.id,
            title: test.title,
            description: test.description,
            image_url: test.image_url,
        }
    }
}

/// An answer option as shown while taking a test: no correctness flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentOptionView {
    pub answer_id: Uuid,
    pub answer_text: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentQuestionView {
    pub question_id: Uuid,
    pub question_text: String,
    pub image_url: Option<String>,
    pub position: i32,
    pub points: i32,
    pub answer_options: Vec<StudentOptionView>,
}

impl From<QuestionWithOptions> for StudentQuestionView {
    fn from(q: QuestionWithOptions) -> Self {
        Self {
            question_id: q.question.id,
            question_text: q.question.question_text,
            image_url: q.question.image_url,
            position: q.question.position,
            points: q.question.points,
            answer_options: q
                .options
                .into_iter()
                .map(|o| StudentOptionView {
                    answer_id: o.id,
                    answer_text: o.answer_text,
                    image_url: o.image_url,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentTestView {
    pub test_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub questions: Vec<StudentQuestionView>,
}

impl From<TestWithQuestions> for StudentTestView {
    fn from(t: TestWithQuestions) -> Self {
        Self {
            test_id: t.test.id,
            title: t.test.title,
            description: t.test.description,
            image_url: t.test.image_url,
            questions: t.questions.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartAttemptResponse {
    pub attempt_id: Uuid,
    pub test_id: Uuid,
    pub student_id: i64,
    pub status: AttemptStatus,
    pub score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl From<TestAttempt> for StartAttemptResponse {
    fn from(a: TestAttempt) -> Self {
        Self {
            attempt_id: a.id,
            test_id: a.test_id,
            student_id: a.student_id,
            status: a.status,
            score: a.score,
            created_at: a.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAnswerRequest {
    pub question_id: Uuid,
    #[serde(default)]
    pub chosen_answer_option_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerOutcome {
    pub is_correct: bool,
    /// The canonical correct set; correctness of individual distractors is never exposed.
    pub correct_answer_option_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub attempt_id: Uuid,
    pub test_id: Uuid,
    pub status: AttemptStatus,
    pub score: f64,
    pub earned_points: i64,
    pub total_points: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptHistoryItem {
    pub attempt_id: Uuid,
    pub test_id: Uuid,
    pub test_title: String,
    pub status: AttemptStatus,
    pub score: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<AttemptSummary> for AttemptHistoryItem {
    fn from(s: AttemptSummary) -> Self {
        let completed_at = match s.status {
            AttemptStatus::Completed => Some(s.updated_at),
            AttemptStatus::InProgress => None,
        };
        Self {
            attempt_id: s.attempt_id,
            test_id: s.test_id,
            test_title: s.test_title,
            status: s.status,
            score: s.score,
            started_at: s.started_at,
            completed_at,
        }
    }
}
