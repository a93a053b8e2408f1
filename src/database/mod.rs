pub mod memory;
pub mod pool;
pub mod postgres;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::dto::pagination::Pagination;
use crate::error::Result;
use crate::models::question::{Question, QuestionWithOptions};
use crate::models::role_request::{RoleRequest, RoleRequestStatus};
use crate::models::test::{Test, TestStatus, TestWithQuestions};
use crate::models::test_attempt::{
    AttemptSummary, StudentAnswer, StudentResult, StudentStats, TestAttempt,
};
use crate::models::user::{Role, User};
use crate::services::grading_service::ScoreBreakdown;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone)]
pub struct NewAnswerOption {
    pub answer_text: Option<String>,
    pub image_url: Option<String>,
    pub is_correct: bool,
}

#[derive(Debug, Clone)]
pub struct NewQuestion {
    pub question_text: String,
    pub image_url: Option<String>,
    /// `None` appends after the current last question.
    pub position: Option<i32>,
    pub points: i32,
    pub options: Vec<NewAnswerOption>,
}

#[derive(Debug, Clone)]
pub struct NewTest {
    pub teacher_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub status: TestStatus,
    pub questions: Vec<NewQuestion>,
}

#[derive(Debug, Clone, Default)]
pub struct TestChanges {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub image_url: Option<Option<String>>,
    pub status: Option<TestStatus>,
}

#[derive(Debug, Clone)]
pub enum OptionChange {
    Update {
        id: Uuid,
        answer_text: Option<Option<String>>,
        image_url: Option<Option<String>>,
        is_correct: Option<bool>,
    },
    Insert(NewAnswerOption),
}

#[derive(Debug, Clone, Default)]
pub struct QuestionChanges {
    pub question_text: Option<String>,
    pub image_url: Option<Option<String>>,
    pub position: Option<i32>,
    pub points: Option<i32>,
    pub options: Vec<OptionChange>,
    pub option_ids_to_delete: Vec<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct TestFilter {
    pub teacher_id: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TestStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub login: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub login: String,
    pub password_hash: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct AnswerSubmission {
    pub attempt_id: Uuid,
    pub question_id: Uuid,
    pub is_correct: bool,
    pub chosen_option_ids: Vec<Uuid>,
}

/// Pure scoring step run by the store while it holds the attempt exclusively.
pub type ScoreFn = fn(&[Question], &[StudentAnswer]) -> ScoreBreakdown;

#[derive(Debug, Clone)]
pub struct FinishedAttempt {
    pub attempt: TestAttempt,
    pub breakdown: ScoreBreakdown,
}

/// Authoring data: tests, their questions and answer options.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Inserts a test with its whole question tree in one unit.
    async fn insert_test(&self, new: NewTest) -> Result<TestWithQuestions>;
    async fn find_test(&self, test_id: Uuid) -> Result<Option<TestWithQuestions>>;
    /// Eligibility lookup: only PUBLISHED tests are returned.
    async fn find_published_test(&self, test_id: Uuid) -> Result<Option<TestWithQuestions>>;
    async fn list_tests(&self, filter: &TestFilter, page: Pagination) -> Result<Vec<Test>>;
    async fn titles_with_prefix(&self, teacher_id: i64, prefix: &str) -> Result<Vec<String>>;
    async fn tests_by_teacher(&self, teacher_id: i64) -> Result<Vec<TestWithQuestions>>;
    async fn update_test(&self, test_id: Uuid, changes: TestChanges) -> Result<Option<Test>>;
    async fn delete_test(&self, test_id: Uuid) -> Result<bool>;
    async fn delete_tests_by_teacher(&self, teacher_id: i64) -> Result<u64>;
    async fn insert_question(
        &self,
        test_id: Uuid,
        new: NewQuestion,
    ) -> Result<QuestionWithOptions>;
    async fn update_question(
        &self,
        test_id: Uuid,
        question_id: Uuid,
        changes: QuestionChanges,
    ) -> Result<Option<QuestionWithOptions>>;
    async fn delete_question(&self, test_id: Uuid, question_id: Uuid) -> Result<bool>;
    async fn delete_questions_by_test(&self, test_id: Uuid) -> Result<u64>;
    /// The subset of `candidates` still referenced by any test, question or option.
    async fn referenced_image_urls(&self, candidates: &[String]) -> Result<BTreeSet<String>>;
}

/// Attempt lifecycle records and the read models derived from them.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Fails with `Conflict::ActiveAttemptExists` when the student already has an
    /// IN_PROGRESS attempt; the check and the insert are one atomic step.
    async fn create_attempt(&self, student_id: i64, test_id: Uuid) -> Result<TestAttempt>;
    async fn find_attempt(&self, attempt_id: Uuid) -> Result<Option<TestAttempt>>;
    /// Insert-or-replace the answer for `(attempt, question)` while the attempt is
    /// still IN_PROGRESS.
    async fn upsert_answer(&self, submission: AnswerSubmission) -> Result<StudentAnswer>;
    /// Scores and completes the attempt with `score` while holding it exclusively.
    async fn finish_attempt(&self, attempt_id: Uuid, score: ScoreFn) -> Result<FinishedAttempt>;
    async fn answers_for_attempts(&self, attempt_ids: &[Uuid]) -> Result<Vec<StudentAnswer>>;
    async fn completed_attempts_for_test(&self, test_id: Uuid) -> Result<Vec<TestAttempt>>;
    async fn attempts_by_student(
        &self,
        student_id: i64,
        teacher_id: Option<i64>,
        page: Pagination,
    ) -> Result<Vec<AttemptSummary>>;
    async fn student_stats(&self, student_id: i64) -> Result<StudentStats>;
    async fn results_for_test(&self, test_id: Uuid, page: Pagination) -> Result<Vec<StudentResult>>;
    /// Students who attempted at least one test authored by `teacher_id`.
    async fn students_of_teacher(
        &self,
        teacher_id: i64,
        login: Option<&str>,
        page: Pagination,
    ) -> Result<Vec<User>>;
}

/// Accounts and role-change requests.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn insert_user(&self, new: NewUser) -> Result<User>;
    async fn find_user(&self, user_id: i64) -> Result<Option<User>>;
    async fn list_users(&self, filter: &UserFilter, page: Pagination) -> Result<Vec<User>>;
    async fn set_user_role(&self, user_id: i64, role: Role) -> Result<Option<User>>;
    async fn delete_user(&self, user_id: i64) -> Result<bool>;
    async fn insert_role_request(&self, user_id: i64, role: Role) -> Result<RoleRequest>;
    async fn find_role_request(&self, request_id: i64) -> Result<Option<RoleRequest>>;
    async fn list_role_requests(
        &self,
        status: Option<RoleRequestStatus>,
        page: Pagination,
    ) -> Result<Vec<RoleRequest>>;
    /// Moves a pending request to `status`; approval also sets the account role.
    async fn resolve_role_request(
        &self,
        request_id: i64,
        status: RoleRequestStatus,
    ) -> Result<RoleRequest>;
}

#[derive(Clone)]
pub struct Store {
    pub catalog: Arc<dyn CatalogStore>,
    pub attempts: Arc<dyn AttemptStore>,
    pub accounts: Arc<dyn AccountStore>,
}

impl Store {
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self {
            catalog: store.clone(),
            attempts: store.clone(),
            accounts: store,
        }
    }

    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            catalog: store.clone(),
            attempts: store.clone(),
            accounts: store,
        }
    }
}

/// Case-insensitive substring match used by every text filter.
pub(crate) fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}
