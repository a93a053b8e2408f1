use std::collections::BTreeSet;

use uuid::Uuid;

use crate::database::{AnswerSubmission, Store, TestFilter};
use crate::dto::pagination::Pagination;
use crate::dto::student_dto::{
    AnswerOutcome, AttemptHistoryItem, SearchAvailableQuery, StudentTestView, SubmitAnswerRequest,
    TestListItem, TestResult,
};
use crate::error::{Conflict, Error, NotFound, Result};
use crate::models::test::TestStatus;
use crate::models::test_attempt::{StudentStats, TestAttempt};
use crate::models::user::{Caller, Role};
use crate::services::grading_service::GradingService;

/// Drives the attempt lifecycle: `IN_PROGRESS -> COMPLETED`, nothing else.
///
/// Every mutation is a single store call, and the store is what makes it atomic: the
/// one-open-attempt rule, the per-question upsert and the final scoring all run under
/// the store's own guarantees. There is no expiry. An abandoned attempt stays open and
/// keeps blocking new starts until it is finished.
#[derive(Clone)]
pub struct AttemptService {
    store: Store,
}

impl AttemptService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn list_available_tests(
        &self,
        query: SearchAvailableQuery,
        page: Pagination,
    ) -> Result<Vec<TestListItem>> {
        let filter = TestFilter {
            teacher_id: None,
            title: query.title,
            description: query.description,
            status: Some(TestStatus::Published),
        };
        let tests = self.store.catalog.list_tests(&filter, page).await?;
        Ok(tests.into_iter().map(Into::into).collect())
    }

    /// The published test without correctness flags.
    pub async fn test_for_passing(&self, test_id: Uuid) -> Result<StudentTestView> {
        let test = self
            .store
            .catalog
            .find_published_test(test_id)
            .await?
            .ok_or(NotFound::Test(test_id))?;
        Ok(test.into())
    }

    pub async fn start_attempt(&self, caller: &Caller, test_id: Uuid) -> Result<TestAttempt> {
        caller.require(Role::Student)?;
        self.store
            .catalog
            .find_published_test(test_id)
            .await?
            .ok_or(NotFound::Test(test_id))?;

        match self.store.attempts.create_attempt(caller.id, test_id).await {
            Ok(attempt) => {
                tracing::info!(
                    attempt_id = %attempt.id,
                    student_id = caller.id,
                    test_id = %test_id,
                    "attempt started"
                );
                Ok(attempt)
            }
            Err(Error::Conflict(Conflict::ActiveAttemptExists)) => {
                tracing::warn!(student_id = caller.id, test_id = %test_id, "start rejected: attempt already in progress");
                Err(Conflict::ActiveAttemptExists.into())
            }
            Err(e) => Err(e),
        }
    }

    /// Loads the attempt and checks it belongs to the caller (admins pass).
    pub async fn ensure_owned(&self, attempt_id: Uuid, caller: &Caller) -> Result<TestAttempt> {
        caller.require(Role::Student)?;
        let attempt = self
            .store
            .attempts
            .find_attempt(attempt_id)
            .await?
            .ok_or(NotFound::Attempt(attempt_id))?;
        if !caller.can_act_for(attempt.student_id) {
            return Err(Error::Forbidden(format!(
                "attempt {} belongs to another student",
                attempt_id
            )));
        }
        Ok(attempt)
    }

    pub async fn submit_answer(
        &self,
        caller: &Caller,
        attempt_id: Uuid,
        request: SubmitAnswerRequest,
    ) -> Result<AnswerOutcome> {
        let attempt = self.ensure_owned(attempt_id, caller).await?;
        // Early exit only; `upsert_answer` re-checks the status while holding the attempt.
        if !attempt.is_open() {
            return Err(Conflict::AlreadyFinished(attempt_id).into());
        }

        let test = self
            .store
            .catalog
            .find_test(attempt.test_id)
            .await?
            .ok_or(NotFound::Test(attempt.test_id))?;
        let question = test
            .question(request.question_id)
            .ok_or(NotFound::QuestionNotInTest {
                question_id: request.question_id,
                test_id: attempt.test_id,
            })?;

        let chosen: BTreeSet<Uuid> = request.chosen_answer_option_ids.into_iter().collect();
        if let Some(stray) = chosen.iter().find(|id| !question.has_option(**id)) {
            return Err(NotFound::AnswerOption(*stray).into());
        }

        let correct = question.correct_option_ids();
        let is_correct = GradingService::evaluate_answer(&correct, &chosen);

        let answer = self
            .store
            .attempts
            .upsert_answer(AnswerSubmission {
                attempt_id,
                question_id: request.question_id,
                is_correct,
                chosen_option_ids: chosen.into_iter().collect(),
            })
            .await?;
        tracing::debug!(
            attempt_id = %attempt_id,
            question_id = %answer.question_id,
            is_correct,
            "answer recorded"
        );

        Ok(AnswerOutcome {
            is_correct,
            correct_answer_option_ids: correct.into_iter().collect(),
        })
    }

    pub async fn finish_attempt(&self, caller: &Caller, attempt_id: Uuid) -> Result<TestResult> {
        self.ensure_owned(attempt_id, caller).await?;
        let finished = self
            .store
            .attempts
            .finish_attempt(attempt_id, GradingService::finalize_score)
            .await?;

        let attempt = finished.attempt;
        let breakdown = finished.breakdown;
        tracing::info!(
            attempt_id = %attempt.id,
            student_id = attempt.student_id,
            score = breakdown.score,
            "attempt finished"
        );

        Ok(TestResult {
            attempt_id: attempt.id,
            test_id: attempt.test_id,
            status: attempt.status,
            score: breakdown.score,
            earned_points: breakdown.earned_points,
            total_points: breakdown.total_points,
            started_at: attempt.created_at,
            completed_at: attempt.updated_at,
        })
    }

    pub async fn attempt_history(
        &self,
        caller: &Caller,
        page: Pagination,
    ) -> Result<Vec<AttemptHistoryItem>> {
        caller.require(Role::Student)?;
        let attempts = self
            .store
            .attempts
            .attempts_by_student(caller.id, None, page)
            .await?;
        Ok(attempts.into_iter().map(Into::into).collect())
    }

    pub async fn student_stats(&self, caller: &Caller) -> Result<StudentStats> {
        caller.require(Role::Student)?;
        self.store.attempts.student_stats(caller.id).await
    }
}
