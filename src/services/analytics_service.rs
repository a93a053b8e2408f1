use std::collections::{HashMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

use crate::database::{contains_ci, Store};
use crate::error::{Error, NotFound, Result};
use crate::models::test::TestWithQuestions;
use crate::models::test_attempt::{AttemptStatus, StudentAnswer, TestAttempt};
use crate::models::user::{Caller, Role};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionAnalytics {
    pub question_id: Uuid,
    pub question_text: String,
    pub position: i32,
    pub total_answers: i64,
    pub correct_answers: i64,
    pub correct_answer_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestAnalytics {
    pub test_id: Uuid,
    pub total_attempts: i64,
    pub average_score: Option<f64>,
    pub question_analytics: Vec<QuestionAnalytics>,
}

/// Folds completed attempts and their answers into per-test and per-question figures.
///
/// Only COMPLETED attempts count, and only answers recorded within them. With no completed
/// attempt the question list is empty; otherwise every question matching `search`
/// (case-insensitive, over the question text) is listed in display order. Questions that
/// received no answers are listed at 0% instead of being left out.
pub fn aggregate(
    test: &TestWithQuestions,
    attempts: &[TestAttempt],
    answers: &[StudentAnswer],
    search: Option<&str>,
) -> TestAnalytics {
    let completed: Vec<&TestAttempt> = attempts
        .iter()
        .filter(|a| a.test_id == test.test.id && a.status == AttemptStatus::Completed)
        .collect();

    if completed.is_empty() {
        return TestAnalytics {
            test_id: test.test.id,
            total_attempts: 0,
            average_score: None,
            question_analytics: Vec::new(),
        };
    }

    let total_attempts = completed.len() as i64;
    let average_score = Some(
        completed.iter().map(|a| a.score.unwrap_or(0.0)).sum::<f64>() / total_attempts as f64,
    );

    let counted: HashSet<Uuid> = completed.iter().map(|a| a.id).collect();
    let mut tallies: HashMap<Uuid, (i64, i64)> = HashMap::new();
    for answer in answers.iter().filter(|a| counted.contains(&a.attempt_id)) {
        let tally = tallies.entry(answer.question_id).or_default();
        tally.0 += 1;
        if answer.is_correct {
            tally.1 += 1;
        }
    }

    let search = search.map(str::trim).filter(|s| !s.is_empty());
    let question_analytics = test
        .questions
        .iter()
        .filter(|q| search.map_or(true, |needle| contains_ci(&q.question.question_text, needle)))
        .map(|q| {
            let (total_answers, correct_answers) =
                tallies.get(&q.question.id).copied().unwrap_or_default();
            let correct_answer_percentage = if total_answers > 0 {
                correct_answers as f64 / total_answers as f64 * 100.0
            } else {
                0.0
            };
            QuestionAnalytics {
                question_id: q.question.id,
                question_text: q.question.question_text.clone(),
                position: q.question.position,
                total_answers,
                correct_answers,
                correct_answer_percentage,
            }
        })
        .collect();

    TestAnalytics {
        test_id: test.test.id,
        total_attempts,
        average_score,
        question_analytics,
    }
}

#[derive(Clone)]
pub struct AnalyticsService {
    store: Store,
}

impl AnalyticsService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn test_analytics(
        &self,
        caller: &Caller,
        test_id: Uuid,
        search: Option<&str>,
    ) -> Result<TestAnalytics> {
        caller.require(Role::Teacher)?;
        let test = self
            .store
            .catalog
            .find_test(test_id)
            .await?
            .ok_or(NotFound::Test(test_id))?;
        if !caller.can_act_for(test.test.teacher_id) {
            return Err(Error::Forbidden(format!(
                "test {} belongs to another author",
                test_id
            )));
        }

        let attempts = self.store.attempts.completed_attempts_for_test(test_id).await?;
        let ids: Vec<Uuid> = attempts.iter().map(|a| a.id).collect();
        let answers = if ids.is_empty() {
            Vec::new()
        } else {
            self.store.attempts.answers_for_attempts(&ids).await?
        };

        Ok(aggregate(&test, &attempts, &answers, search))
    }
}
