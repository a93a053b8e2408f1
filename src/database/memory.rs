//! Arena storage keyed by id. Each trait method runs as a single critical section,
//! which gives the same check-then-write atomicity the Postgres constraints give.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{
    contains_ci, AccountStore, AnswerSubmission, AttemptStore, CatalogStore, FinishedAttempt,
    NewQuestion, NewTest, NewUser, OptionChange, QuestionChanges, ScoreFn, TestChanges,
    TestFilter, UserFilter,
};
use crate::dto::pagination::Pagination;
use crate::error::{Conflict, Error, NotFound, Result};
use crate::models::question::{AnswerOption, Question, QuestionWithOptions};
use crate::models::role_request::{RoleRequest, RoleRequestStatus};
use crate::models::test::{Test, TestStatus, TestWithQuestions};
use crate::models::test_attempt::{
    AttemptStatus, AttemptSummary, StudentAnswer, StudentResult, StudentStats, TestAttempt,
};
use crate::models::user::{Role, User};

/// A row plus its insertion sequence, used as the tie-breaker wherever Postgres
/// would order by a serial column.
#[derive(Debug, Clone)]
struct Slot<T> {
    seq: u64,
    row: T,
}

#[derive(Default)]
struct Arena {
    seq: u64,
    next_user_id: i64,
    next_role_request_id: i64,
    users: HashMap<i64, User>,
    role_requests: HashMap<i64, Slot<RoleRequest>>,
    tests: HashMap<Uuid, Slot<Test>>,
    questions: HashMap<Uuid, Slot<Question>>,
    options: HashMap<Uuid, Slot<AnswerOption>>,
    attempts: HashMap<Uuid, Slot<TestAttempt>>,
    answers: HashMap<Uuid, Slot<StudentAnswer>>,
}

impl Arena {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn require_user(&self, user_id: i64) -> Result<&User> {
        self.users
            .get(&user_id)
            .ok_or(Error::NotFound(NotFound::User(user_id)))
    }

    fn title_taken(&self, teacher_id: i64, title: &str, except: Option<Uuid>) -> bool {
        self.tests.values().any(|t| {
            t.row.teacher_id == teacher_id && t.row.title == title && Some(t.row.id) != except
        })
    }

    fn question_tree(&self, question: &Slot<Question>) -> QuestionWithOptions {
        let mut options: Vec<&Slot<AnswerOption>> = self
            .options
            .values()
            .filter(|o| o.row.question_id == question.row.id)
            .collect();
        options.sort_by_key(|o| o.seq);
        QuestionWithOptions {
            question: question.row.clone(),
            options: options.into_iter().map(|o| o.row.clone()).collect(),
        }
    }

    fn questions_of(&self, test_id: Uuid) -> Vec<&Slot<Question>> {
        let mut questions: Vec<&Slot<Question>> = self
            .questions
            .values()
            .filter(|q| q.row.test_id == test_id)
            .collect();
        questions.sort_by_key(|q| (q.row.position, q.seq));
        questions
    }

    fn test_tree(&self, test_id: Uuid) -> Option<TestWithQuestions> {
        let test = self.tests.get(&test_id)?;
        let questions = self
            .questions_of(test_id)
            .into_iter()
            .map(|q| self.question_tree(q))
            .collect();
        Some(TestWithQuestions {
            test: test.row.clone(),
            questions,
        })
    }

    fn insert_question_tree(&mut self, test_id: Uuid, new: NewQuestion) -> QuestionWithOptions {
        let position = new.position.unwrap_or_else(|| {
            self.questions
                .values()
                .filter(|q| q.row.test_id == test_id)
                .map(|q| q.row.position)
                .max()
                .map_or(1, |p| p + 1)
        });
        let question = Question {
            id: Uuid::new_v4(),
            test_id,
            question_text: new.question_text,
            image_url: new.image_url,
            position,
            points: new.points,
        };
        let seq = self.next_seq();
        self.questions.insert(
            question.id,
            Slot {
                seq,
                row: question.clone(),
            },
        );

        let mut options = Vec::with_capacity(new.options.len());
        for o in new.options {
            let option = AnswerOption {
                id: Uuid::new_v4(),
                question_id: question.id,
                answer_text: o.answer_text,
                image_url: o.image_url,
                is_correct: o.is_correct,
            };
            let seq = self.next_seq();
            self.options.insert(
                option.id,
                Slot {
                    seq,
                    row: option.clone(),
                },
            );
            options.push(option);
        }
        QuestionWithOptions { question, options }
    }

    fn remove_option(&mut self, option_id: Uuid) {
        if self.options.remove(&option_id).is_some() {
            for answer in self.answers.values_mut() {
                answer.row.chosen_option_ids.retain(|id| *id != option_id);
            }
        }
    }

    fn remove_question(&mut self, question_id: Uuid) {
        let option_ids: Vec<Uuid> = self
            .options
            .values()
            .filter(|o| o.row.question_id == question_id)
            .map(|o| o.row.id)
            .collect();
        for id in option_ids {
            self.remove_option(id);
        }
        self.answers.retain(|_, a| a.row.question_id != question_id);
        self.questions.remove(&question_id);
    }

    fn remove_attempt(&mut self, attempt_id: Uuid) {
        self.answers.retain(|_, a| a.row.attempt_id != attempt_id);
        self.attempts.remove(&attempt_id);
    }

    fn remove_test(&mut self, test_id: Uuid) {
        let question_ids: Vec<Uuid> = self
            .questions
            .values()
            .filter(|q| q.row.test_id == test_id)
            .map(|q| q.row.id)
            .collect();
        for id in question_ids {
            self.remove_question(id);
        }
        let attempt_ids: Vec<Uuid> = self
            .attempts
            .values()
            .filter(|a| a.row.test_id == test_id)
            .map(|a| a.row.id)
            .collect();
        for id in attempt_ids {
            self.remove_attempt(id);
        }
        self.tests.remove(&test_id);
    }

    fn remove_user(&mut self, user_id: i64) -> bool {
        if self.users.remove(&user_id).is_none() {
            return false;
        }
        let test_ids: Vec<Uuid> = self
            .tests
            .values()
            .filter(|t| t.row.teacher_id == user_id)
            .map(|t| t.row.id)
            .collect();
        for id in test_ids {
            self.remove_test(id);
        }
        let attempt_ids: Vec<Uuid> = self
            .attempts
            .values()
            .filter(|a| a.row.student_id == user_id)
            .map(|a| a.row.id)
            .collect();
        for id in attempt_ids {
            self.remove_attempt(id);
        }
        self.role_requests.retain(|_, r| r.row.user_id != user_id);
        true
    }

    /// Attempts newest first, as every history view lists them.
    fn attempts_newest_first<'a>(
        &'a self,
        keep: impl Fn(&TestAttempt) -> bool + 'a,
    ) -> Vec<&'a Slot<TestAttempt>> {
        let mut attempts: Vec<&Slot<TestAttempt>> =
            self.attempts.values().filter(|a| keep(&a.row)).collect();
        attempts.sort_by(|a, b| {
            b.row
                .created_at
                .cmp(&a.row.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        attempts
    }
}

#[derive(Default)]
pub struct MemoryStore {
    arena: Mutex<Arena>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn arena(&self) -> Result<MutexGuard<'_, Arena>> {
        self.arena
            .lock()
            .map_err(|_| Error::Internal("in-memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn insert_test(&self, new: NewTest) -> Result<TestWithQuestions> {
        let mut arena = self.arena()?;
        arena.require_user(new.teacher_id)?;
        if arena.title_taken(new.teacher_id, &new.title, None) {
            return Err(Conflict::DuplicateTitle.into());
        }

        let now = Utc::now();
        let test = Test {
            id: Uuid::new_v4(),
            teacher_id: new.teacher_id,
            title: new.title,
            description: new.description,
            image_url: new.image_url,
            status: new.status,
            created_at: now,
            updated_at: now,
        };
        let seq = arena.next_seq();
        arena.tests.insert(
            test.id,
            Slot {
                seq,
                row: test.clone(),
            },
        );
        let questions = new
            .questions
            .into_iter()
            .map(|q| arena.insert_question_tree(test.id, q))
            .collect();
        Ok(TestWithQuestions { test, questions })
    }

    async fn find_test(&self, test_id: Uuid) -> Result<Option<TestWithQuestions>> {
        Ok(self.arena()?.test_tree(test_id))
    }

    async fn find_published_test(&self, test_id: Uuid) -> Result<Option<TestWithQuestions>> {
        Ok(self
            .arena()?
            .test_tree(test_id)
            .filter(|t| t.test.status == TestStatus::Published))
    }

    async fn list_tests(&self, filter: &TestFilter, page: Pagination) -> Result<Vec<Test>> {
        let arena = self.arena()?;
        let mut tests: Vec<&Slot<Test>> = arena
            .tests
            .values()
            .filter(|t| filter.teacher_id.map_or(true, |id| t.row.teacher_id == id))
            .filter(|t| filter.status.map_or(true, |s| t.row.status == s))
            .filter(|t| {
                filter
                    .title
                    .as_deref()
                    .map_or(true, |needle| contains_ci(&t.row.title, needle))
            })
            .filter(|t| {
                filter.description.as_deref().map_or(true, |needle| {
                    t.row
                        .description
                        .as_deref()
                        .map_or(false, |d| contains_ci(d, needle))
                })
            })
            .collect();
        tests.sort_by(|a, b| {
            b.row
                .created_at
                .cmp(&a.row.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        Ok(page.slice(tests.into_iter().map(|t| t.row.clone())))
    }

    async fn titles_with_prefix(&self, teacher_id: i64, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.to_lowercase();
        Ok(self
            .arena()?
            .tests
            .values()
            .filter(|t| t.row.teacher_id == teacher_id)
            .filter(|t| t.row.title.to_lowercase().starts_with(&prefix))
            .map(|t| t.row.title.clone())
            .collect())
    }

    async fn tests_by_teacher(&self, teacher_id: i64) -> Result<Vec<TestWithQuestions>> {
        let arena = self.arena()?;
        let mut tests: Vec<&Slot<Test>> = arena
            .tests
            .values()
            .filter(|t| t.row.teacher_id == teacher_id)
            .collect();
        tests.sort_by_key(|t| t.seq);
        Ok(tests
            .into_iter()
            .filter_map(|t| arena.test_tree(t.row.id))
            .collect())
    }

    async fn update_test(&self, test_id: Uuid, changes: TestChanges) -> Result<Option<Test>> {
        let mut arena = self.arena()?;
        let Some(teacher_id) = arena.tests.get(&test_id).map(|t| t.row.teacher_id) else {
            return Ok(None);
        };
        if let Some(title) = &changes.title {
            if arena.title_taken(teacher_id, title, Some(test_id)) {
                return Err(Conflict::DuplicateTitle.into());
            }
        }

        let Some(slot) = arena.tests.get_mut(&test_id) else {
            return Ok(None);
        };
        let test = &mut slot.row;
        if let Some(title) = changes.title {
            test.title = title;
        }
        if let Some(description) = changes.description {
            test.description = description;
        }
        if let Some(image_url) = changes.image_url {
            test.image_url = image_url;
        }
        if let Some(status) = changes.status {
            test.status = status;
        }
        test.updated_at = Utc::now();
        Ok(Some(test.clone()))
    }

    async fn delete_test(&self, test_id: Uuid) -> Result<bool> {
        let mut arena = self.arena()?;
        if !arena.tests.contains_key(&test_id) {
            return Ok(false);
        }
        arena.remove_test(test_id);
        Ok(true)
    }

    async fn delete_tests_by_teacher(&self, teacher_id: i64) -> Result<u64> {
        let mut arena = self.arena()?;
        let ids: Vec<Uuid> = arena
            .tests
            .values()
            .filter(|t| t.row.teacher_id == teacher_id)
            .map(|t| t.row.id)
            .collect();
        for id in &ids {
            arena.remove_test(*id);
        }
        Ok(ids.len() as u64)
    }

    async fn insert_question(
        &self,
        test_id: Uuid,
        new: NewQuestion,
    ) -> Result<QuestionWithOptions> {
        let mut arena = self.arena()?;
        if !arena.tests.contains_key(&test_id) {
            return Err(NotFound::Test(test_id).into());
        }
        Ok(arena.insert_question_tree(test_id, new))
    }

    async fn update_question(
        &self,
        test_id: Uuid,
        question_id: Uuid,
        changes: QuestionChanges,
    ) -> Result<Option<QuestionWithOptions>> {
        let mut arena = self.arena()?;
        match arena.questions.get(&question_id) {
            Some(q) if q.row.test_id == test_id => {}
            _ => return Ok(None),
        }
        for change in &changes.options {
            if let OptionChange::Update { id, .. } = change {
                let owned = arena
                    .options
                    .get(id)
                    .map_or(false, |o| o.row.question_id == question_id);
                if !owned {
                    return Err(NotFound::AnswerOption(*id).into());
                }
            }
        }

        if let Some(slot) = arena.questions.get_mut(&question_id) {
            let question = &mut slot.row;
            if let Some(text) = changes.question_text {
                question.question_text = text;
            }
            if let Some(image_url) = changes.image_url {
                question.image_url = image_url;
            }
            if let Some(position) = changes.position {
                question.position = position;
            }
            if let Some(points) = changes.points {
                question.points = points;
            }
        }

        let doomed: Vec<Uuid> = changes
            .option_ids_to_delete
            .iter()
            .copied()
            .filter(|id| {
                arena
                    .options
                    .get(id)
                    .map_or(false, |o| o.row.question_id == question_id)
            })
            .collect();
        for id in doomed {
            arena.remove_option(id);
        }

        for change in changes.options {
            match change {
                OptionChange::Update {
                    id,
                    answer_text,
                    image_url,
                    is_correct,
                } => {
                    if let Some(slot) = arena.options.get_mut(&id) {
                        let option = &mut slot.row;
                        if let Some(text) = answer_text {
                            option.answer_text = text;
                        }
                        if let Some(image_url) = image_url {
                            option.image_url = image_url;
                        }
                        if let Some(is_correct) = is_correct {
                            option.is_correct = is_correct;
                        }
                    }
                }
                OptionChange::Insert(new) => {
                    let option = AnswerOption {
                        id: Uuid::new_v4(),
                        question_id,
                        answer_text: new.answer_text,
                        image_url: new.image_url,
                        is_correct: new.is_correct,
                    };
                    let seq = arena.next_seq();
                    arena.options.insert(option.id, Slot { seq, row: option });
                }
            }
        }

        Ok(arena
            .questions
            .get(&question_id)
            .map(|q| arena.question_tree(q)))
    }

    async fn delete_question(&self, test_id: Uuid, question_id: Uuid) -> Result<bool> {
        let mut arena = self.arena()?;
        match arena.questions.get(&question_id) {
            Some(q) if q.row.test_id == test_id => {
                arena.remove_question(question_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_questions_by_test(&self, test_id: Uuid) -> Result<u64> {
        let mut arena = self.arena()?;
        let ids: Vec<Uuid> = arena
            .questions
            .values()
            .filter(|q| q.row.test_id == test_id)
            .map(|q| q.row.id)
            .collect();
        for id in &ids {
            arena.remove_question(*id);
        }
        Ok(ids.len() as u64)
    }

    async fn referenced_image_urls(&self, candidates: &[String]) -> Result<BTreeSet<String>> {
        let wanted: HashSet<&str> = candidates.iter().map(String::as_str).collect();
        let arena = self.arena()?;
        let in_use = arena
            .tests
            .values()
            .filter_map(|t| t.row.image_url.as_deref())
            .chain(arena.questions.values().filter_map(|q| q.row.image_url.as_deref()))
            .chain(arena.options.values().filter_map(|o| o.row.image_url.as_deref()))
            .filter(|url| wanted.contains(url))
            .map(str::to_string)
            .collect();
        Ok(in_use)
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn create_attempt(&self, student_id: i64, test_id: Uuid) -> Result<TestAttempt> {
        let mut arena = self.arena()?;
        arena.require_user(student_id)?;
        if !arena.tests.contains_key(&test_id) {
            return Err(NotFound::Test(test_id).into());
        }
        let active = arena
            .attempts
            .values()
            .any(|a| a.row.student_id == student_id && a.row.is_open());
        if active {
            return Err(Conflict::ActiveAttemptExists.into());
        }

        let now = Utc::now();
        let attempt = TestAttempt {
            id: Uuid::new_v4(),
            student_id,
            test_id,
            status: AttemptStatus::InProgress,
            score: None,
            created_at: now,
            updated_at: now,
        };
        let seq = arena.next_seq();
        arena.attempts.insert(
            attempt.id,
            Slot {
                seq,
                row: attempt.clone(),
            },
        );
        Ok(attempt)
    }

    async fn find_attempt(&self, attempt_id: Uuid) -> Result<Option<TestAttempt>> {
        Ok(self
            .arena()?
            .attempts
            .get(&attempt_id)
            .map(|a| a.row.clone()))
    }

    async fn upsert_answer(&self, submission: AnswerSubmission) -> Result<StudentAnswer> {
        let mut arena = self.arena()?;
        let attempt = arena
            .attempts
            .get(&submission.attempt_id)
            .ok_or(NotFound::Attempt(submission.attempt_id))?;
        if !attempt.row.is_open() {
            return Err(Conflict::AlreadyFinished(submission.attempt_id).into());
        }
        if !arena.questions.contains_key(&submission.question_id) {
            return Err(NotFound::Question(submission.question_id).into());
        }
        if let Some(missing) = submission
            .chosen_option_ids
            .iter()
            .find(|id| !arena.options.contains_key(id))
        {
            return Err(NotFound::AnswerOption(*missing).into());
        }

        let chosen: Vec<Uuid> = submission
            .chosen_option_ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let now = Utc::now();
        let existing = arena
            .answers
            .values_mut()
            .find(|a| {
                a.row.attempt_id == submission.attempt_id
                    && a.row.question_id == submission.question_id
            });

        if let Some(slot) = existing {
            slot.row.is_correct = submission.is_correct;
            slot.row.chosen_option_ids = chosen;
            slot.row.updated_at = now;
            return Ok(slot.row.clone());
        }

        let answer = StudentAnswer {
            id: Uuid::new_v4(),
            attempt_id: submission.attempt_id,
            question_id: submission.question_id,
            is_correct: submission.is_correct,
            chosen_option_ids: chosen,
            created_at: now,
            updated_at: now,
        };
        let seq = arena.next_seq();
        arena.answers.insert(
            answer.id,
            Slot {
                seq,
                row: answer.clone(),
            },
        );
        Ok(answer)
    }

    async fn finish_attempt(&self, attempt_id: Uuid, score: ScoreFn) -> Result<FinishedAttempt> {
        let mut arena = self.arena()?;
        let attempt = arena
            .attempts
            .get(&attempt_id)
            .map(|a| a.row.clone())
            .ok_or(NotFound::Attempt(attempt_id))?;
        if !attempt.is_open() {
            return Err(Conflict::AlreadyFinished(attempt_id).into());
        }

        let questions: Vec<Question> = arena
            .questions_of(attempt.test_id)
            .into_iter()
            .map(|q| q.row.clone())
            .collect();
        let answers: Vec<StudentAnswer> = arena
            .answers
            .values()
            .filter(|a| a.row.attempt_id == attempt_id)
            .map(|a| a.row.clone())
            .collect();
        let breakdown = score(&questions, &answers);

        let slot = arena
            .attempts
            .get_mut(&attempt_id)
            .ok_or(NotFound::Attempt(attempt_id))?;
        slot.row.status = AttemptStatus::Completed;
        slot.row.score = Some(breakdown.score);
        slot.row.updated_at = Utc::now();
        Ok(FinishedAttempt {
            attempt: slot.row.clone(),
            breakdown,
        })
    }

    async fn answers_for_attempts(&self, attempt_ids: &[Uuid]) -> Result<Vec<StudentAnswer>> {
        let wanted: HashSet<&Uuid> = attempt_ids.iter().collect();
        let arena = self.arena()?;
        let mut answers: Vec<&Slot<StudentAnswer>> = arena
            .answers
            .values()
            .filter(|a| wanted.contains(&a.row.attempt_id))
            .collect();
        answers.sort_by_key(|a| a.seq);
        Ok(answers.into_iter().map(|a| a.row.clone()).collect())
    }

    async fn completed_attempts_for_test(&self, test_id: Uuid) -> Result<Vec<TestAttempt>> {
        let arena = self.arena()?;
        Ok(arena
            .attempts_newest_first(|a| {
                a.test_id == test_id && a.status == AttemptStatus::Completed
            })
            .into_iter()
            .map(|a| a.row.clone())
            .collect())
    }

    async fn attempts_by_student(
        &self,
        student_id: i64,
        teacher_id: Option<i64>,
        page: Pagination,
    ) -> Result<Vec<AttemptSummary>> {
        let arena = self.arena()?;
        let summaries = arena
            .attempts_newest_first(|a| a.student_id == student_id)
            .into_iter()
            .filter_map(|a| {
                let test = &arena.tests.get(&a.row.test_id)?.row;
                if teacher_id.map_or(false, |id| id != test.teacher_id) {
                    return None;
                }
                Some(AttemptSummary {
                    attempt_id: a.row.id,
                    test_id: test.id,
                    test_title: test.title.clone(),
                    status: a.row.status,
                    score: a.row.score,
                    started_at: a.row.created_at,
                    updated_at: a.row.updated_at,
                })
            });
        Ok(page.slice(summaries))
    }

    async fn student_stats(&self, student_id: i64) -> Result<StudentStats> {
        let arena = self.arena()?;
        let mine: Vec<&TestAttempt> = arena
            .attempts
            .values()
            .map(|a| &a.row)
            .filter(|a| a.student_id == student_id)
            .collect();
        let scores: Vec<f64> = mine
            .iter()
            .filter(|a| a.status == AttemptStatus::Completed)
            .map(|a| a.score.unwrap_or(0.0))
            .collect();
        let average_score = if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        };
        Ok(StudentStats {
            total_tests_completed: scores.len() as i64,
            average_score,
            in_progress_count: mine.iter().filter(|a| a.is_open()).count() as i64,
        })
    }

    async fn results_for_test(&self, test_id: Uuid, page: Pagination) -> Result<Vec<StudentResult>> {
        let arena = self.arena()?;
        let results = arena
            .attempts_newest_first(|a| a.test_id == test_id)
            .into_iter()
            .filter_map(|a| {
                let student = arena.users.get(&a.row.student_id)?;
                Some(StudentResult {
                    attempt_id: a.row.id,
                    student_id: student.id,
                    student_email: student.email.clone(),
                    student_login: student.login.clone(),
                    status: a.row.status,
                    score: a.row.score,
                    created_at: a.row.created_at,
                    updated_at: a.row.updated_at,
                })
            });
        Ok(page.slice(results))
    }

    async fn students_of_teacher(
        &self,
        teacher_id: i64,
        login: Option<&str>,
        page: Pagination,
    ) -> Result<Vec<User>> {
        let arena = self.arena()?;
        let student_ids: HashSet<i64> = arena
            .attempts
            .values()
            .filter(|a| {
                arena
                    .tests
                    .get(&a.row.test_id)
                    .map_or(false, |t| t.row.teacher_id == teacher_id)
            })
            .map(|a| a.row.student_id)
            .collect();
        let mut students: Vec<&User> = student_ids
            .iter()
            .filter_map(|id| arena.users.get(id))
            .filter(|u| login.map_or(true, |needle| contains_ci(&u.login, needle)))
            .collect();
        students.sort_by(|a, b| a.login.cmp(&b.login));
        Ok(page.slice(students.into_iter().cloned()))
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn insert_user(&self, new: NewUser) -> Result<User> {
        let mut arena = self.arena()?;
        let taken = arena
            .users
            .values()
            .any(|u| u.email == new.email || u.login == new.login);
        if taken {
            return Err(Conflict::DuplicateAccount.into());
        }
        arena.next_user_id += 1;
        let now = Utc::now();
        let user = User {
            id: arena.next_user_id,
            email: new.email,
            login: new.login,
            password_hash: new.password_hash,
            role: new.role,
            created_at: now,
            updated_at: now,
        };
        arena.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user(&self, user_id: i64) -> Result<Option<User>> {
        Ok(self.arena()?.users.get(&user_id).cloned())
    }

    async fn list_users(&self, filter: &UserFilter, page: Pagination) -> Result<Vec<User>> {
        let arena = self.arena()?;
        let mut users: Vec<&User> = arena
            .users
            .values()
            .filter(|u| filter.login.as_deref().map_or(true, |n| contains_ci(&u.login, n)))
            .filter(|u| filter.email.as_deref().map_or(true, |n| contains_ci(&u.email, n)))
            .filter(|u| filter.role.map_or(true, |r| u.role == r))
            .collect();
        users.sort_by_key(|u| u.id);
        Ok(page.slice(users.into_iter().cloned()))
    }

    async fn set_user_role(&self, user_id: i64, role: Role) -> Result<Option<User>> {
        let mut arena = self.arena()?;
        Ok(arena.users.get_mut(&user_id).map(|u| {
            u.role = role;
            u.updated_at = Utc::now();
            u.clone()
        }))
    }

    async fn delete_user(&self, user_id: i64) -> Result<bool> {
        Ok(self.arena()?.remove_user(user_id))
    }

    async fn insert_role_request(&self, user_id: i64, role: Role) -> Result<RoleRequest> {
        let mut arena = self.arena()?;
        arena.require_user(user_id)?;
        let pending = arena
            .role_requests
            .values()
            .any(|r| r.row.user_id == user_id && r.row.status == RoleRequestStatus::Pending);
        if pending {
            return Err(Conflict::PendingRoleRequestExists.into());
        }
        arena.next_role_request_id += 1;
        let now = Utc::now();
        let request = RoleRequest {
            id: arena.next_role_request_id,
            user_id,
            requested_role: role,
            status: RoleRequestStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        let seq = arena.next_seq();
        arena.role_requests.insert(
            request.id,
            Slot {
                seq,
                row: request.clone(),
            },
        );
        Ok(request)
    }

    async fn find_role_request(&self, request_id: i64) -> Result<Option<RoleRequest>> {
        Ok(self
            .arena()?
            .role_requests
            .get(&request_id)
            .map(|r| r.row.clone()))
    }

    async fn list_role_requests(
        &self,
        status: Option<RoleRequestStatus>,
        page: Pagination,
    ) -> Result<Vec<RoleRequest>> {
        let arena = self.arena()?;
        let mut requests: Vec<&Slot<RoleRequest>> = arena
            .role_requests
            .values()
            .filter(|r| status.map_or(true, |s| r.row.status == s))
            .collect();
        requests.sort_by(|a, b| b.seq.cmp(&a.seq));
        Ok(page.slice(requests.into_iter().map(|r| r.row.clone())))
    }

    async fn resolve_role_request(
        &self,
        request_id: i64,
        status: RoleRequestStatus,
    ) -> Result<RoleRequest> {
        let mut arena = self.arena()?;
        let request = arena
            .role_requests
            .get(&request_id)
            .map(|r| r.row.clone())
            .ok_or(NotFound::RoleRequest(request_id))?;
        if request.status != RoleRequestStatus::Pending {
            return Err(Conflict::RoleRequestAlreadyResolved(request_id).into());
        }

        let now = Utc::now();
        if status == RoleRequestStatus::Approved {
            let user = arena
                .users
                .get_mut(&request.user_id)
                .ok_or(NotFound::User(request.user_id))?;
            user.role = request.requested_role;
            user.updated_at = now;
        }
        let slot = arena
            .role_requests
            .get_mut(&request_id)
            .ok_or(NotFound::RoleRequest(request_id))?;
        slot.row.status = status;
        slot.row.updated_at = now;
        Ok(slot.row.clone())
    }
}
