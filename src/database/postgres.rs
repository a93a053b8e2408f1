use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{
    AccountStore, AnswerSubmission, AttemptStore, CatalogStore, FinishedAttempt, NewQuestion,
    NewTest, NewUser, OptionChange, QuestionChanges, ScoreFn, TestChanges, TestFilter,
    UserFilter,
};
use crate::dto::pagination::Pagination;
use crate::error::{Conflict, Error, NotFound, Result};
use crate::models::question::{AnswerOption, Question, QuestionWithOptions};
use crate::models::role_request::{RoleRequest, RoleRequestStatus};
use crate::models::test::{Test, TestWithQuestions};
use crate::models::test_attempt::{
    AttemptStatus, AttemptSummary, StudentAnswer, StudentResult, StudentStats, TestAttempt,
};
use crate::models::user::{Role, User};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Reports a foreign-key failure as the specific missing parent.
fn missing_parent(err: sqlx::Error, missing: NotFound) -> Error {
    if let sqlx::Error::Database(db) = &err {
        if db.is_foreign_key_violation() {
            return missing.into();
        }
    }
    err.into()
}

/// `%needle%` with LIKE metacharacters escaped.
fn contains_pattern(needle: &str) -> String {
    format!("%{}%", escape_like(needle))
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

async fn question_trees(
    conn: &mut PgConnection,
    test_ids: &[Uuid],
) -> Result<Vec<QuestionWithOptions>> {
    let questions = sqlx::query_as::<_, Question>(
        r#"
        SELECT id, test_id, question_text, image_url, position, points
        FROM questions
        WHERE test_id = ANY($1)
        ORDER BY position, seq
        "#,
    )
    .bind(test_ids)
    .fetch_all(&mut *conn)
    .await?;

    let question_ids: Vec<Uuid> = questions.iter().map(|q| q.id).collect();
    let options = sqlx::query_as::<_, AnswerOption>(
        r#"
        SELECT id, question_id, answer_text, image_url, is_correct
        FROM answer_options
        WHERE question_id = ANY($1)
        ORDER BY seq
        "#,
    )
    .bind(&question_ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut by_question: HashMap<Uuid, Vec<AnswerOption>> = HashMap::new();
    for option in options {
        by_question.entry(option.question_id).or_default().push(option);
    }

    Ok(questions
        .into_iter()
        .map(|question| {
            let options = by_question.remove(&question.id).unwrap_or_default();
            QuestionWithOptions { question, options }
        })
        .collect())
}

async fn test_tree(conn: &mut PgConnection, test: Test) -> Result<TestWithQuestions> {
    let questions = question_trees(conn, &[test.id]).await?;
    Ok(TestWithQuestions { test, questions })
}

async fn single_question_tree(
    conn: &mut PgConnection,
    question_id: Uuid,
) -> Result<Option<QuestionWithOptions>> {
    let question = sqlx::query_as::<_, Question>(
        "SELECT id, test_id, question_text, image_url, position, points FROM questions WHERE id = $1",
    )
    .bind(question_id)
    .fetch_optional(&mut *conn)
    .await?;
    let Some(question) = question else {
        return Ok(None);
    };

    let options = sqlx::query_as::<_, AnswerOption>(
        r#"
        SELECT id, question_id, answer_text, image_url, is_correct
        FROM answer_options
        WHERE question_id = $1
        ORDER BY seq
        "#,
    )
    .bind(question_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(Some(QuestionWithOptions { question, options }))
}

async fn insert_question_tree(
    conn: &mut PgConnection,
    test_id: Uuid,
    new: NewQuestion,
) -> Result<QuestionWithOptions> {
    let question = sqlx::query_as::<_, Question>(
        r#"
        INSERT INTO questions (test_id, question_text, image_url, position, points)
        VALUES (
            $1, $2, $3,
            COALESCE($4, (SELECT COALESCE(MAX(position), 0) + 1 FROM questions WHERE test_id = $1)),
            $5
        )
        RETURNING id, test_id, question_text, image_url, position, points
        "#,
    )
    .bind(test_id)
    .bind(&new.question_text)
    .bind(&new.image_url)
    .bind(new.position)
    .bind(new.points)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| missing_parent(e, NotFound::Test(test_id)))?;

    let mut options = Vec::with_capacity(new.options.len());
    for option in new.options {
        let inserted = sqlx::query_as::<_, AnswerOption>(
            r#"
            INSERT INTO answer_options (question_id, answer_text, image_url, is_correct)
            VALUES ($1, $2, $3, $4)
            RETURNING id, question_id, answer_text, image_url, is_correct
            "#,
        )
        .bind(question.id)
        .bind(&option.answer_text)
        .bind(&option.image_url)
        .bind(option.is_correct)
        .fetch_one(&mut *conn)
        .await?;
        options.push(inserted);
    }

    Ok(QuestionWithOptions { question, options })
}

async fn answers_for(conn: &mut PgConnection, attempt_ids: &[Uuid]) -> Result<Vec<StudentAnswer>> {
    let answers = sqlx::query_as::<_, StudentAnswer>(
        r#"
        SELECT
            sa.id, sa.attempt_id, sa.question_id, sa.is_correct,
            COALESCE(
                array_agg(sao.answer_option_id) FILTER (WHERE sao.answer_option_id IS NOT NULL),
                '{}'
            ) AS chosen_option_ids,
            sa.created_at, sa.updated_at
        FROM student_answers sa
        LEFT JOIN student_answer_options sao ON sao.student_answer_id = sa.id
        WHERE sa.attempt_id = ANY($1)
        GROUP BY sa.id
        ORDER BY sa.created_at
        "#,
    )
    .bind(attempt_ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(answers)
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn insert_test(&self, new: NewTest) -> Result<TestWithQuestions> {
        let mut tx = self.pool.begin().await?;

        let test = sqlx::query_as::<_, Test>(
            r#"
            INSERT INTO tests (teacher_id, title, description, image_url, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, teacher_id, title, description, image_url, status, created_at, updated_at
            "#,
        )
        .bind(new.teacher_id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.image_url)
        .bind(new.status)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| missing_parent(e, NotFound::User(new.teacher_id)))?;

        let mut questions = Vec::with_capacity(new.questions.len());
        for question in new.questions {
            questions.push(insert_question_tree(&mut tx, test.id, question).await?);
        }

        tx.commit().await?;
        Ok(TestWithQuestions { test, questions })
    }

    async fn find_test(&self, test_id: Uuid) -> Result<Option<TestWithQuestions>> {
        let mut conn = self.pool.acquire().await?;
        let test = sqlx::query_as::<_, Test>(
            r#"
            SELECT id, teacher_id, title, description, image_url, status, created_at, updated_at
            FROM tests WHERE id = $1
            "#,
        )
        .bind(test_id)
        .fetch_optional(&mut *conn)
        .await?;

        match test {
            Some(test) => Ok(Some(test_tree(&mut conn, test).await?)),
            None => Ok(None),
        }
    }

    async fn find_published_test(&self, test_id: Uuid) -> Result<Option<TestWithQuestions>> {
        let mut conn = self.pool.acquire().await?;
        let test = sqlx::query_as::<_, Test>(
            r#"
            SELECT id, teacher_id, title, description, image_url, status, created_at, updated_at
            FROM tests WHERE id = $1 AND status = 'PUBLISHED'
            "#,
        )
        .bind(test_id)
        .fetch_optional(&mut *conn)
        .await?;

        match test {
            Some(test) => Ok(Some(test_tree(&mut conn, test).await?)),
            None => Ok(None),
        }
    }

    async fn list_tests(&self, filter: &TestFilter, page: Pagination) -> Result<Vec<Test>> {
        let tests = sqlx::query_as::<_, Test>(
            r#"
            SELECT id, teacher_id, title, description, image_url, status, created_at, updated_at
            FROM tests
            WHERE ($1::BIGINT IS NULL OR teacher_id = $1)
              AND ($2::TEXT IS NULL OR title ILIKE $2)
              AND ($3::TEXT IS NULL OR description ILIKE $3)
              AND ($4::test_status IS NULL OR status = $4)
            ORDER BY created_at DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(filter.teacher_id)
        .bind(filter.title.as_deref().map(contains_pattern))
        .bind(filter.description.as_deref().map(contains_pattern))
        .bind(filter.status)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(tests)
    }

    async fn titles_with_prefix(&self, teacher_id: i64, prefix: &str) -> Result<Vec<String>> {
        let titles = sqlx::query_scalar::<_, String>(
            "SELECT title FROM tests WHERE teacher_id = $1 AND title ILIKE $2",
        )
        .bind(teacher_id)
        .bind(format!("{}%", escape_like(prefix)))
        .fetch_all(&self.pool)
        .await?;
        Ok(titles)
    }

    async fn tests_by_teacher(&self, teacher_id: i64) -> Result<Vec<TestWithQuestions>> {
        let mut conn = self.pool.acquire().await?;
        let tests = sqlx::query_as::<_, Test>(
            r#"
            SELECT id, teacher_id, title, description, image_url, status, created_at, updated_at
            FROM tests WHERE teacher_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(teacher_id)
        .fetch_all(&mut *conn)
        .await?;

        let test_ids: Vec<Uuid> = tests.iter().map(|t| t.id).collect();
        let mut by_test: HashMap<Uuid, Vec<QuestionWithOptions>> = HashMap::new();
        for question in question_trees(&mut conn, &test_ids).await? {
            by_test.entry(question.question.test_id).or_default().push(question);
        }

        Ok(tests
            .into_iter()
            .map(|test| {
                let questions = by_test.remove(&test.id).unwrap_or_default();
                TestWithQuestions { test, questions }
            })
            .collect())
    }

    async fn update_test(&self, test_id: Uuid, changes: TestChanges) -> Result<Option<Test>> {
        let test = sqlx::query_as::<_, Test>(
            r#"
            UPDATE tests SET
                title = COALESCE($2, title),
                description = CASE WHEN $3 THEN $4 ELSE description END,
                image_url = CASE WHEN $5 THEN $6 ELSE image_url END,
                status = COALESCE($7, status),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, teacher_id, title, description, image_url, status, created_at, updated_at
            "#,
        )
        .bind(test_id)
        .bind(&changes.title)
        .bind(changes.description.is_some())
        .bind(changes.description.flatten())
        .bind(changes.image_url.is_some())
        .bind(changes.image_url.flatten())
        .bind(changes.status)
        .fetch_optional(&self.pool)
        .await?;
        Ok(test)
    }

    async fn delete_test(&self, test_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tests WHERE id = $1")
            .bind(test_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_tests_by_teacher(&self, teacher_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM tests WHERE teacher_id = $1")
            .bind(teacher_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_question(
        &self,
        test_id: Uuid,
        new: NewQuestion,
    ) -> Result<QuestionWithOptions> {
        let mut tx = self.pool.begin().await?;
        let question = insert_question_tree(&mut tx, test_id, new).await?;
        tx.commit().await?;
        Ok(question)
    }

    async fn update_question(
        &self,
        test_id: Uuid,
        question_id: Uuid,
        changes: QuestionChanges,
    ) -> Result<Option<QuestionWithOptions>> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE questions SET
                question_text = COALESCE($3, question_text),
                image_url = CASE WHEN $4 THEN $5 ELSE image_url END,
                position = COALESCE($6, position),
                points = COALESCE($7, points)
            WHERE id = $1 AND test_id = $2
            RETURNING id
            "#,
        )
        .bind(question_id)
        .bind(test_id)
        .bind(&changes.question_text)
        .bind(changes.image_url.is_some())
        .bind(changes.image_url.flatten())
        .bind(changes.position)
        .bind(changes.points)
        .fetch_optional(&mut *tx)
        .await?;
        if updated.is_none() {
            return Ok(None);
        }

        // Deleted options go first; edits aimed at them are dropped.
        if !changes.option_ids_to_delete.is_empty() {
            sqlx::query("DELETE FROM answer_options WHERE question_id = $1 AND id = ANY($2)")
                .bind(question_id)
                .bind(&changes.option_ids_to_delete)
                .execute(&mut *tx)
                .await?;
        }

        for change in changes.options {
            match change {
                OptionChange::Update { id, .. } if changes.option_ids_to_delete.contains(&id) => {}
                OptionChange::Update {
                    id,
                    answer_text,
                    image_url,
                    is_correct,
                } => {
                    let result = sqlx::query(
                        r#"
                        UPDATE answer_options SET
                            answer_text = CASE WHEN $3 THEN $4 ELSE answer_text END,
                            image_url = CASE WHEN $5 THEN $6 ELSE image_url END,
                            is_correct = COALESCE($7, is_correct)
                        WHERE id = $1 AND question_id = $2
                        "#,
                    )
                    .bind(id)
                    .bind(question_id)
                    .bind(answer_text.is_some())
                    .bind(answer_text.flatten())
                    .bind(image_url.is_some())
                    .bind(image_url.flatten())
                    .bind(is_correct)
                    .execute(&mut *tx)
                    .await?;
                    if result.rows_affected() == 0 {
                        return Err(NotFound::AnswerOption(id).into());
                    }
                }
                OptionChange::Insert(new) => {
                    sqlx::query(
                        r#"
                        INSERT INTO answer_options (question_id, answer_text, image_url, is_correct)
                        VALUES ($1, $2, $3, $4)
                        "#,
                    )
                    .bind(question_id)
                    .bind(&new.answer_text)
                    .bind(&new.image_url)
                    .bind(new.is_correct)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        let question = single_question_tree(&mut tx, question_id).await?;
        tx.commit().await?;
        Ok(question)
    }

    async fn delete_question(&self, test_id: Uuid, question_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM questions WHERE id = $1 AND test_id = $2")
            .bind(question_id)
            .bind(test_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_questions_by_test(&self, test_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM questions WHERE test_id = $1")
            .bind(test_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn referenced_image_urls(&self, candidates: &[String]) -> Result<BTreeSet<String>> {
        if candidates.is_empty() {
            return Ok(BTreeSet::new());
        }
        let urls = sqlx::query_scalar::<_, String>(
            r#"
            SELECT image_url FROM tests WHERE image_url = ANY($1)
            UNION
            SELECT image_url FROM questions WHERE image_url = ANY($1)
            UNION
            SELECT image_url FROM answer_options WHERE image_url = ANY($1)
            "#,
        )
        .bind(candidates)
        .fetch_all(&self.pool)
        .await?;
        Ok(urls.into_iter().collect())
    }
}

#[async_trait]
impl AttemptStore for PgStore {
    async fn create_attempt(&self, student_id: i64, test_id: Uuid) -> Result<TestAttempt> {
        sqlx::query_as::<_, TestAttempt>(
            r#"
            INSERT INTO test_attempts (student_id, test_id, status)
            VALUES ($1, $2, 'IN_PROGRESS')
            RETURNING id, student_id, test_id, status, score, created_at, updated_at
            "#,
        )
        .bind(student_id)
        .bind(test_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            let student_fk = matches!(
                &err,
                sqlx::Error::Database(db) if db.constraint() == Some("test_attempts_student_id_fkey")
            );
            if student_fk {
                missing_parent(err, NotFound::User(student_id))
            } else {
                missing_parent(err, NotFound::Test(test_id))
            }
        })
    }

    async fn find_attempt(&self, attempt_id: Uuid) -> Result<Option<TestAttempt>> {
        let attempt = sqlx::query_as::<_, TestAttempt>(
            r#"
            SELECT id, student_id, test_id, status, score, created_at, updated_at
            FROM test_attempts WHERE id = $1
            "#,
        )
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(attempt)
    }

    async fn upsert_answer(&self, submission: AnswerSubmission) -> Result<StudentAnswer> {
        let chosen: Vec<Uuid> = submission
            .chosen_option_ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut tx = self.pool.begin().await?;

        let status = sqlx::query_scalar::<_, AttemptStatus>(
            "SELECT status FROM test_attempts WHERE id = $1 FOR UPDATE",
        )
        .bind(submission.attempt_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(NotFound::Attempt(submission.attempt_id))?;
        if status != AttemptStatus::InProgress {
            return Err(Conflict::AlreadyFinished(submission.attempt_id).into());
        }

        if !chosen.is_empty() {
            let known: BTreeSet<Uuid> = sqlx::query_scalar::<_, Uuid>(
                "SELECT id FROM answer_options WHERE id = ANY($1)",
            )
            .bind(&chosen)
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .collect();
            if let Some(missing) = chosen.iter().find(|id| !known.contains(id)) {
                return Err(NotFound::AnswerOption(*missing).into());
            }
        }

        let (id, created_at, updated_at) =
            sqlx::query_as::<_, (Uuid, DateTime<Utc>, DateTime<Utc>)>(
                r#"
                INSERT INTO student_answers (attempt_id, question_id, is_correct)
                VALUES ($1, $2, $3)
                ON CONFLICT (attempt_id, question_id)
                DO UPDATE SET is_correct = EXCLUDED.is_correct, updated_at = NOW()
                RETURNING id, created_at, updated_at
                "#,
            )
            .bind(submission.attempt_id)
            .bind(submission.question_id)
            .bind(submission.is_correct)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| missing_parent(e, NotFound::Question(submission.question_id)))?;

        sqlx::query("DELETE FROM student_answer_options WHERE student_answer_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if !chosen.is_empty() {
            sqlx::query(
                r#"
                INSERT INTO student_answer_options (student_answer_id, answer_option_id)
                SELECT $1, UNNEST($2::uuid[])
                "#,
            )
            .bind(id)
            .bind(&chosen)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(StudentAnswer {
            id,
            attempt_id: submission.attempt_id,
            question_id: submission.question_id,
            is_correct: submission.is_correct,
            chosen_option_ids: chosen,
            created_at,
            updated_at,
        })
    }

    async fn finish_attempt(&self, attempt_id: Uuid, score: ScoreFn) -> Result<FinishedAttempt> {
        let mut tx = self.pool.begin().await?;

        let attempt = sqlx::query_as::<_, TestAttempt>(
            r#"
            SELECT id, student_id, test_id, status, score, created_at, updated_at
            FROM test_attempts WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(attempt_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(NotFound::Attempt(attempt_id))?;
        if !attempt.is_open() {
            return Err(Conflict::AlreadyFinished(attempt_id).into());
        }

        let questions = sqlx::query_as::<_, Question>(
            r#"
            SELECT id, test_id, question_text, image_url, position, points
            FROM questions WHERE test_id = $1
            ORDER BY position, seq
            "#,
        )
        .bind(attempt.test_id)
        .fetch_all(&mut *tx)
        .await?;
        let answers = answers_for(&mut tx, &[attempt_id]).await?;
        let breakdown = score(&questions, &answers);

        let attempt = sqlx::query_as::<_, TestAttempt>(
            r#"
            UPDATE test_attempts
            SET status = 'COMPLETED', score = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, student_id, test_id, status, score, created_at, updated_at
            "#,
        )
        .bind(attempt_id)
        .bind(breakdown.score)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(FinishedAttempt { attempt, breakdown })
    }

    async fn answers_for_attempts(&self, attempt_ids: &[Uuid]) -> Result<Vec<StudentAnswer>> {
        let mut conn = self.pool.acquire().await?;
        answers_for(&mut conn, attempt_ids).await
    }

    async fn completed_attempts_for_test(&self, test_id: Uuid) -> Result<Vec<TestAttempt>> {
        let attempts = sqlx::query_as::<_, TestAttempt>(
            r#"
            SELECT id, student_id, test_id, status, score, created_at, updated_at
            FROM test_attempts
            WHERE test_id = $1 AND status = 'COMPLETED'
            ORDER BY created_at DESC
            "#,
        )
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(attempts)
    }

    async fn attempts_by_student(
        &self,
        student_id: i64,
        teacher_id: Option<i64>,
        page: Pagination,
    ) -> Result<Vec<AttemptSummary>> {
        let summaries = sqlx::query_as::<_, AttemptSummary>(
            r#"
            SELECT
                a.id AS attempt_id, a.test_id, t.title AS test_title, a.status, a.score,
                a.created_at AS started_at, a.updated_at
            FROM test_attempts a
            JOIN tests t ON t.id = a.test_id
            WHERE a.student_id = $1 AND ($2::BIGINT IS NULL OR t.teacher_id = $2)
            ORDER BY a.created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(student_id)
        .bind(teacher_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(summaries)
    }

    async fn student_stats(&self, student_id: i64) -> Result<StudentStats> {
        let (total_tests_completed, average_score, in_progress_count) =
            sqlx::query_as::<_, (i64, Option<f64>, i64)>(
                r#"
                SELECT
                    COUNT(*) FILTER (WHERE status = 'COMPLETED'),
                    AVG(COALESCE(score, 0)) FILTER (WHERE status = 'COMPLETED'),
                    COUNT(*) FILTER (WHERE status = 'IN_PROGRESS')
                FROM test_attempts
                WHERE student_id = $1
                "#,
            )
            .bind(student_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(StudentStats {
            total_tests_completed,
            average_score,
            in_progress_count,
        })
    }

    async fn results_for_test(&self, test_id: Uuid, page: Pagination) -> Result<Vec<StudentResult>> {
        let results = sqlx::query_as::<_, StudentResult>(
            r#"
            SELECT
                a.id AS attempt_id, u.id AS student_id, u.email AS student_email,
                u.login AS student_login, a.status, a.score, a.created_at, a.updated_at
            FROM test_attempts a
            JOIN users u ON u.id = a.student_id
            WHERE a.test_id = $1
            ORDER BY a.created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(test_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(results)
    }

    async fn students_of_teacher(
        &self,
        teacher_id: i64,
        login: Option<&str>,
        page: Pagination,
    ) -> Result<Vec<User>> {
        let students = sqlx::query_as::<_, User>(
            r#"
            SELECT DISTINCT u.id, u.email, u.login, u.password_hash, u.role, u.created_at, u.updated_at
            FROM users u
            JOIN test_attempts a ON a.student_id = u.id
            JOIN tests t ON t.id = a.test_id
            WHERE t.teacher_id = $1 AND ($2::TEXT IS NULL OR u.login ILIKE $2)
            ORDER BY u.login
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(teacher_id)
        .bind(login.map(contains_pattern))
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(students)
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn insert_user(&self, new: NewUser) -> Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, login, password_hash, role)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, login, password_hash, role, created_at, updated_at
            "#,
        )
        .bind(&new.email)
        .bind(&new.login)
        .bind(&new.password_hash)
        .bind(new.role)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user(&self, user_id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, login, password_hash, role, created_at, updated_at
            FROM users WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn list_users(&self, filter: &UserFilter, page: Pagination) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, login, password_hash, role, created_at, updated_at
            FROM users
            WHERE ($1::TEXT IS NULL OR login ILIKE $1)
              AND ($2::TEXT IS NULL OR email ILIKE $2)
              AND ($3::user_role IS NULL OR role = $3)
            ORDER BY id
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(filter.login.as_deref().map(contains_pattern))
        .bind(filter.email.as_deref().map(contains_pattern))
        .bind(filter.role)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn set_user_role(&self, user_id: i64, role: Role) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET role = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, email, login, password_hash, role, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(role)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn delete_user(&self, user_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_role_request(&self, user_id: i64, role: Role) -> Result<RoleRequest> {
        sqlx::query_as::<_, RoleRequest>(
            r#"
            INSERT INTO role_requests (user_id, requested_role, status)
            VALUES ($1, $2, 'pending')
            RETURNING id, user_id, requested_role, status, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(role)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| missing_parent(e, NotFound::User(user_id)))
    }

    async fn find_role_request(&self, request_id: i64) -> Result<Option<RoleRequest>> {
        let request = sqlx::query_as::<_, RoleRequest>(
            r#"
            SELECT id, user_id, requested_role, status, created_at, updated_at
            FROM role_requests WHERE id = $1
            "#,
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(request)
    }

    async fn list_role_requests(
        &self,
        status: Option<RoleRequestStatus>,
        page: Pagination,
    ) -> Result<Vec<RoleRequest>> {
        let requests = sqlx::query_as::<_, RoleRequest>(
            r#"
            SELECT id, user_id, requested_role, status, created_at, updated_at
            FROM role_requests
            WHERE ($1::role_request_status IS NULL OR status = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(requests)
    }

    async fn resolve_role_request(
        &self,
        request_id: i64,
        status: RoleRequestStatus,
    ) -> Result<RoleRequest> {
        let mut tx = self.pool.begin().await?;

        let request = sqlx::query_as::<_, RoleRequest>(
            r#"
            SELECT id, user_id, requested_role, status, created_at, updated_at
            FROM role_requests WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(NotFound::RoleRequest(request_id))?;
        if request.status != RoleRequestStatus::Pending {
            return Err(Conflict::RoleRequestAlreadyResolved(request_id).into());
        }

        if status == RoleRequestStatus::Approved {
            sqlx::query("UPDATE users SET role = $2, updated_at = NOW() WHERE id = $1")
                .bind(request.user_id)
                .bind(request.requested_role)
                .execute(&mut *tx)
                .await?;
        }

        let resolved = sqlx::query_as::<_, RoleRequest>(
            r#"
            UPDATE role_requests SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, user_id, requested_role, status, created_at, updated_at
            "#,
        )
        .bind(request_id)
        .bind(status)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_patterns_escape_metacharacters() {
        assert_eq!(contains_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(escape_like("plain"), "plain");
    }
}
