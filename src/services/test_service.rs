use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::database::{
    CatalogStore, NewAnswerOption, NewQuestion, NewTest, OptionChange, QuestionChanges, Store,
    TestChanges, TestFilter,
};
use crate::dto::pagination::Pagination;
use crate::dto::student_dto::AttemptHistoryItem;
use crate::dto::teacher_dto::{
    AnswerOptionPayload, CreateQuestionPayload, CreateTestPayload, EditAnswerOptionPayload,
    EditQuestionPayload, EditTestPayload, SearchStudentQuery, SearchTestQuery,
};
use crate::error::{Conflict, Error, NotFound, Result};
use crate::models::question::{option_has_content, QuestionWithOptions};
use crate::models::test::{Test, TestStatus, TestWithQuestions};
use crate::models::test_attempt::StudentResult;
use crate::models::user::{Caller, Role, User};
use crate::services::storage_service::{purge_images, CleanupReport, ObjectStorage};

const DUPLICATE_TITLE_RETRIES: u32 = 10;

/// Result of a delete that cascades over a catalog subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeletionSummary {
    pub deleted: u64,
    pub cleanup: CleanupReport,
}

/// Sends deletion requests for the URLs no row references any more. Runs after the
/// database delete has committed, so every failure here leaves an orphaned object at worst.
pub(crate) async fn release_images(
    catalog: &dyn CatalogStore,
    storage: &dyn ObjectStorage,
    urls: Vec<String>,
) -> CleanupReport {
    if urls.is_empty() {
        return CleanupReport::default();
    }
    match catalog.referenced_image_urls(&urls).await {
        Ok(in_use) => {
            let orphaned = urls.into_iter().filter(|u| !in_use.contains(u)).collect();
            purge_images(storage, orphaned).await
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not check image references, skipping cleanup");
            CleanupReport {
                requested: urls.len(),
                failed: urls.len(),
            }
        }
    }
}

/// Title for the `n`th copy of `base`.
fn copy_title(base: &str, n: u32) -> String {
    format!("{} (copy {})", base, n)
}

/// First copy number not yet used among `existing` titles.
fn next_copy_number(base: &str, existing: &[String]) -> u32 {
    let prefix = format!("{} (copy ", base).to_lowercase();
    existing
        .iter()
        .filter_map(|title| {
            title
                .to_lowercase()
                .strip_prefix(&prefix)?
                .strip_suffix(')')?
                .parse::<u32>()
                .ok()
        })
        .max()
        .map_or(1, |n| n + 1)
}

fn new_option(payload: AnswerOptionPayload) -> Result<NewAnswerOption> {
    payload.ensure_content()?;
    Ok(NewAnswerOption {
        answer_text: payload.answer_text,
        image_url: payload.image_url,
        is_correct: payload.is_correct,
    })
}

/// Replaced-image bookkeeping: the old URL is released when the new value differs.
fn replaced(old: Option<&String>, new: Option<&Option<String>>) -> Option<String> {
    match (old, new) {
        (Some(old), Some(new)) if new.as_ref() != Some(old) => Some(old.clone()),
        _ => None,
    }
}

/// Turns option edits into store changes plus the image URLs they release.
///
/// Options listed for deletion get no update, whatever the edit says; their images are
/// released with the rest. Every surviving option must keep text or an image.
fn plan_option_edits(
    current: &QuestionWithOptions,
    edits: Vec<EditAnswerOptionPayload>,
    to_delete: &[Uuid],
) -> Result<(Vec<OptionChange>, Vec<String>)> {
    let mut changes = Vec::with_capacity(edits.len());
    let mut released = Vec::new();
    for edit in edits {
        let Some(id) = edit.id else {
            changes.push(OptionChange::Insert(new_option(AnswerOptionPayload {
                answer_text: edit.answer_text.flatten(),
                image_url: edit.image_url.flatten(),
                is_correct: edit.is_correct.unwrap_or(false),
            })?));
            continue;
        };
        let existing = current
            .options
            .iter()
            .find(|o| o.id == id)
            .ok_or(NotFound::AnswerOption(id))?;
        if to_delete.contains(&id) {
            continue;
        }

        let text = edit.answer_text.clone().unwrap_or(existing.answer_text.clone());
        let image = edit.image_url.clone().unwrap_or(existing.image_url.clone());
        if !option_has_content(text.as_deref(), image.as_deref()) {
            return Err(Error::InvalidInput(format!(
                "answer option {} would have neither text nor image",
                id
            )));
        }
        released.extend(replaced(existing.image_url.as_ref(), edit.image_url.as_ref()));
        changes.push(OptionChange::Update {
            id,
            answer_text: edit.answer_text,
            image_url: edit.image_url,
            is_correct: edit.is_correct,
        });
    }
    released.extend(
        current
            .options
            .iter()
            .filter(|o| to_delete.contains(&o.id))
            .filter_map(|o| o.image_url.clone()),
    );
    Ok((changes, released))
}

#[derive(Clone)]
pub struct TestService {
    store: Store,
    storage: Arc<dyn ObjectStorage>,
}

impl TestService {
    pub fn new(store: Store, storage: Arc<dyn ObjectStorage>) -> Self {
        Self { store, storage }
    }

    async fn release(&self, urls: Vec<String>) -> CleanupReport {
        release_images(self.store.catalog.as_ref(), self.storage.as_ref(), urls).await
    }

    /// Loads a test the caller authored; admins may act on any test.
    async fn owned_test(&self, caller: &Caller, test_id: Uuid) -> Result<TestWithQuestions> {
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
        Ok(test)
    }

    pub async fn create_test(&self, caller: &Caller, payload: CreateTestPayload) -> Result<Test> {
        caller.require(Role::Teacher)?;
        let created = self
            .store
            .catalog
            .insert_test(NewTest {
                teacher_id: caller.id,
                title: payload.title,
                description: payload.description,
                image_url: payload.image_url,
                status: TestStatus::Draft,
                questions: Vec::new(),
            })
            .await?;
        tracing::info!(test_id = %created.test.id, teacher_id = caller.id, "test created");
        Ok(created.test)
    }

    pub async fn list_tests(
        &self,
        caller: &Caller,
        query: SearchTestQuery,
        page: Pagination,
    ) -> Result<Vec<Test>> {
        caller.require(Role::Teacher)?;
        let filter = TestFilter {
            teacher_id: (caller.role != Role::Admin).then_some(caller.id),
            title: query.title,
            description: query.description,
            status: query.status,
        };
        self.store.catalog.list_tests(&filter, page).await
    }

    pub async fn get_test(&self, caller: &Caller, test_id: Uuid) -> Result<TestWithQuestions> {
        self.owned_test(caller, test_id).await
    }

    pub async fn edit_test(
        &self,
        caller: &Caller,
        test_id: Uuid,
        payload: EditTestPayload,
    ) -> Result<Test> {
        let current = self.owned_test(caller, test_id).await?;
        let stale = replaced(current.test.image_url.as_ref(), payload.image_url.as_ref());

        let updated = self
            .store
            .catalog
            .update_test(
                test_id,
                TestChanges {
                    title: payload.title,
                    description: payload.description,
                    image_url: payload.image_url,
                    status: None,
                },
            )
            .await?
            .ok_or(NotFound::Test(test_id))?;

        self.release(stale.into_iter().collect()).await;
        Ok(updated)
    }

    pub async fn set_test_status(
        &self,
        caller: &Caller,
        test_id: Uuid,
        status: TestStatus,
    ) -> Result<Test> {
        self.owned_test(caller, test_id).await?;
        let updated = self
            .store
            .catalog
            .update_test(
                test_id,
                TestChanges {
                    status: Some(status),
                    ..TestChanges::default()
                },
            )
            .await?
            .ok_or(NotFound::Test(test_id))?;
        tracing::info!(test_id = %test_id, status = ?status, "test status changed");
        Ok(updated)
    }

    /// Deep copy as a DRAFT titled "<title> (copy N)". Image URLs are shared with the source.
    pub async fn duplicate_test(&self, caller: &Caller, test_id: Uuid) -> Result<TestWithQuestions> {
        let source = self.owned_test(caller, test_id).await?;
        let base = source.test.title.clone();
        let existing = self
            .store
            .catalog
            .titles_with_prefix(source.test.teacher_id, &format!("{} (copy ", base))
            .await?;
        let mut n = next_copy_number(&base, &existing);

        let questions: Vec<NewQuestion> = source
            .questions
            .iter()
            .map(|q| NewQuestion {
                question_text: q.question.question_text.clone(),
                image_url: q.question.image_url.clone(),
                position: Some(q.question.position),
                points: q.question.points,
                options: q
                    .options
                    .iter()
                    .map(|o| NewAnswerOption {
                        answer_text: o.answer_text.clone(),
                        image_url: o.image_url.clone(),
                        is_correct: o.is_correct,
                    })
                    .collect(),
            })
            .collect();

        for _ in 0..DUPLICATE_TITLE_RETRIES {
            let attempt = self
                .store
                .catalog
                .insert_test(NewTest {
                    teacher_id: source.test.teacher_id,
                    title: copy_title(&base, n),
                    description: source.test.description.clone(),
                    image_url: source.test.image_url.clone(),
                    status: TestStatus::Draft,
                    questions: questions.clone(),
                })
                .await;
            match attempt {
                Ok(copy) => {
                    tracing::info!(source = %test_id, copy = %copy.test.id, "test duplicated");
                    return Ok(copy);
                }
                Err(Error::Conflict(Conflict::DuplicateTitle)) => {
                    tracing::debug!(title = %copy_title(&base, n), "copy title taken, retrying");
                    n += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Err(Conflict::DuplicateTitle.into())
    }

    pub async fn add_question(
        &self,
        caller: &Caller,
        test_id: Uuid,
        payload: CreateQuestionPayload,
    ) -> Result<QuestionWithOptions> {
        self.owned_test(caller, test_id).await?;
        let options = payload
            .answer_options
            .into_iter()
            .map(new_option)
            .collect::<Result<Vec<_>>>()?;

        self.store
            .catalog
            .insert_question(
                test_id,
                NewQuestion {
                    question_text: payload.question_text,
                    image_url: payload.image_url,
                    position: payload.position,
                    points: payload.points,
                    options,
                },
            )
            .await
    }

    pub async fn get_question(
        &self,
        caller: &Caller,
        test_id: Uuid,
        question_id: Uuid,
    ) -> Result<QuestionWithOptions> {
        let test = self.owned_test(caller, test_id).await?;
        test.question(question_id)
            .cloned()
            .ok_or_else(|| NotFound::QuestionNotInTest { question_id, test_id }.into())
    }

    pub async fn edit_question(
        &self,
        caller: &Caller,
        test_id: Uuid,
        question_id: Uuid,
        payload: EditQuestionPayload,
    ) -> Result<QuestionWithOptions> {
        let test = self.owned_test(caller, test_id).await?;
        let current = test
            .question(question_id)
            .ok_or(NotFound::QuestionNotInTest { question_id, test_id })?;

        let mut stale: Vec<String> = Vec::new();
        stale.extend(replaced(
            current.question.image_url.as_ref(),
            payload.image_url.as_ref(),
        ));

        let (options, released) =
            plan_option_edits(current, payload.answer_options, &payload.option_ids_to_delete)?;
        stale.extend(released);

        let updated = self
            .store
            .catalog
            .update_question(
                test_id,
                question_id,
                QuestionChanges {
                    question_text: payload.question_text,
                    image_url: payload.image_url,
                    position: payload.position,
                    points: payload.points,
                    options,
                    option_ids_to_delete: payload.option_ids_to_delete,
                },
            )
            .await?
            .ok_or(NotFound::QuestionNotInTest { question_id, test_id })?;

        self.release(stale).await;
        Ok(updated)
    }

    pub async fn delete_question(
        &self,
        caller: &Caller,
        test_id: Uuid,
        question_id: Uuid,
    ) -> Result<DeletionSummary> {
        let test = self.owned_test(caller, test_id).await?;
        let question = test
            .question(question_id)
            .ok_or(NotFound::QuestionNotInTest { question_id, test_id })?;
        let urls = question.image_urls();

        if !self.store.catalog.delete_question(test_id, question_id).await? {
            return Err(NotFound::QuestionNotInTest { question_id, test_id }.into());
        }
        Ok(DeletionSummary {
            deleted: 1,
            cleanup: self.release(urls).await,
        })
    }

    pub async fn delete_all_questions(
        &self,
        caller: &Caller,
        test_id: Uuid,
    ) -> Result<DeletionSummary> {
        let test = self.owned_test(caller, test_id).await?;
        let urls: Vec<String> = test.questions.iter().flat_map(|q| q.image_urls()).collect();

        let deleted = self.store.catalog.delete_questions_by_test(test_id).await?;
        Ok(DeletionSummary {
            deleted,
            cleanup: self.release(urls).await,
        })
    }

    pub async fn delete_test(&self, caller: &Caller, test_id: Uuid) -> Result<DeletionSummary> {
        let test = self.owned_test(caller, test_id).await?;
        let urls = test.image_urls();

        if !self.store.catalog.delete_test(test_id).await? {
            return Err(NotFound::Test(test_id).into());
        }
        let cleanup = self.release(urls).await;
        tracing::info!(
            test_id = %test_id,
            images = cleanup.requested,
            failed = cleanup.failed,
            "test deleted"
        );
        Ok(DeletionSummary { deleted: 1, cleanup })
    }

    /// Deletes every test the caller authored.
    pub async fn delete_all_tests(&self, caller: &Caller) -> Result<DeletionSummary> {
        caller.require(Role::Teacher)?;
        let tests = self.store.catalog.tests_by_teacher(caller.id).await?;
        let urls: Vec<String> = tests.iter().flat_map(|t| t.image_urls()).collect();

        let deleted = self.store.catalog.delete_tests_by_teacher(caller.id).await?;
        let cleanup = self.release(urls).await;
        tracing::info!(teacher_id = caller.id, deleted, "all tests deleted");
        Ok(DeletionSummary { deleted, cleanup })
    }

    pub async fn test_results(
        &self,
        caller: &Caller,
        test_id: Uuid,
        page: Pagination,
    ) -> Result<Vec<StudentResult>> {
        self.owned_test(caller, test_id).await?;
        self.store.attempts.results_for_test(test_id, page).await
    }

    pub async fn students(
        &self,
        caller: &Caller,
        query: SearchStudentQuery,
        page: Pagination,
    ) -> Result<Vec<User>> {
        caller.require(Role::Teacher)?;
        self.store
            .attempts
            .students_of_teacher(caller.id, query.login.as_deref(), page)
            .await
    }

    /// A student's attempts on the caller's tests; admins see every attempt.
    pub async fn student_results(
        &self,
        caller: &Caller,
        student_id: i64,
        page: Pagination,
    ) -> Result<Vec<AttemptHistoryItem>> {
        caller.require(Role::Teacher)?;
        self.store
            .accounts
            .find_user(student_id)
            .await?
            .ok_or(NotFound::User(student_id))?;
        let scope = (caller.role != Role::Admin).then_some(caller.id);
        let attempts = self
            .store
            .attempts
            .attempts_by_student(student_id, scope, page)
            .await?;
        Ok(attempts.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::NewUser;
    use crate::services::storage_service::MockObjectStorage;
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    async fn teacher(store: &Store, login: &str) -> Caller {
        let user = store
            .accounts
            .insert_user(NewUser {
                email: format!("{}@school.test", login),
                login: login.to_string(),
                password_hash: "x".into(),
                role: Role::Teacher,
            })
            .await
            .unwrap();
        Caller::new(user.id, Role::Teacher)
    }

    fn option(text: &str, image: Option<&str>, is_correct: bool) -> AnswerOptionPayload {
        AnswerOptionPayload {
            answer_text: Some(text.to_string()),
            image_url: image.map(str::to_string),
            is_correct,
        }
    }

    fn question(text: &str, image: Option<&str>, options: Vec<AnswerOptionPayload>) -> CreateQuestionPayload {
        CreateQuestionPayload {
            question_text: text.to_string(),
            image_url: image.map(str::to_string),
            position: None,
            points: 1,
            answer_options: options,
        }
    }

    fn new_test(title: &str, image: Option<&str>) -> CreateTestPayload {
        CreateTestPayload {
            title: title.to_string(),
            description: None,
            image_url: image.map(str::to_string),
        }
    }

    /// Storage double that records every deletion request.
    fn recording_storage(fail_on: Option<&'static str>) -> (MockObjectStorage, Arc<Mutex<Vec<String>>>) {
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let sink = deleted.clone();
        let mut storage = MockObjectStorage::new();
        storage.expect_delete().returning(move |url| {
            sink.lock().unwrap().push(url.to_string());
            match fail_on {
                Some(bad) if url == bad => Err(Error::Storage("bucket unavailable".into())),
                _ => Ok(()),
            }
        });
        (storage, deleted)
    }

    #[test]
    fn copy_numbers_continue_after_the_highest() {
        let existing = vec![
            "Algebra (copy 1)".to_string(),
            "algebra (COPY 3)".to_string(),
            "Algebra (copy x)".to_string(),
        ];
        assert_eq!(next_copy_number("Algebra", &existing), 4);
        assert_eq!(next_copy_number("Algebra", &[]), 1);
    }

    #[tokio::test]
    async fn deleting_a_test_requests_deletion_of_every_reachable_image() {
        let store = Store::in_memory();
        let (storage, deleted) = recording_storage(None);
        let service = TestService::new(store.clone(), Arc::new(storage));
        let author = teacher(&store, "teacher01").await;

        let test = service
            .create_test(&author, new_test("Geography", Some("http://img/test.png")))
            .await
            .unwrap();
        service
            .add_question(
                &author,
                test.id,
                question(
                    "Capital of France?",
                    Some("http://img/q1.png"),
                    vec![option("Paris", Some("http://img/paris.png"), true), option("Rome", None, false)],
                ),
            )
            .await
            .unwrap();
        service
            .add_question(&author, test.id, question("Largest ocean?", None, vec![option("Pacific", Some("http://img/pacific.png"), true)]))
            .await
            .unwrap();

        let summary = service.delete_test(&author, test.id).await.unwrap();
        assert_eq!(summary.cleanup, CleanupReport { requested: 4, failed: 0 });

        let mut urls = deleted.lock().unwrap().clone();
        urls.sort();
        assert_eq!(
            urls,
            vec![
                "http://img/pacific.png",
                "http://img/paris.png",
                "http://img/q1.png",
                "http://img/test.png"
            ]
        );
        assert!(store.catalog.find_test(test.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn storage_failures_leave_the_database_delete_committed() {
        let store = Store::in_memory();
        let (storage, _) = recording_storage(Some("http://img/q1.png"));
        let service = TestService::new(store.clone(), Arc::new(storage));
        let author = teacher(&store, "teacher02").await;

        let test = service.create_test(&author, new_test("History", None)).await.unwrap();
        service
            .add_question(&author, test.id, question("When?", Some("http://img/q1.png"), vec![option("1066", Some("http://img/o.png"), true)]))
            .await
            .unwrap();

        let summary = assert_ok!(service.delete_test(&author, test.id).await);
        assert_eq!(summary.cleanup, CleanupReport { requested: 2, failed: 1 });
        assert!(store.catalog.find_test(test.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn images_shared_with_a_copy_survive_deleting_the_original() {
        let store = Store::in_memory();
        let (storage, deleted) = recording_storage(None);
        let service = TestService::new(store.clone(), Arc::new(storage));
        let author = teacher(&store, "teacher03").await;

        let test = service
            .create_test(&author, new_test("Physics", Some("http://img/shared.png")))
            .await
            .unwrap();
        let copy = service.duplicate_test(&author, test.id).await.unwrap();
        assert_eq!(copy.test.title, "Physics (copy 1)");
        assert_eq!(copy.test.status, TestStatus::Draft);

        let summary = service.delete_test(&author, test.id).await.unwrap();
        assert_eq!(summary.cleanup.requested, 0);
        assert!(deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_copies_questions_and_numbers_titles() {
        let store = Store::in_memory();
        let service = TestService::new(store.clone(), Arc::new(MockObjectStorage::new()));
        let author = teacher(&store, "teacher04").await;

        let test = service.create_test(&author, new_test("Chemistry", None)).await.unwrap();
        service
            .add_question(&author, test.id, question("H2O?", None, vec![option("Water", None, true), option("Salt", None, false)]))
            .await
            .unwrap();

        let first = service.duplicate_test(&author, test.id).await.unwrap();
        let second = service.duplicate_test(&author, test.id).await.unwrap();
        assert_eq!(first.test.title, "Chemistry (copy 1)");
        assert_eq!(second.test.title, "Chemistry (copy 2)");
        assert_eq!(second.questions.len(), 1);
        assert_eq!(second.questions[0].options.len(), 2);
        assert_ne!(second.questions[0].question.id, first.questions[0].question.id);
    }

    #[tokio::test]
    async fn duplicate_titles_conflict_per_author_only() {
        let store = Store::in_memory();
        let service = TestService::new(store.clone(), Arc::new(MockObjectStorage::new()));
        let alice = teacher(&store, "teacher05").await;
        let bob = teacher(&store, "teacher06").await;

        service.create_test(&alice, new_test("Biology", None)).await.unwrap();
        let err = service.create_test(&alice, new_test("Biology", None)).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(Conflict::DuplicateTitle)));
        assert_ok!(service.create_test(&bob, new_test("Biology", None)).await);
    }

    #[tokio::test]
    async fn other_authors_are_forbidden_and_students_lack_the_capability() {
        let store = Store::in_memory();
        let service = TestService::new(store.clone(), Arc::new(MockObjectStorage::new()));
        let alice = teacher(&store, "teacher07").await;
        let bob = teacher(&store, "teacher08").await;
        let test = service.create_test(&alice, new_test("Music", None)).await.unwrap();

        let err = service.get_test(&bob, test.id).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
        let err = service.get_test(&alice, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(NotFound::Test(_))));

        let student = Caller::new(alice.id, Role::Student);
        assert_err!(service.get_test(&student, test.id).await);

        let admin = Caller::new(999, Role::Admin);
        assert_ok!(service.get_test(&admin, test.id).await);
    }

    #[tokio::test]
    async fn options_need_text_or_image() {
        let store = Store::in_memory();
        let service = TestService::new(store.clone(), Arc::new(MockObjectStorage::new()));
        let author = teacher(&store, "teacher09").await;
        let test = service.create_test(&author, new_test("Art", None)).await.unwrap();

        let blank = AnswerOptionPayload {
            answer_text: Some("  ".into()),
            image_url: None,
            is_correct: true,
        };
        let err = service
            .add_question(&author, test.id, question("Colour?", None, vec![blank]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn editing_a_question_releases_replaced_and_deleted_option_images() {
        let store = Store::in_memory();
        let (storage, deleted) = recording_storage(None);
        let service = TestService::new(store.clone(), Arc::new(storage));
        let author = teacher(&store, "teacher10").await;
        let test = service.create_test(&author, new_test("Maths", None)).await.unwrap();
        let q = service
            .add_question(
                &author,
                test.id,
                question(
                    "2+2?",
                    None,
                    vec![
                        option("4", Some("http://img/four.png"), true),
                        option("5", Some("http://img/five.png"), false),
                    ],
                ),
            )
            .await
            .unwrap();
        let (keep, drop) = (q.options[0].id, q.options[1].id);

        let edited = service
            .edit_question(
                &author,
                test.id,
                q.question.id,
                EditQuestionPayload {
                    points: Some(3),
                    answer_options: vec![
                        EditAnswerOptionPayload {
                            id: Some(keep),
                            image_url: Some(None),
                            ..Default::default()
                        },
                        EditAnswerOptionPayload {
                            answer_text: Some(Some("3".into())),
                            ..Default::default()
                        },
                    ],
                    option_ids_to_delete: vec![drop],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(edited.question.points, 3);
        assert_eq!(edited.options.len(), 2);
        assert!(edited.options.iter().all(|o| o.image_url.is_none()));
        let mut urls = deleted.lock().unwrap().clone();
        urls.sort();
        assert_eq!(urls, vec!["http://img/five.png", "http://img/four.png"]);
    }

    #[tokio::test]
    async fn questions_append_in_position_order() {
        let store = Store::in_memory();
        let service = TestService::new(store.clone(), Arc::new(MockObjectStorage::new()));
        let author = teacher(&store, "teacher11").await;
        let test = service.create_test(&author, new_test("Order", None)).await.unwrap();

        for text in ["first", "second", "third"] {
            service
                .add_question(&author, test.id, question(text, None, vec![]))
                .await
                .unwrap();
        }
        let loaded = service.get_test(&author, test.id).await.unwrap();
        let positions: Vec<i32> = loaded.questions.iter().map(|q| q.question.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);

        let missing = Uuid::new_v4();
        let err = service.get_question(&author, test.id, missing).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(NotFound::QuestionNotInTest { .. })));
    }

    #[test]
    fn edits_to_options_being_deleted_are_dropped() {
        let question_id = Uuid::new_v4();
        let opt = |text: &str, image: Option<&str>| crate::models::question::AnswerOption {
            id: Uuid::new_v4(),
            question_id,
            answer_text: Some(text.to_string()),
            image_url: image.map(str::to_string),
            is_correct: false,
        };
        let current = QuestionWithOptions {
            question: crate::models::question::Question {
                id: question_id,
                test_id: Uuid::new_v4(),
                question_text: "Pick one".into(),
                image_url: None,
                position: 1,
                points: 1,
            },
            options: vec![opt("kept", None), opt("gone", Some("http://img/gone.png"))],
        };
        let (kept, gone) = (current.options[0].id, current.options[1].id);

        let edits = vec![
            EditAnswerOptionPayload {
                id: Some(gone),
                answer_text: Some(None),
                ..Default::default()
            },
            EditAnswerOptionPayload {
                id: Some(kept),
                is_correct: Some(true),
                ..Default::default()
            },
        ];
        let (changes, released) = assert_ok!(plan_option_edits(&current, edits, &[gone]));

        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0], OptionChange::Update { id, .. } if id == kept));
        assert_eq!(released, vec!["http://img/gone.png".to_string()]);

        let blanked = vec![EditAnswerOptionPayload {
            id: Some(kept),
            answer_text: Some(None),
            ..Default::default()
        }];
        assert_err!(plan_option_edits(&current, blanked, &[]));
    }

    #[tokio::test]
    async fn blanking_an_option_that_is_also_deleted_succeeds() {
        let store = Store::in_memory();
        let service = TestService::new(store.clone(), Arc::new(MockObjectStorage::new()));
        let author = teacher(&store, "teacher12").await;
        let test = service.create_test(&author, new_test("Cleanup", None)).await.unwrap();
        let q = service
            .add_question(
                &author,
                test.id,
                question("Odd one out?", None, vec![option("a", None, true), option("b", None, false)]),
            )
            .await
            .unwrap();
        let doomed = q.options[1].id;

        let edited = service
            .edit_question(
                &author,
                test.id,
                q.question.id,
                EditQuestionPayload {
                    answer_options: vec![EditAnswerOptionPayload {
                        id: Some(doomed),
                        answer_text: Some(None),
                        ..Default::default()
                    }],
                    option_ids_to_delete: vec![doomed],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(edited.options.len(), 1);
        assert_eq!(edited.options[0].answer_text.as_deref(), Some("a"));
    }
}
