use std::sync::Arc;

use serde::Serialize;

use crate::database::{NewUser, Store, UserFilter};
use crate::dto::account_dto::{CreateAccountPayload, RegisterPayload, SearchAccountQuery};
use crate::dto::pagination::Pagination;
use crate::error::{NotFound, Result};
use crate::models::role_request::{RoleRequest, RoleRequestStatus};
use crate::models::user::{Caller, Role, User};
use crate::services::storage_service::{CleanupReport, ObjectStorage};
use crate::services::test_service::release_images;
use crate::utils::crypto::hash_password;

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub user: User,
    /// Filed when a role other than student was asked for at sign-up.
    pub role_request: Option<RoleRequest>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct AccountDeletion {
    pub user_id: i64,
    pub cleanup: CleanupReport,
}

#[derive(Clone)]
pub struct AccountService {
    store: Store,
    storage: Arc<dyn ObjectStorage>,
}

impl AccountService {
    pub fn new(store: Store, storage: Arc<dyn ObjectStorage>) -> Self {
        Self { store, storage }
    }

    /// Every account starts as a student; any other desired role becomes a pending request.
    pub async fn register(&self, payload: RegisterPayload) -> Result<Registration> {
        let user = self
            .store
            .accounts
            .insert_user(NewUser {
                email: payload.email,
                login: payload.login,
                password_hash: hash_password(&payload.password)?,
                role: Role::Student,
            })
            .await?;
        tracing::info!(user_id = user.id, "account registered");

        let role_request = match payload.desired_role {
            Role::Student => None,
            desired => Some(
                self.store
                    .accounts
                    .insert_role_request(user.id, desired)
                    .await?,
            ),
        };
        Ok(Registration { user, role_request })
    }

    pub async fn me(&self, caller: &Caller) -> Result<User> {
        self.get_account(caller.id).await
    }

    pub async fn file_role_request(&self, caller: &Caller, role: Role) -> Result<RoleRequest> {
        let request = self
            .store
            .accounts
            .insert_role_request(caller.id, role)
            .await?;
        tracing::info!(user_id = caller.id, requested = ?role, "role request filed");
        Ok(request)
    }

    pub async fn create_account(
        &self,
        caller: &Caller,
        payload: CreateAccountPayload,
    ) -> Result<User> {
        caller.require(Role::Admin)?;
        self.store
            .accounts
            .insert_user(NewUser {
                email: payload.email,
                login: payload.login,
                password_hash: hash_password(&payload.password)?,
                role: payload.role,
            })
            .await
    }

    pub async fn list_accounts(
        &self,
        caller: &Caller,
        query: SearchAccountQuery,
        page: Pagination,
    ) -> Result<Vec<User>> {
        caller.require(Role::Admin)?;
        let filter = UserFilter {
            login: query.login,
            email: query.email,
            role: query.role,
        };
        self.store.accounts.list_users(&filter, page).await
    }

    async fn get_account(&self, user_id: i64) -> Result<User> {
        self.store
            .accounts
            .find_user(user_id)
            .await?
            .ok_or_else(|| NotFound::User(user_id).into())
    }

    pub async fn account(&self, caller: &Caller, user_id: i64) -> Result<User> {
        caller.require(Role::Admin)?;
        self.get_account(user_id).await
    }

    pub async fn change_role(&self, caller: &Caller, user_id: i64, role: Role) -> Result<User> {
        caller.require(Role::Admin)?;
        let user = self
            .store
            .accounts
            .set_user_role(user_id, role)
            .await?
            .ok_or(NotFound::User(user_id))?;
        tracing::info!(user_id, role = ?role, by = caller.id, "role changed");
        Ok(user)
    }

    /// Removes the account with its tests, attempts and requests, then releases the
    /// images its tests referenced.
    pub async fn delete_account(&self, caller: &Caller, user_id: i64) -> Result<AccountDeletion> {
        caller.require(Role::Admin)?;
        let tests = self.store.catalog.tests_by_teacher(user_id).await?;
        let urls: Vec<String> = tests.iter().flat_map(|t| t.image_urls()).collect();

        if !self.store.accounts.delete_user(user_id).await? {
            return Err(NotFound::User(user_id).into());
        }
        let cleanup =
            release_images(self.store.catalog.as_ref(), self.storage.as_ref(), urls).await;
        tracing::info!(user_id, by = caller.id, tests = tests.len(), "account deleted");
        Ok(AccountDeletion { user_id, cleanup })
    }

    pub async fn list_role_requests(
        &self,
        caller: &Caller,
        status: Option<RoleRequestStatus>,
        page: Pagination,
    ) -> Result<Vec<RoleRequest>> {
        caller.require(Role::Admin)?;
        self.store.accounts.list_role_requests(status, page).await
    }

    pub async fn approve_role_request(&self, caller: &Caller, request_id: i64) -> Result<RoleRequest> {
        self.resolve(caller, request_id, RoleRequestStatus::Approved).await
    }

    pub async fn reject_role_request(&self, caller: &Caller, request_id: i64) -> Result<RoleRequest> {
        self.resolve(caller, request_id, RoleRequestStatus::Rejected).await
    }

    async fn resolve(
        &self,
        caller: &Caller,
        request_id: i64,
        status: RoleRequestStatus,
    ) -> Result<RoleRequest> {
        caller.require(Role::Admin)?;
        let resolved = self
            .store
            .accounts
            .resolve_role_request(request_id, status)
            .await?;
        tracing::info!(request_id, status = ?status, by = caller.id, "role request resolved");
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Conflict, Error};
    use crate::services::storage_service::MockObjectStorage;

    fn service() -> AccountService {
        AccountService::new(Store::in_memory(), Arc::new(MockObjectStorage::new()))
    }

    fn register(login: &str, desired_role: Role) -> RegisterPayload {
        RegisterPayload {
            email: format!("{}@school.test", login),
            login: login.to_string(),
            password: "sup3r-secret".into(),
            desired_role,
        }
    }

    const ADMIN: Caller = Caller {
        id: 0,
        role: Role::Admin,
    };

    #[tokio::test]
    async fn teacher_sign_up_files_a_pending_request() {
        let accounts = service();
        let reg = accounts.register(register("teacher01", Role::Teacher)).await.unwrap();
        assert_eq!(reg.user.role, Role::Student);
        assert!(reg.user.password_hash.starts_with("$argon2"));
        let request = reg.role_request.unwrap();
        assert_eq!(request.status, RoleRequestStatus::Pending);

        let plain = accounts.register(register("student01", Role::Student)).await.unwrap();
        assert!(plain.role_request.is_none());
    }

    #[tokio::test]
    async fn duplicate_login_or_email_conflicts() {
        let accounts = service();
        accounts.register(register("student02", Role::Student)).await.unwrap();
        let err = accounts
            .register(register("student02", Role::Student))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(Conflict::DuplicateAccount)));
    }

    #[tokio::test]
    async fn approval_changes_the_role_once() {
        let accounts = service();
        let reg = accounts.register(register("teacher02", Role::Teacher)).await.unwrap();
        let request = reg.role_request.unwrap();
        let me = Caller::new(reg.user.id, Role::Student);

        let err = accounts.file_role_request(&me, Role::Teacher).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(Conflict::PendingRoleRequestExists)));

        let approved = accounts.approve_role_request(&ADMIN, request.id).await.unwrap();
        assert_eq!(approved.status, RoleRequestStatus::Approved);
        assert_eq!(accounts.me(&me).await.unwrap().role, Role::Teacher);

        let err = accounts.reject_role_request(&ADMIN, request.id).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Conflict(Conflict::RoleRequestAlreadyResolved(id)) if id == request.id
        ));
    }

    #[tokio::test]
    async fn admin_operations_require_the_admin_role() {
        let accounts = service();
        let reg = accounts.register(register("student03", Role::Student)).await.unwrap();
        let me = Caller::new(reg.user.id, Role::Student);

        let err = accounts.change_role(&me, reg.user.id, Role::Admin).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        let changed = accounts.change_role(&ADMIN, reg.user.id, Role::Teacher).await.unwrap();
        assert_eq!(changed.role, Role::Teacher);

        let err = accounts.account(&ADMIN, 4242).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(NotFound::User(4242))));
    }
}
