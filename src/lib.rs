pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use crate::database::Store;
use crate::services::{
    account_service::AccountService, analytics_service::AnalyticsService,
    attempt_service::AttemptService, storage_service::ObjectStorage, test_service::TestService,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub test_service: TestService,
    pub attempt_service: AttemptService,
    pub analytics_service: AnalyticsService,
    pub account_service: AccountService,
    pub object_storage: Arc<dyn ObjectStorage>,
    pub jwt_secret: String,
}

impl AppState {
    pub fn new(store: Store, object_storage: Arc<dyn ObjectStorage>, jwt_secret: String) -> Self {
        let test_service = TestService::new(store.clone(), object_storage.clone());
        let attempt_service = AttemptService::new(store.clone());
        let analytics_service = AnalyticsService::new(store.clone());
        let account_service = AccountService::new(store.clone(), object_storage.clone());

        Self {
            store,
            test_service,
            attempt_service,
            analytics_service,
            account_service,
            object_storage,
            jwt_secret,
        }
    }
}
