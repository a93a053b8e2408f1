pub mod account_service;
pub mod analytics_service;
pub mod attempt_service;
pub mod grading_service;
pub mod storage_service;
pub mod test_service;
