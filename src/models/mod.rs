pub mod question;
pub mod role_request;
pub mod test_attempt;
pub mod user;
