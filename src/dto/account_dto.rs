use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::role_request::RoleRequestStatus;
use crate::models::user::Role;

fn student_role() -> Role {
    Role::Student
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterPayload {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, message = "login must be at least 8 characters"))]
    pub login: String,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: String,
    #[serde(default = "student_role")]
    pub desired_role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateAccountPayload {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, message = "login must be at least 8 characters"))]
    pub login: String,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeRolePayload {
    pub role: Role,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchAccountQuery {
    pub login: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleRequestPayload {
    pub requested_role: Role,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleRequestQuery {
    pub status: Option<RoleRequestStatus>,
}
