use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Student,
    Teacher,
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub login: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The authenticated identity behind a request, as vouched for by the bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub id: i64,
    pub role: Role,
}

impl Caller {
    pub fn new(id: i64, role: Role) -> Self {
        Self { id, role }
    }

    /// Admins hold every capability.
    pub fn has_capability(&self, required: Role) -> bool {
        self.role == required || self.role == Role::Admin
    }

    pub fn require(&self, required: Role) -> crate::error::Result<()> {
        if self.has_capability(required) {
            Ok(())
        } else {
            Err(crate::error::Error::Forbidden(format!(
                "{:?} capability required",
                required
            )))
        }
    }

    /// Owner-or-admin check for resources keyed by an account id.
    pub fn can_act_for(&self, owner_id: i64) -> bool {
        self.id == owner_id || self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_satisfies_every_role() {
        let admin = Caller::new(1, Role::Admin);
        assert!(admin.has_capability(Role::Teacher));
        assert!(admin.has_capability(Role::Student));
        assert!(admin.has_capability(Role::Admin));
    }

    #[test]
    fn other_roles_only_satisfy_themselves() {
        let teacher = Caller::new(2, Role::Teacher);
        assert!(teacher.has_capability(Role::Teacher));
        assert!(!teacher.has_capability(Role::Student));
        assert!(!teacher.has_capability(Role::Admin));
        assert!(teacher.require(Role::Admin).is_err());

        let student = Caller::new(3, Role::Student);
        assert!(!student.has_capability(Role::Teacher));
        assert!(student.can_act_for(3));
        assert!(!student.can_act_for(4));
    }

    #[test]
    fn password_hash_is_never_serialized() {
        let user = User {
            id: 1,
            email: "a@b.c".into(),
            login: "someone1".into(),
            password_hash: "$argon2id$secret".into(),
            role: Role::Student,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "student");
    }
}
