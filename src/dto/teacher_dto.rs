use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::dto::double_option;
use crate::error::{Error, Result};
use crate::models::question::option_has_content;
use crate::models::test::TestStatus;

fn default_points() -> i32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateTestPayload {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

/// Absent fields are left untouched; an explicit `null` clears nullable ones.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct EditTestPayload {
    #[validate(length(min = 1, max = 255))]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub image_url: Option<Option<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetTestStatusPayload {
    pub status: TestStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerOptionPayload {
    pub answer_text: Option<String>,
    pub image_url: Option<String>,
    #[serde(default)]
    pub is_correct: bool,
}

impl AnswerOptionPayload {
    pub fn ensure_content(&self) -> Result<()> {
        if option_has_content(self.answer_text.as_deref(), self.image_url.as_deref()) {
            Ok(())
        } else {
            Err(Error::InvalidInput(
                "Either answer_text or image_url must be provided".to_string(),
            ))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateQuestionPayload {
    #[validate(length(min = 1))]
    pub question_text: String,
    pub image_url: Option<String>,
    pub position: Option<i32>,
    #[serde(default = "default_points")]
    #[validate(range(min = 0, message = "points must not be negative"))]
    pub points: i32,
    #[serde(default)]
    pub answer_options: Vec<AnswerOptionPayload>,
}

/// An option edit: with `id` it updates that option, without it appends a new one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EditAnswerOptionPayload {
    pub id: Option<Uuid>,
    #[serde(default, deserialize_with = "double_option")]
    pub answer_text: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub image_url: Option<Option<String>>,
    pub is_correct: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct EditQuestionPayload {
    #[validate(length(min = 1))]
    pub question_text: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub image_url: Option<Option<String>>,
    pub position: Option<i32>,
    #[validate(range(min = 0, message = "points must not be negative"))]
    pub points: Option<i32>,
    #[serde(default)]
    pub answer_options: Vec<EditAnswerOptionPayload>,
    #[serde(default)]
    pub option_ids_to_delete: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchTestQuery {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TestStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchStudentQuery {
    pub login: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyticsQuery {
    pub search: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_payload_separates_absent_from_null() {
        let p: EditTestPayload = serde_json::from_str(r#"{"image_url": null}"#).unwrap();
        assert_eq!(p.image_url, Some(None));
        assert_eq!(p.description, None);
        assert_eq!(p.title, None);
    }

    #[test]
    fn question_points_default_to_one_and_reject_negatives() {
        let p: CreateQuestionPayload =
            serde_json::from_str(r#"{"question_text": "2+2?"}"#).unwrap();
        assert_eq!(p.points, 1);
        assert!(p.validate().is_ok());

        let p: CreateQuestionPayload =
            serde_json::from_str(r#"{"question_text": "2+2?", "points": -1}"#).unwrap();
        assert!(p.validate().is_err());
    }

    #[test]
    fn option_without_text_or_image_is_invalid_input() {
        let empty = AnswerOptionPayload {
            answer_text: None,
            image_url: None,
            is_correct: true,
        };
        assert!(matches!(empty.ensure_content(), Err(Error::InvalidInput(_))));
    }
}
