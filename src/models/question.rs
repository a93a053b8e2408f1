use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Question {
    pub id: Uuid,
    pub test_id: Uuid,
    pub question_text: String,
    pub image_url: Option<String>,
    pub position: i32,
    pub points: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AnswerOption {
    pub id: Uuid,
    pub question_id: Uuid,
    pub answer_text: Option<String>,
    pub image_url: Option<String>,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionWithOptions {
    #[serde(flatten)]
    pub question: Question,
    pub options: Vec<AnswerOption>,
}

impl QuestionWithOptions {
    pub fn correct_option_ids(&self) -> BTreeSet<Uuid> {
        self.options
            .iter()
            .filter(|o| o.is_correct)
            .map(|o| o.id)
            .collect()
    }

    pub fn has_option(&self, option_id: Uuid) -> bool {
        self.options.iter().any(|o| o.id == option_id)
    }

    pub fn image_urls(&self) -> Vec<String> {
        self.question
            .image_url
            .iter()
            .chain(self.options.iter().filter_map(|o| o.image_url.as_ref()))
            .cloned()
            .collect()
    }
}

/// True when the option carries text or an image; blank strings do not count.
pub fn option_has_content(answer_text: Option<&str>, image_url: Option<&str>) -> bool {
    let present = |v: Option<&str>| v.map(|s| !s.trim().is_empty()).unwrap_or(false);
    present(answer_text) || present(image_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(question_id: Uuid, is_correct: bool, image: Option<&str>) -> AnswerOption {
        AnswerOption {
            id: Uuid::new_v4(),
            question_id,
            answer_text: Some("x".into()),
            image_url: image.map(str::to_string),
            is_correct,
        }
    }

    #[test]
    fn correct_ids_and_images_are_collected() {
        let qid = Uuid::new_v4();
        let right = option(qid, true, Some("http://img/a.png"));
        let wrong = option(qid, false, None);
        let q = QuestionWithOptions {
            question: Question {
                id: qid,
                test_id: Uuid::new_v4(),
                question_text: "?".into(),
                image_url: Some("http://img/q.png".into()),
                position: 1,
                points: 1,
            },
            options: vec![right.clone(), wrong],
        };

        assert_eq!(q.correct_option_ids(), BTreeSet::from([right.id]));
        assert_eq!(q.image_urls(), vec!["http://img/q.png", "http://img/a.png"]);
    }

    #[test]
    fn option_content_requires_text_or_image() {
        assert!(option_has_content(Some("Paris"), None));
        assert!(option_has_content(None, Some("http://img/x.png")));
        assert!(!option_has_content(Some("   "), None));
        assert!(!option_has_content(None, None));
    }
}
