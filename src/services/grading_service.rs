use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::question::Question;
use crate::models::test_attempt::StudentAnswer;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub earned_points: i64,
    pub total_points: i64,
    /// Percentage in [0, 100].
    pub score: f64,
}

pub struct GradingService;

impl GradingService {
    /// Exact-set comparison: no partial credit. A question with no correct options
    /// is only answered correctly by choosing nothing.
    pub fn evaluate_answer(correct: &BTreeSet<Uuid>, chosen: &BTreeSet<Uuid>) -> bool {
        chosen == correct
    }

    /// Weights each correctly answered question by its points. Unanswered questions
    /// count toward the total only.
    pub fn finalize_score(questions: &[Question], answers: &[StudentAnswer]) -> ScoreBreakdown {
        let points: HashMap<Uuid, i64> = questions
            .iter()
            .map(|q| (q.id, i64::from(q.points.max(0))))
            .collect();

        let total_points: i64 = points.values().sum();
        let earned_points: i64 = answers
            .iter()
            .filter(|a| a.is_correct)
            .filter_map(|a| points.get(&a.question_id))
            .sum();

        let score = if total_points > 0 {
            earned_points as f64 * 100.0 / total_points as f64
        } else {
            0.0
        };

        ScoreBreakdown {
            earned_points,
            total_points,
            score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    fn set(items: &[Uuid]) -> BTreeSet<Uuid> {
        items.iter().copied().collect()
    }

    fn question(points: i32) -> Question {
        Question {
            id: Uuid::new_v4(),
            test_id: Uuid::nil(),
            question_text: "q".into(),
            image_url: None,
            position: 0,
            points,
        }
    }

    fn answer(question_id: Uuid, is_correct: bool) -> StudentAnswer {
        StudentAnswer {
            id: Uuid::new_v4(),
            attempt_id: Uuid::nil(),
            question_id,
            is_correct,
            chosen_option_ids: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn exact_correct_set_is_correct() {
        let o = ids(4);
        let correct = set(&o[..2]);
        assert!(GradingService::evaluate_answer(&correct, &set(&[o[1], o[0]])));
    }

    #[test]
    fn subset_superset_and_distractors_are_wrong() {
        let o = ids(4);
        let correct = set(&o[..2]);
        assert!(!GradingService::evaluate_answer(&correct, &set(&o[..1])));
        assert!(!GradingService::evaluate_answer(&correct, &set(&o[..3])));
        assert!(!GradingService::evaluate_answer(&correct, &set(&[o[0], o[3]])));
        assert!(!GradingService::evaluate_answer(&correct, &BTreeSet::new()));
    }

    #[test]
    fn question_without_correct_options_accepts_only_empty_choice() {
        let o = ids(2);
        let none = BTreeSet::new();
        assert!(GradingService::evaluate_answer(&none, &BTreeSet::new()));
        assert!(!GradingService::evaluate_answer(&none, &set(&o[..1])));
    }

    #[test]
    fn score_weights_by_points() {
        let qs = vec![question(2), question(3), question(5)];
        let answers = vec![answer(qs[0].id, false), answer(qs[1].id, true)];

        let b = GradingService::finalize_score(&qs, &answers);
        assert_eq!(b.earned_points, 3);
        assert_eq!(b.total_points, 10);
        assert!((b.score - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_or_zero_weight_test_scores_zero() {
        let b = GradingService::finalize_score(&[], &[]);
        assert_eq!(b, ScoreBreakdown { earned_points: 0, total_points: 0, score: 0.0 });

        let qs = vec![question(0)];
        let b = GradingService::finalize_score(&qs, &[answer(qs[0].id, true)]);
        assert_eq!(b.total_points, 0);
        assert_eq!(b.score, 0.0);
    }

    #[test]
    fn all_correct_scores_one_hundred() {
        let qs = vec![question(1), question(4)];
        let answers: Vec<_> = qs.iter().map(|q| answer(q.id, true)).collect();
        let b = GradingService::finalize_score(&qs, &answers);
        assert_eq!(b.score, 100.0);
    }
}
