//! Pure scoring of a submitted answer set against its question set.
//! No storage, no clock, no randomness: identical inputs grade identically.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::QuestionCatalogEntry;
use crate::services::{EngineError, EngineResult};

/// Outcome for one question, with the catalog fields copied through so the
/// response is self-contained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradedQuestion {
    pub question: String,
    pub user_answer: String,
    pub is_correct: bool,
    pub correct_answer: String,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeResult {
    pub results: Vec<GradedQuestion>,
    pub correct_count: u32,
    pub total: u32,
}

impl GradeResult {
    pub fn score_percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.correct_count) / f64::from(self.total) * 100.0
        }
    }
}

/// Grades `answers` (question index -> selected option text) against
/// `questions`. Every question must carry a non-blank answer, otherwise the
/// whole submission is rejected before any scoring happens.
pub fn grade(
    questions: &[&QuestionCatalogEntry],
    answers: &HashMap<usize, String>,
) -> EngineResult<GradeResult> {
    let total = questions.len();
    let answered = (0..total)
        .filter(|idx| {
            answers
                .get(idx)
                .map(|answer| !answer.trim().is_empty())
                .unwrap_or(false)
        })
        .count();

    if answered != total {
        return Err(EngineError::IncompleteSubmission { answered, total });
    }

    let mut results = Vec::with_capacity(total);
    let mut correct_count = 0u32;

    for (idx, entry) in questions.iter().enumerate() {
        let user_answer = answers.get(&idx).map(String::as_str).unwrap_or_default();
        let correct_answer = entry.correct_answer();
        // Tolerate stray whitespace and casing from the client.
        let is_correct =
            user_answer.trim().eq_ignore_ascii_case(correct_answer.trim());
        if is_correct {
            correct_count += 1;
        }

        results.push(GradedQuestion {
            question: entry.question.clone(),
            user_answer: user_answer.trim().to_string(),
            is_correct,
            correct_answer: correct_answer.to_string(),
            explanation: entry.explanation.clone(),
        });
    }

    Ok(GradeResult {
        results,
        correct_count,
        total: total as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog::tests::entry;
    use crate::models::QuizLevel;

    fn questions() -> Vec<crate::models::QuestionCatalogEntry> {
        vec![
            entry("q1", "Arsenal", QuizLevel::Easy),
            entry("q2", "Arsenal", QuizLevel::Easy),
            entry("q3", "Arsenal", QuizLevel::Easy),
        ]
    }

    fn answers(pairs: &[(usize, &str)]) -> HashMap<usize, String> {
        pairs.iter().map(|(i, a)| (*i, a.to_string())).collect()
    }

    #[test]
    fn grades_each_question_and_counts_correct() {
        let qs = questions();
        let refs: Vec<&_> = qs.iter().collect();
        // Fixture correct answer is "Bravo" for every question.
        let result = grade(
            &refs,
            &answers(&[(0, "Bravo"), (1, "Alpha"), (2, "Bravo")]),
        )
        .unwrap();

        assert_eq!(result.total, 3);
        assert_eq!(result.correct_count, 2);
        assert!(result.results[0].is_correct);
        assert!(!result.results[1].is_correct);
        assert_eq!(result.results[1].correct_answer, "Bravo");
        assert_eq!(result.results[1].explanation, "Because q2.");
        assert!((result.score_percentage() - 66.666).abs() < 0.01);
    }

    #[test]
    fn comparison_trims_whitespace_and_ignores_case() {
        let qs = questions();
        let refs: Vec<&_> = qs.iter().collect();
        let result = grade(
            &refs,
            &answers(&[(0, "  bravo "), (1, "BRAVO"), (2, "Bravo")]),
        )
        .unwrap();
        assert_eq!(result.correct_count, 3);
        assert_eq!(result.score_percentage(), 100.0);
    }

    #[test]
    fn rejects_incomplete_submission_upfront() {
        let qs = questions();
        let refs: Vec<&_> = qs.iter().collect();

        let missing = grade(&refs, &answers(&[(0, "Bravo"), (2, "Bravo")]));
        assert!(matches!(
            missing,
            Err(EngineError::IncompleteSubmission { answered: 2, total: 3 })
        ));

        // Blank answers count as unanswered.
        let blank = grade(&refs, &answers(&[(0, "Bravo"), (1, "  "), (2, "Bravo")]));
        assert!(matches!(
            blank,
            Err(EngineError::IncompleteSubmission { answered: 2, total: 3 })
        ));
    }

    #[test]
    fn grading_is_pure() {
        let qs = questions();
        let refs: Vec<&_> = qs.iter().collect();
        let input = answers(&[(0, "Bravo"), (1, "Delta"), (2, "alpha")]);

        let first = grade(&refs, &input).unwrap();
        let second = grade(&refs, &input).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }
}
