use std::collections::HashMap;

use crate::schemas::exam::{AnswerLetter, QuestionResponse};
use crate::schemas::submission::{SubmitAnswer, SubmitExamRequest};

/// The student's current selections, keyed by question id.
#[derive(Debug, Clone, Default)]
pub struct AnswerStore {
    selections: HashMap<i64, AnswerLetter>,
}

impl AnswerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts the selection for a question and returns the one it replaced.
    pub fn select(&mut self, question_id: i64, letter: AnswerLetter) -> Option<AnswerLetter> {
        self.selections.insert(question_id, letter)
    }

    pub fn selection(&self, question_id: i64) -> Option<AnswerLetter> {
        self.selections.get(&question_id).copied()
    }

    pub fn answered_count(&self) -> usize {
        self.selections.len()
    }

    /// One entry per question in exam order; unanswered questions carry `None`.
    pub fn to_request(&self, questions: &[QuestionResponse]) -> SubmitExamRequest {
        let answers = questions
            .iter()
            .map(|question| SubmitAnswer {
                question_id: question.id,
                selected_answer: self.selection(question.id),
            })
            .collect();
        SubmitExamRequest { answers }
    }
}
