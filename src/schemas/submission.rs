use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::core::time::deserialize_timestamp;
use crate::schemas::exam::AnswerLetter;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswer {
    pub question_id: i64,
    pub selected_answer: Option<AnswerLetter>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitExamRequest {
    pub answers: Vec<SubmitAnswer>,
}

impl SubmitExamRequest {
    pub fn answered_count(&self) -> usize {
        self.answers.iter().filter(|answer| answer.selected_answer.is_some()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionAnswerResult {
    pub question_id: i64,
    #[serde(default)]
    pub question_content: Option<String>,
    #[serde(default)]
    pub selected_answer: Option<AnswerLetter>,
    #[serde(default)]
    pub correct_answer: Option<AnswerLetter>,
    #[serde(default)]
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSubmissionResponse {
    pub id: i64,
    #[serde(default)]
    pub exam_id: Option<i64>,
    #[serde(default)]
    pub exam_title: Option<String>,
    #[serde(default)]
    pub student_name: Option<String>,
    pub correct_count: u32,
    pub total_count: u32,
    pub score: f64,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub submitted_at: OffsetDateTime,
    #[serde(default)]
    pub answers: Vec<SubmissionAnswerResult>,
}
