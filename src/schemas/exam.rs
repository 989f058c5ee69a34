use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::core::time::deserialize_optional_timestamp;

/// One of the four options of a multiple-choice question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnswerLetter {
    A,
    B,
    C,
    D,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("answer must be one of A, B, C, D; got {0:?}")]
pub struct InvalidAnswerLetter(pub String);

impl AnswerLetter {
    pub const ALL: [AnswerLetter; 4] =
        [AnswerLetter::A, AnswerLetter::B, AnswerLetter::C, AnswerLetter::D];

    pub fn as_str(self) -> &'static str {
        match self {
            AnswerLetter::A => "A",
            AnswerLetter::B => "B",
            AnswerLetter::C => "C",
            AnswerLetter::D => "D",
        }
    }
}

impl fmt::Display for AnswerLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnswerLetter {
    type Err = InvalidAnswerLetter;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(AnswerLetter::A),
            "B" => Ok(AnswerLetter::B),
            "C" => Ok(AnswerLetter::C),
            "D" => Ok(AnswerLetter::D),
            _ => Err(InvalidAnswerLetter(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResponse {
    pub id: i64,
    pub content: String,
    pub option_a: String,
    pub option_b: String,
    pub option_c: String,
    pub option_d: String,
    /// Only meaningful once results are revealed.
    #[serde(default)]
    pub correct_answer: Option<AnswerLetter>,
    #[serde(default)]
    pub order_number: Option<i32>,
}

impl QuestionResponse {
    pub fn option_text(&self, letter: AnswerLetter) -> &str {
        match letter {
            AnswerLetter::A => &self.option_a,
            AnswerLetter::B => &self.option_b,
            AnswerLetter::C => &self.option_c,
            AnswerLetter::D => &self.option_d,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamResponse {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub due_date: Option<OffsetDateTime>,
    /// Minutes. Absent or zero means the exam is untimed.
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub teacher_name: Option<String>,
    #[serde(default)]
    pub classroom_names: Vec<String>,
    #[serde(default)]
    pub questions: Vec<QuestionResponse>,
}

fn default_active() -> bool {
    true
}

impl ExamResponse {
    pub fn question(&self, question_id: i64) -> Option<&QuestionResponse> {
        self.questions.iter().find(|question| question.id == question_id)
    }

    pub fn duration_seconds(&self) -> Option<u32> {
        self.duration.filter(|minutes| *minutes > 0).map(|minutes| minutes.saturating_mul(60))
    }

    pub fn is_overdue_at(&self, now: OffsetDateTime) -> bool {
        self.due_date.is_some_and(|due| due < now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn answer_letter_parses_case_insensitively() {
        assert_eq!("a".parse::<AnswerLetter>().expect("a"), AnswerLetter::A);
        assert_eq!(" D ".parse::<AnswerLetter>().expect("d"), AnswerLetter::D);
        assert_eq!("E".parse::<AnswerLetter>(), Err(InvalidAnswerLetter("E".to_string())));
        assert!("".parse::<AnswerLetter>().is_err());
    }

    #[test]
    fn exam_deserializes_from_lms_payload() {
        let payload = json!({
            "id": 7,
            "title": "Midterm",
            "description": "Chapters 1-3",
            "dueDate": "2025-03-01T23:59:00",
            "duration": 15,
            "isActive": true,
            "teacherId": 3,
            "teacherName": "Ms. Lan",
            "classroomIds": [1],
            "classroomNames": ["10A1"],
            "questions": [{
                "id": 100,
                "content": "2 + 2 = ?",
                "optionA": "3",
                "optionB": "4",
                "optionC": "5",
                "optionD": "22",
                "correctAnswer": "B",
                "orderNumber": 1
            }],
            "totalQuestions": 1,
            "createdAt": "2025-02-01T08:00:00",
            "updatedAt": "2025-02-01T08:00:00",
            "hasSubmitted": null
        });

        let exam: ExamResponse = serde_json::from_value(payload).expect("exam");
        assert_eq!(exam.due_date, Some(datetime!(2025-03-01 23:59:00 UTC)));
        assert_eq!(exam.duration_seconds(), Some(900));
        assert_eq!(exam.questions[0].correct_answer, Some(AnswerLetter::B));
        assert_eq!(exam.questions[0].option_text(AnswerLetter::B), "4");
        assert!(exam.question(100).is_some());
        assert!(exam.question(101).is_none());
    }

    #[test]
    fn exam_without_duration_or_due_date_is_untimed() {
        let payload = json!({
            "id": 1,
            "title": "Practice",
            "dueDate": null,
            "duration": 0,
            "questions": []
        });

        let exam: ExamResponse = serde_json::from_value(payload).expect("exam");
        assert_eq!(exam.duration_seconds(), None);
        assert!(!exam.is_overdue_at(datetime!(2030-01-01 00:00:00 UTC)));
        assert!(exam.is_active);
    }

    #[test]
    fn overdue_compares_against_now() {
        let payload = json!({ "id": 1, "title": "Quiz", "dueDate": "2025-01-01T00:00:00Z" });
        let exam: ExamResponse = serde_json::from_value(payload).expect("exam");
        assert!(exam.is_overdue_at(datetime!(2025-01-01 00:00:01 UTC)));
        assert!(!exam.is_overdue_at(datetime!(2024-12-31 23:59:59 UTC)));
    }
}
