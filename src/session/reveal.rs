use time::OffsetDateTime;

use crate::schemas::exam::{AnswerLetter, ExamResponse};
use crate::schemas::submission::ExamSubmissionResponse;

/// Score at or above which a result is shown as a pass.
pub const PASSING_SCORE: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultPhase {
    Taking,
    /// Submitted before the due date: score only, answers withheld.
    SubmittedHidden,
    SubmittedRevealed,
    /// Never submitted and past due. Terminal.
    LockedOut,
}

impl ResultPhase {
    pub fn derive(exam: &ExamResponse, has_submission: bool, now: OffsetDateTime) -> Self {
        match (has_submission, exam.is_overdue_at(now)) {
            (false, false) => ResultPhase::Taking,
            (false, true) => ResultPhase::LockedOut,
            (true, false) => ResultPhase::SubmittedHidden,
            (true, true) => ResultPhase::SubmittedRevealed,
        }
    }

    /// Moves forward only. `LockedOut` and `SubmittedRevealed` never change,
    /// and nothing returns to `Taking`.
    pub fn advance(self, next: ResultPhase) -> ResultPhase {
        match (self, next) {
            (ResultPhase::Taking, _) => next,
            (ResultPhase::SubmittedHidden, ResultPhase::SubmittedRevealed) => next,
            (current, _) => current,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResultPhase::Taking => "taking",
            ResultPhase::SubmittedHidden => "submitted-hidden",
            ResultPhase::SubmittedRevealed => "submitted-revealed",
            ResultPhase::LockedOut => "locked-out",
        }
    }

    pub fn is_submitted(self) -> bool {
        matches!(self, ResultPhase::SubmittedHidden | ResultPhase::SubmittedRevealed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewItem {
    /// 1-based position in the submission.
    pub ordinal: usize,
    pub question_id: i64,
    pub content: String,
    pub options: [(AnswerLetter, String); 4],
    pub selected: Option<AnswerLetter>,
    pub correct: Option<AnswerLetter>,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultView {
    pub score: f64,
    pub passed: bool,
    pub correct_count: u32,
    pub total_count: u32,
    pub submitted_at: OffsetDateTime,
    /// Present only once answers are revealed.
    pub review: Option<Vec<ReviewItem>>,
}

pub fn build_result_view(
    exam: &ExamResponse,
    submission: &ExamSubmissionResponse,
    phase: ResultPhase,
) -> Option<ResultView> {
    if !phase.is_submitted() {
        return None;
    }

    let review = (phase == ResultPhase::SubmittedRevealed).then(|| {
        submission
            .answers
            .iter()
            .enumerate()
            .filter_map(|(index, answer)| {
                let question = exam.question(answer.question_id)?;
                Some(ReviewItem {
                    ordinal: index + 1,
                    question_id: question.id,
                    content: question.content.clone(),
                    options: AnswerLetter::ALL
                        .map(|letter| (letter, question.option_text(letter).to_string())),
                    selected: answer.selected_answer,
                    correct: answer.correct_answer,
                    is_correct: answer.is_correct,
                })
            })
            .collect()
    });

    Some(ResultView {
        score: submission.score,
        passed: submission.score >= PASSING_SCORE,
        correct_count: submission.correct_count,
        total_count: submission.total_count,
        submitted_at: submission.submitted_at,
        review,
    })
}
