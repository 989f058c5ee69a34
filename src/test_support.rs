use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use time::macros::datetime;
use time::OffsetDateTime;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, Semaphore};

use crate::schemas::exam::{AnswerLetter, ExamResponse, QuestionResponse};
use crate::schemas::submission::{
    ExamSubmissionResponse, SubmissionAnswerResult, SubmitExamRequest,
};
use crate::services::exam_api::{ApiClientError, ExamApi};

pub(crate) const SUBMITTED_AT: OffsetDateTime = datetime!(2025-03-01 10:30:00 UTC);

/// Serializes tests that touch process environment variables.
pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<AsyncMutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(AsyncMutex::new(()))).clone();
    lock.lock_owned().await
}

/// Questions with ids starting at 100. The correct answer is always A.
pub(crate) fn sample_questions(count: usize) -> Vec<QuestionResponse> {
    (0..count)
        .map(|index| QuestionResponse {
            id: 100 + index as i64,
            content: format!("Question {}", index + 1),
            option_a: format!("Option A{}", index + 1),
            option_b: format!("Option B{}", index + 1),
            option_c: format!("Option C{}", index + 1),
            option_d: format!("Option D{}", index + 1),
            correct_answer: Some(AnswerLetter::A),
            order_number: Some(index as i32 + 1),
        })
        .collect()
}

pub(crate) fn sample_exam(
    id: i64,
    question_count: usize,
    duration_minutes: Option<u32>,
    due_date: Option<OffsetDateTime>,
) -> ExamResponse {
    ExamResponse {
        id,
        title: format!("Exam {id}"),
        description: Some("Practice exam".to_string()),
        due_date,
        duration: duration_minutes,
        is_active: true,
        teacher_name: Some("Teacher".to_string()),
        classroom_names: vec!["10A1".to_string()],
        questions: sample_questions(question_count),
    }
}

/// Grades `selections` (in question order) the way the server would.
pub(crate) fn graded_submission(
    exam: &ExamResponse,
    selections: &[Option<AnswerLetter>],
) -> ExamSubmissionResponse {
    let answers: Vec<SubmissionAnswerResult> = exam
        .questions
        .iter()
        .zip(selections.iter().copied().chain(std::iter::repeat(None)))
        .map(|(question, selected)| SubmissionAnswerResult {
            question_id: question.id,
            question_content: Some(question.content.clone()),
            selected_answer: selected,
            correct_answer: question.correct_answer,
            is_correct: selected.is_some() && selected == question.correct_answer,
        })
        .collect();

    let total_count = answers.len() as u32;
    let correct_count = answers.iter().filter(|answer| answer.is_correct).count() as u32;
    let score = if total_count == 0 {
        0.0
    } else {
        (f64::from(correct_count) * 10.0 / f64::from(total_count) * 100.0).round() / 100.0
    };

    ExamSubmissionResponse {
        id: 900 + exam.id,
        exam_id: Some(exam.id),
        exam_title: Some(exam.title.clone()),
        student_name: Some("Student".to_string()),
        correct_count,
        total_count,
        score,
        submitted_at: SUBMITTED_AT,
        answers,
    }
}

/// In-memory stand-in for the LMS.
pub(crate) struct FakeExamApi {
    exam: ExamResponse,
    prior_submission: Option<ExamSubmissionResponse>,
    fail_submissions_fetch: bool,
    submit_failures: Mutex<u32>,
    submit_gate: Option<Arc<Semaphore>>,
    submit_calls: AtomicUsize,
    requests: Mutex<Vec<SubmitExamRequest>>,
}

impl FakeExamApi {
    pub(crate) fn new(exam: ExamResponse) -> Self {
        Self {
            exam,
            prior_submission: None,
            fail_submissions_fetch: false,
            submit_failures: Mutex::new(0),
            submit_gate: None,
            submit_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_prior_submission(mut self, submission: ExamSubmissionResponse) -> Self {
        self.prior_submission = Some(submission);
        self
    }

    pub(crate) fn failing_submissions_fetch(mut self) -> Self {
        self.fail_submissions_fetch = true;
        self
    }

    /// The next `count` submits answer with a 503.
    pub(crate) fn failing_submits(self, count: u32) -> Self {
        *self.submit_failures.lock().expect("submit failures") = count;
        self
    }

    /// Each submit waits for one permit before answering.
    pub(crate) fn with_submit_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.submit_gate = Some(gate);
        self
    }

    pub(crate) fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<SubmitExamRequest> {
        self.requests.lock().expect("requests").clone()
    }

    fn check_exam(&self, exam_id: i64) -> Result<(), ApiClientError> {
        if exam_id == self.exam.id {
            Ok(())
        } else {
            Err(ApiClientError::Status { status: 404, message: "Exam not found".to_string() })
        }
    }
}

#[async_trait]
impl ExamApi for FakeExamApi {
    async fn get_exam(&self, exam_id: i64) -> Result<ExamResponse, ApiClientError> {
        self.check_exam(exam_id)?;
        Ok(self.exam.clone())
    }

    async fn get_my_submissions(
        &self,
        exam_id: i64,
    ) -> Result<Vec<ExamSubmissionResponse>, ApiClientError> {
        self.check_exam(exam_id)?;
        if self.fail_submissions_fetch {
            return Err(ApiClientError::Status {
                status: 500,
                message: "Internal server error".to_string(),
            });
        }
        Ok(self.prior_submission.iter().cloned().collect())
    }

    async fn submit(
        &self,
        exam_id: i64,
        request: &SubmitExamRequest,
    ) -> Result<ExamSubmissionResponse, ApiClientError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().expect("requests").push(request.clone());

        if let Some(gate) = &self.submit_gate {
            gate.acquire().await.expect("gate open").forget();
        }
        self.check_exam(exam_id)?;

        {
            let mut failures = self.submit_failures.lock().expect("submit failures");
            if *failures > 0 {
                *failures -= 1;
                return Err(ApiClientError::Status {
                    status: 503,
                    message: "Service unavailable".to_string(),
                });
            }
        }

        let selections: Vec<Option<AnswerLetter>> =
            request.answers.iter().map(|answer| answer.selected_answer).collect();
        Ok(graded_submission(&self.exam, &selections))
    }
}
