use crate::schemas::exam::ExamResponse;
use crate::schemas::submission::ExamSubmissionResponse;
use crate::services::exam_api::{ApiClientError, ExamApi};

#[derive(Debug, Clone)]
pub struct LoadedExam {
    pub exam: ExamResponse,
    pub prior_submission: Option<ExamSubmissionResponse>,
}

impl LoadedExam {
    /// Seconds to count down from, when the exam is timed and not yet submitted.
    pub fn initial_countdown(&self) -> Option<u32> {
        if self.prior_submission.is_some() {
            return None;
        }
        self.exam.duration_seconds()
    }
}

/// Fetches the exam and the caller's earlier submissions together. Either
/// failure fails the whole load.
pub async fn load(api: &dyn ExamApi, exam_id: i64) -> Result<LoadedExam, ApiClientError> {
    let (exam, submissions) =
        tokio::try_join!(api.get_exam(exam_id), api.get_my_submissions(exam_id))?;

    let prior_submission = submissions.into_iter().next();

    tracing::debug!(
        exam_id,
        questions = exam.questions.len(),
        already_submitted = prior_submission.is_some(),
        "Exam loaded"
    );

    Ok(LoadedExam { exam, prior_submission })
}
