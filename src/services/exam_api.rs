use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::core::config::Settings;
use crate::schemas::exam::ExamResponse;
use crate::schemas::submission::{ExamSubmissionResponse, SubmitExamRequest};
use crate::schemas::{ApiEnvelope, ErrorEnvelope};

#[derive(Debug, Error)]
pub enum ApiClientError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("not signed in or the session token has expired")]
    Unauthorized,
    #[error("{message} (status {status})")]
    Status { status: u16, message: String },
    #[error("{0}")]
    Rejected(String),
    #[error("unexpected response from {endpoint}: {detail}")]
    Decode { endpoint: String, detail: String },
}

impl ApiClientError {
    /// Text suitable for a notice shown to the student.
    pub fn user_message(&self) -> String {
        match self {
            ApiClientError::Transport { .. } => "Could not reach the exam server".to_string(),
            ApiClientError::Unauthorized => {
                "Your sign-in has expired. Please sign in again".to_string()
            }
            ApiClientError::Status { message, .. } => message.clone(),
            ApiClientError::Rejected(message) => message.clone(),
            ApiClientError::Decode { .. } => "The exam server sent an unexpected reply".to_string(),
        }
    }
}

/// The three LMS endpoints an exam session talks to.
#[async_trait]
pub trait ExamApi: Send + Sync {
    async fn get_exam(&self, exam_id: i64) -> Result<ExamResponse, ApiClientError>;

    async fn get_my_submissions(
        &self,
        exam_id: i64,
    ) -> Result<Vec<ExamSubmissionResponse>, ApiClientError>;

    async fn submit(
        &self,
        exam_id: i64,
        request: &SubmitExamRequest,
    ) -> Result<ExamSubmissionResponse, ApiClientError>;
}

#[derive(Debug, Clone)]
pub struct HttpExamApi {
    client: Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpExamApi {
    pub(crate) fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(settings.api().connect_timeout())
            .timeout(settings.api().request_timeout())
            .build()
            .context("Failed to build exam API HTTP client")?;

        Ok(Self::new(client, &settings.api().base_url, settings.api().access_token.clone()))
    }

    pub fn new(client: Client, base_url: &str, access_token: Option<String>) -> Self {
        Self { client, base_url: base_url.trim_end_matches('/').to_string(), access_token }
    }

    fn request(&self, method: Method, path: &str) -> (String, RequestBuilder) {
        let endpoint = format!("{}{}", self.base_url, path);
        let mut builder = self.client.request(method, &endpoint);
        if let Some(token) = &self.access_token {
            builder = builder.bearer_auth(token);
        }
        (endpoint, builder)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        endpoint: String,
        builder: RequestBuilder,
    ) -> Result<Option<T>, ApiClientError> {
        let response = builder
            .send()
            .await
            .map_err(|source| ApiClientError::Transport { endpoint: endpoint.clone(), source })?;

        let status = response.status();
        let raw_body = response
            .text()
            .await
            .map_err(|source| ApiClientError::Transport { endpoint: endpoint.clone(), source })?;

        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(endpoint = %endpoint, "Exam API rejected the access token");
            return Err(ApiClientError::Unauthorized);
        }

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&raw_body)
                .ok()
                .and_then(|envelope| envelope.message)
                .filter(|message| !message.trim().is_empty())
                .unwrap_or_else(|| {
                    status.canonical_reason().unwrap_or("Request failed").to_string()
                });
            tracing::warn!(
                endpoint = %endpoint,
                status = status.as_u16(),
                message = %message,
                "Exam API returned an error status"
            );
            return Err(ApiClientError::Status { status: status.as_u16(), message });
        }

        let envelope: ApiEnvelope<T> =
            serde_json::from_str(&raw_body).map_err(|err| ApiClientError::Decode {
                endpoint: endpoint.clone(),
                detail: err.to_string(),
            })?;

        if !envelope.success {
            let message = envelope.message.unwrap_or_else(|| "Request was rejected".to_string());
            return Err(ApiClientError::Rejected(message));
        }

        Ok(envelope.data)
    }
}

#[async_trait]
impl ExamApi for HttpExamApi {
    async fn get_exam(&self, exam_id: i64) -> Result<ExamResponse, ApiClientError> {
        let (endpoint, builder) = self.request(Method::GET, &format!("/exams/{exam_id}"));
        self.send::<ExamResponse>(endpoint.clone(), builder).await?.ok_or_else(|| {
            ApiClientError::Decode { endpoint, detail: "response carried no exam".to_string() }
        })
    }

    async fn get_my_submissions(
        &self,
        exam_id: i64,
    ) -> Result<Vec<ExamSubmissionResponse>, ApiClientError> {
        let (endpoint, builder) =
            self.request(Method::GET, &format!("/exams/{exam_id}/my-submissions"));
        Ok(self.send::<Vec<ExamSubmissionResponse>>(endpoint, builder).await?.unwrap_or_default())
    }

    async fn submit(
        &self,
        exam_id: i64,
        request: &SubmitExamRequest,
    ) -> Result<ExamSubmissionResponse, ApiClientError> {
        let (endpoint, builder) = self.request(Method::POST, &format!("/exams/{exam_id}/submit"));
        self.send::<ExamSubmissionResponse>(endpoint.clone(), builder.json(request))
            .await?
            .ok_or_else(|| ApiClientError::Decode {
                endpoint,
                detail: "response carried no submission".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;
    use crate::schemas::exam::AnswerLetter;
    use crate::schemas::submission::SubmitAnswer;

    #[derive(Clone, Default)]
    struct StubState {
        seen_auth: Arc<Mutex<Vec<Option<String>>>>,
        submitted: Arc<Mutex<Vec<Value>>>,
    }

    fn record_auth(state: &StubState, headers: &HeaderMap) {
        let value = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        state.seen_auth.lock().expect("auth lock").push(value);
    }

    async fn get_exam(
        Path(exam_id): Path<i64>,
        headers: HeaderMap,
        State(state): State<StubState>,
    ) -> (StatusCode, Json<Value>) {
        record_auth(&state, &headers);
        match exam_id {
            7 => (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "message": "Success",
                    "data": {
                        "id": 7,
                        "title": "Midterm",
                        "duration": 15,
                        "dueDate": null,
                        "questions": [{
                            "id": 1,
                            "content": "2 + 2 = ?",
                            "optionA": "3",
                            "optionB": "4",
                            "optionC": "5",
                            "optionD": "6",
                            "orderNumber": 1
                        }]
                    }
                })),
            ),
            401 => (StatusCode::UNAUTHORIZED, Json(json!({ "success": false }))),
            _ => (
                StatusCode::NOT_FOUND,
                Json(json!({ "success": false, "message": "Exam not found" })),
            ),
        }
    }

    async fn my_submissions(
        headers: HeaderMap,
        State(state): State<StubState>,
    ) -> Json<Value> {
        record_auth(&state, &headers);
        Json(json!({ "success": true, "message": "Success", "data": null }))
    }

    async fn submit(
        Path(exam_id): Path<i64>,
        State(state): State<StubState>,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        state.submitted.lock().expect("submit lock").push(body);
        if exam_id != 7 {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "message": "Exam is no longer active" })),
            );
        }
        (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "Submitted",
                "data": {
                    "id": 99,
                    "examId": 7,
                    "correctCount": 1,
                    "totalCount": 1,
                    "score": 10.0,
                    "submittedAt": "2025-02-10T09:30:00",
                    "answers": [{
                        "questionId": 1,
                        "selectedAnswer": "B",
                        "correctAnswer": "B",
                        "isCorrect": true
                    }]
                }
            })),
        )
    }

    async fn spawn_stub() -> (String, StubState) {
        let state = StubState::default();
        let app = Router::new()
            .route("/api/exams/:id", get(get_exam))
            .route("/api/exams/:id/my-submissions", get(my_submissions))
            .route("/api/exams/:id/submit", post(submit))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        (format!("http://{addr}/api/"), state)
    }

    fn client(base_url: &str, token: Option<&str>) -> HttpExamApi {
        HttpExamApi::new(Client::new(), base_url, token.map(|value| value.to_string()))
    }

    #[tokio::test]
    async fn get_exam_unwraps_envelope_and_sends_bearer_token() {
        let (base_url, state) = spawn_stub().await;
        let api = client(&base_url, Some("secret-token"));

        let exam = api.get_exam(7).await.expect("exam");
        assert_eq!(exam.title, "Midterm");
        assert_eq!(exam.duration_seconds(), Some(900));
        assert_eq!(exam.questions.len(), 1);

        let seen = state.seen_auth.lock().expect("auth lock").clone();
        assert_eq!(seen, vec![Some("Bearer secret-token".to_string())]);
    }

    #[tokio::test]
    async fn get_exam_surfaces_server_message() {
        let (base_url, _state) = spawn_stub().await;
        let api = client(&base_url, None);

        let err = api.get_exam(8).await.expect_err("missing exam");
        match err {
            ApiClientError::Status { status, ref message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Exam not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.user_message(), "Exam not found");
    }

    #[tokio::test]
    async fn unauthorized_is_reported_separately() {
        let (base_url, _state) = spawn_stub().await;
        let api = client(&base_url, Some("expired"));

        let err = api.get_exam(401).await.expect_err("unauthorized");
        assert!(matches!(err, ApiClientError::Unauthorized));
    }

    #[tokio::test]
    async fn missing_submission_list_is_empty() {
        let (base_url, _state) = spawn_stub().await;
        let api = client(&base_url, None);

        let submissions = api.get_my_submissions(7).await.expect("submissions");
        assert!(submissions.is_empty());
    }

    #[tokio::test]
    async fn submit_posts_every_answer() {
        let (base_url, state) = spawn_stub().await;
        let api = client(&base_url, None);
        let request = SubmitExamRequest {
            answers: vec![
                SubmitAnswer { question_id: 1, selected_answer: Some(AnswerLetter::B) },
                SubmitAnswer { question_id: 2, selected_answer: None },
            ],
        };

        let submission = api.submit(7, &request).await.expect("submission");
        assert_eq!(submission.id, 99);
        assert_eq!(submission.score, 10.0);

        let bodies = state.submitted.lock().expect("submit lock").clone();
        assert_eq!(
            bodies,
            vec![json!({
                "answers": [
                    { "questionId": 1, "selectedAnswer": "B" },
                    { "questionId": 2, "selectedAnswer": null }
                ]
            })]
        );

        let err = api.submit(8, &request).await.expect_err("inactive exam");
        assert_eq!(err.user_message(), "Exam is no longer active");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let api = client("http://127.0.0.1:9/api", None);
        let err = api.get_exam(7).await.expect_err("connection refused");
        assert!(matches!(err, ApiClientError::Transport { .. }));
    }
}
