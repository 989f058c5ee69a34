use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::Instrument;
use uuid::Uuid;

use crate::core::metrics;
use crate::core::time::now_utc;
use crate::schemas::exam::{AnswerLetter, ExamResponse, InvalidAnswerLetter};
use crate::schemas::submission::{ExamSubmissionResponse, SubmitExamRequest};
use crate::services::exam_api::{ApiClientError, ExamApi};
use crate::session::answers::AnswerStore;
use crate::session::countdown::{Countdown, Tick};
use crate::session::guard::{SubmissionGuard, SubmitReason, SubmitTicket};
use crate::session::integrity::{IntegrityMonitor, ViolationOutcome, DEFAULT_MAX_VIOLATIONS};
use crate::session::loader::{self, LoadedExam};
use crate::session::page::{LeaveGuard, Page, Visibility};
use crate::session::reveal::{build_result_view, ResultPhase, ResultView};

const COMMAND_BUFFER: usize = 32;
const MIN_TICK_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub tick_period: Duration,
    pub max_violations: u32,
    /// How long closing the session waits for a submission already on the wire.
    pub settle_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_secs(1),
            max_violations: DEFAULT_MAX_VIOLATIONS,
            settle_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("the exam session has ended")]
    Closed,
    #[error("question {0} is not part of this exam")]
    UnknownQuestion(i64),
    #[error(transparent)]
    InvalidLetter(#[from] InvalidAnswerLetter),
    #[error("answers can no longer be changed")]
    AnswersLocked,
    #[error("the exam is past its due date and can no longer be submitted")]
    LockedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitAck {
    Started,
    /// A submission was already in flight or done; nothing was sent.
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    Ready(Box<SessionSnapshot>),
    /// The exam could not be loaded; the session is over.
    LoadFailed { message: String },
    Tick { remaining: u32, low: bool },
    ViolationWarning { count: u32, max: u32, remaining: u32 },
    SubmitStarted { reason: SubmitReason },
    Submitted { reason: SubmitReason, submission_id: i64, score: f64 },
    SubmitFailed { reason: SubmitReason, message: String },
    PhaseChanged(ResultPhase),
    Ended,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuestionView {
    pub ordinal: usize,
    pub id: i64,
    pub content: String,
    pub options: [(AnswerLetter, String); 4],
    pub selected: Option<AnswerLetter>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub exam_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub teacher_name: Option<String>,
    pub classrooms: Vec<String>,
    pub duration_minutes: Option<u32>,
    pub due_date: Option<OffsetDateTime>,
    pub phase: ResultPhase,
    pub remaining_seconds: Option<u32>,
    /// `MM:SS`, only while the exam is being taken.
    pub countdown: Option<String>,
    pub time_low: bool,
    pub answered: usize,
    pub total: usize,
    pub violations: u32,
    pub max_violations: u32,
    pub warning: Option<u32>,
    pub submitting: bool,
    pub questions: Vec<QuestionView>,
    pub result: Option<ResultView>,
}

impl SessionSnapshot {
    /// Text shown before a manual submission is confirmed.
    pub fn confirmation_prompt(&self) -> String {
        format!(
            "Submit \"{}\"? You have answered {}/{} questions. Note: you can only submit once!",
            self.title, self.answered, self.total
        )
    }

    pub fn question_by_ordinal(&self, ordinal: usize) -> Option<&QuestionView> {
        self.questions.iter().find(|question| question.ordinal == ordinal)
    }
}

enum SessionCommand {
    Select {
        question_id: i64,
        letter: AnswerLetter,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Submit {
        reply: oneshot::Sender<Result<SubmitAck, SessionError>>,
    },
    DismissWarning,
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Shutdown,
}

/// Client side of a running session. Dropping it tears the session down.
#[derive(Debug)]
pub struct SessionHandle {
    id: Uuid,
    commands: mpsc::Sender<SessionCommand>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn select(&self, question_id: i64, letter: AnswerLetter) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::Select { question_id, letter, reply }).await?;
        response.await.map_err(|_| SessionError::Closed)?
    }

    /// Manual submission. The caller is expected to have confirmed with the
    /// student first; see [`SessionSnapshot::confirmation_prompt`].
    pub async fn submit(&self) -> Result<SubmitAck, SessionError> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::Submit { reply }).await?;
        response.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn dismiss_warning(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::DismissWarning).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::Snapshot { reply }).await?;
        response.await.map_err(|_| SessionError::Closed)
    }

    pub async fn shutdown(self) {
        // The actor may already be gone after a failed load.
        let _ = self.commands.send(SessionCommand::Shutdown).await;
        if let Err(err) = self.task.await {
            tracing::error!(session_id = %self.id, error = %err, "Exam session task join failed");
        }
    }

    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands.send(command).await.map_err(|_| SessionError::Closed)
    }
}

/// Starts a session for `exam_id`. Loading happens inside the session task;
/// the first notice is either `Ready` or `LoadFailed`.
pub fn spawn_session(
    api: Arc<dyn ExamApi>,
    page: Page,
    exam_id: i64,
    mut options: SessionOptions,
) -> (SessionHandle, mpsc::UnboundedReceiver<SessionNotice>) {
    options.tick_period = options.tick_period.max(MIN_TICK_PERIOD);
    let id = Uuid::new_v4();
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let (notice_tx, notice_rx) = mpsc::unbounded_channel();

    let actor = SessionActor {
        id,
        exam_id,
        api,
        page,
        options,
        commands: command_rx,
        notices: notice_tx,
        ticker: None,
        due_timer: None,
        pending: None,
    };
    let span = tracing::info_span!("exam_session", session_id = %id, exam_id);
    let task = tokio::spawn(actor.run().instrument(span));

    (SessionHandle { id, commands: command_tx, task }, notice_rx)
}

/// Everything the session knows. Only the actor task touches it.
struct SessionState {
    exam: ExamResponse,
    submission: Option<ExamSubmissionResponse>,
    answers: AnswerStore,
    countdown: Countdown,
    monitor: IntegrityMonitor,
    guard: SubmissionGuard,
    phase: ResultPhase,
    leave_guard: Option<LeaveGuard>,
}

impl SessionState {
    fn new(loaded: LoadedExam, page: &Page, options: &SessionOptions, now: OffsetDateTime) -> Self {
        let initial_countdown = loaded.initial_countdown();
        let LoadedExam { exam, prior_submission } = loaded;
        let phase = ResultPhase::derive(&exam, prior_submission.is_some(), now);
        let guard = if prior_submission.is_some() {
            SubmissionGuard::sealed()
        } else {
            SubmissionGuard::open()
        };

        let mut state = Self {
            exam,
            submission: prior_submission,
            answers: AnswerStore::new(),
            countdown: Countdown::idle(),
            monitor: IntegrityMonitor::new(options.max_violations),
            guard,
            phase,
            leave_guard: None,
        };

        if phase == ResultPhase::Taking {
            if let Some(seconds) = initial_countdown {
                state.countdown.arm(seconds);
                state.countdown.start();
            }
            state.monitor.arm(page);
            state.leave_guard = Some(page.guard_leave());
        }

        state
    }

    fn accepts_input(&self) -> bool {
        self.phase == ResultPhase::Taking && !self.guard.is_engaged()
    }

    /// Flips the guard and captures the latest answers. `None` when the
    /// session cannot or must not send anything.
    fn begin_submit(&mut self, reason: SubmitReason) -> Option<(SubmitTicket, SubmitExamRequest)> {
        if self.phase != ResultPhase::Taking {
            return None;
        }
        let ticket = self.guard.try_acquire(reason)?;
        self.countdown.stop();
        Some((ticket, self.answers.to_request(&self.exam.questions)))
    }

    fn finish_session_inputs(&mut self) {
        self.countdown.stop();
        self.monitor.disarm();
        self.leave_guard = None;
    }

    /// Recomputes the phase against the clock. Returns the new phase when it moved.
    fn refresh_phase(&mut self, now: OffsetDateTime) -> Option<ResultPhase> {
        if self.guard.is_in_flight() {
            return None;
        }
        let next = self.phase.advance(ResultPhase::derive(
            &self.exam,
            self.submission.is_some(),
            now,
        ));
        if next == self.phase {
            return None;
        }
        self.phase = next;
        if next != ResultPhase::Taking {
            self.finish_session_inputs();
        }
        Some(next)
    }

    fn until_due(&self, now: OffsetDateTime) -> Option<Duration> {
        if !matches!(self.phase, ResultPhase::Taking | ResultPhase::SubmittedHidden) {
            return None;
        }
        self.exam.due_date.and_then(|due| Duration::try_from(due - now).ok())
    }

    fn snapshot(&self, session_id: Uuid) -> SessionSnapshot {
        let taking = self.phase == ResultPhase::Taking;
        let questions = self
            .exam
            .questions
            .iter()
            .enumerate()
            .map(|(index, question)| QuestionView {
                ordinal: index + 1,
                id: question.id,
                content: question.content.clone(),
                options: AnswerLetter::ALL
                    .map(|letter| (letter, question.option_text(letter).to_string())),
                selected: self.answers.selection(question.id),
            })
            .collect();

        SessionSnapshot {
            session_id,
            exam_id: self.exam.id,
            title: self.exam.title.clone(),
            description: self.exam.description.clone(),
            teacher_name: self.exam.teacher_name.clone(),
            classrooms: self.exam.classroom_names.clone(),
            duration_minutes: self.exam.duration,
            due_date: self.exam.due_date,
            phase: self.phase,
            remaining_seconds: self.countdown.remaining(),
            countdown: self.countdown.display().filter(|_| taking),
            time_low: taking && self.countdown.is_low(),
            answered: self.answers.answered_count(),
            total: self.exam.questions.len(),
            violations: self.monitor.violations(),
            max_violations: self.monitor.max_violations(),
            warning: self.monitor.active_warning(),
            submitting: self.guard.is_in_flight(),
            questions,
            result: self
                .submission
                .as_ref()
                .and_then(|submission| build_result_view(&self.exam, submission, self.phase)),
        }
    }
}

type SubmitOutcome = Result<ExamSubmissionResponse, ApiClientError>;

struct PendingSubmit {
    ticket: SubmitTicket,
    task: JoinHandle<SubmitOutcome>,
}

struct SessionActor {
    id: Uuid,
    exam_id: i64,
    api: Arc<dyn ExamApi>,
    page: Page,
    options: SessionOptions,
    commands: mpsc::Receiver<SessionCommand>,
    notices: mpsc::UnboundedSender<SessionNotice>,
    ticker: Option<Interval>,
    due_timer: Option<Pin<Box<Sleep>>>,
    pending: Option<PendingSubmit>,
}

impl SessionActor {
    async fn run(mut self) {
        let loaded = match loader::load(self.api.as_ref(), self.exam_id).await {
            Ok(loaded) => loaded,
            Err(err) => {
                tracing::error!(error = %err, "Failed to load exam");
                self.notify(SessionNotice::LoadFailed {
                    message: format!("Could not load the exam: {}", err.user_message()),
                });
                self.notify(SessionNotice::Ended);
                return;
            }
        };

        let now = now_utc();
        let mut state = SessionState::new(loaded, &self.page, &self.options, now);
        if state.countdown.is_running() {
            self.start_ticker();
        }
        self.arm_due_timer(&state);

        tracing::info!(
            phase = state.phase.as_str(),
            questions = state.exam.questions.len(),
            remaining_seconds = state.countdown.remaining(),
            "Exam session ready"
        );
        self.notify(SessionNotice::Ready(Box::new(state.snapshot(self.id))));
        if state.phase == ResultPhase::LockedOut {
            self.notify(SessionNotice::PhaseChanged(ResultPhase::LockedOut));
        }

        loop {
            tokio::select! {
                biased;

                outcome = wait_pending(&mut self.pending) => {
                    self.on_submit_settled(&mut state, outcome);
                }
                visibility = state.monitor.next_transition() => {
                    self.on_visibility(&mut state, visibility);
                }
                _ = next_tick(&mut self.ticker) => self.on_tick(&mut state),
                _ = wait_due(&mut self.due_timer) => self.on_due(&mut state),
                command = self.commands.recv() => match command {
                    None | Some(SessionCommand::Shutdown) => break,
                    Some(command) => self.on_command(&mut state, command),
                },
            }
        }

        self.teardown(state).await;
    }

    fn notify(&self, notice: SessionNotice) {
        // A front end that stopped listening does not stop the session.
        let _ = self.notices.send(notice);
    }

    fn start_ticker(&mut self) {
        let period = self.options.tick_period;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
    }

    fn on_command(&mut self, state: &mut SessionState, command: SessionCommand) {
        match command {
            SessionCommand::Select { question_id, letter, reply } => {
                let result = self.select(state, question_id, letter);
                let _ = reply.send(result);
            }
            SessionCommand::Submit { reply } => {
                self.sync_phase(state);
                let result = if state.phase == ResultPhase::LockedOut {
                    Err(SessionError::LockedOut)
                } else if self.start_submit(state, SubmitReason::Manual) {
                    Ok(SubmitAck::Started)
                } else {
                    Ok(SubmitAck::Ignored)
                };
                let _ = reply.send(result);
            }
            SessionCommand::DismissWarning => state.monitor.dismiss_warning(),
            SessionCommand::Snapshot { reply } => {
                self.sync_phase(state);
                let _ = reply.send(state.snapshot(self.id));
            }
            SessionCommand::Shutdown => {}
        }
    }

    fn select(
        &mut self,
        state: &mut SessionState,
        question_id: i64,
        letter: AnswerLetter,
    ) -> Result<(), SessionError> {
        self.sync_phase(state);
        if state.phase == ResultPhase::LockedOut {
            return Err(SessionError::LockedOut);
        }
        if !state.accepts_input() {
            return Err(SessionError::AnswersLocked);
        }
        if state.exam.question(question_id).is_none() {
            return Err(SessionError::UnknownQuestion(question_id));
        }
        state.answers.select(question_id, letter);
        tracing::debug!(question_id, letter = letter.as_str(), "Answer selected");
        Ok(())
    }

    /// Single entry point for every trigger. Returns whether a request was sent.
    fn start_submit(&mut self, state: &mut SessionState, reason: SubmitReason) -> bool {
        let Some((ticket, request)) = state.begin_submit(reason) else {
            tracing::debug!(reason = reason.as_str(), "Submission already in progress or done");
            metrics::record_submit_ignored(reason);
            return false;
        };

        self.ticker = None;
        tracing::info!(
            reason = reason.as_str(),
            attempt = ticket.attempt(),
            answered = request.answered_count(),
            total = request.answers.len(),
            "Submitting exam"
        );
        metrics::record_submit_attempt(reason);

        let api = Arc::clone(&self.api);
        let exam_id = self.exam_id;
        let task = tokio::spawn(
            async move { api.submit(exam_id, &request).await }.in_current_span(),
        );
        self.pending = Some(PendingSubmit { ticket, task });
        self.notify(SessionNotice::SubmitStarted { reason });
        true
    }

    fn on_submit_settled(
        &mut self,
        state: &mut SessionState,
        outcome: Result<SubmitOutcome, JoinError>,
    ) {
        let Some(PendingSubmit { ticket, .. }) = self.pending.take() else {
            return;
        };
        let reason = ticket.reason();

        let result = match outcome {
            Ok(result) => result.map_err(|err| err.user_message()),
            Err(err) => {
                tracing::error!(error = %err, "Submit task did not complete");
                Err("The submission was interrupted".to_string())
            }
        };

        match result {
            Ok(submission) => {
                state.guard.seal(ticket);
                metrics::record_submit_outcome(reason, true);
                tracing::info!(
                    reason = reason.as_str(),
                    submission_id = submission.id,
                    score = submission.score,
                    "Exam submitted"
                );
                let submission_id = submission.id;
                let score = submission.score;
                state.submission = Some(submission);
                state.finish_session_inputs();
                self.notify(SessionNotice::Submitted { reason, submission_id, score });
                self.sync_phase(state);
            }
            Err(message) => {
                state.guard.release(ticket);
                metrics::record_submit_outcome(reason, false);
                tracing::warn!(
                    reason = reason.as_str(),
                    error = %message,
                    "Exam submission failed"
                );
                self.notify(SessionNotice::SubmitFailed { reason, message });
            }
        }
    }

    fn on_visibility(&mut self, state: &mut SessionState, visibility: Visibility) {
        if visibility != Visibility::Hidden || !state.accepts_input() {
            return;
        }

        metrics::record_violation();
        match state.monitor.record_hidden() {
            ViolationOutcome::Warned { count, remaining } => {
                tracing::warn!(violations = count, remaining, "Exam page hidden");
                self.notify(SessionNotice::ViolationWarning {
                    count,
                    max: state.monitor.max_violations(),
                    remaining,
                });
            }
            ViolationOutcome::ThresholdReached { count } => {
                tracing::warn!(violations = count, "Violation limit reached, submitting");
                self.start_submit(state, SubmitReason::Violation);
            }
        }
    }

    fn on_tick(&mut self, state: &mut SessionState) {
        match state.countdown.tick() {
            Some(Tick::Remaining(remaining)) => {
                self.notify(SessionNotice::Tick { remaining, low: state.countdown.is_low() });
            }
            Some(Tick::Expired) => {
                self.ticker = None;
                self.notify(SessionNotice::Tick { remaining: 0, low: true });
                tracing::info!("Time is up");
                self.start_submit(state, SubmitReason::Timeout);
            }
            None => self.ticker = None,
        }
    }

    fn on_due(&mut self, state: &mut SessionState) {
        self.due_timer = None;
        self.sync_phase(state);
        // Fired at the due instant itself; the phase moves once the clock is past it.
        self.arm_due_timer(state);
    }

    fn arm_due_timer(&mut self, state: &SessionState) {
        self.due_timer = state.until_due(now_utc()).map(|wait| Box::pin(sleep(wait)));
    }

    fn sync_phase(&mut self, state: &mut SessionState) {
        if let Some(phase) = state.refresh_phase(now_utc()) {
            if !state.countdown.is_running() {
                self.ticker = None;
            }
            tracing::info!(phase = phase.as_str(), "Exam phase changed");
            self.notify(SessionNotice::PhaseChanged(phase));
        }
    }

    /// Detaches timers and page registrations, then lets a submission that is
    /// already on the wire finish so its outcome is still reported.
    async fn teardown(mut self, mut state: SessionState) {
        self.ticker = None;
        self.due_timer = None;
        state.finish_session_inputs();

        if let Some(mut submit) = self.pending.take() {
            let reason = submit.ticket.reason();
            tracing::info!(
                reason = reason.as_str(),
                "Session closing, waiting for the in-flight submission"
            );
            match tokio::time::timeout(self.options.settle_timeout, &mut submit.task).await {
                Ok(outcome) => {
                    self.pending = Some(submit);
                    self.on_submit_settled(&mut state, outcome);
                }
                Err(_) => {
                    tracing::warn!(
                        reason = reason.as_str(),
                        "In-flight submission did not settle before the session closed"
                    );
                    submit.task.abort();
                    state.guard.release(submit.ticket);
                    metrics::record_submit_outcome(reason, false);
                    self.notify(SessionNotice::SubmitFailed {
                        reason,
                        message: "The submission did not complete before the session closed"
                            .to_string(),
                    });
                }
            }
        }
        tracing::info!(
            phase = state.phase.as_str(),
            violations = state.monitor.violations(),
            submitted = state.submission.is_some(),
            "Exam session closed"
        );
        drop(state);
        self.notify(SessionNotice::Ended);
    }
}

async fn wait_pending(slot: &mut Option<PendingSubmit>) -> Result<SubmitOutcome, JoinError> {
    match slot {
        Some(submit) => (&mut submit.task).await,
        None => pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending::<()>().await,
    }
}

async fn wait_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending::<()>().await,
    }
}
