use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::core::shutdown::shutdown_signal;
use crate::core::time::{format_countdown, format_offset};
use crate::schemas::exam::AnswerLetter;
use crate::session::controller::{
    SessionError, SessionHandle, SessionNotice, SessionSnapshot, SubmitAck,
};
use crate::session::countdown::LOW_TIME_THRESHOLD_SECONDS;
use crate::session::guard::SubmitReason;
use crate::session::page::{LeaveDecision, Page, Visibility};
use crate::session::reveal::{ResultPhase, ResultView};

const HELP: &str =
    "Commands: select <question> <A-D>, submit, status, dismiss, hide, show, leave, quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConsoleCommand {
    Select { question: usize, letter: AnswerLetter },
    Submit,
    Status,
    Dismiss,
    Hide,
    Show,
    Leave,
    Quit,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

pub(crate) fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let parts = line.split_whitespace().collect::<Vec<_>>();
    let Some(name) = parts.first() else {
        return Err(HELP.to_string());
    };

    let command = match name.to_ascii_lowercase().as_str() {
        "select" | "answer" => {
            let [_, question, letter] = parts.as_slice() else {
                return Err("Usage: select <question number> <A|B|C|D>".to_string());
            };
            let question = question
                .parse::<usize>()
                .ok()
                .filter(|number| *number > 0)
                .ok_or_else(|| {
                    format!("Question number must be a positive integer, got {question}")
                })?;
            let letter = letter
                .parse::<AnswerLetter>()
                .map_err(|err| SessionError::from(err).to_string())?;
            ConsoleCommand::Select { question, letter }
        }
        "submit" => ConsoleCommand::Submit,
        "status" => ConsoleCommand::Status,
        "dismiss" | "ok" => ConsoleCommand::Dismiss,
        "hide" => ConsoleCommand::Hide,
        "show" => ConsoleCommand::Show,
        "leave" => ConsoleCommand::Leave,
        "quit" | "exit" => ConsoleCommand::Quit,
        "help" => ConsoleCommand::Help,
        _ => return Err(format!("Unknown command. {HELP}")),
    };
    Ok(command)
}

fn is_confirmation(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Terminal stand-in for the exam page. Stdin lines are user actions, and
/// `hide`/`show` play the part of switching browser tabs.
pub(crate) struct ConsoleRuntime {
    handle: SessionHandle,
    page: Page,
    awaiting_confirmation: bool,
}

impl ConsoleRuntime {
    pub(crate) fn new(handle: SessionHandle, page: Page) -> Self {
        Self { handle, page, awaiting_confirmation: false }
    }

    pub(crate) async fn run(mut self, mut notices: UnboundedReceiver<SessionNotice>) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                notice = notices.recv() => match notice {
                    Some(notice) => {
                        if let Some(text) = render_notice(&notice) {
                            println!("{text}");
                        }
                        if notice == SessionNotice::Ended {
                            break;
                        }
                    }
                    None => break,
                },
                line = lines.next_line() => {
                    let Some(line) = line.context("Failed to read from stdin")? else {
                        break;
                    };
                    if self.handle_line(&line).await == Flow::Quit {
                        break;
                    }
                }
            }
        }

        self.handle.shutdown().await;
        Ok(())
    }

    async fn handle_line(&mut self, line: &str) -> Flow {
        let line = line.trim();
        if line.is_empty() {
            return Flow::Continue;
        }

        if self.awaiting_confirmation {
            self.awaiting_confirmation = false;
            if !is_confirmation(line) {
                println!("Submission cancelled.");
                return Flow::Continue;
            }
            return match self.handle.submit().await {
                Ok(SubmitAck::Started) => Flow::Continue,
                Ok(SubmitAck::Ignored) => {
                    println!("The exam is already being submitted.");
                    Flow::Continue
                }
                Err(err) => self.report(err),
            };
        }

        let command = match parse_command(line) {
            Ok(command) => command,
            Err(message) => {
                println!("{message}");
                return Flow::Continue;
            }
        };

        match command {
            ConsoleCommand::Select { question, letter } => {
                let snapshot = match self.handle.snapshot().await {
                    Ok(snapshot) => snapshot,
                    Err(err) => return self.report(err),
                };
                let Some(view) = snapshot.question_by_ordinal(question) else {
                    println!("There is no question {question}; the exam has {}.", snapshot.total);
                    return Flow::Continue;
                };
                match self.handle.select(view.id, letter).await {
                    Ok(()) => {
                        println!("Question {question}: {letter}");
                        Flow::Continue
                    }
                    Err(err) => self.report(err),
                }
            }
            ConsoleCommand::Submit => match self.handle.snapshot().await {
                Ok(snapshot) if snapshot.phase == ResultPhase::Taking && !snapshot.submitting => {
                    self.awaiting_confirmation = true;
                    println!("{} [y/N]", snapshot.confirmation_prompt());
                    Flow::Continue
                }
                Ok(snapshot) if snapshot.phase == ResultPhase::LockedOut => {
                    self.report(SessionError::LockedOut)
                }
                Ok(_) => {
                    println!("The exam has already been submitted.");
                    Flow::Continue
                }
                Err(err) => self.report(err),
            },
            ConsoleCommand::Status => match self.handle.snapshot().await {
                Ok(snapshot) => {
                    println!("{}", render_snapshot(&snapshot));
                    Flow::Continue
                }
                Err(err) => self.report(err),
            },
            ConsoleCommand::Dismiss => match self.handle.dismiss_warning().await {
                Ok(()) => Flow::Continue,
                Err(err) => self.report(err),
            },
            ConsoleCommand::Hide => {
                self.page.set_visibility(Visibility::Hidden);
                Flow::Continue
            }
            ConsoleCommand::Show => {
                self.page.set_visibility(Visibility::Visible);
                Flow::Continue
            }
            ConsoleCommand::Leave => match self.page.request_leave() {
                LeaveDecision::Proceed => Flow::Quit,
                LeaveDecision::ConfirmFirst => {
                    println!(
                        "You have not submitted this exam. Leaving now discards your answers; \
                         type quit to leave anyway."
                    );
                    Flow::Continue
                }
            },
            ConsoleCommand::Quit => Flow::Quit,
            ConsoleCommand::Help => {
                println!("{HELP}");
                Flow::Continue
            }
        }
    }

    fn report(&self, err: SessionError) -> Flow {
        println!("{err}");
        if err == SessionError::Closed {
            Flow::Quit
        } else {
            Flow::Continue
        }
    }
}

pub(crate) fn render_notice(notice: &SessionNotice) -> Option<String> {
    let text = match notice {
        SessionNotice::Ready(snapshot) => render_snapshot(snapshot),
        SessionNotice::LoadFailed { message } => message.clone(),
        SessionNotice::Tick { remaining, .. } => {
            let announce = *remaining == 0
                || *remaining == LOW_TIME_THRESHOLD_SECONDS
                || *remaining <= 10
                || remaining % 300 == 0;
            if !announce {
                return None;
            }
            format!("Time left: {}", format_countdown(*remaining))
        }
        SessionNotice::ViolationWarning { count, max, remaining } => format!(
            "Warning: you left the exam page ({count}/{max}). {remaining} more time(s) and the \
             exam is submitted automatically. Type dismiss to continue."
        ),
        SessionNotice::SubmitStarted { reason } => match reason {
            SubmitReason::Manual => "Submitting...".to_string(),
            SubmitReason::Timeout => "Time is up! Submitting your answers...".to_string(),
            SubmitReason::Violation => {
                "Too many violations. Submitting your answers automatically...".to_string()
            }
        },
        SessionNotice::Submitted { reason, score, .. } => {
            let prefix = if reason.is_auto() {
                "Exam submitted automatically."
            } else {
                "Exam submitted."
            };
            format!("{prefix} Score: {score:.2}")
        }
        SessionNotice::SubmitFailed { message, .. } => {
            format!("Submission failed: {message}. Type submit to try again.")
        }
        SessionNotice::PhaseChanged(ResultPhase::SubmittedRevealed) => {
            "Correct answers are now available. Type status to review them.".to_string()
        }
        SessionNotice::PhaseChanged(ResultPhase::LockedOut) => {
            "This exam is past its due date and can no longer be taken.".to_string()
        }
        SessionNotice::PhaseChanged(_) => return None,
        SessionNotice::Ended => "Exam session closed.".to_string(),
    };
    Some(text)
}

pub(crate) fn render_snapshot(snapshot: &SessionSnapshot) -> String {
    let mut lines = vec![snapshot.title.clone()];
    if let Some(description) = snapshot.description.as_deref().filter(|text| !text.is_empty()) {
        lines.push(description.to_string());
    }
    let mut facts = Vec::new();
    if let Some(teacher) = snapshot.teacher_name.as_deref().filter(|name| !name.is_empty()) {
        facts.push(format!("Teacher: {teacher}"));
    }
    if !snapshot.classrooms.is_empty() {
        facts.push(format!("Classes: {}", snapshot.classrooms.join(", ")));
    }
    if let Some(minutes) = snapshot.duration_minutes {
        facts.push(format!("Duration: {minutes} min"));
    }
    if let Some(due) = snapshot.due_date {
        facts.push(format!("Due: {}", format_offset(due)));
    }
    facts.push(format!("Questions: {}", snapshot.total));
    lines.push(facts.join(" | "));
    lines.push(String::new());

    match snapshot.phase {
        ResultPhase::Taking => render_taking(snapshot, &mut lines),
        ResultPhase::LockedOut => {
            lines.push("This exam is past its due date and can no longer be taken.".to_string());
        }
        ResultPhase::SubmittedHidden | ResultPhase::SubmittedRevealed => {
            if let Some(result) = &snapshot.result {
                render_result(result, &mut lines);
            }
        }
    }

    lines.join("\n")
}

fn render_taking(snapshot: &SessionSnapshot, lines: &mut Vec<String>) {
    let mut status = Vec::new();
    if let Some(countdown) = &snapshot.countdown {
        let marker = if snapshot.time_low { " (hurry!)" } else { "" };
        status.push(format!("Time left: {countdown}{marker}"));
    }
    status.push(format!("Answered: {}/{}", snapshot.answered, snapshot.total));
    status.push(format!("Violations: {}/{}", snapshot.violations, snapshot.max_violations));
    lines.push(status.join(" | "));
    if snapshot.submitting {
        lines.push("Submitting...".to_string());
    }
    if let Some(count) = snapshot.warning {
        lines.push(format!(
            "Warning: you left the exam page ({count}/{}). Type dismiss to continue.",
            snapshot.max_violations
        ));
    }

    for question in &snapshot.questions {
        lines.push(String::new());
        lines.push(format!("{}. {}", question.ordinal, question.content));
        for (letter, text) in &question.options {
            let mark = if question.selected == Some(*letter) { "x" } else { " " };
            lines.push(format!("  [{mark}] {letter}. {text}"));
        }
    }
}

fn render_result(result: &ResultView, lines: &mut Vec<String>) {
    let verdict = if result.passed { "passed" } else { "not passed" };
    lines.push(format!(
        "Score: {:.2} ({verdict}) | Correct: {}/{} | Submitted: {}",
        result.score,
        result.correct_count,
        result.total_count,
        format_offset(result.submitted_at)
    ));

    let Some(review) = &result.review else {
        lines.push("Correct answers will be shown after the due date.".to_string());
        return;
    };

    for item in review {
        lines.push(String::new());
        let verdict = if item.is_correct { "correct" } else { "wrong" };
        lines.push(format!("{}. {} [{verdict}]", item.ordinal, item.content));
        for (letter, text) in &item.options {
            let mut tags = Vec::new();
            if item.selected == Some(*letter) {
                tags.push("your answer");
            }
            if item.correct == Some(*letter) {
                tags.push("correct answer");
            }
            let suffix =
                if tags.is_empty() { String::new() } else { format!(" ({})", tags.join(", ")) };
            lines.push(format!("  {letter}. {text}{suffix}"));
        }
        if item.selected.is_none() {
            lines.push("  (not answered)".to_string());
        }
    }
}
