use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;
use crate::session::guard::SubmitReason;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    Ok(())
}

/// Text exposition of the session counters, when the recorder is installed.
pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

pub(crate) fn record_submit_attempt(reason: SubmitReason) {
    metrics::counter!("exam_submit_attempts_total", "reason" => reason.as_str()).increment(1);
}

pub(crate) fn record_submit_outcome(reason: SubmitReason, success: bool) {
    let outcome = if success { "success" } else { "failed" };
    metrics::counter!(
        "exam_submit_outcomes_total",
        "reason" => reason.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

pub(crate) fn record_submit_ignored(reason: SubmitReason) {
    metrics::counter!("exam_submit_ignored_total", "reason" => reason.as_str()).increment(1);
}

pub(crate) fn record_violation() {
    metrics::counter!("exam_violations_total").increment(1);
}
