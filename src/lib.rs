pub(crate) mod core;
pub mod schemas;
pub mod services;
pub mod session;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::{anyhow, Context};

use crate::core::{config::Settings, telemetry};
use crate::services::console::ConsoleRuntime;
use crate::services::exam_api::HttpExamApi;
use crate::session::{spawn_session, Page, SessionOptions};

/// Runs one exam session in the terminal. The exam id comes from the first
/// argument, falling back to `EXAM_ID`.
pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let exam_id = match std::env::args().nth(1) {
        Some(raw) => {
            raw.trim().parse::<i64>().with_context(|| format!("Invalid exam id {raw:?}"))?
        }
        None => settings
            .session()
            .exam_id
            .ok_or_else(|| anyhow!("No exam id given; pass it as an argument or set EXAM_ID"))?,
    };

    let api = Arc::new(HttpExamApi::from_settings(&settings)?);
    let page = Page::new();
    let options = SessionOptions {
        tick_period: settings.session().tick_period(),
        max_violations: settings.session().max_violations,
        settle_timeout: settings.api().request_timeout(),
    };

    tracing::info!(
        exam_id,
        base_url = %settings.api().base_url,
        environment = %settings.runtime().environment.as_str(),
        "Starting exam session"
    );

    let (handle, notices) = spawn_session(api, page.clone(), exam_id, options);
    let result = ConsoleRuntime::new(handle, page).run(notices).await;

    if let Some(rendered) = core::metrics::render() {
        tracing::info!(metrics = %rendered, "Session metrics");
    }

    result
}
