use serde::Deserialize;

pub mod exam;
pub mod submission;

/// Body shape every LMS endpoint answers with.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiEnvelope<T> {
    #[serde(default = "default_success")]
    pub(crate) success: bool,
    #[serde(default)]
    pub(crate) message: Option<String>,
    pub(crate) data: Option<T>,
}

fn default_success() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorEnvelope {
    #[serde(default)]
    pub(crate) message: Option<String>,
}
