//! Result model of pipeline stages.

use std::fmt;
use std::sync::Arc;

/// Normalized scores lie in `MIN_NODE_SCORE..=MAX_NODE_SCORE`.
pub const MIN_NODE_SCORE: i64 = 0;
pub const MAX_NODE_SCORE: i64 = 100;

// Stage names, used in status messages and plugin setup errors.
pub const SORT_STAGE: &str = "Sort";
pub const SAMPLE_NODES_STAGE: &str = "SampleNodes";
pub const PRE_FILTER_STAGE: &str = "PreFilter";
pub const FILTER_STAGE: &str = "Filter";
pub const PRE_SCORE_STAGE: &str = "PreScore";
pub const SCORE_STAGE: &str = "Score";
pub const RESERVE_STAGE: &str = "Reserve";
/// Sampling pipeline only.
pub const SAMPLING_STRATEGY_STAGE: &str = "SamplingStrategy";
/// Binding pipeline only.
pub const CHECK_CONFLICTS_STAGE: &str = "CheckConflicts";

/// Outcome class of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success,
    /// Unexpected fault; aborts the whole pod.
    InternalError,
    /// The pod cannot be placed (or, in Filter, not on this node).
    Unschedulable,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Success => "Success",
            StatusCode::InternalError => "InternalError",
            StatusCode::Unschedulable => "Unschedulable",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a stage call.
///
/// Stages return `Result<T, Status>`; `Ok` stands for success. A non-success
/// status always carries at least one reason. The failed plugin and stage
/// are attached by the pipeline, once.
#[derive(Debug, Clone)]
pub struct Status {
    code: StatusCode,
    reasons: Vec<String>,
    error: Option<Arc<anyhow::Error>>,
    failed_plugin: Option<String>,
    failed_stage: Option<String>,
}

impl Status {
    pub fn new<I, S>(code: StatusCode, reasons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut reasons: Vec<String> = reasons.into_iter().map(Into::into).collect();
        if code != StatusCode::Success && reasons.is_empty() {
            reasons.push(code.as_str().to_string());
        }
        let error = (code == StatusCode::InternalError)
            .then(|| Arc::new(anyhow::anyhow!(reasons.join(", "))));
        Self {
            code,
            reasons,
            error,
            failed_plugin: None,
            failed_stage: None,
        }
    }

    pub fn success() -> Self {
        Self::new(StatusCode::Success, Vec::<String>::new())
    }

    pub fn unschedulable(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::Unschedulable, [reason])
    }

    /// Wrap an unexpected error.
    pub fn internal_error(err: impl Into<anyhow::Error>) -> Self {
        let err = err.into();
        Self {
            code: StatusCode::InternalError,
            reasons: vec![err.to_string()],
            error: Some(Arc::new(err)),
            failed_plugin: None,
            failed_stage: None,
        }
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn is_success(&self) -> bool {
        self.code == StatusCode::Success
    }

    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    pub fn error(&self) -> Option<&anyhow::Error> {
        self.error.as_deref()
    }

    pub fn failed_plugin(&self) -> Option<&str> {
        self.failed_plugin.as_deref()
    }

    pub fn failed_stage(&self) -> Option<&str> {
        self.failed_stage.as_deref()
    }

    /// Reasons joined by `", "`.
    pub fn message(&self) -> String {
        self.reasons.join(", ")
    }

    /// Tag the plugin and stage that produced this status. Keeps the first
    /// tag if one is already present.
    pub fn with_failed_plugin(mut self, plugin: &str, stage: &str) -> Self {
        if self.failed_plugin.is_none() {
            self.failed_plugin = Some(plugin.to_string());
            self.failed_stage = Some(stage.to_string());
        }
        self
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        if let (Some(plugin), Some(stage)) = (&self.failed_plugin, &self.failed_stage) {
            write!(f, " in {stage} plugin {plugin}")?;
        }
        if !self.reasons.is_empty() {
            write!(f, ": {}", self.message())?;
        }
        Ok(())
    }
}

/// Code of an optional status, treating `None` as success.
pub fn status_code_of(status: Option<&Status>) -> StatusCode {
    status.map_or(StatusCode::Success, Status::code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_success_always_has_a_reason() {
        let status = Status::new(StatusCode::Unschedulable, Vec::<String>::new());
        assert_eq!(status.reasons().len(), 1);
        assert!(Status::success().reasons().is_empty());
    }

    #[test]
    fn internal_error_from_reasons_carries_an_error() {
        let status = Status::new(StatusCode::InternalError, ["boom", "again"]);
        assert_eq!(status.error().unwrap().to_string(), "boom, again");
        assert_eq!(status.message(), "boom, again");
    }

    #[test]
    fn internal_error_wraps_source() {
        let status = Status::internal_error(std::io::Error::other("disk gone"));
        assert_eq!(status.code(), StatusCode::InternalError);
        assert_eq!(status.reasons(), ["disk gone"]);
        assert!(status.error().is_some());
    }

    #[test]
    fn failed_plugin_is_set_once() {
        let status = Status::unschedulable("no space")
            .with_failed_plugin("ResourcesFit", FILTER_STAGE)
            .with_failed_plugin("Other", SCORE_STAGE);
        assert_eq!(status.failed_plugin(), Some("ResourcesFit"));
        assert_eq!(status.failed_stage(), Some(FILTER_STAGE));
        assert_eq!(
            status.to_string(),
            "Unschedulable in Filter plugin ResourcesFit: no space"
        );
    }

    #[test]
    fn none_counts_as_success() {
        assert_eq!(status_code_of(None), StatusCode::Success);
        assert!(matches!(
            status_code_of(Some(&Status::unschedulable("x"))),
            StatusCode::Unschedulable
        ));
    }
}
