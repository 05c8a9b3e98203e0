//! Puppet run report types.
//!
//! The host hands the processor a finished run report. The processor only
//! reads a handful of fields from it, so the report is modelled as the
//! [`RunReport`] accessor trait. [`ReportSummary`] is the concrete
//! implementation used by the CLI, deserialized from a report document.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::ReportError;

/// Overall status of a Puppet run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Changed,
    Failed,
    Unchanged,
}

impl RunStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Changed => "changed",
            Self::Failed => "failed",
            Self::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "changed" => Ok(Self::Changed),
            "failed" => Ok(Self::Failed),
            "unchanged" => Ok(Self::Unchanged),
            other => Err(ReportError::UnknownStatus(other.to_string())),
        }
    }
}

/// The slice of a run report the decision engine looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// Change made by drift correction rather than an operator request.
    /// Only meaningful when `status` is `Changed`.
    pub corrective_change: bool,
    /// Noop run that found changes it would have made.
    /// Only meaningful when `status` is `Changed`.
    pub noop_pending: bool,
}

impl RunOutcome {
    #[must_use]
    pub const fn new(status: RunStatus) -> Self {
        Self {
            status,
            corrective_change: false,
            noop_pending: false,
        }
    }

    #[must_use]
    pub const fn corrective(mut self, corrective_change: bool) -> Self {
        self.corrective_change = corrective_change;
        self
    }

    #[must_use]
    pub const fn pending(mut self, noop_pending: bool) -> Self {
        self.noop_pending = noop_pending;
        self
    }
}

/// Read accessors the host's run report must expose.
pub trait RunReport: Send + Sync {
    fn status(&self) -> RunStatus;

    fn host(&self) -> &str;

    /// Orchestrator job id, absent for agent-initiated runs.
    fn job_id(&self) -> Option<&str>;

    /// Report timestamp as the host formats it.
    fn time(&self) -> &str;

    fn corrective_change(&self) -> bool;

    fn noop_pending(&self) -> bool;

    /// Collapse the accessors into the value the decision engine consumes.
    fn outcome(&self) -> RunOutcome {
        RunOutcome {
            status: self.status(),
            corrective_change: self.corrective_change(),
            noop_pending: self.noop_pending(),
        }
    }
}

/// Summary of a Puppet run report.
///
/// Unknown keys in the source document are ignored, so a full
/// `last_run_report.yaml` deserializes as long as it carries the fields below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub host: String,
    pub status: RunStatus,
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default)]
    pub corrective_change: bool,
    #[serde(default)]
    pub noop_pending: bool,
}

impl ReportSummary {
    /// Parse a report document. YAML is a superset of JSON, so both work.
    pub fn from_yaml_str(text: &str) -> Result<Self, ReportError> {
        let value: serde_yaml::Value = serde_yaml::from_str(text)?;

        // Checked up front so an unknown status gets its own error instead of
        // a generic "unknown variant" parse failure.
        if let Some(status) = value.get("status").and_then(serde_yaml::Value::as_str) {
            status.parse::<RunStatus>()?;
        }

        Ok(serde_yaml::from_value(value)?)
    }

    /// Read and parse a report file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReportError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ReportError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }
}

impl RunReport for ReportSummary {
    fn status(&self) -> RunStatus {
        self.status
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    fn time(&self) -> &str {
        &self.time
    }

    fn corrective_change(&self) -> bool {
        self.corrective_change
    }

    fn noop_pending(&self) -> bool {
        self.noop_pending
    }
}
