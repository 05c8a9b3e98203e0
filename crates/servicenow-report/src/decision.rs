//! Incident decision engine.
//!
//! Maps a run outcome and the configured trigger conditions to an
//! [`IncidentDecision`]. The rules live in [`RULES`], an ordered table
//! evaluated first-match-wins. The `none` kill switch is checked before the
//! table and overrides every other configured trigger.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::report::{RunOutcome, RunStatus};

/// Named trigger from `incident_creation_conditions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerCondition {
    CorrectiveChanges,
    IntentionalChanges,
    FailedChanges,
    PendingChanges,
    NoChanges,
    None,
}

impl TriggerCondition {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CorrectiveChanges => "corrective_changes",
            Self::IntentionalChanges => "intentional_changes",
            Self::FailedChanges => "failed_changes",
            Self::PendingChanges => "pending_changes",
            Self::NoChanges => "no_changes",
            Self::None => "none",
        }
    }
}

impl fmt::Display for TriggerCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerCondition {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "corrective_changes" => Ok(Self::CorrectiveChanges),
            "intentional_changes" => Ok(Self::IntentionalChanges),
            "failed_changes" => Ok(Self::FailedChanges),
            "pending_changes" => Ok(Self::PendingChanges),
            "no_changes" => Ok(Self::NoChanges),
            "none" => Ok(Self::None),
            other => Err(ConfigError::UnknownCondition(other.to_string())),
        }
    }
}

/// Kind of incident, used to pick the short-description wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncidentCategory {
    Changed,
    Corrective,
    Intentional,
    Pending,
    Failed,
    NoChanges,
    Unchanged,
}

impl IncidentCategory {
    /// Status wording shown in the incident's short description.
    #[must_use]
    pub const fn wording(&self) -> &'static str {
        match self {
            Self::Changed | Self::Corrective | Self::Intentional => "changed",
            Self::Pending => "pending changes",
            Self::Failed => "failed",
            Self::NoChanges | Self::Unchanged => "unchanged",
        }
    }
}

/// Outcome of [`decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncidentDecision {
    pub should_create: bool,
    /// Set only when `should_create` is true.
    pub category: Option<IncidentCategory>,
}

impl IncidentDecision {
    #[must_use]
    pub const fn skip() -> Self {
        Self {
            should_create: false,
            category: None,
        }
    }

    #[must_use]
    pub const fn create(category: IncidentCategory) -> Self {
        Self {
            should_create: true,
            category: Some(category),
        }
    }
}

/// One row of the decision table.
#[derive(Clone, Copy)]
pub struct Rule {
    pub trigger: TriggerCondition,
    pub category: IncidentCategory,
    pub matches: fn(&RunOutcome) -> bool,
}

fn is_failed(o: &RunOutcome) -> bool {
    o.status == RunStatus::Failed
}

fn is_pending(o: &RunOutcome) -> bool {
    o.status == RunStatus::Changed && o.noop_pending
}

fn is_corrective(o: &RunOutcome) -> bool {
    o.status == RunStatus::Changed && o.corrective_change
}

fn is_intentional(o: &RunOutcome) -> bool {
    o.status == RunStatus::Changed && !o.corrective_change
}

fn is_unchanged(o: &RunOutcome) -> bool {
    o.status == RunStatus::Unchanged
}

/// Decision rules in priority order. Pending is checked before the
/// corrective/intentional split because a noop run is routed on its own even
/// when it is also a corrective change.
pub const RULES: [Rule; 5] = [
    Rule {
        trigger: TriggerCondition::FailedChanges,
        category: IncidentCategory::Failed,
        matches: is_failed,
    },
    Rule {
        trigger: TriggerCondition::PendingChanges,
        category: IncidentCategory::Pending,
        matches: is_pending,
    },
    Rule {
        trigger: TriggerCondition::CorrectiveChanges,
        category: IncidentCategory::Corrective,
        matches: is_corrective,
    },
    Rule {
        trigger: TriggerCondition::IntentionalChanges,
        category: IncidentCategory::Intentional,
        matches: is_intentional,
    },
    Rule {
        trigger: TriggerCondition::NoChanges,
        category: IncidentCategory::Unchanged,
        matches: is_unchanged,
    },
];

/// Decide whether `outcome` warrants an incident under `conditions`.
#[must_use]
pub fn decide(outcome: &RunOutcome, conditions: &[TriggerCondition]) -> IncidentDecision {
    if conditions.contains(&TriggerCondition::None) {
        return IncidentDecision::skip();
    }

    RULES
        .iter()
        .find(|rule| conditions.contains(&rule.trigger) && (rule.matches)(outcome))
        .map_or_else(IncidentDecision::skip, |rule| {
            IncidentDecision::create(rule.category)
        })
}
