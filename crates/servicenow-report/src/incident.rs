//! Incident payload construction and credential selection.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::decision::IncidentCategory;
use crate::report::RunReport;
use crate::settings::Settings;

/// Fields of the ServiceNow incident record, sent as a flat JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct IncidentPayload {
    fields: BTreeMap<String, String>,
}

impl IncidentPayload {
    /// Build the payload for an incident of `category` about `report`.
    #[must_use]
    pub fn build(category: IncidentCategory, settings: &Settings, report: &dyn RunReport) -> Self {
        let mut payload = Self::default();

        payload.insert("short_description", short_description(category, report));
        payload.insert(
            "description",
            format!(
                "See the PE console for the full report of node {}. You can access the PE console at {}.",
                report.host(),
                settings.pe_console_url
            ),
        );

        let passthrough = [
            ("caller_id", &settings.caller),
            ("category", &settings.category),
            ("contact_type", &settings.contact_type),
            ("state", &settings.state),
            ("impact", &settings.impact),
            ("urgency", &settings.urgency),
            ("assignment_group", &settings.assignment_group),
            ("assigned_to", &settings.assigned_to),
        ];
        for (field, value) in passthrough {
            if let Some(value) = value {
                payload.insert(field, value.clone());
            }
        }
        payload.insert("instance", settings.instance.clone());

        payload
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    #[must_use]
    pub fn short_description(&self) -> Option<&str> {
        self.get("short_description")
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

fn short_description(category: IncidentCategory, report: &dyn RunReport) -> String {
    format!(
        "Puppet run report (status: {}) for node {} (job: {}, report time: {})",
        category.wording(),
        report.host(),
        report.job_id().unwrap_or("none"),
        format_report_time(report.time())
    )
}

/// Render an RFC 3339 report time in UTC; other formats are shown verbatim.
#[must_use]
pub fn format_report_time(time: &str) -> String {
    DateTime::parse_from_rfc3339(time.trim()).map_or_else(
        |_| time.to_string(),
        |t| {
            t.with_timezone(&Utc)
                .format("%Y-%m-%d %H:%M:%S UTC")
                .to_string()
        },
    )
}

/// Credentials attached to the outbound request. Exactly one mode is used.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMode {
    Basic { user: String, password: String },
    Bearer { token: String },
}

impl AuthMode {
    /// OAuth wins whenever a token is configured.
    ///
    /// Returns `None` only for settings that bypassed validation.
    #[must_use]
    pub fn select(settings: &Settings) -> Option<Self> {
        if let Some(token) = &settings.oauth_token {
            return Some(Self::Bearer {
                token: token.clone(),
            });
        }

        match (&settings.user, &settings.password) {
            (Some(user), Some(password)) => Some(Self::Basic {
                user: user.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    #[must_use]
    pub const fn scheme(&self) -> &'static str {
        match self {
            Self::Basic { .. } => "basic",
            Self::Bearer { .. } => "bearer",
        }
    }
}

impl fmt::Debug for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { user, .. } => f
                .debug_struct("Basic")
                .field("user", user)
                .field("password", &"[REDACTED]")
                .finish(),
            Self::Bearer { .. } => f
                .debug_struct("Bearer")
                .field("token", &"[REDACTED]")
                .finish(),
        }
    }
}
