//! Settings loader for `servicenow_reporting.yaml`.

use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::Path;
use tracing::debug;

use crate::decision::TriggerCondition;
use crate::error::ConfigError;
use crate::secrets::SecretResolver;

/// Where the settings file lives on a Puppet server.
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/puppetlabs/puppet/servicenow_reporting.yaml";

/// Settings file as written on disk.
#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    #[serde(default, deserialize_with = "scalar_string")]
    pe_console_url: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    caller: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    category: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    contact_type: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    state: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    impact: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    urgency: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    assignment_group: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    assigned_to: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    instance: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    user: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    password: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    oauth_token: Option<String>,
    #[serde(default)]
    incident_creation_conditions: Option<Vec<String>>,
}

/// Accept any YAML scalar as a string; `impact: 1` is as valid as `impact: '1'`.
fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected a string, found {other:?}"
        ))),
    }
}

/// Validated settings for one processor run.
///
/// Secret fields hold plaintext once loaded. Empty strings are normalized to
/// `None`.
#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    pub pe_console_url: String,
    pub caller: Option<String>,
    pub category: Option<String>,
    pub contact_type: Option<String>,
    pub state: Option<String>,
    pub impact: Option<String>,
    pub urgency: Option<String>,
    pub assignment_group: Option<String>,
    pub assigned_to: Option<String>,
    pub instance: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub oauth_token: Option<String>,
    /// Empty means no incident is ever created.
    pub incident_creation_conditions: Vec<TriggerCondition>,
}

impl Settings {
    /// Read and validate the settings file at `path`.
    pub fn load(path: impl AsRef<Path>, resolver: &SecretResolver) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        debug!(path = %path.display(), "Loaded ServiceNow settings file");
        Self::from_yaml_str(&text, resolver)
    }

    /// Parse and validate settings from YAML text.
    pub fn from_yaml_str(text: &str, resolver: &SecretResolver) -> Result<Self, ConfigError> {
        let raw: RawSettings = if text.trim().is_empty() {
            RawSettings::default()
        } else {
            serde_yaml::from_str(text)?
        };
        Self::from_raw(raw, resolver)
    }

    fn from_raw(raw: RawSettings, resolver: &SecretResolver) -> Result<Self, ConfigError> {
        let pe_console_url =
            non_empty(raw.pe_console_url).ok_or(ConfigError::MissingField("pe_console_url"))?;
        let instance = non_empty(raw.instance).ok_or(ConfigError::MissingField("instance"))?;

        let password = non_empty(raw.password)
            .map(|p| resolver.resolve(&p))
            .transpose()?
            .and_then(|p| non_empty(Some(p)));
        let oauth_token = non_empty(raw.oauth_token)
            .map(|t| resolver.resolve(&t))
            .transpose()?
            .and_then(|t| non_empty(Some(t)));
        let user = non_empty(raw.user);

        if oauth_token.is_none() && (user.is_none() || password.is_none()) {
            return Err(ConfigError::MissingCredentials);
        }

        let incident_creation_conditions = raw
            .incident_creation_conditions
            .unwrap_or_default()
            .iter()
            .map(|name| name.parse::<TriggerCondition>())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            pe_console_url,
            caller: non_empty(raw.caller),
            category: non_empty(raw.category),
            contact_type: non_empty(raw.contact_type),
            state: non_empty(raw.state),
            impact: non_empty(raw.impact),
            urgency: non_empty(raw.urgency),
            assignment_group: non_empty(raw.assignment_group),
            assigned_to: non_empty(raw.assigned_to),
            instance,
            user,
            password,
            oauth_token,
            incident_creation_conditions,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn redact(value: Option<&String>) -> Option<&'static str> {
    value.map(|_| "[REDACTED]")
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("pe_console_url", &self.pe_console_url)
            .field("caller", &self.caller)
            .field("category", &self.category)
            .field("contact_type", &self.contact_type)
            .field("state", &self.state)
            .field("impact", &self.impact)
            .field("urgency", &self.urgency)
            .field("assignment_group", &self.assignment_group)
            .field("assigned_to", &self.assigned_to)
            .field("instance", &self.instance)
            .field("user", &self.user)
            .field("password", &redact(self.password.as_ref()))
            .field("oauth_token", &redact(self.oauth_token.as_ref()))
            .field(
                "incident_creation_conditions",
                &self.incident_creation_conditions,
            )
            .finish()
    }
}
