//! Incident submission.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::SubmitError;
use crate::incident::{AuthMode, IncidentPayload};

/// Table API path for incident records.
pub const INCIDENT_ENDPOINT: &str = "api/now/table/incident";

/// Connection-level timeout for the single request.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Identifiers of a created incident, when ServiceNow returns them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitResponse {
    pub sys_id: Option<String>,
    pub number: Option<String>,
}

/// Destination for incident payloads.
#[async_trait]
pub trait IncidentSink: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Submit one incident. Implementations make a single attempt.
    async fn submit(
        &self,
        payload: &IncidentPayload,
        auth: &AuthMode,
    ) -> Result<SubmitResponse, SubmitError>;
}

/// ServiceNow Table API client.
pub struct ServiceNowClient {
    endpoint: String,
    client: reqwest::Client,
}

impl ServiceNowClient {
    /// Create a client posting to `<base_url>/api/now/table/incident`.
    ///
    /// A base URL without a scheme is treated as HTTPS.
    pub fn new(base_url: &str) -> Result<Self, SubmitError> {
        let client = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self::with_client(base_url, client))
    }

    /// Create a client with a preconfigured `reqwest::Client`.
    #[must_use]
    pub fn with_client(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            endpoint: incident_endpoint(base_url),
            client,
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Join a base URL and the incident endpoint.
#[must_use]
pub fn incident_endpoint(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    if base.contains("://") {
        format!("{base}/{INCIDENT_ENDPOINT}")
    } else {
        format!("https://{base}/{INCIDENT_ENDPOINT}")
    }
}

#[async_trait]
impl IncidentSink for ServiceNowClient {
    fn name(&self) -> &'static str {
        "servicenow"
    }

    async fn submit(
        &self,
        payload: &IncidentPayload,
        auth: &AuthMode,
    ) -> Result<SubmitResponse, SubmitError> {
        debug!(
            endpoint = %self.endpoint,
            auth = auth.scheme(),
            "Submitting ServiceNow incident"
        );

        let request = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, "application/json")
            .json(payload);
        let request = match auth {
            AuthMode::Basic { user, password } => request.basic_auth(user, Some(password)),
            AuthMode::Bearer { token } => request.bearer_auth(token),
        };

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.as_u16() != 200 {
            warn!(
                status = status.as_u16(),
                body = %body,
                "ServiceNow rejected incident"
            );
            return Err(SubmitError::Request {
                status: status.as_u16(),
                body,
            });
        }

        Ok(parse_created(&body))
    }
}

#[derive(Debug, Deserialize)]
struct TableResponse {
    result: CreatedRecord,
}

#[derive(Debug, Deserialize)]
struct CreatedRecord {
    #[serde(default)]
    sys_id: Option<String>,
    #[serde(default)]
    number: Option<String>,
}

/// Pull identifiers out of a Table API response, tolerating odd bodies.
fn parse_created(body: &str) -> SubmitResponse {
    serde_json::from_str::<TableResponse>(body).map_or_else(
        |_| SubmitResponse::default(),
        |r| SubmitResponse {
            sys_id: r.result.sys_id,
            number: r.result.number,
        },
    )
}
