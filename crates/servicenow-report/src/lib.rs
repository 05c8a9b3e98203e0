//! Puppet report processor for ServiceNow incidents.
//!
//! After each Puppet run the host hands the processor the run report. The
//! processor loads `servicenow_reporting.yaml`, decrypts any eyaml secrets in
//! it, decides from the run status whether the configured
//! `incident_creation_conditions` call for an incident, and if so opens one
//! with a single POST to the ServiceNow Table API.
//!
//! # Usage
//!
//! ```no_run
//! use servicenow_report::{ReportProcessor, ReportSummary};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let report = ReportSummary::load("/opt/puppetlabs/puppet/cache/state/last_run_report.yaml")?;
//! let processor = ReportProcessor::new("/etc/puppetlabs/puppet/servicenow_reporting.yaml");
//!
//! processor.process(&report).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`secrets::SecretResolver`] turns `ENC[PKCS7,...]` values into plaintext
//! - [`Settings`] is the validated settings file
//! - [`decision::decide`] maps the run outcome to an [`IncidentDecision`]
//! - [`IncidentPayload`] and [`AuthMode`] describe the outbound request
//! - [`IncidentSink`] submits it; [`ServiceNowClient`] is the HTTP implementation
//! - [`ErrorReporter`] receives every fatal error exactly once

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod decision;
pub mod error;
pub mod incident;
pub mod report;
pub mod secrets;
pub mod settings;
pub mod transport;

pub use decision::{decide, IncidentCategory, IncidentDecision, TriggerCondition};
pub use error::{ConfigError, ProcessorError, ReportError, Result, SubmitError};
pub use incident::{AuthMode, IncidentPayload};
pub use report::{ReportSummary, RunOutcome, RunReport, RunStatus};
pub use secrets::SecretResolver;
pub use settings::{Settings, DEFAULT_SETTINGS_PATH};
pub use transport::{IncidentSink, ServiceNowClient, SubmitResponse};

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Channel for fatal processor errors.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &ProcessorError);
}

/// Logs fatal errors at `error` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, err: &ProcessorError) {
        error!(error = %err, "ServiceNow report processor failed");
    }
}

/// What a single invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// No configured condition matched the run.
    Skipped,
    /// An incident was created.
    Created(SubmitResponse),
}

impl ProcessOutcome {
    #[must_use]
    pub const fn created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Runs the settings → decision → payload → submit pipeline for one report.
pub struct ReportProcessor {
    settings_path: PathBuf,
    resolver: SecretResolver,
    sink: Option<Arc<dyn IncidentSink>>,
    reporter: Arc<dyn ErrorReporter>,
}

impl ReportProcessor {
    /// Create a processor reading settings from `settings_path`.
    #[must_use]
    pub fn new(settings_path: impl Into<PathBuf>) -> Self {
        Self {
            settings_path: settings_path.into(),
            resolver: SecretResolver::new(),
            sink: None,
            reporter: Arc::new(TracingReporter),
        }
    }

    /// Use a specific secret resolver (e.g. a non-default eyaml key config).
    #[must_use]
    pub fn with_resolver(mut self, resolver: SecretResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Submit through `sink` instead of a [`ServiceNowClient`] built from settings.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn IncidentSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Send fatal errors to `reporter` instead of the log.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Process one run report.
    ///
    /// Any error is passed to the configured [`ErrorReporter`] before being
    /// returned.
    pub async fn process(&self, report: &dyn RunReport) -> Result<ProcessOutcome> {
        let result = match Settings::load(&self.settings_path, &self.resolver) {
            Ok(settings) => self.handle(&settings, report).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = &result {
            self.reporter.report(e);
        }
        result
    }

    async fn handle(&self, settings: &Settings, report: &dyn RunReport) -> Result<ProcessOutcome> {
        let outcome = report.outcome();
        let decision = decide(&outcome, &settings.incident_creation_conditions);

        let Some(category) = decision.category.filter(|_| decision.should_create) else {
            debug!(
                host = report.host(),
                status = %outcome.status,
                "No incident creation condition matched"
            );
            return Ok(ProcessOutcome::Skipped);
        };

        let auth = AuthMode::select(settings).ok_or(ConfigError::MissingCredentials)?;
        let payload = IncidentPayload::build(category, settings, report);

        let sink: Arc<dyn IncidentSink> = match &self.sink {
            Some(sink) => Arc::clone(sink),
            None => Arc::new(ServiceNowClient::new(&settings.pe_console_url)?),
        };

        let created = sink.submit(&payload, &auth).await?;
        info!(
            host = report.host(),
            sink = sink.name(),
            category = ?category,
            sys_id = created.sys_id.as_deref().unwrap_or("unknown"),
            number = created.number.as_deref().unwrap_or("unknown"),
            "Created ServiceNow incident"
        );

        Ok(ProcessOutcome::Created(created))
    }
}
