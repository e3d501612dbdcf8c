//! Crash and usage reporting.
//!
//! A side channel with no influence on sync correctness: reports are only
//! sent with explicit consent, and publishing failures are logged and
//! dropped.

// Local crates
use crate::helpers::load_config::ReportingConfig;

// External crates
use reqwest::Client;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use sysinfo::System;
use tracing::instrument;

/// Values accepted as consent in the consent environment variable.
const CONSENT_VALUES: [&str; 5] = ["1", "true", "t", "y", "yes"];

/// A Humbug report: a titled markdown body with tags.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
}

/// Receives reports at startup and on unrecoverable termination.
pub trait Reporter {
    fn publish(&self, report: Report) -> impl Future<Output = ()> + Send;
}

/// Publishes reports to the Bugout Humbug API.
#[derive(Debug, Clone)]
pub struct HumbugReporter {
    http: Client,
    reports_url: String,
    token: Option<String>,
    consent: bool,
    session_id: String,
    client_id: Option<String>,
}

impl HumbugReporter {
    pub fn new(config: &ReportingConfig, spire_url: &str) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(Duration::from_secs(10)).build()?;
        let consent = consent_given(std::env::var(&config.consent_env).ok().as_deref());
        let client_id = std::env::var(&config.client_id_env)
            .ok()
            .filter(|id| !id.trim().is_empty());

        Ok(Self {
            http,
            reports_url: format!("{}/humbug/reports", spire_url.trim_end_matches('/')),
            token: config.token.clone().filter(|token| !token.is_empty()),
            consent,
            session_id: uuid::Uuid::new_v4().to_string(),
            client_id,
        })
    }

    /// Whether anything will actually be sent.
    pub fn is_enabled(&self) -> bool {
        self.consent && self.token.is_some()
    }

    fn identity_tags(&self) -> Vec<String> {
        let mut tags = vec![
            "source:thorax".to_string(),
            format!("session:{}", self.session_id),
        ];
        if let Some(client_id) = &self.client_id {
            tags.push(format!("client:{client_id}"));
        }
        tags
    }
}

impl Reporter for HumbugReporter {
    #[instrument(
        name = "thorax_reporter::publish",
        target = "reporter::reporter::HumbugReporter",
        skip_all,
        level = "debug"
    )]
    async fn publish(&self, mut report: Report) {
        let Some(token) = self.token.as_deref().filter(|_| self.consent) else {
            tracing::trace!(title = %report.title, "Reporting disabled, dropping report");
            return;
        };

        report.tags.extend(self.identity_tags());
        let result = self
            .http
            .post(&self.reports_url)
            .query(&[("sync", "true")])
            .bearer_auth(token)
            .json(&report)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match result {
            Ok(_) => tracing::debug!(title = %report.title, "Report published"),
            Err(e) => tracing::warn!(error = %e, title = %report.title, "Failed to publish report"),
        }
    }
}

/// Interpret the consent variable's value. Absent means no consent.
pub fn consent_given(value: Option<&str>) -> bool {
    value
        .map(|v| v.trim().to_ascii_lowercase())
        .is_some_and(|v| CONSENT_VALUES.contains(&v.as_str()))
}

/// Environment description published when a run starts.
pub fn system_report() -> Report {
    let mut system = System::new();
    system.refresh_memory();
    system.refresh_cpu_all();

    let os = System::name().unwrap_or_else(|| std::env::consts::OS.to_string());
    let os_version = System::os_version().unwrap_or_default();
    let kernel = System::kernel_version().unwrap_or_default();
    let cpus = system.cpus().len();

    let content = format!(
        "## System information\n\
         ```\n\
         thorax version: {}\n\
         os: {} {}\n\
         kernel: {}\n\
         architecture: {}\n\
         cpus: {}\n\
         total memory (bytes): {}\n\
         ```",
        env!("CARGO_PKG_VERSION"),
        os,
        os_version,
        kernel,
        std::env::consts::ARCH,
        cpus,
        system.total_memory(),
    );

    Report {
        title: format!("{os} - thorax {}", env!("CARGO_PKG_VERSION")),
        content,
        tags: vec![
            "type:system".to_string(),
            format!("os:{}", std::env::consts::OS),
            format!("arch:{}", std::env::consts::ARCH),
            format!("thorax_version:{}", env!("CARGO_PKG_VERSION")),
        ],
    }
}

/// Report for a run that terminated with `error`, including its cause chain.
pub fn error_report(error: &anyhow::Error) -> Report {
    let chain = error
        .chain()
        .map(|cause| format!("- {cause}"))
        .collect::<Vec<_>>()
        .join("\n");

    Report {
        title: format!("thorax error: {error}"),
        content: format!("## Error\n{chain}"),
        tags: vec![
            "type:error".to_string(),
            format!("thorax_version:{}", env!("CARGO_PKG_VERSION")),
        ],
    }
}

/// Report for a run that panicked with `message`.
pub fn panic_report(message: &str) -> Report {
    Report {
        title: format!("thorax panic: {message}"),
        content: format!("## Panic\n```\n{message}\n```"),
        tags: vec![
            "type:panic".to_string(),
            format!("thorax_version:{}", env!("CARGO_PKG_VERSION")),
        ],
    }
}
