// Local crates
use crate::transformer::transformer::IdentityPolicy;

// External crates
use anyhow::{Context, Result, bail};
use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::instrument;

/// Environment variable prefix, e.g. `THORAX_JOURNAL__TOKEN` sets `journal.token`
pub const ENV_PREFIX: &str = "THORAX";

const REDACTED: &str = "<redacted>";

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub journal: JournalConfig,
    pub segment: SegmentConfig,
    pub sync: SyncConfig,
    pub reporting: ReportingConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// Command line values layered over file and environment configuration.
/// `None` leaves the lower layers untouched.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub segment_write_key: Option<String>,
    pub journal_token: Option<String>,
    pub journal_id: Option<String>,
    pub cursor_name: Option<String>,
    pub cursor: Option<String>,
    pub batch_size: Option<u64>,
    pub delay_secs: Option<u64>,
    pub identity_policy: Option<IdentityPolicy>,
    pub log_level: Option<String>,
}

impl ConfigOverrides {
    fn entries(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("segment.write_key", self.segment_write_key.clone()),
            ("journal.token", self.journal_token.clone()),
            ("journal.journal_id", self.journal_id.clone()),
            ("sync.cursor_name", self.cursor_name.clone()),
            ("sync.cursor", self.cursor.clone()),
            ("sync.batch_size", self.batch_size.map(|v| v.to_string())),
            ("sync.delay_secs", self.delay_secs.map(|v| v.to_string())),
            (
                "sync.identity_policy",
                self.identity_policy.map(|p| p.as_str().to_string()),
            ),
            ("logging.level", self.log_level.clone()),
        ]
    }
}

impl Config {
    /// Load configuration from defaults, an optional TOML file, `THORAX_*`
    /// environment variables and command line overrides, in that order.
    #[instrument(
        name = "config_loader",
        target = "helpers::load_config",
        level = "trace",
        skip_all
    )]
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path_ref) = path {
            tracing::trace!(
                configuration_file_path = %path_ref.display(),
                "Loading thorax configuration file"
            );
            builder = builder.add_source(File::from(path_ref).format(FileFormat::Toml).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );

        for (key, value) in overrides.entries() {
            builder = builder
                .set_override_option(key, value)
                .with_context(|| format!("Invalid command line value for {key}"))?;
        }

        let config: Config = builder
            .build()
            .context("Failed to assemble thorax configuration")?
            .try_deserialize()
            .context("Failed to parse thorax configuration")?;

        tracing::trace!("Thorax configuration loaded successfully");
        Ok(config)
    }

    /// Reject configurations a run cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.segment.write_key.trim().is_empty() {
            bail!("Please pass a Segment write key using the --segment option.");
        }
        if self.journal.token.trim().is_empty() {
            bail!("Please pass a Bugout token using the --token option.");
        }
        if self.journal.journal_id.trim().is_empty() {
            bail!("Please pass a Bugout journal ID using the --journal option.");
        }
        if self.sync.batch_size == 0 {
            bail!("sync.batch_size must be greater than zero");
        }
        if self.segment.batch_size == 0 {
            bail!("segment.batch_size must be greater than zero");
        }
        Ok(())
    }

    /// Copy safe to print, with every credential replaced.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        let hide = |value: &mut String| {
            if !value.is_empty() {
                *value = REDACTED.to_string();
            }
        };
        hide(&mut copy.journal.token);
        hide(&mut copy.segment.write_key);
        if let Some(token) = copy.reporting.token.as_mut() {
            hide(token);
        }
        copy
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct JournalConfig {
    pub token: String,
    pub journal_id: String,
    pub spire_url: String,
    pub timeout_secs: u64,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            journal_id: String::new(),
            spire_url: "https://spire.bugout.dev".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SegmentConfig {
    pub write_key: String,
    pub endpoint: String,
    /// Messages per batch request
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            write_key: String::new(),
            endpoint: "https://api.segment.io".to_string(),
            batch_size: 100,
            flush_interval_ms: 1000,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Journal entries per page
    pub batch_size: u64,
    pub delay_secs: u64,
    pub cursor_name: Option<String>,
    pub cursor: Option<String>,
    pub identity_policy: IdentityPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            delay_secs: 0,
            cursor_name: None,
            cursor: None,
            identity_policy: IdentityPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ReportingConfig {
    /// Humbug reporter token, reporting is off without one
    pub token: Option<String>,
    pub consent_env: String,
    pub client_id_env: String,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            token: None,
            consent_env: "THORAX_REPORTING_ENABLED".to_string(),
            client_id_env: "THORAX_EMAIL".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Directory for daily rolling JSON log files
    pub directory: Option<String>,
    /// JSON instead of human readable output on stderr
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            json: false,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus textfile written at the end of every run
    pub textfile_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_apply_without_sources() {
        let cfg = Config::load(None, &ConfigOverrides::default()).unwrap();

        assert_eq!(cfg.journal.spire_url, "https://spire.bugout.dev");
        assert_eq!(cfg.segment.batch_size, 100);
        assert_eq!(cfg.segment.flush_interval_ms, 1000);
        assert_eq!(cfg.sync.batch_size, 1000);
        assert_eq!(cfg.sync.identity_policy, IdentityPolicy::Client);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn file_values_and_overrides_layer() {
        let file = write_config(
            r#"
            [journal]
            token = "file-token"
            journal_id = "file-journal"

            [segment]
            write_key = "file-key"
            batch_size = 50

            [sync]
            batch_size = 200
            cursor_name = "nightly"
            identity_policy = "session"
            "#,
        );
        let overrides = ConfigOverrides {
            journal_id: Some("cli-journal".into()),
            batch_size: Some(10),
            ..Default::default()
        };

        let cfg = Config::load(Some(file.path()), &overrides).unwrap();

        assert_eq!(cfg.journal.token, "file-token");
        assert_eq!(cfg.journal.journal_id, "cli-journal");
        assert_eq!(cfg.segment.batch_size, 50);
        assert_eq!(cfg.sync.batch_size, 10);
        assert_eq!(cfg.sync.cursor_name.as_deref(), Some("nightly"));
        assert_eq!(cfg.sync.identity_policy, IdentityPolicy::Session);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn identity_policy_accepts_mixed_case() {
        let file = write_config(
            r#"
            [sync]
            identity_policy = "Session"
            "#,
        );
        let cfg = Config::load(Some(file.path()), &ConfigOverrides::default()).unwrap();
        assert_eq!(cfg.sync.identity_policy, IdentityPolicy::Session);

        let overrides = ConfigOverrides {
            identity_policy: Some(IdentityPolicy::Client),
            ..Default::default()
        };
        let cfg = Config::load(Some(file.path()), &overrides).unwrap();
        assert_eq!(cfg.sync.identity_policy, IdentityPolicy::Client);
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = Config::load(
            Some(Path::new("/nonexistent/thorax.toml")),
            &ConfigOverrides::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn validation_names_the_missing_flag() {
        let mut cfg = Config::default();
        cfg.segment.write_key = "key".into();
        cfg.journal.token = "token".into();

        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("--journal"));

        cfg.journal.journal_id = "journal".into();
        cfg.sync.batch_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn redaction_hides_credentials_only() {
        let mut cfg = Config::default();
        cfg.journal.token = "secret".into();
        cfg.journal.journal_id = "journal".into();
        cfg.segment.write_key = "key".into();
        cfg.reporting.token = Some("reporter".into());

        let redacted = cfg.redacted();
        assert_eq!(redacted.journal.token, REDACTED);
        assert_eq!(redacted.segment.write_key, REDACTED);
        assert_eq!(redacted.reporting.token.as_deref(), Some(REDACTED));
        assert_eq!(redacted.journal.journal_id, "journal");
    }
}
