use crate::{
    helpers::load_config::{Config, ConfigOverrides},
    instrumentation::tracing::{init_panic_handler, init_tracing},
    runtime,
    transformer::transformer::IdentityPolicy,
};
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser)]
#[command(
    name = "thorax",
    long_about = "Thorax forwards newly created Bugout journal entries to Segment as analytics events, \
                  resuming from a cursor so repeated runs only forward new entries.",
    about = "Bugout journal to Segment forwarder",
    version,
    term_width = 100,
    after_help = "\
    EXAMPLES:
        thorax run --segment <WRITE_KEY> --token <TOKEN> --journal <JOURNAL_ID> --cursor-name nightly
        thorax run --config /etc/thorax.toml -N 500 -s 2
        thorax validate --config ./thorax.toml"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forward new journal entries to Segment, then exit
    Run(RunArgs),

    /// Validate the configuration and print it with credentials redacted
    Validate {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Segment write key (get one by creating a source at https://segment.com)
    #[arg(long = "segment")]
    segment_write_key: Option<String>,

    /// Bugout access token (create one at https://bugout.dev/account/tokens)
    #[arg(long)]
    token: Option<String>,

    /// Bugout journal ID to load events from
    #[arg(long)]
    journal: Option<String>,

    /// Name of the cursor to load progress from and store progress under
    #[arg(long)]
    cursor_name: Option<String>,

    /// Cursor from which to start loading entries, for this run only
    #[arg(long)]
    cursor: Option<String>,

    /// Number of entries to process per iteration
    #[arg(short = 'N', long)]
    batch_size: Option<u64>,

    /// Number of seconds to wait between Bugout requests
    #[arg(short = 's', long = "delay")]
    delay_secs: Option<u64>,

    /// Tags identifying the subject of an entry: client or session
    #[arg(long, value_parser = IdentityPolicy::from_str)]
    identity_policy: Option<IdentityPolicy>,

    /// Debug logging, and print the effective configuration
    #[arg(long)]
    debug: bool,
}

impl RunArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            segment_write_key: self.segment_write_key.clone(),
            journal_token: self.token.clone(),
            journal_id: self.journal.clone(),
            cursor_name: self.cursor_name.clone(),
            cursor: self.cursor.clone(),
            batch_size: self.batch_size,
            delay_secs: self.delay_secs,
            identity_policy: self.identity_policy,
            log_level: self.debug.then(|| "debug".to_string()),
        }
    }
}

/// Entry function for CLI
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_thorax(args).await?,
        Commands::Validate { config } => validate_config(config)?,
        Commands::Version => show_version(),
    }

    Ok(())
}

//
// ------------------------ Command Implementations ------------------------------
//

async fn run_thorax(args: RunArgs) -> Result<()> {
    let cfg = Config::load(args.config.as_deref(), &args.overrides())?;
    let _guard = init_tracing(&cfg.logging)?;
    init_panic_handler();
    cfg.validate()?;

    if args.debug {
        println!("DEBUG: effective configuration:\n{:#?}", cfg.redacted());
    }

    runtime::runtime::run_thorax(cfg).await
}

/// Validate configuration file
fn validate_config(config: Option<PathBuf>) -> Result<()> {
    if let Some(path) = &config {
        println!("Validating configuration file: {}", path.display());
    }
    let cfg = Config::load(config.as_deref(), &ConfigOverrides::default())?;
    cfg.validate()?;
    println!("Configuration valid:\n{:#?}", cfg.redacted());
    Ok(())
}

/// Show version information
fn show_version() {
    println!("{}", env!("CARGO_PKG_VERSION"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_map_to_overrides() {
        let cli = Cli::try_parse_from([
            "thorax",
            "run",
            "--segment",
            "key",
            "--token",
            "token",
            "--journal",
            "journal",
            "--cursor-name",
            "nightly",
            "-N",
            "250",
            "-s",
            "3",
            "--debug",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        let overrides = args.overrides();
        assert_eq!(overrides.segment_write_key.as_deref(), Some("key"));
        assert_eq!(overrides.journal_id.as_deref(), Some("journal"));
        assert_eq!(overrides.cursor_name.as_deref(), Some("nightly"));
        assert_eq!(overrides.batch_size, Some(250));
        assert_eq!(overrides.delay_secs, Some(3));
        assert_eq!(overrides.log_level.as_deref(), Some("debug"));
        assert_eq!(overrides.cursor, None);
    }

    #[test]
    fn identity_policy_flag_is_case_insensitive() {
        let cli = Cli::try_parse_from(["thorax", "run", "--identity-policy", "Session"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.overrides().identity_policy, Some(IdentityPolicy::Session));

        assert!(Cli::try_parse_from(["thorax", "run", "--identity-policy", "email"]).is_err());
    }

    #[test]
    fn version_subcommand_parses() {
        let cli = Cli::try_parse_from(["thorax", "version"]).unwrap();
        assert!(matches!(cli.command, Commands::Version));
    }
}
