//! # HMAC Key Rotator
//!
//! Rotates the GCS HMAC key of a service account and stores it in Google
//! Cloud Secret Manager. Meant to run as a CronJob: one invocation, one run,
//! exit code reflects the outcome.
//!
//! ```bash
//! # Rotate (default command)
//! hmac-key-rotator --service-account-email sa@p.iam.gserviceaccount.com --bucket-name data
//!
//! # Show what a rotation would change
//! hmac-key-rotator rotate --dry-run
//!
//! # Check bucket and secret access only
//! hmac-key-rotator verify
//!
//! # Inspect current state
//! hmac-key-rotator versions
//! hmac-key-rotator keys
//! ```
//!
//! Every flag falls back to the environment variable of the same name.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hmac_key_rotator::config::RotatorConfig;
use hmac_key_rotator::constants::FAILURE_EXIT_CODE;
use hmac_key_rotator::model::referenced_access_id;
use hmac_key_rotator::observability::{init_tracing, metrics};
use hmac_key_rotator::provider::{CredentialStore, SecretStore};
use hmac_key_rotator::runtime::{exit_code, run_cancellation, GcpClients};
use tracing::{error, info, warn};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("BUILD_GIT_HASH"),
    ", built ",
    env!("BUILD_DATETIME"),
    ")"
);

/// GCS HMAC key rotator
#[derive(Parser)]
#[command(name = "hmac-key-rotator", version = VERSION, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Service account the HMAC key belongs to
    #[arg(long, env = "SERVICE_ACCOUNT_EMAIL", global = true)]
    service_account_email: Option<String>,

    /// Bucket that must be reachable before rotating
    #[arg(long, env = "BUCKET_NAME", global = true)]
    bucket_name: Option<String>,

    /// Secret Manager secret id
    #[arg(long, env = "SECRET_NAME", global = true)]
    secret_name: Option<String>,

    /// Enabled secret versions to keep, the new one included
    #[arg(long, env = "MAX_VERSIONS_TO_KEEP", global = true)]
    max_versions_to_keep: Option<usize>,

    /// GCP project (defaults to the metadata server's project)
    #[arg(long, env = "PROJECT_ID", global = true)]
    project_id: Option<String>,

    /// Log level (ERROR, WARN, INFO, DEBUG, TRACE)
    #[arg(long, env = "LOG_LEVEL", global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Rotate the key (default)
    Rotate {
        /// Verify and report the plan without changing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Check bucket and secret access without changing anything
    Verify,
    /// List secret versions and the key the latest one holds
    Versions,
    /// List the service account's HMAC keys
    Keys,
}

impl Cli {
    /// Flags win over values loaded from the environment
    fn apply(&self, config: &mut RotatorConfig) {
        if let Some(email) = &self.service_account_email {
            config.service_account_email.clone_from(email);
        }
        if let Some(bucket) = &self.bucket_name {
            config.bucket_name.clone_from(bucket);
        }
        if let Some(secret) = &self.secret_name {
            config.secret_name.clone_from(secret);
        }
        if let Some(retention) = self.max_versions_to_keep {
            config.retention_count = retention;
        }
        if let Some(project) = &self.project_id {
            config.project_id = Some(project.clone());
        }
        if let Some(level) = &self.log_level {
            config.log_level.clone_from(level);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Configure rustls crypto provider FIRST, before any other operations
    rustls::crypto::ring::default_provider()
        .install_default()
        .unwrap_or_else(|_| panic!("Failed to install rustls crypto provider"));

    // Load .env before clap reads the environment
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = match RotatorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FAILURE: invalid configuration: {e}");
            std::process::exit(FAILURE_EXIT_CODE);
        }
    };
    cli.apply(&mut config);

    init_tracing(&config.log_level, config.log_format)?;
    info!(
        "Starting hmac-key-rotator {} (git_hash={}, built={})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_GIT_HASH"),
        env!("BUILD_DATETIME")
    );
    metrics::register_metrics()?;

    let command = cli.command.unwrap_or(Commands::Rotate { dry_run: false });
    let code = match run(command, &config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("FAILURE: {e:#}");
            FAILURE_EXIT_CODE
        }
    };

    if let Some(path) = &config.metrics_textfile_path {
        if let Err(e) = metrics::write_textfile(path) {
            warn!("Failed to write metrics textfile: {:#}", e);
        }
    }

    std::process::exit(code);
}

async fn run(command: Commands, config: &RotatorConfig) -> Result<i32> {
    let request = config.request();

    match command {
        Commands::Rotate { dry_run: false } => {
            // Invalid configuration must not reach the network, not even the metadata server
            if let Err(e) = request.validate() {
                metrics::record_run("failure", 0.0);
                eprintln!("FAILURE: invalid configuration: {e}");
                return Ok(FAILURE_EXIT_CODE);
            }
            let clients = GcpClients::connect(config).await?;
            let engine = clients.engine(config);
            let cancel = run_cancellation(config);

            let outcome = engine.rotate(&request, cancel.clone()).await;
            cancel.cancel();
            if outcome.is_failure() {
                eprintln!("{}", outcome.summary());
            } else {
                println!("{}", outcome.summary());
            }
            Ok(exit_code(&outcome, config.warnings_exit_code))
        }
        Commands::Rotate { dry_run: true } => {
            request.validate().context("Invalid configuration")?;
            let clients = GcpClients::connect(config).await?;
            let cancel = run_cancellation(config);

            let plan = clients.engine(config).plan(&request, cancel.clone()).await;
            cancel.cancel();
            let plan = plan.context("Dry run failed")?;
            plan.log();
            println!("{}", plan.render());
            Ok(0)
        }
        Commands::Verify => {
            request.validate().context("Invalid configuration")?;
            let clients = GcpClients::connect(config).await?;
            let cancel = run_cancellation(config);

            let result = clients
                .verifier(config)
                .verify(&request.storage_resource_name, &request.secret_name, &cancel)
                .await;
            cancel.cancel();
            result.context("Verification failed")?;
            println!(
                "OK: bucket {} and secret {} are accessible",
                request.storage_resource_name, request.secret_name
            );
            Ok(0)
        }
        Commands::Versions => {
            let clients = GcpClients::connect(config).await?;
            let versions = clients
                .secrets
                .list_versions(&request.secret_name)
                .await
                .context("Failed to list secret versions")?;
            if versions.is_empty() {
                println!("secret {} has no versions", request.secret_name);
                return Ok(0);
            }
            for version in &versions {
                println!(
                    "{:>6}  {:<9}  {}",
                    version.version_id,
                    version.state.as_str(),
                    version
                        .created_at
                        .map_or_else(|| "-".to_string(), |t| t.to_rfc3339())
                );
            }
            let latest = clients
                .secrets
                .access_latest(&request.secret_name)
                .await
                .context("Failed to read the latest version")?;
            match latest.as_deref().map(|raw| referenced_access_id(raw)) {
                Some(Some(access_id)) => println!("latest version holds key {access_id}"),
                Some(None) => println!("latest version does not name an access id"),
                None => println!("no enabled version"),
            }
            Ok(0)
        }
        Commands::Keys => {
            let clients = GcpClients::connect(config).await?;
            let keys = clients
                .hmac_keys
                .list_credentials(&request.owner_identity)
                .await
                .context("Failed to list HMAC keys")?;
            for key in &keys {
                println!(
                    "{}  {:<8}  {}",
                    key.access_id,
                    key.status.as_str(),
                    key.created_at.to_rfc3339()
                );
            }
            println!("{} key(s) for {}", keys.len(), request.owner_identity);
            Ok(0)
        }
    }
}
