//! s3-csi-e2e command line entry point

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use s3_csi_e2e::bench::format_benchmarks;
use s3_csi_e2e::config::{CleanupPolicy, Config, ConfigOverrides};
use s3_csi_e2e::k8s::{wait_for_pod_error, KubeClient, PodRef};
use s3_csi_e2e::s3::S3Client;

/// Harness tooling for the S3 CSI driver end-to-end suites
#[derive(Debug, Parser)]
#[command(name = "s3-csi-e2e", version)]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true, env = "E2E_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, env = "E2E_S3_ENDPOINT_URL")]
    endpoint_url: Option<String>,

    #[arg(long, global = true, env = "E2E_ACCESS_KEY_ID")]
    access_key_id: Option<String>,

    #[arg(long, global = true, env = "E2E_SECRET_ACCESS_KEY", hide_env_values = true)]
    secret_access_key: Option<String>,

    /// Prefix of every bucket created by the suites
    #[arg(long, global = true, env = "E2E_BUCKET_PREFIX")]
    bucket_prefix: Option<String>,

    #[arg(long, global = true, value_enum, env = "E2E_CLEANUP_POLICY")]
    cleanup_policy: Option<CleanupPolicy>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, env = "E2E_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check that the object store answers and the driver's node plugin is ready
    Preflight,

    /// Wait until a pod reports an error containing a pattern
    WaitPodError {
        #[arg(long)]
        namespace: String,
        #[arg(long)]
        pod: String,
        #[arg(long)]
        pattern: String,
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
    },

    /// Reshape a benchmark artifact into `{commit_id, benchmarks}` records
    FormatBenchmarks {
        input: PathBuf,
        output: PathBuf,
        /// Commit the artifact was produced from
        #[arg(long)]
        commit: Option<String>,
    },
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            endpoint_url: self.endpoint_url.clone(),
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            bucket_prefix: self.bucket_prefix.clone(),
            cleanup_policy: self.cleanup_policy,
            log_level: self.log_level.clone(),
            ..Default::default()
        }
    }

    fn load_config(&self) -> Result<Config, Box<dyn std::error::Error>> {
        let overrides = ConfigOverrides::from_env()?.merge(self.overrides());
        Ok(Config::load(self.config.as_deref(), overrides)?)
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Cancel `token` on the first Ctrl+C
fn cancel_on_interrupt(token: CancellationToken) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        info!("Received interrupt, cancelling");
        token.cancel();
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Command::Preflight => {
            let config = match cli.load_config() {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("Configuration error: {}", e);
                    std::process::exit(1);
                }
            };
            init_logging(&config.logging.level);

            let token = CancellationToken::new();
            cancel_on_interrupt(token.clone())?;

            tokio::select! {
                _ = token.cancelled() => {
                    error!("Preflight interrupted");
                    std::process::exit(130);
                }
                result = preflight(&config) => result?,
            }
        }

        Command::WaitPodError {
            namespace,
            pod,
            pattern,
            timeout_secs,
        } => {
            let config = cli.load_config()?;
            init_logging(&config.logging.level);

            let token = CancellationToken::new();
            cancel_on_interrupt(token.clone())?;

            let client = KubeClient::try_default(config.kubernetes.clone()).await?;
            wait_for_pod_error(
                &client,
                &PodRef::new(namespace, pod),
                pattern,
                Duration::from_secs(*timeout_secs),
                &token,
            )
            .await?;
            info!("Pod {}/{} reported {:?}", namespace, pod, pattern);
        }

        Command::FormatBenchmarks {
            input,
            output,
            commit,
        } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));

            let data = std::fs::read(input)?;
            let formatted = format_benchmarks(&serde_json::from_slice(&data)?, commit.as_deref())?;
            std::fs::write(output, serde_json::to_vec(&formatted)?)?;
            info!("Formatted {:?} into {:?}", input, output);
        }
    }

    Ok(())
}

async fn preflight(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("Checking S3 endpoint {}", config.s3.endpoint_url);
    S3Client::new(&config.s3).ping().await?;

    info!(
        "Checking CSI driver {} in {}",
        config.kubernetes.driver_name, config.kubernetes.driver_namespace
    );
    let client = KubeClient::try_default(config.kubernetes.clone()).await?;
    client.check_driver_ready().await?;

    info!("Preflight passed");
    Ok(())
}
