//! EC2 Windows agent launcher.
//!
//! Launches a build agent on a Windows EC2 instance and serves it as a channel
//! over this process's stdin/stdout:
//! - Waits for the instance address, administrator password and SSH
//! - Prepares the working directory and runs the init script once
//! - Uploads and starts the agent
//! - Copies agent traffic between the instance and stdin/stdout until either side closes
//!
//! ```
//! kuiper-ec2-launcher --instance-id i-0123456789abcdef0 --name win-builder-1
//! ```

mod aws;
mod config;
mod error;
mod payload;
mod ssh;
mod stdio;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Parser;
use kuiper_launcher::{Collaborators, Launcher, Outcome, PasswordDecryptor, SecurityMode, Secret};
use tokio::signal;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use aws::{AwsCli, OpensslDecryptor};
use config::Config;
use error::Error;
use payload::FilePayloadProvider;
use ssh::SshTransport;
use stdio::{StderrSink, StdioChannelFactory};

/// Launch a build agent on a Windows EC2 instance
#[derive(Parser, Debug)]
#[command(name = "kuiper-ec2-launcher", version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: platform-specific config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// EC2 instance to launch the agent on
    #[arg(long)]
    instance_id: String,

    /// Display name used in logs and for the channel (default: instance id)
    #[arg(long)]
    name: Option<String>,

    /// Instance creation time, RFC 3339 (default: queried from EC2)
    #[arg(long)]
    launched_at: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(Config::default_path);

    init_logging(&Config::default_data_dir())?;

    if !config_path.exists() {
        Config::template().save(&config_path)?;
        eprintln!("No configuration found, wrote a template to: {}", config_path.display());
        eprintln!();
        eprintln!("Edit it and set at least:");
        eprintln!("  - agent.payload_path: Local path of the agent payload");
        eprintln!("  - aws.private_key: Key-pair private key (derived_password mode)");
        std::process::exit(1);
    }

    info!("Loading config from: {}", config_path.display());
    let config = Config::load(&config_path)?;

    let code = run(args, config).await?;
    // Stdin is read on a blocking thread that would keep the runtime alive
    std::process::exit(code);
}

async fn run(args: Args, config: Config) -> anyhow::Result<i32> {
    let aws = Arc::new(AwsCli::new(config.aws.clone()));

    let created_at = match args.launched_at {
        Some(ref raw) => parse_launched_at(raw)?,
        None => aws
            .instance(&args.instance_id)
            .await?
            .launch_time
            .unwrap_or_else(|| {
                warn!("No launch time reported for {}, assuming now", args.instance_id);
                Utc::now()
            }),
    };

    let ctx = config
        .launch
        .context(&args.instance_id, args.name.as_deref(), created_at);

    info!("kuiper-ec2-launcher starting");
    info!("Instance: {} ({})", ctx.instance_id, ctx.display_name);
    info!("Connection strategy: {:?}", ctx.connection_strategy);
    info!("Launch timeout: {}s", ctx.deadline().as_secs());

    let channels = Arc::new(StdioChannelFactory::new());
    let collaborators = Collaborators {
        describer: aws.clone(),
        credentials: aws,
        decryptor: decryptor(&config)?,
        payloads: Arc::new(FilePayloadProvider::new(config.agent.payload_path.clone())),
        channels: channels.clone(),
        log: Arc::new(StderrSink),
    };
    let launcher = Launcher::new(SshTransport::from_config(&config.ssh), collaborators);

    match launcher.launch(&ctx).await {
        Outcome::ChannelEstablished => {}
        Outcome::TimedOut { waited_secs } => {
            warn!("Gave up on {} after {}s", ctx.instance_id, waited_secs);
            return Ok(2);
        }
        Outcome::Aborted(reason) => {
            warn!("Launch on {} aborted: {}", ctx.instance_id, reason);
            return Ok(1);
        }
    }

    tokio::select! {
        _ = channels.closed() => {}
        _ = shutdown_signal() => {
            info!("Shutdown signal received, closing channel");
            channels.shutdown().await;
        }
    }

    info!("kuiper-ec2-launcher stopped");
    Ok(0)
}

/// Decryptor for the configured security mode.
fn decryptor(config: &Config) -> Result<Arc<dyn PasswordDecryptor>, Error> {
    match (config.launch.security, &config.aws.private_key) {
        (SecurityMode::DerivedPassword, Some(key)) => Ok(Arc::new(OpensslDecryptor::new(key.clone()))),
        (SecurityMode::DerivedPassword, None) => Err(Error::Config(
            "aws.private_key is required for derived_password mode".to_string(),
        )),
        (SecurityMode::SuppliedPassword, _) => Ok(Arc::new(UnusedDecryptor)),
    }
}

/// Stand-in for supplied-password mode, where nothing is ever decrypted.
struct UnusedDecryptor;

#[async_trait::async_trait]
impl PasswordDecryptor for UnusedDecryptor {
    async fn decrypt(&self, _material: &str) -> Result<Secret, kuiper_launcher::CloudError> {
        Err(kuiper_launcher::CloudError::Decrypt(
            "no private key configured".to_string(),
        ))
    }
}

fn parse_launched_at(raw: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Argument(format!("--launched-at {raw}: {e}")))
}

/// Initialize logging to stderr and a daily rotating file.
///
/// Stdout is reserved for agent traffic.
fn init_logging(data_dir: &Path) -> anyhow::Result<()> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    // Daily rotating file (e.g., kuiper-ec2-launcher.2026-01-15.log)
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("kuiper-ec2-launcher")
        .filename_suffix("log")
        .build(&log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // Keep the writer alive for the lifetime of the program
    std::mem::forget(guard);

    // Base filter quiets russh, RUST_LOG layers on top
    let base = "russh=warn";
    let filter = match std::env::var("RUST_LOG") {
        Ok(env) => EnvFilter::new(format!("{base},{env}")),
        Err(_) => EnvFilter::new(format!("{base},info")),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(fmt::layer().with_target(true).with_ansi(false).with_writer(non_blocking))
        .init();

    info!("Logging to: {}", log_dir.display());
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl-C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
