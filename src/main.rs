//! Binary entry point for fingerlink.
//!
//! This binary provides the CLI and the HTTP server.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use fingerlink::config::FingerlinkConfig;
use fingerlink::models::{DeviceId, Participant, Scheme, SchemeId, UserId};
use fingerlink::observability;
use fingerlink::services::ServiceContainer;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

/// How long `enroll-mode` waits for the command to reach the broker.
const COMMAND_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Fingerlink - fingerprint matching and attendance.
#[derive(Parser)]
#[command(name = "fingerlink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "FINGERLINK_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Scheme to use instead of the configured active scheme.
    #[arg(short, long, global = true)]
    scheme: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server.
    Serve {
        /// Address to bind (overrides config).
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Enroll a template for a user.
    Enroll {
        /// User to link the template to.
        #[arg(short, long)]
        user: String,

        /// Raw template file (`-` for stdin).
        file: PathBuf,
    },

    /// Store a template vector without linking a user.
    Register {
        /// Raw template file (`-` for stdin).
        file: PathBuf,
    },

    /// Find the enrolled template matching a capture.
    Identify {
        /// Raw template file (`-` for stdin).
        file: PathBuf,
    },

    /// Record fingerprint attendance.
    Attend {
        /// Capturing device.
        #[arg(short, long)]
        device: String,

        /// Raw template file (`-` for stdin).
        file: PathBuf,
    },

    /// Record attendance by badge code.
    AttendQr {
        /// Capturing device.
        #[arg(short, long)]
        device: String,

        /// Badge code.
        code: String,
    },

    /// Ask a device to enroll the next finger for a user.
    EnrollMode {
        /// User to enroll.
        #[arg(short, long)]
        user: String,

        /// Target device.
        #[arg(short, long)]
        device: String,
    },

    /// Manage participants.
    Participant {
        #[command(subcommand)]
        action: ParticipantAction,
    },

    /// Show recent attendance events.
    History {
        /// Maximum number of events.
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Find vectors that have no enrollment link.
    Reconcile {
        /// Delete the orphans found.
        #[arg(long)]
        purge: bool,
    },

    /// Show per-scheme vector counts.
    Status,

    /// List registered schemes.
    Schemes,

    /// Show the effective configuration.
    Config,
}

/// Participant subcommands.
#[derive(Subcommand)]
enum ParticipantAction {
    /// Add or update a participant.
    Add {
        /// User id.
        #[arg(short, long)]
        user: String,

        /// Display name.
        #[arg(short, long)]
        name: String,

        /// Badge code for QR attendance.
        #[arg(short, long)]
        qr: Option<String>,
    },

    /// Show a participant and their enrollments.
    Show {
        /// User id.
        #[arg(short, long)]
        user: String,
    },
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is not an error.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match FingerlinkConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let _observability = match observability::init(&config, cli.verbose) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
async fn run_command(cli: Cli, mut config: FingerlinkConfig) -> Result<()> {
    if let Some(name) = cli.scheme.as_deref() {
        config.active_scheme = SchemeId::parse(name)?;
    }

    match cli.command {
        Commands::Schemes => cmd_schemes(&config),
        Commands::Config => cmd_config(&config),
        Commands::Serve { listen } => {
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            cmd_serve(config).await
        },
        command => {
            let services = ServiceContainer::from_config(&config)
                .context("failed to connect to the configured stores")?;
            run_store_command(command, &services)
        },
    }
}

/// Runs a command that needs the stores.
fn run_store_command(command: Commands, services: &ServiceContainer) -> Result<()> {
    let scheme = services.active_scheme();
    match command {
        Commands::Enroll { user, file } => cmd_enroll(services, scheme, &user, &file),
        Commands::Register { file } => cmd_register(services, scheme, &file),
        Commands::Identify { file } => cmd_identify(services, scheme, &file),
        Commands::Attend { device, file } => cmd_attend(services, scheme, &device, &file),
        Commands::AttendQr { device, code } => cmd_attend_qr(services, &device, &code),
        Commands::EnrollMode { user, device } => cmd_enroll_mode(services, &user, &device),
        Commands::Participant { action } => cmd_participant(services, action),
        Commands::History { limit } => cmd_history(services, limit),
        Commands::Reconcile { purge } => cmd_reconcile(services, scheme, purge),
        Commands::Status => cmd_status(services),
        Commands::Schemes | Commands::Config | Commands::Serve { .. } => {
            bail!("command does not use the stores")
        },
    }
}

/// Reads a raw template from a file, or stdin for `-`.
fn read_template(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("failed to read template from stdin")?;
        return Ok(buf);
    }
    std::fs::read(path).with_context(|| format!("failed to read template {}", path.display()))
}

fn cmd_enroll(
    services: &ServiceContainer,
    scheme: &'static Scheme,
    user: &str,
    file: &Path,
) -> Result<()> {
    let user_id = UserId::parse(user)?;
    let raw = read_template(file)?;
    let receipt = services.enrollment().enroll(&user_id, &raw, scheme)?;

    println!("Enrolled template for user {}", receipt.user_id);
    println!("  Template: {}", receipt.template_id);
    println!("  Scheme: {}", receipt.scheme);
    if receipt.vector_existed {
        println!("  Note: identical template was already enrolled");
    }
    Ok(())
}

fn cmd_register(services: &ServiceContainer, scheme: &'static Scheme, file: &Path) -> Result<()> {
    let raw = read_template(file)?;
    let receipt = services.enrollment().register(&raw, scheme)?;
    println!("Registered template {} ({})", receipt.template_id, receipt.scheme);
    Ok(())
}

fn cmd_identify(services: &ServiceContainer, scheme: &'static Scheme, file: &Path) -> Result<()> {
    let raw = read_template(file)?;
    let hit = services.attendance().identify(&raw, scheme)?;
    println!("Match: {}", hit.template_id);
    println!("  Distance: {} (threshold {})", hit.distance, scheme.threshold);
    Ok(())
}

fn cmd_attend(
    services: &ServiceContainer,
    scheme: &'static Scheme,
    device: &str,
    file: &Path,
) -> Result<()> {
    let device_id = DeviceId::parse(device)?;
    let raw = read_template(file)?;
    let receipt = services.attendance().attend(&device_id, &raw, scheme)?;
    print_attendance(&receipt);
    Ok(())
}

fn cmd_attend_qr(services: &ServiceContainer, device: &str, code: &str) -> Result<()> {
    let device_id = DeviceId::parse(device)?;
    let receipt = services.attendance().attend_by_code(&device_id, code)?;
    print_attendance(&receipt);
    Ok(())
}

fn print_attendance(receipt: &fingerlink::services::AttendanceReceipt) {
    println!(
        "Attendance recorded for {} ({})",
        receipt.full_name, receipt.event.user_id
    );
    println!("  Device: {}", receipt.event.device_id);
    println!("  Time: {}", receipt.event.timestamp.to_rfc3339());
    if let Some(distance) = receipt.distance {
        println!("  Distance: {distance}");
    }
}

fn cmd_enroll_mode(services: &ServiceContainer, user: &str, device: &str) -> Result<()> {
    let receipt = services
        .devices()
        .request_enroll_mode(&UserId::parse(user)?, &DeviceId::parse(device)?)?;
    services.devices().flush(COMMAND_FLUSH_TIMEOUT)?;
    println!("Enroll request sent to {}", receipt.topic);
    Ok(())
}

fn cmd_participant(services: &ServiceContainer, action: ParticipantAction) -> Result<()> {
    let identity = services.identity();
    match action {
        ParticipantAction::Add { user, name, qr } => {
            if name.trim().is_empty() {
                bail!("name is required");
            }
            let participant = Participant {
                user_id: UserId::parse(&user)?,
                full_name: name.trim().to_string(),
                qr_code: qr.filter(|code| !code.trim().is_empty()),
            };
            identity.upsert_participant(&participant)?;
            println!("Saved participant {}", participant.user_id);
        },
        ParticipantAction::Show { user } => {
            let user_id = UserId::parse(&user)?;
            let Some(participant) = identity.participant(&user_id)? else {
                bail!("no participant with user id {user_id}");
            };
            println!("{} ({})", participant.full_name, participant.user_id);
            if let Some(code) = &participant.qr_code {
                println!("  QR code: {code}");
            }
            let enrollments = identity.enrollments_for_user(&user_id)?;
            println!("  Enrollments: {}", enrollments.len());
            for record in enrollments {
                println!(
                    "    {} at {}",
                    record.template_id,
                    record.created_at.to_rfc3339()
                );
            }
        },
    }
    Ok(())
}

fn cmd_history(services: &ServiceContainer, limit: usize) -> Result<()> {
    let events = services.identity().recent_attendance(limit)?;
    if events.is_empty() {
        println!("No attendance recorded");
        return Ok(());
    }
    for event in events {
        let key = event
            .template_id()
            .map_or_else(|| "qr".to_string(), |id| id.as_str().chars().take(12).collect());
        println!(
            "{}  {:<12} {:<12} {}",
            event.timestamp.to_rfc3339(),
            event.user_id,
            event.device_id,
            key
        );
    }
    Ok(())
}

fn cmd_reconcile(services: &ServiceContainer, scheme: &'static Scheme, purge: bool) -> Result<()> {
    let report = services.reconcile().reconcile(scheme, purge)?;
    println!("Scheme: {}", scheme.id);
    println!("  Vectors scanned: {}", report.scanned);
    println!("  Orphans: {}", report.orphans.len());
    for id in &report.orphans {
        println!("    {id}");
    }
    if purge {
        println!("  Purged: {}", report.purged);
    } else if !report.orphans.is_empty() {
        println!("Run with --purge to delete them");
    }
    Ok(())
}

fn cmd_status(services: &ServiceContainer) -> Result<()> {
    println!("Fingerlink Status");
    println!("=================");
    println!();
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Vector backend: {}", services.store().backend_name());
    println!("Active scheme: {}", services.active_scheme().id);
    println!();
    for status in services.reconcile().status()? {
        println!(
            "{:<16} {:<26} dim={:<4} vectors={}",
            status.scheme.as_str(),
            status.index_name,
            status.dimension,
            status.vectors
        );
    }
    Ok(())
}

fn cmd_schemes(config: &FingerlinkConfig) -> Result<()> {
    for scheme in Scheme::all() {
        let marker = if scheme.id == config.active_scheme {
            "*"
        } else {
            " "
        };
        println!("{marker} {scheme}");
    }
    Ok(())
}

fn cmd_config(config: &FingerlinkConfig) -> Result<()> {
    println!("{config}");
    if let Some(path) = FingerlinkConfig::default_path() {
        println!();
        println!("Default config path: {}", path.display());
    }
    Ok(())
}

#[cfg(feature = "http")]
async fn cmd_serve(config: FingerlinkConfig) -> Result<()> {
    let services = tokio::task::spawn_blocking(move || ServiceContainer::from_config(&config))
        .await
        .context("service initialization panicked")?
        .context("failed to connect to the configured stores")?;
    fingerlink::http::serve(services).await?;
    Ok(())
}

#[cfg(not(feature = "http"))]
async fn cmd_serve(_config: FingerlinkConfig) -> Result<()> {
    Err(fingerlink::Error::FeatureNotEnabled("http".to_string()).into())
}
