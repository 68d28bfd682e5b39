//! vwall-ctl entry point.
//!
//! ```text
//! vwall-ctl gen-config                     Print a sample config TOML
//! vwall-ctl displays                       List configured displays
//! vwall-ctl status                         Query and print every display
//! vwall-ctl power on|off [-d ID]...        Switch displays on or off
//! vwall-ctl volume N [-d ID]...            Set volume (0-100)
//! vwall-ctl input SOURCE [-d ID]...        Select the input source
//! vwall-ctl deploy ASSET [--at T] [-d ID]  Deploy content, now or at T
//! vwall-ctl serve                          Run the daemon until Ctrl-C
//! ```
//!
//! Without `-d` a command targets every configured display.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vwall_ctl::config::CtlConfig;
use vwall_ctl::service::FleetService;
use vwall_core::{
    Command, CommandKind, CommandResult, DeploymentRequest, DirectAsset, DisplayId, InputSource,
    PowerState, TargetOutcome,
};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "vwall-ctl", about = "Video-wall display fleet control")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "vwall.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Print the sample configuration to stdout and exit.
    GenConfig,
    /// List configured displays.
    Displays,
    /// Query every display and print the fleet status.
    Status,
    /// Switch displays on or off.
    Power {
        state: PowerState,
        #[arg(short = 'd', long = "display")]
        displays: Vec<String>,
    },
    /// Set the volume (0-100).
    Volume {
        level: u8,
        #[arg(short = 'd', long = "display")]
        displays: Vec<String>,
    },
    /// Select the input source (hdmi1, hdmi2, display-port, ...).
    Input {
        source: InputSource,
        #[arg(short = 'd', long = "display")]
        displays: Vec<String>,
    },
    /// Deploy content and wait for the outcome.
    Deploy {
        asset: String,
        /// RFC 3339 start time; omitted means now.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        #[arg(short = 'd', long = "display")]
        displays: Vec<String>,
    },
    /// Run health polling and the scheduler until Ctrl-C.
    Serve,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Action::GenConfig = cli.command {
        let text = toml::to_string_pretty(&CtlConfig::sample())?;
        println!("{text}");
        return Ok(());
    }

    let config = CtlConfig::load(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("vwall-ctl v{}", env!("CARGO_PKG_VERSION"));
    if !cli.config.exists() {
        info!("no config at {}; using defaults", cli.config.display());
    }
    let service = FleetService::new(config).await?;

    match cli.command {
        Action::GenConfig => {}
        Action::Displays => {
            println!("{:<16} {:<24} {:<11} {:<28} MDC", "ID", "NAME", "PROTOCOL", "ADDRESS");
            for ep in service.registry().list() {
                println!(
                    "{:<16} {:<24} {:<11} {:<28} {}",
                    ep.id,
                    ep.name,
                    ep.protocol.to_string(),
                    ep.address,
                    ep.mdc_id
                );
            }
        }
        Action::Status => {
            let status_query = Command::new("*", CommandKind::Status);
            let results = service.dispatcher().broadcast_all(&status_query).await;
            print_results(&results);
            println!();
            print_snapshot(&service);
        }
        Action::Power { state, displays } => {
            run_command(&service, CommandKind::Power(state), &displays).await;
        }
        Action::Volume { level, displays } => {
            run_command(&service, CommandKind::Volume(level), &displays).await;
        }
        Action::Input { source, displays } => {
            run_command(&service, CommandKind::Input(source), &displays).await;
        }
        Action::Deploy {
            asset,
            at,
            displays,
        } => {
            let scheduler = service.start_scheduler().await?;
            let targets = service.resolve_targets(&displays);
            let id = scheduler
                .schedule_from_source(&DirectAsset, &asset, targets, at)
                .await?;
            println!("job {id} accepted");
            let job = scheduler.wait_until_settled(&id).await?;
            println!("job {id}: {}", job.phase);
            for (display, outcome) in &job.outcomes {
                match outcome {
                    TargetOutcome::Success { attempts, .. } => {
                        println!("  {display:<16} ok ({attempts} attempts)")
                    }
                    TargetOutcome::PermanentlyFailed { error, .. } => {
                        println!("  {display:<16} FAILED {error}")
                    }
                    TargetOutcome::Pending => println!("  {display:<16} pending"),
                }
            }
            scheduler.shutdown().await;
        }
        Action::Serve => {
            let shutdown = CancellationToken::new();
            let trigger = shutdown.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Ctrl-C received, shutting down");
                trigger.cancel();
            });
            service.run(shutdown).await?;
        }
    }

    service.registry().teardown_all().await;
    Ok(())
}

async fn run_command(service: &FleetService, kind: CommandKind, displays: &[String]) {
    let targets: Vec<DisplayId> = service.resolve_targets(displays);
    let command = Command::new("*", kind);
    let results = service.dispatcher().broadcast(&command, &targets).await;
    print_results(&results);
}

fn print_results(results: &BTreeMap<DisplayId, CommandResult>) {
    for (id, result) in results {
        match &result.outcome {
            Ok(reply) => println!(
                "{id:<16} ok     {:>6} ms  {reply:?}",
                result.latency.as_millis()
            ),
            Err(e) => println!(
                "{id:<16} FAILED {:>6} ms  {e} (attempts: {})",
                result.latency.as_millis(),
                result.attempts
            ),
        }
    }
}

fn print_snapshot(service: &FleetService) {
    let snapshot = service.status().get_snapshot();
    println!(
        "{:<16} {:<13} {:<6} {:<7} {:<13} {:<9} LAST SEEN",
        "ID", "LINK", "POWER", "VOLUME", "INPUT", "FAILURES"
    );
    let dash = || "-".to_string();
    for (id, st) in &snapshot.displays {
        println!(
            "{:<16} {:<13} {:<6} {:<7} {:<13} {:<9} {}",
            id.to_string(),
            st.link.to_string(),
            st.values.power.map(|p| p.to_string()).unwrap_or_else(dash),
            st.values.volume.map(|v| v.to_string()).unwrap_or_else(dash),
            st.values.input.map(|i| i.to_string()).unwrap_or_else(dash),
            st.failures,
            st.last_seen.map(|t| t.to_rfc3339()).unwrap_or_else(dash),
        );
    }
}
