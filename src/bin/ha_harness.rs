//! ha-harness: continuous-writes HA checks against a MongoDB model
//!
//! Usage:
//!   ha-harness [-m MODEL] start --starting-number 1
//!   ha-harness [-m MODEL] stop
//!   ha-harness [-m MODEL] verify --starting-number 1
//!   ha-harness [-m MODEL] clear
//!   ha-harness [-m MODEL] kill-restart
//!   ha-harness self-heal --upstream /lib/systemd/system/mongod.service

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info, Level};

use ha_harness::orchestrator::JujuCli;
use ha_harness::service_unit::{self, RestartPolicy, OVERRIDE_UNIT_PATH, UPSTREAM_UNIT_PATH};
use ha_harness::storage_reuse::{self, StorageReuseOutcome};
use ha_harness::{cleanup, scenario, topology, verifier, workload};
use ha_harness::{ClusterContext, HarnessConfig, Result};

#[derive(Debug, Parser)]
#[command(name = "ha-harness", version, about = "Continuous-writes HA harness for replicated MongoDB", long_about = None)]
struct Cli {
    /// Juju model (default: the current model)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Use `juju run-action --wait` (Juju 2.9) instead of `juju run`
    #[arg(long, global = true)]
    legacy_actions: bool,

    /// Write generator executable
    #[arg(long, global = true, default_value = "continuous-writes")]
    writer: PathBuf,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the cluster identity, member addresses and connection string
    Resolve,

    /// Start the write generator in the background
    Start {
        #[arg(long, default_value_t = 1)]
        starting_number: i64,
    },

    /// Kill the write generator and print the last written number
    Stop,

    /// Count records in the writes collection
    Count,

    /// Check that the record count matches the last written number
    Verify {
        #[arg(long, default_value_t = 1)]
        starting_number: i64,
    },

    /// Stop the generator and drop the workload collections
    Clear,

    /// Destroy a unit and check a replacement re-uses its storage
    StorageReuse,

    /// SIGKILL the daemon on a random unit under load and verify no writes were lost
    KillRestart,

    /// Install a systemd unit that restarts the daemon when it dies
    SelfHeal {
        #[arg(long, default_value = UPSTREAM_UNIT_PATH)]
        upstream: PathBuf,

        #[arg(long, default_value = OVERRIDE_UNIT_PATH)]
        output: PathBuf,

        /// Skip `systemctl daemon-reload`
        #[arg(long)]
        no_reload: bool,
    },
}

fn log_level(cli: &Cli) -> Level {
    if cli.quiet {
        return Level::WARN;
    }
    match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(log_level(&cli))
        .with_target(false)
        .init();

    let mut juju = JujuCli::new().with_legacy_actions(cli.legacy_actions);
    if let Some(model) = &cli.model {
        juju = juju.with_model(model.clone());
    }
    let signature = cli
        .writer
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| cli.writer.display().to_string());
    let config = HarnessConfig::default().with_writer(cli.writer.clone(), signature);
    let ctx = ClusterContext::live(config, juju);

    match run(&ctx, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(ctx: &ClusterContext, command: Command) -> Result<()> {
    match command {
        Command::Resolve => {
            let descriptor = topology::resolve_descriptor(ctx).await?;
            println!("identity: {}", descriptor.identity());
            println!("hosts:    {}", descriptor.hosts().join(","));
            println!("uri:      {}", descriptor.redacted_uri());
        }
        Command::Start { starting_number } => {
            let descriptor = topology::resolve_descriptor(ctx).await?;
            let pid = workload::start(ctx, &descriptor, starting_number).await?;
            println!("{}", pid.0);
        }
        Command::Stop => match workload::stop(ctx).await? {
            Some(record) => println!("{}", record.number),
            None => println!("no writes"),
        },
        Command::Count => {
            println!("{}", verifier::count_writes(ctx).await?);
        }
        Command::Verify { starting_number } => {
            let result = verifier::verify(ctx, starting_number).await?;
            println!(
                "last={:?} count={} expected={}",
                result.last_acknowledged_number,
                result.observed_count,
                result.expected_count()
            );
            result.ensure_consistent()?;
        }
        Command::Clear => cleanup::clear(ctx).await?,
        Command::StorageReuse => match storage_reuse::run_storage_reuse_scenario(ctx).await? {
            StorageReuseOutcome::Skipped { reason } => println!("skipped: {}", reason),
            StorageReuseOutcome::Completed {
                removed_unit,
                new_unit,
                storage_id,
                reused,
            } => {
                println!(
                    "{} -> {} (storage {}): {}",
                    removed_unit,
                    new_unit,
                    storage_id,
                    if reused { "re-used" } else { "NOT re-used" }
                );
                if !reused {
                    return Err(ha_harness::HarnessError::Scenario(format!(
                        "{} did not re-use storage {}",
                        new_unit, storage_id
                    )));
                }
            }
        },
        Command::KillRestart => {
            let report = scenario::kill_and_verify(ctx).await?;
            info!(
                unit = %report.disrupted_unit,
                before = report.number_before_disruption,
                count = report.verification.observed_count,
                "no acknowledged writes lost"
            );
        }
        Command::SelfHeal {
            upstream,
            output,
            no_reload,
        } => {
            service_unit::install(&upstream, &output, &RestartPolicy::default(), !no_reload)
                .await?;
        }
    }
    Ok(())
}
