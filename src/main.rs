use activity_player::{
    config::{ConfigManager, EnvConfigManager, PlayerConfig},
    hub::{Credentials, HttpHubClient, HubClient},
    logger::init_tracing,
    orchestrator::{OrchestratorOptions, SequenceOrchestrator, SurfaceBinding},
    runner::{RunnerConfig, run_sequence},
};
use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use player_channel::{ChannelConfig, ProcessSurface, Surface, SurfaceId};
use std::{
    env,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "activity_player",
    about = "Plays Hub activity sequences through rendering surfaces",
    version = "0.2.0"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a sequence from start to finish
    Run(RunArgs),

    /// Print the Hub's report for a sequence
    Report(ReportArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Sequence URL, absolute or relative to PLAYER_HUB_URL
    #[arg(long)]
    sequence_url: String,

    /// Number of rendering slots (overrides PLAYER_SLOTS)
    #[arg(long)]
    slots: Option<usize>,

    /// Executable started once per slot as its surface (overrides PLAYER_SURFACE_CMD)
    #[arg(long)]
    surface_cmd: Option<PathBuf>,

    /// Extra argument passed to every surface process
    #[arg(long = "surface-arg")]
    surface_args: Vec<String>,

    /// Wait for PlayerReady before assuming a surface is ready
    #[arg(long)]
    ready_timeout_ms: Option<u64>,

    /// Wait for the results of one round
    #[arg(long)]
    result_timeout_ms: Option<u64>,

    /// Optional log level override (e.g. error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Args, Debug)]
struct ReportArgs {
    /// Id of the sequence to report on
    #[arg(long)]
    sequence_id: String,

    #[arg(long, default_value = "warn")]
    log_level: String,
}

/// Resolve the player root directory from the environment or use default.
pub fn resolve_root_dir() -> PathBuf {
    if let Ok(path) = env::var("PLAYER_ROOT") {
        PathBuf::from(path)
    } else {
        PathBuf::from("./player")
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let root = resolve_root_dir();
    match cli.command {
        Commands::Run(args) => {
            init_tracing(
                &root,
                "logs/player_logs.log",
                "logs/player_events.log",
                &args.log_level,
            )?;
            let config = load_config(&root).await?;
            run(config, args).await
        }
        Commands::Report(args) => {
            init_tracing(
                &root,
                "logs/player_report.log",
                "logs/player_events.log",
                &args.log_level,
            )?;
            let config = load_config(&root).await?;
            let hub = HttpHubClient::new(&config.hub_url)?;
            let report = hub
                .fetch_report(&args.sequence_id, &credentials(&config))
                .await?;
            match report {
                Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                None => println!("No report for sequence `{}`.", args.sequence_id),
            }
            Ok(())
        }
    }
}

async fn load_config(root: &Path) -> anyhow::Result<PlayerConfig> {
    let env_file = root.join("config").join(".env");
    let config_mgr = ConfigManager(EnvConfigManager::new(env_file));
    PlayerConfig::from_manager(&config_mgr).await
}

fn credentials(config: &PlayerConfig) -> Credentials {
    match &config.hub_token {
        Some(token) => Credentials::bearer(token.clone()),
        None => Credentials::anonymous(),
    }
}

async fn run(mut config: PlayerConfig, args: RunArgs) -> anyhow::Result<()> {
    if let Some(slots) = args.slots {
        config.slots = slots;
    }
    if let Some(cmd) = args.surface_cmd {
        config.surface_cmd = Some(cmd);
    }
    if let Some(ms) = args.ready_timeout_ms {
        config.ready_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = args.result_timeout_ms {
        config.result_timeout = Duration::from_millis(ms);
    }
    if config.slots == 0 {
        bail!("at least one slot is needed");
    }
    let Some(surface_cmd) = config.surface_cmd.clone() else {
        let err = "no surface command: pass --surface-cmd or set PLAYER_SURFACE_CMD";
        error!("{}", err);
        bail!(err);
    };

    info!(hub = %config.hub_url, slots = config.slots, "activity player starting up…");

    let mut surfaces: Vec<SurfaceBinding> = Vec::with_capacity(config.slots);
    for slot in 0..config.slots {
        let id = SurfaceId::new(format!("slot-{slot}"));
        let (surface, inbound) = ProcessSurface::spawn(id, &surface_cmd, &args.surface_args)
            .await
            .with_context(|| format!("starting surface `{}`", surface_cmd.display()))?;
        surfaces.push((surface as Arc<dyn Surface>, inbound));
    }

    let hub: Arc<dyn HubClient> = Arc::new(HttpHubClient::new(&config.hub_url)?);
    let options = OrchestratorOptions {
        credentials: credentials(&config),
        channel: ChannelConfig {
            ready_timeout: config.ready_timeout,
        },
        duplicate_policy: config.duplicate_policy,
        ..Default::default()
    };

    let mut orchestrator = SequenceOrchestrator::load(hub, &args.sequence_url, surfaces, options)
        .await
        .with_context(|| format!("loading sequence `{}`", args.sequence_url))?;

    let runner = RunnerConfig {
        result_timeout: config.result_timeout,
    };
    let summary = tokio::select! {
        summary = run_sequence(&mut orchestrator, &runner) => summary?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, stopping");
            println!("\nInterrupted.");
            return Ok(());
        }
    };

    println!(
        "Sequence `{}` finished: {} round(s), {} result(s) collected.",
        orchestrator.sequence().sequence_id,
        summary.rounds,
        summary.results
    );
    if let Some(report) = summary.report {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}
