//! decktune - command line entry point.
//!
//! Wires configuration, logging and a single-threaded tokio runtime to the
//! services. Every privileged step goes through `sudo` unless `--no-sudo`
//! is given (or `commands.use_sudo` is off in `decktune.yaml`).
//!
//! A failing command logs the error and exits with status 1.

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};
use decktune::logging::{LOG_PREFIX, default_log_dir, setup_logging_with_console};
use decktune::models::{GIB, home_dir};
use decktune::services::{
    GameDataMover, StatvfsProbe, SteamLibraries, SwapManager, SystemRunner, TweakAction,
    TweakService, apply_recommended, apply_stock,
};
use decktune::{APP_NAME, ConfigManager, Metrics, StateChange, StateManager, TuneConfig, Tunable, VERSION};
use std::process;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(name = "decktune", version)]
#[command(about = "Swap, kernel memory tweaks and game data placement for the Steam Deck", long_about = None)]
struct Cli {
    /// Directory holding decktune.yaml (default: ~/.decktune)
    #[arg(long, global = true)]
    config_dir: Option<Utf8PathBuf>,

    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,

    /// Run privileged commands directly instead of through sudo
    #[arg(long, global = true)]
    no_sudo: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resize the swap file, in GB
    Swap { size_gb: u32 },

    /// List the swap sizes that fit on disk
    SwapSizes,

    /// Set vm.swappiness (0-200)
    Swappiness {
        #[arg(value_parser = clap::value_parser!(u32).range(0..=200))]
        value: u32,
    },

    /// Enable, revert, toggle or show one memory tweak
    Tweak {
        /// swappiness, hugepages, compaction_proactiveness, defrag,
        /// page_lock_unfairness or shmem_enabled
        tunable: Tunable,

        #[arg(value_enum)]
        action: TweakCommand,
    },

    /// Show swap and every tunable
    Status,

    /// Apply every recommended setting
    Recommended,

    /// Revert every setting to stock
    Stock,

    /// Move game data next to the library that owns the game
    SyncData {
        left: Utf8PathBuf,
        right: Utf8PathBuf,

        /// Only show what would move
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete compat data and shader caches
    CleanData {
        /// Also remove data of every game no library has installed
        #[arg(long)]
        uninstalled: bool,

        /// Game IDs to remove
        ids: Vec<u32>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TweakCommand {
    Enable,
    Revert,
    Toggle,
    Status,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        tracing::error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let _guard = setup_logging_with_console(&default_log_dir(), LOG_PREFIX, cli.debug, true)?;
    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let config_dir = cli
        .config_dir
        .unwrap_or_else(|| home_dir().join(".decktune"));
    let config_manager = ConfigManager::new(&config_dir)?;
    let mut config = config_manager.load()?;
    if cli.no_sudo {
        config.commands.use_sudo = false;
    }

    // Commands run one at a time; a single thread is enough
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    let metrics = Arc::new(Metrics::new());
    let state = StateManager::new();
    let ctx = App {
        runner: Arc::new(SystemRunner::new(
            config.commands.use_sudo,
            Arc::clone(&metrics),
        )),
        config,
        state,
        metrics: Arc::clone(&metrics),
    };

    let result = runtime.block_on(async {
        tokio::spawn(report_progress(ctx.state.subscribe()));
        execute(cli.command, &ctx).await
    });

    metrics.log_summary();
    result
}

struct App {
    runner: Arc<SystemRunner>,
    config: TuneConfig,
    state: StateManager,
    metrics: Arc<Metrics>,
}

impl App {
    fn tweaks(&self) -> TweakService<SystemRunner> {
        TweakService::new(Arc::clone(&self.runner), self.config.kernel.clone())
            .with_state(self.state.clone())
            .with_metrics(Arc::clone(&self.metrics))
    }

    fn swap(&self) -> Result<SwapManager<SystemRunner, StatvfsProbe>> {
        let swap = SwapManager::new(
            Arc::clone(&self.runner),
            StatvfsProbe,
            self.config.swap.clone(),
            self.config.kernel.clone(),
        )?;
        Ok(swap
            .with_state(self.state.clone())
            .with_metrics(Arc::clone(&self.metrics)))
    }

    fn mover(&self) -> GameDataMover<SteamLibraries> {
        let libraries = SteamLibraries::new(self.config.game_data.steam_root.clone());
        GameDataMover::new(libraries, self.config.game_data.clone())
            .with_state(self.state.clone())
            .with_metrics(Arc::clone(&self.metrics))
    }
}

async fn execute(command: Command, ctx: &App) -> Result<()> {
    match command {
        Command::Swap { size_gb } => {
            ctx.swap()?.change_size(size_gb).await?;
            println!("Swap file resized to {} GB", size_gb);
        }
        Command::SwapSizes => {
            for option in ctx.swap()?.available_sizes()? {
                println!("{}", option);
            }
        }
        Command::Swappiness { value } => {
            ctx.swap()?.change_swappiness(value).await?;
            println!("Swappiness set to {}", value);
        }
        Command::Tweak { tunable, action } => run_tweak(ctx, tunable, action).await?,
        Command::Status => print_status(ctx).await?,
        Command::Recommended => {
            apply_recommended(&ctx.swap()?, &ctx.tweaks()).await?;
            println!("All settings configured");
        }
        Command::Stock => {
            apply_stock(&ctx.swap()?, &ctx.tweaks()).await?;
            println!("All settings reverted to stock");
        }
        Command::SyncData {
            left,
            right,
            dry_run,
        } => {
            let mover = ctx.mover();
            let moves = mover.plan(&left, &right)?;
            println!(
                "To {}: {:?} ({})",
                left,
                moves.to_left,
                format_gib(moves.to_left_bytes)
            );
            println!(
                "To {}: {:?} ({})",
                right,
                moves.to_right,
                format_gib(moves.to_right_bytes)
            );
            if dry_run || moves.is_empty() {
                return Ok(());
            }
            mover.move_game_data(&moves, &left, &right).await?;
            mover.verify(&moves, &left, &right)?;
            println!("Moved {} game(s)", moves.total());
        }
        Command::CleanData { uninstalled, ids } => {
            let mover = ctx.mover();
            let locations = mover.data_locations()?;
            let mut targets = ids;
            if uninstalled {
                targets.extend(mover.uninstalled_game_ids(&locations)?);
            }
            targets.sort_unstable();
            targets.dedup();

            if targets.is_empty() {
                println!("Nothing to remove");
                return Ok(());
            }
            let removed = mover.remove_game_data(&targets, &locations)?;
            println!("Removed {} director(ies) for {} game(s)", removed, targets.len());
        }
    }
    Ok(())
}

async fn run_tweak(ctx: &App, tunable: Tunable, action: TweakCommand) -> Result<()> {
    let tweaks = ctx.tweaks();
    match action {
        TweakCommand::Enable => {
            tweaks.enable(tunable).await?;
            println!("{} set to {}", tunable.label(), tunable.recommended());
        }
        TweakCommand::Revert => {
            tweaks.revert(tunable).await?;
            println!("{} set to {}", tunable.label(), tunable.default_value());
        }
        TweakCommand::Toggle => match tweaks.toggle(tunable).await? {
            TweakAction::Enabled => println!("{} enabled", tunable.label()),
            TweakAction::Reverted => println!("{} reverted", tunable.label()),
        },
        TweakCommand::Status => println!("{}", tweaks.status(tunable).await?),
    }
    Ok(())
}

async fn print_status(ctx: &App) -> Result<()> {
    match ctx.swap() {
        Ok(swap) => match swap.current_state().await {
            Ok(state) => println!(
                "Swap file: {} ({}), swappiness {}",
                state.file_path,
                format_gib(state.current_size_bytes),
                state.current_swappiness
            ),
            Err(e) => println!("Swap file: {} unavailable ({:#})", swap.swap_file(), e),
        },
        Err(e) => println!("Swap file: unavailable ({:#})", e),
    }

    for (tunable, value) in ctx.tweaks().status_all().await {
        let value = match value {
            Ok(value) => value,
            Err(e) => {
                println!("{:<28} {:<10} ({:#})", tunable.label(), "unavailable", e);
                continue;
            }
        };
        let marker = if value == tunable.recommended() {
            "recommended"
        } else if value == tunable.default_value() {
            "stock"
        } else {
            "custom"
        };
        println!("{:<28} {:<10} {}", tunable.label(), value, marker);
    }
    Ok(())
}

/// Log move progress as the mover reports it.
async fn report_progress(mut rx: broadcast::Receiver<StateChange>) {
    loop {
        match rx.recv().await {
            Ok(StateChange::MoveProgressUpdated {
                completed,
                total,
                current_game: Some(game),
            }) => tracing::info!("[{}/{}] moving {}", completed + 1, total, game),
            Ok(StateChange::SwapPhaseChanged { phase }) if phase.is_active() => {
                tracing::info!("Swap: {}", phase)
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("Progress reporter skipped {} events", skipped)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn format_gib(bytes: u64) -> String {
    format!("{:.2} GiB", bytes as f64 / GIB as f64)
}
