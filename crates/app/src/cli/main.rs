//! Tenuto CLI Application

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tenuto_core::domain::{
    AssetId, AudioEngine, BusLayoutData, ConfigManager, EngineConfig, FilterCatalog, LayoutWatcher,
    ObjectId, Request, TriggerDef, TriggerParams, MASTER_BUS,
};
use tenuto_infra::audio::read_wav;
use tenuto_infra::{AudioService, OutputStream, SoftMixer};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "tenuto")]
#[command(about = "Audio bus graph and voice routing engine", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config directory (defaults to the platform config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect and create bus layout files
    #[command(subcommand)]
    Layout(LayoutCommand),

    /// List the built-in filter catalog
    Filters,

    /// Play a WAV file through the default output device
    Play {
        wav: PathBuf,

        /// Bus layout to load before playing
        #[arg(long)]
        layout: Option<PathBuf>,

        #[arg(long, default_value = MASTER_BUS)]
        bus: String,

        #[arg(long, default_value_t = 1.0)]
        volume: f32,

        #[arg(long)]
        looping: bool,

        /// Stop after this many seconds (defaults to the file's length)
        #[arg(long)]
        seconds: Option<f64>,
    },

    /// Manage the engine configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum LayoutCommand {
    /// Print a layout as JSON
    Show { file: PathBuf },
    /// Load a layout into a scratch engine and report the result
    Check { file: PathBuf },
    /// Write a layout containing only the master bus
    New { file: PathBuf },
    /// Check every layout written to a directory until interrupted
    Watch { dir: PathBuf },
}

#[derive(Subcommand)]
enum ConfigCommand {
    Show,
    Path,
    /// Overwrite the config file with defaults
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => ConfigManager::default_config_dir()?,
    };
    let manager = ConfigManager::new(config_dir);

    match cli.command {
        Command::Layout(command) => layout(command).await,
        Command::Filters => filters(),
        Command::Play {
            wav,
            layout,
            bus,
            volume,
            looping,
            seconds,
        } => {
            let config = manager.load().await;
            let params = TriggerParams {
                bus,
                volume,
                looping,
                ..TriggerParams::default()
            };
            play(&manager, &config, wav, layout, params, seconds).await
        }
        Command::Config(command) => config(&manager, command).await,
    }
}

async fn layout(command: LayoutCommand) -> anyhow::Result<()> {
    match command {
        LayoutCommand::Show { file } => {
            let layout = BusLayoutData::load_from_file(&file).await?;
            println!("{}", layout.to_json_string()?);
        }
        LayoutCommand::Check { file } => {
            for bus in check_layout(&file).await? {
                println!("{bus}");
            }
            println!("{} is valid", file.display());
        }
        LayoutCommand::New { file } => {
            if file.exists() {
                bail!("{} already exists", file.display());
            }
            let mut engine = AudioEngine::new(
                Arc::new(SoftMixer::new(&EngineConfig::default())),
                FilterCatalog::with_builtins(),
            );
            engine.reset_layout()?;
            engine.gather_layout().save_to_file(&file).await?;
            info!(path = %file.display(), "Layout written");
        }
        LayoutCommand::Watch { dir } => {
            let watcher = LayoutWatcher::new(dir.clone()).await?;
            let mut changes = watcher.subscribe();
            info!(dir = %dir.display(), "Watching layouts");
            loop {
                tokio::select! {
                    changed = changes.recv() => {
                        let path = match changed {
                            Ok(path) => path,
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(skipped, "Missed layout changes");
                                continue;
                            }
                            Err(RecvError::Closed) => break,
                        };
                        match check_layout(&path).await {
                            Ok(buses) => println!("{}: ok ({} buses)", path.display(), buses.len()),
                            Err(e) => println!("{}: {:#}", path.display(), e),
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
    }
    Ok(())
}

/// Load a layout into a scratch engine, returning its bus names
async fn check_layout(file: &Path) -> anyhow::Result<Vec<String>> {
    let layout = BusLayoutData::load_from_file(file).await?;
    let mixer = Arc::new(SoftMixer::new(&EngineConfig::default()));
    let mut engine = AudioEngine::new(mixer, FilterCatalog::with_builtins());
    engine
        .load_layout(&layout)
        .with_context(|| format!("{} is not a valid layout", file.display()))?;
    Ok(engine.graph().bus_names())
}

fn filters() -> anyhow::Result<()> {
    for filter in FilterCatalog::with_builtins().all_filter_data() {
        println!("{}", filter.name);
        for param in &filter.params {
            println!(
                "  {:<12} {:?} [{} .. {}] default {}",
                param.name, param.kind, param.min, param.max, param.value
            );
        }
    }
    Ok(())
}

async fn play(
    manager: &ConfigManager,
    config: &EngineConfig,
    wav: PathBuf,
    layout: Option<PathBuf>,
    params: TriggerParams,
    seconds: Option<f64>,
) -> anyhow::Result<()> {
    info!("🎼 Tenuto starting...");

    let data = read_wav(&wav).with_context(|| format!("Failed to read {}", wav.display()))?;
    let duration = data.duration_secs();
    if data.sample_rate != config.sample_rate {
        debug!(
            file_rate = data.sample_rate,
            engine_rate = config.sample_rate,
            "Resampling asset to the engine rate"
        );
    }

    let mixer = Arc::new(SoftMixer::new(config));
    let _stream = OutputStream::open_default(mixer.clone(), config.buffer_size)?;

    let engine = AudioEngine::new(mixer, FilterCatalog::with_builtins());
    let service = AudioService::spawn(engine, Duration::from_millis(config.update_interval_ms))?;
    let handle = service.handle();

    handle.try_execute(Request::ResetLayout).await?;
    let loaded = match (layout, &config.default_layout) {
        (Some(path), _) => Some(handle.load_layout_file(&path).await?),
        (None, Some(name)) => {
            let layout = manager.layout_library(config).load_layout(name).await?;
            Some(handle.try_execute(Request::LoadLayout { layout }).await?)
        }
        (None, None) => None,
    };
    if let Some(failed) = loaded.iter().flatten().find(|n| !n.success()) {
        bail!("Layout rejected: {:?}", failed.outcome());
    }

    let asset = AssetId::new(&wav.to_string_lossy());
    let object = ObjectId::new(1);
    let requests = [
        Request::RegisterAsset {
            asset: asset.clone(),
            data,
        },
        Request::ActivateTrigger {
            object,
            trigger: TriggerDef::new(asset, params),
        },
    ];
    for request in requests {
        for notification in handle.try_execute(request).await? {
            if !notification.success() {
                bail!("Playback failed: {:?}", notification.outcome());
            }
        }
    }

    let wait = seconds.unwrap_or(duration);
    if !wait.is_finite() || wait < 0.0 {
        bail!("--seconds must be a non-negative number");
    }
    info!(file = %wav.display(), seconds = wait, "Playing");
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs_f64(wait)) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    handle.try_execute(Request::StopAllSounds).await?;
    service.shutdown();
    Ok(())
}

async fn config(manager: &ConfigManager, command: ConfigCommand) -> anyhow::Result<()> {
    match command {
        ConfigCommand::Show => {
            let config = manager.load().await;
            println!("{config:#?}");
        }
        ConfigCommand::Path => println!("{}", manager.config_path().display()),
        ConfigCommand::Reset => {
            manager.save(&EngineConfig::default()).await?;
            info!(path = %manager.config_path().display(), "Config reset to defaults");
        }
    }
    Ok(())
}
