//! Configuration management for Tenuto
//!
//! This module provides:
//! - Engine configuration with TOML serialization
//! - A named bus-layout library backed by a directory of JSON files
//! - Hot-reload support for layouts via a file system watcher

use crate::domain::audio::SpeakerConfiguration;
use crate::domain::layout::{BusLayoutData, LayoutError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// File extension of layouts stored in a [`LayoutLibrary`]
pub const LAYOUT_EXTENSION: &str = "buslayout.json";

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("File watch error: {0}")]
    WatchError(#[from] notify::Error),

    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Layout not found: {0}")]
    LayoutNotFound(String),
}

/// Output stage limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ClipperMode {
    Hard,
    #[default]
    RoundOff,
}

impl ClipperMode {
    /// Clip one output sample; the post-clip scaler is applied afterwards
    pub fn apply(&self, sample: f32) -> f32 {
        match self {
            ClipperMode::Hard => sample.clamp(-1.0, 1.0),
            ClipperMode::RoundOff => {
                // Cubic soft knee, flat beyond +-1.65
                let x = sample.clamp(-1.65, 1.65);
                0.87 * x - 0.1 * x * x * x
            }
        }
    }
}

/// Engine-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,

    pub speaker_configuration: SpeakerConfiguration,

    /// Voices mixed at once; the quietest beyond this are virtualized
    pub max_active_voices: u32,

    /// Voices that may exist at once, audible or not
    pub voice_capacity: u32,

    pub clipper: ClipperMode,

    pub post_clip_scaler: f32,

    /// Output buffer size in frames
    pub buffer_size: u32,

    /// Control thread tick
    pub update_interval_ms: u64,

    /// Directory of the layout library
    pub layout_dir: PathBuf,

    /// Layout loaded at startup, by library name
    pub default_layout: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            speaker_configuration: SpeakerConfiguration::Stereo,
            max_active_voices: 16,
            voice_capacity: 1024,
            clipper: ClipperMode::RoundOff,
            post_clip_scaler: 0.95,
            buffer_size: 512,
            update_interval_ms: 16,
            layout_dir: PathBuf::from("layouts"),
            default_layout: None,
        }
    }
}

impl EngineConfig {
    pub const MAX_ACTIVE_VOICES: u32 = 1023;

    pub fn validate(&self) -> Result<()> {
        if !(8000..=192_000).contains(&self.sample_rate) {
            return Err(ConfigError::Invalid(format!(
                "sample_rate {} is outside 8000..=192000",
                self.sample_rate
            )));
        }
        if !(1..=Self::MAX_ACTIVE_VOICES).contains(&self.max_active_voices) {
            return Err(ConfigError::Invalid(format!(
                "max_active_voices {} is outside 1..={}",
                self.max_active_voices,
                Self::MAX_ACTIVE_VOICES
            )));
        }
        if self.voice_capacity < self.max_active_voices {
            return Err(ConfigError::Invalid(format!(
                "voice_capacity {} is below max_active_voices {}",
                self.voice_capacity, self.max_active_voices
            )));
        }
        if !(self.post_clip_scaler > 0.0 && self.post_clip_scaler <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "post_clip_scaler {} is outside (0, 1]",
                self.post_clip_scaler
            )));
        }
        if self.buffer_size == 0 || self.update_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "buffer_size and update_interval_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn channels(&self) -> u16 {
        self.speaker_configuration.channels()
    }

    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;

        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }
}

/// File system watcher for layout hot-reload
pub struct LayoutWatcher {
    _watcher: notify::RecommendedWatcher,
    layout_tx: broadcast::Sender<PathBuf>,
}

impl LayoutWatcher {
    pub async fn new(layout_dir: PathBuf) -> Result<Self> {
        use notify::Watcher;

        let (layout_tx, _layout_rx) = broadcast::channel(32);
        fs::create_dir_all(&layout_dir).await?;

        let tx = layout_tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else { return };
            if !matches!(
                event.kind,
                notify::EventKind::Create(_) | notify::EventKind::Modify(_)
            ) {
                return;
            }
            for path in event.paths.into_iter().filter(|p| is_layout_file(p)) {
                // No subscribers is not an error
                if tx.receiver_count() > 0 {
                    if let Err(e) = tx.send(path) {
                        error!("Failed to send layout change event: {}", e);
                    }
                }
            }
        })?;

        watcher.watch(&layout_dir, notify::RecursiveMode::NonRecursive)?;
        info!(path = %layout_dir.display(), "Layout watcher started");

        Ok(Self {
            _watcher: watcher,
            layout_tx,
        })
    }

    /// Paths of created or modified layouts
    pub fn subscribe(&self) -> broadcast::Receiver<PathBuf> {
        self.layout_tx.subscribe()
    }
}

fn is_layout_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| n.ends_with(&format!(".{}", LAYOUT_EXTENSION)))
}

/// Named bus layouts stored as `<name>.buslayout.json`
pub struct LayoutLibrary {
    layout_dir: PathBuf,
}

impl LayoutLibrary {
    pub fn new(layout_dir: PathBuf) -> Self {
        Self { layout_dir }
    }

    pub fn dir(&self) -> &Path {
        &self.layout_dir
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.layout_dir.join(format!("{}.{}", name, LAYOUT_EXTENSION))
    }

    #[instrument(skip(self))]
    pub async fn list_layouts(&self) -> Result<Vec<String>> {
        let mut layouts = Vec::new();
        if !self.layout_dir.exists() {
            return Ok(layouts);
        }

        let mut entries = fs::read_dir(&self.layout_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(name) = file_name.strip_suffix(&format!(".{}", LAYOUT_EXTENSION)) {
                layouts.push(name.to_string());
            }
        }

        layouts.sort();
        debug!(count = layouts.len(), "Listed layouts");
        Ok(layouts)
    }

    #[instrument(skip(self))]
    pub async fn load_layout(&self, name: &str) -> Result<BusLayoutData> {
        let path = self.path_of(name);
        if !path.exists() {
            return Err(ConfigError::LayoutNotFound(name.to_string()));
        }
        Ok(BusLayoutData::load_from_file(&path).await?)
    }

    #[instrument(skip(self, layout))]
    pub async fn save_layout(&self, name: &str, layout: &BusLayoutData) -> Result<()> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!("invalid layout name '{}'", name)));
        }
        layout.save_to_file(self.path_of(name)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_layout(&self, name: &str) -> Result<()> {
        let path = self.path_of(name);
        if !path.exists() {
            return Err(ConfigError::LayoutNotFound(name.to_string()));
        }

        fs::remove_file(&path).await?;
        info!(name, "Layout deleted");
        Ok(())
    }

    pub fn layout_exists(&self, name: &str) -> bool {
        self.path_of(name).exists()
    }
}

/// Manages `config.toml` under the user's config directory
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_path = config_dir.join("config.toml");
        Self {
            config_dir,
            config_path,
        }
    }

    /// `~/.config/tenuto` on Linux, `%APPDATA%\tenuto` on Windows
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("tenuto"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Layout library resolved against the config directory
    pub fn layout_library(&self, config: &EngineConfig) -> LayoutLibrary {
        let dir = if config.layout_dir.is_absolute() {
            config.layout_dir.clone()
        } else {
            self.config_dir.join(&config.layout_dir)
        };
        LayoutLibrary::new(dir)
    }

    /// Load configuration from file
    ///
    /// A missing file yields (and writes) the defaults. A corrupt file is
    /// backed up to `config.toml.corrupt` and replaced by the defaults.
    #[instrument(skip(self))]
    pub async fn load(&self) -> EngineConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Config file not found, creating default"
            );

            let config = EngineConfig::default();
            if let Err(e) = config.save_to_file(&self.config_path).await {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to save default config"
                );
            }
            return config;
        }

        match EngineConfig::load_from_file(&self.config_path).await {
            Ok(config) => config,
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load config, using defaults"
                );

                let backup_path = self.config_path.with_extension("toml.corrupt");
                if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
                    error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt config"
                    );
                }

                EngineConfig::default()
            }
        }
    }

    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &EngineConfig) -> Result<()> {
        config.validate()?;
        fs::create_dir_all(&self.config_dir).await?;
        config.save_to_file(&self.config_path).await
    }

    /// Delete the config file
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        if self.config_path.exists() {
            fs::remove_file(&self.config_path).await?;
            info!(path = %self.config_path.display(), "Configuration cleared");
        }
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }
}
