//! Audio identities, handles and the engine error taxonomy
//!
//! Everything here is engine-agnostic. The live mixer lives behind the
//! [`Mixer`](crate::domain::mixer::Mixer) trait and hands back the opaque
//! handles defined in this module.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by bus, filter and voice operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Referenced bus does not exist
    #[error("Bus not found: {0}")]
    BusNotFound(String),

    /// Referenced filter type is not registered
    #[error("Filter not found: {0}")]
    FilterNotFound(String),

    /// Filter exists but has no parameter with that name
    #[error("Filter parameter not found: {filter}.{param}")]
    FilterParamNotFound { filter: String, param: String },

    /// Sound asset was never registered
    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    /// Audio object was never registered
    #[error("Audio object not found: {0}")]
    ObjectNotFound(u64),

    /// Empty name, bad index, or an operation forbidden on Master
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Name collision on create or rename
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The mixing engine rejected the operation
    #[error("Engine failure: {0}")]
    EngineFailure(String),
}

/// Coarse classification of [`EngineError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    Conflict,
    EngineFailure,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::BusNotFound(_)
            | EngineError::FilterNotFound(_)
            | EngineError::FilterParamNotFound { .. }
            | EngineError::AssetNotFound(_)
            | EngineError::ObjectNotFound(_) => ErrorKind::NotFound,
            EngineError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::EngineFailure(_) => ErrorKind::EngineFailure,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Live mixer bus handle, valid only while its bus is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusHandle(u64);

impl BusHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Live mixer voice handle
///
/// A handle may outlive the voice it refers to; the mixer reports such
/// handles as invalid and ignores calls made through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceHandle(u64);

impl VoiceHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Identity of a game-side audio object (emitter)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Canonical identity of a sound asset
///
/// Built from a path and normalized so that `Sounds\\Hit.wav`,
/// `sounds//hit.wav` and `./sounds/hit.wav` all name the same asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct AssetId(Arc<str>);

impl AssetId {
    pub fn new(path: &str) -> Self {
        Self(Arc::from(canonicalize_asset_path(path)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for AssetId {
    fn from(path: String) -> Self {
        Self::new(&path)
    }
}

impl From<&str> for AssetId {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<AssetId> for String {
    fn from(id: AssetId) -> Self {
        id.0.to_string()
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn canonicalize_asset_path(path: &str) -> String {
    let unified = path.trim().replace('\\', "/").to_lowercase();
    let rooted = unified.starts_with('/');
    let segments: Vec<&str> = unified
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect();

    let joined = segments.join("/");
    if rooted {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Decoded, in-memory sample data for one asset
#[derive(Debug, Clone)]
pub struct AssetData {
    /// Interleaved samples in -1.0..=1.0
    pub samples: Arc<[f32]>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl AssetData {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples: Arc::from(samples),
            channels: channels.max(1),
            sample_rate,
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Output speaker layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SpeakerConfiguration {
    Mono,
    #[default]
    Stereo,
    Quad,
    Surround51,
    Surround71,
}

impl SpeakerConfiguration {
    pub fn channels(&self) -> u16 {
        match self {
            SpeakerConfiguration::Mono => 1,
            SpeakerConfiguration::Stereo => 2,
            SpeakerConfiguration::Quad => 4,
            SpeakerConfiguration::Surround51 => 6,
            SpeakerConfiguration::Surround71 => 8,
        }
    }
}

/// Position in world space
pub type Vec3 = [f32; 3];

/// Listener placement used for 3D attenuation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Listener {
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            forward: [0.0, 0.0, -1.0],
            up: [0.0, 1.0, 0.0],
        }
    }
}
