//! Mixer primitive and gain conversion
//!
//! The bus graph and voice tracker drive a real-time mixer through the
//! [`Mixer`] trait: play/stop/volume/filter calls on opaque bus and voice
//! handles. Implementations must synchronize these calls against their own
//! render thread; callers never lock around them.

pub mod bus;
pub mod graph;

use crate::domain::audio::{AssetData, AssetId, BusHandle, Listener, Result, Vec3, VoiceHandle};
use crate::domain::filter::SharedFilter;
use serde::{Deserialize, Serialize};

/// Volume in decibels to linear gain
pub fn db_to_linear(db: f32) -> f32 {
    (db * 0.115_129_254).exp()
}

/// Linear gain to decibels
pub fn linear_to_db(linear: f32) -> f32 {
    linear.ln() * 8.685_889_63
}

/// Distance attenuation model for positional voices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AttenuationMode {
    #[default]
    NoAttenuation,
    InverseDistance,
    LinearDistance,
    ExponentialDistance,
}

impl AttenuationMode {
    /// Gain at `distance` for the given range and rolloff
    pub fn gain(&self, distance: f32, min: f32, max: f32, rolloff: f32) -> f32 {
        let min = min.max(f32::EPSILON);
        let max = max.max(min);
        let d = distance.clamp(min, max);
        match self {
            AttenuationMode::NoAttenuation => 1.0,
            AttenuationMode::InverseDistance => min / (min + rolloff * (d - min)),
            AttenuationMode::LinearDistance => {
                if max <= min {
                    1.0
                } else {
                    (1.0 - rolloff * (d - min) / (max - min)).clamp(0.0, 1.0)
                }
            }
            AttenuationMode::ExponentialDistance => (d / min).powf(-rolloff),
        }
    }
}

/// What the mixer does with a voice it considers inaudible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum InaudibleBehavior {
    /// Stop advancing until audible again
    #[default]
    Pause,
    /// Keep advancing silently
    Tick,
    /// Stop the voice
    Kill,
}

/// Distance parameters of a 3D voice
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spatial {
    pub position: Vec3,
    pub min_distance: f32,
    pub max_distance: f32,
    pub attenuation: AttenuationMode,
    pub rolloff: f32,
}

/// Parameters for starting a voice
#[derive(Debug, Clone, PartialEq)]
pub struct PlayRequest {
    /// Target bus; `None` plays straight into the root output
    pub bus: Option<BusHandle>,
    pub volume: f32,
    pub paused: bool,
    pub looping: bool,
    pub play_speed: f32,
    pub protected: bool,
    pub inaudible: InaudibleBehavior,
    pub spatial: Option<Spatial>,
}

impl Default for PlayRequest {
    fn default() -> Self {
        Self {
            bus: None,
            volume: 1.0,
            paused: false,
            looping: false,
            play_speed: 1.0,
            protected: false,
            inaudible: InaudibleBehavior::default(),
            spatial: None,
        }
    }
}

/// Real-time mixer primitive
///
/// Calls through a stale handle are ignored. Bus handles are owned by the
/// bus that opened them; voice handles by the tracker entry that recorded
/// them.
pub trait Mixer: Send + Sync {
    // ---- buses ----

    /// Open the root mix target
    fn open_root_bus(&self, channels: u16) -> Result<BusHandle>;

    /// Open a bus whose mix is summed into `parent`
    fn open_sub_bus(&self, parent: BusHandle, channels: u16) -> Result<BusHandle>;

    /// Re-attach a live bus under a different parent without interrupting it
    fn annex_bus(&self, bus: BusHandle, parent: BusHandle) -> Result<()>;

    /// Release a live bus and stop every voice playing on it
    fn close_bus(&self, bus: BusHandle);

    fn set_bus_volume(&self, bus: BusHandle, volume: f32);

    /// Bind a fresh instance of `filter` to a slot, or unbind with `None`
    fn set_bus_filter(&self, bus: BusHandle, slot: usize, filter: Option<SharedFilter>);

    fn set_bus_filter_param(&self, bus: BusHandle, slot: usize, param: usize, value: f32);

    fn bus_filter_param(&self, bus: BusHandle, slot: usize, param: usize) -> Option<f32>;

    fn set_bus_visualization(&self, bus: BusHandle, enabled: bool);

    /// Most recent peak per channel; empty when unknown
    fn bus_peak_volumes(&self, bus: BusHandle) -> Vec<f32>;

    // ---- assets ----

    fn load_asset(&self, asset: &AssetId, data: AssetData) -> Result<()>;

    fn unload_asset(&self, asset: &AssetId);

    // ---- voices ----

    fn play(&self, asset: &AssetId, request: &PlayRequest) -> Result<VoiceHandle>;

    fn stop_voice(&self, voice: VoiceHandle);

    /// Stop every voice playing `asset`
    fn stop_asset(&self, asset: &AssetId);

    fn stop_all(&self);

    fn is_valid_voice(&self, voice: VoiceHandle) -> bool;

    fn set_voice_paused(&self, voice: VoiceHandle, paused: bool);

    fn set_voice_volume(&self, voice: VoiceHandle, volume: f32);

    fn set_voice_looping(&self, voice: VoiceHandle, looping: bool);

    fn set_voice_speed(&self, voice: VoiceHandle, speed: f32);

    fn seek_voice(&self, voice: VoiceHandle, seconds: f64);

    fn set_voice_position(&self, voice: VoiceHandle, position: Vec3);

    fn set_voice_filter(&self, voice: VoiceHandle, slot: usize, filter: Option<SharedFilter>);

    fn set_voice_filter_param(&self, voice: VoiceHandle, slot: usize, param: usize, value: f32);

    // ---- global ----

    fn set_global_volume(&self, volume: f32);

    fn global_volume(&self) -> f32;

    fn set_pause_all(&self, paused: bool);

    fn set_listener(&self, listener: Listener);

    /// Recompute 3D attenuation after position changes
    fn update_3d(&self);
}
