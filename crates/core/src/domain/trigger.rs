//! Trigger and RTPC definitions
//!
//! These arrive from the engine's trigger tables; the voice engine turns
//! them into mixer calls.

use crate::domain::audio::AssetId;
use crate::domain::layout::FilterBlockData;
use crate::domain::mixer::bus::MASTER_BUS;
use crate::domain::mixer::{AttenuationMode, InaudibleBehavior};
use serde::{Deserialize, Serialize};

/// What a trigger does to its asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AudioAction {
    #[default]
    Start,
    Stop,
    Pause,
    Resume,
}

/// Play parameters attached to a trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerParams {
    pub action: AudioAction,
    /// Bus the voice is mixed into
    pub bus: String,
    pub volume: f32,
    pub looping: bool,
    pub positional: bool,
    pub min_distance: f32,
    pub max_distance: f32,
    pub attenuation: AttenuationMode,
    pub rolloff: f32,
    pub inaudible: InaudibleBehavior,
    pub play_speed: f32,
    /// Exempt from voice eviction
    pub protected: bool,
    /// Filters bound on the voice itself
    pub filter_block: FilterBlockData,
}

impl Default for TriggerParams {
    fn default() -> Self {
        Self {
            action: AudioAction::Start,
            bus: MASTER_BUS.to_string(),
            volume: 1.0,
            looping: false,
            positional: false,
            min_distance: 0.1,
            max_distance: 10.0,
            attenuation: AttenuationMode::NoAttenuation,
            rolloff: 0.1,
            inaudible: InaudibleBehavior::Pause,
            play_speed: 1.0,
            protected: false,
            filter_block: FilterBlockData::default(),
        }
    }
}

/// A trigger bound to one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDef {
    pub asset: AssetId,
    #[serde(default)]
    pub params: TriggerParams,
}

impl TriggerDef {
    pub fn new(asset: impl Into<AssetId>, params: TriggerParams) -> Self {
        Self {
            asset: asset.into(),
            params,
        }
    }

    pub fn start(asset: impl Into<AssetId>) -> Self {
        Self::new(asset, TriggerParams::default())
    }

    /// Same trigger with a different action
    pub fn with_action(mut self, action: AudioAction) -> Self {
        self.params.action = action;
        self
    }
}

/// Mixer-wide parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlobalRtpc {
    Volume,
}

/// Parameters scoped to one asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetRtpc {
    Volume,
    PlaySpeed,
    /// Value is a position in seconds
    Seek,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RtpcDef {
    Global(GlobalRtpc),
    Asset {
        asset: AssetId,
        param: AssetRtpc,
        /// Only the requesting object's voices are affected
        per_object: bool,
    },
}
