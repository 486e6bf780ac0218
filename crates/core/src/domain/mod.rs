//! Domain entities and business rules

pub mod audio;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod filter;
pub mod layout;
pub mod mixer;
pub mod request;
pub mod trigger;
pub mod voice;

#[cfg(test)]
pub(crate) mod testing;

// Re-export specific items to avoid ambiguous glob imports
pub use audio::{
    AssetData, AssetId, BusHandle, EngineError, ErrorKind, Listener, ObjectId,
    SpeakerConfiguration, Vec3, VoiceHandle,
};
pub use config::{ClipperMode, ConfigError, ConfigManager, EngineConfig, LayoutLibrary, LayoutWatcher};
pub use dsp::{BiquadResonantFilter, GainFilter, LofiFilter, BIQUAD_FILTER, GAIN_FILTER, LOFI_FILTER};
pub use engine::AudioEngine;
pub use filter::{FilterCatalog, FilterInstance, FilterType, ParamKind, ParamSchema, SharedFilter, FILTER_SLOTS};
pub use layout::{BusData, BusLayoutData, FilterBlockData, FilterData, FilterParamData, LayoutError};
pub use mixer::bus::{Bus, MASTER_BUS};
pub use mixer::graph::{BusGraph, ReorderOutcome};
pub use mixer::{AttenuationMode, InaudibleBehavior, Mixer, PlayRequest, Spatial};
pub use request::{Notification, Outcome, Request, RequestExecutor};
pub use trigger::{AssetRtpc, AudioAction, GlobalRtpc, RtpcDef, TriggerDef, TriggerParams};
pub use voice::{Event, TrackedVoice, VoiceTracker};
