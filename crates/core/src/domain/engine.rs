//! The owning audio engine
//!
//! [`AudioEngine`] is the single owner of the filter catalog, the bus graph
//! and the voice tracker. It is not shared between threads; callers reach it
//! through a serialized request queue (see [`crate::domain::request`]).

use crate::domain::audio::{
    AssetData, AssetId, EngineError, Listener, ObjectId, Result, Vec3,
};
use crate::domain::filter::{self, FilterCatalog, SharedFilter};
use crate::domain::layout::{BusLayoutData, FilterBlockData};
use crate::domain::mixer::graph::BusGraph;
use crate::domain::mixer::{Mixer, PlayRequest, Spatial};
use crate::domain::trigger::{AssetRtpc, AudioAction, GlobalRtpc, RtpcDef, TriggerDef, TriggerParams};
use crate::domain::voice::{Event, TrackedVoice, VoiceTracker};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Shared per-asset state
#[derive(Debug, Clone, Copy, PartialEq)]
struct AssetState {
    base_volume: f32,
}

pub struct AudioEngine {
    mixer: Arc<dyn Mixer>,
    catalog: FilterCatalog,
    graph: BusGraph,
    tracker: VoiceTracker,
    assets: HashMap<AssetId, AssetState>,
    /// Global volume saved by `mute_all`
    muted_volume: Option<f32>,
}

impl AudioEngine {
    pub fn new(mixer: Arc<dyn Mixer>, catalog: FilterCatalog) -> Self {
        let graph = BusGraph::new(mixer.clone());
        Self {
            mixer,
            catalog,
            graph,
            tracker: VoiceTracker::new(),
            assets: HashMap::new(),
            muted_volume: None,
        }
    }

    pub fn mixer(&self) -> &Arc<dyn Mixer> {
        &self.mixer
    }

    pub fn catalog(&self) -> &FilterCatalog {
        &self.catalog
    }

    pub fn graph(&self) -> &BusGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut BusGraph {
        &mut self.graph
    }

    pub fn tracker(&self) -> &VoiceTracker {
        &self.tracker
    }

    // ============================================================================
    // FILTERS
    // ============================================================================

    pub fn register_filter(&mut self, filter: SharedFilter) -> Result<()> {
        self.catalog.register(filter)
    }

    /// Assign a filter by catalog name, or clear the slot with `None`
    pub fn set_bus_filter(&mut self, bus: &str, slot: usize, filter: Option<&str>) -> Result<()> {
        let filter = filter.map(|name| self.catalog.resolve(name)).transpose()?;
        self.graph.set_filter(bus, slot, filter)
    }

    // ============================================================================
    // LAYOUT
    // ============================================================================

    /// Master-only graph, activated
    pub fn reset_layout(&mut self) -> Result<()> {
        self.graph.reset();
        self.graph.activate_all()
    }

    /// Replace the graph with `layout` and activate it
    ///
    /// On a rejected layout the graph still ends up with a live Master.
    pub fn load_layout(&mut self, layout: &BusLayoutData) -> Result<()> {
        let loaded = self.graph.load_layout(layout, &self.catalog);
        let activated = self.graph.activate_all();
        loaded.and(activated)
    }

    pub fn gather_layout(&self) -> BusLayoutData {
        self.graph.gather_layout()
    }

    /// Create a bus and bring it live
    ///
    /// The bus is removed again if it cannot be activated.
    pub fn add_bus(&mut self, name: &str) -> Result<usize> {
        let index = self.graph.create_bus(name)?;
        if let Err(e) = self.graph.activate_bus(name) {
            warn!(bus = %name, error = %e, "New bus could not go live, removing it");
            self.graph.destroy_bus_at(index)?;
            return Err(e);
        }
        Ok(index)
    }

    /// Peaks of a bus after sweeping finished voices
    pub fn peak_volumes(&mut self, bus: &str) -> Result<Vec<f32>> {
        self.tracker.sweep(self.mixer.as_ref());
        self.graph.peak_volumes(bus)
    }

    // ============================================================================
    // ASSETS
    // ============================================================================

    pub fn register_asset(&mut self, asset: AssetId, data: AssetData) -> Result<()> {
        if self.assets.contains_key(&asset) {
            return Err(EngineError::Conflict(format!(
                "asset '{}' is already registered",
                asset
            )));
        }
        self.mixer.load_asset(&asset, data)?;
        info!(asset = %asset, "Asset registered");
        self.assets.insert(asset, AssetState { base_volume: 1.0 });
        Ok(())
    }

    /// Stop every voice of `asset` and release it
    pub fn unregister_asset(&mut self, asset: &AssetId) -> Result<()> {
        if self.assets.remove(asset).is_none() {
            return Err(EngineError::AssetNotFound(asset.to_string()));
        }
        self.mixer.stop_asset(asset);
        for (_, object) in self.tracker.objects_mut() {
            object.remove_asset(asset);
        }
        self.mixer.unload_asset(asset);
        info!(asset = %asset, "Asset unregistered");
        Ok(())
    }

    pub fn asset_base_volume(&self, asset: &AssetId) -> Option<f32> {
        self.assets.get(asset).map(|a| a.base_volume)
    }

    pub fn is_asset_registered(&self, asset: &AssetId) -> bool {
        self.assets.contains_key(asset)
    }

    // ============================================================================
    // OBJECTS
    // ============================================================================

    pub fn register_object(&mut self, object: ObjectId) -> Result<()> {
        if !self.tracker.register(object) {
            return Err(EngineError::Conflict(format!(
                "audio object {} is already registered",
                object
            )));
        }
        debug!(object = %object, "Audio object registered");
        Ok(())
    }

    /// Stop the object's voices and forget it
    pub fn unregister_object(&mut self, object: ObjectId) -> Result<()> {
        let mut removed = self
            .tracker
            .unregister(object)
            .ok_or(EngineError::ObjectNotFound(object.raw()))?;
        for voice in removed.drain() {
            self.mixer.stop_voice(voice.handle);
        }
        debug!(object = %object, "Audio object unregistered");
        Ok(())
    }

    /// Stop the object's voices, keeping it registered
    pub fn reset_object(&mut self, object: ObjectId) -> Result<()> {
        self.stop_all_events(object)
    }

    pub fn set_position(&mut self, object: ObjectId, position: Vec3) -> Result<()> {
        let entry = self
            .tracker
            .object_mut(object)
            .ok_or(EngineError::ObjectNotFound(object.raw()))?;
        entry.set_position(position);
        for handle in entry.handles() {
            self.mixer.set_voice_position(handle, position);
        }
        Ok(())
    }

    pub fn set_listener(&mut self, listener: Listener) {
        self.mixer.set_listener(listener);
    }

    // ============================================================================
    // TRIGGERS
    // ============================================================================

    /// Run a trigger on an object
    ///
    /// Start registers the object if needed and returns an event correlated
    /// to the new voice; the other actions return [`Event::none`].
    pub fn activate_trigger(&mut self, object: ObjectId, trigger: &TriggerDef) -> Result<Event> {
        match trigger.params.action {
            AudioAction::Start => self.start(object, &trigger.asset, &trigger.params),
            AudioAction::Stop => {
                if let Some(entry) = self.tracker.object_mut(object) {
                    for voice in entry.remove_asset(&trigger.asset) {
                        self.mixer.stop_voice(voice.handle);
                    }
                }
                Ok(Event::none())
            }
            AudioAction::Pause | AudioAction::Resume => {
                let paused = trigger.params.action == AudioAction::Pause;
                if let Some(entry) = self.tracker.object(object) {
                    for voice in entry.voices_of(&trigger.asset) {
                        self.mixer.set_voice_paused(voice.handle, paused);
                    }
                }
                Ok(Event::none())
            }
        }
    }

    fn start(&mut self, object: ObjectId, asset: &AssetId, params: &TriggerParams) -> Result<Event> {
        let state = *self
            .assets
            .get(asset)
            .ok_or_else(|| EngineError::AssetNotFound(asset.to_string()))?;
        let bus = self
            .graph
            .bus(&params.bus)
            .ok_or_else(|| EngineError::BusNotFound(params.bus.clone()))?;
        let voice_filters = self.resolve_voice_filters(&params.filter_block)?;

        let position = self
            .tracker
            .object(object)
            .map(|o| o.position())
            .unwrap_or_default();
        let spatial = params.positional.then(|| Spatial {
            position,
            min_distance: params.min_distance,
            max_distance: params.max_distance,
            attenuation: params.attenuation,
            rolloff: params.rolloff,
        });

        let request = PlayRequest {
            bus: bus.live_handle(),
            volume: state.base_volume * params.volume,
            paused: true,
            looping: params.looping,
            play_speed: params.play_speed,
            protected: params.protected,
            inaudible: params.inaudible,
            spatial,
        };
        let handle = self.mixer.play(asset, &request)?;

        for (slot, filter, values) in voice_filters {
            self.mixer.set_voice_filter(handle, slot, Some(filter));
            for (param, value) in values.into_iter().enumerate() {
                self.mixer.set_voice_filter_param(handle, slot, param, value);
            }
        }
        self.mixer.set_voice_paused(handle, false);

        self.tracker
            .object_entry(object)
            .insert(asset.clone(), TrackedVoice::new(handle, params.volume));
        trace!(object = %object, asset = %asset, handle = handle.raw(), "Voice started");
        Ok(Event::playing(handle))
    }

    fn resolve_voice_filters(
        &self,
        block: &FilterBlockData,
    ) -> Result<Vec<(usize, SharedFilter, Vec<f32>)>> {
        let mut resolved = Vec::new();
        for (slot, data) in block.filters.iter().enumerate() {
            if data.name.is_empty() || !data.enabled {
                continue;
            }
            let filter = self.catalog.resolve(&data.name)?;
            let mut values = filter::default_params(filter.as_ref());
            for param in &data.params {
                let index = self.catalog.param_index_by_name(&data.name, &param.name)?;
                values[index] = param.value;
            }
            resolved.push((slot, filter, values));
        }
        Ok(resolved)
    }

    /// Stop the single voice an event refers to
    ///
    /// Events that did not start a voice, and voices that already finished,
    /// are silently ignored.
    pub fn stop_event(&mut self, object: ObjectId, event: Event) -> Result<()> {
        let Some(handle) = event.voice() else {
            return Ok(());
        };
        let removed = self
            .tracker
            .object_mut(object)
            .and_then(|entry| entry.remove_handle(handle));
        match removed {
            Some((asset, _)) => {
                self.mixer.stop_voice(handle);
                trace!(object = %object, asset = %asset, "Event stopped");
            }
            None => trace!(object = %object, handle = handle.raw(), "Event already finished"),
        }
        Ok(())
    }

    pub fn stop_all_events(&mut self, object: ObjectId) -> Result<()> {
        let entry = self
            .tracker
            .object_mut(object)
            .ok_or(EngineError::ObjectNotFound(object.raw()))?;
        for voice in entry.drain() {
            self.mixer.stop_voice(voice.handle);
        }
        Ok(())
    }

    pub fn stop_all_sounds(&mut self) {
        self.mixer.stop_all();
        self.tracker.clear_voices();
        info!("All sounds stopped");
    }

    // ============================================================================
    // RTPC
    // ============================================================================

    pub fn set_rtpc(&mut self, object: ObjectId, rtpc: &RtpcDef, value: f32) -> Result<()> {
        match rtpc {
            RtpcDef::Global(GlobalRtpc::Volume) => {
                match self.muted_volume.as_mut() {
                    Some(saved) => *saved = value,
                    None => self.mixer.set_global_volume(value),
                }
                Ok(())
            }
            RtpcDef::Asset {
                asset,
                param,
                per_object,
            } => {
                let state = self
                    .assets
                    .get_mut(asset)
                    .ok_or_else(|| EngineError::AssetNotFound(asset.to_string()))?;
                let mixer = self.mixer.as_ref();

                match (param, *per_object) {
                    (AssetRtpc::Volume, true) => {
                        let base = state.base_volume;
                        if let Some(entry) = self.tracker.object_mut(object) {
                            for voice in entry.voices_of_mut(asset) {
                                voice.object_scale = value;
                                mixer.set_voice_volume(voice.handle, voice.effective_volume(base));
                            }
                        }
                    }
                    (AssetRtpc::Volume, false) => {
                        state.base_volume = value;
                        let mut updated = 0;
                        for voice in self.tracker.voices_of_asset_mut(asset) {
                            mixer.set_voice_volume(voice.handle, voice.effective_volume(value));
                            updated += 1;
                        }
                        debug!(asset = %asset, value, voices = updated, "Shared volume applied");
                    }
                    (AssetRtpc::PlaySpeed, true) | (AssetRtpc::Seek, true) => {
                        if let Some(entry) = self.tracker.object(object) {
                            for voice in entry.voices_of(asset) {
                                apply_voice_rtpc(mixer, *param, voice, value);
                            }
                        }
                    }
                    (AssetRtpc::PlaySpeed, false) | (AssetRtpc::Seek, false) => {
                        for voice in self.tracker.voices_of_asset_mut(asset) {
                            apply_voice_rtpc(mixer, *param, voice, value);
                        }
                    }
                }
                Ok(())
            }
        }
    }

    // ============================================================================
    // GLOBAL
    // ============================================================================

    pub fn mute_all(&mut self) {
        if self.muted_volume.is_none() {
            self.muted_volume = Some(self.mixer.global_volume());
            self.mixer.set_global_volume(0.0);
        }
    }

    pub fn unmute_all(&mut self) {
        if let Some(volume) = self.muted_volume.take() {
            self.mixer.set_global_volume(volume);
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted_volume.is_some()
    }

    pub fn lose_focus(&mut self) {
        self.mixer.set_pause_all(true);
    }

    pub fn get_focus(&mut self) {
        self.mixer.set_pause_all(false);
    }

    /// Per-tick work: liveness sweep, then 3D recompute
    pub fn update(&mut self) -> usize {
        let swept = self.tracker.sweep(self.mixer.as_ref());
        self.mixer.update_3d();
        swept
    }

    /// Live voices on an object, after sweeping it
    pub fn active_voice_count(&mut self, object: ObjectId) -> usize {
        let mixer = self.mixer.as_ref();
        match self.tracker.object_mut(object) {
            Some(entry) => {
                entry.sweep(mixer);
                entry.voice_count()
            }
            None => 0,
        }
    }

    /// Tear down every voice and bus
    pub fn shutdown(&mut self) {
        self.stop_all_sounds();
        self.graph.deactivate_all();
        if self.muted_volume.is_some() {
            warn!("Shutting down while muted");
        }
    }
}

fn apply_voice_rtpc(mixer: &dyn Mixer, param: AssetRtpc, voice: &TrackedVoice, value: f32) {
    match param {
        AssetRtpc::PlaySpeed => mixer.set_voice_speed(voice.handle, value),
        AssetRtpc::Seek => mixer.seek_voice(voice.handle, f64::from(value)),
        AssetRtpc::Volume => {}
    }
}
