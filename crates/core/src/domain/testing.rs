//! Recording mixer for unit tests

use crate::domain::audio::{
    AssetData, AssetId, BusHandle, EngineError, Listener, Result, Vec3, VoiceHandle,
};
use crate::domain::filter::{FilterInstance, SharedFilter, FILTER_SLOTS};
use crate::domain::mixer::{Mixer, PlayRequest};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq)]
pub enum MixerCall {
    OpenRootBus,
    OpenSubBus(BusHandle),
    AnnexBus(BusHandle, BusHandle),
    CloseBus(BusHandle),
    SetBusFilter(BusHandle, usize, Option<String>),
    Play(AssetId),
    StopVoice(VoiceHandle),
    StopAsset(AssetId),
    StopAll,
    SetGlobalVolume(f32),
    SetPauseAll(bool),
}

struct FakeBus {
    parent: Option<BusHandle>,
    channels: u16,
    volume: f32,
    filters: Vec<Option<Box<dyn FilterInstance>>>,
}

#[derive(Debug, Clone)]
pub struct FakeVoice {
    pub asset: AssetId,
    pub request: PlayRequest,
    pub volume: f32,
    pub paused: bool,
    pub speed: f32,
    pub seek: Option<f64>,
    pub position: Option<Vec3>,
    pub filters: Vec<(usize, String)>,
}

struct State {
    next: u64,
    buses: HashMap<u64, FakeBus>,
    voices: HashMap<u64, FakeVoice>,
    assets: HashSet<AssetId>,
    global_volume: f32,
    paused_all: bool,
    listener: Listener,
    calls: Vec<MixerCall>,
}

pub struct RecordingMixer {
    state: Mutex<State>,
}

impl RecordingMixer {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                next: 1,
                buses: HashMap::new(),
                voices: HashMap::new(),
                assets: HashSet::new(),
                global_volume: 1.0,
                paused_all: false,
                listener: Listener::default(),
                calls: Vec::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<MixerCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn open_bus_count(&self) -> usize {
        self.lock().buses.len()
    }

    pub fn bus_volume(&self, bus: BusHandle) -> Option<f32> {
        self.lock().buses.get(&bus.raw()).map(|b| b.volume)
    }

    pub fn bus_parent(&self, bus: BusHandle) -> Option<BusHandle> {
        self.lock().buses.get(&bus.raw()).and_then(|b| b.parent)
    }

    pub fn bus_channels(&self, bus: BusHandle) -> Option<u16> {
        self.lock().buses.get(&bus.raw()).map(|b| b.channels)
    }

    pub fn has_bus_filter(&self, bus: BusHandle, slot: usize) -> bool {
        self.lock()
            .buses
            .get(&bus.raw())
            .map_or(false, |b| b.filters[slot].is_some())
    }

    pub fn voice(&self, voice: VoiceHandle) -> Option<FakeVoice> {
        self.lock().voices.get(&voice.raw()).cloned()
    }

    pub fn live_voice_count(&self) -> usize {
        self.lock().voices.len()
    }

    /// Simulate a voice reaching its natural end
    pub fn finish_voice(&self, voice: VoiceHandle) {
        self.lock().voices.remove(&voice.raw());
    }

    pub fn is_paused_all(&self) -> bool {
        self.lock().paused_all
    }

    pub fn listener(&self) -> Listener {
        self.lock().listener
    }

    fn with_voice(&self, voice: VoiceHandle, f: impl FnOnce(&mut FakeVoice)) {
        if let Some(v) = self.lock().voices.get_mut(&voice.raw()) {
            f(v);
        }
    }

    fn open(&self, parent: Option<BusHandle>, channels: u16) -> BusHandle {
        let mut state = self.lock();
        let raw = state.next;
        state.next += 1;
        state.buses.insert(
            raw,
            FakeBus {
                parent,
                channels,
                volume: 1.0,
                filters: (0..FILTER_SLOTS).map(|_| None).collect(),
            },
        );
        state.calls.push(match parent {
            Some(p) => MixerCall::OpenSubBus(p),
            None => MixerCall::OpenRootBus,
        });
        BusHandle::from_raw(raw)
    }
}

impl Mixer for RecordingMixer {
    fn open_root_bus(&self, channels: u16) -> Result<BusHandle> {
        Ok(self.open(None, channels))
    }

    fn open_sub_bus(&self, parent: BusHandle, channels: u16) -> Result<BusHandle> {
        if !self.lock().buses.contains_key(&parent.raw()) {
            return Err(EngineError::EngineFailure("parent bus is closed".to_string()));
        }
        Ok(self.open(Some(parent), channels))
    }

    fn annex_bus(&self, bus: BusHandle, parent: BusHandle) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(MixerCall::AnnexBus(bus, parent));
        match state.buses.get_mut(&bus.raw()) {
            Some(b) => {
                b.parent = Some(parent);
                Ok(())
            }
            None => Err(EngineError::EngineFailure("bus is closed".to_string())),
        }
    }

    fn close_bus(&self, bus: BusHandle) {
        let mut state = self.lock();
        state.buses.remove(&bus.raw());
        state.voices.retain(|_, v| v.request.bus != Some(bus));
        state.calls.push(MixerCall::CloseBus(bus));
    }

    fn set_bus_volume(&self, bus: BusHandle, volume: f32) {
        if let Some(b) = self.lock().buses.get_mut(&bus.raw()) {
            b.volume = volume;
        }
    }

    fn set_bus_filter(&self, bus: BusHandle, slot: usize, filter: Option<SharedFilter>) {
        let mut state = self.lock();
        let name = filter.as_ref().map(|f| f.name().to_string());
        if let Some(b) = state.buses.get_mut(&bus.raw()) {
            b.filters[slot] = filter.map(|f| f.create_instance());
        }
        state.calls.push(MixerCall::SetBusFilter(bus, slot, name));
    }

    fn set_bus_filter_param(&self, bus: BusHandle, slot: usize, param: usize, value: f32) {
        if let Some(b) = self.lock().buses.get_mut(&bus.raw()) {
            if let Some(instance) = b.filters[slot].as_mut() {
                instance.set_param(param, value);
            }
        }
    }

    fn bus_filter_param(&self, bus: BusHandle, slot: usize, param: usize) -> Option<f32> {
        self.lock()
            .buses
            .get(&bus.raw())
            .and_then(|b| b.filters[slot].as_ref())
            .and_then(|instance| instance.param(param))
    }

    fn set_bus_visualization(&self, _bus: BusHandle, _enabled: bool) {}

    fn bus_peak_volumes(&self, bus: BusHandle) -> Vec<f32> {
        self.lock()
            .buses
            .get(&bus.raw())
            .map(|b| vec![0.0; b.channels as usize])
            .unwrap_or_default()
    }

    fn load_asset(&self, asset: &AssetId, _data: AssetData) -> Result<()> {
        self.lock().assets.insert(asset.clone());
        Ok(())
    }

    fn unload_asset(&self, asset: &AssetId) {
        self.lock().assets.remove(asset);
    }

    fn play(&self, asset: &AssetId, request: &PlayRequest) -> Result<VoiceHandle> {
        let mut state = self.lock();
        if !state.assets.contains(asset) {
            return Err(EngineError::EngineFailure(format!("asset {} not loaded", asset)));
        }
        let raw = state.next;
        state.next += 1;
        state.voices.insert(
            raw,
            FakeVoice {
                asset: asset.clone(),
                request: request.clone(),
                volume: request.volume,
                paused: request.paused,
                speed: request.play_speed,
                seek: None,
                position: request.spatial.map(|s| s.position),
                filters: Vec::new(),
            },
        );
        state.calls.push(MixerCall::Play(asset.clone()));
        Ok(VoiceHandle::from_raw(raw))
    }

    fn stop_voice(&self, voice: VoiceHandle) {
        let mut state = self.lock();
        state.voices.remove(&voice.raw());
        state.calls.push(MixerCall::StopVoice(voice));
    }

    fn stop_asset(&self, asset: &AssetId) {
        let mut state = self.lock();
        state.voices.retain(|_, v| &v.asset != asset);
        state.calls.push(MixerCall::StopAsset(asset.clone()));
    }

    fn stop_all(&self) {
        let mut state = self.lock();
        state.voices.clear();
        state.calls.push(MixerCall::StopAll);
    }

    fn is_valid_voice(&self, voice: VoiceHandle) -> bool {
        self.lock().voices.contains_key(&voice.raw())
    }

    fn set_voice_paused(&self, voice: VoiceHandle, paused: bool) {
        self.with_voice(voice, |v| v.paused = paused);
    }

    fn set_voice_volume(&self, voice: VoiceHandle, volume: f32) {
        self.with_voice(voice, |v| v.volume = volume);
    }

    fn set_voice_looping(&self, voice: VoiceHandle, looping: bool) {
        self.with_voice(voice, |v| v.request.looping = looping);
    }

    fn set_voice_speed(&self, voice: VoiceHandle, speed: f32) {
        self.with_voice(voice, |v| v.speed = speed);
    }

    fn seek_voice(&self, voice: VoiceHandle, seconds: f64) {
        self.with_voice(voice, |v| v.seek = Some(seconds));
    }

    fn set_voice_position(&self, voice: VoiceHandle, position: Vec3) {
        self.with_voice(voice, |v| v.position = Some(position));
    }

    fn set_voice_filter(&self, voice: VoiceHandle, slot: usize, filter: Option<SharedFilter>) {
        self.with_voice(voice, |v| {
            v.filters.retain(|(s, _)| *s != slot);
            if let Some(f) = filter {
                v.filters.push((slot, f.name().to_string()));
            }
        });
    }

    fn set_voice_filter_param(&self, _voice: VoiceHandle, _slot: usize, _param: usize, _value: f32) {}

    fn set_global_volume(&self, volume: f32) {
        let mut state = self.lock();
        state.global_volume = volume;
        state.calls.push(MixerCall::SetGlobalVolume(volume));
    }

    fn global_volume(&self) -> f32 {
        self.lock().global_volume
    }

    fn set_pause_all(&self, paused: bool) {
        let mut state = self.lock();
        state.paused_all = paused;
        state.calls.push(MixerCall::SetPauseAll(paused));
    }

    fn set_listener(&self, listener: Listener) {
        self.lock().listener = listener;
    }

    fn update_3d(&self) {}
}
