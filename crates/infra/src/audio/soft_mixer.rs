//! Software implementation of the mixer primitive
//!
//! [`SoftMixer`] keeps every bus and voice behind one mutex. The control
//! thread issues [`Mixer`] calls; the output stream callback pulls samples
//! through [`SoftMixer::render`]. Handles come from a single counter and are
//! never reused, so a call through a stale handle is a no-op.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tenuto_core::domain::audio::{
    AssetData, AssetId, BusHandle, EngineError, Listener, Result, Vec3, VoiceHandle,
};
use tenuto_core::domain::config::{ClipperMode, EngineConfig};
use tenuto_core::domain::filter::{FilterInstance, SharedFilter, FILTER_SLOTS};
use tenuto_core::domain::mixer::{InaudibleBehavior, Mixer, PlayRequest, Spatial};
use tracing::{debug, trace, warn};

/// Voices quieter than this are treated as inaudible
const INAUDIBLE_GAIN: f32 = 1.0e-4;

type FilterRack = Vec<Option<Box<dyn FilterInstance>>>;

fn empty_rack() -> FilterRack {
    (0..FILTER_SLOTS).map(|_| None).collect()
}

struct BusNode {
    parent: Option<u64>,
    channels: usize,
    volume: f32,
    filters: FilterRack,
    visualization: bool,
    peaks: Vec<f32>,
    buffer: Vec<f32>,
}

struct VoiceNode {
    asset: AssetId,
    data: AssetData,
    bus: Option<u64>,
    volume: f32,
    paused: bool,
    looping: bool,
    speed: f32,
    /// Read position in source frames
    cursor: f64,
    protected: bool,
    inaudible: InaudibleBehavior,
    spatial: Option<Spatial>,
    /// Distance gain from the last 3D update
    attenuation: f32,
    filters: FilterRack,
    scratch: Vec<f32>,
}

impl VoiceNode {
    fn gain(&self) -> f32 {
        self.volume * self.attenuation
    }

    /// Advance without producing samples; returns true once finished
    fn skip(&mut self, frames: usize, mix_rate: u32) -> bool {
        let total = self.data.frames() as f64;
        if total == 0.0 {
            return true;
        }
        self.cursor += self.step(mix_rate) * frames as f64;
        if self.cursor < total {
            return false;
        }
        if self.looping {
            self.cursor %= total;
            false
        } else {
            true
        }
    }

    fn step(&self, mix_rate: u32) -> f64 {
        f64::from(self.speed.max(0.0)) * f64::from(self.data.sample_rate) / f64::from(mix_rate)
    }

    /// Resample into `scratch` with `channels` interleaved channels
    ///
    /// Returns true once a non-looping voice ran out of data.
    fn read(&mut self, frames: usize, channels: usize, mix_rate: u32) -> bool {
        self.scratch.clear();
        self.scratch.resize(frames * channels, 0.0);

        let total = self.data.frames();
        if total == 0 {
            return true;
        }
        let src_channels = usize::from(self.data.channels.max(1));
        let step = self.step(mix_rate);
        let samples = &self.data.samples;

        for frame in 0..frames {
            if self.cursor >= total as f64 {
                if !self.looping {
                    return true;
                }
                self.cursor %= total as f64;
            }
            let index = self.cursor as usize;
            let next = if index + 1 < total {
                index + 1
            } else if self.looping {
                0
            } else {
                index
            };
            let frac = (self.cursor - index as f64) as f32;
            let a = &samples[index * src_channels..(index + 1) * src_channels];
            let b = &samples[next * src_channels..(next + 1) * src_channels];
            for channel in 0..channels {
                let from = map_channel(a, channel, channels);
                let to = map_channel(b, channel, channels);
                self.scratch[frame * channels + channel] = from + (to - from) * frac;
            }
            self.cursor += step;
        }
        !self.looping && self.cursor >= total as f64
    }
}

/// Value of `channel` when a frame is spread over `out_channels`
fn map_channel(frame: &[f32], channel: usize, out_channels: usize) -> f32 {
    let in_channels = frame.len();
    if in_channels == out_channels {
        frame[channel]
    } else if out_channels == 1 {
        frame.iter().sum::<f32>() / in_channels as f32
    } else if in_channels == 1 {
        frame[0]
    } else {
        frame[channel % in_channels]
    }
}

/// Accumulate `src` into `dst`, converting channel counts
fn mix_into(src: &[f32], src_channels: usize, dst: &mut [f32], dst_channels: usize, gain: f32) {
    let frames = (src.len() / src_channels).min(dst.len() / dst_channels);
    for frame in 0..frames {
        let input = &src[frame * src_channels..(frame + 1) * src_channels];
        for channel in 0..dst_channels {
            dst[frame * dst_channels + channel] += map_channel(input, channel, dst_channels) * gain;
        }
    }
}

fn run_filters(filters: &mut FilterRack, buffer: &mut [f32], channels: usize, sample_rate: u32) {
    for instance in filters.iter_mut().flatten() {
        instance.process(buffer, channels, sample_rate);
    }
}

struct MixState {
    next_handle: u64,
    buses: HashMap<u64, BusNode>,
    /// Ordered by handle, so iteration runs oldest first
    voices: BTreeMap<u64, VoiceNode>,
    assets: HashMap<AssetId, AssetData>,
    global_volume: f32,
    paused_all: bool,
    listener: Listener,
}

impl MixState {
    fn allocate(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Bus ids, deepest first so children mix before their parents
    fn bus_order(&self) -> Vec<u64> {
        let mut depths: Vec<(u64, usize)> = self
            .buses
            .keys()
            .map(|&id| {
                let mut depth = 0;
                let mut current = self.buses.get(&id).and_then(|b| b.parent);
                while let Some(parent) = current {
                    depth += 1;
                    if depth > self.buses.len() {
                        break;
                    }
                    current = self.buses.get(&parent).and_then(|b| b.parent);
                }
                (id, depth)
            })
            .collect();
        depths.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        depths.into_iter().map(|(id, _)| id).collect()
    }
}

fn spatial_gain(spatial: &Spatial, listener: Vec3) -> f32 {
    let d: f32 = (0..3)
        .map(|i| (spatial.position[i] - listener[i]).powi(2))
        .sum::<f32>()
        .sqrt();
    spatial
        .attenuation
        .gain(d, spatial.min_distance, spatial.max_distance, spatial.rolloff)
}

pub struct SoftMixer {
    state: Mutex<MixState>,
    sample_rate: u32,
    channels: u16,
    clipper: ClipperMode,
    post_clip_scaler: f32,
    voice_capacity: usize,
    max_active_voices: usize,
}

impl SoftMixer {
    pub fn new(config: &EngineConfig) -> Self {
        debug!(
            sample_rate = config.sample_rate,
            channels = config.channels(),
            max_active_voices = config.max_active_voices,
            "Software mixer created"
        );
        Self {
            state: Mutex::new(MixState {
                next_handle: 0,
                buses: HashMap::new(),
                voices: BTreeMap::new(),
                assets: HashMap::new(),
                global_volume: 1.0,
                paused_all: false,
                listener: Listener::default(),
            }),
            sample_rate: config.sample_rate,
            channels: config.channels(),
            clipper: config.clipper,
            post_clip_scaler: config.post_clip_scaler,
            voice_capacity: config.voice_capacity.max(1) as usize,
            max_active_voices: config.max_active_voices.max(1) as usize,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn voice_count(&self) -> usize {
        self.lock().voices.len()
    }

    fn lock(&self) -> MutexGuard<'_, MixState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_bus(&self, bus: BusHandle, f: impl FnOnce(&mut BusNode)) {
        if let Some(node) = self.lock().buses.get_mut(&bus.raw()) {
            f(node);
        }
    }

    fn with_voice(&self, voice: VoiceHandle, f: impl FnOnce(&mut VoiceNode)) {
        if let Some(node) = self.lock().voices.get_mut(&voice.raw()) {
            f(node);
        }
    }

    fn open_bus(&self, parent: Option<u64>, channels: u16) -> BusHandle {
        let mut state = self.lock();
        let id = state.allocate();
        let channels = usize::from(channels.max(1));
        state.buses.insert(
            id,
            BusNode {
                parent,
                channels,
                volume: 1.0,
                filters: empty_rack(),
                visualization: false,
                peaks: vec![0.0; channels],
                buffer: Vec::new(),
            },
        );
        trace!(bus = id, ?parent, channels, "Bus opened");
        BusHandle::from_raw(id)
    }

    /// Mix one block of interleaved output
    ///
    /// `out` holds `channels()` interleaved channels; any trailing partial
    /// frame is left silent.
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);
        let out_channels = usize::from(self.channels.max(1));
        let frames = out.len() / out_channels;
        if frames == 0 {
            return;
        }

        let mut guard = self.lock();
        let state = &mut *guard;

        for bus in state.buses.values_mut() {
            bus.buffer.clear();
            bus.buffer.resize(frames * bus.channels, 0.0);
        }

        if !state.paused_all {
            self.render_voices(state, out, frames, out_channels);
        }
        self.render_buses(state, out, out_channels);

        let global = state.global_volume;
        for sample in out[..frames * out_channels].iter_mut() {
            *sample = self.clipper.apply(*sample * global) * self.post_clip_scaler;
        }
    }

    fn render_voices(&self, state: &mut MixState, out: &mut [f32], frames: usize, out_channels: usize) {
        let MixState { buses, voices, .. } = state;

        // Loudest voices get mixed, the rest advance silently
        let mut audible: Vec<(u64, f32)> = voices
            .iter()
            .filter(|(_, v)| !v.paused && v.gain() > INAUDIBLE_GAIN)
            .map(|(&id, v)| (id, v.gain()))
            .collect();
        audible.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        audible.truncate(self.max_active_voices);

        let mut finished = Vec::new();
        for (&id, voice) in voices.iter_mut() {
            if voice.paused {
                continue;
            }

            let mixed = audible.iter().any(|&(audible_id, _)| audible_id == id);
            if !mixed {
                let done = if voice.gain() > INAUDIBLE_GAIN {
                    voice.skip(frames, self.sample_rate)
                } else {
                    match voice.inaudible {
                        InaudibleBehavior::Pause => false,
                        InaudibleBehavior::Tick => voice.skip(frames, self.sample_rate),
                        InaudibleBehavior::Kill => true,
                    }
                };
                if done {
                    finished.push(id);
                }
                continue;
            }

            let (target, channels) = match voice.bus {
                Some(bus) => match buses.get_mut(&bus) {
                    Some(node) => (node.buffer.as_mut_slice(), node.channels),
                    // Parent bus closed under the voice
                    None => {
                        finished.push(id);
                        continue;
                    }
                },
                None => (&mut out[..frames * out_channels], out_channels),
            };

            let done = voice.read(frames, channels, self.sample_rate);
            run_filters(&mut voice.filters, &mut voice.scratch, channels, self.sample_rate);
            mix_into(&voice.scratch, channels, target, channels, voice.gain());
            if done {
                finished.push(id);
            }
        }

        for id in finished {
            if let Some(voice) = voices.remove(&id) {
                trace!(voice = id, asset = %voice.asset, "Voice finished");
            }
        }
    }

    fn render_buses(&self, state: &mut MixState, out: &mut [f32], out_channels: usize) {
        for id in state.bus_order() {
            let Some(bus) = state.buses.get_mut(&id) else {
                continue;
            };
            let mut buffer = std::mem::take(&mut bus.buffer);
            let channels = bus.channels;

            run_filters(&mut bus.filters, &mut buffer, channels, self.sample_rate);
            for sample in buffer.iter_mut() {
                *sample *= bus.volume;
            }
            if bus.visualization {
                bus.peaks.iter_mut().for_each(|p| *p = 0.0);
                for frame in buffer.chunks_exact(channels) {
                    for (peak, sample) in bus.peaks.iter_mut().zip(frame) {
                        *peak = peak.max(sample.abs());
                    }
                }
            }
            let parent = bus.parent;

            match parent {
                Some(parent) => {
                    if let Some(node) = state.buses.get_mut(&parent) {
                        mix_into(&buffer, channels, &mut node.buffer, node.channels, 1.0);
                    }
                }
                None => mix_into(&buffer, channels, out, out_channels, 1.0),
            }

            if let Some(bus) = state.buses.get_mut(&id) {
                bus.buffer = buffer;
            }
        }
    }
}

impl Mixer for SoftMixer {
    fn open_root_bus(&self, channels: u16) -> Result<BusHandle> {
        Ok(self.open_bus(None, channels))
    }

    fn open_sub_bus(&self, parent: BusHandle, channels: u16) -> Result<BusHandle> {
        if !self.lock().buses.contains_key(&parent.raw()) {
            return Err(closed_bus(parent));
        }
        Ok(self.open_bus(Some(parent.raw()), channels))
    }

    fn annex_bus(&self, bus: BusHandle, parent: BusHandle) -> Result<()> {
        let mut state = self.lock();
        if !state.buses.contains_key(&parent.raw()) {
            return Err(closed_bus(parent));
        }
        match state.buses.get_mut(&bus.raw()) {
            Some(node) => {
                node.parent = Some(parent.raw());
                Ok(())
            }
            None => Err(closed_bus(bus)),
        }
    }

    fn close_bus(&self, bus: BusHandle) {
        let mut state = self.lock();
        if state.buses.remove(&bus.raw()).is_some() {
            let before = state.voices.len();
            state.voices.retain(|_, v| v.bus != Some(bus.raw()));
            trace!(bus = bus.raw(), stopped = before - state.voices.len(), "Bus closed");
        }
    }

    fn set_bus_volume(&self, bus: BusHandle, volume: f32) {
        self.with_bus(bus, |node| node.volume = volume.max(0.0));
    }

    fn set_bus_filter(&self, bus: BusHandle, slot: usize, filter: Option<SharedFilter>) {
        if slot >= FILTER_SLOTS {
            return;
        }
        self.with_bus(bus, |node| node.filters[slot] = filter.map(|f| f.create_instance()));
    }

    fn set_bus_filter_param(&self, bus: BusHandle, slot: usize, param: usize, value: f32) {
        self.with_bus(bus, |node| {
            if let Some(Some(instance)) = node.filters.get_mut(slot) {
                instance.set_param(param, value);
            }
        });
    }

    fn bus_filter_param(&self, bus: BusHandle, slot: usize, param: usize) -> Option<f32> {
        let state = self.lock();
        match state.buses.get(&bus.raw())?.filters.get(slot)? {
            Some(instance) => instance.param(param),
            None => None,
        }
    }

    fn set_bus_visualization(&self, bus: BusHandle, enabled: bool) {
        self.with_bus(bus, |node| {
            node.visualization = enabled;
            if !enabled {
                node.peaks.iter_mut().for_each(|p| *p = 0.0);
            }
        });
    }

    fn bus_peak_volumes(&self, bus: BusHandle) -> Vec<f32> {
        self.lock()
            .buses
            .get(&bus.raw())
            .map(|node| node.peaks.clone())
            .unwrap_or_default()
    }

    fn load_asset(&self, asset: &AssetId, data: AssetData) -> Result<()> {
        if data.channels == 0 || data.sample_rate == 0 {
            return Err(EngineError::EngineFailure(format!(
                "asset '{}' has no channels or sample rate",
                asset
            )));
        }
        self.lock().assets.insert(asset.clone(), data);
        Ok(())
    }

    fn unload_asset(&self, asset: &AssetId) {
        let mut state = self.lock();
        state.voices.retain(|_, v| &v.asset != asset);
        state.assets.remove(asset);
    }

    fn play(&self, asset: &AssetId, request: &PlayRequest) -> Result<VoiceHandle> {
        let mut state = self.lock();
        let data = state
            .assets
            .get(asset)
            .cloned()
            .ok_or_else(|| EngineError::EngineFailure(format!("asset '{}' is not loaded", asset)))?;

        if state.voices.len() >= self.voice_capacity {
            let oldest = state
                .voices
                .iter()
                .find(|(_, v)| !v.protected)
                .map(|(&id, _)| id);
            match oldest {
                Some(id) => {
                    state.voices.remove(&id);
                    warn!(voice = id, "Voice capacity reached, evicted oldest voice");
                }
                None => {
                    return Err(EngineError::EngineFailure(
                        "voice capacity reached and every voice is protected".to_string(),
                    ))
                }
            }
        }

        let attenuation = request
            .spatial
            .as_ref()
            .map_or(1.0, |s| spatial_gain(s, state.listener.position));
        let id = state.allocate();
        state.voices.insert(
            id,
            VoiceNode {
                asset: asset.clone(),
                data,
                bus: request.bus.map(|b| b.raw()),
                volume: request.volume.max(0.0),
                paused: request.paused,
                looping: request.looping,
                speed: request.play_speed,
                cursor: 0.0,
                protected: request.protected,
                inaudible: request.inaudible,
                spatial: request.spatial,
                attenuation,
                filters: empty_rack(),
                scratch: Vec::new(),
            },
        );
        Ok(VoiceHandle::from_raw(id))
    }

    fn stop_voice(&self, voice: VoiceHandle) {
        self.lock().voices.remove(&voice.raw());
    }

    fn stop_asset(&self, asset: &AssetId) {
        self.lock().voices.retain(|_, v| &v.asset != asset);
    }

    fn stop_all(&self) {
        self.lock().voices.clear();
    }

    fn is_valid_voice(&self, voice: VoiceHandle) -> bool {
        self.lock().voices.contains_key(&voice.raw())
    }

    fn set_voice_paused(&self, voice: VoiceHandle, paused: bool) {
        self.with_voice(voice, |v| v.paused = paused);
    }

    fn set_voice_volume(&self, voice: VoiceHandle, volume: f32) {
        self.with_voice(voice, |v| v.volume = volume.max(0.0));
    }

    fn set_voice_looping(&self, voice: VoiceHandle, looping: bool) {
        self.with_voice(voice, |v| v.looping = looping);
    }

    fn set_voice_speed(&self, voice: VoiceHandle, speed: f32) {
        self.with_voice(voice, |v| v.speed = speed.max(0.0));
    }

    fn seek_voice(&self, voice: VoiceHandle, seconds: f64) {
        self.with_voice(voice, |v| {
            let frame = seconds.max(0.0) * f64::from(v.data.sample_rate);
            v.cursor = frame.min(v.data.frames() as f64);
        });
    }

    fn set_voice_position(&self, voice: VoiceHandle, position: Vec3) {
        self.with_voice(voice, |v| {
            if let Some(spatial) = v.spatial.as_mut() {
                spatial.position = position;
            }
        });
    }

    fn set_voice_filter(&self, voice: VoiceHandle, slot: usize, filter: Option<SharedFilter>) {
        if slot >= FILTER_SLOTS {
            return;
        }
        self.with_voice(voice, |v| v.filters[slot] = filter.map(|f| f.create_instance()));
    }

    fn set_voice_filter_param(&self, voice: VoiceHandle, slot: usize, param: usize, value: f32) {
        self.with_voice(voice, |v| {
            if let Some(Some(instance)) = v.filters.get_mut(slot) {
                instance.set_param(param, value);
            }
        });
    }

    fn set_global_volume(&self, volume: f32) {
        self.lock().global_volume = volume.max(0.0);
    }

    fn global_volume(&self) -> f32 {
        self.lock().global_volume
    }

    fn set_pause_all(&self, paused: bool) {
        self.lock().paused_all = paused;
    }

    fn set_listener(&self, listener: Listener) {
        self.lock().listener = listener;
    }

    fn update_3d(&self) {
        let mut guard = self.lock();
        let state = &mut *guard;
        let listener = state.listener.position;
        for voice in state.voices.values_mut() {
            if let Some(s) = voice.spatial.as_ref() {
                voice.attenuation = spatial_gain(s, listener);
            }
        }
    }
}

fn closed_bus(bus: BusHandle) -> EngineError {
    EngineError::EngineFailure(format!("bus handle {} is closed", bus.raw()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tenuto_core::domain::dsp::{GainFilter, GAIN_FILTER};
    use tenuto_core::domain::filter::FilterType;
    use tenuto_core::domain::mixer::AttenuationMode;

    const EPS: f32 = 1e-5;

    fn mixer() -> SoftMixer {
        SoftMixer::new(&EngineConfig {
            clipper: ClipperMode::Hard,
            post_clip_scaler: 1.0,
            voice_capacity: 4,
            ..EngineConfig::default()
        })
    }

    fn constant(mixer: &SoftMixer, name: &str, value: f32, frames: usize) -> AssetId {
        let asset = AssetId::new(name);
        mixer
            .load_asset(&asset, AssetData::new(vec![value; frames], 1, 44100))
            .unwrap();
        asset
    }

    fn render(mixer: &SoftMixer, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * 2];
        mixer.render(&mut out);
        out
    }

    #[test]
    fn test_voice_on_root_output() {
        let mixer = mixer();
        let asset = constant(&mixer, "a.wav", 0.5, 256);
        mixer
            .play(&asset, &PlayRequest { volume: 0.5, ..PlayRequest::default() })
            .unwrap();

        let out = render(&mixer, 16);
        assert!(out.iter().all(|s| (s - 0.25).abs() < EPS));
    }

    #[test]
    fn test_bus_chain_applies_volumes() {
        let mixer = mixer();
        let root = mixer.open_root_bus(2).unwrap();
        let child = mixer.open_sub_bus(root, 2).unwrap();
        mixer.set_bus_volume(root, 0.5);
        mixer.set_bus_volume(child, 0.5);

        let asset = constant(&mixer, "a.wav", 1.0, 256);
        mixer
            .play(&asset, &PlayRequest { bus: Some(child), ..PlayRequest::default() })
            .unwrap();

        let out = render(&mixer, 16);
        assert!(out.iter().all(|s| (s - 0.25).abs() < EPS));
    }

    #[test]
    fn test_non_looping_voice_finishes() {
        let mixer = mixer();
        let asset = constant(&mixer, "short.wav", 0.5, 8);
        let once = mixer.play(&asset, &PlayRequest::default()).unwrap();
        let looped = mixer
            .play(&asset, &PlayRequest { looping: true, ..PlayRequest::default() })
            .unwrap();

        render(&mixer, 32);
        assert!(!mixer.is_valid_voice(once));
        assert!(mixer.is_valid_voice(looped));
    }

    #[test]
    fn test_handles_are_not_reused() {
        let mixer = mixer();
        let asset = constant(&mixer, "a.wav", 0.5, 64);
        let first = mixer.play(&asset, &PlayRequest::default()).unwrap();
        mixer.stop_voice(first);
        let second = mixer.play(&asset, &PlayRequest::default()).unwrap();
        assert_ne!(first, second);

        // Stale stop leaves the new voice alone
        mixer.stop_voice(first);
        assert!(mixer.is_valid_voice(second));
    }

    #[test]
    fn test_capacity_evicts_oldest_unprotected() {
        let mixer = mixer();
        let asset = constant(&mixer, "a.wav", 0.1, 64);
        let protected = mixer
            .play(&asset, &PlayRequest { protected: true, ..PlayRequest::default() })
            .unwrap();
        let oldest = mixer.play(&asset, &PlayRequest::default()).unwrap();
        mixer.play(&asset, &PlayRequest::default()).unwrap();
        mixer.play(&asset, &PlayRequest::default()).unwrap();
        assert_eq!(mixer.voice_count(), 4);

        mixer.play(&asset, &PlayRequest::default()).unwrap();
        assert_eq!(mixer.voice_count(), 4);
        assert!(mixer.is_valid_voice(protected));
        assert!(!mixer.is_valid_voice(oldest));
    }

    #[test]
    fn test_paused_voice_is_silent_and_kept() {
        let mixer = mixer();
        let asset = constant(&mixer, "a.wav", 0.5, 8);
        let voice = mixer
            .play(&asset, &PlayRequest { paused: true, ..PlayRequest::default() })
            .unwrap();

        let out = render(&mixer, 64);
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(mixer.is_valid_voice(voice));

        mixer.set_pause_all(true);
        mixer.set_voice_paused(voice, false);
        assert!(render(&mixer, 4).iter().all(|&s| s == 0.0));
        mixer.set_pause_all(false);
        assert!(render(&mixer, 4).iter().all(|s| (s - 0.5).abs() < EPS));
    }

    #[test]
    fn test_bus_filter_and_peaks() {
        let mixer = mixer();
        let root = mixer.open_root_bus(2).unwrap();
        let filter: SharedFilter = Arc::new(GainFilter::new());
        assert_eq!(filter.name(), GAIN_FILTER);
        mixer.set_bus_filter(root, 0, Some(filter));
        mixer.set_bus_filter_param(root, 0, GainFilter::GAIN, 0.5);
        assert_eq!(mixer.bus_filter_param(root, 0, GainFilter::GAIN), Some(0.5));
        mixer.set_bus_visualization(root, true);

        let asset = constant(&mixer, "a.wav", 0.8, 64);
        mixer
            .play(&asset, &PlayRequest { bus: Some(root), ..PlayRequest::default() })
            .unwrap();

        let out = render(&mixer, 16);
        assert!(out.iter().all(|s| (s - 0.4).abs() < EPS));
        let peaks = mixer.bus_peak_volumes(root);
        assert_eq!(peaks.len(), 2);
        assert!(peaks.iter().all(|p| (p - 0.4).abs() < EPS));
    }

    #[test]
    fn test_mono_bus_downmixes() {
        let mixer = mixer();
        let root = mixer.open_root_bus(2).unwrap();
        let mono = mixer.open_sub_bus(root, 1).unwrap();

        let asset = AssetId::new("left.wav");
        let left_only: Vec<f32> = (0..32).flat_map(|_| [1.0, 0.0]).collect();
        mixer
            .load_asset(&asset, AssetData::new(left_only, 2, 44100))
            .unwrap();
        mixer
            .play(&asset, &PlayRequest { bus: Some(mono), ..PlayRequest::default() })
            .unwrap();

        let out = render(&mixer, 8);
        assert!(out.iter().all(|s| (s - 0.5).abs() < EPS));
    }

    #[test]
    fn test_closing_bus_stops_its_voices() {
        let mixer = mixer();
        let root = mixer.open_root_bus(2).unwrap();
        let child = mixer.open_sub_bus(root, 2).unwrap();
        let asset = constant(&mixer, "a.wav", 0.5, 64);
        let voice = mixer
            .play(&asset, &PlayRequest { bus: Some(child), looping: true, ..PlayRequest::default() })
            .unwrap();
        let on_root = mixer
            .play(&asset, &PlayRequest { bus: Some(root), looping: true, ..PlayRequest::default() })
            .unwrap();

        mixer.close_bus(child);
        assert!(!mixer.is_valid_voice(voice));
        assert!(mixer.is_valid_voice(on_root));
        assert_eq!(mixer.voice_count(), 1);

        mixer.close_bus(root);
        assert!(!mixer.is_valid_voice(on_root));
        assert!(render(&mixer, 8).iter().all(|&s| s == 0.0));
        assert!(mixer.open_sub_bus(root, 2).is_err());
    }

    #[test]
    fn test_annex_moves_bus() {
        let mixer = mixer();
        let root = mixer.open_root_bus(2).unwrap();
        let a = mixer.open_sub_bus(root, 2).unwrap();
        let b = mixer.open_sub_bus(root, 2).unwrap();
        mixer.set_bus_volume(a, 0.5);
        mixer.annex_bus(b, a).unwrap();

        let asset = constant(&mixer, "a.wav", 1.0, 64);
        mixer
            .play(&asset, &PlayRequest { bus: Some(b), ..PlayRequest::default() })
            .unwrap();
        assert!(render(&mixer, 8).iter().all(|s| (s - 0.5).abs() < EPS));
    }

    #[test]
    fn test_inaudible_kill() {
        let mixer = mixer();
        let asset = constant(&mixer, "a.wav", 0.5, 1024);
        let spatial = Spatial {
            position: [100.0, 0.0, 0.0],
            min_distance: 1.0,
            max_distance: 10.0,
            attenuation: AttenuationMode::LinearDistance,
            rolloff: 1.0,
        };
        let killed = mixer
            .play(
                &asset,
                &PlayRequest {
                    spatial: Some(spatial),
                    inaudible: InaudibleBehavior::Kill,
                    ..PlayRequest::default()
                },
            )
            .unwrap();
        let paused = mixer
            .play(&asset, &PlayRequest { spatial: Some(spatial), ..PlayRequest::default() })
            .unwrap();

        render(&mixer, 8);
        assert!(!mixer.is_valid_voice(killed));
        assert!(mixer.is_valid_voice(paused));

        // Moving the listener close makes it audible again
        mixer.set_listener(Listener {
            position: [100.0, 0.0, 0.0],
            ..Listener::default()
        });
        mixer.update_3d();
        assert!(render(&mixer, 4).iter().all(|s| (s - 0.5).abs() < EPS));
    }

    #[test]
    fn test_global_volume_and_clipper() {
        let mixer = mixer();
        let asset = constant(&mixer, "loud.wav", 1.0, 64);
        mixer.play(&asset, &PlayRequest::default()).unwrap();
        mixer.play(&asset, &PlayRequest::default()).unwrap();

        assert!(render(&mixer, 4).iter().all(|&s| s == 1.0));
        mixer.set_global_volume(0.25);
        assert!(render(&mixer, 4).iter().all(|s| (s - 0.5).abs() < EPS));
    }

    #[test]
    fn test_unloaded_asset_cannot_play() {
        let mixer = mixer();
        let asset = constant(&mixer, "a.wav", 0.5, 64);
        let voice = mixer.play(&asset, &PlayRequest::default()).unwrap();
        mixer.unload_asset(&asset);
        assert!(!mixer.is_valid_voice(voice));
        assert!(mixer.play(&asset, &PlayRequest::default()).is_err());
    }
}
