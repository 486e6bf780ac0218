//! Per-object voice tracking
//!
//! Every audio object keeps a multimap from asset to the voices it started,
//! since one object may play the same asset several times at once. Entries
//! are removed on stop and swept once the mixer reports their handle as no
//! longer valid.

use crate::domain::audio::{AssetId, ObjectId, Vec3, VoiceHandle};
use crate::domain::mixer::Mixer;
use std::collections::HashMap;
use tracing::trace;

/// Opaque result of a trigger, correlated to at most one voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Event {
    voice: Option<VoiceHandle>,
}

impl Event {
    /// Event that did not start a voice (stop, pause, resume)
    pub fn none() -> Self {
        Self { voice: None }
    }

    pub fn playing(voice: VoiceHandle) -> Self {
        Self { voice: Some(voice) }
    }

    pub fn voice(&self) -> Option<VoiceHandle> {
        self.voice
    }

    pub fn is_play_event(&self) -> bool {
        self.voice.is_some()
    }
}

/// A started voice and the volume bookkeeping needed to recompute it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedVoice {
    pub handle: VoiceHandle,
    /// Trigger volume at start time
    pub baseline: f32,
    /// Last per-object volume RTPC applied to this voice
    pub object_scale: f32,
}

impl TrackedVoice {
    pub fn new(handle: VoiceHandle, baseline: f32) -> Self {
        Self {
            handle,
            baseline,
            object_scale: 1.0,
        }
    }

    /// Volume to push given the asset's shared base volume
    pub fn effective_volume(&self, asset_base: f32) -> f32 {
        asset_base * self.baseline * self.object_scale
    }
}

#[derive(Debug, Clone, Default)]
pub struct AudioObject {
    position: Vec3,
    voices: HashMap<AssetId, Vec<TrackedVoice>>,
}

impl AudioObject {
    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    pub fn insert(&mut self, asset: AssetId, voice: TrackedVoice) {
        self.voices.entry(asset).or_default().push(voice);
    }

    pub fn voices_of(&self, asset: &AssetId) -> &[TrackedVoice] {
        self.voices.get(asset).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn voices_of_mut(&mut self, asset: &AssetId) -> &mut [TrackedVoice] {
        self.voices
            .get_mut(asset)
            .map(Vec::as_mut_slice)
            .unwrap_or(&mut [])
    }

    /// Remove every entry for `asset`
    pub fn remove_asset(&mut self, asset: &AssetId) -> Vec<TrackedVoice> {
        self.voices.remove(asset).unwrap_or_default()
    }

    /// Remove the single entry owning `handle`
    pub fn remove_handle(&mut self, handle: VoiceHandle) -> Option<(AssetId, TrackedVoice)> {
        let (asset, position) = self.voices.iter().find_map(|(asset, voices)| {
            voices
                .iter()
                .position(|v| v.handle == handle)
                .map(|position| (asset.clone(), position))
        })?;

        let entries = self.voices.get_mut(&asset)?;
        let removed = entries.remove(position);
        if entries.is_empty() {
            self.voices.remove(&asset);
        }
        Some((asset, removed))
    }

    pub fn handles(&self) -> impl Iterator<Item = VoiceHandle> + '_ {
        self.voices.values().flatten().map(|v| v.handle)
    }

    /// Remove and return every entry
    pub fn drain(&mut self) -> Vec<TrackedVoice> {
        self.voices.drain().flat_map(|(_, voices)| voices).collect()
    }

    /// Drop entries whose handle the mixer no longer knows
    pub fn sweep(&mut self, mixer: &dyn Mixer) -> usize {
        let mut removed = 0;
        self.voices.retain(|asset, voices| {
            let before = voices.len();
            voices.retain(|v| mixer.is_valid_voice(v.handle));
            if voices.len() != before {
                trace!(asset = %asset, finished = before - voices.len(), "Swept finished voices");
            }
            removed += before - voices.len();
            !voices.is_empty()
        });
        removed
    }

    pub fn voice_count(&self) -> usize {
        self.voices.values().map(Vec::len).sum()
    }

    pub fn assets(&self) -> impl Iterator<Item = &AssetId> + '_ {
        self.voices.keys()
    }
}

/// All audio objects and their voices
#[derive(Debug, Clone, Default)]
pub struct VoiceTracker {
    objects: HashMap<ObjectId, AudioObject>,
}

impl VoiceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the object was already registered
    pub fn register(&mut self, id: ObjectId) -> bool {
        if self.objects.contains_key(&id) {
            return false;
        }
        self.objects.insert(id, AudioObject::default());
        true
    }

    pub fn unregister(&mut self, id: ObjectId) -> Option<AudioObject> {
        self.objects.remove(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn object(&self, id: ObjectId) -> Option<&AudioObject> {
        self.objects.get(&id)
    }

    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut AudioObject> {
        self.objects.get_mut(&id)
    }

    /// The object, registering it first if needed
    pub fn object_entry(&mut self, id: ObjectId) -> &mut AudioObject {
        self.objects.entry(id).or_default()
    }

    pub fn object_ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.objects.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn objects_mut(&mut self) -> impl Iterator<Item = (&ObjectId, &mut AudioObject)> + '_ {
        self.objects.iter_mut()
    }

    /// Liveness sweep over every object
    pub fn sweep(&mut self, mixer: &dyn Mixer) -> usize {
        self.objects.values_mut().map(|o| o.sweep(mixer)).sum()
    }

    /// Every tracked voice of `asset`, across all objects
    pub fn voices_of_asset_mut<'a>(
        &'a mut self,
        asset: &'a AssetId,
    ) -> impl Iterator<Item = &'a mut TrackedVoice> + 'a {
        self.objects
            .values_mut()
            .flat_map(move |o| o.voices_of_mut(asset).iter_mut())
    }

    pub fn total_voices(&self) -> usize {
        self.objects.values().map(AudioObject::voice_count).sum()
    }

    /// Forget every voice, keeping the objects
    pub fn clear_voices(&mut self) {
        for object in self.objects.values_mut() {
            object.voices.clear();
        }
    }
}
