//! A single node of the bus graph
//!
//! A bus sums its inputs, applies volume, mute, mono and a chain of
//! [`FILTER_SLOTS`] filter slots, and forwards into its output bus. While
//! active it owns exactly one live mixer bus handle.
//!
//! Filter slots keep a cache of parameter values that survives disabling
//! the slot and deactivating the bus. The cache is what gets pushed to the
//! mixer whenever a live filter is (re)bound, since fresh instances start
//! from engine defaults.

use crate::domain::audio::{BusHandle, EngineError, Result};
use crate::domain::filter::{self, SharedFilter, FILTER_SLOTS};
use crate::domain::layout::{BusData, FilterBlockData, FilterData};
use crate::domain::mixer::{db_to_linear, linear_to_db, Mixer};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Reserved name of the root bus
pub const MASTER_BUS: &str = "Master";

/// Channel count of a non-mono bus
pub const DEFAULT_BUS_CHANNELS: u16 = 2;

/// dB reported for a silent (zero gain) volume
pub const MIN_VOLUME_DB: f32 = -100.0;

/// One filter position on a bus
#[derive(Clone)]
pub struct FilterSlot {
    filter: Option<SharedFilter>,
    enabled: bool,
    params: Vec<f32>,
}

impl Default for FilterSlot {
    fn default() -> Self {
        Self {
            filter: None,
            enabled: true,
            params: Vec::new(),
        }
    }
}

impl FilterSlot {
    pub fn filter(&self) -> Option<&SharedFilter> {
        self.filter.as_ref()
    }

    pub fn filter_name(&self) -> Option<&str> {
        self.filter.as_ref().map(|f| f.name())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Cached parameter values, in schema order
    pub fn params(&self) -> &[f32] {
        &self.params
    }

    fn is_live(&self) -> bool {
        self.enabled && self.filter.is_some()
    }
}

impl fmt::Debug for FilterSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterSlot")
            .field("filter", &self.filter_name())
            .field("enabled", &self.enabled)
            .field("params", &self.params)
            .finish()
    }
}

/// Mixing bus
pub struct Bus {
    name: String,
    output: String,
    volume_db: f32,
    volume_linear: f32,
    muted: bool,
    mono: bool,
    visualization: bool,
    slots: [FilterSlot; FILTER_SLOTS],
    live: Option<BusHandle>,
    mixer: Arc<dyn Mixer>,
}

impl Bus {
    /// New inactive bus routed into Master
    pub fn new(name: impl Into<String>, mixer: Arc<dyn Mixer>) -> Self {
        let name = name.into();
        let output = if name == MASTER_BUS {
            String::new()
        } else {
            MASTER_BUS.to_string()
        };

        Self {
            name,
            output,
            volume_db: 0.0,
            volume_linear: 1.0,
            muted: false,
            mono: false,
            visualization: false,
            slots: std::array::from_fn(|_| FilterSlot::default()),
            live: None,
            mixer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output_name(&self) -> &str {
        &self.output
    }

    pub fn is_master(&self) -> bool {
        self.name == MASTER_BUS
    }

    pub fn volume_db(&self) -> f32 {
        self.volume_db
    }

    pub fn volume_linear(&self) -> f32 {
        self.volume_linear
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_mono(&self) -> bool {
        self.mono
    }

    pub fn channels(&self) -> u16 {
        if self.mono {
            1
        } else {
            DEFAULT_BUS_CHANNELS
        }
    }

    pub fn is_active(&self) -> bool {
        self.live.is_some()
    }

    pub fn live_handle(&self) -> Option<BusHandle> {
        self.live
    }

    pub fn is_visualization_enabled(&self) -> bool {
        self.visualization
    }

    pub fn slots(&self) -> &[FilterSlot] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> Result<&FilterSlot> {
        self.slots.get(index).ok_or_else(|| slot_out_of_range(index))
    }

    /// Attach to the mixer
    ///
    /// `output` is the live handle of this bus's output; Master ignores it.
    /// Returns immediately when already active.
    pub fn activate(&mut self, output: Option<BusHandle>) -> Result<()> {
        if self.live.is_some() {
            return Ok(());
        }

        let handle = if self.is_master() {
            self.mixer.open_root_bus(self.channels())?
        } else {
            let Some(parent) = output else {
                error!(
                    bus = %self.name,
                    output = %self.output,
                    "Output bus is not active, cannot activate"
                );
                return Err(EngineError::BusNotFound(self.output.clone()));
            };
            self.mixer.open_sub_bus(parent, self.channels())?
        };

        self.live = Some(handle);
        self.mixer.set_bus_volume(handle, self.effective_gain());
        self.mixer.set_bus_visualization(handle, self.visualization);
        for index in 0..FILTER_SLOTS {
            self.bind_slot(index);
        }

        debug!(bus = %self.name, handle = handle.raw(), "Bus activated");
        Ok(())
    }

    /// Release the live handle; cached state is kept
    pub fn deactivate(&mut self) {
        if let Some(handle) = self.live.take() {
            self.mixer.close_bus(handle);
            debug!(bus = %self.name, "Bus deactivated");
        }
    }

    /// Route into `output`
    ///
    /// The graph checks that `output` exists and precedes this bus;
    /// `output_live` is its live handle, used for a hot re-parent.
    pub fn set_output_name(&mut self, output: &str, output_live: Option<BusHandle>) -> Result<()> {
        if output == self.output {
            return Ok(());
        }
        if output == self.name {
            return Err(EngineError::InvalidArgument(format!(
                "bus '{}' cannot output to itself",
                self.name
            )));
        }
        if self.is_master() {
            return Err(EngineError::InvalidArgument(
                "Master has no output bus".to_string(),
            ));
        }

        if let (Some(handle), Some(parent)) = (self.live, output_live) {
            self.mixer.annex_bus(handle, parent)?;
        }

        debug!(bus = %self.name, from = %self.output, to = %output, "Output changed");
        self.output = output.to_string();
        Ok(())
    }

    pub fn set_volume_db(&mut self, db: f32) {
        self.volume_db = db;
        self.volume_linear = db_to_linear(db);
        self.push_volume();
    }

    pub fn set_volume_linear(&mut self, linear: f32) {
        self.volume_linear = linear.max(0.0);
        self.volume_db = if self.volume_linear > 0.0 {
            linear_to_db(self.volume_linear)
        } else {
            MIN_VOLUME_DB
        };
        self.push_volume();
    }

    pub fn set_muted(&mut self, muted: bool) {
        if self.muted == muted {
            return;
        }
        self.muted = muted;
        self.push_volume();
    }

    /// Change the channel count
    ///
    /// Returns true when the bus is live, in which case the whole graph has
    /// to be deactivated and reactivated for the new layout to take effect.
    pub fn set_mono(&mut self, mono: bool) -> bool {
        if self.mono == mono {
            return false;
        }
        self.mono = mono;
        debug!(bus = %self.name, mono, "Channel layout changed");
        self.live.is_some()
    }

    pub fn set_visualization_enabled(&mut self, enabled: bool) {
        self.visualization = enabled;
        if let Some(handle) = self.live {
            self.mixer.set_bus_visualization(handle, enabled);
        }
    }

    /// Per-channel peaks of the live mix, empty while inactive
    pub fn peak_volumes(&self) -> Vec<f32> {
        match self.live {
            Some(handle) => self.mixer.bus_peak_volumes(handle),
            None => Vec::new(),
        }
    }

    /// Assign or clear a slot's filter
    ///
    /// Assigning captures the filter's default values into the slot cache.
    pub fn set_filter(&mut self, index: usize, filter: Option<SharedFilter>) -> Result<()> {
        if index >= FILTER_SLOTS {
            return Err(slot_out_of_range(index));
        }

        let was_live = self.slots[index].is_live();
        match filter {
            Some(filter) => {
                let slot = &mut self.slots[index];
                slot.params = filter::default_params(filter.as_ref());
                debug!(bus = %self.name, slot = index, filter = filter.name(), "Filter assigned");
                slot.filter = Some(filter);
                self.bind_slot(index);
            }
            None => {
                let slot = &mut self.slots[index];
                slot.filter = None;
                slot.params.clear();
                if was_live {
                    if let Some(handle) = self.live {
                        self.mixer.set_bus_filter(handle, index, None);
                    }
                }
                debug!(bus = %self.name, slot = index, "Filter cleared");
            }
        }
        Ok(())
    }

    /// Enable or disable a slot without touching its cached values
    pub fn set_filter_enabled(&mut self, index: usize, enabled: bool) -> Result<()> {
        if index >= FILTER_SLOTS {
            return Err(slot_out_of_range(index));
        }
        if self.slots[index].enabled == enabled {
            return Ok(());
        }

        self.slots[index].enabled = enabled;
        if enabled {
            self.bind_slot(index);
        } else if let (Some(handle), true) = (self.live, self.slots[index].filter.is_some()) {
            self.mixer.set_bus_filter(handle, index, None);
        }
        trace!(bus = %self.name, slot = index, enabled, "Filter slot toggled");
        Ok(())
    }

    /// Replace every cached value of a slot
    pub fn set_filter_params(&mut self, index: usize, values: &[f32]) -> Result<()> {
        let expected = self.filter_of(index)?.params().len();
        if values.len() != expected {
            return Err(EngineError::InvalidArgument(format!(
                "expected {} filter parameters, got {}",
                expected,
                values.len()
            )));
        }

        self.slots[index].params = values.to_vec();
        self.push_params(index);
        Ok(())
    }

    pub fn set_filter_param(&mut self, index: usize, param: usize, value: f32) -> Result<()> {
        let filter = self.filter_of(index)?;
        if param >= filter.params().len() {
            return Err(EngineError::InvalidArgument(format!(
                "filter '{}' has no parameter #{}",
                filter.name(),
                param
            )));
        }

        self.slots[index].params[param] = value;
        if let (Some(handle), true) = (self.live, self.slots[index].is_live()) {
            self.mixer.set_bus_filter_param(handle, index, param, value);
        }
        Ok(())
    }

    /// Set a parameter by name, returning its index
    pub fn set_filter_param_by_name(&mut self, index: usize, param: &str, value: f32) -> Result<usize> {
        let filter = self.filter_of(index)?;
        let param_index = filter::param_index(filter.as_ref(), param).map_err(|e| {
            warn!(bus = %self.name, slot = index, param, "Unknown filter parameter");
            e
        })?;
        self.set_filter_param(index, param_index, value)?;
        Ok(param_index)
    }

    pub fn filter_params(&self, index: usize) -> Result<&[f32]> {
        Ok(self.slot(index)?.params())
    }

    /// Snapshot for persistence
    pub fn gather_bus_data(&self) -> BusData {
        let mut block = FilterBlockData::default();
        for (data, slot) in block.filters.iter_mut().zip(self.slots.iter()) {
            *data = match &slot.filter {
                Some(filter) => filter::describe(filter.as_ref(), &slot.params),
                None => FilterData::default(),
            };
            data.enabled = slot.enabled;
        }

        BusData {
            name: self.name.clone(),
            output_bus_name: self.output.clone(),
            volume: self.volume_db,
            muted: self.muted,
            mono: self.mono,
            filter_block: block,
        }
    }

    pub(crate) fn rename(&mut self, name: &str) {
        self.name = name.to_string();
    }

    /// Rewrite the output reference without any live re-attach
    pub(crate) fn retarget_output(&mut self, output: &str) {
        self.output = output.to_string();
    }

    fn filter_of(&self, index: usize) -> Result<SharedFilter> {
        self.slot(index)?.filter.clone().ok_or_else(|| {
            EngineError::InvalidArgument(format!(
                "filter slot {} of bus '{}' is empty",
                index, self.name
            ))
        })
    }

    fn effective_gain(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume_linear
        }
    }

    fn push_volume(&self) {
        if let Some(handle) = self.live {
            self.mixer.set_bus_volume(handle, self.effective_gain());
        }
    }

    /// Bind the slot's filter live and push its cached values
    fn bind_slot(&self, index: usize) {
        let (Some(handle), slot) = (self.live, &self.slots[index]) else {
            return;
        };
        if !slot.is_live() {
            return;
        }
        self.mixer.set_bus_filter(handle, index, slot.filter.clone());
        self.push_params(index);
    }

    fn push_params(&self, index: usize) {
        let (Some(handle), slot) = (self.live, &self.slots[index]) else {
            return;
        };
        if !slot.is_live() {
            return;
        }
        for (param, value) in slot.params.iter().enumerate() {
            self.mixer.set_bus_filter_param(handle, index, param, *value);
        }
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("name", &self.name)
            .field("output", &self.output)
            .field("volume_db", &self.volume_db)
            .field("muted", &self.muted)
            .field("mono", &self.mono)
            .field("slots", &self.slots)
            .field("live", &self.live)
            .finish()
    }
}

fn slot_out_of_range(index: usize) -> EngineError {
    EngineError::InvalidArgument(format!(
        "filter slot {} out of range (0..{})",
        index, FILTER_SLOTS
    ))
}
