//! Request and notification surface
//!
//! Every mutating [`Request`] answers with a matching [`Notification`] that
//! carries the affected identity and an [`Outcome`]. Notifications are only
//! produced after the request's state change has fully applied.

use crate::domain::audio::{AssetData, AssetId, EngineError, Listener, ObjectId, Result, Vec3};
use crate::domain::engine::AudioEngine;
use crate::domain::filter::SharedFilter;
use crate::domain::layout::{BusData, BusLayoutData, FilterData};
use crate::domain::trigger::{AudioAction, RtpcDef, TriggerDef};
use crate::domain::voice::Event;
use tracing::warn;

/// Control-path requests
#[derive(Debug, Clone)]
pub enum Request {
    // Graph structure
    AddBus { name: String },
    DestroyBus { name: String },
    RenameBus { old: String, new: String },
    ReorderBus { index: usize, new_index: usize },
    SetOutput { bus: String, output: String },
    ResetLayout,
    LoadLayout { layout: BusLayoutData },

    // Bus parameters
    SetVolumeDb { bus: String, volume_db: f32 },
    SetVolumeLinear { bus: String, volume: f32 },
    SetMuted { bus: String, muted: bool },
    SetMono { bus: String, mono: bool },
    SetFilter { bus: String, slot: usize, filter: Option<String> },
    SetFilterEnabled { bus: String, slot: usize, enabled: bool },
    SetFilterParam { bus: String, slot: usize, param: String, value: f32 },
    SetVisualization { enabled: bool },

    // Catalog and assets
    RegisterFilter { filter: SharedFilter },
    RegisterAsset { asset: AssetId, data: AssetData },
    UnregisterAsset { asset: AssetId },

    // Objects and voices
    RegisterObject { object: ObjectId },
    UnregisterObject { object: ObjectId },
    ResetObject { object: ObjectId },
    SetPosition { object: ObjectId, position: Vec3 },
    SetListener { listener: Listener },
    ActivateTrigger { object: ObjectId, trigger: TriggerDef },
    StopEvent { object: ObjectId, event: Event },
    StopAllEvents { object: ObjectId },
    StopAllSounds,
    SetRtpc { object: ObjectId, rtpc: RtpcDef, value: f32 },
    MuteAll,
    UnmuteAll,
    LoseFocus,
    GetFocus,
    Update,

    // Queries
    GetLayout,
    GetBusNames,
    GetFilters,
    GetPeakVolumes { bus: String },
    GetBusData { bus: String },
}

/// Success flag plus the error that caused a failure
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Outcome {
    pub error: Option<EngineError>,
}

impl Outcome {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

impl From<Result<()>> for Outcome {
    fn from(result: Result<()>) -> Self {
        Self { error: result.err() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    BusAdded { name: String, index: Option<usize>, outcome: Outcome },
    BusDestroyed { name: String, outcome: Outcome },
    BusRenamed { old: String, new: String, outcome: Outcome },
    BusReordered { index: usize, new_index: usize, outcome: Outcome },
    OutputChanged { bus: String, output: String, outcome: Outcome },
    LayoutReset { outcome: Outcome },
    LayoutLoaded { outcome: Outcome },

    VolumeChanged { bus: String, volume_db: f32, volume: f32, outcome: Outcome },
    MuteChanged { bus: String, muted: bool, outcome: Outcome },
    MonoChanged { bus: String, mono: bool, outcome: Outcome },
    FilterChanged { bus: String, slot: usize, filter: Option<String>, outcome: Outcome },
    FilterEnabledChanged { bus: String, slot: usize, enabled: bool, outcome: Outcome },
    FilterParamChanged {
        bus: String,
        slot: usize,
        param: String,
        index: Option<usize>,
        value: f32,
        outcome: Outcome,
    },
    VisualizationChanged { enabled: bool },

    FilterRegistered { name: String, outcome: Outcome },
    AssetRegistered { asset: AssetId, outcome: Outcome },
    AssetUnregistered { asset: AssetId, outcome: Outcome },

    ObjectRegistered { object: ObjectId, outcome: Outcome },
    ObjectUnregistered { object: ObjectId, outcome: Outcome },
    ObjectReset { object: ObjectId, outcome: Outcome },
    PositionChanged { object: ObjectId, outcome: Outcome },
    ListenerChanged,
    TriggerActivated {
        object: ObjectId,
        asset: AssetId,
        action: AudioAction,
        event: Event,
        outcome: Outcome,
    },
    EventStopped { object: ObjectId, event: Event, outcome: Outcome },
    AllEventsStopped { object: ObjectId, outcome: Outcome },
    AllSoundsStopped,
    RtpcApplied { object: ObjectId, rtpc: RtpcDef, value: f32, outcome: Outcome },
    MuteAllChanged { muted: bool },
    FocusChanged { focused: bool },
    Updated { swept: usize },

    LayoutUpdated { layout: BusLayoutData },
    BusNamesUpdated { names: Vec<String> },
    FiltersUpdated { filters: Vec<FilterData> },
    PeakVolumes { bus: String, peaks: Vec<f32>, outcome: Outcome },
    BusDataUpdated { bus: String, data: Option<BusData>, outcome: Outcome },
}

impl Notification {
    /// False only for notifications reporting a failed request
    pub fn success(&self) -> bool {
        self.outcome().map_or(true, Outcome::success)
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        use Notification::*;
        match self {
            BusAdded { outcome, .. }
            | BusDestroyed { outcome, .. }
            | BusRenamed { outcome, .. }
            | BusReordered { outcome, .. }
            | OutputChanged { outcome, .. }
            | LayoutReset { outcome }
            | LayoutLoaded { outcome }
            | VolumeChanged { outcome, .. }
            | MuteChanged { outcome, .. }
            | MonoChanged { outcome, .. }
            | FilterChanged { outcome, .. }
            | FilterEnabledChanged { outcome, .. }
            | FilterParamChanged { outcome, .. }
            | FilterRegistered { outcome, .. }
            | AssetRegistered { outcome, .. }
            | AssetUnregistered { outcome, .. }
            | ObjectRegistered { outcome, .. }
            | ObjectUnregistered { outcome, .. }
            | ObjectReset { outcome, .. }
            | PositionChanged { outcome, .. }
            | TriggerActivated { outcome, .. }
            | EventStopped { outcome, .. }
            | AllEventsStopped { outcome, .. }
            | RtpcApplied { outcome, .. }
            | PeakVolumes { outcome, .. }
            | BusDataUpdated { outcome, .. } => Some(outcome),
            VisualizationChanged { .. }
            | ListenerChanged
            | AllSoundsStopped
            | MuteAllChanged { .. }
            | FocusChanged { .. }
            | Updated { .. }
            | LayoutUpdated { .. }
            | BusNamesUpdated { .. }
            | FiltersUpdated { .. } => None,
        }
    }
}

/// Queue-backed request execution
#[async_trait::async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, request: Request) -> Vec<Notification>;
}

fn outcome(operation: &str, result: Result<()>) -> Outcome {
    if let Err(e) = &result {
        warn!(operation, error = %e, "Request rejected");
    }
    result.into()
}

impl AudioEngine {
    /// Apply one request and report what happened
    pub fn handle(&mut self, request: Request) -> Vec<Notification> {
        match request {
            Request::AddBus { name } => {
                let added = self.add_bus(&name);
                let index = added.as_ref().ok().copied();
                vec![Notification::BusAdded {
                    outcome: outcome("add_bus", added.map(|_| ())),
                    name,
                    index,
                }]
            }
            Request::DestroyBus { name } => {
                let result = self.graph_mut().destroy_bus(&name);
                vec![Notification::BusDestroyed {
                    name,
                    outcome: outcome("destroy_bus", result),
                }]
            }
            Request::RenameBus { old, new } => {
                let result = self.graph_mut().rename_bus(&old, &new);
                vec![Notification::BusRenamed {
                    old,
                    new,
                    outcome: outcome("rename_bus", result),
                }]
            }
            Request::ReorderBus { index, new_index } => {
                match self.graph_mut().reorder_bus(index, new_index) {
                    Ok(reordered) => {
                        let mut notifications = vec![Notification::BusReordered {
                            index,
                            new_index,
                            outcome: Outcome::ok(),
                        }];
                        notifications.extend(reordered.outputs_reset.into_iter().map(|bus| {
                            Notification::OutputChanged {
                                bus,
                                output: crate::domain::mixer::bus::MASTER_BUS.to_string(),
                                outcome: Outcome::ok(),
                            }
                        }));
                        notifications
                    }
                    Err(e) => vec![Notification::BusReordered {
                        index,
                        new_index,
                        outcome: outcome("reorder_bus", Err(e)),
                    }],
                }
            }
            Request::SetOutput { bus, output } => {
                let result = self.graph_mut().set_output(&bus, &output);
                vec![Notification::OutputChanged {
                    bus,
                    output,
                    outcome: outcome("set_output", result),
                }]
            }
            Request::ResetLayout => {
                let result = self.reset_layout();
                let mut notifications = vec![Notification::LayoutReset {
                    outcome: outcome("reset_layout", result),
                }];
                notifications.extend(self.layout_snapshot());
                notifications
            }
            Request::LoadLayout { layout } => {
                let result = self.load_layout(&layout);
                let mut notifications = vec![Notification::LayoutLoaded {
                    outcome: outcome("load_layout", result),
                }];
                notifications.extend(self.layout_snapshot());
                notifications
            }

            Request::SetVolumeDb { bus, volume_db } => {
                let result = self.graph_mut().set_volume_db(&bus, volume_db);
                vec![self.volume_changed(bus, result)]
            }
            Request::SetVolumeLinear { bus, volume } => {
                let result = self.graph_mut().set_volume_linear(&bus, volume);
                vec![self.volume_changed(bus, result)]
            }
            Request::SetMuted { bus, muted } => {
                let result = self.graph_mut().set_muted(&bus, muted);
                vec![Notification::MuteChanged {
                    bus,
                    muted,
                    outcome: outcome("set_muted", result),
                }]
            }
            Request::SetMono { bus, mono } => {
                let result = self.graph_mut().set_mono(&bus, mono);
                vec![Notification::MonoChanged {
                    bus,
                    mono,
                    outcome: outcome("set_mono", result),
                }]
            }
            Request::SetFilter { bus, slot, filter } => {
                let result = self.set_bus_filter(&bus, slot, filter.as_deref());
                vec![Notification::FilterChanged {
                    bus,
                    slot,
                    filter,
                    outcome: outcome("set_filter", result),
                }]
            }
            Request::SetFilterEnabled { bus, slot, enabled } => {
                let result = self.graph_mut().set_filter_enabled(&bus, slot, enabled);
                vec![Notification::FilterEnabledChanged {
                    bus,
                    slot,
                    enabled,
                    outcome: outcome("set_filter_enabled", result),
                }]
            }
            Request::SetFilterParam {
                bus,
                slot,
                param,
                value,
            } => {
                let result = self
                    .graph_mut()
                    .set_filter_param_by_name(&bus, slot, &param, value);
                let index = result.as_ref().ok().copied();
                vec![Notification::FilterParamChanged {
                    bus,
                    slot,
                    param,
                    index,
                    value,
                    outcome: outcome("set_filter_param", result.map(|_| ())),
                }]
            }
            Request::SetVisualization { enabled } => {
                self.graph_mut().set_visualization_enabled(enabled);
                vec![Notification::VisualizationChanged { enabled }]
            }

            Request::RegisterFilter { filter } => {
                let name = filter.name().to_string();
                let result = self.register_filter(filter);
                let success = result.is_ok();
                let mut notifications = vec![Notification::FilterRegistered {
                    name,
                    outcome: outcome("register_filter", result),
                }];
                if success {
                    notifications.push(Notification::FiltersUpdated {
                        filters: self.catalog().all_filter_data(),
                    });
                }
                notifications
            }
            Request::RegisterAsset { asset, data } => {
                let result = self.register_asset(asset.clone(), data);
                vec![Notification::AssetRegistered {
                    asset,
                    outcome: outcome("register_asset", result),
                }]
            }
            Request::UnregisterAsset { asset } => {
                let result = self.unregister_asset(&asset);
                vec![Notification::AssetUnregistered {
                    asset,
                    outcome: outcome("unregister_asset", result),
                }]
            }

            Request::RegisterObject { object } => vec![Notification::ObjectRegistered {
                object,
                outcome: outcome("register_object", self.register_object(object)),
            }],
            Request::UnregisterObject { object } => vec![Notification::ObjectUnregistered {
                object,
                outcome: outcome("unregister_object", self.unregister_object(object)),
            }],
            Request::ResetObject { object } => vec![Notification::ObjectReset {
                object,
                outcome: outcome("reset_object", self.reset_object(object)),
            }],
            Request::SetPosition { object, position } => vec![Notification::PositionChanged {
                object,
                outcome: outcome("set_position", self.set_position(object, position)),
            }],
            Request::SetListener { listener } => {
                self.set_listener(listener);
                vec![Notification::ListenerChanged]
            }
            Request::ActivateTrigger { object, trigger } => {
                let result = self.activate_trigger(object, &trigger);
                let event = result.as_ref().copied().unwrap_or_default();
                vec![Notification::TriggerActivated {
                    object,
                    action: trigger.params.action,
                    asset: trigger.asset,
                    event,
                    outcome: outcome("activate_trigger", result.map(|_| ())),
                }]
            }
            Request::StopEvent { object, event } => vec![Notification::EventStopped {
                object,
                event,
                outcome: outcome("stop_event", self.stop_event(object, event)),
            }],
            Request::StopAllEvents { object } => vec![Notification::AllEventsStopped {
                object,
                outcome: outcome("stop_all_events", self.stop_all_events(object)),
            }],
            Request::StopAllSounds => {
                self.stop_all_sounds();
                vec![Notification::AllSoundsStopped]
            }
            Request::SetRtpc { object, rtpc, value } => {
                let result = self.set_rtpc(object, &rtpc, value);
                vec![Notification::RtpcApplied {
                    object,
                    rtpc,
                    value,
                    outcome: outcome("set_rtpc", result),
                }]
            }
            Request::MuteAll => {
                self.mute_all();
                vec![Notification::MuteAllChanged { muted: true }]
            }
            Request::UnmuteAll => {
                self.unmute_all();
                vec![Notification::MuteAllChanged { muted: false }]
            }
            Request::LoseFocus => {
                self.lose_focus();
                vec![Notification::FocusChanged { focused: false }]
            }
            Request::GetFocus => {
                self.get_focus();
                vec![Notification::FocusChanged { focused: true }]
            }
            Request::Update => vec![Notification::Updated {
                swept: self.update(),
            }],

            Request::GetLayout => vec![Notification::LayoutUpdated {
                layout: self.gather_layout(),
            }],
            Request::GetBusNames => vec![Notification::BusNamesUpdated {
                names: self.graph().bus_names(),
            }],
            Request::GetFilters => vec![Notification::FiltersUpdated {
                filters: self.catalog().all_filter_data(),
            }],
            Request::GetPeakVolumes { bus } => {
                let result = self.peak_volumes(&bus);
                let peaks = result.as_ref().cloned().unwrap_or_default();
                vec![Notification::PeakVolumes {
                    bus,
                    peaks,
                    outcome: outcome("get_peak_volumes", result.map(|_| ())),
                }]
            }
            Request::GetBusData { bus } => {
                let data = self.graph().bus(&bus).map(|b| b.gather_bus_data());
                let result = match data {
                    Some(_) => Ok(()),
                    None => Err(EngineError::BusNotFound(bus.clone())),
                };
                vec![Notification::BusDataUpdated {
                    bus,
                    data,
                    outcome: outcome("get_bus_data", result),
                }]
            }
        }
    }

    fn layout_snapshot(&self) -> [Notification; 2] {
        [
            Notification::LayoutUpdated {
                layout: self.gather_layout(),
            },
            Notification::BusNamesUpdated {
                names: self.graph().bus_names(),
            },
        ]
    }

    fn volume_changed(&self, bus: String, result: Result<()>) -> Notification {
        let (volume_db, volume) = self
            .graph()
            .bus(&bus)
            .map_or((0.0, 0.0), |b| (b.volume_db(), b.volume_linear()));
        Notification::VolumeChanged {
            bus,
            volume_db,
            volume,
            outcome: outcome("set_volume", result),
        }
    }
}
