//! Ordered bus graph
//!
//! Buses live in a list whose position doubles as activation order: Master
//! sits at index 0 and every other bus outputs into a bus at a lower index.
//! Activating from index 0 upward therefore always finds a bus's output
//! already live. Every mutation below either keeps that ordering or resets
//! the offending output to Master.

use crate::domain::audio::{BusHandle, EngineError, Result};
use crate::domain::filter::{self, FilterCatalog, SharedFilter, FILTER_SLOTS};
use crate::domain::layout::{BusData, BusLayoutData};
use crate::domain::mixer::bus::{Bus, MASTER_BUS};
use crate::domain::mixer::Mixer;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Side effects of a successful reorder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReorderOutcome {
    /// Buses whose output was reset to Master to keep the ordering valid
    pub outputs_reset: Vec<String>,
}

/// The ordered set of buses
pub struct BusGraph {
    buses: Vec<Bus>,
    visualization: bool,
    mixer: Arc<dyn Mixer>,
}

impl BusGraph {
    /// Graph holding only an inactive Master
    pub fn new(mixer: Arc<dyn Mixer>) -> Self {
        let master = Bus::new(MASTER_BUS, mixer.clone());
        Self {
            buses: vec![master],
            visualization: false,
            mixer,
        }
    }

    pub fn len(&self) -> usize {
        self.buses.len()
    }

    /// Never true, Master always exists
    pub fn is_empty(&self) -> bool {
        self.buses.is_empty()
    }

    pub fn buses(&self) -> &[Bus] {
        &self.buses
    }

    pub fn master(&self) -> &Bus {
        &self.buses[0]
    }

    pub fn bus(&self, name: &str) -> Option<&Bus> {
        self.buses.iter().find(|b| b.name() == name)
    }

    pub fn bus_mut(&mut self, name: &str) -> Option<&mut Bus> {
        self.buses.iter_mut().find(|b| b.name() == name)
    }

    pub fn bus_at(&self, index: usize) -> Option<&Bus> {
        self.buses.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.buses.iter().position(|b| b.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn bus_names(&self) -> Vec<String> {
        self.buses.iter().map(|b| b.name().to_string()).collect()
    }

    pub fn is_visualization_enabled(&self) -> bool {
        self.visualization
    }

    /// Live handle of a bus, `None` when unknown or inactive
    pub fn live_handle(&self, name: &str) -> Option<BusHandle> {
        self.bus(name).and_then(Bus::live_handle)
    }

    /// Drop every bus and start over with a fresh Master
    pub fn reset(&mut self) {
        self.deactivate_all();
        self.buses.clear();
        let mut master = Bus::new(MASTER_BUS, self.mixer.clone());
        master.set_visualization_enabled(self.visualization);
        self.buses.push(master);
        debug!("Bus graph reset");
    }

    /// Append a new bus routed into Master
    pub fn create_bus(&mut self, name: &str) -> Result<usize> {
        if name.is_empty() {
            return Err(EngineError::InvalidArgument("bus name is empty".to_string()));
        }
        if self.contains(name) {
            warn!(bus = %name, "Bus already exists");
            return Err(EngineError::Conflict(format!("bus '{}' already exists", name)));
        }

        let mut bus = Bus::new(name, self.mixer.clone());
        bus.set_visualization_enabled(self.visualization);
        self.buses.push(bus);
        debug!(bus = %name, index = self.buses.len() - 1, "Bus created");
        Ok(self.buses.len() - 1)
    }

    pub fn destroy_bus(&mut self, name: &str) -> Result<()> {
        if name == MASTER_BUS {
            return Err(EngineError::InvalidArgument(
                "Master cannot be destroyed".to_string(),
            ));
        }
        let index = self.require_index(name)?;
        self.destroy_bus_at(index)
    }

    /// Destroy by position; children are re-routed into Master first
    pub fn destroy_bus_at(&mut self, index: usize) -> Result<()> {
        if index == 0 {
            return Err(EngineError::InvalidArgument(
                "Master cannot be destroyed".to_string(),
            ));
        }
        if index >= self.buses.len() {
            return Err(index_out_of_range(index, self.buses.len()));
        }

        let name = self.buses[index].name().to_string();
        let children: Vec<usize> = self.children_of(&name);
        for child in children {
            self.reroute_to_master(child);
        }

        let mut bus = self.buses.remove(index);
        bus.deactivate();
        info!(bus = %name, "Bus destroyed");
        Ok(())
    }

    pub fn rename_bus(&mut self, old: &str, new: &str) -> Result<()> {
        if new.is_empty() {
            return Err(EngineError::InvalidArgument("bus name is empty".to_string()));
        }
        if old == new {
            return Err(EngineError::InvalidArgument(format!(
                "bus '{}' already has that name",
                old
            )));
        }
        if old == MASTER_BUS {
            return Err(EngineError::InvalidArgument(
                "Master cannot be renamed".to_string(),
            ));
        }
        if new == MASTER_BUS || self.contains(new) {
            return Err(EngineError::Conflict(format!("bus '{}' already exists", new)));
        }
        let index = self.require_index(old)?;

        self.buses[index].rename(new);
        for bus in self.buses.iter_mut() {
            if bus.output_name() == old {
                bus.retarget_output(new);
            }
        }
        info!(from = %old, to = %new, "Bus renamed");
        Ok(())
    }

    /// Route `name` into `output`
    ///
    /// `output` must sit before `name` in the order.
    pub fn set_output(&mut self, name: &str, output: &str) -> Result<()> {
        let index = self.require_index(name)?;
        if self.buses[index].output_name() == output {
            return Ok(());
        }
        if name == MASTER_BUS {
            return Err(EngineError::InvalidArgument(
                "Master has no output bus".to_string(),
            ));
        }
        if name == output {
            return Err(EngineError::InvalidArgument(format!(
                "bus '{}' cannot output to itself",
                name
            )));
        }
        let output_index = self.require_index(output)?;
        if output_index >= index {
            return Err(EngineError::InvalidArgument(format!(
                "output '{}' (index {}) must precede bus '{}' (index {})",
                output, output_index, name, index
            )));
        }

        let output_live = self.buses[output_index].live_handle();
        self.buses[index].set_output_name(output, output_live)
    }

    /// Move the bus at `index` to `new_index`
    ///
    /// Any bus that would end up at or before its output (the moved bus, or
    /// one of its children when moving it later) is re-routed into Master.
    pub fn reorder_bus(&mut self, index: usize, new_index: usize) -> Result<ReorderOutcome> {
        if index == 0 || new_index == 0 {
            return Err(EngineError::InvalidArgument(
                "Master is pinned at index 0".to_string(),
            ));
        }
        let len = self.buses.len();
        if index >= len {
            return Err(index_out_of_range(index, len));
        }
        if new_index >= len {
            return Err(index_out_of_range(new_index, len));
        }
        if index == new_index {
            return Ok(ReorderOutcome::default());
        }

        let mut order: Vec<usize> = (0..len).collect();
        let moved = order.remove(index);
        order.insert(new_index, moved);

        let position: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(pos, &i)| (self.buses[i].name(), pos))
            .collect();
        let broken: Vec<usize> = order
            .iter()
            .enumerate()
            .skip(1)
            .filter(|&(pos, &i)| {
                position
                    .get(self.buses[i].output_name())
                    .map_or(true, |&out| out >= pos)
            })
            .map(|(_, &i)| i)
            .collect();

        let mut outcome = ReorderOutcome::default();
        for i in broken {
            outcome.outputs_reset.push(self.buses[i].name().to_string());
            self.reroute_to_master(i);
        }

        let bus = self.buses.remove(index);
        debug!(bus = %bus.name(), from = index, to = new_index, "Bus reordered");
        self.buses.insert(new_index, bus);
        Ok(outcome)
    }

    pub fn set_volume_db(&mut self, name: &str, db: f32) -> Result<()> {
        self.require_mut(name)?.set_volume_db(db);
        Ok(())
    }

    pub fn set_volume_linear(&mut self, name: &str, linear: f32) -> Result<()> {
        self.require_mut(name)?.set_volume_linear(linear);
        Ok(())
    }

    pub fn set_muted(&mut self, name: &str, muted: bool) -> Result<()> {
        self.require_mut(name)?.set_muted(muted);
        Ok(())
    }

    /// Change a bus's channel layout, rebuilding the live graph if needed
    pub fn set_mono(&mut self, name: &str, mono: bool) -> Result<()> {
        let rebuild = self.require_mut(name)?.set_mono(mono);
        if rebuild {
            info!(bus = %name, mono, "Rebuilding live graph for channel change");
            self.deactivate_all();
            self.activate_all()?;
        }
        Ok(())
    }

    pub fn set_filter(&mut self, name: &str, slot: usize, filter: Option<SharedFilter>) -> Result<()> {
        self.require_mut(name)?.set_filter(slot, filter)
    }

    pub fn set_filter_enabled(&mut self, name: &str, slot: usize, enabled: bool) -> Result<()> {
        self.require_mut(name)?.set_filter_enabled(slot, enabled)
    }

    pub fn set_filter_params(&mut self, name: &str, slot: usize, values: &[f32]) -> Result<()> {
        self.require_mut(name)?.set_filter_params(slot, values)
    }

    pub fn set_filter_param(&mut self, name: &str, slot: usize, param: usize, value: f32) -> Result<()> {
        self.require_mut(name)?.set_filter_param(slot, param, value)
    }

    pub fn set_filter_param_by_name(
        &mut self,
        name: &str,
        slot: usize,
        param: &str,
        value: f32,
    ) -> Result<usize> {
        self.require_mut(name)?
            .set_filter_param_by_name(slot, param, value)
    }

    pub fn peak_volumes(&self, name: &str) -> Result<Vec<f32>> {
        Ok(self.require(name)?.peak_volumes())
    }

    pub fn set_visualization_enabled(&mut self, enabled: bool) {
        self.visualization = enabled;
        for bus in self.buses.iter_mut() {
            bus.set_visualization_enabled(enabled);
        }
    }

    /// Activate every bus in list order
    ///
    /// Keeps going past a failing bus; the first error is returned.
    pub fn activate_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for index in 0..self.buses.len() {
            if let Err(e) = self.activate_at(index) {
                error!(bus = %self.buses[index].name(), error = %e, "Bus activation failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Deactivate every bus, leaves first
    pub fn deactivate_all(&mut self) {
        for bus in self.buses.iter_mut().rev() {
            bus.deactivate();
        }
    }

    pub fn activate_bus(&mut self, name: &str) -> Result<()> {
        let index = self.require_index(name)?;
        self.activate_at(index)
    }

    pub fn deactivate_bus(&mut self, name: &str) -> Result<()> {
        self.require_mut(name)?.deactivate();
        Ok(())
    }

    /// Snapshot of the whole graph, in order
    pub fn gather_layout(&self) -> BusLayoutData {
        BusLayoutData {
            buses: self.buses.iter().map(Bus::gather_bus_data).collect(),
        }
    }

    /// Rebuild the graph from persisted data
    ///
    /// The layout is validated before anything is touched. On failure the
    /// graph is left holding only Master. Buses are not activated.
    pub fn load_layout(&mut self, layout: &BusLayoutData, catalog: &FilterCatalog) -> Result<()> {
        self.reset();

        let plan = match plan_layout(layout, catalog) {
            Ok(plan) => plan,
            Err(e) => {
                error!(error = %e, "Rejected bus layout");
                return Err(e);
            }
        };

        for planned in plan {
            let created = if planned.data.name == MASTER_BUS {
                Ok(0)
            } else {
                self.create_bus(&planned.data.name)
            };
            let applied = created.and_then(|index| self.apply_bus_data(index, &planned));
            if let Err(e) = applied {
                error!(bus = %planned.data.name, error = %e, "Failed to apply bus layout");
                self.reset();
                return Err(e);
            }
        }

        info!(buses = self.buses.len(), "Bus layout loaded");
        Ok(())
    }

    fn apply_bus_data(&mut self, index: usize, planned: &PlannedBus) -> Result<()> {
        let data = &planned.data;
        if index != 0 {
            let output = if data.output_bus_name.is_empty() {
                MASTER_BUS
            } else {
                data.output_bus_name.as_str()
            };
            let name = self.buses[index].name().to_string();
            self.set_output(&name, output)?;
        }

        let bus = &mut self.buses[index];
        bus.set_volume_db(data.volume);
        bus.set_muted(data.muted);
        bus.set_mono(data.mono);

        for (slot, (filter_data, resolved)) in data
            .filter_block
            .filters
            .iter()
            .zip(planned.filters.iter())
            .enumerate()
        {
            bus.set_filter_enabled(slot, filter_data.enabled)?;
            if let Some((filter, values)) = resolved {
                bus.set_filter(slot, Some(filter.clone()))?;
                bus.set_filter_params(slot, values)?;
            }
        }
        Ok(())
    }

    fn activate_at(&mut self, index: usize) -> Result<()> {
        let output_live = if index == 0 {
            None
        } else {
            let output = self.buses[index].output_name();
            self.buses[..index]
                .iter()
                .find(|b| b.name() == output)
                .and_then(Bus::live_handle)
        };
        self.buses[index].activate(output_live)
    }

    fn children_of(&self, name: &str) -> Vec<usize> {
        self.buses
            .iter()
            .enumerate()
            .filter(|(_, b)| b.output_name() == name)
            .map(|(i, _)| i)
            .collect()
    }

    fn reroute_to_master(&mut self, index: usize) {
        let master_live = self.buses[0].live_handle();
        let bus = &mut self.buses[index];
        if let Err(e) = bus.set_output_name(MASTER_BUS, master_live) {
            // Hot re-attach failed; keep the graph consistent regardless
            warn!(bus = %bus.name(), error = %e, "Live re-route to Master failed");
            bus.retarget_output(MASTER_BUS);
        }
    }

    fn require_index(&self, name: &str) -> Result<usize> {
        self.index_of(name)
            .ok_or_else(|| EngineError::BusNotFound(name.to_string()))
    }

    fn require(&self, name: &str) -> Result<&Bus> {
        self.bus(name)
            .ok_or_else(|| EngineError::BusNotFound(name.to_string()))
    }

    fn require_mut(&mut self, name: &str) -> Result<&mut Bus> {
        self.bus_mut(name)
            .ok_or_else(|| EngineError::BusNotFound(name.to_string()))
    }
}

impl fmt::Debug for BusGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusGraph")
            .field("buses", &self.buses)
            .field("visualization", &self.visualization)
            .finish()
    }
}

/// A layout record with its filters resolved against the catalog
struct PlannedBus {
    data: BusData,
    filters: Vec<Option<(SharedFilter, Vec<f32>)>>,
}

/// Validate a whole layout up front
fn plan_layout(layout: &BusLayoutData, catalog: &FilterCatalog) -> Result<Vec<PlannedBus>> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut plan = Vec::with_capacity(layout.buses.len() + 1);

    let has_master = layout.buses.iter().any(|b| b.name == MASTER_BUS);
    if let Some(first) = layout.buses.first() {
        if has_master && first.name != MASTER_BUS {
            return Err(EngineError::InvalidArgument(
                "Master must be the first bus of a layout".to_string(),
            ));
        }
    }
    if !has_master {
        seen.insert(MASTER_BUS);
    }

    let all_names: HashSet<&str> = layout.buses.iter().map(|b| b.name.as_str()).collect();
    for data in &layout.buses {
        if data.name.is_empty() {
            return Err(EngineError::InvalidArgument("bus name is empty".to_string()));
        }
        if !seen.insert(data.name.as_str()) {
            return Err(EngineError::Conflict(format!(
                "bus '{}' appears more than once",
                data.name
            )));
        }

        if data.name != MASTER_BUS {
            let output = if data.output_bus_name.is_empty() {
                MASTER_BUS
            } else {
                data.output_bus_name.as_str()
            };
            if output == data.name || !seen.contains(output) {
                return Err(if all_names.contains(output) {
                    EngineError::InvalidArgument(format!(
                        "bus '{}' outputs to '{}' which does not precede it",
                        data.name, output
                    ))
                } else {
                    EngineError::BusNotFound(output.to_string())
                });
            }
        }

        let mut filters = Vec::with_capacity(FILTER_SLOTS);
        for filter_data in data.filter_block.filters.iter() {
            if filter_data.name.is_empty() {
                filters.push(None);
                continue;
            }
            let filter = catalog.resolve(&filter_data.name)?;
            let mut values = filter::default_params(filter.as_ref());
            for param in &filter_data.params {
                let index = filter::param_index(filter.as_ref(), &param.name)?;
                values[index] = param.value;
            }
            filters.push(Some((filter, values)));
        }

        plan.push(PlannedBus {
            data: data.clone(),
            filters,
        });
    }

    Ok(plan)
}

fn index_out_of_range(index: usize, len: usize) -> EngineError {
    EngineError::InvalidArgument(format!("bus index {} out of range (0..{})", index, len))
}
