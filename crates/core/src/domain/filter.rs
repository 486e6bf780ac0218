//! Filter type registry
//!
//! Filters are opaque named capabilities. A [`FilterType`] publishes an
//! ordered parameter schema and creates fresh runtime instances; the
//! [`FilterCatalog`] is the registration surface buses and layouts resolve
//! filter names against.

use crate::domain::audio::{EngineError, Result};
use crate::domain::layout::{FilterData, FilterParamData};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Number of filter slots on every bus
pub const FILTER_SLOTS: usize = 8;

/// Value domain of a filter parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ParamKind {
    #[default]
    Float,
    Int,
    Bool,
}

/// One entry of a filter's parameter schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSchema {
    pub name: String,
    pub kind: ParamKind,
    pub min: f32,
    pub max: f32,
}

impl ParamSchema {
    pub fn float(name: &str, min: f32, max: f32) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Float,
            min,
            max,
        }
    }

    pub fn int(name: &str, min: f32, max: f32) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Int,
            min,
            max,
        }
    }

    pub fn boolean(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Bool,
            min: 0.0,
            max: 1.0,
        }
    }
}

/// A live filter bound to a bus or voice
///
/// Instances are owned by the mixer and processed on the render path.
pub trait FilterInstance: Send {
    fn param_count(&self) -> usize;

    /// Current value, `None` when `index` is out of range
    fn param(&self, index: usize) -> Option<f32>;

    /// Returns false when `index` is out of range
    fn set_param(&mut self, index: usize, value: f32) -> bool;

    /// Process interleaved samples in place
    fn process(&mut self, samples: &mut [f32], channels: usize, sample_rate: u32);
}

/// A registered filter type
pub trait FilterType: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Ordered parameter schema
    fn params(&self) -> &[ParamSchema];

    /// Fresh instance carrying engine default parameter values
    fn create_instance(&self) -> Box<dyn FilterInstance>;
}

pub type SharedFilter = Arc<dyn FilterType>;

/// Default parameter values, read from a temporary instance
pub fn default_params(filter: &dyn FilterType) -> Vec<f32> {
    let instance = filter.create_instance();
    (0..filter.params().len())
        .map(|i| instance.param(i).unwrap_or(0.0))
        .collect()
}

/// Registry of filter types keyed by name
#[derive(Debug, Clone, Default)]
pub struct FilterCatalog {
    filters: BTreeMap<String, SharedFilter>,
}

impl FilterCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog pre-populated with the filters shipped in [`crate::domain::dsp`]
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        for filter in crate::domain::dsp::builtin_filters() {
            // Builtin names are distinct
            let _ = catalog.register(filter);
        }
        catalog
    }

    /// Register a filter type under its own name
    pub fn register(&mut self, filter: SharedFilter) -> Result<()> {
        let name = filter.name().to_string();
        if name.is_empty() {
            warn!("Rejected filter registration with empty name");
            return Err(EngineError::InvalidArgument(
                "filter name is empty".to_string(),
            ));
        }
        if self.filters.contains_key(&name) {
            warn!(filter = %name, "Filter already registered");
            return Err(EngineError::Conflict(format!(
                "filter '{}' is already registered",
                name
            )));
        }

        debug!(filter = %name, params = filter.params().len(), "Registered filter");
        self.filters.insert(name, filter);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<SharedFilter> {
        self.filters.get(name).cloned()
    }

    pub fn resolve(&self, name: &str) -> Result<SharedFilter> {
        self.get(name)
            .ok_or_else(|| EngineError::FilterNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.filters.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn param_index_by_name(&self, filter: &str, param: &str) -> Result<usize> {
        let filter_type = self.resolve(filter)?;
        param_index(filter_type.as_ref(), param)
    }

    /// Schema and default values of one filter
    pub fn filter_data(&self, name: &str) -> Result<FilterData> {
        let filter = self.resolve(name)?;
        Ok(describe(filter.as_ref(), &default_params(filter.as_ref())))
    }

    pub fn all_filter_data(&self) -> Vec<FilterData> {
        self.filters
            .values()
            .map(|f| describe(f.as_ref(), &default_params(f.as_ref())))
            .collect()
    }
}

pub(crate) fn param_index(filter: &dyn FilterType, param: &str) -> Result<usize> {
    filter
        .params()
        .iter()
        .position(|p| p.name == param)
        .ok_or_else(|| EngineError::FilterParamNotFound {
            filter: filter.name().to_string(),
            param: param.to_string(),
        })
}

/// Pair a filter's schema with a set of values
pub(crate) fn describe(filter: &dyn FilterType, values: &[f32]) -> FilterData {
    FilterData {
        name: filter.name().to_string(),
        enabled: true,
        params: filter
            .params()
            .iter()
            .enumerate()
            .map(|(i, schema)| FilterParamData {
                name: schema.name.clone(),
                kind: schema.kind,
                min: schema.min,
                max: schema.max,
                value: values.get(i).copied().unwrap_or(0.0),
            })
            .collect(),
    }
}
