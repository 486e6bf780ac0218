//! Persisted bus layout records
//!
//! A layout is the ordered list of bus records; order is both the routing
//! topology and the activation order. Layouts are stored as JSON.

use crate::domain::filter::{ParamKind, FILTER_SLOTS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, instrument};

/// Errors raised while reading or writing layout files
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LayoutError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FilterParamData {
    pub name: String,
    pub kind: ParamKind,
    pub min: f32,
    pub max: f32,
    pub value: f32,
}

/// One filter slot; an empty name means no filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterData {
    pub name: String,
    pub enabled: bool,
    pub params: Vec<FilterParamData>,
}

impl Default for FilterData {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            params: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FilterBlockData {
    pub filters: [FilterData; FILTER_SLOTS],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BusData {
    pub name: String,
    pub output_bus_name: String,
    /// Volume in dB
    pub volume: f32,
    pub muted: bool,
    pub mono: bool,
    pub filter_block: FilterBlockData,
}

impl BusData {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BusLayoutData {
    pub buses: Vec<BusData>,
}

impl BusLayoutData {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading bus layout");

        let contents = fs::read_to_string(path).await?;
        let layout = Self::from_json_str(&contents)?;

        debug!(buses = layout.buses.len(), "Bus layout loaded");
        Ok(layout)
    }

    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving bus layout");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, self.to_json_string()?).await?;

        debug!("Bus layout saved");
        Ok(())
    }
}
