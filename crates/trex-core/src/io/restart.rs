//! Restart checkpointing: serializes the minimal state needed to resume a
//! run mid-simulation (time, per-cell depths/concentrations, stack layers,
//! accumulators) as JSON (spec §4.1 lifecycle, `dtopt=2` relaunch support).

use crate::error::IoError;
use crate::stack::Layer;
use crate::water::{ChannelNode, OverlandCell};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct RestartRecord {
    pub time: f64,
    pub overland_depths: Vec<f64>,
    pub overland_concentrations: Vec<Vec<f64>>,
    pub channel_depths: Vec<f64>,
    pub overland_layers: Vec<Vec<LayerRecord>>,
    pub current_dt: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LayerRecord {
    pub thickness: f64,
    pub volume: f64,
    pub porosity: f64,
    pub bottom_width: Option<f64>,
    pub gsd: Vec<f64>,
    pub min_volume: f64,
    pub max_volume: f64,
    pub bed_elevation: f64,
}

impl From<&Layer> for LayerRecord {
    fn from(l: &Layer) -> Self {
        LayerRecord {
            thickness: l.thickness,
            volume: l.volume,
            porosity: l.porosity,
            bottom_width: l.bottom_width,
            gsd: l.gsd.clone(),
            min_volume: l.min_volume,
            max_volume: l.max_volume,
            bed_elevation: l.bed_elevation,
        }
    }
}

impl From<LayerRecord> for Layer {
    fn from(r: LayerRecord) -> Self {
        Layer {
            thickness: r.thickness,
            volume: r.volume,
            porosity: r.porosity,
            bottom_width: r.bottom_width,
            gsd: r.gsd,
            min_volume: r.min_volume,
            max_volume: r.max_volume,
            bed_elevation: r.bed_elevation,
        }
    }
}

pub fn write_restart(
    path: &std::path::Path,
    time: f64,
    current_dt: f64,
    cells: &[OverlandCell],
    concentrations: &[Vec<f64>],
    channel_nodes: &[ChannelNode],
    stacks: &[crate::stack::Stack],
) -> Result<(), IoError> {
    let record = RestartRecord {
        time,
        current_dt,
        overland_depths: cells.iter().map(|c| c.depth).collect(),
        overland_concentrations: concentrations.to_vec(),
        channel_depths: channel_nodes.iter().map(|n| n.depth).collect(),
        overland_layers: stacks
            .iter()
            .map(|s| (1..=s.nstack()).map(|i| LayerRecord::from(s.layer(i))).collect())
            .collect(),
    };
    let json = serde_json::to_string_pretty(&record).map_err(|e| IoError::Write {
        path: path.display().to_string(),
        source: std::io::Error::new(std::io::ErrorKind::Other, e),
    })?;
    std::fs::write(path, json).map_err(|e| IoError::Write {
        path: path.display().to_string(),
        source: e,
    })
}

pub fn read_restart(path: &std::path::Path) -> Result<RestartRecord, IoError> {
    let text = std::fs::read_to_string(path).map_err(|e| IoError::Read {
        path: path.display().to_string(),
        source: e,
    })?;
    serde_json::from_str(&text).map_err(|e| IoError::Read {
        path: path.display().to_string(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })
}
