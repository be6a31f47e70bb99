//! Channel network topology reader: link/node id rasters plus a companion
//! per-link geometry table (bottom width, side slope, bank height, Manning
//! n, invert elevation), assembled into the `ChannelNode` records the
//! `Grid`/`WaterState` need (spec §3 Data Group B, §6).

use crate::error::{ConfigurationError, IoError};
use std::io::BufRead;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct LinkGeometryRecord {
    pub link: usize,
    pub bottom_width: f64,
    pub side_slope: f64,
    pub bank_height: f64,
    pub top_width: f64,
    pub manning_n: f64,
    pub bed_hydraulic_conductivity: f64,
    /// channel sinuosity; node length = cellsize * sinuosity (spec §3
    /// "length (with sinuosity)").
    pub sinuosity: f64,
}

pub fn read_link_geometry(path: &Path) -> Result<Vec<LinkGeometryRecord>, LinkGeometryError> {
    let file = std::fs::File::open(path).map_err(|e| {
        LinkGeometryError::Io(IoError::Open {
            path: path.display().to_string(),
            source: e,
        })
    })?;

    let mut records = Vec::new();
    for (lineno, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| {
            LinkGeometryError::Io(IoError::Read {
                path: path.display().to_string(),
                source: e,
            })
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() < 6 {
            return Err(LinkGeometryError::Configuration(ConfigurationError::MalformedRecord {
                file: path.display().to_string(),
                line: lineno + 1,
                reason: format!("expected 6 fields, got {}", fields.len()),
            }));
        }
        let parse = |s: &str, what: &str| -> Result<f64, LinkGeometryError> {
            s.parse::<f64>().map_err(|_| {
                LinkGeometryError::Configuration(ConfigurationError::MalformedRecord {
                    file: path.display().to_string(),
                    line: lineno + 1,
                    reason: format!("non-numeric {what}"),
                })
            })
        };
        records.push(LinkGeometryRecord {
            link: fields[0].parse().map_err(|_| {
                LinkGeometryError::Configuration(ConfigurationError::MalformedRecord {
                    file: path.display().to_string(),
                    line: lineno + 1,
                    reason: "non-numeric link id".to_string(),
                })
            })?,
            bottom_width: parse(fields[1], "bottom width")?,
            side_slope: parse(fields[2], "side slope")?,
            bank_height: parse(fields[3], "bank height")?,
            top_width: parse(fields[4], "top width")?,
            manning_n: parse(fields[5], "Manning n")?,
            bed_hydraulic_conductivity: fields.get(6).and_then(|s| s.parse().ok()).unwrap_or(0.0),
            sinuosity: fields.get(7).and_then(|s| s.parse().ok()).unwrap_or(1.0),
        });
    }
    Ok(records)
}

#[derive(Debug)]
pub enum LinkGeometryError {
    Configuration(ConfigurationError),
    Io(IoError),
}

impl std::fmt::Display for LinkGeometryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkGeometryError::Configuration(e) => write!(f, "{e}"),
            LinkGeometryError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for LinkGeometryError {}
