//! Per-solids-class property table and per-layer initial-stack records
//! (grain size distribution, porosity, thickness) (spec §3 Data Group C).

use crate::config::SolidsClassProps;
use crate::error::ConfigurationError;
use crate::stack::Layer;
use serde::Deserialize;

/// On-disk representation of one solids class row; deserialized with serde
/// from the JSON properties file and converted into `SolidsClassProps`
/// after validation.
#[derive(Debug, Deserialize)]
pub struct SolidsClassRecord {
    pub id: usize,
    pub mean_diameter: f64,
    pub specific_gravity: f64,
    pub settling_velocity: f64,
    pub cohesive: bool,
    pub critical_shear_deposition: f64,
    pub critical_shear_erosion: f64,
    #[serde(default = "default_aging_factor")]
    pub aging_factor: f64,
    #[serde(default)]
    pub reporting_group: usize,
    #[serde(default)]
    pub external_load_rate: f64,
}

fn default_aging_factor() -> f64 {
    1.0
}

impl From<SolidsClassRecord> for SolidsClassProps {
    fn from(r: SolidsClassRecord) -> Self {
        SolidsClassProps {
            id: r.id,
            mean_diameter: r.mean_diameter,
            specific_gravity: r.specific_gravity,
            settling_velocity: r.settling_velocity,
            cohesive: r.cohesive,
            critical_shear_deposition: r.critical_shear_deposition,
            critical_shear_erosion: r.critical_shear_erosion,
            aging_factor: r.aging_factor,
            reporting_group: r.reporting_group,
            external_load_rate: r.external_load_rate,
        }
    }
}

pub fn parse_solids_classes(json: &str) -> Result<Vec<SolidsClassProps>, ConfigurationError> {
    let records: Vec<SolidsClassRecord> = serde_json::from_str(json).map_err(|e| ConfigurationError::MalformedRecord {
        file: "solids_classes.json".to_string(),
        line: e.line(),
        reason: e.to_string(),
    })?;
    let classes: Vec<SolidsClassProps> = records.into_iter().map(SolidsClassProps::from).collect();
    for c in &classes {
        c.validate()?;
    }
    Ok(classes)
}

/// On-disk representation of one initial-stack layer record.
#[derive(Debug, Deserialize)]
pub struct LayerRecord {
    pub thickness: f64,
    pub porosity: f64,
    pub gsd: Vec<f64>,
    #[serde(default)]
    pub bottom_width: Option<f64>,
    #[serde(default)]
    pub min_volume: f64,
    #[serde(default = "default_max_volume")]
    pub max_volume: f64,
    pub bed_elevation: f64,
    /// plan area at this location, used to convert thickness -> volume.
    pub area: f64,
}

fn default_max_volume() -> f64 {
    f64::INFINITY
}

impl LayerRecord {
    pub fn into_layer(self) -> Layer {
        Layer {
            thickness: self.thickness,
            volume: self.thickness * self.area,
            porosity: self.porosity,
            bottom_width: self.bottom_width,
            gsd: self.gsd,
            min_volume: self.min_volume,
            max_volume: self.max_volume,
            bed_elevation: self.bed_elevation,
        }
    }
}

pub fn parse_initial_stack(json: &str) -> Result<Vec<Layer>, ConfigurationError> {
    let records: Vec<LayerRecord> = serde_json::from_str(json).map_err(|e| ConfigurationError::MalformedRecord {
        file: "initial_stack.json".to_string(),
        line: e.line(),
        reason: e.to_string(),
    })?;
    let layers: Vec<Layer> = records.into_iter().map(LayerRecord::into_layer).collect();
    for (li, layer) in layers.iter().enumerate() {
        if !layer.gsd_sum_ok() {
            return Err(ConfigurationError::GsdSumOutOfTolerance {
                context: format!("initial_stack.json layer {}", li + 1),
                sum: layer.gsd.iter().sum(),
            });
        }
    }
    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_solids_class_table() {
        let json = r#"[
            {"id": 1, "mean_diameter": 0.0001, "specific_gravity": 2.65,
             "settling_velocity": 0.001, "cohesive": false,
             "critical_shear_deposition": 0.5, "critical_shear_erosion": 1.0}
        ]"#;
        let classes = parse_solids_classes(json).unwrap();
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].aging_factor, 1.0);
    }

    #[test]
    fn parses_initial_stack_layers_and_converts_volume() {
        let json = r#"[
            {"thickness": 0.5, "porosity": 0.4, "gsd": [1.0], "bed_elevation": 0.0, "area": 100.0}
        ]"#;
        let layers = parse_initial_stack(json).unwrap();
        assert_eq!(layers.len(), 1);
        assert!((layers[0].volume - 50.0).abs() < 1e-9);
    }
}
