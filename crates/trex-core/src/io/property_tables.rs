//! Per-soil-type and per-land-use property tables (Data Group C in the
//! original source): hydraulic conductivity, capillary suction head,
//! moisture deficit, porosity, erosion parameterization, and GSD by soil
//! type; Manning n, interception depth, and bare fraction by land use
//! (spec §3 "Soil type / land use", §4.0 configuration ingest).

use crate::config::{ErosionParams, LandUse, SoilType};
use crate::error::ConfigurationError;
use serde::Deserialize;

/// On-disk erosion parameterization, tagged by `kind` so the same table
/// can mix transport-capacity and excess-shear soil types (spec §3: "USLE
/// factors *or* generalized transport-capacity coefficients ... *or*
/// excess-shear").
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ErosionRecord {
    TransportCapacity {
        k: f64,
        beta_s: f64,
        gamma_s: f64,
        bare_fraction: f64,
        tc_w_exp: f64,
    },
    ExcessShear {
        a_y: f64,
        m_exp: f64,
    },
}

impl From<ErosionRecord> for ErosionParams {
    fn from(r: ErosionRecord) -> Self {
        match r {
            ErosionRecord::TransportCapacity {
                k,
                beta_s,
                gamma_s,
                bare_fraction,
                tc_w_exp,
            } => ErosionParams::TransportCapacity {
                k,
                beta_s,
                gamma_s,
                bare_fraction,
                tc_w_exp,
            },
            ErosionRecord::ExcessShear { a_y, m_exp } => ErosionParams::ExcessShear { a_y, m_exp },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SoilTypeRecord {
    pub id: usize,
    pub hydraulic_conductivity: f64,
    pub capillary_suction_head: f64,
    pub moisture_deficit: f64,
    pub porosity: f64,
    erosion: ErosionRecord,
    pub gsd: Vec<f64>,
}

impl From<SoilTypeRecord> for SoilType {
    fn from(r: SoilTypeRecord) -> Self {
        SoilType {
            id: r.id,
            hydraulic_conductivity: r.hydraulic_conductivity,
            capillary_suction_head: r.capillary_suction_head,
            moisture_deficit: r.moisture_deficit,
            porosity: r.porosity,
            erosion: r.erosion.into(),
            gsd: r.gsd,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LandUseRecord {
    pub id: usize,
    pub manning_n: f64,
    pub interception_depth_max: f64,
    #[serde(default = "default_bare_fraction")]
    pub bare_fraction: f64,
}

fn default_bare_fraction() -> f64 {
    1.0
}

impl From<LandUseRecord> for LandUse {
    fn from(r: LandUseRecord) -> Self {
        LandUse {
            id: r.id,
            manning_n: r.manning_n,
            interception_depth_max: r.interception_depth_max,
            bare_fraction: r.bare_fraction,
        }
    }
}

pub fn parse_soil_types(json: &str) -> Result<Vec<SoilType>, ConfigurationError> {
    let records: Vec<SoilTypeRecord> = serde_json::from_str(json).map_err(|e| ConfigurationError::MalformedRecord {
        file: "soil_types.json".to_string(),
        line: e.line(),
        reason: e.to_string(),
    })?;
    let types: Vec<SoilType> = records.into_iter().map(SoilType::from).collect();
    for st in &types {
        st.validate()?;
    }
    Ok(types)
}

pub fn parse_land_uses(json: &str) -> Result<Vec<LandUse>, ConfigurationError> {
    let records: Vec<LandUseRecord> = serde_json::from_str(json).map_err(|e| ConfigurationError::MalformedRecord {
        file: "land_uses.json".to_string(),
        line: e.line(),
        reason: e.to_string(),
    })?;
    Ok(records.into_iter().map(LandUse::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_excess_shear_soil_type() {
        let json = r#"[
            {"id": 1, "hydraulic_conductivity": 1e-6, "capillary_suction_head": 0.1,
             "moisture_deficit": 0.3, "porosity": 0.4, "gsd": [1.0],
             "erosion": {"kind": "excess_shear", "a_y": 0.002, "m_exp": 1.0}}
        ]"#;
        let types = parse_soil_types(json).unwrap();
        assert_eq!(types.len(), 1);
        assert!(matches!(types[0].erosion, ErosionParams::ExcessShear { .. }));
    }

    #[test]
    fn parses_transport_capacity_soil_type() {
        let json = r#"[
            {"id": 2, "hydraulic_conductivity": 1e-6, "capillary_suction_head": 0.1,
             "moisture_deficit": 0.3, "porosity": 0.4, "gsd": [0.5, 0.5],
             "erosion": {"kind": "transport_capacity", "k": 0.01, "beta_s": 1.5,
                         "gamma_s": 1.0, "bare_fraction": 0.8, "tc_w_exp": 0.5}}
        ]"#;
        let types = parse_soil_types(json).unwrap();
        assert!(matches!(types[0].erosion, ErosionParams::TransportCapacity { .. }));
    }

    #[test]
    fn parses_land_use_table_with_default_bare_fraction() {
        let json = r#"[{"id": 1, "manning_n": 0.03, "interception_depth_max": 0.002}]"#;
        let uses = parse_land_uses(json).unwrap();
        assert_eq!(uses[0].bare_fraction, 1.0);
    }

    #[test]
    fn rejects_gsd_out_of_tolerance() {
        let json = r#"[
            {"id": 1, "hydraulic_conductivity": 1e-6, "capillary_suction_head": 0.1,
             "moisture_deficit": 0.3, "porosity": 0.4, "gsd": [0.5, 0.2],
             "erosion": {"kind": "excess_shear", "a_y": 0.002, "m_exp": 1.0}}
        ]"#;
        assert!(parse_soil_types(json).is_err());
    }
}
