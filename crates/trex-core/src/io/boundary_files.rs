//! Per-outlet boundary condition records: stage or normal-depth rating,
//! plus an optional external solids-load series per class at domain
//! inflow boundaries (spec §3 Data Group A boundary section, §4.4 step 5
//! outlet handling).

use crate::error::ConfigurationError;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryKind {
    NormalDepth,
    FixedStage,
    CriticalDepth,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoundaryRecord {
    pub outlet_id: usize,
    pub link: usize,
    pub node: usize,
    pub kind: BoundaryKind,
    #[serde(default)]
    pub fixed_stage: Option<f64>,
    #[serde(default)]
    pub inflow_solids_series: Option<String>,
}

pub fn parse_boundary_records(json: &str) -> Result<Vec<BoundaryRecord>, ConfigurationError> {
    let records: Vec<BoundaryRecord> = serde_json::from_str(json).map_err(|e| ConfigurationError::MalformedRecord {
        file: "boundary.json".to_string(),
        line: e.line(),
        reason: e.to_string(),
    })?;
    for r in &records {
        if r.kind == BoundaryKind::FixedStage && r.fixed_stage.is_none() {
            return Err(ConfigurationError::MalformedRecord {
                file: "boundary.json".to_string(),
                line: 0,
                reason: format!("outlet {} uses fixed_stage but supplies no stage value", r.outlet_id),
            });
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_normal_depth_boundary() {
        let json = r#"[{"outlet_id": 1, "link": 3, "node": 12, "kind": "normal_depth"}]"#;
        let records = parse_boundary_records(json).unwrap();
        assert_eq!(records[0].kind, BoundaryKind::NormalDepth);
    }

    #[test]
    fn fixed_stage_without_value_is_rejected() {
        let json = r#"[{"outlet_id": 1, "link": 3, "node": 12, "kind": "fixed_stage"}]"#;
        assert!(parse_boundary_records(json).is_err());
    }
}
