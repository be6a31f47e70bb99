//! Project manifest: a single JSON file naming every input raster/table
//! path plus the general controls, tying every other `io::*` reader
//! together into a ready-to-run `Simulation` (spec §4.0 configuration
//! ingest). This is the top of the ingest pipeline; it owns no numerical
//! logic of its own.

use crate::accumulators::Accumulators;
use crate::config::{Config, DtOption, GeneralControls, ProcessScales};
use crate::error::{ConfigurationError, IoError, TrexError, TrexResult};
use crate::forcing::ForcingSet;
use crate::grid::Grid;
use crate::integrator::{DtBreakpoint, TimeStepController};
use crate::io::ascii_grid::read_ascii_grid;
use crate::io::boundary_files::{parse_boundary_records, BoundaryKind};
use crate::io::forcing_files::read_forcing_series;
use crate::io::network_files::read_link_geometry;
use crate::io::property_tables::{parse_land_uses, parse_soil_types};
use crate::io::sediment_properties::{parse_initial_stack, parse_solids_classes};
use crate::solids::{SolidsCell, SolidsState};
use crate::stack::Stack;
use crate::water::{ChannelNode, OverlandCell, WaterState};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
pub struct ProjectManifest {
    pub simulation_id: String,
    pub start_time: f64,
    pub end_time: f64,
    pub ksim: u8,
    pub dt_option: String,
    pub max_courant: f64,
    pub dt_floor: f64,
    pub dt_max: f64,
    pub infiltration_enabled: bool,
    pub transmission_loss_enabled: bool,
    #[serde(default)]
    pub snow_enabled: bool,

    pub mask_grid: PathBuf,
    pub elevation_grid: PathBuf,
    #[serde(default)]
    pub link_grid: Option<PathBuf>,
    #[serde(default)]
    pub node_grid: Option<PathBuf>,
    #[serde(default)]
    pub outlet_grid: Option<PathBuf>,
    pub land_use_grid: PathBuf,
    pub soil_type_grid: PathBuf,

    pub solids_classes_file: Option<PathBuf>,
    pub initial_stack_file: Option<PathBuf>,
    pub rainfall_file: Option<PathBuf>,
    #[serde(default)]
    pub air_temperature_file: Option<PathBuf>,
    #[serde(default)]
    pub snowmelt_factor: f64,
    #[serde(default)]
    pub snow_threshold_temp_c: f64,
    pub soil_types_file: Option<PathBuf>,
    pub land_uses_file: Option<PathBuf>,
    /// per-link geometry table (bottom width, side slope, bank height, top
    /// width, Manning n, ...), required whenever `link_grid`/`node_grid`
    /// describe a non-empty channel network (spec §6 node/link files).
    pub link_geometry_file: Option<PathBuf>,
    pub boundary_file: Option<PathBuf>,

    /// deposition-probability option (spec §4.5): `0` or `1` forces
    /// `p_dep = 1`; `>1` activates the shear-dependent Gessler/Partheniades
    /// formulation. Defaults to the always-deposit option.
    #[serde(default)]
    pub deposition_option: u8,
    /// overland dispersion coefficient [m^2/s], scaled by
    /// `ProcessScales::dispersion_overland_scale` before use.
    #[serde(default)]
    pub dispersion_coeff: f64,
}

fn dt_option_from_str(s: &str) -> Result<DtOption, ConfigurationError> {
    match s {
        "user_table" => Ok(DtOption::UserTable),
        "adaptive" => Ok(DtOption::Adaptive),
        "adaptive_relaunch" => Ok(DtOption::AdaptiveRelaunch),
        "precomputed" => Ok(DtOption::Precomputed),
        other => Err(ConfigurationError::MalformedRecord {
            file: "project manifest".to_string(),
            line: 0,
            reason: format!("unknown dt_option '{other}'"),
        }),
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> TrexResult<T> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        TrexError::Io(IoError::Open {
            path: path.display().to_string(),
            source: e,
        })
    })?;
    serde_json::from_str(&text).map_err(|e| {
        TrexError::Configuration(ConfigurationError::MalformedRecord {
            file: path.display().to_string(),
            line: e.line(),
            reason: e.to_string(),
        })
    })
}

fn raster_to_i32(values: &[f64]) -> Vec<i32> {
    values.iter().map(|v| *v as i32).collect()
}

/// Load everything a manifest names and assemble a ready `Simulation`.
pub fn load_simulation(manifest_path: &Path) -> TrexResult<crate::Simulation> {
    let manifest: ProjectManifest = read_json(manifest_path)?;
    let base = manifest_path.parent().unwrap_or_else(|| Path::new("."));

    let mask = read_ascii_grid(&base.join(&manifest.mask_grid)).map_err(TrexError::from)?;
    let elevation = read_ascii_grid(&base.join(&manifest.elevation_grid)).map_err(TrexError::from)?;
    let header = mask.header;

    header.assert_compatible(&elevation.header, "elevation_grid")?;

    let zeros = vec![0i32; header.ncols * header.nrows];
    let read_companion_grid = |p: &Path, name: &'static str| -> TrexResult<Vec<i32>> {
        let g = read_ascii_grid(&base.join(p)).map_err(TrexError::from)?;
        header.assert_compatible(&g.header, name)?;
        Ok(raster_to_i32(&g.values))
    };
    let link_raw = manifest
        .link_grid
        .as_ref()
        .map(|p| read_companion_grid(p, "link_grid"))
        .transpose()?
        .unwrap_or_else(|| zeros.clone());
    let node_raw = manifest
        .node_grid
        .as_ref()
        .map(|p| read_companion_grid(p, "node_grid"))
        .transpose()?
        .unwrap_or_else(|| zeros.clone());
    let outlet_raw = manifest
        .outlet_grid
        .as_ref()
        .map(|p| read_companion_grid(p, "outlet_grid"))
        .transpose()?
        .unwrap_or_else(|| zeros.clone());

    let grid = Grid::build(
        header,
        &raster_to_i32(&mask.values),
        &elevation.values,
        &link_raw,
        &node_raw,
        &outlet_raw,
    )?;

    let land_use_grid = read_ascii_grid(&base.join(&manifest.land_use_grid)).map_err(TrexError::from)?;
    header.assert_compatible(&land_use_grid.header, "land_use_grid")?;
    let soil_type_grid = read_ascii_grid(&base.join(&manifest.soil_type_grid)).map_err(TrexError::from)?;
    header.assert_compatible(&soil_type_grid.header, "soil_type_grid")?;

    let cells: Vec<OverlandCell> = (0..header.nrows * header.ncols)
        .map(|idx| OverlandCell {
            elevation_initial: elevation.values[idx],
            elevation: elevation.values[idx],
            land_use: land_use_grid.values[idx].max(0.0) as usize,
            soil_type: soil_type_grid.values[idx].max(0.0) as usize,
            area: header.cellsize * header.cellsize,
            depth: 0.0,
            interception_storage: 0.0,
            snow_storage: 0.0,
            cumulative_infiltration: 0.0,
            velocity_x: 0.0,
            velocity_y: 0.0,
        })
        .collect();

    let boundary_records = match &manifest.boundary_file {
        Some(p) => {
            let text = std::fs::read_to_string(base.join(p)).map_err(|e| {
                TrexError::Io(IoError::Open {
                    path: p.display().to_string(),
                    source: e,
                })
            })?;
            parse_boundary_records(&text)?
        }
        None => vec![],
    };
    let fixed_stage_by_outlet: HashMap<usize, f64> = boundary_records
        .iter()
        .filter_map(|r| match r.kind {
            BoundaryKind::FixedStage => r.fixed_stage.map(|s| (r.outlet_id, s)),
            _ => None,
        })
        .collect();

    let boundary_solids_path = boundary_records.iter().find_map(|r| r.inflow_solids_series.as_ref());
    let boundary_solids = match boundary_solids_path {
        Some(p) => {
            let f = read_forcing_series(&base.join(p), "boundary_solids").map_err(|e| {
                TrexError::Configuration(ConfigurationError::MalformedRecord {
                    file: p.clone(),
                    line: 0,
                    reason: e.to_string(),
                })
            })?;
            ForcingSet::new(vec![f])
        }
        None => ForcingSet::new(vec![]),
    };

    let (nodes, node_index) = build_channel_nodes(&manifest, base, &grid, &elevation.values, header.cellsize, &fixed_stage_by_outlet)?;

    let water = WaterState {
        cells,
        nodes,
        node_index,
    };

    let soil_types = match &manifest.soil_types_file {
        Some(p) => {
            let text = std::fs::read_to_string(base.join(p)).map_err(|e| {
                TrexError::Io(IoError::Open {
                    path: p.display().to_string(),
                    source: e,
                })
            })?;
            parse_soil_types(&text)?
        }
        None => vec![],
    };

    let land_uses = match &manifest.land_uses_file {
        Some(p) => {
            let text = std::fs::read_to_string(base.join(p)).map_err(|e| {
                TrexError::Io(IoError::Open {
                    path: p.display().to_string(),
                    source: e,
                })
            })?;
            parse_land_uses(&text)?
        }
        None => vec![],
    };

    let solids_classes = match &manifest.solids_classes_file {
        Some(p) => {
            let text = std::fs::read_to_string(base.join(p)).map_err(|e| {
                TrexError::Io(IoError::Open {
                    path: p.display().to_string(),
                    source: e,
                })
            })?;
            parse_solids_classes(&text)?
        }
        None => vec![],
    };

    let initial_layers = match &manifest.initial_stack_file {
        Some(p) => {
            let text = std::fs::read_to_string(base.join(p)).map_err(|e| {
                TrexError::Io(IoError::Open {
                    path: p.display().to_string(),
                    source: e,
                })
            })?;
            parse_initial_stack(&text)?
        }
        None => vec![crate::stack::Layer {
            thickness: 1.0,
            volume: header.cellsize * header.cellsize,
            porosity: 0.4,
            bottom_width: None,
            gsd: vec![1.0; solids_classes.len().max(1)],
            min_volume: 0.0,
            max_volume: f64::INFINITY,
            bed_elevation: 0.0,
        }],
    };

    let n_cells = water.cells.len();
    let overland_stacks: Vec<Stack> = (0..n_cells)
        .map(|_| Stack::new(initial_layers.clone(), None))
        .collect::<Result<_, _>>()?;

    let n_nodes = water.nodes.len();
    let channel_stacks: Vec<Stack> = water
        .nodes
        .iter()
        .map(|node| {
            let mut layers = initial_layers.clone();
            for layer in &mut layers {
                layer.bottom_width = Some(layer.bottom_width.unwrap_or(0.0).min(node.bottom_width));
            }
            Stack::new(layers, Some(node.bottom_width))
        })
        .collect::<Result<_, _>>()?;

    let solids = SolidsState {
        overland: (0..n_cells)
            .map(|_| SolidsCell {
                conc: vec![0.0; solids_classes.len()],
            })
            .collect(),
        channel: (0..n_nodes)
            .map(|_| SolidsCell {
                conc: vec![0.0; solids_classes.len()],
            })
            .collect(),
    };

    let rainfall = match &manifest.rainfall_file {
        Some(p) => {
            let f = read_forcing_series(&base.join(p), "rainfall").map_err(|e| {
                TrexError::Configuration(ConfigurationError::MalformedRecord {
                    file: p.display().to_string(),
                    line: 0,
                    reason: e.to_string(),
                })
            })?;
            ForcingSet::new(vec![f])
        }
        None => ForcingSet::new(vec![]),
    };

    let air_temperature = match &manifest.air_temperature_file {
        Some(p) => {
            let f = read_forcing_series(&base.join(p), "air_temperature").map_err(|e| {
                TrexError::Configuration(ConfigurationError::MalformedRecord {
                    file: p.display().to_string(),
                    line: 0,
                    reason: e.to_string(),
                })
            })?;
            ForcingSet::new(vec![f])
        }
        None => ForcingSet::new(vec![]),
    };

    let config = Config {
        general: GeneralControls {
            simulation_id: manifest.simulation_id.clone(),
            start_time: manifest.start_time,
            end_time: manifest.end_time,
            ksim: manifest.ksim,
            dt_option: dt_option_from_str(&manifest.dt_option)?,
            max_courant: manifest.max_courant,
            dt_floor: manifest.dt_floor,
            dt_max: manifest.dt_max,
            infiltration_enabled: manifest.infiltration_enabled,
            transmission_loss_enabled: manifest.transmission_loss_enabled,
            snow_enabled: manifest.snow_enabled,
            snowmelt_factor: manifest.snowmelt_factor,
            snow_threshold_temp_c: manifest.snow_threshold_temp_c,
        },
        soil_types,
        land_uses,
        solids_classes,
        deposition_option: crate::config::DepositionOption(manifest.deposition_option),
        scales: ProcessScales::default(),
        max_sat_change_per_step: 1.0,
    };
    config.validate()?;

    let dt_option = config.general.dt_option;
    let max_courant = config.general.max_courant;
    let dt_floor = config.general.dt_floor;
    let dt_max = config.general.dt_max;
    let nsolids = config.nsolids();
    let dispersion_coeff = manifest.dispersion_coeff * config.scales.dispersion_overland_scale;

    let mut outlet_ids: Vec<usize> = water.nodes.iter().filter_map(|n| n.outlet_id).collect();
    outlet_ids.sort_unstable();
    outlet_ids.dedup();

    Ok(crate::Simulation {
        grid,
        config,
        water,
        solids,
        overland_stacks,
        channel_stacks,
        rainfall,
        air_temperature,
        boundary_solids,
        controller: TimeStepController::new(dt_option, max_courant, dt_floor, dt_max, Vec::<DtBreakpoint>::new(), 256),
        accumulators: Accumulators::new(nsolids, &outlet_ids),
        time: manifest.start_time,
        dispersion_coeff,
    })
}

/// Build per-node channel state from the link/node topology already
/// resolved by `Grid::build` plus the companion geometry table (spec §3
/// Data Group B, §6 node/link files). Returns the node list alongside an
/// index so `WaterState::node_at` can resolve (link,node) -> node state.
fn build_channel_nodes(
    manifest: &ProjectManifest,
    base: &Path,
    grid: &Grid,
    elevation_raw: &[f64],
    cellsize: f64,
    fixed_stage_by_outlet: &HashMap<usize, f64>,
) -> TrexResult<(Vec<ChannelNode>, HashMap<(usize, usize), usize>)> {
    if grid.links.is_empty() {
        return Ok((Vec::new(), HashMap::new()));
    }

    let geometry_path = manifest.link_geometry_file.as_ref().ok_or_else(|| {
        TrexError::Configuration(ConfigurationError::MalformedRecord {
            file: "project manifest".to_string(),
            line: 0,
            reason: "link_grid/node_grid describe a channel network but no link_geometry_file was given".to_string(),
        })
    })?;
    let records = read_link_geometry(&base.join(geometry_path)).map_err(|e| {
        TrexError::Configuration(ConfigurationError::MalformedRecord {
            file: geometry_path.display().to_string(),
            line: 0,
            reason: e.to_string(),
        })
    })?;
    let geometry: HashMap<usize, _> = records.into_iter().map(|r| (r.link, r)).collect();

    let mut nodes = Vec::new();
    let mut node_index = HashMap::new();
    for (link_idx, topo) in grid.links.iter().enumerate() {
        let link = link_idx + 1;
        if topo.n_nodes == 0 {
            continue;
        }
        let geom = geometry.get(&link).ok_or_else(|| {
            TrexError::Configuration(ConfigurationError::MalformedRecord {
                file: geometry_path.display().to_string(),
                line: 0,
                reason: format!("missing geometry record for link {link}"),
            })
        })?;
        let boundary_fixed_stage = topo.outlet_id.and_then(|oid| fixed_stage_by_outlet.get(&oid).copied());
        for node in 1..=topo.n_nodes {
            let (i, j) = grid.cell_of(link, node).ok_or_else(|| {
                TrexError::Configuration(ConfigurationError::InvalidConnectivity {
                    link,
                    node,
                    reason: "node declared in topology but absent from node raster".to_string(),
                })
            })?;
            let idx = i * grid.header.ncols + j;
            let is_outlet = node == topo.n_nodes && topo.downstream_links.is_empty();
            node_index.insert((link, node), nodes.len());
            nodes.push(ChannelNode {
                link,
                node,
                length: cellsize * geom.sinuosity.max(1.0),
                bank_height: geom.bank_height,
                bottom_width: geom.bottom_width,
                top_width: geom.top_width,
                side_slope: geom.side_slope,
                manning_n: geom.manning_n,
                bed_elevation: elevation_raw[idx] - geom.bank_height,
                depth: 0.0,
                friction_slope: 0.0,
                outlet_id: if is_outlet { topo.outlet_id } else { None },
                boundary_fixed_stage: if is_outlet { boundary_fixed_stage } else { None },
                bed_dry: true,
                transmission_cumulative: 0.0,
                bed_hydraulic_conductivity: geom.bed_hydraulic_conductivity,
            });
        }
    }

    // Second pass: bed slope to the downstream node (or, for a link's last
    // node with no downstream, the slope from its own upstream neighbor)
    // now that every node's bed elevation is known.
    let snapshot: Vec<(usize, usize, f64)> = nodes.iter().map(|n| (n.link, n.node, n.bed_elevation)).collect();
    for i in 0..nodes.len() {
        let (link, node, bed) = snapshot[i];
        let topo = &grid.links[link - 1];
        let downstream_bed = if node < topo.n_nodes {
            node_index.get(&(link, node + 1)).map(|&di| snapshot[di].2)
        } else {
            topo.downstream_links
                .first()
                .and_then(|&dl| node_index.get(&(dl, 1)))
                .map(|&di| snapshot[di].2)
        };
        if let Some(downstream_bed) = downstream_bed {
            let length = nodes[i].length.max(1e-6);
            nodes[i].friction_slope = (bed - downstream_bed) / length;
        } else if node > 1 {
            if let Some(&ui) = node_index.get(&(link, node - 1)) {
                let length = nodes[i].length.max(1e-6);
                nodes[i].friction_slope = (snapshot[ui].2 - bed) / length;
            }
        }
    }

    Ok((nodes, node_index))
}
