//! End-to-end scenario tests exercising the coupled pieces together
//! rather than any one module in isolation (spec §8 example scenarios).

use trex_core::config::{
    Config, DepositionOption, DtOption, ErosionParams, GeneralControls, LandUse, ProcessScales, SoilType,
    SolidsClassProps,
};
use trex_core::grid::{Grid, RasterHeader};
use trex_core::integrator::TimeStepController;
use trex_core::solids::{excess_shear_erosion, SolidsCell, SolidsState, SolidsTransport};
use trex_core::stack::{Layer, Stack};
use trex_core::water::{ChannelNode, OverlandCell, WaterState, WaterTransport};

fn flat_header(nrows: usize, ncols: usize, cellsize: f64) -> RasterHeader {
    RasterHeader {
        ncols,
        nrows,
        xllcorner: 0.0,
        yllcorner: 0.0,
        cellsize,
        nodata_value: -9999,
    }
}

fn base_config() -> Config {
    Config {
        general: GeneralControls {
            simulation_id: "scenario".into(),
            start_time: 0.0,
            end_time: 1.0,
            ksim: 2,
            dt_option: DtOption::Adaptive,
            max_courant: 1.0,
            dt_floor: 1e-6,
            dt_max: 60.0,
            infiltration_enabled: false,
            transmission_loss_enabled: false,
            snow_enabled: false,
            snowmelt_factor: 0.0,
            snow_threshold_temp_c: 0.0,
        },
        soil_types: vec![SoilType {
            id: 1,
            hydraulic_conductivity: 0.0,
            capillary_suction_head: 0.0,
            moisture_deficit: 0.0,
            porosity: 0.4,
            erosion: ErosionParams::ExcessShear { a_y: 0.002, m_exp: 1.0 },
            gsd: vec![1.0],
        }],
        land_uses: vec![LandUse {
            id: 1,
            manning_n: 0.03,
            interception_depth_max: 0.0,
            bare_fraction: 1.0,
        }],
        solids_classes: vec![SolidsClassProps {
            id: 1,
            mean_diameter: 0.0002,
            specific_gravity: 2.65,
            settling_velocity: 0.01,
            cohesive: false,
            critical_shear_deposition: 1.0,
            critical_shear_erosion: 1.0,
            aging_factor: 1.0,
            reporting_group: 0,
            external_load_rate: 0.0,
        }],
        deposition_option: DepositionOption(2),
        scales: ProcessScales::default(),
        max_sat_change_per_step: 1.0,
    }
}

fn flat_plane(nrows: usize, ncols: usize) -> (Grid, Vec<OverlandCell>) {
    let header = flat_header(nrows, ncols, 10.0);
    let n = nrows * ncols;
    let mask = vec![1; n];
    let elevation: Vec<f64> = (0..n).map(|idx| 10.0 - (idx / ncols) as f64 * 0.01).collect();
    let grid = Grid::build(header, &mask, &elevation, &vec![0; n], &vec![0; n], &vec![0; n]).unwrap();
    let cells = (0..n)
        .map(|idx| OverlandCell {
            elevation_initial: elevation[idx],
            elevation: elevation[idx],
            land_use: 1,
            soil_type: 1,
            area: 100.0,
            depth: 0.0,
            interception_storage: 0.0,
            snow_storage: 0.0,
            cumulative_infiltration: 0.0,
            velocity_x: 0.0,
            velocity_y: 0.0,
        })
        .collect();
    (grid, cells)
}

/// Scenario 1: flat-plane uniform rainfall with no infiltration conserves
/// mass — total stored + outflow equals total rainfall input.
#[test]
fn flat_plane_uniform_rain_conserves_mass() {
    let (grid, cells) = flat_plane(4, 4);
    let config = base_config();
    let mut water = WaterState {
        cells,
        nodes: vec![],
        node_index: Default::default(),
    };
    let transport = WaterTransport::new(&grid, &config);
    let rain_rate = 1.0e-5; // m/s
    let dt = 5.0; // s

    let mut total_rain = 0.0;
    for _ in 0..20 {
        let fluxes = transport.compute_fluxes(&water, rain_rate, 20.0, dt);
        total_rain += fluxes.rainfall_volume;
        transport.commit_new_state(&mut water, &fluxes);
    }

    let stored: f64 = water.cells.iter().map(|c| c.depth * c.area).sum();
    assert!(stored <= total_rain + 1e-6);
    assert!(stored > 0.0);
    assert!(water.cells.iter().all(|c| c.depth >= 0.0));
}

/// Sub-freezing rain is diverted entirely to snow storage rather than
/// reaching the surface (spec §4.4 step 1: "snowfall is diverted to snow
/// storage when air-temperature option indicates snow").
#[test]
fn subfreezing_rain_accumulates_as_snow_not_surface_water() {
    let (grid, cells) = flat_plane(1, 1);
    let mut config = base_config();
    config.general.snow_enabled = true;
    config.general.snow_threshold_temp_c = 0.0;
    config.general.snowmelt_factor = 1.0e-7;
    let mut water = WaterState {
        cells,
        nodes: vec![],
        node_index: Default::default(),
    };
    let transport = WaterTransport::new(&grid, &config);
    let rain_rate = 1.0e-5; // m/s
    let dt = 10.0; // s

    let fluxes = transport.compute_fluxes(&water, rain_rate, -5.0, dt);
    assert!(fluxes.snow_accumulation_volume > 0.0);
    assert_eq!(fluxes.snowmelt_volume, 0.0);
    transport.commit_new_state(&mut water, &fluxes);

    assert_eq!(water.cells[0].depth, 0.0);
    assert!(water.cells[0].snow_storage > 0.0);
    let expected_snow_depth = rain_rate * dt;
    assert!((water.cells[0].snow_storage - expected_snow_depth).abs() < 1e-12);
}

/// Once air temperature rises above the threshold, accumulated snow melts
/// back onto the surface instead of staying locked in storage.
#[test]
fn snow_melts_onto_surface_once_above_threshold() {
    let (grid, mut cells) = flat_plane(1, 1);
    cells[0].snow_storage = 0.01;
    let mut config = base_config();
    config.general.snow_enabled = true;
    config.general.snow_threshold_temp_c = 0.0;
    config.general.snowmelt_factor = 1.0e-6; // m/s per degree C
    let mut water = WaterState {
        cells,
        nodes: vec![],
        node_index: Default::default(),
    };
    let transport = WaterTransport::new(&grid, &config);

    let fluxes = transport.compute_fluxes(&water, 0.0, 5.0, 100.0);
    assert!(fluxes.snowmelt_volume > 0.0);
    assert_eq!(fluxes.snow_accumulation_volume, 0.0);
    transport.commit_new_state(&mut water, &fluxes);

    assert!(water.cells[0].snow_storage < 0.01);
    assert!(water.cells[0].depth > 0.0);
}

/// Scenario 4: excess-shear erosion rate matches the closed-form formula
/// directly (spec example tau=5, tau_ce=1, a_y=0.002, m_exp=1 -> 0.008).
#[test]
fn excess_shear_erosion_matches_closed_form_rate() {
    let rate = excess_shear_erosion(5.0, 1.0, 0.002, 1.0);
    assert!((rate - 0.008).abs() < 1e-9);
}

/// Scenario 5: deposition onto the top bed layer is volume-conservative —
/// the layer's volume gain matches the deposited mass divided by its bulk
/// density exactly (layer-pop remix itself is covered in stack.rs).
#[test]
fn deposition_grows_top_layer_volume_by_exactly_mass_over_bulk_density() {
    let (grid, mut cells) = flat_plane(1, 1);
    cells[0].depth = 0.5;
    let config = base_config();
    let water = WaterState {
        cells,
        nodes: vec![],
        node_index: Default::default(),
    };
    let mut stacks = vec![Stack::new(
        vec![
            Layer {
                thickness: 2.0,
                volume: 20.0,
                porosity: 0.4,
                bottom_width: None,
                gsd: vec![1.0],
                min_volume: 0.0,
                max_volume: 100.0,
                bed_elevation: 0.0,
            },
            Layer {
                thickness: 0.1,
                volume: 1.0,
                porosity: 0.4,
                bottom_width: None,
                gsd: vec![1.0],
                min_volume: 0.5,
                max_volume: 100.0,
                bed_elevation: 2.0,
            },
        ],
        None,
    )
    .unwrap()];

    let mut solids = SolidsState {
        overland: vec![SolidsCell { conc: vec![50.0] }],
        channel: vec![],
    };

    let volume_before: f64 = (1..=stacks[0].nstack()).map(|i| stacks[0].layer(i).volume).sum();

    let transport = SolidsTransport::new(&grid, &config);
    let fluxes = transport.compute_fluxes(&water.cells, &solids, &stacks, 1.0, 0.0, 0.0);
    transport.commit_new_state(&water.cells, &mut solids, &mut stacks, &fluxes);

    let volume_after: f64 = (1..=stacks[0].nstack()).map(|i| stacks[0].layer(i).volume).sum();
    let net_deposition: f64 = fluxes.overland_bed_mass_delta[0].iter().sum();
    assert!((volume_after - volume_before - net_deposition / (2.65 * 1000.0 * 0.6)).abs() < 1e-6);
}

/// Scenario 6: two different wall-clock cursor histories evaluating the
/// same cyclic rainfall time yield identical values (forcing idempotence),
/// confirmed through the full `WaterTransport::compute_fluxes` path rather
/// than the bare `ForcingFunction`.
#[test]
fn cyclic_forcing_feeds_identical_rain_rate_into_water_transport() {
    use trex_core::forcing::ForcingFunction;

    let mut f1 = ForcingFunction::new("rain", vec![(0.0, 0.0), (1.0, 1e-5), (2.0, 0.0)]).unwrap();
    let mut f2 = ForcingFunction::new("rain", vec![(0.0, 0.0), (1.0, 1e-5), (2.0, 0.0)]).unwrap();

    let _ = f2.value_at(0.1);
    let _ = f2.value_at(1.9);

    let (grid, cells) = flat_plane(1, 1);
    let config = base_config();
    let water = WaterState {
        cells,
        nodes: vec![],
        node_index: Default::default(),
    };
    let transport = WaterTransport::new(&grid, &config);

    let r1 = f1.value_at(0.5);
    let r2 = f2.value_at(2.5);
    let flux1 = transport.compute_fluxes(&water, r1, 20.0, 1.0);
    let flux2 = transport.compute_fluxes(&water, r2, 20.0, 1.0);
    assert!((flux1.rainfall_volume - flux2.rainfall_volume).abs() < 1e-9);
}

/// Depth at which a trapezoidal section (below bank) has the given area,
/// solving `s*h^2 + b*h - A = 0`; duplicates the same algebra the channel
/// routing step uses internally, kept local since this test drives the
/// upstream boundary by injecting volume rather than calling the library.
fn trapezoid_depth_for_area(bottom_width: f64, side_slope: f64, area: f64) -> f64 {
    if area <= 0.0 {
        return 0.0;
    }
    if side_slope.abs() < 1e-12 {
        return if bottom_width > 0.0 { area / bottom_width } else { 0.0 };
    }
    let a = side_slope;
    let b = bottom_width;
    let c = -area;
    let disc = (b * b - 4.0 * a * c).max(0.0);
    ((-b + disc.sqrt()) / (2.0 * a)).max(0.0)
}

fn single_link_channel(n_nodes: usize, bed_slope: f64, node_length: f64) -> Vec<ChannelNode> {
    (1..=n_nodes)
        .map(|node| ChannelNode {
            link: 1,
            node,
            length: node_length,
            bank_height: 2.0,
            bottom_width: 5.0,
            top_width: 13.0,
            side_slope: 2.0,
            manning_n: 0.035,
            bed_elevation: (n_nodes - node) as f64 * bed_slope * node_length,
            depth: 0.0,
            friction_slope: bed_slope,
            outlet_id: if node == n_nodes { Some(1) } else { None },
            boundary_fixed_stage: None,
            bed_dry: true,
            transmission_cumulative: 0.0,
            bed_hydraulic_conductivity: 0.0,
        })
        .collect()
}

/// Scenario 2: a triangular inflow hydrograph (0 -> 10 -> 0 m3/s over 2h)
/// entering a single 10-node trapezoidal channel (b_w=5m, s=2, bank=2m)
/// attenuates in peak as it routes downstream, and total inflow volume
/// balances against what left the outlet plus what remains in storage.
#[test]
fn single_link_channel_attenuates_triangular_hydrograph_and_conserves_mass() {
    let n_nodes = 10;
    let node_length = 100.0;
    let bed_slope = 0.001;
    let nodes = single_link_channel(n_nodes, bed_slope, node_length);
    let node_index = nodes.iter().enumerate().map(|(i, n)| ((n.link, n.node), i)).collect();
    let mut water = WaterState {
        cells: vec![],
        nodes,
        node_index,
    };

    // one row of `n_nodes` channel cells; `Grid::downstream` walks node
    // indices within a link by count alone, so physical layout only needs
    // to give every node a distinct, mask=channel cell.
    let header = flat_header(1, n_nodes, 10.0);
    let mask: Vec<i32> = vec![2; n_nodes];
    let elevation: Vec<f64> = vec![0.0; n_nodes];
    let link_raw: Vec<i32> = vec![1; n_nodes];
    let node_raw: Vec<i32> = (1..=n_nodes as i32).collect();
    let outlet_raw: Vec<i32> = vec![0; n_nodes];
    let grid = Grid::build(header, &mask, &elevation, &link_raw, &node_raw, &outlet_raw).unwrap();
    let config = base_config();
    let transport = WaterTransport::new(&grid, &config);
    water.cells = (0..n_nodes)
        .map(|_| OverlandCell {
            elevation_initial: 0.0,
            elevation: 0.0,
            land_use: 1,
            soil_type: 1,
            area: header.cellsize * header.cellsize,
            depth: 0.0,
            interception_storage: 0.0,
            snow_storage: 0.0,
            cumulative_infiltration: 0.0,
            velocity_x: 0.0,
            velocity_y: 0.0,
        })
        .collect();

    let dt = 10.0;
    let total_time = 7200.0_f64;
    let mut time = 0.0_f64;
    let mut total_injected = 0.0_f64;
    let mut total_exit = 0.0_f64;
    let mut peak_exit_q = 0.0_f64;

    while time < total_time {
        let target_q = if time <= 3600.0 {
            10.0 * (time / 3600.0)
        } else {
            10.0 * ((7200.0 - time) / 3600.0)
        };
        let inflow_volume = target_q.max(0.0) * dt;
        total_injected += inflow_volume;

        let head = &mut water.nodes[0];
        let (area_before, _) = head.cross_section(head.depth);
        let new_area = area_before + inflow_volume / head.length;
        head.depth = trapezoid_depth_for_area(head.bottom_width, head.side_slope, new_area);

        let outlet = &water.nodes[n_nodes - 1];
        let rh = outlet.hydraulic_radius(outlet.depth);
        let (area, _) = outlet.cross_section(outlet.depth);
        let exit_q = if outlet.manning_n > 0.0 {
            (1.0 / outlet.manning_n) * area * rh.powf(2.0 / 3.0) * outlet.friction_slope.abs().sqrt()
        } else {
            0.0
        };
        peak_exit_q = peak_exit_q.max(exit_q);
        total_exit += exit_q * dt;

        let fluxes = transport.compute_fluxes(&water, 0.0, 20.0, dt);
        transport.commit_new_state(&mut water, &fluxes);

        time += dt;
    }

    let final_stored: f64 = water
        .nodes
        .iter()
        .map(|n| n.cross_section(n.depth).0 * n.length)
        .sum();

    assert!(peak_exit_q < 10.0, "outlet peak {peak_exit_q} should attenuate below the 10 m3/s inflow peak");
    let balance_error = (total_injected - total_exit - final_stored).abs();
    assert!(
        balance_error < 0.01 * total_injected,
        "mass balance error {balance_error} exceeds 1% of {total_injected}"
    );
}

/// Scenario 3: still water (h=0.1m) with a single non-cohesive solids class
/// (w_s=0.001 m/s) and `deposition_option` forcing `p_dep=1` decays as
/// `C(t) = C0 exp(-w_s t / h)`, matched within 2% over one hour.
#[test]
fn pure_deposition_matches_exponential_decay_closed_form() {
    let (grid, mut cells) = flat_plane(1, 1);
    let depth = 0.1;
    cells[0].depth = depth;
    let mut config = base_config();
    config.deposition_option = DepositionOption(0);
    config.solids_classes[0].settling_velocity = 0.001;
    let water = WaterState {
        cells,
        nodes: vec![],
        node_index: Default::default(),
    };
    let c0 = 100.0;
    let mut solids = SolidsState {
        overland: vec![SolidsCell { conc: vec![c0] }],
        channel: vec![],
    };
    let mut stacks = vec![Stack::new(
        vec![Layer {
            thickness: 1.0,
            volume: 100.0,
            porosity: 0.4,
            bottom_width: None,
            gsd: vec![1.0],
            min_volume: 0.0,
            max_volume: f64::INFINITY,
            bed_elevation: 0.0,
        }],
        None,
    )
    .unwrap()];

    let transport = SolidsTransport::new(&grid, &config);
    let dt = 0.1;
    let total_time = 3600.0_f64;
    let mut time = 0.0_f64;
    let outlet_cells = std::collections::HashMap::new();
    let boundary_conc = vec![0.0];
    while time < total_time {
        let fluxes = transport.compute_fluxes(&water.cells, &solids, &stacks, dt, time, 0.0, &outlet_cells, &boundary_conc);
        transport.commit_new_state(&water.cells, &mut solids, &mut stacks, &fluxes);
        time += dt;
    }

    let w_s = config.solids_classes[0].settling_velocity;
    let expected = c0 * (-w_s * total_time / depth).exp();
    let actual = solids.overland[0].conc[0];
    let rel_error = (actual - expected).abs() / expected;
    assert!(rel_error < 0.02, "actual={actual} expected={expected} rel_error={rel_error}");
}

#[test]
fn time_step_controller_never_produces_dt_below_floor_without_stalling() {
    let mut ctl = TimeStepController::new(DtOption::Adaptive, 1.0, 0.01, 60.0, vec![], 16);
    ctl_loop(&mut ctl);
}

fn ctl_loop(ctl: &mut TimeStepController) {
    let mut time = 0.0;
    for _ in 0..50 {
        let trial = ctl.trial_dt(time);
        // an observed Courant comfortably under the cap — every trial should accept.
        let outcome = ctl.evaluate(time, trial, 0.2).unwrap();
        match outcome {
            trex_core::integrator::StepOutcome::Accept(dt) => {
                assert!(dt >= ctl.dt_floor);
                time += dt;
            }
            trex_core::integrator::StepOutcome::Retry(dt) => {
                assert!(dt >= ctl.dt_floor);
            }
        }
    }
}
