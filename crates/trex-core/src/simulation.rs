//! Top-level orchestration: owns every piece of mutable state for one run
//! and drives the fixed step order from spec §4.1/§9 — interpolate
//! forcings, compute water fluxes, compute solids fluxes against the *old*
//! water state, evaluate the Courant number, commit or retry, then update
//! the stacks and accumulators. Replaces the teacher's implicit global
//! mutable state with a single owning struct (spec §9 redesign note).

use crate::accumulators::Accumulators;
use crate::config::{Config, ErosionParams};
use crate::error::{TrexError, TrexResult};
use crate::forcing::ForcingSet;
use crate::grid::Grid;
use crate::integrator::{StepOutcome, TimeStepController};
use crate::solids::{SolidsState, SolidsTransport};
use crate::stack::Stack;
use crate::water::{WaterState, WaterTransport};
use std::collections::HashMap;

/// Air temperature assumed when no forcing series is supplied (deg C),
/// comfortably above a typical freezing threshold so snow never
/// spuriously accumulates on an unconfigured project.
const DEFAULT_AIR_TEMP_C: f64 = 15.0;

pub struct Simulation {
    pub grid: Grid,
    pub config: Config,
    pub water: WaterState,
    pub solids: SolidsState,
    pub overland_stacks: Vec<Stack>,
    pub channel_stacks: Vec<Stack>,
    pub rainfall: ForcingSet,
    /// air temperature [deg C] time series driving the snow/melt switch
    /// (spec §4.4 step 1); empty means a constant above-freezing default,
    /// so a project with `snow_enabled` but no data still runs rain-only.
    pub air_temperature: ForcingSet,
    /// domain-boundary solids concentration series (source 10, spec §4.4
    /// step 5); empty means the boundary contributes no concentration, so
    /// overland outflow above a flooded channel outlet carries zero mass.
    pub boundary_solids: ForcingSet,
    pub controller: TimeStepController,
    pub accumulators: Accumulators,
    pub time: f64,
    pub dispersion_coeff: f64,
}

/// One accepted step's headline numbers, returned to the caller (CLI /
/// writers) so progress can be logged without re-deriving it.
#[derive(Debug, Clone, Copy)]
pub struct StepReport {
    pub time: f64,
    pub dt: f64,
    pub max_courant: f64,
    pub retries: u64,
}

impl Simulation {
    /// Run one adaptive step to completion: retries internally on Courant
    /// violation (or returns `IntegrationStall` if the floor is hit), then
    /// applies the accepted fluxes and advances `self.time`.
    pub fn step(&mut self) -> TrexResult<StepReport> {
        let retries_before = self.controller.retry_count;
        let rain_rate = if self.rainfall.is_empty() {
            0.0
        } else {
            self.rainfall_rate_at(self.time)
        };
        let air_temp_c = if self.air_temperature.is_empty() {
            DEFAULT_AIR_TEMP_C
        } else {
            self.air_temperature.update_all(self.time).first().copied().unwrap_or(DEFAULT_AIR_TEMP_C)
        };
        let boundary_conc_value = if self.boundary_solids.is_empty() {
            0.0
        } else {
            self.boundary_solids.update_all(self.time).first().copied().unwrap_or(0.0)
        };
        let boundary_conc = vec![boundary_conc_value; self.config.nsolids()];
        let outlet_cells: HashMap<usize, f64> = self
            .water
            .nodes
            .iter()
            .filter_map(|n| {
                n.outlet_id?;
                self.grid
                    .cell_of(n.link, n.node)
                    .map(|(i, j)| (self.grid.cell_index(i, j), n.bank_height))
            })
            .collect();

        loop {
            let trial_dt = self.controller.trial_dt(self.time);
            let water_transport = WaterTransport::new(&self.grid, &self.config);
            let water_fluxes = water_transport.compute_fluxes(&self.water, rain_rate, air_temp_c, trial_dt);

            match self.controller.evaluate(self.time, trial_dt, water_fluxes.max_courant)? {
                StepOutcome::Retry(_) => continue,
                StepOutcome::Accept(dt) => {
                    let solids_transport = SolidsTransport::new(&self.grid, &self.config);
                    let solids_fluxes = solids_transport.compute_fluxes(
                        &self.water.cells,
                        &self.solids,
                        &self.overland_stacks,
                        dt,
                        self.time,
                        self.dispersion_coeff,
                        &outlet_cells,
                        &boundary_conc,
                    );

                    for instability in &solids_fluxes.instabilities {
                        self.accumulators.instabilities.record(*instability);
                    }

                    water_transport.commit_new_state(&mut self.water, &water_fluxes);
                    solids_transport.commit_new_state(
                        &self.water.cells,
                        &mut self.solids,
                        &mut self.overland_stacks,
                        &solids_fluxes,
                    );

                    // channel solids pass mirrors the overland one, computed
                    // against the channel depths already committed above so
                    // it shares the same node geometry the water step used.
                    let bed_erosion = self.config.soil_types.first().map(|st| &st.erosion);
                    if let Some(bed_erosion) = bed_erosion {
                        let channel_fluxes = solids_transport.compute_channel_fluxes(
                            &self.water.nodes,
                            &self.water.node_index,
                            &self.solids.channel,
                            &self.channel_stacks,
                            bed_erosion,
                            dt,
                            self.time,
                        );

                        for instability in &channel_fluxes.instabilities {
                            self.accumulators.instabilities.record(*instability);
                        }

                        solids_transport.commit_channel_state(
                            &self.water.nodes,
                            &mut self.solids.channel,
                            &mut self.channel_stacks,
                            &channel_fluxes,
                        );

                        for (s, _class) in self.config.solids_classes.iter().enumerate() {
                            let deposited: f64 = channel_fluxes.channel_bed_mass_delta.iter().map(|c| c[s].max(0.0)).sum();
                            let eroded: f64 = channel_fluxes.channel_bed_mass_delta.iter().map(|c| (-c[s]).max(0.0)).sum();
                            self.accumulators.mass_balance.deposition_mass[s] += deposited;
                            self.accumulators.mass_balance.erosion_mass[s] += eroded;
                        }

                        for node in &self.water.nodes {
                            if let Some(outlet_id) = node.outlet_id {
                                if let Some(totals) = self.accumulators.outlets.get_mut(&outlet_id) {
                                    for (s, mass) in channel_fluxes.outlet_mass.iter().enumerate() {
                                        totals.record_solids(s, *mass);
                                    }
                                }
                            }
                        }
                    }

                    self.accumulators.mass_balance.rainfall_volume += water_fluxes.rainfall_volume;
                    self.accumulators.mass_balance.interception_volume += water_fluxes.interception_volume;
                    self.accumulators.mass_balance.infiltration_volume += water_fluxes.infiltration_volume;
                    self.accumulators.mass_balance.transmission_loss_volume += water_fluxes.transmission_loss_volume;
                    self.accumulators.mass_balance.snow_accumulation_volume += water_fluxes.snow_accumulation_volume;
                    self.accumulators.mass_balance.snowmelt_volume += water_fluxes.snowmelt_volume;
                    for (s, class) in self.config.solids_classes.iter().enumerate() {
                        let deposited: f64 = solids_fluxes.overland_bed_mass_delta.iter().map(|c| c[s].max(0.0)).sum();
                        let eroded: f64 = solids_fluxes.overland_bed_mass_delta.iter().map(|c| (-c[s]).max(0.0)).sum();
                        self.accumulators.mass_balance.deposition_mass[s] += deposited;
                        self.accumulators.mass_balance.erosion_mass[s] += eroded;
                        let _ = class;
                    }

                    for node in &self.water.nodes {
                        if let Some(outlet_id) = node.outlet_id {
                            if let Some(totals) = self.accumulators.outlets.get_mut(&outlet_id) {
                                let (area, _) = node.cross_section(node.depth);
                                let discharge = if node.manning_n > 0.0 {
                                    let rh = node.hydraulic_radius(node.depth);
                                    (1.0 / node.manning_n) * area * rh.powf(2.0 / 3.0) * node.friction_slope.abs().sqrt()
                                } else {
                                    0.0
                                };
                                totals.record_discharge(self.time, discharge, dt);
                            }
                        }
                    }

                    let peak_depth = self.water.cells.iter().map(|c| c.depth).fold(0.0, f64::max);
                    self.accumulators.record_overland_depth(self.time, peak_depth);

                    self.time += dt;
                    return Ok(StepReport {
                        time: self.time,
                        dt,
                        max_courant: water_fluxes.max_courant,
                        retries: self.controller.retry_count - retries_before,
                    });
                }
            }
        }
    }

    fn rainfall_rate_at(&mut self, time: f64) -> f64 {
        let values = self.rainfall.update_all(time);
        *values.first().unwrap_or(&0.0)
    }

    /// Run until `end_time` (hours), returning the number of accepted steps.
    /// Propagates `IntegrationStall`/other fatal errors immediately.
    pub fn run_until(&mut self, end_time: f64) -> TrexResult<u64> {
        let mut steps = 0u64;
        while self.time < end_time {
            self.step().map_err(|e| match e {
                TrexError::IntegrationStall(s) => TrexError::IntegrationStall(s),
                other => other,
            })?;
            steps += 1;
        }
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DepositionOption, DtOption, GeneralControls, LandUse, ProcessScales, SoilType};
    use crate::grid::{Grid, RasterHeader};
    use crate::water::OverlandCell;

    fn tiny_config() -> Config {
        Config {
            general: GeneralControls {
                simulation_id: "test".into(),
                start_time: 0.0,
                end_time: 1.0,
                ksim: 2,
                dt_option: DtOption::Adaptive,
                max_courant: 1.0,
                dt_floor: 1e-5,
                dt_max: 60.0,
                infiltration_enabled: false,
                transmission_loss_enabled: false,
                snow_enabled: false,
                snowmelt_factor: 0.0,
                snow_threshold_temp_c: 0.0,
            },
            soil_types: vec![SoilType {
                id: 1,
                hydraulic_conductivity: 1e-6,
                capillary_suction_head: 0.1,
                moisture_deficit: 0.3,
                porosity: 0.4,
                erosion: crate::config::ErosionParams::ExcessShear { a_y: 0.0, m_exp: 1.0 },
                gsd: vec![1.0],
            }],
            land_uses: vec![LandUse {
                id: 1,
                manning_n: 0.03,
                interception_depth_max: 0.0,
                bare_fraction: 1.0,
            }],
            solids_classes: vec![],
            deposition_option: DepositionOption(0),
            scales: ProcessScales::default(),
            max_sat_change_per_step: 1.0,
        }
    }

    fn flat_grid() -> Grid {
        let header = RasterHeader {
            ncols: 2,
            nrows: 1,
            xllcorner: 0.0,
            yllcorner: 0.0,
            cellsize: 10.0,
            nodata_value: -9999,
        };
        Grid::build(header, &[1, 1], &[1.0, 0.9], &[0, 0], &[0, 0], &[0, 0]).unwrap()
    }

    #[test]
    fn step_advances_time_and_conserves_nonnegative_depth() {
        let grid = flat_grid();
        let config = tiny_config();
        let cells = vec![
            OverlandCell {
                elevation_initial: 1.0,
                elevation: 1.0,
                land_use: 1,
                soil_type: 1,
                area: 100.0,
                depth: 0.05,
                interception_storage: 0.0,
                snow_storage: 0.0,
                cumulative_infiltration: 0.0,
                velocity_x: 0.0,
                velocity_y: 0.0,
            },
            OverlandCell {
                elevation_initial: 0.9,
                elevation: 0.9,
                land_use: 1,
                soil_type: 1,
                area: 100.0,
                depth: 0.0,
                interception_storage: 0.0,
                snow_storage: 0.0,
                cumulative_infiltration: 0.0,
                velocity_x: 0.0,
                velocity_y: 0.0,
            },
        ];
        let water = WaterState {
            cells,
            nodes: vec![],
            node_index: Default::default(),
        };
        let solids = SolidsState {
            overland: vec![
                crate::solids::SolidsCell { conc: vec![] },
                crate::solids::SolidsCell { conc: vec![] },
            ],
            channel: vec![],
        };
        let controller = TimeStepController::new(DtOption::Adaptive, 1.0, 1e-5, 60.0, vec![], 16);
        let accumulators = Accumulators::new(0, &[]);

        let make_stack = || {
            Stack::new(
                vec![crate::stack::Layer {
                    thickness: 1.0,
                    volume: 10.0,
                    porosity: 0.4,
                    bottom_width: None,
                    gsd: vec![1.0],
                    min_volume: 0.0,
                    max_volume: f64::INFINITY,
                    bed_elevation: 0.0,
                }],
                None,
            )
            .unwrap()
        };

        let mut sim = Simulation {
            grid,
            config,
            water,
            solids,
            overland_stacks: vec![make_stack(), make_stack()],
            channel_stacks: vec![],
            rainfall: ForcingSet::new(vec![]),
            air_temperature: ForcingSet::new(vec![]),
            boundary_solids: ForcingSet::new(vec![]),
            controller,
            accumulators,
            time: 0.0,
            dispersion_coeff: 0.0,
        };

        let report = sim.step().unwrap();
        assert!(report.time > 0.0);
        assert!(sim.water.cells.iter().all(|c| c.depth >= 0.0));
    }
}
