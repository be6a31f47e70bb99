//! Configuration ingest: per-soil-type, per-land-use, per-solids-class
//! property tables (Data Group C in the original source), plus general
//! simulation controls (Data Group A). All arrays are sized once this is
//! loaded, from `nrows * ncols * nsolids * maxstack` (spec §3 Lifecycle).

use crate::error::ConfigurationError;

/// Simulation-wide controls read once at startup and treated as immutable
/// for the run (`ksim`, `dtopt`, `maxcourant`, start/end time, ...).
#[derive(Debug, Clone)]
pub struct GeneralControls {
    pub simulation_id: String,
    /// simulation start time (hours)
    pub start_time: f64,
    /// simulation end time (hours)
    pub end_time: f64,
    /// 1 = water only, 2 = water+solids, 3 = water+solids+chemistry (stub)
    pub ksim: u8,
    pub dt_option: DtOption,
    pub max_courant: f64,
    /// fixed floor below which an adaptive dt triggers IntegrationStall
    pub dt_floor: f64,
    pub dt_max: f64,
    pub infiltration_enabled: bool,
    pub transmission_loss_enabled: bool,
    pub snow_enabled: bool,
    /// degree-day melt factor [m water-equivalent / s / degree C], applied
    /// to snow storage while air temperature is above `snow_threshold_temp_c`.
    pub snowmelt_factor: f64,
    /// air temperature [deg C] at or below which rainfall is diverted to
    /// snow storage instead of the surface (spec §4.4 step 1).
    pub snow_threshold_temp_c: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtOption {
    /// user table of (dt, t_break) pairs, `dtopt = 0`
    UserTable,
    /// adaptive Courant-controlled, `dtopt = 1`
    Adaptive,
    /// adaptive with simulation-relaunch support, `dtopt = 2`
    AdaptiveRelaunch,
    /// precomputed (dt, t_break) table read from file, `dtopt = 3`
    Precomputed,
}

/// Erosion parameterization: either USLE-style transport-capacity
/// coefficients or an excess-shear formulation (spec §3 Soil type/land
/// use, option 1 vs option >2 in §4.5).
#[derive(Debug, Clone)]
pub enum ErosionParams {
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

#[derive(Debug, Clone)]
pub struct SoilType {
    pub id: usize,
    /// hydraulic conductivity K_h [m/s]
    pub hydraulic_conductivity: f64,
    /// capillary suction head psi [m]
    pub capillary_suction_head: f64,
    /// moisture deficit delta-theta [dimensionless]
    pub moisture_deficit: f64,
    pub porosity: f64,
    pub erosion: ErosionParams,
    /// grain size distribution by solids class, must sum to 1 +/- 1e-5
    pub gsd: Vec<f64>,
}

impl SoilType {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let sum: f64 = self.gsd.iter().sum();
        if (sum - 1.0).abs() >= 1e-5 {
            return Err(ConfigurationError::GsdSumOutOfTolerance {
                context: format!("soil type {}", self.id),
                sum,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LandUse {
    pub id: usize,
    pub manning_n: f64,
    /// maximum interception storage depth for this class [m]
    pub interception_depth_max: f64,
    pub bare_fraction: f64,
}

#[derive(Debug, Clone)]
pub struct SolidsClassProps {
    pub id: usize,
    /// mean particle diameter d_s [m]
    pub mean_diameter: f64,
    /// specific gravity rho_s/rho_w
    pub specific_gravity: f64,
    /// settling velocity w_s [m/s]
    pub settling_velocity: f64,
    pub cohesive: bool,
    /// critical shear for deposition tau_cd [N/m^2]
    pub critical_shear_deposition: f64,
    /// critical shear for erosion tau_ce [N/m^2]
    pub critical_shear_erosion: f64,
    /// age-hardening factor (zage)
    pub aging_factor: f64,
    pub reporting_group: usize,
    /// source-0 external load: distributed mass input rate [g/s/m^2]
    /// applied to every active overland cell's water column regardless of
    /// local hydraulics (spec §4.4 "source 0 is external load (point or
    /// distributed)"); point loads are out of scope here.
    pub external_load_rate: f64,
}

impl SolidsClassProps {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.critical_shear_deposition <= 0.0 {
            return Err(ConfigurationError::InvalidSolidsProperty {
                class: self.id,
                reason: format!(
                    "critical shear for deposition must be > 0, got {}",
                    self.critical_shear_deposition
                ),
            });
        }
        if self.critical_shear_erosion <= 0.0 {
            return Err(ConfigurationError::InvalidSolidsProperty {
                class: self.id,
                reason: format!(
                    "critical shear for erosion must be > 0, got {}",
                    self.critical_shear_erosion
                ),
            });
        }
        if self.settling_velocity < 0.0 {
            return Err(ConfigurationError::InvalidSolidsProperty {
                class: self.id,
                reason: format!("settling velocity must be >= 0, got {}", self.settling_velocity),
            });
        }
        Ok(())
    }
}

/// Deposition-probability option (spec §4.5): `<=1` forces `p_dep = 1`;
/// `>1` activates the Gessler/Partheniades shear-dependent formulation
/// selected per-class by `cncopt` (cohesionless=0, cohesive=1).
#[derive(Debug, Clone, Copy)]
pub struct DepositionOption(pub u8);

impl DepositionOption {
    pub fn is_shear_dependent(self) -> bool {
        self.0 > 1
    }
}

/// Process scale factors applied uniformly to a computed flux before mass
/// balancing (`depchscale` etc. in the original).
#[derive(Debug, Clone, Copy)]
pub struct ProcessScales {
    pub deposition_overland: f64,
    pub deposition_channel: f64,
    pub erosion_overland: f64,
    pub erosion_channel: f64,
    pub dispersion_overland_scale: f64,
}

impl Default for ProcessScales {
    fn default() -> Self {
        ProcessScales {
            deposition_overland: 1.0,
            deposition_channel: 1.0,
            erosion_overland: 1.0,
            erosion_channel: 1.0,
            dispersion_overland_scale: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub general: GeneralControls,
    pub soil_types: Vec<SoilType>,
    pub land_uses: Vec<LandUse>,
    pub solids_classes: Vec<SolidsClassProps>,
    pub deposition_option: DepositionOption,
    pub scales: ProcessScales,
    pub max_sat_change_per_step: f64,
}

impl Config {
    pub fn nsolids(&self) -> usize {
        self.solids_classes.len()
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for st in &self.soil_types {
            st.validate()?;
        }
        for sc in &self.solids_classes {
            sc.validate()?;
        }
        Ok(())
    }
}
