//! Forcing Function Interpolator.
//!
//! Linear, cyclic piecewise interpolation of time series for rainfall,
//! snow, point loads, distributed loads, and boundary conditions. Maintains
//! a cursor to avoid rescanning; recomputes slope/intercept only when the
//! bracketing interval changes; cyclic modulo the series' own `endtime`.

use crate::error::ConfigurationError;

/// One forcing time series: an ordered list of (time, value) breakpoints.
#[derive(Debug, Clone)]
pub struct ForcingFunction {
    name: String,
    times: Vec<f64>,
    values: Vec<f64>,
    /// cursor: index of the left breakpoint of the currently cached interval
    ip: usize,
    /// cached linear interpolation coefficients for [times[ip], times[ip+1]]
    slope: f64,
    intercept: f64,
    /// next/prior breakpoint times bracketing the cached interval
    nt: f64,
    pt: f64,
    /// the series repeats with period `endtime = times[last]`
    endtime: f64,
}

impl ForcingFunction {
    /// Build a forcing function from (time_hours, value) pairs, already
    /// sorted ascending by time. Returns a configuration error if fewer
    /// than 2 pairs are supplied (per spec §4.2 failure modes).
    pub fn new(name: impl Into<String>, pairs: Vec<(f64, f64)>) -> Result<Self, ConfigurationError> {
        let name = name.into();
        if pairs.len() < 2 {
            return Err(ConfigurationError::InsufficientForcingPairs {
                name,
                n_pairs: pairs.len(),
            });
        }
        let times: Vec<f64> = pairs.iter().map(|p| p.0).collect();
        let values: Vec<f64> = pairs.iter().map(|p| p.1).collect();
        let endtime = *times.last().unwrap();

        let mut f = ForcingFunction {
            name,
            times,
            values,
            ip: 0,
            slope: 0.0,
            intercept: 0.0,
            nt: f64::NEG_INFINITY,
            pt: f64::NEG_INFINITY,
            endtime,
        };
        f.recompute_interval(0);
        Ok(f)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endtime(&self) -> f64 {
        self.endtime
    }

    pub fn next_update_time(&self) -> f64 {
        self.nt
    }

    fn recompute_interval(&mut self, ip: usize) {
        self.ip = ip;
        let t0 = self.times[ip];
        let t1 = self.times[ip + 1];
        let v0 = self.values[ip];
        let v1 = self.values[ip + 1];
        self.slope = if (t1 - t0).abs() > 0.0 { (v1 - v0) / (t1 - t0) } else { 0.0 };
        self.intercept = v0 - self.slope * t0;
        self.pt = t0;
        self.nt = t1;
    }

    /// Evaluate `f(t)`, advancing (or rewinding) the cursor as needed. The
    /// series is treated as cyclic modulo `endtime`; evaluating the same
    /// `t` twice always yields the same value regardless of prior cursor
    /// state (idempotence), and `f(t) == f(t + k*endtime)` for integer k>=0.
    pub fn value_at(&mut self, t: f64) -> f64 {
        let t0 = self.times[0];
        if t < t0 {
            // step held at first value per §4.2 failure mode
            return self.values[0];
        }

        let t_mod = if self.endtime > t0 {
            let period = self.endtime - t0;
            t0 + (t - t0).rem_euclid(period)
        } else {
            t0
        };

        // advance forward
        while self.nt.is_finite() && t_mod > self.nt && self.ip + 2 < self.times.len() {
            self.recompute_interval(self.ip + 1);
        }
        // rewind backward
        while t_mod < self.pt && self.ip > 0 {
            self.recompute_interval(self.ip - 1);
        }
        // handle t_mod exactly at or beyond the final breakpoint (cyclic wrap edge)
        if self.ip + 2 >= self.times.len() && t_mod >= self.nt {
            return *self.values.last().unwrap();
        }

        self.slope * t_mod + self.intercept
    }
}

/// A set of forcing functions evaluated together once per step. Each
/// function tracks its own `nt`; `should_rescan` lets the caller skip a
/// full per-function scan when simulation time hasn't yet reached any
/// function's next breakpoint (vectorized early-out per spec §4.2).
pub struct ForcingSet {
    functions: Vec<ForcingFunction>,
}

impl ForcingSet {
    pub fn new(functions: Vec<ForcingFunction>) -> Self {
        ForcingSet { functions }
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn min_next_update(&self) -> f64 {
        self.functions
            .iter()
            .map(|f| f.next_update_time())
            .fold(f64::INFINITY, f64::min)
    }

    pub fn should_rescan(&self, t: f64) -> bool {
        self.functions.is_empty() || t >= self.min_next_update()
    }

    pub fn update_all(&mut self, t: f64) -> Vec<f64> {
        self.functions.iter_mut().map(|f| f.value_at(t)).collect()
    }

    pub fn get(&self, idx: usize) -> &ForcingFunction {
        &self.functions[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut ForcingFunction {
        &mut self.functions[idx]
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }
}
