//! Time-Step Controller.
//!
//! Drives the adaptive, Courant-controlled explicit integration loop (spec
//! §4.6): accepts a trial `dt`, asks the water/solids modules to report the
//! resulting Courant number, and either commits the step or retries at a
//! smaller `dt`. Falls back to a user-supplied or precomputed breakpoint
//! table when `dtopt` calls for it.

use crate::config::DtOption;
use crate::error::{IntegrationStallError, TrexResult};

/// Truncate `dt` to a fixed number of significant digits so successive
/// retries converge to the same stored value bit-for-bit (spec §4.6,
/// avoids dt drifting by float noise across a relaunch).
pub fn truncate_significant(dt: f64, digits: u32) -> f64 {
    if dt <= 0.0 || !dt.is_finite() {
        return 0.0;
    }
    let magnitude = dt.abs().log10().floor() as i32;
    let scale = 10f64.powi(digits as i32 - 1 - magnitude);
    (dt * scale).round() / scale
}

#[derive(Debug, Clone, Copy)]
pub struct DtBreakpoint {
    pub time: f64,
    pub dt: f64,
}

/// History ring buffer of accepted (time, dt) pairs, periodically flushed
/// to the dt-history writer (spec §4.8).
pub struct DtHistory {
    capacity: usize,
    buffer: Vec<(f64, f64)>,
}

impl DtHistory {
    pub fn new(capacity: usize) -> Self {
        DtHistory {
            capacity,
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, time: f64, dt: f64) {
        self.buffer.push((time, dt));
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.capacity
    }

    pub fn drain(&mut self) -> Vec<(f64, f64)> {
        std::mem::take(&mut self.buffer)
    }
}

pub struct TimeStepController {
    pub option: DtOption,
    pub max_courant: f64,
    pub dt_floor: f64,
    pub dt_max: f64,
    /// fraction by which `dt` is reduced on a retry (e.g. 0.5)
    pub relaxation_factor: f64,
    /// fraction by which `dt` may grow on a comfortably-accepted step
    pub growth_factor: f64,
    table: Vec<DtBreakpoint>,
    table_cursor: usize,
    current_dt: f64,
    pub history: DtHistory,
    pub retry_count: u64,
    pub accepted_count: u64,
}

impl TimeStepController {
    pub fn new(
        option: DtOption,
        max_courant: f64,
        dt_floor: f64,
        dt_max: f64,
        table: Vec<DtBreakpoint>,
        history_capacity: usize,
    ) -> Self {
        let current_dt = table.first().map(|b| b.dt).unwrap_or(dt_max);
        TimeStepController {
            option,
            max_courant,
            dt_floor,
            dt_max,
            relaxation_factor: 0.5,
            growth_factor: 1.2,
            table,
            table_cursor: 0,
            current_dt,
            history: DtHistory::new(history_capacity),
            retry_count: 0,
            accepted_count: 0,
        }
    }

    /// `dt` to try next, given the current simulation time. For the table
    /// modes (`UserTable`/`Precomputed`) this simply reads the breakpoint in
    /// effect at `time`; for the adaptive modes it returns the last accepted
    /// (or just-relaxed) trial value.
    pub fn trial_dt(&mut self, time: f64) -> f64 {
        match self.option {
            DtOption::UserTable | DtOption::Precomputed => {
                while self.table_cursor + 1 < self.table.len() && time >= self.table[self.table_cursor + 1].time {
                    self.table_cursor += 1;
                }
                self.table.get(self.table_cursor).map(|b| b.dt).unwrap_or(self.dt_max)
            }
            DtOption::Adaptive | DtOption::AdaptiveRelaunch => self.current_dt.min(self.dt_max),
        }
    }

    /// Evaluate the Courant number produced by a trial step: accept (and
    /// possibly grow `dt` for next time) or reject and halve, recording a
    /// fatal stall if the floor is breached.
    pub fn evaluate(&mut self, time: f64, trial_dt: f64, observed_courant: f64) -> TrexResult<StepOutcome> {
        match self.option {
            DtOption::UserTable | DtOption::Precomputed => {
                self.accepted_count += 1;
                self.history.push(time, trial_dt);
                Ok(StepOutcome::Accept(trial_dt))
            }
            DtOption::Adaptive | DtOption::AdaptiveRelaunch => {
                if observed_courant > self.max_courant {
                    let reduced = truncate_significant(trial_dt * self.relaxation_factor, 4);
                    self.retry_count += 1;
                    if reduced < self.dt_floor {
                        return Err(IntegrationStallError {
                            dt: reduced,
                            floor: self.dt_floor,
                            time,
                        }
                        .into());
                    }
                    self.current_dt = reduced;
                    Ok(StepOutcome::Retry(reduced))
                } else {
                    self.accepted_count += 1;
                    self.history.push(time, trial_dt);
                    let headroom = self.max_courant / observed_courant.max(1e-9);
                    self.current_dt = if headroom > 1.5 {
                        truncate_significant((trial_dt * self.growth_factor).min(self.dt_max), 4)
                    } else {
                        trial_dt
                    };
                    Ok(StepOutcome::Accept(trial_dt))
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    Accept(f64),
    Retry(f64),
}
