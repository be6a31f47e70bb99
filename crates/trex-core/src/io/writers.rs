//! Output writers: echo (configuration restatement), summary statistics
//! (mass balance + runtime performance), per-outlet tabular hydrographs/
//! sedigraphs, and the dt-history log (spec §4.8).
//!
//! `format_runtime_summary` mirrors the elapsed-time breakpoints in the
//! original `RunTime.c` (seconds under a minute, minutes under an hour,
//! hours beyond that).

use crate::accumulators::Accumulators;
use crate::error::IoError;
use crate::integrator::DtHistory;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

pub fn format_runtime_summary(simulation_hour: f64, elapsed: Duration) -> String {
    let elapsed_secs = elapsed.as_secs_f64();
    let (value, unit) = if elapsed_secs < 60.0 {
        (elapsed_secs, "seconds")
    } else if elapsed_secs < 3600.0 {
        (elapsed_secs / 60.0, "minutes")
    } else {
        (elapsed_secs / 3600.0, "hours")
    };
    format!(
        "\nRuntime Performance Summary\n~~~~~~~~~~~~~~~~~~~~~~~~~~~\n\
         \nTREX model run successfully completed! \
         \nProgram stopped at simulation hour:{simulation_hour:12.4}\n\
         \nTREX Run Time:{value:10.2} {unit}\n"
    )
}

pub struct StatsWriter {
    path: std::path::PathBuf,
}

impl StatsWriter {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        StatsWriter { path: path.into() }
    }

    pub fn write_runtime_summary(&self, simulation_hour: f64, elapsed: Duration) -> Result<(), IoError> {
        let text = format_runtime_summary(simulation_hour, elapsed);
        self.append(&text)
    }

    pub fn write_mass_balance(&self, accumulators: &Accumulators) -> Result<(), IoError> {
        let mb = &accumulators.mass_balance;
        let mut text = String::new();
        text.push_str("\nWater Mass Balance\n~~~~~~~~~~~~~~~~~~\n");
        text.push_str(&format!("Rainfall volume:         {:14.4} m3\n", mb.rainfall_volume));
        text.push_str(&format!("Interception volume:     {:14.4} m3\n", mb.interception_volume));
        text.push_str(&format!("Infiltration volume:     {:14.4} m3\n", mb.infiltration_volume));
        text.push_str(&format!("Transmission loss volume:{:14.4} m3\n", mb.transmission_loss_volume));
        text.push_str(&format!("Snow accumulation volume:{:14.4} m3\n", mb.snow_accumulation_volume));
        text.push_str(&format!("Snowmelt volume:         {:14.4} m3\n", mb.snowmelt_volume));
        text.push_str(&format!(
            "Numerical instabilities logged: {}\n",
            accumulators.instabilities.count
        ));
        self.append(&text)
    }

    fn append(&self, text: &str) -> Result<(), IoError> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| IoError::Open {
                path: self.path.display().to_string(),
                source: e,
            })?;
        file.write_all(text.as_bytes()).map_err(|e| IoError::Write {
            path: self.path.display().to_string(),
            source: e,
        })
    }
}

/// Per-outlet tabular writer: one row per accepted step, `time discharge
/// [class masses...]` (spec §4.8 tabular output).
pub struct TabularWriter {
    path: std::path::PathBuf,
}

impl TabularWriter {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        TabularWriter { path: path.into() }
    }

    pub fn write_header(&self, nsolids: usize) -> Result<(), IoError> {
        let mut header = "time\tdischarge".to_string();
        for s in 0..nsolids {
            header.push_str(&format!("\tclass{s}"));
        }
        header.push('\n');
        self.write(&header, false)
    }

    pub fn write_row(&self, time: f64, discharge: f64, class_masses: &[f64]) -> Result<(), IoError> {
        let mut row = format!("{time:.4}\t{discharge:.6}");
        for m in class_masses {
            row.push_str(&format!("\t{m:.6}"));
        }
        row.push('\n');
        self.write(&row, true)
    }

    fn write(&self, text: &str, append: bool) -> Result<(), IoError> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(append)
            .write(true)
            .truncate(!append)
            .open(&self.path)
            .map_err(|e| IoError::Open {
                path: self.path.display().to_string(),
                source: e,
            })?;
        file.write_all(text.as_bytes()).map_err(|e| IoError::Write {
            path: self.path.display().to_string(),
            source: e,
        })
    }
}

/// Flushes the integrator's dt-history ring buffer to disk whenever it
/// fills, appending `time dt` rows.
pub struct DtHistoryWriter {
    path: std::path::PathBuf,
}

impl DtHistoryWriter {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        DtHistoryWriter { path: path.into() }
    }

    pub fn flush_if_full(&self, history: &mut DtHistory) -> Result<(), IoError> {
        if !history.is_full() {
            return Ok(());
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| IoError::Open {
                path: self.path.display().to_string(),
                source: e,
            })?;
        for (time, dt) in history.drain() {
            writeln!(file, "{time:.6}\t{dt:.6e}").map_err(|e| IoError::Write {
                path: self.path.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }
}

pub fn echo_path(output_dir: &Path) -> std::path::PathBuf {
    output_dir.join("echo.out")
}

pub fn stats_path(output_dir: &Path) -> std::path::PathBuf {
    output_dir.join("summary_stats.out")
}
