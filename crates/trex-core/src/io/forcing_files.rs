//! Whitespace-delimited time-series reader for rainfall, snowmelt, point
//! loads, and distributed loads: each line is `time value` (spec §6 forcing
//! file format), fed directly into `forcing::ForcingFunction::new`.

use crate::error::{ConfigurationError, IoError};
use crate::forcing::ForcingFunction;
use std::io::BufRead;
use std::path::Path;

pub fn read_forcing_series(path: &Path, name: &str) -> Result<ForcingFunction, ConfigurationOrIo> {
    let file = std::fs::File::open(path).map_err(|e| {
        ConfigurationOrIo::Io(IoError::Open {
            path: path.display().to_string(),
            source: e,
        })
    })?;

    let mut pairs = Vec::new();
    for (lineno, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| {
            ConfigurationOrIo::Io(IoError::Read {
                path: path.display().to_string(),
                source: e,
            })
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut parts = trimmed.split_whitespace();
        let (Some(t), Some(v)) = (parts.next(), parts.next()) else {
            return Err(ConfigurationOrIo::Configuration(ConfigurationError::MalformedRecord {
                file: path.display().to_string(),
                line: lineno + 1,
                reason: "expected 'time value'".to_string(),
            }));
        };
        let (t, v) = (t.parse::<f64>(), v.parse::<f64>());
        match (t, v) {
            (Ok(t), Ok(v)) => pairs.push((t, v)),
            _ => {
                return Err(ConfigurationOrIo::Configuration(ConfigurationError::MalformedRecord {
                    file: path.display().to_string(),
                    line: lineno + 1,
                    reason: "non-numeric time or value".to_string(),
                }))
            }
        }
    }

    ForcingFunction::new(name, pairs).map_err(ConfigurationOrIo::Configuration)
}

/// Forcing-file parsing surfaces both malformed-record and too-few-pairs
/// failures; keep them distinguishable without multiplying `IoError`
/// variants for a condition that is really a configuration problem.
#[derive(Debug)]
pub enum ConfigurationOrIo {
    Configuration(ConfigurationError),
    Io(IoError),
}

impl std::fmt::Display for ConfigurationOrIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigurationOrIo::Configuration(e) => write!(f, "{e}"),
            ConfigurationOrIo::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ConfigurationOrIo {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_simple_series() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rain.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "# comment").unwrap();
        writeln!(f, "0.0 0.0").unwrap();
        writeln!(f, "1.0 10.0").unwrap();
        drop(f);

        let mut series = read_forcing_series(&path, "rain").unwrap();
        assert!((series.value_at(0.5) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_malformed_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "not-a-number value").unwrap();
        drop(f);
        let err = read_forcing_series(&path, "bad").unwrap_err();
        assert!(matches!(err, ConfigurationOrIo::Configuration(_)));
    }
}
