//! ESRI-ASCII grid reader/writer, used for every raster input (mask,
//! elevation, link/node/outlet ids) and every raster output (depth,
//! cumulative erosion/deposition maps) (spec §6).

use crate::error::IoError;
use crate::grid::RasterHeader;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

pub struct AsciiGrid {
    pub header: RasterHeader,
    pub values: Vec<f64>,
}

fn io_err_open(path: &Path, source: std::io::Error) -> IoError {
    IoError::Open {
        path: path.display().to_string(),
        source,
    }
}

fn io_err_read(path: &Path, source: std::io::Error) -> IoError {
    IoError::Read {
        path: path.display().to_string(),
        source,
    }
}

pub fn read_ascii_grid(path: &Path) -> Result<AsciiGrid, IoError> {
    let file = std::fs::File::open(path).map_err(|e| io_err_open(path, e))?;
    let mut lines = BufReader::new(file).lines();

    let mut ncols = None;
    let mut nrows = None;
    let mut xllcorner = None;
    let mut yllcorner = None;
    let mut cellsize = None;
    let mut nodata_value = -9999i32;

    let mut header_fields_seen = 0;
    loop {
        let Some(line) = lines.next() else {
            return Err(IoError::UnexpectedEof {
                path: path.display().to_string(),
                expected: "ASCII grid header".to_string(),
            });
        };
        let line = line.map_err(|e| io_err_read(path, e))?;
        let mut parts = line.split_whitespace();
        let Some(key) = parts.next() else { continue };
        let key_lower = key.to_ascii_lowercase();
        let Some(value) = parts.next() else { continue };

        match key_lower.as_str() {
            "ncols" => {
                ncols = value.parse::<usize>().ok();
                header_fields_seen += 1;
            }
            "nrows" => {
                nrows = value.parse::<usize>().ok();
                header_fields_seen += 1;
            }
            "xllcorner" | "xllcenter" => {
                xllcorner = value.parse::<f64>().ok();
                header_fields_seen += 1;
            }
            "yllcorner" | "yllcenter" => {
                yllcorner = value.parse::<f64>().ok();
                header_fields_seen += 1;
            }
            "cellsize" => {
                cellsize = value.parse::<f64>().ok();
                header_fields_seen += 1;
            }
            "nodata_value" | "nodata" => {
                nodata_value = value.parse::<i32>().unwrap_or(-9999);
                header_fields_seen += 1;
            }
            _ => break,
        }
        if header_fields_seen >= 6 {
            break;
        }
    }

    let (Some(ncols), Some(nrows), Some(xllcorner), Some(yllcorner), Some(cellsize)) =
        (ncols, nrows, xllcorner, yllcorner, cellsize)
    else {
        return Err(IoError::UnexpectedEof {
            path: path.display().to_string(),
            expected: "complete ASCII grid header (ncols/nrows/xllcorner/yllcorner/cellsize)".to_string(),
        });
    };

    let header = RasterHeader {
        ncols,
        nrows,
        xllcorner,
        yllcorner,
        cellsize,
        nodata_value,
    };

    let mut values = Vec::with_capacity(ncols * nrows);
    let rest = std::fs::read_to_string(path).map_err(|e| io_err_read(path, e))?;
    // re-scan body only (cheap for the grid sizes TREX targets; header already parsed above)
    let body_start = rest
        .lines()
        .position(|l| {
            let lower = l.to_ascii_lowercase();
            !(lower.starts_with("ncols")
                || lower.starts_with("nrows")
                || lower.starts_with("xllcorner")
                || lower.starts_with("xllcenter")
                || lower.starts_with("yllcorner")
                || lower.starts_with("yllcenter")
                || lower.starts_with("cellsize")
                || lower.starts_with("nodata"))
        })
        .unwrap_or(0);

    for line in rest.lines().skip(body_start) {
        for tok in line.split_whitespace() {
            let v: f64 = tok.parse().map_err(|_| IoError::UnexpectedEof {
                path: path.display().to_string(),
                expected: format!("numeric grid value, got '{tok}'"),
            })?;
            values.push(v);
        }
    }

    if values.len() != ncols * nrows {
        return Err(IoError::UnexpectedEof {
            path: path.display().to_string(),
            expected: format!("{} grid values, got {}", ncols * nrows, values.len()),
        });
    }

    Ok(AsciiGrid { header, values })
}

pub fn write_ascii_grid(path: &Path, grid: &AsciiGrid) -> Result<(), IoError> {
    let mut file = std::fs::File::create(path).map_err(|e| IoError::Write {
        path: path.display().to_string(),
        source: e,
    })?;
    let h = &grid.header;
    writeln!(file, "ncols {}", h.ncols).map_err(|e| write_err(path, e))?;
    writeln!(file, "nrows {}", h.nrows).map_err(|e| write_err(path, e))?;
    writeln!(file, "xllcorner {}", h.xllcorner).map_err(|e| write_err(path, e))?;
    writeln!(file, "yllcorner {}", h.yllcorner).map_err(|e| write_err(path, e))?;
    writeln!(file, "cellsize {}", h.cellsize).map_err(|e| write_err(path, e))?;
    writeln!(file, "NODATA_value {}", h.nodata_value).map_err(|e| write_err(path, e))?;

    for row in 0..h.nrows {
        let start = row * h.ncols;
        let line: Vec<String> = grid.values[start..start + h.ncols].iter().map(|v| v.to_string()).collect();
        writeln!(file, "{}", line.join(" ")).map_err(|e| write_err(path, e))?;
    }
    Ok(())
}

fn write_err(path: &Path, source: std::io::Error) -> IoError {
    IoError::Write {
        path: path.display().to_string(),
        source,
    }
}
