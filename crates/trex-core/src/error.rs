//! Error kinds per the error-handling design: configuration and I/O errors
//! abort the run; numerical instabilities are logged and counted but do not
//! abort; an integration stall is fatal.

use thiserror::Error;

/// Sentinel used in place of an integer `nodatavalue` compared against a
/// float field (the original compares `elevationov[i][j] == nodatavalue`
/// directly; here we reserve one finite-but-extreme value and compare
/// consistently instead of relying on exact float equality with an int).
pub const NODATA_SENTINEL: f64 = -9999.0;

pub const TOLERANCE: f64 = 1.0e-7;

#[derive(Debug, Error)]
pub enum TrexError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    IntegrationStall(#[from] IntegrationStallError),
}

pub type TrexResult<T> = Result<T, TrexError>;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("raster header mismatch in {file}: expected {expected}={expected_value}, got {got}")]
    RasterHeaderMismatch {
        file: String,
        expected: &'static str,
        expected_value: String,
        got: String,
    },

    #[error("raster cell misalignment in {file} at ({row},{col}): mask={mask_state}, data is nodata={data_is_nodata}")]
    RasterMisalignment {
        file: String,
        row: usize,
        col: usize,
        mask_state: u8,
        data_is_nodata: bool,
    },

    #[error("invalid channel connectivity: link {link} node {node}: {reason}")]
    InvalidConnectivity {
        link: usize,
        node: usize,
        reason: String,
    },

    #[error("grain size distribution for {context} sums to {sum:.6}, outside tolerance of 1.0")]
    GsdSumOutOfTolerance { context: String, sum: f64 },

    #[error("invalid solids property for class {class}: {reason}")]
    InvalidSolidsProperty { class: usize, reason: String },

    #[error("channel bed-width invariant violated at link {link} node {node} layer {layer}: bottom width {width} exceeds channel bottom width {channel_width}")]
    BedWidthInvariantViolated {
        link: usize,
        node: usize,
        layer: usize,
        width: f64,
        channel_width: f64,
    },

    #[error("unknown reaction constant id {id} in {context}")]
    UnknownReactionConstant { id: i32, context: String },

    #[error("forcing function {name} has fewer than 2 breakpoints (n_pairs={n_pairs})")]
    InsufficientForcingPairs { name: String, n_pairs: usize },

    #[error("malformed record in {file} at line {line}: {reason}")]
    MalformedRecord {
        file: String,
        line: usize,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum IoError {
    #[error("could not open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected end of file in {path}: expected {expected}")]
    UnexpectedEof { path: String, expected: String },
}

#[derive(Debug, Error)]
#[error("integration stalled: adaptive timestep dt={dt:.3e} fell below floor {floor:.3e} at simulation time {time:.4} hours")]
pub struct IntegrationStallError {
    pub dt: f64,
    pub floor: f64,
    pub time: f64,
}

/// Non-fatal: logged via `tracing::warn!`, counted in the accumulators, and
/// the step is still accepted with the offending value clamped to zero.
#[derive(Debug, Clone, Copy)]
pub struct NumericalInstability {
    pub row: usize,
    pub col: usize,
    pub class: usize,
    pub time: f64,
    pub deficit: f64,
}

impl std::fmt::Display for NumericalInstability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "numerical instability at (i={}, j={}, class={}, t={:.4}h): clamped negative mass {:.3e}",
            self.row, self.col, self.class, self.time, self.deficit
        )
    }
}
