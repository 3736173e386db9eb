//! Typed errors of the analysis library
//!
//! The pipeline and the command-line front-end work with `eyre` reports, but
//! the building blocks below it report failures through these enums so that
//! callers can tell a corrupt data file apart from a fit that went nowhere.

use std::path::PathBuf;
use thiserror::Error;

/// Failures of the FASTER data reader
#[derive(Debug, Error)]
pub enum FasterError {
    /// The data file could not be opened or read
    #[error("cannot read FASTER data from {path}: {source}")]
    Io {
        /// File being read
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// A record header did not carry the expected magic byte
    #[error("bad record magic {found:#04x} at byte offset {offset}")]
    BadMagic {
        /// Magic byte that was read
        found: u8,
        /// Position of the faulty header in the (decompressed) stream
        offset: u64,
    },

    /// A record announced a payload larger than FASTER allows
    #[error("record payload of {size} bytes exceeds the {max} bytes limit")]
    OversizedLoad {
        /// Announced payload size
        size: usize,
        /// Maximal payload size
        max: usize,
    },

    /// A nested record ran past the end of its group
    #[error("truncated record in group buffer: need {needed} bytes, {available} left")]
    TruncatedGroup {
        /// Bytes required by the nested record
        needed: usize,
        /// Bytes left in the group payload
        available: usize,
    },
}

/// Failures of histogram construction
#[derive(Debug, Error, PartialEq)]
pub enum HistogramError {
    /// A histogram axis was asked for zero bins
    #[error("a histogram axis needs at least one bin")]
    NoBins,

    /// A histogram axis range is empty or not finite
    #[error("invalid histogram range [{min}, {max}]")]
    BadRange {
        /// Lower edge
        min: f64,
        /// Upper edge
        max: f64,
    },

    /// Two histograms with different binnings were combined
    #[error("histogram binnings do not match")]
    BinningMismatch,
}

/// Failures of the fitting machinery
#[derive(Debug, Error)]
pub enum FitError {
    /// The parameter vector does not fit the model
    #[error("{model} expects {expected} parameters, got {found}")]
    ParameterCount {
        /// Model name
        model: &'static str,
        /// Expected number of parameters
        expected: usize,
        /// Provided number of parameters
        found: usize,
    },

    /// There was nothing to fit
    #[error("no usable data points to fit ({0})")]
    NoData(String),

    /// Least-squares system could not be solved
    #[error("degenerate least-squares problem: {0}")]
    Degenerate(String),

    /// The minimizer backend gave up
    #[error("minimization failed: {0}")]
    Minimizer(String),
}
