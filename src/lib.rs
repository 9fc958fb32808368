//! # picoflow
//!
//! Event-plane reconstruction for heavy-ion collision events recorded in PicoDst-style
//! columnar files.
//!
//! Each event passes through the same five steps:
//!
//! 1. forward-detector hits on one side are selected and mapped to a vertex-relative azimuth
//!    and pseudorapidity ([`event_plane::hits`]),
//! 2. a $`Q`$-vector is accumulated in each configured pseudorapidity region
//!    ([`event_plane::qvector`]),
//! 3. the raw angle $`\Psi_n = \text{atan2}(Q_y, Q_x) / n`$ is extracted,
//! 4. the angle is corrected by recentering and Fourier flattening using the calibration
//!    produced by earlier passes ([`event_plane::calibration`]),
//! 5. the event is classified in centrality by its good-track multiplicity ([`centrality`]).
//!
//! The [`analysis`] module wires these steps to an input file, an explicit
//! [`HistogramStore`](histograms::HistogramStore) and a calibration output. A full calibration
//! takes three passes over the same data: the first measures the mean $`Q`$-vectors, the
//! second measures the Fourier coefficients of the recentered angles, and the third applies
//! both corrections.
//!
//! ```ignore
//! use picoflow::{analysis::{run_pass, PassOptions}, AnalysisConfig};
//!
//! let config = AnalysisConfig::default();
//! let options = PassOptions::new("events.parquet", "hists.bin", "calib.bin")
//!     .with_calibration_input("calib.bin");
//! let summary = run_pass(&config, &options)?;
//! println!("{summary}");
//! ```
#![warn(clippy::perf, clippy::style)]
#![allow(clippy::excessive_precision)]

use std::{fs::File, io::BufReader, io::BufWriter, path::PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Pass orchestration: event loop, cuts, and histogram filling.
pub mod analysis;
/// Percentile classification of events by track multiplicity.
pub mod centrality;
/// Named analysis configuration with defaults for every cut.
pub mod config;
/// Event records and their Parquet I/O.
pub mod data;
/// Hit selection, $`Q`$-vectors, corrections and resolution.
pub mod event_plane;
/// Forward-detector tile geometry.
pub mod geometry;
/// Histogram and profile accumulators keyed by [`HistKey`](histograms::HistKey).
pub mod histograms;
/// Seeded toy-event generation.
pub mod simulate;
/// Utility functions, enums, and traits
pub mod utils;

pub use crate::centrality::{Centrality, CentralityClassifier};
pub use crate::config::AnalysisConfig;
pub use crate::data::{Event, RawHit, Track};
pub use crate::event_plane::{
    calibration::{CalibrationKey, CalibrationProfile, CorrectionStage},
    qvector::QVector,
    EventPlane, RegionPlane,
};
pub use crate::geometry::{EpdGeometry, TileGeometry};
pub use crate::histograms::{HistKey, HistogramStore};
pub use crate::utils::enums::{Harmonic, Side};

pub type FlowResult<T> = Result<T, FlowError>;

/// The error type used by all `picoflow` internal methods
#[derive(Error, Debug)]
pub enum FlowError {
    /// An alias for [`std::io::Error`].
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
    /// An alias for [`parquet::errors::ParquetError`].
    #[error("Parquet Error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),
    /// An alias for [`arrow::error::ArrowError`].
    #[error("Arrow Error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),
    /// An alias for [`shellexpand::LookupError`].
    #[error("Failed to expand path: {0}")]
    LookupError(#[from] shellexpand::LookupError<std::env::VarError>),
    /// An error returned by the Rust encoder
    #[error("Encoder error: {0}")]
    EncodeError(#[from] bincode::error::EncodeError),
    /// An error returned by the Rust decoder
    #[error("Decoder error: {0}")]
    DecodeError(#[from] bincode::error::DecodeError),
    /// An error raised while parsing a TOML configuration file.
    #[error("Configuration parse error: {0}")]
    TomlError(#[from] toml::de::Error),
    /// An error raised while writing a configuration as TOML.
    #[error("Configuration serialization error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    /// A required column is absent from an input file.
    #[error("Missing column \"{name}\"")]
    MissingColumn {
        /// Name of the missing column
        name: String,
    },
    /// A column exists but holds an unsupported Arrow type.
    #[error("Column \"{name}\" has unsupported type {datatype}")]
    InvalidColumnType {
        /// Name of the column
        name: String,
        /// Arrow type found in the file
        datatype: String,
    },
    /// Two sequences which must be parallel have different lengths.
    #[error("{context}: expected {expected} entries, found {actual}")]
    LengthMismatch {
        /// Where the mismatch was found
        context: String,
        /// The expected length
        expected: usize,
        /// The length actually found
        actual: usize,
    },
    /// A hit refers to a tile id that the detector geometry does not know.
    #[error("Unknown detector tile id {tile_id}")]
    InvalidTile {
        /// The offending tile id
        tile_id: i32,
    },
    /// A recentering entry has a width which cannot be divided by.
    #[error("Degenerate calibration for {key}: sigma = ({sigma_x}, {sigma_y})")]
    DegenerateCalibration {
        /// Display form of the calibration key
        key: String,
        /// Width of the x component
        sigma_x: f64,
        /// Width of the y component
        sigma_y: f64,
    },
    /// No calibration entry exists for a requested key.
    #[error("No calibration entry for {key}")]
    MissingCalibration {
        /// Display form of the calibration key
        key: String,
    },
    /// A configuration value is out of range or inconsistent with another.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the problem
        reason: String,
    },
    /// An error which occurs when the user tries to parse an invalid string of text, typically
    /// into an enum variant.
    #[error("Failed to parse string: \"{name}\" does not correspond to a valid \"{object}\"!")]
    ParseError {
        /// The string which was parsed
        name: String,
        /// The name of the object it failed to parse into
        object: String,
    },
    /// A fill was requested for a histogram that was never booked.
    #[error("No histogram booked under \"{name}\"")]
    HistogramNotFound {
        /// Display form of the histogram key
        name: String,
    },
    /// A histogram exists under the key but has a different dimensionality.
    #[error("Histogram \"{name}\" is not a {expected}")]
    HistogramKindMismatch {
        /// Display form of the histogram key
        name: String,
        /// The kind the caller asked for
        expected: &'static str,
    },
    /// An integer column holds a value that does not fit the field it is read into.
    #[error("Column \"{name}\" holds out-of-range value {value}")]
    ValueOutOfRange {
        /// Name of the column
        name: String,
        /// The value found in the file
        value: i64,
    },
}

pub(crate) fn expand_path(file_path: &str) -> FlowResult<PathBuf> {
    Ok(PathBuf::from(&*shellexpand::full(file_path)?))
}

/// A trait for structs which are written to and read from disk as a single `bincode` blob,
/// such as [`HistogramStore`] and [`CalibrationProfile`].
pub trait ReadWrite: Serialize + DeserializeOwned {
    /// Write the object to the given path (shell-style expansions like `~` are allowed).
    fn save(&self, file_path: &str) -> FlowResult<()> {
        let path = expand_path(file_path)?;
        let mut writer = BufWriter::new(File::create(path)?);
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())?;
        Ok(())
    }
    /// Read an object previously written with [`ReadWrite::save`].
    fn load(file_path: &str) -> FlowResult<Self> {
        let path = expand_path(file_path)?;
        let mut reader = BufReader::new(File::open(path)?);
        Ok(bincode::serde::decode_from_std_read(
            &mut reader,
            bincode::config::standard(),
        )?)
    }
}
