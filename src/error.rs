//! Typed errors for configuration and FASTQ input.
//!
//! Alignment misses are not errors; they are `None` results. Everything that
//! is an error here is fatal for the run (configuration) or for the batch
//! that hit it (malformed input).

use std::path::PathBuf;

use thiserror::Error;

/// Problems detected while resolving parameters, before any read is processed.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A single parameter holds a value outside its valid range.
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The parameter name as spelled on the command line
        parameter: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Two or more options cannot be used together.
    #[error("Conflicting options: {0}")]
    Conflict(String),

    /// A primer string is not a nucleotide sequence with an optional polymer descriptor.
    #[error("Invalid {end} primer '{primer}': {reason}")]
    InvalidPrimer {
        /// Which end the primer belongs to ("5'" or "3'")
        end: String,
        /// The primer string as given
        primer: String,
        /// Explanation of the problem
        reason: String,
    },

    /// `--mode` named a preset that does not exist.
    #[error("Unknown preset '{name}' (available: {available})")]
    UnknownPreset {
        /// The requested preset
        name: String,
        /// Comma-separated list of known presets
        available: String,
    },

    /// The JSON configuration file could not be read.
    #[error("Failed to read config file {path:?}: {source}")]
    ConfigRead {
        /// Path to the config file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The JSON configuration file could not be parsed.
    #[error("Failed to parse config file {path:?}: {source}")]
    ConfigParse {
        /// Path to the config file
        path: PathBuf,
        /// Underlying JSON error
        source: serde_json::Error,
    },

    #[error(transparent)]
    Regex(#[from] regex::Error),
}

/// Malformed or unreadable FASTQ input.
#[derive(Error, Debug)]
pub enum FastqError {
    /// The stream ended part-way through a record.
    #[error("FASTQ record {record} is truncated: expected {expected} line")]
    Truncated {
        /// Zero-based index of the incomplete record
        record: usize,
        /// The line that was missing
        expected: &'static str,
    },

    /// A record line does not start with its required marker.
    #[error("FASTQ record {record}: {line} line must start with '{marker}'")]
    MissingMarker {
        /// Zero-based record index
        record: usize,
        /// Which line is malformed
        line: &'static str,
        /// The expected first character
        marker: char,
    },

    /// Sequence and quality lines differ in length.
    #[error("FASTQ record {record}: sequence length {seq_len} != quality length {qual_len}")]
    LengthMismatch {
        /// Zero-based record index
        record: usize,
        /// Length of the sequence line
        seq_len: usize,
        /// Length of the quality line
        qual_len: usize,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Regex(#[from] regex::Error),
}
