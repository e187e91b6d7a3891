//! Error types for the mapping core.

use std::path::PathBuf;
use thiserror::Error;

/// Problems found while walking a HID report descriptor.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("report descriptor is empty")]
    Empty,

    #[error("item at byte {offset} is truncated")]
    Truncated { offset: usize },

    #[error("pop at byte {offset} without a matching push")]
    UnbalancedPop { offset: usize },

    #[error("report size {size} at byte {offset} is wider than 32 bits")]
    FieldTooWide { offset: usize, size: u32 },

    #[error("input item at byte {offset} extends past the largest addressable report")]
    ReportTooLong { offset: usize },

    #[error("control {usage_page:#06x}/{usage:#06x} is not an input of this device")]
    ControlNotFound { usage_page: u16, usage: u16 },
}

/// Persisted mapping could not be read or written.
#[derive(Error, Debug)]
pub enum MappingError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid mapping JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{field} is {value}, expected {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CalibrationError {
    #[error("calibration aborted by quit request")]
    Aborted,
}

#[derive(Error, Debug)]
#[error("MIDI send failed: {0}")]
pub struct MidiSendError(pub String);

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error(transparent)]
    MidiSend(#[from] MidiSendError),
}

pub type Result<T> = std::result::Result<T, Error>;
