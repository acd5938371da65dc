use std::fmt;
use std::fmt::{Display, Formatter};

use tofcore::timstof::merge::MergeError;

/// Error taxonomy for a file load. Every variant is fatal for the whole load:
/// scan numbering is a whole-file invariant, so there is no partial-file
/// recovery and no retry besides the bounded buffer-growth loop around raw
/// frame reads.
#[derive(Debug)]
pub enum TimsReaderError {
    /// Missing or unopenable data files or vendor library handle.
    Resource(String),
    /// Errors from the metadata store.
    Sql(rusqlite::Error),
    /// Errors loading or resolving symbols in the vendor shared library.
    Library(libloading::Error),
    /// A mobility scan number outside [0, num_scans).
    ScanOutOfRange { frame_id: i64, scan: usize, num_scans: usize },
    /// A TOF index outside the global m/z lookup table.
    LookupOutOfRange { index: usize, len: usize },
    /// A decoded frame whose offsets disagree with its payload bounds.
    CorruptFrame { frame_id: i64, detail: String },
    /// A frame payload exceeding the maximum size threshold.
    FrameTooLarge { frame_id: i64, required_bytes: u32 },
    /// An inconsistency between the reconstructed scans, e.g. an MS2 scan
    /// whose precursor has no MS1 scan at numbering time.
    Consistency(String),
    /// A scan mode this reader does not reconstruct spectra for.
    UnsupportedScanMode(i64),
}

pub type Result<T> = std::result::Result<T, TimsReaderError>;

impl Display for TimsReaderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TimsReaderError::Resource(msg) => write!(f, "resource error: {}", msg),
            TimsReaderError::Sql(e) => write!(f, "metadata store error: {}", e),
            TimsReaderError::Library(e) => write!(f, "vendor library error: {}", e),
            TimsReaderError::ScanOutOfRange { frame_id, scan, num_scans } => write!(
                f,
                "scan number {} out of range for frame {} with {} scans",
                scan, frame_id, num_scans
            ),
            TimsReaderError::LookupOutOfRange { index, len } => write!(
                f,
                "TOF index {} out of range of the m/z lookup table (length {})",
                index, len
            ),
            TimsReaderError::CorruptFrame { frame_id, detail } => {
                write!(f, "frame {} is corrupt: {}", frame_id, detail)
            }
            TimsReaderError::FrameTooLarge { frame_id, required_bytes } => write!(
                f,
                "frame {} reports a payload of {} bytes, exceeding the maximum frame size",
                frame_id, required_bytes
            ),
            TimsReaderError::Consistency(msg) => write!(f, "consistency error: {}", msg),
            TimsReaderError::UnsupportedScanMode(mode) => {
                write!(f, "unsupported scan mode: {}", mode)
            }
        }
    }
}

impl std::error::Error for TimsReaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TimsReaderError::Sql(e) => Some(e),
            TimsReaderError::Library(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for TimsReaderError {
    fn from(e: rusqlite::Error) -> Self {
        TimsReaderError::Sql(e)
    }
}

impl From<libloading::Error> for TimsReaderError {
    fn from(e: libloading::Error) -> Self {
        TimsReaderError::Library(e)
    }
}

impl From<MergeError> for TimsReaderError {
    fn from(e: MergeError) -> Self {
        match e {
            MergeError::LookupOutOfRange { index, len } => {
                TimsReaderError::LookupOutOfRange { index, len }
            }
        }
    }
}
