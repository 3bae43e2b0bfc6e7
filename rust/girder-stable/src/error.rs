use std::fmt;

use girder_lifecycle::SingletonError;
use girder_primitives::ShmError;
use girder_wire::WireError;

/// Errors from the stable container layer.
#[derive(Debug)]
pub enum StableError {
    /// A named OS object failed (mutex, segment, name).
    Shm(ShmError),
    /// The segment held bytes that do not decode as the expected type.
    Corrupt(WireError),
    /// The serialized image would not fit the segment.
    CapacityExceeded { required: usize, capacity: usize },
    /// A map lookup or update addressed an absent key.
    KeyMissing,
    /// A heap allocation failed.
    OutOfMemory { requested: usize },
    /// Append on a buffer adopted from a raw address of unknown length.
    UnknownLength,
    /// A name registered in the singleton registry under a different type.
    TypeConflict { name: String },
    /// The singleton registry is shut down; shared state is unavailable.
    ShuttingDown,
    /// Caller misuse that is not any of the above.
    InvalidArgument(String),
}

impl fmt::Display for StableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StableError::Shm(err) => write!(f, "{err}"),
            StableError::Corrupt(err) => write!(f, "corrupt segment image: {err}"),
            StableError::CapacityExceeded { required, capacity } => write!(
                f,
                "serialized image needs {required} bytes but the segment holds {capacity}; \
                 set CBEAM_SRB_MAP_BYTES to configure a higher value"
            ),
            StableError::KeyMissing => write!(f, "key not present in the stable map"),
            StableError::OutOfMemory { requested } => {
                write!(f, "allocation of {requested} bytes failed")
            }
            StableError::UnknownLength => write!(
                f,
                "cannot append to a buffer adopted from a raw address of unknown length"
            ),
            StableError::TypeConflict { name } => {
                write!(f, "singleton '{name}' is registered under a different type")
            }
            StableError::ShuttingDown => {
                write!(f, "the singleton registry is shut down")
            }
            StableError::InvalidArgument(what) => write!(f, "invalid argument: {what}"),
        }
    }
}

impl std::error::Error for StableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StableError::Shm(err) => Some(err),
            StableError::Corrupt(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ShmError> for StableError {
    fn from(err: ShmError) -> Self {
        StableError::Shm(err)
    }
}

impl From<WireError> for StableError {
    fn from(err: WireError) -> Self {
        StableError::Corrupt(err)
    }
}

impl From<SingletonError> for StableError {
    fn from(err: SingletonError) -> Self {
        match err {
            SingletonError::TypeConflict { name } => StableError::TypeConflict { name },
        }
    }
}
