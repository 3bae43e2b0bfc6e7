use std::fmt;
use std::io;

/// Errors from named shared-memory objects (segments and mutexes).
#[derive(Debug)]
pub enum ShmError {
    /// The requested name exceeds the platform's shared-name limit.
    NameTooLong { name: String, max: usize },
    /// An OS primitive failed.
    Platform {
        op: &'static str,
        name: String,
        source: io::Error,
    },
}

impl ShmError {
    pub(crate) fn platform(op: &'static str, name: &str) -> Self {
        ShmError::Platform {
            op,
            name: name.to_string(),
            source: io::Error::last_os_error(),
        }
    }

    /// For pthread calls, which report failure through their return value
    /// rather than errno.
    pub(crate) fn platform_code(op: &'static str, name: &str, code: i32) -> Self {
        ShmError::Platform {
            op,
            name: name.to_string(),
            source: io::Error::from_raw_os_error(code),
        }
    }
}

impl fmt::Display for ShmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShmError::NameTooLong { name, max } => {
                write!(
                    f,
                    "shared name '{name}' exceeds the platform limit of {max} bytes"
                )
            }
            ShmError::Platform { op, name, source } => {
                write!(f, "{op} failed for '{name}': {source}")
            }
        }
    }
}

impl std::error::Error for ShmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ShmError::NameTooLong { .. } => None,
            ShmError::Platform { source, .. } => Some(source),
        }
    }
}
