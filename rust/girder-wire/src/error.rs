use std::fmt;

/// Errors from decoding a wire image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The cursor ran out of bytes.
    Truncated { needed: usize, remaining: usize },
    /// A decoded string was not valid UTF-8.
    InvalidUtf8,
    /// A variant tag byte matched no known alternative.
    BadTag(u8),
    /// A pointer alternative did not parse as a hex address.
    BadPointer(String),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Truncated { needed, remaining } => {
                write!(f, "truncated input: needed {needed} bytes, {remaining} remaining")
            }
            WireError::InvalidUtf8 => write!(f, "decoded string is not valid UTF-8"),
            WireError::BadTag(tag) => write!(f, "unknown variant tag {tag}"),
            WireError::BadPointer(text) => write!(f, "malformed pointer text '{text}'"),
        }
    }
}

impl std::error::Error for WireError {}
