use thiserror::Error;

/// A malformed or truncated snapshot or session log.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unexpected end of data: needed {needed} bytes, {available} available")]
    Truncated { needed: u64, available: u64 },
    #[error("bad signature {found:#010x}, expected {expected:#010x}")]
    BadSignature { expected: u32, found: u32 },
    #[error("declared size {declared} does not match actual size {actual}")]
    SizeMismatch { declared: u64, actual: u64 },
    #[error("inconsistent layout: {0}")]
    Layout(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
