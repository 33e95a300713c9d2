use thiserror::Error;

/// Errors produced while reading or writing a snapshot file.
#[derive(Debug, Error)]
pub enum RdbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file ended before a complete record (or the 0xFF terminator)
    /// was read. Entries already applied to the store before truncation
    /// was discovered are not rolled back.
    #[error("snapshot file is truncated")]
    Truncated,

    /// A recognized-but-unsupported encoding was seen, e.g. an
    /// LZF-compressed string or a non-string value type.
    #[error("unsupported encoding: {0}")]
    Unsupported(&'static str),

    /// The file's fixed header didn't match the expected magic/version.
    #[error("not a recognized snapshot file: {0}")]
    Corrupt(String),
}
