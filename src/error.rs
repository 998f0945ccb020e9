//! Error types for BkSync

use thiserror::Error;

/// Result type alias for BkSync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for BkSync
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors on base, new, delta or output files
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed BD file (bad magic, truncated header or payload, unknown flags)
    #[error("Format error: {message}")]
    Format { message: String },

    /// A src/dest key does not fit the 16-bit length field of the BD header
    #[error("{which} key is {len} bytes, at most 65535 bytes are allowed")]
    KeyTooLong { which: &'static str, len: usize },

    /// CRC32 over the payload differs from the trailer: the delta itself is corrupt
    #[error("Delta trailer checksum mismatch: expected {expected:#010x}, computed {actual:#010x}")]
    TrailerChecksumMismatch { expected: u64, actual: u64 },

    /// MD5 of the reconstructed file differs from the one recorded in the delta
    #[error("Integrity mismatch: expected md5 {expected}, reconstructed md5 {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    /// A copy operation reaches past the end of the supplied base file
    #[error("Copy of block {block_index} ({length} bytes) is out of range for a {base_len} byte base file")]
    CopyOutOfRange {
        block_index: u64,
        length: u32,
        base_len: u64,
    },

    /// Malformed signature file
    #[error("Signature error: {message}")]
    Signature { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Match ratio below the configured threshold (raised by the ratio gate only)
    #[error("Reuse rate {ratio:.3} is below the required {threshold:.3}")]
    LowReuseRate { ratio: f64, threshold: f64 },
}

impl Error {
    /// Create an I/O error with context
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a format error
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
        }
    }

    /// Create a signature error
    pub fn signature(message: impl Into<String>) -> Self {
        Self::Signature {
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Map a read failure while decoding to a format error when the input simply ran out
    pub(crate) fn truncated(context: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::format(format!("truncated {}", context))
        } else {
            Self::io(format!("reading {}", context), source)
        }
    }

    /// Check if this error means the supplied base file does not fit the delta
    pub fn is_base_mismatch(&self) -> bool {
        matches!(
            self,
            Error::IntegrityMismatch { .. } | Error::CopyOutOfRange { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config {
            message: format!("TOML parse error: {}", err),
        }
    }
}
