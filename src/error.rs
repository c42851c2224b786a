//! Error types for scdkit.

use std::path::PathBuf;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading, re-muxing or patching SCD data.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The buffer is truncated, lacks an expected signature or chunk,
    /// or carries offsets that point outside of it.
    #[error("format error: {0}")]
    Format(String),

    /// An argument is outside its accepted range (quality, loop order).
    #[error("out of range: {0}")]
    Range(String),

    /// The requested edit cannot be applied to this entry.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// In-place loop editing needs the sample-accurate aux chunk.
    #[error("unsupported: entry is missing aux chunk with sample-accurate loop data")]
    MissingAuxChunk,

    /// An external encoder could not be located.
    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    /// An external encoder ran but did not produce usable output.
    #[error("transcoder failed: {tool}: {message}")]
    TranscoderFailed { tool: String, message: String },

    /// An input file does not exist.
    #[error("file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a format error.
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    /// Create a range error.
    pub fn range(message: impl Into<String>) -> Self {
        Self::Range(message.into())
    }

    /// Create a format error for an access of `len` bytes at `offset`.
    pub fn out_of_bounds(offset: usize, len: usize, buf_len: usize) -> Self {
        Self::Format(format!(
            "access of {} byte(s) at 0x{:X} exceeds buffer of {} bytes",
            len, offset, buf_len
        ))
    }

    /// Create a tool not found error.
    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Self::ToolNotFound { tool: tool.into() }
    }

    /// Create a transcoder failure.
    pub fn tool_failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TranscoderFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a file not found error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }
}
