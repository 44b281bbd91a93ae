//! Error types for module loading, bus wiring and machine assembly.
//!
//! Runtime bus faults raised by guest code are not errors at this level: they
//! are reported to the emulated CPU as exceptions (see [`crate::bus::BusFault`]).

/// Error type for emulation core operations.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    /// Argument outside the accepted domain (null handle, bad range, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Referenced module, file, core or handler does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A size field or buffer length is inconsistent
    #[error("Invalid size for {what}: expected {expected}, got {actual}")]
    InvalidSize {
        /// What was being measured
        what: &'static str,
        /// Expected size (or limit)
        expected: usize,
        /// Actual size
        actual: usize,
    },

    /// Module targets an interface version the host cannot serve
    #[error(
        "Interface version incompatible: required {}.{}, module provides {}.{}",
        required >> 16,
        required & 0xFFFF,
        provided >> 16,
        provided & 0xFFFF
    )]
    VersionIncompatible {
        /// Version the host supports (`major << 16 | minor`)
        required: u32,
        /// Version declared by the module
        provided: u32,
    },

    /// Allocation failure (module region, RAM)
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Feature declared but not supported by this host
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// One or more relocation entries could not be applied
    #[error("Relocation failed: {failed} of {total} entries rejected")]
    Relocation {
        /// Number of rejected entries
        failed: usize,
        /// Total number of entries processed
        total: usize,
    },

    /// IO error from the filesystem
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Machine profile could not be parsed
    #[error("Profile error: {0}")]
    Profile(#[from] serde_json::Error),
}

impl From<String> for CoreError {
    fn from(msg: String) -> Self {
        CoreError::InvalidArgument(msg)
    }
}

impl From<&str> for CoreError {
    fn from(msg: &str) -> Self {
        CoreError::InvalidArgument(msg.to_string())
    }
}

/// Result type for emulation core operations
pub type Result<T> = std::result::Result<T, CoreError>;
