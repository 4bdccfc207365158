//! # Vsync Error Types
//!
//! One flat error enum shared by every component. Each variant has a stable
//! numeric code so it can travel through a remote reply parcel.

use thiserror::Error;

/// Errors returned by vsync operations.
///
/// Success is `Ok(..)`; there is no `Ok` variant.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VsyncError {
    /// A required collaborator reference is empty or expired.
    #[error("required collaborator is missing or expired")]
    Nullptr,

    /// A precondition failed (negative period, non-positive rate,
    /// unknown connection, duplicate add).
    #[error("invalid arguments")]
    InvalidArguments,

    /// The operation does not apply to the current state.
    #[error("operation not applicable in the current state")]
    InvalidOperating,

    /// The remote call did not complete.
    #[error("remote call failed")]
    RemoteCallFailure,
}

/// Wire code for a successful call.
pub const VSYNC_CODE_OK: i32 = 0;

impl VsyncError {
    /// Returns the stable wire code of this error.
    #[inline]
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Nullptr => 1,
            Self::InvalidArguments => 2,
            Self::InvalidOperating => 3,
            Self::RemoteCallFailure => 4,
        }
    }
}

/// Result type for vsync operations.
pub type VsyncResult<T> = Result<T, VsyncError>;

/// Encodes a unit result as a wire code.
#[inline]
#[must_use]
pub fn vsync_code(result: VsyncResult<()>) -> i32 {
    match result {
        Ok(()) => VSYNC_CODE_OK,
        Err(e) => e.code(),
    }
}

/// Decodes a wire code.
///
/// Unknown codes are treated as a failed remote call.
#[must_use]
pub fn vsync_result_from_code(code: i32) -> VsyncResult<()> {
    match code {
        VSYNC_CODE_OK => Ok(()),
        1 => Err(VsyncError::Nullptr),
        2 => Err(VsyncError::InvalidArguments),
        3 => Err(VsyncError::InvalidOperating),
        _ => Err(VsyncError::RemoteCallFailure),
    }
}

/// Failure to push a timestamp through a connection's channel.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostError {
    /// The channel is full; the tick can be retried on the next vsync.
    #[error("channel would block")]
    WouldBlock,

    /// The channel is gone or broken; the connection should be dropped.
    #[error("channel broken")]
    Broken,
}

/// Errors while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid config value: {0}")]
    Invalid(String),
}
