//! Frame graph error types.

use thiserror::Error;

use crate::device::DeviceError;

/// Errors surfaced through the runtime's fallible query APIs.
///
/// Declaration mistakes are deliberately not errors: they are diagnosed
/// with error logs and the offending nodes are dropped, so one broken
/// subsystem cannot take the frame down.
#[derive(Debug, Error)]
pub enum FrameGraphError {
    /// Writing a debug dump failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A query referenced a resource name that was never declared or is
    /// not part of the current graph.
    #[error("unknown resource '{0}'")]
    UnknownResource(String),

    /// The device rejected an operation.
    #[error(transparent)]
    Device(#[from] DeviceError),
}
