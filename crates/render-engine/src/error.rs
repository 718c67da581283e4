//! Render-layer errors.

use reelfx_common::error::ReelError;

use crate::backend::TargetId;

#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("no GPU adapter available")]
    NoAdapter,

    #[error("device request failed: {0}")]
    Device(String),

    #[error("render target {0:?} does not exist")]
    UnknownTarget(TargetId),

    #[error("program {0} does not exist")]
    UnknownProgram(u64),

    #[error("program '{entry}' failed to compile: {message}")]
    Compile { entry: String, message: String },

    #[error("invalid target size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("no source frame uploaded")]
    NoSource,

    #[error("pass reads and writes the same target")]
    Feedback,

    #[error("readback failed: {0}")]
    Readback(String),
}

pub type GpuResult<T> = Result<T, GpuError>;

impl From<GpuError> for ReelError {
    fn from(err: GpuError) -> Self {
        ReelError::render(err.to_string())
    }
}
