//! 流水线错误定义

use crate::state::PipelineState;
use kcad_core::CoreError;
use kcad_file::FileError;
use thiserror::Error;

/// 导致整次运行进入 `Failed` 的错误
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Unknown coordinate zone: {0}")]
    UnknownZone(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Run cancelled at {0}")]
    Cancelled(PipelineState),

    #[error("Warnings treated as blocking: {0}")]
    WarningPolicy(String),

    #[error("Output verification failed: {0}")]
    Verification(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    File(FileError),

    #[error(transparent)]
    Core(CoreError),
}

impl From<FileError> for PipelineError {
    fn from(err: FileError) -> Self {
        match err {
            FileError::Io(e) => PipelineError::Io(e),
            FileError::Schema(message) => PipelineError::Schema(message),
            FileError::Xml { position, message } => {
                PipelineError::Schema(format!("malformed XML at byte {}: {}", position, message))
            }
            FileError::Core(e) => e.into(),
            other => PipelineError::File(other),
        }
    }
}

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownZone(zone) => PipelineError::UnknownZone(zone),
            CoreError::ZoneTable(message) => PipelineError::Config(message),
            other => PipelineError::Core(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
