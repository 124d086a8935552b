//! 核心错误定义

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Unknown coordinate zone: {0}")]
    UnknownZone(String),

    #[error("Invalid cadastral number: {0}")]
    InvalidCadastralNumber(String),

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Invalid zone table: {0}")]
    ZoneTable(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
