//! 文件操作错误定义

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error at byte {position}: {message}")]
    Xml { position: u64, message: String },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Unsupported encoding: {0}")]
    Encoding(String),

    #[error("DXF error: {0}")]
    Dxf(String),

    #[error("Unsupported geometry: {0}")]
    UnsupportedGeometry(String),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error(transparent)]
    Core(#[from] kcad_core::CoreError),
}

pub type Result<T> = std::result::Result<T, FileError>;
