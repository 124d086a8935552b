//! KCAD 文件格式处理
//!
//! 支持：
//! - EGRN XML 摘录解析（[`egrn`]），编码自动识别
//! - 导出记录生成（[`export`]）
//! - `.dxf` 导出与回读（[`dxf_io`]）
//! - MapInfo `.mif`/`.mid` 导出（[`tab`]）

pub mod dxf_io;
pub mod egrn;
pub mod error;
pub mod export;
pub mod field;
pub mod tab;
pub mod xml;

pub use egrn::{EgrnParser, ParseIssue, ParseIssueKind, ParseOptions, ParseOutput};
pub use error::FileError;
pub use export::{
    ExportBatch, ExportFormatter, ExportOptions, ExportRecord, FormatLimits, OutputFile,
    OutputFormat,
};
pub use field::FieldValue;
