//! KCAD 流水线
//!
//! 把地籍摘录变成图纸的一次完整运行：
//! - 状态机（[`state`]）与编排（[`orchestrator`]）
//! - 运行配置（[`config`]）与取消标记（[`cancel`]）
//! - 输出接收端（[`sink`]）与诊断报告（[`report`]）
//!
//! # 示例
//!
//! ```rust,no_run
//! use kcad_pipeline::{CancellationToken, MemorySink, Pipeline, PipelineConfig};
//!
//! let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
//! let xml = std::fs::read("extract.xml").unwrap();
//! let mut sink = MemorySink::new();
//! let outcome = pipeline.run(xml.as_slice(), "plan", &mut sink, &CancellationToken::new());
//! println!("exit code {}", outcome.exit_code);
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod sink;
pub mod state;

pub use cancel::CancellationToken;
pub use config::{ControlPoint, LocalCalibration, PipelineConfig};
pub use error::{PipelineError, Result};
pub use orchestrator::{Pipeline, RunOutcome};
pub use report::{DiagnosticsReport, IssueEntry, ParcelEntry};
pub use sink::{DirectorySink, MemorySink, OutputSink};
pub use state::PipelineState;
