//! 诊断报告
//!
//! 每次运行都会生成报告，失败时也一样。地块条目按文档顺序排列。

use crate::state::{PipelineState, StateTransition};
use chrono::{DateTime, Utc};
use kcad_core::issue::{IssueKind, IssueLocation, Severity, ValidationIssue, Verdict};
use kcad_core::precision::PrecisionStats;
use kcad_file::ParseIssue;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// 报告中的单个问题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueEntry {
    pub kind: IssueKind,
    pub severity: Severity,
    pub location: IssueLocation,
    pub message: String,
}

impl From<&ValidationIssue> for IssueEntry {
    fn from(issue: &ValidationIssue) -> Self {
        Self {
            kind: issue.kind,
            severity: issue.severity,
            location: issue.location.clone(),
            message: issue.message.clone(),
        }
    }
}

/// 地块条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParcelEntry {
    pub parcel_id: String,
    pub verdict: Verdict,
    /// 是否已写入输出
    pub exported: bool,
    pub issues: Vec<IssueEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<PrecisionStats>,
}

impl ParcelEntry {
    pub fn new(parcel_id: impl Into<String>) -> Self {
        Self {
            parcel_id: parcel_id.into(),
            verdict: Verdict::Valid,
            exported: false,
            issues: Vec::new(),
            precision: None,
        }
    }

    pub fn has_kind(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|i| i.kind == kind)
    }
}

/// 阶段耗时
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: PipelineState,
    pub millis: f64,
}

/// 阶段计时器
pub struct StageTimer {
    stage: PipelineState,
    start: Instant,
}

impl StageTimer {
    /// 开始计时
    pub fn start(stage: PipelineState) -> Self {
        Self {
            stage,
            start: Instant::now(),
        }
    }

    /// 结束计时并返回毫秒数
    pub fn stop(self) -> StageTiming {
        let millis = self.start.elapsed().as_secs_f64() * 1000.0;
        debug!("Stage {} took {:.2}ms", self.stage, millis);
        StageTiming {
            stage: self.stage,
            millis,
        }
    }
}

/// 一次运行的诊断报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub final_state: PipelineState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub exit_code: i32,
    /// 源文档根元素
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_crs: Option<String>,
    pub transitions: Vec<StateTransition>,
    pub stage_timings: Vec<StageTiming>,
    pub parse_issues: Vec<ParseIssue>,
    pub parcels: Vec<ParcelEntry>,
    /// 写出的文件
    pub outputs: Vec<String>,
}

impl Default for DiagnosticsReport {
    fn default() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            final_state: PipelineState::Idle,
            failure: None,
            exit_code: 0,
            document_kind: None,
            encoding: None,
            target_crs: None,
            transitions: Vec::new(),
            stage_timings: Vec::new(),
            parse_issues: Vec::new(),
            parcels: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

impl DiagnosticsReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parcel(&self, id: &str) -> Option<&ParcelEntry> {
        self.parcels.iter().find(|p| p.parcel_id == id)
    }

    pub fn exported_count(&self) -> usize {
        self.parcels.iter().filter(|p| p.exported).count()
    }

    /// 是否存在阻断问题（解析或地块级）
    pub fn has_blocking(&self) -> bool {
        self.parse_issues.iter().any(ParseIssue::is_blocking)
            || self.parcels.iter().any(|p| p.verdict == Verdict::Invalid)
    }

    /// 是否存在提示性问题
    pub fn has_advisory(&self) -> bool {
        self.parse_issues.iter().any(|i| !i.is_blocking())
            || self
                .parcels
                .iter()
                .flat_map(|p| &p.issues)
                .any(|i| i.severity == Severity::Advisory)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kcad_core::parcel::CadastralNumber;
    use kcad_file::ParseIssueKind;

    #[test]
    fn test_blocking_and_advisory_flags() {
        let mut report = DiagnosticsReport::new();
        assert!(!report.has_blocking());
        assert!(!report.has_advisory());

        let mut entry = ParcelEntry::new("23:43:0302001:15");
        let id = CadastralNumber::parse("23:43:0302001:15").unwrap();
        entry.issues.push(IssueEntry::from(&ValidationIssue::new(
            id,
            IssueKind::Spike,
            IssueLocation::Parcel,
            "spike",
        )));
        entry.verdict = Verdict::ValidWithWarnings;
        report.parcels.push(entry);
        assert!(report.has_advisory());
        assert!(!report.has_blocking());

        report.parse_issues.push(ParseIssue::new(
            Some(1),
            None,
            ParseIssueKind::MissingBoundary,
            "no boundary",
        ));
        assert!(report.has_blocking());
    }

    #[test]
    fn test_json_shape() {
        let mut report = DiagnosticsReport::new();
        report.final_state = PipelineState::Completed;
        report.parcels.push(ParcelEntry::new("23:43:0302001:15"));
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["final_state"], "completed");
        assert_eq!(json["parcels"][0]["verdict"], "valid");
        assert_eq!(json["parcels"][0]["exported"], false);
        assert!(json.get("failure").is_none());
        assert!(json["run_id"].as_str().is_some());
    }
}
