//! 校验问题分类与旁表

use crate::math::Point2;
use crate::parcel::{CadastralNumber, RingId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 问题类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueKind {
    UnclosedRing,
    SelfIntersection,
    DegenerateRing,
    HoleEscapesBoundary,
    OverlappingHoles,
    BoundaryGap,
    BoundaryOverlap,
    DuplicateVertex,
    Spike,
    NormalizationFailure,
    AreaDiscrepancy,
    UnsupportedGeometry,
    TransformFailure,
}

impl IssueKind {
    /// 默认严重程度；相邻关系类问题可由配置升级为阻断
    pub fn default_severity(&self) -> Severity {
        match self {
            IssueKind::BoundaryGap
            | IssueKind::BoundaryOverlap
            | IssueKind::DuplicateVertex
            | IssueKind::Spike
            | IssueKind::AreaDiscrepancy => Severity::Advisory,
            _ => Severity::Blocking,
        }
    }

    pub fn is_adjacency(&self) -> bool {
        matches!(self, IssueKind::BoundaryGap | IssueKind::BoundaryOverlap)
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Advisory,
    Blocking,
}

/// 问题位置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "at", rename_all = "snake_case")]
pub enum IssueLocation {
    Parcel,
    Ring {
        ring: RingId,
    },
    Vertex {
        ring: RingId,
        index: usize,
        x: f64,
        y: f64,
    },
    Point {
        x: f64,
        y: f64,
    },
    /// 与相邻地块的关系
    Neighbour {
        parcel: CadastralNumber,
        x: f64,
        y: f64,
    },
}

impl IssueLocation {
    pub fn vertex(ring: RingId, index: usize, point: Point2) -> Self {
        IssueLocation::Vertex {
            ring,
            index,
            x: point.x,
            y: point.y,
        }
    }

    pub fn point(point: Point2) -> Self {
        IssueLocation::Point {
            x: point.x,
            y: point.y,
        }
    }

    pub fn ring(&self) -> Option<RingId> {
        match self {
            IssueLocation::Ring { ring } | IssueLocation::Vertex { ring, .. } => Some(*ring),
            _ => None,
        }
    }
}

/// 单个校验问题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub parcel_id: CadastralNumber,
    pub kind: IssueKind,
    pub severity: Severity,
    pub location: IssueLocation,
    pub message: String,
}

impl ValidationIssue {
    /// 以类别默认严重程度创建
    pub fn new(
        parcel_id: CadastralNumber,
        kind: IssueKind,
        location: IssueLocation,
        message: impl Into<String>,
    ) -> Self {
        Self {
            parcel_id,
            kind,
            severity: kind.default_severity(),
            location,
            message: message.into(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Blocking
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.parcel_id, self.kind, self.message)
    }
}

/// 地块结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Valid,
    ValidWithWarnings,
    Invalid,
}

impl Verdict {
    pub fn from_issues<'a>(issues: impl IntoIterator<Item = &'a ValidationIssue>) -> Self {
        let mut verdict = Verdict::Valid;
        for issue in issues {
            if issue.is_blocking() {
                return Verdict::Invalid;
            }
            verdict = Verdict::ValidWithWarnings;
        }
        verdict
    }
}

/// 以地块标识为键的问题旁表
#[derive(Debug, Clone, Default)]
pub struct IssueLog {
    by_parcel: HashMap<CadastralNumber, Vec<ValidationIssue>>,
}

impl IssueLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, issue: ValidationIssue) {
        self.by_parcel
            .entry(issue.parcel_id.clone())
            .or_default()
            .push(issue);
    }

    pub fn extend(&mut self, issues: impl IntoIterator<Item = ValidationIssue>) {
        for issue in issues {
            self.record(issue);
        }
    }

    pub fn issues_for(&self, id: &CadastralNumber) -> &[ValidationIssue] {
        self.by_parcel.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_blocking(&self, id: &CadastralNumber) -> bool {
        self.issues_for(id).iter().any(ValidationIssue::is_blocking)
    }

    pub fn verdict(&self, id: &CadastralNumber) -> Verdict {
        Verdict::from_issues(self.issues_for(id))
    }

    pub fn count_of(&self, kind: IssueKind) -> usize {
        self.by_parcel
            .values()
            .flatten()
            .filter(|i| i.kind == kind)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.by_parcel.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_parcel.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.by_parcel.values().flatten()
    }
}
