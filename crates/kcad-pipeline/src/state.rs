//! 运行状态机

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 一次运行的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Idle,
    Parsing,
    Validating,
    Transforming,
    Normalizing,
    Exporting,
    Completed,
    Failed,
}

impl PipelineState {
    /// 按顺序执行的阶段
    pub const STAGES: [PipelineState; 5] = [
        PipelineState::Parsing,
        PipelineState::Validating,
        PipelineState::Transforming,
        PipelineState::Normalizing,
        PipelineState::Exporting,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed)
    }

    /// 正常流程中的下一个状态
    pub fn next(&self) -> Option<PipelineState> {
        match self {
            PipelineState::Idle => Some(PipelineState::Parsing),
            PipelineState::Parsing => Some(PipelineState::Validating),
            PipelineState::Validating => Some(PipelineState::Transforming),
            PipelineState::Transforming => Some(PipelineState::Normalizing),
            PipelineState::Normalizing => Some(PipelineState::Exporting),
            PipelineState::Exporting => Some(PipelineState::Completed),
            PipelineState::Completed | PipelineState::Failed => None,
        }
    }

    /// 是否允许迁移到 `to`：只能前进一步，或从任一非终止状态进入 Failed
    pub fn can_transition_to(&self, to: PipelineState) -> bool {
        if to == PipelineState::Failed {
            return !self.is_terminal();
        }
        self.next() == Some(to)
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Parsing => "parsing",
            PipelineState::Validating => "validating",
            PipelineState::Transforming => "transforming",
            PipelineState::Normalizing => "normalizing",
            PipelineState::Exporting => "exporting",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 一次状态迁移
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: PipelineState,
    pub to: PipelineState,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_chain() {
        let mut state = PipelineState::Idle;
        let mut visited = vec![state];
        while let Some(next) = state.next() {
            assert!(state.can_transition_to(next));
            state = next;
            visited.push(state);
        }
        assert_eq!(state, PipelineState::Completed);
        assert_eq!(visited.len(), 7);
        assert_eq!(&visited[1..6], &PipelineState::STAGES);
    }

    #[test]
    fn test_failed_reachable_from_any_stage() {
        for stage in PipelineState::STAGES {
            assert!(stage.can_transition_to(PipelineState::Failed));
        }
        assert!(PipelineState::Idle.can_transition_to(PipelineState::Failed));
        assert!(!PipelineState::Completed.can_transition_to(PipelineState::Failed));
        assert!(!PipelineState::Failed.can_transition_to(PipelineState::Idle));
        // 不允许跳过阶段
        assert!(!PipelineState::Parsing.can_transition_to(PipelineState::Exporting));
    }
}
