//! 状态定义：流水线阶段机与 UI 投影
//!
//! PipelinePhase 是控制器的状态机；PipelineSnapshot 是给 UI/观察者的轻量投影
//! （阶段、各 stage 状态、最近一次失败），通过 watch 通道推送。

use serde::Serialize;

use crate::core::{RecoveryAction, StageFailure};
use crate::pipeline::{Stage, StageStatus, StoreSnapshot};

/// 流水线状态机
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "stage", rename_all = "snake_case")]
pub enum PipelinePhase {
    Idle,
    /// 正在执行或停在（可重试失败的）第 i 阶段
    RunningStage(Stage),
    /// 鉴权失败，等待替换凭据
    PausedOnAuthError(Stage),
    Completed,
}

impl PipelinePhase {
    pub fn is_terminal(self) -> bool {
        self == PipelinePhase::Completed
    }

    /// 进度条用：已完成的阶段数
    pub fn progress(self) -> usize {
        match self {
            PipelinePhase::Idle => 0,
            PipelinePhase::RunningStage(s) | PipelinePhase::PausedOnAuthError(s) => s.index(),
            PipelinePhase::Completed => crate::pipeline::STAGE_COUNT,
        }
    }
}

/// UI 看到的「投影」状态
#[derive(Clone, Debug, Serialize)]
pub struct PipelineSnapshot {
    pub phase: PipelinePhase,
    pub stages: Vec<(Stage, StageStatus)>,
    /// 正在进行的操作（运行/重跑）期间为 true，UI 据此锁定输入
    pub busy: bool,
    pub last_failure: Option<StageFailure>,
    /// 面向用户的恢复提示（如「替换 API Key」）
    pub notice: Option<String>,
    /// 已处理完的命令数；客户端据此等待自己的命令结束
    pub epoch: u64,
}

impl Default for PipelineSnapshot {
    fn default() -> Self {
        Self {
            phase: PipelinePhase::Idle,
            stages: crate::pipeline::Stage::ALL
                .iter()
                .map(|s| (*s, StageStatus::NotStarted))
                .collect(),
            busy: false,
            last_failure: None,
            notice: None,
            epoch: 0,
        }
    }
}

impl PipelineSnapshot {
    /// 由阶段机、存储快照与最近失败合成投影
    pub fn project(
        phase: PipelinePhase,
        store: &StoreSnapshot,
        busy: bool,
        last_failure: Option<StageFailure>,
        action: Option<RecoveryAction>,
    ) -> Self {
        let notice = action.map(|a| match a {
            RecoveryAction::ReplaceCredentials(m) | RecoveryAction::RetryStage(m) => m,
        });
        Self {
            phase,
            stages: store.results.iter().map(|r| (r.stage, r.status)).collect(),
            busy,
            last_failure,
            notice,
            epoch: 0,
        }
    }

    /// 覆盖提示文本（如前置条件错误、画像追问）
    pub fn with_notice(mut self, notice: impl Into<String>) -> Self {
        self.notice = Some(notice.into());
        self
    }

    pub fn at_epoch(mut self, epoch: u64) -> Self {
        self.epoch = epoch;
        self
    }
}
