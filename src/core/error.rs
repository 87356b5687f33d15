//! 流水线错误类型与恢复动作
//!
//! PipelineError 只表示前置条件/状态错误；阶段调用失败不会作为 Err 抛出控制器，
//! 而是变成 StageFailure（带分类）写进运行报告，并由 RecoveryEngine 给出 RecoveryAction。

use serde::Serialize;
use thiserror::Error;

use crate::core::PipelinePhase;
use crate::pipeline::Stage;

/// 调用方可见的流水线错误
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Credentials are not ready")]
    CredentialsNotReady,

    #[error("Student profile has not been finalized")]
    ProfileNotFinalized,

    /// 画像抽取信息不足，需要重新提示用户
    #[error("Profile extraction incomplete: {0}")]
    ProfileExtractionIncomplete(String),

    #[error("Operation not allowed in phase {phase:?}: {reason}")]
    InvalidPhase { phase: PipelinePhase, reason: String },

    /// 鉴权失败后必须先替换凭据
    #[error("Credentials must be replaced: {0}")]
    CredentialsRequired(String),

    #[error("No failed stage to retry")]
    NothingToRetry,

    #[error("Collaborator call failed: {0}")]
    Collaborator(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// 阶段失败的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// 401/403、Key 无效：暂停流水线，需替换凭据
    Auth,
    /// 网络超时、5xx 等，可手动重试
    Transient,
    /// 请求本身有问题，重试无效（当前按 Transient 处理）
    Fatal,
}

/// 某个阶段的一次失败
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub class: ErrorClass,
    pub message: String,
}

impl StageFailure {
    pub fn is_auth(&self) -> bool {
        self.class == ErrorClass::Auth
    }
}

/// 恢复引擎根据错误分类给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 展示错误并引导用户替换凭据；替换后从 stage 0 干净重启
    ReplaceCredentials(String),
    /// 保留已有结果，仅失败阶段可重试
    RetryStage(String),
}
