//! 错误分类与恢复
//!
//! ErrorClassifier 把失败的远程调用（状态码 + 消息）映射为 Auth / Transient / Fatal；
//! RecoveryEngine 再把分类映射为调用方应呈现的 RecoveryAction。

use crate::agent::AgentCallError;
use crate::core::{ErrorClass, RecoveryAction, StageFailure};

/// 消息中出现即视为鉴权问题的片段（小写匹配）
const AUTH_MARKERS: &[&str] = &[
    "401",
    "403",
    "unauthorized",
    "forbidden",
    "invalid",
    "api key",
    "api_key",
    "apikey",
    "authentication",
    "no auth credentials",
];

/// 调用失败分类器
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, err: &AgentCallError) -> ErrorClass {
        if matches!(err.status, Some(401 | 403)) {
            return ErrorClass::Auth;
        }
        let msg = err.message.to_lowercase();
        if AUTH_MARKERS.iter().any(|m| msg.contains(m)) {
            return ErrorClass::Auth;
        }
        match err.status {
            // 请求格式问题，重试无效
            Some(400 | 404 | 422) => ErrorClass::Fatal,
            _ => ErrorClass::Transient,
        }
    }
}

/// 语义化恢复：分类 → 调用方动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, failure: &StageFailure) -> RecoveryAction {
        match failure.class {
            ErrorClass::Auth => RecoveryAction::ReplaceCredentials(format!(
                "API error at {}: {}. Replace your API keys to restart the pipeline.",
                failure.stage, failure.message
            )),
            // Fatal 与 Transient 一样保持可重试
            ErrorClass::Transient | ErrorClass::Fatal => RecoveryAction::RetryStage(format!(
                "{} failed: {}. Previous results are kept; retry when ready.",
                failure.stage, failure.message
            )),
        }
    }
}
