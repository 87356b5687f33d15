//! 外部协作者接口
//!
//! 流水线本身不实现 LLM 或搜索逻辑，只通过这里的 trait 调用外部执行器：
//! - **AgentExecutor**: 按阶段执行一次 Agent 调用，返回原始输出
//! - **ProfileExtractor**: 自由文本 → 画像字段对象（可能含 missing_info）
//! - **QuestionAnswerer**: 无状态问答
//!
//! 默认实现见 `llm::LlmAgentBackend`；测试中用脚本化的实现替代。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::credentials::Credentials;
use crate::pipeline::Stage;

/// 协作者调用失败：可选 HTTP 状态码 + 可读消息
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct AgentCallError {
    pub status: Option<u16>,
    pub message: String,
}

impl AgentCallError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }
}

/// 线上的阶段请求格式（HTTP 接口使用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRequest {
    #[serde(alias = "step")]
    pub stage_index: usize,
    /// 累积的画像 + 前序阶段原始输出 + 可选 user_feedback
    #[serde(alias = "profile")]
    pub payload: Value,
    #[serde(alias = "openrouter_key")]
    pub generation_key: String,
    #[serde(alias = "serper_key")]
    pub search_key: String,
    #[serde(default, alias = "openrouter_key_backup")]
    pub generation_key_backup: Option<String>,
}

impl StageRequest {
    pub fn credentials(&self) -> Credentials {
        let creds = Credentials::new(&self.generation_key, &self.search_key);
        match &self.generation_key_backup {
            Some(b) => creds.with_backup(b),
            None => creds,
        }
    }
}

/// 问答上下文：取自结果存储中的原始值
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QaContext {
    pub profile: Option<Value>,
    pub ranked_programs: Option<Value>,
    pub scholarships: Option<Value>,
    pub reviews: Option<Value>,
}

/// 阶段执行器
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// 执行单个阶段，返回原始输出（文本或结构化值）
    async fn run_stage(
        &self,
        stage: Stage,
        payload: &Value,
        credentials: &Credentials,
    ) -> Result<Value, AgentCallError>;
}

/// 画像抽取器（在 stage 0 之前运行）
#[async_trait]
pub trait ProfileExtractor: Send + Sync {
    async fn extract_profile(
        &self,
        text: &str,
        credentials: &Credentials,
    ) -> Result<Map<String, Value>, AgentCallError>;
}

/// 问答（不属于顺序流水线）
#[async_trait]
pub trait QuestionAnswerer: Send + Sync {
    async fn answer(
        &self,
        question: &str,
        context: &QaContext,
        credentials: &Credentials,
    ) -> Result<String, AgentCallError>;
}
