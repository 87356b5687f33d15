//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容端点 / Mock）实现 LlmClient::complete（非流式）。

use async_trait::async_trait;
use thiserror::Error;

use crate::agent::AgentCallError;
use crate::llm::Message;

/// LLM 调用错误：保留 HTTP 状态码（若有），供上层做鉴权/瞬时分类
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct LlmError {
    pub status: Option<u16>,
    pub message: String,
}

impl LlmError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<LlmError> for AgentCallError {
    fn from(e: LlmError) -> Self {
        AgentCallError::new(e.status, e.message)
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
