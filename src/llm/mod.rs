//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）、阶段 Prompt、协作者后端

pub mod backend;
pub mod message;
pub mod mock;
pub mod openai;
pub mod prompts;
pub mod traits;

pub use backend::{ClientFactory, LlmAgentBackend};
pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError};
