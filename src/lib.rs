//! Navigator - 学生画像驱动的多阶段 Agent 推荐流水线
//!
//! 模块划分：
//! - **admin**: 模型名覆盖（带外键值存储）
//! - **agent**: 外部协作者接口（阶段执行、画像抽取、问答）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、状态机投影、会话、主控循环
//! - **credentials**: API Key 及其持久化
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）、Prompt、协作者后端
//! - **observability**: 日志初始化
//! - **pipeline**: 阶段、结果存储、结构化抽取、控制器、定向重跑、报告
//! - **profile**: 学生画像、启发式抽取、完整性检查

pub mod admin;
pub mod agent;
pub mod config;
pub mod core;
pub mod credentials;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod profile;

pub use core::{PipelineError, PipelinePhase, Session};
pub use pipeline::{PipelineController, RerunCoordinator, StructuredExtractor};
