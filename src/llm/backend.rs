//! 基于 LLM 的协作者实现
//!
//! 一个后端同时实现 AgentExecutor / ProfileExtractor / QuestionAnswerer：
//! - 模型名每次调用时解析（管理员覆盖优先，其次配置默认值）
//! - 主 Key 失败且配置了备用 Key 时，用备用 Key 重试一次
//! - 每次请求受 `request_timeout` 约束
//!
//! 搜索能力不在这里实现；search_key 仅随凭据传递。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::admin::{api_model_name, ModelSettings};
use crate::agent::{AgentCallError, AgentExecutor, ProfileExtractor, QaContext, QuestionAnswerer};
use crate::config::AppConfig;
use crate::credentials::Credentials;
use crate::llm::{prompts, LlmClient, LlmError, Message, MockLlmClient, OpenAiClient};
use crate::pipeline::{Extracted, Stage, StructuredExtractor};
use crate::profile::{extract_info_from_text, merge_fields};

/// 按 (api_key, model) 构造客户端
pub type ClientFactory = Arc<dyn Fn(&str, &str) -> Arc<dyn LlmClient> + Send + Sync>;

pub struct LlmAgentBackend {
    factory: ClientFactory,
    stage_model: String,
    profile_model: String,
    model_settings: Option<ModelSettings>,
    request_timeout: Duration,
    extractor: StructuredExtractor,
}

impl LlmAgentBackend {
    pub fn new(factory: ClientFactory, stage_model: &str, profile_model: &str) -> Self {
        Self {
            factory,
            stage_model: stage_model.to_string(),
            profile_model: profile_model.to_string(),
            model_settings: None,
            request_timeout: Duration::from_secs(120),
            extractor: StructuredExtractor::new(),
        }
    }

    /// OpenAI 兼容端点（默认 OpenRouter），模型覆盖文件位于 data_dir
    pub fn from_config(cfg: &AppConfig) -> Self {
        let base_url = cfg.llm.base_url.clone();
        let temperature = cfg.llm.temperature;
        let factory: ClientFactory = Arc::new(move |key: &str, model: &str| {
            Arc::new(OpenAiClient::new(&base_url, model, key, temperature)) as Arc<dyn LlmClient>
        });
        Self::new(factory, &cfg.llm.model, &cfg.llm.profile_model)
            .with_model_settings(ModelSettings::in_dir(&cfg.app.data_dir))
            .with_timeout(Duration::from_secs(cfg.llm.timeouts.request))
    }

    /// 离线模式：所有调用走 MockLlmClient
    pub fn offline() -> Self {
        let client: Arc<dyn LlmClient> = Arc::new(MockLlmClient);
        let factory: ClientFactory = Arc::new(move |_: &str, _: &str| client.clone());
        Self::new(factory, "mock", "mock")
    }

    pub fn with_model_settings(mut self, settings: ModelSettings) -> Self {
        self.model_settings = Some(settings);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn resolve_model(&self, fallback: &str) -> String {
        match &self.model_settings {
            Some(settings) => settings.resolve(fallback),
            None => api_model_name(fallback).to_string(),
        }
    }

    async fn complete_once(
        &self,
        key: &str,
        model: &str,
        messages: &[Message],
    ) -> Result<String, LlmError> {
        let client = (self.factory)(key, model);
        match tokio::time::timeout(self.request_timeout, client.complete(messages)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::new(
                None,
                format!("request timed out after {}s", self.request_timeout.as_secs()),
            )),
        }
    }

    /// 主 Key 调用，失败时若有备用 Key 则重试一次
    async fn complete(
        &self,
        fallback_model: &str,
        credentials: &Credentials,
        messages: &[Message],
        what: &str,
    ) -> Result<String, AgentCallError> {
        let model = self.resolve_model(fallback_model);
        tracing::debug!("{} using model {}", what, model);

        match self
            .complete_once(credentials.generation_key(), &model, messages)
            .await
        {
            Ok(text) => Ok(text),
            Err(primary) => match credentials.backup_generation_key() {
                Some(backup) => {
                    tracing::warn!(
                        "Primary key failed in {}: {}. Retrying with backup key...",
                        what,
                        primary
                    );
                    self.complete_once(backup, &model, messages)
                        .await
                        .map_err(AgentCallError::from)
                }
                None => Err(primary.into()),
            },
        }
    }
}

#[async_trait]
impl AgentExecutor for LlmAgentBackend {
    async fn run_stage(
        &self,
        stage: Stage,
        payload: &Value,
        credentials: &Credentials,
    ) -> Result<Value, AgentCallError> {
        if let Some(keys) = payload.as_object().map(|m| m.keys().cloned().collect::<Vec<_>>()) {
            tracing::debug!("{} received payload keys: {:?}", stage, keys);
        }
        let messages = prompts::stage_conversation(stage, payload);
        let text = self
            .complete(&self.stage_model, credentials, &messages, stage.label())
            .await?;
        Ok(Value::String(text))
    }
}

#[async_trait]
impl ProfileExtractor for LlmAgentBackend {
    /// 先跑正则启发式，再用 LLM 结果中的非空字段覆盖
    async fn extract_profile(
        &self,
        text: &str,
        credentials: &Credentials,
    ) -> Result<Map<String, Value>, AgentCallError> {
        let mut profile = extract_info_from_text(text);

        let messages = prompts::profile_extraction_conversation(text);
        let output = self
            .complete(&self.profile_model, credentials, &messages, "extract_profile")
            .await?;

        match self.extractor.extract_str(&output) {
            Extracted::Structured(Value::Object(fields)) => merge_fields(&mut profile, fields),
            _ => tracing::warn!(
                "Profile extractor returned no JSON object; keeping heuristic fields only"
            ),
        }
        Ok(profile)
    }
}

#[async_trait]
impl QuestionAnswerer for LlmAgentBackend {
    async fn answer(
        &self,
        question: &str,
        context: &QaContext,
        credentials: &Credentials,
    ) -> Result<String, AgentCallError> {
        let messages = prompts::qa_conversation(question, context);
        self.complete(&self.stage_model, credentials, &messages, "qa")
            .await
    }
}
