//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `NAVIGATOR__*` 覆盖（双下划线表示嵌套，如 `NAVIGATOR__LLM__MODEL=...`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub server: ServerSection,
}

/// [app] 段：应用名、数据目录（凭据与模型覆盖文件所在）
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".navigator")
}

/// [llm] 段：OpenAI 兼容端点、阶段模型与画像抽取模型
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_profile_model")]
    pub profile_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            profile_model: default_profile_model(),
            temperature: default_temperature(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_model() -> String {
    "mistralai/devstral-2512:free".to_string()
}

fn default_profile_model() -> String {
    "meta-llama/llama-3.3-70b-instruct:free".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    120
}

/// [pipeline] 段：阶段间节奏与日志预览长度
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// 阶段之间的停顿（毫秒），仅为展示节奏；0 表示不停顿
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_raw_preview_chars")]
    pub raw_preview_chars: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            raw_preview_chars: default_raw_preview_chars(),
        }
    }
}

impl PipelineSection {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

fn default_settle_delay_ms() -> u64 {
    800
}

fn default_raw_preview_chars() -> usize {
    500
}

/// [server] 段：HTTP 监听地址
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

/// 从 config 目录加载配置，环境变量 NAVIGATOR__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 NAVIGATOR__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("NAVIGATOR")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}

/// 加载失败时记录警告并回退到默认配置
pub fn load_config_or_default(config_path: Option<PathBuf>) -> AppConfig {
    load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    })
}
