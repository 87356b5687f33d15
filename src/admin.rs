//! 管理员模型配置：带外的 model_name 键值存储
//!
//! 每次 Agent 调用都重新读取，未设置时使用配置中的默认模型。
//! 只影响传给执行器的模型名，不影响流水线控制流。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// 未设置覆盖时 `get` 返回的展示文本
pub const DEFAULT_MODEL_DISPLAY: &str = "Default (Hardcoded)";

/// litellm 风格的路由前缀；直连 OpenAI 兼容端点时需要去掉
const ROUTING_PREFIX: &str = "openrouter/";

#[derive(Debug, Serialize, Deserialize)]
struct ModelFile {
    model_name: String,
}

/// 模型名覆盖（`<data_dir>/model.json`）
#[derive(Debug, Clone)]
pub struct ModelSettings {
    path: PathBuf,
}

impl ModelSettings {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn in_dir(data_dir: impl AsRef<Path>) -> Self {
        Self::new(data_dir.as_ref().join("model.json"))
    }

    /// 已保存的模型名；文件缺失或损坏时为 None
    pub fn model_name(&self) -> Option<String> {
        let data = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<ModelFile>(&data) {
            Ok(f) if !f.model_name.trim().is_empty() => Some(f.model_name.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Ignoring unreadable model settings {}: {}", self.path.display(), e);
                None
            }
        }
    }

    /// 展示用：未设置时返回 DEFAULT_MODEL_DISPLAY
    pub fn get(&self) -> String {
        self.model_name()
            .unwrap_or_else(|| DEFAULT_MODEL_DISPLAY.to_string())
    }

    pub fn set(&self, model_name: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = ModelFile {
            model_name: model_name.trim().to_string(),
        };
        std::fs::write(&self.path, serde_json::to_string(&file)?)?;
        tracing::info!("Model override set to {}", file.model_name);
        Ok(())
    }

    /// 覆盖值优先，否则用 fallback；两者都会去掉路由前缀
    pub fn resolve(&self, fallback: &str) -> String {
        let name = self.model_name().unwrap_or_else(|| fallback.to_string());
        api_model_name(&name).to_string()
    }
}

/// 去掉 `openrouter/` 前缀，得到端点可识别的模型 ID
pub fn api_model_name(name: &str) -> &str {
    name.strip_prefix(ROUTING_PREFIX).unwrap_or(name)
}
