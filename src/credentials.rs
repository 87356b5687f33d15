//! 凭据：生成模型 Key 与搜索 Key
//!
//! 两个 Key 都非空时 `ready` 为 true；流水线只在 ready 时启动。
//! 凭据跨会话持久化（JSON 文件或内存），其余流水线状态都是会话级的。

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// 一组凭据；设置后不可修改，只能整体重置
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Credentials {
    generation_key: String,
    search_key: String,
    /// 主 Key 调用失败时的备用生成 Key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    backup_generation_key: Option<String>,
}

impl Credentials {
    pub fn new(generation_key: impl Into<String>, search_key: impl Into<String>) -> Self {
        Self {
            generation_key: generation_key.into().trim().to_string(),
            search_key: search_key.into().trim().to_string(),
            backup_generation_key: None,
        }
    }

    pub fn with_backup(mut self, backup: impl Into<String>) -> Self {
        let backup = backup.into().trim().to_string();
        self.backup_generation_key = (!backup.is_empty()).then_some(backup);
        self
    }

    /// 两个 Key 都已设置
    pub fn is_ready(&self) -> bool {
        !self.generation_key.is_empty() && !self.search_key.is_empty()
    }

    pub fn generation_key(&self) -> &str {
        &self.generation_key
    }

    pub fn search_key(&self) -> &str {
        &self.search_key
    }

    pub fn backup_generation_key(&self) -> Option<&str> {
        self.backup_generation_key.as_deref()
    }
}

fn redact(key: &str) -> String {
    if key.is_empty() {
        "<unset>".to_string()
    } else {
        let tail: String = key.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
        format!("***{tail}")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("generation_key", &redact(&self.generation_key))
            .field("search_key", &redact(&self.search_key))
            .field("backup", &self.backup_generation_key.is_some())
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// 凭据持久化接口
pub trait CredentialStore: Send + Sync {
    /// 读取已保存的凭据；未保存时返回 None
    fn load(&self) -> anyhow::Result<Option<Credentials>>;

    fn save(&self, credentials: &Credentials) -> anyhow::Result<()>;

    fn clear(&self) -> anyhow::Result<()>;
}

/// 单文件 JSON 持久化
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// `<data_dir>/credentials.json`
    pub fn in_dir(data_dir: impl AsRef<Path>) -> Self {
        Self::new(data_dir.as_ref().join("credentials.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> anyhow::Result<Option<Credentials>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&self.path)?;
        let creds: Credentials = serde_json::from_str(&data)?;
        Ok(creds.is_ready().then_some(creds))
    }

    fn save(&self, credentials: &Credentials) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(credentials)?)?;
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// 内存实现（测试与无持久化场景）
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    inner: Mutex<Option<Credentials>>,
}

impl CredentialStore for InMemoryCredentialStore {
    fn load(&self) -> anyhow::Result<Option<Credentials>> {
        Ok(self
            .inner
            .lock()
            .map_err(|e| anyhow::anyhow!("credential store poisoned: {e}"))?
            .clone())
    }

    fn save(&self, credentials: &Credentials) -> anyhow::Result<()> {
        *self
            .inner
            .lock()
            .map_err(|e| anyhow::anyhow!("credential store poisoned: {e}"))? = Some(credentials.clone());
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        *self
            .inner
            .lock()
            .map_err(|e| anyhow::anyhow!("credential store poisoned: {e}"))? = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_requires_both_keys() {
        assert!(Credentials::new("gen", "search").is_ready());
        assert!(!Credentials::new("gen", "  ").is_ready());
        assert!(!Credentials::default().is_ready());
    }

    #[test]
    fn test_debug_redacts_keys() {
        let creds = Credentials::new("sk-or-secret-1234", "serper-abcd");
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("secret"));
        assert!(dbg.contains("***1234"));
    }

    #[test]
    fn test_file_store_roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::in_dir(dir.path().join("nested"));
        assert!(store.load().unwrap().is_none());

        let creds = Credentials::new("gen", "search").with_backup("backup");
        store.save(&creds).unwrap();
        assert_eq!(store.load().unwrap(), Some(creds));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        // 再次清除不报错
        store.clear().unwrap();
    }

    #[test]
    fn test_empty_backup_is_dropped() {
        let creds = Credentials::new("g", "s").with_backup("");
        assert_eq!(creds.backup_generation_key(), None);
    }
}
