//! 会话上下文
//!
//! 显式的会话对象：凭据 + 学生画像，作为参数传给控制器与重跑协调器，
//! 不存在进程级单例。

use crate::credentials::Credentials;
use crate::profile::StudentProfile;

/// 单个用户会话
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    credentials: Credentials,
    profile: Option<StudentProfile>,
}

impl Session {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            credentials,
            profile: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn profile(&self) -> Option<&StudentProfile> {
        self.profile.as_ref()
    }

    /// 画像已定稿（有规范化字段）
    pub fn profile_complete(&self) -> bool {
        self.profile.as_ref().is_some_and(StudentProfile::is_finalized)
    }

    pub fn set_profile(&mut self, profile: StudentProfile) {
        self.profile = Some(profile);
    }

    /// 替换凭据：画像等派生状态一并清空（流水线状态由控制器的 reset 清空）
    pub fn replace_credentials(&mut self, credentials: Credentials) {
        self.credentials = credentials;
        self.profile = None;
    }

    /// 清空凭据与画像
    pub fn reset(&mut self) {
        self.replace_credentials(Credentials::default());
    }
}
