//! 会话监管：代际取消
//!
//! 每一代会话持有一个 CancellationToken。重置凭据时取消当前 token 并换新的一代，
//! 在途的阶段调用随之被丢弃，迟到的响应不会写入结果存储。

use tokio_util::sync::CancellationToken;

/// 会话级生命周期管理：取消令牌与代数
#[derive(Debug)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
    generation: u64,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            generation: 0,
        }
    }

    /// 当前代的取消令牌（克隆共享同一状态，可交给外部在任意时刻取消）
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 取消当前代并开启新一代
    pub fn renew(&mut self) {
        self.cancel_token.cancel();
        self.cancel_token = CancellationToken::new();
        self.generation += 1;
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renew_cancels_old_token_only() {
        let mut supervisor = SessionSupervisor::new();
        let old = supervisor.cancel_token();
        supervisor.renew();
        assert!(old.is_cancelled());
        assert!(!supervisor.is_cancelled());
        assert_eq!(supervisor.generation(), 1);
    }
}
