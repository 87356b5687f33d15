//! 流水线阶段定义
//!
//! 固定五个阶段：normalize → match → rank → scholarships → reviews。
//! 每个阶段有稳定的序号（0..4）与结果键名（拼装下游输入时使用）。

use std::fmt;

use serde::{Deserialize, Serialize};

/// 流水线阶段数
pub const STAGE_COUNT: usize = 5;

/// 流水线阶段（顺序即执行顺序）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// 画像规范化
    Normalize,
    /// 院校/项目匹配
    Match,
    /// 项目排序（依赖最新的 Match 输出）
    Rank,
    /// 奖学金查找
    Scholarships,
    /// 学生评价收集
    Reviews,
}

impl Stage {
    pub const ALL: [Stage; STAGE_COUNT] = [
        Stage::Normalize,
        Stage::Match,
        Stage::Rank,
        Stage::Scholarships,
        Stage::Reviews,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// 下一阶段；Reviews 之后为 None
    pub fn next(self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    /// 在累积输入中的键名
    pub fn result_key(self) -> &'static str {
        match self {
            Stage::Normalize => "normalized_profile",
            Stage::Match => "matched_programs",
            Stage::Rank => "ranked_programs",
            Stage::Scholarships => "scholarships",
            Stage::Reviews => "reviews",
        }
    }

    /// 进度展示用名称
    pub fn label(self) -> &'static str {
        match self {
            Stage::Normalize => "Normalizing your Profile",
            Stage::Match => "Finding University Matches",
            Stage::Rank => "Ranking Best Options",
            Stage::Scholarships => "Identifying Scholarships",
            Stage::Reviews => "Collecting Student Reviews",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.result_key(), self.index())
    }
}
