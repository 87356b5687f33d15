//! 阶段结果存储
//!
//! ResultStore 按阶段序号保存五个 StageResult。写入只能通过 crate 内的 `apply`
//! 批量进行：一次 StoreUpdate 中的所有变更在同一个 revision 内生效，并作为一个
//! 完整快照广播给观察者，保证耦合更新（match + rank）对读者是原子的。

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::pipeline::stage::{Stage, STAGE_COUNT};

/// 阶段状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    NotStarted,
    Running,
    Succeeded,
    FailedAuth,
    FailedTransient,
}

impl StageStatus {
    pub fn is_failed(self) -> bool {
        matches!(self, StageStatus::FailedAuth | StageStatus::FailedTransient)
    }
}

/// 单个阶段的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageResult {
    pub stage: Stage,
    pub status: StageStatus,
    /// 未经解析的原始输出；Succeeded 之前为 None，失败时保持不变
    pub raw_output: Option<Value>,
    pub updated_at: DateTime<Utc>,
}

impl StageResult {
    fn not_started(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::NotStarted,
            raw_output: None,
            updated_at: Utc::now(),
        }
    }

    /// Running 且输出已清空：耦合重跑期间的「等待中」展示态
    pub fn is_pending(&self) -> bool {
        self.status == StageStatus::Running && self.raw_output.is_none()
    }
}

/// 对单个阶段的变更
#[derive(Debug, Clone)]
pub enum StageChange {
    /// 进入 Running；`clear` 为 true 时同时清空旧输出
    Running { clear: bool },
    Succeeded(Value),
    /// 失败：只改状态，不动 raw_output
    Failed(StageStatus),
    /// 整体恢复为之前的结果（耦合重跑回滚）
    Restore(StageResult),
}

/// 一次原子写入：多个阶段的变更同时生效
#[derive(Debug, Clone, Default)]
pub struct StoreUpdate {
    changes: Vec<(Stage, StageChange)>,
}

impl StoreUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(stage: Stage, change: StageChange) -> Self {
        Self::new().with(stage, change)
    }

    pub fn with(mut self, stage: Stage, change: StageChange) -> Self {
        self.changes.push((stage, change));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// 某个 revision 下全部阶段结果的只读快照
#[derive(Debug, Clone, Serialize)]
pub struct StoreSnapshot {
    pub revision: u64,
    pub results: Vec<StageResult>,
}

impl StoreSnapshot {
    pub fn get(&self, stage: Stage) -> &StageResult {
        &self.results[stage.index()]
    }
}

/// 阶段结果存储：由 PipelineController 独占写入
#[derive(Debug)]
pub struct ResultStore {
    results: [StageResult; STAGE_COUNT],
    revision: u64,
    updates: broadcast::Sender<StoreSnapshot>,
}

impl ResultStore {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            results: Stage::ALL.map(StageResult::not_started),
            revision: 0,
            updates,
        }
    }

    pub fn get(&self, stage: Stage) -> &StageResult {
        &self.results[stage.index()]
    }

    pub fn raw(&self, stage: Stage) -> Option<&Value> {
        self.get(stage).raw_output.as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageResult> {
        self.results.iter()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            revision: self.revision,
            results: self.results.to_vec(),
        }
    }

    /// 订阅每次写入后的完整快照
    pub fn subscribe(&self) -> broadcast::Receiver<StoreSnapshot> {
        self.updates.subscribe()
    }

    /// 批量应用变更，整体一个 revision，并广播一次快照
    pub(crate) fn apply(&mut self, update: StoreUpdate) {
        if update.is_empty() {
            return;
        }
        let now = Utc::now();
        for (stage, change) in update.changes {
            let slot = &mut self.results[stage.index()];
            match change {
                StageChange::Running { clear } => {
                    slot.status = StageStatus::Running;
                    if clear {
                        slot.raw_output = None;
                    }
                }
                StageChange::Succeeded(raw) => {
                    slot.status = StageStatus::Succeeded;
                    slot.raw_output = Some(raw);
                }
                StageChange::Failed(status) => {
                    slot.status = status;
                }
                StageChange::Restore(previous) => {
                    *slot = previous;
                }
            }
            slot.updated_at = now;
        }
        self.revision += 1;
        // 没有订阅者时 send 返回 Err，忽略即可
        let _ = self.updates.send(self.snapshot());
    }

    /// 全部回到 NotStarted（重置会话时）
    pub(crate) fn reset(&mut self) {
        let update = Stage::ALL
            .into_iter()
            .fold(StoreUpdate::new(), |u, stage| {
                u.with(stage, StageChange::Restore(StageResult::not_started(stage)))
            });
        self.apply(update);
    }
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}
