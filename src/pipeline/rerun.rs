//! 定向重跑：阶段依赖图 + 耦合原子更新
//!
//! 用户反馈触发的重跑只涉及部分阶段。rank 依赖最新的 match，
//! 所以「programs」重跑必须 match → rank 串联执行，且两者在存储中
//! 同时清空、同时提交，观察者永远看不到新旧混搭的一对结果。

use std::collections::{BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{PipelineError, PipelinePhase, RecoveryAction, Session, StageFailure};
use crate::pipeline::controller::{failure_status, Dispatch, PipelineController};
use crate::pipeline::{payload, Stage, StageChange, StageStatus, StoreUpdate};

/// 重跑依赖图：阶段 → 重跑时必须一起重算的下游阶段
#[derive(Debug, Clone)]
pub struct StageGraph {
    adjacency: HashMap<Stage, Vec<Stage>>,
}

impl StageGraph {
    pub fn new(edges: &[(Stage, Stage)]) -> Self {
        let mut adjacency: HashMap<Stage, Vec<Stage>> = HashMap::new();
        for stage in Stage::ALL {
            adjacency.insert(stage, Vec::new());
        }
        for (upstream, dependent) in edges {
            adjacency.entry(*upstream).or_default().push(*dependent);
        }
        Self { adjacency }
    }

    pub fn dependents(&self, stage: Stage) -> &[Stage] {
        self.adjacency.get(&stage).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 重跑 `stage` 时需要一起重算的阶段（含自身），按执行顺序排列
    pub fn coupled_chain(&self, stage: Stage) -> Vec<Stage> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([stage]);
        while let Some(s) = queue.pop_front() {
            if seen.insert(s) {
                queue.extend(self.dependents(s).iter().copied());
            }
        }
        seen.into_iter().collect()
    }
}

impl Default for StageGraph {
    /// rank 依赖 match；scholarships / reviews 重跑时没有下游
    fn default() -> Self {
        Self::new(&[(Stage::Match, Stage::Rank)])
    }
}

/// 用户可发起的重跑目标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerunTarget {
    /// match + rank
    Programs,
    Scholarships,
    Reviews,
}

impl RerunTarget {
    pub fn root_stage(self) -> Stage {
        match self {
            RerunTarget::Programs => Stage::Match,
            RerunTarget::Scholarships => Stage::Scholarships,
            RerunTarget::Reviews => Stage::Reviews,
        }
    }
}

impl std::str::FromStr for RerunTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "programs" | "program" | "match" | "rank" => Ok(RerunTarget::Programs),
            "scholarships" | "scholarship" => Ok(RerunTarget::Scholarships),
            "reviews" | "review" => Ok(RerunTarget::Reviews),
            other => Err(format!("unknown rerun target: {}", other)),
        }
    }
}

/// 重跑结果
#[derive(Debug, Clone)]
pub struct RerunOutcome {
    pub target: RerunTarget,
    /// 实际派发过的阶段（按顺序）
    pub dispatched: Vec<Stage>,
    pub failure: Option<StageFailure>,
    pub action: Option<RecoveryAction>,
    pub cancelled: bool,
}

impl RerunOutcome {
    fn new(target: RerunTarget) -> Self {
        Self {
            target,
            dispatched: Vec::new(),
            failure: None,
            action: None,
            cancelled: false,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none() && !self.cancelled
    }
}

/// 重跑协调器：只通过控制器的原语读写存储
#[derive(Debug, Clone, Default)]
pub struct RerunCoordinator {
    graph: StageGraph,
}

impl RerunCoordinator {
    pub fn new(graph: StageGraph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub async fn rerun(
        &self,
        controller: &mut PipelineController,
        session: &Session,
        target: RerunTarget,
        feedback: Option<&str>,
    ) -> Result<RerunOutcome, PipelineError> {
        self.check_preconditions(controller, session)?;
        let profile = session
            .profile()
            .ok_or(PipelineError::ProfileNotFinalized)?;

        let chain = self.graph.coupled_chain(target.root_stage());
        let mut outcome = RerunOutcome::new(target);
        // 排在 reset 之后的重跑：不清空、不派发
        if controller.cancel_token().is_cancelled() {
            tracing::info!("Rerun {:?} skipped: session was reset", target);
            outcome.cancelled = true;
            return Ok(outcome);
        }
        tracing::info!("Rerun {:?}: stages {:?}", target, chain);

        // 输入基于清空之前的存储内容
        let base = payload::stage_payload(profile, controller.store(), chain[0], feedback);

        if chain.len() == 1 {
            let stage = chain[0];
            outcome.dispatched.push(stage);
            let dispatch = controller.run_stage(stage, &base, session.credentials()).await;
            self.finish(controller, &mut outcome, dispatch);
            return Ok(outcome);
        }

        let previous: Vec<_> = chain
            .iter()
            .map(|s| controller.store().get(*s).clone())
            .collect();

        // 整条链一次性清空
        let clear = chain.iter().fold(StoreUpdate::new(), |u, s| {
            u.with(*s, StageChange::Running { clear: true })
        });
        controller.apply(clear);

        let mut input = base;
        let mut fresh: Vec<(Stage, Value)> = Vec::new();

        for &stage in &chain {
            outcome.dispatched.push(stage);
            match controller.dispatch(stage, &input, session.credentials()).await {
                Dispatch::Succeeded(raw) => {
                    input = payload::with_result(input, stage, raw.clone());
                    fresh.push((stage, raw));
                }
                Dispatch::Failed(failure) => {
                    let update = if fresh.is_empty() {
                        // 第一个阶段就失败：恢复旧的一整组，并标记失败
                        previous
                            .iter()
                            .fold(StoreUpdate::new(), |u, r| {
                                u.with(r.stage, StageChange::Restore(r.clone()))
                            })
                            .with(stage, StageChange::Failed(failure_status(failure.class)))
                    } else {
                        // 已拿到的新结果一起提交，失败阶段及其后续保持清空
                        let committed = fresh
                            .iter()
                            .fold(StoreUpdate::new(), |u, (s, raw)| {
                                u.with(*s, StageChange::Succeeded(raw.clone()))
                            })
                            .with(stage, StageChange::Failed(failure_status(failure.class)));
                        chain.iter().filter(|s| **s > stage).fold(committed, |u, s| {
                            u.with(*s, StageChange::Failed(StageStatus::FailedTransient))
                        })
                    };
                    controller.apply(update);
                    self.finish(controller, &mut outcome, Dispatch::Failed(failure));
                    return Ok(outcome);
                }
                Dispatch::Cancelled => {
                    outcome.cancelled = true;
                    return Ok(outcome);
                }
            }
        }

        // 整条链一起提交
        let commit = fresh.into_iter().fold(StoreUpdate::new(), |u, (s, raw)| {
            u.with(s, StageChange::Succeeded(raw))
        });
        controller.apply(commit);
        controller.clear_failure();
        tracing::info!("Rerun {:?} committed", target);
        Ok(outcome)
    }

    fn check_preconditions(
        &self,
        controller: &PipelineController,
        session: &Session,
    ) -> Result<(), PipelineError> {
        if !session.credentials().is_ready() {
            return Err(PipelineError::CredentialsNotReady);
        }
        // 重跑只针对已完成的结果；停在失败阶段时应先 retry，保证阶段顺序
        match controller.phase() {
            PipelinePhase::Completed => {}
            PipelinePhase::PausedOnAuthError(_) => {
                return Err(PipelineError::CredentialsRequired(
                    "replace credentials before rerunning".into(),
                ))
            }
            phase => {
                return Err(PipelineError::InvalidPhase {
                    phase,
                    reason: "rerun is only available once every stage has completed".into(),
                })
            }
        }
        if controller.store().get(Stage::Normalize).status != StageStatus::Succeeded {
            return Err(PipelineError::InvalidPhase {
                phase: controller.phase(),
                reason: "rerun needs a normalized profile".into(),
            });
        }
        Ok(())
    }

    fn finish(&self, controller: &mut PipelineController, outcome: &mut RerunOutcome, dispatch: Dispatch) {
        match dispatch {
            Dispatch::Succeeded(_) => controller.clear_failure(),
            Dispatch::Failed(failure) => {
                outcome.action = Some(controller.record_failure(&failure));
                outcome.failure = Some(failure);
            }
            Dispatch::Cancelled => outcome.cancelled = true,
        }
    }
}
