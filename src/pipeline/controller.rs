//! 流水线控制器：五阶段状态机
//!
//! 状态：Idle → RunningStage(0) → … → RunningStage(4) → Completed；
//! 鉴权失败 → PausedOnAuthError(i)，不再派发后续阶段；
//! 瞬时失败 → 停在 RunningStage(i)，等待手动 retry（不自动重试）。
//!
//! 阶段失败从不作为 Err 抛出，而是写入存储状态并放进 RunReport。
//! 每次调用都与当前代的取消令牌竞争；reset 之后迟到的响应直接丢弃。

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::agent::{AgentExecutor, QaContext};
use crate::config::PipelineSection;
use crate::core::{
    ErrorClass, ErrorClassifier, PipelineError, PipelinePhase, PipelineSnapshot, RecoveryAction,
    RecoveryEngine, Session, SessionSupervisor, StageFailure,
};
use crate::credentials::Credentials;
use crate::observability;
use crate::pipeline::{
    payload, ResultStore, Stage, StageChange, StageStatus, StoreSnapshot, StoreUpdate,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// 一次派发的结果（尚未写入存储）
#[derive(Debug, Clone)]
pub enum Dispatch {
    Succeeded(Value),
    Failed(StageFailure),
    /// 调用期间会话被重置，结果作废
    Cancelled,
}

/// start / retry 的结果
#[derive(Debug, Clone)]
pub struct RunReport {
    pub phase: PipelinePhase,
    pub failure: Option<StageFailure>,
    pub action: Option<RecoveryAction>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn is_completed(&self) -> bool {
        self.phase == PipelinePhase::Completed
    }
}

pub struct PipelineController {
    executor: Arc<dyn AgentExecutor>,
    store: ResultStore,
    phase: PipelinePhase,
    classifier: ErrorClassifier,
    recovery: RecoveryEngine,
    supervisor: SessionSupervisor,
    settle_delay: Duration,
    preview_chars: usize,
    last_failure: Option<StageFailure>,
}

impl PipelineController {
    pub fn new(executor: Arc<dyn AgentExecutor>) -> Self {
        Self::with_settings(executor, &PipelineSection::default())
    }

    pub fn with_settings(executor: Arc<dyn AgentExecutor>, settings: &PipelineSection) -> Self {
        Self {
            executor,
            store: ResultStore::new(),
            phase: PipelinePhase::Idle,
            classifier: ErrorClassifier::new(),
            recovery: RecoveryEngine::new(),
            supervisor: SessionSupervisor::new(),
            settle_delay: settings.settle_delay(),
            preview_chars: settings.raw_preview_chars,
            last_failure: None,
        }
    }

    /// 阶段间停顿；测试中通常设为 0
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn phase(&self) -> PipelinePhase {
        self.phase
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreSnapshot> {
        self.store.subscribe()
    }

    pub fn last_failure(&self) -> Option<&StageFailure> {
        self.last_failure.as_ref()
    }

    /// 当前代的取消令牌：外部可在调用进行中取消（如重置凭据）
    pub fn cancel_token(&self) -> CancellationToken {
        self.supervisor.cancel_token()
    }

    pub fn generation(&self) -> u64 {
        self.supervisor.generation()
    }

    /// UI 投影
    pub fn snapshot(&self, busy: bool) -> PipelineSnapshot {
        let action = self
            .last_failure
            .as_ref()
            .map(|f| self.recovery.handle(f));
        PipelineSnapshot::project(
            self.phase,
            &self.store.snapshot(),
            busy,
            self.last_failure.clone(),
            action,
        )
    }

    /// Idle → RunningStage(0)，然后顺序执行到结束或失败
    pub async fn start(&mut self, session: &Session) -> Result<RunReport, PipelineError> {
        if !session.credentials().is_ready() {
            return Err(PipelineError::CredentialsNotReady);
        }
        if !session.profile_complete() {
            return Err(PipelineError::ProfileNotFinalized);
        }
        if self.phase != PipelinePhase::Idle {
            return Err(PipelineError::InvalidPhase {
                phase: self.phase,
                reason: "pipeline already started; reset first".into(),
            });
        }
        tracing::info!("Pipeline started (generation {})", self.generation());
        self.run_from(session, Stage::Normalize).await
    }

    /// 手动重试停在 RunningStage(i) 的失败阶段，并继续后续阶段
    pub async fn retry(&mut self, session: &Session) -> Result<RunReport, PipelineError> {
        match self.phase {
            PipelinePhase::PausedOnAuthError(stage) => Err(PipelineError::CredentialsRequired(
                self.last_failure
                    .as_ref()
                    .map(|f| f.message.clone())
                    .unwrap_or_else(|| format!("authentication failed at {}", stage)),
            )),
            PipelinePhase::RunningStage(stage) if self.store.get(stage).status.is_failed() => {
                if !session.credentials().is_ready() {
                    return Err(PipelineError::CredentialsNotReady);
                }
                tracing::info!("Retrying {}", stage);
                self.run_from(session, stage).await
            }
            _ => Err(PipelineError::NothingToRetry),
        }
    }

    /// 取消在途调用，清空全部阶段结果，回到 Idle
    pub fn reset(&mut self) {
        self.supervisor.renew();
        self.store.reset();
        self.phase = PipelinePhase::Idle;
        self.last_failure = None;
        tracing::info!("Pipeline reset (generation {})", self.generation());
    }

    async fn run_from(
        &mut self,
        session: &Session,
        first: Stage,
    ) -> Result<RunReport, PipelineError> {
        let profile = session
            .profile()
            .ok_or(PipelineError::ProfileNotFinalized)?;
        let token = self.cancel_token();
        let mut current = Some(first);

        while let Some(stage) = current {
            self.phase = PipelinePhase::RunningStage(stage);
            let input = payload::stage_payload(profile, &self.store, stage, None);

            match self.run_stage(stage, &input, session.credentials()).await {
                Dispatch::Succeeded(_) => {}
                Dispatch::Failed(failure) => return Ok(self.report_failure(failure)),
                Dispatch::Cancelled => return Ok(self.report_cancelled()),
            }

            current = stage.next();
            if current.is_some() && !self.settle(&token).await {
                return Ok(self.report_cancelled());
            }
        }

        self.phase = PipelinePhase::Completed;
        self.last_failure = None;
        tracing::info!("Pipeline completed");
        Ok(self.report_completed())
    }

    /// 阶段间停顿；期间被取消返回 false
    async fn settle(&self, token: &CancellationToken) -> bool {
        if self.settle_delay.is_zero() {
            return !token.is_cancelled();
        }
        tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(self.settle_delay) => true,
        }
    }

    /// 运行单个阶段：标记 Running → 派发 → 提交结果
    pub async fn run_stage(
        &mut self,
        stage: Stage,
        input: &Value,
        credentials: &Credentials,
    ) -> Dispatch {
        if self.supervisor.is_cancelled() {
            return Dispatch::Cancelled;
        }
        self.apply(StoreUpdate::single(stage, StageChange::Running { clear: false }));
        let outcome = self.dispatch(stage, input, credentials).await;
        self.commit(stage, &outcome);
        outcome
    }

    /// 只调用执行器，不写存储；取消时返回 Cancelled
    pub async fn dispatch(&self, stage: Stage, input: &Value, credentials: &Credentials) -> Dispatch {
        let token = self.cancel_token();
        if token.is_cancelled() {
            return Dispatch::Cancelled;
        }
        tracing::info!("Dispatching {}: {}", stage, stage.label());

        let result = tokio::select! {
            _ = token.cancelled() => {
                tracing::warn!("{} call abandoned after reset; late response discarded", stage);
                return Dispatch::Cancelled;
            }
            r = self.executor.run_stage(stage, input, credentials) => r,
        };

        match result {
            Ok(raw) => {
                let (preview, len) = observability::preview(&raw, self.preview_chars);
                tracing::info!("{} succeeded ({} chars)", stage, len);
                tracing::debug!("{} raw preview: {}", stage, preview);
                Dispatch::Succeeded(raw)
            }
            Err(err) => {
                let class = self.classifier.classify(&err);
                tracing::warn!("{} failed ({:?}): {}", stage, class, err);
                Dispatch::Failed(StageFailure {
                    stage,
                    class,
                    message: err.message,
                })
            }
        }
    }

    /// 把派发结果写入存储；失败只改状态，保留旧输出
    pub fn commit(&mut self, stage: Stage, outcome: &Dispatch) {
        let change = match outcome {
            Dispatch::Succeeded(raw) => StageChange::Succeeded(raw.clone()),
            Dispatch::Failed(failure) => StageChange::Failed(failure_status(failure.class)),
            Dispatch::Cancelled => return,
        };
        self.apply(StoreUpdate::single(stage, change));
    }

    /// 唯一的存储写入口
    pub(crate) fn apply(&mut self, update: StoreUpdate) {
        self.store.apply(update);
    }

    /// 记录失败并按分类切换状态
    pub(crate) fn record_failure(&mut self, failure: &StageFailure) -> RecoveryAction {
        if failure.class == ErrorClass::Auth {
            self.phase = PipelinePhase::PausedOnAuthError(failure.stage);
        }
        self.last_failure = Some(failure.clone());
        self.recovery.handle(failure)
    }

    pub(crate) fn clear_failure(&mut self) {
        self.last_failure = None;
    }

    fn report_failure(&mut self, failure: StageFailure) -> RunReport {
        let action = self.record_failure(&failure);
        RunReport {
            phase: self.phase,
            failure: Some(failure),
            action: Some(action),
            cancelled: false,
        }
    }

    fn report_cancelled(&self) -> RunReport {
        RunReport {
            phase: self.phase,
            failure: None,
            action: None,
            cancelled: true,
        }
    }

    fn report_completed(&self) -> RunReport {
        RunReport {
            phase: self.phase,
            failure: None,
            action: None,
            cancelled: false,
        }
    }

    /// 问答上下文：需要 stage 0 已成功
    pub fn qa_context(&self) -> Result<QaContext, PipelineError> {
        if self.store.get(Stage::Normalize).status != StageStatus::Succeeded {
            return Err(PipelineError::InvalidPhase {
                phase: self.phase,
                reason: "questions need a normalized profile".into(),
            });
        }
        Ok(QaContext {
            profile: self.store.raw(Stage::Normalize).cloned(),
            ranked_programs: self.store.raw(Stage::Rank).cloned(),
            scholarships: self.store.raw(Stage::Scholarships).cloned(),
            reviews: self.store.raw(Stage::Reviews).cloned(),
        })
    }
}

/// Fatal 与 Transient 一样，阶段保持可重试
pub(crate) fn failure_status(class: ErrorClass) -> StageStatus {
    match class {
        ErrorClass::Auth => StageStatus::FailedAuth,
        ErrorClass::Transient | ErrorClass::Fatal => StageStatus::FailedTransient,
    }
}
