//! 流水线编排器：主控循环
//!
//! 负责：持有会话与控制器，建立 cmd/state/store 三通道，并在后台任务中
//! 顺序消费命令（Start/Retry/Rerun/Ask/ResetCredentials/Quit）。
//!
//! 同一时刻只有一个操作在进行；操作进行中收到的命令排队，
//! 但 ResetCredentials / Quit 会立即取消当前代，在途调用的结果被丢弃。

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentExecutor, ProfileExtractor, QuestionAnswerer};
use crate::config::PipelineSection;
use crate::core::{PipelineError, PipelinePhase, PipelineSnapshot, Session};
use crate::credentials::Credentials;
use crate::llm::LlmAgentBackend;
use crate::pipeline::{
    PipelineController, Report, RerunCoordinator, RerunTarget, StoreSnapshot,
};
use crate::profile::StudentProfile;

/// 从 UI / CLI 发往编排器的命令
#[derive(Debug)]
pub enum Command {
    /// 抽取画像并从 stage 0 开始运行
    Start(String),
    /// 重试停在失败处的阶段
    Retry,
    /// 按反馈定向重跑
    Rerun {
        target: RerunTarget,
        feedback: Option<String>,
    },
    /// 问答；结果经 reply 返回
    Ask {
        question: String,
        reply: oneshot::Sender<Result<String, String>>,
    },
    /// 当前结果的报告
    Report(oneshot::Sender<Report>),
    /// 替换凭据（None 表示清空），同时重置全部流水线状态
    ResetCredentials(Option<Credentials>),
    Quit,
}

impl Command {
    /// 需要立即打断在途操作的命令
    fn interrupts(&self) -> bool {
        matches!(self, Command::ResetCredentials(_) | Command::Quit)
    }
}

/// 三个外部协作者
#[derive(Clone)]
pub struct Collaborators {
    pub executor: Arc<dyn AgentExecutor>,
    pub extractor: Arc<dyn ProfileExtractor>,
    pub answerer: Arc<dyn QuestionAnswerer>,
}

impl Collaborators {
    /// 一个 LLM 后端同时承担三种角色
    pub fn from_backend(backend: Arc<LlmAgentBackend>) -> Self {
        Self {
            executor: backend.clone(),
            extractor: backend.clone(),
            answerer: backend,
        }
    }
}

/// 编排器句柄
///
/// 经句柄发出的命令都计数；`execute` 等到编排器处理完截至目前的全部命令。
pub struct PipelineHandle {
    commands: mpsc::UnboundedSender<Command>,
    sent: u64,
    pub state: watch::Receiver<PipelineSnapshot>,
    pub store_updates: broadcast::Receiver<StoreSnapshot>,
    pub task: JoinHandle<()>,
}

impl PipelineHandle {
    /// 只发送，不等待
    pub fn send(&mut self, command: Command) -> anyhow::Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow::anyhow!("pipeline task has stopped"))?;
        self.sent += 1;
        Ok(())
    }

    /// 发送命令并等待它处理完成，返回处理后的快照
    pub async fn execute(&mut self, command: Command) -> anyhow::Result<PipelineSnapshot> {
        self.send(command)?;
        self.settled().await
    }

    /// 等待已发出的命令全部处理完
    pub async fn settled(&mut self) -> anyhow::Result<PipelineSnapshot> {
        let target = self.sent;
        let snapshot = self
            .state
            .wait_for(|s| s.epoch >= target && !s.busy)
            .await
            .map_err(|_| anyhow::anyhow!("pipeline task has stopped"))?;
        Ok(snapshot.clone())
    }

    /// 问答；前置条件不满足或调用失败时返回 Err(提示文本)
    pub async fn ask(&mut self, question: impl Into<String>) -> anyhow::Result<Result<String, String>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Ask {
            question: question.into(),
            reply,
        })?;
        Ok(rx.await?)
    }

    pub async fn report(&mut self) -> anyhow::Result<Report> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Report(reply))?;
        Ok(rx.await?)
    }

    /// 取消在途调用并等待后台任务退出
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        // 任务已退出时发送失败，直接等待即可
        let _ = self.send(Command::Quit);
        self.task
            .await
            .map_err(|e| anyhow::anyhow!("pipeline task panicked: {}", e))
    }
}

/// 启动编排任务
pub fn spawn_pipeline(
    session: Session,
    collaborators: Collaborators,
    settings: &PipelineSection,
) -> PipelineHandle {
    let controller = PipelineController::with_settings(collaborators.executor.clone(), settings);
    let store_updates = controller.subscribe();

    // 三通道：UI -> Core 命令；Core -> UI 状态快照；Core -> 观察者存储快照
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (state_tx, state_rx) = watch::channel(PipelineSnapshot::default());

    let runner = Runner {
        session,
        controller,
        coordinator: RerunCoordinator::default(),
        collaborators,
        state_tx,
        cmd_rx,
        deferred: VecDeque::new(),
        epoch: 0,
    };
    let task = tokio::spawn(runner.run());

    PipelineHandle {
        commands: cmd_tx,
        sent: 0,
        state: state_rx,
        store_updates,
        task,
    }
}

struct Runner {
    session: Session,
    controller: PipelineController,
    coordinator: RerunCoordinator,
    collaborators: Collaborators,
    state_tx: watch::Sender<PipelineSnapshot>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    deferred: VecDeque<Command>,
    epoch: u64,
}

impl Runner {
    async fn run(mut self) {
        loop {
            let cmd = match self.deferred.pop_front() {
                Some(cmd) => cmd,
                None => match self.cmd_rx.recv().await {
                    Some(cmd) => cmd,
                    None => break, // cmd_tx 已关闭，退出循环
                },
            };
            if matches!(cmd, Command::Quit) {
                self.controller.reset();
                break;
            }
            self.handle(cmd).await;
        }
        tracing::info!("Pipeline task stopped");
    }

    async fn handle(&mut self, cmd: Command) {
        let notice = match cmd {
            Command::Start(text) => {
                self.publish_busy();
                self.start(text).await
            }
            Command::Retry => {
                self.publish_busy();
                let token = self.controller.cancel_token();
                let fut = self.controller.retry(&self.session);
                drive(fut, token, &mut self.cmd_rx, &mut self.deferred)
                    .await
                    .err()
                    .map(|e| e.to_string())
            }
            Command::Rerun { target, feedback } => {
                self.publish_busy();
                let token = self.controller.cancel_token();
                let fut = self.coordinator.rerun(
                    &mut self.controller,
                    &self.session,
                    target,
                    feedback.as_deref(),
                );
                drive(fut, token, &mut self.cmd_rx, &mut self.deferred)
                    .await
                    .err()
                    .map(|e| e.to_string())
            }
            Command::Ask { question, reply } => {
                let answer = self.ask(&question).await;
                let _ = reply.send(answer);
                None
            }
            Command::Report(reply) => {
                let _ = reply.send(Report::from_store(self.controller.store()));
                None
            }
            Command::ResetCredentials(credentials) => {
                match credentials {
                    Some(c) => self.session.replace_credentials(c),
                    None => self.session.reset(),
                }
                self.controller.reset();
                None
            }
            Command::Quit => None,
        };
        self.epoch += 1;
        self.publish(notice);
    }

    /// 画像抽取 → 定稿 → 从 stage 0 运行；信息不足时返回追问
    async fn start(&mut self, text: String) -> Option<String> {
        let token = self.controller.cancel_token();
        let credentials = self.session.credentials().clone();
        if !credentials.is_ready() {
            return Some(PipelineError::CredentialsNotReady.to_string());
        }

        let extractor = self.collaborators.extractor.clone();
        let extraction = {
            let token = token.clone();
            let text = text.clone();
            async move {
                tokio::select! {
                    _ = token.cancelled() => None,
                    r = extractor.extract_profile(&text, &credentials) => Some(r),
                }
            }
        };
        let fields = match drive(extraction, token.clone(), &mut self.cmd_rx, &mut self.deferred).await {
            None => return None,
            Some(Err(e)) => {
                tracing::warn!("Profile extraction failed: {}", e);
                return Some(PipelineError::Collaborator(e.message).to_string());
            }
            Some(Ok(fields)) => fields,
        };

        let profile = match StudentProfile::finalize(text, &fields) {
            Ok(profile) => profile,
            Err(e) => return Some(e.to_string()),
        };
        self.session.set_profile(profile);
        if self.controller.phase() != PipelinePhase::Idle {
            self.controller.reset();
        }

        let token = self.controller.cancel_token();
        let fut = self.controller.start(&self.session);
        drive(fut, token, &mut self.cmd_rx, &mut self.deferred)
            .await
            .err()
            .map(|e| e.to_string())
    }

    async fn ask(&mut self, question: &str) -> Result<String, String> {
        let context = self.controller.qa_context().map_err(|e| e.to_string())?;
        let answerer = self.collaborators.answerer.clone();
        let credentials = self.session.credentials().clone();
        let token = self.controller.cancel_token();
        let fut = {
            let token = token.clone();
            async move {
                tokio::select! {
                    _ = token.cancelled() => Err("session was reset".to_string()),
                    r = answerer.answer(question, &context, &credentials) => r.map_err(|e| e.to_string()),
                }
            }
        };
        drive(fut, token, &mut self.cmd_rx, &mut self.deferred).await
    }

    fn publish_busy(&self) {
        let snapshot = self.controller.snapshot(true).at_epoch(self.epoch);
        let _ = self.state_tx.send(snapshot);
    }

    fn publish(&self, notice: Option<String>) {
        let mut snapshot = self.controller.snapshot(false).at_epoch(self.epoch);
        if let Some(n) = notice {
            snapshot = snapshot.with_notice(n);
        }
        let _ = self.state_tx.send(snapshot);
    }
}

/// 推进一个操作，同时继续接收命令：普通命令排队，打断型命令立即取消当前代
async fn drive<F: Future>(
    fut: F,
    cancel: CancellationToken,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    deferred: &mut VecDeque<Command>,
) -> F::Output {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return out,
            Some(cmd) = cmd_rx.recv() => {
                if cmd.interrupts() {
                    tracing::info!("Interrupting in-flight operation");
                    cancel.cancel();
                }
                deferred.push_back(cmd);
            }
        }
    }
}
