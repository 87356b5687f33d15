//! 流水线集成测试：控制器、定向重跑与编排器

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::Notify;

use navigator::agent::{AgentCallError, AgentExecutor, ProfileExtractor, QaContext, QuestionAnswerer};
use navigator::config::PipelineSection;
use navigator::core::{
    spawn_pipeline, Collaborators, Command, PipelineError, PipelinePhase, Session,
};
use navigator::credentials::Credentials;
use navigator::pipeline::{
    Extracted, PipelineController, RerunCoordinator, RerunTarget, Stage, StageStatus,
    StructuredExtractor,
};
use navigator::profile::StudentProfile;

/// 记录每次调用的阶段与输入；默认输出带调用序号，便于区分新旧结果
#[derive(Default)]
struct Recording {
    calls: Mutex<Vec<(Stage, Value)>>,
    script: Mutex<HashMap<Stage, VecDeque<Result<Value, AgentCallError>>>>,
    block_at: Option<Stage>,
    entered: Notify,
}

impl Recording {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn blocking_at(stage: Stage) -> Arc<Self> {
        Arc::new(Self {
            block_at: Some(stage),
            ..Self::default()
        })
    }

    fn script(&self, stage: Stage, result: Result<Value, AgentCallError>) {
        self.script
            .lock()
            .unwrap()
            .entry(stage)
            .or_default()
            .push_back(result);
    }

    fn stages(&self) -> Vec<Stage> {
        self.calls.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }

    fn payloads(&self, stage: Stage) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == stage)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl AgentExecutor for Recording {
    async fn run_stage(
        &self,
        stage: Stage,
        payload: &Value,
        _credentials: &Credentials,
    ) -> Result<Value, AgentCallError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((stage, payload.clone()));
            calls.iter().filter(|(s, _)| *s == stage).count()
        };
        if self.block_at == Some(stage) {
            self.entered.notify_one();
            std::future::pending::<()>().await;
        }
        let scripted = self
            .script
            .lock()
            .unwrap()
            .get_mut(&stage)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| Ok(json!(format!("{} #{}", stage.result_key(), n))))
    }
}

struct FixedExtractor(Value);

#[async_trait]
impl ProfileExtractor for FixedExtractor {
    async fn extract_profile(
        &self,
        _text: &str,
        _credentials: &Credentials,
    ) -> Result<Map<String, Value>, AgentCallError> {
        Ok(self.0.as_object().cloned().unwrap_or_default())
    }
}

struct EchoAnswerer;

#[async_trait]
impl QuestionAnswerer for EchoAnswerer {
    async fn answer(
        &self,
        question: &str,
        context: &QaContext,
        _credentials: &Credentials,
    ) -> Result<String, AgentCallError> {
        Ok(format!(
            "{} / {}",
            question,
            context.ranked_programs.as_ref().and_then(Value::as_str).unwrap_or("-")
        ))
    }
}

fn session() -> Session {
    let mut session = Session::new(Credentials::new("gen", "search"));
    let fields = json!({"budget": "10 lakhs", "preferred_locations": ["Germany"]});
    session.set_profile(StudentProfile::finalize("I want to study ML", fields.as_object().unwrap()).unwrap());
    session
}

fn controller(exec: &Arc<Recording>) -> PipelineController {
    PipelineController::new(exec.clone()).with_settle_delay(Duration::ZERO)
}

fn fast_settings() -> PipelineSection {
    PipelineSection {
        settle_delay_ms: 0,
        ..PipelineSection::default()
    }
}

fn collaborators(exec: Arc<Recording>, extracted: Value) -> Collaborators {
    Collaborators {
        executor: exec,
        extractor: Arc::new(FixedExtractor(extracted)),
        answerer: Arc::new(EchoAnswerer),
    }
}

/// 输出末尾的调用序号
fn call_number(raw: Option<&Value>) -> Option<u32> {
    raw?.as_str()?.rsplit('#').next()?.parse().ok()
}

#[test]
fn test_fenced_array_and_refusal_extraction() {
    let extractor = StructuredExtractor::new();

    let fenced = extractor.extract(&json!("```json\n[{\"university\":\"A\"}]\n```"));
    assert_eq!(fenced.as_array(), Some(&vec![json!({"university": "A"})]));

    let refusal = extractor.extract(&json!("Sorry, I cannot comply"));
    assert!(matches!(refusal, Extracted::Text(ref t) if t == "Sorry, I cannot comply"));
}

#[tokio::test]
async fn test_stage_inputs_accumulate_prior_outputs() {
    let exec = Recording::new();
    let mut c = controller(&exec);
    c.start(&session()).await.unwrap();

    let rank = &exec.payloads(Stage::Rank)[0];
    assert_eq!(rank["matched_programs"], "matched_programs #1");
    assert_eq!(rank["raw_user_text"], "I want to study ML");
    assert!(rank.get("ranked_programs").is_none());

    let reviews = &exec.payloads(Stage::Reviews)[0];
    for key in ["normalized_profile", "matched_programs", "ranked_programs", "scholarships"] {
        assert!(reviews.get(key).is_some(), "missing {}", key);
    }
}

#[tokio::test]
async fn test_auth_error_halts_progression() {
    let exec = Recording::new();
    exec.script(Stage::Match, Err(AgentCallError::message("Error code: 401 unauthorized")));
    let mut c = controller(&exec);

    let report = c.start(&session()).await.unwrap();
    assert_eq!(report.phase, PipelinePhase::PausedOnAuthError(Stage::Match));
    assert_eq!(exec.stages(), vec![Stage::Normalize, Stage::Match]);
    assert_eq!(c.store().get(Stage::Match).status, StageStatus::FailedAuth);
    assert_eq!(c.store().get(Stage::Rank).status, StageStatus::NotStarted);
}

#[tokio::test]
async fn test_programs_rerun_feeds_fresh_match_into_rank() {
    let exec = Recording::new();
    let mut c = controller(&exec);
    let s = session();
    c.start(&s).await.unwrap();

    let outcome = RerunCoordinator::default()
        .rerun(&mut c, &s, RerunTarget::Programs, Some("cheaper only"))
        .await
        .unwrap();
    assert!(outcome.succeeded());
    assert_eq!(outcome.dispatched, vec![Stage::Match, Stage::Rank]);

    let matches = exec.payloads(Stage::Match);
    assert_eq!(matches[1]["user_feedback"], "cheaper only");

    let ranks = exec.payloads(Stage::Rank);
    assert_eq!(ranks[1]["matched_programs"], "matched_programs #2");

    assert_eq!(c.store().raw(Stage::Match), Some(&json!("matched_programs #2")));
    assert_eq!(c.store().raw(Stage::Rank), Some(&json!("ranked_programs #2")));
    // 其他阶段不受影响
    assert_eq!(exec.payloads(Stage::Scholarships).len(), 1);
    assert_eq!(c.phase(), PipelinePhase::Completed);
}

#[tokio::test]
async fn test_coupled_rerun_never_exposes_mixed_pair() {
    let exec = Recording::new();
    let mut c = controller(&exec);
    let s = session();
    c.start(&s).await.unwrap();

    let mut updates = c.subscribe();
    RerunCoordinator::default()
        .rerun(&mut c, &s, RerunTarget::Programs, None)
        .await
        .unwrap();

    let mut seen_cleared = false;
    let mut count = 0;
    while let Ok(snapshot) = updates.try_recv() {
        count += 1;
        let m = snapshot.get(Stage::Match);
        let r = snapshot.get(Stage::Rank);
        if m.status == StageStatus::Running && r.status == StageStatus::Running {
            assert!(m.raw_output.is_none() && r.raw_output.is_none());
            seen_cleared = true;
        }
        if m.status == StageStatus::Succeeded || r.status == StageStatus::Succeeded {
            assert_eq!(m.status, r.status);
            assert_eq!(call_number(m.raw_output.as_ref()), call_number(r.raw_output.as_ref()));
        }
    }
    assert!(seen_cleared);
    assert_eq!(count, 2);
}

#[tokio::test]
async fn test_rerun_match_failure_restores_previous_pair() {
    let exec = Recording::new();
    let mut c = controller(&exec);
    let s = session();
    c.start(&s).await.unwrap();

    exec.script(Stage::Match, Err(AgentCallError::new(Some(502), "bad gateway")));
    let outcome = RerunCoordinator::default()
        .rerun(&mut c, &s, RerunTarget::Programs, Some("only Europe"))
        .await
        .unwrap();
    assert!(!outcome.succeeded());
    assert_eq!(outcome.dispatched, vec![Stage::Match]);

    let m = c.store().get(Stage::Match);
    assert_eq!(m.status, StageStatus::FailedTransient);
    assert_eq!(m.raw_output, Some(json!("matched_programs #1")));
    let r = c.store().get(Stage::Rank);
    assert_eq!(r.status, StageStatus::Succeeded);
    assert_eq!(r.raw_output, Some(json!("ranked_programs #1")));
    assert_eq!(c.phase(), PipelinePhase::Completed);
    assert!(c.last_failure().is_some());
}

#[tokio::test]
async fn test_rerun_rank_failure_keeps_fresh_match_only() {
    let exec = Recording::new();
    let mut c = controller(&exec);
    let s = session();
    c.start(&s).await.unwrap();

    exec.script(Stage::Rank, Err(AgentCallError::new(Some(503), "unavailable")));
    RerunCoordinator::default()
        .rerun(&mut c, &s, RerunTarget::Programs, None)
        .await
        .unwrap();

    assert_eq!(c.store().raw(Stage::Match), Some(&json!("matched_programs #2")));
    let r = c.store().get(Stage::Rank);
    assert_eq!(r.status, StageStatus::FailedTransient);
    assert!(r.raw_output.is_none());
}

#[tokio::test]
async fn test_single_stage_rerun_and_preconditions() {
    let exec = Recording::new();
    let mut c = controller(&exec);
    let s = session();
    let coordinator = RerunCoordinator::default();

    // 尚未运行
    assert!(coordinator
        .rerun(&mut c, &s, RerunTarget::Reviews, None)
        .await
        .is_err());

    c.start(&s).await.unwrap();
    let outcome = coordinator
        .rerun(&mut c, &s, RerunTarget::Reviews, Some("more recent reviews"))
        .await
        .unwrap();
    assert_eq!(outcome.dispatched, vec![Stage::Reviews]);
    assert_eq!(exec.payloads(Stage::Reviews)[1]["user_feedback"], "more recent reviews");
    assert_eq!(exec.payloads(Stage::Match).len(), 1);
}

#[tokio::test]
async fn test_rerun_refused_while_stopped_at_failed_stage() {
    let exec = Recording::new();
    exec.script(Stage::Scholarships, Err(AgentCallError::new(Some(503), "unavailable")));
    let mut c = controller(&exec);
    let s = session();
    c.start(&s).await.unwrap();
    assert_eq!(c.phase(), PipelinePhase::RunningStage(Stage::Scholarships));

    let result = RerunCoordinator::default()
        .rerun(&mut c, &s, RerunTarget::Reviews, None)
        .await;
    assert!(matches!(result, Err(PipelineError::InvalidPhase { .. })));
    assert!(exec.payloads(Stage::Reviews).is_empty());
    assert_eq!(c.store().get(Stage::Reviews).status, StageStatus::NotStarted);

    // retry 仍按顺序继续
    let report = c.retry(&s).await.unwrap();
    assert!(report.is_completed());
    assert_eq!(
        exec.stages(),
        vec![
            Stage::Normalize,
            Stage::Match,
            Stage::Rank,
            Stage::Scholarships,
            Stage::Scholarships,
            Stage::Reviews
        ]
    );
}

#[tokio::test]
async fn test_programs_rerun_after_match_failure_leaves_retry_path() {
    let exec = Recording::new();
    exec.script(Stage::Match, Err(AgentCallError::new(Some(502), "bad gateway")));
    let mut c = controller(&exec);
    let s = session();
    c.start(&s).await.unwrap();

    let result = RerunCoordinator::default()
        .rerun(&mut c, &s, RerunTarget::Programs, Some("cheaper only"))
        .await;
    assert!(result.is_err());
    assert_eq!(exec.stages(), vec![Stage::Normalize, Stage::Match]);
    assert_eq!(c.phase(), PipelinePhase::RunningStage(Stage::Match));

    let report = c.retry(&s).await.unwrap();
    assert!(report.is_completed());
    assert_eq!(c.store().get(Stage::Reviews).status, StageStatus::Succeeded);
}

#[tokio::test]
async fn test_rerun_after_cancellation_leaves_store_untouched() {
    let exec = Recording::new();
    let mut c = controller(&exec);
    let s = session();
    c.start(&s).await.unwrap();

    c.cancel_token().cancel();
    let mut updates = c.subscribe();
    let outcome = RerunCoordinator::default()
        .rerun(&mut c, &s, RerunTarget::Programs, None)
        .await
        .unwrap();
    assert!(outcome.cancelled);
    assert!(outcome.dispatched.is_empty());
    assert!(updates.try_recv().is_err());
    assert_eq!(c.store().raw(Stage::Match), Some(&json!("matched_programs #1")));
    assert_eq!(c.store().get(Stage::Rank).status, StageStatus::Succeeded);
    assert_eq!(exec.payloads(Stage::Match).len(), 1);
}

#[tokio::test]
async fn test_orchestrator_full_flow() {
    let exec = Recording::new();
    let extracted = json!({"budget": "20 lakhs", "preferred_locations": ["Canada"]});
    let mut handle = spawn_pipeline(
        Session::new(Credentials::new("gen", "search")),
        collaborators(exec.clone(), extracted),
        &fast_settings(),
    );

    let snapshot = handle.execute(Command::Start("Canada, 20 lakhs".into())).await.unwrap();
    assert_eq!(snapshot.phase, PipelinePhase::Completed);
    assert!(snapshot.stages.iter().all(|(_, s)| *s == StageStatus::Succeeded));

    let answer = handle.ask("Which is best?").await.unwrap().unwrap();
    assert_eq!(answer, "Which is best? / ranked_programs #1");

    let snapshot = handle
        .execute(Command::Rerun {
            target: RerunTarget::Scholarships,
            feedback: Some("need-based".into()),
        })
        .await
        .unwrap();
    assert_eq!(snapshot.phase, PipelinePhase::Completed);

    let report = handle.report().await.unwrap();
    assert!(report.sections().iter().all(|s| s.is_available()));
    assert!(report.render().contains("scholarships #2"));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_info_blocks_stage_zero() {
    let exec = Recording::new();
    let mut handle = spawn_pipeline(
        Session::new(Credentials::new("gen", "search")),
        collaborators(exec.clone(), json!({"missing_info": "no budget given"})),
        &fast_settings(),
    );

    let snapshot = handle.execute(Command::Start("I like ML".into())).await.unwrap();
    assert_eq!(snapshot.phase, PipelinePhase::Idle);
    assert!(snapshot.notice.unwrap().contains("no budget given"));
    assert!(exec.stages().is_empty());

    let answer = handle.ask("anything?").await.unwrap();
    assert!(answer.is_err());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reset_discards_late_response() {
    let exec = Recording::blocking_at(Stage::Match);
    let mut handle = spawn_pipeline(
        Session::new(Credentials::new("gen", "search")),
        collaborators(exec.clone(), json!({"budget": "10 lakhs"})),
        &fast_settings(),
    );

    handle.send(Command::Start("profile".into())).unwrap();
    exec.entered.notified().await;

    let snapshot = handle
        .execute(Command::ResetCredentials(Some(Credentials::new("new-gen", "new-search"))))
        .await
        .unwrap();
    assert_eq!(snapshot.phase, PipelinePhase::Idle);
    assert!(snapshot.stages.iter().all(|(_, s)| *s == StageStatus::NotStarted));
    assert_eq!(exec.stages(), vec![Stage::Normalize, Stage::Match]);

    let report = handle.report().await.unwrap();
    assert!(!report.profile.is_available());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_auth_pause_then_new_credentials_restart() {
    let exec = Recording::new();
    exec.script(Stage::Rank, Err(AgentCallError::new(Some(401), "invalid api key")));
    let mut handle = spawn_pipeline(
        Session::new(Credentials::new("gen", "search")),
        collaborators(exec.clone(), json!({"budget": "10 lakhs"})),
        &fast_settings(),
    );

    let snapshot = handle.execute(Command::Start("profile".into())).await.unwrap();
    assert_eq!(snapshot.phase, PipelinePhase::PausedOnAuthError(Stage::Rank));
    assert!(snapshot.notice.unwrap().contains("Replace your API keys"));

    let snapshot = handle.execute(Command::Retry).await.unwrap();
    assert_eq!(snapshot.phase, PipelinePhase::PausedOnAuthError(Stage::Rank));
    assert!(snapshot.notice.unwrap().contains("Credentials must be replaced"));

    let snapshot = handle
        .execute(Command::ResetCredentials(Some(Credentials::new("g2", "s2"))))
        .await
        .unwrap();
    assert_eq!(snapshot.phase, PipelinePhase::Idle);

    let snapshot = handle.execute(Command::Start("profile".into())).await.unwrap();
    assert_eq!(snapshot.phase, PipelinePhase::Completed);

    handle.shutdown().await.unwrap();
}
