//! Navigator HTTP 服务：协作者接口的 HTTP 形式
//!
//! 启动: cargo run --bin navigator-server --features server
//! 每个请求自带 Key，服务端不保存会话状态；模型覆盖写在 data_dir/model.json。

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use navigator::admin::ModelSettings;
use navigator::agent::{AgentExecutor, ProfileExtractor, QaContext, QuestionAnswerer, StageRequest};
use navigator::config::load_config_or_default;
use navigator::credentials::Credentials;
use navigator::llm::LlmAgentBackend;
use navigator::observability;
use navigator::pipeline::Stage;

struct AppState {
    backend: LlmAgentBackend,
    settings: ModelSettings,
    preview_chars: usize,
}

#[derive(Debug, Deserialize)]
struct ProfileForm {
    text: String,
    #[serde(alias = "openrouter_key")]
    generation_key: String,
    #[serde(default, alias = "openrouter_key_backup")]
    generation_key_backup: Option<String>,
    #[serde(alias = "serper_key")]
    search_key: String,
}

#[derive(Debug, Deserialize)]
struct QaRequest {
    question: String,
    #[serde(default)]
    context: QaContext,
    #[serde(alias = "openrouter_key")]
    generation_key: String,
    #[serde(default, alias = "openrouter_key_backup")]
    generation_key_backup: Option<String>,
    #[serde(alias = "serper_key")]
    search_key: String,
}

#[derive(Debug, Deserialize)]
struct ModelRequest {
    model_name: String,
}

fn credentials(generation: &str, search: &str, backup: Option<&str>) -> Credentials {
    let creds = Credentials::new(generation, search);
    match backup.filter(|b| !b.trim().is_empty()) {
        Some(b) => creds.with_backup(b),
        None => creds,
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/extract-profile", post(extract_profile))
        .route("/run-agent", post(run_agent))
        .route("/qa", post(qa))
        .route("/admin/model-name", get(get_model_name).post(set_model_name))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config_or_default(None);
    let state = Arc::new(AppState {
        backend: LlmAgentBackend::from_config(&cfg),
        settings: ModelSettings::in_dir(&cfg.app.data_dir),
        preview_chars: cfg.pipeline.raw_preview_chars,
    });

    let listener = tokio::net::TcpListener::bind(&cfg.server.bind).await?;
    tracing::info!("Navigator server listening on http://{}", cfg.server.bind);
    axum::serve(listener, router(state)).await?;

    Ok(())
}

async fn root() -> Json<Value> {
    Json(json!({"message": "Navigator backend running"}))
}

async fn get_model_name(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({"model_name": state.settings.get()}))
}

async fn set_model_name(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ModelRequest>,
) -> Json<Value> {
    match state.settings.set(&req.model_name) {
        Ok(()) => Json(json!({"status": "success", "model_name": req.model_name})),
        Err(e) => Json(json!({"status": "error", "message": e.to_string()})),
    }
}

async fn extract_profile(
    State(state): State<Arc<AppState>>,
    Form(form): Form<ProfileForm>,
) -> impl IntoResponse {
    let creds = credentials(
        &form.generation_key,
        &form.search_key,
        form.generation_key_backup.as_deref(),
    );
    match state.backend.extract_profile(&form.text, &creds).await {
        Ok(profile) => (StatusCode::OK, Json(json!({"profile": profile}))),
        Err(e) => {
            tracing::warn!("extract_profile failed: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": e.message, "status": e.status})),
            )
        }
    }
}

async fn run_agent(State(state): State<Arc<AppState>>, Json(req): Json<StageRequest>) -> Json<Value> {
    let Some(stage) = Stage::from_index(req.stage_index) else {
        return Json(json!({
            "error": format!("stage index out of range: {}", req.stage_index),
            "step": req.stage_index,
        }));
    };

    match state
        .backend
        .run_stage(stage, &req.payload, &req.credentials())
        .await
    {
        Ok(result) => {
            let (preview, len) = observability::preview(&result, state.preview_chars);
            tracing::info!("{} raw result length: {}", stage, len);
            tracing::debug!("{} raw result preview: {}", stage, preview);
            Json(json!({"result": result}))
        }
        Err(e) => {
            tracing::warn!("Error in run_agent for {}: {}", stage, e);
            Json(json!({"error": e.message, "step": req.stage_index}))
        }
    }
}

async fn qa(State(state): State<Arc<AppState>>, Json(req): Json<QaRequest>) -> impl IntoResponse {
    let creds = credentials(
        &req.generation_key,
        &req.search_key,
        req.generation_key_backup.as_deref(),
    );
    match state.backend.answer(&req.question, &req.context, &creds).await {
        Ok(answer) => (StatusCode::OK, Json(json!({"answer": answer}))),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({"error": e.message, "status": e.status})),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use tower::ServiceExt;

    fn state(dir: &std::path::Path) -> Arc<AppState> {
        Arc::new(AppState {
            backend: LlmAgentBackend::offline(),
            settings: ModelSettings::in_dir(dir),
            preview_chars: 500,
        })
    }

    async fn json_body(resp: axum::response::Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_run_agent_accepts_legacy_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let body = json!({
            "step": 1,
            "profile": {"budget": "10 lakhs"},
            "openrouter_key": "k",
            "serper_key": "s"
        });
        let resp = router(state(dir.path()))
            .oneshot(
                Request::post("/run-agent")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let value = json_body(resp).await;
        assert!(value["result"].as_str().unwrap().contains("Technical University of Munich"));
    }

    #[tokio::test]
    async fn test_run_agent_rejects_unknown_stage() {
        let dir = tempfile::tempdir().unwrap();
        let body = json!({"stage_index": 9, "payload": {}, "generation_key": "k", "search_key": "s"});
        let resp = router(state(dir.path()))
            .oneshot(
                Request::post("/run-agent")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let value = json_body(resp).await;
        assert_eq!(value["step"], 9);
        assert!(value["error"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_model_name_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(dir.path()));

        let resp = app
            .clone()
            .oneshot(Request::get("/admin/model-name").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["model_name"], "Default (Hardcoded)");

        let resp = app
            .clone()
            .oneshot(
                Request::post("/admin/model-name")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"model_name": "openrouter/x/y"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["status"], "success");

        let resp = app
            .oneshot(Request::get("/admin/model-name").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["model_name"], "openrouter/x/y");
    }

    #[tokio::test]
    async fn test_extract_profile_form() {
        let dir = tempfile::tempdir().unwrap();
        let resp = router(state(dir.path()))
            .oneshot(
                Request::post("/extract-profile")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(
                        "text=I+want+to+study+in+Germany+with+a+budget+of+20+lakhs&openrouter_key=k&serper_key=s",
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let value = json_body(resp).await;
        assert_eq!(value["profile"]["budget"], "20 lakhs");
        assert_eq!(value["profile"]["career_goal"], "Machine learning engineer");
    }
}
