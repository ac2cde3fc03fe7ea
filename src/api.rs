use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::{
    app_state::{AppState, Status},
    chat::{ChatError, ChatSnapshot},
    dashboard::{
        AdminRole, BulkActionKind, BulkReport, DashboardError, DashboardSnapshot, FileDetail,
        FileRow, MetricDetail, Tab,
    },
    diagram::{self, BackendType, DiagramSnapshot},
    fixtures::PRESET_QUESTIONS,
    model_pool::{PoolError, PoolSnapshot, ToggleOutcome},
    models::{
        Agent, AuditLog, BadCase, ChatMessage, ChunkStatus, MetricCard, SecurityStat, SystemUser,
    },
    views::ViewMode,
};

type ApiError = (StatusCode, Json<serde_json::Value>);

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct ViewPayload {
    view: ViewMode,
}

#[derive(Serialize)]
pub struct ViewResponse {
    view: ViewMode,
}

#[derive(Deserialize)]
pub struct AutoplayPayload {
    enabled: bool,
}

#[derive(Deserialize)]
pub struct BackendPayload {
    backend: BackendType,
}

#[derive(Deserialize)]
pub struct TabPayload {
    tab: Tab,
}

#[derive(Deserialize)]
pub struct RolePayload {
    role: AdminRole,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskPayload {
    risk_type: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionPayload {
    file_id: String,
}

#[derive(Deserialize)]
pub struct BulkPayload {
    action: BulkActionKind,
    #[serde(default)]
    tag: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPayload {
    #[serde(default)]
    agent_id: Option<String>,
}

#[derive(Deserialize)]
pub struct SendPayload {
    message: String,
}

/// Estado del panel más el dato concreto que acaba de abrirse.
#[derive(Serialize)]
pub struct DashboardWith<T: Serialize> {
    dashboard: DashboardSnapshot,
    detail: T,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkToggleResponse {
    chunk_id: String,
    status: ChunkStatus,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionResponse {
    selected_files: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditResponse {
    logs: Vec<AuditLog>,
    security_stats: Vec<SecurityStat>,
}

#[derive(Serialize)]
pub struct ModelToggleResponse {
    outcome: ToggleOutcome,
    pool: PoolSnapshot,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentsResponse {
    agents: Vec<Agent>,
    preset_questions: Vec<&'static str>,
}

#[derive(Serialize)]
pub struct SendResponse {
    reply: ChatMessage,
    chat: ChatSnapshot,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        // Vistas de página completa
        .route("/api/view", get(view_handler).post(navigate_handler))
        .route("/api/view/home", post(home_handler))
        // Diagrama de arquitectura
        .route("/api/diagram", get(diagram_handler))
        .route("/api/diagram/next", post(diagram_next_handler))
        .route("/api/diagram/reset", post(diagram_reset_handler))
        .route("/api/diagram/autoplay", post(diagram_autoplay_handler))
        .route("/api/diagram/backend", post(diagram_backend_handler))
        // Panel de administración
        .route("/api/dashboard", get(dashboard_handler))
        .route("/api/dashboard/tab", post(dashboard_tab_handler))
        .route("/api/dashboard/role", post(dashboard_role_handler))
        .route("/api/dashboard/back", post(dashboard_back_handler))
        .route("/api/dashboard/metrics", get(metrics_handler))
        .route("/api/dashboard/metrics/:id", post(open_metric_handler))
        .route("/api/dashboard/files", get(files_handler))
        .route("/api/dashboard/files/:id", post(open_file_handler))
        .route("/api/dashboard/chunks/save", post(save_chunk_handler))
        .route("/api/dashboard/chunks/:id", post(open_chunk_handler))
        .route("/api/dashboard/chunks/:id/toggle", post(toggle_chunk_handler))
        .route("/api/dashboard/bad-cases", get(bad_cases_handler))
        .route("/api/dashboard/bad-cases/:id", post(open_bad_case_handler))
        .route("/api/dashboard/fix/start", post(start_fix_handler))
        .route("/api/dashboard/fix/cancel", post(cancel_fix_handler))
        .route("/api/dashboard/fix/submit", post(submit_fix_handler))
        .route("/api/dashboard/risks", post(open_risk_handler))
        .route("/api/dashboard/logs/:id", post(open_log_handler))
        .route("/api/dashboard/audit", get(audit_handler))
        .route("/api/dashboard/users", get(users_handler))
        .route("/api/dashboard/selection/toggle", post(toggle_selection_handler))
        .route("/api/dashboard/selection/all", post(toggle_all_handler))
        .route("/api/dashboard/selection/bulk", post(bulk_action_handler))
        // Pool de modelos
        .route("/api/models", get(models_handler))
        .route("/api/models/:id/toggle", post(toggle_model_handler))
        // Chat
        .route("/api/agents", get(agents_handler))
        .route("/api/chat", get(chat_handler).delete(clear_chat_handler))
        .route("/api/chat/agent", post(select_agent_handler))
        .route("/api/chat/send", post(send_handler))
        .with_state(app_state)
}

// --- Traducción de errores de dominio ---

fn error_body(status: StatusCode, message: impl std::fmt::Display) -> ApiError {
    (status, Json(json!({ "error": message.to_string() })))
}

fn dashboard_error(e: DashboardError) -> ApiError {
    let status = match e {
        DashboardError::ContentRedacted => StatusCode::FORBIDDEN,
        ref e if e.is_not_found() => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    };
    error_body(status, e)
}

fn pool_error(e: PoolError) -> ApiError {
    let status = match e {
        PoolError::UnknownModel(_) => StatusCode::NOT_FOUND,
        PoolError::InsufficientVram { .. } | PoolError::LoadInProgress { .. } => {
            StatusCode::CONFLICT
        }
    };
    error_body(status, e)
}

fn chat_error(e: ChatError) -> ApiError {
    let status = match e {
        ChatError::EmptyMessage => StatusCode::BAD_REQUEST,
        ChatError::UnknownAgent(_) => StatusCode::NOT_FOUND,
        ChatError::Busy | ChatError::Superseded => StatusCode::CONFLICT,
    };
    error_body(status, e)
}

// --- Handlers: estado y vistas ---

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status())
}

#[axum::debug_handler]
async fn view_handler(State(state): State<AppState>) -> Json<ViewResponse> {
    Json(ViewResponse {
        view: state.views().current(),
    })
}

#[axum::debug_handler]
async fn navigate_handler(
    State(state): State<AppState>,
    Json(payload): Json<ViewPayload>,
) -> Json<ViewResponse> {
    let view = state.views().navigate(payload.view);
    Json(ViewResponse { view })
}

#[axum::debug_handler]
async fn home_handler(State(state): State<AppState>) -> Json<ViewResponse> {
    let view = state.views().go_home();
    Json(ViewResponse { view })
}

// --- Handlers: diagrama ---

#[axum::debug_handler]
async fn diagram_handler(State(state): State<AppState>) -> Json<DiagramSnapshot> {
    Json(state.diagram.snapshot())
}

#[axum::debug_handler]
async fn diagram_next_handler(State(state): State<AppState>) -> Json<DiagramSnapshot> {
    Json(state.diagram.next())
}

#[axum::debug_handler]
async fn diagram_reset_handler(State(state): State<AppState>) -> Json<DiagramSnapshot> {
    Json(state.diagram.reset())
}

#[axum::debug_handler]
async fn diagram_autoplay_handler(
    State(state): State<AppState>,
    Json(payload): Json<AutoplayPayload>,
) -> Json<DiagramSnapshot> {
    Json(state.diagram.set_autoplay(payload.enabled))
}

#[axum::debug_handler]
async fn diagram_backend_handler(
    State(state): State<AppState>,
    Json(payload): Json<BackendPayload>,
) -> Json<DiagramSnapshot> {
    let snapshot = state.diagram.set_backend(payload.backend);
    if let Err(e) = diagram::save_backend_pref(state.prefs.as_ref(), payload.backend) {
        error!("No se pudo guardar la topología {}: {}", payload.backend, e);
    }
    Json(snapshot)
}

// --- Handlers: panel de administración ---

#[axum::debug_handler]
async fn dashboard_handler(State(state): State<AppState>) -> Json<DashboardSnapshot> {
    Json(state.dashboard().snapshot())
}

#[axum::debug_handler]
async fn dashboard_tab_handler(
    State(state): State<AppState>,
    Json(payload): Json<TabPayload>,
) -> Json<DashboardSnapshot> {
    let mut dashboard = state.dashboard();
    dashboard.select_tab(payload.tab);
    Json(dashboard.snapshot())
}

#[axum::debug_handler]
async fn dashboard_role_handler(
    State(state): State<AppState>,
    Json(payload): Json<RolePayload>,
) -> Json<DashboardSnapshot> {
    let mut dashboard = state.dashboard();
    dashboard.set_role(payload.role);
    Json(dashboard.snapshot())
}

#[axum::debug_handler]
async fn dashboard_back_handler(State(state): State<AppState>) -> Json<DashboardSnapshot> {
    let mut dashboard = state.dashboard();
    dashboard.back();
    Json(dashboard.snapshot())
}

#[axum::debug_handler]
async fn metrics_handler(State(state): State<AppState>) -> Json<Vec<MetricCard>> {
    Json(state.store.metrics.clone())
}

#[axum::debug_handler]
async fn open_metric_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DashboardWith<MetricDetail>>, ApiError> {
    let mut dashboard = state.dashboard();
    dashboard.open_metric(&id).map_err(dashboard_error)?;
    let detail = dashboard.metric_detail(&id).map_err(dashboard_error)?;
    Ok(Json(DashboardWith {
        dashboard: dashboard.snapshot(),
        detail,
    }))
}

#[axum::debug_handler]
async fn files_handler(State(state): State<AppState>) -> Json<Vec<FileRow>> {
    Json(state.dashboard().file_rows())
}

#[axum::debug_handler]
async fn open_file_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DashboardWith<FileDetail>>, ApiError> {
    let mut dashboard = state.dashboard();
    dashboard.open_file(&id).map_err(dashboard_error)?;
    let detail = dashboard.file_detail(&id).map_err(dashboard_error)?;
    Ok(Json(DashboardWith {
        dashboard: dashboard.snapshot(),
        detail,
    }))
}

#[axum::debug_handler]
async fn open_chunk_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DashboardSnapshot>, ApiError> {
    let mut dashboard = state.dashboard();
    dashboard.open_chunk(&id).map_err(dashboard_error)?;
    Ok(Json(dashboard.snapshot()))
}

#[axum::debug_handler]
async fn toggle_chunk_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ChunkToggleResponse>, ApiError> {
    let status = state
        .dashboard()
        .toggle_chunk_status(&id)
        .map_err(dashboard_error)?;
    Ok(Json(ChunkToggleResponse {
        chunk_id: id,
        status,
    }))
}

#[axum::debug_handler]
async fn save_chunk_handler(
    State(state): State<AppState>,
) -> Result<Json<DashboardSnapshot>, ApiError> {
    let mut dashboard = state.dashboard();
    dashboard.save_chunk().map_err(dashboard_error)?;
    Ok(Json(dashboard.snapshot()))
}

#[axum::debug_handler]
async fn bad_cases_handler(State(state): State<AppState>) -> Json<Vec<BadCase>> {
    Json(state.dashboard().bad_cases())
}

#[axum::debug_handler]
async fn open_bad_case_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DashboardSnapshot>, ApiError> {
    let mut dashboard = state.dashboard();
    dashboard.open_bad_case(&id).map_err(dashboard_error)?;
    Ok(Json(dashboard.snapshot()))
}

#[axum::debug_handler]
async fn start_fix_handler(
    State(state): State<AppState>,
) -> Result<Json<DashboardSnapshot>, ApiError> {
    let mut dashboard = state.dashboard();
    dashboard.start_case_fix().map_err(dashboard_error)?;
    Ok(Json(dashboard.snapshot()))
}

#[axum::debug_handler]
async fn cancel_fix_handler(
    State(state): State<AppState>,
) -> Result<Json<DashboardSnapshot>, ApiError> {
    let mut dashboard = state.dashboard();
    dashboard.cancel_case_fix().map_err(dashboard_error)?;
    Ok(Json(dashboard.snapshot()))
}

#[axum::debug_handler]
async fn submit_fix_handler(
    State(state): State<AppState>,
) -> Result<Json<DashboardWith<BadCase>>, ApiError> {
    let mut dashboard = state.dashboard();
    let detail = dashboard.submit_case_fix().map_err(dashboard_error)?;
    Ok(Json(DashboardWith {
        dashboard: dashboard.snapshot(),
        detail,
    }))
}

#[axum::debug_handler]
async fn open_risk_handler(
    State(state): State<AppState>,
    Json(payload): Json<RiskPayload>,
) -> Result<Json<DashboardWith<SecurityStat>>, ApiError> {
    let mut dashboard = state.dashboard();
    dashboard
        .open_risk_type(&payload.risk_type)
        .map_err(dashboard_error)?;
    let detail = dashboard
        .risk_detail(&payload.risk_type)
        .map_err(dashboard_error)?;
    Ok(Json(DashboardWith {
        dashboard: dashboard.snapshot(),
        detail,
    }))
}

#[axum::debug_handler]
async fn open_log_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DashboardSnapshot>, ApiError> {
    let mut dashboard = state.dashboard();
    dashboard.open_log(&id).map_err(dashboard_error)?;
    Ok(Json(dashboard.snapshot()))
}

#[axum::debug_handler]
async fn audit_handler(State(state): State<AppState>) -> Json<AuditResponse> {
    Json(AuditResponse {
        logs: state.store.audit_logs.clone(),
        security_stats: state.store.security_stats.clone(),
    })
}

#[axum::debug_handler]
async fn users_handler(State(state): State<AppState>) -> Json<Vec<SystemUser>> {
    Json(state.store.users.clone())
}

#[axum::debug_handler]
async fn toggle_selection_handler(
    State(state): State<AppState>,
    Json(payload): Json<SelectionPayload>,
) -> Result<Json<SelectionResponse>, ApiError> {
    let mut dashboard = state.dashboard();
    let selection = dashboard
        .toggle_file_selection(&payload.file_id)
        .map_err(dashboard_error)?;
    Ok(Json(SelectionResponse {
        selected_files: selection.ids(),
    }))
}

#[axum::debug_handler]
async fn toggle_all_handler(State(state): State<AppState>) -> Json<SelectionResponse> {
    let mut dashboard = state.dashboard();
    let selected_files = dashboard.toggle_all_files().ids();
    Json(SelectionResponse { selected_files })
}

#[axum::debug_handler]
async fn bulk_action_handler(
    State(state): State<AppState>,
    Json(payload): Json<BulkPayload>,
) -> Result<Json<BulkReport>, ApiError> {
    let report = state
        .dashboard()
        .bulk_action(payload.action, payload.tag.as_deref())
        .map_err(dashboard_error)?;
    info!("Acción masiva {:?}: {} ficheros", payload.action, report.affected);
    Ok(Json(report))
}

// --- Handlers: pool de modelos ---

#[axum::debug_handler]
async fn models_handler(State(state): State<AppState>) -> Json<PoolSnapshot> {
    Json(state.models.snapshot())
}

#[axum::debug_handler]
async fn toggle_model_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ModelToggleResponse>, ApiError> {
    let outcome = state.models.toggle(&id).map_err(pool_error)?;
    Ok(Json(ModelToggleResponse {
        outcome,
        pool: state.models.snapshot(),
    }))
}

// --- Handlers: chat ---

#[axum::debug_handler]
async fn agents_handler(State(state): State<AppState>) -> Json<AgentsResponse> {
    Json(AgentsResponse {
        agents: state.store.agents.clone(),
        preset_questions: PRESET_QUESTIONS.to_vec(),
    })
}

#[axum::debug_handler]
async fn chat_handler(State(state): State<AppState>) -> Json<ChatSnapshot> {
    Json(state.chat.snapshot())
}

#[axum::debug_handler]
async fn select_agent_handler(
    State(state): State<AppState>,
    Json(payload): Json<AgentPayload>,
) -> Result<Json<ChatSnapshot>, ApiError> {
    state
        .chat
        .select_agent(payload.agent_id.as_deref())
        .map(Json)
        .map_err(chat_error)
}

#[axum::debug_handler]
async fn send_handler(
    State(state): State<AppState>,
    Json(payload): Json<SendPayload>,
) -> Result<Json<SendResponse>, ApiError> {
    let reply = state.chat.send(&payload.message).await.map_err(chat_error)?;
    Ok(Json(SendResponse {
        reply,
        chat: state.chat.snapshot(),
    }))
}

#[axum::debug_handler]
async fn clear_chat_handler(State(state): State<AppState>) -> Json<ChatSnapshot> {
    Json(state.chat.clear_history())
}

// --- Handler de Apagado ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    let sender = state
        .shutdown_sender
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();
    if let Some(sender) = sender {
        let _ = sender.send(());
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request},
    };
    use serde_json::Value;
    use tokio::sync::oneshot;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        config::{AppConfig, LlmProvider},
        dashboard::REDACTED_STEM,
        diagram::BACKEND_PREF_KEY,
        llm::DEMO_MODE_REPLY,
        storage::{KeyValueStore, MemoryStore},
    };

    fn test_state() -> (AppState, Arc<MemoryStore>) {
        let config = AppConfig {
            server_addr: "127.0.0.1:0".into(),
            open_browser: false,
            data_dir: std::env::temp_dir(),
            llm_provider: LlmProvider::Gemini,
            llm_chat_model: String::new(),
            llm_api_key: None,
            vram_capacity_gb: 128,
            chat_retrieval_delay: Duration::ZERO,
            model_load_delay: Duration::from_secs(60),
        };
        let prefs = Arc::new(MemoryStore::default());
        let (tx, _rx) = oneshot::channel();
        (AppState::new(config, prefs.clone(), tx), prefs)
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn status_reports_demo_mode_without_key() {
        let (state, _) = test_state();
        let app = create_router(state);
        let (status, body) = call(&app, Method::GET, "/api/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["demoMode"], true);
        assert_eq!(body["view"], "LANDING");
    }

    #[tokio::test]
    async fn navigation_and_home() {
        let (state, _) = test_state();
        let app = create_router(state);

        let (_, body) = call(&app, Method::POST, "/api/view", Some(json!({"view": "TECH"}))).await;
        assert_eq!(body["view"], "TECH");
        let (_, body) = call(&app, Method::GET, "/api/view", None).await;
        assert_eq!(body["view"], "TECH");
        let (_, body) = call(&app, Method::POST, "/api/view/home", None).await;
        assert_eq!(body["view"], "LANDING");
    }

    #[tokio::test]
    async fn backend_choice_resets_and_is_persisted() {
        let (state, prefs) = test_state();
        let app = create_router(state);

        call(&app, Method::POST, "/api/diagram/next", None).await;
        let (status, body) = call(
            &app,
            Method::POST,
            "/api/diagram/backend",
            Some(json!({"backend": "LOCAL"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["backend"], "LOCAL");
        assert_eq!(body["index"], 0);
        assert_eq!(body["total"], 8);
        assert_eq!(prefs.get(BACKEND_PREF_KEY).unwrap().as_deref(), Some("LOCAL"));
    }

    #[tokio::test]
    async fn it_admin_sees_redacted_names_and_cannot_open_chunks() {
        let (state, _) = test_state();
        let app = create_router(state);

        let (_, rows) = call(&app, Method::GET, "/api/dashboard/files", None).await;
        let confidential = rows
            .as_array()
            .unwrap()
            .iter()
            .find(|row| row["id"] == "2")
            .unwrap();
        assert!(confidential["displayName"]
            .as_str()
            .unwrap()
            .starts_with(REDACTED_STEM));

        call(&app, Method::POST, "/api/dashboard/tab", Some(json!({"tab": "knowledge"}))).await;
        let (status, body) = call(&app, Method::POST, "/api/dashboard/files/2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["detail"]["chunks"].is_null());

        let (status, _) = call(&app, Method::POST, "/api/dashboard/chunks/c1", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn invalid_transitions_and_unknown_ids() {
        let (state, _) = test_state();
        let app = create_router(state);

        let (status, _) = call(&app, Method::POST, "/api/dashboard/fix/start", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, Method::POST, "/api/dashboard/metrics/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = call(&app, Method::GET, "/api/dashboard", None).await;
        assert_eq!(body["drillDown"]["view"], "NONE");
    }

    #[tokio::test]
    async fn case_fix_flow_resolves_case() {
        let (state, _) = test_state();
        let app = create_router(state);

        call(&app, Method::POST, "/api/dashboard/tab", Some(json!({"tab": "quality"}))).await;
        let (_, cases) = call(&app, Method::GET, "/api/dashboard/bad-cases", None).await;
        let case_id = cases[0]["id"].as_str().unwrap().to_string();

        let uri = format!("/api/dashboard/bad-cases/{case_id}");
        let (status, _) = call(&app, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        call(&app, Method::POST, "/api/dashboard/fix/start", None).await;
        let (status, body) = call(&app, Method::POST, "/api/dashboard/fix/submit", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["detail"]["status"], "RESOLVED");
        assert_eq!(body["dashboard"]["drillDown"]["view"], "NONE");
    }

    #[tokio::test]
    async fn bulk_action_clears_selection() {
        let (state, _) = test_state();
        let app = create_router(state);

        let (_, body) = call(&app, Method::POST, "/api/dashboard/selection/all", None).await;
        assert_eq!(body["selectedFiles"].as_array().unwrap().len(), 5);

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/dashboard/selection/bulk",
            Some(json!({"action": "REPARSE"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["affected"], 5);

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/dashboard/selection/bulk",
            Some(json!({"action": "DELETE"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn model_toggles_are_blocked_while_loading() {
        let (state, _) = test_state();
        let app = create_router(state);

        let (status, body) = call(&app, Method::POST, "/api/models/m4/toggle", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"]["outcome"], "LOAD_STARTED");
        assert_eq!(body["pool"]["loadingModelId"], "m4");

        let (status, _) = call(&app, Method::POST, "/api/models/m1/toggle", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&app, Method::POST, "/api/models/ghost/toggle", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn chat_turn_without_key_uses_demo_reply() {
        let (state, _) = test_state();
        let app = create_router(state);

        let (status, _) = call(&app, Method::POST, "/api/chat/send", Some(json!({"message": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/chat/send",
            Some(json!({"message": "最新的差旅住宿标准是多少？"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reply"]["content"], DEMO_MODE_REPLY);
        assert_eq!(body["chat"]["messages"].as_array().unwrap().len(), 3);

        let (_, body) = call(&app, Method::DELETE, "/api/chat", None).await;
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_agent_is_not_found() {
        let (state, _) = test_state();
        let app = create_router(state);
        let (status, _) = call(
            &app,
            Method::POST,
            "/api/chat/agent",
            Some(json!({"agentId": "ghost"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
