use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::{
    chat::ChatService,
    config::AppConfig,
    dashboard::DashboardController,
    diagram::{self, DiagramHandle},
    fixtures::MockStore,
    llm::LlmManager,
    model_pool::{ModelPool, ModelPoolHandle},
    storage::KeyValueStore,
    views::{ViewMode, ViewRouter},
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<MockStore>,
    pub prefs: Arc<dyn KeyValueStore>,
    pub llm_manager: Arc<LlmManager>,
    pub views: Arc<Mutex<ViewRouter>>,
    pub diagram: DiagramHandle,
    pub dashboard: Arc<Mutex<DashboardController>>,
    pub models: ModelPoolHandle,
    pub chat: ChatService,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub message: String,
    pub view: ViewMode,
    pub llm_provider: String,
    pub demo_mode: bool,
    pub model_loading: bool,
    pub chat_processing: bool,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Monta todos los componentes sobre el almacén de preferencias dado.
    /// La preferencia de backend del diagrama se restaura aquí.
    pub fn new(
        config: AppConfig,
        prefs: Arc<dyn KeyValueStore>,
        shutdown_sender: oneshot::Sender<()>,
    ) -> Self {
        let store = Arc::new(MockStore::seed());
        let llm_manager = Arc::new(LlmManager::from_config(&config));

        let backend = diagram::load_backend_pref(prefs.as_ref());
        let pool = ModelPool::new(store.models.clone(), config.vram_capacity_gb);
        let chat = ChatService::new(
            store.clone(),
            prefs.clone(),
            llm_manager.clone(),
            config.chat_retrieval_delay,
        );

        Self {
            diagram: DiagramHandle::new(backend),
            dashboard: Arc::new(Mutex::new(DashboardController::new(store.clone()))),
            models: ModelPoolHandle::new(pool, config.model_load_delay),
            views: Arc::new(Mutex::new(ViewRouter::default())),
            chat,
            llm_manager,
            store,
            prefs,
            config,
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_sender))),
            started_at: Utc::now(),
        }
    }

    pub fn views(&self) -> MutexGuard<'_, ViewRouter> {
        self.views.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn dashboard(&self) -> MutexGuard<'_, DashboardController> {
        self.dashboard
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self) -> Status {
        let message = if self.llm_manager.has_api_key() {
            "Servidor listo."
        } else {
            "Servidor listo (modo demo, sin API key)."
        };
        Status {
            message: message.to_string(),
            view: self.views().current(),
            llm_provider: format!("{:?}", self.llm_manager.provider),
            demo_mode: !self.llm_manager.has_api_key(),
            model_loading: self.models.is_loading(),
            chat_processing: self.chat.snapshot().processing,
            started_at: self.started_at,
        }
    }
}
