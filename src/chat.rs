//! Panel de chat simulado.
//!
//! El historial de cada agente se guarda bajo su propia clave en el
//! almacenamiento local. Cada turno añade el mensaje del usuario, espera la
//! latencia de recuperación simulada, llama una vez al generador con el
//! contexto de conocimiento simulado y añade exactamente una respuesta.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    fixtures::{MockStore, MOCK_KNOWLEDGE_BASE},
    llm::TextGenerator,
    models::{Agent, ChatMessage, Role},
    storage::KeyValueStore,
};

pub const HISTORY_KEY_PREFIX: &str = "yuanlifang_chat_history_";
pub const DEFAULT_AGENT_ID: &str = "default_general_agent";
pub const GREETING_ID: &str = "init";

const GENERAL_GREETING: &str =
    "您好，我是元立方通用智能助手。已连接企业知识库。\n您可以询问诸如“最新的差旅报销标准是什么？”等问题。";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalStatus {
    Idle,
    Searching,
    Found,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("El mensaje está vacío")]
    EmptyMessage,
    #[error("Ya hay un turno en curso")]
    Busy,
    #[error("Agente desconocido: {0}")]
    UnknownAgent(String),
    #[error("La conversación cambió antes de recibir la respuesta")]
    Superseded,
}

pub fn storage_key(agent_id: &str) -> String {
    format!("{HISTORY_KEY_PREFIX}{agent_id}")
}

pub fn greeting(agent: Option<&Agent>) -> ChatMessage {
    let content = match agent {
        Some(agent) => format!(
            "您好！我是{}。我已经加载了{}相关的知识库。\n请问有什么可以帮您？",
            agent.name, agent.category
        ),
        None => GENERAL_GREETING.to_string(),
    };
    ChatMessage {
        id: GREETING_ID.to_string(),
        role: Role::Assistant,
        content,
    }
}

/// Conversación con un agente concreto.
#[derive(Debug, Clone)]
pub struct ChatSession {
    agent: Option<Agent>,
    messages: Vec<ChatMessage>,
    status: RetrievalStatus,
    processing: bool,
}

impl ChatSession {
    /// Carga el historial guardado o inicializa el saludo. Un historial
    /// corrupto se registra y se sustituye por el saludo.
    pub fn load(store: &dyn KeyValueStore, agent: Option<&Agent>) -> Self {
        let agent_id = agent.map_or(DEFAULT_AGENT_ID, |a| a.id.as_str());
        let key = storage_key(agent_id);

        let saved = match store.get(&key) {
            Ok(saved) => saved,
            Err(e) => {
                warn!("No se pudo leer el historial '{key}': {e}");
                None
            }
        };

        let messages = match saved.map(|raw| serde_json::from_str::<Vec<ChatMessage>>(&raw)) {
            Some(Ok(messages)) if !messages.is_empty() => messages,
            Some(Ok(_)) | None => vec![greeting(agent)],
            Some(Err(e)) => {
                warn!("Historial de chat corrupto en '{key}', se reinicia: {e}");
                vec![greeting(agent)]
            }
        };

        Self {
            agent: agent.cloned(),
            messages,
            status: RetrievalStatus::Idle,
            processing: false,
        }
    }

    pub fn agent_id(&self) -> &str {
        self.agent.as_ref().map_or(DEFAULT_AGENT_ID, |a| a.id.as_str())
    }

    #[cfg(test)]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[cfg(test)]
    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn persist(&self, store: &dyn KeyValueStore) {
        if self.messages.is_empty() {
            return;
        }
        let key = storage_key(self.agent_id());
        let result = serde_json::to_string(&self.messages)
            .map_err(anyhow::Error::from)
            .and_then(|json| store.set(&key, &json));
        if let Err(e) = result {
            warn!("No se pudo guardar el historial '{key}': {e}");
        }
    }

    /// Borra el historial guardado y vuelve al saludo inicial.
    pub fn clear(&mut self, store: &dyn KeyValueStore) {
        let key = storage_key(self.agent_id());
        if let Err(e) = store.remove(&key) {
            warn!("No se pudo borrar el historial '{key}': {e}");
        }
        self.messages = vec![greeting(self.agent.as_ref())];
        self.status = RetrievalStatus::Idle;
        self.processing = false;
    }

    pub fn begin_turn(&mut self, text: &str) -> Result<ChatMessage, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if self.processing {
            return Err(ChatError::Busy);
        }
        let message = ChatMessage::new(Role::User, text);
        self.messages.push(message.clone());
        self.processing = true;
        self.status = RetrievalStatus::Searching;
        Ok(message)
    }

    pub fn mark_found(&mut self) {
        if self.processing {
            self.status = RetrievalStatus::Found;
        }
    }

    /// Cierra un turno que no llegó a recibir respuesta. El mensaje del
    /// usuario se conserva.
    pub fn abort_turn(&mut self) {
        self.processing = false;
        self.status = RetrievalStatus::Idle;
    }

    pub fn complete_turn(&mut self, reply: String) -> ChatMessage {
        let message = ChatMessage::new(Role::Assistant, reply);
        self.messages.push(message.clone());
        self.processing = false;
        self.status = RetrievalStatus::Idle;
        message
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSnapshot {
    pub agent_id: String,
    pub agent_name: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub status: RetrievalStatus,
    pub processing: bool,
}

struct ActiveChat {
    session: ChatSession,
    /// Cambia con cada cambio de agente o borrado del historial.
    generation: u64,
}

/// Libera el chat si el future de `send` se descarta a mitad de turno
/// (por ejemplo, el cliente cierra la conexión).
struct TurnGuard {
    active: Arc<Mutex<ActiveChat>>,
    generation: u64,
    armed: bool,
}

impl TurnGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut active = self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if active.generation == self.generation {
            warn!("Turno de chat abandonado antes de recibir la respuesta");
            active.session.abort_turn();
        }
    }
}

/// Chat activo compartido por los handlers HTTP.
#[derive(Clone)]
pub struct ChatService {
    catalog: Arc<MockStore>,
    store: Arc<dyn KeyValueStore>,
    generator: Arc<dyn TextGenerator>,
    retrieval_delay: Duration,
    active: Arc<Mutex<ActiveChat>>,
}

impl ChatService {
    pub fn new(
        catalog: Arc<MockStore>,
        store: Arc<dyn KeyValueStore>,
        generator: Arc<dyn TextGenerator>,
        retrieval_delay: Duration,
    ) -> Self {
        let session = ChatSession::load(store.as_ref(), None);
        Self {
            catalog,
            store,
            generator,
            retrieval_delay,
            active: Arc::new(Mutex::new(ActiveChat {
                session,
                generation: 0,
            })),
        }
    }

    fn active(&self) -> MutexGuard<'_, ActiveChat> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        let active = self.active();
        let session = &active.session;
        ChatSnapshot {
            agent_id: session.agent_id().to_string(),
            agent_name: session.agent.as_ref().map(|a| a.name.clone()),
            messages: session.messages.clone(),
            status: session.status,
            processing: session.processing,
        }
    }

    /// Cambia de agente (o al asistente general con `None`) y carga su historial.
    pub fn select_agent(&self, agent_id: Option<&str>) -> Result<ChatSnapshot, ChatError> {
        let agent = match agent_id {
            Some(id) if id != DEFAULT_AGENT_ID => Some(
                self.catalog
                    .agent(id)
                    .ok_or_else(|| ChatError::UnknownAgent(id.to_string()))?,
            ),
            _ => None,
        };
        {
            let mut active = self.active();
            active.session = ChatSession::load(self.store.as_ref(), agent);
            active.generation += 1;
            info!("Chat activo: {}", active.session.agent_id());
        }
        Ok(self.snapshot())
    }

    pub fn clear_history(&self) -> ChatSnapshot {
        {
            let mut active = self.active();
            active.session.clear(self.store.as_ref());
            active.generation += 1;
        }
        self.snapshot()
    }

    /// Ejecuta un turno completo y devuelve la respuesta del asistente.
    pub async fn send(&self, text: &str) -> Result<ChatMessage, ChatError> {
        let (generation, question) = {
            let mut active = self.active();
            let message = active.session.begin_turn(text)?;
            active.session.persist(self.store.as_ref());
            (active.generation, message.content)
        };
        let mut guard = TurnGuard {
            active: self.active.clone(),
            generation,
            armed: true,
        };

        tokio::time::sleep(self.retrieval_delay).await;
        {
            let mut active = self.active();
            if active.generation == generation {
                active.session.mark_found();
            }
        }

        let reply = self
            .generator
            .generate_rag_response(&question, MOCK_KNOWLEDGE_BASE)
            .await;

        let mut active = self.active();
        guard.disarm();
        if active.generation != generation {
            warn!("Respuesta descartada: la conversación cambió durante el turno");
            return Err(ChatError::Superseded);
        }
        let message = active.session.complete_turn(reply);
        active.session.persist(self.store.as_ref());
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::LlmProvider,
        llm::{LlmManager, DEMO_MODE_REPLY},
        storage::MemoryStore,
    };
    use futures::future::BoxFuture;

    struct Echo;

    impl TextGenerator for Echo {
        fn generate_rag_response<'a>(&'a self, query: &'a str, _context: &'a str) -> BoxFuture<'a, String> {
            Box::pin(async move { format!("echo: {query}") })
        }
    }

    fn service_with(generator: Arc<dyn TextGenerator>) -> (ChatService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        let service = ChatService::new(
            Arc::new(MockStore::seed()),
            store.clone(),
            generator,
            Duration::from_millis(1500),
        );
        (service, store)
    }

    fn demo_llm() -> Arc<dyn TextGenerator> {
        Arc::new(LlmManager::new(LlmProvider::Gemini, "", None))
    }

    #[test]
    fn fresh_agent_starts_with_greeting() {
        let store = MemoryStore::default();
        let catalog = MockStore::seed();
        let session = ChatSession::load(&store, catalog.agent("a1"));
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].id, GREETING_ID);
        assert!(session.messages()[0].content.contains("法务合规助手"));
    }

    #[test]
    fn history_round_trips_through_storage() {
        let store = MemoryStore::default();
        let mut session = ChatSession::load(&store, None);
        session.begin_turn("你好").unwrap();
        session.complete_turn("回答".into());
        session.persist(&store);

        let reloaded = ChatSession::load(&store, None);
        assert_eq!(reloaded.messages(), session.messages());
    }

    #[test]
    fn corrupt_history_falls_back_to_greeting() {
        let store = MemoryStore::default();
        store.set(&storage_key("a2"), "{not json").unwrap();
        let catalog = MockStore::seed();
        let session = ChatSession::load(&store, catalog.agent("a2"));
        assert_eq!(session.messages(), &[greeting(catalog.agent("a2"))]);
    }

    #[test]
    fn empty_and_concurrent_turns_are_rejected() {
        let store = MemoryStore::default();
        let mut session = ChatSession::load(&store, None);
        assert_eq!(session.begin_turn("   "), Err(ChatError::EmptyMessage));
        session.begin_turn("第一问").unwrap();
        assert_eq!(session.begin_turn("第二问"), Err(ChatError::Busy));
        assert_eq!(session.messages().len(), 2);
    }

    #[test]
    fn clear_removes_stored_history() {
        let store = MemoryStore::default();
        let mut session = ChatSession::load(&store, None);
        session.begin_turn("hola").unwrap();
        session.persist(&store);
        session.clear(&store);
        assert_eq!(store.get(&storage_key(DEFAULT_AGENT_ID)).unwrap(), None);
        assert_eq!(session.messages().len(), 1);
        assert!(!session.is_processing());
    }

    #[tokio::test(start_paused = true)]
    async fn demo_mode_reply_is_appended_once() {
        let (service, store) = service_with(demo_llm());
        let reply = service.send("最新的差旅住宿标准是多少？").await.unwrap();
        assert_eq!(reply.content, DEMO_MODE_REPLY);

        let snap = service.snapshot();
        assert_eq!(snap.messages.len(), 3);
        assert_eq!(
            snap.messages
                .iter()
                .filter(|m| m.content == DEMO_MODE_REPLY)
                .count(),
            1
        );
        assert_eq!(snap.status, RetrievalStatus::Idle);
        assert!(!snap.processing);

        let saved = store.get(&storage_key(DEFAULT_AGENT_ID)).unwrap().unwrap();
        let saved: Vec<ChatMessage> = serde_json::from_str(&saved).unwrap();
        assert_eq!(saved, snap.messages);
    }

    #[tokio::test(start_paused = true)]
    async fn switching_agent_mid_turn_drops_reply() {
        let (service, _store) = service_with(Arc::new(Echo));
        let pending = {
            let service = service.clone();
            tokio::spawn(async move { service.send("问题").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(service.snapshot().status, RetrievalStatus::Searching);

        service.select_agent(Some("a3")).unwrap();
        assert_eq!(pending.await.unwrap(), Err(ChatError::Superseded));

        let snap = service.snapshot();
        assert_eq!(snap.agent_id, "a3");
        assert_eq!(snap.messages.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn each_agent_keeps_its_own_history() {
        let (service, _store) = service_with(Arc::new(Echo));
        service.select_agent(Some("a1")).unwrap();
        service.send("合同").await.unwrap();

        service.select_agent(Some("a2")).unwrap();
        assert_eq!(service.snapshot().messages.len(), 1);

        let snap = service.select_agent(Some("a1")).unwrap();
        assert_eq!(snap.messages.len(), 3);
        assert_eq!(snap.messages[2].content, "echo: 合同");
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_turn_does_not_block_the_next_one() {
        let (service, _store) = service_with(Arc::new(Echo));
        let cut = tokio::time::timeout(Duration::from_millis(100), service.send("问题一")).await;
        assert!(cut.is_err());

        let snap = service.snapshot();
        assert!(!snap.processing);
        assert_eq!(snap.status, RetrievalStatus::Idle);
        assert_eq!(snap.messages.len(), 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        let reply = service.send("问题二").await.unwrap();
        assert_eq!(reply.content, "echo: 问题二");
        assert_eq!(service.snapshot().messages.len(), 4);
    }

    #[test]
    fn unknown_agent_is_rejected() {
        let (service, _store) = service_with(Arc::new(Echo));
        assert_eq!(
            service.select_agent(Some("zz")).unwrap_err(),
            ChatError::UnknownAgent("zz".into())
        );
    }
}
