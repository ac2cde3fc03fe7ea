//! Reproductor del diagrama de arquitectura híbrida.
//!
//! Dos secuencias fijas de etapas (inferencia local / remota) seleccionadas por
//! `BackendType`. El avance es manual (`next`) o automático: en modo autoplay
//! hay como mucho un temporizador pendiente, etiquetado con la `epoch` del
//! estado contra el que se programó. Cualquier cambio de estado incrementa la
//! epoch, de modo que un temporizador atrasado no tiene efecto.

use std::{
    fmt,
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{storage::KeyValueStore, timer::TimerSlot};

pub const BACKEND_PREF_KEY: &str = "yuanlifang_tech_backend_pref";

const BASE_STEP_DELAY: Duration = Duration::from_millis(2000);
const SLOW_STEP_DELAY: Duration = Duration::from_millis(2500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnimationState {
    Idle,
    Ingestion,
    ProcessingLocal,
    Querying,
    Reranking,
    Sanitization,
    EncryptionRequest,
    CloudTransmissionRequest,
    CloudDecryption,
    CloudInference,
    CloudEncryptionResponse,
    CloudTransmissionResponse,
    DecryptionLocal,
    Delivery,
}

/// Topología de inferencia elegida en la página técnica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackendType {
    #[default]
    Public,
    Private,
    Local,
    Operator,
}

impl BackendType {
    pub fn sequence(self) -> &'static [AnimationState] {
        match self {
            Self::Local => LOCAL_SEQUENCE,
            Self::Public | Self::Private | Self::Operator => REMOTE_SEQUENCE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "PUBLIC",
            Self::Private => "PRIVATE",
            Self::Local => "LOCAL",
            Self::Operator => "OPERATOR",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "PUBLIC" => Ok(Self::Public),
            "PRIVATE" => Ok(Self::Private),
            "LOCAL" => Ok(Self::Local),
            "OPERATOR" => Ok(Self::Operator),
            other => Err(anyhow!("Topología no soportada: {other}")),
        }
    }
}

/// Lee la preferencia guardada; valores ausentes o desconocidos dan `Public`.
pub fn load_backend_pref(store: &dyn KeyValueStore) -> BackendType {
    match store.get(BACKEND_PREF_KEY) {
        Ok(Some(raw)) => raw.parse().unwrap_or_else(|e| {
            warn!("Preferencia de topología ignorada: {e}");
            BackendType::default()
        }),
        Ok(None) => BackendType::default(),
        Err(e) => {
            warn!("No se pudo leer la preferencia de topología: {e}");
            BackendType::default()
        }
    }
}

pub fn save_backend_pref(store: &dyn KeyValueStore, backend: BackendType) -> Result<()> {
    store.set(BACKEND_PREF_KEY, backend.as_str())
}

const LOCAL_SEQUENCE: &[AnimationState] = &[
    AnimationState::Idle,
    AnimationState::Ingestion,
    AnimationState::ProcessingLocal,
    AnimationState::Querying,
    AnimationState::Reranking,
    AnimationState::CloudDecryption,
    AnimationState::CloudInference,
    AnimationState::Delivery,
];

const REMOTE_SEQUENCE: &[AnimationState] = &[
    AnimationState::Idle,
    AnimationState::Ingestion,
    AnimationState::ProcessingLocal,
    AnimationState::Querying,
    AnimationState::Reranking,
    AnimationState::Sanitization,
    AnimationState::EncryptionRequest,
    AnimationState::CloudTransmissionRequest,
    AnimationState::CloudDecryption,
    AnimationState::CloudInference,
    AnimationState::CloudEncryptionResponse,
    AnimationState::CloudTransmissionResponse,
    AnimationState::DecryptionLocal,
    AnimationState::Delivery,
];

/// Título, tecnología y descripción que acompañan a cada etapa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepDetails {
    pub title: &'static str,
    pub tech: &'static str,
    pub desc: &'static str,
}

const WAITING_DETAILS: StepDetails = StepDetails {
    title: "Waiting...",
    tech: "...",
    desc: "...",
};

const STEP_DETAILS: &[(AnimationState, StepDetails)] = &[
    (AnimationState::Idle, StepDetails { title: "系统就绪 (System Ready)", tech: "Microservices / K8s", desc: "全链路监控探针已启动，Workflow 编排引擎准备就绪。" }),
    (AnimationState::Ingestion, StepDetails { title: "全源解析 (Omni-Parsing)", tech: "OCR (Paddle) + LayoutLMv3", desc: "从数据集(Data)读取源文件，通过解析引擎自动提取文本、表格与图表信息，并生成元数据。" }),
    (AnimationState::ProcessingLocal, StepDetails { title: "混合存储 (Hybrid Storage)", tech: "Milvus (Vector) + PG (Scalar)", desc: "非结构化向量存入 KB，结构化元数据存入 DB，构建完整的企业知识资产库。" }),
    (AnimationState::Querying, StepDetails { title: "智能路由与召回 (Routing)", tech: "API Gateway -> Workflow", desc: "用户请求经网关鉴权后，由工作流引擎分析意图，分发至 KB(语义) 和 DB(精确) 并行召回。" }),
    (AnimationState::Reranking, StepDetails { title: "语义精排 (Reranking)", tech: "BCE-Reranker Model", desc: "对双路召回的结果进行交叉编码打分，提取最相关的 Top-Chunks。" }),
    (AnimationState::Sanitization, StepDetails { title: "隐私清洗 (Sanitization)", tech: "NLP (BERT-NER) + Regex Rules", desc: "自动识别上下文中的敏感实体，并可调用插件(Plugins)进行数据掩码处理。" }),
    (AnimationState::EncryptionRequest, StepDetails { title: "加密封装 (Encryption)", tech: "AES-256-GCM", desc: "对清洗后的 Prompt 进行高强度加密，准备跨越安全边界。" }),
    (AnimationState::CloudTransmissionRequest, StepDetails { title: "安全传输 (Transport)", tech: "mTLS (Mutual TLS 1.3)", desc: "通过加密隧道传输至推理节点。" }),
    (AnimationState::CloudDecryption, StepDetails { title: "安全沙箱接收 (Decryption)", tech: "Secure Enclave (TEE)", desc: "在内存态解密数据，确保原始信息不落地。" }),
    (AnimationState::CloudInference, StepDetails { title: "大模型推理 (Inference)", tech: "Transformer / KV Cache", desc: "大模型结合上下文生成回答，支持调用 MCP 服务获取实时信息。" }),
    (AnimationState::CloudEncryptionResponse, StepDetails { title: "结果加密 (Response Enc)", tech: "AES-256-GCM", desc: "生成的回答再次加密。" }),
    (AnimationState::CloudTransmissionResponse, StepDetails { title: "结果回传 (Return)", tech: "HTTP/2 Stream", desc: "流式返回加密结果。" }),
    (AnimationState::DecryptionLocal, StepDetails { title: "本地解密 (Final Decrypt)", tech: "Local Key Management", desc: "网关解密最终答案。" }),
    (AnimationState::Delivery, StepDetails { title: "用户交付 (Delivery)", tech: "SSE / WebSocket", desc: "实时展示回答，完成一次完整的 RAG 闭环。" }),
];

pub fn step_details(state: AnimationState) -> StepDetails {
    STEP_DETAILS
        .iter()
        .find(|(s, _)| *s == state)
        .map(|(_, details)| *details)
        .unwrap_or(WAITING_DETAILS)
}

/// Tiempo de permanencia de una etapa en modo autoplay.
pub fn step_delay(state: AnimationState) -> Duration {
    match state {
        AnimationState::Ingestion | AnimationState::CloudDecryption => SLOW_STEP_DELAY,
        _ => BASE_STEP_DELAY,
    }
}

/// Transición programada por el autoplay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledStep {
    pub epoch: u64,
    pub delay: Duration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagramSnapshot {
    pub backend: BackendType,
    pub state: AnimationState,
    pub index: usize,
    pub total: usize,
    pub autoplay: bool,
    pub details: StepDetails,
}

#[derive(Debug, Clone)]
pub struct DiagramPlayer {
    backend: BackendType,
    index: usize,
    autoplay: bool,
    epoch: u64,
}

impl DiagramPlayer {
    pub fn new(backend: BackendType) -> Self {
        Self {
            backend,
            index: 0,
            autoplay: false,
            epoch: 0,
        }
    }

    pub fn sequence(&self) -> &'static [AnimationState] {
        self.backend.sequence()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> AnimationState {
        self.sequence()[self.index]
    }

    pub fn autoplay(&self) -> bool {
        self.autoplay
    }

    pub fn next(&mut self) -> AnimationState {
        self.index = (self.index + 1) % self.sequence().len();
        self.epoch += 1;
        self.state()
    }

    pub fn reset(&mut self) {
        self.index = 0;
        self.autoplay = false;
        self.epoch += 1;
    }

    /// Cambiar la topología siempre reinicia el reproductor.
    pub fn set_backend(&mut self, backend: BackendType) {
        self.backend = backend;
        self.reset();
    }

    pub fn set_autoplay(&mut self, enabled: bool) {
        self.autoplay = enabled;
        self.epoch += 1;
    }

    pub fn pending(&self) -> Option<ScheduledStep> {
        self.autoplay.then(|| ScheduledStep {
            epoch: self.epoch,
            delay: step_delay(self.state()),
        })
    }

    /// Avanza si el temporizador sigue siendo vigente.
    pub fn fire(&mut self, epoch: u64) -> bool {
        if !self.autoplay || epoch != self.epoch {
            debug!("Temporizador del diagrama descartado (epoch {epoch} != {})", self.epoch);
            return false;
        }
        self.next();
        true
    }

    pub fn snapshot(&self) -> DiagramSnapshot {
        let state = self.state();
        DiagramSnapshot {
            backend: self.backend,
            state,
            index: self.index,
            total: self.sequence().len(),
            autoplay: self.autoplay,
            details: step_details(state),
        }
    }
}

/// Reproductor compartido junto con su temporizador de autoplay.
#[derive(Clone)]
pub struct DiagramHandle {
    player: Arc<Mutex<DiagramPlayer>>,
    timer: Arc<Mutex<TimerSlot>>,
}

impl DiagramHandle {
    pub fn new(backend: BackendType) -> Self {
        Self {
            player: Arc::new(Mutex::new(DiagramPlayer::new(backend))),
            timer: Arc::new(Mutex::new(TimerSlot::default())),
        }
    }

    fn player(&self) -> MutexGuard<'_, DiagramPlayer> {
        self.player.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> DiagramSnapshot {
        self.player().snapshot()
    }

    pub fn next(&self) -> DiagramSnapshot {
        self.player().next();
        self.reschedule();
        self.snapshot()
    }

    pub fn reset(&self) -> DiagramSnapshot {
        self.player().reset();
        self.reschedule();
        self.snapshot()
    }

    pub fn set_autoplay(&self, enabled: bool) -> DiagramSnapshot {
        self.player().set_autoplay(enabled);
        self.reschedule();
        self.snapshot()
    }

    pub fn set_backend(&self, backend: BackendType) -> DiagramSnapshot {
        self.player().set_backend(backend);
        self.reschedule();
        self.snapshot()
    }

    #[cfg(test)]
    pub fn has_pending_timer(&self) -> bool {
        self.timer
            .lock()
            .map(|slot| slot.is_armed())
            .unwrap_or(false)
    }

    /// Cancela el temporizador vigente y, si procede, programa el siguiente.
    /// El lock del temporizador se toma antes que el del reproductor para que
    /// leer la etapa pendiente y armarla sea atómico.
    fn reschedule(&self) {
        let mut slot = self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let pending = self.player().pending();
        match pending {
            Some(step) => {
                let handle = self.clone();
                slot.arm(step.delay, move || {
                    let advanced = handle.player().fire(step.epoch);
                    if advanced {
                        handle.reschedule();
                    }
                });
            }
            None => {
                slot.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn sequences_have_expected_lengths() {
        assert_eq!(BackendType::Local.sequence().len(), 8);
        assert_eq!(BackendType::Public.sequence().len(), 14);
        assert_eq!(BackendType::Operator.sequence().len(), 14);
        assert!(!BackendType::Local
            .sequence()
            .contains(&AnimationState::Sanitization));
    }

    #[test]
    fn next_wraps_modulo_sequence_length() {
        for backend in [BackendType::Local, BackendType::Private] {
            let mut player = DiagramPlayer::new(backend);
            let len = player.sequence().len();
            for step in 1..=(len * 2 + 3) {
                let previous = player.index();
                player.next();
                assert_eq!(player.index(), (previous + 1) % len, "paso {step}");
            }
        }
    }

    #[test]
    fn last_stage_wraps_to_idle() {
        let mut player = DiagramPlayer::new(BackendType::Local);
        for _ in 0..7 {
            player.next();
        }
        assert_eq!(player.state(), AnimationState::Delivery);
        assert_eq!(player.next(), AnimationState::Idle);
    }

    #[test]
    fn switching_backend_resets_and_stops_autoplay() {
        let mut player = DiagramPlayer::new(BackendType::Public);
        player.set_autoplay(true);
        player.next();
        player.next();
        player.set_backend(BackendType::Local);
        assert_eq!(player.index(), 0);
        assert_eq!(player.state(), AnimationState::Idle);
        assert!(!player.autoplay());
        assert!(player.pending().is_none());
    }

    #[test]
    fn stale_epoch_does_not_advance() {
        let mut player = DiagramPlayer::new(BackendType::Public);
        player.set_autoplay(true);
        let scheduled = player.pending().unwrap();
        player.next();
        assert!(!player.fire(scheduled.epoch));
        assert_eq!(player.index(), 1);

        let fresh = player.pending().unwrap();
        assert!(player.fire(fresh.epoch));
        assert_eq!(player.index(), 2);
    }

    #[test]
    fn slow_stages_wait_longer() {
        assert_eq!(step_delay(AnimationState::Ingestion), Duration::from_millis(2500));
        assert_eq!(step_delay(AnimationState::CloudDecryption), Duration::from_millis(2500));
        assert_eq!(step_delay(AnimationState::Querying), Duration::from_millis(2000));
    }

    #[test]
    fn every_stage_has_details() {
        for state in BackendType::Public.sequence() {
            assert_ne!(step_details(*state), WAITING_DETAILS);
        }
    }

    #[test]
    fn backend_pref_round_trips_and_defaults() {
        let store = MemoryStore::default();
        assert_eq!(load_backend_pref(&store), BackendType::Public);

        save_backend_pref(&store, BackendType::Local).unwrap();
        assert_eq!(load_backend_pref(&store), BackendType::Local);

        store.set(BACKEND_PREF_KEY, "MAINFRAME").unwrap();
        assert_eq!(load_backend_pref(&store), BackendType::Public);
    }

    #[tokio::test(start_paused = true)]
    async fn autoplay_advances_once_per_delay() {
        let handle = DiagramHandle::new(BackendType::Public);
        handle.set_autoplay(true);
        assert!(handle.has_pending_timer());

        // IDLE dura 2000 ms.
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(handle.snapshot().state, AnimationState::Ingestion);

        // INGESTION dura 2500 ms: a los 2100 ms todavía no avanza.
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(handle.snapshot().state, AnimationState::Ingestion);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(handle.snapshot().state, AnimationState::ProcessingLocal);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_step_reschedules_without_double_fire() {
        let handle = DiagramHandle::new(BackendType::Public);
        handle.set_autoplay(true);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        handle.next(); // IDLE -> INGESTION, el temporizador de IDLE se descarta
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(handle.snapshot().index, 1);

        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(handle.snapshot().index, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_autoplay_cancels_pending_timer() {
        let handle = DiagramHandle::new(BackendType::Local);
        handle.set_autoplay(true);
        handle.set_autoplay(false);
        assert!(!handle.has_pending_timer());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(handle.snapshot().index, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_stops_playback() {
        let handle = DiagramHandle::new(BackendType::Public);
        handle.set_autoplay(true);
        tokio::time::sleep(Duration::from_millis(2100)).await;
        let snap = handle.reset();
        assert_eq!(snap.index, 0);
        assert!(!snap.autoplay);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(handle.snapshot().index, 0);
    }
}
