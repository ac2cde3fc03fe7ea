//! Modelos de dominio del demo (ficheros, chunks, casos, auditoría, modelos de IA).
//!
//! Todos son registros planos y serializables; el estado mutable vive en los
//! controladores (`dashboard`, `model_pool`, `chat`), nunca en estos tipos.

use serde::{Deserialize, Serialize};

/// Rol de un mensaje dentro de una conversación.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Un turno de la conversación simulada.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
        }
    }
}

/// Entrada del catálogo de agentes (sólo lectura).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub category: String,
    pub description: String,
    pub icon: String,
    pub stats: String,
    pub is_hot: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Docx,
    Pptx,
    Xlsx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    Parsing,
    Auditing,
    Published,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionLevel {
    Public,
    Department,
    Confidential,
}

/// Documento de la base de conocimiento con sus metadatos de gobierno.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedFile {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub size: String,
    pub uploaded_at: String,
    pub status: FileStatus,
    pub department: String,
    pub hits: u32,
    /// Puntuación de calidad 0-100.
    pub quality: u8,
    pub permission_level: PermissionLevel,
    pub owner: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkStatus {
    Active,
    Disabled,
}

impl ChunkStatus {
    pub fn toggled(self) -> Self {
        match self {
            Self::Active => Self::Disabled,
            Self::Disabled => Self::Active,
        }
    }
}

/// Trozo de texto indexado que puede ser recuperado.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeChunk {
    pub id: String,
    pub content: String,
    pub token_count: u32,
    pub vector_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    pub status: ChunkStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    ZeroResult,
    LowScore,
    Hallucination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    Pending,
    Resolved,
}

/// Interacción marcada como respuesta insatisfactoria.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BadCase {
    pub id: String,
    pub query: String,
    pub user: String,
    pub time: String,
    pub issue_type: IssueType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_doc: Option<String>,
    pub status: CaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_response: Option<String>,
    pub retrieved_chunks: Vec<KnowledgeChunk>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Blocked,
    Allowed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    pub id: String,
    pub time: String,
    pub user: String,
    pub action: String,
    pub detail: String,
    pub status: AuditStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Payload completo, sólo visible en la traza del log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

/// Segmento de la barra de riesgos del panel de auditoría.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityStat {
    #[serde(rename = "type")]
    pub risk_type: String,
    pub count: u32,
    pub percentage: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    Editor,
    Viewer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    Active,
    Locked,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemUser {
    pub id: String,
    pub name: String,
    pub role: UserRole,
    pub department: String,
    pub last_login: String,
    pub status: UserStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricGroup {
    Assets,
    Usage,
}

/// Tarjeta de métrica del resumen; sólo algunas admiten desglose.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricCard {
    pub id: String,
    pub group: MetricGroup,
    pub label: String,
    pub value: String,
    pub unit: String,
    pub change: String,
    pub trend_up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    pub has_drill_down: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelKind {
    Llm,
    Embedding,
    Rerank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelStatus {
    Loaded,
    Unloaded,
    Loading,
}

/// Modelo desplegable en el pool de VRAM.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AIModel {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub kind: ModelKind,
    pub parameters: String,
    pub context_window: String,
    /// GB de VRAM que ocupa una vez cargado.
    pub vram_usage: u32,
    pub status: ModelStatus,
    pub description: String,
    pub tags: Vec<String>,
}
