//! Controlador del panel de administración.
//!
//! Una pestaña activa más una vista de desglose (`DrillDown`). Cada variante
//! lleva su propio contexto de selección, así que no puede existir, por
//! ejemplo, un editor de chunks sin chunk. Volver a `None` o cambiar de
//! pestaña descarta todo ese contexto.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    fixtures::MockStore,
    models::{
        AuditLog, BadCase, CaseStatus, ChunkStatus, EnhancedFile, FileStatus, FileType,
        KnowledgeChunk, MetricCard, PermissionLevel, SecurityStat,
    },
};

/// Sustituye al nombre (sin extensión) de un documento no visible.
pub const REDACTED_STEM: &str = "********_敏感数据";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tab {
    #[default]
    Overview,
    Knowledge,
    Models,
    Quality,
    Audit,
    Users,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminRole {
    #[default]
    ItAdmin,
    ContentAdmin,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(
    tag = "view",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum DrillDown {
    #[default]
    None,
    MetricDetail { metric_id: String },
    FileDetail { file_id: String },
    ChunkEditor { file_id: String, chunk: KnowledgeChunk },
    BadCaseDiagnose { case: BadCase },
    CaseFix { case: BadCase },
    RiskTypeDetail { risk_type: String },
    LogTrace { log: AuditLog },
}

impl DrillDown {
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::MetricDetail { .. } => "METRIC_DETAIL",
            Self::FileDetail { .. } => "FILE_DETAIL",
            Self::ChunkEditor { .. } => "CHUNK_EDITOR",
            Self::BadCaseDiagnose { .. } => "BAD_CASE_DIAGNOSE",
            Self::CaseFix { .. } => "CASE_FIX",
            Self::RiskTypeDetail { .. } => "RISK_TYPE_DETAIL",
            Self::LogTrace { .. } => "LOG_TRACE",
        }
    }

    /// Vista a la que lleva "volver/cerrar".
    pub fn parent(&self) -> DrillDown {
        match self {
            Self::ChunkEditor { file_id, .. } => Self::FileDetail {
                file_id: file_id.clone(),
            },
            Self::CaseFix { case } => Self::BadCaseDiagnose { case: case.clone() },
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DashboardError {
    #[error("Acción '{action}' no permitida desde {view} en la pestaña {tab:?}")]
    InvalidTransition {
        action: &'static str,
        view: &'static str,
        tab: Tab,
    },
    #[error("Métrica desconocida: {0}")]
    UnknownMetric(String),
    #[error("La métrica {0} no admite desglose")]
    NoDrillDown(String),
    #[error("Documento desconocido: {0}")]
    UnknownFile(String),
    #[error("Chunk desconocido: {0}")]
    UnknownChunk(String),
    #[error("内容已加密，无权预览切片")]
    ContentRedacted,
    #[error("Caso desconocido: {0}")]
    UnknownBadCase(String),
    #[error("Tipo de riesgo desconocido: {0}")]
    UnknownRiskType(String),
    #[error("Log desconocido: {0}")]
    UnknownLog(String),
    #[error("No hay ficheros seleccionados")]
    EmptySelection,
    #[error("La etiqueta no puede estar vacía")]
    EmptyTag,
}

impl DashboardError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::UnknownMetric(_)
                | Self::UnknownFile(_)
                | Self::UnknownChunk(_)
                | Self::UnknownBadCase(_)
                | Self::UnknownRiskType(_)
                | Self::UnknownLog(_)
        )
    }
}

/// Qué puede ver un rol de un documento concreto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Visibility {
    pub display_name: String,
    pub content_visible: bool,
}

/// Única regla de redacción: IT_ADMIN no ve documentos CONFIDENTIAL.
/// Es un filtro de presentación; el almacén no se modifica.
pub fn can_view(file: &EnhancedFile, role: AdminRole) -> Visibility {
    let restricted =
        role == AdminRole::ItAdmin && file.permission_level == PermissionLevel::Confidential;
    if !restricted {
        return Visibility {
            display_name: file.name.clone(),
            content_visible: true,
        };
    }
    let display_name = match file.name.find('.') {
        Some(dot) => format!("{REDACTED_STEM}{}", &file.name[dot..]),
        None => REDACTED_STEM.to_string(),
    };
    Visibility {
        display_name,
        content_visible: false,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRow {
    pub id: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub size: String,
    pub uploaded_at: String,
    pub status: FileStatus,
    pub department: String,
    pub hits: u32,
    pub quality: u8,
    pub permission_level: PermissionLevel,
    pub owner: String,
    pub selected: bool,
}

/// Ficha de un documento tal como la ve el rol actual. `chunks` es `None`
/// cuando el listado está redactado.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDetail {
    pub id: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub size: String,
    pub uploaded_at: String,
    pub tags: Vec<String>,
    pub chunks: Option<Vec<KnowledgeChunk>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricDetail {
    pub metric: MetricCard,
    pub title: &'static str,
    pub series: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BulkActionKind {
    Tag,
    Delete,
    Reparse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkReport {
    pub affected: usize,
    pub message: String,
}

/// Selección múltiple de ficheros de la pestaña de conocimiento.
#[derive(Debug, Clone, Default)]
pub struct FileSelection {
    ids: BTreeSet<String>,
}

impl FileSelection {
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.ids.iter().cloned().collect()
    }

    pub fn toggle(&mut self, id: &str) {
        if !self.ids.remove(id) {
            self.ids.insert(id.to_string());
        }
    }

    /// Selecciona todo salvo que ya esté todo seleccionado, en cuyo caso limpia.
    pub fn toggle_all<'a>(&mut self, all: impl IntoIterator<Item = &'a str>) {
        let all: BTreeSet<String> = all.into_iter().map(str::to_string).collect();
        if self.ids == all {
            self.ids.clear();
        } else {
            self.ids = all;
        }
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub tab: Tab,
    pub role: AdminRole,
    pub drill_down: DrillDown,
    pub selected_files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DashboardController {
    store: Arc<MockStore>,
    tab: Tab,
    role: AdminRole,
    view: DrillDown,
    selection: FileSelection,
    chunk_status: HashMap<String, ChunkStatus>,
    resolved_cases: HashSet<String>,
}

impl DashboardController {
    pub fn new(store: Arc<MockStore>) -> Self {
        Self {
            store,
            tab: Tab::default(),
            role: AdminRole::default(),
            view: DrillDown::None,
            selection: FileSelection::default(),
            chunk_status: HashMap::new(),
            resolved_cases: HashSet::new(),
        }
    }

    #[cfg(test)]
    pub fn tab(&self) -> Tab {
        self.tab
    }

    #[cfg(test)]
    pub fn role(&self) -> AdminRole {
        self.role
    }

    #[cfg(test)]
    pub fn view(&self) -> &DrillDown {
        &self.view
    }

    #[cfg(test)]
    pub fn selection(&self) -> &FileSelection {
        &self.selection
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot {
            tab: self.tab,
            role: self.role,
            drill_down: self.view.clone(),
            selected_files: self.selection.ids(),
        }
    }

    // ---------------------------------------------------------------------
    // NAVEGACIÓN
    // ---------------------------------------------------------------------

    pub fn select_tab(&mut self, tab: Tab) {
        debug!("Pestaña {:?} -> {:?}", self.tab, tab);
        self.tab = tab;
        self.view = DrillDown::None;
    }

    /// Un editor de chunks abierto con un rol que ya no puede ver el documento
    /// se cierra y queda la ficha (redactada).
    pub fn set_role(&mut self, role: AdminRole) {
        self.role = role;
        if let DrillDown::ChunkEditor { file_id, .. } = &self.view {
            let visible = self
                .store
                .file(file_id)
                .is_some_and(|file| can_view(file, role).content_visible);
            if !visible {
                debug!("Editor de chunks cerrado tras cambiar a {role:?}");
                self.view = self.view.parent();
            }
        }
    }

    /// Las entradas de nivel 2 sólo existen desde el contenido base de su pestaña.
    fn require_base(&self, tab: Tab, action: &'static str) -> Result<(), DashboardError> {
        if self.tab == tab && self.view == DrillDown::None {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn invalid(&self, action: &'static str) -> DashboardError {
        DashboardError::InvalidTransition {
            action,
            view: self.view.name(),
            tab: self.tab,
        }
    }

    pub fn open_metric(&mut self, metric_id: &str) -> Result<&DrillDown, DashboardError> {
        self.require_base(Tab::Overview, "open_metric")?;
        let metric = self
            .store
            .metric(metric_id)
            .ok_or_else(|| DashboardError::UnknownMetric(metric_id.to_string()))?;
        if !metric.has_drill_down {
            return Err(DashboardError::NoDrillDown(metric_id.to_string()));
        }
        self.view = DrillDown::MetricDetail {
            metric_id: metric.id.clone(),
        };
        Ok(&self.view)
    }

    pub fn open_file(&mut self, file_id: &str) -> Result<&DrillDown, DashboardError> {
        self.require_base(Tab::Knowledge, "open_file")?;
        let file = self
            .store
            .file(file_id)
            .ok_or_else(|| DashboardError::UnknownFile(file_id.to_string()))?;
        self.view = DrillDown::FileDetail {
            file_id: file.id.clone(),
        };
        Ok(&self.view)
    }

    pub fn open_chunk(&mut self, chunk_id: &str) -> Result<&DrillDown, DashboardError> {
        let DrillDown::FileDetail { file_id } = &self.view else {
            return Err(self.invalid("open_chunk"));
        };
        let file_id = file_id.clone();
        let detail = self.file_detail(&file_id)?;
        let chunks = detail.chunks.ok_or(DashboardError::ContentRedacted)?;
        let chunk = chunks
            .into_iter()
            .find(|c| c.id == chunk_id)
            .ok_or_else(|| DashboardError::UnknownChunk(chunk_id.to_string()))?;
        self.view = DrillDown::ChunkEditor { file_id, chunk };
        Ok(&self.view)
    }

    /// Guardar en el editor es simulado: vuelve a la ficha del documento.
    pub fn save_chunk(&mut self) -> Result<&DrillDown, DashboardError> {
        let DrillDown::ChunkEditor { chunk, .. } = &self.view else {
            return Err(self.invalid("save_chunk"));
        };
        info!("Chunk {} actualizado y reindexado (simulado)", chunk.id);
        self.view = self.view.parent();
        Ok(&self.view)
    }

    /// Sólo desde la ficha o el editor de un documento cuyo contenido es visible.
    pub fn toggle_chunk_status(&mut self, chunk_id: &str) -> Result<ChunkStatus, DashboardError> {
        let file_id = match &self.view {
            DrillDown::FileDetail { file_id } | DrillDown::ChunkEditor { file_id, .. } => {
                file_id.clone()
            }
            _ => return Err(self.invalid("toggle_chunk_status")),
        };
        let chunks = self
            .file_detail(&file_id)?
            .chunks
            .ok_or(DashboardError::ContentRedacted)?;
        let current = chunks
            .iter()
            .find(|c| c.id == chunk_id)
            .map(|c| c.status)
            .ok_or_else(|| DashboardError::UnknownChunk(chunk_id.to_string()))?;
        let next = current.toggled();
        self.chunk_status.insert(chunk_id.to_string(), next);
        if let DrillDown::ChunkEditor { chunk, .. } = &mut self.view {
            if chunk.id == chunk_id {
                chunk.status = next;
            }
        }
        Ok(next)
    }

    pub fn open_bad_case(&mut self, case_id: &str) -> Result<&DrillDown, DashboardError> {
        self.require_base(Tab::Quality, "open_bad_case")?;
        let case = self
            .bad_case(case_id)
            .ok_or_else(|| DashboardError::UnknownBadCase(case_id.to_string()))?;
        self.view = DrillDown::BadCaseDiagnose { case };
        Ok(&self.view)
    }

    /// Abre el modal de intervención sobre el diagnóstico actual.
    pub fn start_case_fix(&mut self) -> Result<&DrillDown, DashboardError> {
        let DrillDown::BadCaseDiagnose { case } = &self.view else {
            return Err(self.invalid("start_case_fix"));
        };
        self.view = DrillDown::CaseFix { case: case.clone() };
        Ok(&self.view)
    }

    pub fn cancel_case_fix(&mut self) -> Result<&DrillDown, DashboardError> {
        if !matches!(self.view, DrillDown::CaseFix { .. }) {
            return Err(self.invalid("cancel_case_fix"));
        }
        self.view = self.view.parent();
        Ok(&self.view)
    }

    /// Envía la corrección: el caso queda resuelto y se vuelve al listado.
    pub fn submit_case_fix(&mut self) -> Result<BadCase, DashboardError> {
        let DrillDown::CaseFix { case } = &self.view else {
            return Err(self.invalid("submit_case_fix"));
        };
        let mut case = case.clone();
        case.status = CaseStatus::Resolved;
        self.resolved_cases.insert(case.id.clone());
        info!("Corrección enviada para el caso {}", case.id);
        self.view = DrillDown::None;
        Ok(case)
    }

    pub fn open_risk_type(&mut self, risk_type: &str) -> Result<&DrillDown, DashboardError> {
        self.require_base(Tab::Audit, "open_risk_type")?;
        let stat = self
            .store
            .security_stat(risk_type)
            .ok_or_else(|| DashboardError::UnknownRiskType(risk_type.to_string()))?;
        self.view = DrillDown::RiskTypeDetail {
            risk_type: stat.risk_type.clone(),
        };
        Ok(&self.view)
    }

    pub fn open_log(&mut self, log_id: &str) -> Result<&DrillDown, DashboardError> {
        self.require_base(Tab::Audit, "open_log")?;
        let log = self
            .store
            .audit_log(log_id)
            .cloned()
            .ok_or_else(|| DashboardError::UnknownLog(log_id.to_string()))?;
        self.view = DrillDown::LogTrace { log };
        Ok(&self.view)
    }

    /// Vuelve a la vista padre (ver `DrillDown::parent`).
    pub fn back(&mut self) -> &DrillDown {
        self.view = self.view.parent();
        &self.view
    }

    // ---------------------------------------------------------------------
    // LECTURAS FILTRADAS
    // ---------------------------------------------------------------------

    fn chunks_with_overrides(&self, file_id: &str) -> Vec<KnowledgeChunk> {
        self.store
            .chunks_for(file_id)
            .iter()
            .cloned()
            .map(|mut chunk| {
                if let Some(status) = self.chunk_status.get(&chunk.id) {
                    chunk.status = *status;
                }
                chunk
            })
            .collect()
    }

    pub fn file_rows(&self) -> Vec<FileRow> {
        self.store
            .files
            .iter()
            .map(|file| FileRow {
                id: file.id.clone(),
                display_name: can_view(file, self.role).display_name,
                file_type: file.file_type,
                size: file.size.clone(),
                uploaded_at: file.uploaded_at.clone(),
                status: file.status,
                department: file.department.clone(),
                hits: file.hits,
                quality: file.quality,
                permission_level: file.permission_level,
                owner: file.owner.clone(),
                selected: self.selection.contains(&file.id),
            })
            .collect()
    }

    pub fn file_detail(&self, file_id: &str) -> Result<FileDetail, DashboardError> {
        let file = self
            .store
            .file(file_id)
            .ok_or_else(|| DashboardError::UnknownFile(file_id.to_string()))?;
        let visibility = can_view(file, self.role);
        Ok(FileDetail {
            id: file.id.clone(),
            display_name: visibility.display_name,
            file_type: file.file_type,
            size: file.size.clone(),
            uploaded_at: file.uploaded_at.clone(),
            tags: file.tags.clone(),
            chunks: visibility
                .content_visible
                .then(|| self.chunks_with_overrides(file_id)),
        })
    }

    pub fn metric_detail(&self, metric_id: &str) -> Result<MetricDetail, DashboardError> {
        let metric = self
            .store
            .metric(metric_id)
            .ok_or_else(|| DashboardError::UnknownMetric(metric_id.to_string()))?;
        let title = if metric.id == "parsingRate" {
            "解析成功率趋势分析"
        } else {
            "知识老化分布"
        };
        Ok(MetricDetail {
            metric: metric.clone(),
            title,
            series: vec![45, 60, 75, 50, 80, 95, 85, 70, 90, 100, 95, 98],
        })
    }

    pub fn bad_case(&self, case_id: &str) -> Option<BadCase> {
        self.store.bad_case(case_id).cloned().map(|mut case| {
            if self.resolved_cases.contains(&case.id) {
                case.status = CaseStatus::Resolved;
            }
            case
        })
    }

    pub fn bad_cases(&self) -> Vec<BadCase> {
        self.store
            .bad_cases
            .iter()
            .filter_map(|c| self.bad_case(&c.id))
            .collect()
    }

    pub fn risk_detail(&self, risk_type: &str) -> Result<SecurityStat, DashboardError> {
        self.store
            .security_stat(risk_type)
            .cloned()
            .ok_or_else(|| DashboardError::UnknownRiskType(risk_type.to_string()))
    }

    // ---------------------------------------------------------------------
    // SELECCIÓN MÚLTIPLE
    // ---------------------------------------------------------------------

    pub fn toggle_file_selection(&mut self, file_id: &str) -> Result<&FileSelection, DashboardError> {
        if self.store.file(file_id).is_none() {
            return Err(DashboardError::UnknownFile(file_id.to_string()));
        }
        self.selection.toggle(file_id);
        Ok(&self.selection)
    }

    pub fn toggle_all_files(&mut self) -> &FileSelection {
        self.selection
            .toggle_all(self.store.files.iter().map(|f| f.id.as_str()));
        &self.selection
    }

    /// Acción masiva simulada: informa cuántos ficheros toca y limpia la selección.
    pub fn bulk_action(
        &mut self,
        kind: BulkActionKind,
        tag: Option<&str>,
    ) -> Result<BulkReport, DashboardError> {
        if self.selection.is_empty() {
            return Err(DashboardError::EmptySelection);
        }
        let affected = self.selection.len();
        let message = match kind {
            BulkActionKind::Tag => {
                let tag = tag.map(str::trim).filter(|t| !t.is_empty());
                let tag = tag.ok_or(DashboardError::EmptyTag)?;
                debug!("Etiqueta '{tag}' aplicada a {affected} ficheros (simulado)");
                format!("成功为 {affected} 个文件添加标签。")
            }
            BulkActionKind::Delete => "模拟：已删除".to_string(),
            BulkActionKind::Reparse => "模拟：已提交重解析任务".to_string(),
        };
        self.selection.clear();
        Ok(BulkReport { affected, message })
    }
}
