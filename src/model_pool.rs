//! Pool de modelos con presupuesto de VRAM.
//!
//! La carga se acepta sólo si `usado + requerido <= capacidad`; el modelo pasa
//! por `LOADING` durante un retardo fijo y mientras tanto el resto de
//! interruptores queda bloqueado. La descarga es inmediata.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    models::{AIModel, ModelStatus},
    timer::TimerSlot,
};

pub const DEFAULT_POOL_CAPACITY_GB: u32 = 128;
pub const DEFAULT_LOAD_DELAY: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("显存不足！当前剩余 {free}GB，需要 {required}GB。请先卸载其他模型。")]
    InsufficientVram { free: u32, required: u32 },
    #[error("模型 {loading} 正在加载中，请稍候。")]
    LoadInProgress { loading: String },
    #[error("Modelo desconocido: {0}")]
    UnknownModel(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToggleOutcome {
    Unloaded { model_id: String },
    LoadStarted { model_id: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSnapshot {
    pub models: Vec<AIModel>,
    pub capacity_gb: u32,
    pub used_gb: u32,
    pub used_percent: u32,
    pub loading_model_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelPool {
    models: Vec<AIModel>,
    capacity_gb: u32,
    loading: Option<String>,
}

impl ModelPool {
    pub fn new(models: Vec<AIModel>, capacity_gb: u32) -> Self {
        Self {
            models,
            capacity_gb,
            loading: None,
        }
    }

    #[cfg(test)]
    pub fn model(&self, id: &str) -> Option<&AIModel> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn used_vram(&self) -> u32 {
        self.models
            .iter()
            .filter(|m| m.status == ModelStatus::Loaded)
            .map(|m| m.vram_usage)
            .sum()
    }

    pub fn loading_model(&self) -> Option<&str> {
        self.loading.as_deref()
    }

    /// Carga o descarga un modelo. Un rechazo no modifica el pool.
    pub fn toggle(&mut self, id: &str) -> Result<ToggleOutcome, PoolError> {
        if let Some(loading) = &self.loading {
            return Err(PoolError::LoadInProgress {
                loading: loading.clone(),
            });
        }

        let used = self.used_vram();
        let capacity = self.capacity_gb;
        let model = self
            .models
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| PoolError::UnknownModel(id.to_string()))?;

        match model.status {
            ModelStatus::Loaded => {
                model.status = ModelStatus::Unloaded;
                info!("Modelo {} descargado", model.name);
                Ok(ToggleOutcome::Unloaded {
                    model_id: model.id.clone(),
                })
            }
            ModelStatus::Unloaded | ModelStatus::Loading => {
                if used + model.vram_usage > capacity {
                    warn!(
                        "Carga de {} rechazada: {}GB usados + {}GB > {}GB",
                        model.name, used, model.vram_usage, capacity
                    );
                    return Err(PoolError::InsufficientVram {
                        free: capacity.saturating_sub(used),
                        required: model.vram_usage,
                    });
                }
                model.status = ModelStatus::Loading;
                self.loading = Some(model.id.clone());
                info!("Cargando modelo {} ({}GB)", model.name, model.vram_usage);
                Ok(ToggleOutcome::LoadStarted {
                    model_id: model.id.clone(),
                })
            }
        }
    }

    /// Termina la carga en curso. Devuelve `false` si `id` no es el modelo
    /// que se estaba cargando.
    pub fn complete_load(&mut self, id: &str) -> bool {
        if self.loading.as_deref() != Some(id) {
            return false;
        }
        self.loading = None;
        if let Some(model) = self.models.iter_mut().find(|m| m.id == id) {
            model.status = ModelStatus::Loaded;
            info!("Modelo {} cargado", model.name);
        }
        true
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let used = self.used_vram();
        let used_percent = if self.capacity_gb == 0 {
            0
        } else {
            ((used as f64 / self.capacity_gb as f64) * 100.0).round() as u32
        };
        PoolSnapshot {
            models: self.models.clone(),
            capacity_gb: self.capacity_gb,
            used_gb: used,
            used_percent,
            loading_model_id: self.loading.clone(),
        }
    }
}

/// Pool compartido con el temporizador que simula la carga.
#[derive(Clone)]
pub struct ModelPoolHandle {
    pool: Arc<Mutex<ModelPool>>,
    timer: Arc<Mutex<TimerSlot>>,
    load_delay: Duration,
}

impl ModelPoolHandle {
    pub fn new(pool: ModelPool, load_delay: Duration) -> Self {
        Self {
            pool: Arc::new(Mutex::new(pool)),
            timer: Arc::new(Mutex::new(TimerSlot::default())),
            load_delay,
        }
    }

    fn pool(&self) -> MutexGuard<'_, ModelPool> {
        self.pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        self.pool().snapshot()
    }

    pub fn is_loading(&self) -> bool {
        self.pool().loading_model().is_some()
    }

    pub fn toggle(&self, id: &str) -> Result<ToggleOutcome, PoolError> {
        let outcome = self.pool().toggle(id)?;
        if let ToggleOutcome::LoadStarted { model_id } = &outcome {
            let pool = self.pool.clone();
            let model_id = model_id.clone();
            let mut slot = self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            slot.arm(self.load_delay, move || {
                let mut pool = pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                pool.complete_load(&model_id);
            });
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fixtures::MockStore, models::ModelKind};

    fn model(id: &str, vram: u32, status: ModelStatus) -> AIModel {
        AIModel {
            id: id.into(),
            name: format!("model-{id}"),
            version: "v1".into(),
            kind: ModelKind::Llm,
            parameters: "7B".into(),
            context_window: "8k".into(),
            vram_usage: vram,
            status,
            description: String::new(),
            tags: Vec::new(),
        }
    }

    fn scenario_pool() -> ModelPool {
        ModelPool::new(
            vec![
                model("a", 48, ModelStatus::Loaded),
                model("b", 52, ModelStatus::Loaded),
                model("big", 35, ModelStatus::Unloaded),
                model("small", 20, ModelStatus::Unloaded),
            ],
            128,
        )
    }

    #[test]
    fn load_over_capacity_is_rejected_without_mutation() {
        let mut pool = scenario_pool();
        let before = pool.snapshot().models;

        let err = pool.toggle("big").unwrap_err();
        assert_eq!(
            err,
            PoolError::InsufficientVram {
                free: 28,
                required: 35
            }
        );
        assert_eq!(pool.snapshot().models, before);
        assert!(pool.loading_model().is_none());
    }

    #[test]
    fn load_within_capacity_goes_through_loading() {
        let mut pool = scenario_pool();
        let outcome = pool.toggle("small").unwrap();
        assert_eq!(
            outcome,
            ToggleOutcome::LoadStarted {
                model_id: "small".into()
            }
        );
        assert_eq!(pool.model("small").unwrap().status, ModelStatus::Loading);
        assert_eq!(pool.used_vram(), 100);

        assert!(pool.complete_load("small"));
        assert_eq!(pool.model("small").unwrap().status, ModelStatus::Loaded);
        assert_eq!(pool.used_vram(), 120);
    }

    #[test]
    fn every_toggle_is_blocked_while_loading() {
        let mut pool = scenario_pool();
        pool.toggle("small").unwrap();
        assert!(matches!(
            pool.toggle("a"),
            Err(PoolError::LoadInProgress { .. })
        ));
        assert_eq!(pool.model("a").unwrap().status, ModelStatus::Loaded);
    }

    #[test]
    fn unload_is_immediate() {
        let mut pool = scenario_pool();
        let outcome = pool.toggle("a").unwrap();
        assert_eq!(outcome, ToggleOutcome::Unloaded { model_id: "a".into() });
        assert_eq!(pool.used_vram(), 52);
        // Tras liberar 48GB el modelo grande ya cabe.
        assert!(pool.toggle("big").is_ok());
    }

    #[test]
    fn complete_load_ignores_other_models() {
        let mut pool = scenario_pool();
        assert!(!pool.complete_load("small"));
        pool.toggle("small").unwrap();
        assert!(!pool.complete_load("big"));
        assert_eq!(pool.loading_model(), Some("small"));
    }

    #[test]
    fn unknown_model_is_an_error() {
        let mut pool = scenario_pool();
        assert_eq!(
            pool.toggle("ghost"),
            Err(PoolError::UnknownModel("ghost".into()))
        );
    }

    #[test]
    fn snapshot_reports_rounded_usage() {
        let pool = ModelPool::new(MockStore::seed().models, DEFAULT_POOL_CAPACITY_GB);
        let snap = pool.snapshot();
        assert_eq!(snap.used_gb, 54);
        assert_eq!(snap.used_percent, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn handle_finishes_load_after_delay() {
        let handle = ModelPoolHandle::new(scenario_pool(), DEFAULT_LOAD_DELAY);
        handle.toggle("small").unwrap();
        assert!(handle.is_loading());

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert!(handle.is_loading());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let snap = handle.snapshot();
        assert!(snap.loading_model_id.is_none());
        assert_eq!(snap.used_gb, 120);
    }
}
