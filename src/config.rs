//! Carga y gestión de configuración de la aplicación (servidor, LLM y demo).

use std::{env, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{anyhow, Context, Result};

use crate::model_pool::{DEFAULT_LOAD_DELAY, DEFAULT_POOL_CAPACITY_GB};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }

    /// Variable de entorno específica del proveedor para la API key.
    fn api_key_var(&self) -> Option<&'static str> {
        match self {
            Self::OpenAI => Some("OPENAI_API_KEY"),
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::Ollama => None,
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub open_browser: bool,
    pub data_dir: PathBuf,

    pub llm_provider: LlmProvider,
    pub llm_chat_model: String,
    pub llm_api_key: Option<String>,

    pub vram_capacity_gb: u32,
    pub chat_retrieval_delay: Duration,
    pub model_load_delay: Duration,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());
        let open_browser = parse_var("OPEN_BROWSER", true)?;

        let data_dir = match env::var("DATA_DIR") {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => dirs::data_local_dir()
                .ok_or_else(|| anyhow!("No se pudo determinar el directorio de datos local"))?
                .join("omnicube-demo"),
        };

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "gemini".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;
        let llm_chat_model = env::var("LLM_CHAT_MODEL").unwrap_or_default();

        let llm_api_key = resolve_api_key(
            env::var("API_KEY").ok(),
            llm_provider.api_key_var().and_then(|var| env::var(var).ok()),
        );

        let vram_capacity_gb = parse_var("VRAM_CAPACITY_GB", DEFAULT_POOL_CAPACITY_GB)?;
        let chat_retrieval_delay =
            Duration::from_millis(parse_var("CHAT_RETRIEVAL_DELAY_MS", 1500u64)?);
        let model_load_delay = Duration::from_millis(parse_var(
            "MODEL_LOAD_DELAY_MS",
            DEFAULT_LOAD_DELAY.as_millis() as u64,
        )?);

        Ok(Self {
            server_addr,
            open_browser,
            data_dir,
            llm_provider,
            llm_chat_model,
            llm_api_key,
            vram_capacity_gb,
            chat_retrieval_delay,
            model_load_delay,
        })
    }
}

/// API_KEY tiene prioridad; si está vacía se usa la variable del proveedor.
fn resolve_api_key(generic: Option<String>, provider: Option<String>) -> Option<String> {
    let non_blank = |key: &String| !key.trim().is_empty();
    generic
        .filter(non_blank)
        .or_else(|| provider.filter(non_blank))
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("Valor inválido para {name}: {raw}")),
        _ => Ok(default),
    }
}
