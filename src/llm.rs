//! Abstracción sobre Rig para el colaborador de generación de texto.
//! Gemini es el proveedor por defecto; OpenAI también está soportado.
//!
//! El chat nunca ve un error: sin API key se devuelve el texto del modo demo,
//! y cualquier fallo del proveedor se convierte en un mensaje de disculpa fijo.

use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use rig::completion::Prompt;
use tracing::error;

use crate::config::{AppConfig, LlmProvider};

pub const DEMO_MODE_REPLY: &str =
    "演示模式：未检测到 API Key。在实际部署中，系统会在此处将检索到的上下文发送至云端大模型进行推理。";
pub const CONNECTION_FAILED_REPLY: &str = "连接云端大模型失败。请检查网络设置或 API Key 配置。";
pub const EMPTY_REPLY: &str = "未能生成回答。";

/// Punto de inyección del chat: recibe la pregunta y el contexto recuperado.
pub trait TextGenerator: Send + Sync {
    fn generate_rag_response<'a>(&'a self, query: &'a str, context: &'a str) -> BoxFuture<'a, String>;
}

/// Construye el prompt con el contexto recuperado (ya anonimizado) y la pregunta.
pub fn build_prompt(query: &str, context: &str) -> String {
    format!(
        r#"
你是一个专业的企业智能助手。
请根据以下从企业本地知识库中检索到的上下文信息，回答用户的问题。

--- 本地检索到的上下文 (已脱敏) ---
{context}
--- 上下文结束 ---

用户问题: {query}

要求：
1. 回答必须基于提供的上下文。
2. 语气专业、简洁、商务。
3. 如果上下文中没有相关信息，请直接说明。
"#
    )
}

/// Gestor del LLM de chat.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub chat_model: String,
    api_key: Option<String>,
}

impl LlmManager {
    pub fn new(provider: LlmProvider, chat_model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            provider,
            chat_model: chat_model.into(),
            api_key,
        }
    }

    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.llm_provider.clone(),
            cfg.llm_chat_model.clone(),
            cfg.llm_api_key.clone(),
        )
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Genera la respuesta de un turno. Nunca falla: ver los textos fijos.
    pub async fn answer_with_context(&self, query: &str, context: &str) -> String {
        let Some(api_key) = self.api_key.as_deref() else {
            return DEMO_MODE_REPLY.to_string();
        };

        let prompt = build_prompt(query, context);
        match self.complete(api_key, &prompt).await {
            Ok(text) if text.trim().is_empty() => EMPTY_REPLY.to_string(),
            Ok(text) => text,
            Err(e) => {
                error!("Error del proveedor LLM {:?}: {}", self.provider, e);
                CONNECTION_FAILED_REPLY.to_string()
            }
        }
    }

    async fn complete(&self, api_key: &str, prompt: &str) -> Result<String> {
        match self.provider {
            LlmProvider::Gemini => self.complete_with_gemini(api_key, prompt).await,
            LlmProvider::OpenAI => self.complete_with_openai(api_key, prompt).await,
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para chat",
                other
            )),
        }
    }

    async fn complete_with_gemini(&self, api_key: &str, prompt: &str) -> Result<String> {
        use rig::providers::gemini;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        let client = gemini::Client::new(api_key);
        let model_name = if self.chat_model.is_empty() {
            "gemini-2.5-flash"
        } else {
            self.chat_model.as_str()
        };

        let agent = client.agent(model_name).build();
        let answer = agent.prompt(prompt).await?;
        Ok(answer)
    }

    async fn complete_with_openai(&self, api_key: &str, prompt: &str) -> Result<String> {
        use rig::providers::openai;
        use rig::client::CompletionClient as _;

        let client = openai::Client::new(api_key);
        let model_name = if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        };

        let agent = client.agent(model_name).build();
        let answer = agent.prompt(prompt).await?;
        Ok(answer)
    }
}

impl TextGenerator for LlmManager {
    fn generate_rag_response<'a>(&'a self, query: &'a str, context: &'a str) -> BoxFuture<'a, String> {
        Box::pin(self.answer_with_context(query, context))
    }
}
