//! Carga y gestión de configuración de la aplicación (Upstash Vector + LLM).

use std::env;
use anyhow::{anyhow, Result};
use url::Url;

#[derive(Clone, Debug)]
pub enum LlmProvider {
    Groq,
    OpenAI,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "groq" => Ok(Self::Groq),
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub vector_url: String,
    pub vector_token: String,
    pub groq_api_key: String,
    pub server_addr: String,

    pub llm_provider: LlmProvider,
    pub llm_chat_model: String,

    pub seed_file: String,
    pub http_timeout_secs: u64,
    pub http_max_retries: u32,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let vector_url = env::var("UPSTASH_VECTOR_REST_URL")
            .map_err(|_| anyhow!("Falta UPSTASH_VECTOR_REST_URL en el entorno"))?;
        Url::parse(&vector_url)
            .map_err(|e| anyhow!("UPSTASH_VECTOR_REST_URL no es una URL válida: {e}"))?;
        let vector_token = env::var("UPSTASH_VECTOR_REST_TOKEN")
            .map_err(|_| anyhow!("Falta UPSTASH_VECTOR_REST_TOKEN en el entorno"))?;
        let groq_api_key = env::var("GROQ_API_KEY")
            .map_err(|_| anyhow!("Falta GROQ_API_KEY en el entorno"))?;

        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "groq".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_chat_model = env::var("LLM_CHAT_MODEL")
            .unwrap_or_else(|_| "llama-3.1-8b-instant".to_string());

        let seed_file =
            env::var("SEED_FILE").unwrap_or_else(|_| "data/foods.json".to_string());

        let http_timeout_secs = env::var("HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);
        let http_max_retries = env::var("HTTP_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);

        Ok(Self {
            vector_url,
            vector_token,
            groq_api_key,
            server_addr,
            llm_provider,
            llm_chat_model,
            seed_file,
            http_timeout_secs,
            http_max_retries,
        })
    }
}
