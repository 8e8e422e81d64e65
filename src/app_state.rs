use std::sync::Arc;
use std::time::Instant;

use crate::{config::AppConfig, llm::LlmManager, vector_store::VectorStore};

/// Estado compartido de la aplicación. Los clientes se construyen una sola
/// vez en el arranque y no guardan estado mutable por petición, así que las
/// peticiones concurrentes son seguras sin coordinación adicional.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub vector_store: Arc<VectorStore>,
    pub llm: LlmManager,
    pub started_at: Instant,
}
