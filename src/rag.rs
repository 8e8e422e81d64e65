//! Pipeline de consulta RAG contra Upstash Vector y Groq.
//!
//! Flujo, estrictamente lineal por petición:
//!   1. Búsqueda vectorial de los `top_k` alimentos más relevantes.
//!   2. Ensamblado del contexto (textos concatenados en orden de
//!      recuperación, sin reordenar, deduplicar ni truncar).
//!   3. El LLM responde usando ese contexto.
//!
//! Cada consulta es independiente y sin estado: no hay caché ni memoria de
//! conversación entre turnos.

use tracing::info;
use uuid::Uuid;

use crate::errors::RagError;
use crate::llm::LlmManager;
use crate::models::{SearchResult, Usage};
use crate::vector_store::VectorStore;

/// Respuesta fija cuando la búsqueda no devuelve ningún resultado.
/// En ese caso no se llama al LLM.
pub const NO_RESULTS_ANSWER: &str = "❌ I couldn't find any relevant food information for your question. Try asking about specific foods, cuisines, or cooking methods.";

/// Resultado de una consulta RAG completa.
#[derive(Debug)]
pub struct RagOutcome {
    pub answer: String,
    pub sources: Vec<SearchResult>,
    pub usage: Option<Usage>,
}

/// Ensambla el contexto para el LLM: los textos de los resultados, en el
/// orden en que los devolvió la búsqueda, separados por salto de línea.
pub fn build_context(sources: &[SearchResult]) -> String {
    sources
        .iter()
        .map(|s| s.metadata.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Contexto enriquecido para `/api/enhanced-chat`: un bloque estructurado
/// por resultado con nombre, cocina y categoría además de la descripción.
pub fn build_enhanced_context(sources: &[SearchResult]) -> String {
    sources
        .iter()
        .map(|s| {
            let m = &s.metadata;
            format!(
                "Recipe: {}\nCuisine: {}\nCategory: {}\nDescription: {}",
                m.name.as_deref().unwrap_or("Unknown"),
                m.cuisine.as_deref().unwrap_or("Various"),
                m.category.as_deref().unwrap_or("Main Course"),
                m.text,
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Lanza una consulta RAG:
/// - Recupera los `top_k` alimentos más relevantes del índice.
/// - Con resultados: llama al LLM con el contexto concatenado.
/// - Sin resultados: devuelve la respuesta fija sin llamar al LLM.
pub async fn rag_query(
    store: &VectorStore,
    llm: &LlmManager,
    question: &str,
    top_k: usize,
) -> Result<RagOutcome, RagError> {
    let query_id = Uuid::new_v4();
    info!("Consulta RAG {query_id}: \"{question}\" (top {top_k})");

    // 1) Búsqueda vectorial
    let sources = store
        .query(question, top_k)
        .await
        .map_err(RagError::RetrievalUnavailable)?;

    // 2) Conjunto vacío: camino de "sin información", válido y sin error.
    if sources.is_empty() {
        info!("Consulta RAG {query_id}: sin resultados en el índice");
        return Ok(RagOutcome {
            answer: NO_RESULTS_ANSWER.to_string(),
            sources,
            usage: None,
        });
    }

    // 3) Generación con el contexto ensamblado
    let context = build_context(&sources);
    let (answer, usage) = llm
        .answer_with_context(question, &context)
        .await
        .map_err(RagError::GenerationUnavailable)?;

    info!(
        "Consulta RAG {query_id}: respuesta generada ({} caracteres)",
        answer.len()
    );

    Ok(RagOutcome { answer, sources, usage })
}
