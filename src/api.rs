use std::convert::Infallible;
use std::path::Path;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Router,
};
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::{
    app_state::AppState,
    errors::{ApiError, RagError},
    models::{SearchResult, Usage},
    populate, rag,
};

// --- Payloads y Respuestas de la API ---

/// topK por defecto cuando el cliente no lo envía.
fn default_top_k() -> usize {
    3
}

/// topK por defecto del chat enriquecido.
fn default_top_k_enhanced() -> usize {
    5
}

#[derive(Deserialize)]
pub struct ChatPayload {
    /// Se valida a mano para poder responder con el sobre propio también
    /// cuando `message` no es una cadena.
    #[serde(default)]
    message: Option<Value>,
    #[serde(rename = "topK", default = "default_top_k")]
    top_k: usize,
}

#[derive(Deserialize)]
pub struct EnhancedChatPayload {
    #[serde(default)]
    message: Option<Value>,
    #[serde(rename = "topK", default = "default_top_k_enhanced")]
    top_k: usize,
}

#[derive(Deserialize)]
pub struct SearchPayload {
    #[serde(default)]
    query: Option<Value>,
    #[serde(rename = "topK", default = "default_top_k")]
    top_k: usize,
}

#[derive(Deserialize)]
pub struct SearchParams {
    q: Option<String>,
    #[serde(rename = "topK")]
    top_k: Option<usize>,
}

/// Respuesta del pipeline RAG completo.
#[derive(Serialize)]
pub struct RagResponse {
    pub answer: String,
    pub sources: Vec<SearchResult>,
    pub query: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub count: usize,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct PopulateResponse {
    pub success: bool,
    pub message: String,
    #[serde(rename = "totalItems")]
    pub total_items: usize,
    pub uploaded: usize,
}

/// MEJORA: La respuesta enriquecida incluye un resumen de la receta mejor
/// puntuada además de la respuesta generada.
#[derive(Serialize)]
pub struct EnhancedChatResponse {
    pub answer: String,
    pub sources: Vec<SearchResult>,
    pub query: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe: Option<RecipeInfo>,
}

#[derive(Serialize)]
pub struct RecipeInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cuisine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub servings: u32,
}

/// Evento del stream SSE hacia el cliente. El primer frame siempre es
/// `sources`; el último, `complete` o `error`; nunca llega un frame después
/// de estos dos.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Sources { sources: Vec<SearchResult> },
    Token { content: String },
    Complete,
    Error { error: String },
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat_handler).get(chat_health_handler))
        .route("/api/stream", post(stream_handler))
        .route("/api/search", post(search_handler).get(search_get_handler))
        .route("/api/enhanced-chat", post(enhanced_chat_handler))
        .route("/api/populate", post(populate_handler).get(populate_info_handler))
        .route("/api/health", get(health_handler))
        .with_state(app_state)
}

// --- Handlers ---

/// Valida que `message` exista y sea una cadena no vacía.
fn validate_message(message: &Option<Value>) -> Result<String, RagError> {
    match message {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        _ => Err(RagError::BadRequest(
            "Message parameter is required".to_string(),
        )),
    }
}

#[axum::debug_handler]
async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatPayload>,
) -> Result<Json<RagResponse>, RagError> {
    let message = validate_message(&payload.message)?;
    info!("Chat API: procesando la pregunta \"{message}\"");

    let outcome =
        rag::rag_query(&state.vector_store, &state.llm, &message, payload.top_k).await?;

    info!(
        "Chat API: respuesta generada ({} caracteres)",
        outcome.answer.len()
    );

    Ok(Json(RagResponse {
        answer: outcome.answer,
        sources: outcome.sources,
        query: message,
        timestamp: Utc::now().to_rfc3339(),
        usage: outcome.usage,
    }))
}

/// Health check de los dos servicios externos (índice vectorial y LLM).
#[axum::debug_handler]
async fn chat_health_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Health check de servicios solicitado");

    let upstash_ok = match state.vector_store.info().await {
        Ok(_) => true,
        Err(e) => {
            error!("Upstash Vector no saludable: {e}");
            false
        }
    };
    let groq_ok = match state.llm.probe().await {
        Ok(()) => true,
        Err(e) => {
            error!("Groq LLM no saludable: {e}");
            false
        }
    };

    let healthy = upstash_ok && groq_ok;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "services": {
                "upstashVector": if upstash_ok { "healthy" } else { "unhealthy" },
                "groqLLM": if groq_ok { "healthy" } else { "unhealthy" },
            },
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
}

/// Variante streaming del pipeline. La búsqueda se resuelve antes de abrir
/// el stream: un fallo de recuperación responde con el sobre JSON normal.
#[axum::debug_handler]
async fn stream_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatPayload>,
) -> Result<Sse<impl futures::Stream<Item = Result<Event, Infallible>>>, RagError> {
    let message = validate_message(&payload.message)?;
    info!("Stream API: procesando la pregunta \"{message}\"");

    let sources = state
        .vector_store
        .query(&message, payload.top_k)
        .await
        .map_err(RagError::RetrievalUnavailable)?;

    let llm = state.llm.clone();

    let stream = async_stream::stream! {
        // El primer frame siempre lleva las fuentes recuperadas.
        yield Ok(stream_frame(&StreamEvent::Sources { sources: sources.clone() }));

        if sources.is_empty() {
            yield Ok(stream_frame(&StreamEvent::Token {
                content: rag::NO_RESULTS_ANSWER.to_string(),
            }));
            yield Ok(stream_frame(&StreamEvent::Complete));
            return;
        }

        let context = rag::build_context(&sources);
        let tokens = match llm.stream_answer(&message, &context).await {
            Ok(tokens) => tokens,
            Err(e) => {
                error!("Stream API: fallo iniciando la generación: {e}");
                yield Ok(stream_frame(&StreamEvent::Error {
                    error: format!("Answer generation failed: {e}"),
                }));
                return;
            }
        };
        futures::pin_mut!(tokens);

        while let Some(item) = tokens.next().await {
            match item {
                Ok(content) => {
                    yield Ok(stream_frame(&StreamEvent::Token { content }));
                }
                Err(e) => {
                    error!("Stream API: error en mitad del stream: {e}");
                    yield Ok(stream_frame(&StreamEvent::Error {
                        error: format!("Answer generation failed: {e}"),
                    }));
                    return;
                }
            }
        }

        info!("Stream API: generación completada");
        yield Ok(stream_frame(&StreamEvent::Complete));
    };

    Ok(Sse::new(stream))
}

/// Serializa un evento del stream como frame SSE `data: {...}`.
fn stream_frame(event: &StreamEvent) -> Event {
    Event::default().json_data(event).unwrap_or_else(|_| {
        Event::default().data(r#"{"type":"error","error":"serialization failure"}"#)
    })
}

#[axum::debug_handler]
async fn search_handler(
    State(state): State<AppState>,
    Json(payload): Json<SearchPayload>,
) -> Result<Json<SearchResponse>, RagError> {
    let query = match &payload.query {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        _ => {
            return Err(RagError::BadRequest(
                "Query parameter is required".to_string(),
            ))
        }
    };

    run_search(&state, query, payload.top_k).await
}

#[axum::debug_handler]
async fn search_get_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, RagError> {
    let query = params
        .q
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| RagError::BadRequest("Query parameter \"q\" is required".to_string()))?;

    run_search(&state, query, params.top_k.unwrap_or_else(default_top_k)).await
}

/// Recuperación pura, sin generación.
async fn run_search(
    state: &AppState,
    query: String,
    top_k: usize,
) -> Result<Json<SearchResponse>, RagError> {
    info!("Search API: \"{query}\" (topK: {top_k})");

    let results = state
        .vector_store
        .query(&query, top_k)
        .await
        .map_err(RagError::RetrievalUnavailable)?;

    Ok(Json(SearchResponse {
        count: results.len(),
        results,
        query,
        timestamp: Utc::now().to_rfc3339(),
    }))
}

/// MEJORA: Chat con prompt de formato estricto, contexto estructurado por
/// receta y resumen de la receta mejor puntuada.
#[axum::debug_handler]
async fn enhanced_chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<EnhancedChatPayload>,
) -> Result<Json<EnhancedChatResponse>, RagError> {
    let message = validate_message(&payload.message)?;
    info!("Enhanced Chat API: procesando \"{message}\"");

    let sources = state
        .vector_store
        .query(&message, payload.top_k)
        .await
        .map_err(RagError::RetrievalUnavailable)?;

    let context = rag::build_enhanced_context(&sources);
    let (answer, usage) = state
        .llm
        .enhanced_answer(&message, &context)
        .await
        .map_err(RagError::GenerationUnavailable)?;

    let recipe = sources.first().map(|top| RecipeInfo {
        name: top.metadata.name.clone(),
        cuisine: top.metadata.cuisine.clone(),
        category: top.metadata.category.clone(),
        servings: 4,
    });

    Ok(Json(EnhancedChatResponse {
        answer,
        sources,
        query: message,
        timestamp: Utc::now().to_rfc3339(),
        usage,
        recipe,
    }))
}

/// Lee el fichero semilla y sube todos los alimentos al índice en lotes.
#[axum::debug_handler]
async fn populate_handler(
    State(state): State<AppState>,
) -> Result<Json<PopulateResponse>, (StatusCode, Json<ApiError>)> {
    info!("Iniciando la población de la base de datos...");

    let seed_path = Path::new(&state.config.seed_file);
    if !seed_path.exists() {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ApiError::new(
                "foods.json file not found",
                format!(
                    "Please ensure the seed file exists at {}",
                    seed_path.display()
                ),
            )),
        ));
    }

    let foods = populate::load_seed_file(seed_path).map_err(|e| {
        error!("Fallo leyendo el fichero semilla: {e}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError::new("Database population failed", e.to_string())),
        )
    })?;

    info!("Encontrados {} alimentos para subir", foods.len());

    match populate::populate_index(&state.vector_store, &foods).await {
        Ok(summary) => {
            info!("Población completada: {summary}");
            Ok(Json(PopulateResponse {
                success: true,
                message: summary.to_string(),
                total_items: summary.total_items,
                uploaded: summary.uploaded,
            }))
        }
        Err(e) => {
            error!("La población de la base de datos falló: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new("Database population failed", e.to_string())),
            ))
        }
    }
}

#[axum::debug_handler]
async fn populate_info_handler() -> Json<Value> {
    Json(json!({
        "message": "Use POST method to populate the database with food items from the seed file",
        "endpoints": {
            "populate": "POST /api/populate - Upload all foods to vector database",
            "chat": "POST /api/chat - Query the RAG system",
            "health": "GET /api/chat - Check system health",
        }
    }))
}

/// Introspección del proceso: uptime, versión y presencia de credenciales.
#[axum::debug_handler]
async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "uptime": state.started_at.elapsed().as_secs(),
        "environment": std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        "version": env!("CARGO_PKG_VERSION"),
        "services": {
            "upstash": if state.config.vector_url.is_empty() { "missing" } else { "configured" },
            "groq": if state.config.groq_api_key.is_empty() { "missing" } else { "configured" },
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SearchMetadata;

    #[test]
    fn message_must_be_a_non_empty_string() {
        assert!(validate_message(&None).is_err());
        assert!(validate_message(&Some(Value::String(String::new()))).is_err());
        assert!(validate_message(&Some(Value::String("   ".to_string()))).is_err());
        assert!(validate_message(&Some(json!(42))).is_err());
        assert!(validate_message(&Some(json!({"nested": true}))).is_err());

        let ok = validate_message(&Some(Value::String("What is pasta?".to_string())));
        assert_eq!(ok.unwrap(), "What is pasta?");
    }

    #[test]
    fn invalid_message_maps_to_bad_request() {
        let err = validate_message(&None).unwrap_err();
        let (status, label) = err.status_and_label();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(label, "Bad Request");
    }

    #[test]
    fn chat_payload_defaults_top_k() {
        let payload: ChatPayload =
            serde_json::from_str(r#"{"message": "What is pasta?"}"#).unwrap();
        assert_eq!(payload.top_k, 3);

        let payload: ChatPayload =
            serde_json::from_str(r#"{"message": "What is pasta?", "topK": 7}"#).unwrap();
        assert_eq!(payload.top_k, 7);

        let enhanced: EnhancedChatPayload =
            serde_json::from_str(r#"{"message": "What is pasta?"}"#).unwrap();
        assert_eq!(enhanced.top_k, 5);
    }

    #[test]
    fn stream_events_serialize_with_type_tag() {
        let sources = vec![SearchResult {
            id: "food_1".to_string(),
            score: 0.9,
            metadata: SearchMetadata {
                text: "Pasta is a staple.".to_string(),
                ..Default::default()
            },
        }];

        let frame = serde_json::to_value(StreamEvent::Sources { sources }).unwrap();
        assert_eq!(frame["type"], "sources");
        assert_eq!(frame["sources"][0]["id"], "food_1");

        let frame = serde_json::to_value(StreamEvent::Token {
            content: "Hel".to_string(),
        })
        .unwrap();
        assert_eq!(frame["type"], "token");
        assert_eq!(frame["content"], "Hel");

        let frame = serde_json::to_value(StreamEvent::Complete).unwrap();
        assert_eq!(frame, json!({"type": "complete"}));

        let frame = serde_json::to_value(StreamEvent::Error {
            error: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(frame["type"], "error");
    }
}
