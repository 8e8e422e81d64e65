//! Taxonomía plana de errores de la API y su conversión a respuestas HTTP.
//!
//! Política de propagación: ningún error se reintenta ni se recupera en esta
//! frontera; cada fallo se registra y se convierte en un sobre JSON con
//! timestamp. Nunca se filtra un stack trace al cliente.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Sobre de error que reciben los clientes de la API.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub error: String,
    pub message: String,
    pub timestamp: String,
}

impl ApiError {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Error del pipeline RAG. Cada fallo se clasifica en la frontera del módulo
/// que lo produjo; el detalle original viaja dentro de la variante.
#[derive(Debug, Error)]
pub enum RagError {
    /// Entrada inválida del cliente (mensaje ausente, vacío o no textual).
    #[error("{0}")]
    BadRequest(String),

    /// El servicio de búsqueda vectorial no responde o está mal configurado.
    #[error("Vector search failed: {0}")]
    RetrievalUnavailable(anyhow::Error),

    /// El proveedor LLM falló (credenciales, cuota, timeout o respuesta
    /// malformada).
    #[error("Answer generation failed: {0}")]
    GenerationUnavailable(anyhow::Error),

    /// Cualquier otro fallo no clasificado.
    #[error("{0}")]
    Internal(anyhow::Error),
}

/// Cajón de sastre para fallos no clasificados que crucen la frontera HTTP.
impl From<anyhow::Error> for RagError {
    fn from(e: anyhow::Error) -> Self {
        RagError::Internal(e)
    }
}

impl RagError {
    /// Código HTTP y etiqueta del sobre para cada variante.
    pub fn status_and_label(&self) -> (StatusCode, &'static str) {
        match self {
            RagError::BadRequest(_) => (StatusCode::BAD_REQUEST, "Bad Request"),
            RagError::RetrievalUnavailable(_)
            | RagError::GenerationUnavailable(_)
            | RagError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }
}

impl IntoResponse for RagError {
    fn into_response(self) -> Response {
        let (status, label) = self.status_and_label();
        if status.is_server_error() {
            error!("{self}");
        }
        (status, Json(ApiError::new(label, self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn bad_request_maps_to_400() {
        let err = RagError::BadRequest("Message parameter is required".to_string());
        let (status, label) = err.status_and_label();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(label, "Bad Request");
        assert_eq!(err.to_string(), "Message parameter is required");
    }

    #[test]
    fn upstream_failures_map_to_500() {
        let retrieval = RagError::RetrievalUnavailable(anyhow!("connection refused"));
        let generation = RagError::GenerationUnavailable(anyhow!("quota exceeded"));
        assert_eq!(retrieval.status_and_label().0, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(generation.status_and_label().0, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            retrieval.to_string(),
            "Vector search failed: connection refused"
        );
        assert_eq!(
            generation.to_string(),
            "Answer generation failed: quota exceeded"
        );
    }

    #[test]
    fn envelope_carries_timestamp() {
        let envelope = ApiError::new("Bad Request", "Message parameter is required");
        assert!(!envelope.timestamp.is_empty());
        assert_eq!(envelope.error, "Bad Request");
    }
}
