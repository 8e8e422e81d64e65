//! Cliente REST de Upstash Vector para el índice de alimentos.
//!
//! API pública:
//!   - `VectorStore::from_config(&AppConfig)`
//!   - `query(&str, usize)`: búsqueda semántica; el servicio calcula el
//!     embedding de la consulta en el servidor.
//!   - `upsert(&[VectorRecord])`: alta/actualización en lote.
//!   - `info()`: metadatos del índice, usado por el health check.
//!
//! Todas las llamadas llevan reintento acotado con backoff exponencial:
//! 429, 5xx y errores de red se reintentan; el resto de 4xx no.

use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::models::{IndexInfo, SearchResult, VectorRecord};

#[derive(Debug, Clone)]
pub struct VectorStore {
    http: reqwest::Client,
    base_url: String,
    token: String,
    max_retries: u32,
}

impl VectorStore {
    /// Construye el cliente a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: cfg.vector_url.trim_end_matches('/').to_string(),
            token: cfg.vector_token.clone(),
            max_retries: cfg.http_max_retries,
        })
    }

    /// Busca los `top_k` alimentos más afines a `query_text`. Los resultados
    /// llegan ordenados por score descendente según el servicio; un conjunto
    /// vacío es un resultado válido, no un error.
    pub async fn query(&self, query_text: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        let body = json!({
            "data": query_text,
            "topK": top_k,
            "includeMetadata": true,
        });

        let result = self.request_with_retry("query-data", Some(&body)).await?;
        let results = parse_query_response(&result)?;
        info!(
            "Búsqueda vectorial: {} resultados para \"{}\"",
            results.len(),
            query_text
        );
        Ok(results)
    }

    /// Inserta o actualiza un lote de vectores. El servicio embebe el campo
    /// `data` de cada registro en el servidor.
    pub async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        let body = serde_json::to_value(records)?;
        self.request_with_retry("upsert-data", Some(&body)).await?;
        Ok(())
    }

    /// Consulta los metadatos del índice.
    pub async fn info(&self) -> Result<IndexInfo> {
        let result = self.request_with_retry("info", None).await?;
        serde_json::from_value(result)
            .map_err(|e| anyhow!("Unexpected info response from vector store: {e}"))
    }

    /// POST (con cuerpo) o GET (sin él) contra el índice, devolviendo el campo
    /// `result` de la respuesta. Backoff exponencial: 1s, 2s, 4s...
    async fn request_with_retry(&self, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                warn!(
                    "Reintento {}/{} contra {} tras fallo transitorio",
                    attempt, self.max_retries, url
                );
                tokio::time::sleep(delay).await;
            }

            let request = match body {
                Some(b) => self.http.post(&url).json(b),
                None => self.http.get(&url),
            };

            match request.bearer_auth(&self.token).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let value: Value = response.json().await?;
                        return Ok(value.get("result").cloned().unwrap_or(value));
                    }

                    let text = response.text().await.unwrap_or_default();
                    let err = anyhow!("Vector store returned {status}: {text}");
                    if should_retry(status) {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| anyhow!("Vector store request exhausted all retries")))
    }
}

/// Errores transitorios: 429 y 5xx se reintentan; el resto de 4xx no.
fn should_retry(status: StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

/// Convierte el campo `result` de una respuesta `query-data` en resultados
/// tipados. Los ids numéricos se normalizan a cadena y los metadatos ausentes
/// se rellenan con los valores por defecto.
fn parse_query_response(result: &Value) -> Result<Vec<SearchResult>> {
    let rows = result
        .as_array()
        .ok_or_else(|| anyhow!("Unexpected query response from vector store: missing result array"))?;

    let mut results = Vec::with_capacity(rows.len());
    for row in rows {
        let id = match row.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(anyhow!("Search result without id in vector store response")),
        };
        let score = row.get("score").and_then(Value::as_f64).unwrap_or(0.0);
        let metadata = row
            .get("metadata")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| anyhow!("Malformed search result metadata: {e}"))?
            .unwrap_or_default();

        results.push(SearchResult { id, score, metadata });
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_on_rate_limit_and_server_errors() {
        assert!(should_retry(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(should_retry(StatusCode::BAD_GATEWAY));
        assert!(!should_retry(StatusCode::BAD_REQUEST));
        assert!(!should_retry(StatusCode::UNAUTHORIZED));
        assert!(!should_retry(StatusCode::NOT_FOUND));
    }

    #[test]
    fn parses_results_preserving_order() {
        let result = json!([
            {"id": "food_1", "score": 0.92, "metadata": {"text": "Pasta is a staple of Italian cuisine.", "cuisine": "Italian"}},
            {"id": 2, "score": 0.81, "metadata": {"text": "Sushi is a Japanese dish."}},
            {"id": "food_3", "score": 0.75}
        ]);

        let parsed = parse_query_response(&result).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].id, "food_1");
        assert_eq!(parsed[0].metadata.cuisine.as_deref(), Some("Italian"));
        // Id numérico normalizado a cadena.
        assert_eq!(parsed[1].id, "2");
        // Sin metadatos: texto vacío por defecto.
        assert_eq!(parsed[2].metadata.text, "");
        // Orden de recuperación intacto, scores no crecientes.
        assert!(parsed[0].score >= parsed[1].score);
        assert!(parsed[1].score >= parsed[2].score);
    }

    #[test]
    fn rejects_results_without_id() {
        let result = json!([{"score": 0.5, "metadata": {"text": "x"}}]);
        assert!(parse_query_response(&result).is_err());
    }

    #[test]
    fn rejects_non_array_result() {
        let result = json!({"unexpected": true});
        assert!(parse_query_response(&result).is_err());
    }
}
