//! Cliente del proveedor LLM para la generación de respuestas.
//! De momento se implementa Groq (API compatible con OpenAI);
//! OpenAI/Ollama quedan preparados para el futuro.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_stream::try_stream;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tracing::warn;

use crate::config::{AppConfig, LlmProvider};
use crate::models::Usage;

/// Endpoint OpenAI-compatible de Groq.
const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";

const TEMPERATURE: f64 = 0.7;
const MAX_TOKENS_CHAT: u32 = 1000;
const MAX_TOKENS_STREAM: u32 = 500;
const MAX_TOKENS_ENHANCED: u32 = 1500;

/// Gestor del LLM. Se construye una vez en el arranque; no guarda estado
/// mutable por petición, así que es seguro compartirlo entre peticiones
/// concurrentes.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub chat_model: String,
    api_key: String,
    http: reqwest::Client,
    max_retries: u32,
    timeout: Duration,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        // Sin timeout global en el cliente: cortaría los streams SSE largos.
        // Las llamadas bloqueantes aplican el timeout por petición.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            provider: cfg.llm_provider.clone(),
            chat_model: cfg.llm_chat_model.clone(),
            api_key: cfg.groq_api_key.clone(),
            http,
            max_retries: cfg.http_max_retries,
            timeout: Duration::from_secs(cfg.http_timeout_secs),
        })
    }

    // ---------------------------------------------------------------------
    // CHAT / COMPLETION
    // ---------------------------------------------------------------------

    /// Genera una respuesta a partir de una pregunta y un contexto
    /// (concatenación de los textos recuperados).
    pub async fn answer_with_context(
        &self,
        question: &str,
        context: &str,
    ) -> Result<(String, Option<Usage>)> {
        match self.provider {
            LlmProvider::Groq => self.answer_with_groq(question, context).await,
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para chat",
                other
            )),
        }
    }

    async fn answer_with_groq(
        &self,
        question: &str,
        context: &str,
    ) -> Result<(String, Option<Usage>)> {
        const SYSTEM_PROMPT: &str = r#"You are a knowledgeable food expert assistant with expertise in global cuisines. Your role is to provide well-structured, comprehensive answers about food topics in the language requested by the user.

LANGUAGE DETECTION RULES:
- Analyze the script and language of the user's question first
- IF the question uses the English alphabet, respond in ENGLISH ONLY
- IF the question uses Devanagari script, respond in NEPALI ONLY
- NEVER mix languages in a single response; default to ENGLISH if unclear

ACCURACY REQUIREMENTS:
- Dhokla is a SAVORY steamed Gujarati snack, NOT sweet
- Rasgulla is a SWEET made from chhena cooked in sugar syrup
- Lassi is a COLD YOGURT DRINK, sweet, salty, or fruit-flavored
- Always verify food categories: sweet vs savory, drink vs solid food
- Base answers on the provided context data - it contains accurate information

MANDATORY FORMATTING REQUIREMENTS:
- FORBIDDEN: single-paragraph responses or unstructured text
- Every response MUST have at least 3 sections with ## headings
- Every response MUST have at least 2 subsections with ### headings
- Every response MUST include bullet points with detailed explanations
- Always use markdown formatting (##, ###, -, *, etc.)

CONTENT GUIDELINES:
- Answer questions about food, recipes, ingredients, and cooking methods
- Include relevant details about cuisines, regions, and preparation methods
- If the context doesn't contain enough information, say so clearly
- Be conversational yet informative and always well-organized"#;

        const CLOSING: &str = "Please provide a comprehensive, well-structured answer using the formatting guidelines above. Use headings, bullet points, and multiple paragraphs to make the response clear and easy to read.";

        let body = json!({
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_message(question, context, CLOSING)},
            ],
            "model": self.chat_model,
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS_CHAT,
            "stream": false,
        });

        let response = self
            .send_groq(&body, self.max_retries, Some(self.timeout))
            .await?;
        let value: Value = response.json().await?;
        parse_completion(&value)
    }

    /// Variante enriquecida para `/api/enhanced-chat`: prompt de formato
    /// estricto y contexto estructurado por receta.
    pub async fn enhanced_answer(
        &self,
        question: &str,
        context: &str,
    ) -> Result<(String, Option<Usage>)> {
        match self.provider {
            LlmProvider::Groq => self.enhanced_answer_with_groq(question, context).await,
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para chat",
                other
            )),
        }
    }

    async fn enhanced_answer_with_groq(
        &self,
        question: &str,
        context: &str,
    ) -> Result<(String, Option<Usage>)> {
        const ENHANCED_SYSTEM_PROMPT: &str = r#"You are a professional culinary assistant with expertise in global cuisines and detailed recipe creation.

CRITICAL FORMATTING REQUIREMENTS:
- ABSOLUTELY FORBIDDEN: single-paragraph responses or walls of text
- Every response MUST have at least 3 sections with ## headings
- Every response MUST have at least 2 subsections with ### headings
- Every response MUST include bullet points with detailed explanations
- Always use proper markdown formatting (##, ###, -, *, etc.)

MANDATORY RESPONSE STRUCTURE:
## Recipe Overview
Brief introduction with cultural context and dish significance.

### Quick Facts:
- Cooking Time, Difficulty Level, Servings, Cuisine Type, Main Cooking Method

## Ingredients & Preparation
Main ingredients and seasonings with amounts and preparation notes.

## Step-by-Step Cooking Instructions
Preparation phase and cooking phase with timing, temperatures, and visual cues.

## Professional Tips & Techniques
Expert cooking tips and common mistakes to avoid.

## Serving & Variations
Presentation, accompaniments, storage, and regional or dietary variations.

STRICTLY FORBIDDEN: wall-of-text responses, single-paragraph answers,
unstructured information dumps, missing headings or bullet points.

Always provide comprehensive, professionally structured responses that educate and inspire the user's culinary journey."#;

        let user = format!(
            "Based on this context about recipes and cuisines:\n\n{context}\n\nPlease answer this question: {question}\n\nProvide a comprehensive response with detailed recipe information, cooking instructions, and cultural context."
        );

        let body = json!({
            "messages": [
                {"role": "system", "content": ENHANCED_SYSTEM_PROMPT},
                {"role": "user", "content": user},
            ],
            "model": self.chat_model,
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS_ENHANCED,
            "stream": false,
        });

        let response = self
            .send_groq(&body, self.max_retries, Some(self.timeout))
            .await?;
        let value: Value = response.json().await?;
        parse_completion(&value)
    }

    // ---------------------------------------------------------------------
    // STREAMING
    // ---------------------------------------------------------------------

    /// Versión streaming: devuelve los deltas de texto del modelo en orden de
    /// llegada. La petición inicial se reintenta; un error en mitad del
    /// stream no (no hay semántica de reanudación).
    pub async fn stream_answer(
        &self,
        question: &str,
        context: &str,
    ) -> Result<impl Stream<Item = Result<String>>> {
        match self.provider {
            LlmProvider::Groq => self.stream_with_groq(question, context).await,
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para streaming",
                other
            )),
        }
    }

    async fn stream_with_groq(
        &self,
        question: &str,
        context: &str,
    ) -> Result<impl Stream<Item = Result<String>>> {
        const SYSTEM_PROMPT: &str = r#"You are a knowledgeable food expert assistant. Your role is to:
- Answer questions about food, recipes, ingredients, and cooking methods
- Provide accurate, helpful, and friendly responses
- Base your answers on the provided context
- If the context doesn't contain enough information, say so clearly
- Include relevant details about cuisines, regions, and food types when available
- Be conversational and engaging while staying informative"#;

        const CLOSING: &str = "Please provide a helpful answer based on the context above.";

        let body = json!({
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_message(question, context, CLOSING)},
            ],
            "model": self.chat_model,
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS_STREAM,
            "stream": true,
        });

        let response = self.send_groq(&body, self.max_retries, None).await?;
        let mut upstream = response.bytes_stream();

        Ok(try_stream! {
            // Los frames SSE del proveedor llegan partidos en trozos
            // arbitrarios; se acumulan bytes hasta tener un frame completo.
            let mut buffer: Vec<u8> = Vec::new();
            let mut done = false;

            while !done {
                let chunk = match upstream.next().await {
                    Some(chunk) => chunk?,
                    None => break,
                };
                buffer.extend_from_slice(&chunk);

                while let Some(end) = find_frame_end(&buffer) {
                    let frame: Vec<u8> = buffer.drain(..end + 2).collect();
                    let frame = String::from_utf8_lossy(&frame);

                    for line in frame.lines() {
                        let payload = match line.strip_prefix("data: ") {
                            Some(payload) => payload,
                            None => continue,
                        };
                        if payload == "[DONE]" {
                            done = true;
                            break;
                        }
                        if let Some(delta) = parse_stream_delta(payload)? {
                            yield delta;
                        }
                    }

                    if done {
                        break;
                    }
                }
            }
        })
    }

    // ---------------------------------------------------------------------
    // HEALTH
    // ---------------------------------------------------------------------

    /// Sonda mínima contra el proveedor (una completion de 5 tokens),
    /// usada por el health check. Sin reintentos: la sonda debe responder
    /// rápido con el estado real.
    pub async fn probe(&self) -> Result<()> {
        match self.provider {
            LlmProvider::Groq => {}
            ref other => {
                return Err(anyhow!(
                    "Proveedor LLM {:?} aún no implementado para el health check",
                    other
                ))
            }
        }

        let body = json!({
            "messages": [{"role": "user", "content": "Hello"}],
            "model": self.chat_model,
            "max_tokens": 5,
        });

        self.send_groq(&body, 0, Some(self.timeout)).await.map(|_| ())
    }

    /// Envía una petición de chat-completion con reintento acotado y backoff
    /// exponencial (1s, 2s, 4s...). 429, 5xx y errores de red se reintentan;
    /// el resto de 4xx no.
    async fn send_groq(
        &self,
        body: &Value,
        max_retries: u32,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response> {
        let url = format!("{GROQ_API_BASE}/chat/completions");
        let mut last_err = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                warn!("Reintento {attempt}/{max_retries} contra Groq tras fallo transitorio");
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body);
            if let Some(t) = timeout {
                request = request.timeout(t);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let text = response.text().await.unwrap_or_default();
                    let err = anyhow!("Groq returned {status}: {text}");
                    if status.as_u16() == 429 || status.is_server_error() {
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

        Err(last_err.unwrap_or_else(|| anyhow!("Groq request exhausted all retries")))
    }
}

/// Plantilla fija del mensaje de usuario: contexto recuperado + pregunta.
/// El texto del usuario se inserta tal cual, sin escapado.
fn user_message(question: &str, context: &str, closing: &str) -> String {
    format!("Context from food database:\n{context}\n\nQuestion: {question}\n\n{closing}")
}

/// Extrae el texto y el consumo de tokens de una respuesta no-streaming.
fn parse_completion(value: &Value) -> Result<(String, Option<Usage>)> {
    let answer = value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if answer.is_empty() {
        bail!("LLM returned an empty completion");
    }

    let usage = value
        .get("usage")
        .cloned()
        .and_then(|u| serde_json::from_value(u).ok());

    Ok((answer, usage))
}

/// Posición del separador de frames (`\n\n`) dentro del buffer, si hay un
/// frame completo.
fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

/// Extrae el contenido del delta de un frame `data:` del stream del
/// proveedor. Los frames sin contenido (p. ej. el inicial, sólo con `role`)
/// devuelven `None`.
fn parse_stream_delta(payload: &str) -> Result<Option<String>> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|e| anyhow!("Malformed stream chunk from Groq: {e}"))?;

    Ok(value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn config_with_provider(provider: LlmProvider) -> AppConfig {
        AppConfig {
            vector_url: "https://example.upstash.io".to_string(),
            vector_token: "token".to_string(),
            groq_api_key: "gsk_test".to_string(),
            server_addr: "127.0.0.1:3000".to_string(),
            llm_provider: provider,
            llm_chat_model: "llama-3.1-8b-instant".to_string(),
            seed_file: "data/foods.json".to_string(),
            http_timeout_secs: 30,
            http_max_retries: 2,
        }
    }

    #[test]
    fn unimplemented_provider_is_rejected() {
        let llm = LlmManager::from_config(&config_with_provider(LlmProvider::Ollama)).unwrap();
        let err = tokio_test::block_on(llm.answer_with_context("q", "ctx")).unwrap_err();
        assert!(err.to_string().contains("no implementado"));

        let err = tokio_test::block_on(llm.probe()).unwrap_err();
        assert!(err.to_string().contains("no implementado"));
    }

    #[test]
    fn user_message_embeds_context_and_question() {
        let message = user_message("What is pasta?", "Pasta is a staple.", "Answer briefly.");
        assert!(message.starts_with("Context from food database:\nPasta is a staple."));
        assert!(message.contains("Question: What is pasta?"));
        assert!(message.ends_with("Answer briefly."));
    }

    #[test]
    fn parse_completion_extracts_answer_and_usage() {
        let value = json!({
            "choices": [{"message": {"role": "assistant", "content": "## Pasta\nPasta is great."}}],
            "usage": {"prompt_tokens": 100, "completion_tokens": 50, "total_tokens": 150}
        });

        let (answer, usage) = parse_completion(&value).unwrap();
        assert!(answer.contains("Pasta"));
        let usage = usage.unwrap();
        assert_eq!(usage.prompt_tokens, 100);
        assert_eq!(usage.total_tokens, 150);
    }

    #[test]
    fn parse_completion_rejects_empty_answer() {
        let value = json!({"choices": [{"message": {"role": "assistant", "content": ""}}]});
        assert!(parse_completion(&value).is_err());
    }

    #[test]
    fn parse_completion_tolerates_missing_usage() {
        let value = json!({"choices": [{"message": {"content": "ok"}}]});
        let (answer, usage) = parse_completion(&value).unwrap();
        assert_eq!(answer, "ok");
        assert!(usage.is_none());
    }

    #[test]
    fn parse_stream_delta_extracts_content() {
        let payload = r#"{"choices":[{"delta":{"content":"Hel"},"index":0}]}"#;
        assert_eq!(parse_stream_delta(payload).unwrap().as_deref(), Some("Hel"));
    }

    #[test]
    fn parse_stream_delta_skips_role_only_chunks() {
        let payload = r#"{"choices":[{"delta":{"role":"assistant"},"index":0}]}"#;
        assert_eq!(parse_stream_delta(payload).unwrap(), None);
    }

    #[test]
    fn parse_stream_delta_rejects_malformed_json() {
        assert!(parse_stream_delta("not json").is_err());
    }

    #[test]
    fn find_frame_end_locates_separator() {
        assert_eq!(find_frame_end(b"data: {}\n\nrest"), Some(8));
        assert_eq!(find_frame_end(b"data: {}"), None);
    }
}
