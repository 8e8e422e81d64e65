// Módulos de la aplicación
mod api;
mod app_state;
mod config;
mod errors;
mod llm;
mod models;
mod populate;
mod rag;
mod vector_store;

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().expect("Error al cargar la configuración");

    // 3. Inicializar los clientes de los servicios externos
    let vector_store = vector_store::VectorStore::from_config(&cfg)
        .expect("Error inicializando el cliente de Upstash Vector");
    let llm = llm::LlmManager::from_config(&cfg).expect("Error inicializando LLM Manager");

    // 4. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        vector_store: Arc::new(vector_store),
        llm,
        started_at: Instant::now(),
    };

    // 5. Configurar el router de la API con CORS permisivo
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 6. Iniciar el servidor con apagado ordenado (Ctrl-C)
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .unwrap();
    info!("🚀 Servidor escuchando en http://{}", server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .unwrap();

    info!("✅ Servidor cerrado correctamente.");
}
