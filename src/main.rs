use std::sync::Arc;

use axum::http::{HeaderName, Method, header};
use tower_http::cors::{Any, CorsLayer};

use memory_agent::config::ServiceConfig;
use memory_agent::memory::routes::{INTERACTION_ID_HEADER, MemoryRouteState, memory_routes};
use memory_agent::memory::service::MemoryQueryService;
use memory_agent::memory::telemetry::TelemetryStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServiceConfig::from_env()?;

    eprintln!("🧠 Memory Agent v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Email search: {}", config.email_url);
    eprintln!("   Calendar search: {}", config.calendar_url);
    match &config.llm {
        Some(llm) => eprintln!("   Model: {}", llm.model),
        None => eprintln!("   Model: none (deterministic mode)"),
    }
    eprintln!("   API: http://0.0.0.0:{}/api/memory\n", config.port);

    let service = MemoryQueryService::from_config(&config, TelemetryStore::new())?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .expose_headers([HeaderName::from_static(INTERACTION_ID_HEADER)]);

    let app = memory_routes(MemoryRouteState {
        service: Arc::new(service),
    })
    .layer(cors);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "Memory agent server started");
    axum::serve(listener, app).await?;

    Ok(())
}
