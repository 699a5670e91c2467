use std::sync::Arc;

use clap::Parser;
use rmcp::{transport::stdio, ServiceExt};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ocr_mcp::config::{Config, LogFormat, Transport};
use ocr_mcp::mcp::{http_router, OcrMcpServer};
use ocr_mcp::ocr::EngineRegistry;

#[derive(Parser)]
#[command(name = "ocr-mcp")]
#[command(about = "MCP server exposing PaddleOCR, Tesseract and DeepSeek-OCR to AI agents")]
struct Args {
    /// Transport to serve on: stdio or http (overrides OCR_MCP_TRANSPORT)
    #[arg(long)]
    transport: Option<Transport>,

    /// Bind address for the HTTP transport (overrides OCR_MCP_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port for the HTTP transport (overrides OCR_MCP_PORT)
    #[arg(long)]
    port: Option<u16>,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ocr_mcp=info,tower_http=info".into());

    // stdout belongs to the stdio transport, so logs always go to stderr.
    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();

    let mut config = Config::from_env();
    init_tracing(config.log_format);

    if let Some(transport) = args.transport {
        config.server.transport = transport;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    if config.paddle.base_url.is_none() {
        tracing::warn!("PADDLEOCR_BASE_URL is not set - recognize_image_paddleocr will be unavailable");
    }

    let registry = Arc::new(EngineRegistry::from_config(&config));

    if !config.preload_engines.is_empty() {
        tracing::info!("Preloading OCR engines: {}...", config.preload_engines.join(", "));
        registry.preload(&config.preload_engines).await;
    }

    let cancel_token = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel_token.clone()));

    match config.server.transport {
        Transport::Stdio => serve_stdio(registry, cancel_token).await,
        Transport::Http => serve_http(registry, &config, cancel_token).await,
    }
}

async fn serve_stdio(
    registry: Arc<EngineRegistry>,
    cancel_token: CancellationToken,
) -> anyhow::Result<()> {
    tracing::info!("ocr-mcp starting on stdio");

    let service = OcrMcpServer::new(registry)
        .serve(stdio())
        .await
        .inspect_err(|e| tracing::error!("Failed to start stdio transport: {}", e))?;

    let session = service.cancellation_token();
    tokio::spawn(async move {
        cancel_token.cancelled().await;
        session.cancel();
    });

    let reason = service.waiting().await?;
    tracing::info!("stdio session ended: {:?}", reason);
    Ok(())
}

async fn serve_http(
    registry: Arc<EngineRegistry>,
    config: &Config,
    cancel_token: CancellationToken,
) -> anyhow::Result<()> {
    let app = http_router(registry, &config.server.path);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("ocr-mcp starting on http://{}", addr);
    tracing::info!("  Health check: http://{}/health", addr);
    tracing::info!("  MCP endpoint: http://{}{}", addr, config.server.path);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel_token.cancelled().await })
        .await?;

    Ok(())
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, closing MCP sessions...");
    cancel_token.cancel();
}
