use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    service::{Peer, RequestContext},
    tool, tool_handler, tool_router,
    transport::{
        streamable_http_server::{
            session::local::LocalSessionManager, tower::StreamableHttpService,
        },
        StreamableHttpServerConfig,
    },
    ErrorData as McpError, RoleServer, ServerHandler,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::parse_list;
use crate::error::OcrError;
use crate::guides;
use crate::models::RecognitionResult;
use crate::ocr::{EngineKind, EngineOptions, EngineRegistry};
use crate::progress::ProgressCallback;

/// Upper bound for flushing queued progress notifications after a call returns.
const PROGRESS_FLUSH_WAIT: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct OcrMcpServer {
    registry: Arc<EngineRegistry>,
    tool_router: ToolRouter<Self>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RecognizeArgs {
    /// Absolute path of the image on the server machine.
    image_path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RecognizeTesseractArgs {
    /// Absolute path of the image on the server machine.
    image_path: String,
    /// Comma separated Tesseract language codes, e.g. `eng,chi_sim`.
    #[serde(default)]
    languages: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct NoArgs {}

fn json_result(payload: &Value) -> CallToolResult {
    CallToolResult::success(vec![Content::text(payload.to_string())])
}

/// Progress callback that queues each update as a notification for `token`.
///
/// The callback runs synchronously inside recognition (and on the heartbeat
/// task), so it only queues. The receiver closes once every clone of the
/// callback is dropped.
fn progress_channel(
    engine: &'static str,
    token: ProgressToken,
) -> (
    ProgressCallback,
    mpsc::UnboundedReceiver<ProgressNotificationParam>,
) {
    let (tx, rx) = mpsc::unbounded_channel::<ProgressNotificationParam>();
    let callback: ProgressCallback = Arc::new(move |percentage, stage, message| {
        debug!(engine, percentage, stage, message, "OCR progress");
        let _ = tx.send(ProgressNotificationParam {
            progress_token: token.clone(),
            progress: percentage,
            total: Some(100.0),
            message: Some(format!("[{stage}] {message}")),
        });
    });
    (callback, rx)
}

/// Forward tracker updates to the client as progress notifications.
///
/// Without a progress token updates are only logged.
fn progress_forwarder(
    engine: &'static str,
    token: Option<ProgressToken>,
    peer: Peer<RoleServer>,
) -> (ProgressCallback, Option<JoinHandle<()>>) {
    let Some(token) = token else {
        let callback: ProgressCallback = Arc::new(move |percentage, stage, message| {
            debug!(engine, percentage, stage, message, "OCR progress");
        });
        return (callback, None);
    };

    let (callback, mut rx) = progress_channel(engine, token);
    let handle = tokio::spawn(async move {
        while let Some(param) = rx.recv().await {
            if let Err(e) = peer.notify_progress(param).await {
                debug!(engine, error = %e, "Failed to send progress notification");
            }
        }
    });

    (callback, Some(handle))
}

impl OcrMcpServer {
    pub fn new(registry: Arc<EngineRegistry>) -> Self {
        Self {
            registry,
            tool_router: Self::tool_router(),
        }
    }

    async fn run_recognition(
        &self,
        kind: EngineKind,
        image_path: &str,
        options: EngineOptions,
        progress_token: Option<ProgressToken>,
        peer: Peer<RoleServer>,
    ) -> crate::error::Result<RecognitionResult> {
        let image_path = image_path.trim();
        if image_path.is_empty() {
            return Err(OcrError::InvalidInput("image_path cannot be empty".to_string()));
        }

        let engine = self.registry.get_engine(kind.as_str(), &options).await?;

        let (callback, forwarder) = progress_forwarder(kind.as_str(), progress_token, peer);
        let outcome = engine
            .recognize_with_progress(&PathBuf::from(image_path), Some(callback))
            .await;

        if let Some(handle) = forwarder {
            if tokio::time::timeout(PROGRESS_FLUSH_WAIT, handle).await.is_err() {
                debug!(engine = %kind, "Progress forwarder still draining, detaching");
            }
        }

        outcome
    }

    async fn recognize(
        &self,
        kind: EngineKind,
        image_path: &str,
        options: EngineOptions,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        info!(engine = %kind, image_path = %image_path, "MCP tool call started");

        let progress_token = ctx.meta.get_progress_token();
        let payload = match self
            .run_recognition(kind, image_path, options, progress_token, ctx.peer.clone())
            .await
        {
            Ok(result) => {
                info!(
                    engine = %kind,
                    image_path = %image_path,
                    processing_time = result.processing_time(),
                    text_count = result.regions().len(),
                    "MCP tool call succeeded"
                );
                result.to_mapping()
            }
            Err(e) => {
                warn!(
                    engine = %kind,
                    image_path = %image_path,
                    error_kind = e.kind(),
                    error = %e,
                    "MCP tool call failed"
                );
                RecognitionResult::error_mapping(kind.as_str(), &e)
            }
        };

        Ok(json_result(&payload))
    }
}

#[tool_router]
impl OcrMcpServer {
    #[tool(
        name = "recognize_image_paddleocr",
        description = "Recognize text in an image with PaddleOCR. Returns text, per-line regions, confidence and a technical analysis. Best for Chinese and mixed-language documents."
    )]
    async fn recognize_image_paddleocr(
        &self,
        Parameters(args): Parameters<RecognizeArgs>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        self.recognize(EngineKind::Paddle, &args.image_path, EngineOptions::default(), ctx)
            .await
    }

    #[tool(
        name = "recognize_image_tesseract",
        description = "Recognize text in an image with Tesseract. Optional `languages` takes comma separated Tesseract codes (default from server config)."
    )]
    async fn recognize_image_tesseract(
        &self,
        Parameters(args): Parameters<RecognizeTesseractArgs>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        let options = match args.languages.as_deref().map(parse_list) {
            Some(languages) if !languages.is_empty() => EngineOptions::with_languages(languages),
            _ => EngineOptions::default(),
        };
        self.recognize(EngineKind::Tesseract, &args.image_path, options, ctx)
            .await
    }

    #[tool(
        name = "recognize_image_deepseek",
        description = "Convert an image to Markdown with the DeepSeek-OCR vision-language model. No regions; slow on CPU, progress notifications are sent while it runs."
    )]
    async fn recognize_image_deepseek(
        &self,
        Parameters(args): Parameters<RecognizeArgs>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        self.recognize(EngineKind::DeepSeek, &args.image_path, EngineOptions::default(), ctx)
            .await
    }

    #[tool(
        name = "get_prompt_template",
        description = "Get the general prompt template for analysing an image together with its OCR result."
    )]
    async fn get_prompt_template(
        &self,
        Parameters(_args): Parameters<NoArgs>,
    ) -> std::result::Result<CallToolResult, McpError> {
        let payload = match guides::prompt_template() {
            Ok(template) => json!(template),
            Err(e) => {
                warn!(error = %e, "Failed to load prompt template");
                json!({ "error": e.to_string(), "template": null })
            }
        };
        Ok(json_result(&payload))
    }

    #[tool(
        name = "get_usage_guide",
        description = "Get the usage guide, tips and examples for the OCR tools."
    )]
    async fn get_usage_guide(
        &self,
        Parameters(_args): Parameters<NoArgs>,
    ) -> std::result::Result<CallToolResult, McpError> {
        let payload = match guides::usage_guide() {
            Ok(guide) => json!(guide),
            Err(e) => {
                warn!(error = %e, "Failed to load usage guide");
                json!({ "error": e.to_string(), "guide": null, "tips": null, "examples": null })
            }
        };
        Ok(json_result(&payload))
    }

    #[tool(
        name = "get_engine_stats",
        description = "Get the loaded OCR engines and how often each was requested."
    )]
    async fn get_engine_stats(
        &self,
        Parameters(_args): Parameters<NoArgs>,
    ) -> std::result::Result<CallToolResult, McpError> {
        Ok(json_result(&json!(self.registry.usage_stats())))
    }
}

#[tool_handler]
impl ServerHandler for OcrMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "ocr-mcp".to_string(),
                title: Some("OCR MCP".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Use recognize_image_paddleocr, recognize_image_tesseract or recognize_image_deepseek with an absolute image path. Call get_usage_guide for details."
                    .to_string(),
            ),
        }
    }
}

pub fn streamable_http_service(
    registry: Arc<EngineRegistry>,
) -> StreamableHttpService<OcrMcpServer, LocalSessionManager> {
    StreamableHttpService::new(
        move || Ok(OcrMcpServer::new(Arc::clone(&registry))),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default(),
    )
}
