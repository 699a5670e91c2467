//! MCP surface: OCR tools over stdio or streamable HTTP.

mod router;
mod server;

pub use router::http_router;
pub use server::{streamable_http_service, OcrMcpServer};
