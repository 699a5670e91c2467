pub mod analysis;
pub mod config;
pub mod error;
pub mod guides;
pub mod mcp;
pub mod models;
pub mod ocr;
pub mod progress;
