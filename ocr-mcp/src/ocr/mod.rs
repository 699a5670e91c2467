//! OCR (Optical Character Recognition) Module
//!
//! Heterogeneous OCR engines behind one capability.
//!
//! # Architecture
//!
//! - [`OcrEngine`] is what callers use: `recognize(path) -> RecognitionResult`.
//! - [`Backend`] is what differs per engine: it turns an image into a [`RawOutput`].
//! - [`Adapter`] implements `OcrEngine` for any `Backend`. It validates the
//!   image, tracks progress with a heartbeat, parses the raw output and attaches
//!   the technical analysis.
//! - [`EngineRegistry`] builds each engine once per configuration and counts usage.
//!
//! Backends:
//! - `paddleocr`: PaddleOCR serving endpoint over HTTP
//! - `tesseract`: local Tesseract via leptess, one engine per language set
//! - `deepseek`: local DeepSeek-OCR inference command
//!
//! # Usage
//!
//! ```rust,ignore
//! let registry = EngineRegistry::from_config(&config);
//! let engine = registry.get_engine("tesseract", &EngineOptions::default()).await?;
//! let result = engine.recognize(Path::new("scan.png")).await?;
//! ```

mod deepseek;
mod engine;
mod paddle;
pub mod raw;
mod registry;
mod tesseract;
mod validation;

pub use deepseek::DeepSeekBackend;
pub use engine::{stage, Adapter, Backend, OcrEngine};
pub use paddle::PaddleBackend;
pub use raw::{ParsedPage, ParsedUnit, RawOutput, RawRecord, SkipReason};
pub use registry::{
    DefaultEngineFactory, EngineFactory, EngineKey, EngineKind, EngineOptions, EngineRegistry,
    UsageStats,
};
pub use tesseract::{normalize_languages, parse_tsv, TesseractBackend};
pub use validation::{validate_image, ValidatedImage};
