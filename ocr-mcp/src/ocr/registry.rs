//! Process-wide cache of OCR engines.
//!
//! Engines are expensive to build (model loads, traineddata, PATH probes), so
//! each `(engine, configuration)` pair is constructed once, on first request,
//! and kept for the rest of the process. Each entry owns its own
//! [`tokio::sync::OnceCell`]: concurrent first requests for the same key wait
//! on a single construction, while different keys build independently.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{OcrError, Result};
use crate::progress::HeartbeatSettings;

use super::deepseek::DeepSeekBackend;
use super::engine::{Adapter, OcrEngine};
use super::paddle::PaddleBackend;
use super::tesseract::{normalize_languages, TesseractBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EngineKind {
    Paddle,
    Tesseract,
    DeepSeek,
}

impl EngineKind {
    pub const ALL: [EngineKind; 3] = [EngineKind::Paddle, EngineKind::Tesseract, EngineKind::DeepSeek];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Paddle => "paddleocr",
            EngineKind::Tesseract => "tesseract",
            EngineKind::DeepSeek => "deepseek",
        }
    }

    /// Whether the configuration fingerprint includes a language set.
    pub fn takes_languages(&self) -> bool {
        matches!(self, EngineKind::Tesseract)
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = OcrError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "paddleocr" | "paddle" => Ok(EngineKind::Paddle),
            "tesseract" => Ok(EngineKind::Tesseract),
            "deepseek" | "deepseek-ocr" => Ok(EngineKind::DeepSeek),
            _ => Err(OcrError::UnknownEngine(s.to_string())),
        }
    }
}

/// Per-request engine options. Only the language hint exists today.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOptions {
    pub languages: Option<Vec<String>>,
}

impl EngineOptions {
    pub fn with_languages<I, S>(languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            languages: Some(languages.into_iter().map(Into::into).collect()),
        }
    }
}

/// Cache key: engine plus configuration fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EngineKey {
    pub kind: EngineKind,
    /// Sorted, de-duplicated. Empty for engines without a language setting.
    pub languages: Vec<String>,
}

impl fmt::Display for EngineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.languages.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}_{}", self.kind, self.languages.join("+"))
        }
    }
}

/// Builds engines for the registry. Called on a blocking thread.
pub trait EngineFactory: Send + Sync {
    fn create(&self, key: &EngineKey) -> Result<Arc<dyn OcrEngine>>;
}

/// Factory for the built-in backends, configured from [`Config`].
pub struct DefaultEngineFactory {
    config: Config,
    heartbeat: HeartbeatSettings,
}

impl DefaultEngineFactory {
    pub fn new(config: Config) -> Self {
        let heartbeat = config.heartbeat.settings();
        Self { config, heartbeat }
    }
}

impl EngineFactory for DefaultEngineFactory {
    fn create(&self, key: &EngineKey) -> Result<Arc<dyn OcrEngine>> {
        let engine: Arc<dyn OcrEngine> = match key.kind {
            EngineKind::Paddle => Arc::new(Adapter::new(
                PaddleBackend::new(&self.config.paddle)?,
                self.heartbeat,
            )),
            EngineKind::Tesseract => Arc::new(Adapter::new(
                TesseractBackend::new(self.config.tesseract.data_path.as_deref(), &key.languages)?,
                self.heartbeat,
            )),
            EngineKind::DeepSeek => Arc::new(Adapter::new(
                DeepSeekBackend::new(&self.config.deepseek)?,
                self.heartbeat,
            )),
        };
        Ok(engine)
    }
}

struct Entry {
    engine: OnceCell<Arc<dyn OcrEngine>>,
    uses: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageStats {
    pub total_engines: usize,
    pub engines: Vec<String>,
    pub usage_count: BTreeMap<String, u64>,
}

pub struct EngineRegistry {
    factory: Arc<dyn EngineFactory>,
    default_languages: Vec<String>,
    entries: Mutex<HashMap<EngineKey, Arc<Entry>>>,
}

impl EngineRegistry {
    pub fn new(factory: Arc<dyn EngineFactory>, default_languages: Vec<String>) -> Self {
        let mut default_languages = normalize_languages(&default_languages);
        if default_languages.is_empty() {
            default_languages.push("eng".to_string());
        }
        Self {
            factory,
            default_languages,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(DefaultEngineFactory::new(config.clone())),
            config.tesseract.languages.clone(),
        )
    }

    /// Resolve the cache key for a request, applying the default language set.
    pub fn key_for(&self, kind: EngineKind, options: &EngineOptions) -> EngineKey {
        let languages = if kind.takes_languages() {
            let requested = options
                .languages
                .as_deref()
                .map(normalize_languages)
                .unwrap_or_default();
            if requested.is_empty() {
                self.default_languages.clone()
            } else {
                requested
            }
        } else {
            Vec::new()
        };
        EngineKey { kind, languages }
    }

    fn entry(&self, key: &EngineKey) -> Arc<Entry> {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(entries.entry(key.clone()).or_insert_with(|| {
            Arc::new(Entry {
                engine: OnceCell::new(),
                uses: AtomicU64::new(0),
            })
        }))
    }

    /// Return the cached engine for `identifier`, constructing it on first use.
    pub async fn get_engine(
        &self,
        identifier: &str,
        options: &EngineOptions,
    ) -> Result<Arc<dyn OcrEngine>> {
        let kind: EngineKind = identifier.parse()?;
        let key = self.key_for(kind, options);
        let entry = self.entry(&key);

        let engine = entry
            .engine
            .get_or_try_init(|| async {
                info!(engine = %key, "Constructing OCR engine");
                let factory = Arc::clone(&self.factory);
                let build_key = key.clone();
                let engine = tokio::task::spawn_blocking(move || factory.create(&build_key)).await??;
                info!(engine = %key, "OCR engine ready");
                Ok::<_, OcrError>(engine)
            })
            .await
            .inspect_err(|e| warn!(engine = %key, error = %e, "OCR engine construction failed"))?;

        entry.uses.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::clone(engine))
    }

    /// Construct the given engines ahead of the first request. Failures are logged.
    pub async fn preload(&self, identifiers: &[String]) {
        for identifier in identifiers {
            match self.get_engine(identifier, &EngineOptions::default()).await {
                Ok(_) => info!(engine = %identifier, "Preloaded OCR engine"),
                Err(e) => warn!(engine = %identifier, error = %e, "Failed to preload OCR engine"),
            }
        }
    }

    pub fn usage_stats(&self) -> UsageStats {
        let entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };

        let usage_count: BTreeMap<String, u64> = entries
            .iter()
            .filter(|(_, entry)| entry.engine.initialized())
            .map(|(key, entry)| (key.to_string(), entry.uses.load(Ordering::Relaxed)))
            .collect();

        UsageStats {
            total_engines: usage_count.len(),
            engines: usage_count.keys().cloned().collect(),
            usage_count,
        }
    }
}
