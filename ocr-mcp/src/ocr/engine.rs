use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::analysis;
use crate::error::Result;
use crate::models::RecognitionResult;
use crate::progress::{HeartbeatSettings, ProgressCallback, ProgressTracker};

use super::raw::RawOutput;
use super::validation::validate_image;

pub mod stage {
    pub const IMAGE_LOADING: &str = "image_loading";
    pub const ENGINE_CALL: &str = "engine_call";
    pub const PARSING: &str = "parsing";
    pub const POST_PROCESSING: &str = "post_processing";
    pub const COMPLETE: &str = "complete";
}

const PARSING_START: f64 = 80.0;
const PARSING_SPAN: f64 = 15.0;

/// Uniform recognition capability, whatever backend sits behind it.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Tag written into every result.
    fn name(&self) -> &str;

    async fn recognize(&self, image_path: &Path) -> Result<RecognitionResult> {
        self.recognize_with_progress(image_path, None).await
    }

    async fn recognize_with_progress(
        &self,
        image_path: &Path,
        callback: Option<ProgressCallback>,
    ) -> Result<RecognitionResult>;
}

/// The part that differs between engines: turning an image into raw output.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Invoke the engine on an already validated, absolute image path.
    async fn run(&self, image_path: &Path) -> Result<RawOutput>;
}

/// Drives any [`Backend`] through validation, progress, parsing and analysis.
pub struct Adapter<B> {
    backend: B,
    heartbeat: HeartbeatSettings,
}

impl<B: Backend> Adapter<B> {
    pub fn new(backend: B, heartbeat: HeartbeatSettings) -> Self {
        Self { backend, heartbeat }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn call_and_parse(
        &self,
        path: &Path,
        tracker: &mut ProgressTracker,
    ) -> Result<super::raw::ParsedPage> {
        let name = self.backend.name();
        tracker.update(
            20.0,
            stage::ENGINE_CALL,
            &format!("Calling {name} engine..."),
        );

        let raw = self.backend.run(path).await?;

        tracker.update(
            PARSING_START,
            stage::PARSING,
            "Engine finished, parsing results",
        );

        let total = raw.len();
        let step = (total / 10).max(1);
        let page = raw.parse_with(name, |done, total| {
            if done % step == 0 || done == total {
                let percentage = PARSING_START + done as f64 / total as f64 * PARSING_SPAN;
                tracker.update(
                    percentage,
                    stage::PARSING,
                    &format!("Parsed {done}/{total} text blocks"),
                );
            }
        });

        Ok(page)
    }
}

#[async_trait]
impl<B: Backend + 'static> OcrEngine for Adapter<B> {
    fn name(&self) -> &str {
        self.backend.name()
    }

    async fn recognize_with_progress(
        &self,
        image_path: &Path,
        callback: Option<ProgressCallback>,
    ) -> Result<RecognitionResult> {
        let name = self.backend.name();
        let requested: PathBuf = image_path.to_path_buf();
        let image = tokio::task::spawn_blocking(move || validate_image(&requested)).await??;

        debug!(
            engine = %name,
            image_path = %image.path.display(),
            width = image.width,
            height = image.height,
            "Image validated"
        );

        let mut tracker = ProgressTracker::with_settings(callback, self.heartbeat);
        tracker.update(10.0, stage::IMAGE_LOADING, "Image path validated");
        tracker.start_heartbeat();

        let started = Instant::now();
        let outcome = self.call_and_parse(&image.path, &mut tracker).await;
        tracker.stop_heartbeat().await;

        let page = match outcome {
            Ok(page) => page,
            Err(e) => {
                warn!(
                    engine = %name,
                    image_path = %image.path.display(),
                    error = %e,
                    "OCR engine call failed"
                );
                return Err(e);
            }
        };
        let processing_time = started.elapsed().as_secs_f64();

        tracker.update(95.0, stage::POST_PROCESSING, "Generating technical analysis...");
        tracker.update(100.0, stage::COMPLETE, "Processing complete");

        let mut result = RecognitionResult::new(
            page.text(),
            page.regions.clone(),
            page.mean_confidence(),
            name,
            processing_time,
            tracker.into_history(),
        );
        analysis::attach_analysis(&mut result, None);

        info!(
            engine = %name,
            image_path = %image.path.display(),
            processing_time = processing_time,
            text_count = page.text_parts.len(),
            skipped = page.skipped,
            confidence = result.confidence(),
            "OCR completed"
        );

        Ok(result)
    }
}
