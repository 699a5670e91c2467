use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::DeepSeekConfig;
use crate::error::{OcrError, Result};

use super::engine::Backend;
use super::raw::RawOutput;

const SCRATCH_PREFIX: &str = "deepseek_ocr_";
/// Files the inference command may write, in lookup order.
const RESULT_FILES: &[&str] = &["result.mmd", "result.txt"];

/// Locate an executable the way a shell would.
pub fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .find(|path| path.is_file())
    })
}

/// Vision-language backend driving a local DeepSeek-OCR inference command.
///
/// Every call gets its own scratch directory. The command is expected to write
/// `result.mmd` (or `result.txt`) there; stdout is the fallback.
#[derive(Debug, Clone)]
pub struct DeepSeekBackend {
    program: PathBuf,
    model_name: String,
    device: String,
    prompt: String,
}

impl DeepSeekBackend {
    pub fn new(config: &DeepSeekConfig) -> Result<Self> {
        let program = find_program(&config.command).ok_or_else(|| {
            OcrError::BackendUnavailable(format!(
                "DeepSeek-OCR command '{}' not found on PATH",
                config.command
            ))
        })?;
        info!(
            program = %program.display(),
            model = %config.model_name,
            device = %config.device,
            "DeepSeek-OCR backend initialized"
        );

        Ok(Self {
            program,
            model_name: config.model_name.clone(),
            device: config.device.clone(),
            prompt: config.prompt.clone(),
        })
    }
}

async fn read_result(scratch: &Path, stdout: &[u8]) -> String {
    for name in RESULT_FILES {
        if let Ok(text) = tokio::fs::read_to_string(scratch.join(name)).await {
            return text;
        }
    }
    String::from_utf8_lossy(stdout).into_owned()
}

#[async_trait]
impl Backend for DeepSeekBackend {
    fn name(&self) -> &'static str {
        "deepseek"
    }

    async fn run(&self, image_path: &Path) -> Result<RawOutput> {
        // Removed on drop, so every return path below cleans up.
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir()
            .map_err(|e| OcrError::Internal(format!("Failed to create scratch directory: {e}")))?;

        debug!(
            scratch = %scratch.path().display(),
            image_path = %image_path.display(),
            "Running DeepSeek-OCR"
        );

        let output = Command::new(&self.program)
            .arg("--model")
            .arg(&self.model_name)
            .arg("--device")
            .arg(&self.device)
            .arg("--prompt")
            .arg(&self.prompt)
            .arg("--image")
            .arg(image_path)
            .arg("--output")
            .arg(scratch.path())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                OcrError::BackendExecution(format!(
                    "Failed to start '{}': {e}",
                    self.program.display()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::BackendExecution(format!(
                "DeepSeek-OCR exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let text = read_result(scratch.path(), &output.stdout).await;
        Ok(RawOutput::PlainText {
            text,
            confidence: 1.0,
        })
    }
}
