use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::progress::HeartbeatSettings;

fn parse_env_or<T: FromStr>(var: &str, default: T) -> T
where
    T::Err: fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_env_opt<T: FromStr>(var: &str) -> Option<T>
where
    T::Err: fmt::Display,
{
    match env::var(var) {
        Ok(val) if val.trim().is_empty() => None,
        Ok(val) => match val.parse() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Ignoring.", val, var, e);
                None
            }
        },
        Err(_) => None,
    }
}

/// Split a comma separated list, trimming entries and dropping empty ones.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_env_list(var: &str, default: &[&str]) -> Vec<String> {
    match env::var(var) {
        Ok(val) => {
            let list = parse_list(&val);
            if list.is_empty() && !default.is_empty() {
                tracing::warn!("Empty list for {}. Using default.", var);
                default.iter().map(|s| s.to_string()).collect()
            } else {
                list
            }
        }
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Stdio,
    Http,
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stdio" => Ok(Transport::Stdio),
            "http" | "streamable-http" => Ok(Transport::Http),
            other => Err(format!("unknown transport '{other}', expected 'stdio' or 'http'")),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Stdio => f.write_str("stdio"),
            Transport::Http => f.write_str("http"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}', expected 'text' or 'json'")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub paddle: PaddleConfig,
    pub tesseract: TesseractConfig,
    pub deepseek: DeepSeekConfig,
    pub heartbeat: HeartbeatConfig,
    pub preload_engines: Vec<String>,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub transport: Transport,
    pub host: String,
    pub port: u16,
    /// Mount path of the streamable HTTP service.
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaddleConfig {
    pub base_url: Option<String>,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TesseractConfig {
    pub languages: Vec<String>,
    pub data_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeepSeekConfig {
    pub command: String,
    pub model_name: String,
    pub device: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    pub interval_secs: u64,
    pub stop_wait_ms: u64,
}

impl HeartbeatConfig {
    pub fn settings(&self) -> HeartbeatSettings {
        HeartbeatSettings {
            interval: Duration::from_secs(self.interval_secs.max(1)),
            stop_wait: Duration::from_millis(self.stop_wait_ms),
        }
    }
}

pub const DEFAULT_DEEPSEEK_PROMPT: &str = "<image>\n<|grounding|>Convert the document to markdown. ";

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                transport: parse_env_or("OCR_MCP_TRANSPORT", Transport::Stdio),
                host: env::var("OCR_MCP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: parse_env_or("OCR_MCP_PORT", 8765),
                path: env::var("OCR_MCP_PATH").unwrap_or_else(|_| "/mcp".to_string()),
            },
            paddle: PaddleConfig {
                base_url: parse_env_opt::<String>("PADDLEOCR_BASE_URL")
                    .map(|url| url.trim_end_matches('/').to_string()),
                connect_timeout_secs: parse_env_or("PADDLEOCR_CONNECT_TIMEOUT", 10),
            },
            tesseract: TesseractConfig {
                languages: parse_env_list("TESSERACT_LANGUAGES", &["eng"]),
                data_path: parse_env_opt("TESSDATA_PREFIX"),
            },
            deepseek: DeepSeekConfig {
                command: env::var("DEEPSEEK_COMMAND").unwrap_or_else(|_| "deepseek-ocr".to_string()),
                model_name: env::var("DEEPSEEK_MODEL_NAME")
                    .unwrap_or_else(|_| "deepseek-ai/DeepSeek-OCR".to_string()),
                device: env::var("DEEPSEEK_DEVICE").unwrap_or_else(|_| "cpu".to_string()),
                prompt: env::var("DEEPSEEK_PROMPT")
                    .unwrap_or_else(|_| DEFAULT_DEEPSEEK_PROMPT.to_string()),
            },
            heartbeat: HeartbeatConfig {
                interval_secs: parse_env_or("HEARTBEAT_INTERVAL_SECS", 5),
                stop_wait_ms: parse_env_or("HEARTBEAT_STOP_WAIT_MS", 1000),
            },
            preload_engines: parse_env_list("PRELOAD_ENGINES", &[]),
            log_format: parse_env_or("LOG_FORMAT", LogFormat::Text),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}
