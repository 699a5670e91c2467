use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded progress step of a recognition call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub timestamp: DateTime<Utc>,
    pub percentage: f64,
    pub stage: String,
    pub message: String,
}

impl ProgressSnapshot {
    pub fn new(percentage: f64, stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            percentage: clamp_percentage(percentage),
            stage: stage.into(),
            message: message.into(),
        }
    }
}

/// Clamp a raw percentage into `[0, 100]`. NaN maps to 0.
pub fn clamp_percentage(percentage: f64) -> f64 {
    if percentage.is_nan() {
        0.0
    } else {
        percentage.clamp(0.0, 100.0)
    }
}
