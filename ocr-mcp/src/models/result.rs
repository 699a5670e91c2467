use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::ProgressSnapshot;
use crate::error::{OcrError, Result};
use tracing::warn;

/// Axis-aligned text box in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TextRegion {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl TextRegion {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Envelope of a polygon (usually four corners). `None` for an empty point set.
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        points.into_iter().fold(None, |acc, (x, y)| {
            Some(match acc {
                None => Self::new(x, y, x, y),
                Some(r) => Self::new(r.x1.min(x), r.y1.min(y), r.x2.max(x), r.y2.max(y)),
            })
        })
    }

    pub fn union(&self, other: &Self) -> Self {
        Self::new(
            self.x1.min(other.x1),
            self.y1.min(other.y1),
            self.x2.max(other.x2),
            self.y2.max(other.y2),
        )
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }
}

/// Normalized outcome of one recognition call, whatever backend produced it.
///
/// Built once by an engine adapter. The only later change allowed is attaching
/// the technical analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    text: String,
    regions: Vec<TextRegion>,
    confidence: f64,
    engine: String,
    processing_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    progress_history: Vec<ProgressSnapshot>,
}

impl RecognitionResult {
    pub fn new(
        text: String,
        regions: Vec<TextRegion>,
        confidence: f64,
        engine: impl Into<String>,
        processing_time: f64,
        progress_history: Vec<ProgressSnapshot>,
    ) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };

        Self {
            text,
            regions,
            confidence,
            engine: engine.into(),
            processing_time: processing_time.max(0.0),
            analysis: None,
            progress_history,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn regions(&self) -> &[TextRegion] {
        &self.regions
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }

    pub fn processing_time(&self) -> f64 {
        self.processing_time
    }

    pub fn analysis(&self) -> Option<&str> {
        self.analysis.as_deref()
    }

    pub fn progress_history(&self) -> &[ProgressSnapshot] {
        &self.progress_history
    }

    pub fn attach_analysis(&mut self, analysis: String) {
        self.analysis = Some(analysis);
    }

    /// Serialization contract for tool callers. Absent optional fields are omitted.
    pub fn to_mapping(&self) -> Value {
        let regions: Vec<Value> = self
            .regions
            .iter()
            .map(|r| json!({ "x1": r.x1, "y1": r.y1, "x2": r.x2, "y2": r.y2 }))
            .collect();

        let mut mapping = json!({
            "text": self.text,
            "regions": regions,
            "confidence": self.confidence,
            "engine": self.engine,
            "processing_time": self.processing_time,
        });

        if let Some(obj) = mapping.as_object_mut() {
            if let Some(analysis) = &self.analysis {
                obj.insert("analysis".to_string(), Value::String(analysis.clone()));
            }
            if !self.progress_history.is_empty() {
                match serde_json::to_value(&self.progress_history) {
                    Ok(history) => {
                        obj.insert("progress_history".to_string(), history);
                    }
                    Err(e) => warn!(
                        engine = %self.engine,
                        error = %e,
                        "Failed to serialize progress history, omitting it"
                    ),
                }
            }
        }

        mapping
    }

    /// Rebuild a result from a mapping produced by [`RecognitionResult::to_mapping`].
    pub fn from_mapping(mapping: &Value) -> Result<Self> {
        let result: Self = serde_json::from_value(mapping.clone())
            .map_err(|e| OcrError::InvalidInput(format!("Malformed recognition mapping: {e}")))?;

        if !(0.0..=1.0).contains(&result.confidence) {
            return Err(OcrError::InvalidInput(format!(
                "confidence {} is outside [0, 1]",
                result.confidence
            )));
        }
        if result.processing_time < 0.0 {
            return Err(OcrError::InvalidInput(format!(
                "processing_time {} is negative",
                result.processing_time
            )));
        }

        Ok(result)
    }

    /// Result-shaped payload for a failed call, so callers never need to tell
    /// success and failure apart by type.
    pub fn error_mapping(engine: &str, error: &OcrError) -> Value {
        json!({
            "error": error.to_string(),
            "error_kind": error.kind(),
            "text": "",
            "regions": [],
            "confidence": 0.0,
            "engine": engine,
            "processing_time": 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_result() -> RecognitionResult {
        RecognitionResult::new(
            "Hello\nWorld".to_string(),
            vec![
                TextRegion::new(10.0, 20.0, 110.5, 40.25),
                TextRegion::new(10.0, 50.0, 98.0, 71.0),
            ],
            0.8734,
            "paddleocr",
            1.2345,
            vec![ProgressSnapshot::new(10.0, "image_loading", "Image path validated")],
        )
    }

    #[test]
    fn test_region_from_polygon_takes_envelope() {
        let region = TextRegion::from_points(vec![
            (12.0, 8.0),
            (90.0, 10.0),
            (91.0, 30.0),
            (11.0, 29.0),
        ])
        .unwrap();
        assert_eq!(region, TextRegion::new(11.0, 8.0, 91.0, 30.0));
        assert_eq!(region.width(), 80.0);
        assert_eq!(region.height(), 22.0);
    }

    #[test]
    fn test_region_from_empty_polygon() {
        assert!(TextRegion::from_points(Vec::new()).is_none());
    }

    #[test]
    fn test_new_clamps_confidence_and_time() {
        let result = RecognitionResult::new(String::new(), vec![], 1.7, "x", -3.0, vec![]);
        assert_eq!(result.confidence(), 1.0);
        assert_eq!(result.processing_time(), 0.0);

        let result = RecognitionResult::new(String::new(), vec![], f64::NAN, "x", 0.0, vec![]);
        assert_eq!(result.confidence(), 0.0);
    }

    #[test]
    fn test_to_mapping_omits_absent_optionals() {
        let result = RecognitionResult::new(String::new(), vec![], 0.0, "deepseek", 0.5, vec![]);
        let mapping = result.to_mapping();
        let obj = mapping.as_object().unwrap();

        assert!(!obj.contains_key("analysis"));
        assert!(!obj.contains_key("progress_history"));
        assert_eq!(obj["engine"], "deepseek");
        assert_eq!(obj["regions"], json!([]));
    }

    #[test]
    fn test_to_mapping_includes_analysis_when_attached() {
        let mut result = sample_result();
        result.attach_analysis("[Technical Analysis]".to_string());
        let mapping = result.to_mapping();

        assert_eq!(mapping["analysis"], "[Technical Analysis]");
        assert_eq!(mapping["regions"][0]["x2"], 110.5);
        assert_eq!(mapping["progress_history"][0]["stage"], "image_loading");
    }

    #[test]
    fn test_mapping_round_trip_preserves_core_fields() {
        let mut original = sample_result();
        original.attach_analysis("analysis text".to_string());

        let rebuilt = RecognitionResult::from_mapping(&original.to_mapping()).unwrap();

        assert_eq!(rebuilt.text(), original.text());
        assert_eq!(rebuilt.regions(), original.regions());
        assert_eq!(rebuilt.confidence(), original.confidence());
        assert_eq!(rebuilt.engine(), original.engine());
        assert_eq!(rebuilt.processing_time(), original.processing_time());
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn test_from_mapping_rejects_out_of_range_confidence() {
        let mut mapping = sample_result().to_mapping();
        mapping["confidence"] = json!(1.5);
        assert!(matches!(
            RecognitionResult::from_mapping(&mapping),
            Err(OcrError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_from_mapping_rejects_missing_fields() {
        let mapping = json!({ "text": "only text" });
        assert!(RecognitionResult::from_mapping(&mapping).is_err());
    }

    #[test]
    fn test_error_mapping_has_placeholder_fields() {
        let err = OcrError::InvalidInput("Image file not found: /nope.png".to_string());
        let mapping = RecognitionResult::error_mapping("tesseract", &err);

        assert_eq!(mapping["text"], "");
        assert_eq!(mapping["regions"], json!([]));
        assert_eq!(mapping["confidence"], 0.0);
        assert_eq!(mapping["processing_time"], 0.0);
        assert_eq!(mapping["engine"], "tesseract");
        assert_eq!(mapping["error_kind"], "invalid_input");
        assert!(mapping["error"]
            .as_str()
            .unwrap()
            .contains("Image file not found"));
    }
}
