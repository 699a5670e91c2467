//! Raw backend output and its normalization into text, regions and confidences.
//!
//! Backends return whatever shape their engine speaks. [`RawOutput::from_json`]
//! classifies a JSON payload once; each variant then has its own parser that
//! yields one `Result<ParsedUnit, SkipReason>` per entry, so a single malformed
//! entry never discards what was already collected.

use std::fmt;

use serde_json::Value;
use tracing::warn;

use crate::error::{OcrError, Result};
use crate::models::TextRegion;

/// One line-level record from a backend that already reports typed data.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub text: String,
    pub confidence: f64,
    pub region: TextRegion,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawOutput {
    /// `rec_texts` / `rec_scores` / `rec_polys` index-aligned arrays.
    ParallelArrays {
        texts: Vec<Value>,
        scores: Vec<Value>,
        polys: Vec<Value>,
    },
    /// Legacy `[box, [text, score]]` entries.
    Tuples(Vec<Value>),
    Records(Vec<RawRecord>),
    /// Free text without spatial data. `confidence` applies when the text is non-empty.
    PlainText { text: String, confidence: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedUnit {
    pub text: String,
    pub region: Option<TextRegion>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    EmptyText,
    TextNotString,
    InvalidScore(String),
    MissingBox,
    NotAnEntry(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::EmptyText => f.write_str("empty text"),
            SkipReason::TextNotString => f.write_str("text is not a string"),
            SkipReason::InvalidScore(v) => write!(f, "invalid score {v}"),
            SkipReason::MissingBox => f.write_str("missing or short box"),
            SkipReason::NotAnEntry(v) => write!(f, "not a detection entry: {v}"),
        }
    }
}

/// Accumulated parse output. `regions` only grows for units that carry one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPage {
    pub text_parts: Vec<String>,
    pub regions: Vec<TextRegion>,
    pub confidences: Vec<f64>,
    pub skipped: usize,
}

impl ParsedPage {
    fn push(&mut self, unit: ParsedUnit) {
        self.text_parts.push(unit.text);
        if let Some(region) = unit.region {
            self.regions.push(region);
        }
        self.confidences.push(unit.confidence);
    }

    pub fn text(&self) -> String {
        self.text_parts.join("\n")
    }

    /// Mean of collected confidences, 0.0 when nothing was collected.
    pub fn mean_confidence(&self) -> f64 {
        if self.confidences.is_empty() {
            0.0
        } else {
            self.confidences.iter().sum::<f64>() / self.confidences.len() as f64
        }
    }
}

impl RawOutput {
    pub fn empty() -> Self {
        RawOutput::Tuples(Vec::new())
    }

    /// Classify a backend JSON payload.
    ///
    /// Accepts a single page or a list of pages (only the first page is read),
    /// a bare string, or nothing at all.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::empty()),
            Value::String(text) => Ok(RawOutput::PlainText {
                text,
                confidence: 1.0,
            }),
            Value::Object(mut page) => {
                if page.is_empty() {
                    return Ok(Self::empty());
                }
                if !page.contains_key("rec_texts") {
                    let keys: Vec<&String> = page.keys().collect();
                    return Err(OcrError::BackendExecution(format!(
                        "Unrecognized OCR output object with keys {keys:?}"
                    )));
                }
                let mut take_array = |key: &str| match page.remove(key) {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                Ok(RawOutput::ParallelArrays {
                    texts: take_array("rec_texts"),
                    scores: take_array("rec_scores"),
                    polys: take_array("rec_polys"),
                })
            }
            Value::Array(items) => {
                let Some(first) = items.first() else {
                    return Ok(Self::empty());
                };
                if is_tuple_entry(first) {
                    return Ok(RawOutput::Tuples(items));
                }
                // A list of pages.
                match items.into_iter().next() {
                    Some(page @ (Value::Object(_) | Value::Array(_) | Value::Null)) => {
                        Self::from_json(page)
                    }
                    Some(other) => Err(OcrError::BackendExecution(format!(
                        "Unrecognized OCR page: {other}"
                    ))),
                    None => Ok(Self::empty()),
                }
            }
            other => Err(OcrError::BackendExecution(format!(
                "Unrecognized OCR output: {other}"
            ))),
        }
    }

    /// Number of entries the parser will visit.
    pub fn len(&self) -> usize {
        match self {
            RawOutput::ParallelArrays { texts, .. } => texts.len(),
            RawOutput::Tuples(items) => items.len(),
            RawOutput::Records(records) => records.len(),
            RawOutput::PlainText { .. } => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parse every entry in backend order.
    pub fn units(&self) -> Vec<std::result::Result<ParsedUnit, SkipReason>> {
        match self {
            RawOutput::ParallelArrays {
                texts,
                scores,
                polys,
            } => texts
                .iter()
                .enumerate()
                .map(|(i, text)| parse_parallel_entry(text, scores.get(i), polys.get(i)))
                .collect(),
            RawOutput::Tuples(items) => items.iter().map(parse_tuple_entry).collect(),
            RawOutput::Records(records) => records.iter().map(parse_record).collect(),
            RawOutput::PlainText { text, confidence } => {
                let text = text.trim();
                if text.is_empty() {
                    vec![Err(SkipReason::EmptyText)]
                } else {
                    vec![Ok(ParsedUnit {
                        text: text.to_string(),
                        region: None,
                        confidence: *confidence,
                    })]
                }
            }
        }
    }

    /// Accumulate all units. `on_entry(done, total)` runs after every entry.
    pub fn parse_with<F>(&self, engine: &str, mut on_entry: F) -> ParsedPage
    where
        F: FnMut(usize, usize),
    {
        let units = self.units();
        let total = units.len();
        let mut page = ParsedPage::default();

        for (i, unit) in units.into_iter().enumerate() {
            match unit {
                Ok(unit) => page.push(unit),
                // Empty detections are routine, not worth a warning.
                Err(SkipReason::EmptyText) => page.skipped += 1,
                Err(reason) => {
                    warn!(engine = %engine, index = i, reason = %reason, "Skipping malformed OCR entry");
                    page.skipped += 1;
                }
            }
            on_entry(i + 1, total);
        }

        page
    }

    pub fn parse(&self, engine: &str) -> ParsedPage {
        self.parse_with(engine, |_, _| {})
    }
}

fn is_tuple_entry(value: &Value) -> bool {
    value
        .get(0)
        .and_then(|bx| bx.get(0))
        .and_then(|point| point.get(0))
        .is_some_and(Value::is_number)
}

fn as_score(value: &Value) -> std::result::Result<f64, SkipReason> {
    match value.as_f64() {
        Some(score) if score.is_finite() => Ok(score.clamp(0.0, 1.0)),
        _ => Err(SkipReason::InvalidScore(value.to_string())),
    }
}

fn as_text(value: &Value) -> std::result::Result<String, SkipReason> {
    match value {
        Value::String(s) if s.trim().is_empty() => Err(SkipReason::EmptyText),
        Value::String(s) => Ok(s.clone()),
        Value::Null => Err(SkipReason::EmptyText),
        _ => Err(SkipReason::TextNotString),
    }
}

/// Envelope of a polygon given as `[[x, y], ...]`. Needs at least four points.
fn polygon_region(poly: &Value) -> Option<TextRegion> {
    let points = poly.as_array()?;
    if points.len() < 4 {
        return None;
    }
    let coords: Option<Vec<(f64, f64)>> = points
        .iter()
        .map(|p| Some((p.get(0)?.as_f64()?, p.get(1)?.as_f64()?)))
        .collect();
    TextRegion::from_points(coords?)
}

fn parse_parallel_entry(
    text: &Value,
    score: Option<&Value>,
    poly: Option<&Value>,
) -> std::result::Result<ParsedUnit, SkipReason> {
    let text = as_text(text)?;
    let confidence = match score {
        Some(score) => as_score(score)?,
        None => 1.0,
    };
    let region = poly.and_then(polygon_region).unwrap_or_default();

    Ok(ParsedUnit {
        text,
        region: Some(region),
        confidence,
    })
}

fn parse_tuple_entry(entry: &Value) -> std::result::Result<ParsedUnit, SkipReason> {
    let items = match entry.as_array() {
        Some(items) if items.len() >= 2 => items,
        _ => return Err(SkipReason::NotAnEntry(entry.to_string())),
    };

    let (text, confidence) = match &items[1] {
        Value::Array(info) if info.len() >= 2 => (as_text(&info[0])?, as_score(&info[1])?),
        Value::Array(info) if info.len() == 1 => (as_text(&info[0])?, 1.0),
        Value::String(_) => (as_text(&items[1])?, 1.0),
        other => return Err(SkipReason::NotAnEntry(other.to_string())),
    };

    let region = polygon_region(&items[0]).ok_or(SkipReason::MissingBox)?;

    Ok(ParsedUnit {
        text,
        region: Some(region),
        confidence,
    })
}

fn parse_record(record: &RawRecord) -> std::result::Result<ParsedUnit, SkipReason> {
    if record.text.trim().is_empty() {
        return Err(SkipReason::EmptyText);
    }
    if !record.confidence.is_finite() {
        return Err(SkipReason::InvalidScore(record.confidence.to_string()));
    }

    Ok(ParsedUnit {
        text: record.text.clone(),
        region: Some(record.region),
        confidence: record.confidence.clamp(0.0, 1.0),
    })
}
