//! Technical analysis text attached to every successful recognition.

use serde::{Deserialize, Serialize};

use crate::models::RecognitionResult;

const HEADER: &str = "[Technical Analysis]";

/// Confidence band. Drives the basic metrics label and the quality section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceTier {
    Excellent,
    Good,
    Fair,
}

impl ConfidenceTier {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.90 {
            ConfidenceTier::Excellent
        } else if confidence >= 0.70 {
            ConfidenceTier::Good
        } else {
            ConfidenceTier::Fair
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConfidenceTier::Excellent => "excellent",
            ConfidenceTier::Good => "good",
            ConfidenceTier::Fair => "fair",
        }
    }

    pub fn threshold(&self) -> &'static str {
        match self {
            ConfidenceTier::Excellent => "≥0.90",
            ConfidenceTier::Good => "0.70-0.90",
            ConfidenceTier::Fair => "<0.70",
        }
    }

    pub fn quality(&self) -> &'static str {
        match self {
            ConfidenceTier::Excellent => "high, text is clear and readable",
            ConfidenceTier::Good => "medium, check key content",
            ConfidenceTier::Fair => "low, manual proofreading recommended",
        }
    }

    pub fn suggestion(&self) -> &'static str {
        match self {
            ConfidenceTier::Excellent => "Result is reliable and can be used directly",
            ConfidenceTier::Good => "Result is mostly reliable, verify important content",
            ConfidenceTier::Fair => "Recognition quality is low, proofread manually or re-run recognition",
        }
    }
}

/// Layout facts from a spatial analysis pass. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutInfo {
    pub paragraph_count: Option<usize>,
    pub underline_count: Option<usize>,
    pub alignment: Option<String>,
}

impl LayoutInfo {
    fn is_empty(&self) -> bool {
        self.paragraph_count.is_none() && self.underline_count.is_none() && self.alignment.is_none()
    }
}

fn alignment_label(alignment: &str) -> &str {
    match alignment {
        "left" => "left-aligned",
        "right" => "right-aligned",
        "center" => "centered",
        "justify" => "justified",
        other => other,
    }
}

/// Build the multi-section analysis text for a result.
pub fn generate_analysis(result: &RecognitionResult, layout: Option<&LayoutInfo>) -> String {
    let tier = ConfidenceTier::from_confidence(result.confidence());
    let mut sections = vec![
        basic_metrics(result, tier),
        text_statistics(result.text()),
    ];

    if let Some(layout) = layout.filter(|l| !l.is_empty()) {
        sections.push(layout_section(layout));
    }

    sections.push(quality_assessment(tier));
    sections.join("\n\n")
}

/// Generate the analysis and attach it to the result in place.
pub fn attach_analysis(result: &mut RecognitionResult, layout: Option<&LayoutInfo>) {
    let analysis = generate_analysis(result, layout);
    result.attach_analysis(analysis);
}

fn basic_metrics(result: &RecognitionResult, tier: ConfidenceTier) -> String {
    format!(
        "{HEADER}\nEngine: {}\nProcessing time: {:.2}s\nConfidence: {:.2} ({})\nText regions: {}",
        result.engine(),
        result.processing_time(),
        result.confidence(),
        tier.label(),
        result.regions().len()
    )
}

fn text_statistics(text: &str) -> String {
    let char_count = text.chars().filter(|c| !c.is_whitespace()).count();
    let line_count = text.lines().filter(|l| !l.trim().is_empty()).count();
    let paragraph_count = text
        .split("\n\n")
        .filter(|p| !p.trim().is_empty())
        .count();

    let mut out = format!("Text statistics:\n- Characters: {char_count}");
    if line_count > 0 {
        out.push_str(&format!("\n- Lines: {line_count}"));
    }
    if paragraph_count > 1 {
        out.push_str(&format!("\n- Paragraphs: {paragraph_count} (from blank lines)"));
    } else if paragraph_count == 1 && line_count > 1 {
        out.push_str("\n- Paragraphs: 1");
    }
    out
}

fn layout_section(layout: &LayoutInfo) -> String {
    let mut out = String::from("Layout:");
    if let Some(count) = layout.paragraph_count {
        out.push_str(&format!("\n- Paragraphs: {count} (from positions)"));
    }
    match layout.underline_count {
        Some(0) => out.push_str("\n- Underlines: none"),
        Some(count) => out.push_str(&format!("\n- Underlines: {count}")),
        None => {}
    }
    if let Some(alignment) = &layout.alignment {
        out.push_str(&format!("\n- Main alignment: {}", alignment_label(alignment)));
    }
    out
}

fn quality_assessment(tier: ConfidenceTier) -> String {
    format!(
        "Quality assessment:\n- Confidence tier: {} ({})\n- Recognition quality: {}\n- Suggestion: {}",
        tier.label(),
        tier.threshold(),
        tier.quality(),
        tier.suggestion()
    )
}
