//! Embedded prompt template and usage guide served by the MCP tools.

use std::sync::LazyLock;

use regex::Regex;
use rust_embed::RustEmbed;
use serde::Serialize;

use crate::error::{OcrError, Result};

#[derive(RustEmbed)]
#[folder = "assets/"]
struct GuideAssets;

pub const PROMPT_TEMPLATE_FILE: &str = "prompt_template.md";
pub const USAGE_GUIDE_FILE: &str = "usage_guide.md";
pub const SCENARIO_NAME: &str = "General template";

static TEMPLATE_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^##[ \t]+Template\b.*$")
        .unwrap_or_else(|e| panic!("Failed to compile regex pattern: {e}"))
});
static SECTION_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^##[ \t]")
        .unwrap_or_else(|e| panic!("Failed to compile regex pattern: {e}"))
});
static RULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^-{3,}[ \t]*\r?$")
        .unwrap_or_else(|e| panic!("Failed to compile regex pattern: {e}"))
});

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptTemplate {
    pub template: String,
    pub scenario_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageGuide {
    pub guide: String,
    pub tips: String,
    pub examples: String,
}

fn load_asset(name: &str) -> Result<String> {
    let file = GuideAssets::get(name)
        .ok_or_else(|| OcrError::Internal(format!("Embedded asset '{name}' is missing")))?;
    let content = String::from_utf8(file.data.into_owned())
        .map_err(|e| OcrError::Internal(format!("Embedded asset '{name}' is not UTF-8: {e}")))?;

    if content.trim().is_empty() {
        return Err(OcrError::Internal(format!("Embedded asset '{name}' is empty")));
    }
    Ok(content)
}

/// The body of the `## Template` section, or the whole document without one.
pub fn extract_template(content: &str) -> String {
    let Some(heading) = TEMPLATE_HEADING.find(content) else {
        return content.trim().to_string();
    };

    let body = &content[heading.end()..];
    let end = SECTION_HEADING
        .find(body)
        .map(|m| m.start())
        .unwrap_or(body.len());
    body[..end].trim().to_string()
}

/// Split on markdown horizontal rules into guide, tips and examples.
pub fn split_usage_guide(content: &str) -> UsageGuide {
    let mut parts = RULE.split(content).map(|part| part.trim().to_string());

    UsageGuide {
        guide: parts.next().unwrap_or_default(),
        tips: parts.next().unwrap_or_default(),
        examples: parts.next().unwrap_or_default(),
    }
}

pub fn prompt_template() -> Result<PromptTemplate> {
    let content = load_asset(PROMPT_TEMPLATE_FILE)?;
    Ok(PromptTemplate {
        template: extract_template(&content),
        scenario_name: SCENARIO_NAME.to_string(),
    })
}

pub fn usage_guide() -> Result<UsageGuide> {
    let content = load_asset(USAGE_GUIDE_FILE)?;
    Ok(split_usage_guide(&content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_extract_template_section() {
        let doc = "# Title\n\nIntro\n\n## Template\n\nDo the thing.\n\n## Notes\n\nIgnored";
        assert_eq!(extract_template(doc), "Do the thing.");
    }

    #[test]
    fn test_extract_template_runs_to_end() {
        let doc = "## Template content\nLine one\n### Sub\nLine two\n";
        assert_eq!(extract_template(doc), "Line one\n### Sub\nLine two");
    }

    #[test]
    fn test_extract_template_falls_back_to_whole_file() {
        assert_eq!(extract_template("  just text \n"), "just text");
    }

    #[test]
    fn test_split_three_parts() {
        let guide = split_usage_guide("Guide\n---\nTips\n-----\nExamples\n");
        assert_eq!(
            guide,
            UsageGuide {
                guide: "Guide".to_string(),
                tips: "Tips".to_string(),
                examples: "Examples".to_string(),
            }
        );
    }

    #[test]
    fn test_split_missing_parts_are_empty() {
        let two = split_usage_guide("Guide\n---\nTips");
        assert_eq!(two.examples, "");

        let one = split_usage_guide("Only a guide with a -- dash");
        assert_eq!(one.guide, "Only a guide with a -- dash");
        assert_eq!(one.tips, "");
    }

    #[test]
    fn test_embedded_assets_load() {
        let template = prompt_template().unwrap();
        assert!(template.template.contains("{text}"));
        assert!(!template.template.contains("## Notes"));
        assert_eq!(template.scenario_name, SCENARIO_NAME);

        let guide = usage_guide().unwrap();
        assert!(guide.guide.contains("recognize_image_paddleocr"));
        assert!(guide.tips.starts_with("# Tips"));
        assert!(guide.examples.starts_with("# Examples"));
    }

    #[test]
    fn test_missing_asset_is_error() {
        assert!(load_asset("nope.md").is_err());
    }
}
