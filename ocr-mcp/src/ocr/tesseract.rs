use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use leptess::LepTess;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{OcrError, Result};
use crate::models::TextRegion;

use super::engine::Backend;
use super::raw::{RawOutput, RawRecord};

/// Tesseract TSV level for a single word.
const WORD_LEVEL: u32 = 5;
const TSV_COLUMNS: usize = 12;

/// Normalize a language list into the sorted, de-duplicated set used for both
/// the Tesseract init string and the registry fingerprint.
pub fn normalize_languages<S: AsRef<str>>(languages: &[S]) -> Vec<String> {
    let mut langs: Vec<String> = languages
        .iter()
        .map(|l| l.as_ref().trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    langs.sort();
    langs.dedup();
    langs
}

/// Multilingual backend on the Tesseract library.
pub struct TesseractBackend {
    tesseract: Arc<Mutex<LepTess>>,
    languages: Vec<String>,
}

impl TesseractBackend {
    /// Blocking: loads traineddata for every language.
    pub fn new(data_path: Option<&str>, languages: &[String]) -> Result<Self> {
        let languages = normalize_languages(languages);
        if languages.is_empty() {
            return Err(OcrError::InvalidInput(
                "At least one Tesseract language is required".to_string(),
            ));
        }

        let lang_spec = languages.join("+");
        let lt = LepTess::new(data_path, &lang_spec).map_err(|e| {
            OcrError::BackendUnavailable(format!("Tesseract not available for '{lang_spec}': {e}"))
        })?;
        info!(languages = %lang_spec, "Tesseract OCR initialized");

        Ok(Self {
            tesseract: Arc::new(Mutex::new(lt)),
            languages,
        })
    }

    pub fn languages(&self) -> &[String] {
        &self.languages
    }
}

#[async_trait]
impl Backend for TesseractBackend {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    async fn run(&self, image_path: &Path) -> Result<RawOutput> {
        let bytes = tokio::fs::read(image_path)
            .await
            .map_err(|e| OcrError::InvalidInput(format!("Failed to read image: {e}")))?;
        let tesseract = Arc::clone(&self.tesseract);

        let tsv = tokio::task::spawn_blocking(move || {
            let mut lt = tesseract.blocking_lock();
            lt.set_image_from_mem(&bytes)
                .map_err(|e| OcrError::BackendExecution(format!("Failed to set image: {e}")))?;
            lt.get_tsv_text(0)
                .map_err(|e| OcrError::BackendExecution(format!("Failed to extract text: {e}")))
        })
        .await??;

        Ok(RawOutput::Records(parse_tsv(&tsv)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct LineKey {
    page: u32,
    block: u32,
    paragraph: u32,
    line: u32,
}

struct Word {
    key: LineKey,
    region: TextRegion,
    confidence: f64,
    text: String,
}

fn parse_word_row(row: &str) -> std::result::Result<Option<Word>, String> {
    let cols: Vec<&str> = row.split('\t').collect();
    if cols.len() < TSV_COLUMNS {
        return Err(format!("expected {TSV_COLUMNS} columns, got {}", cols.len()));
    }

    let int = |i: usize| -> std::result::Result<u32, String> {
        cols[i]
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("column {i} '{}': {e}", cols[i]))
    };

    if int(0)? != WORD_LEVEL {
        return Ok(None);
    }

    let text = cols[TSV_COLUMNS - 1..].join("\t").trim().to_string();
    if text.is_empty() {
        return Ok(None);
    }

    let key = LineKey {
        page: int(1)?,
        block: int(2)?,
        paragraph: int(3)?,
        line: int(4)?,
    };
    let (left, top, width, height) = (int(6)?, int(7)?, int(8)?, int(9)?);
    let confidence = cols[10]
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("confidence '{}': {e}", cols[10]))?;

    let right = left
        .checked_add(width)
        .ok_or_else(|| format!("box overflows: left {left} + width {width}"))?;
    let bottom = top
        .checked_add(height)
        .ok_or_else(|| format!("box overflows: top {top} + height {height}"))?;

    Ok(Some(Word {
        key,
        region: TextRegion::new(left as f64, top as f64, right as f64, bottom as f64),
        confidence,
        text,
    }))
}

struct LineAcc {
    words: Vec<String>,
    region: TextRegion,
    confidences: Vec<f64>,
}

/// Group Tesseract TSV word rows into one record per text line, in reading order.
pub fn parse_tsv(tsv: &str) -> Vec<RawRecord> {
    let mut order: Vec<LineKey> = Vec::new();
    let mut lines: HashMap<LineKey, LineAcc> = HashMap::new();

    for (n, row) in tsv.lines().enumerate() {
        if row.starts_with("level") || row.trim().is_empty() {
            continue;
        }
        let word = match parse_word_row(row) {
            Ok(Some(word)) => word,
            Ok(None) => continue,
            Err(reason) => {
                warn!(engine = "tesseract", row = n, reason = %reason, "Skipping malformed TSV row");
                continue;
            }
        };

        let acc = lines.entry(word.key).or_insert_with(|| {
            order.push(word.key);
            LineAcc {
                words: Vec::new(),
                region: word.region,
                confidences: Vec::new(),
            }
        });
        acc.words.push(word.text);
        acc.region = acc.region.union(&word.region);
        if word.confidence >= 0.0 {
            acc.confidences.push(word.confidence);
        }
    }

    order
        .into_iter()
        .filter_map(|key| lines.remove(&key))
        .map(|acc| {
            let confidence = if acc.confidences.is_empty() {
                0.0
            } else {
                acc.confidences.iter().sum::<f64>() / acc.confidences.len() as f64 / 100.0
            };
            RawRecord {
                text: acc.words.join(" "),
                confidence,
                region: acc.region,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn tsv(rows: &[&str]) -> String {
        let mut out = vec![HEADER];
        out.extend_from_slice(rows);
        out.join("\n")
    }

    #[test]
    fn test_normalize_languages_sorts_and_dedups() {
        assert_eq!(
            normalize_languages(&["eng", " chi_sim", "eng", ""]),
            vec!["chi_sim".to_string(), "eng".to_string()]
        );
    }

    #[test]
    fn test_overflowing_box_row_is_skipped() {
        let input = tsv(&[
            "5\t1\t1\t1\t1\t1\t4294967295\t10\t10\t20\t90\tHuge",
            "5\t1\t1\t1\t1\t2\t10\t4294967290\t10\t20\t90\tTall",
            "5\t1\t1\t1\t2\t1\t10\t40\t40\t20\t95\tKept",
        ]);

        let records = parse_tsv(&input);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "Kept");
        assert_eq!(records[0].region, TextRegion::new(10.0, 40.0, 50.0, 60.0));
    }

    #[test]
    fn test_words_grouped_into_lines() {
        let input = tsv(&[
            "1\t1\t0\t0\t0\t0\t0\t0\t200\t100\t-1\t",
            "4\t1\t1\t1\t1\t0\t10\t10\t120\t20\t-1\t",
            "5\t1\t1\t1\t1\t1\t10\t10\t50\t20\t90\tHello",
            "5\t1\t1\t1\t1\t2\t70\t12\t60\t18\t80\tWorld",
            "5\t1\t1\t1\t2\t1\t10\t40\t40\t20\t95\tSecond",
        ]);

        let records = parse_tsv(&input);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text, "Hello World");
        assert_eq!(records[0].region, TextRegion::new(10.0, 10.0, 130.0, 30.0));
        assert!((records[0].confidence - 0.85).abs() < 1e-9);
        assert_eq!(records[1].text, "Second");
        assert!((records[1].confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let input = tsv(&[
            "5\t1\t1\t1\t1\t1\t10\t10\t50\t20\t90\tGood",
            "5\t1\t1\t1\tx\t2\t70\t12\t60\t18\t80\tBadLine",
            "5\t1\t1",
            "5\t1\t1\t1\t1\t3\t130\t10\t40\t20\t70\tAlso",
        ]);

        let records = parse_tsv(&input);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "Good Also");
    }

    #[test]
    fn test_blank_words_ignored() {
        let input = tsv(&["5\t1\t1\t1\t1\t1\t10\t10\t50\t20\t95\t   "]);
        assert!(parse_tsv(&input).is_empty());
    }

    #[test]
    fn test_empty_tsv() {
        assert!(parse_tsv("").is_empty());
        assert!(parse_tsv(HEADER).is_empty());
    }
}
