//! Pull recognised text out of a batch-analyze response body.
//!
//! The response nests text several levels deep:
//!
//! ```text
//! results[] → results[] → textDetection|textAnnotation → pages[] → blocks[] → lines[] → words[].text
//! ```
//!
//! Words are joined with a space. Lines and blocks are all joined with a
//! single newline, so a page reads as one flat list of lines. Any level may be missing or `null`; that simply contributes no
//! text. Items carrying an `error` object are logged and skipped.

use crate::error::PageError;
use crate::output::PageOutcome;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use tracing::warn;

/// Zero-width and bidi control characters that sometimes ride along in OCR output.
static INVISIBLE_CHARS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\u{200B}-\u{200F}\u{202A}-\u{202E}\u{2060}-\u{2064}\u{FEFF}\u{00AD}]")
        .unwrap()
});

#[derive(Debug, Default, Deserialize)]
struct BatchResponse {
    #[serde(default, deserialize_with = "nullable")]
    results: Vec<AnalyzeResult>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalyzeResult {
    #[serde(default, deserialize_with = "nullable")]
    results: Vec<FeatureResult>,
    #[serde(default)]
    error: Option<ServiceStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeatureResult {
    #[serde(default, alias = "textAnnotation")]
    text_detection: Option<TextAnnotation>,
    #[serde(default)]
    error: Option<ServiceStatus>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceStatus {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.code, self.message.as_deref()) {
            (Some(c), Some(m)) => write!(f, "code {c}: {m}"),
            (Some(c), None) => write!(f, "code {c}"),
            (None, Some(m)) => f.write_str(m),
            (None, None) => f.write_str("unspecified error"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TextAnnotation {
    #[serde(default, deserialize_with = "nullable")]
    pages: Vec<TextPage>,
}

#[derive(Debug, Default, Deserialize)]
struct TextPage {
    #[serde(default, deserialize_with = "nullable")]
    blocks: Vec<Block>,
}

#[derive(Debug, Default, Deserialize)]
struct Block {
    #[serde(default, deserialize_with = "nullable")]
    lines: Vec<Line>,
}

#[derive(Debug, Default, Deserialize)]
struct Line {
    #[serde(default, deserialize_with = "nullable")]
    words: Vec<Word>,
}

#[derive(Debug, Default, Deserialize)]
struct Word {
    #[serde(default)]
    text: Option<String>,
}

/// Treat an explicit `null` the same as an absent field.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Extract and normalise the text of one page's response.
///
/// Returns [`PageOutcome::NoText`] when the structure holds no words, and
/// [`PageError::MalformedResponse`] when the body is not the expected JSON.
pub fn extract_text(body: &str, page: usize) -> Result<PageOutcome, PageError> {
    let response: BatchResponse =
        serde_json::from_str(body).map_err(|e| PageError::MalformedResponse {
            page,
            detail: e.to_string(),
        })?;

    let mut blocks: Vec<String> = Vec::new();
    for item in &response.results {
        if let Some(err) = &item.error {
            warn!("Page {}: service reported an error: {}", page, err);
            continue;
        }
        for feature in &item.results {
            if let Some(err) = &feature.error {
                warn!("Page {}: feature reported an error: {}", page, err);
                continue;
            }
            let Some(annotation) = &feature.text_detection else {
                continue;
            };
            for text_page in &annotation.pages {
                blocks.extend(text_page.blocks.iter().filter_map(block_text));
            }
        }
    }

    let text = normalize_text(&blocks.join("\n"));
    if text.is_empty() {
        Ok(PageOutcome::NoText)
    } else {
        Ok(PageOutcome::Text(text))
    }
}

fn block_text(block: &Block) -> Option<String> {
    let lines: Vec<String> = block
        .lines
        .iter()
        .map(|line| {
            line.words
                .iter()
                .filter_map(|w| w.text.as_deref())
                .map(str::trim)
                .filter(|w| !w.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|l| !l.is_empty())
        .collect();
    (!lines.is_empty()).then(|| lines.join("\n"))
}

/// Unify line endings, drop invisible characters and trim.
pub fn normalize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    INVISIBLE_CHARS.replace_all(&unified, "").trim().to_string()
}
