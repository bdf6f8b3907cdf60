use crate::error::ExtractError;
use async_trait::async_trait;
use lopdf::Document;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Separator placed between page texts in [`ExtractedText::text`].
pub const PAGE_SEPARATOR: &str = "\n\n";
const PDF_MAGIC: &[u8] = b"%PDF-";
const DJVU_MAGIC: &[u8] = b"AT&TFORM";
const PDF_MAGIC_WINDOW: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Djvu,
}

impl DocumentFormat {
    /// Magic bytes win; the file name is only consulted when they are inconclusive.
    pub fn detect(bytes: &[u8], name_hint: Option<&str>) -> Result<Self, ExtractError> {
        if bytes.starts_with(DJVU_MAGIC) {
            return Ok(Self::Djvu);
        }
        let window = &bytes[..bytes.len().min(PDF_MAGIC_WINDOW)];
        if window
            .windows(PDF_MAGIC.len())
            .any(|candidate| candidate == PDF_MAGIC)
        {
            return Ok(Self::Pdf);
        }

        match name_hint.and_then(Self::from_name) {
            Some(format) => Ok(format),
            None => Err(ExtractError::UnsupportedFormat(
                name_hint.unwrap_or("<unnamed>").to_string(),
            )),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let extension = name.rsplit_once('.')?.1.to_ascii_lowercase();
        match extension.as_str() {
            "pdf" => Some(Self::Pdf),
            "djvu" | "djv" => Some(Self::Djvu),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Djvu => "djvu",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// Byte range of one page inside [`ExtractedText::text`]; empty pages have `start == end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSpan {
    pub page: u32,
    pub start: usize,
    pub end: usize,
}

/// Normalized text of a whole document with its page boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedText {
    pub text: String,
    pub pages: Vec<PageSpan>,
}

impl ExtractedText {
    pub fn from_pages(pages: Vec<PageText>) -> Result<Self, ExtractError> {
        let mut text = String::new();
        let mut spans = Vec::with_capacity(pages.len());

        for page in pages {
            let normalized = normalize_page(&page.text);
            if normalized.is_empty() {
                spans.push(PageSpan {
                    page: page.number,
                    start: text.len(),
                    end: text.len(),
                });
                continue;
            }
            if !text.is_empty() {
                text.push_str(PAGE_SEPARATOR);
            }
            let start = text.len();
            text.push_str(&normalized);
            spans.push(PageSpan {
                page: page.number,
                start,
                end: text.len(),
            });
        }

        if text.is_empty() {
            return Err(ExtractError::NoText);
        }
        Ok(Self { text, pages: spans })
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Page that owns `offset`; separator bytes belong to the preceding page.
    pub fn page_at(&self, offset: usize) -> u32 {
        self.pages
            .iter()
            .filter(|span| span.start < span.end && span.start <= offset)
            .last()
            .or_else(|| self.pages.iter().find(|span| span.start < span.end))
            .map_or(1, |span| span.page)
    }

    pub fn page_text(&self, position: usize) -> &str {
        self.pages
            .get(position)
            .map_or("", |span| &self.text[span.start..span.end])
    }

    /// Text of the pages at the given positions, each prefixed with its page label.
    pub fn labelled_pages(&self, positions: std::ops::Range<usize>) -> String {
        positions
            .filter_map(|position| {
                let span = self.pages.get(position)?;
                let text = self.page_text(position);
                (!text.is_empty()).then(|| format!("--- page {} ---\n{}", span.page, text))
            })
            .collect::<Vec<_>>()
            .join(PAGE_SEPARATOR)
    }
}

/// Collapses intra-line whitespace and blank-line runs while keeping paragraph breaks.
pub fn normalize_page(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = false;

    for line in text.replace('\u{a0}', " ").replace('\u{000c}', "\n").lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            blank_run = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run { "\n\n" } else { "\n" });
        }
        out.push_str(&collapsed);
        blank_run = false;
    }

    out
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, bytes: &[u8], name_hint: Option<&str>) -> Result<ExtractedText, ExtractError>;
}

/// PDF through lopdf, DjVu through the `djvutxt` binary from DjVuLibre.
#[derive(Debug, Clone)]
pub struct BookExtractor {
    pub djvutxt: PathBuf,
    pub tool_timeout: Duration,
}

impl Default for BookExtractor {
    fn default() -> Self {
        Self {
            djvutxt: PathBuf::from("djvutxt"),
            tool_timeout: Duration::from_secs(300),
        }
    }
}

#[async_trait]
impl TextExtractor for BookExtractor {
    async fn extract(&self, bytes: &[u8], name_hint: Option<&str>) -> Result<ExtractedText, ExtractError> {
        let format = DocumentFormat::detect(bytes, name_hint)?;
        debug!(format = format.extension(), size = bytes.len(), "extracting document text");

        let pages = match format {
            DocumentFormat::Pdf => {
                let owned = bytes.to_vec();
                tokio::task::spawn_blocking(move || extract_pdf_pages(&owned))
                    .await
                    .map_err(|error| ExtractError::PdfParse(error.to_string()))??
            }
            DocumentFormat::Djvu => self.extract_djvu_pages(bytes).await?,
        };

        ExtractedText::from_pages(pages)
    }
}

impl BookExtractor {
    async fn extract_djvu_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, ExtractError> {
        let scratch = tempfile::Builder::new()
            .prefix("bookwise-")
            .suffix(".djvu")
            .tempfile()?;
        tokio::fs::write(scratch.path(), bytes).await?;

        let child = Command::new(&self.djvutxt)
            .arg(scratch.path())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| ExtractError::ToolFailed {
                tool: "djvutxt",
                details: error.to_string(),
            })?;

        let output = tokio::time::timeout(self.tool_timeout, child.wait_with_output())
            .await
            .map_err(|_| ExtractError::ToolTimeout { tool: "djvutxt" })??;

        if !output.status.success() {
            return Err(ExtractError::ToolFailed {
                tool: "djvutxt",
                details: format!(
                    "exit status {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(split_form_feed_pages(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<PageText>, ExtractError> {
    let document = Document::load_mem(bytes).map_err(|error| ExtractError::PdfParse(error.to_string()))?;

    let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    if page_numbers.is_empty() {
        return Err(ExtractError::PdfParse("document has no pages".to_string()));
    }

    Ok(page_numbers
        .into_iter()
        .map(|number| {
            let text = document.extract_text(&[number]).unwrap_or_else(|error| {
                warn!(page = number, error = %error, "page text could not be decoded");
                String::new()
            });
            PageText { number, text }
        })
        .collect())
}

/// `djvutxt` ends every page with a form feed.
pub fn split_form_feed_pages(raw: &str) -> Vec<PageText> {
    let raw = raw.strip_suffix('\n').unwrap_or(raw);
    let raw = raw.strip_suffix('\u{000c}').unwrap_or(raw);
    raw.split('\u{000c}')
        .enumerate()
        .map(|(index, text)| PageText {
            number: index as u32 + 1,
            text: text.to_string(),
        })
        .collect()
}
