use crate::error::{CoreError, CoreResult};
use lopdf::Document as PdfDocument;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Parser output: markdown-flavored text plus page accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPdf {
    pub markdown: String,
    pub page_count: usize,
}

/// PDF-to-text boundary. The pipeline only sees this trait; the concrete
/// extractor is swappable (tests use a stub).
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Parser: Send + Sync {
    async fn parse(&self, path: &Path) -> CoreResult<ParsedPdf>;
}

/// lopdf-based extractor, page by page. Pages that fail text extraction are
/// skipped with a warning; a document where every page fails still yields
/// its (possibly empty) accumulated text, and empty text is the pipeline's
/// no-content case, not ours.
pub struct PdfParser;

impl PdfParser {
    fn parse_blocking(path: &Path) -> CoreResult<ParsedPdf> {
        let doc = PdfDocument::load(path)
            .map_err(|e| CoreError::PermanentUpstream(format!("unsupported PDF: {}", e)))?;
        let pages = doc.get_pages();
        let page_count = pages.len();

        let mut content = String::new();
        for (page_num, _) in pages.iter() {
            match doc.extract_text(&[*page_num]) {
                Ok(text) => {
                    content.push_str(&text);
                    content.push('\n');
                }
                Err(e) => {
                    warn!("Failed to extract text from page {}: {}", page_num, e);
                }
            }
        }

        debug!("Parsed {} pages, {} chars", page_count, content.len());

        Ok(ParsedPdf {
            markdown: content,
            page_count,
        })
    }
}

#[async_trait::async_trait]
impl Parser for PdfParser {
    async fn parse(&self, path: &Path) -> CoreResult<ParsedPdf> {
        let owned: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::parse_blocking(&owned))
            .await
            .map_err(|e| CoreError::InvariantViolation(format!("parser task panicked: {}", e)))?
    }
}
