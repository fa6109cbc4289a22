//! Page dumps: the text runs and viewports of a PDF, saved as JSON.
//!
//! `pidtag` never decodes PDF bytes. A page dump is produced by whatever
//! renders the PDF (one entry per page, as returned by the renderer's
//! text-content call) and is read here as the page collaborator the core
//! extracts from.
//!
//! Two shapes are accepted:
//!
//! ```json
//! {"pdfFileName": "unit-100.pdf", "pages": [{"pageNumber": 1, "textRuns": [...], "viewport": {...}}]}
//! [{"pageNumber": 1, "textRuns": [...]}]
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use pid_tagger_core::page::{PageContent, PageSource};

#[derive(Deserialize)]
#[serde(untagged)]
enum PageDump {
    Document {
        #[serde(rename = "pdfFileName", default)]
        pdf_file_name: Option<String>,
        pages: Vec<PageContent>,
    },
    Pages(Vec<PageContent>),
}

/// Pages loaded from a JSON dump, served by page number.
#[derive(Debug, Clone)]
pub struct JsonPageSource {
    pdf_file_name: String,
    pages: Vec<PageContent>,
}

impl JsonPageSource {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read page dump: {}", path.display()))?;
        let fallback = path
            .file_stem()
            .map(|s| format!("{}.pdf", s.to_string_lossy()))
            .unwrap_or_else(|| "document.pdf".to_string());
        Self::from_json(&content, &fallback)
            .with_context(|| format!("Invalid page dump: {}", path.display()))
    }

    /// Parse a dump. `fallback_name` is used when the dump does not name
    /// its PDF.
    pub fn from_json(content: &str, fallback_name: &str) -> Result<Self> {
        let dump: PageDump = serde_json::from_str(content)?;
        let (name, mut pages) = match dump {
            PageDump::Document { pdf_file_name, pages } => (pdf_file_name, pages),
            PageDump::Pages(pages) => (None, pages),
        };

        let mut seen = HashSet::new();
        for p in &pages {
            if p.page_number == 0 {
                bail!("page numbers are 1-based; found page 0");
            }
            if !seen.insert(p.page_number) {
                bail!("page {} appears more than once", p.page_number);
            }
        }
        pages.sort_by_key(|p| p.page_number);

        Ok(Self {
            pdf_file_name: name.unwrap_or_else(|| fallback_name.to_string()),
            pages,
        })
    }

    pub fn pdf_file_name(&self) -> &str {
        &self.pdf_file_name
    }

    pub fn pages(&self) -> &[PageContent] {
        &self.pages
    }
}

#[async_trait]
impl PageSource for JsonPageSource {
    /// Highest page number in the dump. Gaps are reported as missing pages.
    fn page_count(&self) -> u32 {
        self.pages.last().map_or(0, |p| p.page_number)
    }

    async fn page(&self, page_number: u32) -> Result<PageContent> {
        match self.pages.binary_search_by_key(&page_number, |p| p.page_number) {
            Ok(i) => Ok(self.pages[i].clone()),
            Err(_) => bail!("page {} is not in the dump", page_number),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUN: &str = r#"{"text":"PT","transform":[10,0,0,10,100,690],"width":14,"height":10}"#;

    #[test]
    fn accepts_wrapped_and_bare_dumps() {
        let wrapped = format!(
            r#"{{"pdfFileName":"unit.pdf","pages":[{{"pageNumber":2,"textRuns":[{}]}},{{"pageNumber":1,"textRuns":[]}}]}}"#,
            RUN
        );
        let src = JsonPageSource::from_json(&wrapped, "fallback.pdf").unwrap();
        assert_eq!(src.pdf_file_name(), "unit.pdf");
        assert_eq!(src.page_count(), 2);
        assert_eq!(src.pages()[0].page_number, 1);

        let bare = format!(r#"[{{"pageNumber":1,"textRuns":[{}]}}]"#, RUN);
        let src = JsonPageSource::from_json(&bare, "fallback.pdf").unwrap();
        assert_eq!(src.pdf_file_name(), "fallback.pdf");
        assert_eq!(src.pages()[0].text_runs[0].text, "PT");
    }

    #[test]
    fn rejects_duplicate_and_zero_pages() {
        let dup = r#"[{"pageNumber":1,"textRuns":[]},{"pageNumber":1,"textRuns":[]}]"#;
        assert!(JsonPageSource::from_json(dup, "x.pdf").is_err());
        let zero = r#"[{"pageNumber":0,"textRuns":[]}]"#;
        assert!(JsonPageSource::from_json(zero, "x.pdf").is_err());
    }

    #[tokio::test]
    async fn missing_pages_are_errors() {
        let src = JsonPageSource::from_json(r#"[{"pageNumber":3,"textRuns":[]}]"#, "x.pdf").unwrap();
        assert_eq!(src.page_count(), 3);
        assert!(src.page(1).await.is_err());
        assert!(src.page(3).await.is_ok());
    }
}
