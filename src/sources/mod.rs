pub mod arxiv;
pub mod crossref;
pub mod elsevier;
pub mod researchgate;
pub mod rxiv;
pub mod scholar;
pub mod scihub;
pub mod zenodo;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Normalized paper record produced by every source.
///
/// Text fields use the empty string when the upstream payload has nothing;
/// none of them are ever null. `id` doubles as the file-naming key for
/// downloaded documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paper {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub url: String,
    pub pdf_url: String,
    pub published: NaiveDate,
    pub updated: Option<NaiveDate>,
    pub source: String,
    pub categories: Vec<String>,
    pub keywords: Vec<String>,
    pub doi: String,
    /// Provider-specific metadata that does not fit the common shape
    /// (publisher, venue, citation count, ...).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Paper {
    /// Date used when a source gives no usable publication date.
    pub fn epoch() -> NaiveDate {
        NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()
    }
}

/// Extra search parameters. Each source reads the fields it recognizes and
/// ignores the rest.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Trailing date window in days (bioRxiv/medRxiv).
    pub days: Option<u32>,
    /// Year or year range, e.g. "2025" or "2016-2020" (Zenodo), or a start
    /// year (Elsevier).
    pub year: Option<String>,
    /// Community slug (Zenodo).
    pub community: Option<String>,
    /// Resource type, e.g. "publication" (Zenodo).
    pub resource_type: Option<String>,
    /// Resource subtype, e.g. "conferencepaper" (Zenodo).
    pub subtype: Option<String>,
    /// Author names to match (Zenodo).
    pub creators: Vec<String>,
    /// Keywords to match (Zenodo).
    pub keywords: Vec<String>,
    /// Sort field (CrossRef, Zenodo).
    pub sort: Option<String>,
    /// Sort order, "asc" or "desc" (CrossRef, Zenodo).
    pub order: Option<String>,
    /// Raw filter expression (CrossRef).
    pub filter: Option<String>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    #[error("request failed after {attempts} attempts: {cause}")]
    NetworkFailure {
        attempts: u32,
        #[source]
        cause: Box<SourceError>,
    },
    #[error("no retrievable document: {0}")]
    DocumentUnavailable(String),
    #[error("failed to parse document: {0}")]
    DocumentParse(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Contract every paper source implements.
///
/// `search` returns at most `max_results` records, fewer when the upstream
/// feed is exhausted or a page is lost. `download_pdf` writes the document
/// into `save_dir` and returns the written path. `read_paper` downloads the
/// document first when it is not already at the expected path, then extracts
/// its text; sources whose access model never exposes full text instead
/// return an explanatory message.
#[async_trait]
pub trait PaperSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        opts: &SearchOptions,
    ) -> Result<Vec<Paper>, SourceError>;

    async fn download_pdf(&self, paper_id: &str, save_dir: &Path)
        -> Result<PathBuf, SourceError>;

    async fn read_paper(&self, paper_id: &str, save_dir: &Path) -> Result<String, SourceError>;
}

/// Write document bytes under `save_dir`, creating the directory if needed.
pub(crate) async fn write_document(
    save_dir: &Path,
    file_name: &str,
    bytes: &[u8],
) -> Result<PathBuf, SourceError> {
    tokio::fs::create_dir_all(save_dir).await?;
    let path = save_dir.join(file_name);
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paper_serializes_abstract_field_name() {
        let paper = Paper {
            id: "x1".into(),
            title: "T".into(),
            authors: vec![],
            abstract_text: "A".into(),
            url: String::new(),
            pdf_url: String::new(),
            published: Paper::epoch(),
            updated: None,
            source: "test".into(),
            categories: vec![],
            keywords: vec![],
            doi: String::new(),
            extra: serde_json::Map::new(),
        };
        let json = serde_json::to_value(&paper).unwrap();
        assert_eq!(json["abstract"], "A");
        assert_eq!(json["published"], "1970-01-01");
        assert!(json.get("extra").is_none());
    }
}
