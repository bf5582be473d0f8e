use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use super::{write_document, Paper, PaperSource, SearchOptions, SourceError};
use crate::paginate::{self, PageOutcome};
use crate::{net, pdf};

const PAGE_SIZE: usize = 100;
const DEFAULT_DAYS: u32 = 30;
const PAGE_RETRIES: u32 = 3;

/// bioRxiv and medRxiv share one API shape and one content URL scheme; the
/// two adapters are this client pointed at different servers.
pub struct RxivClient {
    client: reqwest::Client,
    source: &'static str,
    api_base: String,
    content_base: String,
}

impl RxivClient {
    pub fn biorxiv() -> Self {
        Self {
            client: net::http_client(Duration::from_secs(100)),
            source: "biorxiv",
            api_base: "https://api.biorxiv.org/details/biorxiv".to_string(),
            content_base: "https://www.biorxiv.org/content".to_string(),
        }
    }

    pub fn medrxiv() -> Self {
        Self {
            client: net::http_client(Duration::from_secs(30)),
            source: "medrxiv",
            api_base: "https://api.biorxiv.org/details/medrxiv".to_string(),
            content_base: "https://www.medrxiv.org/content".to_string(),
        }
    }

    fn item_to_paper(&self, item: &RxivItem) -> Option<Paper> {
        let doi = item.doi.as_deref().unwrap_or("").to_string();
        let title = item.title.as_deref().unwrap_or("").trim().to_string();
        if doi.is_empty() || title.is_empty() {
            return None;
        }
        let version = item.version.as_deref().unwrap_or("1");
        let url = format!("{}/{}v{}", self.content_base, doi, version);
        let date = item
            .date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
        Some(Paper {
            id: doi.clone(),
            title,
            authors: item
                .authors
                .as_deref()
                .unwrap_or("")
                .split("; ")
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect(),
            abstract_text: item.abstract_text.clone().unwrap_or_default(),
            pdf_url: format!("{}.full.pdf", url),
            url,
            published: date.unwrap_or_else(Paper::epoch),
            updated: date,
            source: self.source.to_string(),
            categories: item.category.iter().cloned().collect(),
            keywords: Vec::new(),
            doi,
            extra: serde_json::Map::new(),
        })
    }

    fn pdf_path(paper_id: &str, save_dir: &Path) -> PathBuf {
        save_dir.join(format!("{}.pdf", paper_id.replace('/', "_")))
    }

    fn page_url(&self, start: NaiveDate, end: NaiveDate, cursor: usize, category: &str) -> String {
        let mut url = format!("{}/{}/{}/{}", self.api_base, start, end, cursor);
        if !category.is_empty() {
            url = format!("{}?category={}", url, category);
        }
        url
    }

    /// Turn one fetched page into a walk outcome. A page lost after retries
    /// is dropped; the raw collection length is reported so the walk can
    /// tell a short final page from one thinned by the normalizer.
    fn page_outcome(&self, page: Result<RxivResponse, SourceError>, url: &str) -> PageOutcome<Paper> {
        match page {
            Ok(body) => {
                let collection = body.collection.unwrap_or_default();
                let fetched = collection.len();
                let items = collection
                    .iter()
                    .filter_map(|item| self.item_to_paper(item))
                    .collect();
                PageOutcome::Page(items, fetched)
            }
            Err(err) => {
                tracing::warn!("{}: dropping page at {}: {}", self.source, url, err);
                PageOutcome::Dropped
            }
        }
    }
}

#[async_trait]
impl PaperSource for RxivClient {
    fn name(&self) -> &'static str {
        self.source
    }

    /// Walk the trailing date window page by page. A page lost after three
    /// attempts is dropped and the walk continues with the next one.
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        opts: &SearchOptions,
    ) -> Result<Vec<Paper>, SourceError> {
        let days = opts.days.unwrap_or(DEFAULT_DAYS);
        let end = Utc::now().date_naive();
        let start = end - chrono::Duration::days(i64::from(days));
        let category = query.trim().to_lowercase().replace(' ', "_");

        let results = paginate::walk(PAGE_SIZE, max_results, |cursor| {
            let url = self.page_url(start, end, cursor, &category);
            async move {
                let page = net::with_retry(PAGE_RETRIES, None, || async {
                    let resp = self.client.get(&url).send().await?;
                    if !resp.status().is_success() {
                        return Err(SourceError::Status(resp.status().as_u16()));
                    }
                    Ok(resp.json::<RxivResponse>().await?)
                })
                .await;
                self.page_outcome(page, &url)
            }
        })
        .await;
        Ok(results)
    }

    async fn download_pdf(
        &self,
        paper_id: &str,
        save_dir: &Path,
    ) -> Result<PathBuf, SourceError> {
        if paper_id.is_empty() {
            return Err(SourceError::DocumentUnavailable(
                "empty paper identifier".to_string(),
            ));
        }
        let url = format!("{}/{}v1.full.pdf", self.content_base, paper_id);
        let bytes = net::with_retry(PAGE_RETRIES, None, || async {
            let resp = self
                .client
                .get(&url)
                .header(reqwest::header::USER_AGENT, net::random_browser_agent())
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(SourceError::Status(resp.status().as_u16()));
            }
            Ok(resp.bytes().await?)
        })
        .await?;
        write_document(
            save_dir,
            &format!("{}.pdf", paper_id.replace('/', "_")),
            &bytes,
        )
        .await
    }

    async fn read_paper(&self, paper_id: &str, save_dir: &Path) -> Result<String, SourceError> {
        let mut path = Self::pdf_path(paper_id, save_dir);
        if !path.exists() {
            path = self.download_pdf(paper_id, save_dir).await?;
        }
        pdf::extract_text(&path)
    }
}

#[derive(Deserialize)]
struct RxivResponse {
    collection: Option<Vec<RxivItem>>,
}

#[derive(Deserialize)]
struct RxivItem {
    doi: Option<String>,
    title: Option<String>,
    authors: Option<String>,
    date: Option<String>,
    version: Option<String>,
    category: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
}
