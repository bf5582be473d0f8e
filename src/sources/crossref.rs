use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use super::{Paper, PaperSource, SearchOptions, SourceError};
use crate::net;

const BASE_URL: &str = "https://api.crossref.org/works";

const NO_DOWNLOAD: &str = "CrossRef does not provide direct PDF downloads. CrossRef is a \
     citation database that provides metadata about academic papers. To access the full \
     text, use the paper's DOI or URL to visit the publisher's website.";

const NO_READ: &str = "CrossRef papers cannot be read directly through this tool. Only \
     metadata and abstracts are available through CrossRef's API. To access the full \
     text, use the paper's DOI or URL to visit the publisher's website.";

pub struct CrossRefClient {
    client: reqwest::Client,
}

impl CrossRefClient {
    pub fn new() -> Self {
        Self {
            client: net::http_client(Duration::from_secs(30)),
        }
    }
}

#[async_trait]
impl PaperSource for CrossRefClient {
    fn name(&self) -> &'static str {
        "crossref"
    }

    /// One request, with a single courtesy retry after two seconds when the
    /// API answers 429. Any other failure yields an empty result set rather
    /// than an error.
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        opts: &SearchOptions,
    ) -> Result<Vec<Paper>, SourceError> {
        let rows = max_results.min(1000).to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("query", query),
            ("rows", rows.as_str()),
            ("sort", opts.sort.as_deref().unwrap_or("relevance")),
            ("order", opts.order.as_deref().unwrap_or("desc")),
        ];
        if let Some(filter) = opts.filter.as_deref() {
            params.push(("filter", filter));
        }

        let request = || self.client.get(BASE_URL).query(&params).send();
        let resp = match request().await {
            Ok(resp) if resp.status().as_u16() == 429 => {
                tokio::time::sleep(Duration::from_secs(2)).await;
                match request().await {
                    Ok(resp) => resp,
                    Err(err) => {
                        tracing::warn!("crossref search failed: {}", err);
                        return Ok(Vec::new());
                    }
                }
            }
            Ok(resp) => resp,
            Err(err) => {
                tracing::warn!("crossref search failed: {}", err);
                return Ok(Vec::new());
            }
        };
        if !resp.status().is_success() {
            return Ok(Vec::new());
        }
        let body: CrossrefResponse = match resp.json().await {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!("crossref response unreadable: {}", err);
                return Ok(Vec::new());
            }
        };
        let mut papers: Vec<Paper> = body
            .message
            .items
            .unwrap_or_default()
            .iter()
            .filter_map(work_to_paper)
            .collect();
        papers.truncate(max_results);
        Ok(papers)
    }

    async fn download_pdf(
        &self,
        _paper_id: &str,
        _save_dir: &Path,
    ) -> Result<PathBuf, SourceError> {
        Err(SourceError::DocumentUnavailable(NO_DOWNLOAD.to_string()))
    }

    async fn read_paper(&self, _paper_id: &str, _save_dir: &Path) -> Result<String, SourceError> {
        Ok(NO_READ.to_string())
    }
}

#[derive(Deserialize)]
struct CrossrefResponse {
    message: CrossrefMessage,
}

#[derive(Deserialize)]
struct CrossrefMessage {
    items: Option<Vec<CrossrefWork>>,
}

#[derive(Deserialize, Default)]
struct CrossrefWork {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    title: Option<OneOrMany>,
    author: Option<Vec<CrossrefAuthor>>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    published: Option<CrossrefDate>,
    issued: Option<CrossrefDate>,
    created: Option<CrossrefDate>,
    #[serde(rename = "URL")]
    url: Option<String>,
    resource: Option<CrossrefResource>,
    link: Option<Vec<CrossrefLink>>,
    #[serde(rename = "container-title")]
    container_title: Option<OneOrMany>,
    publisher: Option<String>,
    #[serde(rename = "type")]
    work_type: Option<String>,
    subject: Option<Vec<String>>,
    #[serde(rename = "is-referenced-by-count")]
    citation_count: Option<u64>,
    volume: Option<String>,
    issue: Option<String>,
    page: Option<String>,
}

/// Some CrossRef fields are sometimes an array, sometimes a scalar.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<String>),
    One(String),
}

impl OneOrMany {
    fn first(&self) -> String {
        match self {
            OneOrMany::Many(v) => v.first().cloned().unwrap_or_default(),
            OneOrMany::One(s) => s.clone(),
        }
    }
}

#[derive(Deserialize)]
struct CrossrefAuthor {
    given: Option<String>,
    family: Option<String>,
}

#[derive(Deserialize)]
struct CrossrefDate {
    #[serde(rename = "date-parts")]
    date_parts: Option<Vec<Vec<Option<u32>>>>,
}

#[derive(Deserialize)]
struct CrossrefResource {
    primary: Option<CrossrefPrimary>,
}

#[derive(Deserialize)]
struct CrossrefPrimary {
    #[serde(rename = "URL")]
    url: Option<String>,
}

#[derive(Deserialize)]
struct CrossrefLink {
    #[serde(rename = "URL")]
    url: Option<String>,
    #[serde(rename = "content-type")]
    content_type: Option<String>,
}

/// Map one work to a canonical record; works without a DOI are dropped.
fn work_to_paper(work: &CrossrefWork) -> Option<Paper> {
    let doi = work.doi.clone().filter(|d| !d.is_empty())?;
    let published = extract_date(work.published.as_ref())
        .or_else(|| extract_date(work.issued.as_ref()))
        .or_else(|| extract_date(work.created.as_ref()))
        .unwrap_or_else(Paper::epoch);
    let url = work
        .url
        .clone()
        .unwrap_or_else(|| format!("https://doi.org/{}", doi));

    let mut extra = serde_json::Map::new();
    extra.insert("publisher".into(), json!(work.publisher.clone().unwrap_or_default()));
    extra.insert(
        "container_title".into(),
        json!(work.container_title.as_ref().map(OneOrMany::first).unwrap_or_default()),
    );
    extra.insert("volume".into(), json!(work.volume.clone().unwrap_or_default()));
    extra.insert("issue".into(), json!(work.issue.clone().unwrap_or_default()));
    extra.insert("page".into(), json!(work.page.clone().unwrap_or_default()));
    extra.insert("citations".into(), json!(work.citation_count.unwrap_or(0)));

    Some(Paper {
        id: doi.clone(),
        title: work.title.as_ref().map(OneOrMany::first).unwrap_or_default(),
        authors: extract_authors(work.author.as_deref().unwrap_or_default()),
        abstract_text: work.abstract_text.clone().unwrap_or_default(),
        url,
        pdf_url: extract_pdf_url(work),
        published,
        updated: None,
        source: "crossref".to_string(),
        categories: work.work_type.iter().cloned().collect(),
        keywords: work.subject.clone().unwrap_or_default(),
        doi,
        extra,
    })
}

/// Join structured names as "given family", falling back to whichever half
/// is present.
fn extract_authors(authors: &[CrossrefAuthor]) -> Vec<String> {
    authors
        .iter()
        .filter_map(|a| match (a.given.as_deref(), a.family.as_deref()) {
            (Some(g), Some(f)) if !g.is_empty() && !f.is_empty() => Some(format!("{} {}", g, f)),
            (_, Some(f)) if !f.is_empty() => Some(f.to_string()),
            (Some(g), _) if !g.is_empty() => Some(g.to_string()),
            _ => None,
        })
        .collect()
}

fn extract_date(date: Option<&CrossrefDate>) -> Option<NaiveDate> {
    let parts = date?.date_parts.as_ref()?.first()?;
    let year = (*parts.first()?)?;
    let month = parts.get(1).copied().flatten().unwrap_or(1);
    let day = parts.get(2).copied().flatten().unwrap_or(1);
    NaiveDate::from_ymd_opt(year as i32, month, day)
}

/// Prefer the primary resource link when it names a PDF file; otherwise scan
/// the link list for a PDF content type.
fn extract_pdf_url(work: &CrossrefWork) -> String {
    if let Some(url) = work
        .resource
        .as_ref()
        .and_then(|r| r.primary.as_ref())
        .and_then(|p| p.url.as_deref())
    {
        if url.ends_with(".pdf") {
            return url.to_string();
        }
    }
    work.link
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|l| {
            l.content_type
                .as_deref()
                .is_some_and(|ct| ct.to_lowercase().contains("pdf"))
        })
        .and_then(|l| l.url.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_WORK: &str = r#"{
        "DOI": "10.1234/example",
        "title": ["A Study of Things", "Subtitle"],
        "author": [
            {"given": "Ada", "family": "Lovelace"},
            {"family": "Turing"},
            {"given": "Solo"}
        ],
        "abstract": "<jats:p>Things were studied.</jats:p>",
        "issued": {"date-parts": [[2021, 6]]},
        "created": {"date-parts": [[2020, 1, 1]]},
        "URL": "https://doi.org/10.1234/example",
        "resource": {"primary": {"URL": "https://pub.example.org/article/42"}},
        "link": [
            {"URL": "https://pub.example.org/article/42.xml", "content-type": "text/xml"},
            {"URL": "https://pub.example.org/article/42.pdf", "content-type": "application/pdf"}
        ],
        "container-title": ["Journal of Things"],
        "publisher": "Example Press",
        "type": "journal-article",
        "subject": ["Computing"],
        "is-referenced-by-count": 17,
        "volume": "8", "issue": "2", "page": "100-110"
    }"#;

    #[test]
    fn normalizes_work() {
        let work: CrossrefWork = serde_json::from_str(SAMPLE_WORK).unwrap();
        let paper = work_to_paper(&work).unwrap();
        assert_eq!(paper.source, "crossref");
        assert_eq!(paper.id, "10.1234/example");
        assert_eq!(paper.title, "A Study of Things");
        assert_eq!(paper.authors, vec!["Ada Lovelace", "Turing", "Solo"]);
        // no "published" field: "issued" wins over "created"
        assert_eq!(
            paper.published,
            NaiveDate::from_ymd_opt(2021, 6, 1).unwrap()
        );
        // primary URL is not a .pdf: the link list supplies the PDF
        assert_eq!(paper.pdf_url, "https://pub.example.org/article/42.pdf");
        assert_eq!(paper.keywords, vec!["Computing"]);
        assert_eq!(paper.extra["citations"], 17);
        assert_eq!(paper.extra["container_title"], "Journal of Things");
    }

    #[test]
    fn scalar_title_is_accepted() {
        let work: CrossrefWork =
            serde_json::from_str(r#"{"DOI": "10.1/x", "title": "Plain"}"#).unwrap();
        let paper = work_to_paper(&work).unwrap();
        assert_eq!(paper.title, "Plain");
        assert_eq!(paper.abstract_text, "");
        assert_eq!(paper.published, Paper::epoch());
    }

    #[test]
    fn pdf_suffixed_primary_resource_wins() {
        let work: CrossrefWork = serde_json::from_str(
            r#"{
                "DOI": "10.1/y",
                "resource": {"primary": {"URL": "https://x.org/paper.pdf"}},
                "link": [{"URL": "https://x.org/other.pdf", "content-type": "application/pdf"}]
            }"#,
        )
        .unwrap();
        assert_eq!(work_to_paper(&work).unwrap().pdf_url, "https://x.org/paper.pdf");
    }

    #[test]
    fn work_without_doi_is_dropped() {
        let work: CrossrefWork = serde_json::from_str(r#"{"title": ["Orphan"]}"#).unwrap();
        assert!(work_to_paper(&work).is_none());
    }

    #[tokio::test]
    async fn download_is_unavailable_without_network() {
        let client = CrossRefClient::new();
        let err = client
            .download_pdf("10.1234/example", Path::new("/tmp"))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::DocumentUnavailable(_)));
    }

    #[tokio::test]
    async fn read_returns_explanatory_message() {
        let client = CrossRefClient::new();
        let msg = client
            .read_paper("10.1234/example", Path::new("/tmp"))
            .await
            .unwrap();
        assert!(msg.contains("CrossRef"));
    }
}
