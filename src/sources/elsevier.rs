use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use serde_json::json;

use super::{Paper, PaperSource, SearchOptions, SourceError};
use crate::net;

const SEARCH_URL: &str = "https://api.elsevier.com/content/search/sciencedirect";
const ARTICLE_URL: &str = "https://api.elsevier.com/content/article/pii/";

pub struct ElsevierClient {
    client: reqwest::Client,
    api_key: String,
}

impl ElsevierClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: net::http_client(Duration::from_secs(30)),
            api_key,
        }
    }

    /// Fetch the article record for one PII and pull author, abstract and
    /// subject details out of its `coredata` block.
    async fn fetch_coredata(&self, pii: &str) -> Result<Coredata, SourceError> {
        let url = format!("{}{}?apiKey={}", ARTICLE_URL, pii, self.api_key);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(SourceError::Status(resp.status().as_u16()));
        }
        let body = resp.text().await?;
        parse_coredata(&body)
    }
}

#[async_trait]
impl PaperSource for ElsevierClient {
    fn name(&self) -> &'static str {
        "elsevier"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        opts: &SearchOptions,
    ) -> Result<Vec<Paper>, SourceError> {
        let from_year = opts
            .year
            .as_deref()
            .and_then(|y| y.split('-').next())
            .filter(|y| !y.is_empty())
            .unwrap_or("2020");
        let date = format!("{}-{}", from_year, Utc::now().year());
        let count = max_results.to_string();
        let params = [
            ("query", query),
            ("apiKey", self.api_key.as_str()),
            ("count", count.as_str()),
            ("date", date.as_str()),
            ("sort", "relevance"),
        ];
        let resp = match self.client.get(SEARCH_URL).query(&params).send().await {
            Ok(resp) => resp,
            Err(err) => {
                tracing::warn!("elsevier search failed: {}", err);
                return Ok(Vec::new());
            }
        };
        if !resp.status().is_success() {
            tracing::warn!("elsevier search returned HTTP {}", resp.status());
            return Ok(Vec::new());
        }
        let body: SearchEnvelope = match resp.json().await {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!("elsevier response unreadable: {}", err);
                return Ok(Vec::new());
            }
        };

        let mut papers = Vec::new();
        for entry in body.results.entry.unwrap_or_default() {
            let coredata = match entry.pii.as_deref() {
                Some(pii) => match self.fetch_coredata(pii).await {
                    Ok(core) => core,
                    Err(err) => {
                        tracing::warn!("elsevier article lookup failed: {}", err);
                        Coredata::default()
                    }
                },
                None => Coredata::default(),
            };
            if let Some(paper) = entry_to_paper(&entry, coredata) {
                papers.push(paper);
            }
            if papers.len() >= max_results {
                break;
            }
        }
        Ok(papers)
    }

    async fn download_pdf(&self, paper_id: &str, _save_dir: &Path) -> Result<PathBuf, SourceError> {
        Err(SourceError::DocumentUnavailable(format!(
            "PDF download not supported for Elsevier papers due to access restrictions. \
             Please access the paper via its DOI link: https://doi.org/{}",
            paper_id
        )))
    }

    async fn read_paper(&self, paper_id: &str, _save_dir: &Path) -> Result<String, SourceError> {
        Ok(format!(
            "PDF reading not supported for Elsevier papers due to access restrictions. \
             Please access the paper via its DOI link: https://doi.org/{}",
            paper_id
        ))
    }
}

#[derive(Deserialize)]
struct SearchEnvelope {
    #[serde(rename = "search-results")]
    results: SearchResults,
}

#[derive(Deserialize)]
struct SearchResults {
    entry: Option<Vec<SearchEntry>>,
}

#[derive(Deserialize, Default)]
struct SearchEntry {
    pii: Option<String>,
    #[serde(rename = "prism:doi")]
    doi: Option<String>,
    #[serde(rename = "dc:title")]
    title: Option<String>,
    #[serde(rename = "prism:url")]
    url: Option<String>,
    #[serde(rename = "prism:coverDate")]
    cover_date: Option<String>,
    #[serde(rename = "prism:publicationName")]
    publication: Option<String>,
}

#[derive(Default)]
struct Coredata {
    creators: Vec<String>,
    description: String,
    subjects: Vec<String>,
}

/// Entries carrying neither a DOI nor a PII have no usable identifier and
/// are dropped.
fn entry_to_paper(entry: &SearchEntry, core: Coredata) -> Option<Paper> {
    let doi = entry.doi.clone().unwrap_or_default();
    let id = if doi.is_empty() {
        entry.pii.clone().unwrap_or_default()
    } else {
        doi.clone()
    };
    if id.is_empty() {
        return None;
    }
    let published = entry
        .cover_date
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .unwrap_or_else(Paper::epoch);
    let pdf_url = if doi.is_empty() {
        String::new()
    } else {
        format!("https://doi.org/{}", doi)
    };

    let mut extra = serde_json::Map::new();
    extra.insert(
        "publication".into(),
        json!(entry.publication.clone().unwrap_or_default()),
    );

    Some(Paper {
        id,
        title: entry.title.clone().unwrap_or_default(),
        authors: core.creators,
        abstract_text: core.description,
        url: entry.url.clone().unwrap_or_default(),
        pdf_url,
        published,
        updated: Some(published),
        source: "elsevier".to_string(),
        categories: core.subjects.clone(),
        keywords: core.subjects,
        doi,
        extra,
    })
}

/// Pull `dc:creator`, `dc:description` and `dcterms:subject` out of the
/// article XML's `coredata` element.
fn parse_coredata(xml: &str) -> Result<Coredata, SourceError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut core = Coredata::default();
    let mut in_coredata = false;
    let mut current: Option<&'static str> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.name().as_ref().to_vec();
                if name == b"coredata" {
                    in_coredata = true;
                } else if in_coredata {
                    current = match name.as_slice() {
                        b"dc:creator" => Some("creator"),
                        b"dc:description" => Some("description"),
                        b"dcterms:subject" => Some("subject"),
                        _ => None,
                    };
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(field) = current {
                    let text = t
                        .unescape()
                        .map_err(|e| SourceError::Parse(e.to_string()))?
                        .trim()
                        .to_string();
                    if !text.is_empty() {
                        match field {
                            "creator" => core.creators.push(text),
                            "description" => core.description = text,
                            "subject" => core.subjects.push(text),
                            _ => {}
                        }
                    }
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"coredata" {
                    break;
                }
                current = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SourceError::Parse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(core)
}
