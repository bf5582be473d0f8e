use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use quick_xml::events::Event;
use quick_xml::Reader;

use super::{write_document, Paper, PaperSource, SearchOptions, SourceError};
use crate::{net, pdf};

const BASE_URL: &str = "http://export.arxiv.org/api/query";
const PDF_URL: &str = "https://arxiv.org/pdf";

pub struct ArxivClient {
    client: reqwest::Client,
}

impl ArxivClient {
    pub fn new() -> Self {
        Self {
            client: net::http_client(Duration::from_secs(30)),
        }
    }

    fn pdf_path(paper_id: &str, save_dir: &Path) -> PathBuf {
        save_dir.join(format!("{}.pdf", paper_id))
    }
}

#[async_trait]
impl PaperSource for ArxivClient {
    fn name(&self) -> &'static str {
        "arxiv"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        _opts: &SearchOptions,
    ) -> Result<Vec<Paper>, SourceError> {
        let search_query = format!("all:{}", query);
        let max = max_results.to_string();
        let text = self
            .client
            .get(BASE_URL)
            .query(&[
                ("search_query", search_query.as_str()),
                ("max_results", max.as_str()),
                ("sortBy", "submittedDate"),
                ("sortOrder", "descending"),
            ])
            .send()
            .await?
            .text()
            .await?;
        let mut papers = parse_atom_feed(&text)?;
        papers.truncate(max_results);
        Ok(papers)
    }

    async fn download_pdf(
        &self,
        paper_id: &str,
        save_dir: &Path,
    ) -> Result<PathBuf, SourceError> {
        let url = format!("{}/{}.pdf", PDF_URL, paper_id);
        let bytes = net::with_retry(3, None, || async {
            let resp = self.client.get(&url).send().await?;
            if !resp.status().is_success() {
                return Err(SourceError::Status(resp.status().as_u16()));
            }
            Ok(resp.bytes().await?)
        })
        .await?;
        write_document(save_dir, &format!("{}.pdf", paper_id), &bytes).await
    }

    async fn read_paper(&self, paper_id: &str, save_dir: &Path) -> Result<String, SourceError> {
        let mut path = Self::pdf_path(paper_id, save_dir);
        if !path.exists() {
            path = self.download_pdf(paper_id, save_dir).await?;
        }
        pdf::extract_text(&path)
    }
}

/// Parse the arXiv Atom feed into canonical records. Entries missing an id
/// or title are dropped.
fn parse_atom_feed(xml: &str) -> Result<Vec<Paper>, SourceError> {
    let mut reader = Reader::from_str(xml);
    let mut papers = Vec::new();
    let mut in_entry = false;
    let mut in_author = false;
    let mut current_tag = String::new();
    let mut entry = EntryFields::default();
    let mut author_name = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "entry" {
                    in_entry = true;
                    entry = EntryFields::default();
                } else if in_entry {
                    current_tag = tag.clone();
                    if tag == "author" {
                        in_author = true;
                        author_name.clear();
                    }
                    if tag == "link" {
                        entry.read_link(&e);
                    }
                    if tag == "category" {
                        entry.read_category(&e);
                    }
                }
            }
            Ok(Event::Empty(e)) if in_entry => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "link" {
                    entry.read_link(&e);
                } else if tag == "category" {
                    entry.read_category(&e);
                }
            }
            Ok(Event::Text(e)) if in_entry => {
                let text = e.unescape().unwrap_or_default().to_string();
                match current_tag.as_str() {
                    "title" => entry.title.push_str(&text),
                    "summary" => entry.summary.push_str(&text),
                    "id" if entry.id_url.is_empty() => entry.id_url = text,
                    "published" => entry.published.push_str(&text),
                    "updated" => entry.updated.push_str(&text),
                    "name" if in_author => author_name.push_str(&text),
                    _ if current_tag.contains("doi") => entry.doi = text,
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "entry" && in_entry {
                    in_entry = false;
                    if let Some(paper) = entry.into_paper() {
                        papers.push(paper);
                    }
                    entry = EntryFields::default();
                } else if tag == "author" && in_author {
                    in_author = false;
                    if !author_name.trim().is_empty() {
                        entry.authors.push(author_name.trim().to_string());
                    }
                }
                if tag == current_tag {
                    current_tag.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SourceError::Parse(format!("XML parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(papers)
}

#[derive(Default)]
struct EntryFields {
    id_url: String,
    title: String,
    summary: String,
    authors: Vec<String>,
    published: String,
    updated: String,
    pdf_url: String,
    abs_url: String,
    categories: Vec<String>,
    doi: String,
}

impl EntryFields {
    fn read_link(&mut self, e: &quick_xml::events::BytesStart<'_>) {
        let mut href = String::new();
        let mut link_type = String::new();
        let mut title_attr = String::new();
        for attr in e.attributes().flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let val = String::from_utf8_lossy(&attr.value).to_string();
            match key.as_str() {
                "href" => href = val,
                "type" => link_type = val,
                "title" => title_attr = val,
                _ => {}
            }
        }
        if link_type == "application/pdf" || title_attr == "pdf" {
            self.pdf_url = href;
        } else if self.abs_url.is_empty() && href.contains("abs") {
            self.abs_url = href;
        }
    }

    fn read_category(&mut self, e: &quick_xml::events::BytesStart<'_>) {
        for attr in e.attributes().flatten() {
            if attr.key.as_ref() == b"term" {
                let term = String::from_utf8_lossy(&attr.value).to_string();
                if !term.is_empty() {
                    self.categories.push(term);
                }
            }
        }
    }

    fn into_paper(self) -> Option<Paper> {
        // the entry id is a URL; the bare arXiv id is its last segment
        let id = self
            .id_url
            .rsplit('/')
            .next()
            .unwrap_or(&self.id_url)
            .to_string();
        let title = self.title.trim().replace('\n', " ");
        if id.is_empty() || title.is_empty() {
            return None;
        }
        let url = if self.abs_url.is_empty() {
            self.id_url.clone()
        } else {
            self.abs_url.clone()
        };
        Some(Paper {
            id,
            title,
            authors: self.authors,
            abstract_text: self.summary.trim().replace('\n', " "),
            url,
            pdf_url: self.pdf_url,
            published: parse_date(&self.published).unwrap_or_else(Paper::epoch),
            updated: parse_date(&self.updated),
            source: "arxiv".to_string(),
            categories: self.categories,
            keywords: Vec::new(),
            doi: self.doi,
            extra: serde_json::Map::new(),
        })
    }
}

/// Atom timestamps are RFC 3339; the date is the first ten characters.
fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.get(..10)?, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_ATOM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <entry>
    <id>http://arxiv.org/abs/2301.12345v1</id>
    <title>Test Paper on AdS/CFT</title>
    <summary>This is a test abstract about AdS/CFT correspondence.</summary>
    <published>2023-01-15T00:00:00Z</published>
    <updated>2023-02-01T00:00:00Z</updated>
    <author><name>John Doe</name></author>
    <author><name>Jane Smith</name></author>
    <link href="http://arxiv.org/abs/2301.12345v1" rel="alternate" type="text/html"/>
    <link href="http://arxiv.org/pdf/2301.12345v1" title="pdf" type="application/pdf"/>
    <category term="hep-th"/>
    <category term="gr-qc"/>
    <arxiv:doi>10.1000/test.doi</arxiv:doi>
  </entry>
  <entry>
    <id></id>
    <title>Dropped: no id</title>
  </entry>
</feed>"#;

    #[test]
    fn parses_atom_entries() {
        let papers = parse_atom_feed(SAMPLE_ATOM).unwrap();
        assert_eq!(papers.len(), 1);
        let p = &papers[0];
        assert_eq!(p.id, "2301.12345v1");
        assert_eq!(p.source, "arxiv");
        assert!(p.title.contains("AdS/CFT"));
        assert_eq!(p.authors, vec!["John Doe", "Jane Smith"]);
        assert_eq!(p.published, NaiveDate::from_ymd_opt(2023, 1, 15).unwrap());
        assert_eq!(p.updated, NaiveDate::from_ymd_opt(2023, 2, 1));
        assert_eq!(p.pdf_url, "http://arxiv.org/pdf/2301.12345v1");
        assert_eq!(p.categories, vec!["hep-th", "gr-qc"]);
        assert_eq!(p.doi, "10.1000/test.doi");
    }

    #[test]
    fn malformed_xml_is_a_parse_error() {
        let err = parse_atom_feed("<feed><entry><title>x</feed>").unwrap_err();
        assert!(matches!(err, SourceError::Parse(_)));
    }

    /// A document already present at the expected path is read without any
    /// network access (a download attempt would fail in the test
    /// environment).
    #[tokio::test]
    async fn read_paper_skips_download_when_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2301.00001.pdf");
        crate::pdf::tests_support::write_single_line_pdf(&path, "already here");
        let client = ArxivClient::new();
        let text = client.read_paper("2301.00001", dir.path()).await.unwrap();
        assert_eq!(text, "already here");
    }
}
