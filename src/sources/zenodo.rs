use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use super::{write_document, Paper, PaperSource, SearchOptions, SourceError};
use crate::{net, paginate, paginate::PageOutcome, pdf};

const BASE_URL: &str = "https://zenodo.org";

/// Zenodo's open records API. A bearer token raises rate limits and unlocks
/// restricted records but anonymous access works for public ones.
pub struct ZenodoClient {
    client: reqwest::Client,
    token: Option<String>,
}

impl ZenodoClient {
    pub fn new(token: Option<String>) -> Self {
        Self {
            client: net::http_client(Duration::from_secs(30)),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn get_record(&self, paper_id: &str) -> Result<ZenodoRecord, SourceError> {
        let id = numeric_record_id(paper_id);
        let url = format!("{}/api/records/{}", BASE_URL, id);
        let resp = self.authorize(self.client.get(&url)).send().await?;
        if !resp.status().is_success() {
            return Err(SourceError::DocumentUnavailable(format!(
                "could not fetch Zenodo record {} (HTTP {})",
                paper_id,
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }

    fn download_name(rec: &ZenodoRecord, file: &ZenodoFile) -> String {
        let id = rec.id.map(|i| i.to_string()).unwrap_or_else(|| "file".into());
        let mut filename = file
            .key
            .clone()
            .unwrap_or_else(|| format!("zenodo_{}.pdf", id));
        if !filename.to_lowercase().ends_with(".pdf") {
            filename.push_str(".pdf");
        }
        let basename = Path::new(&filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(filename);
        format!("zenodo_{}_{}", id, basename)
    }
}

#[async_trait]
impl PaperSource for ZenodoClient {
    fn name(&self) -> &'static str {
        "zenodo"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        opts: &SearchOptions,
    ) -> Result<Vec<Paper>, SourceError> {
        let q = build_query(query, opts);
        let page_size = max_results.min(100);
        let papers = paginate::walk(page_size, max_results, |cursor| {
            let page = cursor / page_size.max(1) + 1;
            let mut params = vec![
                ("q".to_string(), q.clone()),
                ("page".to_string(), page.to_string()),
                ("size".to_string(), page_size.to_string()),
            ];
            if let Some(sort) = opts.sort.clone() {
                params.push(("sort".to_string(), sort));
            }
            if let Some(order) = opts.order.clone() {
                params.push(("order".to_string(), order));
            }
            async move {
                let req = self
                    .authorize(self.client.get(format!("{}/api/records", BASE_URL)))
                    .query(&params);
                let resp = match req.send().await {
                    Ok(resp) if resp.status().is_success() => resp,
                    Ok(resp) => {
                        tracing::warn!("zenodo search returned HTTP {}", resp.status());
                        return PageOutcome::Abort;
                    }
                    Err(err) => {
                        tracing::warn!("zenodo search failed: {}", err);
                        return PageOutcome::Abort;
                    }
                };
                match resp.json::<SearchEnvelope>().await {
                    Ok(body) => {
                        let hits = body.hits.hits.unwrap_or_default();
                        let fetched = hits.len();
                        let items = hits.iter().filter_map(record_to_paper).collect();
                        PageOutcome::Page(items, fetched)
                    }
                    Err(err) => {
                        tracing::warn!("zenodo response unreadable: {}", err);
                        PageOutcome::Abort
                    }
                }
            }
        })
        .await;
        Ok(papers)
    }

    async fn download_pdf(&self, paper_id: &str, save_dir: &Path) -> Result<PathBuf, SourceError> {
        let rec = self.get_record(paper_id).await?;
        let file = rec
            .files
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|f| is_pdf_file(f))
            .ok_or_else(|| {
                SourceError::DocumentUnavailable(format!(
                    "no PDF file available for Zenodo record {}",
                    paper_id
                ))
            })?;
        let download_url = file
            .links
            .as_ref()
            .and_then(|l| l.download.clone().or_else(|| l.self_url.clone()))
            .ok_or_else(|| {
                SourceError::DocumentUnavailable(
                    "no downloadable link for the selected file".to_string(),
                )
            })?;

        let bytes = net::with_retry(3, None, || async {
            let resp = self.authorize(self.client.get(&download_url)).send().await?;
            if !resp.status().is_success() {
                return Err(SourceError::Status(resp.status().as_u16()));
            }
            Ok(resp.bytes().await?)
        })
        .await?;

        write_document(save_dir, &Self::download_name(&rec, file), &bytes).await
    }

    async fn read_paper(&self, paper_id: &str, save_dir: &Path) -> Result<String, SourceError> {
        let id = numeric_record_id(paper_id);
        let prefix = format!("zenodo_{}_", id);
        let mut existing = None;
        if let Ok(mut entries) = tokio::fs::read_dir(save_dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with(&prefix) && name.to_lowercase().ends_with(".pdf") {
                    existing = Some(entry.path());
                    break;
                }
            }
        }
        let path = match existing {
            Some(path) => path,
            None => self.download_pdf(paper_id, save_dir).await?,
        };
        pdf::extract_text(&path)
    }
}

#[derive(Deserialize)]
struct SearchEnvelope {
    hits: SearchHits,
}

#[derive(Deserialize)]
struct SearchHits {
    hits: Option<Vec<ZenodoRecord>>,
}

#[derive(Deserialize, Default)]
struct ZenodoRecord {
    id: Option<u64>,
    doi: Option<String>,
    conceptdoi: Option<String>,
    created: Option<String>,
    updated: Option<String>,
    links: Option<RecordLinks>,
    files: Option<Vec<ZenodoFile>>,
    metadata: Option<RecordMetadata>,
}

#[derive(Deserialize)]
struct RecordLinks {
    html: Option<String>,
    latest_html: Option<String>,
}

#[derive(Deserialize)]
struct ZenodoFile {
    key: Option<String>,
    #[serde(rename = "type")]
    file_type: Option<String>,
    mimetype: Option<String>,
    links: Option<FileLinks>,
}

#[derive(Deserialize)]
struct FileLinks {
    download: Option<String>,
    #[serde(rename = "self")]
    self_url: Option<String>,
}

#[derive(Deserialize, Default)]
struct RecordMetadata {
    title: Option<String>,
    creators: Option<Vec<Creator>>,
    description: Option<String>,
    publication_date: Option<String>,
    dates: Option<Vec<DateEntry>>,
    doi: Option<String>,
    keywords: Option<Keywords>,
    resource_type: Option<serde_json::Value>,
    communities: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct Creator {
    name: Option<String>,
}

#[derive(Deserialize)]
struct DateEntry {
    #[serde(rename = "type")]
    date_type: Option<String>,
    date: Option<String>,
}

/// `metadata.keywords` is sometimes a plain string.
#[derive(Deserialize)]
#[serde(untagged)]
enum Keywords {
    Many(Vec<String>),
    One(String),
}

fn is_pdf_file(f: &ZenodoFile) -> bool {
    f.key
        .as_deref()
        .is_some_and(|k| k.to_lowercase().ends_with(".pdf"))
        || f.file_type.as_deref() == Some("pdf")
        || f.mimetype.as_deref() == Some("application/pdf")
}

/// Extract the numeric record id from a bare id or a record URL.
fn numeric_record_id(paper_id: &str) -> String {
    if paper_id.starts_with("http") {
        for part in paper_id.split('/') {
            if !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()) {
                return part.to_string();
            }
        }
    }
    paper_id.to_string()
}

fn record_to_paper(rec: &ZenodoRecord) -> Option<Paper> {
    let metadata = rec.metadata.as_ref();
    let title = metadata
        .and_then(|m| m.title.clone())
        .unwrap_or_default();
    let doi = rec
        .doi
        .clone()
        .or_else(|| metadata.and_then(|m| m.doi.clone()))
        .unwrap_or_default();
    let url = rec
        .links
        .as_ref()
        .and_then(|l| l.html.clone().or_else(|| l.latest_html.clone()))
        .unwrap_or_default();

    let id = match rec.id {
        Some(id) => id.to_string(),
        None if !doi.is_empty() => doi.clone(),
        None if !url.is_empty() => url.clone(),
        None => title.clone(),
    };
    if id.is_empty() {
        return None;
    }

    // publication_date, else a preferred entry from the dates list, else
    // the record's own timestamps
    let raw_date = metadata
        .and_then(|m| m.publication_date.clone())
        .or_else(|| metadata.and_then(|m| preferred_date(m.dates.as_deref()?)))
        .or_else(|| rec.updated.clone())
        .or_else(|| rec.created.clone());
    let published = raw_date.as_deref().and_then(parse_date).unwrap_or_else(Paper::epoch);

    let pdf_url = rec
        .files
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|f| is_pdf_file(f))
        .and_then(|f| f.links.as_ref())
        .and_then(|l| l.download.clone().or_else(|| l.self_url.clone()))
        .unwrap_or_default();

    let keywords = match metadata.and_then(|m| m.keywords.as_ref()) {
        Some(Keywords::Many(v)) => v.clone(),
        Some(Keywords::One(s)) => vec![s.clone()],
        None => Vec::new(),
    };
    let categories = metadata
        .and_then(|m| m.resource_type.as_ref())
        .and_then(|rt| rt.get("type"))
        .and_then(|t| t.as_str())
        .map(|t| vec![t.to_string()])
        .unwrap_or_default();

    let mut extra = serde_json::Map::new();
    extra.insert("conceptdoi".into(), json!(rec.conceptdoi.clone()));
    extra.insert(
        "resource_type".into(),
        metadata
            .and_then(|m| m.resource_type.clone())
            .unwrap_or(serde_json::Value::Null),
    );
    extra.insert(
        "communities".into(),
        metadata
            .and_then(|m| m.communities.clone())
            .unwrap_or(serde_json::Value::Null),
    );

    Some(Paper {
        id,
        title,
        authors: metadata
            .and_then(|m| m.creators.as_deref())
            .unwrap_or_default()
            .iter()
            .filter_map(|c| c.name.clone())
            .collect(),
        abstract_text: metadata
            .and_then(|m| m.description.clone())
            .unwrap_or_default(),
        url,
        pdf_url,
        published,
        updated: rec.updated.as_deref().and_then(parse_date),
        source: "zenodo".to_string(),
        categories,
        keywords,
        doi,
        extra,
    })
}

/// Pick a date entry whose type marks publication, falling back to the first
/// entry carrying any date at all.
fn preferred_date(dates: &[DateEntry]) -> Option<String> {
    let mut fallback = None;
    for entry in dates {
        let Some(date) = entry.date.clone() else {
            continue;
        };
        let kind = entry.date_type.as_deref().unwrap_or("").to_lowercase();
        if matches!(kind.as_str(), "issued" | "published" | "publication") {
            return Some(date);
        }
        if fallback.is_none() {
            fallback = Some(date);
        }
    }
    fallback
}

/// Zenodo dates come as full timestamps, plain dates, year-month, or bare
/// years.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    let day_part = s.split('T').next().unwrap_or(s);
    if let Ok(date) = NaiveDate::parse_from_str(day_part, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(&format!("{}-01", day_part), "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(year) = day_part.parse::<i32>() {
        return NaiveDate::from_ymd_opt(year, 1, 1);
    }
    None
}

/// Assemble a Lucene query from the free-text query and the structured
/// filters; an empty set of parts matches everything.
fn build_query(query: &str, opts: &SearchOptions) -> String {
    let mut parts = Vec::new();
    if !query.is_empty() {
        parts.push(format!("({})", query));
    }
    if let Some(community) = opts.community.as_deref() {
        parts.push(format!("communities:{}", community));
    }
    if let Some(filter) = year_filter(opts.year.as_deref()) {
        parts.push(filter);
    }
    if let Some(rt) = opts.resource_type.as_deref() {
        parts.push(format!("resource_type.type:{}", rt));
    }
    if let Some(subtype) = opts.subtype.as_deref() {
        parts.push(format!("resource_type.subtype:{}", subtype));
    }
    if !opts.creators.is_empty() {
        let names: Vec<String> = opts.creators.iter().map(|c| format!("\"{}\"", c)).collect();
        parts.push(format!("creators.name:({})", names.join(" OR ")));
    }
    if !opts.keywords.is_empty() {
        let kws: Vec<String> = opts.keywords.iter().map(|k| format!("\"{}\"", k)).collect();
        parts.push(format!("keywords:({})", kws.join(" OR ")));
    }
    if parts.is_empty() {
        "*".to_string()
    } else {
        parts.join(" AND ")
    }
}

/// "2021" matches one year, "2016-2020" a closed range, "2019-" an open one.
fn year_filter(year: Option<&str>) -> Option<String> {
    let y = year?.trim();
    if y.is_empty() {
        return None;
    }
    if let Some((start, end)) = y.split_once('-') {
        let start = if start.trim().is_empty() { "*" } else { start.trim() };
        let end = if end.trim().is_empty() { "*" } else { end.trim() };
        return Some(format!("metadata.publication_date:[{} TO {}]", start, end));
    }
    Some(format!("metadata.publication_date:[{} TO {}]", y, y))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RECORD: &str = r#"{
        "id": 1234567,
        "doi": "10.5281/zenodo.1234567",
        "conceptdoi": "10.5281/zenodo.1234566",
        "created": "2022-01-05T08:00:00+00:00",
        "updated": "2022-02-10T09:30:00+00:00",
        "links": {"html": "https://zenodo.org/records/1234567"},
        "files": [
            {"key": "notes.txt", "mimetype": "text/plain",
             "links": {"self": "https://zenodo.org/api/files/a/notes.txt"}},
            {"key": "paper.pdf", "mimetype": "application/pdf",
             "links": {"download": "https://zenodo.org/api/files/a/paper.pdf"}}
        ],
        "metadata": {
            "title": "A Dataset Paper",
            "creators": [{"name": "Doe, Jane"}, {"name": "Roe, Richard"}],
            "description": "We archived a dataset.",
            "dates": [
                {"type": "collected", "date": "2021-03-01"},
                {"type": "issued", "date": "2021-11-20"}
            ],
            "keywords": ["datasets", "archiving"],
            "resource_type": {"type": "publication", "subtype": "article"},
            "communities": [{"id": "examples"}]
        }
    }"#;

    #[test]
    fn normalizes_record() {
        let rec: ZenodoRecord = serde_json::from_str(SAMPLE_RECORD).unwrap();
        let paper = record_to_paper(&rec).unwrap();
        assert_eq!(paper.id, "1234567");
        assert_eq!(paper.source, "zenodo");
        assert_eq!(paper.authors, vec!["Doe, Jane", "Roe, Richard"]);
        // no publication_date: the "issued" entry wins over "collected"
        assert_eq!(
            paper.published,
            NaiveDate::from_ymd_opt(2021, 11, 20).unwrap()
        );
        assert_eq!(
            paper.updated,
            Some(NaiveDate::from_ymd_opt(2022, 2, 10).unwrap())
        );
        // the text file is skipped
        assert_eq!(paper.pdf_url, "https://zenodo.org/api/files/a/paper.pdf");
        assert_eq!(paper.categories, vec!["publication"]);
        assert_eq!(paper.extra["conceptdoi"], "10.5281/zenodo.1234566");
    }

    #[test]
    fn pdf_file_matched_by_key_type_or_mimetype() {
        let by_key: ZenodoFile = serde_json::from_str(r#"{"key": "X.PDF"}"#).unwrap();
        let by_type: ZenodoFile = serde_json::from_str(r#"{"key": "x", "type": "pdf"}"#).unwrap();
        let by_mime: ZenodoFile =
            serde_json::from_str(r#"{"key": "x", "mimetype": "application/pdf"}"#).unwrap();
        let other: ZenodoFile = serde_json::from_str(r#"{"key": "x.csv"}"#).unwrap();
        assert!(is_pdf_file(&by_key));
        assert!(is_pdf_file(&by_type));
        assert!(is_pdf_file(&by_mime));
        assert!(!is_pdf_file(&other));
    }

    #[test]
    fn date_parsing_accepts_partial_precision() {
        assert_eq!(
            parse_date("2023-05-17T10:00:00Z"),
            NaiveDate::from_ymd_opt(2023, 5, 17)
        );
        assert_eq!(parse_date("2021-07"), NaiveDate::from_ymd_opt(2021, 7, 1));
        assert_eq!(parse_date("2020"), NaiveDate::from_ymd_opt(2020, 1, 1));
        assert_eq!(parse_date("not a date"), None);
    }

    #[test]
    fn builds_compound_queries() {
        let mut opts = SearchOptions::default();
        assert_eq!(build_query("", &opts), "*");

        opts.community = Some("astronomy".into());
        opts.year = Some("2016-2020".into());
        opts.creators = vec!["Doe, Jane".into()];
        opts.keywords = vec!["stars".into(), "dust".into()];
        assert_eq!(
            build_query("nebula", &opts),
            "(nebula) AND communities:astronomy AND \
             metadata.publication_date:[2016 TO 2020] AND \
             creators.name:(\"Doe, Jane\") AND keywords:(\"stars\" OR \"dust\")"
        );
    }

    #[test]
    fn year_filter_handles_open_ranges() {
        assert_eq!(
            year_filter(Some("2021")).unwrap(),
            "metadata.publication_date:[2021 TO 2021]"
        );
        assert_eq!(
            year_filter(Some("2019-")).unwrap(),
            "metadata.publication_date:[2019 TO *]"
        );
        assert_eq!(year_filter(Some("  ")), None);
    }

    #[test]
    fn record_id_extracted_from_url() {
        assert_eq!(numeric_record_id("https://zenodo.org/records/555"), "555");
        assert_eq!(numeric_record_id("1234567"), "1234567");
    }

    #[test]
    fn download_name_keeps_record_prefix() {
        let rec: ZenodoRecord = serde_json::from_str(r#"{"id": 42}"#).unwrap();
        let file: ZenodoFile = serde_json::from_str(r#"{"key": "sub/dir/paper"}"#).unwrap();
        assert_eq!(ZenodoClient::download_name(&rec, &file), "zenodo_42_paper.pdf");
    }
}
