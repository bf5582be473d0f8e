use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use scraper::{Html, Selector};

use super::{Paper, PaperSource, SearchOptions, SourceError};
use crate::{net, paginate, paginate::PageOutcome};

const SCHOLAR_URL: &str = "https://scholar.google.com/scholar";

/// Scrapes Google Scholar result pages. There is no API; each page is
/// requested with a rotated browser user agent and a randomized delay, and
/// the walk stops at the first failed or empty page.
pub struct ScholarClient {
    client: reqwest::Client,
}

impl ScholarClient {
    pub fn new() -> Self {
        Self {
            client: net::http_client(Duration::from_secs(30)),
        }
    }
}

#[async_trait]
impl PaperSource for ScholarClient {
    fn name(&self) -> &'static str {
        "google_scholar"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        _opts: &SearchOptions,
    ) -> Result<Vec<Paper>, SourceError> {
        let per_page = max_results.min(10);
        let papers = paginate::walk(per_page, max_results, |start| async move {
            net::courtesy_delay(Duration::from_secs(1), Duration::from_secs(2)).await;
            let resp = self
                .client
                .get(SCHOLAR_URL)
                .query(&[
                    ("q", query),
                    ("start", &start.to_string()),
                    ("hl", "en"),
                    ("as_sdt", "0,5"),
                ])
                .header("User-Agent", net::random_browser_agent())
                .header("Accept", "text/html,application/xhtml+xml")
                .header("Accept-Language", "en-US,en;q=0.9")
                .send()
                .await;
            let resp = match resp {
                Ok(resp) if resp.status().is_success() => resp,
                Ok(resp) => {
                    tracing::warn!("scholar page returned HTTP {}", resp.status());
                    return PageOutcome::Abort;
                }
                Err(err) => {
                    tracing::warn!("scholar page fetch failed: {}", err);
                    return PageOutcome::Abort;
                }
            };
            let html = match resp.text().await {
                Ok(html) => html,
                Err(err) => {
                    tracing::warn!("scholar page unreadable: {}", err);
                    return PageOutcome::Abort;
                }
            };
            match parse_scholar_html(&html) {
                Ok(cards) if cards.is_empty() => PageOutcome::Page(Vec::new(), 0),
                // raw count counts result cards, parsed or not, but Scholar
                // pages are fixed at ten results so per_page stands in
                Ok(cards) => PageOutcome::Page(cards, per_page),
                Err(err) => {
                    tracing::warn!("scholar page parse failed: {}", err);
                    PageOutcome::Abort
                }
            }
        })
        .await;
        Ok(papers)
    }

    async fn download_pdf(&self, _paper_id: &str, _save_dir: &Path) -> Result<PathBuf, SourceError> {
        Err(SourceError::DocumentUnavailable(
            "Google Scholar doesn't provide direct PDF downloads. Please use the paper URL \
             to access the publisher's website."
                .to_string(),
        ))
    }

    async fn read_paper(&self, _paper_id: &str, _save_dir: &Path) -> Result<String, SourceError> {
        Ok("Google Scholar doesn't support direct paper reading. Please use the paper URL \
            to access the full text on the publisher's website."
            .to_string())
    }
}

fn selector(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|e| SourceError::Parse(format!("{:?}", e)))
}

fn parse_scholar_html(html: &str) -> Result<Vec<Paper>, SourceError> {
    let document = Html::parse_document(html);
    let card_sel = selector("div.gs_ri")?;
    let title_sel = selector("h3.gs_rt")?;
    let link_sel = selector("h3.gs_rt a")?;
    let info_sel = selector("div.gs_a")?;
    let abstract_sel = selector("div.gs_rs")?;

    let mut papers = Vec::new();
    for card in document.select(&card_sel) {
        let Some(title_elem) = card.select(&title_sel).next() else {
            continue;
        };
        let Some(info_elem) = card.select(&info_sel).next() else {
            continue;
        };
        let title = title_elem
            .text()
            .collect::<String>()
            .replace("[PDF]", "")
            .replace("[HTML]", "")
            .trim()
            .to_string();
        let url = card
            .select(&link_sel)
            .next()
            .and_then(|a| a.value().attr("href"))
            .unwrap_or("")
            .to_string();

        // "A Author, B Author - Venue, 2021 - publisher.com"
        let info_text = info_elem.text().collect::<String>();
        let authors: Vec<String> = info_text
            .split('-')
            .next()
            .unwrap_or("")
            .split(',')
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        let published = extract_year(&info_text)
            .and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1))
            .unwrap_or_else(Paper::epoch);
        let abstract_text = card
            .select(&abstract_sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        papers.push(Paper {
            id: format!("gs_{:x}", hash_url(&url)),
            title,
            authors,
            abstract_text,
            url,
            pdf_url: String::new(),
            published,
            updated: None,
            source: "google_scholar".to_string(),
            categories: Vec::new(),
            keywords: Vec::new(),
            doi: String::new(),
            extra: serde_json::Map::new(),
        });
    }
    Ok(papers)
}

/// First whitespace-separated token that parses as a plausible year.
fn extract_year(text: &str) -> Option<i32> {
    let current = Utc::now().year();
    text.split_whitespace()
        .filter_map(|word| word.trim_matches(|c: char| !c.is_ascii_digit()).parse::<i32>().ok())
        .find(|&n| (1900..=current).contains(&n))
}

/// FNV-1a over the result URL; the id only needs to be stable and unique
/// within a result set.
fn hash_url(url: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in url.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_PAGE: &str = r#"
        <html><body>
          <div class="gs_r"><div class="gs_ri">
            <h3 class="gs_rt"><span>[PDF]</span><a href="https://pub.example.org/attention">
              Attention Is All You Need</a></h3>
            <div class="gs_a">A Vaswani, N Shazeer - Advances in neural information, 2017 - example.org</div>
            <div class="gs_rs">The dominant sequence transduction models...</div>
          </div></div>
          <div class="gs_r"><div class="gs_ri">
            <h3 class="gs_rt">Citation-only entry with no info line</h3>
          </div></div>
        </body></html>"#;

    #[test]
    fn parses_result_cards() {
        let papers = parse_scholar_html(SAMPLE_PAGE).unwrap();
        // the second card has no gs_a line and is skipped
        assert_eq!(papers.len(), 1);
        let paper = &papers[0];
        assert_eq!(paper.title, "Attention Is All You Need");
        assert_eq!(paper.authors, vec!["A Vaswani", "N Shazeer"]);
        assert_eq!(paper.url, "https://pub.example.org/attention");
        assert_eq!(
            paper.published,
            NaiveDate::from_ymd_opt(2017, 1, 1).unwrap()
        );
        assert_eq!(paper.source, "google_scholar");
        assert!(paper.id.starts_with("gs_"));
        assert!(paper.abstract_text.starts_with("The dominant"));
    }

    #[test]
    fn page_without_results_parses_to_empty() {
        let papers = parse_scholar_html("<html><body><div id='gs_captcha'/></body></html>").unwrap();
        assert!(papers.is_empty());
    }

    #[test]
    fn year_extraction_ignores_out_of_range_numbers() {
        assert_eq!(extract_year("J Doe - Vol 3, 1899 - x.org"), None);
        assert_eq!(extract_year("J Doe - Nature, 2021 - x.org"), Some(2021));
        assert_eq!(extract_year("no year here"), None);
    }

    #[test]
    fn url_hash_is_stable() {
        assert_eq!(hash_url("https://a.example"), hash_url("https://a.example"));
        assert_ne!(hash_url("https://a.example"), hash_url("https://b.example"));
    }

    #[tokio::test]
    async fn scraped_source_has_no_download() {
        let client = ScholarClient::new();
        let err = client.download_pdf("gs_1", Path::new("/tmp")).await.unwrap_err();
        assert!(matches!(err, SourceError::DocumentUnavailable(_)));
    }
}
