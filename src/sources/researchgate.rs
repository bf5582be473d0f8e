use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};
use serde_json::json;

use super::{Paper, PaperSource, SearchOptions, SourceError};
use crate::{net, paginate, paginate::PageOutcome};

const BASE_URL: &str = "https://www.researchgate.net";
const PAGE_SIZE: usize = 10;

/// Scrapes ResearchGate's publication search. A session cookie is required
/// for most result pages; each result card is followed by one detail-page
/// fetch for the abstract, spaced a second apart.
pub struct ResearchGateClient {
    client: reqwest::Client,
    cookie: String,
}

/// Fields scraped from one result card before the abstract lookup.
struct Card {
    title: String,
    url: String,
    badge: String,
    date: Option<String>,
    doi: String,
    isbn: String,
    issn: String,
    authors: Vec<String>,
}

impl ResearchGateClient {
    pub fn new(cookie: String) -> Self {
        Self {
            client: net::http_client(Duration::from_secs(30)),
            cookie,
        }
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("User-Agent", net::random_browser_agent())
            .header("Accept", "text/html,application/xhtml+xml")
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Cookie", self.cookie.as_str())
    }

    async fn fetch_abstract(&self, url: &str) -> String {
        if url.is_empty() {
            return String::new();
        }
        let html = match self.get(url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(html) => html,
                Err(err) => {
                    tracing::debug!("abstract page unreadable: {}", err);
                    return String::new();
                }
            },
            Ok(resp) => {
                tracing::debug!("abstract page returned HTTP {}", resp.status());
                return String::new();
            }
            Err(err) => {
                tracing::debug!("abstract fetch failed: {}", err);
                return String::new();
            }
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        parse_abstract(&html).unwrap_or_default()
    }

    async fn card_to_paper(&self, card: Card) -> Paper {
        let abstract_text = self.fetch_abstract(&card.url).await;
        let id = if !card.doi.is_empty() {
            card.doi.clone()
        } else {
            card.url
                .rsplit('/')
                .next()
                .filter(|seg| !seg.is_empty())
                .unwrap_or(&card.title)
                .to_string()
        };
        let mut extra = serde_json::Map::new();
        extra.insert("isbn".into(), json!(card.isbn));
        extra.insert("issn".into(), json!(card.issn));

        Paper {
            id,
            title: card.title,
            authors: card.authors,
            abstract_text,
            url: card.url,
            pdf_url: String::new(),
            published: card
                .date
                .as_deref()
                .and_then(parse_card_date)
                .unwrap_or_else(Paper::epoch),
            updated: None,
            source: "researchgate".to_string(),
            categories: if card.badge.is_empty() {
                Vec::new()
            } else {
                vec![card.badge]
            },
            keywords: Vec::new(),
            doi: card.doi,
            extra,
        }
    }
}

#[async_trait]
impl PaperSource for ResearchGateClient {
    fn name(&self) -> &'static str {
        "researchgate"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        _opts: &SearchOptions,
    ) -> Result<Vec<Paper>, SourceError> {
        let papers = paginate::walk(PAGE_SIZE, max_results, |cursor| async move {
            let page = cursor / PAGE_SIZE + 1;
            let url = format!("{}/search/publication", BASE_URL);
            let resp = match self
                .get(&url)
                .query(&[("q", query), ("page", &page.to_string())])
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => resp,
                Ok(resp) => {
                    tracing::warn!("researchgate search returned HTTP {}", resp.status());
                    return PageOutcome::Abort;
                }
                Err(err) => {
                    tracing::warn!("researchgate search failed: {}", err);
                    return PageOutcome::Abort;
                }
            };
            let html = match resp.text().await {
                Ok(html) => html,
                Err(err) => {
                    tracing::warn!("researchgate page unreadable: {}", err);
                    return PageOutcome::Abort;
                }
            };
            let cards = match parse_cards(&html) {
                Ok(cards) => cards,
                Err(err) => {
                    tracing::warn!("researchgate page parse failed: {}", err);
                    return PageOutcome::Abort;
                }
            };
            let fetched = cards.len();
            let mut items = Vec::with_capacity(fetched);
            for card in cards {
                items.push(self.card_to_paper(card).await);
            }
            PageOutcome::Page(items, fetched)
        })
        .await;
        Ok(papers)
    }

    async fn download_pdf(&self, _paper_id: &str, _save_dir: &Path) -> Result<PathBuf, SourceError> {
        Err(SourceError::DocumentUnavailable(
            "ResearchGate does not expose direct PDF downloads. Please use the paper URL \
             to access the full text."
                .to_string(),
        ))
    }

    async fn read_paper(&self, _paper_id: &str, _save_dir: &Path) -> Result<String, SourceError> {
        Ok("ResearchGate papers cannot be read directly through this tool. Please use the \
            paper URL to access the full text."
            .to_string())
    }
}

fn selector(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|e| SourceError::Parse(format!("{:?}", e)))
}

fn absolute_url(href: &str) -> String {
    if href.is_empty() || href.starts_with("http") {
        href.to_string()
    } else {
        format!("{}/{}", BASE_URL, href.trim_start_matches('/'))
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn parse_cards(html: &str) -> Result<Vec<Card>, SourceError> {
    let document = Html::parse_document(html);
    let card_sel = selector(".nova-legacy-v-publication-item")?;
    let title_sel = selector(".nova-legacy-v-publication-item__title a")?;
    let badge_sel = selector(".nova-legacy-v-publication-item__badge")?;
    let meta_sel =
        selector(".nova-legacy-v-publication-item__meta .nova-legacy-e-list__item span")?;
    let author_sel = selector(
        ".nova-legacy-v-publication-item__person-list \
         .nova-legacy-v-person-inline-item__fullname",
    )?;

    let mut cards = Vec::new();
    for root in document.select(&card_sel) {
        let Some(title_elem) = root.select(&title_sel).next() else {
            continue;
        };
        let title = element_text(title_elem);
        let url = absolute_url(title_elem.value().attr("href").unwrap_or(""));
        let badge = root
            .select(&badge_sel)
            .next()
            .map(element_text)
            .unwrap_or_default();

        let mut date = None;
        let mut doi = String::new();
        let mut isbn = String::new();
        let mut issn = String::new();
        for span in root.select(&meta_sel) {
            let text = element_text(span);
            if let Some(rest) = text.strip_prefix("DOI:") {
                doi = rest.trim().to_string();
            } else if let Some(rest) = text.strip_prefix("ISBN:") {
                isbn = rest.trim().to_string();
            } else if let Some(rest) = text.strip_prefix("ISSN:") {
                issn = rest.trim().to_string();
            } else if date.is_none() && text.chars().filter(|c| c.is_ascii_digit()).count() >= 4 {
                date = Some(text);
            }
        }

        let authors: Vec<String> = root
            .select(&author_sel)
            .map(element_text)
            .filter(|a| !a.is_empty())
            .collect();

        cards.push(Card {
            title,
            url,
            badge,
            date,
            doi,
            isbn,
            issn,
            authors,
        });
    }
    Ok(cards)
}

fn parse_abstract(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let sel = Selector::parse(".research-detail-middle-section__abstract").ok()?;
    document.select(&sel).next().map(element_text)
}

/// Cards date their entries as "Jan 2020" or with a bare year somewhere in
/// the text.
fn parse_card_date(text: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(&format!("1 {}", text.trim()), "%d %b %Y") {
        return Some(date);
    }
    text.split_whitespace()
        .filter_map(|word| word.parse::<i32>().ok())
        .find(|&n| (1900..=2100).contains(&n))
        .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_PAGE: &str = r#"
        <html><body>
          <div class="nova-legacy-v-publication-item">
            <div class="nova-legacy-v-publication-item__badge">Article</div>
            <div class="nova-legacy-v-publication-item__title">
              <a href="publication/3141592_On_Circles">On Circles</a>
            </div>
            <div class="nova-legacy-v-publication-item__meta">
              <ul>
                <li class="nova-legacy-e-list__item"><span>Mar 2019</span></li>
                <li class="nova-legacy-e-list__item"><span>DOI: 10.1000/circles</span></li>
                <li class="nova-legacy-e-list__item"><span>ISSN: 1234-5678</span></li>
              </ul>
            </div>
            <div class="nova-legacy-v-publication-item__person-list">
              <a class="nova-legacy-v-person-inline-item" href="profile/A">
                <span class="nova-legacy-v-person-inline-item__fullname">Alice Author</span></a>
              <a class="nova-legacy-v-person-inline-item" href="profile/B">
                <span class="nova-legacy-v-person-inline-item__fullname">Bob Writer</span></a>
            </div>
          </div>
          <div class="nova-legacy-v-publication-item">
            <div class="nova-legacy-v-publication-item__title">no link here</div>
          </div>
        </body></html>"#;

    #[test]
    fn parses_publication_cards() {
        let cards = parse_cards(SAMPLE_PAGE).unwrap();
        // the card without a title link is skipped
        assert_eq!(cards.len(), 1);
        let card = &cards[0];
        assert_eq!(card.title, "On Circles");
        assert_eq!(
            card.url,
            "https://www.researchgate.net/publication/3141592_On_Circles"
        );
        assert_eq!(card.badge, "Article");
        assert_eq!(card.date.as_deref(), Some("Mar 2019"));
        assert_eq!(card.doi, "10.1000/circles");
        assert_eq!(card.issn, "1234-5678");
        assert_eq!(card.authors, vec!["Alice Author", "Bob Writer"]);
    }

    #[test]
    fn parses_abstract_section() {
        let html = r#"<div class="research-detail-middle-section__abstract">
            Circles are round.
        </div>"#;
        assert_eq!(parse_abstract(html).unwrap(), "Circles are round.");
    }

    #[test]
    fn card_dates_parse_month_year_and_bare_year() {
        assert_eq!(
            parse_card_date("Mar 2019"),
            NaiveDate::from_ymd_opt(2019, 3, 1)
        );
        assert_eq!(
            parse_card_date("Conference 2021"),
            NaiveDate::from_ymd_opt(2021, 1, 1)
        );
        assert_eq!(parse_card_date("undated"), None);
    }

    #[tokio::test]
    async fn scraped_source_has_no_download() {
        let client = ResearchGateClient::new(String::new());
        let err = client.download_pdf("x", Path::new("/tmp")).await.unwrap_err();
        assert!(matches!(err, SourceError::DocumentUnavailable(_)));
    }
}
