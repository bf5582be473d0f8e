use std::path::{Path, PathBuf};
use std::time::Duration;

use scraper::{Html, Selector};

use super::{write_document, SourceError};
use crate::net;

/// Resolves an identifier (DOI, URL, title) to a direct PDF link through a
/// Sci-Hub mirror and downloads it. Not a search source; this is a
/// download-only helper exposed as its own tool.
pub struct SciHubResolver {
    client: reqwest::Client,
    base_url: String,
}

impl SciHubResolver {
    pub fn new(base_url: String) -> Self {
        Self {
            client: net::http_client(Duration::from_secs(60)),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn download(&self, identifier: &str, save_dir: &Path) -> Result<PathBuf, SourceError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(SourceError::DocumentUnavailable(
                "empty identifier".to_string(),
            ));
        }
        let pdf_url = self.resolve_direct_url(identifier).await?;
        let resp = self
            .client
            .get(&pdf_url)
            .header("User-Agent", net::random_browser_agent())
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SourceError::Status(resp.status().as_u16()));
        }
        let is_pdf = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/pdf"));
        if !is_pdf {
            return Err(SourceError::DocumentUnavailable(format!(
                "response from {} is not a PDF",
                pdf_url
            )));
        }
        let final_url = resp.url().to_string();
        let bytes = resp.bytes().await?;
        let filename = generate_filename(&final_url, &bytes, identifier);
        write_document(save_dir, &filename, &bytes).await
    }

    /// Identifiers that already point at a PDF pass through; everything else
    /// goes through the mirror's article page and its markup is scanned for
    /// the document link.
    async fn resolve_direct_url(&self, identifier: &str) -> Result<String, SourceError> {
        if identifier.ends_with(".pdf") {
            return Ok(identifier.to_string());
        }
        let page_url = format!("{}/{}", self.base_url, identifier);
        let resp = self
            .client
            .get(&page_url)
            .header("User-Agent", net::random_browser_agent())
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SourceError::Status(resp.status().as_u16()));
        }
        let html = resp.text().await?;
        if html.to_lowercase().contains("article not found") {
            return Err(SourceError::DocumentUnavailable(format!(
                "article not found for identifier {}",
                identifier
            )));
        }
        scan_for_pdf_link(&html, &self.base_url)?.ok_or_else(|| {
            SourceError::DocumentUnavailable(format!(
                "no PDF link found on the page for {}",
                identifier
            ))
        })
    }
}

/// Resolve protocol-relative and site-relative links against the mirror.
fn absolutize(url: &str, base_url: &str) -> String {
    if let Some(rest) = url.strip_prefix("//") {
        format!("https://{}", rest)
    } else if url.starts_with('/') {
        format!("{}{}", base_url, url)
    } else {
        url.to_string()
    }
}

/// Scan the article page for the document link: an embed tag first, then an
/// iframe, then a download button's onclick target, then any anchor that
/// looks like a PDF link.
fn scan_for_pdf_link(html: &str, base_url: &str) -> Result<Option<String>, SourceError> {
    let document = Html::parse_document(html);
    let sel = |css: &str| Selector::parse(css).map_err(|e| SourceError::Parse(format!("{:?}", e)));

    let embed_sel = sel(r#"embed[type="application/pdf"]"#)?;
    if let Some(src) = document
        .select(&embed_sel)
        .next()
        .and_then(|el| el.value().attr("src"))
    {
        return Ok(Some(absolutize(src, base_url)));
    }

    let iframe_sel = sel("iframe")?;
    if let Some(src) = document
        .select(&iframe_sel)
        .next()
        .and_then(|el| el.value().attr("src"))
    {
        return Ok(Some(absolutize(src, base_url)));
    }

    let button_sel = sel("button")?;
    for button in document.select(&button_sel) {
        let onclick = button.value().attr("onclick").unwrap_or("");
        if !onclick.to_lowercase().contains("pdf") {
            continue;
        }
        if let Some(url) = onclick_target(onclick) {
            return Ok(Some(absolutize(url, base_url)));
        }
    }

    let anchor_sel = sel("a")?;
    let mut found = None;
    for anchor in document.select(&anchor_sel) {
        let href = anchor.value().attr("href").unwrap_or("");
        if href.is_empty() {
            continue;
        }
        if href.to_lowercase().contains("pdf") || href.ends_with(".pdf") {
            if href.starts_with("//") || href.starts_with('/') || href.starts_with("http") {
                found = Some(absolutize(href, base_url));
            }
        }
    }
    Ok(found)
}

/// Pull the target out of `onclick="location.href='...'"`.
fn onclick_target(onclick: &str) -> Option<&str> {
    let start = onclick.find("location.href='")? + "location.href='".len();
    let rest = &onclick[start..];
    let end = rest.find('\'')?;
    Some(&rest[..end])
}

/// `{md5-prefix}_{name}.pdf`, where the name comes from the final URL's last
/// segment when it is a PDF filename, else from the sanitized identifier.
fn generate_filename(response_url: &str, bytes: &[u8], identifier: &str) -> String {
    let hash = format!("{:x}", md5::compute(bytes));
    let prefix = &hash[..8];
    if let Some(last) = response_url.split('/').next_back() {
        let name = last.split("#view=").next().unwrap_or(last);
        if let Some(base) = name.strip_suffix(".pdf") {
            return format!("{}_{}.pdf", prefix, base);
        }
    }
    let clean: String = identifier
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_{}.pdf", prefix, clean)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://sci-hub.st";

    #[test]
    fn embed_tag_wins_over_anchors() {
        let html = r#"
            <embed type="application/pdf" src="//dl.example.org/paper.pdf"/>
            <a href="/downloads/other.pdf">other</a>"#;
        assert_eq!(
            scan_for_pdf_link(html, BASE).unwrap().unwrap(),
            "https://dl.example.org/paper.pdf"
        );
    }

    #[test]
    fn iframe_src_is_resolved_against_base() {
        let html = r#"<iframe src="/downloads/2023/paper.pdf"></iframe>"#;
        assert_eq!(
            scan_for_pdf_link(html, BASE).unwrap().unwrap(),
            "https://sci-hub.st/downloads/2023/paper.pdf"
        );
    }

    #[test]
    fn button_onclick_target_is_extracted() {
        let html = r#"<button onclick="location.href='/downloads/paper.pdf?download=true'">
            save PDF</button>"#;
        assert_eq!(
            scan_for_pdf_link(html, BASE).unwrap().unwrap(),
            "https://sci-hub.st/downloads/paper.pdf?download=true"
        );
    }

    #[test]
    fn anchor_scan_is_the_fallback() {
        let html = r#"
            <a href="mailto:admin@example.org">contact</a>
            <a href="https://mirror.example.org/files/paper.pdf">direct</a>"#;
        assert_eq!(
            scan_for_pdf_link(html, BASE).unwrap().unwrap(),
            "https://mirror.example.org/files/paper.pdf"
        );
    }

    #[test]
    fn page_without_link_yields_none() {
        assert!(scan_for_pdf_link("<html><body>nothing</body></html>", BASE)
            .unwrap()
            .is_none());
    }

    #[test]
    fn filename_prefers_url_basename() {
        let name = generate_filename(
            "https://dl.example.org/2023/attention.pdf#view=FitH",
            b"%PDF-1.5",
            "10.1000/x",
        );
        assert!(name.ends_with("_attention.pdf"));
        // 8 hex chars + underscore
        assert_eq!(name.find('_'), Some(8));
    }

    #[test]
    fn filename_falls_back_to_sanitized_identifier() {
        let name = generate_filename("https://dl.example.org/viewer", b"%PDF-1.5", "10.1000/x y");
        assert!(name.ends_with("_10.1000_x_y.pdf"));
    }

    #[tokio::test]
    async fn empty_identifier_is_rejected() {
        let resolver = SciHubResolver::new("https://sci-hub.st/".to_string());
        let err = resolver
            .download("  ", Path::new("/tmp"))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::DocumentUnavailable(_)));
    }
}
