use std::path::PathBuf;
use std::sync::Arc;

use crate::sources::{self, PaperSource};

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub download_dir: PathBuf,
    pub zenodo_api_token: Option<String>,
    pub elsevier_api_key: Option<String>,
    pub researchgate_cookie: Option<String>,
    pub scihub_base_url: String,
    pub enabled_source_names: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let download_dir = std::env::var("PAPER_FINDER_DOWNLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./downloads"));

        let zenodo_api_token = std::env::var("ZENODO_API_TOKEN").ok();
        let elsevier_api_key = std::env::var("ELSEVIER_API_KEY").ok();
        let researchgate_cookie = std::env::var("RESEARCHGATE_COOKIE").ok();
        let scihub_base_url =
            std::env::var("SCIHUB_BASE_URL").unwrap_or_else(|_| "https://sci-hub.st".to_string());

        let enabled_source_names = std::env::var("PAPER_FINDER_SOURCES")
            .map(|s| s.split(',').map(|s| s.trim().to_lowercase()).collect())
            .unwrap_or_default();

        Self {
            download_dir,
            zenodo_api_token,
            elsevier_api_key,
            researchgate_cookie,
            scihub_base_url,
            enabled_source_names,
        }
    }

    /// Build the list of enabled paper sources based on configuration.
    pub fn build_sources(&self) -> Vec<Arc<dyn PaperSource>> {
        let mut list: Vec<Arc<dyn PaperSource>> = Vec::new();
        let filter = &self.enabled_source_names;
        let filter_active = !filter.is_empty();

        let should_enable =
            |name: &str| -> bool { !filter_active || filter.contains(&name.to_lowercase()) };

        // Sources that don't need credentials
        if should_enable("arxiv") {
            list.push(Arc::new(sources::arxiv::ArxivClient::new()));
        }
        if should_enable("biorxiv") {
            list.push(Arc::new(sources::rxiv::RxivClient::biorxiv()));
        }
        if should_enable("medrxiv") {
            list.push(Arc::new(sources::rxiv::RxivClient::medrxiv()));
        }
        if should_enable("crossref") {
            list.push(Arc::new(sources::crossref::CrossRefClient::new()));
        }
        if should_enable("google_scholar") {
            list.push(Arc::new(sources::scholar::ScholarClient::new()));
        }

        // Sources with optional credentials
        if should_enable("zenodo") {
            list.push(Arc::new(sources::zenodo::ZenodoClient::new(
                self.zenodo_api_token.clone(),
            )));
        }
        if should_enable("researchgate") {
            list.push(Arc::new(sources::researchgate::ResearchGateClient::new(
                self.researchgate_cookie.clone().unwrap_or_default(),
            )));
        }

        // Sources requiring credentials
        if should_enable("elsevier") {
            if let Some(ref key) = self.elsevier_api_key {
                list.push(Arc::new(sources::elsevier::ElsevierClient::new(key.clone())));
            } else {
                tracing::warn!("Elsevier disabled: ELSEVIER_API_KEY not set");
            }
        }

        list
    }

    /// Build the Sci-Hub download resolver.
    pub fn build_scihub(&self) -> sources::scihub::SciHubResolver {
        sources::scihub::SciHubResolver::new(self.scihub_base_url.clone())
    }

    /// Return a list of source status descriptions.
    pub fn source_status(&self) -> Vec<SourceStatus> {
        let mut statuses = vec![
            SourceStatus { name: "arxiv".into(), enabled: true, note: "No API key required".into() },
            SourceStatus { name: "biorxiv".into(), enabled: true, note: "No API key required".into() },
            SourceStatus { name: "medrxiv".into(), enabled: true, note: "No API key required".into() },
            SourceStatus { name: "crossref".into(), enabled: true, note: "Metadata only, no API key required".into() },
            SourceStatus { name: "zenodo".into(), enabled: true,
                note: if self.zenodo_api_token.is_some() { "API token set".into() } else { "No token (public records only)".into() } },
            SourceStatus { name: "google_scholar".into(), enabled: true, note: "HTML scraping, metadata only".into() },
            SourceStatus { name: "researchgate".into(), enabled: true,
                note: if self.researchgate_cookie.is_some() { "Session cookie set".into() } else { "No cookie (results may be blocked)".into() } },
            SourceStatus { name: "elsevier".into(), enabled: self.elsevier_api_key.is_some(),
                note: if self.elsevier_api_key.is_some() { "API key set".into() } else { "Disabled: ELSEVIER_API_KEY not set".into() } },
        ];

        // Apply filter
        if !self.enabled_source_names.is_empty() {
            for s in &mut statuses {
                if !self.enabled_source_names.contains(&s.name) {
                    s.enabled = false;
                    s.note = "Disabled by PAPER_FINDER_SOURCES filter".into();
                }
            }
        }

        statuses
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub enabled: bool,
    pub note: String,
}
