use std::path::PathBuf;
use std::sync::Arc;

use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters,
    model::*, tool, tool_handler, tool_router,
    transport::stdio, ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

mod config;
mod net;
mod paginate;
mod pdf;
mod sources;

use config::Config;
use sources::{PaperSource, SearchOptions};

// ── Parameter structs ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchPapersParams {
    #[schemars(description = "Source to search: arxiv, biorxiv, medrxiv, crossref, zenodo, google_scholar, researchgate, or elsevier")]
    source: String,
    #[schemars(description = "Search query string (for bioRxiv/medRxiv this is treated as a category)")]
    query: String,
    #[schemars(description = "Maximum results to return (default 10, max 100)")]
    max_results: Option<u32>,
    #[schemars(description = "Trailing window in days (bioRxiv/medRxiv, default 30)")]
    days: Option<u32>,
    #[schemars(description = "Year or year range, e.g. \"2021\" or \"2016-2020\" (Zenodo, Elsevier)")]
    year: Option<String>,
    #[schemars(description = "Community slug (Zenodo)")]
    community: Option<String>,
    #[schemars(description = "Resource type, e.g. \"publication\" (Zenodo)")]
    resource_type: Option<String>,
    #[schemars(description = "Resource subtype, e.g. \"conferencepaper\" (Zenodo)")]
    subtype: Option<String>,
    #[schemars(description = "Author names to match (Zenodo)")]
    creators: Option<Vec<String>>,
    #[schemars(description = "Keywords to match (Zenodo)")]
    keywords: Option<Vec<String>>,
    #[schemars(description = "Sort field (CrossRef, Zenodo)")]
    sort: Option<String>,
    #[schemars(description = "Sort order, \"asc\" or \"desc\" (CrossRef, Zenodo)")]
    order: Option<String>,
    #[schemars(description = "Raw filter expression (CrossRef)")]
    filter: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct PaperParams {
    #[schemars(description = "Source the paper belongs to")]
    source: String,
    #[schemars(description = "Source-scoped paper ID (arXiv ID, DOI, Zenodo record ID, ...)")]
    paper_id: String,
    #[schemars(description = "Directory to store the PDF in (defaults to the configured download dir)")]
    save_path: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SciHubParams {
    #[schemars(description = "DOI, paper URL, or direct PDF URL")]
    identifier: String,
    #[schemars(description = "Directory to store the PDF in (defaults to the configured download dir)")]
    save_path: Option<String>,
}

// ── Server ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PaperFinderServer {
    tool_router: ToolRouter<Self>,
    config: Arc<Config>,
    sources: Arc<Vec<Arc<dyn PaperSource>>>,
    scihub: Arc<sources::scihub::SciHubResolver>,
}

#[tool_router]
impl PaperFinderServer {
    pub fn create() -> Self {
        let config = Config::from_env();
        let sources = config.build_sources();
        let scihub = config.build_scihub();

        tracing::info!(
            "Initialized {} paper sources, download_dir={}",
            sources.len(),
            config.download_dir.display()
        );

        Self {
            tool_router: Self::tool_router(),
            config: Arc::new(config),
            sources: Arc::new(sources),
            scihub: Arc::new(scihub),
        }
    }

    fn find_source(&self, name: &str) -> Result<Arc<dyn PaperSource>, McpError> {
        self.sources
            .iter()
            .find(|s| s.name().eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| {
                let available: Vec<&str> = self.sources.iter().map(|s| s.name()).collect();
                McpError::invalid_params(
                    format!("Unknown source '{}'. Available: {}", name, available.join(", ")),
                    None,
                )
            })
    }

    fn save_dir(&self, save_path: Option<String>) -> PathBuf {
        save_path
            .map(PathBuf::from)
            .unwrap_or_else(|| self.config.download_dir.clone())
    }

    #[tool(description = "List available paper sources and their status")]
    async fn list_sources(&self) -> Result<CallToolResult, McpError> {
        let statuses = self.config.source_status();
        let json = serde_json::to_string_pretty(&statuses)
            .map_err(|e| McpError::internal_error(format!("Serialization error: {}", e), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(description = "Search papers on one source. Returns normalized paper records as JSON.")]
    async fn search_papers(
        &self,
        Parameters(params): Parameters<SearchPapersParams>,
    ) -> Result<CallToolResult, McpError> {
        let source = self.find_source(&params.source)?;
        let max = params.max_results.unwrap_or(10).min(100) as usize;
        let opts = SearchOptions {
            days: params.days,
            year: params.year,
            community: params.community,
            resource_type: params.resource_type,
            subtype: params.subtype,
            creators: params.creators.unwrap_or_default(),
            keywords: params.keywords.unwrap_or_default(),
            sort: params.sort,
            order: params.order,
            filter: params.filter,
        };

        let papers = source
            .search(&params.query, max, &opts)
            .await
            .map_err(|e| McpError::internal_error(format!("Search failed: {}", e), None))?;

        let json = serde_json::to_string_pretty(&papers)
            .map_err(|e| McpError::internal_error(format!("{}", e), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(description = "Download a paper's PDF from a source. Returns the saved file path.")]
    async fn download_paper(
        &self,
        Parameters(params): Parameters<PaperParams>,
    ) -> Result<CallToolResult, McpError> {
        let source = self.find_source(&params.source)?;
        let save_dir = self.save_dir(params.save_path);

        let result = source
            .download_pdf(&params.paper_id, &save_dir)
            .await
            .map(|path| path.display().to_string());
        fold_unavailable(result, "Download")
    }

    #[tool(description = "Read a paper's full text, downloading the PDF first if needed. Sources without full-text access return an explanatory message.")]
    async fn read_paper(
        &self,
        Parameters(params): Parameters<PaperParams>,
    ) -> Result<CallToolResult, McpError> {
        let source = self.find_source(&params.source)?;
        let save_dir = self.save_dir(params.save_path);

        let result = source.read_paper(&params.paper_id, &save_dir).await;
        fold_unavailable(result, "Read")
    }

    #[tool(description = "Download a paper via Sci-Hub by DOI or URL. Returns the saved file path.")]
    async fn scihub_download(
        &self,
        Parameters(params): Parameters<SciHubParams>,
    ) -> Result<CallToolResult, McpError> {
        let save_dir = self.save_dir(params.save_path);
        let result = self
            .scihub
            .download(&params.identifier, &save_dir)
            .await
            .map(|path| path.display().to_string());
        fold_unavailable(result, "Download")
    }
}

/// Maps a source result into a tool response. A document that a source cannot
/// hand out (metadata-only source, record without a PDF, paywalled item) is
/// reported as explanatory text rather than a protocol error.
fn fold_unavailable(
    result: Result<String, sources::SourceError>,
    action: &str,
) -> Result<CallToolResult, McpError> {
    match result {
        Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
        Err(sources::SourceError::DocumentUnavailable(msg)) => {
            Ok(CallToolResult::success(vec![Content::text(msg)]))
        }
        Err(e) => Err(McpError::internal_error(
            format!("{} failed: {}", action, e),
            None,
        )),
    }
}

#[tool_handler]
impl ServerHandler for PaperFinderServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Search, download, and read academic papers across multiple sources. \
                 Supports arXiv, bioRxiv, medRxiv, CrossRef, Zenodo, Google Scholar, \
                 ResearchGate, and Elsevier, plus Sci-Hub PDF retrieval by DOI."
                    .into(),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("Starting paper-finder MCP server");

    let server = PaperFinderServer::create();
    let service = server.serve(stdio()).await?;
    service.waiting().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_document_becomes_explanatory_text() {
        let msg = "Zenodo record 1234 has no PDF file attached.";
        let result = fold_unavailable(
            Err(sources::SourceError::DocumentUnavailable(msg.to_string())),
            "Read",
        );
        let reply = result.expect("an unavailable document is not a protocol error");
        let json = serde_json::to_string(&reply).unwrap();
        assert!(json.contains("no PDF file attached"));
    }

    #[test]
    fn other_source_errors_stay_errors() {
        let result = fold_unavailable(Err(sources::SourceError::Status(500)), "Read");
        assert!(result.is_err());
    }

    #[test]
    fn successful_text_passes_through() {
        let result = fold_unavailable(Ok("page one".to_string()), "Read");
        let json = serde_json::to_string(&result.unwrap()).unwrap();
        assert!(json.contains("page one"));
    }
}
