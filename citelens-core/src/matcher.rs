//! Turning a parsed citation into a document to open.
//!
//! Each strategy is an independent function over the citation and the
//! current UI context. [`ResultMatcher::resolve`] runs them in a fixed order
//! and the first one that produces a target wins.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use url::Url;

use crate::citation::{parse_citation, Citation};
use crate::{clamp_page, BrowsedFile, DocumentMeta, SearchResult};

pub const DEFAULT_DOCUMENT_BASE_URL: &str = "http://localhost:8000/blob/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    ExactIndex,
    ContextResult,
    BrowsedFiles,
    ActiveDocument,
    OpenViewer,
}

impl Strategy {
    pub fn is_navigation(&self) -> bool {
        matches!(self, Strategy::ActiveDocument | Strategy::OpenViewer)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenDocument {
    pub url: String,
    /// 1-based, already clamped to the page total when it was known.
    pub page: u32,
    pub filename: String,
    pub keyword: String,
    pub meta: Option<DocumentMeta>,
}

impl OpenDocument {
    pub fn clamped_to(mut self, total_pages: u32) -> Self {
        self.page = clamp_page(self.page, Some(total_pages));
        if let Some(meta) = self.meta.as_mut() {
            meta.page = self.page;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub strategy: Strategy,
    pub command: OpenDocument,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OpenDocumentState {
    /// Known when the document was opened through the engine; documents
    /// opened some other way only have a URL.
    pub filename: Option<String>,
    pub url: String,
    pub current_page: u32,
    pub total_pages: u32,
    pub meta: Option<DocumentMeta>,
}

/// Session-lifetime index from filename to the metadata it was last seen
/// with, used to find the owner of a file in a shared folder listing.
#[derive(Debug, Default)]
pub struct FileOwnerIndex {
    inner: Mutex<HashMap<String, DocumentMeta>>,
}

impl FileOwnerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, meta: DocumentMeta) {
        self.inner.lock().insert(meta.filename.clone(), meta);
    }

    pub fn record_results(&self, results: &[SearchResult]) {
        let mut inner = self.inner.lock();
        for result in results.iter().filter(|r| !r.user_id.is_empty()) {
            inner
                .entry(result.filename.clone())
                .or_insert_with(|| result.meta());
        }
    }

    pub fn owner(&self, filename: &str) -> Option<DocumentMeta> {
        self.inner.lock().get(filename).cloned()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MatchContext<'a> {
    pub results: &'a [SearchResult],
    pub browsed_files: &'a [BrowsedFile],
    pub browsed_user: Option<&'a str>,
    pub owners: Option<&'a FileOwnerIndex>,
    pub open_document: Option<&'a OpenDocumentState>,
}

#[derive(Debug, Clone)]
pub struct MatcherOptions {
    /// Use the first search result when no result matches by name. Assumes
    /// citations without a resolvable name refer to the top-ranked document.
    pub first_result_fallback: bool,
    pub document_base_url: Url,
}

impl MatcherOptions {
    /// URL under which the rendering surface can load `blob_path`; each path
    /// segment is percent-encoded.
    pub fn document_url(&self, blob_path: &str) -> String {
        let mut url = self.document_base_url.clone();
        let segments = blob_path.split('/').filter(|segment| !segment.is_empty());
        if url.cannot_be_a_base() {
            let joined: Vec<&str> = segments.collect();
            return format!("{}/{}", url.as_str().trim_end_matches('/'), joined.join("/"));
        }
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url.to_string()
    }
}

impl Default for MatcherOptions {
    fn default() -> Self {
        Self {
            first_result_fallback: true,
            document_base_url: Url::parse(DEFAULT_DOCUMENT_BASE_URL)
                .expect("default document base URL is valid"),
        }
    }
}

pub type StrategyFn = fn(&Citation, &MatchContext<'_>, &MatcherOptions) -> Option<OpenDocument>;

pub const STRATEGIES: [(Strategy, StrategyFn); 5] = [
    (Strategy::ExactIndex, exact_index),
    (Strategy::ContextResult, context_result),
    (Strategy::BrowsedFiles, browsed_files),
    (Strategy::ActiveDocument, active_document),
    (Strategy::OpenViewer, open_viewer),
];

#[derive(Debug, Clone, Default)]
pub struct ResultMatcher {
    options: MatcherOptions,
}

impl ResultMatcher {
    pub fn new(options: MatcherOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &MatcherOptions {
        &self.options
    }

    #[instrument(skip_all, fields(token = %citation.raw_token))]
    pub fn resolve(&self, citation: &Citation, ctx: &MatchContext<'_>) -> Option<Resolution> {
        let resolution = STRATEGIES.iter().find_map(|(strategy, run)| {
            run(citation, ctx, &self.options).map(|command| Resolution {
                strategy: *strategy,
                command,
            })
        });

        match &resolution {
            Some(resolution) => info!(
                strategy = ?resolution.strategy,
                filename = %resolution.command.filename,
                page = resolution.command.page,
                "citation resolved"
            ),
            None => info!(
                doc_name = ?citation.doc_name_hint,
                page = ?citation.page_hint,
                "citation could not be resolved"
            ),
        }
        resolution
    }

    pub fn resolve_token(&self, raw: &str, ctx: &MatchContext<'_>) -> Option<Resolution> {
        let citation = parse_citation(raw)?;
        self.resolve(&citation, ctx)
    }
}

/// Case-insensitive containment in either direction, ignoring a `.pdf`
/// suffix on both sides.
pub fn names_match(candidate: &str, hint: &str) -> bool {
    fn normalize(name: &str) -> String {
        let lowered = name.trim().to_lowercase();
        match lowered.strip_suffix(".pdf") {
            Some(stem) => stem.trim_end().to_owned(),
            None => lowered,
        }
    }
    let candidate = normalize(candidate);
    let hint = normalize(hint);
    if candidate.is_empty() || hint.is_empty() {
        return false;
    }
    candidate.contains(&hint) || hint.contains(&candidate)
}

pub fn exact_index(
    citation: &Citation,
    ctx: &MatchContext<'_>,
    options: &MatcherOptions,
) -> Option<OpenDocument> {
    let result = ctx.results.get(citation.result_index_hint?)?;
    Some(open_result(result, result.page, citation, options))
}

pub fn context_result(
    citation: &Citation,
    ctx: &MatchContext<'_>,
    options: &MatcherOptions,
) -> Option<OpenDocument> {
    let first = ctx.results.first()?;

    let page = citation.page();
    if let Some(name) = citation.doc_name() {
        let matching = || ctx.results.iter().filter(|r| names_match(&r.filename, name));
        if let Some(result) = matching().find(|r| r.page == page).or_else(|| matching().next()) {
            return Some(open_result(result, page, citation, options));
        }
    }

    if !options.first_result_fallback {
        return None;
    }
    Some(open_result(first, page, citation, options))
}

pub fn browsed_files(
    citation: &Citation,
    ctx: &MatchContext<'_>,
    options: &MatcherOptions,
) -> Option<OpenDocument> {
    let name = citation.doc_name()?;
    let file = ctx
        .browsed_files
        .iter()
        .find(|file| names_match(&file.filename, name))?;

    let known = ctx.owners.and_then(|owners| owners.owner(&file.filename));
    let user_id = known
        .as_ref()
        .map(|meta| meta.user_id.clone())
        .or_else(|| file.user_id.clone())
        .or_else(|| ctx.browsed_user.map(str::to_owned))
        .unwrap_or_default();
    let blob_path = if file.blob_path.is_empty() {
        known.map(|meta| meta.blob_path).unwrap_or_default()
    } else {
        file.blob_path.clone()
    };

    let page = clamp_page(citation.page(), None);
    Some(OpenDocument {
        url: options.document_url(&blob_path),
        page,
        filename: file.filename.clone(),
        keyword: citation.keyword_text.clone(),
        meta: Some(DocumentMeta {
            user_id,
            filename: file.filename.clone(),
            page,
            blob_path,
        }),
    })
}

pub fn active_document(
    citation: &Citation,
    ctx: &MatchContext<'_>,
    _options: &MatcherOptions,
) -> Option<OpenDocument> {
    let open = ctx.open_document?;
    let filename = open.filename.as_deref()?;
    if let Some(name) = citation.doc_name() {
        if !names_match(filename, name) {
            return None;
        }
    }
    Some(navigate(open, citation))
}

pub fn open_viewer(
    citation: &Citation,
    ctx: &MatchContext<'_>,
    _options: &MatcherOptions,
) -> Option<OpenDocument> {
    ctx.open_document.map(|open| navigate(open, citation))
}

fn navigate(open: &OpenDocumentState, citation: &Citation) -> OpenDocument {
    let page = clamp_page(citation.page(), Some(open.total_pages));
    let meta = open.meta.clone().map(|meta| DocumentMeta { page, ..meta });
    OpenDocument {
        url: open.url.clone(),
        page,
        filename: open.filename.clone().unwrap_or_default(),
        keyword: citation.keyword_text.clone(),
        meta,
    }
}

fn open_result(
    result: &SearchResult,
    page: u32,
    citation: &Citation,
    options: &MatcherOptions,
) -> OpenDocument {
    let page = clamp_page(page, None);
    let blob_path = if result.blob_path.is_empty() {
        result.filename.as_str()
    } else {
        result.blob_path.as_str()
    };
    OpenDocument {
        url: options.document_url(blob_path),
        page,
        filename: result.filename.clone(),
        keyword: citation.keyword_text.clone(),
        meta: Some(DocumentMeta {
            page,
            ..result.meta()
        }),
    }
}
