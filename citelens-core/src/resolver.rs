//! Locating and caching the OCR layout of a single page.
//!
//! Analysis output lives next to the document in one of three layouts: a
//! split folder (`meta.json` + `page_{N}.json`), bare per-page files in the
//! same folder, or one legacy combined JSON per document under
//! `{user}/json/`. Probes run in that order and stop at the first hit.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::blob::BlobStore;
use crate::ocr::{legacy_pages, AnalysisMeta, OcrPage};
use crate::DocumentMeta;

pub const DEFAULT_CATEGORIES: &[&str] = &[
    "documents",
    "manuals",
    "specs",
    "reports",
    "drawings",
    "standards",
];

static REVISION_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<root>(?:.*/)?revisions/[^/]+)/(?P<tag>[^/_]+)_[^/]+$")
        .expect("valid revision regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrQuery {
    pub user_id: String,
    pub filename: String,
    pub page: u32,
    pub blob_path: String,
}

impl OcrQuery {
    pub fn from_meta(meta: &DocumentMeta, page: u32) -> Self {
        Self {
            user_id: meta.user_id.clone(),
            filename: meta.filename.clone(),
            page,
            blob_path: meta.blob_path.clone(),
        }
    }

    pub fn cache_key(&self) -> String {
        page_key(&self.user_id, &self.filename, self.page)
    }

    /// Filename without its extension, falling back to the blob path's last
    /// segment when no filename is known.
    pub fn base_name(&self) -> String {
        let name = if self.filename.is_empty() {
            self.blob_path.rsplit('/').next().unwrap_or_default()
        } else {
            self.filename.as_str()
        };
        strip_extension(name).to_owned()
    }
}

fn page_key(user_id: &str, filename: &str, page: u32) -> String {
    format!("{user_id}/{filename}/{page}")
}

#[derive(Debug, Clone, PartialEq)]
pub enum OcrLookup {
    Split(Arc<OcrPage>),
    Legacy(Arc<OcrPage>),
    None,
}

impl OcrLookup {
    pub fn page(&self) -> Option<&Arc<OcrPage>> {
        match self {
            OcrLookup::Split(page) | OcrLookup::Legacy(page) => Some(page),
            OcrLookup::None => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OcrLookup::Split(_) => "split",
            OcrLookup::Legacy(_) => "legacy",
            OcrLookup::None => "none",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FolderRules {
    categories: Vec<String>,
}

impl FolderRules {
    pub fn new<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            categories: categories
                .into_iter()
                .map(|c| c.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn analysis_folder(&self, query: &OcrQuery) -> String {
        let blob_path = query.blob_path.trim_matches('/');
        revision_folder(blob_path)
            .or_else(|| self.category_folder(blob_path))
            .unwrap_or_else(|| format!("{}/json/{}", query.user_id, query.base_name()))
    }

    /// `{prefix}/{category}/{sub…}/{name}.{ext}` → `{prefix}/json/{sub…}/{name}`.
    fn category_folder(&self, blob_path: &str) -> Option<String> {
        let segments: Vec<&str> = blob_path.split('/').collect();
        let (file, dirs) = segments.split_last()?;
        let position = dirs
            .iter()
            .position(|dir| self.categories.iter().any(|c| c == &dir.to_lowercase()))?;

        let mut folder: Vec<&str> = Vec::with_capacity(segments.len());
        folder.extend_from_slice(&dirs[..position]);
        folder.push("json");
        folder.extend_from_slice(&dirs[position + 1..]);
        folder.push(strip_extension(file));
        Some(folder.join("/"))
    }
}

impl Default for FolderRules {
    fn default() -> Self {
        Self::new(DEFAULT_CATEGORIES)
    }
}

/// `{root}/revisions/{id}/{tag}_{name}` → `{root}/revisions/{id}/{tag}_di`.
fn revision_folder(blob_path: &str) -> Option<String> {
    let caps = REVISION_PATH.captures(blob_path)?;
    Some(format!("{}/{}_di", &caps["root"], &caps["tag"]))
}

fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

/// Resolves OCR layouts through a [`BlobStore`] and memoizes every outcome,
/// including misses, for the lifetime of the resolver.
pub struct OcrLayoutResolver {
    store: Arc<dyn BlobStore>,
    rules: FolderRules,
    cache: Mutex<HashMap<String, OcrLookup>>,
}

impl OcrLayoutResolver {
    pub fn new(store: Arc<dyn BlobStore>, rules: FolderRules) -> Self {
        Self {
            store,
            rules,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn rules(&self) -> &FolderRules {
        &self.rules
    }

    pub fn cached(&self, query: &OcrQuery) -> Option<OcrLookup> {
        self.cache.lock().get(&query.cache_key()).cloned()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    #[instrument(skip(self), fields(key = %query.cache_key()))]
    pub async fn resolve(&self, query: &OcrQuery) -> OcrLookup {
        if let Some(hit) = self.cached(query) {
            return hit;
        }

        let lookup = self.lookup(query).await;
        debug!(kind = lookup.kind(), "resolved OCR layout");
        self.cache
            .lock()
            .entry(query.cache_key())
            .or_insert(lookup)
            .clone()
    }

    async fn lookup(&self, query: &OcrQuery) -> OcrLookup {
        let folder = self.rules.analysis_folder(query);

        if let Some(page) = self.probe_folder(&folder, query.page).await {
            return OcrLookup::Split(Arc::new(page));
        }
        if let Some(page) = self.probe_legacy(query).await {
            return OcrLookup::Legacy(page);
        }
        OcrLookup::None
    }

    /// `meta.json` first, then the page file. The page file is tried even
    /// when no split declaration is found.
    async fn probe_folder(&self, folder: &str, page: u32) -> Option<OcrPage> {
        let meta = self
            .fetch_json(&format!("{folder}/meta.json"))
            .await
            .and_then(|value| serde_json::from_value::<AnalysisMeta>(value).ok());
        if let Some(meta) = meta.as_ref() {
            debug!(folder, split = meta.is_split(), pages = ?meta.pages, "analysis meta");
        }

        let value = self.fetch_json(&format!("{folder}/page_{page}.json")).await?;
        OcrPage::from_json(&value)
    }

    async fn probe_legacy(&self, query: &OcrQuery) -> Option<Arc<OcrPage>> {
        let base = query.base_name();
        let mut candidates = vec![format!("{}/json/{}.json", query.user_id, base)];
        let by_filename = format!("{}/json/{}.json", query.user_id, query.filename);
        if !query.filename.is_empty() && !candidates.contains(&by_filename) {
            candidates.push(by_filename);
        }

        for candidate in candidates {
            let Some(value) = self.fetch_json(&candidate).await else {
                continue;
            };
            let pages = legacy_pages(&value);
            if pages.is_empty() {
                debug!(path = %candidate, "legacy analysis has no readable pages");
                continue;
            }

            if let Some(page) = self.absorb_legacy(query, pages) {
                return Some(page);
            }
        }
        None
    }

    fn absorb_legacy(&self, query: &OcrQuery, pages: Vec<(u32, OcrPage)>) -> Option<Arc<OcrPage>> {
        let mut target = None;
        let mut cache = self.cache.lock();
        for (number, page) in pages {
            let page = Arc::new(page);
            if number == query.page {
                target.get_or_insert(page);
            } else {
                cache
                    .entry(page_key(&query.user_id, &query.filename, number))
                    .or_insert(OcrLookup::Legacy(page));
            }
        }
        target
    }

    async fn fetch_json(&self, path: &str) -> Option<Value> {
        let bytes = match self.store.fetch(path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(path, error = %err, "blob probe missed");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(path, error = %err, "blob is not valid JSON");
                None
            }
        }
    }
}
