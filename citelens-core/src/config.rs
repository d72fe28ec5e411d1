//! Engine configuration read from `config.toml`.
//!
//! Every section is optional. Selected values can be overridden through
//! `CITELENS_*` environment variables so that credentials need not live in
//! the file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::locator::DEFAULT_MAX_OCR_HIGHLIGHTS;
use crate::matcher::{MatcherOptions, DEFAULT_DOCUMENT_BASE_URL};
use crate::resolver::{FolderRules, DEFAULT_CATEGORIES};

pub const ENV_BLOB_URL: &str = "CITELENS_BLOB_URL";
pub const ENV_BLOB_TOKEN: &str = "CITELENS_BLOB_TOKEN";
pub const ENV_BLOB_ROOT: &str = "CITELENS_BLOB_ROOT";
pub const ENV_PDFIUM_LIBRARY: &str = "CITELENS_PDFIUM_LIBRARY_PATH";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub matcher: MatcherConfig,
    pub ocr: OcrConfig,
    pub render: RenderConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub document_base_url: String,
    pub root_dir: Option<PathBuf>,
    pub base_url: Option<String>,
    pub auth_token: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            document_base_url: DEFAULT_DOCUMENT_BASE_URL.to_owned(),
            root_dir: None,
            base_url: None,
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub first_result_fallback: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            first_result_fallback: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Folder names that mark a category layout (`{user}/{category}/…`).
    pub categories: Vec<String>,
    pub max_highlights: usize,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            categories: DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
            max_highlights: DEFAULT_MAX_OCR_HIGHLIGHTS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub pdfium_library_path: Option<PathBuf>,
}

impl EngineConfig {
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("failed to parse configuration")
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config file {:?}", path))
    }

    /// Loads `path` when given, else the per-user config file if it exists,
    /// else the defaults. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::load_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(url) = lookup(ENV_BLOB_URL) {
            self.storage.base_url = Some(url);
        }
        if let Some(token) = lookup(ENV_BLOB_TOKEN) {
            self.storage.auth_token = Some(token);
        }
        if let Some(root) = lookup(ENV_BLOB_ROOT) {
            self.storage.root_dir = Some(PathBuf::from(root));
        }
        if let Some(path) = lookup(ENV_PDFIUM_LIBRARY) {
            self.render.pdfium_library_path = Some(PathBuf::from(path));
        }
    }

    pub fn matcher_options(&self) -> Result<MatcherOptions> {
        let document_base_url = Url::parse(&self.storage.document_base_url).with_context(|| {
            format!(
                "invalid storage.document_base_url {:?}",
                self.storage.document_base_url
            )
        })?;
        Ok(MatcherOptions {
            first_result_fallback: self.matcher.first_result_fallback,
            document_base_url,
        })
    }

    pub fn folder_rules(&self) -> FolderRules {
        FolderRules::new(&self.ocr.categories)
    }
}

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("net", "citelens", "citelens")
}

pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}
