//! Parsing of inline citation tokens.
//!
//! Two shapes are emitted by the chat backend:
//!
//! * pipe form, `Keyword|Page X|DocName|Index`, usually wrapped in `[[…]]`
//! * parenthetical form, `DocName (N)`
//!
//! Anything else is read as a bare document name.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

const NOISE_TOKENS: &[&str] = &[
    "**", "__", "~~", "``", "--", "==", "||", "##", "...", "->", "<-", "=>",
];

static PAREN_PAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>.*?)\s*[(（]\s*(?P<page>\d+)\s*[)）]$").expect("valid citation regex")
});

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid digit regex"));

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub raw_token: String,
    pub keyword_text: String,
    pub page_hint: Option<u32>,
    pub doc_name_hint: Option<String>,
    pub result_index_hint: Option<usize>,
}

impl Citation {
    pub fn page(&self) -> u32 {
        self.page_hint.unwrap_or(1)
    }

    pub fn doc_name(&self) -> Option<&str> {
        self.doc_name_hint.as_deref()
    }
}

/// Parses a raw citation token. Returns `None` for tokens that are too short or
/// are markdown noise; every other input yields a citation, with missing parts
/// left at their defaults.
pub fn parse_citation(raw: &str) -> Option<Citation> {
    let inner = strip_wrapper(raw);
    if inner.chars().count() < 2 || NOISE_TOKENS.contains(&inner) {
        debug!(token = raw, "rejected citation token");
        return None;
    }

    let citation = if inner.contains('|') {
        parse_pipe_form(raw, inner)
    } else if let Some(caps) = PAREN_PAGE.captures(inner) {
        let name = caps["name"].trim();
        Citation {
            raw_token: raw.to_owned(),
            keyword_text: String::new(),
            page_hint: caps["page"].parse().ok(),
            doc_name_hint: non_empty(name),
            result_index_hint: None,
        }
    } else {
        Citation {
            raw_token: raw.to_owned(),
            keyword_text: inner.to_owned(),
            page_hint: None,
            doc_name_hint: Some(inner.to_owned()),
            result_index_hint: None,
        }
    };
    Some(citation)
}

fn parse_pipe_form(raw: &str, inner: &str) -> Citation {
    let segments: Vec<&str> = inner.split('|').map(str::trim).collect();
    let keyword_text = segments.first().copied().unwrap_or_default().to_owned();
    let page_hint = segments
        .get(1)
        .and_then(|segment| DIGITS.find(segment))
        .and_then(|m| m.as_str().parse().ok());
    let doc_name_hint = segments.get(2).and_then(|segment| non_empty(segment));
    let result_index_hint = segments.get(3).and_then(|segment| segment.parse().ok());

    Citation {
        raw_token: raw.to_owned(),
        keyword_text,
        page_hint,
        doc_name_hint,
        result_index_hint,
    }
}

fn strip_wrapper(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim()
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_owned())
    }
}
