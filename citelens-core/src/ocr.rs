//! OCR layout payloads as written by the offline analysis pipeline.
//!
//! The JSON comes in several shapes and is read leniently through
//! `serde_json::Value`: a line with a missing or oddly shaped field is
//! dropped on its own without failing the page.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrPage {
    pub layout_width: f64,
    pub layout_height: f64,
    pub lines: Vec<OcrLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrLine {
    pub content: String,
    /// Flattened `[x0, y0, x1, y1, …]`.
    pub polygon: Vec<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisMeta {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub pages: Option<u32>,
}

impl AnalysisMeta {
    pub fn is_split(&self) -> bool {
        self.format
            .as_deref()
            .is_some_and(|format| format.eq_ignore_ascii_case("split"))
    }
}

impl OcrPage {
    /// Reads `{layout: {width, height, lines}}` or the same fields at the top
    /// level. `None` when the page has no usable dimensions.
    pub fn from_json(value: &Value) -> Option<Self> {
        let layout = value
            .get("layout")
            .filter(|layout| layout.is_object())
            .unwrap_or(value);
        let layout_width = number(layout, &["width", "layoutWidth"])?;
        let layout_height = number(layout, &["height", "layoutHeight"])?;
        let lines = layout
            .get("lines")
            .and_then(Value::as_array)
            .map(|lines| lines.iter().filter_map(parse_line).collect())
            .unwrap_or_default();
        Some(Self {
            layout_width,
            layout_height,
            lines,
        })
    }
}

// Roots: `{analyzeResult: {pages}}`, `{pages}` or a bare array. Numbering falls
// back from `page_number`/`pageNumber` to `pageIndex + 1` to array position.
pub fn legacy_pages(value: &Value) -> Vec<(u32, OcrPage)> {
    let pages = value
        .get("analyzeResult")
        .and_then(|result| result.get("pages"))
        .or_else(|| value.get("pages"))
        .unwrap_or(value);
    let Some(pages) = pages.as_array() else {
        return Vec::new();
    };

    pages
        .iter()
        .enumerate()
        .filter_map(|(position, page)| {
            let number = page
                .get("page_number")
                .or_else(|| page.get("pageNumber"))
                .and_then(Value::as_u64)
                .or_else(|| page.get("pageIndex").and_then(Value::as_u64).map(|i| i + 1))
                .unwrap_or(position as u64 + 1);
            let number = u32::try_from(number).ok()?;
            OcrPage::from_json(page).map(|parsed| (number, parsed))
        })
        .collect()
}

fn parse_line(line: &Value) -> Option<OcrLine> {
    let content = line
        .get("content")
        .or_else(|| line.get("text"))
        .and_then(Value::as_str)?;
    let polygon = line
        .get("polygon")
        .or_else(|| line.get("boundingBox"))
        .and_then(flatten_polygon)?;
    Some(OcrLine {
        content: content.to_owned(),
        polygon,
    })
}

/// Accepts `[x0, y0, …]`, `[[x0, y0], …]` or `[{x, y}, …]`.
fn flatten_polygon(value: &Value) -> Option<Vec<f64>> {
    let items = value.as_array()?;
    if items.iter().all(Value::is_number) {
        return items.iter().map(Value::as_f64).collect();
    }

    let mut coords = Vec::with_capacity(items.len() * 2);
    for item in items {
        let (x, y) = match item {
            Value::Array(pair) if pair.len() == 2 => (pair[0].as_f64()?, pair[1].as_f64()?),
            Value::Object(point) => (point.get("x")?.as_f64()?, point.get("y")?.as_f64()?),
            _ => return None,
        };
        coords.push(x);
        coords.push(y);
    }
    Some(coords)
}

fn number(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_f64))
}
