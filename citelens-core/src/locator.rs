//! Finding a cited passage on a rendered page.
//!
//! Stage A searches the page's digital text layer. Only when that finds
//! nothing does stage B score the page's OCR lines against the keyword.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::cancel::CancelToken;
use crate::error::Cancelled;
use crate::keywords::keyword_survivors;
use crate::ocr::OcrPage;
use crate::resolver::{OcrLayoutResolver, OcrQuery};
use crate::scale::{AxisScale, IsotropicScale};
use crate::{CanvasSize, DocumentMeta};

pub const DEFAULT_MAX_OCR_HIGHLIGHTS: usize = 5;
const MIN_POLYGON_COORDS: usize = 8;

const SCORE_LINE_CONTAINS_PHRASE: f64 = 80.0;
const SCORE_PHRASE_CONTAINS_LINE: f64 = 60.0;
const SCORE_PARTIAL_BASE: f64 = 30.0;
const SCORE_PARTIAL_RANGE: f64 = 30.0;

/// A run of digital text positioned in PDF user space (points, origin at
/// the bottom-left corner of the page).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    pub left: f64,
    pub bottom: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    pub native_width: f64,
    pub native_height: f64,
    pub runs: Vec<TextRun>,
}

#[async_trait]
pub trait PageTextLayer: Send + Sync {
    async fn page_text(&self, page: u32) -> anyhow::Result<PageText>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanvasRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPolygon {
    pub score: f64,
    pub content: String,
    /// Flattened `[x0, y0, x1, y1, …]` in canvas pixels.
    pub points: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum Highlight {
    #[default]
    None,
    Rects(Vec<CanvasRect>),
    Polygons(Vec<ScoredPolygon>),
}

impl Highlight {
    pub fn is_empty(&self) -> bool {
        match self {
            Highlight::None => true,
            Highlight::Rects(rects) => rects.is_empty(),
            Highlight::Polygons(polygons) => polygons.is_empty(),
        }
    }
}

pub struct LocateRequest<'a> {
    pub page: u32,
    pub keyword: &'a str,
    pub canvas: CanvasSize,
    pub meta: Option<&'a DocumentMeta>,
}

impl LocateRequest<'_> {
    pub fn key(&self) -> LocateKey {
        LocateKey {
            page: self.page,
            keyword: self.keyword.to_owned(),
            canvas: self.canvas,
        }
    }
}

pub struct HighlightLocator {
    resolver: Arc<OcrLayoutResolver>,
    max_ocr_highlights: usize,
}

impl HighlightLocator {
    pub fn new(resolver: Arc<OcrLayoutResolver>) -> Self {
        Self {
            resolver,
            max_ocr_highlights: DEFAULT_MAX_OCR_HIGHLIGHTS,
        }
    }

    pub fn with_max_ocr_highlights(mut self, max: usize) -> Self {
        self.max_ocr_highlights = max;
        self
    }

    pub fn resolver(&self) -> &Arc<OcrLayoutResolver> {
        &self.resolver
    }

    /// Computes the highlight for one page. `Err(Cancelled)` means the run was
    /// superseded and its partial result must be dropped.
    #[instrument(skip_all, fields(page = request.page, keyword = request.keyword))]
    pub async fn locate(
        &self,
        request: &LocateRequest<'_>,
        layer: &dyn PageTextLayer,
        cancel: &CancelToken,
    ) -> Result<Highlight, Cancelled> {
        cancel.check()?;
        if !request.canvas.is_drawable() {
            return Ok(Highlight::None);
        }

        let survivors = keyword_survivors(request.keyword);
        if !survivors.is_empty() {
            let rects = match layer.page_text(request.page).await {
                Ok(text) => text_layer_rects(&text, &survivors, request.canvas),
                Err(err) => {
                    warn!(?err, "text layer unavailable, falling back to OCR layout");
                    Vec::new()
                }
            };
            cancel.check()?;
            if !rects.is_empty() {
                debug!(matches = rects.len(), "highlighted from text layer");
                return Ok(Highlight::Rects(rects));
            }
        }

        let Some(meta) = request.meta else {
            return Ok(Highlight::None);
        };
        cancel.check()?;
        let lookup = self
            .resolver
            .resolve(&OcrQuery::from_meta(meta, request.page))
            .await;
        cancel.check()?;

        let Some(page) = lookup.page() else {
            debug!("no OCR layout for page");
            return Ok(Highlight::None);
        };
        let polygons = ocr_polygons(
            page,
            request.keyword,
            &survivors,
            request.canvas,
            self.max_ocr_highlights,
        );
        debug!(matches = polygons.len(), source = lookup.kind(), "highlighted from OCR layout");
        if polygons.is_empty() {
            Ok(Highlight::None)
        } else {
            Ok(Highlight::Polygons(polygons))
        }
    }
}

pub fn text_layer_rects(text: &PageText, survivors: &[String], canvas: CanvasSize) -> Vec<CanvasRect> {
    if survivors.is_empty() {
        return Vec::new();
    }
    let Some(scale) = IsotropicScale::for_page(canvas, text.native_width, text.native_height) else {
        return Vec::new();
    };

    text.runs
        .iter()
        .filter(|run| {
            let lowered = run.text.to_lowercase();
            survivors.iter().any(|keyword| lowered.contains(keyword.as_str()))
        })
        .map(|run| {
            let [x, y, width, height] = scale.rect(run.left, run.bottom, run.width, run.height);
            CanvasRect {
                x,
                y,
                width,
                height,
            }
        })
        .collect()
}

pub fn score_line(line: &str, phrase: &str, survivors: &[String]) -> f64 {
    if !phrase.is_empty() && line.contains(phrase) {
        return SCORE_LINE_CONTAINS_PHRASE;
    }
    if !line.is_empty() && phrase.contains(line) && line.chars().count() > 3 {
        return SCORE_PHRASE_CONTAINS_LINE;
    }
    if survivors.is_empty() {
        return 0.0;
    }
    let matched = survivors
        .iter()
        .filter(|keyword| line.contains(keyword.as_str()))
        .count();
    if matched == 0 {
        0.0
    } else {
        SCORE_PARTIAL_BASE + SCORE_PARTIAL_RANGE * matched as f64 / survivors.len() as f64
    }
}

/// Best-scoring OCR lines, at most `limit`, scaled per axis onto the canvas.
/// Lines whose polygon has fewer than eight coordinates are dropped after the
/// cut, so they can shrink the result below `limit`.
pub fn ocr_polygons(
    page: &OcrPage,
    keyword: &str,
    survivors: &[String],
    canvas: CanvasSize,
    limit: usize,
) -> Vec<ScoredPolygon> {
    let Some(scale) = AxisScale::for_layout(canvas, page.layout_width, page.layout_height) else {
        return Vec::new();
    };
    let phrase = keyword.trim().to_lowercase();

    let mut scored: Vec<(f64, &str, &[f64])> = page
        .lines
        .iter()
        .filter_map(|line| {
            let content = line.content.trim();
            if content.is_empty() {
                return None;
            }
            let score = score_line(&content.to_lowercase(), &phrase, survivors);
            (score > 0.0).then_some((score, content, line.polygon.as_slice()))
        })
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    scored
        .into_iter()
        .take(limit)
        .filter(|(_, _, polygon)| polygon.len() >= MIN_POLYGON_COORDS)
        .map(|(score, content, polygon)| ScoredPolygon {
            score,
            content: content.to_owned(),
            points: scale.polygon(polygon),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocateKey {
    pub page: u32,
    pub keyword: String,
    pub canvas: CanvasSize,
}

/// Keeps the highlight of the open page in sync with its inputs and makes
/// sure only the latest run can publish.
#[derive(Debug, Default)]
pub struct HighlightTracker {
    active: Option<(LocateKey, CancelToken)>,
    current: Highlight,
}

impl HighlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a run for `key` and cancels the one it supersedes. Returns
    /// `None` when `key` matches the run already started.
    pub fn begin(&mut self, key: LocateKey) -> Option<CancelToken> {
        if matches!(&self.active, Some((active, _)) if *active == key) {
            return None;
        }
        if let Some((_, previous)) = self.active.take() {
            previous.cancel();
        }
        self.current = Highlight::None;
        let token = CancelToken::new();
        self.active = Some((key, token.clone()));
        Some(token)
    }

    /// Stores the outcome of the run owning `token`. Outcomes of cancelled
    /// or superseded runs are discarded and `false` is returned.
    pub fn publish(&mut self, token: &CancelToken, outcome: Result<Highlight, Cancelled>) -> bool {
        let is_active = matches!(&self.active, Some((_, active)) if active.same_as(token));
        match outcome {
            Ok(highlight) if is_active && !token.is_cancelled() => {
                self.current = highlight;
                true
            }
            _ => false,
        }
    }

    pub fn current(&self) -> &Highlight {
        &self.current
    }

    pub fn reset(&mut self) {
        if let Some((_, token)) = self.active.take() {
            token.cancel();
        }
        self.current = Highlight::None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{BlobStore, MemoryBlobStore};
    use crate::ocr::OcrLine;
    use crate::resolver::FolderRules;
    use parking_lot::Mutex;
    use serde_json::json;

    struct FixedTextLayer {
        text: PageText,
        calls: Mutex<Vec<u32>>,
        cancel_on_call: Option<CancelToken>,
    }

    impl FixedTextLayer {
        fn new(runs: Vec<TextRun>) -> Self {
            Self {
                text: PageText {
                    native_width: 612.0,
                    native_height: 792.0,
                    runs,
                },
                calls: Mutex::new(Vec::new()),
                cancel_on_call: None,
            }
        }
    }

    #[async_trait]
    impl PageTextLayer for FixedTextLayer {
        async fn page_text(&self, page: u32) -> anyhow::Result<PageText> {
            self.calls.lock().push(page);
            if let Some(token) = &self.cancel_on_call {
                token.cancel();
            }
            Ok(self.text.clone())
        }
    }

    fn run(text: &str) -> TextRun {
        TextRun {
            text: text.into(),
            left: 72.0,
            bottom: 700.0,
            width: 100.0,
            height: 12.0,
        }
    }

    fn meta() -> DocumentMeta {
        DocumentMeta {
            user_id: "u1".into(),
            filename: "설비사양서.pdf".into(),
            page: 3,
            blob_path: "u1/specs/설비사양서.pdf".into(),
        }
    }

    fn locator(store: &Arc<MemoryBlobStore>) -> HighlightLocator {
        let store: Arc<dyn BlobStore> = store.clone();
        HighlightLocator::new(Arc::new(OcrLayoutResolver::new(store, FolderRules::default())))
    }

    fn line(content: &str, polygon: Vec<f64>) -> OcrLine {
        OcrLine {
            content: content.into(),
            polygon,
        }
    }

    fn quad() -> Vec<f64> {
        vec![0.0, 0.0, 10.0, 0.0, 10.0, 5.0, 0.0, 5.0]
    }

    #[tokio::test]
    async fn text_layer_hit_skips_ocr_entirely() {
        let store = Arc::new(MemoryBlobStore::new());
        let layer = FixedTextLayer::new(vec![run("최대 압력 10 bar"), run("온도 범위")]);
        let meta = meta();
        let request = LocateRequest {
            page: 3,
            keyword: "압력",
            canvas: CanvasSize::new(1224.0, 1584.0),
            meta: Some(&meta),
        };

        let highlight = locator(&store)
            .locate(&request, &layer, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(
            highlight,
            Highlight::Rects(vec![CanvasRect {
                x: 144.0,
                y: 160.0,
                width: 200.0,
                height: 24.0
            }])
        );
        assert_eq!(store.fetch_count(), 0);
        assert_eq!(*layer.calls.lock(), vec![3]);
    }

    #[tokio::test]
    async fn ocr_fallback_scales_split_page_per_axis() {
        let store = Arc::new(MemoryBlobStore::new());
        store.insert_json("u1/json/설비사양서/meta.json", &json!({"format": "split"}));
        store.insert_json(
            "u1/json/설비사양서/page_3.json",
            &json!({"layout": {"width": 1000, "height": 2000, "lines": [
                {"content": "최대 압력 10 bar", "polygon": [0, 0, 100, 0, 100, 20, 0, 20]}
            ]}}),
        );
        let layer = FixedTextLayer::new(vec![run("unrelated heading")]);
        let meta = meta();
        let request = LocateRequest {
            page: 3,
            keyword: "압력",
            canvas: CanvasSize::new(500.0, 1000.0),
            meta: Some(&meta),
        };

        let highlight = locator(&store)
            .locate(&request, &layer, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(
            highlight,
            Highlight::Polygons(vec![ScoredPolygon {
                score: 80.0,
                content: "최대 압력 10 bar".into(),
                points: vec![0.0, 0.0, 50.0, 0.0, 50.0, 10.0, 0.0, 10.0],
            }])
        );
    }

    #[tokio::test]
    async fn nothing_found_is_empty_highlight() {
        let store = Arc::new(MemoryBlobStore::new());
        let layer = FixedTextLayer::new(Vec::new());
        let meta = meta();
        let request = LocateRequest {
            page: 1,
            keyword: "압력",
            canvas: CanvasSize::new(500.0, 1000.0),
            meta: Some(&meta),
        };
        let highlight = locator(&store)
            .locate(&request, &layer, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(highlight, Highlight::None);

        let request = LocateRequest { meta: None, ..request };
        let fetches = store.fetch_count();
        let highlight = locator(&store)
            .locate(&request, &layer, &CancelToken::new())
            .await
            .unwrap();
        assert!(highlight.is_empty());
        assert_eq!(store.fetch_count(), fetches);
    }

    #[tokio::test]
    async fn cancelled_runs_do_not_touch_the_resolver() {
        let store = Arc::new(MemoryBlobStore::new());
        let meta = meta();
        let request = LocateRequest {
            page: 3,
            keyword: "압력",
            canvas: CanvasSize::new(500.0, 1000.0),
            meta: Some(&meta),
        };

        let token = CancelToken::new();
        token.cancel();
        let layer = FixedTextLayer::new(Vec::new());
        let outcome = locator(&store).locate(&request, &layer, &token).await;
        assert_eq!(outcome, Err(Cancelled));
        assert!(layer.calls.lock().is_empty());

        let token = CancelToken::new();
        let mut layer = FixedTextLayer::new(Vec::new());
        layer.cancel_on_call = Some(token.clone());
        let outcome = locator(&store).locate(&request, &layer, &token).await;
        assert_eq!(outcome, Err(Cancelled));
        assert_eq!(store.fetch_count(), 0);
    }

    #[test]
    fn line_scores_follow_containment_then_coverage() {
        let survivors = keyword_survivors("최대 압력 온도");
        assert_eq!(score_line("최대 압력 온도 기준", "최대 압력 온도", &survivors), 80.0);
        assert_eq!(score_line("압력 온도", "최대 압력 온도", &survivors), 60.0);
        assert_eq!(score_line("압력 범위", "최대 압력 온도", &survivors), 40.0);
        assert_eq!(score_line("온도", "최대 압력 온도", &survivors), 40.0);
        assert_eq!(score_line("유량 범위", "최대 압력 온도", &survivors), 0.0);
        assert_eq!(score_line("anything", "", &[]), 0.0);
    }

    #[test]
    fn ocr_polygons_keep_top_five_in_descending_order() {
        let page = OcrPage {
            layout_width: 100.0,
            layout_height: 100.0,
            lines: vec![
                line("압력 only", quad()),
                line("no match here", quad()),
                line("최대 압력 온도 기준표", quad()),
                line("   ", quad()),
                line("온도 and 압력", quad()),
                line("최대", quad()),
                line("압력", quad()),
                line("온도 범위", quad()),
                line("최대 압력 온도", quad()),
            ],
        };
        let survivors = keyword_survivors("최대 압력 온도");
        let positive = page
            .lines
            .iter()
            .filter(|l| score_line(&l.content.trim().to_lowercase(), "최대 압력 온도", &survivors) > 0.0)
            .count();
        assert_eq!(positive, 7);

        let polygons = ocr_polygons(&page, "최대 압력 온도", &survivors, CanvasSize::new(100.0, 100.0), 5);
        assert_eq!(polygons.len(), positive.min(5));
        let scores: Vec<f64> = polygons.iter().map(|p| p.score).collect();
        assert_eq!(scores, vec![80.0, 80.0, 50.0, 40.0, 40.0]);
        assert_eq!(polygons[0].content, "최대 압력 온도 기준표");
        assert_eq!(polygons[1].content, "최대 압력 온도");
    }

    #[test]
    fn short_polygons_are_dropped_after_the_cut() {
        let page = OcrPage {
            layout_width: 10.0,
            layout_height: 10.0,
            lines: vec![
                line("압력 a", vec![0.0, 0.0, 1.0, 1.0]),
                line("압력 b", quad()),
                line("압력 c", quad()),
            ],
        };
        let survivors = keyword_survivors("압력");
        let polygons = ocr_polygons(&page, "압력", &survivors, CanvasSize::new(10.0, 10.0), 2);
        assert_eq!(polygons.len(), 1);
        assert_eq!(polygons[0].content, "압력 b");
    }

    fn key(page: u32) -> LocateKey {
        LocateKey {
            page,
            keyword: "압력".into(),
            canvas: CanvasSize::new(500.0, 1000.0),
        }
    }

    #[test]
    fn tracker_restarts_only_on_changed_inputs() {
        let mut tracker = HighlightTracker::new();
        let first = tracker.begin(key(1)).unwrap();
        assert!(tracker.begin(key(1)).is_none());

        let second = tracker.begin(key(2)).unwrap();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        let stale = Highlight::Rects(vec![CanvasRect {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
        }]);
        assert!(!tracker.publish(&first, Ok(stale.clone())));
        assert!(tracker.current().is_empty());

        assert!(tracker.publish(&second, Ok(stale.clone())));
        assert_eq!(tracker.current(), &stale);

        assert!(!tracker.publish(&second, Err(Cancelled)));
        tracker.reset();
        assert!(second.is_cancelled());
        assert!(tracker.current().is_empty());
    }
}
