//! Mapping from document-native and OCR-layout coordinates into canvas pixels.
//!
//! Text-layer hits share the renderer's single page scale, so one factor is
//! applied to both axes. OCR layout grids are rasterized independently of the
//! PDF page box and need their own factor per axis.

use crate::CanvasSize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IsotropicScale {
    pub factor: f64,
    native_height: f64,
}

impl IsotropicScale {
    pub fn for_page(canvas: CanvasSize, native_width: f64, native_height: f64) -> Option<Self> {
        if !(native_width.is_finite() && native_width > 0.0 && canvas.width > 0.0) {
            return None;
        }
        Some(Self {
            factor: canvas.width / native_width,
            native_height,
        })
    }

    /// Converts a box given in PDF user space (origin bottom-left) into a
    /// canvas rectangle `(x, y, width, height)` with a top-left origin.
    pub fn rect(&self, left: f64, bottom: f64, width: f64, height: f64) -> [f64; 4] {
        let top = self.native_height - (bottom + height);
        [
            left * self.factor,
            top * self.factor,
            width * self.factor,
            height * self.factor,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisScale {
    pub x: f64,
    pub y: f64,
}

impl AxisScale {
    pub fn for_layout(canvas: CanvasSize, layout_width: f64, layout_height: f64) -> Option<Self> {
        let usable = |v: f64| v.is_finite() && v > 0.0;
        if !(usable(layout_width) && usable(layout_height)) {
            return None;
        }
        Some(Self {
            x: canvas.width / layout_width,
            y: canvas.height / layout_height,
        })
    }

    /// Scales a flattened `[x0, y0, x1, y1, …]` polygon: even indices by the
    /// x factor, odd indices by the y factor.
    pub fn polygon(&self, coords: &[f64]) -> Vec<f64> {
        coords
            .iter()
            .enumerate()
            .map(|(idx, value)| if idx % 2 == 0 { value * self.x } else { value * self.y })
            .collect()
    }
}
