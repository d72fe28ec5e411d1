use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use citelens_core::locator::{CanvasRect, ScoredPolygon};
use citelens_core::{Highlight, RenderImage};
use png::{BitDepth, ColorType, Encoder};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HighlightStyle {
    pub color: [u8; 3],
    pub alpha: f32,
}

impl Default for HighlightStyle {
    fn default() -> Self {
        Self {
            color: [255, 214, 0],
            alpha: 0.35,
        }
    }
}

/// Blends `highlight` into the page image. Coordinates are canvas pixels, so
/// the image must have been rendered at the canvas size used to locate.
pub fn paint_highlight(image: &mut RenderImage, highlight: &Highlight, style: HighlightStyle) {
    match highlight {
        Highlight::None => {}
        Highlight::Rects(rects) => {
            for rect in rects {
                fill_rect(image, rect, style);
            }
        }
        Highlight::Polygons(polygons) => {
            for polygon in polygons {
                fill_polygon(image, polygon, style);
            }
        }
    }
}

fn fill_rect(image: &mut RenderImage, rect: &CanvasRect, style: HighlightStyle) {
    let x0 = to_pixel(rect.x, image.width);
    let x1 = to_pixel(rect.x + rect.width, image.width);
    let y0 = to_pixel(rect.y, image.height);
    let y1 = to_pixel(rect.y + rect.height, image.height);
    if x0 >= x1 || y0 >= y1 {
        return;
    }
    let width = image.width as usize;
    for y in y0..y1 {
        let row_start = (y as usize) * width * 4;
        for x in x0..x1 {
            let idx = row_start + (x as usize) * 4;
            blend_pixel(&mut image.pixels[idx..idx + 4], style);
        }
    }
}

/// Even-odd scanline fill, sampling each pixel at its centre.
fn fill_polygon(image: &mut RenderImage, polygon: &ScoredPolygon, style: HighlightStyle) {
    let points: Vec<(f64, f64)> = polygon
        .points
        .chunks_exact(2)
        .map(|pair| (pair[0], pair[1]))
        .collect();
    if points.len() < 3 || image.width == 0 || image.height == 0 {
        return;
    }

    let min_y = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let max_y = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    let y0 = to_pixel(min_y, image.height);
    let y1 = to_pixel(max_y.ceil(), image.height);
    let width = image.width as usize;

    let mut crossings = Vec::with_capacity(points.len());
    for y in y0..y1 {
        let sample = y as f64 + 0.5;
        crossings.clear();
        for (i, &(ax, ay)) in points.iter().enumerate() {
            let (bx, by) = points[(i + 1) % points.len()];
            if (ay <= sample) != (by <= sample) {
                crossings.push(ax + (sample - ay) / (by - ay) * (bx - ax));
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));

        let row_start = (y as usize) * width * 4;
        for span in crossings.chunks_exact(2) {
            let x0 = to_pixel((span[0] - 0.5).ceil(), image.width);
            let x1 = to_pixel((span[1] - 0.5).ceil(), image.width);
            for x in x0..x1 {
                let idx = row_start + (x as usize) * 4;
                blend_pixel(&mut image.pixels[idx..idx + 4], style);
            }
        }
    }
}

fn to_pixel(value: f64, limit: u32) -> u32 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    (value.round() as u64).min(limit as u64) as u32
}

fn blend_pixel(pixel: &mut [u8], style: HighlightStyle) {
    let alpha = style.alpha.clamp(0.0, 1.0);
    let inv = 1.0 - alpha;
    for (channel, color) in pixel.iter_mut().zip(style.color) {
        *channel = ((*channel as f32 * inv) + (color as f32 * alpha))
            .round()
            .clamp(0.0, 255.0) as u8;
    }
}

pub fn encode_png<W: Write>(image: &RenderImage, out: W) -> Result<()> {
    let expected = image.width as usize * image.height as usize * 4;
    if image.pixels.len() != expected {
        bail!(
            "pixel buffer holds {} bytes, expected {} for {}x{}",
            image.pixels.len(),
            expected,
            image.width,
            image.height
        );
    }
    let mut encoder = Encoder::new(out, image.width, image.height);
    encoder.set_color(ColorType::Rgba);
    encoder.set_depth(BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&image.pixels)?;
    writer.finish()?;
    Ok(())
}

pub fn write_png(image: &RenderImage, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    encode_png(image, BufWriter::new(file))
        .with_context(|| format!("failed to write PNG to {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn white(width: u32, height: u32) -> RenderImage {
        RenderImage {
            width,
            height,
            pixels: vec![255; (width * height * 4) as usize],
        }
    }

    fn pixel(image: &RenderImage, x: u32, y: u32) -> &[u8] {
        let idx = ((y * image.width + x) * 4) as usize;
        &image.pixels[idx..idx + 4]
    }

    const OPAQUE_RED: HighlightStyle = HighlightStyle {
        color: [255, 0, 0],
        alpha: 1.0,
    };

    #[test]
    fn rects_are_clipped_to_the_image() {
        let mut image = white(10, 10);
        let highlight = Highlight::Rects(vec![CanvasRect {
            x: 6.0,
            y: -3.0,
            width: 20.0,
            height: 5.0,
        }]);
        paint_highlight(&mut image, &highlight, OPAQUE_RED);
        assert_eq!(pixel(&image, 6, 0), &[255, 0, 0, 255]);
        assert_eq!(pixel(&image, 9, 1), &[255, 0, 0, 255]);
        assert_eq!(pixel(&image, 9, 2), &[255, 255, 255, 255]);
        assert_eq!(pixel(&image, 5, 0), &[255, 255, 255, 255]);
    }

    #[test]
    fn polygons_fill_their_interior_only() {
        let mut image = white(20, 20);
        let highlight = Highlight::Polygons(vec![ScoredPolygon {
            score: 100.0,
            content: "밸브".into(),
            points: vec![2.0, 2.0, 12.0, 2.0, 12.0, 6.0, 2.0, 6.0],
        }]);
        paint_highlight(&mut image, &highlight, OPAQUE_RED);
        assert_eq!(pixel(&image, 2, 2), &[255, 0, 0, 255]);
        assert_eq!(pixel(&image, 11, 5), &[255, 0, 0, 255]);
        assert_eq!(pixel(&image, 12, 5), &[255, 255, 255, 255]);
        assert_eq!(pixel(&image, 5, 6), &[255, 255, 255, 255]);
        assert_eq!(pixel(&image, 1, 3), &[255, 255, 255, 255]);
    }

    #[test]
    fn partial_alpha_blends_and_keeps_alpha_channel() {
        let mut image = white(2, 1);
        let style = HighlightStyle {
            color: [0, 0, 0],
            alpha: 0.5,
        };
        let highlight = Highlight::Rects(vec![CanvasRect {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
        }]);
        paint_highlight(&mut image, &highlight, style);
        assert_eq!(pixel(&image, 0, 0), &[128, 128, 128, 255]);
        assert_eq!(pixel(&image, 1, 0), &[255, 255, 255, 255]);
    }

    #[test]
    fn degenerate_polygons_are_ignored() {
        let mut image = white(4, 4);
        let highlight = Highlight::Polygons(vec![ScoredPolygon {
            score: 90.0,
            content: "x".into(),
            points: vec![0.0, 0.0, 4.0, 4.0],
        }]);
        paint_highlight(&mut image, &highlight, OPAQUE_RED);
        assert!(image.pixels.iter().all(|&b| b == 255));
    }

    #[test]
    fn png_output_decodes_to_the_same_pixels() {
        let mut image = white(3, 2);
        image.pixels[0] = 7;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.png");
        write_png(&image, &path).unwrap();

        let decoded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.into_raw(), image.pixels);
    }

    #[test]
    fn mismatched_buffer_is_rejected() {
        let image = RenderImage {
            width: 2,
            height: 2,
            pixels: vec![0; 4],
        };
        assert!(encode_png(&image, Vec::new()).is_err());
    }
}
