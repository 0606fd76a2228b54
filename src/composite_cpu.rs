//! CPU compositor — the reference implementation of the blend math and the
//! fallback when no GPU adapter exists.
//!
//! Layers are placed at their bound rect plus drag offset over a transparent
//! document-sized canvas and folded bottom-to-top with `blend_pixel`, the
//! same formulas the WGSL shader runs.  Rows composite independently, so the
//! outer loop is rayon-parallel.

use image::RgbaImage;
use rayon::prelude::*;

use crate::blend::{
    self, BlendMode, color_burn_channel, color_dodge_channel, divide_channel, hard_light_channel,
    overlay_channel, soft_light_channel,
};
use crate::document::LayerPixelData;

/// One layer ready for compositing, bottom-to-top order.
pub struct PlacedLayer<'a> {
    pub pixels: &'a LayerPixelData,
    pub blend_mode: BlendMode,
    /// 0..=255 layer opacity, multiplied into the source alpha.
    pub opacity: u8,
    /// Drag offset in document pixels, added to the layer's own position.
    pub offset: (f32, f32),
}

/// Blend `top` over `base`, both straight-alpha RGBA.
pub fn blend_pixel(base: [u8; 4], top: [u8; 4], mode: BlendMode, opacity: u8) -> [u8; 4] {
    let src_a = (top[3] as f32 / 255.0) * (opacity as f32 / 255.0);
    if src_a <= 0.0 {
        return base;
    }
    // Fully opaque Normal replaces outright.
    if mode == BlendMode::Normal && src_a >= 1.0 {
        return [top[0], top[1], top[2], 255];
    }

    let dst_a = base[3] as f32 / 255.0;
    let b = [
        base[0] as f32 / 255.0,
        base[1] as f32 / 255.0,
        base[2] as f32 / 255.0,
    ];
    let s = [
        top[0] as f32 / 255.0,
        top[1] as f32 / 255.0,
        top[2] as f32 / 255.0,
    ];

    let blended = blend_rgb(b, s, mode);

    // Source-over with straight-alpha divide-out.
    let out_a = src_a + dst_a * (1.0 - src_a);
    if out_a <= 0.0 {
        return [0, 0, 0, 0];
    }
    let mut out = [0u8; 4];
    for c in 0..3 {
        let v = (blended[c] * src_a + b[c] * dst_a * (1.0 - src_a)) / out_a;
        out[c] = (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    }
    out[3] = (out_a.clamp(0.0, 1.0) * 255.0).round() as u8;
    out
}

fn blend_rgb(b: [f32; 3], s: [f32; 3], mode: BlendMode) -> [f32; 3] {
    match mode {
        BlendMode::Normal => s,
        BlendMode::Multiply => per_channel(b, s, |b, s| b * s),
        BlendMode::Screen => per_channel(b, s, |b, s| b + s - b * s),
        BlendMode::Overlay => per_channel(b, s, overlay_channel),
        BlendMode::Darken => per_channel(b, s, |b, s| b.min(s)),
        BlendMode::Lighten => per_channel(b, s, |b, s| b.max(s)),
        BlendMode::ColorDodge => per_channel(b, s, color_dodge_channel),
        BlendMode::ColorBurn => per_channel(b, s, color_burn_channel),
        BlendMode::SoftLight => per_channel(b, s, soft_light_channel),
        BlendMode::HardLight => per_channel(b, s, hard_light_channel),
        BlendMode::Difference => per_channel(b, s, |b, s| (b - s).abs()),
        BlendMode::Exclusion => per_channel(b, s, |b, s| b + s - 2.0 * b * s),
        BlendMode::LinearBurn => per_channel(b, s, |b, s| (b + s - 1.0).max(0.0)),
        BlendMode::LinearDodge => per_channel(b, s, |b, s| (b + s).min(1.0)),
        BlendMode::Subtract => per_channel(b, s, |b, s| (b - s).max(0.0)),
        BlendMode::Divide => per_channel(b, s, divide_channel),
        BlendMode::Hue => {
            let sat = blend::saturation(b);
            blend::set_luminance(blend::set_saturation(s, sat), blend::luminance(b))
        }
        BlendMode::Saturation => {
            let sat = blend::saturation(s);
            blend::set_luminance(blend::set_saturation(b, sat), blend::luminance(b))
        }
        BlendMode::Color => blend::set_luminance(s, blend::luminance(b)),
        BlendMode::Luminosity => blend::set_luminance(b, blend::luminance(s)),
    }
}

#[inline]
fn per_channel(b: [f32; 3], s: [f32; 3], f: impl Fn(f32, f32) -> f32) -> [f32; 3] {
    [f(b[0], s[0]), f(b[1], s[1]), f(b[2], s[2])]
}

/// Composite `layers` (bottom-to-top) over a transparent document canvas.
pub fn composite(doc_width: u32, doc_height: u32, layers: &[PlacedLayer<'_>]) -> RgbaImage {
    let mut canvas = RgbaImage::new(doc_width, doc_height);
    if doc_width == 0 || doc_height == 0 {
        return canvas;
    }

    let row_len = doc_width as usize * 4;
    canvas
        .par_chunks_exact_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            for layer in layers {
                composite_row(row, y as i64, doc_width, layer);
            }
        });
    canvas
}

fn composite_row(row: &mut [u8], y: i64, doc_width: u32, layer: &PlacedLayer<'_>) {
    let px = layer.pixels;
    // Offsets round to whole pixels for sampling, matching the shader's
    // texel snap.
    let left = px.left as i64 + layer.offset.0.round() as i64;
    let top = px.top as i64 + layer.offset.1.round() as i64;

    let ly = y - top;
    if ly < 0 || ly >= px.height as i64 {
        return;
    }

    let x0 = left.max(0);
    let x1 = (left + px.width as i64).min(doc_width as i64);
    for x in x0..x1 {
        let src_idx = ((ly as u32 * px.width + (x - left) as u32) * 4) as usize;
        let dst_idx = x as usize * 4;
        let top_px: [u8; 4] = px.rgba[src_idx..src_idx + 4]
            .try_into()
            .unwrap_or([0, 0, 0, 0]);
        let base_px: [u8; 4] = row[dst_idx..dst_idx + 4]
            .try_into()
            .unwrap_or([0, 0, 0, 0]);
        let out = blend_pixel(base_px, top_px, layer.blend_mode, layer.opacity);
        row[dst_idx..dst_idx + 4].copy_from_slice(&out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, rgba: [u8; 4], left: i32, top: i32) -> LayerPixelData {
        let mut buf = Vec::with_capacity((w * h * 4) as usize);
        for _ in 0..w * h {
            buf.extend_from_slice(&rgba);
        }
        LayerPixelData::new(buf, w, h, left, top)
    }

    #[test]
    fn normal_opaque_replaces() {
        let out = blend_pixel([10, 20, 30, 255], [200, 100, 50, 255], BlendMode::Normal, 255);
        assert_eq!(out, [200, 100, 50, 255]);
    }

    #[test]
    fn zero_alpha_top_leaves_base() {
        let base = [10, 20, 30, 255];
        assert_eq!(blend_pixel(base, [99, 99, 99, 0], BlendMode::Multiply, 255), base);
        assert_eq!(blend_pixel(base, [99, 99, 99, 255], BlendMode::Multiply, 0), base);
    }

    #[test]
    fn multiply_darkens() {
        let out = blend_pixel([128, 128, 128, 255], [128, 128, 128, 255], BlendMode::Multiply, 255);
        assert!(out[0] < 128);
        assert_eq!(out[3], 255);
    }

    #[test]
    fn blend_order_is_not_commutative() {
        let a = [200, 40, 40, 255];
        let b = [40, 200, 40, 255];
        let ab = blend_pixel(a, b, BlendMode::ColorBurn, 255);
        let ba = blend_pixel(b, a, BlendMode::ColorBurn, 255);
        assert_ne!(ab, ba);
    }

    #[test]
    fn half_opacity_normal_is_a_mix() {
        let out = blend_pixel([0, 0, 0, 255], [255, 255, 255, 255], BlendMode::Normal, 128);
        assert!(out[0] > 100 && out[0] < 155, "got {}", out[0]);
        assert_eq!(out[3], 255);
    }

    #[test]
    fn composite_places_layer_at_bounds() {
        let layer = solid(2, 2, [255, 0, 0, 255], 1, 1);
        let placed = PlacedLayer {
            pixels: &layer,
            blend_mode: BlendMode::Normal,
            opacity: 255,
            offset: (0.0, 0.0),
        };
        let out = composite(4, 4, &[placed]);
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert_eq!(out.get_pixel(1, 1).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(2, 2).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(3, 3).0, [0, 0, 0, 0]);
    }

    #[test]
    fn drag_offset_shifts_the_composite() {
        let layer = solid(2, 2, [0, 255, 0, 255], 0, 0);
        let base = composite(
            6,
            6,
            &[PlacedLayer {
                pixels: &layer,
                blend_mode: BlendMode::Normal,
                opacity: 255,
                offset: (0.0, 0.0),
            }],
        );
        let moved = composite(
            6,
            6,
            &[PlacedLayer {
                pixels: &layer,
                blend_mode: BlendMode::Normal,
                opacity: 255,
                offset: (3.0, 2.0),
            }],
        );
        for y in 0..2u32 {
            for x in 0..2u32 {
                assert_eq!(base.get_pixel(x, y), moved.get_pixel(x + 3, y + 2));
            }
        }
        assert_eq!(moved.get_pixel(0, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn layers_fold_bottom_to_top() {
        let red = solid(2, 2, [255, 0, 0, 255], 0, 0);
        let green = solid(2, 2, [0, 255, 0, 255], 0, 0);
        let out = composite(
            2,
            2,
            &[
                PlacedLayer {
                    pixels: &red,
                    blend_mode: BlendMode::Normal,
                    opacity: 255,
                    offset: (0.0, 0.0),
                },
                PlacedLayer {
                    pixels: &green,
                    blend_mode: BlendMode::Normal,
                    opacity: 255,
                    offset: (0.0, 0.0),
                },
            ],
        );
        assert_eq!(out.get_pixel(0, 0).0, [0, 255, 0, 255]);
    }

    #[test]
    fn layer_clipped_at_document_edge() {
        let layer = solid(4, 4, [9, 9, 9, 255], -2, -2);
        let placed = PlacedLayer {
            pixels: &layer,
            blend_mode: BlendMode::Normal,
            opacity: 255,
            offset: (0.0, 0.0),
        };
        let out = composite(3, 3, &[placed]);
        assert_eq!(out.get_pixel(0, 0).0, [9, 9, 9, 255]);
        assert_eq!(out.get_pixel(2, 2).0, [0, 0, 0, 0]);
    }
}
