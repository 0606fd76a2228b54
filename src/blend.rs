//! Blend modes shared by the CPU compositor and the WGSL blend shader.
//!
//! The numeric ids returned by [`BlendMode::to_u32`] are part of the shader
//! ABI — the `switch` in `gpu/shaders.rs` matches them case by case.  Keep
//! the two in sync when adding a mode.

/// The 20 Photoshop-style blend modes the compositor reproduces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    SoftLight,
    HardLight,
    Difference,
    Exclusion,
    LinearBurn,
    LinearDodge,
    Subtract,
    Divide,
    Hue,
    Saturation,
    Color,
    Luminosity,
}

impl BlendMode {
    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::Darken => "Darken",
            BlendMode::Lighten => "Lighten",
            BlendMode::ColorDodge => "Color Dodge",
            BlendMode::ColorBurn => "Color Burn",
            BlendMode::SoftLight => "Soft Light",
            BlendMode::HardLight => "Hard Light",
            BlendMode::Difference => "Difference",
            BlendMode::Exclusion => "Exclusion",
            BlendMode::LinearBurn => "Linear Burn",
            BlendMode::LinearDodge => "Linear Dodge",
            BlendMode::Subtract => "Subtract",
            BlendMode::Divide => "Divide",
            BlendMode::Hue => "Hue",
            BlendMode::Saturation => "Saturation",
            BlendMode::Color => "Color",
            BlendMode::Luminosity => "Luminosity",
        }
    }

    /// Stable id used as the shader's `blend_mode` uniform.
    pub fn to_u32(self) -> u32 {
        match self {
            BlendMode::Normal => 0,
            BlendMode::Multiply => 1,
            BlendMode::Screen => 2,
            BlendMode::Overlay => 3,
            BlendMode::Darken => 4,
            BlendMode::Lighten => 5,
            BlendMode::ColorDodge => 6,
            BlendMode::ColorBurn => 7,
            BlendMode::SoftLight => 8,
            BlendMode::HardLight => 9,
            BlendMode::Difference => 10,
            BlendMode::Exclusion => 11,
            BlendMode::LinearBurn => 12,
            BlendMode::LinearDodge => 13,
            BlendMode::Subtract => 14,
            BlendMode::Divide => 15,
            BlendMode::Hue => 16,
            BlendMode::Saturation => 17,
            BlendMode::Color => 18,
            BlendMode::Luminosity => 19,
        }
    }

    /// Reconstruct from a stable id (defaults to Normal for unknown values).
    pub fn from_u32(v: u32) -> Self {
        match v {
            0 => BlendMode::Normal,
            1 => BlendMode::Multiply,
            2 => BlendMode::Screen,
            3 => BlendMode::Overlay,
            4 => BlendMode::Darken,
            5 => BlendMode::Lighten,
            6 => BlendMode::ColorDodge,
            7 => BlendMode::ColorBurn,
            8 => BlendMode::SoftLight,
            9 => BlendMode::HardLight,
            10 => BlendMode::Difference,
            11 => BlendMode::Exclusion,
            12 => BlendMode::LinearBurn,
            13 => BlendMode::LinearDodge,
            14 => BlendMode::Subtract,
            15 => BlendMode::Divide,
            16 => BlendMode::Hue,
            17 => BlendMode::Saturation,
            18 => BlendMode::Color,
            19 => BlendMode::Luminosity,
            _ => BlendMode::Normal,
        }
    }

    /// Map a PSD four-byte blend-mode key to a mode.  Unknown keys fall back
    /// to Normal, matching what the reference renderer displays for them.
    pub fn from_psd_key(key: &[u8; 4]) -> Self {
        match key {
            b"norm" => BlendMode::Normal,
            b"mul " => BlendMode::Multiply,
            b"scrn" => BlendMode::Screen,
            b"over" => BlendMode::Overlay,
            b"dark" => BlendMode::Darken,
            b"lite" => BlendMode::Lighten,
            b"div " | b"idiv" => BlendMode::ColorDodge,
            b"ibrn" => BlendMode::ColorBurn,
            b"sLit" => BlendMode::SoftLight,
            b"hLit" => BlendMode::HardLight,
            b"diff" => BlendMode::Difference,
            b"smud" => BlendMode::Exclusion,
            b"lbrn" => BlendMode::LinearBurn,
            b"lddg" => BlendMode::LinearDodge,
            b"fsub" => BlendMode::Subtract,
            b"fdiv" => BlendMode::Divide,
            b"hue " => BlendMode::Hue,
            b"sat " => BlendMode::Saturation,
            b"colr" => BlendMode::Color,
            b"lum " => BlendMode::Luminosity,
            _ => BlendMode::Normal,
        }
    }
}

// ---- Per-channel blend math (CPU path) -------------------------------------
//
// All functions take (base, top) in 0..1.  These are the exact formulas the
// shader reproduces; the compositor tests compare against them.

pub(crate) fn overlay_channel(base: f32, top: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

pub(crate) fn color_dodge_channel(base: f32, top: f32) -> f32 {
    if base == 0.0 {
        0.0
    } else if top >= 1.0 {
        1.0
    } else {
        (base / (1.0 - top)).min(1.0)
    }
}

pub(crate) fn color_burn_channel(base: f32, top: f32) -> f32 {
    if base >= 1.0 {
        1.0
    } else if top == 0.0 {
        0.0
    } else {
        1.0 - ((1.0 - base) / top).min(1.0)
    }
}

/// W3C Soft Light formula.
pub(crate) fn soft_light_channel(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        base - (1.0 - 2.0 * top) * base * (1.0 - base)
    } else {
        let d = if base <= 0.25 {
            ((16.0 * base - 12.0) * base + 4.0) * base
        } else {
            base.sqrt()
        };
        base + (2.0 * top - 1.0) * (d - base)
    }
}

pub(crate) fn hard_light_channel(base: f32, top: f32) -> f32 {
    if top < 0.5 {
        2.0 * top * base
    } else {
        1.0 - 2.0 * (1.0 - top) * (1.0 - base)
    }
}

pub(crate) fn divide_channel(base: f32, top: f32) -> f32 {
    if top > 0.0 { (base / top).min(1.0) } else { 1.0 }
}

// ---- Luminance helpers for Hue / Saturation / Color / Luminosity -----------
//
// These reproduce the reference renderer's simplified non-chroma-preserving
// approximation, not Photoshop's iterative HSL clip.

/// Rec.601 luma.
pub(crate) fn luminance(rgb: [f32; 3]) -> f32 {
    0.299 * rgb[0] + 0.587 * rgb[1] + 0.114 * rgb[2]
}

pub(crate) fn saturation(rgb: [f32; 3]) -> f32 {
    let max = rgb[0].max(rgb[1]).max(rgb[2]);
    let min = rgb[0].min(rgb[1]).min(rgb[2]);
    max - min
}

/// Shift `rgb` so its luminance equals `target`, clipping components back
/// into 0..1 against the resulting luminance.
pub(crate) fn set_luminance(rgb: [f32; 3], target: f32) -> [f32; 3] {
    let d = target - luminance(rgb);
    let shifted = [rgb[0] + d, rgb[1] + d, rgb[2] + d];
    clip_color(shifted)
}

/// Scale `rgb` to the requested saturation around its mid value, then return
/// it; a gray input (saturation 0) stays gray.
pub(crate) fn set_saturation(rgb: [f32; 3], target: f32) -> [f32; 3] {
    let max = rgb[0].max(rgb[1]).max(rgb[2]);
    let min = rgb[0].min(rgb[1]).min(rgb[2]);
    if max > min {
        let scale = target / (max - min);
        [
            (rgb[0] - min) * scale,
            (rgb[1] - min) * scale,
            (rgb[2] - min) * scale,
        ]
    } else {
        [0.0, 0.0, 0.0]
    }
}

fn clip_color(rgb: [f32; 3]) -> [f32; 3] {
    let lum = luminance(rgb);
    let min = rgb[0].min(rgb[1]).min(rgb[2]);
    let max = rgb[0].max(rgb[1]).max(rgb[2]);
    let mut out = rgb;
    if min < 0.0 {
        for c in &mut out {
            *c = lum + (*c - lum) * lum / (lum - min);
        }
    }
    if max > 1.0 {
        for c in &mut out {
            *c = lum + (*c - lum) * (1.0 - lum) / (max - lum);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip() {
        for id in 0..20 {
            assert_eq!(BlendMode::from_u32(id).to_u32(), id);
        }
        assert_eq!(BlendMode::from_u32(99), BlendMode::Normal);
    }

    #[test]
    fn psd_keys_map() {
        assert_eq!(BlendMode::from_psd_key(b"norm"), BlendMode::Normal);
        assert_eq!(BlendMode::from_psd_key(b"mul "), BlendMode::Multiply);
        assert_eq!(BlendMode::from_psd_key(b"lum "), BlendMode::Luminosity);
        assert_eq!(BlendMode::from_psd_key(b"????"), BlendMode::Normal);
    }

    #[test]
    fn set_luminance_hits_target() {
        let out = set_luminance([0.2, 0.4, 0.6], 0.5);
        assert!((luminance(out) - 0.5).abs() < 1e-4);
    }

    #[test]
    fn set_luminance_clips_into_range() {
        let out = set_luminance([1.0, 1.0, 0.0], 0.95);
        for c in out {
            assert!((0.0..=1.0).contains(&c), "component {} out of range", c);
        }
    }

    #[test]
    fn saturation_is_max_minus_min() {
        assert_eq!(saturation([0.1, 0.5, 0.3]), 0.4);
        assert_eq!(saturation([0.5, 0.5, 0.5]), 0.0);
    }
}
