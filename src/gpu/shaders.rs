// ============================================================================
// GPU SHADERS — all WGSL code kept inline for containment
// ============================================================================

// ============================================================================
// BLEND SHADER — ping-pong layer compositing with full blend-mode support
// ============================================================================
//
// One pass per layer.  The fragment shader samples both the layer texture
// (foreground) and the previous accumulator (background), maps the fragment's
// document position into the layer's placement rect, applies the blend-mode
// math and source-over alpha, and writes the PREMULTIPLIED result.  Hardware
// blending is disabled; the shader does everything.
//
// `blend_mode` ids must match `BlendMode::to_u32` exactly.
pub const BLEND_SHADER: &str = r#"
struct BlendUniforms {
    // left, top, width, height of the placed layer, in document pixels
    layer_rect: vec4<f32>,
    doc_size: vec2<f32>,
    opacity: f32,
    blend_mode: u32,
};

@group(0) @binding(0) var<uniform> u: BlendUniforms;
@group(1) @binding(0) var fg_tex: texture_2d<f32>;
@group(1) @binding(1) var fg_samp: sampler;
@group(2) @binding(0) var bg_tex: texture_2d<f32>;
@group(2) @binding(1) var bg_samp: sampler;

struct VsOut {
    @builtin(position) clip_position: vec4<f32>,
    // Document-normalized coordinates, (0,0) top-left, (1,1) bottom-right.
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_blend(@builtin(vertex_index) vi: u32) -> VsOut {
    var positions = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 0.0), vec2<f32>(1.0, 0.0), vec2<f32>(1.0, 1.0),
        vec2<f32>(0.0, 0.0), vec2<f32>(1.0, 1.0), vec2<f32>(0.0, 1.0),
    );
    let p = positions[vi];
    var out: VsOut;
    out.clip_position = vec4<f32>(p.x * 2.0 - 1.0, 1.0 - p.y * 2.0, 0.0, 1.0);
    out.uv = p;
    return out;
}

// ---- Per-channel blend helpers ----

fn overlay_ch(b: f32, s: f32) -> f32 {
    if (b < 0.5) { return 2.0 * b * s; }
    return 1.0 - 2.0 * (1.0 - b) * (1.0 - s);
}

fn color_dodge_ch(b: f32, s: f32) -> f32 {
    if (b <= 0.0) { return 0.0; }
    if (s >= 1.0) { return 1.0; }
    return min(b / (1.0 - s), 1.0);
}

fn color_burn_ch(b: f32, s: f32) -> f32 {
    if (b >= 1.0) { return 1.0; }
    if (s <= 0.0) { return 0.0; }
    return 1.0 - min((1.0 - b) / s, 1.0);
}

fn soft_light_ch(b: f32, s: f32) -> f32 {
    if (s <= 0.5) {
        return b - (1.0 - 2.0 * s) * b * (1.0 - b);
    }
    var d: f32;
    if (b <= 0.25) {
        d = ((16.0 * b - 12.0) * b + 4.0) * b;
    } else {
        d = sqrt(b);
    }
    return b + (2.0 * s - 1.0) * (d - b);
}

fn hard_light_ch(b: f32, s: f32) -> f32 {
    if (s < 0.5) { return 2.0 * s * b; }
    return 1.0 - 2.0 * (1.0 - s) * (1.0 - b);
}

fn divide_ch(b: f32, s: f32) -> f32 {
    if (s > 0.0) { return min(b / s, 1.0); }
    return 1.0;
}

// ---- Luminance helpers (Hue / Saturation / Color / Luminosity) ----

fn lum(c: vec3<f32>) -> f32 {
    return 0.299 * c.r + 0.587 * c.g + 0.114 * c.b;
}

fn sat(c: vec3<f32>) -> f32 {
    return max(max(c.r, c.g), c.b) - min(min(c.r, c.g), c.b);
}

fn clip_color(c: vec3<f32>) -> vec3<f32> {
    let l = lum(c);
    let mn = min(min(c.r, c.g), c.b);
    let mx = max(max(c.r, c.g), c.b);
    var out = c;
    if (mn < 0.0) {
        out = l + (out - l) * l / (l - mn);
    }
    if (mx > 1.0) {
        out = l + (out - l) * (1.0 - l) / (mx - l);
    }
    return out;
}

fn set_lum(c: vec3<f32>, l: f32) -> vec3<f32> {
    return clip_color(c + (l - lum(c)));
}

fn set_sat(c: vec3<f32>, s: f32) -> vec3<f32> {
    let mn = min(min(c.r, c.g), c.b);
    let mx = max(max(c.r, c.g), c.b);
    if (mx > mn) {
        return (c - mn) * s / (mx - mn);
    }
    return vec3<f32>(0.0);
}

fn blend_rgb(b: vec3<f32>, s: vec3<f32>, mode: u32) -> vec3<f32> {
    switch (mode) {
        case 0u: { return s; }                                    // Normal
        case 1u: { return b * s; }                                // Multiply
        case 2u: { return b + s - b * s; }                        // Screen
        case 3u: {                                                // Overlay
            return vec3<f32>(
                overlay_ch(b.r, s.r), overlay_ch(b.g, s.g), overlay_ch(b.b, s.b));
        }
        case 4u: { return min(b, s); }                            // Darken
        case 5u: { return max(b, s); }                            // Lighten
        case 6u: {                                                // Color Dodge
            return vec3<f32>(
                color_dodge_ch(b.r, s.r), color_dodge_ch(b.g, s.g), color_dodge_ch(b.b, s.b));
        }
        case 7u: {                                                // Color Burn
            return vec3<f32>(
                color_burn_ch(b.r, s.r), color_burn_ch(b.g, s.g), color_burn_ch(b.b, s.b));
        }
        case 8u: {                                                // Soft Light
            return vec3<f32>(
                soft_light_ch(b.r, s.r), soft_light_ch(b.g, s.g), soft_light_ch(b.b, s.b));
        }
        case 9u: {                                                // Hard Light
            return vec3<f32>(
                hard_light_ch(b.r, s.r), hard_light_ch(b.g, s.g), hard_light_ch(b.b, s.b));
        }
        case 10u: { return abs(b - s); }                          // Difference
        case 11u: { return b + s - 2.0 * b * s; }                 // Exclusion
        case 12u: { return max(b + s - 1.0, vec3<f32>(0.0)); }    // Linear Burn
        case 13u: { return min(b + s, vec3<f32>(1.0)); }          // Linear Dodge
        case 14u: { return max(b - s, vec3<f32>(0.0)); }          // Subtract
        case 15u: {                                               // Divide
            return vec3<f32>(
                divide_ch(b.r, s.r), divide_ch(b.g, s.g), divide_ch(b.b, s.b));
        }
        case 16u: { return set_lum(set_sat(s, sat(b)), lum(b)); } // Hue
        case 17u: { return set_lum(set_sat(b, sat(s)), lum(b)); } // Saturation
        case 18u: { return set_lum(s, lum(b)); }                  // Color
        case 19u: { return set_lum(b, lum(s)); }                  // Luminosity
        default: { return s; }
    }
}

@fragment
fn fs_blend(in: VsOut) -> @location(0) vec4<f32> {
    // Map this fragment's document position into the layer's rect.
    let doc_px = in.uv * u.doc_size;
    let local = (doc_px - u.layer_rect.xy) / max(u.layer_rect.zw, vec2<f32>(1.0));

    // Samples must stay in uniform control flow; clamp and mask instead of
    // branching.
    let fg = textureSample(fg_tex, fg_samp, clamp(local, vec2<f32>(0.0), vec2<f32>(1.0)));
    let bg = textureSample(bg_tex, bg_samp, in.uv);

    let inside = f32(all(local >= vec2<f32>(0.0)) && all(local < vec2<f32>(1.0)));
    let src_a = fg.a * u.opacity * inside;
    let dst_a = bg.a;

    // Accumulator is premultiplied; blend math runs on straight color.
    var dst = vec3<f32>(0.0);
    if (dst_a > 0.0) {
        dst = bg.rgb / dst_a;
    }

    let blended = blend_rgb(dst, fg.rgb, u.blend_mode);

    // Source-over.  The premultiplied numerator is exactly what we store.
    let out_a = src_a + dst_a * (1.0 - src_a);
    let out_rgb = blended * src_a + dst * dst_a * (1.0 - src_a);
    return vec4<f32>(out_rgb, out_a);
}
"#;

// ============================================================================
// DISPLAY SHADER — blit the composite to screen under the view transform
// ============================================================================
//
// The vertex shader places the document's unit quad with the matrix from
// `ViewTransform::matrix` (pan, zoom, centering); the fragment shader just
// samples.  Output is premultiplied, blended in hardware over the host's
// canvas clear color.
pub const DISPLAY_SHADER: &str = r#"
struct DisplayUniforms {
    view: mat4x4<f32>,
};

@group(0) @binding(0) var<uniform> u: DisplayUniforms;
@group(1) @binding(0) var img_tex: texture_2d<f32>;
@group(1) @binding(1) var img_samp: sampler;

struct VsOut {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_display(@builtin(vertex_index) vi: u32) -> VsOut {
    // Unit quad over the document; +y is down the document, the view matrix
    // flips it into clip space.
    var positions = array<vec2<f32>, 6>(
        vec2<f32>(-1.0, -1.0), vec2<f32>(1.0, -1.0), vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, -1.0), vec2<f32>(1.0, 1.0), vec2<f32>(-1.0, 1.0),
    );
    let p = positions[vi];
    var out: VsOut;
    out.clip_position = u.view * vec4<f32>(p, 0.0, 1.0);
    out.uv = p * 0.5 + 0.5;
    return out;
}

@fragment
fn fs_display(in: VsOut) -> @location(0) vec4<f32> {
    return textureSample(img_tex, img_samp, in.uv);
}
"#;
