// ============================================================================
// GPU RENDERER — top-level coordinator for GPU-accelerated compositing
// ============================================================================

use std::collections::HashMap;

use super::compositor::{BlendUniforms, Compositor};
use super::context::GpuContext;
use super::texture::LayerTexture;
use crate::error::GpuError;
use crate::log_info;

/// One layer's compositing parameters for a frame: where it sits in the
/// document (drag offset already applied), how transparent it is and how it
/// blends.  Back-to-front order.
#[derive(Clone, Copy, Debug)]
pub struct LayerPlacement {
    pub index: usize,
    /// left, top, width, height in document pixels.
    pub rect: [f32; 4],
    /// 0.0..=1.0
    pub opacity: f32,
    /// `BlendMode::to_u32`
    pub blend_mode: u32,
}

/// The top-level GPU renderer: owns the device context, per-layer textures
/// and the ping-pong composite pair.  All GPU handles are released when this
/// value drops.
pub struct GpuRenderer {
    pub ctx: GpuContext,
    compositor: Compositor,
    layer_textures: HashMap<usize, LayerTexture>,
    /// Ping-pong pair for the blend compositor, recreated on document-size
    /// change.
    ping_pong: [Option<wgpu::Texture>; 2],
    pp_width: u32,
    pp_height: u32,
    /// Which ping-pong texture holds the latest composite, if any.
    composite_idx: Option<usize>,
    /// Cached staging buffer for readback.
    cached_staging: Option<(wgpu::Buffer, u64)>,
}

impl GpuRenderer {
    /// Create a GPU renderer.  Tries hardware first, then software fallback;
    /// errors only when neither adapter exists (the engine then runs on the
    /// CPU compositor).
    pub fn try_new() -> Result<Self, GpuError> {
        let ctx = GpuContext::try_new()?;
        let compositor = Compositor::new(&ctx.device);
        log_info!("GPU renderer up on adapter '{}'", ctx.adapter_name);

        Ok(Self {
            ctx,
            compositor,
            layer_textures: HashMap::new(),
            ping_pong: [None, None],
            pp_width: 0,
            pp_height: 0,
            composite_idx: None,
            cached_staging: None,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.ctx.adapter_name
    }

    // ========================================================================
    // LAYER TEXTURES
    // ========================================================================

    /// Upload a layer's decoded RGBA pixels, creating or reusing its texture.
    pub fn upload_layer(
        &mut self,
        index: usize,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> Result<(), GpuError> {
        if !self.ctx.supports_size(width, height) {
            return Err(GpuError::TextureTooLarge {
                width,
                height,
                max: self.ctx.max_texture_dim,
            });
        }

        // Same-size texture can take a plain re-upload.
        if let Some(existing) = self.layer_textures.get(&index)
            && existing.width == width
            && existing.height == height
        {
            existing.upload_full(&self.ctx.queue, data);
            self.composite_idx = None;
            return Ok(());
        }

        let texture = LayerTexture::new(
            &self.ctx.device,
            &self.ctx.queue,
            &self.compositor.tex_sampler_bgl,
            &self.compositor.sampler_linear,
            width,
            height,
            data,
        );
        self.layer_textures.insert(index, texture);
        self.composite_idx = None;
        Ok(())
    }

    pub fn has_layer(&self, index: usize) -> bool {
        self.layer_textures.contains_key(&index)
    }

    pub fn remove_layer(&mut self, index: usize) {
        self.layer_textures.remove(&index);
        self.composite_idx = None;
    }

    pub fn clear_layers(&mut self) {
        self.layer_textures.clear();
        self.composite_idx = None;
    }

    pub fn layer_texture_count(&self) -> usize {
        self.layer_textures.len()
    }

    // ========================================================================
    // COMPOSITION
    // ========================================================================

    fn ensure_ping_pong(&mut self, w: u32, h: u32) -> Result<(), GpuError> {
        if self.pp_width == w && self.pp_height == h && self.ping_pong[0].is_some() {
            return Ok(());
        }
        if !self.ctx.supports_size(w, h) {
            return Err(GpuError::TextureTooLarge { width: w, height: h, max: self.ctx.max_texture_dim });
        }
        let usage = wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC;
        for i in 0..2 {
            self.ping_pong[i] = Some(self.ctx.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(if i == 0 { "ping" } else { "pong" }),
                size: wgpu::Extent3d { width: w, height: h, depth_or_array_layers: 1 },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: self.compositor.output_format,
                usage,
                view_formats: &[],
            }));
        }
        self.pp_width = w;
        self.pp_height = h;
        self.composite_idx = None;
        Ok(())
    }

    /// Composite placed layers into the document-sized target.  The result
    /// stays on the GPU; follow with [`render_to`](Self::render_to) or
    /// [`read_composite`](Self::read_composite).
    ///
    /// Layers without a resident texture are skipped (still decoding, or
    /// failed).
    pub fn composite(
        &mut self,
        doc_width: u32,
        doc_height: u32,
        placements: &[LayerPlacement],
    ) -> Result<(), GpuError> {
        self.ensure_ping_pong(doc_width, doc_height)?;

        let pp0 = self.ping_pong[0].as_ref().ok_or(GpuError::Readback("ping missing".into()))?;
        let pp1 = self.ping_pong[1].as_ref().ok_or(GpuError::Readback("pong missing".into()))?;
        let view0 = pp0.create_view(&wgpu::TextureViewDescriptor::default());
        let view1 = pp1.create_view(&wgpu::TextureViewDescriptor::default());

        let doc_size = [doc_width as f32, doc_height as f32];
        let mut layers: Vec<(BlendUniforms, &LayerTexture)> = Vec::new();
        for p in placements {
            if let Some(tex) = self.layer_textures.get(&p.index) {
                layers.push((
                    BlendUniforms {
                        layer_rect: p.rect,
                        doc_size,
                        opacity: p.opacity,
                        blend_mode: p.blend_mode,
                    },
                    tex,
                ));
            }
        }

        let result_idx =
            self.compositor
                .composite_layers_blended(&self.ctx, [&view0, &view1], &layers);
        self.composite_idx = Some(result_idx);
        Ok(())
    }

    /// Blit the latest composite to a caller-supplied render target under the
    /// view matrix.  No-op when nothing has been composited yet.
    pub fn render_to(
        &mut self,
        target: &wgpu::TextureView,
        view_matrix: [[f32; 4]; 4],
        zoom: f32,
        clear: wgpu::Color,
    ) {
        let Some(idx) = self.composite_idx else { return };
        let Some(tex) = self.ping_pong[idx].as_ref() else { return };
        let composite_view = tex.create_view(&wgpu::TextureViewDescriptor::default());
        self.compositor
            .render_display(&self.ctx, target, &composite_view, view_matrix, zoom, clear);
    }

    /// Read the latest composite back as straight-alpha RGBA.
    pub fn read_composite(&mut self) -> Result<Vec<u8>, GpuError> {
        let idx = self
            .composite_idx
            .ok_or(GpuError::Readback("nothing composited".into()))?;
        let tex = self.ping_pong[idx]
            .as_ref()
            .ok_or(GpuError::Readback("composite texture missing".into()))?;
        let mut pixels = Compositor::readback_texture(
            &self.ctx,
            tex,
            self.pp_width,
            self.pp_height,
            &mut self.cached_staging,
        )?;
        unpremultiply(&mut pixels);
        Ok(pixels)
    }
}

impl Drop for GpuRenderer {
    fn drop(&mut self) {
        self.layer_textures.clear();
        self.ping_pong = [None, None];
        self.cached_staging = None;
    }
}

/// The compositor accumulates premultiplied alpha; exports and the CPU path
/// use straight alpha.
fn unpremultiply(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u32;
        if a > 0 && a < 255 {
            for c in &mut px[..3] {
                *c = ((*c as u32 * 255 + a / 2) / a).min(255) as u8;
            }
        }
    }
}
