// ============================================================================
// COMPOSITOR — blend-mode compositing pipeline + display blit + readback
// ============================================================================
//
// Compositing uses ping-pong rendering between two document-sized textures:
// each visible layer is drawn as a full-target pass whose fragment shader
// samples both the layer (placed at its rect) AND the background accumulator,
// applies the blend-mode math, and writes the result.  Hardware blending is
// DISABLED (the shader owns the math); the accumulator holds premultiplied
// alpha throughout.
//
// The display pipeline blits the finished composite to a caller-supplied
// target under the view transform, with hardware premultiplied blending.
// ============================================================================

use bytemuck::{Pod, Zeroable};

use super::context::GpuContext;
use super::texture::LayerTexture;
use crate::error::GpuError;

// We need the buffer init descriptor helper from wgpu::util.
use wgpu::util::DeviceExt;

// ============================================================================
// UNIFORM TYPES
// ============================================================================

/// Per-layer uniforms for the blend shader: where the layer sits in the
/// document, plus opacity and blend mode.  Field order matches the WGSL
/// struct.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct BlendUniforms {
    /// left, top, width, height of the placed layer in document pixels
    /// (drag offset already applied).
    pub layer_rect: [f32; 4],
    pub doc_size: [f32; 2],
    pub opacity: f32,
    pub blend_mode: u32,
}

/// Uniforms for the display shader: the full view matrix from
/// `ViewTransform::matrix`.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct DisplayUniforms {
    pub view: [[f32; 4]; 4],
}

// ============================================================================
// COMPOSITOR
// ============================================================================

pub struct Compositor {
    // ---- Blend pipeline (custom blend shader, no HW blending) ----
    pub blend_pipeline: wgpu::RenderPipeline,
    /// Bind group layout for blend uniforms (group 0).
    pub blend_uniform_bgl: wgpu::BindGroupLayout,
    /// Bind group layout for a texture+sampler pair (group 1 = fg, group 2 = bg).
    pub tex_sampler_bgl: wgpu::BindGroupLayout,

    // ---- Display pipeline (hardware pan/zoom blit) ----
    pub display_pipeline: wgpu::RenderPipeline,
    pub display_uniform_bgl: wgpu::BindGroupLayout,
    pub display_tex_bgl: wgpu::BindGroupLayout,

    // ---- Samplers ----
    pub sampler_linear: wgpu::Sampler,
    pub sampler_nearest: wgpu::Sampler,

    pub output_format: wgpu::TextureFormat,

    /// Cached per-layer uniform buffers and bind groups, reused across
    /// frames via `queue.write_buffer()`.
    cached_blend_slots: Vec<(wgpu::Buffer, wgpu::BindGroup)>,
    /// Cached display uniform buffer + bind group.
    display_slot: Option<(wgpu::Buffer, wgpu::BindGroup)>,
}

impl Compositor {
    pub fn new(device: &wgpu::Device) -> Self {
        let output_format = wgpu::TextureFormat::Rgba8Unorm;

        // ================================================================
        // BLEND PIPELINE
        // ================================================================
        let blend_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blend_shader"),
            source: wgpu::ShaderSource::Wgsl(super::shaders::BLEND_SHADER.into()),
        });

        // Group 0: BlendUniforms (layer rect, doc size, opacity, blend mode)
        let blend_uniform_bgl =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("blend_uniform_bgl"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });

        // Group 1 & 2: texture + sampler (same layout for both fg and bg)
        let tex_sampler_bgl =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("tex_sampler_bgl"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            });

        let blend_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("blend_pipeline_layout"),
            bind_group_layouts: &[&blend_uniform_bgl, &tex_sampler_bgl, &tex_sampler_bgl],
            push_constant_ranges: &[],
        });

        // NO hardware blending — the fragment shader does all blend math.
        let blend_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("blend_pipeline"),
            layout: Some(&blend_layout),
            vertex: wgpu::VertexState {
                module: &blend_shader,
                entry_point: "vs_blend",
                buffers: &[],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &blend_shader,
                entry_point: "fs_blend",
                targets: &[Some(wgpu::ColorTargetState {
                    format: output_format,
                    blend: None, // DISABLED — shader handles blending
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview: None,
        });

        // ---- Samplers ----
        let sampler_linear = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("sampler_linear"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let sampler_nearest = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("sampler_nearest"),
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        // ================================================================
        // DISPLAY PIPELINE
        // ================================================================
        let display_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("display_shader"),
            source: wgpu::ShaderSource::Wgsl(super::shaders::DISPLAY_SHADER.into()),
        });

        let display_uniform_bgl =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("display_uniform_bgl"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });

        let display_tex_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("display_tex_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let display_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("display_pipeline_layout"),
            bind_group_layouts: &[&display_uniform_bgl, &display_tex_bgl],
            push_constant_ranges: &[],
        });

        let display_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("display_pipeline"),
            layout: Some(&display_layout),
            vertex: wgpu::VertexState {
                module: &display_shader,
                entry_point: "vs_display",
                buffers: &[],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &display_shader,
                entry_point: "fs_display",
                targets: &[Some(wgpu::ColorTargetState {
                    format: output_format,
                    // The compositor writes premultiplied alpha; blend the
                    // blit the same way so edges don't lighten.
                    blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview: None,
        });

        Self {
            blend_pipeline,
            blend_uniform_bgl,
            tex_sampler_bgl,
            display_pipeline,
            display_uniform_bgl,
            display_tex_bgl,
            sampler_linear,
            sampler_nearest,
            output_format,
            cached_blend_slots: Vec::new(),
            display_slot: None,
        }
    }

    /// Nearest-neighbor when zoomed in keeps pixels crisp; linear when
    /// zoomed out avoids shimmer.
    pub fn sampler_for_zoom(&self, zoom: f32) -> &wgpu::Sampler {
        if zoom >= 1.5 {
            &self.sampler_nearest
        } else {
            &self.sampler_linear
        }
    }

    // ========================================================================
    // PING-PONG COMPOSITION
    // ========================================================================

    /// Composite placed layers with full blend-mode support.
    ///
    /// `layers`: `(uniforms, texture)` in back-to-front order; the uniforms
    /// carry each layer's document-space rect, opacity and blend mode.
    ///
    /// Returns which of the two ping-pong textures holds the final result
    /// (0 or 1) so the caller knows which to read back or display.
    pub fn composite_layers_blended(
        &mut self,
        ctx: &GpuContext,
        ping_pong: [&wgpu::TextureView; 2],
        layers: &[(BlendUniforms, &LayerTexture)],
    ) -> usize {
        let device = &ctx.device;
        let queue = &ctx.queue;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("blend_composite_encoder"),
        });

        let sampler = &self.sampler_linear;

        // Clear ping (texture 0) to transparent black.
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear_ping"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: ping_pong[0],
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }

        let mut read_idx: usize = 0; // ping = background (read)
        let mut write_idx: usize = 1; // pong = destination (write)

        for (layer_i, (uniforms, layer_tex)) in layers.iter().enumerate() {
            // ---- Uniforms: reuse cached buffer + bind group ----
            if layer_i >= self.cached_blend_slots.len() {
                let buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("blend_uniform_buf"),
                    contents: bytemuck::bytes_of(uniforms),
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                });
                let bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("blend_uniform_bg"),
                    layout: &self.blend_uniform_bgl,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: buf.as_entire_binding(),
                    }],
                });
                self.cached_blend_slots.push((buf, bg));
            } else {
                queue.write_buffer(
                    &self.cached_blend_slots[layer_i].0,
                    0,
                    bytemuck::bytes_of(uniforms),
                );
            }
            let uniform_bg = &self.cached_blend_slots[layer_i].1;

            // ---- Background bind group (group 2) — read the accumulator ----
            let bg_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("bg_bg"),
                layout: &self.tex_sampler_bgl,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(ping_pong[read_idx]),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                ],
            });

            // ---- Render pass: draw to the other texture ----
            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("blend_layer_pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: ping_pong[write_idx],
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });

                pass.set_pipeline(&self.blend_pipeline);
                pass.set_bind_group(0, uniform_bg, &[]);
                pass.set_bind_group(1, &layer_tex.bind_group, &[]);
                pass.set_bind_group(2, &bg_bg, &[]);
                pass.draw(0..6, 0..1);
            }

            std::mem::swap(&mut read_idx, &mut write_idx);
        }

        queue.submit(std::iter::once(encoder.finish()));

        // `read_idx` now points to the texture with the final result
        // (it was the last write_idx before the swap).
        read_idx
    }

    // ========================================================================
    // DISPLAY BLIT
    // ========================================================================

    /// Blit `composite_view` to `target` under the given view matrix.
    /// `clear` fills the canvas around the document.
    pub fn render_display(
        &mut self,
        ctx: &GpuContext,
        target: &wgpu::TextureView,
        composite_view: &wgpu::TextureView,
        view_matrix: [[f32; 4]; 4],
        zoom: f32,
        clear: wgpu::Color,
    ) {
        let device = &ctx.device;
        let queue = &ctx.queue;
        let uniforms = DisplayUniforms { view: view_matrix };

        if let Some((buf, _)) = &self.display_slot {
            queue.write_buffer(buf, 0, bytemuck::bytes_of(&uniforms));
        } else {
            let buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("display_uniform_buf"),
                contents: bytemuck::bytes_of(&uniforms),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
            let bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("display_uniform_bg"),
                layout: &self.display_uniform_bgl,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buf.as_entire_binding(),
                }],
            });
            self.display_slot = Some((buf, bg));
        }
        let Some((_, uniform_bg)) = self.display_slot.as_ref() else { return };

        let tex_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("display_tex_bg"),
            layout: &self.display_tex_bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(composite_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(self.sampler_for_zoom(zoom)),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("display_encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("display_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(clear),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.display_pipeline);
            pass.set_bind_group(0, uniform_bg, &[]);
            pass.set_bind_group(1, &tex_bg, &[]);
            pass.draw(0..6, 0..1);
        }
        queue.submit(std::iter::once(encoder.finish()));
    }

    // ========================================================================
    // READBACK
    // ========================================================================

    /// Read back a composited texture as packed (premultiplied) RGBA bytes.
    pub fn readback_texture(
        ctx: &GpuContext,
        texture: &wgpu::Texture,
        width: u32,
        height: u32,
        cached_staging: &mut Option<(wgpu::Buffer, u64)>,
    ) -> Result<Vec<u8>, GpuError> {
        let device = &ctx.device;
        let queue = &ctx.queue;

        let bytes_per_row = Self::aligned_bytes_per_row(width);
        let buffer_size = (bytes_per_row * height) as u64;

        // Reuse the cached staging buffer if it is large enough.
        let need_new = !matches!(cached_staging, Some((_, sz)) if *sz >= buffer_size);
        if need_new {
            let new_buf = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("readback_staging"),
                size: buffer_size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            *cached_staging = Some((new_buf, buffer_size));
        }
        let staging = match cached_staging {
            Some((buf, _)) => buf,
            None => return Err(GpuError::Readback("staging buffer missing".into())),
        };

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback_encoder"),
        });

        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );

        queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(wgpu::Maintain::Wait);
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(GpuError::Readback(format!("{:?}", e))),
            Err(e) => return Err(GpuError::Readback(e.to_string())),
        }

        let mapped = slice.get_mapped_range();
        let actual_row = width as usize * 4;

        let mut result = Vec::with_capacity(actual_row * height as usize);
        for y in 0..height as usize {
            let start = y * bytes_per_row as usize;
            result.extend_from_slice(&mapped[start..start + actual_row]);
        }

        drop(mapped);
        staging.unmap();

        Ok(result)
    }

    /// `bytes_per_row` for buffer copies must be 256-aligned.
    pub(crate) fn aligned_bytes_per_row(width: u32) -> u32 {
        let unaligned = width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        unaligned.div_ceil(align) * align
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_per_row_rounds_up_to_256() {
        assert_eq!(Compositor::aligned_bytes_per_row(64), 256);
        assert_eq!(Compositor::aligned_bytes_per_row(65), 512);
        assert_eq!(Compositor::aligned_bytes_per_row(128), 512);
    }

    #[test]
    fn blend_uniforms_layout_is_32_bytes() {
        assert_eq!(std::mem::size_of::<BlendUniforms>(), 32);
        assert_eq!(std::mem::size_of::<DisplayUniforms>(), 64);
    }
}
