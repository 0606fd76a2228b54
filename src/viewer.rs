//! The viewer engine: owns the render state, the decode worker, the GPU
//! renderer (when one exists) and the interaction state machine, and exposes
//! the operations the host shell drives.
//!
//! Threading: all maps here (layer pixels, offsets, textures) are mutated
//! only by the thread that owns the engine.  The decode worker never touches
//! them; it hands finished pixel buffers back through
//! [`ViewerEngine::poll_decodes`].

use std::collections::{HashMap, HashSet};

use egui::Pos2;
use image::RgbaImage;

use crate::composite_cpu::{self, PlacedLayer};
use crate::decode::worker::{ChannelJob, DecodeService};
use crate::document::{Document, LayerPixelData, LayerRenderInfo};
use crate::error::{DecodeError, ViewerError};
use crate::gpu::{GpuRenderer, LayerPlacement};
use crate::interact::{InteractState, Outcome};
use crate::overlay::{OverlayShapes, hit_test_layers};
use crate::source::DocumentSource;
use crate::view::ViewTransform;
use crate::{log_err, log_info, log_warn};

pub struct ViewerEngine {
    doc_width: u32,
    doc_height: u32,
    /// Flattened render infos in tree order (visual top to bottom).
    infos: Vec<LayerRenderInfo>,
    /// Decoded per-layer pixels, keyed by layer index.
    layer_pixels: HashMap<usize, LayerPixelData>,
    /// The file's pre-flattened composite, used for display before layers
    /// decode and as the source for lazy layer extraction.
    composite_image: Option<Vec<u8>>,
    /// Sparse drag offsets; absence means (0, 0).
    offsets: HashMap<usize, (f32, f32)>,
    /// Layers whose decode failed; excluded from compositing.
    failed_layers: HashSet<usize>,

    gpu: Option<GpuRenderer>,
    decode: DecodeService,
    interact: InteractState,
    view: ViewTransform,

    /// Canvas size in logical pixels, and the device pixel ratio for the
    /// backing render target.
    canvas_size: (f32, f32),
    device_pixel_ratio: f32,

    /// Latest CPU composite (fallback path, and the deterministic surface
    /// the tests use).
    cpu_composite: Option<RgbaImage>,
    composite_dirty: bool,
}

impl ViewerEngine {
    /// Create the engine.  GPU init failure is not fatal: the engine runs on
    /// the CPU compositor instead.
    pub fn new() -> Self {
        let gpu = match GpuRenderer::try_new() {
            Ok(r) => Some(r),
            Err(e) => {
                log_warn!("no GPU renderer, using CPU compositor: {}", e);
                None
            }
        };

        Self {
            doc_width: 0,
            doc_height: 0,
            infos: Vec::new(),
            layer_pixels: HashMap::new(),
            composite_image: None,
            offsets: HashMap::new(),
            failed_layers: HashSet::new(),
            gpu,
            decode: DecodeService::new(),
            interact: InteractState::default(),
            view: ViewTransform::default(),
            canvas_size: (0.0, 0.0),
            device_pixel_ratio: 1.0,
            cpu_composite: None,
            composite_dirty: false,
        }
    }

    /// Force the CPU compositing path even when a GPU exists.  Used by the
    /// host's software-rendering toggle and by the end-to-end tests.
    pub fn without_gpu() -> Self {
        let mut engine = Self::new();
        engine.gpu = None;
        engine
    }

    pub fn has_gpu(&self) -> bool {
        self.gpu.is_some()
    }

    // ========================================================================
    // DOCUMENT STATE
    // ========================================================================

    /// Start a new document.  Clears all per-layer state and invalidates any
    /// in-flight decodes.
    pub fn set_document_size(&mut self, width: u32, height: u32) {
        self.doc_width = width;
        self.doc_height = height;
        self.infos.clear();
        self.layer_pixels.clear();
        self.composite_image = None;
        self.offsets.clear();
        self.failed_layers.clear();
        self.interact = InteractState::default();
        self.cpu_composite = None;
        self.composite_dirty = true;
        self.decode.bump_epoch();
        if let Some(gpu) = &mut self.gpu {
            gpu.clear_layers();
        }
        log_info!("document set to {}x{}", width, height);
    }

    pub fn document_size(&self) -> (u32, u32) {
        (self.doc_width, self.doc_height)
    }

    /// Store the file's pre-flattened composite (doc-sized straight RGBA).
    pub fn set_composite_image(&mut self, rgba: Vec<u8>) {
        let expected = self.doc_width as usize * self.doc_height as usize * 4;
        if rgba.len() != expected {
            log_warn!(
                "composite image is {} bytes, expected {}; ignoring",
                rgba.len(),
                expected
            );
            return;
        }
        self.composite_image = Some(rgba);
        self.composite_dirty = true;
    }

    /// Replace the flattened layer list (tree order, top to bottom).
    pub fn set_layer_infos(&mut self, infos: Vec<LayerRenderInfo>) {
        self.infos = infos;
        self.composite_dirty = true;
    }

    pub fn layer_infos(&self) -> &[LayerRenderInfo] {
        &self.infos
    }

    /// Store one layer's decoded pixels and upload them to the GPU if it
    /// exists.  A failed upload flags the layer rather than erroring out.
    pub fn set_layer_image(&mut self, index: usize, pixels: LayerPixelData) {
        let mut upload_failed = false;
        if let Some(gpu) = &mut self.gpu
            && let Err(e) = gpu.upload_layer(index, pixels.width, pixels.height, &pixels.rgba)
        {
            log_err!("layer {} texture upload failed: {}", index, e);
            upload_failed = true;
        }
        if upload_failed {
            self.failed_layers.insert(index);
        } else {
            self.failed_layers.remove(&index);
        }
        self.layer_pixels.insert(index, pixels);
        self.composite_dirty = true;
    }

    pub fn layer_failed(&self, index: usize) -> bool {
        self.failed_layers.contains(&index)
    }

    pub fn set_layer_offset(&mut self, index: usize, dx: f32, dy: f32) {
        if dx == 0.0 && dy == 0.0 {
            self.offsets.remove(&index);
        } else {
            self.offsets.insert(index, (dx, dy));
        }
        self.composite_dirty = true;
    }

    pub fn layer_offset(&self, index: usize) -> (f32, f32) {
        self.offsets.get(&index).copied().unwrap_or((0.0, 0.0))
    }

    // ========================================================================
    // DECODING
    // ========================================================================

    /// Load a parsed document: sets dimensions and layer infos, stores the
    /// file composite if one exists, and queues every pixel-bearing layer for
    /// background decoding.
    pub fn load_document(
        &mut self,
        source: &impl DocumentSource,
    ) -> Result<(), ViewerError> {
        let doc = source.document();
        self.set_document_size(doc.width, doc.height);
        self.set_layer_infos(doc.flatten_render_infos(&HashMap::new()));

        if let Some(composite) = source.composite_rgba() {
            self.set_composite_image(composite);
        }

        let mut leaves = Vec::new();
        doc.root.descendant_layers(&mut leaves);
        for index in leaves {
            if let Err(e) = self.queue_layer_decode(doc, source, index) {
                // One bad layer never fails the document.
                log_err!("layer {} decode submit failed: {}", index, e);
                self.failed_layers.insert(index);
            }
        }
        Ok(())
    }

    fn queue_layer_decode(
        &mut self,
        doc: &Document,
        source: &impl DocumentSource,
        index: usize,
    ) -> Result<(), DecodeError> {
        let Some(info) = self.infos.iter().find(|i| i.index == index) else {
            return Ok(());
        };
        let (w, h) = (info.bounds.width(), info.bounds.height());
        if w == 0 || h == 0 {
            return Ok(());
        }
        let channels = doc.layer_channels(index).unwrap_or(&[]);
        let mut jobs = Vec::with_capacity(channels.len());
        for (pos, ch) in channels.iter().enumerate() {
            let bytes = source.channel_bytes(index, pos)?;
            jobs.push(ChannelJob { id: ch.id, compression_tag: ch.compression, bytes });
        }
        self.decode
            .submit(index, w, h, doc.depth.bits(), doc.large_format, jobs)?;
        Ok(())
    }

    /// Drain finished decodes into the layer-pixel map.  Returns true when
    /// anything changed (the host should recomposite + repaint).
    pub fn poll_decodes(&mut self) -> bool {
        let mut changed = false;
        for done in self.decode.poll() {
            match done.result {
                Ok(rgba) => {
                    let bounds = self
                        .infos
                        .iter()
                        .find(|i| i.index == done.layer_index)
                        .map(|i| i.bounds)
                        .unwrap_or_default();
                    let pixels = LayerPixelData::new(
                        rgba,
                        done.width,
                        done.height,
                        bounds.left,
                        bounds.top,
                    );
                    self.set_layer_image(done.layer_index, pixels);
                    changed = true;
                }
                Err(e) => {
                    let err = ViewerError::LayerDecode(done.layer_index, e);
                    log_err!("{}", err);
                    self.failed_layers.insert(done.layer_index);
                    changed = true;
                }
            }
        }
        changed
    }

    pub fn decodes_pending(&self) -> bool {
        self.decode.has_pending()
    }

    // ========================================================================
    // COMPOSITING
    // ========================================================================

    /// Re-run the compositor over the current layer state.
    pub fn recomposite(&mut self) -> Result<(), ViewerError> {
        if self.doc_width == 0 || self.doc_height == 0 {
            return Ok(());
        }

        // When no layer has decoded yet, display falls back to the file's
        // own composite.
        if self.layer_pixels.is_empty() {
            self.composite_from_file_image()?;
            self.composite_dirty = false;
            return Ok(());
        }

        if self.gpu.is_some() {
            self.recomposite_gpu()?;
        } else {
            self.recomposite_cpu();
        }
        self.composite_dirty = false;
        Ok(())
    }

    fn composite_from_file_image(&mut self) -> Result<(), ViewerError> {
        let Some(rgba) = self.composite_image.clone() else {
            return Ok(());
        };
        match &mut self.gpu {
            Some(gpu) => {
                // Treat the file composite as a single full-document layer.
                let sentinel = usize::MAX;
                gpu.upload_layer(sentinel, self.doc_width, self.doc_height, &rgba)?;
                gpu.composite(
                    self.doc_width,
                    self.doc_height,
                    &[LayerPlacement {
                        index: sentinel,
                        rect: [0.0, 0.0, self.doc_width as f32, self.doc_height as f32],
                        opacity: 1.0,
                        blend_mode: 0,
                    }],
                )?;
            }
            None => {
                let img = RgbaImage::from_raw(self.doc_width, self.doc_height, rgba);
                self.cpu_composite = img;
            }
        }
        Ok(())
    }

    /// Placements for every visible, decoded, non-failed layer, bottom to
    /// top.
    fn placements(&self) -> Vec<(usize, [f32; 4], u8, u32)> {
        self.infos
            .iter()
            .rev()
            .filter(|i| i.effective_visible && !self.failed_layers.contains(&i.index))
            .filter_map(|i| {
                let px = self.layer_pixels.get(&i.index)?;
                let (dx, dy) = self.layer_offset(i.index);
                Some((
                    i.index,
                    [
                        px.left as f32 + dx,
                        px.top as f32 + dy,
                        px.width as f32,
                        px.height as f32,
                    ],
                    i.opacity,
                    i.blend_mode.to_u32(),
                ))
            })
            .collect()
    }

    fn recomposite_gpu(&mut self) -> Result<(), ViewerError> {
        let placements: Vec<LayerPlacement> = self
            .placements()
            .into_iter()
            .map(|(index, rect, opacity, blend_mode)| LayerPlacement {
                index,
                rect,
                opacity: opacity as f32 / 255.0,
                blend_mode,
            })
            .collect();
        if let Some(gpu) = &mut self.gpu {
            gpu.composite(self.doc_width, self.doc_height, &placements)?;
        }
        Ok(())
    }

    fn recomposite_cpu(&mut self) {
        let placed: Vec<PlacedLayer<'_>> = self
            .infos
            .iter()
            .rev()
            .filter(|i| i.effective_visible && !self.failed_layers.contains(&i.index))
            .filter_map(|i| {
                let pixels = self.layer_pixels.get(&i.index)?;
                Some(PlacedLayer {
                    pixels,
                    blend_mode: i.blend_mode,
                    opacity: i.opacity,
                    offset: self.offsets.get(&i.index).copied().unwrap_or((0.0, 0.0)),
                })
            })
            .collect();
        self.cpu_composite = Some(composite_cpu::composite(self.doc_width, self.doc_height, &placed));
    }

    /// The current composite as straight-alpha RGBA, from whichever path
    /// produced it.  Composites first if state is dirty.
    pub fn composite_rgba(&mut self) -> Result<Option<Vec<u8>>, ViewerError> {
        if self.composite_dirty {
            self.recomposite()?;
        }
        if self.layer_pixels.is_empty() && self.composite_image.is_none() {
            return Ok(None);
        }
        if let Some(gpu) = &mut self.gpu {
            return Ok(Some(gpu.read_composite().map_err(ViewerError::Gpu)?));
        }
        Ok(self.cpu_composite.as_ref().map(|img| img.as_raw().clone()))
    }

    /// Blit the composite to a render target under the current view
    /// transform.  GPU path only; the CPU path's host paints
    /// [`composite_rgba`](Self::composite_rgba) itself.
    pub fn render(&mut self, target: &wgpu::TextureView, clear: wgpu::Color) -> Result<(), ViewerError> {
        if self.composite_dirty {
            self.recomposite()?;
        }
        let matrix = self.view.matrix(
            self.canvas_size,
            (self.doc_width as f32, self.doc_height as f32),
        );
        let zoom = self.view.zoom;
        if let Some(gpu) = &mut self.gpu {
            gpu.render_to(target, matrix, zoom, clear);
        }
        Ok(())
    }

    // ========================================================================
    // VIEW & INPUT
    // ========================================================================

    /// Update the canvas size.  `width`/`height` are logical pixels; the
    /// backing target is `logical * device_pixel_ratio`.
    pub fn resize(&mut self, width: f32, height: f32, device_pixel_ratio: f32) {
        self.canvas_size = (width, height);
        self.device_pixel_ratio = device_pixel_ratio.max(0.5);
    }

    /// Backing render-target size in device pixels.
    pub fn backing_size(&self) -> (u32, u32) {
        (
            (self.canvas_size.0 * self.device_pixel_ratio).round() as u32,
            (self.canvas_size.1 * self.device_pixel_ratio).round() as u32,
        )
    }

    pub fn view_transform(&self) -> ViewTransform {
        self.view
    }

    pub fn set_view_transform(&mut self, view: ViewTransform) {
        self.view = view;
        self.view.set_zoom(view.zoom);
    }

    pub fn fit_to_view(&mut self) {
        self.view.fit_to_view(
            self.doc_width as f32,
            self.doc_height as f32,
            self.canvas_size.0,
            self.canvas_size.1,
        );
    }

    pub fn zoom_at_point(&mut self, new_zoom: f32, cursor: Pos2) {
        self.view.zoom_at_point(new_zoom, cursor, self.canvas_size);
    }

    pub fn screen_to_document(&self, screen: Pos2) -> Pos2 {
        self.view.screen_to_document(
            screen,
            self.canvas_size,
            (self.doc_width as f32, self.doc_height as f32),
        )
    }

    pub fn hit_test(&self, screen: Pos2) -> Option<usize> {
        hit_test_layers(&self.infos, &self.offsets, self.screen_to_document(screen))
    }

    pub fn selected_layer(&self) -> Option<usize> {
        self.interact.selected
    }

    pub fn overlay_shapes(&self) -> OverlayShapes {
        OverlayShapes::build(
            &self.infos,
            &self.offsets,
            self.interact.selected,
            self.interact.hovered,
            &self.view,
            self.canvas_size,
            (self.doc_width as f32, self.doc_height as f32),
        )
    }

    pub fn pointer_down(
        &mut self,
        pos: Pos2,
        button: egui::PointerButton,
        pan_modifier: bool,
    ) -> Outcome {
        let outcome = self.interact.pointer_down(
            pos,
            button,
            pan_modifier,
            &self.infos,
            &self.offsets,
            &self.view,
            self.canvas_size,
            (self.doc_width as f32, self.doc_height as f32),
        );
        if let Some(index) = outcome.ensure_layer_texture {
            self.ensure_layer_resident(index);
        }
        outcome
    }

    pub fn pointer_move(&mut self, pos: Pos2) -> Outcome {
        let outcome = self.interact.pointer_move(
            pos,
            &self.infos,
            &mut self.offsets,
            &mut self.view,
            self.canvas_size,
            (self.doc_width as f32, self.doc_height as f32),
        );
        if outcome.recomposite {
            self.composite_dirty = true;
        }
        outcome
    }

    pub fn pointer_up(&mut self) -> Outcome {
        self.interact.pointer_up()
    }

    pub fn escape(&mut self) -> Outcome {
        self.interact.escape()
    }

    /// Make a layer's pixels resident before a drag starts.  When the layer
    /// never decoded individually, its rectangle is cut out of the file
    /// composite so the drag has something to move.
    fn ensure_layer_resident(&mut self, index: usize) {
        if self.layer_pixels.contains_key(&index) || self.failed_layers.contains(&index) {
            return;
        }
        let Some(info) = self.infos.iter().find(|i| i.index == index) else {
            return;
        };
        let Some(composite) = &self.composite_image else {
            return;
        };
        let b = info.bounds;
        let x0 = b.left.max(0) as u32;
        let y0 = b.top.max(0) as u32;
        let x1 = (b.right.max(0) as u32).min(self.doc_width);
        let y1 = (b.bottom.max(0) as u32).min(self.doc_height);
        if x1 <= x0 || y1 <= y0 {
            return;
        }
        let (w, h) = (x1 - x0, y1 - y0);
        let mut rgba = Vec::with_capacity((w * h * 4) as usize);
        for y in y0..y1 {
            let row = ((y * self.doc_width + x0) * 4) as usize;
            rgba.extend_from_slice(&composite[row..row + (w * 4) as usize]);
        }
        log_info!("extracted layer {} ({}x{}) from file composite", index, w, h);
        self.set_layer_image(index, LayerPixelData::new(rgba, w, h, x0 as i32, y0 as i32));
    }

    // ========================================================================
    // TEARDOWN
    // ========================================================================

    /// Explicitly release the GPU renderer and stop the decode worker.  The
    /// engine is still safe to use afterwards (CPU path, no decodes).
    pub fn destroy(&mut self) {
        self.gpu = None;
        self.decode = DecodeService::new();
        self.decode.bump_epoch();
        self.layer_pixels.clear();
        self.composite_image = None;
        self.cpu_composite = None;
        log_info!("engine destroyed");
    }
}

impl Default for ViewerEngine {
    fn default() -> Self {
        Self::new()
    }
}
