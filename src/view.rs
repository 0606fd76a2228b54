//! Pan/zoom view transform between document pixels and screen pixels.
//!
//! Convention: the document is drawn centered in the canvas, scaled by
//! `zoom`, then shifted by `(pan_x, pan_y)` screen pixels.  So
//! `screen = (doc - doc_center) * zoom + canvas_center + pan`, and
//! `screen_to_document` is the exact inverse.

use egui::{Pos2, Vec2, pos2};

pub const MIN_ZOOM: f32 = 0.01;
pub const MAX_ZOOM: f32 = 100.0;

/// Margin applied by [`ViewTransform::fit_to_view`] so the document doesn't
/// touch the canvas edges.
const FIT_MARGIN: f32 = 0.9;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewTransform {
    pub pan_x: f32,
    pub pan_y: f32,
    pub zoom: f32,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self { pan_x: 0.0, pan_y: 0.0, zoom: 1.0 }
    }
}

impl ViewTransform {
    pub fn pan(&self) -> Vec2 {
        Vec2::new(self.pan_x, self.pan_y)
    }

    /// Set zoom, clamped into the supported range.
    pub fn set_zoom(&mut self, zoom: f32) {
        self.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
    }

    /// Map a document point to screen pixels.
    pub fn document_to_screen(
        &self,
        doc: Pos2,
        canvas_size: (f32, f32),
        doc_size: (f32, f32),
    ) -> Pos2 {
        pos2(
            (doc.x - doc_size.0 / 2.0) * self.zoom + canvas_size.0 / 2.0 + self.pan_x,
            (doc.y - doc_size.1 / 2.0) * self.zoom + canvas_size.1 / 2.0 + self.pan_y,
        )
    }

    /// Map a screen point back to document pixels.
    pub fn screen_to_document(
        &self,
        screen: Pos2,
        canvas_size: (f32, f32),
        doc_size: (f32, f32),
    ) -> Pos2 {
        pos2(
            (screen.x - canvas_size.0 / 2.0 - self.pan_x) / self.zoom + doc_size.0 / 2.0,
            (screen.y - canvas_size.1 / 2.0 - self.pan_y) / self.zoom + doc_size.1 / 2.0,
        )
    }

    /// Column-major 4x4 matrix taking the document's unit quad (corners at
    /// ±1, +v pointing down the document) to clip space under this
    /// transform.  Fed straight into the display shader's uniform.
    pub fn matrix(&self, canvas_size: (f32, f32), doc_size: (f32, f32)) -> [[f32; 4]; 4] {
        if canvas_size.0 <= 0.0 || canvas_size.1 <= 0.0 {
            return IDENTITY;
        }
        let sx = self.zoom * doc_size.0 / canvas_size.0;
        let sy = self.zoom * doc_size.1 / canvas_size.1;
        let tx = 2.0 * self.pan_x / canvas_size.0;
        let ty = -2.0 * self.pan_y / canvas_size.1;
        [
            [sx, 0.0, 0.0, 0.0],
            [0.0, -sy, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [tx, ty, 0.0, 1.0],
        ]
    }

    /// Center the document in the canvas at the largest zoom that leaves a
    /// 10% margin.  A zero-sized document or canvas leaves the transform
    /// untouched.
    pub fn fit_to_view(&mut self, doc_w: f32, doc_h: f32, canvas_w: f32, canvas_h: f32) {
        if doc_w <= 0.0 || doc_h <= 0.0 || canvas_w <= 0.0 || canvas_h <= 0.0 {
            return;
        }
        let zoom = (canvas_w / doc_w).min(canvas_h / doc_h) * FIT_MARGIN;
        self.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        self.pan_x = 0.0;
        self.pan_y = 0.0;
    }

    /// Change zoom while keeping the document point under `cursor` (screen
    /// pixels, canvas-relative) stationary on screen.
    pub fn zoom_at_point(&mut self, new_zoom: f32, cursor: Pos2, canvas_size: (f32, f32)) {
        let new_zoom = new_zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        let cx = cursor.x - canvas_size.0 / 2.0;
        let cy = cursor.y - canvas_size.1 / 2.0;
        let ratio = new_zoom / self.zoom;
        self.pan_x = cx * (1.0 - ratio) + self.pan_x * ratio;
        self.pan_y = cy * (1.0 - ratio) + self.pan_y * ratio;
        self.zoom = new_zoom;
    }
}

const IDENTITY: [[f32; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];
