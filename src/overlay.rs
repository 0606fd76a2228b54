//! Hit testing and selection overlay geometry.
//!
//! The engine computes shapes in screen space; the host paints them with
//! whatever primitives it has.  Handle size is constant in device pixels so
//! handles don't balloon when zoomed in.

use egui::{Pos2, Rect, pos2, vec2};
use std::collections::HashMap;

use crate::document::LayerRenderInfo;
use crate::view::ViewTransform;

/// Selection handle edge length in device pixels.
pub const HANDLE_SIZE: f32 = 8.0;

/// Find the topmost visible layer whose offset-adjusted bounds contain the
/// document-space point.  `infos` is in tree order (visual top to bottom),
/// so the first hit wins.
pub fn hit_test_layers(
    infos: &[LayerRenderInfo],
    offsets: &HashMap<usize, (f32, f32)>,
    doc_point: Pos2,
) -> Option<usize> {
    for info in infos {
        if !info.effective_visible || info.bounds.is_empty() {
            continue;
        }
        let (dx, dy) = offsets.get(&info.index).copied().unwrap_or((0.0, 0.0));
        if info.bounds.contains_shifted(doc_point.x, doc_point.y, dx, dy) {
            return Some(info.index);
        }
    }
    None
}

/// Screen-space geometry for one layer's outline and resize handles.
#[derive(Clone, Debug, Default)]
pub struct OverlayShapes {
    /// Outline of the selected layer, if any.
    pub selection: Option<Rect>,
    /// Eight handle rects: corners then edge midpoints.
    pub handles: Vec<Rect>,
    /// Fainter outline for the hovered (not selected) layer.
    pub hover: Option<Rect>,
}

impl OverlayShapes {
    /// Build overlay geometry for the current selection/hover state.
    pub fn build(
        infos: &[LayerRenderInfo],
        offsets: &HashMap<usize, (f32, f32)>,
        selected: Option<usize>,
        hovered: Option<usize>,
        view: &ViewTransform,
        canvas_size: (f32, f32),
        doc_size: (f32, f32),
    ) -> Self {
        let mut shapes = OverlayShapes::default();

        if let Some(idx) = selected
            && let Some(rect) = layer_screen_rect(infos, offsets, idx, view, canvas_size, doc_size)
        {
            shapes.handles = handle_rects(rect);
            shapes.selection = Some(rect);
        }

        // Hovering the selected layer adds nothing.
        if let Some(idx) = hovered
            && Some(idx) != selected
            && let Some(rect) = layer_screen_rect(infos, offsets, idx, view, canvas_size, doc_size)
        {
            shapes.hover = Some(rect);
        }

        shapes
    }
}

fn layer_screen_rect(
    infos: &[LayerRenderInfo],
    offsets: &HashMap<usize, (f32, f32)>,
    index: usize,
    view: &ViewTransform,
    canvas_size: (f32, f32),
    doc_size: (f32, f32),
) -> Option<Rect> {
    let info = infos.iter().find(|i| i.index == index)?;
    if info.bounds.is_empty() {
        return None;
    }
    let (dx, dy) = offsets.get(&index).copied().unwrap_or((0.0, 0.0));
    let tl = view.document_to_screen(
        pos2(info.bounds.left as f32 + dx, info.bounds.top as f32 + dy),
        canvas_size,
        doc_size,
    );
    let br = view.document_to_screen(
        pos2(info.bounds.right as f32 + dx, info.bounds.bottom as f32 + dy),
        canvas_size,
        doc_size,
    );
    Some(Rect::from_min_max(tl, br))
}

/// Corner and edge-midpoint handles, each `HANDLE_SIZE` device pixels square.
fn handle_rects(outline: Rect) -> Vec<Rect> {
    let cx = outline.center().x;
    let cy = outline.center().y;
    let centers = [
        pos2(outline.left(), outline.top()),
        pos2(outline.right(), outline.top()),
        pos2(outline.left(), outline.bottom()),
        pos2(outline.right(), outline.bottom()),
        pos2(cx, outline.top()),
        pos2(cx, outline.bottom()),
        pos2(outline.left(), cy),
        pos2(outline.right(), cy),
    ];
    centers
        .iter()
        .map(|c| Rect::from_center_size(*c, vec2(HANDLE_SIZE, HANDLE_SIZE)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blend::BlendMode;
    use crate::document::BoundRect;

    fn info(index: usize, bounds: BoundRect, visible: bool) -> LayerRenderInfo {
        LayerRenderInfo {
            index,
            name: format!("layer {}", index),
            blend_mode: BlendMode::Normal,
            opacity: 255,
            effective_visible: visible,
            bounds,
        }
    }

    #[test]
    fn topmost_layer_wins() {
        let infos = vec![
            info(0, BoundRect::new(0, 0, 50, 50), true),
            info(1, BoundRect::new(0, 0, 50, 50), true),
        ];
        let hit = hit_test_layers(&infos, &HashMap::new(), pos2(10.0, 10.0));
        assert_eq!(hit, Some(0));
    }

    #[test]
    fn invisible_layers_are_transparent_to_hits() {
        let infos = vec![
            info(0, BoundRect::new(0, 0, 50, 50), false),
            info(1, BoundRect::new(0, 0, 50, 50), true),
        ];
        let hit = hit_test_layers(&infos, &HashMap::new(), pos2(10.0, 10.0));
        assert_eq!(hit, Some(1));
    }

    #[test]
    fn offset_moves_the_hit_region() {
        let infos = vec![info(0, BoundRect::new(0, 0, 10, 10), true)];
        let mut offsets = HashMap::new();
        offsets.insert(0usize, (100.0, 0.0));
        assert_eq!(hit_test_layers(&infos, &offsets, pos2(5.0, 5.0)), None);
        assert_eq!(hit_test_layers(&infos, &offsets, pos2(105.0, 5.0)), Some(0));
    }

    #[test]
    fn miss_returns_none() {
        let infos = vec![info(0, BoundRect::new(0, 0, 10, 10), true)];
        assert_eq!(hit_test_layers(&infos, &HashMap::new(), pos2(99.0, 99.0)), None);
    }

    #[test]
    fn selection_produces_eight_constant_size_handles() {
        let infos = vec![info(0, BoundRect::new(0, 0, 100, 100), true)];
        let view = ViewTransform { pan_x: 0.0, pan_y: 0.0, zoom: 4.0 };
        let shapes = OverlayShapes::build(
            &infos,
            &HashMap::new(),
            Some(0),
            None,
            &view,
            (800.0, 600.0),
            (100.0, 100.0),
        );
        assert!(shapes.selection.is_some());
        assert_eq!(shapes.handles.len(), 8);
        for h in &shapes.handles {
            assert!((h.width() - HANDLE_SIZE).abs() < 1e-6);
            assert!((h.height() - HANDLE_SIZE).abs() < 1e-6);
        }
    }

    #[test]
    fn hover_of_selected_layer_is_suppressed() {
        let infos = vec![info(0, BoundRect::new(0, 0, 10, 10), true)];
        let view = ViewTransform::default();
        let shapes = OverlayShapes::build(
            &infos,
            &HashMap::new(),
            Some(0),
            Some(0),
            &view,
            (100.0, 100.0),
            (10.0, 10.0),
        );
        assert!(shapes.hover.is_none());
        assert!(shapes.selection.is_some());
    }
}
