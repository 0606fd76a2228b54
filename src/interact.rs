//! Pointer interaction: a flat drag state machine over the view transform,
//! the selection and the per-layer drag offsets.
//!
//! The engine owns one `InteractState`; the host feeds it pointer events and
//! acts on the returned [`Outcome`] (recomposite, make a texture resident,
//! repaint).  Exactly one gesture runs at a time; a second pointer-down
//! during a gesture is ignored.

use egui::{Pos2, PointerButton};
use std::collections::HashMap;

use crate::document::LayerRenderInfo;
use crate::overlay::hit_test_layers;
use crate::view::ViewTransform;

/// The active gesture.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DragState {
    None,
    /// Panning the view; anchor is the last pointer position in screen px.
    Pan { last_screen: Pos2 },
    /// Dragging a layer; anchors are the grab point in document px and the
    /// layer's offset at gesture start.
    MoveLayer {
        layer: usize,
        start_doc: Pos2,
        start_offset: (f32, f32),
    },
}

/// Selection and gesture state, owned by the engine.
#[derive(Clone, Debug)]
pub struct InteractState {
    pub drag: DragState,
    pub selected: Option<usize>,
    pub hovered: Option<usize>,
}

impl Default for InteractState {
    fn default() -> Self {
        Self { drag: DragState::None, selected: None, hovered: None }
    }
}

/// What the host must do after an event.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Outcome {
    /// Layer offsets changed; the composite is stale.
    pub recomposite: bool,
    /// This layer is about to be dragged; its texture must be resident.
    pub ensure_layer_texture: Option<usize>,
    /// View or overlay state changed; repaint.
    pub repaint: bool,
}

impl InteractState {
    /// Route a pointer-down.  `pan_modifier` is the host's pan chord (space
    /// held, typically); middle-click always pans.
    #[allow(clippy::too_many_arguments)]
    pub fn pointer_down(
        &mut self,
        pos: Pos2,
        button: PointerButton,
        pan_modifier: bool,
        infos: &[LayerRenderInfo],
        offsets: &HashMap<usize, (f32, f32)>,
        view: &ViewTransform,
        canvas_size: (f32, f32),
        doc_size: (f32, f32),
    ) -> Outcome {
        let mut outcome = Outcome::default();

        // One gesture at a time.
        if self.drag != DragState::None {
            return outcome;
        }

        if button == PointerButton::Middle || pan_modifier {
            self.drag = DragState::Pan { last_screen: pos };
            return outcome;
        }
        if button != PointerButton::Primary {
            return outcome;
        }

        let doc_point = view.screen_to_document(pos, canvas_size, doc_size);
        match hit_test_layers(infos, offsets, doc_point) {
            Some(layer) => {
                self.selected = Some(layer);
                outcome.ensure_layer_texture = Some(layer);
                outcome.repaint = true;
                let start_offset = offsets.get(&layer).copied().unwrap_or((0.0, 0.0));
                self.drag = DragState::MoveLayer { layer, start_doc: doc_point, start_offset };
            }
            None => {
                // Empty space: drop the selection and fall back to panning.
                outcome.repaint = self.selected.take().is_some();
                self.drag = DragState::Pan { last_screen: pos };
            }
        }
        outcome
    }

    /// Route a pointer-move for whatever gesture is active; updates hover
    /// when idle.
    #[allow(clippy::too_many_arguments)]
    pub fn pointer_move(
        &mut self,
        pos: Pos2,
        infos: &[LayerRenderInfo],
        offsets: &mut HashMap<usize, (f32, f32)>,
        view: &mut ViewTransform,
        canvas_size: (f32, f32),
        doc_size: (f32, f32),
    ) -> Outcome {
        let mut outcome = Outcome::default();
        match self.drag {
            DragState::Pan { last_screen } => {
                view.pan_x += pos.x - last_screen.x;
                view.pan_y += pos.y - last_screen.y;
                self.drag = DragState::Pan { last_screen: pos };
                outcome.repaint = true;
            }
            DragState::MoveLayer { layer, start_doc, start_offset } => {
                let doc_point = view.screen_to_document(pos, canvas_size, doc_size);
                let new_offset = (
                    start_offset.0 + doc_point.x - start_doc.x,
                    start_offset.1 + doc_point.y - start_doc.y,
                );
                offsets.insert(layer, new_offset);
                outcome.recomposite = true;
                outcome.repaint = true;
            }
            DragState::None => {
                let doc_point = view.screen_to_document(pos, canvas_size, doc_size);
                let hovered = hit_test_layers(infos, offsets, doc_point);
                if hovered != self.hovered {
                    self.hovered = hovered;
                    outcome.repaint = true;
                }
            }
        }
        outcome
    }

    /// End the active gesture.  Drag results (offsets, pan) stay as-is.
    pub fn pointer_up(&mut self) -> Outcome {
        let was_active = self.drag != DragState::None;
        self.drag = DragState::None;
        Outcome { repaint: was_active, ..Default::default() }
    }

    /// Escape clears the selection but does not undo an in-progress drag's
    /// effect on the layer offset.
    pub fn escape(&mut self) -> Outcome {
        let had = self.selected.take().is_some();
        self.drag = DragState::None;
        Outcome { repaint: had, ..Default::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blend::BlendMode;
    use crate::document::BoundRect;
    use egui::pos2;

    const CANVAS: (f32, f32) = (100.0, 100.0);
    const DOC: (f32, f32) = (100.0, 100.0);

    fn infos() -> Vec<LayerRenderInfo> {
        vec![LayerRenderInfo {
            index: 0,
            name: "layer".into(),
            blend_mode: BlendMode::Normal,
            opacity: 255,
            effective_visible: true,
            bounds: BoundRect::new(0, 0, 50, 50),
        }]
    }

    #[test]
    fn primary_on_layer_selects_and_starts_move() {
        let mut state = InteractState::default();
        let offsets = HashMap::new();
        let view = ViewTransform::default();
        let outcome = state.pointer_down(
            pos2(10.0, 10.0),
            PointerButton::Primary,
            false,
            &infos(),
            &offsets,
            &view,
            CANVAS,
            DOC,
        );
        assert_eq!(state.selected, Some(0));
        assert_eq!(outcome.ensure_layer_texture, Some(0));
        assert!(matches!(state.drag, DragState::MoveLayer { layer: 0, .. }));
    }

    #[test]
    fn primary_on_empty_space_deselects_and_pans() {
        let mut state = InteractState { selected: Some(0), ..Default::default() };
        let offsets = HashMap::new();
        let view = ViewTransform::default();
        state.pointer_down(
            pos2(90.0, 90.0),
            PointerButton::Primary,
            false,
            &infos(),
            &offsets,
            &view,
            CANVAS,
            DOC,
        );
        assert_eq!(state.selected, None);
        assert!(matches!(state.drag, DragState::Pan { .. }));
    }

    #[test]
    fn move_drag_writes_offset_and_requests_recomposite() {
        let mut state = InteractState::default();
        let mut offsets = HashMap::new();
        let mut view = ViewTransform::default();
        state.pointer_down(
            pos2(10.0, 10.0),
            PointerButton::Primary,
            false,
            &infos(),
            &offsets,
            &view,
            CANVAS,
            DOC,
        );
        let outcome =
            state.pointer_move(pos2(17.0, 13.0), &infos(), &mut offsets, &mut view, CANVAS, DOC);
        assert!(outcome.recomposite);
        let (dx, dy) = offsets[&0];
        assert!((dx - 7.0).abs() < 1e-4);
        assert!((dy - 3.0).abs() < 1e-4);
    }

    #[test]
    fn pan_drag_moves_view_in_screen_pixels() {
        let mut state = InteractState::default();
        let mut offsets = HashMap::new();
        let mut view = ViewTransform { pan_x: 0.0, pan_y: 0.0, zoom: 2.0 };
        state.pointer_down(
            pos2(50.0, 50.0),
            PointerButton::Middle,
            false,
            &infos(),
            &offsets,
            &view,
            CANVAS,
            DOC,
        );
        state.pointer_move(pos2(60.0, 45.0), &infos(), &mut offsets, &mut view, CANVAS, DOC);
        assert_eq!((view.pan_x, view.pan_y), (10.0, -5.0));
    }

    #[test]
    fn second_pointer_down_is_ignored_during_gesture() {
        let mut state = InteractState::default();
        let offsets = HashMap::new();
        let view = ViewTransform::default();
        state.pointer_down(
            pos2(10.0, 10.0),
            PointerButton::Primary,
            false,
            &infos(),
            &offsets,
            &view,
            CANVAS,
            DOC,
        );
        let drag_before = state.drag;
        let outcome = state.pointer_down(
            pos2(90.0, 90.0),
            PointerButton::Middle,
            false,
            &infos(),
            &offsets,
            &view,
            CANVAS,
            DOC,
        );
        assert_eq!(state.drag, drag_before);
        assert_eq!(outcome, Outcome::default());
    }

    #[test]
    fn escape_deselects_but_keeps_drag_offset() {
        let mut state = InteractState::default();
        let mut offsets = HashMap::new();
        let mut view = ViewTransform::default();
        state.pointer_down(
            pos2(10.0, 10.0),
            PointerButton::Primary,
            false,
            &infos(),
            &offsets,
            &view,
            CANVAS,
            DOC,
        );
        state.pointer_move(pos2(20.0, 10.0), &infos(), &mut offsets, &mut view, CANVAS, DOC);
        state.escape();
        assert_eq!(state.selected, None);
        assert_eq!(state.drag, DragState::None);
        assert!((offsets[&0].0 - 10.0).abs() < 1e-4);
    }

    #[test]
    fn hover_updates_only_when_idle() {
        let mut state = InteractState::default();
        let mut offsets = HashMap::new();
        let mut view = ViewTransform::default();
        let outcome =
            state.pointer_move(pos2(10.0, 10.0), &infos(), &mut offsets, &mut view, CANVAS, DOC);
        assert_eq!(state.hovered, Some(0));
        assert!(outcome.repaint);
        let outcome =
            state.pointer_move(pos2(12.0, 10.0), &infos(), &mut offsets, &mut view, CANVAS, DOC);
        assert!(!outcome.repaint);
    }
}
