//! Document model: the parsed layer tree and its flattened render view.
//!
//! The tree is produced once per loaded file by the external parser and never
//! partially mutated — a new load replaces the whole `Document`.  Rendering
//! never walks the tree directly; it consumes the flat `LayerRenderInfo` list
//! produced by [`Document::flatten_render_infos`], which bakes group
//! visibility down into each leaf.

use crate::blend::BlendMode;

/// Pixel bit depth of the document's channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BitDepth {
    #[default]
    Eight,
    Sixteen,
    ThirtyTwo,
}

impl BitDepth {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            8 => Some(BitDepth::Eight),
            16 => Some(BitDepth::Sixteen),
            32 => Some(BitDepth::ThirtyTwo),
            _ => None,
        }
    }

    pub fn bits(self) -> u16 {
        match self {
            BitDepth::Eight => 8,
            BitDepth::Sixteen => 16,
            BitDepth::ThirtyTwo => 32,
        }
    }

    /// Bytes per sample within a row (1 for sub-byte depths).
    pub fn sample_stride(self) -> usize {
        match self {
            BitDepth::Eight => 1,
            BitDepth::Sixteen => 2,
            BitDepth::ThirtyTwo => 4,
        }
    }
}

/// Color mode of the source document.  The decoder only assembles RGB(A);
/// other modes are converted upstream by the parser.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ColorMode {
    Grayscale,
    #[default]
    Rgb,
    Cmyk,
    Lab,
}

/// Layer bounding rectangle in document pixels.  `left <= right`,
/// `top <= bottom`; an empty layer has zero extent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoundRect {
    pub top: i32,
    pub left: i32,
    pub bottom: i32,
    pub right: i32,
}

impl BoundRect {
    pub fn new(top: i32, left: i32, bottom: i32, right: i32) -> Self {
        Self { top, left, bottom, right }
    }

    pub fn width(&self) -> u32 {
        (self.right - self.left).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.bottom - self.top).max(0) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    /// Containment test against a document-space point, after shifting the
    /// rect by `(dx, dy)`.
    pub fn contains_shifted(&self, x: f32, y: f32, dx: f32, dy: f32) -> bool {
        x >= self.left as f32 + dx
            && x < self.right as f32 + dx
            && y >= self.top as f32 + dy
            && y < self.bottom as f32 + dy
    }
}

/// One compressed channel as described by the parser.
#[derive(Clone, Copy, Debug)]
pub struct ChannelInfo {
    /// 0/1/2 = R/G/B, -1 = alpha, -2 = user mask, others ignored.
    pub id: i16,
    /// Raw compression tag from the file (see `decode::Compression`).
    pub compression: u16,
    /// Byte length of the compressed stream.
    pub byte_len: u64,
}

/// Pixel-bearing leaf layer properties shared by the tree node and the
/// flattened render info.
#[derive(Clone, Debug)]
pub struct LayerProps {
    /// Stable identity assigned by the parser; unique, never reused.
    pub index: usize,
    pub name: String,
    pub blend_mode: BlendMode,
    /// 0 = transparent, 255 = opaque.
    pub opacity: u8,
    /// The layer's own visibility flag (group visibility applies on top).
    pub visible: bool,
    pub clipping: bool,
    pub bounds: BoundRect,
    pub channels: Vec<ChannelInfo>,
}

/// A node in the layer tree.  Tree order is visual top-to-bottom.
#[derive(Clone, Debug)]
pub enum LayerNode {
    /// The document root; only ever appears once, at the top.
    Root { children: Vec<LayerNode> },
    /// A group folder: no pixels of its own, gates children's visibility.
    Group {
        index: usize,
        name: String,
        visible: bool,
        children: Vec<LayerNode>,
    },
    /// A pixel-bearing leaf.
    Layer(LayerProps),
}

impl LayerNode {
    pub fn index(&self) -> Option<usize> {
        match self {
            LayerNode::Root { .. } => None,
            LayerNode::Group { index, .. } => Some(*index),
            LayerNode::Layer(props) => Some(props.index),
        }
    }

    pub fn children(&self) -> &[LayerNode] {
        match self {
            LayerNode::Root { children } | LayerNode::Group { children, .. } => children,
            LayerNode::Layer(_) => &[],
        }
    }

    /// Collect the indices of every descendant leaf, in tree order.
    pub fn descendant_layers(&self, out: &mut Vec<usize>) {
        match self {
            LayerNode::Root { children } | LayerNode::Group { children, .. } => {
                for child in children {
                    child.descendant_layers(out);
                }
            }
            LayerNode::Layer(props) => out.push(props.index),
        }
    }
}

/// Flattened per-leaf render state, recomputed whenever the tree or a
/// visibility override changes.
#[derive(Clone, Debug)]
pub struct LayerRenderInfo {
    pub index: usize,
    pub name: String,
    pub blend_mode: BlendMode,
    pub opacity: u8,
    /// Own visibility AND every ancestor group's visibility.
    pub effective_visible: bool,
    pub bounds: BoundRect,
}

/// An immutable loaded document.
#[derive(Clone, Debug)]
pub struct Document {
    pub width: u32,
    pub height: u32,
    pub depth: BitDepth,
    pub color_mode: ColorMode,
    /// True for large-document (PSB) files: RLE scanline counts are 4 bytes.
    pub large_format: bool,
    pub root: LayerNode,
}

impl Document {
    /// Flatten the tree into render order (tree order = visual top-to-bottom).
    ///
    /// `visibility_override` lets the host toggle eyes without rebuilding the
    /// tree: keys are node indices (groups or leaves), absence = the node's
    /// own flag.
    pub fn flatten_render_infos(
        &self,
        visibility_override: &std::collections::HashMap<usize, bool>,
    ) -> Vec<LayerRenderInfo> {
        let mut out = Vec::new();
        Self::flatten_into(&self.root, true, visibility_override, &mut out);
        out
    }

    fn flatten_into(
        node: &LayerNode,
        ancestors_visible: bool,
        overrides: &std::collections::HashMap<usize, bool>,
        out: &mut Vec<LayerRenderInfo>,
    ) {
        match node {
            LayerNode::Root { children } => {
                for child in children {
                    Self::flatten_into(child, ancestors_visible, overrides, out);
                }
            }
            LayerNode::Group { index, visible, children, .. } => {
                let own = overrides.get(index).copied().unwrap_or(*visible);
                // A hidden group hides every descendant regardless of their
                // own flags.
                let vis = ancestors_visible && own;
                for child in children {
                    Self::flatten_into(child, vis, overrides, out);
                }
            }
            LayerNode::Layer(props) => {
                let own = overrides.get(&props.index).copied().unwrap_or(props.visible);
                out.push(LayerRenderInfo {
                    index: props.index,
                    name: props.name.clone(),
                    blend_mode: props.blend_mode,
                    opacity: props.opacity,
                    effective_visible: ancestors_visible && own,
                    bounds: props.bounds,
                });
            }
        }
    }

    /// Look up a leaf layer's channel descriptors by index.
    pub fn layer_channels(&self, index: usize) -> Option<&[ChannelInfo]> {
        fn walk<'a>(node: &'a LayerNode, index: usize) -> Option<&'a [ChannelInfo]> {
            match node {
                LayerNode::Root { children } | LayerNode::Group { children, .. } => {
                    children.iter().find_map(|c| walk(c, index))
                }
                LayerNode::Layer(props) if props.index == index => Some(&props.channels),
                LayerNode::Layer(_) => None,
            }
        }
        walk(&self.root, index)
    }
}

/// Decoded RGBA pixels for one layer (or a sub-rectangle extracted from the
/// full composite), positioned in document space.
#[derive(Clone, Debug)]
pub struct LayerPixelData {
    /// 4 bytes per pixel, row-major, `width * height * 4` long.
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Document-space position of the top-left corner.
    pub left: i32,
    pub top: i32,
}

impl LayerPixelData {
    pub fn new(rgba: Vec<u8>, width: u32, height: u32, left: i32, top: i32) -> Self {
        debug_assert_eq!(rgba.len(), (width * height * 4) as usize);
        Self { rgba, width, height, left, top }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn leaf(index: usize, visible: bool) -> LayerNode {
        LayerNode::Layer(LayerProps {
            index,
            name: format!("layer {}", index),
            blend_mode: BlendMode::Normal,
            opacity: 255,
            visible,
            clipping: false,
            bounds: BoundRect::new(0, 0, 10, 10),
            channels: Vec::new(),
        })
    }

    #[test]
    fn flatten_preserves_tree_order() {
        let doc = Document {
            width: 10,
            height: 10,
            depth: BitDepth::Eight,
            color_mode: ColorMode::Rgb,
            large_format: false,
            root: LayerNode::Root {
                children: vec![
                    leaf(0, true),
                    LayerNode::Group {
                        index: 10,
                        name: "group".into(),
                        visible: true,
                        children: vec![leaf(1, true), leaf(2, true)],
                    },
                    leaf(3, true),
                ],
            },
        };
        let infos = doc.flatten_render_infos(&HashMap::new());
        let order: Vec<usize> = infos.iter().map(|i| i.index).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert!(infos.iter().all(|i| i.effective_visible));
    }

    #[test]
    fn hidden_group_hides_descendants_with_own_flag_still_true() {
        let doc = Document {
            width: 10,
            height: 10,
            depth: BitDepth::Eight,
            color_mode: ColorMode::Rgb,
            large_format: false,
            root: LayerNode::Root {
                children: vec![
                    LayerNode::Group {
                        index: 10,
                        name: "outer".into(),
                        visible: false,
                        children: vec![
                            leaf(0, true),
                            LayerNode::Group {
                                index: 11,
                                name: "inner".into(),
                                visible: true,
                                children: vec![leaf(1, true)],
                            },
                        ],
                    },
                    leaf(2, true),
                ],
            },
        };
        let infos = doc.flatten_render_infos(&HashMap::new());
        assert!(!infos[0].effective_visible);
        assert!(!infos[1].effective_visible);
        assert!(infos[2].effective_visible);
    }

    #[test]
    fn visibility_override_beats_node_flag() {
        let doc = Document {
            width: 10,
            height: 10,
            depth: BitDepth::Eight,
            color_mode: ColorMode::Rgb,
            large_format: false,
            root: LayerNode::Root { children: vec![leaf(0, false)] },
        };
        let mut overrides = HashMap::new();
        overrides.insert(0usize, true);
        let infos = doc.flatten_render_infos(&overrides);
        assert!(infos[0].effective_visible);
    }

    #[test]
    fn descendant_collection() {
        let group = LayerNode::Group {
            index: 10,
            name: "g".into(),
            visible: true,
            children: vec![leaf(4, true), leaf(7, true)],
        };
        let mut out = Vec::new();
        group.descendant_layers(&mut out);
        assert_eq!(out, vec![4, 7]);
    }

    #[test]
    fn bound_rect_shifted_containment() {
        let r = BoundRect::new(10, 10, 20, 30);
        assert!(r.contains_shifted(15.0, 15.0, 0.0, 0.0));
        assert!(!r.contains_shifted(15.0, 15.0, 20.0, 0.0));
        assert!(r.contains_shifted(35.0, 15.0, 20.0, 0.0));
        assert_eq!(r.width(), 20);
        assert_eq!(r.height(), 10);
    }
}
