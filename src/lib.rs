//! psdview — interactive viewer engine for layered PSD documents.
//!
//! The pipeline: compressed channel data from a parsed document is decoded
//! on a background thread into RGBA buffers, uploaded as GPU textures, and
//! composited bottom-to-top with Photoshop-style blend modes into an
//! off-screen document-sized target, which is blitted to screen under a
//! pan/zoom view transform.  A CPU compositor with identical blend math
//! takes over when no GPU adapter exists.
//!
//! The host shell supplies parsing (via [`source::DocumentSource`]), the
//! window/canvas, and input events; [`viewer::ViewerEngine`] does the rest.

pub mod blend;
pub mod composite_cpu;
pub mod decode;
pub mod document;
pub mod error;
pub mod gpu;
pub mod interact;
pub mod logger;
pub mod overlay;
pub mod source;
pub mod view;
pub mod viewer;

pub use blend::BlendMode;
pub use document::{BitDepth, BoundRect, Document, LayerNode, LayerPixelData, LayerRenderInfo};
pub use error::{DecodeError, GpuError, ViewerError};
pub use source::DocumentSource;
pub use view::ViewTransform;
pub use viewer::ViewerEngine;
