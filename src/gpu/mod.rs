// ============================================================================
// GPU MODULE — wgpu-backed compositing and display for psdview
// ============================================================================
//
// Architecture:
//   context.rs    — wgpu Device, Queue, adapter init
//   shaders.rs    — all WGSL shader source (inline strings)
//   texture.rs    — LayerTexture wrapper (RGBA8, full upload)
//   compositor.rs — blend-mode render pipeline + display blit + readback
//   renderer.rs   — top-level GpuRenderer coordinator
// ============================================================================

pub mod compositor;
pub mod context;
pub mod renderer;
pub mod shaders;
pub mod texture;

pub use renderer::{GpuRenderer, LayerPlacement};
