// ============================================================================
// GPU CONTEXT — wgpu Device, Queue, and adapter initialization
// ============================================================================

use std::sync::Arc;

use crate::error::GpuError;
use crate::log_warn;

/// Holds the core wgpu resources shared by the compositor and renderer.
/// Created once per engine; if creation fails the engine falls back to CPU
/// compositing.
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub adapter_name: String,
    /// Maximum texture dimension supported by this device.
    pub max_texture_dim: u32,
}

impl GpuContext {
    /// Attempt to create a GPU context.  Tries a hardware adapter first, then
    /// the software rasterizer (`force_fallback_adapter`) so compositing still
    /// runs on machines without a usable GPU.
    ///
    /// `pollster::block_on` because the engine is synchronous and only needs
    /// the device for offscreen composition.
    pub fn try_new() -> Result<Self, GpuError> {
        match pollster::block_on(Self::new_async(false)) {
            Ok(ctx) => Ok(ctx),
            Err(first) => {
                log_warn!("hardware adapter unavailable ({}), trying software fallback", first);
                pollster::block_on(Self::new_async(true))
            }
        }
    }

    async fn new_async(force_fallback: bool) -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None, // headless — offscreen composition only
                force_fallback_adapter: force_fallback,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        let adapter_name = adapter.get_info().name.clone();
        let limits = adapter.limits();

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("psdview GPU"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits {
                        max_texture_dimension_2d: limits.max_texture_dimension_2d,
                        ..wgpu::Limits::downlevel_defaults()
                    },
                },
                None,
            )
            .await
            .map_err(|e| GpuError::DeviceRequest(e.to_string()))?;

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_name,
            max_texture_dim: limits.max_texture_dimension_2d,
        })
    }

    /// Check if a texture of the given dimensions can be created.
    pub fn supports_size(&self, width: u32, height: u32) -> bool {
        width <= self.max_texture_dim && height <= self.max_texture_dim
    }
}
