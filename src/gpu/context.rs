/// GPU device acquisition and capability detection

use serde::{Deserialize, Serialize};

use super::surface::SURFACE_FORMAT;
use crate::error::{PreprocessError, Result};

/// Adapter selection options
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct GpuOptions {
    /// Prefer the discrete GPU (`true`) or the integrated one (`false`)
    pub high_performance: bool,
    /// Use the software adapter, if the platform ships one
    pub force_fallback_adapter: bool,
}

impl Default for GpuOptions {
    fn default() -> Self {
        Self {
            high_performance: true,
            force_fallback_adapter: false,
        }
    }
}

/// What the device can do with `Rgba32Float` surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Compute shaders, plus storage writes to float surfaces
    pub compute: bool,
    /// Float surfaces usable as render attachments (fragment path)
    pub render_target: bool,
}

impl Capabilities {
    /// Read from the adapter's downlevel flags and the surface format's
    /// allowed usages
    pub fn from_adapter(adapter: &wgpu::Adapter) -> Self {
        let usages = adapter.get_texture_format_features(SURFACE_FORMAT).allowed_usages;
        let compute_shaders = adapter
            .get_downlevel_capabilities()
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS);

        Self {
            compute: compute_shaders && usages.contains(wgpu::TextureUsages::STORAGE_BINDING),
            render_target: usages.contains(wgpu::TextureUsages::RENDER_ATTACHMENT),
        }
    }
}

/// Device + queue plus what the device can do
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    capabilities: Capabilities,
    adapter_name: String,
}

// Manual Debug implementation (wgpu handles carry nothing useful to print)
impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("adapter", &self.adapter_name)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl GpuContext {
    /// Request an adapter and device
    pub async fn new(options: GpuOptions) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let power_preference = if options.high_performance {
            wgpu::PowerPreference::HighPerformance
        } else {
            wgpu::PowerPreference::LowPower
        };

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                force_fallback_adapter: options.force_fallback_adapter,
            })
            .await
            .ok_or(PreprocessError::NoAdapter)?;

        let info = adapter.get_info();
        let capabilities = Capabilities::from_adapter(&adapter);

        // GLES and WebGL-class adapters reject the default limits; texture
        // sizes still go up to what the adapter allows
        let base_limits = if capabilities.compute {
            wgpu::Limits::downlevel_defaults()
        } else {
            wgpu::Limits::downlevel_webgl2_defaults()
        };
        let required_limits = base_limits.using_resolution(adapter.limits());

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Preprocess Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits,
                },
                None,
            )
            .await?;

        log::info!(
            "using GPU adapter {} ({:?}), compute path {}, fragment path {}",
            info.name,
            info.backend,
            availability(capabilities.compute),
            availability(capabilities.render_target),
        );

        Ok(Self {
            device,
            queue,
            capabilities,
            adapter_name: info.name,
        })
    }

    /// Wrap a device created by the host application.
    /// `capabilities` usually comes from [`Capabilities::from_adapter`].
    pub fn from_parts(
        device: wgpu::Device,
        queue: wgpu::Queue,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            device,
            queue,
            capabilities,
            adapter_name: String::from("external"),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn supports_compute(&self) -> bool {
        self.capabilities.compute
    }

    pub fn supports_fragment(&self) -> bool {
        self.capabilities.render_target
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Largest surface side the device accepts
    pub fn max_surface_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }
}

fn availability(supported: bool) -> &'static str {
    if supported {
        "available"
    } else {
        "unavailable"
    }
}

/// Context for GPU tests, `None` when the machine has no usable adapter
#[cfg(test)]
pub(crate) async fn test_context() -> Option<std::sync::Arc<GpuContext>> {
    match GpuContext::new(GpuOptions::default()).await {
        Ok(ctx) => Some(std::sync::Arc::new(ctx)),
        Err(err) => {
            eprintln!("skipping GPU test: {err}");
            None
        }
    }
}
