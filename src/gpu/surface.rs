/// GPU surfaces: float textures that every transform reads from and writes to
///
/// This module manages:
/// - texture creation with the usages both execution paths need
/// - uploads from `image::Rgba32FImage`
/// - readback with row padding
/// - a pool of temporary surfaces reused across operations

use image::Rgba32FImage;

use super::context::{Capabilities, GpuContext};
use crate::error::{PreprocessError, Result};
use crate::geometry::Extent;

/// Texel format of every surface: 4 x f32, sampleable, storage-writable
/// and renderable
pub const SURFACE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

/// Bytes per `Rgba32Float` texel
const BYTES_PER_TEXEL: u32 = 16;

/// Idle surfaces kept by a pool before the oldest are dropped
const MAX_IDLE_SURFACES: usize = 8;

/// A 2D `Rgba32Float` texture and its default view
pub struct Surface {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    extent: Extent,
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("extent", &self.extent)
            .finish_non_exhaustive()
    }
}

impl Surface {
    /// Allocate an uninitialized surface. Empty extents and sides above the
    /// device's 2D texture limit are rejected.
    pub fn new(ctx: &GpuContext, extent: Extent, label: &str) -> Result<Self> {
        check_extent(extent, ctx.max_surface_dimension())?;
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent.to_wgpu(),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: SURFACE_FORMAT,
            usage: surface_usage(ctx.capabilities()),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Self { texture, view, extent })
    }

    /// Wrap a texture created elsewhere (e.g. by the host engine).
    /// The texture must be `Rgba32Float`; its usages decide which
    /// operations it can take part in.
    pub fn from_texture(texture: wgpu::Texture) -> Result<Self> {
        if texture.format() != SURFACE_FORMAT {
            return Err(PreprocessError::UnsupportedFormat(texture.format()));
        }
        let extent = Extent::new(texture.width(), texture.height());
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Self { texture, view, extent })
    }

    /// Allocate a surface and fill it from an image
    pub fn from_image(ctx: &GpuContext, image: &Rgba32FImage, label: &str) -> Result<Self> {
        let surface = Self::new(ctx, Extent::new(image.width(), image.height()), label)?;
        surface.write_texels(ctx, image.as_raw());
        Ok(surface)
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub(crate) fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub(crate) fn copy_target(&self) -> wgpu::ImageCopyTexture<'_> {
        wgpu::ImageCopyTexture {
            texture: &self.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        }
    }

    /// Upload an image of the same extent
    pub fn upload(&self, ctx: &GpuContext, image: &Rgba32FImage) -> Result<()> {
        let actual = Extent::new(image.width(), image.height());
        if actual != self.extent {
            return Err(PreprocessError::ImageSizeMismatch { expected: self.extent, actual });
        }
        self.write_texels(ctx, image.as_raw());
        Ok(())
    }

    fn write_texels(&self, ctx: &GpuContext, texels: &[f32]) {
        ctx.queue.write_texture(
            self.copy_target(),
            bytemuck::cast_slice(texels),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(BYTES_PER_TEXEL * self.extent.width),
                rows_per_image: Some(self.extent.height),
            },
            self.extent.to_wgpu(),
        );
    }

    /// Copy the surface back to the CPU. Blocks until the GPU is done.
    pub fn read_back(&self, ctx: &GpuContext) -> Result<Rgba32FImage> {
        let Extent { width, height } = self.extent;
        let unpadded_bytes_per_row = width * BYTES_PER_TEXEL;
        let padded_bytes_per_row = padded_bytes_per_row(unpadded_bytes_per_row);

        let output_buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: padded_bytes_per_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            self.copy_target(),
            wgpu::ImageCopyBuffer {
                buffer: &output_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            self.extent.to_wgpu(),
        );
        ctx.queue.submit(Some(encoder.finish()));

        let buffer_slice = output_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            // Receiver only goes away if read_back already bailed out
            let _ = tx.send(result);
        });
        ctx.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| PreprocessError::Readback(e.to_string()))?
            .map_err(|e| PreprocessError::Readback(e.to_string()))?;

        let data = buffer_slice.get_mapped_range();
        let mut texels: Vec<f32> = Vec::with_capacity(self.extent.pixel_count() * 4);
        for row in data.chunks_exact(padded_bytes_per_row as usize) {
            let row = &row[..unpadded_bytes_per_row as usize];
            // The mapped range is only byte aligned, so copy texel by texel
            texels.extend(
                row.chunks_exact(4)
                    .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]])),
            );
        }
        drop(data);
        output_buffer.unmap();

        Rgba32FImage::from_raw(width, height, texels)
            .ok_or_else(|| PreprocessError::Readback("readback size mismatch".into()))
    }
}

/// Both sides in `1..=max`
fn check_extent(extent: Extent, max: u32) -> Result<()> {
    if extent.is_empty() || extent.width > max || extent.height > max {
        return Err(PreprocessError::SurfaceSize { extent, max });
    }
    Ok(())
}

/// Texture usages for pooled and freshly allocated surfaces.
/// Storage writes and render attachment are only requested when the device
/// supports them for `Rgba32Float`.
fn surface_usage(capabilities: Capabilities) -> wgpu::TextureUsages {
    let mut usage = wgpu::TextureUsages::TEXTURE_BINDING
        | wgpu::TextureUsages::COPY_SRC
        | wgpu::TextureUsages::COPY_DST;
    if capabilities.compute {
        usage |= wgpu::TextureUsages::STORAGE_BINDING;
    }
    if capabilities.render_target {
        usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    usage
}

/// Round a row up to `COPY_BYTES_PER_ROW_ALIGNMENT` for buffer copies
fn padded_bytes_per_row(unpadded: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Temporary surfaces recycled between operations, keyed by extent
#[derive(Debug, Default)]
pub struct SurfacePool {
    idle: Vec<Surface>,
    allocated: usize,
}

impl SurfacePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take an idle surface of `extent`, or allocate one
    pub fn acquire(&mut self, ctx: &GpuContext, extent: Extent) -> Result<Surface> {
        if let Some(index) = self.idle.iter().position(|s| s.extent == extent) {
            log::trace!("reusing temporary {extent} surface");
            return Ok(self.idle.remove(index));
        }

        let surface = Surface::new(ctx, extent, "Temporary Surface")?;
        self.allocated += 1;
        log::debug!("allocated temporary {extent} surface (#{})", self.allocated);
        Ok(surface)
    }

    /// Hand a surface back for reuse
    pub fn release(&mut self, surface: Surface) {
        self.idle.push(surface);
        if self.idle.len() > MAX_IDLE_SURFACES {
            let dropped = self.idle.remove(0);
            log::debug!("dropping idle {} surface", dropped.extent);
        }
    }

    /// Number of surfaces waiting for reuse
    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    /// Number of surfaces the pool has ever allocated
    pub fn allocated_count(&self) -> usize {
        self.allocated
    }

    /// Free every idle surface
    pub fn clear(&mut self) {
        self.idle.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::context::test_context;

    #[test]
    fn test_row_padding() {
        assert_eq!(padded_bytes_per_row(16), 256);
        assert_eq!(padded_bytes_per_row(256), 256);
        assert_eq!(padded_bytes_per_row(257), 512);
        // 224 px * 16 bytes
        assert_eq!(padded_bytes_per_row(3584), 3584);
    }

    #[test]
    fn test_usage_follows_capabilities() {
        let all = Capabilities { compute: true, render_target: true };
        assert!(surface_usage(all).contains(
            wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::RENDER_ATTACHMENT
        ));

        let fragment_only = Capabilities { compute: false, render_target: true };
        assert!(!surface_usage(fragment_only).contains(wgpu::TextureUsages::STORAGE_BINDING));
        assert!(surface_usage(fragment_only).contains(wgpu::TextureUsages::RENDER_ATTACHMENT));

        let compute_only = Capabilities { compute: true, render_target: false };
        assert!(!surface_usage(compute_only).contains(wgpu::TextureUsages::RENDER_ATTACHMENT));
    }

    #[test]
    fn test_extent_limits() {
        assert!(check_extent(Extent::new(1, 1), 8192).is_ok());
        assert!(check_extent(Extent::new(8192, 2), 8192).is_ok());
        assert!(matches!(
            check_extent(Extent::new(9000, 2), 8192),
            Err(PreprocessError::SurfaceSize { max: 8192, .. })
        ));
        assert!(check_extent(Extent::new(0, 0), 8192).is_err());
        assert!(check_extent(Extent::new(4, 0), 8192).is_err());
    }

    #[tokio::test]
    async fn test_oversized_and_empty_surfaces_rejected() {
        let Some(ctx) = test_context().await else { return };
        let too_wide = Extent::new(ctx.max_surface_dimension() + 1, 2);
        assert!(matches!(
            Surface::new(&ctx, too_wide, "too wide"),
            Err(PreprocessError::SurfaceSize { .. })
        ));
        assert!(Surface::new(&ctx, Extent::new(0, 0), "empty").is_err());

        let mut pool = SurfacePool::new();
        assert!(pool.acquire(&ctx, too_wide).is_err());
        assert_eq!(pool.allocated_count(), 0);
    }

    #[tokio::test]
    async fn test_pool_drops_oldest_idle_surface() {
        let Some(ctx) = test_context().await else { return };
        let mut pool = SurfacePool::new();

        let extents: Vec<Extent> = (1..=MAX_IDLE_SURFACES as u32 + 1)
            .map(|side| Extent::new(side, side))
            .collect();
        for &extent in &extents {
            let surface = pool.acquire(&ctx, extent).unwrap();
            pool.release(surface);
        }
        // each distinct extent cost one allocation, the oldest was evicted
        assert_eq!(pool.allocated_count(), extents.len());
        assert_eq!(pool.idle_count(), MAX_IDLE_SURFACES);

        // newest extent is still idle, the first one has to be reallocated
        let newest = pool.acquire(&ctx, extents[extents.len() - 1]).unwrap();
        assert_eq!(pool.allocated_count(), extents.len());
        let oldest = pool.acquire(&ctx, extents[0]).unwrap();
        assert_eq!(pool.allocated_count(), extents.len() + 1);

        pool.release(newest);
        pool.release(oldest);
        pool.clear();
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_from_texture_checks_format() {
        let Some(ctx) = test_context().await else { return };
        let descriptor = |format| wgpu::TextureDescriptor {
            label: Some("Host Texture"),
            size: Extent::new(4, 3).to_wgpu(),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        };

        let rgba8 = ctx.device.create_texture(&descriptor(wgpu::TextureFormat::Rgba8Unorm));
        assert!(matches!(
            Surface::from_texture(rgba8),
            Err(PreprocessError::UnsupportedFormat(wgpu::TextureFormat::Rgba8Unorm))
        ));

        let float = ctx.device.create_texture(&descriptor(SURFACE_FORMAT));
        let surface = Surface::from_texture(float).unwrap();
        assert_eq!(surface.extent(), Extent::new(4, 3));
    }

    #[tokio::test]
    async fn test_upload_checks_image_size() {
        let Some(ctx) = test_context().await else { return };
        let surface = Surface::new(&ctx, Extent::new(8, 8), "upload").unwrap();

        let wrong = Rgba32FImage::new(8, 4);
        assert!(matches!(
            surface.upload(&ctx, &wrong),
            Err(PreprocessError::ImageSizeMismatch { .. })
        ));

        let frame = Rgba32FImage::from_pixel(8, 8, image::Rgba([0.25, -1.5, 3.0, 1.0]));
        surface.upload(&ctx, &frame).unwrap();
        assert_eq!(surface.read_back(&ctx).unwrap(), frame);
    }
}
