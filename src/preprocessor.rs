/// Host-side dispatcher
///
/// Picks the compute or fragment path once, binds the normalization stats,
/// validates surface extents and issues exactly one dispatch or blit per
/// operation. Temporaries for in-place calls and step chains come from a
/// [`SurfacePool`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use image::Rgba32FImage;
use serde::{Deserialize, Serialize};

use crate::config::{PipelineConfig, Step};
use crate::error::{PreprocessError, Result};
use crate::geometry::{CropRegion, Extent};
use crate::gpu::{
    Capabilities, ComputeKernels, GpuContext, GpuKernelParams, Kernel, MaterialPasses, Surface,
    SurfacePool,
};
use crate::stats::{validate_scale, NormalizationStats};

/// Which path the caller wants
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PathPreference {
    /// Compute when the device supports it, fragment otherwise
    #[default]
    Auto,
    Compute,
    Fragment,
}

impl PathPreference {
    /// Resolve against what the device can do
    pub fn resolve(self, capabilities: Capabilities) -> Result<ExecutionPath> {
        let Capabilities { compute, render_target } = capabilities;
        match self {
            PathPreference::Auto if compute => Ok(ExecutionPath::Compute),
            PathPreference::Auto if render_target => Ok(ExecutionPath::Fragment),
            PathPreference::Auto => Err(PreprocessError::FragmentUnsupported),
            PathPreference::Compute if compute => Ok(ExecutionPath::Compute),
            PathPreference::Compute => Err(PreprocessError::ComputeUnsupported),
            PathPreference::Fragment if render_target => Ok(ExecutionPath::Fragment),
            PathPreference::Fragment => Err(PreprocessError::FragmentUnsupported),
        }
    }
}

impl FromStr for PathPreference {
    type Err = PreprocessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(PathPreference::Auto),
            "compute" => Ok(PathPreference::Compute),
            "fragment" | "material" => Ok(PathPreference::Fragment),
            _ => Err(PreprocessError::Parse {
                value: s.to_string(),
                reason: "expected auto, compute or fragment",
            }),
        }
    }
}

/// The path actually used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPath {
    Compute,
    Fragment,
}

impl fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionPath::Compute => f.write_str("compute"),
            ExecutionPath::Fragment => f.write_str("fragment"),
        }
    }
}

enum Backend {
    Compute(ComputeKernels),
    Fragment(MaterialPasses),
}

pub struct Preprocessor {
    ctx: Arc<GpuContext>,
    backend: Backend,
    stats: NormalizationStats,
    scale: f32,
    pool: SurfacePool,
}

impl fmt::Debug for Preprocessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preprocessor")
            .field("path", &self.path())
            .field("stats", &self.stats)
            .field("scale", &self.scale)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl Preprocessor {
    /// Build the pipelines for the resolved path. Stats default to ImageNet,
    /// scale to 1.
    pub fn new(ctx: Arc<GpuContext>, preference: PathPreference) -> Result<Self> {
        let path = preference.resolve(ctx.capabilities())?;
        let backend = match path {
            ExecutionPath::Compute => Backend::Compute(ComputeKernels::new(&ctx)),
            ExecutionPath::Fragment => Backend::Fragment(MaterialPasses::new(&ctx)),
        };
        log::info!("preprocessor ready on the {path} path ({preference:?} requested)");

        Ok(Self {
            ctx,
            backend,
            stats: NormalizationStats::default(),
            scale: 1.0,
            pool: SurfacePool::new(),
        })
    }

    /// Build from a pipeline file's path, stats and scale
    pub fn from_config(ctx: Arc<GpuContext>, config: &PipelineConfig) -> Result<Self> {
        let mut preprocessor = Self::new(ctx, config.path)?;
        preprocessor.set_stats(config.stats)?;
        preprocessor.set_scale(config.scale)?;
        Ok(preprocessor)
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }

    pub fn path(&self) -> ExecutionPath {
        match self.backend {
            Backend::Compute(_) => ExecutionPath::Compute,
            Backend::Fragment(_) => ExecutionPath::Fragment,
        }
    }

    pub fn stats(&self) -> &NormalizationStats {
        &self.stats
    }

    /// Bind new normalization stats; rejected stats leave the old ones bound
    pub fn set_stats(&mut self, stats: NormalizationStats) -> Result<()> {
        stats.validate()?;
        self.stats = stats;
        Ok(())
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Rejected (non-finite) scales leave the old one bound
    pub fn set_scale(&mut self, scale: f32) -> Result<()> {
        validate_scale(scale)?;
        self.scale = scale;
        Ok(())
    }

    pub fn pool(&self) -> &SurfacePool {
        &self.pool
    }

    /// Allocate a surface (from the pool when one of that extent is idle)
    pub fn acquire(&mut self, extent: Extent) -> Result<Surface> {
        self.pool.acquire(&self.ctx, extent)
    }

    /// Hand a surface returned by [`Preprocessor::run`] back to the pool
    pub fn recycle(&mut self, surface: Surface) {
        self.pool.release(surface);
    }

    /// `dst = (src - mean) / std * scale` per RGB channel, alpha copied
    pub fn normalize(&mut self, src: &Surface, dst: &Surface) -> Result<()> {
        expect_extent(dst, src.extent())?;
        let params = GpuKernelParams::normalize(&self.stats, self.scale);
        self.execute(Kernel::Normalize, src, dst, &params)
    }

    /// Copy `region` (clamped to `src`) into `dst`, which must have the
    /// clamped region's size
    pub fn crop(&mut self, src: &Surface, dst: &Surface, region: CropRegion) -> Result<()> {
        let region = region.clamp_to(src.extent())?;
        expect_extent(dst, region.extent())?;
        self.execute(Kernel::Crop, src, dst, &GpuKernelParams::crop(&region))
    }

    /// Vertical mirror: `dst(x, y) = src(x, height - y - 1)`
    pub fn flip(&mut self, src: &Surface, dst: &Surface) -> Result<()> {
        expect_extent(dst, src.extent())?;
        self.execute(Kernel::Flip, src, dst, &GpuKernelParams::flip())
    }

    /// Run a single configured step from `src` into `dst`
    pub fn apply(&mut self, step: &Step, src: &Surface, dst: &Surface) -> Result<()> {
        match step {
            Step::Normalize => self.normalize(src, dst),
            Step::Flip => self.flip(src, dst),
            Step::Crop { x, y, width, height } => {
                self.crop(src, dst, CropRegion::new(*x, *y, *width, *height))
            }
            Step::CenterCrop { width, height } => {
                let region = CropRegion::centered(src.extent(), Extent::new(*width, *height));
                self.crop(src, dst, region)
            }
        }
    }

    /// Chain `steps` starting from `src`. Intermediates go back to the pool;
    /// the returned surface belongs to the caller (see [`Preprocessor::recycle`]).
    /// With no steps the result is a copy of `src`.
    pub fn run(&mut self, src: &Surface, steps: &[Step]) -> Result<Surface> {
        let mut current: Option<Surface> = None;

        for step in steps {
            let input = current.as_ref().unwrap_or(src);
            let output = match self.apply_pooled(step, input) {
                Ok(output) => output,
                Err(err) => {
                    if let Some(surface) = current.take() {
                        self.pool.release(surface);
                    }
                    return Err(err);
                }
            };

            if let Some(previous) = current.replace(output) {
                self.pool.release(previous);
            }
        }

        match current {
            Some(surface) => Ok(surface),
            None => {
                let copy = self.pool.acquire(&self.ctx, src.extent())?;
                self.copy_surface(src, &copy);
                Ok(copy)
            }
        }
    }

    /// Run `step` into a pooled surface of the step's output extent
    fn apply_pooled(&mut self, step: &Step, input: &Surface) -> Result<Surface> {
        let extent = step.output_extent(input.extent())?;
        let output = self.pool.acquire(&self.ctx, extent)?;
        match self.apply(step, input, &output) {
            Ok(()) => Ok(output),
            Err(err) => {
                self.pool.release(output);
                Err(err)
            }
        }
    }

    /// Upload a frame, run `steps` and read the result back
    pub fn process_image(
        &mut self,
        image: &Rgba32FImage,
        steps: &[Step],
    ) -> Result<Rgba32FImage> {
        let input = self.pool.acquire(&self.ctx, Extent::new(image.width(), image.height()))?;
        if let Err(err) = input.upload(&self.ctx, image) {
            self.pool.release(input);
            return Err(err);
        }

        let output = match self.run(&input, steps) {
            Ok(output) => output,
            Err(err) => {
                self.pool.release(input);
                return Err(err);
            }
        };

        let result = output.read_back(&self.ctx);
        self.pool.release(input);
        self.pool.release(output);
        result
    }

    /// Route one kernel to the active path. A surface cannot be sampled and
    /// written in the same pass, so in-place calls go through a temporary.
    fn execute(
        &mut self,
        kernel: Kernel,
        src: &Surface,
        dst: &Surface,
        params: &GpuKernelParams,
    ) -> Result<()> {
        if std::ptr::eq(src, dst) {
            let temp = self.pool.acquire(&self.ctx, dst.extent())?;
            self.encode(kernel, src, &temp, params);
            self.copy_surface(&temp, dst);
            self.pool.release(temp);
        } else {
            self.encode(kernel, src, dst, params);
        }
        Ok(())
    }

    fn encode(&self, kernel: Kernel, src: &Surface, dst: &Surface, params: &GpuKernelParams) {
        match &self.backend {
            Backend::Compute(kernels) => kernels.dispatch(&self.ctx, kernel, src, dst, params),
            Backend::Fragment(passes) => passes.blit(&self.ctx, kernel, src, dst, params),
        }
    }

    fn copy_surface(&self, src: &Surface, dst: &Surface) {
        let mut encoder = self.ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Surface Copy Encoder"),
        });
        encoder.copy_texture_to_texture(
            src.copy_target(),
            dst.copy_target(),
            src.extent().to_wgpu(),
        );
        self.ctx.queue.submit(Some(encoder.finish()));
    }
}

fn expect_extent(dst: &Surface, expected: Extent) -> Result<()> {
    if dst.extent() != expected {
        return Err(PreprocessError::ExtentMismatch { expected, actual: dst.extent() });
    }
    Ok(())
}
