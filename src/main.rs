use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use image::{DynamicImage, Rgba32FImage};

use gpu_preprocess::logging::{init_logging, LoggingConfig};
use gpu_preprocess::{
    cpu, CropRegion, Extent, GpuContext, NormalizationStats, PathPreference, PipelineConfig,
    PreprocessError, Preprocessor, Result, Step,
};

/// Prepare a camera/video frame for model inference on the GPU
#[derive(Debug, Parser)]
#[command(name = "gpu-preprocess", version, about)]
struct Cli {
    /// Input frame (any format the `image` crate decodes)
    input: PathBuf,

    /// Output: an image file (values clamped to 8 bit), or `.bin` for a
    /// little-endian f32 CHW tensor
    output: PathBuf,

    /// Pipeline file (path, stats, scale, steps)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Normalization stats JSON (`mean`/`std` or `image_mean`/`image_std`)
    #[arg(long, conflicts_with = "preset")]
    stats: Option<PathBuf>,

    /// Built-in stats: imagenet, clip, siglip, identity
    #[arg(long)]
    preset: Option<String>,

    /// Multiplier applied after normalization
    #[arg(long)]
    scale: Option<f32>,

    /// Execution path: auto, compute or fragment
    #[arg(long)]
    path: Option<PathPreference>,

    /// Crop rectangle `x,y,width,height`
    #[arg(long)]
    crop: Option<CropRegion>,

    /// Centered crop `WIDTHxHEIGHT`
    #[arg(long, conflicts_with = "crop")]
    center_crop: Option<Extent>,

    /// Mirror the frame vertically
    #[arg(long)]
    flip: bool,

    /// Normalize with the bound stats
    #[arg(long)]
    normalize: bool,

    /// Use the CPU reference implementation instead of the GPU
    #[arg(long)]
    cpu: bool,

    /// Ask for the software adapter
    #[arg(long)]
    fallback_adapter: bool,

    /// Log filter, e.g. `debug` or `gpu_preprocess=trace` (defaults to RUST_LOG)
    #[arg(long)]
    log: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(LoggingConfig {
        env_filter: cli.log.clone(),
        ..Default::default()
    });

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            log::error!("failed to start async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = build_config(&cli)?;
    if config.steps.is_empty() {
        log::warn!("no steps configured, output is a copy of the input");
    }

    let frame = load_frame(cli.input.clone()).await?;
    log::info!(
        "{}: {}x{}, {} step(s)",
        cli.input.display(),
        frame.width(),
        frame.height(),
        config.steps.len(),
    );

    let output = if cli.cpu {
        cpu::run(&frame, &config.steps, &config.stats, config.scale)?
    } else {
        let ctx = Arc::new(GpuContext::new(config.gpu).await?);
        let mut preprocessor = Preprocessor::from_config(ctx, &config)?;
        preprocessor.process_image(&frame, &config.steps)?
    };

    save_output(&cli.output, output).await?;
    log::info!("wrote {}", cli.output.display());
    Ok(())
}

/// Pipeline file (or defaults) with command line overrides applied
fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(path) = &cli.stats {
        config.stats = NormalizationStats::load(path)?;
    }
    if let Some(name) = &cli.preset {
        config.stats = NormalizationStats::preset(name).ok_or_else(|| PreprocessError::Parse {
            value: name.clone(),
            reason: "expected imagenet, clip, siglip or identity",
        })?;
    }
    if let Some(scale) = cli.scale {
        config.scale = scale;
    }
    if let Some(path) = cli.path {
        config.path = path;
    }
    if cli.fallback_adapter {
        config.gpu.force_fallback_adapter = true;
    }

    let steps = steps_from_flags(cli);
    if !steps.is_empty() {
        config.steps = steps;
    }

    config.validate()?;
    Ok(config)
}

/// Step flags replace the configured steps; they always run crop, flip,
/// normalize in that order
fn steps_from_flags(cli: &Cli) -> Vec<Step> {
    let mut steps = Vec::new();
    if let Some(region) = cli.crop {
        steps.push(Step::from(region));
    }
    if let Some(size) = cli.center_crop {
        steps.push(Step::CenterCrop { width: size.width, height: size.height });
    }
    if cli.flip {
        steps.push(Step::Flip);
    }
    if cli.normalize {
        steps.push(Step::Normalize);
    }
    steps
}

/// Decode on the blocking pool, image decoding is CPU-bound
async fn load_frame(path: PathBuf) -> Result<Rgba32FImage> {
    let frame = tokio::task::spawn_blocking(move || image::open(&path).map(|img| img.to_rgba32f()))
        .await
        .map_err(std::io::Error::other)??;
    Ok(frame)
}

async fn save_output(path: &Path, frame: Rgba32FImage) -> Result<()> {
    let is_tensor = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("bin"));

    if is_tensor {
        let bytes: Vec<u8> = cpu::to_planar_rgb(&frame)
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        tokio::fs::write(path, bytes).await?;
        return Ok(());
    }

    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || DynamicImage::ImageRgba32F(frame).to_rgba8().save(&path))
        .await
        .map_err(std::io::Error::other)??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(["gpu-preprocess", "in.png", "out.bin"].iter().chain(args)).unwrap()
    }

    #[test]
    fn test_flags_build_ordered_steps() {
        let cli = parse(&["--normalize", "--flip", "--center-crop", "224x224"]);
        assert_eq!(
            steps_from_flags(&cli),
            vec![
                Step::CenterCrop { width: 224, height: 224 },
                Step::Flip,
                Step::Normalize,
            ]
        );
    }

    #[test]
    fn test_overrides_apply_to_defaults() {
        let cli = parse(&[
            "--preset", "clip", "--scale", "255", "--path", "fragment", "--crop", "0,0,8,8",
        ]);
        let config = build_config(&cli).unwrap();
        assert_eq!(config.stats, NormalizationStats::CLIP);
        assert_eq!(config.scale, 255.0);
        assert_eq!(config.path, PathPreference::Fragment);
        assert_eq!(config.steps, vec![Step::Crop { x: 0, y: 0, width: 8, height: 8 }]);
    }

    #[test]
    fn test_bad_arguments_rejected() {
        let base = ["gpu-preprocess", "in.png", "out.png"];
        assert!(Cli::try_parse_from(base.iter().chain(&["--crop", "1,2,3"])).is_err());
        assert!(Cli::try_parse_from(base.iter().chain(&["--path", "vulkan"])).is_err());
        let both_crops = ["--crop", "0,0,1,1", "--center-crop", "2x2"];
        assert!(Cli::try_parse_from(base.iter().chain(&both_crops)).is_err());

        let cli = parse(&["--preset", "unknown"]);
        assert!(build_config(&cli).is_err());

        let cli = parse(&["--scale", "inf"]);
        assert!(matches!(build_config(&cli), Err(PreprocessError::InvalidScale(_))));
    }
}
