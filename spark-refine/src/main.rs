#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use spark_inference::utils::masks::ApplyMask;
use spark_inference::{PipelineConfig, PointLabel, SamPrompt, SegmentPipeline};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "spark-refine")]
#[command(about = "Segment an object in an image from point and box prompts")]
struct Cli {
    /// Image to segment
    image: PathBuf,

    /// Prompt point as `x,y` or `x,y,label` (label 1 includes, 0 excludes)
    #[arg(short, long = "point", value_parser = parse_point)]
    points: Vec<(f32, f32, PointLabel)>,

    /// Box prompt as `x1,y1,x2,y2`
    #[arg(short = 'b', long = "box", value_parser = parse_box)]
    bbox: Option<[f32; 4]>,

    /// TOML pipeline configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where to write the overlay PNG
    #[arg(short, long, default_value = "mask.png")]
    output: PathBuf,
}

fn parse_numbers(value: &str) -> Result<Vec<f32>> {
    value
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .with_context(|| format!("`{part}` is not a number"))
        })
        .collect()
}

fn parse_point(value: &str) -> Result<(f32, f32, PointLabel)> {
    match parse_numbers(value)?.as_slice() {
        [x, y] => Ok((*x, *y, PointLabel::Include)),
        [x, y, label] if *label == 1.0 => Ok((*x, *y, PointLabel::Include)),
        [x, y, label] if *label == 0.0 => Ok((*x, *y, PointLabel::Exclude)),
        _ => bail!("expected `x,y` or `x,y,label` with label 0 or 1, got `{value}`"),
    }
}

fn parse_box(value: &str) -> Result<[f32; 4]> {
    match parse_numbers(value)?.as_slice() {
        [x1, y1, x2, y2] => Ok([*x1, *y1, *x2, *y2]),
        _ => bail!("expected `x1,y1,x2,y2`, got `{value}`"),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    let Some(path) = path else {
        return Ok(PipelineConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut prompt = SamPrompt::default();
    for (x, y, label) in &cli.points {
        prompt = prompt.with_point(*x, *y, *label);
    }
    if let Some([x1, y1, x2, y2]) = cli.bbox {
        prompt = prompt.with_bbox(x1, y1, x2, y2);
    }
    if prompt.is_empty() {
        bail!("give at least one --point or a --box");
    }

    let config = load_config(cli.config.as_ref())?;
    let mut pipeline = SegmentPipeline::from_config(config)?;

    pipeline
        .load_models(|progress| info!("loading models: {progress:.0}%"))
        .await?;

    let image = image::open(&cli.image)
        .with_context(|| format!("opening {}", cli.image.display()))?;
    pipeline.set_image(&image)?;

    let result = pipeline.decode(&prompt)?;
    info!(
        "score {:.3}, {} pixels, bbox {:?}",
        result.score,
        result.area(),
        result.bbox()
    );

    let mut canvas = image.to_rgba8();
    canvas.layering_overlay(&pipeline.render_overlay(&result))?;
    canvas
        .save(&cli.output)
        .with_context(|| format!("writing {}", cli.output.display()))?;
    info!("overlay written to {}", cli.output.display());

    Ok(())
}
