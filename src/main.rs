use anyhow::{bail, Context, Result};
use clap::Parser;
use clickseg::{ArtifactKind, ArtifactSink, Click, SessionConfig, SessionState};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input images, registered in the given order
    images: Vec<PathBuf>,

    /// Clicks to apply, as image,row,col,label with label 1 = positive.
    /// Coordinates are in feature-grid units.
    #[arg(short, long)]
    click: Vec<String>,

    /// Feature space (position, hue, color, deep-embedding)
    #[arg(long, default_value = "position")]
    feature_space: String,

    /// Number of exemplars voted per pixel
    #[arg(short, long, default_value_t = 1)]
    k: usize,

    /// Probability threshold for the binary mask
    #[arg(short, long, default_value_t = 0.5)]
    threshold: f32,

    /// Directory artifacts are written into
    #[arg(short, long, default_value = "out")]
    output_dir: PathBuf,

    /// Path to a patch-embedding ONNX model for the deep-embedding space
    #[cfg(feature = "onnx")]
    #[arg(long)]
    model: Option<String>,

    /// Patch size of the embedding model
    #[cfg(feature = "onnx")]
    #[arg(long, default_value_t = 14)]
    patch_size: u32,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

/// Writes each pushed artifact into the output directory.
struct FileSink {
    dir: PathBuf,
}

impl ArtifactSink for FileSink {
    fn push(&mut self, image_index: usize, kind: ArtifactKind, bytes: &[u8]) -> Result<()> {
        let (name, ext) = match kind {
            ArtifactKind::Preview => ("preview", "jpg"),
            ArtifactKind::Probability => ("prob", "png"),
            ArtifactKind::Mask => ("mask", "png"),
        };
        let path = self.dir.join(format!("{image_index}_{name}.{ext}"));
        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Wrote {}", path.display());
        Ok(())
    }
}

fn parse_click(raw: &str) -> Result<Click> {
    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() != 4 {
        bail!("expected image,row,col,label, got {raw:?}");
    }
    let image_index = parts[0].parse().context("bad image index")?;
    let row = parts[1].parse().context("bad row")?;
    let col = parts[2].parse().context("bad col")?;
    let positive = match parts[3] {
        "1" => true,
        "0" => false,
        other => bail!("label must be 0 or 1, got {other:?}"),
    };
    Ok(Click {
        image_index,
        row,
        col,
        positive,
    })
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("clickseg starting");

    #[cfg(feature = "onnx")]
    let mut session = {
        let model: Option<Box<dyn clickseg::EmbeddingModel>> = match &args.model {
            Some(path) => {
                tracing::info!("Loading embedding model from {}", path);
                let model = clickseg::OnnxEmbedding::new(path, args.patch_size)
                    .context("Failed to load embedding model")?;
                Some(Box::new(model))
            }
            None => None,
        };
        SessionState::with_embedding(SessionConfig::default(), model)
    };
    #[cfg(not(feature = "onnx"))]
    let mut session = SessionState::new(SessionConfig::default());

    let space = args
        .feature_space
        .parse()
        .context("Invalid feature space")?;
    session.set_feature_space(space)?;
    session.set_k(args.k)?;
    session.set_threshold(args.threshold)?;

    for path in &args.images {
        let image = image::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?
            .to_rgb8();
        session
            .add_image(image)
            .with_context(|| format!("Failed to register {}", path.display()))?;
    }

    for (count, raw) in args.click.iter().enumerate() {
        let click = parse_click(raw)?;
        session
            .add_click(click, count + 1)
            .with_context(|| format!("Failed to apply click {raw:?}"))?;
    }

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;
    let mut sink = FileSink {
        dir: args.output_dir.clone(),
    };
    session
        .publish(&mut sink)
        .context("Failed to publish artifacts")?;

    tracing::info!(
        "Done: {} images, {} clicks",
        session.viewers().len(),
        session.clicks().len()
    );
    Ok(())
}
