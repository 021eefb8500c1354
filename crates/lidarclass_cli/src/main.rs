use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::info;
use lidarclass::{
    run_las, CancelToken, ExportMode, LabelSource, Outputs, PipelineConfig, RuleSet,
};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Built-in threshold sets.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Preset {
    /// First-generation thresholds in their original order.
    Baseline,
    /// Reordered cascade with dark-ground, pole-band and sign fixes.
    Refined,
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Preset::Baseline => "baseline",
            Preset::Refined => "refined",
        };

        f.write_str(s)
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "lasclassify", version, about = "Classify a LAS/LAZ point cloud")]
struct Args {
    /// Input .las or .laz file
    input: PathBuf,

    /// Rewritten LAS output. Default: <stem>_classified.las next to the input
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// PLY output. Default: the LAS output with a .ply extension
    #[arg(long)]
    ply: Option<PathBuf>,

    /// Skip the PLY export
    #[arg(long, default_value_t = false, conflicts_with = "ply")]
    no_ply: bool,

    #[arg(long, value_enum, default_value_t = Preset::Refined)]
    preset: Preset,

    /// JSON rule set, replaces --preset
    #[arg(long, conflicts_with = "labels")]
    rules: Option<PathBuf>,

    /// Raw label file (one u8 per point, file order) from an external model
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Points per streaming chunk
    #[arg(long, default_value_t = lidarclass::pipeline::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Points sampled for the elevation range
    #[arg(long, default_value_t = lidarclass::stats::DEFAULT_SAMPLE_SIZE)]
    sample_size: usize,

    /// Classify each chunk in parallel blocks
    #[arg(long, default_value_t = false)]
    parallel: bool,

    #[arg(long, default_value_t = lidarclass::pipeline::DEFAULT_BLOCK_SIZE)]
    block_size: usize,

    /// Write LAS and PLY at the same time
    #[arg(long, default_value_t = false)]
    concurrent: bool,

    /// Subtract the header's minimum bound from PLY positions
    #[arg(long, default_value_t = false)]
    recenter: bool,

    /// Comment line written into the PLY header
    #[arg(long, default_value = lidarclass::export::DEFAULT_COMMENT)]
    comment: String,

    /// Also write the run summary as JSON
    #[arg(long)]
    summary_json: Option<PathBuf>,
}

fn label_source(args: &Args) -> Result<LabelSource> {
    if let Some(path) = &args.labels {
        return Ok(LabelSource::External(path.clone()));
    }

    let rules = match &args.rules {
        Some(path) => RuleSet::from_path(path)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("loading rules from {}", path.display()))?,
        None => RuleSet::preset(&args.preset.to_string())
            .with_context(|| format!("unknown preset {}", args.preset))?,
    };

    Ok(LabelSource::Rules(rules))
}

fn outputs(args: &Args) -> Outputs {
    let mut outputs = Outputs::beside(&args.input);

    if let Some(las) = &args.output {
        outputs.ply = Some(las.with_extension("ply"));
        outputs.las = Some(las.clone());
    }
    if let Some(ply) = &args.ply {
        outputs.ply = Some(ply.clone());
    }
    if args.no_ply {
        outputs.ply = None;
    }

    outputs
}

fn check_input(path: &Path) -> Result<()> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if ext != "las" && ext != "laz" {
        bail!("{} is not a .las/.laz file", path.display());
    }

    let meta = fs::metadata(path).with_context(|| format!("reading {}", path.display()))?;
    if !meta.is_file() {
        bail!("{} is not a file", path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    check_input(&args.input)?;

    let labels = label_source(&args)?;
    let outputs = outputs(&args);
    outputs
        .check_distinct(Some(args.input.as_path()))
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let config = PipelineConfig {
        chunk_size: args.chunk_size,
        sample_size: args.sample_size,
        parallel: args.parallel,
        block_size: args.block_size,
        export_mode: if args.concurrent {
            ExportMode::Concurrent
        } else {
            ExportMode::Sequential
        },
        ply_comment: args.comment.clone(),
        recenter: args.recenter,
    };

    for path in [&outputs.las, &outputs.ply].into_iter().flatten() {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
    }

    info!("Classifying {}...", args.input.display());

    let summary = run_las(&args.input, &outputs, labels, &config, &CancelToken::new())
        .with_context(|| format!("classifying {}", args.input.display()))?;

    println!("{summary}");
    if let Some(path) = &outputs.las {
        println!("  las: {}", path.display());
    }
    if let Some(path) = &outputs.ply {
        println!("  ply: {}", path.display());
    }

    if let Some(path) = &args.summary_json {
        let json = serde_json::to_string_pretty(&summary)?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        info!("Summary written to {}", path.display());
    }

    Ok(())
}
