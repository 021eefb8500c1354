//! Pass sequencing: preflight -> stats -> classify -> rewrite / export.

use crate::cancel::CancelToken;
use crate::chunk::PointChunk;
use crate::counts::ClassCounts;
use crate::error::{EngineError, Stage};
use crate::export::{export_to_path, ExportOptions, DEFAULT_COMMENT};
use crate::labels::{LabelBuffer, LabelBufferBuilder};
use crate::progress::Progress;
use crate::rewrite::rewrite;
use crate::rules::{RuleClassifier, RuleSet};
use crate::source::{Bridge, BridgeError, LasFile, PointSource};
use crate::stats::{self, GlobalStats, DEFAULT_SAMPLE_SIZE};
use crate::summary::RunSummary;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

pub const DEFAULT_CHUNK_SIZE: usize = 5_000_000;
pub const DEFAULT_BLOCK_SIZE: usize = 65_536;

/// How the two output passes are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportMode {
    /// Rewrite, then export.
    #[default]
    Sequential,
    /// Rewrite and export at the same time, each on its own cursor.
    Concurrent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub chunk_size: usize,
    pub sample_size: usize,
    /// Split each chunk into blocks classified on the rayon pool.
    pub parallel: bool,
    pub block_size: usize,
    pub export_mode: ExportMode,
    pub ply_comment: String,
    /// Subtract the header's minimum bound from exported positions.
    pub recenter: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            sample_size: DEFAULT_SAMPLE_SIZE,
            parallel: false,
            block_size: DEFAULT_BLOCK_SIZE,
            export_mode: ExportMode::Sequential,
            ply_comment: DEFAULT_COMMENT.to_owned(),
            recenter: false,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.chunk_size == 0 {
            return Err(EngineError::Config("chunk_size must be positive".into()));
        }
        if self.sample_size == 0 {
            return Err(EngineError::Config("sample_size must be positive".into()));
        }
        if self.parallel && self.block_size == 0 {
            return Err(EngineError::Config("block_size must be positive".into()));
        }
        Ok(())
    }
}

/// Where the per-point labels come from.
#[derive(Debug, Clone)]
pub enum LabelSource {
    /// Run the rule classifier over the source.
    Rules(RuleSet),
    /// Raw file of one `u8` per point, file order.
    External(PathBuf),
    /// Labels already in memory, file order.
    Precomputed(Vec<u8>),
}

impl LabelSource {
    pub fn describe(&self) -> String {
        match self {
            LabelSource::Rules(rules) => format!("rules:{}", rules.name),
            LabelSource::External(path) => format!("external:{}", path.display()),
            LabelSource::Precomputed(_) => "precomputed".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outputs {
    pub las: Option<PathBuf>,
    pub ply: Option<PathBuf>,
}

impl Outputs {
    /// `<dir>/<stem>_classified.las` and `.ply`.
    pub fn derived(input: &Path, dir: &Path) -> Self {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "points".to_owned());

        Self {
            las: Some(dir.join(format!("{stem}_classified.las"))),
            ply: Some(dir.join(format!("{stem}_classified.ply"))),
        }
    }

    /// Derived outputs next to the input file.
    pub fn beside(input: &Path) -> Self {
        let dir = input.parent().unwrap_or_else(|| Path::new("."));
        Self::derived(input, dir)
    }

    /// Fails when an output would overwrite `input` or the other output.
    ///
    /// Paths are compared after resolving symlinks and `..`, so two spellings
    /// of one file collide.
    pub fn check_distinct(&self, input: Option<&Path>) -> Result<(), EngineError> {
        let input = input.map(resolve);
        let las = self.las.as_deref().map(|p| (p, resolve(p)));
        let ply = self.ply.as_deref().map(|p| (p, resolve(p)));

        for (kind, output) in [("LAS", &las), ("PLY", &ply)] {
            if let (Some((given, resolved)), Some(input)) = (output, &input) {
                if resolved == input {
                    return Err(EngineError::Config(format!(
                        "{} output {} is the input file",
                        kind,
                        given.display()
                    )));
                }
            }
        }

        if let (Some((given, a)), Some((_, b))) = (&las, &ply) {
            if a == b {
                return Err(EngineError::Config(format!(
                    "LAS and PLY outputs are the same file: {}",
                    given.display()
                )));
            }
        }

        Ok(())
    }
}

/// Canonical `path` if it exists. Otherwise the absolute path with `.` and
/// `..` folded, under its canonical parent when that exists.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }

    let absolute = match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    };
    let mut lexical = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                lexical.pop();
            }
            other => lexical.push(other),
        }
    }

    match (lexical.parent().map(std::fs::canonicalize), lexical.file_name()) {
        (Some(Ok(parent)), Some(name)) => parent.join(name),
        _ => lexical,
    }
}

/// Classify `input` as a LAS/LAZ file.
pub fn run_las(
    input: &Path,
    outputs: &Outputs,
    labels: LabelSource,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<RunSummary, EngineError> {
    run(&LasFile::new(input), outputs, labels, config, cancel)
}

/// Run every pass over `bridge`. Each pass opens its own cursor.
pub fn run<B: Bridge>(
    bridge: &B,
    outputs: &Outputs,
    labels: LabelSource,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<RunSummary, EngineError> {
    config.validate()?;
    if let LabelSource::Rules(rules) = &labels {
        rules.validate().map_err(EngineError::Config)?;
    }
    if outputs.las.is_none() && outputs.ply.is_none() {
        return Err(EngineError::Config("no output requested".into()));
    }
    outputs.check_distinct(bridge.input_path())?;

    let started = Instant::now();
    let source_name = bridge.describe();
    let label_name = labels.describe();

    // preflight
    let total = open(bridge, Stage::Preflight)?.point_count();
    if total == 0 {
        return Err(EngineError::SourceEmpty {
            reason: format!("{} declares zero points", source_name),
        });
    }
    info!("{}: {} points, labels from {}", source_name, total, label_name);

    let (buffer, counts, global) = match labels {
        LabelSource::Rules(rules) => {
            let global = stats::scan(
                &mut open(bridge, Stage::Stats)?,
                config.sample_size,
                config.chunk_size,
                cancel,
            )?;

            let mut classifier = RuleClassifier::new(rules, global);
            if config.parallel {
                classifier = classifier.with_parallel_blocks(config.block_size);
            }

            let (buffer, counts) = classify(&mut open(bridge, Stage::Classify)?, &classifier, config.chunk_size, cancel)?;
            (buffer, counts, Some(global))
        }
        LabelSource::External(path) => {
            let bytes = std::fs::read(&path).map_err(|e| EngineError::SourceRead {
                stage: Stage::Labels,
                offset: 0,
                source: BridgeError::Io(e),
            })?;
            let buffer = LabelBuffer::from_external(bytes, total)?;
            let counts = ClassCounts::from_labels(buffer.as_slice());
            (buffer, counts, None)
        }
        LabelSource::Precomputed(bytes) => {
            let buffer = LabelBuffer::from_external(bytes, total)?;
            let counts = ClassCounts::from_labels(buffer.as_slice());
            (buffer, counts, None)
        }
    };

    for (label, count) in counts.unknown() {
        warn!(
            "label {} is not in the catalog ({} points), reported as Unknown",
            label, count
        );
    }

    let write_las = || -> Result<(), EngineError> {
        match &outputs.las {
            Some(path) => rewrite_to(bridge, &buffer, path, config, cancel),
            None => Ok(()),
        }
    };
    let write_ply = || -> Result<(), EngineError> {
        match &outputs.ply {
            Some(path) => export_to(bridge, &buffer, path, config, cancel),
            None => Ok(()),
        }
    };

    match config.export_mode {
        ExportMode::Sequential => {
            write_las()?;
            write_ply()?;
        }
        ExportMode::Concurrent => {
            let (las, ply) = rayon::join(write_las, write_ply);
            las?;
            ply?;
        }
    }

    let mut summary = RunSummary::new(source_name, label_name, &counts, global, started.elapsed());
    summary.output_las = outputs.las.clone();
    summary.output_ply = outputs.ply.clone();

    info!(
        "done: {} points in {:.1}s ({:.2}M pts/s)",
        summary.total_points,
        summary.elapsed_seconds,
        summary.points_per_second / 1_000_000.0
    );

    Ok(summary)
}

fn open<B: Bridge>(bridge: &B, stage: Stage) -> Result<B::Source, EngineError> {
    bridge.open().map_err(|e| match e {
        BridgeError::EmptyFile(path) => EngineError::SourceEmpty {
            reason: format!("{} has no bytes", path.display()),
        },
        source => EngineError::SourceRead {
            stage,
            offset: 0,
            source,
        },
    })
}

/// Classification pass: one label per point, appended chunk by chunk.
fn classify<S: PointSource>(
    source: &mut S,
    classifier: &RuleClassifier,
    chunk_size: usize,
    cancel: &CancelToken,
) -> Result<(LabelBuffer, ClassCounts), EngineError> {
    let total = source.point_count();
    let mut builder = LabelBufferBuilder::new(total);
    let mut counts = ClassCounts::new();
    let mut progress = Progress::new(Stage::Classify, total);
    let mut records = Vec::new();
    let mut chunk = PointChunk::with_capacity(chunk_size.min(1 << 20));

    loop {
        cancel.check(Stage::Classify, builder.len())?;

        let n = source
            .read_chunk(chunk_size, &mut records)
            .map_err(|source| EngineError::SourceRead {
                stage: Stage::Classify,
                offset: builder.len(),
                source,
            })?;

        if n == 0 {
            break;
        }

        chunk.fill_from(&records);
        let labels = classifier.classify(chunk.view(), &mut counts);
        builder.push_chunk(&labels);

        progress.update(builder.len());
    }

    info!(
        "classify: {} points in {:.1}s",
        builder.len(),
        progress.elapsed().as_secs_f64()
    );

    Ok((builder.finish()?, counts))
}

fn rewrite_to<B: Bridge>(
    bridge: &B,
    labels: &LabelBuffer,
    destination: &Path,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<(), EngineError> {
    let mut source = open(bridge, Stage::Rewrite)?;
    let sink = bridge
        .create_sink(&source, destination)
        .map_err(|source| EngineError::DestinationWrite {
            stage: Stage::Rewrite,
            path: destination.to_path_buf(),
            offset: 0,
            source,
        })?;

    rewrite(&mut source, sink, labels, destination, config.chunk_size, cancel)
        .map(|_| ())
        .map_err(|e| partial(e, destination))
}

fn export_to<B: Bridge>(
    bridge: &B,
    labels: &LabelBuffer,
    destination: &Path,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<(), EngineError> {
    let mut source = open(bridge, Stage::Export)?;
    let origin = match (config.recenter, source.bounds_min()) {
        (true, Some(min)) => min,
        _ => [0.0; 3],
    };
    let options = ExportOptions {
        comment: config.ply_comment.clone(),
        origin,
    };

    export_to_path(&mut source, labels, destination, &options, config.chunk_size, cancel)
        .map(|_| ())
        .map_err(|e| partial(e, destination))
}

fn partial(e: EngineError, destination: &Path) -> EngineError {
    warn!("{}; partial output may remain at {}", e, destination.display());
    e
}

/// Stats only, for callers that want the extent without classifying.
pub fn scan_stats<B: Bridge>(bridge: &B, config: &PipelineConfig, cancel: &CancelToken) -> Result<GlobalStats, EngineError> {
    config.validate()?;
    let mut source = open(bridge, Stage::Stats)?;
    if source.point_count() == 0 {
        return Err(EngineError::SourceEmpty {
            reason: format!("{} declares zero points", bridge.describe()),
        });
    }
    stats::scan(&mut source, config.sample_size, config.chunk_size, cancel)
}
