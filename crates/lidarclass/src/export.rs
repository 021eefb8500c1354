//! Colorized export: labels -> catalog colours -> binary PLY vertices.

use crate::cancel::CancelToken;
use crate::catalog::ColorTable;
use crate::counts::ClassCounts;
use crate::error::{EngineError, Stage};
use crate::labels::LabelBuffer;
use crate::progress::Progress;
use crate::source::{BridgeError, PointRecord, PointSource};
use log::info;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use vizply::{Vertex, VertexWriter};

pub const DEFAULT_COMMENT: &str = "classified by lidarclass";

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub comment: String,
    /// Subtracted from every position before narrowing to f32.
    pub origin: [f64; 3],
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            comment: DEFAULT_COMMENT.to_owned(),
            origin: [0.0; 3],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub vertices: u64,
    /// `(label, count)` for labels the catalog does not know.
    pub unknown_labels: Vec<(u8, u64)>,
}

/// Export `source` with `labels` into `out`, records in source order.
pub fn export<S, W>(
    source: &mut S,
    labels: &LabelBuffer,
    out: W,
    destination: &Path,
    options: &ExportOptions,
    chunk_size: usize,
    cancel: &CancelToken,
) -> Result<ExportReport, EngineError>
where
    S: PointSource,
    W: Write,
{
    let total = source.point_count();
    let write_err = |offset: u64, e: std::io::Error| EngineError::DestinationWrite {
        stage: Stage::Export,
        path: destination.to_path_buf(),
        offset,
        source: BridgeError::Io(e),
    };

    if labels.len() != total {
        return Err(EngineError::ChunkAlignment {
            stage: Stage::Export,
            offset: 0,
            detail: format!("{} labels for {} declared points", labels.len(), total),
        });
    }

    let table = ColorTable::new();
    let [ox, oy, oz] = options.origin;

    let mut writer = VertexWriter::new(out, total, &options.comment).map_err(|e| write_err(0, e))?;
    let mut progress = Progress::new(Stage::Export, total);
    let mut counts = ClassCounts::new();
    let mut records = Vec::new();
    let mut vertices: Vec<Vertex> = Vec::new();
    let mut offset = 0u64;

    loop {
        cancel.check(Stage::Export, offset)?;

        let n = source
            .read_chunk(chunk_size, &mut records)
            .map_err(|source| EngineError::SourceRead {
                stage: Stage::Export,
                offset,
                source,
            })?;

        if n == 0 {
            break;
        }

        let slice = labels
            .aligned(offset, n)
            .ok_or_else(|| EngineError::ChunkAlignment {
                stage: Stage::Export,
                offset,
                detail: format!("chunk of {} points runs past {} labels", n, labels.len()),
            })?;

        vertices.clear();
        vertices.extend(records.iter().zip(slice).map(|(record, &label)| {
            let [x, y, z] = record.position();
            Vertex {
                position: [(x - ox) as f32, (y - oy) as f32, (z - oz) as f32],
                color: table.get(label),
                classification: label,
            }
        }));

        writer.write_vertices(&vertices).map_err(|e| write_err(offset, e))?;
        counts.add_labels(slice);

        offset += n as u64;
        progress.update(offset);
    }

    if offset != labels.len() {
        return Err(EngineError::ChunkAlignment {
            stage: Stage::Export,
            offset,
            detail: format!("source ended at {} of {} labels", offset, labels.len()),
        });
    }

    writer.finish().map_err(|e| write_err(offset, e))?;

    info!(
        "export: {} vertices -> {} ({:.1}s)",
        offset,
        destination.display(),
        progress.elapsed().as_secs_f64()
    );

    Ok(ExportReport {
        vertices: offset,
        unknown_labels: counts.unknown(),
    })
}

/// [`export`] into a new file at `destination`.
pub fn export_to_path<S: PointSource>(
    source: &mut S,
    labels: &LabelBuffer,
    destination: &Path,
    options: &ExportOptions,
    chunk_size: usize,
    cancel: &CancelToken,
) -> Result<ExportReport, EngineError> {
    let file = File::create(destination).map_err(|e| EngineError::DestinationWrite {
        stage: Stage::Export,
        path: destination.to_path_buf(),
        offset: 0,
        source: BridgeError::Io(e),
    })?;

    export(
        source,
        labels,
        BufWriter::new(file),
        destination,
        options,
        chunk_size,
        cancel,
    )
}
