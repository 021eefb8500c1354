//! Second streaming pass: copy every record, replacing only its classification.

use crate::cancel::CancelToken;
use crate::error::{EngineError, Stage};
use crate::labels::LabelBuffer;
use crate::progress::Progress;
use crate::source::{PointRecord, PointSink, PointSource};
use log::info;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteReport {
    pub points_written: u64,
    pub chunks: u64,
}

/// Stream `source` into `sink` with labels from `labels`.
///
/// The label offset advances by exactly each chunk's size. A chunk that would
/// run past the label buffer, or a source that ends before it, is a
/// `ChunkAlignment` fault raised before that chunk is written. On any error
/// the sink is dropped unfinished and whatever reached `destination` stays
/// there for the caller to inspect or remove.
pub fn rewrite<S, K>(
    source: &mut S,
    mut sink: K,
    labels: &LabelBuffer,
    destination: &Path,
    chunk_size: usize,
    cancel: &CancelToken,
) -> Result<RewriteReport, EngineError>
where
    S: PointSource,
    K: PointSink<Record = S::Record>,
{
    let total = source.point_count();

    if labels.len() != total {
        return Err(EngineError::ChunkAlignment {
            stage: Stage::Rewrite,
            offset: 0,
            detail: format!("{} labels for {} declared points", labels.len(), total),
        });
    }

    let mut progress = Progress::new(Stage::Rewrite, total);
    let mut records = Vec::new();
    let mut offset = 0u64;
    let mut chunks = 0u64;

    loop {
        cancel.check(Stage::Rewrite, offset)?;

        let n = source
            .read_chunk(chunk_size, &mut records)
            .map_err(|source| EngineError::SourceRead {
                stage: Stage::Rewrite,
                offset,
                source,
            })?;

        if n == 0 {
            break;
        }

        let slice = labels
            .aligned(offset, n)
            .ok_or_else(|| EngineError::ChunkAlignment {
                stage: Stage::Rewrite,
                offset,
                detail: format!(
                    "chunk of {} points runs past {} labels",
                    n,
                    labels.len()
                ),
            })?;

        for (i, (record, &label)) in records.iter_mut().zip(slice).enumerate() {
            record
                .set_classification(label)
                .map_err(|source| EngineError::DestinationWrite {
                    stage: Stage::Rewrite,
                    path: destination.to_path_buf(),
                    offset: offset + i as u64,
                    source,
                })?;
        }

        sink.write_chunk(std::mem::take(&mut records))
            .map_err(|source| EngineError::DestinationWrite {
                stage: Stage::Rewrite,
                path: destination.to_path_buf(),
                offset,
                source,
            })?;

        offset += n as u64;
        chunks += 1;
        progress.update(offset);
    }

    if offset != labels.len() {
        return Err(EngineError::ChunkAlignment {
            stage: Stage::Rewrite,
            offset,
            detail: format!("source ended at {} of {} labels", offset, labels.len()),
        });
    }

    sink.finish().map_err(|source| EngineError::DestinationWrite {
        stage: Stage::Rewrite,
        path: destination.to_path_buf(),
        offset,
        source,
    })?;

    info!(
        "rewrite: {} points in {} chunks -> {} ({:.1}s)",
        offset,
        chunks,
        destination.display(),
        progress.elapsed().as_secs_f64()
    );

    Ok(RewriteReport {
        points_written: offset,
        chunks,
    })
}
