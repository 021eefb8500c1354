//! Global statistics pass: vertical extent from a strided sample.

use crate::cancel::CancelToken;
use crate::error::{EngineError, Stage};
use crate::progress::Progress;
use crate::source::{BridgeError, PointRecord, PointSource};
use log::info;
use serde::Serialize;

/// Added to the range wherever it divides, so a flat file stays finite.
pub const RANGE_EPSILON: f64 = 1e-6;

pub const DEFAULT_SAMPLE_SIZE: usize = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GlobalStats {
    pub z_min: f64,
    pub z_max: f64,
    pub z_range: f64,
    pub total_point_count: u64,
    /// Points that contributed to the extent.
    pub sampled: u64,
}

impl GlobalStats {
    /// Extent from explicit elevations. Non-finite values are ignored; if none
    /// remain the extent collapses to zero.
    pub fn from_elevations<I: IntoIterator<Item = f64>>(elevations: I, total_point_count: u64) -> Self {
        let mut fold = ExtentFold::default();
        for z in elevations {
            fold.push(z);
        }
        fold.finish(total_point_count)
    }

    /// Relative height in roughly [0, 1]; points outside the sampled extent
    /// land slightly outside.
    #[inline]
    pub fn z_rel(&self, z: f64) -> f64 {
        (z - self.z_min) / (self.z_range + RANGE_EPSILON)
    }
}

#[derive(Default)]
struct ExtentFold {
    min: Option<f64>,
    max: Option<f64>,
    sampled: u64,
}

impl ExtentFold {
    #[inline]
    fn push(&mut self, z: f64) {
        if !z.is_finite() {
            return;
        }
        self.min = Some(self.min.map_or(z, |m| m.min(z)));
        self.max = Some(self.max.map_or(z, |m| m.max(z)));
        self.sampled += 1;
    }

    fn finish(self, total_point_count: u64) -> GlobalStats {
        let z_min = self.min.unwrap_or(0.0);
        let z_max = self.max.unwrap_or(0.0);

        GlobalStats {
            z_min,
            z_max,
            z_range: z_max - z_min,
            total_point_count,
            sampled: self.sampled,
        }
    }
}

/// Distance between sampled points: `max(1, total / sample_size)`.
#[inline]
pub fn sample_stride(total: u64, sample_size: usize) -> u64 {
    (total / sample_size.max(1) as u64).max(1)
}

/// One forward pass taking every `stride`-th point by global index, so the
/// sample spans the whole file rather than its prefix.
pub fn scan<S: PointSource>(
    source: &mut S,
    sample_size: usize,
    chunk_size: usize,
    cancel: &CancelToken,
) -> Result<GlobalStats, EngineError> {
    let declared = source.point_count();
    let stride = sample_stride(declared, sample_size);

    info!("stats: {} points, sampling every {} (cap {})", declared, stride, sample_size);

    let mut progress = Progress::new(Stage::Stats, declared);
    let mut fold = ExtentFold::default();
    let mut records = Vec::new();
    let mut offset = 0u64;

    loop {
        cancel.check(Stage::Stats, offset)?;

        let n = source
            .read_chunk(chunk_size, &mut records)
            .map_err(|source| EngineError::SourceRead {
                stage: Stage::Stats,
                offset,
                source,
            })?;

        if n == 0 {
            break;
        }

        // First sampled index inside this chunk.
        let mut i = ((stride - offset % stride) % stride) as usize;
        while i < n {
            fold.push(records[i].position()[2]);
            i += stride as usize;
        }

        offset += n as u64;
        progress.update(offset);
    }

    if offset != declared {
        return Err(EngineError::SourceRead {
            stage: Stage::Stats,
            offset,
            source: BridgeError::Truncated {
                read: offset,
                declared,
            },
        });
    }

    let stats = fold.finish(declared);

    info!(
        "stats: z {:.2}..{:.2} (range {:.2} m) from {} samples in {:.1}s",
        stats.z_min,
        stats.z_max,
        stats.z_range,
        stats.sampled,
        progress.elapsed().as_secs_f64()
    );

    Ok(stats)
}
