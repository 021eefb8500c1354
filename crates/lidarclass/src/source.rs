//! Format bridge: sequential chunked access to native point records.
//!
//! The engine only sees [`PointSource`] / [`PointSink`]. LAS/LAZ decoding and
//! encoding is delegated to the `las` crate; [`MemoryCloud`] serves callers
//! that already hold their points.

use las::{point::Classification, Read as LasRead, Write as LasWrite};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Las(#[from] las::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{} has no bytes", .0.display())]
    EmptyFile(PathBuf),

    #[error("source ended after {read} of {declared} declared points")]
    Truncated { read: u64, declared: u64 },

    #[error("classification {0} cannot be stored in this format")]
    InvalidLabel(u8),
}

/// The attributes the engine reads from a record, plus the field it rewrites.
pub trait PointRecord {
    fn position(&self) -> [f64; 3];
    fn intensity(&self) -> u16;
    /// Three 16-bit channels; formats without colour report black.
    fn color(&self) -> [u16; 3];
    fn classification(&self) -> u8;
    fn set_classification(&mut self, label: u8) -> Result<(), BridgeError>;
}

/// Forward-only cursor over a point container.
pub trait PointSource {
    type Record: PointRecord;

    /// Point count declared by the container header.
    fn point_count(&self) -> u64;

    /// Minimum corner of the declared bounds, if the container records one.
    fn bounds_min(&self) -> Option<[f64; 3]> {
        None
    }

    /// Replace `out` with up to `max` next records. Returns 0 at end of data.
    fn read_chunk(&mut self, max: usize, out: &mut Vec<Self::Record>) -> Result<usize, BridgeError>;
}

/// Sequential writer of native records.
pub trait PointSink {
    type Record;

    fn write_chunk(&mut self, records: Vec<Self::Record>) -> Result<(), BridgeError>;

    fn finish(self) -> Result<(), BridgeError>;
}

/// Opens fresh cursors over one input, and sinks that share its schema.
///
/// Every pass opens its own cursor; cursors are never shared between passes.
pub trait Bridge: Sync {
    type Record: PointRecord;
    type Source: PointSource<Record = Self::Record>;
    type Sink: PointSink<Record = Self::Record>;

    fn describe(&self) -> String;

    /// File the cursors read from, if there is one.
    fn input_path(&self) -> Option<&Path> {
        None
    }

    fn open(&self) -> Result<Self::Source, BridgeError>;

    /// Sink carrying `template`'s header/schema, writing to `destination`.
    fn create_sink(&self, template: &Self::Source, destination: &Path) -> Result<Self::Sink, BridgeError>;
}

// ==============================
// === LAS / LAZ             ===
// ==============================

impl PointRecord for las::Point {
    #[inline]
    fn position(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    #[inline]
    fn intensity(&self) -> u16 {
        self.intensity
    }

    #[inline]
    fn color(&self) -> [u16; 3] {
        match self.color {
            Some(c) => [c.red, c.green, c.blue],
            None => [0, 0, 0],
        }
    }

    #[inline]
    fn classification(&self) -> u8 {
        u8::from(self.classification)
    }

    #[inline]
    fn set_classification(&mut self, label: u8) -> Result<(), BridgeError> {
        self.classification =
            Classification::new(label).map_err(|_| BridgeError::InvalidLabel(label))?;
        Ok(())
    }
}

/// A LAS/LAZ file on disk.
#[derive(Debug, Clone)]
pub struct LasFile {
    path: PathBuf,
}

impl LasFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub struct LasSource {
    reader: las::Reader<'static>,
    declared: u64,
}

impl LasSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BridgeError> {
        let path = path.as_ref();

        if fs::metadata(path)?.len() == 0 {
            return Err(BridgeError::EmptyFile(path.to_path_buf()));
        }

        let reader = las::Reader::from_path(path)?;
        let declared = reader.header().number_of_points();

        Ok(Self { reader, declared })
    }

    #[inline]
    pub fn header(&self) -> &las::Header {
        self.reader.header()
    }
}

impl PointSource for LasSource {
    type Record = las::Point;

    #[inline]
    fn point_count(&self) -> u64 {
        self.declared
    }

    fn bounds_min(&self) -> Option<[f64; 3]> {
        let min = self.reader.header().bounds().min;
        Some([min.x, min.y, min.z])
    }

    fn read_chunk(&mut self, max: usize, out: &mut Vec<las::Point>) -> Result<usize, BridgeError> {
        out.clear();

        while out.len() < max {
            match self.reader.read() {
                Some(point) => out.push(point?),
                None => break,
            }
        }

        Ok(out.len())
    }
}

pub struct LasSink {
    writer: las::Writer<BufWriter<File>>,
}

impl LasSink {
    /// New file with `header`'s version, point format, transforms and VLRs.
    pub fn create<P: AsRef<Path>>(path: P, header: las::Header) -> Result<Self, BridgeError> {
        let writer = las::Writer::from_path(path, header)?;
        Ok(Self { writer })
    }
}

impl PointSink for LasSink {
    type Record = las::Point;

    fn write_chunk(&mut self, records: Vec<las::Point>) -> Result<(), BridgeError> {
        for point in records {
            self.writer.write(point)?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<(), BridgeError> {
        // Point count and bounds in the header are patched on close.
        self.writer.close()?;
        Ok(())
    }
}

impl Bridge for LasFile {
    type Record = las::Point;
    type Source = LasSource;
    type Sink = LasSink;

    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn input_path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn open(&self) -> Result<LasSource, BridgeError> {
        LasSource::open(&self.path)
    }

    fn create_sink(&self, template: &LasSource, destination: &Path) -> Result<LasSink, BridgeError> {
        LasSink::create(destination, template.header().clone())
    }
}

// ==============================
// === In-memory             ===
// ==============================

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MemoryPoint {
    pub position: [f64; 3],
    pub intensity: u16,
    pub color: [u16; 3],
    pub classification: u8,
}

impl PointRecord for MemoryPoint {
    #[inline]
    fn position(&self) -> [f64; 3] {
        self.position
    }

    #[inline]
    fn intensity(&self) -> u16 {
        self.intensity
    }

    #[inline]
    fn color(&self) -> [u16; 3] {
        self.color
    }

    #[inline]
    fn classification(&self) -> u8 {
        self.classification
    }

    #[inline]
    fn set_classification(&mut self, label: u8) -> Result<(), BridgeError> {
        self.classification = label;
        Ok(())
    }
}

/// Points held in memory. Sinks append to a shared output buffer.
#[derive(Debug, Clone)]
pub struct MemoryCloud {
    points: Arc<[MemoryPoint]>,
    declared: u64,
    output: Arc<Mutex<Vec<MemoryPoint>>>,
}

impl MemoryCloud {
    pub fn new(points: Vec<MemoryPoint>) -> Self {
        let declared = points.len() as u64;
        Self {
            points: points.into(),
            declared,
            output: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Declare a point count that differs from the data, as a damaged header would.
    pub fn with_declared_count(mut self, declared: u64) -> Self {
        self.declared = declared;
        self
    }

    #[inline]
    pub fn points(&self) -> &[MemoryPoint] {
        &self.points
    }

    /// Everything written through this cloud's sinks so far.
    pub fn written(&self) -> Vec<MemoryPoint> {
        match self.output.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

pub struct MemorySource {
    points: Arc<[MemoryPoint]>,
    declared: u64,
    cursor: usize,
}

impl PointSource for MemorySource {
    type Record = MemoryPoint;

    #[inline]
    fn point_count(&self) -> u64 {
        self.declared
    }

    fn bounds_min(&self) -> Option<[f64; 3]> {
        let mut min = [f64::INFINITY; 3];
        for p in self.points.iter() {
            for axis in 0..3 {
                min[axis] = min[axis].min(p.position[axis]);
            }
        }

        min.iter().all(|v| v.is_finite()).then_some(min)
    }

    fn read_chunk(&mut self, max: usize, out: &mut Vec<MemoryPoint>) -> Result<usize, BridgeError> {
        out.clear();
        let end = (self.cursor + max).min(self.points.len());
        out.extend_from_slice(&self.points[self.cursor..end]);
        self.cursor = end;
        Ok(out.len())
    }
}

pub struct MemorySink {
    buffer: Vec<MemoryPoint>,
    output: Arc<Mutex<Vec<MemoryPoint>>>,
}

impl PointSink for MemorySink {
    type Record = MemoryPoint;

    fn write_chunk(&mut self, records: Vec<MemoryPoint>) -> Result<(), BridgeError> {
        self.buffer.extend(records);
        Ok(())
    }

    fn finish(self) -> Result<(), BridgeError> {
        let mut output = match self.output.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *output = self.buffer;
        Ok(())
    }
}

impl Bridge for MemoryCloud {
    type Record = MemoryPoint;
    type Source = MemorySource;
    type Sink = MemorySink;

    fn describe(&self) -> String {
        format!("memory ({} points)", self.points.len())
    }

    fn open(&self) -> Result<MemorySource, BridgeError> {
        Ok(MemorySource {
            points: self.points.clone(),
            declared: self.declared,
            cursor: 0,
        })
    }

    fn create_sink(&self, _template: &MemorySource, _destination: &Path) -> Result<MemorySink, BridgeError> {
        Ok(MemorySink {
            buffer: Vec::new(),
            output: self.output.clone(),
        })
    }
}

/// Read back the classification field of every point, in file order.
pub fn read_classification<S: PointSource>(source: &mut S, chunk_size: usize) -> Result<Vec<u8>, BridgeError> {
    let mut labels = Vec::with_capacity(source.point_count() as usize);
    let mut records = Vec::new();

    while source.read_chunk(chunk_size.max(1), &mut records)? > 0 {
        labels.extend(records.iter().map(PointRecord::classification));
    }

    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cloud(n: usize) -> MemoryCloud {
        MemoryCloud::new(
            (0..n)
                .map(|i| MemoryPoint {
                    position: [i as f64, 0.0, i as f64 * 0.5],
                    classification: (i % 3) as u8,
                    ..Default::default()
                })
                .collect(),
        )
    }

    #[test]
    fn test_memory_chunks_cover_all_points() {
        let cloud = cloud(10);
        let mut source = cloud.open().unwrap();
        let mut records = Vec::new();
        let mut sizes = Vec::new();

        while source.read_chunk(4, &mut records).unwrap() > 0 {
            sizes.push(records.len());
        }

        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_read_classification_in_order() {
        let cloud = cloud(5);
        let mut source = cloud.open().unwrap();
        let labels = read_classification(&mut source, 2).unwrap();
        assert_eq!(labels, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_memory_bounds_min() {
        let cloud = cloud(3);
        let source = cloud.open().unwrap();
        assert_eq!(source.bounds_min(), Some([0.0, 0.0, 0.0]));
    }

    #[test]
    fn test_las_point_rejects_overlap_class() {
        let mut point = las::Point::default();
        assert!(point.set_classification(12).is_err());
        point.set_classification(25).unwrap();
        assert_eq!(PointRecord::classification(&point), 25);
    }
}
