use crate::source::PointRecord;

/// Struct-of-arrays copy of one chunk's attributes. Buffers are reused
/// between chunks.
#[derive(Debug, Default, Clone)]
pub struct PointChunk {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    pub intensity: Vec<u16>,
    pub color: Vec<[u16; 3]>,
}

impl PointChunk {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            x: Vec::with_capacity(n),
            y: Vec::with_capacity(n),
            z: Vec::with_capacity(n),
            intensity: Vec::with_capacity(n),
            color: Vec::with_capacity(n),
        }
    }

    pub fn fill_from<R: PointRecord>(&mut self, records: &[R]) {
        self.x.clear();
        self.y.clear();
        self.z.clear();
        self.intensity.clear();
        self.color.clear();

        for record in records {
            let [x, y, z] = record.position();
            self.x.push(x);
            self.y.push(y);
            self.z.push(z);
            self.intensity.push(record.intensity());
            self.color.push(record.color());
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.z.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.z.is_empty()
    }

    #[inline]
    pub fn view(&self) -> ChunkView<'_> {
        ChunkView {
            elevation: &self.z,
            intensity: &self.intensity,
            color: &self.color,
        }
    }
}

/// Borrowed classifier inputs for a contiguous run of points.
#[derive(Debug, Clone, Copy)]
pub struct ChunkView<'a> {
    pub elevation: &'a [f64],
    pub intensity: &'a [u16],
    pub color: &'a [[u16; 3]],
}

impl<'a> ChunkView<'a> {
    /// # Panics
    /// If the three columns differ in length.
    pub fn new(elevation: &'a [f64], intensity: &'a [u16], color: &'a [[u16; 3]]) -> Self {
        assert!(
            elevation.len() == intensity.len() && elevation.len() == color.len(),
            "chunk columns differ in length"
        );

        Self {
            elevation,
            intensity,
            color,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.elevation.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.elevation.is_empty()
    }

    #[inline]
    pub fn slice(&self, start: usize, len: usize) -> ChunkView<'a> {
        let end = start + len;
        ChunkView {
            elevation: &self.elevation[start..end],
            intensity: &self.intensity[start..end],
            color: &self.color[start..end],
        }
    }
}
