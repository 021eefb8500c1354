use crate::error::{EngineError, Stage};

/// Append-only label accumulator for the classification pass.
#[derive(Debug)]
pub struct LabelBufferBuilder {
    labels: Vec<u8>,
    expected: u64,
}

impl LabelBufferBuilder {
    pub fn new(expected: u64) -> Self {
        Self {
            labels: Vec::with_capacity(usize::try_from(expected).unwrap_or(0)),
            expected,
        }
    }

    #[inline]
    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.labels.extend_from_slice(chunk);
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.labels.len() as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Seal the buffer. Its length must equal the declared point count.
    pub fn finish(self) -> Result<LabelBuffer, EngineError> {
        LabelBuffer::checked(self.labels, self.expected, Stage::Classify)
    }
}

/// One label per point in file order. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelBuffer {
    labels: Box<[u8]>,
}

impl LabelBuffer {
    /// Labels produced elsewhere (e.g. a learned model), checked against the
    /// declared point count.
    pub fn from_external(labels: Vec<u8>, expected: u64) -> Result<LabelBuffer, EngineError> {
        Self::checked(labels, expected, Stage::Labels)
    }

    fn checked(labels: Vec<u8>, expected: u64, stage: Stage) -> Result<LabelBuffer, EngineError> {
        let actual = labels.len() as u64;
        if actual != expected {
            return Err(EngineError::ChunkAlignment {
                stage,
                offset: actual.min(expected),
                detail: format!("{} labels for {} points", actual, expected),
            });
        }

        Ok(LabelBuffer {
            labels: labels.into_boxed_slice(),
        })
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.labels.len() as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.labels
    }

    /// `[offset, offset + n)`, or `None` if it runs past the end.
    #[inline]
    pub fn aligned(&self, offset: u64, n: usize) -> Option<&[u8]> {
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(n)?;
        self.labels.get(start..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_exact_length() {
        let mut builder = LabelBufferBuilder::new(4);
        builder.push_chunk(&[1, 2]);
        builder.push_chunk(&[6]);
        let err = builder.finish().unwrap_err();
        assert!(matches!(err, EngineError::ChunkAlignment { stage: Stage::Classify, offset: 3, .. }));

        let mut builder = LabelBufferBuilder::new(3);
        builder.push_chunk(&[1, 2]);
        builder.push_chunk(&[6]);
        assert_eq!(builder.finish().unwrap().as_slice(), &[1, 2, 6]);
    }

    #[test]
    fn test_aligned_slices() {
        let labels = LabelBuffer::from_external(vec![1, 2, 3, 4, 5], 5).unwrap();
        assert_eq!(labels.aligned(0, 2), Some(&[1u8, 2][..]));
        assert_eq!(labels.aligned(4, 1), Some(&[5u8][..]));
        assert_eq!(labels.aligned(5, 0), Some(&[0u8; 0][..]));
        assert_eq!(labels.aligned(4, 2), None);
        assert_eq!(labels.aligned(u64::MAX, 1), None);
    }

    #[test]
    fn test_external_length_mismatch() {
        let err = LabelBuffer::from_external(vec![2; 7], 8).unwrap_err();
        assert!(matches!(err, EngineError::ChunkAlignment { stage: Stage::Labels, .. }));
    }
}
