use crate::catalog::Class;

/// Per-label point counts. Reporting only; never feeds a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassCounts {
    counts: [u64; 256],
}

impl ClassCounts {
    pub fn new() -> Self {
        Self { counts: [0; 256] }
    }

    pub fn from_labels(labels: &[u8]) -> Self {
        let mut counts = Self::new();
        counts.add_labels(labels);
        counts
    }

    #[inline]
    pub fn add_labels(&mut self, labels: &[u8]) {
        for &label in labels {
            self.counts[label as usize] += 1;
        }
    }

    pub fn merge(&mut self, other: &ClassCounts) {
        for (dst, src) in self.counts.iter_mut().zip(other.counts.iter()) {
            *dst += *src;
        }
    }

    #[inline]
    pub fn get(&self, label: u8) -> u64 {
        self.counts[label as usize]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Non-zero `(label, count)` pairs in ascending label order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, u64)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, &count)| count > 0)
            .map(|(label, &count)| (label as u8, count))
    }

    /// Labels with points that the catalog does not know.
    pub fn unknown(&self) -> Vec<(u8, u64)> {
        self.iter()
            .filter(|(label, _)| Class::from_id(*label).is_none())
            .collect()
    }
}

impl Default for ClassCounts {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_merge() {
        let mut a = ClassCounts::from_labels(&[1, 2, 2, 6]);
        let b = ClassCounts::from_labels(&[2, 200]);
        a.merge(&b);

        assert_eq!(a.get(2), 3);
        assert_eq!(a.total(), 6);
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![(1, 1), (2, 3), (6, 1), (200, 1)]);
        assert_eq!(a.unknown(), vec![(200, 1)]);
    }
}
