use crate::catalog::name_of;
use crate::counts::ClassCounts;
use crate::stats::GlobalStats;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassSummary {
    pub id: u8,
    pub name: &'static str,
    pub count: u64,
    pub percentage: f64,
}

/// Outcome of one completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub source: String,
    pub label_source: String,
    pub total_points: u64,
    /// `None` when labels came from outside the rule classifier.
    pub stats: Option<GlobalStats>,
    /// Sorted by count, largest first.
    pub classes: Vec<ClassSummary>,
    pub elapsed_seconds: f64,
    pub points_per_second: f64,
    pub output_las: Option<PathBuf>,
    pub output_ply: Option<PathBuf>,
}

impl RunSummary {
    pub(crate) fn new(
        source: String,
        label_source: String,
        counts: &ClassCounts,
        stats: Option<GlobalStats>,
        elapsed: Duration,
    ) -> Self {
        let total_points = counts.total();
        let elapsed_seconds = elapsed.as_secs_f64();

        Self {
            source,
            label_source,
            total_points,
            stats,
            classes: class_breakdown(counts),
            elapsed_seconds,
            points_per_second: total_points as f64 / elapsed_seconds.max(1e-9),
            output_las: None,
            output_ply: None,
        }
    }

    pub fn count_of(&self, id: u8) -> u64 {
        self.classes
            .iter()
            .find(|c| c.id == id)
            .map_or(0, |c| c.count)
    }
}

/// Per-label rows sorted by count descending, ties by id.
pub fn class_breakdown(counts: &ClassCounts) -> Vec<ClassSummary> {
    let total = counts.total().max(1) as f64;

    let mut rows: Vec<ClassSummary> = counts
        .iter()
        .map(|(id, count)| ClassSummary {
            id,
            name: name_of(id),
            count,
            percentage: count as f64 / total * 100.0,
        })
        .collect();

    rows.sort_by(|a, b| b.count.cmp(&a.count).then(a.id.cmp(&b.id)));
    rows
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Classification summary ({})", self.label_source)?;
        for row in &self.classes {
            writeln!(
                f,
                "  [{:>3}] {:<20} {:>12} ({:>5.1}%)",
                row.id, row.name, row.count, row.percentage
            )?;
        }
        writeln!(f, "  total points: {}", self.total_points)?;
        if let Some(stats) = &self.stats {
            writeln!(
                f,
                "  elevation: {:.2} .. {:.2} m ({} samples)",
                stats.z_min, stats.z_max, stats.sampled
            )?;
        }
        write!(
            f,
            "  time: {:.1}s ({:.2}M pts/s)",
            self.elapsed_seconds,
            self.points_per_second / 1_000_000.0
        )
    }
}
