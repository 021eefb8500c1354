use crate::metrics::Metrics;
use dashmap::DashMap;
use lidarclass::{run_las, CancelToken, LabelSource, Outputs, PipelineConfig, RuleSet, RunSummary};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Error,
    Cancelled,
}

pub struct JobRecord {
    pub input_path: PathBuf,
    pub outputs: Outputs,
    pub status: JobStatus,
    pub error: Option<String>,
    pub summary: Option<RunSummary>,
    pub created_at_ms: i64,
    pub finished_at_ms: Option<i64>,
    cancel: CancelToken,
}

/// Status payload for a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub input_path: PathBuf,
    pub output_las: Option<PathBuf>,
    pub output_ply: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<i64>,
}

impl JobRecord {
    fn view(&self, job_id: Uuid) -> JobView {
        JobView {
            job_id,
            status: self.status,
            input_path: self.input_path.clone(),
            output_las: self.outputs.las.clone(),
            output_ply: self.outputs.ply.clone(),
            error: self.error.clone(),
            created_at_ms: self.created_at_ms,
            finished_at_ms: self.finished_at_ms,
        }
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("input file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("invalid file type, expected .las or .laz: {}", .0.display())]
    BadExtension(PathBuf),
    #[error("input file is empty: {}", .0.display())]
    Empty(PathBuf),
    #[error("{0}")]
    Outputs(String),
    #[error("cannot prepare output directory {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct JobSettings {
    pub output_dir: PathBuf,
    pub pipeline: PipelineConfig,
    pub rules: RuleSet,
    /// Jobs allowed on the blocking pool at once; the rest wait their turn.
    pub max_concurrent: usize,
    /// Finished jobs are dropped from the table this long after they end.
    pub retention: Duration,
}

/// Live and finished jobs, keyed by id.
pub struct Jobs {
    table: DashMap<Uuid, JobRecord>,
    settings: JobSettings,
    permits: Arc<Semaphore>,
    metrics: Arc<Metrics>,
}

impl Jobs {
    pub fn new(settings: JobSettings, metrics: Arc<Metrics>) -> Arc<Self> {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));
        Arc::new(Self {
            table: DashMap::new(),
            settings,
            permits,
            metrics,
        })
    }

    /// Validate the request, register the job and start it on the blocking pool.
    pub fn submit(self: &Arc<Self>, input: PathBuf, output: Option<PathBuf>) -> Result<JobView, SubmitError> {
        check_input(&input)?;

        let outputs = match output {
            Some(las) => Outputs {
                ply: Some(las.with_extension("ply")),
                las: Some(las),
            },
            None => Outputs::derived(&input, &self.settings.output_dir),
        };
        outputs
            .check_distinct(Some(input.as_path()))
            .map_err(|e| SubmitError::Outputs(e.to_string()))?;
        for path in [&outputs.las, &outputs.ply].into_iter().flatten() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|source| SubmitError::OutputDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let job_id = Uuid::new_v4();
        let cancel = CancelToken::new();
        let record = JobRecord {
            input_path: input.clone(),
            outputs: outputs.clone(),
            status: JobStatus::Processing,
            error: None,
            summary: None,
            created_at_ms: chrono::Utc::now().timestamp_millis(),
            finished_at_ms: None,
            cancel: cancel.clone(),
        };
        let view = record.view(job_id);
        self.prune();
        self.table.insert(job_id, record);

        self.metrics.jobs_submitted_total.inc();
        self.metrics.jobs_active.inc();
        tracing::info!(job_id = %job_id, input = %input.display(), "Job started");

        let jobs = self.clone();
        let labels = LabelSource::Rules(self.settings.rules.clone());
        let config = self.settings.pipeline.clone();
        tokio::spawn(async move {
            let permit = match jobs.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    jobs.finish(job_id, JobStatus::Error, Some(format!("worker pool closed: {e}")));
                    jobs.metrics.jobs_failed_total.inc();
                    return;
                }
            };

            let started = Instant::now();
            let result = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                run_las(&input, &outputs, labels, &config, &cancel)
            })
            .await;

            match result {
                Ok(Ok(summary)) => jobs.complete(job_id, summary, started),
                Ok(Err(e)) => jobs.fail(job_id, e),
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Job worker panicked");
                    jobs.finish(job_id, JobStatus::Error, Some(format!("worker failed: {e}")));
                    jobs.metrics.jobs_failed_total.inc();
                }
            }
        });

        Ok(view)
    }

    fn complete(&self, job_id: Uuid, summary: RunSummary, started: Instant) {
        self.metrics.jobs_completed_total.inc();
        self.metrics.points_classified_total.inc_by(summary.total_points);
        self.metrics
            .job_duration_seconds
            .observe(started.elapsed().as_secs_f64());

        tracing::info!(
            job_id = %job_id,
            points = summary.total_points,
            seconds = summary.elapsed_seconds,
            "Job completed"
        );

        if let Some(mut record) = self.table.get_mut(&job_id) {
            record.summary = Some(summary);
        }
        self.finish(job_id, JobStatus::Completed, None);
    }

    fn fail(&self, job_id: Uuid, e: lidarclass::EngineError) {
        if e.is_cancelled() {
            self.metrics.jobs_cancelled_total.inc();
            tracing::info!(job_id = %job_id, error = %e, "Job cancelled");
            self.finish(job_id, JobStatus::Cancelled, Some(e.to_string()));
        } else {
            self.metrics.jobs_failed_total.inc();
            tracing::error!(job_id = %job_id, error = %e, "Job failed");
            self.finish(job_id, JobStatus::Error, Some(e.to_string()));
        }
    }

    fn finish(&self, job_id: Uuid, status: JobStatus, error: Option<String>) {
        self.metrics.jobs_active.dec();
        if let Some(mut record) = self.table.get_mut(&job_id) {
            record.status = status;
            record.error = error;
            record.finished_at_ms = Some(chrono::Utc::now().timestamp_millis());
        }
    }

    pub fn get(&self, job_id: &Uuid) -> Option<JobView> {
        self.table.get(job_id).map(|r| r.view(*job_id))
    }

    pub fn list(&self) -> Vec<JobView> {
        self.prune();
        let mut jobs: Vec<JobView> = self.table.iter().map(|r| r.view(*r.key())).collect();
        jobs.sort_by_key(|j| j.created_at_ms);
        jobs
    }

    /// Status together with the summary, if the job has one.
    pub fn summary(&self, job_id: &Uuid) -> Option<(JobView, Option<RunSummary>)> {
        self.table
            .get(job_id)
            .map(|r| (r.view(*job_id), r.summary.clone()))
    }

    /// Request cancellation. Takes effect at the next chunk boundary.
    pub fn cancel(&self, job_id: &Uuid) -> Option<JobView> {
        let record = self.table.get(job_id)?;
        if record.status == JobStatus::Processing {
            record.cancel.cancel();
            tracing::info!(job_id = %job_id, "Cancellation requested");
        }
        Some(record.view(*job_id))
    }

    /// Drop finished jobs older than the retention window.
    fn prune(&self) {
        let now = chrono::Utc::now().timestamp_millis();
        let retention = i64::try_from(self.settings.retention.as_millis()).unwrap_or(i64::MAX);
        let before = self.table.len();

        self.table
            .retain(|_, record| record.finished_at_ms.map_or(true, |at| now.saturating_sub(at) < retention));

        let dropped = before.saturating_sub(self.table.len());
        if dropped > 0 {
            tracing::debug!(dropped, "Pruned finished jobs");
        }
    }

    /// Cancel everything still running.
    pub fn cancel_all(&self) {
        for record in self.table.iter() {
            if record.status == JobStatus::Processing {
                record.cancel.cancel();
            }
        }
    }
}

fn check_input(path: &Path) -> Result<(), SubmitError> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta,
        _ => return Err(SubmitError::NotFound(path.to_path_buf())),
    };

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if ext != "las" && ext != "laz" {
        return Err(SubmitError::BadExtension(path.to_path_buf()));
    }

    if meta.len() == 0 {
        return Err(SubmitError::Empty(path.to_path_buf()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use las::Write;
    use std::time::Duration;

    fn scratch() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lidarclass-service-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn settings(output_dir: &Path) -> JobSettings {
        JobSettings {
            output_dir: output_dir.to_path_buf(),
            pipeline: PipelineConfig {
                chunk_size: 64,
                ..Default::default()
            },
            rules: RuleSet::preset("refined").unwrap(),
            max_concurrent: 2,
            retention: Duration::from_secs(3600),
        }
    }

    fn jobs(output_dir: &Path) -> Arc<Jobs> {
        Jobs::new(settings(output_dir), Arc::new(Metrics::new().unwrap()))
    }

    fn write_las(path: &Path, n: usize) {
        let mut builder = las::Builder::from((1, 2));
        builder.point_format = las::point::Format::new(2).unwrap();
        let mut writer = las::Writer::from_path(path, builder.into_header().unwrap()).unwrap();
        for i in 0..n {
            writer
                .write(las::Point {
                    x: i as f64,
                    y: 0.0,
                    z: (i % 10) as f64,
                    intensity: 30_000,
                    color: Some(las::Color {
                        red: 30_000,
                        green: 30_000,
                        blue: 30_000,
                    }),
                    ..Default::default()
                })
                .unwrap();
        }
        writer.close().unwrap();
    }

    async fn wait(jobs: &Jobs, job_id: &Uuid) -> JobView {
        for _ in 0..500 {
            let view = jobs.get(job_id).unwrap();
            if view.status != JobStatus::Processing {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} did not finish");
    }

    #[tokio::test]
    async fn test_rejects_bad_inputs() {
        let dir = scratch();
        let jobs = jobs(&dir);

        let err = jobs.submit(dir.join("missing.las"), None).unwrap_err();
        assert!(matches!(err, SubmitError::NotFound(_)));

        let txt = dir.join("points.txt");
        std::fs::write(&txt, b"1 2 3").unwrap();
        assert!(matches!(jobs.submit(txt, None).unwrap_err(), SubmitError::BadExtension(_)));

        let empty = dir.join("empty.las");
        std::fs::write(&empty, b"").unwrap();
        assert!(matches!(jobs.submit(empty, None).unwrap_err(), SubmitError::Empty(_)));

        assert!(jobs.list().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_job_completes_with_summary() {
        let dir = scratch();
        let input = dir.join("tile.las");
        write_las(&input, 500);

        let jobs = jobs(&dir.join("out"));
        let view = jobs.submit(input, None).unwrap();
        assert_eq!(view.status, JobStatus::Processing);
        assert_eq!(view.output_las, Some(dir.join("out").join("tile_classified.las")));

        let done = wait(&jobs, &view.job_id).await;
        assert_eq!(done.status, JobStatus::Completed, "{:?}", done.error);

        let (_, summary) = jobs.summary(&view.job_id).unwrap();
        assert_eq!(summary.unwrap().total_points, 500);
        assert!(dir.join("out").join("tile_classified.ply").exists());
        assert_eq!(jobs.metrics.jobs_completed_total.get(), 1);
        assert_eq!(jobs.metrics.jobs_active.get(), 0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let dir = scratch();
        let jobs = jobs(&dir);
        assert!(jobs.get(&Uuid::new_v4()).is_none());
        assert!(jobs.cancel(&Uuid::new_v4()).is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_rejects_colliding_outputs() {
        let dir = scratch();
        let input = dir.join("tile.las");
        write_las(&input, 100);
        let before = std::fs::read(&input).unwrap();
        let jobs = jobs(&dir);

        let err = jobs.submit(input.clone(), Some(input.clone())).unwrap_err();
        assert!(matches!(err, SubmitError::Outputs(_)), "{err}");

        // the PLY output is derived from the LAS name, so a .ply target collides
        let err = jobs.submit(input.clone(), Some(dir.join("x.ply"))).unwrap_err();
        assert!(matches!(err, SubmitError::Outputs(_)), "{err}");

        assert!(jobs.list().is_empty());
        assert_eq!(std::fs::read(&input).unwrap(), before);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_cancelled_job() {
        let dir = scratch();
        let input = dir.join("tile.las");
        write_las(&input, 500);

        let jobs = jobs(&dir.join("out"));
        let view = jobs.submit(input, None).unwrap();
        let requested = jobs.cancel(&view.job_id).unwrap();
        assert_eq!(requested.status, JobStatus::Processing);

        let done = wait(&jobs, &view.job_id).await;
        assert_eq!(done.status, JobStatus::Cancelled, "{:?}", done.error);
        assert!(done.error.is_some());
        assert_eq!(jobs.metrics.jobs_cancelled_total.get(), 1);
        assert_eq!(jobs.metrics.jobs_completed_total.get(), 0);
        assert_eq!(jobs.metrics.jobs_active.get(), 0);

        // cancelling a finished job leaves it as it was
        assert_eq!(jobs.cancel(&view.job_id).unwrap().status, JobStatus::Cancelled);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_jobs_share_limited_permits() {
        let dir = scratch();
        let jobs = Jobs::new(
            JobSettings {
                max_concurrent: 1,
                ..settings(&dir.join("out"))
            },
            Arc::new(Metrics::new().unwrap()),
        );

        let mut ids = Vec::new();
        for name in ["a.las", "b.las", "c.las"] {
            let input = dir.join(name);
            write_las(&input, 200);
            ids.push(jobs.submit(input, None).unwrap().job_id);
        }
        for id in &ids {
            assert_eq!(wait(&jobs, id).await.status, JobStatus::Completed);
        }

        assert_eq!(jobs.metrics.jobs_completed_total.get(), 3);
        assert_eq!(jobs.permits.available_permits(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_finished_jobs_expire() {
        let dir = scratch();
        let input = dir.join("tile.las");
        write_las(&input, 100);

        let jobs = Jobs::new(
            JobSettings {
                retention: Duration::ZERO,
                ..settings(&dir.join("out"))
            },
            Arc::new(Metrics::new().unwrap()),
        );
        let view = jobs.submit(input, None).unwrap();
        assert_eq!(jobs.list().len(), 1);

        assert_eq!(wait(&jobs, &view.job_id).await.status, JobStatus::Completed);
        assert!(jobs.list().is_empty());
        assert!(jobs.get(&view.job_id).is_none());
        std::fs::remove_dir_all(&dir).ok();
    }
}
