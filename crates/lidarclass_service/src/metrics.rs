use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};

/// Prometheus collectors for the classification service, shared behind an `Arc`.
pub struct Metrics {
    pub registry: Registry,
    pub jobs_submitted_total: IntCounter,
    pub jobs_completed_total: IntCounter,
    pub jobs_failed_total: IntCounter,
    pub jobs_cancelled_total: IntCounter,
    pub jobs_active: IntGauge,
    /// Points in successfully classified files.
    pub points_classified_total: IntCounter,
    pub job_duration_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("lidarclass".into()), None)?;

        macro_rules! reg {
            ($metric:expr) => {{
                let collector = $metric;
                registry.register(Box::new(collector.clone()))?;
                collector
            }};
        }

        Ok(Self {
            jobs_submitted_total: reg!(IntCounter::new(
                "jobs_submitted_total",
                "Classification jobs accepted"
            )?),
            jobs_completed_total: reg!(IntCounter::new(
                "jobs_completed_total",
                "Classification jobs that finished with both outputs written"
            )?),
            jobs_failed_total: reg!(IntCounter::new(
                "jobs_failed_total",
                "Classification jobs that ended in an error"
            )?),
            jobs_cancelled_total: reg!(IntCounter::new(
                "jobs_cancelled_total",
                "Classification jobs stopped on request"
            )?),
            jobs_active: reg!(IntGauge::new("jobs_active", "Jobs currently processing")?),
            points_classified_total: reg!(IntCounter::new(
                "points_classified_total",
                "Points written by completed jobs"
            )?),
            job_duration_seconds: reg!(Histogram::with_opts(
                HistogramOpts::new("job_duration_seconds", "Wall time of completed jobs")
                    .buckets(vec![1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0])
            )?),
            registry,
        })
    }

    /// `/metrics` in the text exposition format.
    pub fn router(&self) -> Router {
        let registry = self.registry.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let registry = registry.clone();
                async move {
                    let metric_families = registry.gather();
                    let mut buffer = Vec::new();
                    match TextEncoder::new().encode(&metric_families, &mut buffer) {
                        Ok(()) => String::from_utf8_lossy(&buffer).into_owned().into_response(),
                        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
                    }
                }
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collectors_are_prefixed() {
        let metrics = Metrics::new().unwrap();
        metrics.jobs_submitted_total.inc();
        metrics.job_duration_seconds.observe(2.0);

        let names: Vec<String> = metrics
            .registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_owned())
            .collect();

        assert!(names.contains(&"lidarclass_jobs_submitted_total".to_owned()));
        assert!(names.contains(&"lidarclass_job_duration_seconds".to_owned()));
    }
}
