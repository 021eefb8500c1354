use crate::jobs::{JobStatus, JobView, Jobs, SubmitError};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::{Bytes, BytesMut};
use lidarclass::RunSummary;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

const DOWNLOAD_BUF: usize = 256 * 1024;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(job_id: &Uuid) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("job {job_id} not found"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        let status = match e {
            SubmitError::OutputDir { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        Self::new(status, e.to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub input_path: PathBuf,
    pub output_path: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    job_id: Uuid,
    status: &'static str,
    output_las: Option<PathBuf>,
    output_ply: Option<PathBuf>,
}

pub fn router(jobs: Arc<Jobs>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/jobs", get(list).post(submit))
        .route("/api/jobs/:id", get(status).delete(cancel))
        .route("/api/jobs/:id/summary", get(summary))
        .route("/api/jobs/:id/download/:kind", get(download))
        .with_state(jobs)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "lidarclass",
    }))
}

async fn submit(
    State(jobs): State<Arc<Jobs>>,
    Json(req): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let view = jobs.submit(req.input_path, req.output_path)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: view.job_id,
            status: "started",
            output_las: view.output_las,
            output_ply: view.output_ply,
        }),
    ))
}

async fn list(State(jobs): State<Arc<Jobs>>) -> Json<Vec<JobView>> {
    Json(jobs.list())
}

async fn status(State(jobs): State<Arc<Jobs>>, Path(job_id): Path<Uuid>) -> Result<Json<JobView>, ApiError> {
    jobs.get(&job_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(&job_id))
}

async fn cancel(
    State(jobs): State<Arc<Jobs>>,
    Path(job_id): Path<Uuid>,
) -> Result<(StatusCode, Json<JobView>), ApiError> {
    let view = jobs.cancel(&job_id).ok_or_else(|| ApiError::not_found(&job_id))?;
    let code = match view.status {
        JobStatus::Processing => StatusCode::ACCEPTED,
        _ => StatusCode::OK,
    };
    Ok((code, Json(view)))
}

/// Job must have completed; otherwise the status decides the error code.
fn completed(view: &JobView) -> Result<(), ApiError> {
    match view.status {
        JobStatus::Completed => Ok(()),
        JobStatus::Processing => Err(ApiError::new(StatusCode::CONFLICT, "job is still processing")),
        JobStatus::Error | JobStatus::Cancelled => Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            view.error.clone().unwrap_or_else(|| "job did not complete".into()),
        )),
    }
}

async fn summary(State(jobs): State<Arc<Jobs>>, Path(job_id): Path<Uuid>) -> Result<Json<RunSummary>, ApiError> {
    let (view, summary) = jobs.summary(&job_id).ok_or_else(|| ApiError::not_found(&job_id))?;
    completed(&view)?;

    summary
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "summary missing"))
}

async fn download(
    State(jobs): State<Arc<Jobs>>,
    Path((job_id, kind)): Path<(Uuid, String)>,
) -> Result<Response, ApiError> {
    let view = jobs.get(&job_id).ok_or_else(|| ApiError::not_found(&job_id))?;
    completed(&view)?;

    let path = match kind.as_str() {
        "las" => view.output_las,
        "ply" => view.output_ply,
        other => {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                format!("unknown output {other:?}, expected las or ply"),
            ))
        }
    }
    .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("job has no {kind} output")))?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| ApiError::new(StatusCode::NOT_FOUND, format!("{}: {e}", path.display())))?;

    let stream = futures::stream::try_unfold(file, |mut file| async move {
        let mut buf = BytesMut::with_capacity(DOWNLOAD_BUF);
        let n = file.read_buf(&mut buf).await?;
        if n == 0 {
            Ok::<Option<(Bytes, tokio::fs::File)>, std::io::Error>(None)
        } else {
            Ok(Some((buf.freeze(), file)))
        }
    });

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{job_id}.{kind}"));

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_owned()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(status: JobStatus, error: Option<&str>) -> JobView {
        JobView {
            job_id: Uuid::new_v4(),
            status,
            input_path: PathBuf::from("in.las"),
            output_las: None,
            output_ply: None,
            error: error.map(str::to_owned),
            created_at_ms: 0,
            finished_at_ms: None,
        }
    }

    #[test]
    fn test_completed_gate() {
        assert!(completed(&view(JobStatus::Completed, None)).is_ok());

        let err = completed(&view(JobStatus::Processing, None)).unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);

        let err = completed(&view(JobStatus::Error, Some("disk full"))).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "disk full");

        let err = completed(&view(JobStatus::Cancelled, None)).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_submit_errors_map_to_bad_request() {
        let err = ApiError::from(SubmitError::BadExtension(PathBuf::from("a.txt")));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("a.txt"));
    }

    #[test]
    fn test_submit_request_output_is_optional() {
        let req: SubmitRequest = serde_json::from_str(r#"{"input_path": "/data/a.las"}"#).unwrap();
        assert_eq!(req.input_path, PathBuf::from("/data/a.las"));
        assert!(req.output_path.is_none());
    }
}
