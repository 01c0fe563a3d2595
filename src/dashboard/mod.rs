use std::net::SocketAddr;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::distribution::{
    DistributionJob, Distributor, JobSpec, TargetLog, SYSTEM_ACTOR,
};
use crate::error::DistributeError;

#[derive(Clone)]
pub struct DashboardState {
    pub distributor: Distributor,
}

#[derive(Serialize)]
struct JobResponse {
    id: String,
    name: String,
    policy: String,
    status: String,
    status_code: u8,
    status_message: Option<String>,
    targets: usize,
    created_by: String,
    modified_by: String,
    created_at: String,
    completed_at: Option<String>,
}

impl From<&DistributionJob> for JobResponse {
    fn from(job: &DistributionJob) -> Self {
        Self {
            id: job.id.to_string(),
            name: job.name.clone(),
            policy: job.policy.to_string(),
            status: job.status.to_string(),
            status_code: job.status.code(),
            status_message: job.status_message.clone(),
            targets: job.targets.len(),
            created_by: job.created_by.clone(),
            modified_by: job.modified_by.clone(),
            created_at: job.created_at.to_rfc3339(),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Serialize)]
struct JobDetailResponse {
    #[serde(flatten)]
    job: JobResponse,
    target_logs: Vec<TargetLog>,
}

#[derive(Deserialize)]
struct SubmitJobRequest {
    #[serde(flatten)]
    spec: JobSpec,
    #[serde(default)]
    actor: Option<String>,
}

#[derive(Serialize)]
struct SubmitJobResponse {
    success: bool,
    job_id: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct CancelParams {
    actor: Option<String>,
}

#[derive(Serialize)]
struct CancelJobResponse {
    success: bool,
    cancelled: bool,
    error: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn status_for(error: &DistributeError) -> StatusCode {
    match error {
        DistributeError::Validation(_) => StatusCode::BAD_REQUEST,
        DistributeError::JobNotFound(_) => StatusCode::NOT_FOUND,
        DistributeError::JobAlreadyExists(_)
        | DistributeError::JobAlreadyRunning(_)
        | DistributeError::JobAlreadyTerminal(_) => StatusCode::CONFLICT,
        DistributeError::StoreFull => StatusCode::SERVICE_UNAVAILABLE,
        DistributeError::Store(_) | DistributeError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(error: DistributeError) -> (StatusCode, Json<ErrorResponse>) {
    (
        status_for(&error),
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/jobs", get(list_jobs_handler).post(submit_job_handler))
        .route("/api/jobs/:id", get(job_handler))
        .route("/api/jobs/:id/cancel", post(cancel_job_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(addr: SocketAddr, state: DashboardState) {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting dashboard server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind dashboard server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "Dashboard server failed");
    }
}

async fn list_jobs_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    match state.distributor.jobs().await {
        Ok(jobs) => {
            let jobs: Vec<JobResponse> = jobs.iter().map(JobResponse::from).collect();
            Json(jobs).into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

async fn job_handler(
    State(state): State<DashboardState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let job = match state.distributor.job(&id).await {
        Ok(job) => job,
        Err(e) => return error_response(e).into_response(),
    };
    match state.distributor.target_logs(&id).await {
        Ok(target_logs) => Json(JobDetailResponse {
            job: JobResponse::from(&job),
            target_logs,
        })
        .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn submit_job_handler(
    State(state): State<DashboardState>,
    Json(payload): Json<SubmitJobRequest>,
) -> impl IntoResponse {
    let actor = payload.actor.as_deref().unwrap_or(SYSTEM_ACTOR);
    match state.distributor.submit(payload.spec, actor).await {
        Ok(job_id) => (
            StatusCode::OK,
            Json(SubmitJobResponse {
                success: true,
                job_id: Some(job_id.to_string()),
                error: None,
            }),
        ),
        Err(e) => (
            status_for(&e),
            Json(SubmitJobResponse {
                success: false,
                job_id: None,
                error: Some(e.to_string()),
            }),
        ),
    }
}

async fn cancel_job_handler(
    State(state): State<DashboardState>,
    Path(id): Path<Uuid>,
    Query(params): Query<CancelParams>,
) -> impl IntoResponse {
    let actor = params.actor.as_deref().unwrap_or(SYSTEM_ACTOR);
    match state.distributor.cancel(&id, actor).await {
        Ok(cancelled) => (
            StatusCode::OK,
            Json(CancelJobResponse {
                success: true,
                cancelled,
                error: None,
            }),
        ),
        Err(e) => (
            status_for(&e),
            Json(CancelJobResponse {
                success: false,
                cancelled: false,
                error: Some(e.to_string()),
            }),
        ),
    }
}
