use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::errors::ApiError;
use crate::api::SharedOverseer;
use crate::domain::merkle::digest;
use crate::domain::task::{DispatchRecord, DispatchState, Task, TaskId};

/// Request body for dispatching a task
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    /// Caller-assigned id; generated when omitted
    pub id: Option<String>,
    pub payload: String,
}

/// Result an agent reports for a task it finished
#[derive(Debug, Deserialize)]
pub struct CompleteTaskRequest {
    pub result: String,
}

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub id: String,
    pub agent_id: String,
    pub state: DispatchState,
    pub attempts: u32,
    pub deadline: DateTime<Utc>,
    pub payload: String,
    pub result: Option<String>,
    pub result_digest: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&DispatchRecord> for TaskResponse {
    fn from(record: &DispatchRecord) -> Self {
        Self {
            id: record.task_id().to_string(),
            agent_id: record.target_agent().to_string(),
            state: record.state(),
            attempts: record.attempts(),
            deadline: record.deadline(),
            payload: String::from_utf8_lossy(record.task().payload()).into_owned(),
            result: record
                .result()
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned()),
            result_digest: record.result().map(|bytes| hex::encode(digest(bytes))),
            created_at: record.task().creation_time(),
            updated_at: record.updated_at(),
        }
    }
}

fn parse_task_id(raw: String) -> Result<TaskId, ApiError> {
    TaskId::new(raw).map_err(ApiError::bad_request)
}

/// Dispatch a task to an available agent
///
/// POST /api/tasks
pub async fn create_task(
    State(overseer): State<SharedOverseer>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskResponse>), ApiError> {
    let id = match req.id {
        Some(raw) => parse_task_id(raw)?,
        None => TaskId::generate(),
    };
    let task = Task::new(id, req.payload.into_bytes());

    let mut overseer = overseer.lock().await;
    let record = overseer.dispatch(task).await?;

    Ok((StatusCode::ACCEPTED, Json(TaskResponse::from(&record))))
}

/// Get a live or recently finished task
///
/// GET /api/tasks/:id
pub async fn get_task(
    State(overseer): State<SharedOverseer>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, ApiError> {
    let id = parse_task_id(id)?;
    let overseer = overseer.lock().await;
    let record = overseer
        .record(&id)
        .ok_or_else(|| ApiError::not_found(format!("Task not found: {}", id)))?;

    Ok(Json(TaskResponse::from(record)))
}

/// Agent callback confirming receipt
///
/// POST /api/tasks/:id/ack
pub async fn ack_task(
    State(overseer): State<SharedOverseer>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, ApiError> {
    let id = parse_task_id(id)?;
    let record = overseer.lock().await.on_ack(&id)?;
    Ok(Json(TaskResponse::from(&record)))
}

/// Agent callback carrying the task result
///
/// POST /api/tasks/:id/complete
pub async fn complete_task(
    State(overseer): State<SharedOverseer>,
    Path(id): Path<String>,
    Json(req): Json<CompleteTaskRequest>,
) -> Result<Json<TaskResponse>, ApiError> {
    let id = parse_task_id(id)?;
    let record = overseer
        .lock()
        .await
        .on_complete(&id, req.result.into_bytes())?;
    Ok(Json(TaskResponse::from(&record)))
}

/// POST /api/tasks/:id/cancel
pub async fn cancel_task(
    State(overseer): State<SharedOverseer>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, ApiError> {
    let id = parse_task_id(id)?;
    let record = overseer.lock().await.cancel(&id)?;
    Ok(Json(TaskResponse::from(&record)))
}
