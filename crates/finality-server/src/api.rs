use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use finality_core::participant::{GroupId, ParticipantId};
use finality_trial::TrialStatus;

use crate::error::AppError;
use crate::state::AppState;
use crate::trial_loop::TrialCommand;

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    pub cleared: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TestRunRequest {
    pub participant: ParticipantId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TestRunResponse {
    pub group: GroupId,
}

/// Send a command to the trial loop and wait for its reply.
async fn ask<T>(
    state: &AppState,
    command: impl FnOnce(oneshot::Sender<T>) -> TrialCommand,
) -> Result<T, AppError> {
    let (reply, rx) = oneshot::channel();
    state
        .trial
        .send(command(reply))
        .map_err(|_| AppError::ServiceUnavailable("trial loop is not running".to_string()))?;
    rx.await
        .map_err(|_| AppError::ServiceUnavailable("trial loop dropped the request".to_string()))
}

/// POST /api/v1/admin/participants/{id}/reset: lift a permanent failure.
pub async fn reset_participant(
    State(state): State<AppState>,
    Path(participant): Path<ParticipantId>,
) -> Result<Json<ResetResponse>, AppError> {
    let cleared = ask(&state, |reply| TrialCommand::ResetParticipant { participant, reply })
        .await??;
    tracing::info!(participant, cleared, "Admin reset permanent failure");
    Ok(Json(ResetResponse { cleared }))
}

/// POST /api/v1/admin/test-runs: force-start a solo run.
pub async fn start_test_run(
    State(state): State<AppState>,
    Json(req): Json<TestRunRequest>,
) -> Result<(StatusCode, Json<TestRunResponse>), AppError> {
    let participant = req.participant;
    let group = ask(&state, |reply| TrialCommand::StartTestRun { participant, reply }).await??;
    tracing::info!(participant, group, "Admin started test run");
    Ok((StatusCode::CREATED, Json(TestRunResponse { group })))
}

/// GET /api/v1/status: snapshot of every pending and active run.
pub async fn get_status(State(state): State<AppState>) -> Result<Json<TrialStatus>, AppError> {
    let status = ask(&state, |reply| TrialCommand::Status { reply }).await?;
    Ok(Json(status))
}
