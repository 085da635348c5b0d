// ABOUTME: Webhook handlers that run `backup new` and `dump new`.
// ABOUTME: Success is 204 No Content; a failed launch is 500 with the failure text.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};

use crate::app_state::SharedState;
use crate::launcher::LaunchError;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct WebhookError(#[from] LaunchError);

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "webhook command failed");
        (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct BackupParams {
    /// Present (with any value but `false` or `0`) to request an incremental backup.
    pub incremental: Option<String>,
}

impl BackupParams {
    pub fn is_incremental(&self) -> bool {
        self.incremental
            .as_deref()
            .is_some_and(|v| !matches!(v, "false" | "0"))
    }
}

/// POST /api/webhooks/backup-new
pub async fn backup_new(
    State(state): State<SharedState>,
    Query(params): Query<BackupParams>,
) -> Result<StatusCode, WebhookError> {
    let mut args = vec!["backup", "new"];
    if params.is_incremental() {
        args.push("-i");
    }
    info!(incremental = params.is_incremental(), "backup requested over webhook");
    state.launcher.launch(&args).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/webhooks/dump-new
pub async fn dump_new(State(state): State<SharedState>) -> Result<StatusCode, WebhookError> {
    info!("dump requested over webhook");
    state.launcher.launch(&["dump", "new"]).await?;
    Ok(StatusCode::NO_CONTENT)
}
