//! Document handlers - apply queued operations and read documents back.

use crate::error::{AppError, Result};
use crate::store::{DocumentTable, StoredDocument};
use axum::http::StatusCode;
use quill_engine::{RemoteOperation, RemoteOutcome};

/// Apply one operation addressed to `document_id`.
///
/// Returns `200` for an applied operation and `409` for a version conflict;
/// the body is the outcome either way.
pub fn handle_apply(
    table: &DocumentTable,
    document_id: &str,
    operation: RemoteOperation,
) -> Result<(StatusCode, RemoteOutcome)> {
    if operation.document_id != document_id || operation.payload.id != document_id {
        return Err(AppError::BadRequest(format!(
            "operation for {} sent to /documents/{document_id}",
            operation.document_id
        )));
    }

    let kind = operation.kind;
    let base_version = operation.base_version;
    let outcome = table.apply(operation);

    match &outcome {
        RemoteOutcome::Applied { version } => {
            tracing::info!(%document_id, %kind, base_version, version, "operation applied");
            Ok((StatusCode::OK, outcome))
        }
        RemoteOutcome::Conflict { remote } => {
            tracing::info!(
                %document_id,
                %kind,
                base_version,
                remote_version = ?remote.as_ref().map(|r| r.version),
                "operation conflicted"
            );
            Ok((StatusCode::CONFLICT, outcome))
        }
        // The table never produces these
        RemoteOutcome::Transient { .. } | RemoteOutcome::Rejected { .. } => {
            Ok((StatusCode::SERVICE_UNAVAILABLE, outcome))
        }
    }
}

/// Current state of a document, tombstones included.
pub fn handle_get(table: &DocumentTable, document_id: &str) -> Result<StoredDocument> {
    table
        .get(document_id)
        .ok_or_else(|| AppError::NotFound(document_id.to_string()))
}
