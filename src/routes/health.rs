use axum::{extract::State, http::StatusCode, response::Json};
use diesel::connection::SimpleConnection;
use serde_json::json;

use crate::state::AppState;

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let database = match state.pool.get() {
        Ok(mut conn) => conn.batch_execute("SELECT 1").map_err(|err| err.to_string()),
        Err(err) => Err(err.to_string()),
    };

    match database {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "database": "ok" })),
        ),
        Err(err) => {
            tracing::warn!(error = %err, "health check database ping failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "database": "unavailable" })),
            )
        }
    }
}
