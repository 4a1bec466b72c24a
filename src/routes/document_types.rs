use axum::{extract::State, Json};

use crate::{
    error::AppResult,
    query::{self, DocumentTypeSummary},
    state::AppState,
};

pub async fn list_document_types(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<DocumentTypeSummary>>> {
    let mut conn = state.db()?;
    let types = query::list_active_document_types(&mut conn)?;
    Ok(Json(types))
}
