use axum::body::Body;
use axum::extract::{rejection::JsonRejection, Json, Multipart, Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::lifecycle::{
    self, DocumentMetadataUpdate, HistoryEntry, NewSubmission, Period, ReviewDecision, StoredFile,
};
use crate::models::Document;
use crate::query::{self, DocumentDetail, DocumentFilter, DocumentStats, RawDocumentQuery};
use crate::schema::documents;
use crate::state::AppState;
use crate::storage::StorageError;
use crate::upload::{format_file_size, month_name, normalize_content_type};

const FILE_NOT_FOUND: &str = "file not found";

fn content_disposition(disposition: &str, filename: &str) -> Option<String> {
    if filename.is_empty() {
        return None;
    }

    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            c if !c.is_ascii() || c.is_ascii_control() => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(filename, percent_encoding::NON_ALPHANUMERIC);
    Some(format!(
        "{disposition}; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized, encoded
    ))
}

/// Width of `documents.file_name`.
const MAX_STORED_NAME_LEN: usize = 255;
/// Longest extension kept when a stored name has to be shortened.
const MAX_KEPT_EXTENSION_LEN: usize = 16;

/// `{epoch millis}_{name}` with anything outside a conservative character
/// set replaced, so the name is safe inside a storage key. Long names are
/// cut to fit the column, keeping the extension.
fn stored_file_name(original: &str, now: DateTime<Utc>) -> String {
    let base = original.rsplit(['/', '\\']).next().unwrap_or(original).trim();
    let mut sanitized: String = base
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.trim_matches('.').is_empty() {
        sanitized = "file".to_string();
    }

    let prefix = format!("{}_", now.timestamp_millis());
    let budget = MAX_STORED_NAME_LEN.saturating_sub(prefix.len());
    if sanitized.len() > budget {
        // sanitized is pure ASCII, so byte offsets are char boundaries
        let extension = sanitized
            .rfind('.')
            .map(|idx| &sanitized[idx..])
            .filter(|ext| ext.len() <= MAX_KEPT_EXTENSION_LEN)
            .unwrap_or_default()
            .to_string();
        sanitized.truncate(budget - extension.len());
        sanitized.push_str(&extension);
    }
    format!("{prefix}{sanitized}")
}

pub(crate) fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub id: i64,
    pub user_id: i64,
    pub user_name: Option<String>,
    pub document_type_id: i64,
    pub document_type_name: Option<String>,
    pub title: String,
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub file_size_label: String,
    pub mime_type: String,
    pub month_period: i32,
    pub month_name: Option<&'static str>,
    pub year_period: i32,
    pub status: String,
    pub notes: Option<String>,
    pub admin_notes: Option<String>,
    pub reviewed_by: Option<i64>,
    pub reviewed_by_name: Option<String>,
    pub reviewed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<DocumentDetail> for DocumentResponse {
    fn from(detail: DocumentDetail) -> Self {
        let DocumentDetail {
            document,
            document_type_name,
            owner_name,
            reviewer_name,
        } = detail;

        Self {
            id: document.id,
            user_id: document.user_id,
            user_name: owner_name,
            document_type_id: document.document_type_id,
            document_type_name,
            title: document.title,
            file_name: document.file_name,
            file_path: document.file_path,
            file_size: document.file_size,
            file_size_label: format_file_size(document.file_size.max(0) as u64),
            mime_type: document.mime_type,
            month_period: document.month_period,
            month_name: month_name(document.month_period),
            year_period: document.year_period,
            status: document.status,
            notes: document.notes,
            admin_notes: document.admin_notes,
            reviewed_by: document.reviewed_by,
            reviewed_by_name: reviewer_name,
            reviewed_at: document.reviewed_at.map(to_iso),
            created_at: to_iso(document.created_at),
            updated_at: to_iso(document.updated_at),
        }
    }
}

#[derive(Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentResponse>,
    pub total: i64,
}

#[derive(Serialize)]
pub struct DocumentDetailResponse {
    pub document: DocumentResponse,
}

#[derive(Serialize)]
pub struct CreatedDocumentResponse {
    pub document_id: i64,
    /// Public URL of the stored file when the storage backend exposes one.
    pub locator: Option<String>,
    pub document: DocumentResponse,
}

#[derive(Serialize)]
pub struct HistoryEntryResponse {
    pub id: i64,
    pub action: String,
    pub old_status: Option<String>,
    pub new_status: String,
    pub notes: Option<String>,
    pub user_id: i64,
    pub user_name: String,
    pub created_at: String,
}

impl From<HistoryEntry> for HistoryEntryResponse {
    fn from(entry: HistoryEntry) -> Self {
        let record = entry.record;
        Self {
            id: record.id,
            action: record.action,
            old_status: record.old_status,
            new_status: record.new_status,
            notes: record.notes,
            user_id: record.user_id,
            user_name: entry.actor_name,
            created_at: to_iso(record.created_at),
        }
    }
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub history: Vec<HistoryEntryResponse>,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub stats: DocumentStats,
}

#[derive(Deserialize)]
pub struct StatsQuery {
    pub user_id: Option<String>,
}

#[derive(Deserialize)]
pub struct FileQuery {
    pub download: Option<String>,
}

#[derive(Deserialize)]
pub struct ReviewRequest {
    pub decision: String,
    pub admin_notes: Option<String>,
}

/// Non-admins may only look at their own documents. Anything else is
/// reported as missing so that ids of other users' documents do not leak.
fn ensure_visible(user: &AuthenticatedUser, document: &Document) -> AppResult<()> {
    if user.is_admin() || document.user_id == user.user_id {
        Ok(())
    } else {
        Err(AppError::not_found_with("document not found"))
    }
}

fn load_visible_document(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    document_id: i64,
) -> AppResult<Document> {
    let document: Document = documents::table
        .find(document_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_with("document not found"))?;
    ensure_visible(user, &document)?;
    Ok(document)
}

fn json_payload<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::bad_request(rejection.body_text()))
}

pub async fn list_documents(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<RawDocumentQuery>,
) -> AppResult<Json<DocumentListResponse>> {
    let mut filter = DocumentFilter::from_params(&params)?;

    if !user.is_admin() {
        match filter.owner_id {
            None => filter.owner_id = Some(user.user_id),
            Some(owner_id) if owner_id != user.user_id => return Err(AppError::forbidden()),
            Some(_) => {}
        }
    }

    let mut conn = state.db()?;
    let page = query::list_documents(&mut conn, &filter)?;

    Ok(Json(DocumentListResponse {
        documents: page.documents.into_iter().map(Into::into).collect(),
        total: page.total,
    }))
}

#[derive(Default)]
struct UploadForm {
    document_type_id: Option<String>,
    title: Option<String>,
    month_period: Option<String>,
    year_period: Option<String>,
    notes: Option<String>,
    file_name: Option<String>,
    content_type: Option<String>,
    bytes: Option<Bytes>,
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> AppError {
    warn!(error = %err, "invalid multipart data");
    AppError::new(err.status(), err.body_text())
}

fn required_number<T: std::str::FromStr>(field: &'static str, value: Option<&str>) -> AppResult<T> {
    let raw = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::bad_request(format!("{field} is required")))?;
    raw.parse()
        .map_err(|_| AppError::bad_request(format!("{field} must be a number, got '{raw}'")))
}

async fn read_upload_form(mut multipart: Multipart) -> AppResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                form.file_name = field.file_name().map(|n| n.to_string());
                form.content_type = field.content_type().map(|mime| mime.to_string());
                form.bytes = Some(field.bytes().await.map_err(multipart_error)?);
            }
            Some("document_type_id") => {
                form.document_type_id = Some(field.text().await.map_err(multipart_error)?)
            }
            Some("title") => form.title = Some(field.text().await.map_err(multipart_error)?),
            Some("month_period") => {
                form.month_period = Some(field.text().await.map_err(multipart_error)?)
            }
            Some("year_period") => {
                form.year_period = Some(field.text().await.map_err(multipart_error)?)
            }
            Some("notes") => form.notes = Some(field.text().await.map_err(multipart_error)?),
            _ => {}
        }
    }

    Ok(form)
}

pub async fn create_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<CreatedDocumentResponse>)> {
    let form = read_upload_form(multipart).await?;

    let document_type_id: i64 =
        required_number("document_type_id", form.document_type_id.as_deref())?;
    let month: i32 = required_number("month_period", form.month_period.as_deref())?;
    let year: i32 = required_number("year_period", form.year_period.as_deref())?;
    let title = lifecycle::normalize_title(form.title.as_deref().unwrap_or_default())?;
    let period = Period::new(month, year)?;

    let bytes = form.bytes.ok_or_else(|| {
        warn!("upload rejected: missing file field");
        AppError::bad_request("file field is required")
    })?;
    if bytes.is_empty() {
        warn!("upload rejected: empty file payload");
        return Err(AppError::bad_request("file field must not be empty"));
    }
    let original_name = form
        .file_name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("filename is required"))?;
    let content_type = form
        .content_type
        .map(|ct| normalize_content_type(&ct))
        .unwrap_or_else(|| "application/octet-stream".to_string());

    if let Err(rejection) = state.upload_policy.validate(&content_type, bytes.len() as u64) {
        warn!(
            user_id = user.user_id,
            original_name = %original_name,
            error = %rejection,
            "upload rejected"
        );
        return Err(rejection.into());
    }

    {
        let mut conn = state.db()?;
        lifecycle::ensure_active_document_type(&mut conn, document_type_id)?;
    }

    let file_name = stored_file_name(&original_name, Utc::now());
    let key = format!("uploads/{}/{}", Uuid::new_v4(), file_name);
    let size_bytes = bytes.len() as i64;

    state
        .storage
        .put_object(&key, bytes, Some(content_type.clone()))
        .await
        .map_err(|err| {
            error!(error = %err, key = %key, "failed to store document");
            AppError::from(err)
        })?;

    let submission = NewSubmission {
        owner_id: user.user_id,
        document_type_id,
        title,
        period,
        file: StoredFile {
            file_name,
            locator: key.clone(),
            size_bytes,
            mime_type: content_type,
        },
        notes: form.notes,
    };

    let created = state.db().and_then(|mut conn| {
        let document = lifecycle::create_document(&mut conn, submission)?;
        Ok(lifecycle::get_document(&mut conn, document.id)?)
    });

    let detail = match created {
        Ok(detail) => detail,
        Err(err) => {
            if let Err(cleanup) = state.storage.delete_object(&key).await {
                error!(
                    error = %cleanup,
                    key = %key,
                    "failed to remove blob after rejected submission"
                );
            }
            return Err(err);
        }
    };

    info!(
        document_id = detail.document.id,
        user_id = user.user_id,
        period = %format!(
            "{} {}",
            month_name(period.month()).unwrap_or_default(),
            period.year()
        ),
        size = %format_file_size(size_bytes as u64),
        "document upload succeeded"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreatedDocumentResponse {
            document_id: detail.document.id,
            locator: state.storage.public_url(&key),
            document: detail.into(),
        }),
    ))
}

pub async fn document_stats(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<StatsQuery>,
) -> AppResult<Json<StatsResponse>> {
    let raw = RawDocumentQuery {
        user_id: params.user_id,
        ..RawDocumentQuery::default()
    };
    let owner_id = DocumentFilter::from_params(&raw)?
        .owner_id
        .unwrap_or(user.user_id);

    if owner_id != user.user_id && !user.is_admin() {
        return Err(AppError::forbidden());
    }

    let mut conn = state.db()?;
    let stats = query::document_stats(&mut conn, owner_id)?;
    Ok(Json(StatsResponse { stats }))
}

pub async fn get_document(
    State(state): State<AppState>,
    Path(document_id): Path<i64>,
    user: AuthenticatedUser,
) -> AppResult<Json<DocumentDetailResponse>> {
    let mut conn = state.db()?;
    let detail = lifecycle::get_document(&mut conn, document_id)?;
    ensure_visible(&user, &detail.document)?;

    Ok(Json(DocumentDetailResponse {
        document: detail.into(),
    }))
}

pub async fn update_document(
    State(state): State<AppState>,
    Path(document_id): Path<i64>,
    user: AuthenticatedUser,
    payload: Result<Json<DocumentMetadataUpdate>, JsonRejection>,
) -> AppResult<Json<DocumentDetailResponse>> {
    user.require_admin()?;
    let update = json_payload(payload)?;

    let mut conn = state.db()?;
    let document = lifecycle::update_metadata(&mut conn, document_id, user.user_id, update)?;
    info!(document_id, actor_id = user.user_id, "document metadata updated");
    let detail = lifecycle::get_document(&mut conn, document.id)?;

    Ok(Json(DocumentDetailResponse {
        document: detail.into(),
    }))
}

pub async fn review_document(
    State(state): State<AppState>,
    Path(document_id): Path<i64>,
    user: AuthenticatedUser,
    payload: Result<Json<ReviewRequest>, JsonRejection>,
) -> AppResult<Json<DocumentDetailResponse>> {
    user.require_admin()?;
    let request = json_payload(payload)?;
    let decision: ReviewDecision = request
        .decision
        .parse()
        .map_err(|_| AppError::bad_request("decision must be 'approved' or 'rejected'"))?;

    let mut conn = state.db()?;
    let document = lifecycle::review_document(
        &mut conn,
        document_id,
        user.user_id,
        decision,
        request.admin_notes,
    )?;
    let detail = lifecycle::get_document(&mut conn, document.id)?;

    Ok(Json(DocumentDetailResponse {
        document: detail.into(),
    }))
}

pub async fn document_history(
    State(state): State<AppState>,
    Path(document_id): Path<i64>,
    user: AuthenticatedUser,
) -> AppResult<Json<HistoryResponse>> {
    let mut conn = state.db()?;
    load_visible_document(&mut conn, &user, document_id)?;
    let entries = lifecycle::load_history(&mut conn, document_id)?;

    Ok(Json(HistoryResponse {
        history: entries.into_iter().map(Into::into).collect(),
    }))
}

pub async fn document_file(
    State(state): State<AppState>,
    Path(document_id): Path<i64>,
    user: AuthenticatedUser,
    Query(params): Query<FileQuery>,
) -> AppResult<Response> {
    let document = {
        let mut conn = state.db()?;
        let found: Option<Document> = documents::table
            .find(document_id)
            .first(&mut conn)
            .optional()?;
        match found {
            Some(document) => document,
            None => {
                info!(document_id, "document row missing");
                return Err(AppError::not_found_with(FILE_NOT_FOUND));
            }
        }
    };

    if ensure_visible(&user, &document).is_err() {
        info!(document_id, user_id = user.user_id, "document row missing");
        return Err(AppError::not_found_with(FILE_NOT_FOUND));
    }

    let bytes = match state.storage.get_object(&document.file_path).await {
        Ok(bytes) => bytes,
        Err(StorageError::NotFound(key)) => {
            warn!(document_id, key = %key, "blob missing for document");
            return Err(AppError::not_found_with(FILE_NOT_FOUND));
        }
        Err(err) => {
            error!(document_id, error = %err, "failed to read document blob");
            return Err(err.into());
        }
    };

    let as_attachment = params
        .download
        .as_deref()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let disposition = if as_attachment { "attachment" } else { "inline" };

    let mut response = Response::new(Body::from(bytes));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&document.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Some(value) = content_disposition(disposition, &document.file_name) {
        let value = HeaderValue::from_str(&value).map_err(AppError::internal)?;
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response.into_response())
}
