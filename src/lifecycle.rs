//! Document review lifecycle.
//!
//! A document enters as `pending` and may be reviewed exactly once into
//! `approved` or `rejected`. Every write that touches a document appends one
//! row to `document_history` inside the same transaction as the change.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDateTime, Utc};
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::{select, PgConnection};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::models::{Document, DocumentHistory, NewDocument, NewDocumentHistory};
use crate::query::{attach_display_names, DocumentDetail};
use crate::schema::{document_history, document_types, documents, users};

pub const UPLOAD_HISTORY_NOTE: &str = "Dokumen berhasil diunggah";

#[derive(Debug, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("document not found")]
    NotFound,
    #[error("user does not exist")]
    UnknownUser,
    #[error("document type does not exist")]
    UnknownDocumentType,
    #[error("document type is not active")]
    InactiveDocumentType,
    #[error("cannot move document from {from} to {to}")]
    InvalidTransition {
        from: DocumentStatus,
        to: DocumentStatus,
    },
    #[error("{0}")]
    Validation(String),
    #[error("no changes provided")]
    NoChanges,
    #[error("stored value is invalid: {0}")]
    Corrupt(#[from] ParseEnumError),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Approved,
    Rejected,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 3] = [
        DocumentStatus::Pending,
        DocumentStatus::Approved,
        DocumentStatus::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Approved => "approved",
            DocumentStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, DocumentStatus::Pending)
    }

    /// Only `pending` documents can be reviewed; terminal states never move.
    pub fn review(self, decision: ReviewDecision) -> LifecycleResult<DocumentStatus> {
        if self.is_terminal() {
            return Err(LifecycleError::InvalidTransition {
                from: self,
                to: decision.status(),
            });
        }
        Ok(decision.status())
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        DocumentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| ParseEnumError::new("status", value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Created,
    Updated,
    Approved,
    Rejected,
}

impl HistoryAction {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryAction::Created => "created",
            HistoryAction::Updated => "updated",
            HistoryAction::Approved => "approved",
            HistoryAction::Rejected => "rejected",
        }
    }
}

impl FromStr for HistoryAction {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "created" => Ok(HistoryAction::Created),
            "updated" => Ok(HistoryAction::Updated),
            "approved" => Ok(HistoryAction::Approved),
            "rejected" => Ok(HistoryAction::Rejected),
            other => Err(ParseEnumError::new("history action", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approved,
    Rejected,
}

impl ReviewDecision {
    pub fn status(self) -> DocumentStatus {
        match self {
            ReviewDecision::Approved => DocumentStatus::Approved,
            ReviewDecision::Rejected => DocumentStatus::Rejected,
        }
    }

    pub fn action(self) -> HistoryAction {
        match self {
            ReviewDecision::Approved => HistoryAction::Approved,
            ReviewDecision::Rejected => HistoryAction::Rejected,
        }
    }
}

impl FromStr for ReviewDecision {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" => Ok(ReviewDecision::Approved),
            "rejected" => Ok(ReviewDecision::Rejected),
            _ => Err(ParseEnumError::new("review decision", value)),
        }
    }
}

/// The (month, year) a submission pertains to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Period {
    month: i32,
    year: i32,
}

impl Period {
    pub fn new(month: i32, year: i32) -> LifecycleResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(LifecycleError::Validation(format!(
                "month_period must be between 1 and 12, got {month}"
            )));
        }
        if !(1000..=9999).contains(&year) {
            return Err(LifecycleError::Validation(format!(
                "year_period must be a four digit year, got {year}"
            )));
        }
        Ok(Self { month, year })
    }

    pub fn month(&self) -> i32 {
        self.month
    }

    pub fn year(&self) -> i32 {
        self.year
    }
}

/// Where the uploaded bytes ended up.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub file_name: String,
    pub locator: String,
    pub size_bytes: i64,
    pub mime_type: String,
}

#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub owner_id: i64,
    pub document_type_id: i64,
    pub title: String,
    pub period: Period,
    pub file: StoredFile,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentMetadataUpdate {
    pub title: Option<String>,
    pub document_type_id: Option<i64>,
    /// An empty string clears the submitter notes.
    pub notes: Option<String>,
}

#[derive(AsChangeset)]
#[diesel(table_name = documents)]
struct MetadataChangeset<'a> {
    title: Option<&'a str>,
    document_type_id: Option<i64>,
    notes: Option<Option<&'a str>>,
    updated_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub record: DocumentHistory,
    pub actor_name: String,
}

impl Document {
    pub fn current_status(&self) -> LifecycleResult<DocumentStatus> {
        Ok(self.status.parse()?)
    }
}

/// Matches the `documents.title` column width.
pub const MAX_TITLE_CHARS: usize = 255;

pub fn normalize_title(title: &str) -> LifecycleResult<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(LifecycleError::Validation(
            "title must not be empty".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_TITLE_CHARS {
        return Err(LifecycleError::Validation(format!(
            "title must be at most {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(trimmed.to_string())
}

pub fn ensure_user_exists(conn: &mut PgConnection, user_id: i64) -> LifecycleResult<()> {
    let found: bool =
        select(exists(users::table.filter(users::id.eq(user_id)))).get_result(conn)?;
    if !found {
        return Err(LifecycleError::UnknownUser);
    }
    Ok(())
}

pub fn ensure_active_document_type(
    conn: &mut PgConnection,
    document_type_id: i64,
) -> LifecycleResult<()> {
    let is_active: Option<bool> = document_types::table
        .find(document_type_id)
        .select(document_types::is_active)
        .first(conn)
        .optional()?;

    match is_active {
        None => Err(LifecycleError::UnknownDocumentType),
        Some(false) => Err(LifecycleError::InactiveDocumentType),
        Some(true) => Ok(()),
    }
}

fn append_history(
    conn: &mut PgConnection,
    document_id: i64,
    actor_id: i64,
    action: HistoryAction,
    old_status: Option<DocumentStatus>,
    new_status: DocumentStatus,
    notes: Option<String>,
) -> LifecycleResult<()> {
    let row = NewDocumentHistory {
        document_id,
        user_id: actor_id,
        action: action.as_str().to_string(),
        old_status: old_status.map(|status| status.as_str().to_string()),
        new_status: new_status.as_str().to_string(),
        notes,
    };

    diesel::insert_into(document_history::table)
        .values(&row)
        .execute(conn)?;
    Ok(())
}

/// Inserts the document as `pending` together with its `created` history row.
pub fn create_document(
    conn: &mut PgConnection,
    submission: NewSubmission,
) -> LifecycleResult<Document> {
    let NewSubmission {
        owner_id,
        document_type_id,
        title,
        period,
        file,
        notes,
    } = submission;

    let title = normalize_title(&title)?;
    let notes = notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    let document = conn.transaction::<Document, LifecycleError, _>(|conn| {
        ensure_user_exists(conn, owner_id)?;
        ensure_active_document_type(conn, document_type_id)?;

        let new_document = NewDocument {
            user_id: owner_id,
            document_type_id,
            title,
            file_name: file.file_name,
            file_path: file.locator,
            file_size: file.size_bytes,
            mime_type: file.mime_type,
            month_period: period.month(),
            year_period: period.year(),
            status: DocumentStatus::Pending.as_str().to_string(),
            notes,
        };

        let document: Document = diesel::insert_into(documents::table)
            .values(&new_document)
            .get_result(conn)?;

        append_history(
            conn,
            document.id,
            owner_id,
            HistoryAction::Created,
            None,
            DocumentStatus::Pending,
            Some(UPLOAD_HISTORY_NOTE.to_string()),
        )?;

        Ok(document)
    })?;

    info!(
        document_id = document.id,
        owner_id,
        document_type_id,
        month = period.month(),
        year = period.year(),
        "document submitted"
    );
    Ok(document)
}

/// Moves a pending document to the reviewer's decision. The row is locked
/// for the duration of the transaction so two reviewers cannot both win.
pub fn review_document(
    conn: &mut PgConnection,
    document_id: i64,
    reviewer_id: i64,
    decision: ReviewDecision,
    admin_notes: Option<String>,
) -> LifecycleResult<Document> {
    let admin_notes = admin_notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    let document = conn.transaction::<Document, LifecycleError, _>(|conn| {
        let current: Document = documents::table
            .find(document_id)
            .for_update()
            .first(conn)
            .optional()?
            .ok_or(LifecycleError::NotFound)?;

        ensure_user_exists(conn, reviewer_id)?;

        let from = current.current_status()?;
        let to = from.review(decision)?;
        let now = Utc::now().naive_utc();

        let updated: Document = diesel::update(documents::table.find(document_id))
            .set((
                documents::status.eq(to.as_str()),
                documents::reviewed_by.eq(Some(reviewer_id)),
                documents::reviewed_at.eq(Some(now)),
                documents::admin_notes.eq(admin_notes.as_deref()),
                documents::updated_at.eq(now),
            ))
            .get_result(conn)?;

        append_history(
            conn,
            document_id,
            reviewer_id,
            decision.action(),
            Some(from),
            to,
            admin_notes.clone(),
        )?;

        Ok(updated)
    })?;

    info!(
        document_id,
        reviewer_id,
        status = %document.status,
        "document reviewed"
    );
    Ok(document)
}

/// Administrative edit of descriptive fields. Status and period never change
/// here; the history row records the unchanged status on both sides.
pub fn update_metadata(
    conn: &mut PgConnection,
    document_id: i64,
    actor_id: i64,
    update: DocumentMetadataUpdate,
) -> LifecycleResult<Document> {
    let title = update.title.as_deref().map(normalize_title).transpose()?;
    let notes = update.notes.as_deref().map(|n| {
        let trimmed = n.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    });

    let mut changed = Vec::new();
    if title.is_some() {
        changed.push("title");
    }
    if update.document_type_id.is_some() {
        changed.push("document_type_id");
    }
    if notes.is_some() {
        changed.push("notes");
    }
    if changed.is_empty() {
        return Err(LifecycleError::NoChanges);
    }

    conn.transaction::<Document, LifecycleError, _>(|conn| {
        let current: Document = documents::table
            .find(document_id)
            .for_update()
            .first(conn)
            .optional()?
            .ok_or(LifecycleError::NotFound)?;

        if let Some(type_id) = update.document_type_id {
            ensure_active_document_type(conn, type_id)?;
        }

        let status = current.current_status()?;
        let changeset = MetadataChangeset {
            title: title.as_deref(),
            document_type_id: update.document_type_id,
            notes,
            updated_at: Utc::now().naive_utc(),
        };

        let updated: Document = diesel::update(documents::table.find(document_id))
            .set(&changeset)
            .get_result(conn)?;

        append_history(
            conn,
            document_id,
            actor_id,
            HistoryAction::Updated,
            Some(status),
            status,
            Some(format!("updated {}", changed.join(", "))),
        )?;

        Ok(updated)
    })
}

pub fn get_document(conn: &mut PgConnection, document_id: i64) -> LifecycleResult<DocumentDetail> {
    let document: Document = documents::table
        .find(document_id)
        .first(conn)
        .optional()?
        .ok_or(LifecycleError::NotFound)?;

    let mut details = attach_display_names(conn, vec![document])?;
    details.pop().ok_or(LifecycleError::NotFound)
}

/// Oldest first; ties fall back to insertion order.
pub fn load_history(
    conn: &mut PgConnection,
    document_id: i64,
) -> LifecycleResult<Vec<HistoryEntry>> {
    let found: bool =
        select(exists(documents::table.filter(documents::id.eq(document_id)))).get_result(conn)?;
    if !found {
        return Err(LifecycleError::NotFound);
    }

    let rows: Vec<(DocumentHistory, String)> = document_history::table
        .inner_join(users::table)
        .filter(document_history::document_id.eq(document_id))
        .order((
            document_history::created_at.asc(),
            document_history::id.asc(),
        ))
        .select((document_history::all_columns, users::full_name))
        .load(conn)?;

    Ok(rows
        .into_iter()
        .map(|(record, actor_name)| HistoryEntry { record, actor_name })
        .collect())
}
