//! Filtered, paginated reads over submitted documents.
//!
//! Callers hand raw query-string values to [`DocumentFilter::from_params`],
//! which rejects anything it does not understand. The resulting filter is
//! turned into SQL by [`filtered_documents`] only; every user-supplied value
//! travels as a bind parameter.

use std::collections::HashMap;

use diesel::dsl::count_star;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lifecycle::DocumentStatus;
use crate::models::Document;
use crate::schema::{document_types, documents, users};

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("invalid {field}: '{value}'")]
    Invalid { field: &'static str, value: String },
    #[error("status must be one of pending, approved, rejected; got '{0}'")]
    UnknownStatus(String),
}

/// Query-string values as received. Everything is kept as text so that bad
/// input produces a [`FilterError`] instead of an extractor rejection.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawDocumentQuery {
    pub user_id: Option<String>,
    pub status: Option<String>,
    pub document_type_id: Option<String>,
    pub search: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFilter {
    pub owner_id: Option<i64>,
    pub status: Option<DocumentStatus>,
    pub document_type_id: Option<i64>,
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for DocumentFilter {
    fn default() -> Self {
        Self {
            owner_id: None,
            status: None,
            document_type_id: None,
            search: None,
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_id(field: &'static str, value: Option<&str>) -> Result<Option<i64>, FilterError> {
    match present(value) {
        None => Ok(None),
        Some(raw) => match raw.parse::<i64>() {
            Ok(id) if id > 0 => Ok(Some(id)),
            _ => Err(FilterError::Invalid {
                field,
                value: raw.to_string(),
            }),
        },
    }
}

impl DocumentFilter {
    pub fn from_params(params: &RawDocumentQuery) -> Result<Self, FilterError> {
        let owner_id = parse_id("user_id", params.user_id.as_deref())?;
        let document_type_id = parse_id("document_type_id", params.document_type_id.as_deref())?;

        let status = present(params.status.as_deref())
            .map(|raw| {
                raw.parse::<DocumentStatus>()
                    .map_err(|_| FilterError::UnknownStatus(raw.to_string()))
            })
            .transpose()?;

        let limit = match present(params.limit.as_deref()) {
            None => DEFAULT_PAGE_SIZE,
            Some(raw) => match raw.parse::<i64>() {
                Ok(limit) if limit > 0 => limit.min(MAX_PAGE_SIZE),
                _ => {
                    return Err(FilterError::Invalid {
                        field: "limit",
                        value: raw.to_string(),
                    })
                }
            },
        };

        let offset = match present(params.offset.as_deref()) {
            None => 0,
            Some(raw) => match raw.parse::<i64>() {
                Ok(offset) if offset >= 0 => offset,
                _ => {
                    return Err(FilterError::Invalid {
                        field: "offset",
                        value: raw.to_string(),
                    })
                }
            },
        };

        Ok(Self {
            owner_id,
            status,
            document_type_id,
            search: present(params.search.as_deref()).map(str::to_string),
            limit,
            offset,
        })
    }
}

/// Escapes LIKE metacharacters so a search term only ever matches literally.
pub fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

/// The single place a [`DocumentFilter`] becomes SQL. Pagination and
/// ordering are left to the caller so the same predicate feeds both the page
/// and the total count.
pub fn filtered_documents(filter: &DocumentFilter) -> documents::BoxedQuery<'static, Pg> {
    let mut query = documents::table.into_boxed();

    if let Some(owner_id) = filter.owner_id {
        query = query.filter(documents::user_id.eq(owner_id));
    }
    if let Some(status) = filter.status {
        query = query.filter(documents::status.eq(status.as_str()));
    }
    if let Some(type_id) = filter.document_type_id {
        query = query.filter(documents::document_type_id.eq(type_id));
    }
    if let Some(search) = filter.search.as_deref() {
        query = query.filter(documents::title.ilike(like_pattern(search)));
    }

    query
}

/// A document plus the display names of the rows it references.
#[derive(Debug, Clone)]
pub struct DocumentDetail {
    pub document: Document,
    pub document_type_name: Option<String>,
    pub owner_name: Option<String>,
    pub reviewer_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentPage {
    pub documents: Vec<DocumentDetail>,
    pub total: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub total: i64,
    pub approved: i64,
    pub pending: i64,
    pub rejected: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Queryable)]
pub struct DocumentTypeSummary {
    pub id: i64,
    pub name: String,
}

/// Number of rows matching the filter, ignoring pagination.
pub fn count_documents(conn: &mut PgConnection, filter: &DocumentFilter) -> QueryResult<i64> {
    filtered_documents(filter).count().get_result(conn)
}

/// Newest first; equal timestamps fall back to the higher id.
pub fn list_documents(
    conn: &mut PgConnection,
    filter: &DocumentFilter,
) -> QueryResult<DocumentPage> {
    let total = count_documents(conn, filter)?;

    let rows: Vec<Document> = filtered_documents(filter)
        .order((documents::created_at.desc(), documents::id.desc()))
        .limit(filter.limit)
        .offset(filter.offset)
        .load(conn)?;

    let documents = attach_display_names(conn, rows)?;
    Ok(DocumentPage { documents, total })
}

pub fn attach_display_names(
    conn: &mut PgConnection,
    rows: Vec<Document>,
) -> QueryResult<Vec<DocumentDetail>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let mut user_ids: Vec<i64> = rows
        .iter()
        .flat_map(|doc| std::iter::once(doc.user_id).chain(doc.reviewed_by))
        .collect();
    user_ids.sort_unstable();
    user_ids.dedup();

    let mut type_ids: Vec<i64> = rows.iter().map(|doc| doc.document_type_id).collect();
    type_ids.sort_unstable();
    type_ids.dedup();

    let user_names: HashMap<i64, String> = users::table
        .filter(users::id.eq_any(&user_ids))
        .select((users::id, users::full_name))
        .load::<(i64, String)>(conn)?
        .into_iter()
        .collect();

    let type_names: HashMap<i64, String> = document_types::table
        .filter(document_types::id.eq_any(&type_ids))
        .select((document_types::id, document_types::name))
        .load::<(i64, String)>(conn)?
        .into_iter()
        .collect();

    Ok(rows
        .into_iter()
        .map(|document| DocumentDetail {
            document_type_name: type_names.get(&document.document_type_id).cloned(),
            owner_name: user_names.get(&document.user_id).cloned(),
            reviewer_name: document
                .reviewed_by
                .and_then(|id| user_names.get(&id).cloned()),
            document,
        })
        .collect())
}

pub fn document_stats(conn: &mut PgConnection, owner_id: i64) -> QueryResult<DocumentStats> {
    let rows: Vec<(String, i64)> = documents::table
        .filter(documents::user_id.eq(owner_id))
        .group_by(documents::status)
        .select((documents::status, count_star()))
        .load(conn)?;

    let mut stats = DocumentStats::default();
    for (status, count) in rows {
        stats.total += count;
        match status.parse::<DocumentStatus>() {
            Ok(DocumentStatus::Pending) => stats.pending += count,
            Ok(DocumentStatus::Approved) => stats.approved += count,
            Ok(DocumentStatus::Rejected) => stats.rejected += count,
            Err(err) => tracing::warn!(error = %err, owner_id, "skipping unknown status in stats"),
        }
    }
    Ok(stats)
}

pub fn list_active_document_types(
    conn: &mut PgConnection,
) -> QueryResult<Vec<DocumentTypeSummary>> {
    document_types::table
        .filter(document_types::is_active.eq(true))
        .order((document_types::name.asc(), document_types::id.asc()))
        .select((document_types::id, document_types::name))
        .load(conn)
}
