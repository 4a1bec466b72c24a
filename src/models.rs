use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub full_name: String,
    pub nip: String,
    pub role: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub full_name: String,
    pub nip: String,
    pub role: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = document_types)]
pub struct DocumentType {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = documents)]
#[diesel(belongs_to(User, foreign_key = user_id))]
#[diesel(belongs_to(DocumentType, foreign_key = document_type_id))]
pub struct Document {
    pub id: i64,
    pub user_id: i64,
    pub document_type_id: i64,
    pub title: String,
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub month_period: i32,
    pub year_period: i32,
    pub status: String,
    pub notes: Option<String>,
    pub admin_notes: Option<String>,
    pub reviewed_by: Option<i64>,
    pub reviewed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub user_id: i64,
    pub document_type_id: i64,
    pub title: String,
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub month_period: i32,
    pub year_period: i32,
    pub status: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = document_history)]
#[diesel(belongs_to(Document))]
#[diesel(belongs_to(User, foreign_key = user_id))]
pub struct DocumentHistory {
    pub id: i64,
    pub document_id: i64,
    pub user_id: i64,
    pub action: String,
    pub old_status: Option<String>,
    pub new_status: String,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = document_history)]
pub struct NewDocumentHistory {
    pub document_id: i64,
    pub user_id: i64,
    pub action: String,
    pub old_status: Option<String>,
    pub new_status: String,
    pub notes: Option<String>,
}
