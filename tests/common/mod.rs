use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;
use sikat::auth::jwt::JwtService;
use sikat::auth::password::hash_password;
use sikat::config::{AppConfig, StorageBackend};
use sikat::db::{self, PgPool};
use sikat::models::NewUser;
use sikat::routes;
use sikat::state::AppState;
use sikat::storage::{ObjectStorage, StorageError, StorageResult};
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const TEST_MAX_UPLOAD_BYTES: u64 = 64 * 1024;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));
static NIP_SEQUENCE: AtomicU64 = AtomicU64::new(1);

#[allow(dead_code)]
#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: Option<String>,
    ) -> StorageResult<()> {
        let stored = StoredObject {
            key: key.to_string(),
            bytes,
            content_type,
        };
        let mut guard = self.objects.lock().await;
        guard.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> StorageResult<Bytes> {
        let guard = self.objects.lock().await;
        guard
            .get(key)
            .map(|obj| obj.bytes.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        let mut guard = self.objects.lock().await;
        guard.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let guard = self.objects.lock().await;
        Ok(guard.contains_key(key))
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }

    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        let guard = self.objects.lock().await;
        guard.len()
    }

    #[allow(dead_code)]
    pub async fn remove(&self, key: &str) {
        let mut guard = self.objects.lock().await;
        guard.remove(key);
    }
}

/// A file part for [`TestApp::upload_document`].
#[allow(dead_code)]
pub struct UploadFile<'a> {
    pub filename: &'a str,
    pub content_type: &'a str,
    pub data: &'a [u8],
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            cors_allowed_origin: None,
            storage_backend: StorageBackend::Local,
            local_storage_path: "./unused".to_string(),
            max_upload_size: TEST_MAX_UPLOAD_BYTES,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".to_string(),
            s3_bucket: None,
            s3_public_base_url: None,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool.clone(), config, storage_for_state, jwt);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            storage,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            reset_tables(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    pub async fn insert_user(&self, username: &str, password: &str, role: &str) -> Result<i64> {
        let username = username.to_string();
        let password = password.to_string();
        let role = role.to_string();
        let nip = format!("1980{:014}", NIP_SEQUENCE.fetch_add(1, Ordering::SeqCst));
        self.with_conn(move |conn| {
            let password_hash = hash_password(&password)?;
            let user = NewUser {
                full_name: format!("{username} Test"),
                username,
                password_hash,
                nip,
                role,
                email: None,
                phone: None,
            };
            let id = diesel::insert_into(sikat::schema::users::table)
                .values(&user)
                .returning(sikat::schema::users::id)
                .get_result(conn)
                .context("failed to insert user")?;
            Ok(id)
        })
        .await
    }

    pub async fn login_token(&self, username: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            username: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json(
                "/api/auth/login",
                &LoginPayload { username, password },
                None,
            )
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = body_to_vec(response.into_body()).await?;
        #[derive(serde::Deserialize)]
        struct LoginResponse {
            access_token: String,
        }
        let parsed: LoginResponse = serde_json::from_slice(&body)?;
        Ok(parsed.access_token)
    }

    #[allow(dead_code)]
    pub async fn set_document_type_active(&self, id: i64, active: bool) -> Result<()> {
        self.with_conn(move |conn| {
            use sikat::schema::document_types;
            diesel::update(document_types::table.find(id))
                .set(document_types::is_active.eq(active))
                .execute(conn)
                .context("failed to update document type")?;
            Ok(())
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn document_count(&self) -> Result<i64> {
        self.with_conn(|conn| {
            use sikat::schema::documents;
            Ok(documents::table.count().get_result(conn)?)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn history_count(&self, document_id: i64) -> Result<i64> {
        self.with_conn(move |conn| {
            use sikat::schema::document_history;
            Ok(document_history::table
                .filter(document_history::document_id.eq(document_id))
                .count()
                .get_result(conn)?)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn document_locator(&self, document_id: i64) -> Result<String> {
        self.with_conn(move |conn| {
            use sikat::schema::documents;
            Ok(documents::table
                .find(document_id)
                .select(documents::file_path)
                .first(conn)?)
        })
        .await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PATCH, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PUT, path, payload, token).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    /// Posts a multipart submission. Text fields are sent in order; the file
    /// part is omitted when `file` is `None`.
    #[allow(dead_code)]
    pub async fn upload_document(
        &self,
        fields: &[(&str, &str)],
        file: Option<UploadFile<'_>>,
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();

        for (name, value) in fields {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            );
            body.extend(value.as_bytes());
            body.extend(b"\r\n");
        }

        if let Some(file) = file {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!(
                    "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                    file.filename
                )
                .as_bytes(),
            );
            body.extend(format!("Content-Type: {}\r\n\r\n", file.content_type).as_bytes());
            body.extend(file.data);
            body.extend(b"\r\n");
        }

        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/documents")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    /// Uploads a small PDF for the given period and returns the new id.
    #[allow(dead_code)]
    pub async fn submit_pdf(&self, token: &str, title: &str, month: u32, year: i32) -> Result<i64> {
        let month = month.to_string();
        let year = year.to_string();
        let response = self
            .upload_document(
                &[
                    ("document_type_id", "1"),
                    ("title", title),
                    ("month_period", &month),
                    ("year_period", &year),
                ],
                Some(UploadFile {
                    filename: "skmt.pdf",
                    content_type: "application/pdf",
                    data: b"%PDF-1.4 test",
                }),
                token,
            )
            .await?;
        ensure!(
            response.status() == StatusCode::CREATED,
            "upload failed with status {}",
            response.status()
        );
        let body = body_to_json(response.into_body()).await?;
        body["document_id"]
            .as_i64()
            .ok_or_else(|| anyhow!("document_id missing in {body}"))
    }

    #[allow(dead_code)]
    pub async fn set_document_created_at(
        &self,
        document_id: i64,
        created_at: chrono::NaiveDateTime,
    ) -> Result<()> {
        self.with_conn(move |conn| {
            use sikat::schema::documents;
            diesel::update(documents::table.find(document_id))
                .set(documents::created_at.eq(created_at))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn body_to_json(body: Body) -> Result<Value> {
    let bytes = body_to_vec(body).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        db::run_migrations(&pool)?;
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        reset_tables(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

/// Document types are seed data and survive; everything else is wiped.
fn reset_tables(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE document_history, documents, users RESTART IDENTITY CASCADE;
         UPDATE document_types SET is_active = TRUE;",
    )
    .context("failed to reset tables")?;
    Ok(())
}
