mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_json, TestApp};
use serde_json::json;

struct Fixture {
    app: TestApp,
    admin_id: i64,
    admin: String,
    teacher: String,
}

async fn fixture() -> Result<Fixture> {
    let app = TestApp::new().await?;
    let admin_id = app.insert_user("admin", "pw", "admin").await?;
    app.insert_user("guru1", "pw", "teacher").await?;
    let admin = app.login_token("admin", "pw").await?;
    let teacher = app.login_token("guru1", "pw").await?;
    Ok(Fixture {
        app,
        admin_id,
        admin,
        teacher,
    })
}

#[tokio::test]
async fn approving_records_reviewer_and_history() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Fixture {
        app,
        admin_id,
        admin,
        teacher,
    } = fixture().await?;
    let id = app.submit_pdf(&teacher, "SKMT Januari", 1, 2025).await?;

    let response = app
        .post_json(
            &format!("/api/documents/{id}/review"),
            &json!({ "decision": "approved", "admin_notes": "Lengkap" }),
            Some(&admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    let doc = &body["document"];
    assert_eq!(doc["status"], "approved");
    assert_eq!(doc["reviewed_by"], admin_id);
    assert_eq!(doc["reviewed_by_name"], "admin Test");
    assert_eq!(doc["admin_notes"], "Lengkap");
    assert!(doc["reviewed_at"].is_string());

    let response = app
        .get(&format!("/api/documents/{id}/history"), Some(&teacher))
        .await?;
    let body = body_to_json(response.into_body()).await?;
    let history = body["history"].as_array().cloned().unwrap_or_default();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["action"], "created");
    assert_eq!(history[1]["action"], "approved");
    assert_eq!(history[1]["old_status"], "pending");
    assert_eq!(history[1]["new_status"], "approved");
    assert_eq!(history[1]["notes"], "Lengkap");
    assert_eq!(history[1]["user_id"], admin_id);
    assert_eq!(history[1]["user_name"], "admin Test");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn reviewed_documents_cannot_be_reviewed_again() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Fixture {
        app,
        admin,
        teacher,
        ..
    } = fixture().await?;
    let id = app.submit_pdf(&teacher, "SKBK Januari", 1, 2025).await?;

    let response = app
        .post_json(
            &format!("/api/documents/{id}/review"),
            &json!({ "decision": "rejected", "admin_notes": "Tanda tangan kurang" }),
            Some(&admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["document"]["status"], "rejected");
    assert_eq!(app.history_count(id).await?, 2);

    for decision in ["approved", "rejected"] {
        let response = app
            .post_json(
                &format!("/api/documents/{id}/review"),
                &json!({ "decision": decision }),
                Some(&admin),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::CONFLICT, "{decision}");
    }
    assert_eq!(app.history_count(id).await?, 2);

    let response = app
        .get(&format!("/api/documents/{id}"), Some(&teacher))
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["document"]["status"], "rejected");
    assert_eq!(body["document"]["admin_notes"], "Tanda tangan kurang");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn review_requires_admin_and_a_valid_decision() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Fixture {
        app,
        admin,
        teacher,
        ..
    } = fixture().await?;
    let id = app.submit_pdf(&teacher, "SPMJ Januari", 1, 2025).await?;

    let response = app
        .post_json(
            &format!("/api/documents/{id}/review"),
            &json!({ "decision": "approved" }),
            Some(&teacher),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .post_json(
            &format!("/api/documents/{id}/review"),
            &json!({ "decision": "pending" }),
            Some(&admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/api/documents/999999/review",
            &json!({ "decision": "approved" }),
            Some(&admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    assert_eq!(app.history_count(id).await?, 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn metadata_edit_keeps_status_and_appends_history() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Fixture {
        app,
        admin,
        teacher,
        ..
    } = fixture().await?;
    let id = app.submit_pdf(&teacher, "judul lama", 4, 2025).await?;

    let response = app
        .patch_json(
            &format!("/api/documents/{id}"),
            &json!({ "title": "Laporan Bulanan April", "document_type_id": 11 }),
            Some(&admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    let doc = &body["document"];
    assert_eq!(doc["title"], "Laporan Bulanan April");
    assert_eq!(doc["document_type_name"], "Laporan Bulanan");
    assert_eq!(doc["status"], "pending");
    assert_eq!(doc["month_period"], 4);

    let response = app
        .get(&format!("/api/documents/{id}/history"), Some(&admin))
        .await?;
    let body = body_to_json(response.into_body()).await?;
    let history = body["history"].as_array().cloned().unwrap_or_default();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1]["action"], "updated");
    assert_eq!(history[1]["old_status"], "pending");
    assert_eq!(history[1]["new_status"], "pending");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn metadata_edit_rejects_bad_payloads() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Fixture {
        app,
        admin,
        teacher,
        ..
    } = fixture().await?;
    let id = app.submit_pdf(&teacher, "SKMT Mei", 5, 2025).await?;
    let path = format!("/api/documents/{id}");

    let response = app
        .patch_json(&path, &json!({ "title": "Baru" }), Some(&teacher))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    for payload in [
        json!({}),
        json!({ "status": "approved" }),
        json!({ "month_period": 6 }),
        json!({ "title": "   " }),
    ] {
        let response = app.patch_json(&path, &payload, Some(&admin)).await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{payload}");
    }

    let response = app
        .patch_json(
            "/api/documents/999999",
            &json!({ "title": "Baru" }),
            Some(&admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    assert_eq!(app.history_count(id).await?, 1);

    app.cleanup().await?;
    Ok(())
}
