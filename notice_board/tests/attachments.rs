mod common;

use common::*;
use notice_board::housekeeping;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::{sync::Arc, time::Duration};

fn file_form(name: &str, bytes: &'static [u8]) -> Form {
    Form::new().part("file", Part::bytes(bytes).file_name(name.to_string()))
}

async fn wait_for_attachment(srv: &TestServer, token: &str, id: i64) -> Value {
    for _ in 0..50 {
        let list = srv.get_json(token, "/api/notices").await;
        if let Some(n) = list
            .as_array()
            .unwrap()
            .iter()
            .find(|n| n["id"] == id && n["is_uploading_file"] == false)
        {
            return n.clone();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("upload for notice {id} never settled");
}

#[tokio::test]
async fn upload_serves_and_cleans_up() {
    let srv = spawn_server().await;
    let admin = srv.admin_token().await;
    let n = srv
        .create_notice(&admin, notice_body("Timetable", "Announcement", "normal", "All"))
        .await;
    let id = n["id"].as_i64().unwrap();

    let resp = srv
        .client
        .post(srv.url(&format!("/api/notices/{id}/attachment")))
        .bearer_auth(&admin)
        .multipart(file_form("time table.pdf", b"%PDF-1.4 timetable"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let pending: Value = resp.json().await.unwrap();
    assert_eq!(pending["is_uploading_file"], true);

    let done = wait_for_attachment(&srv, &admin, id).await;
    let url = done["attachment"].as_str().unwrap().to_string();
    assert!(url.ends_with(&format!("/attachments/{id}_time_table.pdf")));
    assert_eq!(done["attachment_name"], "time table.pdf");
    assert_eq!(done["attachment_size"], 18);
    assert_eq!(done["view_url"], url.as_str());

    let resp = srv.client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "application/pdf");
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"%PDF-1.4 timetable");

    let path = srv
        .tmp
        .path()
        .join("attachments")
        .join(format!("{id}_time_table.pdf"));
    assert!(path.exists());
    let resp = srv
        .client
        .delete(srv.url(&format!("/api/notices/{id}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    for _ in 0..50 {
        if !path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!path.exists());
    srv.server.abort();
}

#[tokio::test]
async fn office_documents_use_viewer_link() {
    let srv = spawn_server().await;
    let admin = srv.admin_token().await;
    let n = srv
        .create_notice(&admin, notice_body("Syllabus", "Announcement", "normal", "All"))
        .await;
    let id = n["id"].as_i64().unwrap();
    srv.client
        .post(srv.url(&format!("/api/notices/{id}/attachment")))
        .bearer_auth(&admin)
        .multipart(file_form("syllabus.docx", b"PK docx"))
        .send()
        .await
        .unwrap();
    let done = wait_for_attachment(&srv, &admin, id).await;
    let view = done["view_url"].as_str().unwrap();
    assert!(view.starts_with("https://docs.google.com/viewer?url=http%3A%2F%2F"));
    assert!(view.ends_with("&embedded=true"));
    srv.server.abort();
}

#[tokio::test]
async fn denied_uploads_leave_notice_untouched() {
    let srv = spawn_server().await;
    let admin = srv.admin_token().await;
    let student = srv.register("asha", "student", "CSE").await;
    let n = srv
        .create_notice(&admin, notice_body("Lab", "Announcement", "normal", "All"))
        .await;
    let id = n["id"].as_i64().unwrap();
    let path = format!("/api/notices/{id}/attachment");

    let resp = srv
        .client
        .post(srv.url(&path))
        .bearer_auth(&admin)
        .multipart(file_form("run.SH", b"rm -rf /"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(
        resp.json::<Value>().await.unwrap()["error"],
        "attachment_rejected"
    );

    let resp = srv
        .client
        .post(srv.url(&path))
        .bearer_auth(&admin)
        .multipart(file_form("empty.txt", b""))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = srv
        .client
        .post(srv.url(&path))
        .bearer_auth(&student)
        .multipart(file_form("notes.pdf", b"notes"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let board = srv.state.board.lock();
    let notice = board.notice(id).unwrap();
    assert!(!notice.is_uploading_file);
    assert!(notice.attachment.is_none());
    drop(board);
    srv.server.abort();
}

#[tokio::test]
async fn sweep_removes_unreferenced_objects() {
    let srv = spawn_server().await;
    let admin = srv.admin_token().await;
    let n = srv
        .create_notice(&admin, notice_body("Kept", "Announcement", "normal", "All"))
        .await;
    let id = n["id"].as_i64().unwrap();
    srv.client
        .post(srv.url(&format!("/api/notices/{id}/attachment")))
        .bearer_auth(&admin)
        .multipart(file_form("kept.txt", b"kept"))
        .send()
        .await
        .unwrap();
    wait_for_attachment(&srv, &admin, id).await;

    let dir = srv.tmp.path().join("attachments");
    std::fs::write(dir.join("999_stray.txt"), b"stray").unwrap();

    let removed = housekeeping::sweep_orphans(&srv.state).await.unwrap();
    assert_eq!(removed, ["999_stray.txt"]);
    assert!(dir.join(format!("{id}_kept.txt")).exists());
    srv.server.abort();
}

#[tokio::test]
async fn failed_cleanup_does_not_fail_delete() {
    let store = Arc::new(FlakyStore::default());
    let srv = spawn_with_store(store.clone()).await;
    let admin = srv.admin_token().await;
    let n = srv
        .create_notice(&admin, notice_body("Circular", "Announcement", "normal", "All"))
        .await;
    let id = n["id"].as_i64().unwrap();
    srv.client
        .post(srv.url(&format!("/api/notices/{id}/attachment")))
        .bearer_auth(&admin)
        .multipart(file_form("circular.pdf", b"circular"))
        .send()
        .await
        .unwrap();
    let done = wait_for_attachment(&srv, &admin, id).await;
    assert_eq!(
        done["attachment"],
        format!("http://bucket.invalid/attachments/{id}_circular.pdf")
    );

    let resp = srv
        .client
        .delete(srv.url(&format!("/api/notices/{id}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    for _ in 0..50 {
        if !store.delete_attempts().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(store.delete_attempts(), [format!("{id}_circular.pdf")]);
    let list = srv.get_json(&admin, "/api/notices").await;
    assert!(list.as_array().unwrap().is_empty());
    srv.server.abort();
}

#[tokio::test]
async fn unknown_attachment_is_404() {
    let srv = spawn_server().await;
    let resp = srv
        .client
        .get(srv.url("/attachments/nothing_here.pdf"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    srv.server.abort();
}
