//! API integration tests against the in-process router.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use bookbag_core::WantedStatus;
use common::{fixtures, TestFixture};

async fn add_gunslinger(fixture: &TestFixture) -> String {
    let response = fixture
        .post(
            "/api/v1/wanted",
            json!({ "kind": "book", "title": "The Gunslinger", "author": "Stephen King" }),
        )
        .await;
    assert_status!(response, StatusCode::CREATED);
    response.body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_endpoint() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/health").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
    assert!(response.body["version"].is_string());
}

#[tokio::test]
async fn test_add_and_get_wanted_book() {
    let fixture = TestFixture::new().await;
    let id = add_gunslinger(&fixture).await;

    let response = fixture.get(&format!("/api/v1/wanted/{}", id)).await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["title"], "The Gunslinger");
    assert_eq!(response.body["author"], "Stephen King");
    assert_eq!(response.body["status"], "wanted");
    assert_eq!(response.body["snatches"], json!([]));
}

#[tokio::test]
async fn test_add_wanted_validation() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post("/api/v1/wanted", json!({ "kind": "book", "title": "   " }))
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);
    assert!(response.body["error"].as_str().unwrap().contains("title"));

    let response = fixture
        .post("/api/v1/wanted", json!({ "kind": "magazine", "title": "Wired" }))
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);
    assert!(response.body["error"]
        .as_str()
        .unwrap()
        .contains("issue_date"));
}

#[tokio::test]
async fn test_add_wanted_malformed_json() {
    let fixture = TestFixture::new().await;

    let response = fixture.post_raw("/api/v1/wanted", "{ not json").await;
    assert!(response.status.is_client_error());
}

#[tokio::test]
async fn test_list_wanted_filters() {
    let fixture = TestFixture::new().await;
    add_gunslinger(&fixture).await;
    let response = fixture
        .post(
            "/api/v1/wanted",
            json!({ "kind": "magazine", "title": "Wired", "issue_date": "2024-03" }),
        )
        .await;
    assert_status!(response, StatusCode::CREATED);

    let response = fixture.get("/api/v1/wanted").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["total"], 2);

    let response = fixture.get("/api/v1/wanted?kind=magazine").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["total"], 1);
    assert_eq!(response.body["items"][0]["title"], "Wired");

    let response = fixture.get("/api/v1/wanted?status=processed").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["total"], 0);

    let response = fixture.get("/api/v1/wanted?status=bogus").await;
    assert_status!(response, StatusCode::BAD_REQUEST);

    let response = fixture.get("/api/v1/wanted?limit=1").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["items"].as_array().unwrap().len(), 1);
    assert_eq!(response.body["total"], 2);
}

#[tokio::test]
async fn test_get_nonexistent_wanted() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/wanted/does-not-exist").await;
    assert_status!(response, StatusCode::NOT_FOUND);
    assert!(response.body["error"].is_string());
}

#[tokio::test]
async fn test_force_search_snatches_and_dispatches() {
    let fixture = TestFixture::new().await;
    let id = add_gunslinger(&fixture).await;
    fixture
        .provider
        .set_results(vec![fixtures::search_result(
            "Stephen King - The Gunslinger.epub",
            "tracker",
            2_000_000,
        )])
        .await;

    let response = fixture
        .post_empty(&format!("/api/v1/wanted/{}/search", id))
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["outcome"], "snatched");
    assert_eq!(response.body["dispatched"], true);
    assert_eq!(
        response.body["record"]["result_title"],
        "Stephen King - The Gunslinger.epub"
    );

    assert_eq!(fixture.client.recorded_submits().await.len(), 1);

    let response = fixture.get(&format!("/api/v1/wanted/{}", id)).await;
    assert_eq!(response.body["status"], "snatched");
    assert_eq!(response.body["snatches"].as_array().unwrap().len(), 1);

    // Only wanted items can be searched.
    let response = fixture
        .post_empty(&format!("/api/v1/wanted/{}/search", id))
        .await;
    assert_status!(response, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_force_search_without_match() {
    let fixture = TestFixture::new().await;
    let id = add_gunslinger(&fixture).await;
    fixture
        .provider
        .set_results(vec![fixtures::search_result(
            "Completely Unrelated Cookbook",
            "tracker",
            2_000_000,
        )])
        .await;

    let response = fixture
        .post_empty(&format!("/api/v1/wanted/{}/search", id))
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["outcome"], "no_match");
    assert!(fixture.client.recorded_submits().await.is_empty());

    let item = fixture.store.get_wanted(&id).unwrap().unwrap();
    assert_eq!(item.status, WantedStatus::Wanted);
}

#[tokio::test]
async fn test_force_search_unknown_item() {
    let fixture = TestFixture::new().await;

    let response = fixture.post_empty("/api/v1/wanted/nope/search").await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_force_postprocess_records_drop_folder_file() {
    let fixture = TestFixture::new().await;
    let id = add_gunslinger(&fixture).await;
    fixtures::write_epub(
        &fixture.drop_dir.join("Stephen King - The Gunslinger.epub"),
        "The Gunslinger",
        "Stephen King",
        None,
    );

    let response = fixture.post_empty("/api/v1/postprocess").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["recorded"], 1);
    assert_eq!(response.body["unidentified"], 0);

    let response = fixture.get(&format!("/api/v1/wanted/{}", id)).await;
    assert_eq!(response.body["status"], "processed");
    assert!(fixture
        .library_dir
        .join("Stephen King/The Gunslinger/The Gunslinger - Stephen King.epub")
        .exists());
}

#[tokio::test]
async fn test_unidentified_files_are_listed() {
    let fixture = TestFixture::new().await;
    add_gunslinger(&fixture).await;
    fixtures::write_epub(
        &fixture.drop_dir.join("random.epub"),
        "A Treatise on Bees",
        "Nobody Known",
        None,
    );

    let response = fixture.post_empty("/api/v1/postprocess").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["unidentified"], 1);

    let response = fixture.get("/api/v1/discovered").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["state"], "unidentified");
    let files = response.body["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert!(files[0]["path"].as_str().unwrap().ends_with("random.epub"));

    let response = fixture.get("/api/v1/discovered?state=recorded").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["files"], json!([]));

    let response = fixture.get("/api/v1/discovered?state=nonsense").await;
    assert_status!(response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_reports_counts() {
    let fixture = TestFixture::new().await;
    add_gunslinger(&fixture).await;

    let response = fixture.get("/api/v1/status").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["running"], false);
    assert_eq!(response.body["wanted_count"], 1);
    assert_eq!(response.body["snatched_count"], 0);
}

#[tokio::test]
async fn test_config_hides_secrets() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/config").await;
    assert_status!(response, StatusCode::OK);
    assert!(response.body["library"]["root"].is_string());
    assert!(response.body["scheduler"]["search_interval_ms"].is_number());
    let text = response.body.to_string();
    assert!(!text.contains("api_key\""));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new().await;
    add_gunslinger(&fixture).await;

    let (status, body) = fixture.get_text("/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("bookbag_wanted_items"));
    assert!(body.contains("bookbag_scheduler_running"));
}
