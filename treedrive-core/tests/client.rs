use serde_json::json;
use treedrive_core::{ApiClient, ApiErrorClass, JobMode, JobState, MoveRequest, StartOutcome};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn list_children_sends_session_header_and_paging() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/listChildren"))
        .and(query_param("folder", "Projects"))
        .and(query_param("limit", "50"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                { "name": "Alpha", "locked": false, "encrypted": true, "hasSubfolders": true },
                { "name": "Beta", "locked": true, "encrypted": false }
            ],
            "nextCursor": "page-2"
        })))
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri(), "test-token").unwrap();
    let page = client.list_children("Projects", None, 50).await.unwrap();

    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].name, "Alpha");
    assert!(page.items[0].encrypted);
    assert_eq!(page.items[0].has_subfolders, Some(true));
    assert!(page.items[1].locked);
    assert_eq!(page.next_cursor.as_deref(), Some("page-2"));
}

#[tokio::test]
async fn list_children_normalizes_bare_name_items() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/listChildren"))
        .and(query_param("folder", "root"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": ["Documents", { "name": "Shared", "locked": true }],
            "nextCursor": null
        })))
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri(), "test-token").unwrap();
    let page = client.list_children("root", None, 50).await.unwrap();

    assert_eq!(page.items[0].name, "Documents");
    assert!(!page.items[0].locked);
    assert!(page.items[1].locked);
    assert!(page.next_cursor.is_none());
}

#[tokio::test]
async fn list_children_forwards_cursor() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/listChildren"))
        .and(query_param("folder", "Projects"))
        .and(query_param("cursor", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": ["Gamma"],
            "nextCursor": null
        })))
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri(), "test-token").unwrap();
    let page = client
        .list_children("Projects", Some("page-2"), 50)
        .await
        .unwrap();

    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].name, "Gamma");
}

#[tokio::test]
async fn folder_stats_parses_counters() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/folderStats"))
        .and(query_param("folder", "Projects/Alpha"))
        .and(query_param("sourceId", "local"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "folders": 3,
            "files": 12,
            "bytes": 4096
        })))
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri(), "test-token").unwrap();
    let stats = client.folder_stats("Projects/Alpha", "local").await.unwrap();

    assert_eq!(stats.folders, 3);
    assert_eq!(stats.files, 12);
    assert_eq!(stats.bytes, Some(4096));
    assert!(!stats.truncated);
}

#[tokio::test]
async fn capabilities_absent_resource_is_none() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/capabilities"))
        .and(query_param("folder", "Gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri(), "test-token").unwrap();
    let caps = client.capabilities("Gone", "local").await.unwrap();

    assert!(caps.is_none());
}

#[tokio::test]
async fn capabilities_legacy_fields_back_can_view() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/capabilities"))
        .and(query_param("folder", "Projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "canRead": true,
            "canCreate": true,
            "encryption": { "encrypted": false }
        })))
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri(), "test-token").unwrap();
    let caps = client
        .capabilities("Projects", "local")
        .await
        .unwrap()
        .expect("capability set");

    assert!(caps.can_view.is_none());
    assert!(caps.can_view());
    assert!(caps.can_create);
    assert!(!caps.can_rename);
}

#[tokio::test]
async fn move_folder_surfaces_body_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/moveFolder"))
        .and(body_partial_json(json!({
            "source": "Projects/Alpha",
            "destination": "Projects/Beta"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": "destination already contains a folder named Alpha"
        })))
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri(), "test-token").unwrap();
    let outcome = client
        .move_folder(&MoveRequest {
            source: "Projects/Alpha".into(),
            destination: "Projects/Beta".into(),
            source_id: "local".into(),
            dest_source_id: "local".into(),
            mode: "move".into(),
        })
        .await
        .unwrap();

    assert!(outcome.error.is_some());
}

#[tokio::test]
async fn rename_folder_reports_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/renameFolder"))
        .and(body_partial_json(json!({
            "oldFolder": "Projects/Alpha",
            "newFolder": "Projects/Omega"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri(), "test-token").unwrap();
    let outcome = client
        .rename_folder("Projects/Alpha", "Projects/Omega")
        .await
        .unwrap();

    assert!(outcome.success);
    assert!(outcome.error.is_none());
}

#[tokio::test]
async fn encryption_plan_carries_estimate() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/encryptionPlan"))
        .and(query_param("folder", "Projects"))
        .and(query_param("mode", "encrypt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "totalFiles": 120,
            "totalBytes": 1048576,
            "truncated": false
        })))
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri(), "test-token").unwrap();
    let plan = client
        .encryption_plan("Projects", JobMode::Encrypt)
        .await
        .unwrap();

    assert!(plan.ok);
    assert_eq!(plan.total_files, 120);
    assert_eq!(plan.total_bytes, 1_048_576);
}

#[tokio::test]
async fn job_start_conflict_reattaches_to_existing_job() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/encryptionJobStart"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "job": {
                "id": "job-7",
                "folder": "Projects",
                "mode": "encrypt",
                "state": "running",
                "totalFiles": 120,
                "totalBytes": 1048576,
                "doneFiles": 30,
                "doneBytes": 262144
            }
        })))
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri(), "test-token").unwrap();
    let outcome = client
        .encryption_job_start("Projects", JobMode::Encrypt, 120, 1_048_576)
        .await
        .unwrap();

    match outcome {
        StartOutcome::AlreadyRunning(job) => {
            assert_eq!(job.id, "job-7");
            assert_eq!(job.state, JobState::Running);
            assert_eq!(job.done_files, 30);
        }
        other => panic!("expected reattach, got {other:?}"),
    }
}

#[tokio::test]
async fn job_tick_returns_job_snapshot() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/encryptionJobTick"))
        .and(body_partial_json(json!({ "jobId": "job-7", "maxFiles": 25 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "job": {
                "id": "job-7",
                "folder": "Projects",
                "mode": "encrypt",
                "state": "done",
                "totalFiles": 120,
                "totalBytes": 1048576,
                "doneFiles": 120,
                "doneBytes": 1048576
            }
        })))
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri(), "test-token").unwrap();
    let job = client.encryption_job_tick("job-7", 25).await.unwrap();

    assert_eq!(job.state, JobState::Done);
    assert_eq!(job.progress_percent(), Some(100));
}

#[tokio::test]
async fn error_classification_follows_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/folderStats"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri(), "test-token").unwrap();
    let err = client.folder_stats("Projects", "local").await.unwrap_err();

    assert_eq!(err.classification(), Some(ApiErrorClass::Session));
    assert!(!err.is_retryable());
}
