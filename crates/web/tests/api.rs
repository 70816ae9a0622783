//! Router-level API tests
//!
//! Drives the full axum router in-process through `tower::ServiceExt`,
//! with the archive store pointed at a scratch directory.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::util::ServiceExt;

use cyberlab_web::{AdminCredentials, WebServer, WebServerConfig, MAX_UPLOAD_BYTES};

struct TestApp {
    _tmp: tempfile::TempDir,
    server: WebServer,
}

impl TestApp {
    fn new() -> Self {
        Self::with_upload_limit(MAX_UPLOAD_BYTES)
    }

    fn with_upload_limit(max_upload_bytes: u64) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let server = WebServer::new(WebServerConfig {
            data_dir: tmp.path().to_path_buf(),
            admin: AdminCredentials {
                username: "admin".to_string(),
                password: "password".to_string(),
            },
            max_upload_bytes,
        })
        .unwrap();
        Self { _tmp: tmp, server }
    }

    fn router(&self) -> Router {
        self.server.router()
    }

    fn upload_dir(&self) -> std::path::PathBuf {
        self._tmp.path().join("uploads").join("machines")
    }

    /// Seed an archive file directly into the upload directory.
    fn seed_archive(&self, filename: &str, bytes: &[u8]) {
        std::fs::write(self.upload_dir().join(filename), bytes).unwrap();
    }
}

async fn send(router: Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

// ============================================================================
// Auth
// ============================================================================

#[tokio::test]
async fn test_login_success() {
    let app = TestApp::new();
    let (status, body) = send(
        app.router(),
        json_request(
            "POST",
            "/api/auth/login",
            serde_json::json!({ "username": "admin", "password": "password" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token"], "fake-jwt-token");
    assert_eq!(body["user"]["username"], "admin");
    assert_eq!(body["user"]["role"], "admin");
}

#[tokio::test]
async fn test_login_rejects_bad_credentials() {
    let app = TestApp::new();
    let (status, body) = send(
        app.router(),
        json_request(
            "POST",
            "/api/auth/login",
            serde_json::json!({ "username": "admin", "password": "hunter2" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());
}

// ============================================================================
// Catalog listing
// ============================================================================

#[tokio::test]
async fn test_list_machines_seeded() {
    let app = TestApp::new();
    let (status, body) = send(app.router(), get_request("/api/machines")).await;

    assert_eq!(status, StatusCode::OK);
    let machines = body.as_array().unwrap();
    assert_eq!(machines.len(), 6);
    assert_eq!(machines[0]["name"], "anonymouspingu");
    assert_eq!(machines[0]["difficulty"], "Intermedio");
    assert_eq!(machines[1]["size"], "159.3 MB");
    // Resolver cache fields stay internal
    assert!(machines[0].get("file_exists").is_none());
    assert!(machines[0].get("filePath").is_none());
}

#[tokio::test]
async fn test_list_machines_refresh_recomputes_sizes() {
    let app = TestApp::new();
    app.seed_archive("mirame.zip", &[0u8; 1536]);

    let (status, body) = send(app.router(), get_request("/api/machines?refresh=true")).await;
    assert_eq!(status, StatusCode::OK);

    let machines = body.as_array().unwrap();
    let mirame = machines.iter().find(|m| m["name"] == "mirame").unwrap();
    assert_eq!(mirame["size"], "1.5 KB");
    let other = machines.iter().find(|m| m["name"] == "whoiam").unwrap();
    assert_eq!(other["size"], "No disponible");

    // Second refresh without filesystem changes is identical
    let (_, again) = send(app.router(), get_request("/api/machines?refresh=true")).await;
    assert_eq!(body, again);
}

// ============================================================================
// Update / delete / writeups
// ============================================================================

#[tokio::test]
async fn test_update_machine() {
    let app = TestApp::new();
    let (status, body) = send(
        app.router(),
        json_request(
            "PUT",
            "/api/machines/2",
            serde_json::json!({
                "description": "actualizada",
                "difficulty": "Avanzado",
                "tags": "Web, Samba",
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["machine"]["description"], "actualizada");
    assert_eq!(body["machine"]["difficulty"], "Avanzado");
    assert_eq!(body["machine"]["tags"], serde_json::json!(["Web", "Samba"]));
}

#[tokio::test]
async fn test_update_accepts_tags_as_list() {
    let app = TestApp::new();
    let (status, body) = send(
        app.router(),
        json_request(
            "PUT",
            "/api/machines/3",
            serde_json::json!({ "tags": ["LFI", "RFI"] }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["machine"]["tags"], serde_json::json!(["LFI", "RFI"]));
}

#[tokio::test]
async fn test_update_unknown_machine_is_404() {
    let app = TestApp::new();
    let (status, body) = send(
        app.router(),
        json_request("PUT", "/api/machines/99", serde_json::json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_delete_machine_removes_record_and_archive() {
    let app = TestApp::new();
    app.seed_archive("mirame.zip", b"bytes");

    let (status, _) = send(
        app.router(),
        Request::builder()
            .method("DELETE")
            .uri("/api/machines/4")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!app.upload_dir().join("mirame.zip").exists());

    let (_, body) = send(app.router(), get_request("/api/machines")).await;
    let machines = body.as_array().unwrap();
    assert_eq!(machines.len(), 5);
    assert!(machines.iter().all(|m| m["id"] != 4));
}

#[tokio::test]
async fn test_delete_unknown_machine_is_404() {
    let app = TestApp::new();
    let (status, _) = send(
        app.router(),
        Request::builder()
            .method("DELETE")
            .uri("/api/machines/42")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_non_numeric_machine_id_is_404() {
    let app = TestApp::new();
    let (status, _) = send(
        app.router(),
        Request::builder()
            .method("DELETE")
            .uri("/api/machines/notanid")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_add_writeup() {
    let app = TestApp::new();
    let (status, body) = send(
        app.router(),
        json_request(
            "POST",
            "/api/machines/1/writeup",
            serde_json::json!({ "title": "T", "url": "http://x" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["writeup"]["addedBy"], "admin");
    assert_eq!(body["writeup"]["title"], "T");
    assert!(body["writeup"]["createdAt"].as_str().unwrap().contains('T'));

    let (_, listing) = send(app.router(), get_request("/api/machines")).await;
    let machine = listing
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["id"] == 1)
        .unwrap();
    assert_eq!(machine["writeups"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_add_writeup_requires_title_and_url() {
    let app = TestApp::new();
    let (status, _) = send(
        app.router(),
        json_request(
            "POST",
            "/api/machines/1/writeup",
            serde_json::json!({ "title": "T" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// Check & download
// ============================================================================

#[tokio::test]
async fn test_check_machine() {
    let app = TestApp::new();
    app.seed_archive("foo.zip", &[0u8; 10]);

    let (status, body) = send(app.router(), get_request("/api/machines/foo/check")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], true);
    assert_eq!(body["size"], 10);
    assert_eq!(body["sizeFormatted"], "10 B");
    assert!(body["path"].as_str().unwrap().ends_with("foo.zip"));

    let (status, body) = send(app.router(), get_request("/api/machines/nope/check")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], false);
}

#[tokio::test]
async fn test_download_streams_exact_bytes_with_headers() {
    let app = TestApp::new();
    app.seed_archive("foo.zip", b"0123456789");

    let response = app
        .router()
        .oneshot(get_request("/api/machines/foo/download"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "application/zip");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"foo.zip\""
    );
    assert_eq!(headers[header::CONTENT_LENGTH], "10");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache");

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"0123456789");
}

#[tokio::test]
async fn test_download_missing_machine_is_404() {
    let app = TestApp::new();
    let (status, body) = send(app.router(), get_request("/api/machines/ghost/download")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_download_sanitizes_traversal_attempts() {
    let app = TestApp::new();
    // Resolves as "etcpasswd" after sanitization, which does not exist.
    let (status, _) = send(
        app.router(),
        get_request("/api/machines/..%2F..%2Fetc%2Fpasswd/download"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_download_by_filename_alias() {
    let app = TestApp::new();
    app.seed_archive("foo.ova", b"ova-bytes");

    let response = app
        .router()
        .oneshot(get_request("/api/download/foo.ova"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/octet-stream"
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"ova-bytes");
}

// ============================================================================
// Upload
// ============================================================================

const BOUNDARY: &str = "cyberlab-test-boundary";

fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
        );
        body.extend_from_slice(value.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    if let Some((filename, bytes)) = file {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"machineFile\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/zip\r\n\r\n");
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/machines/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(fields, file)))
        .unwrap()
}

#[tokio::test]
async fn test_upload_end_to_end() {
    let app = TestApp::new();

    let (status, body) = send(
        app.router(),
        upload_request(
            &[
                ("name", "foo"),
                ("description", "bar"),
                ("difficulty", "Fácil"),
                ("tags", "Web, Linux"),
            ],
            Some(("test.zip", &[7u8; 10])),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["machine"]["id"], 7);
    assert_eq!(body["machine"]["size"], "10 B");
    assert_eq!(body["machine"]["difficulty"], "Fácil");
    assert_eq!(body["machine"]["tags"], serde_json::json!(["Web", "Linux"]));
    assert!(app.upload_dir().join("foo.zip").is_file());

    // And the archive streams back byte for byte
    let response = app
        .router()
        .oneshot(get_request("/api/machines/foo/download"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "10");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], &[7u8; 10]);
}

#[tokio::test]
async fn test_upload_requires_metadata_fields() {
    let app = TestApp::new();

    let (status, body) = send(
        app.router(),
        upload_request(
            &[("name", "foo"), ("difficulty", "Fácil")],
            Some(("test.zip", b"x")),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    // No record created, no stray files kept
    let (_, listing) = send(app.router(), get_request("/api/machines")).await;
    assert_eq!(listing.as_array().unwrap().len(), 6);
    let leftovers: Vec<_> = std::fs::read_dir(app.upload_dir()).unwrap().collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_upload_requires_a_file() {
    let app = TestApp::new();
    let (status, _) = send(
        app.router(),
        upload_request(
            &[
                ("name", "foo"),
                ("description", "bar"),
                ("difficulty", "Fácil"),
            ],
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_over_limit_is_rejected() {
    let app = TestApp::with_upload_limit(8);

    let (status, body) = send(
        app.router(),
        upload_request(
            &[
                ("name", "foo"),
                ("description", "bar"),
                ("difficulty", "Fácil"),
            ],
            Some(("test.zip", &[0u8; 16])),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("upload limit"));

    // No catalog entry and no staged file left behind
    let (_, listing) = send(app.router(), get_request("/api/machines")).await;
    assert_eq!(listing.as_array().unwrap().len(), 6);
    let leftovers: Vec<_> = std::fs::read_dir(app.upload_dir()).unwrap().collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_upload_rejects_unsupported_extension() {
    let app = TestApp::new();
    let (status, body) = send(
        app.router(),
        upload_request(
            &[
                ("name", "foo"),
                ("description", "bar"),
                ("difficulty", "Fácil"),
            ],
            Some(("malware.exe", b"MZ")),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Unsupported"));
}

// ============================================================================
// Introspection
// ============================================================================

#[tokio::test]
async fn test_root_banner() {
    let app = TestApp::new();
    let (status, body) = send(app.router(), get_request("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "online");
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    app.seed_archive("foo.zip", &[0u8; 2048]);

    let (status, body) = send(app.router(), get_request("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
    assert_eq!(body["machines"], 6);
    assert_eq!(body["statistics"]["totalFiles"], 1);
    assert_eq!(body["statistics"]["totalSizeFormatted"], "2 KB");
}

#[tokio::test]
async fn test_list_files() {
    let app = TestApp::new();
    app.seed_archive("foo.zip", &[0u8; 1536]);
    app.seed_archive("bar.ova", b"12345");

    let (status, body) = send(app.router(), get_request("/api/files")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["totalSize"], 1541);

    let files = body["files"].as_array().unwrap();
    let foo = files.iter().find(|f| f["filename"] == "foo.zip").unwrap();
    assert_eq!(foo["sizeFormatted"], "1.5 KB");
    assert_eq!(foo["downloadUrl"], "/api/download/foo.zip");
}

#[tokio::test]
async fn test_unknown_api_route_is_404() {
    let app = TestApp::new();
    let (status, body) = send(app.router(), get_request("/api/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}
