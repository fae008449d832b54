//! Integration tests for the blob storage backends.
//!
//! Filesystem tests run against a temp directory; Supabase tests run against
//! a wiremock server standing in for the storage REST API.

use manuals_db::{BlobStorage, FilesystemBlobStorage, StorageConfig, SupabaseBlobStorage, UploadOptions};
use tempfile::TempDir;
use wiremock::matchers::{body_bytes, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// FILESYSTEM
// ============================================================================

#[tokio::test]
async fn test_filesystem_upload_then_download() {
    let dir = TempDir::new().unwrap();
    let storage = FilesystemBlobStorage::new(dir.path());

    let stored = storage
        .upload("manuals/abc/manual.pdf", b"%PDF-1.7", &UploadOptions::default())
        .await
        .unwrap();
    assert_eq!(stored, "manuals/abc/manual.pdf");

    let data = storage.download("manuals/abc/manual.pdf").await.unwrap();
    assert_eq!(data, b"%PDF-1.7");
    assert!(dir.path().join("manuals/abc/manual.pdf").exists());
}

#[tokio::test]
async fn test_filesystem_rejects_overwrite_without_upsert() {
    let dir = TempDir::new().unwrap();
    let storage = FilesystemBlobStorage::new(dir.path());
    let options = UploadOptions::default();

    storage.upload("manuals/abc/a.pdf", b"one", &options).await.unwrap();
    let err = storage
        .upload("manuals/abc/a.pdf", b"two", &options)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "UPLOAD_ERROR");
    assert_eq!(storage.download("manuals/abc/a.pdf").await.unwrap(), b"one");
}

#[tokio::test]
async fn test_filesystem_upsert_overwrites() {
    let dir = TempDir::new().unwrap();
    let storage = FilesystemBlobStorage::new(dir.path());
    let options = UploadOptions::new("application/json").with_upsert(true);

    storage.upload("manuals/abc/dip.json", b"{}", &options).await.unwrap();
    storage
        .upload("manuals/abc/dip.json", b"{\"entities\":[]}", &options)
        .await
        .unwrap();
    assert_eq!(
        storage.download("manuals/abc/dip.json").await.unwrap(),
        b"{\"entities\":[]}"
    );
}

#[tokio::test]
async fn test_filesystem_leaves_no_temp_files() {
    let dir = TempDir::new().unwrap();
    let storage = FilesystemBlobStorage::new(dir.path());
    storage
        .upload("manuals/abc/a.pdf", b"data", &UploadOptions::default())
        .await
        .unwrap();

    let names: Vec<String> = std::fs::read_dir(dir.path().join("manuals/abc"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["a.pdf".to_string()]);
}

#[tokio::test]
async fn test_filesystem_missing_blob_is_not_found() {
    let dir = TempDir::new().unwrap();
    let storage = FilesystemBlobStorage::new(dir.path());
    let err = storage.download("manuals/nope/a.pdf").await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_filesystem_rejects_traversal() {
    let dir = TempDir::new().unwrap();
    let storage = FilesystemBlobStorage::new(dir.path().join("blobs"));
    let err = storage
        .upload("../escape.pdf", b"x", &UploadOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");
    assert!(!dir.path().join("escape.pdf").exists());
}

#[tokio::test]
async fn test_storage_config_builds_filesystem_backend() {
    let dir = TempDir::new().unwrap();
    let storage = StorageConfig::filesystem(dir.path()).build().unwrap();
    storage
        .upload("manuals/x/y.pdf", b"z", &UploadOptions::default())
        .await
        .unwrap();
    assert_eq!(storage.download("manuals/x/y.pdf").await.unwrap(), b"z");
}

// ============================================================================
// SUPABASE
// ============================================================================

#[tokio::test]
async fn test_supabase_upload_sends_auth_and_upsert_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/storage/v1/object/documents/manuals/abc/manual.pdf"))
        .and(header("apikey", "service-key"))
        .and(header("authorization", "Bearer service-key"))
        .and(header("x-upsert", "false"))
        .and(header("content-type", "application/pdf"))
        .and(body_bytes(b"%PDF".to_vec()))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"Key": "documents/manuals/abc/manual.pdf"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let storage = SupabaseBlobStorage::new(server.uri(), "service-key", "documents").unwrap();
    let stored = storage
        .upload("manuals/abc/manual.pdf", b"%PDF", &UploadOptions::default())
        .await
        .unwrap();
    assert_eq!(stored, "manuals/abc/manual.pdf");
}

#[tokio::test]
async fn test_supabase_upload_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(409).set_body_string("Duplicate"))
        .mount(&server)
        .await;

    let storage = SupabaseBlobStorage::new(server.uri(), "k", "documents").unwrap();
    let err = storage
        .upload("manuals/abc/manual.pdf", b"%PDF", &UploadOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "UPLOAD_ERROR");
    assert!(err.to_string().contains("409"));
}

#[tokio::test]
async fn test_supabase_download() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/storage/v1/object/authenticated/documents/manuals/abc/manual.pdf",
        ))
        .and(header("apikey", "k"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-bytes".to_vec()))
        .mount(&server)
        .await;

    let storage = SupabaseBlobStorage::new(server.uri(), "k", "documents").unwrap();
    let data = storage.download("manuals/abc/manual.pdf").await.unwrap();
    assert_eq!(data, b"%PDF-bytes");
}

#[tokio::test]
async fn test_supabase_download_missing_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let storage = SupabaseBlobStorage::new(server.uri(), "k", "documents").unwrap();
    let err = storage.download("manuals/abc/manual.pdf").await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}
