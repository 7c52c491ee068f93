//! Handler behavior through the router, against a scratch directory.

use filedrop::files::FileGateway;
use filedrop::http::request::{Method, Request, RequestBuilder};
use filedrop::http::response::{Body, Response, StatusCode};
use filedrop::service::{Route, Router};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    uploads: PathBuf,
    router: Router,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("www");
    std::fs::create_dir(&root).unwrap();
    let root = root.canonicalize().unwrap();
    let uploads = root.join("uploads");
    std::fs::create_dir(&uploads).unwrap();
    std::fs::write(root.join("index.html"), "<h1>Unit Test Index</h1>").unwrap();

    let router = Router::new(FileGateway::new(&root, &uploads));
    Fixture {
        _dir: dir,
        root,
        uploads,
        router,
    }
}

fn get(path: &str) -> Request {
    RequestBuilder::new().method(Method::GET).path(path).build().unwrap()
}

fn delete(path: &str) -> Request {
    RequestBuilder::new().method(Method::DELETE).path(path).build().unwrap()
}

/// Collects a body, reading it from disk when it is a streamed file.
async fn body_bytes(response: Response) -> Vec<u8> {
    match response.body {
        Body::Full(bytes) => bytes.to_vec(),
        Body::File { mut file, len } => {
            let mut out = Vec::new();
            file.read_to_end(&mut out).await.unwrap();
            assert_eq!(out.len() as u64, len);
            out
        }
    }
}

fn upload_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

#[test]
fn test_route_by_method() {
    assert_eq!(Router::route(&get("/")), Route::ServeFile);
    assert_eq!(Router::route(&delete("/")), Route::DeleteFile);

    let post = RequestBuilder::new().method(Method::POST).path("/").build().unwrap();
    assert_eq!(Router::route(&post), Route::StoreUpload);

    let put = RequestBuilder::new()
        .method(Method::Other("PUT".to_string()))
        .path("/")
        .build()
        .unwrap();
    assert_eq!(Router::route(&put), Route::Unsupported);
}

#[tokio::test]
async fn test_get_root_serves_index() {
    let fx = fixture();
    let response = fx.router.handle(&get("/")).await;

    assert_eq!(response.status, StatusCode::Ok);
    assert_eq!(
        response.headers.get("Content-Type").unwrap(),
        "text/html; charset=utf-8"
    );
    assert_eq!(body_bytes(response).await, b"<h1>Unit Test Index</h1>");
}

#[tokio::test]
async fn test_get_file_is_byte_identical() {
    let fx = fixture();
    let contents: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    std::fs::write(fx.root.join("blob.bin"), &contents).unwrap();

    let response = fx.router.handle(&get("/blob.bin")).await;

    assert_eq!(response.status, StatusCode::Ok);
    assert_eq!(
        response.headers.get("Content-Length").unwrap(),
        &contents.len().to_string()
    );
    assert_eq!(body_bytes(response).await, contents);
}

#[tokio::test]
async fn test_get_missing_is_404() {
    let fx = fixture();
    let response = fx.router.handle(&get("/ghost_file.html")).await;
    assert_eq!(response.status, StatusCode::NotFound);
}

#[tokio::test]
async fn test_traversal_is_403_whether_or_not_target_exists() {
    let fx = fixture();
    // A real file just outside the root.
    std::fs::write(fx.root.parent().unwrap().join("Makefile"), "all:").unwrap();

    for path in ["/../Makefile", "/../does-not-exist"] {
        let response = fx.router.handle(&get(path)).await;
        assert_eq!(response.status, StatusCode::Forbidden, "GET {path}");

        let response = fx.router.handle(&delete(path)).await;
        assert_eq!(response.status, StatusCode::Forbidden, "DELETE {path}");
    }

    assert!(fx.root.parent().unwrap().join("Makefile").exists());
}

#[tokio::test]
async fn test_post_stores_exactly_one_file() {
    let fx = fixture();
    let data: Vec<u8> = b"\xDE\xAD\xBE\xEF".repeat(100);

    let req = RequestBuilder::new()
        .method(Method::POST)
        .path("/")
        .body(data.clone())
        .build()
        .unwrap();
    let response = fx.router.handle(&req).await;

    assert_eq!(response.status, StatusCode::Created);

    let files: Vec<_> = std::fs::read_dir(&fx.uploads)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    assert_eq!(std::fs::read(&files[0]).unwrap(), data);

    let name = files[0].file_name().unwrap().to_str().unwrap();
    assert_eq!(response.headers.get("X-Upload-Name").unwrap(), name);
}

#[tokio::test]
async fn test_post_without_content_length_is_400() {
    let fx = fixture();
    let req = RequestBuilder::new().method(Method::POST).path("/").build().unwrap();

    let response = fx.router.handle(&req).await;

    assert_eq!(response.status, StatusCode::BadRequest);
    assert_eq!(upload_count(&fx.uploads), 0);
}

#[tokio::test]
async fn test_post_empty_body_with_length_is_created() {
    let fx = fixture();
    let req = RequestBuilder::new()
        .method(Method::POST)
        .path("/")
        .body(Vec::new())
        .build()
        .unwrap();

    let response = fx.router.handle(&req).await;

    assert_eq!(response.status, StatusCode::Created);
    assert_eq!(upload_count(&fx.uploads), 1);
}

#[tokio::test]
async fn test_concurrent_posts_do_not_collide() {
    let fx = std::sync::Arc::new(fixture());

    let mut tasks = Vec::new();
    for i in 0..20u8 {
        let fx = fx.clone();
        tasks.push(tokio::spawn(async move {
            let req = RequestBuilder::new()
                .method(Method::POST)
                .path("/")
                .body(vec![i; 64])
                .build()
                .unwrap();
            fx.router.handle(&req).await.status
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap(), StatusCode::Created);
    }
    assert_eq!(upload_count(&fx.uploads), 20);
}

#[tokio::test]
async fn test_delete_then_delete_again() {
    let fx = fixture();
    let target = fx.root.join("to_delete.txt");
    std::fs::write(&target, "delete me").unwrap();

    let response = fx.router.handle(&delete("/to_delete.txt")).await;
    assert_eq!(response.status, StatusCode::Ok);
    assert!(!target.exists());

    let response = fx.router.handle(&delete("/to_delete.txt")).await;
    assert_eq!(response.status, StatusCode::NotFound);
}

#[tokio::test]
async fn test_delete_root_is_400() {
    let fx = fixture();

    for path in ["/", "/.", "/uploads/.."] {
        let response = fx.router.handle(&delete(path)).await;
        assert_eq!(response.status, StatusCode::BadRequest, "DELETE {path}");
        assert_eq!(response.body.as_bytes(), Some(&b"cannot delete root"[..]));
    }

    assert!(fx.root.join("index.html").exists());
}

#[tokio::test]
async fn test_unsupported_method_is_501_without_side_effects() {
    let fx = fixture();
    let req = RequestBuilder::new()
        .method(Method::Other("PUT".to_string()))
        .path("/index.html")
        .body(b"update".to_vec())
        .build()
        .unwrap();

    let response = fx.router.handle(&req).await;

    assert_eq!(response.status, StatusCode::NotImplemented);
    assert_eq!(
        std::fs::read_to_string(fx.root.join("index.html")).unwrap(),
        "<h1>Unit Test Index</h1>"
    );
    assert_eq!(upload_count(&fx.uploads), 0);
}
