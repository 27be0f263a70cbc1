//! End-to-end tests of the HTTP surface against a mock-backed remover
//!
//! Requests go through the full router (CORS, body limit, tracing) with
//! `tower::ServiceExt::oneshot`, so no socket is bound.

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use bgremove_server::{
    server::{self, AppState, HEALTH_PATH, REMOVE_BACKGROUND_PATH},
    BackgroundRemovalProcessor, BackgroundRemover, MockBackend, RemovalConfig, ServerConfig,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use std::io::Cursor;
use tower::ServiceExt;

const BOUNDARY: &str = "X-BGREMOVE-TEST-BOUNDARY";

fn app_with(backend: MockBackend, config: &ServerConfig) -> Router {
    let processor = BackgroundRemovalProcessor::from_backend(RemovalConfig::default(), Box::new(backend)).unwrap();
    let remover = BackgroundRemover::from_processor(processor).unwrap();
    server::build_router(AppState::new(remover, config), config)
}

fn app() -> Router {
    app_with(MockBackend::new(), &ServerConfig::default())
}

fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
    bytes
}

/// Left half dark, right half bright
fn test_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgb([20, 30, 40])
        } else {
            Rgb([230, 220, 210])
        }
    }))
}

fn multipart_body(field: &str, filename: Option<&str>, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    match filename {
        Some(filename) => body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n").as_bytes(),
        ),
        None => body.extend_from_slice(format!("Content-Disposition: form-data; name=\"{field}\"\r\n").as_bytes()),
    }
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(REMOVE_BACKGROUND_PATH)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Option<String>, Vec<u8>) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string());
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec();
    (status, content_type, body)
}

fn error_code(body: &[u8]) -> String {
    let json: Value = serde_json::from_slice(body).unwrap();
    json["code"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_jpeg_upload_returns_rgba_png_of_same_size() {
    let jpeg = encode(&test_image(512, 384), ImageFormat::Jpeg);
    let (status, content_type, body) = send(app(), upload_request(multipart_body("file", Some("photo.jpg"), &jpeg))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("image/png"));
    assert!(body.starts_with(b"\x89PNG\r\n\x1a\n"));

    let cutout = image::load_from_memory_with_format(&body, ImageFormat::Png).unwrap();
    assert_eq!(cutout.color(), image::ColorType::Rgba8);
    assert_eq!((cutout.width(), cutout.height()), (512, 384));
}

#[tokio::test]
async fn test_rgb_channels_are_preserved() {
    let png = encode(&test_image(64, 48), ImageFormat::Png);
    let (status, _, body) = send(app(), upload_request(multipart_body("file", Some("in.png"), &png))).await;
    assert_eq!(status, StatusCode::OK);

    let cutout = image::load_from_memory(&body).unwrap().to_rgba8();
    let left = cutout.get_pixel(2, 10);
    let right = cutout.get_pixel(60, 10);
    assert_eq!(&left.0[..3], &[20, 30, 40]);
    assert_eq!(&right.0[..3], &[230, 220, 210]);
}

#[tokio::test]
async fn test_single_pixel_image() {
    let png = encode(&test_image(1, 1), ImageFormat::Png);
    let (status, _, body) = send(app(), upload_request(multipart_body("file", Some("dot.png"), &png))).await;

    assert_eq!(status, StatusCode::OK);
    let cutout = image::load_from_memory(&body).unwrap();
    assert_eq!((cutout.width(), cutout.height()), (1, 1));
}

#[tokio::test]
async fn test_empty_file_is_rejected_and_server_keeps_working() {
    let app = app();

    let (status, content_type, body) = send(app.clone(), upload_request(multipart_body("file", Some("empty.png"), &[]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(content_type.as_deref(), Some("application/json"));
    assert_eq!(error_code(&body), "decode_error");

    let png = encode(&test_image(32, 32), ImageFormat::Png);
    let (status, _, _) = send(app, upload_request(multipart_body("file", Some("ok.png"), &png))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_undecodable_bytes_are_a_client_error() {
    let (status, _, body) = send(
        app(),
        upload_request(multipart_body("file", Some("notes.txt"), b"definitely not an image")),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], 400);
    assert_eq!(json["code"], "decode_error");
    assert!(json["message"].as_str().is_some_and(|m| !m.is_empty()));
}

#[tokio::test]
async fn test_missing_file_field() {
    let (status, _, body) = send(app(), upload_request(multipart_body("comment", None, b"hello"))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "missing_file");
}

#[tokio::test]
async fn test_first_named_file_part_is_used_when_field_differs() {
    let png = encode(&test_image(20, 10), ImageFormat::Png);
    let (status, _, body) = send(app(), upload_request(multipart_body("image", Some("upload.png"), &png))).await;

    assert_eq!(status, StatusCode::OK);
    let cutout = image::load_from_memory(&body).unwrap();
    assert_eq!((cutout.width(), cutout.height()), (20, 10));
}

#[tokio::test]
async fn test_custom_upload_field() {
    let config = ServerConfig {
        upload_field: "image".to_string(),
        ..ServerConfig::default()
    };
    let png = encode(&test_image(16, 16), ImageFormat::Png);
    let (status, _, _) = send(
        app_with(MockBackend::new(), &config),
        upload_request(multipart_body("image", None, &png)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_non_multipart_request() {
    let request = Request::builder()
        .method(Method::POST)
        .uri(REMOVE_BACKGROUND_PATH)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let (status, _, body) = send(app(), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "invalid_multipart");
}

#[tokio::test]
async fn test_get_is_not_allowed() {
    let request = Request::builder()
        .method(Method::GET)
        .uri(REMOVE_BACKGROUND_PATH)
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(app(), request).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_upload_over_limit_is_rejected() {
    let config = ServerConfig {
        max_upload_bytes: 1024,
        ..ServerConfig::default()
    };
    let (status, _, body) = send(
        app_with(MockBackend::new(), &config),
        upload_request(multipart_body("file", Some("big.bin"), &vec![7_u8; 16 * 1024])),
    )
    .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(error_code(&body), "payload_too_large");
}

#[tokio::test]
async fn test_inference_failure_is_a_server_error() {
    let png = encode(&test_image(16, 16), ImageFormat::Png);
    let (status, _, body) = send(
        app_with(MockBackend::new_failing_inference(), &ServerConfig::default()),
        upload_request(multipart_body("file", Some("x.png"), &png)),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_code(&body), "processing_error");
}

#[tokio::test]
async fn test_same_input_gives_same_output() {
    let app = app();
    let png = encode(&test_image(48, 32), ImageFormat::Png);

    let (_, _, first) = send(app.clone(), upload_request(multipart_body("file", Some("a.png"), &png))).await;
    let (_, _, second) = send(app, upload_request(multipart_body("file", Some("a.png"), &png))).await;

    let first = image::load_from_memory(&first).unwrap().to_rgba8();
    let second = image::load_from_memory(&second).unwrap().to_rgba8();
    assert_eq!(first, second);
}

/// Bright rectangle at an offset that depends on `seed`, on a dark background
fn seeded_image(seed: u32) -> DynamicImage {
    let (width, height) = (40 + seed * 3, 30 + seed * 2);
    let (left, top) = (seed * 2, seed);
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        if (left..left + width / 2).contains(&x) && (top..top + height / 2).contains(&y) {
            Rgb([240, (seed * 25) as u8, 60])
        } else {
            Rgb([10, 10, (seed * 20) as u8])
        }
    }))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_match_serial_results() {
    let app = app();
    let uploads: Vec<Vec<u8>> = (0..8_u32)
        .map(|seed| encode(&seeded_image(seed), ImageFormat::Png))
        .collect();

    let mut serial = Vec::new();
    for png in &uploads {
        let (status, _, body) = send(app.clone(), upload_request(multipart_body("file", Some("s.png"), png))).await;
        assert_eq!(status, StatusCode::OK);
        serial.push(image::load_from_memory(&body).unwrap().to_rgba8());
    }

    let tasks: Vec<_> = uploads
        .iter()
        .map(|png| {
            let app = app.clone();
            let body = multipart_body("file", Some("c.png"), png);
            tokio::spawn(async move { send(app, upload_request(body)).await })
        })
        .collect();

    for ((seed, task), expected) in (0..8_u32).zip(tasks).zip(&serial) {
        let (status, _, body) = task.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        let cutout = image::load_from_memory(&body).unwrap().to_rgba8();
        assert_eq!(cutout.dimensions(), (40 + seed * 3, 30 + seed * 2));
        assert_eq!(&cutout, expected, "request {seed} differs from its serial result");
    }
}

#[tokio::test]
async fn test_cors_preflight_allows_any_origin() {
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri(REMOVE_BACKGROUND_PATH)
        .header(header::ORIGIN, "https://example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type,x-custom")
        .body(Body::empty())
        .unwrap();
    let response = app().oneshot(request).await.unwrap();

    assert!(response.status().is_success());
    let headers = response.headers();
    assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
    let methods = headers.get(header::ACCESS_CONTROL_ALLOW_METHODS).unwrap().to_str().unwrap();
    assert!(methods.contains("POST"));
    assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_HEADERS).unwrap(), "*");
}

#[tokio::test]
async fn test_cors_header_on_actual_response() {
    let png = encode(&test_image(8, 8), ImageFormat::Png);
    let mut request = upload_request(multipart_body("file", Some("x.png"), &png));
    request
        .headers_mut()
        .insert(header::ORIGIN, "https://example.com".parse().unwrap());
    let response = app().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
}

#[tokio::test]
async fn test_health_reports_loaded_model() {
    let request = Request::builder().uri(HEALTH_PATH).body(Body::empty()).unwrap();
    let (status, _, body) = send(app(), request).await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["model"], "mock-contrast");
    assert_eq!(json["backend"], "custom");
    assert!(json["started_at"].as_str().is_some());
}
