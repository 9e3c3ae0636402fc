use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

use super::validation::{ValidationError, expected_mime_type, validate_file};
use crate::{
    AppState,
    diagnosis::DiagnosisRequest,
    error::ApiError,
    presenter::DiagnosisOutcome,
    processing::EncodedImage,
};

/// `POST /api/diagnose`: one leaf photo in, one diagnosis out.
pub async fn handle_diagnosis_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<DiagnosisOutcome>, ApiError> {
    let request_id = Uuid::new_v4().to_string();

    let mut file_data = None;
    let mut file_name = String::new();
    let mut content_type = String::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        multipart_error(e, state.max_upload_bytes, "Failed to read multipart")
    })? {
        if field.name() != Some("file") {
            continue;
        }

        file_name = field.file_name().unwrap_or("unknown").to_string();
        content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        let data = field
            .bytes()
            .await
            .map_err(|e| multipart_error(e, state.max_upload_bytes, "Failed to read file"))?;

        file_data = Some(data);
    }

    let file_bytes = file_data.ok_or_else(|| ApiError::BadRequest("No file provided".to_string()))?;

    validate_file(&file_name, &file_bytes, state.max_upload_bytes).map_err(|e| {
        tracing::info!("Request {}: rejected upload {:?}: {}", request_id, file_name, e);
        e
    })?;

    if let Some(expected) = expected_mime_type(&file_name) {
        if expected != content_type {
            tracing::debug!(
                "Request {}: browser sent {} for {:?}, format will be sniffed from content",
                request_id,
                content_type,
                file_name
            );
        }
    }

    let encoded = prepare_image(&state, file_bytes).await.map_err(|e| {
        tracing::info!("Request {}: image rejected: {}", request_id, e);
        e
    })?;

    let request = DiagnosisRequest::new(encoded);
    let model = state.provider.model().to_string();
    state
        .request_counter
        .log_diagnosis_request(&request_id, &model, request.image().bytes.len());

    let diagnosis = match state.provider.diagnose(&request).await {
        Ok(text) => {
            state.request_counter.log_success(&request_id, text.chars().count());
            text
        }
        Err(e) => {
            state
                .request_counter
                .log_failure(&request_id, e.kind(), e.is_retryable(), &e.to_string());
            return Err(e.into());
        }
    };

    Ok(Json(DiagnosisOutcome::new(
        request_id,
        &model,
        request.image(),
        diagnosis,
    )))
}

/// Decodes and re-encodes off the async workers; the raw upload is dropped
/// once the PNG exists.
async fn prepare_image(state: &AppState, file_bytes: bytes::Bytes) -> Result<EncodedImage, ApiError> {
    let processor = state.image_processor;

    tokio::task::spawn_blocking(move || -> Result<EncodedImage, ApiError> {
        let uploaded = processor.decode(file_bytes)?;
        tracing::debug!(
            "Decoded {:?} upload: {}x{} from {} bytes",
            uploaded.format(),
            uploaded.width(),
            uploaded.height(),
            uploaded.byte_len()
        );
        Ok(processor.encode(uploaded)?)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("image task failed: {}", e)))?
}

fn multipart_error(
    e: axum::extract::multipart::MultipartError,
    limit: usize,
    context: &str,
) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::Validation(ValidationError::TooLarge { limit })
    } else {
        ApiError::BadRequest(format!("{}: {}", context, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnosis::prompt::DIAGNOSIS_INSTRUCTION;
    use crate::diagnosis::{DiagnosisError, DiagnosisProvider};
    use crate::error::DIAGNOSIS_UNAVAILABLE;
    use crate::processing::ImageProcessor;
    use crate::processing::image::tests::sample_png;
    use crate::request_counter::RequestCounter;
    use async_trait::async_trait;
    use axum::{
        Router,
        body::Body,
        http::{Request, header::CONTENT_TYPE},
    };
    use http_body_util::BodyExt;
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    /// Records what it was sent and answers with the image dimensions, or
    /// with the queued errors first.
    #[derive(Default)]
    struct RecordingProvider {
        seen: Mutex<Vec<(String, Vec<u8>)>>,
        failures: Mutex<Vec<DiagnosisError>>,
        fixed_reply: Option<String>,
    }

    impl RecordingProvider {
        fn replying(text: &str) -> Self {
            Self {
                fixed_reply: Some(text.to_string()),
                ..Default::default()
            }
        }

        fn failing_once(error: DiagnosisError) -> Self {
            Self {
                failures: Mutex::new(vec![error]),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl DiagnosisProvider for RecordingProvider {
        async fn diagnose(&self, request: &DiagnosisRequest) -> Result<String, DiagnosisError> {
            self.seen.lock().unwrap().push((
                request.instruction().to_string(),
                request.image().bytes.to_vec(),
            ));

            if let Some(err) = self.failures.lock().unwrap().pop() {
                return Err(err);
            }

            Ok(match &self.fixed_reply {
                Some(text) => text.clone(),
                None => format!(
                    "Plant: seen in {}x{} image\nDisease: Healthy",
                    request.image().width,
                    request.image().height
                ),
            })
        }

        fn model(&self) -> &str {
            "mock-model"
        }
    }

    fn app_with(provider: Arc<RecordingProvider>, max_upload_bytes: usize) -> Router {
        crate::app(AppState {
            provider,
            image_processor: ImageProcessor::new(2048),
            request_counter: RequestCounter::new(),
            max_upload_bytes,
        })
    }

    fn upload(file_name: &str, content_type: &str, data: &[u8]) -> Request<Body> {
        let boundary = "leafdocboundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/diagnose")
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_diagnosis_text_is_returned_verbatim() {
        let text = "Plant: Tomato\nDisease: Healthy\n...";
        let provider = Arc::new(RecordingProvider::replying(text));
        let app = app_with(provider.clone(), 1024 * 1024);

        let (status, body) = send(&app, upload("leaf.png", "image/png", &sample_png(12, 9, 1))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["diagnosis"], text);
        assert_eq!(body["model"], "mock-model");
        assert_eq!(body["image"]["width"], 12);
        assert_eq!(body["image"]["height"], 9);
        assert_eq!(body["report"]["plant_name"], "Tomato");
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_instruction_is_identical_and_images_never_mix() {
        let provider = Arc::new(RecordingProvider::default());
        let app = app_with(provider.clone(), 1024 * 1024);

        let first = sample_png(10, 10, 1);
        let second = sample_png(30, 20, 2);

        let (status, body) = send(&app, upload("a.png", "image/png", &first)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["diagnosis"], "Plant: seen in 10x10 image\nDisease: Healthy");

        let (status, body) = send(&app, upload("b.png", "image/png", &second)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["diagnosis"], "Plant: seen in 30x20 image\nDisease: Healthy");

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, DIAGNOSIS_INSTRUCTION);
        assert_eq!(seen[0].0.as_bytes(), seen[1].0.as_bytes());
        assert_ne!(seen[0].1, seen[1].1);

        let second_sent = image::load_from_memory(&seen[1].1).unwrap().to_rgba8();
        let second_uploaded = image::load_from_memory(&second).unwrap().to_rgba8();
        assert_eq!(second_sent, second_uploaded);
    }

    #[tokio::test]
    async fn test_corrupt_png_never_reaches_provider() {
        let provider = Arc::new(RecordingProvider::default());
        let app = app_with(provider.clone(), 1024 * 1024);

        let full = sample_png(16, 16, 4);
        let truncated = &full[..full.len() / 2];

        let (status, body) = send(&app, upload("leaf.png", "image/png", truncated)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "decode");
        assert_eq!(provider.calls(), 0);

        let (status, _) = send(&app, upload("leaf.png", "image/png", b"not an image at all")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_provider_failure_is_reported_and_next_upload_works() {
        let provider = Arc::new(RecordingProvider::failing_once(DiagnosisError::Transport(
            "connection refused".to_string(),
        )));
        let app = app_with(provider.clone(), 1024 * 1024);
        let image = sample_png(8, 8, 5);

        let (status, body) = send(&app, upload("leaf.png", "image/png", &image)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], DIAGNOSIS_UNAVAILABLE);
        assert_eq!(body["retryable"], true);

        let (status, body) = send(&app, upload("leaf.png", "image/png", &image)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["diagnosis"], "Plant: seen in 8x8 image\nDisease: Healthy");
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retryable() {
        let provider = Arc::new(RecordingProvider::failing_once(DiagnosisError::Unauthorized {
            status: 401,
            body: "API key not valid".to_string(),
        }));
        let app = app_with(provider, 1024 * 1024);

        let (status, body) = send(&app, upload("leaf.png", "image/png", &sample_png(4, 4, 0))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["retryable"], false);
        assert!(!body["error"].as_str().unwrap().contains("API key"));
    }

    #[tokio::test]
    async fn test_upload_validation() {
        let provider = Arc::new(RecordingProvider::default());
        let app = app_with(provider.clone(), 2000);

        let (status, _) = send(&app, upload("leaf.gif", "image/gif", &sample_png(4, 4, 0))).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let (status, _) = send(&app, upload("leaf.png", "image/png", &[])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, upload("leaf.png", "image/png", &vec![7u8; 5000])).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["kind"], "invalid_upload");

        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_body_over_multipart_limit_is_payload_too_large() {
        let provider = Arc::new(RecordingProvider::default());
        let max_upload_bytes = 1000;
        let app = app_with(provider.clone(), max_upload_bytes);

        let oversized = vec![7u8; max_upload_bytes + crate::MULTIPART_OVERHEAD_BYTES + 1];
        let (status, body) = send(&app, upload("leaf.png", "image/png", &oversized)).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["kind"], "invalid_upload");
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_file_field() {
        let app = app_with(Arc::new(RecordingProvider::default()), 1024);
        let boundary = "leafdocboundary";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n--{boundary}--\r\n"
        );
        let req = Request::builder()
            .method("POST")
            .uri("/api/diagnose")
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap();

        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No file provided");
    }

    #[tokio::test]
    async fn test_jpeg_named_png_is_sniffed_and_sent_as_png() {
        let provider = Arc::new(RecordingProvider::default());
        let app = app_with(provider.clone(), 1024 * 1024);

        let img = image::RgbImage::from_pixel(6, 5, image::Rgb([40, 160, 40]));
        let mut jpeg = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .unwrap();

        let (status, body) = send(&app, upload("leaf.png", "image/png", &jpeg)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["image"]["original_format"], "jpeg");

        let seen = provider.seen.lock().unwrap();
        assert_eq!(
            image::guess_format(&seen[0].1).unwrap(),
            image::ImageFormat::Png
        );
    }
}
