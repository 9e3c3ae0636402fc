use axum::response::Html;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::diagnosis::{DiagnosisReport, extract_report};
use crate::processing::EncodedImage;
use crate::processing::image::format_name;

const INDEX_HTML: &str = include_str!("../assets/index.html");

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Debug, Serialize)]
pub struct ImageSummary {
    pub width: u32,
    pub height: u32,
    pub original_format: &'static str,
    pub downscaled: bool,
}

#[derive(Debug, Serialize)]
pub struct DiagnosisOutcome {
    pub request_id: String,
    /// Model text, byte for byte.
    pub diagnosis: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<DiagnosisReport>,
    pub image: ImageSummary,
    pub model: String,
    pub diagnosed_at: DateTime<Utc>,
}

impl DiagnosisOutcome {
    pub fn new(request_id: String, model: &str, image: &EncodedImage, diagnosis: String) -> Self {
        let report = extract_report(&diagnosis);
        if report.is_none() {
            tracing::debug!("Request {}: diagnosis did not follow the labelled layout", request_id);
        }

        Self {
            request_id,
            diagnosis,
            report,
            image: ImageSummary {
                width: image.width,
                height: image.height,
                original_format: format_name(image.original_format),
                downscaled: image.downscaled,
            },
            model: model.to_string(),
            diagnosed_at: Utc::now(),
        }
    }
}
