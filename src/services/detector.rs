use async_trait::async_trait;
use base64::Engine;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::io::Cursor;
use std::time::Duration;

/// Maximum number of labels requested per detection call.
pub const MAX_LABELS: u32 = 20;
/// Labels below this confidence are not returned by the service.
pub const MIN_CONFIDENCE: f64 = 50.0;
/// How many times a throughput rejection is retried before giving up.
const THROUGHPUT_RETRIES: u32 = 50;
const RETRY_DELAY: Duration = Duration::from_secs(5);
/// Images are downscaled so neither dimension exceeds this before upload.
const RESIZE_BOUND: u32 = 1024;

/// One label found in an image.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetectedLabel {
    pub name: String,
    pub confidence: f64,
}

/// Label detection backend.
#[async_trait]
pub trait LabelDetector: Send + Sync {
    async fn detect(&self, image: &[u8], resize: bool) -> Result<Vec<DetectedLabel>, DetectorError>;
}

/// Client for the HTTP label detection service.
pub struct DetectorClient {
    http: Client,
    base_url: String,
    api_token: String,
}

#[derive(Deserialize)]
struct DetectLabelsResponse {
    labels: Vec<DetectedLabel>,
}

impl DetectorClient {
    pub fn new(base_url: String, api_token: String) -> Self {
        Self {
            http: Client::new(),
            base_url,
            api_token,
        }
    }
}

#[async_trait]
impl LabelDetector for DetectorClient {
    async fn detect(&self, image: &[u8], resize: bool) -> Result<Vec<DetectedLabel>, DetectorError> {
        let payload = if resize {
            resize_for_detection(image).map_err(DetectorError::Decode)?
        } else {
            image.to_vec()
        };

        let url = format!("{}/v1/detect-labels", self.base_url);
        let body = serde_json::json!({
            "image": base64::engine::general_purpose::STANDARD.encode(&payload),
            "max_labels": MAX_LABELS,
            "min_confidence": MIN_CONFIDENCE,
        });

        let mut attempts = 0;
        loop {
            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.api_token)
                .json(&body)
                .send()
                .await
                .map_err(DetectorError::Http)?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
                attempts += 1;
                if attempts > THROUGHPUT_RETRIES {
                    return Err(DetectorError::Throttled);
                }
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
            if !status.is_success() {
                return Err(DetectorError::Status(status.as_u16()));
            }

            let parsed: DetectLabelsResponse =
                response.json().await.map_err(DetectorError::Http)?;
            return Ok(parsed.labels);
        }
    }
}

/// Downscale an image so neither dimension exceeds [`RESIZE_BOUND`] and
/// re-encode as JPEG. Images already within bounds pass through untouched.
fn resize_for_detection(bytes: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    if img.width() <= RESIZE_BOUND && img.height() <= RESIZE_BOUND {
        return Ok(bytes.to_vec());
    }

    let resized = img.resize(RESIZE_BOUND, RESIZE_BOUND, FilterType::Triangle);
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, ImageFormat::Jpeg)?;
    Ok(out.into_inner())
}

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Could not decode image for resizing: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Detection service returned status {0}")]
    Status(u16),

    #[error("Detection service throughput exceeded after {THROUGHPUT_RETRIES} retries")]
    Throttled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn jpeg_of(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            image::Rgb([120, 40, 200]),
        ));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    #[test]
    fn resize_bounds_large_images() {
        let big = jpeg_of(3000, 1500);
        let resized = resize_for_detection(&big).unwrap();
        let img = image::load_from_memory(&resized).unwrap();
        assert!(img.width() <= RESIZE_BOUND);
        assert!(img.height() <= RESIZE_BOUND);
        // aspect ratio is preserved, so the longer edge hits the bound
        assert_eq!(img.width(), RESIZE_BOUND);
    }

    #[test]
    fn resize_passes_small_images_through() {
        let small = jpeg_of(640, 480);
        let untouched = resize_for_detection(&small).unwrap();
        assert_eq!(untouched, small);
    }

    #[test]
    fn resize_rejects_undecodable_bytes() {
        assert!(resize_for_detection(b"not an image").is_err());
    }
}
