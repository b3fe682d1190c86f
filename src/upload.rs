//! Cloud upload
//!
//! Builds the motion event payload for a verified trigger and posts it to the
//! ingestion endpoint. Uploading never raises: every failure is logged and
//! reported as an [`UploadOutcome`] so the caller's local decision stands.

use crate::config::{DetectorConfig, UploadConfig};
use crate::error::VerifyError;
use crate::preprocess::Preprocessor;
use crate::types::Verification;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Event type reported for every verified trigger
pub const EVENT_TYPE_MOTION: &str = "motion_detected";

/// Body of `POST {api_url}/motion`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionEventPayload {
    pub event_id: String,
    pub sensor: String,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub confidence: f64,
    /// True only when the camera confirmed the trigger
    pub verified: bool,
    /// Seconds spent verifying
    pub verification_time: f64,
    pub verification_details: serde_json::Value,
    /// Base64 JPEG of the best frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Seconds since the epoch with microsecond resolution
pub fn epoch_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

/// Encode an RGB frame as JPEG and wrap it in standard base64
pub fn encode_jpeg_base64(frame: &RgbImage, quality: u8) -> Result<String, VerifyError> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100)).encode(
        frame.as_raw(),
        frame.width(),
        frame.height(),
        ColorType::Rgb8,
    )?;
    Ok(STANDARD.encode(jpeg))
}

/// Turns verifications into upload payloads
#[derive(Debug, Clone)]
pub struct EventEncoder {
    sensor_id: String,
    include_image: bool,
    jpeg_quality: u8,
    preprocessor: Preprocessor,
}

impl EventEncoder {
    pub fn new(
        sensor_id: impl Into<String>,
        upload: &UploadConfig,
        detector: &DetectorConfig,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            include_image: upload.include_image,
            jpeg_quality: upload.jpeg_quality,
            preprocessor: Preprocessor::new(detector),
        }
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    /// Build the payload for a verification observed at `at`
    ///
    /// A frame that fails to encode is dropped from the payload; the event is
    /// still reported.
    pub fn encode(&self, verification: &Verification, at: DateTime<Utc>) -> MotionEventPayload {
        let image = if self.include_image {
            verification
                .best_frame
                .as_ref()
                .and_then(|frame| match self.encode_frame(frame) {
                    Ok(encoded) => Some(encoded),
                    Err(e) => {
                        warn!(error = %e, "best frame could not be encoded, sending without image");
                        None
                    }
                })
        } else {
            None
        };

        let verification_details = serde_json::to_value(&verification.details)
            .unwrap_or_else(|_| serde_json::Value::String(verification.describe()));

        MotionEventPayload {
            event_id: Uuid::new_v4().to_string(),
            sensor: self.sensor_id.clone(),
            timestamp: epoch_seconds(at),
            event_type: EVENT_TYPE_MOTION.to_string(),
            confidence: round3(verification.confidence),
            verified: verification.is_camera_verified(),
            verification_time: round3(verification.duration.as_secs_f64()),
            verification_details,
            image,
        }
    }

    fn encode_frame(&self, frame: &RgbImage) -> Result<String, VerifyError> {
        let normalized = self.preprocessor.normalize_color(frame)?;
        encode_jpeg_base64(&normalized, self.jpeg_quality)
    }
}

/// Result of one upload attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// 2xx response
    Delivered { status: u16 },
    /// Non-2xx response
    Rejected { status: u16 },
    /// Network or client error
    Failed(String),
    /// Endpoint unset or a placeholder; nothing was sent
    NotConfigured,
}

impl UploadOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, UploadOutcome::Delivered { .. })
    }
}

/// Destination for motion events
pub trait EventSink {
    fn publish(&self, payload: &MotionEventPayload) -> UploadOutcome;
}

/// Blocking HTTP uploader with a bounded timeout
pub struct HttpUploader {
    url: Option<String>,
    client: reqwest::blocking::Client,
}

impl HttpUploader {
    pub fn new(config: &UploadConfig) -> Result<Self, VerifyError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout()?)
            .build()
            .map_err(|e| VerifyError::UploadError(format!("failed to build HTTP client: {e}")))?;

        let url = config.motion_url();
        if url.is_none() {
            warn!("API endpoint not configured, motion events will not be uploaded");
        }
        Ok(Self { url, client })
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }
}

impl EventSink for HttpUploader {
    fn publish(&self, payload: &MotionEventPayload) -> UploadOutcome {
        let Some(url) = self.url.as_deref() else {
            warn!(event_id = %payload.event_id, "API endpoint not configured, skipping upload");
            return UploadOutcome::NotConfigured;
        };

        debug!(
            url,
            event_id = %payload.event_id,
            has_image = payload.image.is_some(),
            "uploading motion event"
        );
        match self.client.post(url).json(payload).send() {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    info!(
                        status = status.as_u16(),
                        event_id = %payload.event_id,
                        "cloud upload succeeded"
                    );
                    UploadOutcome::Delivered {
                        status: status.as_u16(),
                    }
                } else {
                    warn!(
                        status = status.as_u16(),
                        event_id = %payload.event_id,
                        "cloud upload rejected"
                    );
                    UploadOutcome::Rejected {
                        status: status.as_u16(),
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, event_id = %payload.event_id, "cloud upload failed");
                UploadOutcome::Failed(e.to_string())
            }
        }
    }
}
