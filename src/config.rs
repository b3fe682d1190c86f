//! Configuration
//!
//! All tuning parameters of the engine are named fields with fixed defaults.
//! A deployment can override them from a JSON file and a handful of
//! environment variables; nothing here is read from the command line.

use crate::error::VerifyError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Endpoint fragment that marks an unconfigured placeholder URL
pub const PLACEHOLDER_ENDPOINT_MARKER: &str = "YOUR_API";

/// Per-frame detection parameters shared by both confirmation modes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Canonical frame width after normalization
    pub frame_width: u32,
    /// Canonical frame height after normalization
    pub frame_height: u32,
    /// Blur kernel size in pixels (odd)
    pub blur_kernel: u32,
    /// Pixel intensity cutoff for the foreground mask (0-255)
    pub motion_threshold: u8,
    /// Dilation radius; 2 gives a 5x5 square structuring element
    pub dilate_radius: u8,
    /// Number of dilation passes
    pub dilate_iterations: u32,
    /// Smallest contour area kept (px²)
    pub min_contour_area: f64,
    /// Largest contour area kept (px²)
    pub max_contour_area: f64,
    /// Per-frame confidence needed for a positive judgment
    pub confidence_threshold: f64,
    /// Streak length that confirms motion
    pub min_motion_frames: u32,
    /// Frames kept for frame-to-frame differencing
    pub frame_buffer_size: usize,
    /// Background weight kept on each continuous-mode update
    pub background_retain: f64,
    /// Weight given to the new frame on each continuous-mode update
    pub background_learn: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            frame_width: 640,
            frame_height: 480,
            blur_kernel: 21,
            motion_threshold: 25,
            dilate_radius: 2,
            dilate_iterations: 2,
            min_contour_area: 500.0,
            max_contour_area: 200_000.0,
            confidence_threshold: 0.6,
            min_motion_frames: 3,
            frame_buffer_size: 5,
            background_retain: 0.95,
            background_learn: 0.05,
        }
    }
}

/// What to do when the camera cannot be used for verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailPolicy {
    /// Treat the trigger as real motion
    Open,
    /// Suppress the trigger
    Closed,
}

impl FailPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailPolicy::Open => "open",
            FailPolicy::Closed => "closed",
        }
    }
}

/// Burst verification parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Frames averaged into the reference map
    pub reference_frames: usize,
    /// Delay between reference captures (seconds)
    pub reference_delay_secs: f64,
    /// Frames scored against the reference
    pub analysis_frames: usize,
    /// Delay between analysis captures (seconds)
    pub analysis_delay_secs: f64,
    /// Reference weight kept on each adaptation step
    pub reference_retain: f64,
    /// Weight given to the analysed frame on each adaptation step
    pub reference_learn: f64,
    /// Fraction of the confidence threshold the burst average must reach
    pub average_factor: f64,
    /// Minimum reference frames needed before analysis can run
    pub min_reference_frames: usize,
    /// Behaviour when the camera cannot be used
    pub fail_policy: FailPolicy,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            reference_frames: 5,
            reference_delay_secs: 0.1,
            analysis_frames: 15,
            analysis_delay_secs: 0.15,
            reference_retain: 0.92,
            reference_learn: 0.08,
            average_factor: 0.4,
            min_reference_frames: 2,
            fail_policy: FailPolicy::Open,
        }
    }
}

/// Convert a seconds field into a `Duration`, rejecting negative, NaN and
/// infinite values
pub fn secs_to_duration(name: &str, secs: f64) -> Result<Duration, VerifyError> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        VerifyError::ConfigError(format!(
            "{name} must be a finite, non-negative number of seconds, got {secs}"
        ))
    })
}

impl VerificationConfig {
    pub fn reference_delay(&self) -> Result<Duration, VerifyError> {
        secs_to_duration("reference_delay_secs", self.reference_delay_secs)
    }

    pub fn analysis_delay(&self) -> Result<Duration, VerifyError> {
        secs_to_duration("analysis_delay_secs", self.analysis_delay_secs)
    }

    /// Upper bound on the time one burst spends capturing
    pub fn burst_budget(&self) -> Result<Duration, VerifyError> {
        Ok(self.reference_delay()? * self.reference_frames as u32
            + self.analysis_delay()? * self.analysis_frames as u32)
    }
}

/// Node identity and trigger policy parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Identifier reported with every event
    pub sensor_id: String,
    /// Minimum time between two accepted motion events (seconds)
    pub cooldown_secs: f64,
    /// Bounded wait for the next sensor token (seconds)
    pub sensor_timeout_secs: f64,
    /// Consecutive "ON" readings required by the debounce strategy
    pub debounce_readings: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            sensor_id: "PIR_SENSOR_01".to_string(),
            cooldown_secs: 5.0,
            sensor_timeout_secs: 1.0,
            debounce_readings: 3,
        }
    }
}

impl NodeConfig {
    pub fn cooldown(&self) -> Result<Duration, VerifyError> {
        secs_to_duration("cooldown_secs", self.cooldown_secs)
    }

    pub fn sensor_timeout(&self) -> Result<Duration, VerifyError> {
        secs_to_duration("sensor_timeout_secs", self.sensor_timeout_secs)
    }
}

/// Cloud ingestion endpoint parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Base URL of the ingestion API; events go to `{api_url}/motion`
    pub api_url: Option<String>,
    /// Request timeout (seconds)
    pub timeout_secs: f64,
    /// Attach the best frame as a base64 JPEG
    pub include_image: bool,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            timeout_secs: 10.0,
            include_image: true,
            jpeg_quality: 85,
        }
    }
}

impl UploadConfig {
    pub fn timeout(&self) -> Result<Duration, VerifyError> {
        secs_to_duration("timeout_secs", self.timeout_secs)
    }

    /// Full event URL, or `None` when the endpoint is unset or a placeholder
    pub fn motion_url(&self) -> Option<String> {
        let base = self.api_url.as_deref()?.trim();
        if base.is_empty() || base.contains(PLACEHOLDER_ENDPOINT_MARKER) {
            return None;
        }
        Some(format!("{}/motion", base.trim_end_matches('/')))
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FogConfig {
    pub detector: DetectorConfig,
    pub verification: VerificationConfig,
    pub node: NodeConfig,
    pub upload: UploadConfig,
}

impl FogConfig {
    /// Parse configuration from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, VerifyError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, VerifyError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialize configuration to pretty JSON
    pub fn to_json(&self) -> Result<String, VerifyError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Apply `FOG_*` environment overrides
    pub fn apply_env(&mut self) -> Result<(), VerifyError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), VerifyError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("FOG_API_URL") {
            self.upload.api_url = Some(url);
        }
        if let Some(id) = lookup("FOG_SENSOR_ID") {
            self.node.sensor_id = id;
        }
        if let Some(raw) = lookup("FOG_COOLDOWN_SECS") {
            self.node.cooldown_secs = raw.trim().parse().map_err(|_| {
                VerifyError::ConfigError(format!("FOG_COOLDOWN_SECS is not a number: {raw}"))
            })?;
        }
        if let Some(raw) = lookup("FOG_FAIL_POLICY") {
            self.verification.fail_policy = match raw.trim().to_lowercase().as_str() {
                "open" => FailPolicy::Open,
                "closed" => FailPolicy::Closed,
                other => {
                    return Err(VerifyError::ConfigError(format!(
                        "FOG_FAIL_POLICY must be open or closed, got {other}"
                    )))
                }
            };
        }
        Ok(())
    }

    /// Check internal consistency of the parameters
    pub fn validate(&self) -> Result<(), VerifyError> {
        let d = &self.detector;
        let v = &self.verification;

        if d.frame_width == 0 || d.frame_height == 0 {
            return Err(VerifyError::ConfigError(
                "frame dimensions must be non-zero".to_string(),
            ));
        }
        if d.blur_kernel == 0 || d.blur_kernel % 2 == 0 {
            return Err(VerifyError::ConfigError(format!(
                "blur_kernel must be odd, got {}",
                d.blur_kernel
            )));
        }
        if d.min_contour_area > d.max_contour_area {
            return Err(VerifyError::ConfigError(
                "min_contour_area exceeds max_contour_area".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&d.confidence_threshold) {
            return Err(VerifyError::ConfigError(
                "confidence_threshold must be within [0, 1]".to_string(),
            ));
        }
        if d.frame_buffer_size == 0 || d.min_motion_frames == 0 {
            return Err(VerifyError::ConfigError(
                "frame_buffer_size and min_motion_frames must be non-zero".to_string(),
            ));
        }
        check_weights("background", d.background_retain, d.background_learn)?;
        check_weights("reference", v.reference_retain, v.reference_learn)?;
        if v.reference_frames == 0 || v.analysis_frames == 0 {
            return Err(VerifyError::ConfigError(
                "reference_frames and analysis_frames must be non-zero".to_string(),
            ));
        }
        v.reference_delay()?;
        v.analysis_delay()?;
        self.node.cooldown()?;
        if self.node.sensor_timeout()?.is_zero() {
            return Err(VerifyError::ConfigError(
                "sensor_timeout_secs must be greater than zero".to_string(),
            ));
        }
        self.upload.timeout()?;
        if self.upload.jpeg_quality == 0 || self.upload.jpeg_quality > 100 {
            return Err(VerifyError::ConfigError(
                "jpeg_quality must be within 1-100".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_weights(name: &str, retain: f64, learn: f64) -> Result<(), VerifyError> {
    if retain < 0.0 || learn < 0.0 || ((retain + learn) - 1.0).abs() > 1e-6 {
        return Err(VerifyError::ConfigError(format!(
            "{name} weights must be non-negative and sum to 1 ({retain} + {learn})"
        )));
    }
    Ok(())
}
