//! Cloud-side ingestion record
//!
//! Parses what the ingestion handler receives for `POST /motion` into the
//! record it stores, and builds the proxy response envelope. The request is
//! either the raw event object or an API-gateway proxy envelope whose `body`
//! field holds the event as a JSON string.

use crate::error::VerifyError;
use crate::upload::{epoch_seconds, EVENT_TYPE_MOTION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Number, Value};
use tracing::{debug, warn};

/// Sensor id stored when the event does not name one
pub const UNKNOWN_SENSOR: &str = "UNKNOWN";

/// One stored motion event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRecord {
    #[serde(rename = "SensorID")]
    pub sensor_id: String,
    /// Event time as sent; kept as a JSON number so its text form is stable
    #[serde(rename = "Timestamp")]
    pub timestamp: Number,
    #[serde(rename = "EventType")]
    pub event_type: String,
}

impl IngestRecord {
    /// Build a record from a request, using `now` for a missing timestamp
    pub fn from_request(request: &Value, now: DateTime<Utc>) -> Result<Self, VerifyError> {
        let event = unwrap_envelope(request);
        let fields = event.as_object().ok_or_else(|| {
            VerifyError::InvalidEvent(format!("event must be a JSON object, got {event}"))
        })?;

        let sensor_id = match fields.get("sensor") {
            None => UNKNOWN_SENSOR.to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };

        let timestamp = match fields.get("timestamp") {
            None => Number::from_f64(epoch_seconds(now))
                .ok_or_else(|| VerifyError::InvalidEvent("clock is not finite".to_string()))?,
            Some(Value::Number(n)) => n.clone(),
            Some(Value::String(s)) => parse_number(s)?,
            Some(other) => {
                return Err(VerifyError::InvalidEvent(format!(
                    "timestamp is not numeric: {other}"
                )))
            }
        };

        let event_type = match fields.get("type") {
            None => EVENT_TYPE_MOTION.to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };

        Ok(Self {
            sensor_id,
            timestamp,
            event_type,
        })
    }

    /// Identifier returned to the caller
    pub fn id(&self) -> String {
        self.timestamp.to_string()
    }
}

/// Take the event out of a proxy envelope; an unparsable body falls back to
/// the raw request
fn unwrap_envelope(request: &Value) -> Value {
    match request.get("body") {
        Some(Value::String(body)) => match serde_json::from_str(body) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "could not parse body as JSON, using raw event");
                request.clone()
            }
        },
        Some(_) => {
            warn!("body is not a JSON string, using raw event");
            request.clone()
        }
        None => request.clone(),
    }
}

fn parse_number(raw: &str) -> Result<Number, VerifyError> {
    let trimmed = raw.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return Ok(Number::from(n));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .ok_or_else(|| VerifyError::InvalidEvent(format!("timestamp is not numeric: {raw}")))
}

/// Proxy response envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub status_code: u16,
    /// JSON text
    pub body: String,
}

impl IngestResponse {
    pub fn stored(record: &IngestRecord) -> Self {
        Self {
            status_code: 200,
            body: json!({"message": "Event stored successfully", "id": record.id()}).to_string(),
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            status_code: 500,
            body: json!({"error": message.to_string()}).to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Handle one raw request body, returning the record (if any) and the response
pub fn handle_request(raw: &str, now: DateTime<Utc>) -> (Option<IngestRecord>, IngestResponse) {
    let parsed = serde_json::from_str::<Value>(raw)
        .map_err(VerifyError::from)
        .and_then(|request| IngestRecord::from_request(&request, now));

    match parsed {
        Ok(record) => {
            debug!(sensor = %record.sensor_id, id = %record.id(), "event accepted");
            let response = IngestResponse::stored(&record);
            (Some(record), response)
        }
        Err(e) => {
            warn!(error = %e, "event rejected");
            (None, IngestResponse::error(e))
        }
    }
}
