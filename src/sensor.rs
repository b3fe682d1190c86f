//! PIR sensor line input
//!
//! The sensor reports one token per line, "ON" or "OFF". A helper thread reads
//! raw lines from any reader (serial device, file, stdin) and forwards them
//! through a channel so the decision loop can wait with a bounded timeout.
//! Decoding happens on the loop thread; malformed lines are surfaced so the
//! caller can log and skip them.

use crate::error::VerifyError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// One decoded sensor token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SensorReading {
    On,
    Off,
}

impl SensorReading {
    /// Decode one line; surrounding whitespace is ignored
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim() {
            "ON" => Some(SensorReading::On),
            "OFF" => Some(SensorReading::Off),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorReading::On => "ON",
            SensorReading::Off => "OFF",
        }
    }
}

/// What one bounded read produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorEvent {
    Reading(SensorReading),
    /// A line that was not a valid token
    Malformed(String),
    /// Nothing arrived within the timeout
    Timeout,
    /// The stream ended
    Closed,
}

/// Source of sensor events with a bounded wait
pub trait SensorSource {
    fn next_event(&mut self, timeout: Duration) -> SensorEvent;

    /// Take everything that has already arrived without waiting. An ended
    /// stream is reported by the next `next_event` call, not here.
    fn drain(&mut self) -> Vec<SensorEvent> {
        Vec::new()
    }
}

/// Decode raw line bytes into an event
pub fn decode_line(bytes: &[u8]) -> SensorEvent {
    match std::str::from_utf8(bytes) {
        Ok(line) => match SensorReading::parse(line) {
            Some(reading) => SensorEvent::Reading(reading),
            None => SensorEvent::Malformed(line.trim().to_string()),
        },
        Err(_) => SensorEvent::Malformed(String::from_utf8_lossy(bytes).trim().to_string()),
    }
}

/// Line-oriented sensor fed by a reader thread
pub struct LineSensor {
    lines: Receiver<Vec<u8>>,
    reader: Option<JoinHandle<()>>,
}

impl LineSensor {
    /// Start forwarding lines from `reader`
    pub fn spawn<R>(reader: R) -> Result<Self, VerifyError>
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("sensor-reader".to_string())
            .spawn(move || forward_lines(reader, tx))
            .map_err(|e| VerifyError::SensorError(format!("failed to start reader: {e}")))?;
        Ok(Self {
            lines: rx,
            reader: Some(handle),
        })
    }
}

fn forward_lines<R: BufRead>(mut reader: R, tx: mpsc::Sender<Vec<u8>>) {
    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => {
                debug!("sensor stream reached end of input");
                break;
            }
            Ok(_) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "sensor read failed, closing stream");
                break;
            }
        }
    }
}

impl SensorSource for LineSensor {
    fn next_event(&mut self, timeout: Duration) -> SensorEvent {
        match self.lines.recv_timeout(timeout) {
            Ok(bytes) => decode_line(&bytes),
            Err(RecvTimeoutError::Timeout) => SensorEvent::Timeout,
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.reader.take() {
                    let _ = handle.join();
                }
                SensorEvent::Closed
            }
        }
    }

    fn drain(&mut self) -> Vec<SensorEvent> {
        let mut events = Vec::new();
        loop {
            match self.lines.try_recv() {
                Ok(bytes) => events.push(decode_line(&bytes)),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        events
    }
}

/// Replays a fixed list of events, then reports `Closed`
#[derive(Debug, Clone, Default)]
pub struct ScriptedSensor {
    events: VecDeque<SensorEvent>,
    backlog: VecDeque<SensorEvent>,
}

impl ScriptedSensor {
    pub fn new(events: Vec<SensorEvent>) -> Self {
        Self {
            events: events.into(),
            backlog: VecDeque::new(),
        }
    }

    /// Events already waiting when the first `drain` call happens
    pub fn with_backlog(mut self, backlog: Vec<SensorEvent>) -> Self {
        self.backlog = backlog.into();
        self
    }

    /// Build from raw text, one token per line
    pub fn from_text(text: &str) -> Self {
        Self::new(text.lines().map(|l| decode_line(l.as_bytes())).collect())
    }
}

impl SensorSource for ScriptedSensor {
    fn next_event(&mut self, _timeout: Duration) -> SensorEvent {
        self.events.pop_front().unwrap_or(SensorEvent::Closed)
    }

    fn drain(&mut self) -> Vec<SensorEvent> {
        self.backlog.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use std::time::Instant;

    #[test]
    fn test_parse_tokens() {
        assert_eq!(SensorReading::parse("ON"), Some(SensorReading::On));
        assert_eq!(SensorReading::parse("OFF\r\n"), Some(SensorReading::Off));
        assert_eq!(SensorReading::parse("  ON "), Some(SensorReading::On));
        assert_eq!(SensorReading::parse("on"), None);
        assert_eq!(SensorReading::parse(""), None);
    }

    #[test]
    fn test_decode_invalid_utf8_is_malformed() {
        assert!(matches!(decode_line(&[0xff, 0xfe, b'\n']), SensorEvent::Malformed(_)));
        assert_eq!(
            decode_line(b"NOISE\n"),
            SensorEvent::Malformed("NOISE".to_string())
        );
    }

    #[test]
    fn test_line_sensor_forwards_and_closes() {
        let input = Cursor::new(b"ON\n\xff\xfe\nOFF\n".to_vec());
        let mut sensor = LineSensor::spawn(input).unwrap();
        let timeout = Duration::from_secs(2);

        assert_eq!(sensor.next_event(timeout), SensorEvent::Reading(SensorReading::On));
        assert!(matches!(sensor.next_event(timeout), SensorEvent::Malformed(_)));
        assert_eq!(sensor.next_event(timeout), SensorEvent::Reading(SensorReading::Off));
        assert_eq!(sensor.next_event(timeout), SensorEvent::Closed);
    }

    #[test]
    fn test_scripted_sensor_from_text() {
        let mut sensor = ScriptedSensor::from_text("OFF\nON\n???\n");
        let t = Duration::ZERO;
        assert_eq!(sensor.next_event(t), SensorEvent::Reading(SensorReading::Off));
        assert_eq!(sensor.next_event(t), SensorEvent::Reading(SensorReading::On));
        assert_eq!(sensor.next_event(t), SensorEvent::Malformed("???".to_string()));
        assert_eq!(sensor.next_event(t), SensorEvent::Closed);
    }

    #[test]
    fn test_line_sensor_drain_takes_buffered_lines() {
        let mut sensor = LineSensor::spawn(Cursor::new(b"ON\nOFF\nON\n".to_vec())).unwrap();
        let timeout = Duration::from_secs(2);
        assert_eq!(sensor.next_event(timeout), SensorEvent::Reading(SensorReading::On));

        // The reader thread may still be pushing; collect until both lines are in
        let deadline = Instant::now() + timeout;
        let mut drained = Vec::new();
        while drained.len() < 2 && Instant::now() < deadline {
            drained.extend(sensor.drain());
        }
        assert_eq!(
            drained,
            vec![
                SensorEvent::Reading(SensorReading::Off),
                SensorEvent::Reading(SensorReading::On),
            ]
        );
        assert!(sensor.drain().is_empty());
        assert_eq!(sensor.next_event(timeout), SensorEvent::Closed);
    }

    #[test]
    fn test_scripted_backlog_is_drained_once() {
        let mut sensor = ScriptedSensor::from_text("ON\n")
            .with_backlog(vec![SensorEvent::Reading(SensorReading::Off)]);
        assert_eq!(sensor.drain(), vec![SensorEvent::Reading(SensorReading::Off)]);
        assert!(sensor.drain().is_empty());
        assert_eq!(
            sensor.next_event(Duration::ZERO),
            SensorEvent::Reading(SensorReading::On)
        );
    }
}
