//! Fog Verify - Edge motion verification for PIR-triggered cameras
//!
//! A passive-infrared sensor produces noisy binary triggers. Before an event is
//! committed to the cloud, a short camera analysis decides whether the trigger
//! is real motion or a false positive: preprocessing → background modeling →
//! frame differencing → contour scoring → temporal confirmation.
//!
//! ## Modules
//!
//! - **Detection**: [`preprocess`], [`background`], [`buffer`], [`scorer`]
//! - **Confirmation**: [`continuous`] streaks, [`burst`] verification and the
//!   interchangeable [`confirmation`] strategies
//! - **Node**: [`sensor`] input, [`policy`] cooldown state machine, [`node`]
//!   event loop, [`upload`] to the ingestion endpoint
//! - **Cloud side**: [`ingest`] parses what the ingestion handler receives

pub mod background;
pub mod buffer;
pub mod burst;
pub mod camera;
pub mod config;
pub mod confirmation;
pub mod continuous;
pub mod error;
pub mod ingest;
pub mod monitor;
pub mod node;
pub mod policy;
pub mod preprocess;
pub mod scorer;
pub mod sensor;
pub mod types;
pub mod upload;

pub use burst::BurstVerifier;
pub use camera::{Camera, CameraSession, CaptureSchedule, ImageSequenceCamera, MissingCamera};
pub use config::{FailPolicy, FogConfig};
pub use confirmation::{build_strategy, ConfirmationStrategy, StrategyKind};
pub use continuous::ContinuousDetector;
pub use error::VerifyError;
pub use monitor::MotionMonitor;
pub use node::FogNode;
pub use policy::TriggerPolicy;
pub use sensor::{LineSensor, SensorReading};
pub use types::{Verdict, Verification};
pub use upload::{EventSink, HttpUploader, MotionEventPayload};

/// Engine version reported by the CLI
pub const FOG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for reports
pub const PRODUCER_NAME: &str = "fog-verify";
