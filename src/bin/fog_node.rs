//! Fog node CLI - Command-line interface for Fog Verify
//!
//! Commands:
//! - run: Read PIR tokens and verify triggers with the camera (node mode)
//! - monitor: Continuous camera-only motion detection
//! - verify: Run one verification now and print the result
//! - ingest: Convert ingestion handler requests into stored records
//! - doctor: Diagnose configuration, camera and endpoint
//! - config: Print the effective configuration

use clap::{Args, Parser, Subcommand};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fog_verify::camera::{Camera, CameraSession, ImageSequenceCamera, MissingCamera};
use fog_verify::confirmation::{build_strategy, StrategyKind};
use fog_verify::ingest::handle_request;
use fog_verify::monitor::MotionMonitor;
use fog_verify::node::FogNode;
use fog_verify::sensor::LineSensor;
use fog_verify::upload::{EventEncoder, EventSink, HttpUploader};
use fog_verify::{FogConfig, VerifyError, FOG_VERSION, PRODUCER_NAME};

/// Fog node - PIR motion verification at the edge
#[derive(Parser)]
#[command(name = "fog-node")]
#[command(version = FOG_VERSION)]
#[command(about = "Verify PIR motion triggers with a camera before upload", long_about = None)]
struct Cli {
    /// Configuration file (JSON); FOG_* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read PIR tokens and verify triggers with the camera
    Run {
        /// Sensor line source, e.g. /dev/ttyACM0 (use - for stdin)
        #[arg(short, long, default_value = "-")]
        sensor: PathBuf,

        #[command(flatten)]
        camera: CameraArgs,

        /// Confirmation strategy (burst, streak, debounce)
        #[arg(long, default_value = "burst")]
        strategy: StrategyKind,
    },

    /// Continuous camera-only motion detection
    Monitor {
        #[command(flatten)]
        camera: CameraArgs,

        /// Delay between captures in milliseconds
        #[arg(long, default_value = "100")]
        interval_ms: u64,

        /// Stop after this many captures
        #[arg(long)]
        max_frames: Option<u64>,

        /// Write each confirming frame into this directory
        #[arg(long)]
        save_dir: Option<PathBuf>,
    },

    /// Run one verification now and print the result
    Verify {
        #[command(flatten)]
        camera: CameraArgs,

        /// Confirmation strategy (burst, streak)
        #[arg(long, default_value = "burst")]
        strategy: StrategyKind,

        /// Upload the event if it is real
        #[arg(long)]
        upload: bool,

        /// Save the best frame to this path
        #[arg(long)]
        save_best: Option<PathBuf>,
    },

    /// Convert an ingestion handler request into a stored record
    Ingest {
        /// Request body file (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,
    },

    /// Diagnose configuration, camera and endpoint
    Doctor {
        #[command(flatten)]
        camera: CameraArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Args, Clone)]
struct CameraArgs {
    /// Replay image files from this directory as the camera
    #[arg(long)]
    images: Option<PathBuf>,

    /// Restart the image sequence when it runs out
    #[arg(long)]
    loop_images: bool,

    /// Webcam index
    #[cfg(feature = "device")]
    #[arg(long)]
    device: Option<u32>,
}

impl CameraArgs {
    fn is_set(&self) -> bool {
        self.images.is_some() || self.device_camera().is_some()
    }

    #[cfg(feature = "device")]
    fn device_camera(&self) -> Option<Box<dyn Camera>> {
        self.device
            .map(|index| Box::new(fog_verify::camera::DeviceCamera::new(index)) as Box<dyn Camera>)
    }

    #[cfg(not(feature = "device"))]
    fn device_camera(&self) -> Option<Box<dyn Camera>> {
        None
    }

    fn build(&self) -> Result<Box<dyn Camera>, FogCliError> {
        if let Some(camera) = self.device_camera() {
            return Ok(camera);
        }
        match &self.images {
            Some(dir) => Ok(Box::new(ImageSequenceCamera::from_dir(dir, self.loop_images)?)),
            None => Err(FogCliError::NoCamera),
        }
    }

    /// Node mode runs without a camera; every trigger then follows the fail
    /// policy and camera-free strategies work as usual
    fn build_or_missing(&self) -> Result<Box<dyn Camera>, FogCliError> {
        if self.is_set() {
            return self.build();
        }
        tracing::warn!("no camera selected, triggers will follow the fail policy");
        Ok(Box::new(MissingCamera))
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("fog_verify=info,fog_node=info"));

    // stdout carries reports, logs go to stderr
    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(atty::is(atty::Stream::Stderr))
                    .with_target(true)
                    .with_writer(io::stderr),
            )
            .with(env_filter)
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<FogConfig, FogCliError> {
    let mut config = match path {
        Some(path) => FogConfig::from_file(path)?,
        None => FogConfig::default(),
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> Result<(), FogCliError> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run {
            sensor,
            camera,
            strategy,
        } => cmd_run(&load_config(config_path)?, &sensor, &camera, strategy),

        Commands::Monitor {
            camera,
            interval_ms,
            max_frames,
            save_dir,
        } => cmd_monitor(
            &load_config(config_path)?,
            &camera,
            interval_ms,
            max_frames,
            save_dir.as_deref(),
        ),

        Commands::Verify {
            camera,
            strategy,
            upload,
            save_best,
        } => cmd_verify(
            &load_config(config_path)?,
            &camera,
            strategy,
            upload,
            save_best.as_deref(),
        ),

        Commands::Ingest { input } => cmd_ingest(&input),

        Commands::Doctor { camera, json } => cmd_doctor(config_path, &camera, json),

        Commands::Config => {
            println!("{}", load_config(config_path)?.to_json()?);
            Ok(())
        }
    }
}

fn cmd_run(
    config: &FogConfig,
    sensor_path: &Path,
    camera: &CameraArgs,
    strategy: StrategyKind,
) -> Result<(), FogCliError> {
    let mut sensor = if sensor_path.to_string_lossy() == "-" {
        LineSensor::spawn(BufReader::new(io::stdin()))?
    } else {
        LineSensor::spawn(BufReader::new(File::open(sensor_path)?))?
    };

    let strategy = build_strategy(
        strategy,
        &config.detector,
        &config.verification,
        config.node.debounce_readings,
    )?;
    let mut node = FogNode::new(
        config,
        strategy,
        camera.build_or_missing()?,
        Box::new(HttpUploader::new(&config.upload)?),
    )?;

    let stats = node.run(&mut sensor);
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn cmd_monitor(
    config: &FogConfig,
    camera: &CameraArgs,
    interval_ms: u64,
    max_frames: Option<u64>,
    save_dir: Option<&Path>,
) -> Result<(), FogCliError> {
    let mut device = camera.build()?;
    let mut monitor = MotionMonitor::new(&config.detector, Duration::from_millis(interval_ms));
    if let Some(frames) = max_frames {
        monitor = monitor.with_max_frames(frames);
    }
    if let Some(dir) = save_dir {
        fs::create_dir_all(dir)?;
    }

    let mut stdout = io::stdout();
    let summary = monitor.run(device.as_mut(), |event| {
        let line = serde_json::json!({
            "frame_index": event.frame_index,
            "confidence": event.confidence,
            "streak": event.streak,
            "timestamp": event.timestamp.to_rfc3339(),
        });
        if let Some(dir) = save_dir {
            let path = dir.join(format!("motion_{:06}.jpg", event.frame_index));
            if let Err(e) = event.frame.save(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to save frame");
            }
        }
        writeln!(stdout, "{line}").and_then(|_| stdout.flush()).is_ok()
    })?;

    eprintln!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn cmd_verify(
    config: &FogConfig,
    camera: &CameraArgs,
    strategy: StrategyKind,
    upload: bool,
    save_best: Option<&Path>,
) -> Result<(), FogCliError> {
    let mut device = camera.build()?;
    let mut strategy = build_strategy(
        strategy,
        &config.detector,
        &config.verification,
        config.node.debounce_readings,
    )?;
    let verification = strategy.verify(device.as_mut());

    if let (Some(path), Some(frame)) = (save_best, verification.best_frame.as_ref()) {
        frame.save(path).map_err(VerifyError::from)?;
    }

    let upload_status = if upload && verification.verdict.is_real() {
        let encoder = EventEncoder::new(&config.node.sensor_id, &config.upload, &config.detector);
        let payload = encoder.encode(&verification, chrono::Utc::now());
        Some(format!("{:?}", HttpUploader::new(&config.upload)?.publish(&payload)))
    } else {
        None
    };

    let report = VerifyReport {
        verdict: verification.verdict,
        confidence: verification.confidence,
        verified: verification.is_camera_verified(),
        verification_time: verification.duration.as_secs_f64(),
        details: verification.details.clone(),
        summary: verification.describe(),
        has_best_frame: verification.best_frame.is_some(),
        upload: upload_status,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_ingest(input: &Path) -> Result<(), FogCliError> {
    let raw = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let (record, response) = handle_request(&raw, chrono::Utc::now());
    let report = IngestReport { record, response };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.response.is_success() {
        Ok(())
    } else {
        Err(FogCliError::IngestRejected(report.response.body))
    }
}

fn cmd_doctor(
    config_path: Option<&Path>,
    camera: &CameraArgs,
    json: bool,
) -> Result<(), FogCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("fog-verify {}", FOG_VERSION),
    });

    // Configuration
    let config = match load_config(config_path) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Configuration valid (sensor {}, fail policy {})",
                    config.node.sensor_id,
                    config.verification.fail_policy.as_str()
                ),
            });
            Some(config)
        }
        Err(e) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: CliError::from(e).message,
            });
            None
        }
    };

    // Upload endpoint
    if let Some(config) = &config {
        checks.push(match config.upload.motion_url() {
            Some(url) => DoctorCheck {
                name: "endpoint".to_string(),
                status: CheckStatus::Ok,
                message: format!("Events go to {}", url),
            },
            None => DoctorCheck {
                name: "endpoint".to_string(),
                status: CheckStatus::Warning,
                message: "API endpoint not configured; events will not be uploaded".to_string(),
            },
        });
    }

    // Camera
    if camera.is_set() {
        let check = match camera.build() {
            Ok(mut device) => {
                let description = device.describe();
                match CameraSession::open(device.as_mut()).and_then(|mut s| s.read()) {
                    Ok(frame) => DoctorCheck {
                        name: "camera".to_string(),
                        status: CheckStatus::Ok,
                        message: format!(
                            "{} delivered a {}x{} frame",
                            description,
                            frame.width(),
                            frame.height()
                        ),
                    },
                    Err(e) => DoctorCheck {
                        name: "camera".to_string(),
                        status: CheckStatus::Error,
                        message: format!("{}: {}", description, e),
                    },
                }
            }
            Err(e) => DoctorCheck {
                name: "camera".to_string(),
                status: CheckStatus::Error,
                message: CliError::from(e).message,
            },
        };
        checks.push(check);
    } else {
        checks.push(DoctorCheck {
            name: "camera".to_string(),
            status: CheckStatus::Warning,
            message: "No camera selected; 'run' triggers will follow the fail policy, \
                      'monitor' and 'verify' need --images or --device"
                .to_string(),
        });
    }

    // Sensor input on stdin
    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (use --sensor to read a serial device)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (sensor tokens ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: FOG_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Fog Node Doctor Report");
        println!("======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(FogCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

#[derive(Debug, Error)]
enum FogCliError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Engine(#[from] VerifyError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("No camera selected")]
    NoCamera,

    #[error("Ingestion rejected the request: {0}")]
    IngestRejected(String),

    #[error("One or more health checks failed")]
    DoctorFailed,
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<FogCliError> for CliError {
    fn from(e: FogCliError) -> Self {
        let message = e.to_string();
        match e {
            FogCliError::Io(_) => CliError {
                code: "IO_ERROR".to_string(),
                message,
                hint: Some("Check file paths and permissions".to_string()),
            },
            FogCliError::Engine(VerifyError::ConfigError(_)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message,
                hint: Some(
                    "Run 'fog-node config' to inspect the effective configuration".to_string(),
                ),
            },
            FogCliError::Engine(VerifyError::CameraUnavailable(_)) => CliError {
                code: "CAMERA_UNAVAILABLE".to_string(),
                message,
                hint: Some("Check the image directory or device index".to_string()),
            },
            FogCliError::Engine(_) => CliError {
                code: "ENGINE_ERROR".to_string(),
                message,
                hint: None,
            },
            FogCliError::Json(_) => CliError {
                code: "JSON_ERROR".to_string(),
                message,
                hint: Some("Check JSON syntax".to_string()),
            },
            FogCliError::NoCamera => CliError {
                code: "NO_CAMERA".to_string(),
                message,
                hint: Some("Pass --images <DIR> or --device <INDEX>".to_string()),
            },
            FogCliError::IngestRejected(_) => CliError {
                code: "INGEST_REJECTED".to_string(),
                message,
                hint: Some("Ensure the body is a JSON object with a numeric timestamp".to_string()),
            },
            FogCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message,
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct VerifyReport {
    verdict: fog_verify::Verdict,
    confidence: f64,
    verified: bool,
    verification_time: f64,
    details: fog_verify::types::VerificationDetails,
    summary: String,
    has_best_frame: bool,
    upload: Option<String>,
}

#[derive(serde::Serialize)]
struct IngestReport {
    record: Option<fog_verify::ingest::IngestRecord>,
    response: fog_verify::ingest::IngestResponse,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
