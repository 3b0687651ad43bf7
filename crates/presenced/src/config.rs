use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory of reference photos, one or more per employee.
    pub roster_dir: PathBuf,
    /// Root directory for check-in/check-out snapshots.
    pub snapshot_dir: PathBuf,
    /// Whether check-in/check-out capture a snapshot.
    pub save_snapshots: bool,
    /// Maximum Euclidean embedding distance for a positive match.
    pub match_threshold: f32,
    /// Number of warmup frames to discard at startup (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Where to keep writing the latest annotated frame, if anywhere.
    pub preview_path: Option<PathBuf>,
    /// Serve on the session bus instead of the system bus.
    pub session_bus: bool,
    /// TOML file holding `idle_time` / `time_for_saving`.
    pub monitoring_file: PathBuf,
}

impl Config {
    /// Load configuration from `PRESENCE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("presence");

        let path_or = |key: &str, default: PathBuf| {
            std::env::var(key).map(PathBuf::from).unwrap_or(default)
        };

        Self {
            camera_device: std::env::var("PRESENCE_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            model_dir: path_or("PRESENCE_MODEL_DIR", presence_core::default_model_dir()),
            db_path: path_or("PRESENCE_DB_PATH", data_dir.join("attendance.db")),
            roster_dir: path_or("PRESENCE_ROSTER_DIR", data_dir.join("images")),
            snapshot_dir: path_or("PRESENCE_SNAPSHOT_DIR", data_dir.join("saved_images")),
            save_snapshots: env_flag("PRESENCE_SAVE_SNAPSHOTS", true),
            match_threshold: env_parse(
                "PRESENCE_MATCH_THRESHOLD",
                presence_core::DEFAULT_MATCH_THRESHOLD,
            ),
            warmup_frames: env_parse("PRESENCE_WARMUP_FRAMES", 4),
            preview_path: std::env::var("PRESENCE_PREVIEW_PATH").ok().map(PathBuf::from),
            session_bus: std::env::var("PRESENCE_BUS")
                .map(|v| v.eq_ignore_ascii_case("session"))
                .unwrap_or(false),
            monitoring_file: path_or("PRESENCE_MONITORING_FILE", data_dir.join("monitoring.toml")),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join(presence_core::SCRFD_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join(presence_core::ARCFACE_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }
}

/// Idle detection and flush cadence for time tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    /// Seconds of continuous non-recognition before idle time accrues.
    pub idle_time: u64,
    /// Persist accumulators when total seconds is a multiple of this.
    pub time_for_saving: u64,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            idle_time: 60,
            time_for_saving: 10,
        }
    }
}

impl MonitoringSettings {
    /// Read settings from a TOML file, then apply environment overrides.
    ///
    /// A missing or malformed file falls back to defaults with a warning.
    pub fn load(path: &Path) -> Self {
        let from_file = match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text).unwrap_or_else(|e| {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "bad monitoring settings; using defaults"
                );
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "cannot read monitoring settings"
                );
                Self::default()
            }
        };

        Self {
            idle_time: env_parse("PRESENCE_IDLE_TIME", from_file.idle_time),
            time_for_saving: env_parse("PRESENCE_TIME_FOR_SAVING", from_file.time_for_saving),
        }
        .sanitized()
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str::<Self>(text).map(Self::sanitized)
    }

    /// A zero flush interval would never divide; treat it as "every tick".
    fn sanitized(self) -> Self {
        Self {
            time_for_saving: self.time_for_saving.max(1),
            ..self
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| v != "0").unwrap_or(default)
}
