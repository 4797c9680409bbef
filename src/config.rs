use std::{
    fmt,
    fs::File,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, types::TargetMapping};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputSource {
    Camera(i32),
    File(PathBuf),
}

impl Default for InputSource {
    fn default() -> Self {
        InputSource::Camera(0)
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::Camera(index) => write!(f, "camera {}", index),
            InputSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings(pub u32, pub u32, pub f64);

impl CameraSettings {
    pub fn width(&self) -> u32 {
        self.0
    }

    pub fn height(&self) -> u32 {
        self.1
    }

    pub fn fps(&self) -> f64 {
        self.2
    }
}

impl Default for CameraSettings {
    fn default() -> Self {
        CameraSettings(1920, 1080, 30.)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlotMode {
    None,
    Default,
    Trace,
}

impl Default for PlotMode {
    fn default() -> Self {
        PlotMode::Default
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub input_source: InputSource,
    pub output_video: Option<PathBuf>,
    pub output_data: Option<PathBuf>,
    pub camera_settings: CameraSettings,
    pub tracking_config_file: String,
    pub marker_names: Vec<String>,
    pub crop: bool,
    pub builtin_plot_mode: PlotMode,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        TrackingConfig {
            input_source: InputSource::default(),
            output_video: None,
            output_data: None,
            camera_settings: CameraSettings::default(),
            tracking_config_file: "stickers".to_string(),
            marker_names: Vec::new(),
            crop: true,
            builtin_plot_mode: PlotMode::default(),
        }
    }
}

impl TrackingConfig {
    pub fn profile(&self) -> Result<TrackingProfile, ConfigError> {
        TrackingProfile::load(&self.tracking_config_file)?.restrict(&self.marker_names)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerSpec {
    pub name: String,
    pub hsv_low: [u8; 3],
    pub hsv_high: [u8; 3],
    #[serde(default = "MarkerSpec::default_min_area")]
    pub min_area: f64,
}

impl MarkerSpec {
    fn default_min_area() -> f64 {
        50.
    }

    fn new(name: &str, hsv_low: [u8; 3], hsv_high: [u8; 3]) -> Self {
        MarkerSpec {
            name: name.to_string(),
            hsv_low,
            hsv_high,
            min_area: Self::default_min_area(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingProfile {
    #[serde(default)]
    pub name: String,
    pub markers: Vec<MarkerSpec>,
}

impl TrackingProfile {
    const FILE_SUFFIX: &'static str = ".config";

    pub fn builtin(name: &str) -> Result<Self, ConfigError> {
        let markers = match name {
            "stickers" => vec![
                MarkerSpec::new("red", [0, 120, 90], [10, 255, 255]),
                MarkerSpec::new("green", [40, 80, 60], [80, 255, 255]),
                MarkerSpec::new("blue", [100, 120, 60], [130, 255, 255]),
                MarkerSpec::new("yellow", [20, 100, 100], [35, 255, 255]),
            ],
            "pucks" => vec![MarkerSpec::new("puck", [50, 103, 125], [94, 255, 255])],
            _ => return Err(ConfigError::UnknownProfile(name.to_string())),
        };

        Ok(TrackingProfile {
            name: name.to_string(),
            markers,
        })
    }

    /// `"<name>"` selects a builtin, `"<name>.config"` reads a local JSON file.
    pub fn load(profile_ref: &str) -> Result<Self, ConfigError> {
        if !profile_ref.ends_with(Self::FILE_SUFFIX) {
            return Self::builtin(profile_ref);
        }

        let mut profile: TrackingProfile = read_json(Path::new(profile_ref))?;
        if profile.name.is_empty() {
            profile.name = profile_ref.trim_end_matches(Self::FILE_SUFFIX).to_string();
        }
        if profile.markers.is_empty() {
            return Err(ConfigError::Invalid(format!("profile `{}` has no markers", profile_ref)));
        }
        Ok(profile)
    }

    pub fn restrict(mut self, names: &[String]) -> Result<Self, ConfigError> {
        if names.is_empty() {
            return Ok(self);
        }

        if let Some(missing) = names
            .iter()
            .find(|name| !self.markers.iter().any(|marker| &marker.name == *name))
        {
            return Err(ConfigError::UnknownMarker(missing.clone()));
        }

        self.markers.retain(|marker| names.contains(&marker.name));
        Ok(self)
    }

    pub fn marker_names(&self) -> impl Iterator<Item = &str> {
        self.markers.iter().map(|marker| marker.name.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub min_delta: f64,
    pub stride: u64,
    pub offset: f64,
    pub z: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        ControlConfig {
            min_delta: 5.,
            stride: 30,
            offset: 30.,
            z: 0.,
        }
    }
}

impl ControlConfig {
    pub fn mapping(&self) -> TargetMapping {
        TargetMapping {
            offset: self.offset,
            z: self.z,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    PerMove,
    Pool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Overflow {
    DropNew,
    DropOldest,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub mode: DispatchMode,
    pub workers: usize,
    pub queue_capacity: usize,
    pub overflow: Overflow,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            mode: DispatchMode::Pool,
            workers: 1,
            queue_capacity: 1,
            overflow: Overflow::DropOldest,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActuatorConfig {
    DryRun {
        #[serde(default)]
        latency_ms: u64,
    },
    Gcode {
        device: PathBuf,
        #[serde(default = "default_feed_rate")]
        feed_rate: f64,
    },
    Udp {
        #[serde(default)]
        src_port: u16,
        address: String,
        /// How long to wait for a stage reply before counting the move as failed.
        #[serde(default = "default_reply_timeout")]
        reply_timeout_ms: u64,
    },
}

fn default_feed_rate() -> f64 {
    2000.
}

fn default_reply_timeout() -> u64 {
    10_000
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        ActuatorConfig::DryRun { latency_ms: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    Camera,
    Simulated {
        #[serde(default = "default_sim_frames")]
        frames: u64,
        #[serde(default = "default_sim_workers")]
        workers: usize,
        #[serde(default = "default_sim_latency")]
        max_latency_ms: u64,
        #[serde(default = "default_sim_jitter")]
        jitter_px: f64,
        #[serde(default)]
        seed: Option<u64>,
    },
    Replay {
        path: PathBuf,
        #[serde(default)]
        fps: Option<f64>,
    },
}

fn default_sim_frames() -> u64 {
    300
}

fn default_sim_workers() -> usize {
    3
}

fn default_sim_latency() -> u64 {
    40
}

fn default_sim_jitter() -> f64 {
    1.5
}

impl Default for SourceKind {
    fn default() -> Self {
        SourceKind::Simulated {
            frames: default_sim_frames(),
            workers: default_sim_workers(),
            max_latency_ms: default_sim_latency(),
            jitter_px: default_sim_jitter(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub camera: TrackingConfig,
    pub control: ControlConfig,
    pub dispatch: DispatchConfig,
    pub actuator: ActuatorConfig,
    pub source: SourceKind,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: AppConfig = read_json(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.control.stride == 0 {
            return Err(ConfigError::Invalid("control.stride must be at least 1".into()));
        }
        if !(self.control.min_delta >= 0.) {
            return Err(ConfigError::Invalid(
                "control.min_delta must be a non-negative number".into(),
            ));
        }
        if self.dispatch.workers == 0 {
            return Err(ConfigError::Invalid("dispatch.workers must be at least 1".into()));
        }
        if self.dispatch.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.queue_capacity must be at least 1".into(),
            ));
        }
        if self.camera.camera_settings.fps() <= 0. {
            return Err(ConfigError::Invalid("camera_settings fps must be positive".into()));
        }
        Ok(())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let file = File::open(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_reader(file).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
