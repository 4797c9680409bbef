use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("actuator I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode stage request: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode stage reply: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("stage rejected command `{command}`: {reply}")]
    Rejected { command: String, reply: String },
    #[error("stage connection closed")]
    Disconnected,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("input source `{0}` could not be opened")]
    InputUnavailable(String),
    #[error("output video `{}` must use the .mp4 container", .0.display())]
    UnsupportedVideoFormat(PathBuf),
    #[error("output data file `{}` could not be created: {source}", .path.display())]
    DataLog {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("`{0}` requires the `camera` feature")]
    FeatureDisabled(&'static str),
    #[cfg(feature = "camera")]
    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read `{}`: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse `{}`: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown builtin tracking profile `{0}`")]
    UnknownProfile(String),
    #[error("marker `{0}` is not defined by the tracking profile")]
    UnknownMarker(String),
    #[error("invalid setting: {0}")]
    Invalid(String),
}
