use std::{
    collections::{HashMap, VecDeque},
    path::Path,
    time::Duration,
};

use tracing::warn;

use crate::{
    config::{AppConfig, PlotMode, SourceKind, TrackingConfig},
    datalog::DataLog,
    error::SourceError,
    frame::{Bgr, Frame, WHITE},
    types::{FrameIndex, MarkerReading, PixelPosition, TrackedFrame},
};

pub trait TrackingSource {
    fn is_running(&self) -> bool;

    /// Return the earliest tracking job completed since the previous poll.
    ///
    /// `None` means nothing is ready yet, or that the stream just failed, in
    /// which case `is_running` reports false from now on. Indices are not
    /// guaranteed to arrive in capture order.
    fn poll(&mut self) -> Option<TrackedFrame>;

    fn timestamp_of(&self, index: FrameIndex) -> Option<Duration>;

    fn observations_of(&self, index: FrameIndex) -> Vec<MarkerReading>;

    fn write_frame_to_video(&mut self, _frame: Option<&TrackedFrame>) {}

    fn display_frame(&mut self, _frame: Option<&TrackedFrame>) {}
}

impl<S: TrackingSource + ?Sized> TrackingSource for Box<S> {
    fn is_running(&self) -> bool {
        (**self).is_running()
    }

    fn poll(&mut self) -> Option<TrackedFrame> {
        (**self).poll()
    }

    fn timestamp_of(&self, index: FrameIndex) -> Option<Duration> {
        (**self).timestamp_of(index)
    }

    fn observations_of(&self, index: FrameIndex) -> Vec<MarkerReading> {
        (**self).observations_of(index)
    }

    fn write_frame_to_video(&mut self, frame: Option<&TrackedFrame>) {
        (**self).write_frame_to_video(frame)
    }

    fn display_frame(&mut self, frame: Option<&TrackedFrame>) {
        (**self).display_frame(frame)
    }
}

pub fn open(config: &AppConfig) -> Result<Box<dyn TrackingSource>, SourceError> {
    let source: Box<dyn TrackingSource> = match &config.source {
        SourceKind::Simulated {
            frames,
            workers,
            max_latency_ms,
            jitter_px,
            seed,
        } => {
            let settings = crate::sim::SimSettings {
                frames: *frames,
                workers: *workers,
                max_latency: Duration::from_millis(*max_latency_ms),
                jitter_px: *jitter_px,
                seed: *seed,
                poll_timeout: crate::sim::DEFAULT_POLL_TIMEOUT,
            };
            Box::new(crate::sim::SimulatedTracker::start(&config.camera, settings)?)
        }
        SourceKind::Replay { path, fps } => {
            Box::new(crate::replay::ReplaySource::open(path, *fps, &config.camera)?)
        }
        #[cfg(feature = "camera")]
        SourceKind::Camera => Box::new(crate::camera::CameraTracker::start(&config.camera)?),
        #[cfg(not(feature = "camera"))]
        SourceKind::Camera => return Err(SourceError::FeatureDisabled("camera")),
    };
    Ok(source)
}

pub struct FrameHistory {
    capacity: usize,
    order: VecDeque<FrameIndex>,
    entries: HashMap<FrameIndex, (Duration, Vec<MarkerReading>)>,
}

impl FrameHistory {
    pub const DEFAULT_CAPACITY: usize = 256;

    pub fn new(capacity: usize) -> Self {
        FrameHistory {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, index: FrameIndex, timestamp: Duration, markers: Vec<MarkerReading>) {
        if self.entries.insert(index, (timestamp, markers)).is_none() {
            self.order.push_back(index);
        }
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }

    pub fn timestamp_of(&self, index: FrameIndex) -> Option<Duration> {
        self.entries.get(&index).map(|(timestamp, _)| *timestamp)
    }

    pub fn observations_of(&self, index: FrameIndex) -> Vec<MarkerReading> {
        self.entries
            .get(&index)
            .map(|(_, markers)| markers.clone())
            .unwrap_or_default()
    }
}

pub trait FrameSink: Send {
    fn accept(&mut self, frame: &Frame) -> Result<(), SourceError>;
}

const TRACE_LENGTH: usize = 32;

const PALETTE: [Bgr; 4] = [[0, 0, 255], [0, 255, 0], [255, 0, 0], [0, 255, 255]];

pub struct Overlay {
    mode: PlotMode,
    colors: HashMap<String, Bgr>,
    trails: HashMap<String, VecDeque<PixelPosition>>,
}

impl Overlay {
    pub fn new(mode: PlotMode) -> Self {
        Overlay {
            mode,
            colors: HashMap::new(),
            trails: HashMap::new(),
        }
    }

    fn color_of(&mut self, name: &str) -> Bgr {
        let next = PALETTE[self.colors.len() % PALETTE.len()];
        *self.colors.entry(name.to_string()).or_insert(next)
    }

    pub fn annotate(&mut self, frame: &mut Frame, markers: &[MarkerReading]) {
        if self.mode == PlotMode::None {
            return;
        }

        for reading in markers {
            let color = self.color_of(&reading.name);
            let observation = &reading.observation;

            if let Some(contour) = observation.contour() {
                frame.draw_polygon(contour, color);
            }
            frame.draw_cross(observation.position, 6, WHITE);

            if self.mode == PlotMode::Trace {
                let trail = self.trails.entry(reading.name.clone()).or_default();
                trail.push_back(observation.position);
                if trail.len() > TRACE_LENGTH {
                    trail.pop_front();
                }
                for point in trail.iter() {
                    frame.fill_disc(*point, 1.5, color);
                }
            }
        }
    }
}

pub struct SourceOutputs {
    overlay: Overlay,
    video: Option<Box<dyn FrameSink>>,
    display: Option<Box<dyn FrameSink>>,
    data_log: Option<DataLog>,
}

impl SourceOutputs {
    pub fn open(config: &TrackingConfig, show_window: bool) -> Result<Self, SourceError> {
        let video = match &config.output_video {
            Some(path) => Some(open_video_sink(path, config.camera_settings.fps())?),
            None => None,
        };

        let display = if show_window { open_display_sink()? } else { None };

        let data_log = match &config.output_data {
            Some(path) => Some(DataLog::create(path)?),
            None => None,
        };

        Ok(SourceOutputs {
            overlay: Overlay::new(config.builtin_plot_mode),
            video,
            display,
            data_log,
        })
    }

    pub fn headless(mode: PlotMode) -> Self {
        SourceOutputs {
            overlay: Overlay::new(mode),
            video: None,
            display: None,
            data_log: None,
        }
    }

    pub fn complete(
        &mut self,
        index: FrameIndex,
        timestamp: Duration,
        frame: &mut Frame,
        markers: &[MarkerReading],
    ) {
        self.overlay.annotate(frame, markers);

        if let Some(log) = self.data_log.as_mut() {
            if let Err(err) = log.record(index, timestamp, markers) {
                warn!("Failed to write tracking data for frame #{}: {}", index, err);
            }
        }
    }

    pub fn write_video(&mut self, frame: Option<&TrackedFrame>) {
        if let (Some(sink), Some(tracked)) = (self.video.as_mut(), frame) {
            if let Err(err) = sink.accept(&tracked.frame) {
                warn!("Failed to write frame #{} to video: {}", tracked.index, err);
            }
        }
    }

    pub fn display(&mut self, frame: Option<&TrackedFrame>) {
        if let (Some(sink), Some(tracked)) = (self.display.as_mut(), frame) {
            if let Err(err) = sink.accept(&tracked.frame) {
                warn!("Failed to display frame #{}: {}", tracked.index, err);
            }
        }
    }
}

impl Drop for SourceOutputs {
    fn drop(&mut self) {
        if let Some(log) = self.data_log.as_mut() {
            if let Err(err) = log.flush() {
                warn!("Failed to flush tracking data: {}", err);
            }
        }
    }
}

fn open_video_sink(path: &Path, fps: f64) -> Result<Box<dyn FrameSink>, SourceError> {
    let is_mp4 = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("mp4"))
        .unwrap_or(false);
    if !is_mp4 {
        return Err(SourceError::UnsupportedVideoFormat(path.to_path_buf()));
    }

    #[cfg(feature = "camera")]
    {
        Ok(Box::new(crate::camera::Mp4Writer::new(path, fps)))
    }
    #[cfg(not(feature = "camera"))]
    {
        let _ = fps;
        Err(SourceError::FeatureDisabled("output_video"))
    }
}

fn open_display_sink() -> Result<Option<Box<dyn FrameSink>>, SourceError> {
    #[cfg(feature = "camera")]
    {
        Ok(Some(Box::new(crate::camera::Window::open("tracking")?)))
    }
    #[cfg(not(feature = "camera"))]
    {
        Ok(None)
    }
}
