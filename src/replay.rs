use std::{
    collections::VecDeque,
    path::Path,
    thread,
    time::{Duration, Instant},
};

use tracing::info;

use crate::{
    config::TrackingConfig,
    datalog::{self, TrackingRow},
    error::{ConfigError, SourceError},
    frame::Frame,
    source::{FrameHistory, SourceOutputs, TrackingSource},
    types::{FrameIndex, MarkerReading, TrackedFrame},
};

struct RecordedFrame {
    index: FrameIndex,
    timestamp: Duration,
    markers: Vec<MarkerReading>,
}

pub struct ReplaySource {
    pending: VecDeque<RecordedFrame>,
    interval: Option<Duration>,
    last_poll: Option<Instant>,
    frame_size: (usize, usize),
    history: FrameHistory,
    outputs: SourceOutputs,
    running: bool,
}

impl ReplaySource {
    pub fn open(
        path: &Path,
        fps: Option<f64>,
        config: &TrackingConfig,
    ) -> Result<Self, SourceError> {
        let rows = datalog::read_rows(path).map_err(|source| SourceError::DataLog {
            path: path.to_path_buf(),
            source,
        })?;

        let names = &config.marker_names;
        let rows = rows
            .into_iter()
            .filter(|row| names.is_empty() || names.contains(&row.marker));

        let frame_size = {
            let settings = config.camera_settings;
            let (rows, cols) = (settings.height() as usize, settings.width() as usize);
            if config.crop {
                (rows.min(cols), rows.min(cols))
            } else {
                (rows, cols)
            }
        };

        let interval = match fps {
            Some(fps) if fps > 0. => Some(Duration::from_secs_f64(1. / fps)),
            Some(fps) => {
                return Err(
                    ConfigError::Invalid(format!("replay fps must be positive, got {}", fps)).into(),
                )
            }
            None => None,
        };

        let pending = group_frames(rows);
        info!("Replaying {} frames from {}", pending.len(), path.display());

        Ok(ReplaySource {
            pending,
            interval,
            last_poll: None,
            frame_size,
            history: FrameHistory::new(FrameHistory::DEFAULT_CAPACITY),
            outputs: SourceOutputs::open(config, false)?,
            running: true,
        })
    }
}

fn group_frames(rows: impl Iterator<Item = TrackingRow>) -> VecDeque<RecordedFrame> {
    let mut frames: VecDeque<RecordedFrame> = VecDeque::new();

    for row in rows {
        let reading = row.to_reading();
        match frames.back_mut() {
            Some(frame) if frame.index == row.frame => frame.markers.push(reading),
            _ => frames.push_back(RecordedFrame {
                index: row.frame,
                timestamp: Duration::from_secs_f64(row.timestamp_ms.max(0.) / 1000.),
                markers: vec![reading],
            }),
        }
    }

    frames
}

impl TrackingSource for ReplaySource {
    fn is_running(&self) -> bool {
        self.running
    }

    fn poll(&mut self) -> Option<TrackedFrame> {
        if let (Some(interval), Some(last)) = (self.interval, self.last_poll) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        self.last_poll = Some(Instant::now());

        let Some(recorded) = self.pending.pop_front() else {
            self.running = false;
            return None;
        };

        let mut frame = Frame::blank(self.frame_size.0, self.frame_size.1);
        self.outputs
            .complete(recorded.index, recorded.timestamp, &mut frame, &recorded.markers);
        self.history
            .insert(recorded.index, recorded.timestamp, recorded.markers);

        Some(TrackedFrame {
            index: recorded.index,
            frame,
        })
    }

    fn timestamp_of(&self, index: FrameIndex) -> Option<Duration> {
        self.history.timestamp_of(index)
    }

    fn observations_of(&self, index: FrameIndex) -> Vec<MarkerReading> {
        self.history.observations_of(index)
    }

    fn write_frame_to_video(&mut self, frame: Option<&TrackedFrame>) {
        self.outputs.write_video(frame);
    }

    fn display_frame(&mut self, frame: Option<&TrackedFrame>) {
        self.outputs.display(frame);
    }
}
