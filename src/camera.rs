use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use ndarray::Array3;
use opencv::{
    core::{self, Mat, Scalar, Size},
    highgui,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use tracing::{debug, error, info, warn};

use crate::{
    config::{InputSource, TrackingConfig},
    error::SourceError,
    extraction::PuckExtractor,
    frame::Frame,
    source::{FrameHistory, FrameSink, SourceOutputs, TrackingSource},
    types::{FrameIndex, MarkerReading, TrackedFrame},
};

const DETECTION_WORKERS: usize = 2;
const POLL_TIMEOUT: Duration = Duration::from_millis(5);

struct CaptureJob {
    index: FrameIndex,
    timestamp: Duration,
    frame: Frame,
}

struct Completed {
    index: FrameIndex,
    timestamp: Duration,
    frame: Frame,
    markers: Vec<MarkerReading>,
}

pub fn mat_to_frame(mat: &Mat) -> Result<Frame, SourceError> {
    if mat.typ() != core::CV_8UC3 {
        return Err(SourceError::InputUnavailable(format!(
            "expected 8-bit BGR frames, got Mat type {}",
            mat.typ()
        )));
    }

    let continuous;
    let mat = if mat.is_continuous() {
        mat
    } else {
        continuous = mat.try_clone()?;
        &continuous
    };

    let shape = (mat.rows() as usize, mat.cols() as usize, 3);
    let pixels = Array3::from_shape_vec(shape, mat.data_bytes()?.to_vec()).map_err(|err| {
        SourceError::InputUnavailable(format!("frame buffer has unexpected size: {}", err))
    })?;

    Ok(Frame::from_pixels(pixels))
}

pub fn frame_to_mat(frame: &Frame) -> Result<Mat, SourceError> {
    let mut mat = Mat::new_rows_cols_with_default(
        frame.rows() as i32,
        frame.cols() as i32,
        core::CV_8UC3,
        Scalar::all(0.),
    )?;

    let pixels = frame.pixels().as_standard_layout();
    if let Some(bytes) = pixels.as_slice() {
        mat.data_bytes_mut()?.copy_from_slice(bytes);
    }

    Ok(mat)
}

pub struct CameraTracker {
    running: bool,
    results: Option<Receiver<Completed>>,
    history: FrameHistory,
    outputs: SourceOutputs,
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    threads: Vec<JoinHandle<()>>,
}

impl CameraTracker {
    pub fn start(config: &TrackingConfig) -> Result<Self, SourceError> {
        let profile = config.profile()?;
        let extractor = PuckExtractor::new(&profile);

        let mut capture = match &config.input_source {
            InputSource::Camera(index) => VideoCapture::new(*index, videoio::CAP_ANY)?,
            InputSource::File(path) => VideoCapture::from_file(&path_str(path)?, videoio::CAP_ANY)?,
        };
        if !capture.is_opened()? {
            return Err(SourceError::InputUnavailable(config.input_source.to_string()));
        }

        let settings = config.camera_settings;
        if let InputSource::Camera(_) = config.input_source {
            capture.set(videoio::CAP_PROP_FRAME_WIDTH, settings.width() as f64)?;
            capture.set(videoio::CAP_PROP_FRAME_HEIGHT, settings.height() as f64)?;
            capture.set(videoio::CAP_PROP_FPS, settings.fps())?;
        }

        let outputs = SourceOutputs::open(config, true)?;

        let (job_tx, job_rx) = bounded::<CaptureJob>(DETECTION_WORKERS);
        let (result_tx, result_rx) = bounded::<Completed>(DETECTION_WORKERS * 2);
        let stop = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicU64::new(0));

        info!(
            "Tracking {} markers from {}",
            profile.markers.len(),
            config.input_source
        );

        let mut threads = vec![spawn_capture(
            capture,
            config.crop,
            job_tx,
            stop.clone(),
            dropped.clone(),
        )];
        for worker in 0..DETECTION_WORKERS {
            threads.push(spawn_detector(
                worker,
                extractor.clone(),
                job_rx.clone(),
                result_tx.clone(),
                stop.clone(),
            ));
        }

        Ok(CameraTracker {
            running: true,
            results: Some(result_rx),
            history: FrameHistory::new(FrameHistory::DEFAULT_CAPACITY),
            outputs,
            stop,
            dropped,
            threads,
        })
    }
}

fn path_str(path: &Path) -> Result<String, SourceError> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| SourceError::InputUnavailable(path.display().to_string()))
}

fn spawn_capture(
    mut capture: VideoCapture,
    crop: bool,
    job_tx: Sender<CaptureJob>,
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("camera-capture".into())
        .spawn(move || {
            let started = Instant::now();
            let mut mat = Mat::default();

            for index in 0.. {
                if stop.load(Ordering::Relaxed) {
                    break;
                }

                match capture.read(&mut mat) {
                    Ok(true) if mat.rows() > 0 => {}
                    Ok(_) => {
                        info!("Input stream ended after {} frames", index);
                        break;
                    }
                    Err(err) => {
                        error!("Failed to read frame from camera: {}", err);
                        break;
                    }
                }
                let timestamp = started.elapsed();

                let frame = match mat_to_frame(&mat) {
                    Ok(frame) if crop => frame.crop_square(),
                    Ok(frame) => frame,
                    Err(err) => {
                        error!("Unusable frame #{}: {}", index, err);
                        break;
                    }
                };

                match job_tx.try_send(CaptureJob {
                    index,
                    timestamp,
                    frame,
                }) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        dropped.fetch_add(1, Ordering::Relaxed);
                        debug!("Dropping frame #{} (detection backlog)", index);
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
        })
        .expect("failed to spawn capture thread")
}

fn spawn_detector(
    worker: usize,
    extractor: PuckExtractor,
    job_rx: Receiver<CaptureJob>,
    result_tx: Sender<Completed>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("camera-detect-{}", worker))
        .spawn(move || {
            for job in job_rx.iter() {
                if stop.load(Ordering::Relaxed) {
                    break;
                }

                let markers = match frame_to_mat(&job.frame)
                    .and_then(|mat| extractor.extract_from(&mat).map_err(SourceError::from))
                {
                    Ok(markers) => markers,
                    Err(err) => {
                        warn!("Detection failed on frame #{}: {}", job.index, err);
                        Vec::new()
                    }
                };

                let completed = Completed {
                    index: job.index,
                    timestamp: job.timestamp,
                    frame: job.frame,
                    markers,
                };
                if result_tx.send(completed).is_err() {
                    break;
                }
            }
        })
        .expect("failed to spawn detection worker")
}

impl TrackingSource for CameraTracker {
    fn is_running(&self) -> bool {
        self.running
    }

    fn poll(&mut self) -> Option<TrackedFrame> {
        if !self.running {
            return None;
        }
        let results = self.results.as_ref()?;

        match results.recv_timeout(POLL_TIMEOUT) {
            Ok(mut completed) => {
                self.outputs.complete(
                    completed.index,
                    completed.timestamp,
                    &mut completed.frame,
                    &completed.markers,
                );
                self.history
                    .insert(completed.index, completed.timestamp, completed.markers);
                Some(TrackedFrame {
                    index: completed.index,
                    frame: completed.frame,
                })
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                info!(
                    "Camera stream finished ({} frames dropped)",
                    self.dropped.load(Ordering::Relaxed)
                );
                self.running = false;
                None
            }
        }
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

impl Drop for CameraTracker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.running = false;
        self.results.take();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

pub struct Mp4Writer {
    path: PathBuf,
    fps: f64,
    writer: Option<VideoWriter>,
}

impl Mp4Writer {
    pub fn new(path: &Path, fps: f64) -> Self {
        Mp4Writer {
            path: path.to_path_buf(),
            fps,
            writer: None,
        }
    }

    fn open(&self, frame: &Frame) -> Result<VideoWriter, SourceError> {
        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let size = Size::new(frame.cols() as i32, frame.rows() as i32);
        let writer = VideoWriter::new(&path_str(&self.path)?, fourcc, self.fps, size, true)?;
        if !writer.is_opened()? {
            return Err(SourceError::InputUnavailable(format!(
                "cannot write video to {}",
                self.path.display()
            )));
        }
        info!("Writing video to {}", self.path.display());
        Ok(writer)
    }
}

impl FrameSink for Mp4Writer {
    fn accept(&mut self, frame: &Frame) -> Result<(), SourceError> {
        if self.writer.is_none() {
            self.writer = Some(self.open(frame)?);
        }
        let mat = frame_to_mat(frame)?;
        if let Some(writer) = self.writer.as_mut() {
            writer.write(&mat)?;
        }
        Ok(())
    }
}

impl Drop for Mp4Writer {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(err) = writer.release() {
                warn!("Failed to finalise {}: {}", self.path.display(), err);
            }
        }
    }
}

pub struct Window {
    name: String,
}

impl Window {
    pub fn open(name: &str) -> Result<Self, SourceError> {
        highgui::named_window(name, highgui::WINDOW_AUTOSIZE)?;
        Ok(Window {
            name: name.to_string(),
        })
    }
}

impl FrameSink for Window {
    fn accept(&mut self, frame: &Frame) -> Result<(), SourceError> {
        highgui::imshow(&self.name, &frame_to_mat(frame)?)?;
        highgui::wait_key(1)?;
        Ok(())
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        let _ = highgui::destroy_window(&self.name);
    }
}
