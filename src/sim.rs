use std::{
    f64::consts::PI,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use tracing::{debug, info};

use crate::{
    config::TrackingConfig,
    error::SourceError,
    frame::Frame,
    source::{FrameHistory, SourceOutputs, TrackingSource},
    types::{
        FrameIndex, MarkerAttribute, MarkerObservation, MarkerReading, PixelPosition,
        TrackedFrame,
    },
};

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(5);

const TABLE_COLOR: [u8; 3] = [40, 40, 40];
const PUCK_COLORS: [[u8; 3]; 4] = [[40, 40, 220], [40, 200, 40], [220, 60, 40], [40, 220, 220]];
const CONTOUR_VERTICES: usize = 8;

#[derive(Debug, Clone)]
pub struct SimSettings {
    pub frames: u64,
    pub workers: usize,
    pub max_latency: Duration,
    pub jitter_px: f64,
    pub seed: Option<u64>,
    pub poll_timeout: Duration,
}

impl Default for SimSettings {
    fn default() -> Self {
        SimSettings {
            frames: 300,
            workers: 3,
            max_latency: Duration::from_millis(40),
            jitter_px: 1.5,
            seed: None,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

/// Piecewise path: rest at a waypoint for `hold`, glide to the next over `travel`.
#[derive(Debug, Clone)]
pub struct Trajectory {
    waypoints: Vec<PixelPosition>,
    hold: Duration,
    travel: Duration,
}

impl Trajectory {
    pub fn new(waypoints: Vec<PixelPosition>, hold: Duration, travel: Duration) -> Self {
        Trajectory {
            waypoints,
            hold,
            travel,
        }
    }

    fn random(rng: &mut StdRng, rows: usize, cols: usize, margin: f64) -> Self {
        let waypoints = (0..6)
            .map(|_| {
                PixelPosition::new(
                    rng.gen_range(margin..(rows as f64 - margin).max(margin + 1.)),
                    rng.gen_range(margin..(cols as f64 - margin).max(margin + 1.)),
                )
            })
            .collect();
        Trajectory::new(waypoints, Duration::from_millis(1500), Duration::from_millis(1000))
    }

    pub fn position_at(&self, t: Duration) -> PixelPosition {
        match self.waypoints.len() {
            0 => return PixelPosition::ORIGIN,
            1 => return self.waypoints[0],
            _ => {}
        }

        let leg = (self.hold + self.travel).as_secs_f64();
        if leg <= 0. {
            return self.waypoints[0];
        }

        let elapsed = t.as_secs_f64();
        let leg_index = (elapsed / leg).floor() as usize;
        let within = elapsed - leg_index as f64 * leg;

        let from = self.waypoints[leg_index % self.waypoints.len()];
        let to = self.waypoints[(leg_index + 1) % self.waypoints.len()];

        let hold = self.hold.as_secs_f64();
        if within <= hold {
            return from;
        }

        let progress = ((within - hold) / self.travel.as_secs_f64()).min(1.);
        PixelPosition::new(
            from.row + (to.row - from.row) * progress,
            from.col + (to.col - from.col) * progress,
        )
    }
}

struct CaptureJob {
    index: FrameIndex,
    timestamp: Duration,
    truth: Vec<(usize, PixelPosition)>,
}

struct Completed {
    index: FrameIndex,
    timestamp: Duration,
    frame: Frame,
    markers: Vec<MarkerReading>,
}

#[derive(Clone)]
struct Scene {
    rows: usize,
    cols: usize,
    radius: f64,
    names: Arc<Vec<String>>,
}

pub struct SimulatedTracker {
    running: bool,
    results: Option<Receiver<Completed>>,
    poll_timeout: Duration,
    history: FrameHistory,
    outputs: SourceOutputs,
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    threads: Vec<JoinHandle<()>>,
}

impl SimulatedTracker {
    pub fn start(config: &TrackingConfig, settings: SimSettings) -> Result<Self, SourceError> {
        let profile = config.profile()?;
        let names: Vec<String> = profile.marker_names().map(str::to_string).collect();

        let mut rows = config.camera_settings.height() as usize;
        let mut cols = config.camera_settings.width() as usize;
        if config.crop {
            let side = rows.min(cols);
            rows = side;
            cols = side;
        }

        let mut rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let radius = (rows.min(cols) as f64 / 30.).max(2.);
        let trajectories: Vec<Trajectory> = names
            .iter()
            .map(|_| Trajectory::random(&mut rng, rows, cols, radius * 2.))
            .collect();

        let scene = Scene {
            rows,
            cols,
            radius,
            names: Arc::new(names),
        };
        let outputs = SourceOutputs::open(config, false)?;

        Ok(Self::spawn(
            scene,
            trajectories,
            config.camera_settings.fps(),
            settings,
            rng.gen(),
            outputs,
        ))
    }

    pub fn with_trajectories(
        markers: Vec<(String, Trajectory)>,
        frame_size: (usize, usize),
        fps: f64,
        settings: SimSettings,
        outputs: SourceOutputs,
    ) -> Self {
        let (names, trajectories): (Vec<String>, Vec<Trajectory>) = markers.into_iter().unzip();
        let scene = Scene {
            rows: frame_size.0,
            cols: frame_size.1,
            radius: (frame_size.0.min(frame_size.1) as f64 / 30.).max(2.),
            names: Arc::new(names),
        };
        let seed = settings.seed.unwrap_or(0);
        Self::spawn(scene, trajectories, fps, settings, seed, outputs)
    }

    fn spawn(
        scene: Scene,
        trajectories: Vec<Trajectory>,
        fps: f64,
        settings: SimSettings,
        worker_seed: u64,
        outputs: SourceOutputs,
    ) -> Self {
        let workers = settings.workers.max(1);
        let (job_tx, job_rx) = bounded::<CaptureJob>(workers);
        let (result_tx, result_rx) = bounded::<Completed>(workers * 2);

        let stop = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicU64::new(0));
        let mut threads = Vec::with_capacity(workers + 1);

        info!(
            "Simulated tracker: {} markers, {}x{} frames at {} fps, {} workers",
            scene.names.len(),
            scene.rows,
            scene.cols,
            fps,
            workers
        );

        threads.push(spawn_capture(
            trajectories,
            fps,
            settings.frames,
            job_tx,
            stop.clone(),
            dropped.clone(),
        ));

        let jitter = Normal::new(0., settings.jitter_px.max(0.)).ok();
        for worker in 0..workers {
            threads.push(spawn_detector(
                worker,
                scene.clone(),
                job_rx.clone(),
                result_tx.clone(),
                settings.max_latency,
                jitter,
                StdRng::seed_from_u64(worker_seed.wrapping_add(worker as u64)),
                stop.clone(),
            ));
        }

        SimulatedTracker {
            running: true,
            results: Some(result_rx),
            poll_timeout: settings.poll_timeout,
            history: FrameHistory::new(FrameHistory::DEFAULT_CAPACITY),
            outputs,
            stop,
            dropped,
            threads,
        }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.running = false;
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn spawn_capture(
    trajectories: Vec<Trajectory>,
    fps: f64,
    frames: u64,
    job_tx: Sender<CaptureJob>,
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
) -> JoinHandle<()> {
    let interval = Duration::from_secs_f64(1. / fps.max(1e-3));

    thread::Builder::new()
        .name("sim-capture".into())
        .spawn(move || {
            for index in 0..frames {
                if stop.load(Ordering::Relaxed) {
                    break;
                }

                let timestamp = interval.mul_f64(index as f64);
                let truth = trajectories
                    .iter()
                    .enumerate()
                    .map(|(marker, path)| (marker, path.position_at(timestamp)))
                    .collect();

                match job_tx.try_send(CaptureJob {
                    index,
                    timestamp,
                    truth,
                }) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        dropped.fetch_add(1, Ordering::Relaxed);
                        debug!("Dropping frame #{} (detection backlog)", index);
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }

                thread::sleep(interval);
            }
        })
        .expect("failed to spawn capture thread")
}

#[allow(clippy::too_many_arguments)]
fn spawn_detector(
    worker: usize,
    scene: Scene,
    job_rx: Receiver<CaptureJob>,
    result_tx: Sender<Completed>,
    max_latency: Duration,
    jitter: Option<Normal<f64>>,
    mut rng: StdRng,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("sim-detect-{}", worker))
        .spawn(move || {
            for job in job_rx.iter() {
                if stop.load(Ordering::Relaxed) {
                    break;
                }

                if !max_latency.is_zero() {
                    thread::sleep(max_latency.mul_f64(rng.gen::<f64>()));
                }

                let completed = detect(&scene, job, jitter.as_ref(), &mut rng);
                if result_tx.send(completed).is_err() {
                    break;
                }
            }
        })
        .expect("failed to spawn detection worker")
}

fn detect(
    scene: &Scene,
    job: CaptureJob,
    jitter: Option<&Normal<f64>>,
    rng: &mut StdRng,
) -> Completed {
    let mut frame = Frame::filled(scene.rows, scene.cols, TABLE_COLOR);

    let mut markers = Vec::with_capacity(job.truth.len());
    for (marker, truth) in job.truth {
        frame.fill_disc(truth, scene.radius, PUCK_COLORS[marker % PUCK_COLORS.len()]);

        let mut noise = || jitter.map(|n| n.sample(&mut *rng)).unwrap_or(0.);
        let position = PixelPosition::new(truth.row + noise(), truth.col + noise());
        let in_view = (0. ..scene.rows as f64).contains(&position.row)
            && (0. ..scene.cols as f64).contains(&position.col);
        if !in_view {
            continue;
        }

        let contour = (0..CONTOUR_VERTICES)
            .map(|vertex| {
                let theta = 2. * PI * vertex as f64 / CONTOUR_VERTICES as f64;
                PixelPosition::new(
                    position.row + scene.radius * theta.sin(),
                    position.col + scene.radius * theta.cos(),
                )
            })
            .collect();

        markers.push(MarkerReading::new(
            scene.names[marker].clone(),
            MarkerObservation::at(position)
                .with_attribute("contour", MarkerAttribute::Contour(contour))
                .with_attribute("area", MarkerAttribute::Area(PI * scene.radius * scene.radius)),
        ));
    }

    Completed {
        index: job.index,
        timestamp: job.timestamp,
        frame,
        markers,
    }
}

impl TrackingSource for SimulatedTracker {
    fn is_running(&self) -> bool {
        self.running
    }

    fn poll(&mut self) -> Option<TrackedFrame> {
        if !self.running {
            return None;
        }
        let results = self.results.as_ref()?;

        match results.recv_timeout(self.poll_timeout) {
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
                    "Simulated stream finished ({} frames dropped)",
                    self.dropped_frames()
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

impl Drop for SimulatedTracker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Closing the result channel unblocks workers waiting to hand off.
        self.results.take();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}
