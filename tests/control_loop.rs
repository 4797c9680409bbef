use std::{
    collections::VecDeque,
    io::{self, Write},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc, Arc,
    },
    thread::{self, ThreadId},
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use puck_follow::{
    actuator::Actuator,
    config::{AppConfig, ControlConfig, DispatchConfig, DispatchMode, Overflow},
    error::{ActuatorError, SourceError},
    frame::Frame,
    pipeline::{ControlLoop, Phase},
    source::TrackingSource,
    types::{FrameIndex, MarkerObservation, MarkerReading, MoveCommand, PixelPosition, TrackedFrame},
};

/// What the scripted source yields on successive polls.
enum Step {
    Nothing,
    Frame(FrameIndex, Vec<MarkerReading>),
    /// Run on the polling thread, then yield nothing.
    Hook(Box<dyn FnMut()>),
}

#[derive(Default)]
struct SourceLog {
    polls: AtomicUsize,
    video: Mutex<Vec<Option<FrameIndex>>>,
    display: Mutex<Vec<Option<FrameIndex>>>,
    poll_threads: Mutex<Vec<ThreadId>>,
    released: AtomicBool,
}

/// Runs while it has steps left.
struct ScriptedSource {
    steps: VecDeque<Step>,
    markers: Vec<(FrameIndex, Vec<MarkerReading>)>,
    log: Arc<SourceLog>,
}

impl ScriptedSource {
    fn new(steps: Vec<Step>) -> (Self, Arc<SourceLog>) {
        let log = Arc::new(SourceLog::default());
        let source = ScriptedSource {
            steps: steps.into(),
            markers: Vec::new(),
            log: log.clone(),
        };
        (source, log)
    }
}

impl TrackingSource for ScriptedSource {
    fn is_running(&self) -> bool {
        !self.steps.is_empty()
    }

    fn poll(&mut self) -> Option<TrackedFrame> {
        self.log.polls.fetch_add(1, Ordering::SeqCst);
        self.log.poll_threads.lock().push(thread::current().id());

        match self.steps.pop_front()? {
            Step::Nothing => None,
            Step::Hook(mut hook) => {
                hook();
                None
            }
            Step::Frame(index, markers) => {
                self.markers.push((index, markers));
                Some(TrackedFrame {
                    index,
                    frame: Frame::blank(4, 4),
                })
            }
        }
    }

    fn timestamp_of(&self, index: FrameIndex) -> Option<Duration> {
        Some(Duration::from_micros(index * 33_300))
    }

    fn observations_of(&self, index: FrameIndex) -> Vec<MarkerReading> {
        self.markers
            .iter()
            .find(|(frame, _)| *frame == index)
            .map(|(_, markers)| markers.clone())
            .unwrap_or_default()
    }

    fn write_frame_to_video(&mut self, frame: Option<&TrackedFrame>) {
        self.log.video.lock().push(frame.map(|f| f.index));
    }

    fn display_frame(&mut self, frame: Option<&TrackedFrame>) {
        self.log.display.lock().push(frame.map(|f| f.index));
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.log.released.store(true, Ordering::SeqCst);
    }
}

/// Records every call; moves optionally wait for the test to release them.
#[derive(Default)]
struct RecordingActuator {
    homes: AtomicUsize,
    started: AtomicUsize,
    fail_home: bool,
    moves: Mutex<Vec<(MoveCommand, ThreadId)>>,
    gate: Option<Mutex<mpsc::Receiver<()>>>,
}

impl RecordingActuator {
    fn gated() -> (Arc<Self>, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let actuator = RecordingActuator {
            gate: Some(Mutex::new(rx)),
            ..RecordingActuator::default()
        };
        (Arc::new(actuator), tx)
    }

    fn targets(&self) -> Vec<MoveCommand> {
        self.moves.lock().iter().map(|(command, _)| *command).collect()
    }
}

impl Actuator for RecordingActuator {
    fn home(&self) -> Result<(), ActuatorError> {
        self.homes.fetch_add(1, Ordering::SeqCst);
        if self.fail_home {
            return Err(ActuatorError::Disconnected);
        }
        Ok(())
    }

    fn move_to(&self, x: f64, y: f64, z: f64) -> Result<(), ActuatorError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _ = gate.lock().recv_timeout(Duration::from_secs(10));
        }
        self.moves
            .lock()
            .push((MoveCommand { x, y, z }, thread::current().id()));
        Ok(())
    }
}

#[derive(Clone, Default)]
struct Report(Arc<Mutex<Vec<u8>>>);

impl Report {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().clone()).unwrap()
    }
}

impl Write for Report {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct BrokenPipe;

impl Write for BrokenPipe {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::ErrorKind::BrokenPipe.into())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn marker(name: &str, row: f64, col: f64) -> MarkerReading {
    MarkerReading::new(name, MarkerObservation::at(PixelPosition::new(row, col)))
}

fn wait_for_started(actuator: &RecordingActuator, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while actuator.started.load(Ordering::SeqCst) < count && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
}

fn config(stride: u64, mode: DispatchMode) -> AppConfig {
    AppConfig {
        control: ControlConfig {
            stride,
            ..ControlConfig::default()
        },
        dispatch: DispatchConfig {
            mode,
            ..DispatchConfig::default()
        },
        ..AppConfig::default()
    }
}

#[test]
fn single_marker_moves_once_when_it_jumps() {
    let actuator = Arc::new(RecordingActuator::default());
    let report = Report::default();
    let mut control =
        ControlLoop::with_report(actuator.clone(), &config(1, DispatchMode::Pool), report.clone());

    let (source, log) = ScriptedSource::new(
        [(0., 0.), (0., 0.), (60., 60.), (60., 60.), (60., 60.)]
            .iter()
            .enumerate()
            .map(|(i, &(row, col))| Step::Frame(i as u64 + 1, vec![marker("A", row, col)]))
            .collect(),
    );

    let summary = control.run(|| Ok(source)).unwrap();
    assert_eq!(summary.moves_dispatched, 1);
    assert_eq!(control.state().last_acted(), PixelPosition::new(60., 60.));

    let counts = control.finish();
    assert_eq!(counts.submitted, 1);
    assert_eq!(counts.completed, 1);
    assert_eq!(actuator.targets(), vec![MoveCommand { x: 30., y: 30., z: 0. }]);
    assert_eq!(actuator.homes.load(Ordering::SeqCst), 1);
    assert!(log.released.load(Ordering::SeqCst));
    assert!(report.text().starts_with("Frame #1, 33.3ms\nMarker name: A\n\tposition in pixels: (0, 0)\n"));
}

#[test]
fn stopped_source_ends_the_run_without_moves() {
    let actuator = Arc::new(RecordingActuator::default());
    let report = Report::default();
    let mut control =
        ControlLoop::with_report(actuator.clone(), &config(1, DispatchMode::Pool), report.clone());

    let (source, log) = ScriptedSource::new(vec![]);
    let summary = control.run(|| Ok(source)).unwrap();

    assert_eq!(control.phase(), Phase::Stopped);
    assert_eq!(summary.frames_polled, 0);
    assert_eq!(log.polls.load(Ordering::SeqCst), 0);
    assert!(log.released.load(Ordering::SeqCst));
    assert!(report.text().is_empty());

    control.finish();
    assert_eq!(actuator.homes.load(Ordering::SeqCst), 1);
    assert!(actuator.targets().is_empty());
}

#[test]
fn markers_in_one_frame_share_the_cadence_counter() {
    let actuator = Arc::new(RecordingActuator::default());
    let report = Report::default();
    let mut control =
        ControlLoop::with_report(actuator.clone(), &config(1, DispatchMode::Pool), report.clone());

    let (source, _log) = ScriptedSource::new(vec![Step::Frame(
        7,
        vec![marker("A", 80., 90.), marker("B", 80., 90.)],
    )]);
    let summary = control.run(|| Ok(source)).unwrap();
    control.finish();

    assert_eq!(summary.observations, 2);
    assert_eq!(summary.evaluations, 2);
    // B sits where A just sent the stage.
    assert_eq!(summary.moves_dispatched, 1);
    assert_eq!(actuator.targets(), vec![MoveCommand { x: 60., y: 50., z: 0. }]);
    assert_eq!(
        report.text(),
        "Frame #7, 233.1ms\n\
         Marker name: A\n\tposition in pixels: (80, 90)\n\
         Marker name: B\n\tposition in pixels: (80, 90)\n"
    );
}

#[test]
fn filter_runs_once_per_stride_across_frames() {
    let actuator = Arc::new(RecordingActuator::default());
    let mut control = ControlLoop::with_report(
        actuator.clone(),
        &config(3, DispatchMode::PerMove),
        io::sink(),
    );

    // Seven observations spread unevenly over four frames; every one is far
    // from the previous so each evaluation dispatches.
    let mut k = 0.;
    let mut next = |name: &str| {
        k += 100.;
        marker(name, k, k)
    };
    let steps = vec![
        Step::Frame(1, vec![next("A"), next("B")]),
        Step::Frame(2, vec![]),
        Step::Nothing,
        Step::Frame(4, vec![next("A"), next("B"), next("C"), next("D")]),
        Step::Frame(5, vec![next("A")]),
    ];
    let (source, _log) = ScriptedSource::new(steps);

    let summary = control.run(|| Ok(source)).unwrap();
    control.finish();

    assert_eq!(summary.observations, 7);
    assert_eq!(summary.evaluations, 2);
    assert_eq!(summary.moves_dispatched, 2);

    let mut targets = actuator.targets();
    targets.sort_by(|a, b| a.x.total_cmp(&b.x));
    assert_eq!(
        targets,
        vec![
            MoveCommand { x: 270., y: 270., z: 0. },
            MoveCommand { x: 570., y: 570., z: 0. },
        ]
    );
}

#[test]
fn every_poll_reaches_the_sinks_except_empty_ones_carry_no_frame() {
    let actuator = Arc::new(RecordingActuator::default());
    let report = Report::default();
    let mut control =
        ControlLoop::with_report(actuator, &config(30, DispatchMode::Pool), report.clone());

    let (source, log) = ScriptedSource::new(vec![
        Step::Nothing,
        Step::Frame(1, vec![]),
        Step::Nothing,
        Step::Frame(3, vec![marker("A", 1., 2.)]),
    ]);
    let summary = control.run(|| Ok(source)).unwrap();
    control.finish();

    let expected = vec![None, Some(1), None, Some(3)];
    assert_eq!(*log.video.lock(), expected);
    assert_eq!(*log.display.lock(), expected);
    assert_eq!(summary.frames_polled, 4);
    assert_eq!(summary.frames_with_data, 2);
    assert!(report.text().starts_with("Frame #1, 33.3ms\nFrame #3, 99.9ms\n"));
}

#[test]
fn slow_moves_never_hold_up_polling() {
    let (actuator, gate) = RecordingActuator::gated();
    let mut control =
        ControlLoop::with_report(actuator.clone(), &config(1, DispatchMode::Pool), io::sink());

    let steps = (1..=20)
        .map(|i| Step::Frame(i, vec![marker("A", i as f64 * 10., i as f64 * 10.)]))
        .collect();
    let (source, log) = ScriptedSource::new(steps);

    // Every move blocks until released, so this only returns if polling
    // never waited on the stage.
    let summary = control.run(|| Ok(source)).unwrap();
    assert_eq!(log.polls.load(Ordering::SeqCst), 20);
    assert_eq!(summary.moves_dispatched, 20);
    assert!(actuator.targets().is_empty());

    for _ in 0..20 {
        let _ = gate.send(());
    }
    let counts = control.finish();
    assert_eq!(counts.submitted, 20);
    assert_eq!(counts.completed + counts.dropped, 20);

    let poll_thread = log.poll_threads.lock()[0];
    assert_eq!(poll_thread, thread::current().id());
    let moves = actuator.moves.lock();
    assert!(!moves.is_empty());
    assert!(moves.iter().all(|(_, thread)| *thread != poll_thread));
}

#[test]
fn discarded_move_does_not_hide_the_marker_position() {
    let (actuator, gate) = RecordingActuator::gated();
    let mut config = config(1, DispatchMode::Pool);
    config.dispatch.overflow = Overflow::DropNew;
    let mut control = ControlLoop::with_report(actuator.clone(), &config, io::sink());

    let busy = actuator.clone();
    let drained = actuator.clone();
    let release = gate.clone();
    let (source, _log) = ScriptedSource::new(vec![
        Step::Frame(1, vec![marker("A", 40., 40.)]),
        Step::Hook(Box::new(move || wait_for_started(&busy, 1))),
        // Queued behind the first move.
        Step::Frame(2, vec![marker("A", 50., 50.)]),
        // Queue full: discarded.
        Step::Frame(3, vec![marker("A", 70., 70.)]),
        Step::Hook(Box::new(move || {
            let _ = release.send(());
            wait_for_started(&drained, 2);
        })),
        // The stage never went to (70, 70), so this must move it there.
        Step::Frame(4, vec![marker("A", 70., 70.)]),
    ]);

    let summary = control.run(|| Ok(source)).unwrap();
    assert_eq!(summary.evaluations, 4);
    assert_eq!(summary.moves_dispatched, 3);
    assert_eq!(control.state().last_acted(), PixelPosition::new(70., 70.));

    let _ = gate.send(());
    let _ = gate.send(());
    let counts = control.finish();
    assert_eq!(counts.dropped, 1);
    assert_eq!(
        actuator.targets(),
        vec![
            MoveCommand { x: 10., y: 10., z: 0. },
            MoveCommand { x: 20., y: 20., z: 0. },
            MoveCommand { x: 40., y: 40., z: 0. },
        ]
    );
}

#[test]
fn homing_failure_aborts_before_acquisition() {
    let actuator = Arc::new(RecordingActuator {
        fail_home: true,
        ..RecordingActuator::default()
    });
    let mut control = ControlLoop::with_report(actuator, &AppConfig::default(), io::sink());

    let acquired = AtomicBool::new(false);
    let result = control.run(|| -> Result<ScriptedSource, SourceError> {
        acquired.store(true, Ordering::SeqCst);
        Ok(ScriptedSource::new(vec![]).0)
    });

    assert!(result.is_err());
    assert!(!acquired.load(Ordering::SeqCst));
    control.finish();
}

#[test]
fn source_is_released_when_the_run_fails() {
    let actuator = Arc::new(RecordingActuator::default());
    let mut control = ControlLoop::with_report(actuator, &AppConfig::default(), BrokenPipe);

    let (source, log) = ScriptedSource::new(vec![
        Step::Frame(1, vec![marker("A", 1., 1.)]),
        Step::Frame(2, vec![]),
    ]);
    let result = control.run(|| Ok(source));

    assert!(result.is_err());
    assert_eq!(control.phase(), Phase::Stopped);
    assert!(log.released.load(Ordering::SeqCst));
    control.finish();
}
