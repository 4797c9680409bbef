use std::{
    fmt,
    io::{self, Stdout, Write},
    sync::Arc,
};

use anyhow::{Context, Result};
use tracing::{debug, info, trace, warn};

use crate::{
    actuator::Actuator,
    config::AppConfig,
    dispatcher::{DispatchOutcome, MoveDispatcher},
    error::SourceError,
    filter::{should_move, EvaluationCadence},
    source::TrackingSource,
    state::{ActuationState, DispatchCounts},
    types::{FrameIndex, MarkerReading},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Polling,
    DrainingOutputs,
    EvaluatingMarkers,
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_polled: u64,
    pub frames_with_data: u64,
    pub observations: u64,
    pub evaluations: u64,
    pub moves_dispatched: u64,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} polls, {} frames with data, {} observations, {} evaluations, {} moves",
            self.frames_polled,
            self.frames_with_data,
            self.observations,
            self.evaluations,
            self.moves_dispatched
        )
    }
}

pub struct ControlLoop<W = Stdout> {
    actuator: Arc<dyn Actuator>,
    dispatcher: MoveDispatcher,
    state: Arc<ActuationState>,
    cadence: EvaluationCadence,
    min_delta: f64,
    report: W,
    phase: Phase,
}

impl ControlLoop<Stdout> {
    pub fn new(actuator: Arc<dyn Actuator>, config: &AppConfig) -> Self {
        Self::with_report(actuator, config, io::stdout())
    }
}

impl<W: Write> ControlLoop<W> {
    pub fn with_report(actuator: Arc<dyn Actuator>, config: &AppConfig, report: W) -> Self {
        let state = ActuationState::new();
        let dispatcher = MoveDispatcher::new(
            actuator.clone(),
            config.control.mapping(),
            state.clone(),
            &config.dispatch,
        );

        ControlLoop {
            actuator,
            dispatcher,
            state,
            cadence: EvaluationCadence::new(config.control.stride),
            min_delta: config.control.min_delta,
            report,
            phase: Phase::Starting,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &Arc<ActuationState> {
        &self.state
    }

    /// Home the stage, acquire a source with `acquire` and track until the
    /// source stops.
    ///
    /// Homing and acquisition failures abort before any polling. Once running,
    /// the source is released when this returns, whichever way it returns.
    pub fn run<S, F>(&mut self, acquire: F) -> Result<RunSummary>
    where
        S: TrackingSource,
        F: FnOnce() -> Result<S, SourceError>,
    {
        self.enter(Phase::Starting);
        self.actuator.home().context("Failed to home the stage")?;
        let mut source = acquire().context("Failed to acquire the tracking source")?;
        info!("Tracking started");

        let mut summary = RunSummary::default();
        let result = self.track(&mut source, &mut summary);

        self.enter(Phase::Stopped);
        drop(source);
        info!("Tracking stopped: {}", summary);

        result.map(|()| summary)
    }

    fn track<S: TrackingSource>(&mut self, source: &mut S, summary: &mut RunSummary) -> Result<()> {
        loop {
            self.enter(Phase::Polling);
            if !source.is_running() {
                return Ok(());
            }
            let polled = source.poll();
            summary.frames_polled += 1;

            self.enter(Phase::DrainingOutputs);
            source.write_frame_to_video(polled.as_ref());
            source.display_frame(polled.as_ref());

            let Some(tracked) = polled else {
                continue;
            };
            summary.frames_with_data += 1;

            self.enter(Phase::EvaluatingMarkers);
            let markers = source.observations_of(tracked.index);
            self.evaluate(source, tracked.index, &markers, summary)
                .context("Failed to write the frame report")?;
        }
    }

    fn evaluate<S: TrackingSource>(
        &mut self,
        source: &S,
        index: FrameIndex,
        markers: &[MarkerReading],
        summary: &mut RunSummary,
    ) -> io::Result<()> {
        let timestamp_ms = source
            .timestamp_of(index)
            .map(|ts| ts.as_secs_f64() * 1000.)
            .unwrap_or_default();
        writeln!(self.report, "Frame #{}, {:.1}ms", index, timestamp_ms)?;

        for marker in markers {
            summary.observations += 1;
            writeln!(self.report, "Marker name: {}", marker.name)?;

            let position = marker.observation.position;
            if self.cadence.observe() {
                summary.evaluations += 1;
                if should_move(position, self.state.last_acted(), self.min_delta) {
                    match self.dispatcher.dispatch(position) {
                        DispatchOutcome::Dropped => {
                            warn!("Move for {} at frame {} was dropped", marker.name, index)
                        }
                        _ => summary.moves_dispatched += 1,
                    }
                } else {
                    debug!("{} at {} is within the dead band", marker.name, position);
                }
            }

            writeln!(self.report, "\tposition in pixels: {}", position)?;
        }

        self.report.flush()
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            trace!("{:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    /// Wait for every dispatched move to finish and return what happened to
    /// them. Stopping the loop does not cancel moves already handed off.
    pub fn finish(self) -> DispatchCounts {
        self.dispatcher.finish();
        self.state.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{collections::VecDeque, time::Duration};

    use crate::{
        error::ActuatorError,
        frame::Frame,
        types::{MarkerObservation, PixelPosition, TrackedFrame},
    };

    #[derive(Default)]
    struct NullActuator;

    impl Actuator for NullActuator {
        fn home(&self) -> Result<(), ActuatorError> {
            Ok(())
        }

        fn move_to(&self, _x: f64, _y: f64, _z: f64) -> Result<(), ActuatorError> {
            Ok(())
        }
    }

    struct Script {
        frames: VecDeque<Option<(FrameIndex, Vec<MarkerReading>)>>,
        current: Vec<MarkerReading>,
    }

    impl TrackingSource for Script {
        fn is_running(&self) -> bool {
            !self.frames.is_empty()
        }

        fn poll(&mut self) -> Option<TrackedFrame> {
            let (index, markers) = self.frames.pop_front()??;
            self.current = markers;
            Some(TrackedFrame {
                index,
                frame: Frame::blank(2, 2),
            })
        }

        fn timestamp_of(&self, index: FrameIndex) -> Option<Duration> {
            Some(Duration::from_millis(index * 100))
        }

        fn observations_of(&self, _index: FrameIndex) -> Vec<MarkerReading> {
            self.current.clone()
        }
    }

    #[test]
    fn report_lines_match_frame_contents() {
        let config = AppConfig::default();
        let mut control = ControlLoop::with_report(Arc::new(NullActuator), &config, Vec::new());

        let script = Script {
            frames: VecDeque::from(vec![
                None,
                Some((
                    3,
                    vec![MarkerReading::new(
                        "red",
                        MarkerObservation::at(PixelPosition::new(12., 40.5)),
                    )],
                )),
                Some((4, vec![])),
            ]),
            current: vec![],
        };

        let summary = control.run(|| Ok(script)).unwrap();
        assert_eq!(control.phase(), Phase::Stopped);
        assert_eq!(
            String::from_utf8(control.report.clone()).unwrap(),
            "Frame #3, 300.0ms\nMarker name: red\n\tposition in pixels: (12, 40.5)\nFrame #4, 400.0ms\n"
        );
        assert_eq!(
            summary,
            RunSummary {
                frames_polled: 3,
                frames_with_data: 2,
                observations: 1,
                evaluations: 0,
                moves_dispatched: 0,
            }
        );
        control.finish();
    }

    #[test]
    fn acquisition_failure_aborts_before_polling() {
        let config = AppConfig::default();
        let mut control = ControlLoop::with_report(Arc::new(NullActuator), &config, Vec::new());

        let result = control.run(|| -> Result<Script, SourceError> {
            Err(SourceError::InputUnavailable("camera 7".into()))
        });
        assert!(result.is_err());
        assert_eq!(control.phase(), Phase::Starting);
        assert!(control.report.is_empty());
    }
}
