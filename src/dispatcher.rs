use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, error, warn};

use crate::{
    actuator::Actuator,
    config::{DispatchConfig, DispatchMode, Overflow},
    state::ActuationState,
    types::{MoveCommand, PixelPosition, TargetMapping},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Submitted,
    ReplacedOldest,
    Dropped,
}

enum Strategy {
    PerMove {
        handles: Vec<JoinHandle<()>>,
    },
    Pool {
        queue: Sender<MoveCommand>,
        // Kept to evict the oldest queued move on overflow.
        backlog: Receiver<MoveCommand>,
        overflow: Overflow,
        workers: Vec<JoinHandle<()>>,
    },
}

pub struct MoveDispatcher {
    actuator: Arc<dyn Actuator>,
    mapping: TargetMapping,
    state: Arc<ActuationState>,
    strategy: Strategy,
}

impl MoveDispatcher {
    pub fn new(
        actuator: Arc<dyn Actuator>,
        mapping: TargetMapping,
        state: Arc<ActuationState>,
        config: &DispatchConfig,
    ) -> Self {
        let strategy = match config.mode {
            DispatchMode::PerMove => Strategy::PerMove {
                handles: Vec::new(),
            },
            DispatchMode::Pool => {
                let (queue, backlog) = bounded::<MoveCommand>(config.queue_capacity.max(1));
                let workers = (0..config.workers.max(1))
                    .map(|worker| {
                        spawn_worker(worker, actuator.clone(), backlog.clone(), state.clone())
                    })
                    .collect();
                Strategy::Pool {
                    queue,
                    backlog,
                    overflow: config.overflow,
                    workers,
                }
            }
        };

        MoveDispatcher {
            actuator,
            mapping,
            state,
            strategy,
        }
    }

    pub fn state(&self) -> &Arc<ActuationState> {
        &self.state
    }

    /// Convert `position` into a stage target and submit it. Never waits for the
    /// stage. A dropped move leaves the last acted position untouched.
    pub fn dispatch(&mut self, position: PixelPosition) -> DispatchOutcome {
        let command = self.mapping.target_for(position);
        let previous = self.state.last_acted();
        self.state.set_last_acted(position);
        debug!(
            "Dispatching move to ({:.1}, {:.1}, {:.1}) for pixel {}",
            command.x, command.y, command.z, position
        );

        let outcome = match &mut self.strategy {
            Strategy::PerMove { handles } => {
                handles.retain(|handle| !handle.is_finished());
                let actuator = self.actuator.clone();
                let state = self.state.clone();
                let spawned = thread::Builder::new()
                    .name("stage-move".into())
                    .spawn(move || execute(actuator.as_ref(), &state, command));
                match spawned {
                    Ok(handle) => {
                        handles.push(handle);
                        DispatchOutcome::Submitted
                    }
                    Err(err) => {
                        error!("Failed to spawn move thread: {}", err);
                        DispatchOutcome::Dropped
                    }
                }
            }
            Strategy::Pool {
                queue,
                backlog,
                overflow,
                ..
            } => submit(queue, backlog, *overflow, command),
        };

        match outcome {
            DispatchOutcome::Submitted => self.state.stats.record_submitted(),
            DispatchOutcome::ReplacedOldest => {
                self.state.stats.record_submitted();
                self.state.stats.record_dropped();
            }
            DispatchOutcome::Dropped => {
                self.state.set_last_acted(previous);
                self.state.stats.record_dropped();
            }
        }
        outcome
    }

    pub fn finish(self) {
        match self.strategy {
            Strategy::PerMove { handles } => {
                for handle in handles {
                    let _ = handle.join();
                }
            }
            Strategy::Pool {
                queue,
                backlog,
                workers,
                ..
            } => {
                drop(queue);
                drop(backlog);
                for handle in workers {
                    let _ = handle.join();
                }
            }
        }
    }
}

fn submit(
    queue: &Sender<MoveCommand>,
    backlog: &Receiver<MoveCommand>,
    overflow: Overflow,
    command: MoveCommand,
) -> DispatchOutcome {
    match queue.try_send(command) {
        Ok(()) => DispatchOutcome::Submitted,
        Err(TrySendError::Full(command)) => match overflow {
            Overflow::DropNew => {
                warn!("Move queue full, discarding new move");
                DispatchOutcome::Dropped
            }
            Overflow::DropOldest => {
                let evicted = backlog.try_recv().ok();
                match queue.try_send(command) {
                    Ok(()) => {
                        if let Some(old) = evicted {
                            debug!("Replaced queued move to ({:.1}, {:.1})", old.x, old.y);
                            DispatchOutcome::ReplacedOldest
                        } else {
                            DispatchOutcome::Submitted
                        }
                    }
                    // A worker can't refill the queue, so this only happens
                    // if it was disconnected.
                    Err(_) => {
                        warn!("Move queue unavailable, discarding move");
                        DispatchOutcome::Dropped
                    }
                }
            }
        },
        Err(TrySendError::Disconnected(_)) => {
            error!("Move workers are gone, discarding move");
            DispatchOutcome::Dropped
        }
    }
}

fn spawn_worker(
    worker: usize,
    actuator: Arc<dyn Actuator>,
    backlog: Receiver<MoveCommand>,
    state: Arc<ActuationState>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("stage-move-{}", worker))
        .spawn(move || {
            for command in backlog.iter() {
                execute(actuator.as_ref(), &state, command);
            }
        })
        .expect("failed to spawn move worker")
}

fn execute(actuator: &dyn Actuator, state: &ActuationState, command: MoveCommand) {
    match actuator.move_to(command.x, command.y, command.z) {
        Ok(()) => state.stats.record_completed(),
        Err(err) => {
            state.stats.record_failed();
            error!(
                "Move to ({:.1}, {:.1}, {:.1}) failed: {}",
                command.x, command.y, command.z, err
            );
        }
    }
}
