use std::{
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, Read, Write},
    path::Path,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    config::ActuatorConfig,
    error::ActuatorError,
    types::MoveCommand,
    udp::{StageOp, StageReply, StageRequest, UdpLink},
};

pub trait Actuator: Send + Sync {
    fn home(&self) -> Result<(), ActuatorError>;

    fn move_to(&self, x: f64, y: f64, z: f64) -> Result<(), ActuatorError>;
}

pub fn from_config(config: &ActuatorConfig) -> Result<Arc<dyn Actuator>, ActuatorError> {
    let actuator: Arc<dyn Actuator> = match config {
        ActuatorConfig::DryRun { latency_ms } => {
            Arc::new(DryRunActuator::new(Duration::from_millis(*latency_ms)))
        }
        ActuatorConfig::Gcode { device, feed_rate } => {
            Arc::new(GcodeActuator::open(device, *feed_rate)?)
        }
        ActuatorConfig::Udp {
            src_port,
            address,
            reply_timeout_ms,
        } => {
            let link = UdpLink::connect(*src_port, address)?;
            // A lost reply must not park a dispatch worker forever.
            link.set_read_timeout(Some(Duration::from_millis((*reply_timeout_ms).max(1))))?;
            Arc::new(UdpActuator::new(link))
        }
    };
    Ok(actuator)
}

pub struct DryRunActuator {
    latency: Duration,
}

impl DryRunActuator {
    pub fn new(latency: Duration) -> Self {
        DryRunActuator { latency }
    }
}

impl Actuator for DryRunActuator {
    fn home(&self) -> Result<(), ActuatorError> {
        info!("dry run: home");
        Ok(())
    }

    fn move_to(&self, x: f64, y: f64, z: f64) -> Result<(), ActuatorError> {
        info!("dry run: move to ({:.1}, {:.1}, {:.1})", x, y, z);
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        Ok(())
    }
}

pub struct GcodeActuator<T> {
    port: Mutex<BufReader<T>>,
    feed_rate: f64,
}

impl GcodeActuator<File> {
    pub fn open(device: &Path, feed_rate: f64) -> io::Result<Self> {
        let port = OpenOptions::new().read(true).write(true).open(device)?;
        Ok(GcodeActuator::new(port, feed_rate))
    }
}

impl<T: Read + Write + Send> GcodeActuator<T> {
    pub fn new(port: T, feed_rate: f64) -> Self {
        GcodeActuator {
            port: Mutex::new(BufReader::new(port)),
            feed_rate,
        }
    }

    pub fn into_inner(self) -> T {
        self.port.into_inner().into_inner()
    }

    /// Send one block and wait for its `ok`; informational lines are skipped.
    fn command(port: &mut BufReader<T>, block: &str) -> Result<(), ActuatorError> {
        debug!("gcode > {}", block);
        let stream = port.get_mut();
        stream.write_all(block.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;

        loop {
            let mut line = String::new();
            if port.read_line(&mut line)? == 0 {
                return Err(ActuatorError::Disconnected);
            }

            let reply = line.trim();
            debug!("gcode < {}", reply);
            if reply == "ok" {
                return Ok(());
            }
            if reply.starts_with("error") || reply.starts_with("ALARM") {
                return Err(ActuatorError::Rejected {
                    command: block.to_string(),
                    reply: reply.to_string(),
                });
            }
        }
    }
}

impl<T: Read + Write + Send> Actuator for GcodeActuator<T> {
    fn home(&self) -> Result<(), ActuatorError> {
        let mut port = self.port.lock();
        Self::command(&mut port, "$H")
    }

    fn move_to(&self, x: f64, y: f64, z: f64) -> Result<(), ActuatorError> {
        let mut port = self.port.lock();
        Self::command(
            &mut port,
            &format!(
                "G90 G1 X{:.3} Y{:.3} Z{:.3} F{:.0}",
                x, y, z, self.feed_rate
            ),
        )?;
        // Dwell of zero only completes once the planner buffer is empty.
        Self::command(&mut port, "G4 P0")
    }
}

pub struct UdpActuator {
    link: Mutex<UdpLink>,
    seq: AtomicU32,
}

impl UdpActuator {
    pub fn new(link: UdpLink) -> Self {
        UdpActuator {
            link: Mutex::new(link),
            seq: AtomicU32::new(0),
        }
    }

    fn request(&self, op: StageOp) -> Result<(), ActuatorError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let link = self.link.lock();
        link.send(&StageRequest { seq, op })?;

        loop {
            let reply: StageReply = link.recv()?;
            if reply.seq != seq {
                debug!("Ignoring stale stage reply #{}", reply.seq);
                continue;
            }
            return reply.result.map_err(|reply| ActuatorError::Rejected {
                command: format!("{:?}", op),
                reply,
            });
        }
    }
}

impl Actuator for UdpActuator {
    fn home(&self) -> Result<(), ActuatorError> {
        self.request(StageOp::Home)
    }

    fn move_to(&self, x: f64, y: f64, z: f64) -> Result<(), ActuatorError> {
        self.request(StageOp::MoveTo(MoveCommand { x, y, z }))
    }
}
