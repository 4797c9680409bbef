use std::{
    io,
    net::{SocketAddr, UdpSocket},
    thread,
    time::Duration,
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::warn;

use crate::{error::ActuatorError, types::MoveCommand};

const MAX_DATAGRAM: usize = 1024;
const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_RETRY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StageOp {
    Home,
    MoveTo(MoveCommand),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRequest {
    pub seq: u32,
    pub op: StageOp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReply {
    pub seq: u32,
    pub result: Result<(), String>,
}

pub struct UdpLink {
    socket: UdpSocket,
}

impl UdpLink {
    /// Bind `src_port` (0 for any) and connect to `dst_address`, retrying while
    /// the hostname does not resolve yet.
    pub fn connect(src_port: u16, dst_address: &str) -> io::Result<UdpLink> {
        let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], src_port)))?;

        let mut attempt = 1;
        while let Err(err) = socket.connect(dst_address) {
            if attempt == CONNECT_ATTEMPTS {
                return Err(err);
            }
            warn!("Could not reach {} ({}), retrying", dst_address, err);
            thread::sleep(CONNECT_RETRY);
            attempt += 1;
        }

        Ok(UdpLink { socket })
    }

    pub fn bind(port: u16) -> io::Result<UdpLink> {
        let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], port)))?;
        Ok(UdpLink { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(timeout)
    }

    pub fn send(&self, msg: &impl Serialize) -> Result<usize, ActuatorError> {
        let buf = rmp_serde::to_vec(msg)?;
        Ok(self.socket.send(&buf)?)
    }

    pub fn send_to(&self, msg: &impl Serialize, addr: SocketAddr) -> Result<usize, ActuatorError> {
        let buf = rmp_serde::to_vec(msg)?;
        Ok(self.socket.send_to(&buf, addr)?)
    }

    pub fn recv<T: DeserializeOwned>(&self) -> Result<T, ActuatorError> {
        let mut buf = [0u8; MAX_DATAGRAM];
        let len = self.socket.recv(&mut buf)?;
        Ok(rmp_serde::from_slice(&buf[..len])?)
    }

    pub fn recv_from<T: DeserializeOwned>(&self) -> Result<(T, SocketAddr), ActuatorError> {
        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, addr) = self.socket.recv_from(&mut buf)?;
        Ok((rmp_serde::from_slice(&buf[..len])?, addr))
    }
}
