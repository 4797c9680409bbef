use std::{thread::sleep, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use puck_follow::{
    logging,
    types::MoveCommand,
    udp::{StageOp, StageReply, StageRequest, UdpLink},
};

/// Stand-in for the stage controller: answers move and home requests over UDP.
#[derive(Debug, Parser)]
#[clap(about)]
struct Args {
    /// UDP port to listen on
    #[clap(short, long, value_parser, default_value = "4826")]
    port: u16,

    /// Milliseconds to wait before acknowledging each move
    #[clap(short, long, value_parser, default_value = "0")]
    travel_ms: u64,

    /// Reject moves whose x or y lies outside 0..=LIMIT
    #[clap(short, long, value_parser)]
    limit: Option<f64>,
}

fn check_limits(command: &MoveCommand, limit: Option<f64>) -> Result<(), String> {
    match limit {
        Some(limit) if !(0. ..=limit).contains(&command.x) || !(0. ..=limit).contains(&command.y) => {
            Err(format!("target ({:.1}, {:.1}) outside travel", command.x, command.y))
        }
        _ => Ok(()),
    }
}

fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    let link = UdpLink::bind(args.port).context("Failed to bind stage port")?;
    info!("Stage emulator listening on {}", link.local_addr()?);

    let travel = Duration::from_millis(args.travel_ms);
    let mut position = MoveCommand { x: 0., y: 0., z: 0. };

    loop {
        let (request, from): (StageRequest, _) = match link.recv_from() {
            Ok(received) => received,
            Err(err) => {
                warn!("Discarding malformed request: {}", err);
                continue;
            }
        };

        let result = match request.op {
            StageOp::Home => {
                info!(
                    "#{} homing from ({:.1}, {:.1})",
                    request.seq, position.x, position.y
                );
                position = MoveCommand { x: 0., y: 0., z: 0. };
                Ok(())
            }
            StageOp::MoveTo(target) => check_limits(&target, args.limit).map(|()| {
                sleep(travel);
                position = target;
                info!(
                    "#{} moved to ({:.1}, {:.1}, {:.1})",
                    request.seq, position.x, position.y, position.z
                );
            }),
        };

        if let Err(reason) = &result {
            warn!("#{} rejected: {}", request.seq, reason);
        }

        let reply = StageReply {
            seq: request.seq,
            result,
        };
        if let Err(err) = link.send_to(&reply, from) {
            warn!("Failed to answer {}: {}", from, err);
        }
    }
}
