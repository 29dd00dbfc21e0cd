// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The client half of asynchronous bulk transfers.
//!
//! A non-blocking read or write spawns one worker per transfer. The
//! worker connects to the ephemeral port the server named in its reply —
//! retrying while the connection is refused, since the server's accept
//! may trail its bind by a scheduling quantum — moves one compressed
//! `dataPack`, runs any host-side post-processing (the pitched scatter of
//! a rect transfer), and finalises the submission's event.

use log::*;

use std::net::{IpAddr, TcpStream};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cl_protocol::pack::{read_pack, write_pack};
use cl_protocol::{ExecState, Status};

use crate::event::Event;

/// How long to keep retrying the data connection before declaring the
/// transfer dead.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

fn connect_data(ip: IpAddr, port: u16) -> std::io::Result<TcpStream> {
    let deadline = Instant::now() + CONNECT_TIMEOUT;
    loop {
        match TcpStream::connect((ip, port)) {
            Ok(stream) => return Ok(stream),
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                // The server is still between bind and accept.
                if Instant::now() > deadline {
                    return Err(std::io::ErrorKind::TimedOut.into());
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(e) => return Err(e),
        }
    }
}

/// An in-flight read. The data arrives on a worker thread; [`wait`]
/// hands it over once the transfer (including any pitched scatter) is
/// done. Dropping this without waiting abandons the data but not the
/// transfer — the event still settles.
///
/// [`wait`]: PendingRead::wait
#[derive(Debug)]
pub struct PendingRead {
    event: Event,
    handle: JoinHandle<crate::Result<Vec<u8>>>,
}

impl PendingRead {
    /// The submission's event.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Block until the data is on the host, and take it.
    pub fn wait(self) -> crate::Result<Vec<u8>> {
        self.handle
            .join()
            .unwrap_or(Err(Status::OUT_OF_RESOURCES))
    }
}

/// Spawn the worker for a non-blocking read. `expected` is the dense
/// byte count on the wire; `post` turns the dense block into what the
/// caller asked for (identity for plain reads, the pitched scatter for
/// rect and image reads).
pub(crate) fn spawn_read(
    ip: IpAddr,
    port: u16,
    expected: u64,
    post: impl FnOnce(Vec<u8>) -> crate::Result<Vec<u8>> + Send + 'static,
    event: Event,
) -> PendingRead {
    let worker_event = event.clone();
    let handle = std::thread::spawn(move || {
        let run = || -> crate::Result<Vec<u8>> {
            let mut stream = connect_data(ip, port).map_err(|e| {
                warn!("data connection for a read failed: {e}");
                Status::OUT_OF_RESOURCES
            })?;
            let dense = read_pack(&mut stream, expected).map_err(|e| {
                warn!("receiving a read payload failed: {e}");
                Status::OUT_OF_RESOURCES
            })?;
            post(dense)
        };
        match run() {
            Ok(data) => {
                worker_event.finish_local(ExecState::Complete);
                Ok(data)
            }
            Err(status) => {
                worker_event.finish_local(ExecState::Error(status));
                Err(status)
            }
        }
    });
    PendingRead { event, handle }
}

/// Spawn the worker for a non-blocking write. `make_dense` produces the
/// block to ship (identity for plain writes, the pitched gather for rect
/// writes); running it on the worker keeps the submission call
/// non-blocking even for large gathers.
pub(crate) fn spawn_write(
    ip: IpAddr,
    port: u16,
    make_dense: impl FnOnce() -> crate::Result<Vec<u8>> + Send + 'static,
    event: Event,
) {
    std::thread::spawn(move || {
        let run = || -> crate::Result<()> {
            let dense = make_dense()?;
            let mut stream = connect_data(ip, port).map_err(|e| {
                warn!("data connection for a write failed: {e}");
                Status::OUT_OF_RESOURCES
            })?;
            write_pack(&mut stream, &dense).map_err(|e| {
                warn!("sending a write payload failed: {e}");
                Status::OUT_OF_RESOURCES
            })
        };
        match run() {
            // This side's work ends when the payload is on the wire; the
            // server's half of the event settles when the data is
            // committed.
            Ok(()) => event.finish_local(ExecState::Complete),
            Err(status) => event.finish_local(ExecState::Error(status)),
        }
    });
}
