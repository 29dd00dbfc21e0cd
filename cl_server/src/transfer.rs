// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The server half of asynchronous bulk transfers.
//!
//! A non-blocking read or write never puts its payload on the primary
//! stream. The dispatcher instead binds a listener somewhere in the
//! configured data-port range, tells the client the port in the reply, and
//! hands the rest to a worker thread: accept the ephemeral connection,
//! satisfy the wait-list, drive the runtime, move one compressed
//! `dataPack`, and settle the submission's event. Each worker owns its
//! listener and socket, so every exit path closes both.

use log::*;

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use socket2::{Domain, Socket, Type};

use cl_protocol::pack::{read_pack, write_pack};
use cl_protocol::types::Status;
use cl_protocol::ExecState;

use crate::events::{wait_all, SrvEvent};
use crate::runtime::{RtEvent, RtMem, RtQueue, Runtime};

/// How long a worker waits for the client to show up on the ephemeral
/// port before declaring the transfer dead.
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to sleep after scanning the whole range without finding a
/// free port, before trying again.
const RANGE_RETRY_SLEEP: Duration = Duration::from_millis(50);
const RANGE_RETRY_PASSES: u32 = 20;

/// Bind a listener on a free port within `range`. The range is scanned in
/// order with `SO_REUSEADDR` set, sleeping briefly between exhaustion
/// passes; persistent exhaustion is reported as `out-of-host-memory` by
/// the caller.
pub fn open_data_port(range: (u16, u16)) -> Option<(TcpListener, u16)> {
    for pass in 0..RANGE_RETRY_PASSES {
        for port in range.0..=range.1 {
            let socket = match Socket::new(Domain::IPV4, Type::STREAM, None) {
                Ok(s) => s,
                Err(e) => {
                    warn!("can't create a data-transfer socket: {e}");
                    return None;
                }
            };
            if socket.set_reuse_address(true).is_err() {
                continue;
            }
            let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
            if socket.bind(&addr.into()).is_err() {
                continue;
            }
            if socket.listen(1).is_err() {
                continue;
            }
            return Some((socket.into(), port));
        }
        if pass == 0 {
            warn!(
                "no free data port in {}..={}, waiting for one",
                range.0, range.1
            );
        }
        std::thread::sleep(RANGE_RETRY_SLEEP);
    }
    None
}

/// What a read worker asks of the runtime. Every variant produces a dense
/// block the worker then packs onto the wire.
pub enum ReadOp {
    Buffer {
        mem: RtMem,
        offset: u64,
        len: u64,
    },
    BufferRect {
        mem: RtMem,
        origin: [u64; 3],
        region: [u64; 3],
        row_pitch: u64,
        slice_pitch: u64,
    },
    Image {
        mem: RtMem,
        origin: [u64; 3],
        region: [u64; 3],
    },
}

impl ReadOp {
    fn run(&self, runtime: &dyn Runtime, queue: RtQueue) -> Result<(Vec<u8>, RtEvent), Status> {
        match *self {
            Self::Buffer { mem, offset, len } => {
                runtime.enqueue_read_buffer(queue, mem, offset, len)
            }
            Self::BufferRect {
                mem,
                origin,
                region,
                row_pitch,
                slice_pitch,
            } => runtime.enqueue_read_buffer_rect(queue, mem, origin, region, row_pitch, slice_pitch),
            Self::Image {
                mem,
                origin,
                region,
            } => runtime.enqueue_read_image(queue, mem, origin, region),
        }
    }
}

/// What a write worker does with the dense block it receives.
pub enum WriteOp {
    Buffer {
        mem: RtMem,
        offset: u64,
    },
    BufferRect {
        mem: RtMem,
        origin: [u64; 3],
        region: [u64; 3],
        row_pitch: u64,
        slice_pitch: u64,
    },
    Image {
        mem: RtMem,
        origin: [u64; 3],
        region: [u64; 3],
    },
}

impl WriteOp {
    fn run(
        &self,
        runtime: &dyn Runtime,
        queue: RtQueue,
        dense: &[u8],
    ) -> Result<RtEvent, Status> {
        match *self {
            Self::Buffer { mem, offset } => runtime.enqueue_write_buffer(queue, mem, offset, dense),
            Self::BufferRect {
                mem,
                origin,
                region,
                row_pitch,
                slice_pitch,
            } => runtime
                .enqueue_write_buffer_rect(queue, mem, origin, region, row_pitch, slice_pitch, dense),
            Self::Image {
                mem,
                origin,
                region,
            } => runtime.enqueue_write_image(queue, mem, origin, region, dense),
        }
    }
}

/// A live transfer: the worker thread and nothing else. The listener and
/// the accepted socket live inside the thread, so joining the guard is
/// enough to know both are closed.
pub struct TransferGuard {
    handle: JoinHandle<()>,
}

impl TransferGuard {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) {
        let _ = self.handle.join();
    }
}

fn accept_with_deadline(listener: &TcpListener) -> std::io::Result<TcpStream> {
    listener.set_nonblocking(true)?;
    let deadline = Instant::now() + ACCEPT_TIMEOUT;
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false)?;
                return Ok(stream);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if Instant::now() > deadline {
                    return Err(std::io::ErrorKind::TimedOut.into());
                }
                std::thread::sleep(Duration::from_millis(2));
            }
            Err(e) => return Err(e),
        }
    }
}

fn settle(event: &Option<Arc<SrvEvent>>, state: ExecState) {
    if let Some(ev) = event {
        ev.finish(state);
    }
}

/// Spawn the worker for a non-blocking read: runtime → dense block →
/// dataPack → client.
pub fn spawn_read(
    listener: TcpListener,
    runtime: Arc<dyn Runtime>,
    queue: RtQueue,
    op: ReadOp,
    waits: Vec<Arc<SrvEvent>>,
    event: Option<Arc<SrvEvent>>,
) -> TransferGuard {
    let handle = std::thread::spawn(move || {
        let mut stream = match accept_with_deadline(&listener) {
            Ok(s) => s,
            Err(e) => {
                warn!("data connection for a read was never made: {e}");
                settle(&event, ExecState::Error(Status::OUT_OF_RESOURCES));
                return;
            }
        };
        drop(listener);

        if let Some(ev) = &event {
            ev.set_running();
        }
        if let Err(status) = wait_all(&waits, runtime.as_ref()) {
            settle(&event, ExecState::Error(status));
            return;
        }

        let (dense, rt_event) = match op.run(runtime.as_ref(), queue) {
            Ok(r) => r,
            Err(status) => {
                settle(&event, ExecState::Error(status));
                return;
            }
        };
        if let Err(status) = runtime.wait_events(&[rt_event]) {
            settle(&event, ExecState::Error(status));
            return;
        }

        if let Err(e) = write_pack(&mut stream, &dense) {
            warn!("sending a read payload failed: {e}");
            let _ = runtime.release_event(rt_event);
            settle(&event, ExecState::Error(Status::OUT_OF_RESOURCES));
            return;
        }

        match &event {
            Some(ev) => {
                ev.attach_rt(rt_event);
                ev.finish(ExecState::Complete);
            }
            None => {
                let _ = runtime.release_event(rt_event);
            }
        }
    });
    TransferGuard { handle }
}

/// Spawn the worker for a non-blocking write: client → dataPack → dense
/// block → runtime.
pub fn spawn_write(
    listener: TcpListener,
    runtime: Arc<dyn Runtime>,
    queue: RtQueue,
    op: WriteOp,
    expected: u64,
    waits: Vec<Arc<SrvEvent>>,
    event: Option<Arc<SrvEvent>>,
) -> TransferGuard {
    let handle = std::thread::spawn(move || {
        let mut stream = match accept_with_deadline(&listener) {
            Ok(s) => s,
            Err(e) => {
                warn!("data connection for a write was never made: {e}");
                settle(&event, ExecState::Error(Status::OUT_OF_RESOURCES));
                return;
            }
        };
        drop(listener);

        let dense = match read_pack(&mut stream, expected) {
            Ok(d) => d,
            Err(e) => {
                warn!("receiving a write payload failed: {e}");
                settle(&event, ExecState::Error(Status::OUT_OF_RESOURCES));
                return;
            }
        };

        if let Some(ev) = &event {
            ev.set_running();
        }
        if let Err(status) = wait_all(&waits, runtime.as_ref()) {
            settle(&event, ExecState::Error(status));
            return;
        }

        let rt_event = match op.run(runtime.as_ref(), queue, &dense) {
            Ok(e) => e,
            Err(status) => {
                settle(&event, ExecState::Error(status));
                return;
            }
        };
        if let Err(status) = runtime.wait_events(&[rt_event]) {
            settle(&event, ExecState::Error(status));
            return;
        }

        match &event {
            Some(ev) => {
                ev.attach_rt(rt_event);
                ev.finish(ExecState::Complete);
            }
            None => {
                let _ = runtime.release_event(rt_event);
            }
        }
    });
    TransferGuard { handle }
}

/// Spawn the worker for a submission whose wait-list is not yet settled:
/// no data moves, but the runtime call must not happen — and the reply
/// must not be delayed — until the dependencies resolve. The closure runs
/// the actual enqueue once they do.
pub fn spawn_deferred(
    runtime: Arc<dyn Runtime>,
    f: impl FnOnce(&dyn Runtime) -> Result<RtEvent, Status> + Send + 'static,
    waits: Vec<Arc<SrvEvent>>,
    event: Option<Arc<SrvEvent>>,
) -> TransferGuard {
    let handle = std::thread::spawn(move || {
        if let Err(status) = wait_all(&waits, runtime.as_ref()) {
            settle(&event, ExecState::Error(status));
            return;
        }
        if let Some(ev) = &event {
            ev.set_running();
        }
        let rt_event = match f(runtime.as_ref()) {
            Ok(e) => e,
            Err(status) => {
                settle(&event, ExecState::Error(status));
                return;
            }
        };
        if let Err(status) = runtime.wait_events(&[rt_event]) {
            settle(&event, ExecState::Error(status));
            return;
        }
        match &event {
            Some(ev) => {
                ev.attach_rt(rt_event);
                ev.finish(ExecState::Complete);
            }
            None => {
                let _ = runtime.release_event(rt_event);
            }
        }
    });
    TransferGuard { handle }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_port_comes_from_the_range() {
        let (listener, port) = open_data_port((41501, 41510)).unwrap();
        assert!((41501..=41510).contains(&port));
        // The next transfer skips the bound port.
        let (second, port2) = open_data_port((41501, 41510)).unwrap();
        assert_ne!(port, port2);
        drop(listener);
        drop(second);
    }
}
