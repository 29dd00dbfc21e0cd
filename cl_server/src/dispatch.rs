// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! One dispatcher per accepted connection: read a command tag, demux to
//! its handler, reply. Handler boundaries are the commit points — a
//! handler either completes all of its sends or the connection is
//! abandoned; nothing allocated for a call survives it except objects
//! registered on success.

use log::*;

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use cl_protocol::wire::{send_frame, WireRead, WireWrite};
use cl_protocol::{Command, Error};

use crate::proc;
use crate::registry::Registry;
use crate::runtime::Runtime;
use crate::transfer::{self, TransferGuard};
use crate::Config;

pub struct Connection {
    pub stream: TcpStream,
    /// Reserved channel for server→client notifications, connected at
    /// session setup and held for the life of the session.
    pub callbacks: TcpStream,
    pub peer: SocketAddr,
    pub registry: Registry,
    pub runtime: Arc<dyn Runtime>,
    pub config: Arc<Config>,
    /// In-flight asynchronous transfers, reaped as they finish and joined
    /// at teardown.
    pub transfers: Vec<TransferGuard>,
}

impl Connection {
    /// Session setup: bind a port for the client's callbacks stream, tell
    /// the client where, and accept it.
    pub fn accept(
        stream: TcpStream,
        peer: SocketAddr,
        runtime: Arc<dyn Runtime>,
        config: Arc<Config>,
    ) -> std::io::Result<Self> {
        let (listener, port) = transfer::open_data_port(config.data_ports)
            .ok_or_else(|| std::io::Error::other("no port available for the callbacks stream"))?;

        let mut hello = Vec::new();
        hello.put_u32(port as u32)?;
        send_frame(&stream, &hello, false)?;

        let (callbacks, _) = listener.accept()?;
        debug!("session with {peer} established, callbacks stream on port {port}");

        Ok(Self {
            stream,
            callbacks,
            peer,
            registry: Registry::new(),
            runtime,
            config,
            transfers: Vec::new(),
        })
    }

    pub fn run(mut self) {
        loop {
            let tag = match (&self.stream).get_u32() {
                Ok(tag) => tag,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("{} disconnected", self.peer);
                    break;
                }
                Err(e) => {
                    warn!("error reading a command from {}: {e}", self.peer);
                    break;
                }
            };

            let cmd = match Command::decode(tag) {
                Ok(cmd) => cmd,
                Err(e) => {
                    warn!("{}: {e}", self.peer);
                    break;
                }
            };

            trace!("{}: {cmd:?}", self.peer);
            if let Err(e) = proc::dispatch(&mut self, cmd) {
                warn!("abandoning connection with {} in {cmd:?}: {e}", self.peer);
                break;
            }

            self.transfers.retain(|t| !t.is_finished());
        }

        // Transfers first: a worker may still hold events that the drain
        // below would otherwise release under it.
        for t in self.transfers.drain(..) {
            t.join();
        }
        self.registry.drain(self.runtime.as_ref());
    }
}

/// Map a connection-level failure to the error a handler reports: any
/// protocol or I/O trouble is fatal, so it simply bubbles.
pub type HandlerResult = Result<(), Error>;
