// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The compute-API server: accepts client connections, validates and
//! decodes their commands against a per-connection handle registry, and
//! drives the local accelerator runtime on their behalf. Bulk payloads
//! are diverted onto ephemeral data connections handled by worker
//! threads.

pub mod dispatch;
pub mod events;
pub mod proc;
pub mod registry;
pub mod runtime;
pub mod transfer;

use log::*;

use std::net::TcpListener;
use std::sync::Arc;

use crate::dispatch::Connection;
use crate::runtime::Runtime;

/// The default control port and data-port range. Both are configurable on
/// the daemon's command line.
pub const DEFAULT_PORT: u16 = 51000;
pub const DEFAULT_DATA_PORTS: (u16, u16) = (51001, 51150);

#[derive(Debug, Clone)]
pub struct Config {
    /// The range of ports scanned for ephemeral data connections (and the
    /// per-session callbacks stream).
    pub data_ports: (u16, u16),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_ports: DEFAULT_DATA_PORTS,
        }
    }
}

/// Accept clients forever, one dispatcher thread per connection.
pub fn serve(listener: TcpListener, runtime: Arc<dyn Runtime>, config: Config) {
    let config = Arc::new(config);
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                let runtime = Arc::clone(&runtime);
                let config = Arc::clone(&config);
                std::thread::spawn(move || match Connection::accept(stream, peer, runtime, config)
                {
                    Ok(conn) => conn.run(),
                    Err(e) => warn!("session setup with {peer} failed: {e}"),
                });
            }
            Err(e) => warn!("error accepting connection: {e}"),
        }
    }
}
