// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The compute-API daemon: listens for clients on the control port and
//! drives the accelerator runtime on their behalf.

use std::net::TcpListener;
use std::sync::Arc;

use clap::Parser;
use log::*;

use cl_server::runtime::soft::SoftRuntime;
use cl_server::{Config, DEFAULT_DATA_PORTS, DEFAULT_PORT};

#[derive(Debug, Parser)]
struct Cli {
    /// Address to listen on for the primary command streams.
    #[arg(long, default_value = "0.0.0.0")]
    address: String,

    /// Control port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// First port of the range used for data transfers and callbacks
    /// streams.
    #[arg(long, default_value_t = DEFAULT_DATA_PORTS.0)]
    data_port_first: u16,

    /// Last port of that range, inclusive.
    #[arg(long, default_value_t = DEFAULT_DATA_PORTS.1)]
    data_port_last: u16,
}

fn main() -> std::io::Result<()> {
    env_logger::init();
    let args = Cli::parse();

    if args.data_port_first > args.data_port_last {
        eprintln!("data port range is empty");
        std::process::exit(2);
    }

    let listener = TcpListener::bind((args.address.as_str(), args.port))?;
    info!(
        "listening on {}:{}, data ports {}..={}",
        args.address, args.port, args.data_port_first, args.data_port_last
    );

    let runtime = Arc::new(SoftRuntime::new());
    cl_server::serve(
        listener,
        runtime,
        Config {
            data_ports: (args.data_port_first, args.data_port_last),
        },
    );
    unreachable!("the accept loop does not return");
}
