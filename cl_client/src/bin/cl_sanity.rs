// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! End-to-end smoke test against a running server: discovery, buffer
//! traffic both blocking and asynchronous, events, and a program build
//! attempt. Exits non-zero on the first mismatch.

use clap::Parser;

use cl_client::{device_type, wait_for_events, MemFlags, Session, Status};

#[derive(Debug, Parser)]
struct Cli {
    #[arg(long, default_value = "localhost")]
    hostname: String,

    #[arg(long, default_value_t = 51000)]
    port: u16,
}

fn main() -> std::process::ExitCode {
    env_logger::init();
    let args = Cli::parse();

    match run(&args) {
        Ok(()) => {
            println!("all checks passed");
            std::process::ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("FAILED: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn run(args: &Cli) -> Result<(), String> {
    let session = Session::connect(format!("{}:{}", args.hostname, args.port))
        .map_err(|e| format!("can't connect: {e}"))?;

    let platforms = session.platforms().map_err(|e| format!("platforms: {e}"))?;
    if platforms.is_empty() {
        return Err("server reports no platforms".into());
    }
    for p in &platforms {
        println!(
            "platform: {} ({}, {})",
            p.name().unwrap_or_default(),
            p.vendor().unwrap_or_default(),
            p.version().unwrap_or_default(),
        );
    }

    let devices = platforms[0]
        .devices(device_type::ALL)
        .map_err(|e| format!("devices: {e}"))?;
    for d in &devices {
        println!("  device: {}", d.name().unwrap_or_default());
    }

    let context = session
        .create_context(&devices, Some(&platforms[0]))
        .map_err(|e| format!("context: {e}"))?;
    let queue = context
        .create_queue(&devices[0], 0)
        .map_err(|e| format!("queue: {e}"))?;

    // Seeded buffer, read back over the primary stream.
    let n = 1 << 20;
    let seed: Vec<u8> = (0..n).map(|i| (i & 0xFF) as u8).collect();
    let buffer = context
        .create_buffer(
            MemFlags::READ_WRITE | MemFlags::COPY_HOST_PTR,
            n as u64,
            Some(&seed),
        )
        .map_err(|e| format!("buffer: {e}"))?;

    let mut back = vec![0u8; n];
    queue
        .enqueue_read_buffer_blocking(&buffer, 0, &mut back, &[])
        .map_err(|e| format!("blocking read: {e}"))?;
    if back != seed {
        return Err("blocking read returned different bytes".into());
    }
    println!("blocking read: ok ({n} bytes)");

    // The same region through the asynchronous path.
    let pending = queue
        .enqueue_read_buffer(&buffer, 0, n as u64, &[])
        .map_err(|e| format!("async read: {e}"))?;
    let event = pending.event().clone();
    let data = pending.wait().map_err(|e| format!("async read wait: {e}"))?;
    if data != seed {
        return Err("async read returned different bytes".into());
    }
    wait_for_events(std::slice::from_ref(&event))
        .map_err(|e| format!("async read event: {e}"))?;
    println!("async read: ok");

    // Fill then verify a slice server-side.
    queue
        .enqueue_fill_buffer(&buffer, &[0xA5, 0x5A], 0, 512, &[])
        .map_err(|e| format!("fill: {e}"))?;
    let mut filled = vec![0u8; 512];
    queue
        .enqueue_read_buffer_blocking(&buffer, 0, &mut filled, &[])
        .map_err(|e| format!("fill read: {e}"))?;
    if !filled.chunks(2).all(|c| c == [0xA5, 0x5A]) {
        return Err("fill pattern mismatch".into());
    }
    println!("fill buffer: ok");

    // A user event must gate work submitted behind it.
    let gate = session
        .create_user_event(&context)
        .map_err(|e| format!("user event: {e}"))?;
    let marker = queue
        .enqueue_marker_with_wait_list(std::slice::from_ref(&gate))
        .map_err(|e| format!("gated marker: {e}"))?;
    let early = marker.status().map_err(|e| format!("status: {e}"))?;
    if early.is_settled() {
        return Err("gated marker settled before its gate".into());
    }
    gate.set_status(Ok(())).map_err(|e| format!("set status: {e}"))?;
    marker.wait().map_err(|e| format!("gated marker wait: {e}"))?;
    println!("user-event gating: ok");

    // A build either succeeds or honestly reports the lack of a
    // compiler; a callback can do neither.
    let source = "__kernel void test(__global float *x) { x[get_global_id(0)] += 1.0f; }";
    let program = context
        .create_program_with_source(&[source])
        .map_err(|e| format!("program: {e}"))?;
    match program.build(&[], "") {
        Ok(()) => println!("program build: ok"),
        Err(Status::COMPILER_NOT_AVAILABLE) => {
            println!(
                "program build: no compiler ({})",
                program.build_log(&devices[0]).unwrap_or_default().trim()
            );
        }
        Err(e) => return Err(format!("build: {e}")),
    }
    match program.build_with_notify(&[], "", Box::new(|| {})) {
        Err(Status::OUT_OF_RESOURCES) => println!("callback rejection: ok"),
        other => return Err(format!("callback build returned {other:?}")),
    }

    buffer.release().map_err(|e| format!("release buffer: {e}"))?;
    queue.release().map_err(|e| format!("release queue: {e}"))?;
    context.release().map_err(|e| format!("release context: {e}"))?;
    Ok(())
}
