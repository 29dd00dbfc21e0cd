// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Framing exercises over a real socket pair, the way the two peers
//! actually use the codec: a command frame assembled into one buffer,
//! followed by an optional bulk payload.

use cl_protocol::pack::{read_pack, write_pack};
use cl_protocol::pipe::pipe;
use cl_protocol::wire::{WireRead, WireWrite};
use cl_protocol::{Command, HandleKind};

#[test]
fn command_frame_round_trip() {
    let (mut tx, mut rx) = pipe().unwrap();

    let mut frame = Vec::new();
    frame.put_u32(Command::EnqueueReadBuffer.into()).unwrap();
    frame.put_handle(HandleKind::CommandQueue, 3).unwrap();
    frame.put_handle(HandleKind::Mem, 8).unwrap();
    frame.put_bool(false).unwrap();
    frame.put_size(0).unwrap();
    frame.put_size(4096).unwrap();
    frame.put_bool(true).unwrap();
    frame.put_u32(1).unwrap();
    frame.put_handle(HandleKind::Event, 5).unwrap();

    std::io::Write::write_all(&mut tx, &frame).unwrap();

    let tag = Command::decode(rx.get_u32().unwrap()).unwrap();
    assert_eq!(tag, Command::EnqueueReadBuffer);
    assert_eq!(rx.get_handle(HandleKind::CommandQueue).unwrap(), 3);
    assert_eq!(rx.get_handle(HandleKind::Mem).unwrap(), 8);
    assert!(!rx.get_bool().unwrap());
    assert_eq!(rx.get_size().unwrap(), 0);
    assert_eq!(rx.get_size().unwrap(), 4096);
    assert!(rx.get_bool().unwrap());
    let num_wait = rx.get_u32().unwrap() as usize;
    assert_eq!(rx.get_handles(HandleKind::Event, num_wait).unwrap(), [5]);
}

#[test]
fn frame_followed_by_payload() {
    let (mut tx, mut rx) = pipe().unwrap();
    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();

    let sender = {
        let data = payload.clone();
        std::thread::spawn(move || {
            let mut frame = Vec::new();
            frame.put_u32(Command::EnqueueWriteBuffer.into()).unwrap();
            frame.put_size(data.len() as u64).unwrap();
            std::io::Write::write_all(&mut tx, &frame).unwrap();
            write_pack(&mut tx, &data).unwrap();
        })
    };

    assert_eq!(
        Command::decode(rx.get_u32().unwrap()).unwrap(),
        Command::EnqueueWriteBuffer
    );
    let size = rx.get_size().unwrap();
    let got = read_pack(&mut rx, size).unwrap();
    assert_eq!(got, payload);

    sender.join().unwrap();
}
