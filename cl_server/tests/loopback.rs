// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Client ↔ server exercises over loopback TCP: the real client crate
//! against the real dispatcher, with the software device behind it (and,
//! for the kernel paths the software device cannot provide, a runtime
//! that pretends it can compile).

use std::net::TcpListener;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cl_client::{
    device_type, wait_for_events, ImageDesc, ImageFormat, KernelArg, MapFlags, MemFlags, Session,
    Status,
};
use cl_protocol::types::{arg_address, command_type, image_type, info};
use cl_server::runtime::soft::SoftRuntime;
use cl_server::runtime::*;
use cl_server::Config;

/// Ports for ephemeral data connections during tests. Every worker scans
/// the range and skips what is taken, so tests can share it.
const DATA_PORTS: (u16, u16) = (41100, 41250);

fn start_server(runtime: Arc<dyn Runtime>) -> Session {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        cl_server::serve(
            listener,
            runtime,
            Config {
                data_ports: DATA_PORTS,
            },
        );
    });
    Session::connect(addr).unwrap()
}

fn soft_session() -> Session {
    start_server(Arc::new(SoftRuntime::new()))
}

fn setup(session: &Session) -> (cl_client::Context, cl_client::Queue) {
    let platforms = session.platforms().unwrap();
    assert_eq!(platforms.len(), 1);
    let devices = platforms[0].devices(device_type::ALL).unwrap();
    let context = session.create_context(&devices, Some(&platforms[0])).unwrap();
    let queue = context.create_queue(&devices[0], 0).unwrap();
    (context, queue)
}

#[test]
fn discovery_and_info() {
    let session = soft_session();
    let platforms = session.platforms().unwrap();
    assert!(!platforms[0].name().unwrap().is_empty());

    // Listing twice hands back the same identities.
    let again = session.platforms().unwrap();
    assert_eq!(platforms.len(), again.len());

    let devices = platforms[0].devices(device_type::ALL).unwrap();
    assert_eq!(devices.len(), 1);
    assert!(!devices[0].compiler_available().unwrap());

    // And a GPU-only query against a CPU-only device fails properly.
    assert_eq!(
        platforms[0].devices(device_type::GPU).unwrap_err(),
        Status::DEVICE_NOT_FOUND
    );
}

#[test]
fn copy_host_ptr_round_trip() {
    let session = soft_session();
    let (context, queue) = setup(&session);

    let n = 1 << 20;
    let seed: Vec<u8> = (0..n as u32).map(|i| (i & 0xFF) as u8).collect();
    let buffer = context
        .create_buffer(
            MemFlags::READ_WRITE | MemFlags::COPY_HOST_PTR,
            n,
            Some(&seed),
        )
        .unwrap();

    let mut back = vec![0u8; n as usize];
    queue
        .enqueue_read_buffer_blocking(&buffer, 0, &mut back, &[])
        .unwrap();
    assert_eq!(back, seed);
}

#[test]
fn host_adopting_flags_are_refused_before_transmission() {
    let session = soft_session();
    let (context, _queue) = setup(&session);

    assert_eq!(
        context
            .create_buffer(MemFlags::READ_WRITE | MemFlags::USE_HOST_PTR, 64, None)
            .unwrap_err(),
        Status::INVALID_VALUE
    );
    assert_eq!(
        context
            .create_buffer(MemFlags::READ_WRITE | MemFlags::ALLOC_HOST_PTR, 64, None)
            .unwrap_err(),
        Status::INVALID_VALUE
    );

    let buffer = context.create_buffer(MemFlags::READ_WRITE, 64, None).unwrap();
    assert_eq!(
        buffer
            .create_sub_buffer(MemFlags::USE_HOST_PTR, 0, 32)
            .unwrap_err(),
        Status::INVALID_VALUE
    );
}

#[test]
fn async_read_delivers_and_completes() {
    let session = soft_session();
    let (context, queue) = setup(&session);

    let n = 1 << 22;
    let seed: Vec<u8> = (0..n as u32).map(|i| (i % 251) as u8).collect();
    let buffer = context.create_buffer(MemFlags::READ_WRITE, n, None).unwrap();
    queue
        .enqueue_write_buffer_blocking(&buffer, 0, &seed, &[])
        .unwrap();

    let pending = queue.enqueue_read_buffer(&buffer, 0, n, &[]).unwrap();
    let event = pending.event().clone();
    let data = pending.wait().unwrap();
    assert_eq!(data, seed);

    wait_for_events(std::slice::from_ref(&event)).unwrap();
    assert!(event.status().unwrap().is_settled());
    // Completion implies a full profile.
    let end = event.profiling(info::PROFILING_COMMAND_END).unwrap();
    let queued = event.profiling(info::PROFILING_COMMAND_QUEUED).unwrap();
    assert!(end >= queued);
}

#[test]
fn async_write_then_read_back() {
    let session = soft_session();
    let (context, queue) = setup(&session);

    let n = 1 << 20;
    let seed: Vec<u8> = (0..n as u32).map(|i| (i / 3) as u8).collect();
    let buffer = context.create_buffer(MemFlags::READ_WRITE, n, None).unwrap();

    let event = queue
        .enqueue_write_buffer(&buffer, 0, seed.clone(), &[])
        .unwrap();
    event.wait().unwrap();

    let mut back = vec![0u8; n as usize];
    queue
        .enqueue_read_buffer_blocking(&buffer, 0, &mut back, &[])
        .unwrap();
    assert_eq!(back, seed);
}

#[test]
fn event_release_mid_flight_still_delivers() {
    let session = soft_session();
    let (context, queue) = setup(&session);

    let n = 1 << 24;
    let seed: Vec<u8> = (0..n as u32).map(|i| (i >> 3) as u8).collect();
    let buffer = context.create_buffer(MemFlags::READ_WRITE, n, None).unwrap();
    queue
        .enqueue_write_buffer_blocking(&buffer, 0, &seed, &[])
        .unwrap();

    let pending = queue.enqueue_read_buffer(&buffer, 0, n, &[]).unwrap();
    // Sever interest immediately; the transfer itself must be unharmed.
    pending.event().release().unwrap();
    let data = pending.wait().unwrap();
    assert_eq!(data, seed);
}

#[test]
fn zero_sized_transfers_are_invalid() {
    let session = soft_session();
    let (context, queue) = setup(&session);
    let buffer = context.create_buffer(MemFlags::READ_WRITE, 64, None).unwrap();

    let mut empty = [0u8; 0];
    assert_eq!(
        queue
            .enqueue_read_buffer_blocking(&buffer, 0, &mut empty, &[])
            .unwrap_err(),
        Status::INVALID_VALUE
    );
    assert_eq!(
        queue.enqueue_read_buffer(&buffer, 0, 0, &[]).unwrap_err(),
        Status::INVALID_VALUE
    );
    assert_eq!(
        queue
            .enqueue_write_buffer(&buffer, 0, Vec::new(), &[])
            .unwrap_err(),
        Status::INVALID_VALUE
    );
}

#[test]
fn refcounts_forward_release_exactly_once() {
    let session = soft_session();
    let (context, queue) = setup(&session);
    let buffer = context.create_buffer(MemFlags::READ_WRITE, 64, None).unwrap();

    buffer.retain().unwrap();
    buffer.retain().unwrap();
    assert_eq!(buffer.refcount(), 3);
    buffer.release().unwrap();
    buffer.release().unwrap();
    assert_eq!(buffer.refcount(), 1);

    // Still alive on the server: traffic succeeds.
    queue
        .enqueue_write_buffer_blocking(&buffer, 0, &[1; 64], &[])
        .unwrap();

    // The release from one forwards; the object is gone on both peers.
    buffer.release().unwrap();
    assert_eq!(buffer.refcount(), 0);
    assert_eq!(buffer.release().unwrap_err(), Status::INVALID_MEM_OBJECT);
    assert_eq!(
        queue
            .enqueue_write_buffer_blocking(&buffer, 0, &[1; 64], &[])
            .unwrap_err(),
        Status::INVALID_MEM_OBJECT
    );
}

#[test]
fn sub_buffer_traffic_lands_in_the_parent() {
    let session = soft_session();
    let (context, queue) = setup(&session);
    let parent = context.create_buffer(MemFlags::READ_WRITE, 256, None).unwrap();

    // Creation data without the copy flag is as wrong as the reverse.
    assert_eq!(
        context
            .create_buffer(MemFlags::READ_WRITE, 256, Some(&[0u8; 256]))
            .unwrap_err(),
        Status::INVALID_HOST_PTR
    );

    let sub = parent.create_sub_buffer(MemFlags::READ_WRITE, 64, 32).unwrap();
    queue
        .enqueue_write_buffer_blocking(&sub, 0, &[7u8; 32], &[])
        .unwrap();

    let mut back = vec![0u8; 32];
    queue
        .enqueue_read_buffer_blocking(&parent, 64, &mut back, &[])
        .unwrap();
    assert_eq!(back, [7u8; 32]);
    assert_eq!(sub.info(info::MEM_OFFSET).unwrap(), 64u64.to_ne_bytes());
}

#[test]
fn rect_round_trip_with_pitch_equal_to_row() {
    let session = soft_session();
    let (context, queue) = setup(&session);

    // An 8x8 "matrix" in a 64-byte buffer; move a 4x4 block around.
    let host: Vec<u8> = (0..64).collect();
    let buffer = context.create_buffer(MemFlags::READ_WRITE, 64, None).unwrap();
    queue
        .enqueue_write_buffer_rect_blocking(
            &buffer,
            [0, 0, 0],
            [0, 0, 0],
            [8, 8, 1],
            (8, 0),
            (8, 0),
            &host,
            &[],
        )
        .unwrap();

    let mut block = vec![0u8; 16];
    queue
        .enqueue_read_buffer_rect_blocking(
            &buffer,
            [4, 4, 0],
            [0, 0, 0],
            [4, 4, 1],
            (8, 0),
            (4, 0),
            &mut block,
            &[],
        )
        .unwrap();
    let expected: Vec<u8> = (0..4)
        .flat_map(|row| (0..4).map(move |col| (4 + row) * 8 + 4 + col))
        .collect();
    assert_eq!(block, expected);

    // The asynchronous rect path produces the same bytes.
    let pending = queue
        .enqueue_read_buffer_rect(
            &buffer,
            [4, 4, 0],
            [0, 0, 0],
            [4, 4, 1],
            (8, 0),
            (4, 0),
            vec![0u8; 16],
            &[],
        )
        .unwrap();
    assert_eq!(pending.wait().unwrap(), expected);
}

#[test]
fn image_write_read_with_host_pitch() {
    let session = soft_session();
    let (context, queue) = setup(&session);

    let format = ImageFormat {
        channel_order: 0x10B5, // RGBA
        channel_type: 0x10D2,  // UNORM_INT8
    };
    let desc = ImageDesc {
        image_type: image_type::IMAGE2D,
        width: 8,
        height: 8,
        ..Default::default()
    };
    let image = context
        .create_image(MemFlags::READ_WRITE, format, &desc, None)
        .unwrap();
    assert_eq!(
        image.image_info(info::IMAGE_ELEMENT_SIZE).unwrap(),
        4u64.to_ne_bytes()
    );

    let pixels: Vec<u8> = (0..8 * 8 * 4).map(|i| (i % 256) as u8).collect();
    queue
        .enqueue_write_image_blocking(&image, [0, 0, 0], [8, 8, 1], (0, 0), &pixels, &[])
        .unwrap();

    // Read a 2x2 region back through a padded host buffer (row pitch 16
    // bytes for an 8-byte row).
    let mut host = vec![0u8; 32];
    queue
        .enqueue_read_image_blocking(&image, [1, 1, 0], [2, 2, 1], (16, 0), &mut host, &[])
        .unwrap();
    let row0 = &pixels[(8 + 1) * 4..(8 + 3) * 4];
    let row1 = &pixels[(16 + 1) * 4..(16 + 3) * 4];
    assert_eq!(&host[..8], row0);
    assert_eq!(&host[16..24], row1);
}

#[test]
fn copies_fills_and_migration() {
    let session = soft_session();
    let (context, queue) = setup(&session);

    let a = context.create_buffer(MemFlags::READ_WRITE, 128, None).unwrap();
    let b = context.create_buffer(MemFlags::READ_WRITE, 128, None).unwrap();

    queue
        .enqueue_fill_buffer(&a, &[1, 2, 3, 4], 0, 128, &[])
        .unwrap();
    let copy = queue.enqueue_copy_buffer(&a, &b, 0, 64, 64, &[]).unwrap();
    copy.wait().unwrap();
    assert_eq!(copy.command_type(), command_type::COPY_BUFFER);

    queue
        .enqueue_migrate_mem_objects(&[a.clone(), b.clone()], 0, &[])
        .unwrap();
    queue.finish().unwrap();

    let mut back = vec![0u8; 4];
    queue
        .enqueue_read_buffer_blocking(&b, 64, &mut back, &[])
        .unwrap();
    assert_eq!(back, [1, 2, 3, 4]);
}

#[test]
fn wait_list_of_user_events_only() {
    let session = soft_session();
    let (context, _queue) = setup(&session);

    let gate = session.create_user_event(&context).unwrap();
    let setter = {
        let gate = gate.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            gate.set_status(Ok(()))
        })
    };
    wait_for_events(std::slice::from_ref(&gate)).unwrap();
    setter.join().unwrap().unwrap();
    assert!(gate.status().unwrap().is_settled());
}

#[test]
fn user_event_gates_a_submission() {
    let session = soft_session();
    let (context, queue) = setup(&session);

    let gate = session.create_user_event(&context).unwrap();
    let marker = queue
        .enqueue_marker_with_wait_list(std::slice::from_ref(&gate))
        .unwrap();

    // The submission returned, but it must not have settled.
    std::thread::sleep(Duration::from_millis(30));
    assert!(!marker.status().unwrap().is_settled());

    gate.set_status(Ok(())).unwrap();
    marker.wait().unwrap();
    assert!(marker.status().unwrap().is_settled());
}

#[test]
fn failed_user_event_propagates_to_waiters() {
    let session = soft_session();
    let (context, _queue) = setup(&session);

    let gate = session.create_user_event(&context).unwrap();
    gate.set_status(Err(Status::INVALID_OPERATION)).unwrap();
    assert_eq!(
        wait_for_events(std::slice::from_ref(&gate)).unwrap_err(),
        Status::INVALID_OPERATION
    );
}

#[test]
fn map_write_unmap_without_a_read() {
    let session = soft_session();
    let (context, queue) = setup(&session);
    let buffer = context.create_buffer(MemFlags::READ_WRITE, 64, None).unwrap();

    let (mut mapping, event) = queue
        .enqueue_map_buffer(&buffer, MapFlags::WRITE_INVALIDATE_REGION, 16, 16, &[])
        .unwrap();
    assert!(event.status().unwrap().is_settled());

    mapping.data.copy_from_slice(&[9u8; 16]);
    let unmap = queue.enqueue_unmap(&buffer, mapping, &[]).unwrap();
    unmap.wait().unwrap();

    let mut back = vec![0u8; 16];
    queue
        .enqueue_read_buffer_blocking(&buffer, 16, &mut back, &[])
        .unwrap();
    assert_eq!(back, [9u8; 16]);
}

#[test]
fn read_visible_map_sees_current_content() {
    let session = soft_session();
    let (context, queue) = setup(&session);
    let buffer = context
        .create_buffer(
            MemFlags::READ_WRITE | MemFlags::COPY_HOST_PTR,
            32,
            Some(&[0x42u8; 32]),
        )
        .unwrap();

    let (mapping, _event) = queue
        .enqueue_map_buffer(&buffer, MapFlags::READ, 0, 32, &[])
        .unwrap();
    assert_eq!(mapping.data, [0x42u8; 32]);
    // Unmapping a read-only map moves nothing back.
    queue.enqueue_unmap(&buffer, mapping, &[]).unwrap();

    // A mapping of one object cannot be unmapped through another.
    let other = context.create_buffer(MemFlags::READ_WRITE, 32, None).unwrap();
    let (mapping, _event) = queue
        .enqueue_map_buffer(&buffer, MapFlags::READ, 0, 32, &[])
        .unwrap();
    assert_eq!(
        queue.enqueue_unmap(&other, mapping, &[]).unwrap_err(),
        Status::INVALID_VALUE
    );
}

#[test]
fn info_shortcuts_match_the_server() {
    let session = soft_session();
    let (context, queue) = setup(&session);
    let buffer = context.create_buffer(MemFlags::READ_ONLY, 96, None).unwrap();

    // Answered locally, and they must agree with creation-time truth.
    assert_eq!(buffer.info(info::MEM_SIZE).unwrap(), 96u64.to_ne_bytes());
    assert_eq!(
        buffer.info(info::MEM_FLAGS).unwrap(),
        MemFlags::READ_ONLY.bits().to_ne_bytes()
    );
    assert_eq!(
        context.info(info::CONTEXT_NUM_DEVICES).unwrap(),
        (context.devices().len() as u32).to_ne_bytes()
    );
    // The queue's context link and the context's own identity are the
    // same bytes on the wire.
    assert_eq!(
        queue.info(info::QUEUE_CONTEXT).unwrap(),
        buffer.info(info::MEM_CONTEXT).unwrap()
    );
    // Properties echo the platform the context was pinned to.
    let props = context.info(info::CONTEXT_PROPERTIES).unwrap();
    assert_eq!(props.len(), 24);
    assert_eq!(
        &props[..8],
        (info::CONTEXT_PLATFORM as u64).to_ne_bytes().as_slice()
    );
}

#[test]
fn gl_interop_and_callbacks_are_rejected() {
    let session = soft_session();
    let (context, _queue) = setup(&session);

    assert_eq!(
        context
            .create_from_gl_buffer(MemFlags::READ_WRITE, 1)
            .unwrap_err(),
        Status::INVALID_GL_OBJECT
    );
    let buffer = context.create_buffer(MemFlags::READ_WRITE, 16, None).unwrap();
    assert_eq!(
        buffer
            .set_destructor_callback(Box::new(|| {}))
            .unwrap_err(),
        Status::INVALID_MEM_OBJECT
    );
    assert_eq!(
        session
            .create_context_with_notify(context.devices(), None, Box::new(|_: &str| {}))
            .unwrap_err(),
        Status::OUT_OF_RESOURCES
    );
}

#[test]
fn program_lifecycle_without_a_compiler() {
    let session = soft_session();
    let (context, _queue) = setup(&session);

    let program = context
        .create_program_with_source(&["__kernel void f() {}"])
        .unwrap();
    assert_eq!(
        program.build(&[], "").unwrap_err(),
        Status::COMPILER_NOT_AVAILABLE
    );
    assert!(!program.build_log(&context.devices()[0]).unwrap().is_empty());
    assert_eq!(
        program.create_kernel("f").unwrap_err(),
        Status::INVALID_PROGRAM_EXECUTABLE
    );

    // Retain/release forward for programs; the pair must balance.
    program.retain().unwrap();
    assert_eq!(program.refcount(), 2);
    program.release().unwrap();
    program.release().unwrap();
    assert_eq!(program.refcount(), 0);
}

// ---- Kernel paths against a runtime that can "compile" ----

/// The software device plus pretend compilation: builds succeed, kernels
/// exist, and argument traffic is counted so rewriting and deduplication
/// are observable.
struct CompilingRuntime {
    inner: SoftRuntime,
    next_kernel: AtomicU64,
    pub arg_calls: AtomicU64,
}

impl CompilingRuntime {
    fn new() -> Self {
        Self {
            inner: SoftRuntime::new(),
            next_kernel: AtomicU64::new(1),
            arg_calls: AtomicU64::new(0),
        }
    }
}

impl Runtime for CompilingRuntime {
    fn platform_ids(&self) -> RtResult<Vec<RtPlatform>> {
        self.inner.platform_ids()
    }
    fn platform_info(&self, p: RtPlatform, param: u32) -> RtResult<Vec<u8>> {
        self.inner.platform_info(p, param)
    }
    fn device_ids(&self, p: RtPlatform, t: u64) -> RtResult<Vec<RtDevice>> {
        self.inner.device_ids(p, t)
    }
    fn device_info(&self, d: RtDevice, param: u32) -> RtResult<Vec<u8>> {
        self.inner.device_info(d, param)
    }
    fn create_sub_devices(&self, d: RtDevice, p: &[u64]) -> RtResult<Vec<RtDevice>> {
        self.inner.create_sub_devices(d, p)
    }
    fn retain_device(&self, d: RtDevice) -> RtResult<()> {
        self.inner.retain_device(d)
    }
    fn release_device(&self, d: RtDevice) -> RtResult<()> {
        self.inner.release_device(d)
    }
    fn create_context(&self, p: Option<RtPlatform>, d: &[RtDevice]) -> RtResult<RtContext> {
        self.inner.create_context(p, d)
    }
    fn create_context_from_type(
        &self,
        p: Option<RtPlatform>,
        t: u64,
    ) -> RtResult<(RtContext, Vec<RtDevice>)> {
        self.inner.create_context_from_type(p, t)
    }
    fn retain_context(&self, c: RtContext) -> RtResult<()> {
        self.inner.retain_context(c)
    }
    fn release_context(&self, c: RtContext) -> RtResult<()> {
        self.inner.release_context(c)
    }
    fn context_info(&self, c: RtContext, param: u32) -> RtResult<Vec<u8>> {
        self.inner.context_info(c, param)
    }
    fn create_queue(&self, c: RtContext, d: RtDevice, p: u64) -> RtResult<RtQueue> {
        self.inner.create_queue(c, d, p)
    }
    fn retain_queue(&self, q: RtQueue) -> RtResult<()> {
        self.inner.retain_queue(q)
    }
    fn release_queue(&self, q: RtQueue) -> RtResult<()> {
        self.inner.release_queue(q)
    }
    fn queue_info(&self, q: RtQueue, param: u32) -> RtResult<Vec<u8>> {
        self.inner.queue_info(q, param)
    }
    fn flush(&self, q: RtQueue) -> RtResult<()> {
        self.inner.flush(q)
    }
    fn finish(&self, q: RtQueue) -> RtResult<()> {
        self.inner.finish(q)
    }
    fn create_buffer(
        &self,
        c: RtContext,
        f: cl_client::MemFlags,
        s: u64,
        h: Option<Vec<u8>>,
    ) -> RtResult<RtMem> {
        self.inner.create_buffer(c, f, s, h)
    }
    fn create_sub_buffer(
        &self,
        p: RtMem,
        f: cl_client::MemFlags,
        o: u64,
        s: u64,
    ) -> RtResult<RtMem> {
        self.inner.create_sub_buffer(p, f, o, s)
    }
    fn create_image(
        &self,
        c: RtContext,
        f: cl_client::MemFlags,
        fmt: ImageFormat,
        d: &ImageDesc,
        h: Option<Vec<u8>>,
    ) -> RtResult<RtMem> {
        self.inner.create_image(c, f, fmt, d, h)
    }
    fn retain_mem(&self, m: RtMem) -> RtResult<()> {
        self.inner.retain_mem(m)
    }
    fn release_mem(&self, m: RtMem) -> RtResult<()> {
        self.inner.release_mem(m)
    }
    fn supported_image_formats(
        &self,
        c: RtContext,
        f: cl_client::MemFlags,
        t: u32,
    ) -> RtResult<Vec<ImageFormat>> {
        self.inner.supported_image_formats(c, f, t)
    }
    fn mem_info(&self, m: RtMem, param: u32) -> RtResult<Vec<u8>> {
        self.inner.mem_info(m, param)
    }
    fn image_info(&self, m: RtMem, param: u32) -> RtResult<Vec<u8>> {
        self.inner.image_info(m, param)
    }
    fn create_sampler(&self, c: RtContext, n: bool, a: u32, f: u32) -> RtResult<RtSampler> {
        self.inner.create_sampler(c, n, a, f)
    }
    fn retain_sampler(&self, s: RtSampler) -> RtResult<()> {
        self.inner.retain_sampler(s)
    }
    fn release_sampler(&self, s: RtSampler) -> RtResult<()> {
        self.inner.release_sampler(s)
    }
    fn sampler_info(&self, s: RtSampler, param: u32) -> RtResult<Vec<u8>> {
        self.inner.sampler_info(s, param)
    }
    fn create_program_with_source(&self, c: RtContext, s: &[String]) -> RtResult<RtProgram> {
        self.inner.create_program_with_source(c, s)
    }
    fn create_program_with_binary(
        &self,
        c: RtContext,
        d: &[RtDevice],
        b: &[Vec<u8>],
    ) -> RtResult<(RtProgram, Vec<Status>)> {
        self.inner.create_program_with_binary(c, d, b)
    }
    fn create_program_with_builtin_kernels(
        &self,
        c: RtContext,
        d: &[RtDevice],
        k: &str,
    ) -> RtResult<RtProgram> {
        self.inner.create_program_with_builtin_kernels(c, d, k)
    }
    fn retain_program(&self, p: RtProgram) -> RtResult<()> {
        self.inner.retain_program(p)
    }
    fn release_program(&self, p: RtProgram) -> RtResult<()> {
        self.inner.release_program(p)
    }
    fn build_program(&self, _p: RtProgram, _d: &[RtDevice], _o: &str) -> RtResult<()> {
        Ok(())
    }
    fn compile_program(
        &self,
        _p: RtProgram,
        _d: &[RtDevice],
        _o: &str,
        _h: &[(String, RtProgram)],
    ) -> RtResult<()> {
        Ok(())
    }
    fn link_program(
        &self,
        _c: RtContext,
        _d: &[RtDevice],
        _o: &str,
        p: &[RtProgram],
    ) -> RtResult<RtProgram> {
        Ok(p[0])
    }
    fn unload_compiler(&self, p: RtPlatform) -> RtResult<()> {
        self.inner.unload_compiler(p)
    }
    fn program_info(&self, p: RtProgram, param: u32) -> RtResult<Vec<u8>> {
        self.inner.program_info(p, param)
    }
    fn program_build_info(&self, p: RtProgram, d: RtDevice, param: u32) -> RtResult<Vec<u8>> {
        self.inner.program_build_info(p, d, param)
    }
    fn create_kernel(&self, _p: RtProgram, _n: &str) -> RtResult<RtKernel> {
        Ok(RtKernel(
            1_000_000 + self.next_kernel.fetch_add(1, Ordering::SeqCst),
        ))
    }
    fn create_kernels_in_program(&self, p: RtProgram) -> RtResult<Vec<RtKernel>> {
        Ok(vec![self.create_kernel(p, "")?])
    }
    fn retain_kernel(&self, _k: RtKernel) -> RtResult<()> {
        Ok(())
    }
    fn release_kernel(&self, _k: RtKernel) -> RtResult<()> {
        Ok(())
    }
    fn set_kernel_arg(&self, _k: RtKernel, _i: u32, _v: &[u8]) -> RtResult<()> {
        self.arg_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn set_kernel_arg_mem(&self, _k: RtKernel, _i: u32, _m: RtMem) -> RtResult<()> {
        self.arg_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn set_kernel_arg_sampler(&self, _k: RtKernel, _i: u32, _s: RtSampler) -> RtResult<()> {
        self.arg_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn set_kernel_arg_local(&self, _k: RtKernel, _i: u32, _s: u64) -> RtResult<()> {
        self.arg_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn kernel_info(&self, _k: RtKernel, param: u32) -> RtResult<Vec<u8>> {
        match param {
            info::KERNEL_NUM_ARGS => Ok(3u32.to_ne_bytes().to_vec()),
            info::KERNEL_FUNCTION_NAME => Ok(b"test\0".to_vec()),
            _ => Err(Status::INVALID_VALUE),
        }
    }
    fn kernel_arg_info(&self, _k: RtKernel, index: u32, param: u32) -> RtResult<Vec<u8>> {
        match param {
            info::KERNEL_ARG_ADDRESS_QUALIFIER => Ok(match index {
                // arg 0: __global pointer, arg 1: __local, arg 2: value
                0 => arg_address::GLOBAL,
                1 => arg_address::LOCAL,
                _ => arg_address::PRIVATE,
            }
            .to_ne_bytes()
            .to_vec()),
            info::KERNEL_ARG_TYPE_NAME => Ok(match index {
                0 => b"float*\0".to_vec(),
                1 => b"float*\0".to_vec(),
                _ => b"uint\0".to_vec(),
            }),
            _ => Err(Status::INVALID_VALUE),
        }
    }
    fn kernel_work_group_info(&self, _k: RtKernel, _d: RtDevice, param: u32) -> RtResult<Vec<u8>> {
        match param {
            info::KERNEL_WORK_GROUP_SIZE => Ok(64u64.to_ne_bytes().to_vec()),
            _ => Err(Status::INVALID_VALUE),
        }
    }
    fn create_user_event(&self, c: RtContext) -> RtResult<RtEvent> {
        self.inner.create_user_event(c)
    }
    fn set_user_event_status(&self, e: RtEvent, s: i32) -> RtResult<()> {
        self.inner.set_user_event_status(e, s)
    }
    fn retain_event(&self, e: RtEvent) -> RtResult<()> {
        self.inner.retain_event(e)
    }
    fn release_event(&self, e: RtEvent) -> RtResult<()> {
        self.inner.release_event(e)
    }
    fn wait_events(&self, e: &[RtEvent]) -> RtResult<()> {
        self.inner.wait_events(e)
    }
    fn event_info(&self, e: RtEvent, param: u32) -> RtResult<Vec<u8>> {
        self.inner.event_info(e, param)
    }
    fn profiling_info(&self, e: RtEvent, param: u32) -> RtResult<Vec<u8>> {
        self.inner.profiling_info(e, param)
    }
    fn enqueue_read_buffer(
        &self,
        q: RtQueue,
        m: RtMem,
        o: u64,
        l: u64,
    ) -> RtResult<(Vec<u8>, RtEvent)> {
        self.inner.enqueue_read_buffer(q, m, o, l)
    }
    fn enqueue_write_buffer(&self, q: RtQueue, m: RtMem, o: u64, d: &[u8]) -> RtResult<RtEvent> {
        self.inner.enqueue_write_buffer(q, m, o, d)
    }
    fn enqueue_copy_buffer(
        &self,
        q: RtQueue,
        s: RtMem,
        d: RtMem,
        so: u64,
        dofs: u64,
        l: u64,
    ) -> RtResult<RtEvent> {
        self.inner.enqueue_copy_buffer(q, s, d, so, dofs, l)
    }
    fn enqueue_read_buffer_rect(
        &self,
        q: RtQueue,
        m: RtMem,
        o: [u64; 3],
        r: [u64; 3],
        rp: u64,
        sp: u64,
    ) -> RtResult<(Vec<u8>, RtEvent)> {
        self.inner.enqueue_read_buffer_rect(q, m, o, r, rp, sp)
    }
    fn enqueue_write_buffer_rect(
        &self,
        q: RtQueue,
        m: RtMem,
        o: [u64; 3],
        r: [u64; 3],
        rp: u64,
        sp: u64,
        d: &[u8],
    ) -> RtResult<RtEvent> {
        self.inner.enqueue_write_buffer_rect(q, m, o, r, rp, sp, d)
    }
    fn enqueue_copy_buffer_rect(
        &self,
        q: RtQueue,
        s: RtMem,
        d: RtMem,
        so: [u64; 3],
        dofs: [u64; 3],
        r: [u64; 3],
        sp: (u64, u64),
        dp: (u64, u64),
    ) -> RtResult<RtEvent> {
        self.inner.enqueue_copy_buffer_rect(q, s, d, so, dofs, r, sp, dp)
    }
    fn enqueue_read_image(
        &self,
        q: RtQueue,
        m: RtMem,
        o: [u64; 3],
        r: [u64; 3],
    ) -> RtResult<(Vec<u8>, RtEvent)> {
        self.inner.enqueue_read_image(q, m, o, r)
    }
    fn enqueue_write_image(
        &self,
        q: RtQueue,
        m: RtMem,
        o: [u64; 3],
        r: [u64; 3],
        d: &[u8],
    ) -> RtResult<RtEvent> {
        self.inner.enqueue_write_image(q, m, o, r, d)
    }
    fn enqueue_copy_image(
        &self,
        q: RtQueue,
        s: RtMem,
        d: RtMem,
        so: [u64; 3],
        dofs: [u64; 3],
        r: [u64; 3],
    ) -> RtResult<RtEvent> {
        self.inner.enqueue_copy_image(q, s, d, so, dofs, r)
    }
    fn enqueue_copy_image_to_buffer(
        &self,
        q: RtQueue,
        i: RtMem,
        b: RtMem,
        o: [u64; 3],
        r: [u64; 3],
        dofs: u64,
    ) -> RtResult<RtEvent> {
        self.inner.enqueue_copy_image_to_buffer(q, i, b, o, r, dofs)
    }
    fn enqueue_copy_buffer_to_image(
        &self,
        q: RtQueue,
        b: RtMem,
        i: RtMem,
        so: u64,
        dofs: [u64; 3],
        r: [u64; 3],
    ) -> RtResult<RtEvent> {
        self.inner.enqueue_copy_buffer_to_image(q, b, i, so, dofs, r)
    }
    fn enqueue_fill_buffer(
        &self,
        q: RtQueue,
        m: RtMem,
        p: &[u8],
        o: u64,
        s: u64,
    ) -> RtResult<RtEvent> {
        self.inner.enqueue_fill_buffer(q, m, p, o, s)
    }
    fn enqueue_fill_image(
        &self,
        q: RtQueue,
        m: RtMem,
        c: &[u8],
        o: [u64; 3],
        r: [u64; 3],
    ) -> RtResult<RtEvent> {
        self.inner.enqueue_fill_image(q, m, c, o, r)
    }
    fn enqueue_migrate(&self, q: RtQueue, m: &[RtMem], f: u64) -> RtResult<RtEvent> {
        self.inner.enqueue_migrate(q, m, f)
    }
    fn enqueue_ndrange(
        &self,
        q: RtQueue,
        _k: RtKernel,
        _w: u32,
        _go: Option<&[u64]>,
        _gs: &[u64],
        _ls: Option<&[u64]>,
    ) -> RtResult<RtEvent> {
        // Pretend execution: an immediately-complete queue event.
        self.inner.enqueue_marker(q)
    }
    fn enqueue_marker(&self, q: RtQueue) -> RtResult<RtEvent> {
        self.inner.enqueue_marker(q)
    }
    fn enqueue_barrier(&self, q: RtQueue) -> RtResult<RtEvent> {
        self.inner.enqueue_barrier(q)
    }
}

#[test]
fn kernel_args_rewrite_and_deduplicate() {
    let runtime = Arc::new(CompilingRuntime::new());
    let session = start_server(Arc::clone(&runtime) as Arc<dyn Runtime>);
    let (context, queue) = setup(&session);

    let program = context
        .create_program_with_source(&["__kernel void test() {}"])
        .unwrap();
    program.build(&[], "").unwrap();
    let kernel = program.create_kernel("test").unwrap();

    let buffer = context.create_buffer(MemFlags::READ_WRITE, 64, None).unwrap();
    kernel.set_arg(0, KernelArg::Mem(&buffer)).unwrap();
    kernel.set_arg(1, KernelArg::Local(256)).unwrap();
    kernel.set_arg(2, KernelArg::Bytes(&7u32.to_ne_bytes())).unwrap();
    let sent = runtime.arg_calls.load(Ordering::SeqCst);
    assert_eq!(sent, 3);

    // Setting identical values again must not touch the wire.
    kernel.set_arg(0, KernelArg::Mem(&buffer)).unwrap();
    kernel.set_arg(2, KernelArg::Bytes(&7u32.to_ne_bytes())).unwrap();
    assert_eq!(runtime.arg_calls.load(Ordering::SeqCst), sent);

    // A changed value does.
    kernel.set_arg(2, KernelArg::Bytes(&8u32.to_ne_bytes())).unwrap();
    assert_eq!(runtime.arg_calls.load(Ordering::SeqCst), sent + 1);

    // Raw bytes where the memory object belongs cannot be rewritten.
    assert_eq!(
        kernel
            .set_arg(0, KernelArg::Bytes(&[0u8; 8]))
            .unwrap_err(),
        Status::INVALID_ARG_VALUE
    );

    // And the kernel actually launches.
    let done = queue
        .enqueue_ndrange_kernel(&kernel, None, &[1024], None, &[])
        .unwrap();
    done.wait().unwrap();
}
