// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Per-command handlers. The bodies are deliberately mechanical — decode
//! the declared fields in order, validate every named handle against the
//! registry, drive the runtime, reply — with the shared shapes (status
//! replies, info replies, the enqueue tail) factored out here.

mod context;
mod enqueue;
mod event;
mod kernel;
mod memory;
mod platform;
mod program;

use std::net::TcpStream;

use cl_protocol::types::Status;
use cl_protocol::wire::{send_frame, WireRead, WireWrite};
use cl_protocol::{Command, Error, HandleKind};

use crate::dispatch::{Connection, HandlerResult};

pub fn dispatch(conn: &mut Connection, cmd: Command) -> HandlerResult {
    use Command::*;
    match cmd {
        GetPlatformIds => platform::get_platform_ids(conn),
        GetPlatformInfo => platform::get_platform_info(conn),
        GetDeviceIds => platform::get_device_ids(conn),
        GetDeviceInfo => platform::get_device_info(conn),
        CreateSubDevices => platform::create_sub_devices(conn),
        RetainDevice => platform::retain_device(conn),
        ReleaseDevice => platform::release_device(conn),
        CreateContext => context::create_context(conn),
        CreateContextFromType => context::create_context_from_type(conn),
        RetainContext => context::retain_context(conn),
        ReleaseContext => context::release_context(conn),
        GetContextInfo => context::get_context_info(conn),
        CreateCommandQueue => context::create_command_queue(conn),
        RetainCommandQueue => context::retain_command_queue(conn),
        ReleaseCommandQueue => context::release_command_queue(conn),
        GetCommandQueueInfo => context::get_command_queue_info(conn),
        Flush => context::flush(conn),
        Finish => context::finish(conn),
        CreateBuffer => memory::create_buffer(conn),
        CreateSubBuffer => memory::create_sub_buffer(conn),
        CreateImage => memory::create_image(conn),
        RetainMemObject => memory::retain_mem_object(conn),
        ReleaseMemObject => memory::release_mem_object(conn),
        GetSupportedImageFormats => memory::get_supported_image_formats(conn),
        GetMemObjectInfo => memory::get_mem_object_info(conn),
        GetImageInfo => memory::get_image_info(conn),
        CreateSampler => memory::create_sampler(conn),
        RetainSampler => memory::retain_sampler(conn),
        ReleaseSampler => memory::release_sampler(conn),
        GetSamplerInfo => memory::get_sampler_info(conn),
        CreateProgramWithSource => program::create_with_source(conn),
        CreateProgramWithBinary => program::create_with_binary(conn),
        CreateProgramWithBuiltInKernels => program::create_with_builtin_kernels(conn),
        RetainProgram => program::retain_program(conn),
        ReleaseProgram => program::release_program(conn),
        BuildProgram => program::build_program(conn),
        CompileProgram => program::compile_program(conn),
        LinkProgram => program::link_program(conn),
        UnloadPlatformCompiler => program::unload_platform_compiler(conn),
        GetProgramInfo => program::get_program_info(conn),
        GetProgramBuildInfo => program::get_program_build_info(conn),
        CreateKernel => kernel::create_kernel(conn),
        CreateKernelsInProgram => kernel::create_kernels_in_program(conn),
        RetainKernel => kernel::retain_kernel(conn),
        ReleaseKernel => kernel::release_kernel(conn),
        SetKernelArg => kernel::set_kernel_arg(conn),
        GetKernelInfo => kernel::get_kernel_info(conn),
        GetKernelArgInfo => kernel::get_kernel_arg_info(conn),
        GetKernelWorkGroupInfo => kernel::get_kernel_work_group_info(conn),
        WaitForEvents => event::wait_for_events(conn),
        GetEventInfo => event::get_event_info(conn),
        RetainEvent => event::retain_event(conn),
        ReleaseEvent => event::release_event(conn),
        CreateUserEvent => event::create_user_event(conn),
        SetUserEventStatus => event::set_user_event_status(conn),
        GetEventProfilingInfo => event::get_event_profiling_info(conn),
        EnqueueReadBuffer => enqueue::read_buffer(conn),
        EnqueueWriteBuffer => enqueue::write_buffer(conn),
        EnqueueCopyBuffer => enqueue::copy_buffer(conn),
        EnqueueReadBufferRect => enqueue::read_buffer_rect(conn),
        EnqueueWriteBufferRect => enqueue::write_buffer_rect(conn),
        EnqueueCopyBufferRect => enqueue::copy_buffer_rect(conn),
        EnqueueReadImage => enqueue::read_image(conn),
        EnqueueWriteImage => enqueue::write_image(conn),
        EnqueueCopyImage => enqueue::copy_image(conn),
        EnqueueCopyImageToBuffer => enqueue::copy_image_to_buffer(conn),
        EnqueueCopyBufferToImage => enqueue::copy_buffer_to_image(conn),
        EnqueueFillBuffer => enqueue::fill_buffer(conn),
        EnqueueFillImage => enqueue::fill_image(conn),
        EnqueueMigrateMemObjects => enqueue::migrate_mem_objects(conn),
        EnqueueNDRangeKernel => enqueue::ndrange_kernel(conn),
        EnqueueTask => enqueue::task(conn),
        EnqueueMarkerWithWaitList => enqueue::marker_with_wait_list(conn),
        EnqueueBarrierWithWaitList => enqueue::barrier_with_wait_list(conn),
    }
}

/// The status of a side-effect-only runtime call.
pub fn status_of(result: Result<(), Status>) -> Status {
    match result {
        Ok(()) => Status::SUCCESS,
        Err(status) => status,
    }
}

/// Send a bare status reply.
pub fn reply_status(stream: &TcpStream, status: Status) -> std::io::Result<()> {
    let mut frame = Vec::new();
    frame.put_status(status)?;
    send_frame(stream, &frame, false)
}

/// Send a success reply whose tail is assembled by `build`.
pub fn reply_ok(
    stream: &TcpStream,
    build: impl FnOnce(&mut Vec<u8>) -> std::io::Result<()>,
) -> std::io::Result<()> {
    let mut frame = Vec::new();
    frame.put_status(Status::SUCCESS)?;
    build(&mut frame)?;
    send_frame(stream, &frame, false)
}

/// The reply shape of every info query: `status, returned_size,
/// payload[returned_size]`.
pub fn reply_info(stream: &TcpStream, result: Result<Vec<u8>, Status>) -> std::io::Result<()> {
    match result {
        Ok(payload) => reply_ok(stream, |frame| {
            frame.put_size(payload.len() as u64)?;
            frame.extend_from_slice(&payload);
            Ok(())
        }),
        Err(status) => reply_status(stream, status),
    }
}

/// Send a creation reply: `status, handle`.
pub fn reply_created(stream: &TcpStream, kind: HandleKind, id: u64) -> std::io::Result<()> {
    reply_ok(stream, |frame| frame.put_handle(kind, id))
}

/// Run an API-level step. `Err` is answered on the spot and turns into
/// `None`, letting the handler bail with `let Some(..) = api(..)? else`.
pub fn api<T>(stream: &TcpStream, result: Result<T, Status>) -> Result<Option<T>, Error> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(status) => {
            reply_status(stream, status)?;
            Ok(None)
        }
    }
}

/// The common tail of every enqueue command: `want_event, num_wait,
/// wait_list`.
pub struct EnqueueTail {
    pub want_event: bool,
    pub wait_ids: Vec<u64>,
}

pub fn get_enqueue_tail(conn: &Connection) -> Result<EnqueueTail, Error> {
    let mut s = &conn.stream;
    let want_event = s.get_bool()?;
    let num_wait = s.get_u32()? as usize;
    let wait_ids = s.get_handles(HandleKind::Event, num_wait)?;
    Ok(EnqueueTail {
        want_event,
        wait_ids,
    })
}
