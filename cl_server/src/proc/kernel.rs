// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Kernel commands. A kernel argument arrives tagged with how the client
//! rewrote it: raw bytes pass through, memory and sampler arguments carry
//! the wire identity the client substituted, and local arguments carry
//! only a size.

use cl_protocol::command::kernel_arg;
use cl_protocol::types::{info, Status};
use cl_protocol::wire::{WireRead, WireWrite};
use cl_protocol::HandleKind;

use crate::dispatch::{Connection, HandlerResult};
use crate::registry::KernelEntry;

use super::*;

pub fn create_kernel(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let program_id = s.get_handle(HandleKind::Program)?;
    let name = s.get_string()?;

    let Some((program, context)) = api(
        &conn.stream,
        conn.registry
            .program(program_id)
            .map(|e| (e.rt, e.context)),
    )?
    else {
        return Ok(());
    };
    let Some(rt) = api(&conn.stream, conn.runtime.create_kernel(program, &name))? else {
        return Ok(());
    };

    let id = conn.registry.register_kernel(KernelEntry {
        rt,
        program: program_id,
        context,
    });
    reply_created(&conn.stream, HandleKind::Kernel, id)?;
    Ok(())
}

pub fn create_kernels_in_program(conn: &mut Connection) -> HandlerResult {
    let program_id = (&conn.stream).get_handle(HandleKind::Program)?;

    let Some((program, context)) = api(
        &conn.stream,
        conn.registry
            .program(program_id)
            .map(|e| (e.rt, e.context)),
    )?
    else {
        return Ok(());
    };
    let Some(kernels) = api(&conn.stream, conn.runtime.create_kernels_in_program(program))? else {
        return Ok(());
    };

    let ids: Vec<u64> = kernels
        .into_iter()
        .map(|rt| {
            conn.registry.register_kernel(KernelEntry {
                rt,
                program: program_id,
                context,
            })
        })
        .collect();
    reply_ok(&conn.stream, |frame| {
        frame.put_u32(ids.len() as u32)?;
        for id in ids {
            frame.put_handle(HandleKind::Kernel, id)?;
        }
        Ok(())
    })?;
    Ok(())
}

pub fn retain_kernel(conn: &mut Connection) -> HandlerResult {
    let id = (&conn.stream).get_handle(HandleKind::Kernel)?;
    let result = conn
        .registry
        .kernel(id)
        .and_then(|e| conn.runtime.retain_kernel(e.rt));
    reply_status(&conn.stream, status_of(result))?;
    Ok(())
}

pub fn release_kernel(conn: &mut Connection) -> HandlerResult {
    let id = (&conn.stream).get_handle(HandleKind::Kernel)?;
    let result = conn
        .registry
        .kernel(id)
        .and_then(|e| conn.runtime.release_kernel(e.rt));
    if result.is_ok() {
        conn.registry.unregister_kernel(id);
    }
    reply_status(&conn.stream, status_of(result))?;
    Ok(())
}

pub fn set_kernel_arg(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let kernel_id = s.get_handle(HandleKind::Kernel)?;
    let index = s.get_u32()?;
    let arg_kind = s.get_u8()?;

    let result = match arg_kind {
        kernel_arg::BYTES => {
            let value = s.get_blob()?;
            conn.registry
                .kernel(kernel_id)
                .and_then(|e| conn.runtime.set_kernel_arg(e.rt, index, &value))
        }
        kernel_arg::MEM => {
            let mem_id = s.get_handle(HandleKind::Mem)?;
            conn.registry.kernel(kernel_id).and_then(|e| {
                let mem = conn.registry.mem(mem_id)?.rt;
                conn.runtime.set_kernel_arg_mem(e.rt, index, mem)
            })
        }
        kernel_arg::SAMPLER => {
            let sampler_id = s.get_handle(HandleKind::Sampler)?;
            conn.registry.kernel(kernel_id).and_then(|e| {
                let sampler = conn.registry.sampler(sampler_id)?.rt;
                conn.runtime.set_kernel_arg_sampler(e.rt, index, sampler)
            })
        }
        kernel_arg::LOCAL => {
            let size = s.get_size()?;
            conn.registry
                .kernel(kernel_id)
                .and_then(|e| conn.runtime.set_kernel_arg_local(e.rt, index, size))
        }
        _ => Err(Status::INVALID_ARG_VALUE),
    };
    reply_status(&conn.stream, status_of(result))?;
    Ok(())
}

pub fn get_kernel_info(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let id = s.get_handle(HandleKind::Kernel)?;
    let param = s.get_u32()?;

    let result = conn.registry.kernel(id).and_then(|entry| match param {
        info::KERNEL_CONTEXT => Ok(entry.context.to_ne_bytes().to_vec()),
        info::KERNEL_PROGRAM => Ok(entry.program.to_ne_bytes().to_vec()),
        _ => conn.runtime.kernel_info(entry.rt, param),
    });
    reply_info(&conn.stream, result)?;
    Ok(())
}

pub fn get_kernel_arg_info(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let id = s.get_handle(HandleKind::Kernel)?;
    let index = s.get_u32()?;
    let param = s.get_u32()?;

    let result = conn
        .registry
        .kernel(id)
        .and_then(|entry| conn.runtime.kernel_arg_info(entry.rt, index, param));
    reply_info(&conn.stream, result)?;
    Ok(())
}

pub fn get_kernel_work_group_info(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let kernel_id = s.get_handle(HandleKind::Kernel)?;
    let device_id = s.get_handle(HandleKind::Device)?;
    let param = s.get_u32()?;

    let result = conn.registry.kernel(kernel_id).and_then(|entry| {
        let device = conn.registry.device(device_id)?.rt;
        conn.runtime.kernel_work_group_info(entry.rt, device, param)
    });
    reply_info(&conn.stream, result)?;
    Ok(())
}
