// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Program commands. Build, compile and link are synchronous here: the
//! client has already rejected any caller-supplied notification callback,
//! so the reply simply waits for the runtime.

use cl_protocol::types::info;
use cl_protocol::wire::{WireRead, WireWrite};
use cl_protocol::HandleKind;

use crate::dispatch::{Connection, HandlerResult};
use crate::registry::ProgramEntry;

use super::*;

pub fn create_with_source(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let context_id = s.get_handle(HandleKind::Context)?;
    let count = s.get_u32()? as usize;
    let mut sources = Vec::with_capacity(count);
    for _ in 0..count {
        sources.push(s.get_string()?);
    }

    let Some(context) = api(&conn.stream, conn.registry.context(context_id).map(|e| e.rt))? else {
        return Ok(());
    };
    let Some(rt) = api(
        &conn.stream,
        conn.runtime.create_program_with_source(context, &sources),
    )?
    else {
        return Ok(());
    };

    let devices = conn.registry.context(context_id).map(|e| e.devices.clone());
    let id = conn.registry.register_program(ProgramEntry {
        rt,
        context: context_id,
        devices: devices.unwrap_or_default(),
    });
    reply_created(&conn.stream, HandleKind::Program, id)?;
    Ok(())
}

pub fn create_with_binary(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let context_id = s.get_handle(HandleKind::Context)?;
    let num_devices = s.get_u32()? as usize;
    let device_ids = s.get_handles(HandleKind::Device, num_devices)?;
    let mut binaries = Vec::with_capacity(num_devices);
    for _ in 0..num_devices {
        binaries.push(s.get_blob()?);
    }

    let Some(context) = api(&conn.stream, conn.registry.context(context_id).map(|e| e.rt))? else {
        return Ok(());
    };
    let Some(devices) = api(&conn.stream, conn.registry.devices(&device_ids))? else {
        return Ok(());
    };
    let Some((rt, statuses)) = api(
        &conn.stream,
        conn.runtime
            .create_program_with_binary(context, &devices, &binaries),
    )?
    else {
        return Ok(());
    };

    let id = conn.registry.register_program(ProgramEntry {
        rt,
        context: context_id,
        devices: device_ids,
    });
    reply_ok(&conn.stream, |frame| {
        frame.put_handle(HandleKind::Program, id)?;
        for st in statuses {
            frame.put_status(st)?;
        }
        Ok(())
    })?;
    Ok(())
}

pub fn create_with_builtin_kernels(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let context_id = s.get_handle(HandleKind::Context)?;
    let num_devices = s.get_u32()? as usize;
    let device_ids = s.get_handles(HandleKind::Device, num_devices)?;
    let kernel_names = s.get_string()?;

    let Some(context) = api(&conn.stream, conn.registry.context(context_id).map(|e| e.rt))? else {
        return Ok(());
    };
    let Some(devices) = api(&conn.stream, conn.registry.devices(&device_ids))? else {
        return Ok(());
    };
    let Some(rt) = api(
        &conn.stream,
        conn.runtime
            .create_program_with_builtin_kernels(context, &devices, &kernel_names),
    )?
    else {
        return Ok(());
    };

    let id = conn.registry.register_program(ProgramEntry {
        rt,
        context: context_id,
        devices: device_ids,
    });
    reply_created(&conn.stream, HandleKind::Program, id)?;
    Ok(())
}

pub fn retain_program(conn: &mut Connection) -> HandlerResult {
    let id = (&conn.stream).get_handle(HandleKind::Program)?;
    let result = conn
        .registry
        .program(id)
        .and_then(|e| conn.runtime.retain_program(e.rt));
    reply_status(&conn.stream, status_of(result))?;
    Ok(())
}

pub fn release_program(conn: &mut Connection) -> HandlerResult {
    let id = (&conn.stream).get_handle(HandleKind::Program)?;
    let result = conn
        .registry
        .program(id)
        .and_then(|e| conn.runtime.release_program(e.rt));
    if result.is_ok() {
        conn.registry.unregister_program(id);
    }
    reply_status(&conn.stream, status_of(result))?;
    Ok(())
}

/// Decode the `{num_devices, devices}` pair shared by build and compile.
fn get_device_list(conn: &Connection) -> Result<Vec<u64>, cl_protocol::Error> {
    let mut s = &conn.stream;
    let num_devices = s.get_u32()? as usize;
    s.get_handles(HandleKind::Device, num_devices)
}

pub fn build_program(conn: &mut Connection) -> HandlerResult {
    let program_id = (&conn.stream).get_handle(HandleKind::Program)?;
    let device_ids = get_device_list(conn)?;
    let options = (&conn.stream).get_string()?;

    let result = conn.registry.program(program_id).and_then(|entry| {
        let ids = if device_ids.is_empty() {
            &entry.devices
        } else {
            &device_ids
        };
        let devices = conn.registry.devices(ids)?;
        conn.runtime.build_program(entry.rt, &devices, &options)
    });
    reply_status(&conn.stream, status_of(result))?;
    Ok(())
}

pub fn compile_program(conn: &mut Connection) -> HandlerResult {
    let program_id = (&conn.stream).get_handle(HandleKind::Program)?;
    let device_ids = get_device_list(conn)?;
    let mut s = &conn.stream;
    let options = s.get_string()?;
    let num_headers = s.get_u32()? as usize;
    let mut headers = Vec::with_capacity(num_headers);
    for _ in 0..num_headers {
        let name = s.get_string()?;
        let header = s.get_handle(HandleKind::Program)?;
        headers.push((name, header));
    }

    let result = conn.registry.program(program_id).and_then(|entry| {
        let ids = if device_ids.is_empty() {
            &entry.devices
        } else {
            &device_ids
        };
        let devices = conn.registry.devices(ids)?;
        let headers = headers
            .iter()
            .map(|(name, id)| Ok((name.clone(), conn.registry.program(*id)?.rt)))
            .collect::<Result<Vec<_>, _>>()?;
        conn.runtime
            .compile_program(entry.rt, &devices, &options, &headers)
    });
    reply_status(&conn.stream, status_of(result))?;
    Ok(())
}

pub fn link_program(conn: &mut Connection) -> HandlerResult {
    let context_id = (&conn.stream).get_handle(HandleKind::Context)?;
    let device_ids = get_device_list(conn)?;
    let mut s = &conn.stream;
    let options = s.get_string()?;
    let num_programs = s.get_u32()? as usize;
    let program_ids = s.get_handles(HandleKind::Program, num_programs)?;

    let Some(context) = api(&conn.stream, conn.registry.context(context_id).map(|e| e.rt))? else {
        return Ok(());
    };
    let Some(devices) = api(&conn.stream, conn.registry.devices(&device_ids))? else {
        return Ok(());
    };
    let programs = program_ids
        .iter()
        .map(|id| Ok(conn.registry.program(*id)?.rt))
        .collect::<Result<Vec<_>, _>>();
    let Some(programs) = api(&conn.stream, programs)? else {
        return Ok(());
    };
    let Some(rt) = api(
        &conn.stream,
        conn.runtime
            .link_program(context, &devices, &options, &programs),
    )?
    else {
        return Ok(());
    };

    let id = conn.registry.register_program(ProgramEntry {
        rt,
        context: context_id,
        devices: device_ids,
    });
    reply_created(&conn.stream, HandleKind::Program, id)?;
    Ok(())
}

pub fn unload_platform_compiler(conn: &mut Connection) -> HandlerResult {
    let id = (&conn.stream).get_handle(HandleKind::Platform)?;
    let result = conn
        .registry
        .platform(id)
        .and_then(|p| conn.runtime.unload_compiler(p));
    reply_status(&conn.stream, status_of(result))?;
    Ok(())
}

pub fn get_program_info(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let id = s.get_handle(HandleKind::Program)?;
    let param = s.get_u32()?;

    let result = conn.registry.program(id).and_then(|entry| match param {
        info::PROGRAM_CONTEXT => Ok(entry.context.to_ne_bytes().to_vec()),
        info::PROGRAM_DEVICES => Ok(entry
            .devices
            .iter()
            .flat_map(|d| d.to_ne_bytes())
            .collect()),
        info::PROGRAM_NUM_DEVICES => Ok((entry.devices.len() as u32).to_ne_bytes().to_vec()),
        _ => conn.runtime.program_info(entry.rt, param),
    });
    reply_info(&conn.stream, result)?;
    Ok(())
}

pub fn get_program_build_info(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let program_id = s.get_handle(HandleKind::Program)?;
    let device_id = s.get_handle(HandleKind::Device)?;
    let param = s.get_u32()?;

    let result = conn.registry.program(program_id).and_then(|entry| {
        let device = conn.registry.device(device_id)?.rt;
        conn.runtime.program_build_info(entry.rt, device, param)
    });
    reply_info(&conn.stream, result)?;
    Ok(())
}
