// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Context and command-queue commands.

use log::*;

use cl_protocol::types::{info, Status};
use cl_protocol::wire::{WireRead, WireWrite};
use cl_protocol::HandleKind;

use crate::dispatch::{Connection, HandlerResult};
use crate::registry::{ContextEntry, QueueEntry};

use super::*;

/// The properties list arrives re-serialised as `{name, pointer-wrapper}`
/// pairs. The platform entry is the only property this protocol can
/// carry; it is validated against the registry like any other handle.
fn get_properties(conn: &Connection) -> Result<Result<Option<u64>, Status>, cl_protocol::Error> {
    let mut s = &conn.stream;
    let num_props = s.get_u32()? as usize;
    let mut platform = None;
    let mut bad = None;
    for _ in 0..num_props {
        let name = s.get_u32()?;
        let value = s.get_opt_handle(HandleKind::Platform)?;
        if name == info::CONTEXT_PLATFORM {
            platform = value;
        } else {
            bad = Some(Status::INVALID_VALUE);
        }
    }
    Ok(match bad {
        Some(status) => Err(status),
        None => Ok(platform),
    })
}

pub fn create_context(conn: &mut Connection) -> HandlerResult {
    let properties = get_properties(conn)?;
    let mut s = &conn.stream;
    let num_devices = s.get_u32()? as usize;
    let device_ids = s.get_handles(HandleKind::Device, num_devices)?;

    let Some(platform_id) = api(&conn.stream, properties)? else {
        return Ok(());
    };
    let platform = match platform_id {
        Some(id) => {
            let Some(p) = api(&conn.stream, conn.registry.platform(id))? else {
                return Ok(());
            };
            Some(p)
        }
        None => None,
    };
    let Some(devices) = api(&conn.stream, conn.registry.devices(&device_ids))? else {
        return Ok(());
    };
    let Some(rt) = api(&conn.stream, conn.runtime.create_context(platform, &devices))? else {
        return Ok(());
    };

    let id = conn.registry.register_context(ContextEntry {
        rt,
        devices: device_ids,
        platform: platform_id,
    });
    info!("peer {} created context {id}", conn.peer);
    reply_created(&conn.stream, HandleKind::Context, id)?;
    Ok(())
}

pub fn create_context_from_type(conn: &mut Connection) -> HandlerResult {
    let properties = get_properties(conn)?;
    let device_type = (&conn.stream).get_u64()?;

    let Some(platform_id) = api(&conn.stream, properties)? else {
        return Ok(());
    };
    let platform = match platform_id {
        Some(id) => {
            let Some(p) = api(&conn.stream, conn.registry.platform(id))? else {
                return Ok(());
            };
            Some(p)
        }
        None => None,
    };
    let Some((rt, devices)) = api(
        &conn.stream,
        conn.runtime.create_context_from_type(platform, device_type),
    )?
    else {
        return Ok(());
    };

    // The devices backing the context may be new to this connection.
    let owner = platform_id.unwrap_or_else(|| {
        conn.runtime
            .platform_ids()
            .ok()
            .and_then(|p| p.first().map(|p| conn.registry.register_platform(*p)))
            .unwrap_or(0)
    });
    let device_ids = devices
        .into_iter()
        .map(|d| conn.registry.register_device(d, owner, false))
        .collect();

    let id = conn.registry.register_context(ContextEntry {
        rt,
        devices: device_ids,
        platform: platform_id,
    });
    info!("peer {} created context {id}", conn.peer);
    reply_created(&conn.stream, HandleKind::Context, id)?;
    Ok(())
}

pub fn retain_context(conn: &mut Connection) -> HandlerResult {
    let id = (&conn.stream).get_handle(HandleKind::Context)?;
    let result = conn
        .registry
        .context(id)
        .and_then(|e| conn.runtime.retain_context(e.rt));
    reply_status(&conn.stream, status_of(result))?;
    Ok(())
}

pub fn release_context(conn: &mut Connection) -> HandlerResult {
    let id = (&conn.stream).get_handle(HandleKind::Context)?;
    let result = conn
        .registry
        .context(id)
        .and_then(|e| conn.runtime.release_context(e.rt));
    if result.is_ok() {
        conn.registry.unregister_context(id);
    }
    reply_status(&conn.stream, status_of(result))?;
    Ok(())
}

pub fn get_context_info(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let id = s.get_handle(HandleKind::Context)?;
    let param = s.get_u32()?;

    let result = conn.registry.context(id).and_then(|entry| match param {
        // Handle-valued answers come from the registry.
        info::CONTEXT_DEVICES => Ok(entry
            .devices
            .iter()
            .flat_map(|d| d.to_ne_bytes())
            .collect()),
        info::CONTEXT_PROPERTIES => match entry.platform {
            Some(p) => Ok([info::CONTEXT_PLATFORM as u64, p, 0]
                .iter()
                .flat_map(|v| v.to_ne_bytes())
                .collect()),
            None => Ok(Vec::new()),
        },
        _ => conn.runtime.context_info(entry.rt, param),
    });
    reply_info(&conn.stream, result)?;
    Ok(())
}

pub fn create_command_queue(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let context_id = s.get_handle(HandleKind::Context)?;
    let device_id = s.get_handle(HandleKind::Device)?;
    let properties = s.get_u64()?;

    let Some(context) = api(&conn.stream, conn.registry.context(context_id).map(|e| e.rt))? else {
        return Ok(());
    };
    let Some(device) = api(&conn.stream, conn.registry.device(device_id).map(|e| e.rt))? else {
        return Ok(());
    };
    let Some(rt) = api(
        &conn.stream,
        conn.runtime.create_queue(context, device, properties),
    )?
    else {
        return Ok(());
    };

    let id = conn.registry.register_queue(QueueEntry {
        rt,
        context: context_id,
        device: device_id,
        properties,
    });
    reply_created(&conn.stream, HandleKind::CommandQueue, id)?;
    Ok(())
}

pub fn retain_command_queue(conn: &mut Connection) -> HandlerResult {
    let id = (&conn.stream).get_handle(HandleKind::CommandQueue)?;
    let result = conn
        .registry
        .queue(id)
        .and_then(|e| conn.runtime.retain_queue(e.rt));
    reply_status(&conn.stream, status_of(result))?;
    Ok(())
}

pub fn release_command_queue(conn: &mut Connection) -> HandlerResult {
    let id = (&conn.stream).get_handle(HandleKind::CommandQueue)?;
    let result = conn
        .registry
        .queue(id)
        .and_then(|e| conn.runtime.release_queue(e.rt));
    if result.is_ok() {
        conn.registry.unregister_queue(id);
    }
    reply_status(&conn.stream, status_of(result))?;
    Ok(())
}

pub fn get_command_queue_info(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let id = s.get_handle(HandleKind::CommandQueue)?;
    let param = s.get_u32()?;

    let result = conn.registry.queue(id).and_then(|entry| match param {
        info::QUEUE_CONTEXT => Ok(entry.context.to_ne_bytes().to_vec()),
        info::QUEUE_DEVICE => Ok(entry.device.to_ne_bytes().to_vec()),
        _ => conn.runtime.queue_info(entry.rt, param),
    });
    reply_info(&conn.stream, result)?;
    Ok(())
}

pub fn flush(conn: &mut Connection) -> HandlerResult {
    let id = (&conn.stream).get_handle(HandleKind::CommandQueue)?;
    let result = conn
        .registry
        .queue(id)
        .and_then(|e| conn.runtime.flush(e.rt));
    reply_status(&conn.stream, status_of(result))?;
    Ok(())
}

pub fn finish(conn: &mut Connection) -> HandlerResult {
    let id = (&conn.stream).get_handle(HandleKind::CommandQueue)?;
    let result = conn
        .registry
        .queue(id)
        .and_then(|e| conn.runtime.finish(e.rt));
    reply_status(&conn.stream, status_of(result))?;
    Ok(())
}
