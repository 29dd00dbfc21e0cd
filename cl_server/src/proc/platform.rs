// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Platform and device commands.

use cl_protocol::types::info;
use cl_protocol::wire::{WireRead, WireWrite};
use cl_protocol::HandleKind;

use crate::dispatch::{Connection, HandlerResult};

use super::*;

pub fn get_platform_ids(conn: &mut Connection) -> HandlerResult {
    let platforms = match conn.runtime.platform_ids() {
        Ok(p) => p,
        Err(status) => return Ok(reply_status(&conn.stream, status)?),
    };
    let ids: Vec<u64> = platforms
        .into_iter()
        .map(|p| conn.registry.register_platform(p))
        .collect();
    reply_ok(&conn.stream, |frame| {
        frame.put_u32(ids.len() as u32)?;
        for id in ids {
            frame.put_handle(HandleKind::Platform, id)?;
        }
        Ok(())
    })?;
    Ok(())
}

pub fn get_platform_info(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let id = s.get_handle(HandleKind::Platform)?;
    let param = s.get_u32()?;

    let result = conn
        .registry
        .platform(id)
        .and_then(|p| conn.runtime.platform_info(p, param));
    reply_info(&conn.stream, result)?;
    Ok(())
}

pub fn get_device_ids(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let platform_id = s.get_handle(HandleKind::Platform)?;
    let device_type = s.get_u64()?;

    let Some(platform) = api(&conn.stream, conn.registry.platform(platform_id))? else {
        return Ok(());
    };
    let Some(devices) = api(&conn.stream, conn.runtime.device_ids(platform, device_type))? else {
        return Ok(());
    };
    let ids: Vec<u64> = devices
        .into_iter()
        .map(|d| conn.registry.register_device(d, platform_id, false))
        .collect();
    reply_ok(&conn.stream, |frame| {
        frame.put_u32(ids.len() as u32)?;
        for id in ids {
            frame.put_handle(HandleKind::Device, id)?;
        }
        Ok(())
    })?;
    Ok(())
}

pub fn get_device_info(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let id = s.get_handle(HandleKind::Device)?;
    let param = s.get_u32()?;

    let result = conn.registry.device(id).and_then(|entry| {
        // The platform is a handle-valued answer; it must come from the
        // registry, not the runtime, so the client sees a wire identity.
        if param == info::DEVICE_PLATFORM {
            return Ok(entry.platform.to_ne_bytes().to_vec());
        }
        conn.runtime.device_info(entry.rt, param)
    });
    reply_info(&conn.stream, result)?;
    Ok(())
}

pub fn create_sub_devices(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let id = s.get_handle(HandleKind::Device)?;
    let num_props = s.get_u32()? as usize;
    let properties = s.get_size_array(num_props)?;

    let Some((rt, platform)) = api(
        &conn.stream,
        conn.registry.device(id).map(|e| (e.rt, e.platform)),
    )?
    else {
        return Ok(());
    };
    let Some(subs) = api(&conn.stream, conn.runtime.create_sub_devices(rt, &properties))? else {
        return Ok(());
    };
    let ids: Vec<u64> = subs
        .into_iter()
        .map(|d| conn.registry.register_device(d, platform, true))
        .collect();
    reply_ok(&conn.stream, |frame| {
        frame.put_u32(ids.len() as u32)?;
        for id in ids {
            frame.put_handle(HandleKind::Device, id)?;
        }
        Ok(())
    })?;
    Ok(())
}

pub fn retain_device(conn: &mut Connection) -> HandlerResult {
    let id = (&conn.stream).get_handle(HandleKind::Device)?;
    let result = conn
        .registry
        .device(id)
        .and_then(|e| conn.runtime.retain_device(e.rt));
    reply_status(&conn.stream, status_of(result))?;
    Ok(())
}

pub fn release_device(conn: &mut Connection) -> HandlerResult {
    let id = (&conn.stream).get_handle(HandleKind::Device)?;
    let result = conn
        .registry
        .device(id)
        .and_then(|e| conn.runtime.release_device(e.rt));
    if result.is_ok() {
        conn.registry.unregister_device(id);
    }
    reply_status(&conn.stream, status_of(result))?;
    Ok(())
}
