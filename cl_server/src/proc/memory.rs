// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Memory-object and sampler commands.

use cl_protocol::pack::read_pack;
use cl_protocol::types::{element_size, info, MemFlags, Status};
use cl_protocol::wire::{WireRead, WireWrite};
use cl_protocol::HandleKind;

use crate::dispatch::{Connection, HandlerResult};
use crate::registry::{MemEntry, SamplerEntry};

use super::*;

pub fn create_buffer(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let context_id = s.get_handle(HandleKind::Context)?;
    let flags = MemFlags::from_bits_retain(s.get_u64()?);
    let size = s.get_size()?;
    let has_data = s.get_bool()?;
    // The creation payload is read before any validation so a rejection
    // leaves the stream aligned on the next command.
    let host_data = if has_data {
        Some(read_pack(&mut s, size)?)
    } else {
        None
    };

    if flags.wants_host_memory() {
        reply_status(&conn.stream, Status::INVALID_VALUE)?;
        return Ok(());
    }
    let Some(context) = api(&conn.stream, conn.registry.context(context_id).map(|e| e.rt))? else {
        return Ok(());
    };
    let Some(rt) = api(
        &conn.stream,
        conn.runtime
            .create_buffer(context, flags.without_host_ptr(), size, host_data),
    )?
    else {
        return Ok(());
    };

    let id = conn.registry.register_mem(MemEntry {
        rt,
        context: context_id,
        size,
        flags,
        element_size: 1,
        is_image: false,
        parent: None,
    });
    reply_created(&conn.stream, HandleKind::Mem, id)?;
    Ok(())
}

pub fn create_sub_buffer(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let parent_id = s.get_handle(HandleKind::Mem)?;
    let flags = MemFlags::from_bits_retain(s.get_u64()?);
    let origin = s.get_size()?;
    let size = s.get_size()?;

    if flags.intersects(
        MemFlags::USE_HOST_PTR | MemFlags::ALLOC_HOST_PTR | MemFlags::COPY_HOST_PTR,
    ) {
        reply_status(&conn.stream, Status::INVALID_VALUE)?;
        return Ok(());
    }
    let Some((parent, context_id)) = api(
        &conn.stream,
        conn.registry.mem(parent_id).map(|e| (e.rt, e.context)),
    )?
    else {
        return Ok(());
    };
    let Some(rt) = api(
        &conn.stream,
        conn.runtime.create_sub_buffer(parent, flags, origin, size),
    )?
    else {
        return Ok(());
    };

    let id = conn.registry.register_mem(MemEntry {
        rt,
        context: context_id,
        size,
        flags,
        element_size: 1,
        is_image: false,
        parent: Some(parent_id),
    });
    reply_created(&conn.stream, HandleKind::Mem, id)?;
    Ok(())
}

pub fn create_image(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let context_id = s.get_handle(HandleKind::Context)?;
    let flags = MemFlags::from_bits_retain(s.get_u64()?);
    let format = s.get_image_format()?;
    let desc = s.get_image_desc()?;
    let has_data = s.get_bool()?;
    let host_data = if has_data {
        let data_len = s.get_size()?;
        Some(read_pack(&mut s, data_len)?)
    } else {
        None
    };

    if flags.wants_host_memory() {
        reply_status(&conn.stream, Status::INVALID_VALUE)?;
        return Ok(());
    }
    let Some(element) = api(
        &conn.stream,
        element_size(format).ok_or(Status::INVALID_IMAGE_FORMAT_DESCRIPTOR),
    )?
    else {
        return Ok(());
    };
    let Some(context) = api(&conn.stream, conn.registry.context(context_id).map(|e| e.rt))? else {
        return Ok(());
    };
    let Some(rt) = api(
        &conn.stream,
        conn.runtime.create_image(
            context,
            flags.without_host_ptr(),
            format,
            &desc,
            host_data,
        ),
    )?
    else {
        return Ok(());
    };

    let depth = if desc.depth == 0 { 1 } else { desc.depth };
    let id = conn.registry.register_mem(MemEntry {
        rt,
        context: context_id,
        size: desc.width * desc.height * depth * element,
        flags,
        element_size: element,
        is_image: true,
        parent: None,
    });
    reply_created(&conn.stream, HandleKind::Mem, id)?;
    Ok(())
}

pub fn retain_mem_object(conn: &mut Connection) -> HandlerResult {
    let id = (&conn.stream).get_handle(HandleKind::Mem)?;
    let result = conn
        .registry
        .mem(id)
        .and_then(|e| conn.runtime.retain_mem(e.rt));
    reply_status(&conn.stream, status_of(result))?;
    Ok(())
}

pub fn release_mem_object(conn: &mut Connection) -> HandlerResult {
    let id = (&conn.stream).get_handle(HandleKind::Mem)?;
    let result = conn
        .registry
        .mem(id)
        .and_then(|e| conn.runtime.release_mem(e.rt));
    if result.is_ok() {
        conn.registry.unregister_mem(id);
    }
    reply_status(&conn.stream, status_of(result))?;
    Ok(())
}

pub fn get_supported_image_formats(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let context_id = s.get_handle(HandleKind::Context)?;
    let flags = MemFlags::from_bits_retain(s.get_u64()?);
    let image_type = s.get_u32()?;

    let Some(context) = api(&conn.stream, conn.registry.context(context_id).map(|e| e.rt))? else {
        return Ok(());
    };
    let Some(formats) = api(
        &conn.stream,
        conn.runtime.supported_image_formats(context, flags, image_type),
    )?
    else {
        return Ok(());
    };
    reply_ok(&conn.stream, |frame| {
        frame.put_u32(formats.len() as u32)?;
        for f in formats {
            frame.put_image_format(f)?;
        }
        Ok(())
    })?;
    Ok(())
}

pub fn get_mem_object_info(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let id = s.get_handle(HandleKind::Mem)?;
    let param = s.get_u32()?;

    let result = conn.registry.mem(id).and_then(|entry| match param {
        info::MEM_CONTEXT => Ok(entry.context.to_ne_bytes().to_vec()),
        info::MEM_ASSOCIATED_MEMOBJECT => {
            Ok(entry.parent.unwrap_or(0).to_ne_bytes().to_vec())
        }
        _ => conn.runtime.mem_info(entry.rt, param),
    });
    reply_info(&conn.stream, result)?;
    Ok(())
}

pub fn get_image_info(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let id = s.get_handle(HandleKind::Mem)?;
    let param = s.get_u32()?;

    let result = conn
        .registry
        .mem(id)
        .and_then(|entry| conn.runtime.image_info(entry.rt, param));
    reply_info(&conn.stream, result)?;
    Ok(())
}

pub fn create_sampler(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let context_id = s.get_handle(HandleKind::Context)?;
    let normalized_coords = s.get_bool()?;
    let addressing_mode = s.get_u32()?;
    let filter_mode = s.get_u32()?;

    let Some(context) = api(&conn.stream, conn.registry.context(context_id).map(|e| e.rt))? else {
        return Ok(());
    };
    let Some(rt) = api(
        &conn.stream,
        conn.runtime
            .create_sampler(context, normalized_coords, addressing_mode, filter_mode),
    )?
    else {
        return Ok(());
    };

    let id = conn.registry.register_sampler(SamplerEntry {
        rt,
        context: context_id,
    });
    reply_created(&conn.stream, HandleKind::Sampler, id)?;
    Ok(())
}

pub fn retain_sampler(conn: &mut Connection) -> HandlerResult {
    let id = (&conn.stream).get_handle(HandleKind::Sampler)?;
    let result = conn
        .registry
        .sampler(id)
        .and_then(|e| conn.runtime.retain_sampler(e.rt));
    reply_status(&conn.stream, status_of(result))?;
    Ok(())
}

pub fn release_sampler(conn: &mut Connection) -> HandlerResult {
    let id = (&conn.stream).get_handle(HandleKind::Sampler)?;
    let result = conn
        .registry
        .sampler(id)
        .and_then(|e| conn.runtime.release_sampler(e.rt));
    if result.is_ok() {
        conn.registry.unregister_sampler(id);
    }
    reply_status(&conn.stream, status_of(result))?;
    Ok(())
}

pub fn get_sampler_info(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let id = s.get_handle(HandleKind::Sampler)?;
    let param = s.get_u32()?;

    let result = conn.registry.sampler(id).and_then(|entry| match param {
        info::SAMPLER_CONTEXT => Ok(entry.context.to_ne_bytes().to_vec()),
        _ => conn.runtime.sampler_info(entry.rt, param),
    });
    reply_info(&conn.stream, result)?;
    Ok(())
}
