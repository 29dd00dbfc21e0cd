// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Enqueue commands.
//!
//! Every command here shares the tail `want_event, num_wait, wait_list`
//! and the reply `status[, new_event]`. Commands that move bulk data in a
//! non-blocking fashion additionally reply with the data port their
//! worker is listening on; blocking variants carry the payload inline as
//! a dataPack on the primary stream, with the wait-list satisfied right
//! here on the dispatcher thread.

use cl_protocol::pack::{read_pack, write_pack};
use cl_protocol::rect::{self, RectLayout};
use cl_protocol::types::{command_type, Status};
use cl_protocol::wire::{send_frame, WireRead, WireWrite};
use cl_protocol::HandleKind;

use std::sync::Arc;

use crate::dispatch::{Connection, HandlerResult};
use crate::events::{wait_all, SrvEvent};
use crate::registry::MemEntry;
use crate::runtime::{RtEvent, RtQueue};
use crate::transfer::{self, ReadOp, WriteOp};

use super::*;

/// What every enqueue resolves its queue into.
struct QueueCtx {
    rt: RtQueue,
    id: u64,
    context: u64,
}

fn resolve_queue(conn: &Connection, id: u64) -> Result<QueueCtx, Status> {
    let entry = conn.registry.queue(id)?;
    Ok(QueueCtx {
        rt: entry.rt,
        id,
        context: entry.context,
    })
}

/// Check the one-context rule for a transfer: the memory object and every
/// wait-list member must live in the target queue's context.
fn check_contexts(queue: &QueueCtx, mem: &MemEntry, waits: &[Arc<SrvEvent>]) -> Result<(), Status> {
    if mem.context != queue.context {
        return Err(Status::INVALID_CONTEXT);
    }
    if waits.iter().any(|ev| ev.context != queue.context) {
        return Err(Status::INVALID_CONTEXT);
    }
    Ok(())
}

/// Finish a synchronously-executed enqueue: mint and register the event if
/// the client asked for one, or release the runtime's event if not.
fn reply_sync(
    conn: &mut Connection,
    queue: &QueueCtx,
    ct: u32,
    want_event: bool,
    result: Result<RtEvent, Status>,
) -> HandlerResult {
    let rt_event = match result {
        Ok(ev) => ev,
        Err(status) => {
            reply_status(&conn.stream, status)?;
            return Ok(());
        }
    };
    if !want_event {
        let _ = conn.runtime.release_event(rt_event);
        reply_status(&conn.stream, Status::SUCCESS)?;
        return Ok(());
    }
    let id = conn.registry.mint();
    let event = SrvEvent::completed(id, queue.context, Some(queue.id), ct, rt_event);
    conn.registry.register_event(event);
    reply_ok(&conn.stream, |frame| frame.put_handle(HandleKind::Event, id))?;
    Ok(())
}

/// Accept a non-transfer enqueue.
///
/// With a settled (or empty) wait-list the command runs right here and
/// the reply carries an already-complete event. A wait-list that is
/// still pending must not stall the dispatcher — the client needs this
/// submission to return before it can, say, complete the user event the
/// list names — so the runtime call is deferred to a worker and the
/// reply goes out with the event in *submitted*.
fn run_submission(
    conn: &mut Connection,
    queue: &QueueCtx,
    ct: u32,
    tail: EnqueueTail,
    f: impl FnOnce(&dyn crate::runtime::Runtime) -> Result<RtEvent, Status> + Send + 'static,
) -> HandlerResult {
    let Some(waits) = api(&conn.stream, conn.registry.wait_list(&tail.wait_ids))? else {
        return Ok(());
    };
    if waits.iter().any(|ev| ev.context != queue.context) {
        reply_status(&conn.stream, Status::INVALID_CONTEXT)?;
        return Ok(());
    }

    if waits.iter().all(|ev| ev.exec_state().is_settled()) {
        if let Err(status) = wait_all(&waits, conn.runtime.as_ref()) {
            reply_status(&conn.stream, status)?;
            return Ok(());
        }
        let result = f(conn.runtime.as_ref());
        return reply_sync(conn, queue, ct, tail.want_event, result);
    }

    let event = if tail.want_event {
        let id = conn.registry.mint();
        let event = SrvEvent::submitted(id, queue.context, Some(queue.id), ct);
        conn.registry.register_event(Arc::clone(&event));
        Some(event)
    } else {
        None
    };
    reply_ok(&conn.stream, |frame| {
        if let Some(ev) = &event {
            frame.put_handle(HandleKind::Event, ev.id)?;
        }
        Ok(())
    })?;
    let guard = transfer::spawn_deferred(Arc::clone(&conn.runtime), f, waits, event);
    conn.transfers.push(guard);
    Ok(())
}

/// The non-blocking prologue: bind a data port, register the submission
/// event, and reply `status[, event], port` so the client can connect.
/// Returns what the worker needs, or `None` if the reply already went out
/// as a failure.
#[allow(clippy::type_complexity)]
fn start_async(
    conn: &mut Connection,
    queue: &QueueCtx,
    ct: u32,
    want_event: bool,
) -> Result<Option<(std::net::TcpListener, Option<Arc<SrvEvent>>)>, cl_protocol::Error> {
    let Some((listener, port)) = transfer::open_data_port(conn.config.data_ports) else {
        reply_status(&conn.stream, Status::OUT_OF_HOST_MEMORY)?;
        return Ok(None);
    };
    let event = if want_event {
        let id = conn.registry.mint();
        let event = SrvEvent::submitted(id, queue.context, Some(queue.id), ct);
        conn.registry.register_event(Arc::clone(&event));
        Some(event)
    } else {
        None
    };
    reply_ok(&conn.stream, |frame| {
        if let Some(ev) = &event {
            frame.put_handle(HandleKind::Event, ev.id)?;
        }
        frame.put_u32(port as u32)
    })?;
    Ok(Some((listener, event)))
}

pub fn read_buffer(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let queue_id = s.get_handle(HandleKind::CommandQueue)?;
    let mem_id = s.get_handle(HandleKind::Mem)?;
    let blocking = s.get_bool()?;
    let offset = s.get_size()?;
    let len = s.get_size()?;
    let tail = get_enqueue_tail(conn)?;

    let Some(queue) = api(&conn.stream, resolve_queue(conn, queue_id))? else {
        return Ok(());
    };
    let Some(waits) = api(&conn.stream, conn.registry.wait_list(&tail.wait_ids))? else {
        return Ok(());
    };
    let mem = {
        let checked = conn.registry.mem(mem_id).and_then(|entry| {
            if entry.is_image {
                return Err(Status::INVALID_MEM_OBJECT);
            }
            check_contexts(&queue, entry, &waits)?;
            entry.readable()?;
            entry.check_range(offset, len)?;
            Ok(entry.rt)
        });
        let Some(mem) = api(&conn.stream, checked)? else {
            return Ok(());
        };
        mem
    };

    if blocking {
        if let Err(status) = wait_all(&waits, conn.runtime.as_ref()) {
            reply_status(&conn.stream, status)?;
            return Ok(());
        }
        let (data, rt_event) =
            match conn.runtime.enqueue_read_buffer(queue.rt, mem, offset, len) {
                Ok(r) => r,
                Err(status) => {
                    reply_status(&conn.stream, status)?;
                    return Ok(());
                }
            };
        if let Err(status) = conn.runtime.wait_events(&[rt_event]) {
            reply_status(&conn.stream, status)?;
            return Ok(());
        }
        reply_blocking_read(conn, &queue, command_type::READ_BUFFER, tail.want_event, rt_event, &data)
    } else {
        let Some((listener, event)) =
            start_async(conn, &queue, command_type::READ_BUFFER, tail.want_event)?
        else {
            return Ok(());
        };
        let guard = transfer::spawn_read(
            listener,
            Arc::clone(&conn.runtime),
            queue.rt,
            ReadOp::Buffer {
                mem,
                offset,
                len,
            },
            waits,
            event,
        );
        conn.transfers.push(guard);
        Ok(())
    }
}

/// The tail of a blocking read: `status[, event]` then the payload pack,
/// with the frame flagged `more` since the payload follows immediately.
fn reply_blocking_read(
    conn: &mut Connection,
    queue: &QueueCtx,
    ct: u32,
    want_event: bool,
    rt_event: RtEvent,
    data: &[u8],
) -> HandlerResult {
    let mut frame = Vec::new();
    frame.put_status(Status::SUCCESS)?;
    if want_event {
        let id = conn.registry.mint();
        frame.put_handle(HandleKind::Event, id)?;
        let event = SrvEvent::completed(id, queue.context, Some(queue.id), ct, rt_event);
        conn.registry.register_event(event);
    } else {
        let _ = conn.runtime.release_event(rt_event);
    }
    send_frame(&conn.stream, &frame, true)?;
    write_pack(&mut (&conn.stream), data)?;
    Ok(())
}

pub fn write_buffer(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let queue_id = s.get_handle(HandleKind::CommandQueue)?;
    let mem_id = s.get_handle(HandleKind::Mem)?;
    let blocking = s.get_bool()?;
    let offset = s.get_size()?;
    let len = s.get_size()?;
    let tail = get_enqueue_tail(conn)?;
    // A blocking write carries its payload inline right behind the frame;
    // it must be consumed whatever the validation verdict.
    let inline = if blocking {
        Some(read_pack(&mut (&conn.stream), len)?)
    } else {
        None
    };

    let Some(queue) = api(&conn.stream, resolve_queue(conn, queue_id))? else {
        return Ok(());
    };
    let Some(waits) = api(&conn.stream, conn.registry.wait_list(&tail.wait_ids))? else {
        return Ok(());
    };
    let checked = conn.registry.mem(mem_id).and_then(|entry| {
        if entry.is_image {
            return Err(Status::INVALID_MEM_OBJECT);
        }
        check_contexts(&queue, entry, &waits)?;
        entry.writable()?;
        entry.check_range(offset, len)?;
        Ok(entry.rt)
    });
    let Some(mem) = api(&conn.stream, checked)? else {
        return Ok(());
    };

    if let Some(data) = inline {
        if let Err(status) = wait_all(&waits, conn.runtime.as_ref()) {
            reply_status(&conn.stream, status)?;
            return Ok(());
        }
        let result = conn
            .runtime
            .enqueue_write_buffer(queue.rt, mem, offset, &data)
            .and_then(|ev| {
                conn.runtime.wait_events(&[ev])?;
                Ok(ev)
            });
        reply_sync(conn, &queue, command_type::WRITE_BUFFER, tail.want_event, result)
    } else {
        let Some((listener, event)) =
            start_async(conn, &queue, command_type::WRITE_BUFFER, tail.want_event)?
        else {
            return Ok(());
        };
        let guard = transfer::spawn_write(
            listener,
            Arc::clone(&conn.runtime),
            queue.rt,
            WriteOp::Buffer { mem, offset },
            len,
            waits,
            event,
        );
        conn.transfers.push(guard);
        Ok(())
    }
}

pub fn copy_buffer(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let queue_id = s.get_handle(HandleKind::CommandQueue)?;
    let src_id = s.get_handle(HandleKind::Mem)?;
    let dst_id = s.get_handle(HandleKind::Mem)?;
    let src_offset = s.get_size()?;
    let dst_offset = s.get_size()?;
    let len = s.get_size()?;
    let tail = get_enqueue_tail(conn)?;

    let Some(queue) = api(&conn.stream, resolve_queue(conn, queue_id))? else {
        return Ok(());
    };
    let mems = conn
        .registry
        .mem(src_id)
        .and_then(|s| Ok((s.rt, conn.registry.mem(dst_id)?.rt)));
    let Some((src, dst)) = api(&conn.stream, mems)? else {
        return Ok(());
    };
    let q = queue.rt;
    run_submission(conn, &queue, command_type::COPY_BUFFER, tail, move |rt| {
        rt.enqueue_copy_buffer(q, src, dst, src_offset, dst_offset, len)
    })
}

pub fn read_buffer_rect(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let queue_id = s.get_handle(HandleKind::CommandQueue)?;
    let mem_id = s.get_handle(HandleKind::Mem)?;
    let blocking = s.get_bool()?;
    let origin = s.get_size3()?;
    let region = s.get_size3()?;
    let row_pitch = s.get_size()?;
    let slice_pitch = s.get_size()?;
    // The host-side pitches ride along for completeness; the pitched copy
    // on that side of the wire is the client's business.
    let _host_row_pitch = s.get_size()?;
    let _host_slice_pitch = s.get_size()?;
    let tail = get_enqueue_tail(conn)?;

    let Some(queue) = api(&conn.stream, resolve_queue(conn, queue_id))? else {
        return Ok(());
    };
    let Some(waits) = api(&conn.stream, conn.registry.wait_list(&tail.wait_ids))? else {
        return Ok(());
    };
    let checked = conn.registry.mem(mem_id).and_then(|entry| {
        if entry.is_image {
            return Err(Status::INVALID_MEM_OBJECT);
        }
        check_contexts(&queue, entry, &waits)?;
        entry.readable()?;
        let layout =
            RectLayout::new(region, row_pitch, slice_pitch).ok_or(Status::INVALID_VALUE)?;
        if rect::dense_size(region) == 0 || layout.required_len(origin, region) > entry.size {
            return Err(Status::INVALID_VALUE);
        }
        Ok(entry.rt)
    });
    let Some(mem) = api(&conn.stream, checked)? else {
        return Ok(());
    };

    if blocking {
        if let Err(status) = wait_all(&waits, conn.runtime.as_ref()) {
            reply_status(&conn.stream, status)?;
            return Ok(());
        }
        let result = conn
            .runtime
            .enqueue_read_buffer_rect(queue.rt, mem, origin, region, row_pitch, slice_pitch)
            .and_then(|(data, ev)| {
                conn.runtime.wait_events(&[ev])?;
                Ok((data, ev))
            });
        match result {
            Ok((data, rt_event)) => reply_blocking_read(
                conn,
                &queue,
                command_type::READ_BUFFER_RECT,
                tail.want_event,
                rt_event,
                &data,
            ),
            Err(status) => {
                reply_status(&conn.stream, status)?;
                Ok(())
            }
        }
    } else {
        let Some((listener, event)) =
            start_async(conn, &queue, command_type::READ_BUFFER_RECT, tail.want_event)?
        else {
            return Ok(());
        };
        let guard = transfer::spawn_read(
            listener,
            Arc::clone(&conn.runtime),
            queue.rt,
            ReadOp::BufferRect {
                mem,
                origin,
                region,
                row_pitch,
                slice_pitch,
            },
            waits,
            event,
        );
        conn.transfers.push(guard);
        Ok(())
    }
}

pub fn write_buffer_rect(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let queue_id = s.get_handle(HandleKind::CommandQueue)?;
    let mem_id = s.get_handle(HandleKind::Mem)?;
    let blocking = s.get_bool()?;
    let origin = s.get_size3()?;
    let region = s.get_size3()?;
    let row_pitch = s.get_size()?;
    let slice_pitch = s.get_size()?;
    let _host_row_pitch = s.get_size()?;
    let _host_slice_pitch = s.get_size()?;
    let tail = get_enqueue_tail(conn)?;
    let dense_len = rect::dense_size(region);
    let inline = if blocking {
        Some(read_pack(&mut (&conn.stream), dense_len)?)
    } else {
        None
    };

    let Some(queue) = api(&conn.stream, resolve_queue(conn, queue_id))? else {
        return Ok(());
    };
    let Some(waits) = api(&conn.stream, conn.registry.wait_list(&tail.wait_ids))? else {
        return Ok(());
    };
    let checked = conn.registry.mem(mem_id).and_then(|entry| {
        if entry.is_image {
            return Err(Status::INVALID_MEM_OBJECT);
        }
        check_contexts(&queue, entry, &waits)?;
        entry.writable()?;
        let layout =
            RectLayout::new(region, row_pitch, slice_pitch).ok_or(Status::INVALID_VALUE)?;
        if dense_len == 0 || layout.required_len(origin, region) > entry.size {
            return Err(Status::INVALID_VALUE);
        }
        Ok(entry.rt)
    });
    let Some(mem) = api(&conn.stream, checked)? else {
        return Ok(());
    };

    if let Some(data) = inline {
        if let Err(status) = wait_all(&waits, conn.runtime.as_ref()) {
            reply_status(&conn.stream, status)?;
            return Ok(());
        }
        let result = conn
            .runtime
            .enqueue_write_buffer_rect(queue.rt, mem, origin, region, row_pitch, slice_pitch, &data)
            .and_then(|ev| {
                conn.runtime.wait_events(&[ev])?;
                Ok(ev)
            });
        reply_sync(
            conn,
            &queue,
            command_type::WRITE_BUFFER_RECT,
            tail.want_event,
            result,
        )
    } else {
        let Some((listener, event)) = start_async(
            conn,
            &queue,
            command_type::WRITE_BUFFER_RECT,
            tail.want_event,
        )?
        else {
            return Ok(());
        };
        let guard = transfer::spawn_write(
            listener,
            Arc::clone(&conn.runtime),
            queue.rt,
            WriteOp::BufferRect {
                mem,
                origin,
                region,
                row_pitch,
                slice_pitch,
            },
            dense_len,
            waits,
            event,
        );
        conn.transfers.push(guard);
        Ok(())
    }
}

pub fn copy_buffer_rect(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let queue_id = s.get_handle(HandleKind::CommandQueue)?;
    let src_id = s.get_handle(HandleKind::Mem)?;
    let dst_id = s.get_handle(HandleKind::Mem)?;
    let src_origin = s.get_size3()?;
    let dst_origin = s.get_size3()?;
    let region = s.get_size3()?;
    let src_row_pitch = s.get_size()?;
    let src_slice_pitch = s.get_size()?;
    let dst_row_pitch = s.get_size()?;
    let dst_slice_pitch = s.get_size()?;
    let tail = get_enqueue_tail(conn)?;

    let Some(queue) = api(&conn.stream, resolve_queue(conn, queue_id))? else {
        return Ok(());
    };
    let mems = conn
        .registry
        .mem(src_id)
        .and_then(|s| Ok((s.rt, conn.registry.mem(dst_id)?.rt)));
    let Some((src, dst)) = api(&conn.stream, mems)? else {
        return Ok(());
    };
    let q = queue.rt;
    run_submission(conn, &queue, command_type::COPY_BUFFER_RECT, tail, move |rt| {
        rt.enqueue_copy_buffer_rect(
            q,
            src,
            dst,
            src_origin,
            dst_origin,
            region,
            (src_row_pitch, src_slice_pitch),
            (dst_row_pitch, dst_slice_pitch),
        )
    })
}

pub fn read_image(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let queue_id = s.get_handle(HandleKind::CommandQueue)?;
    let mem_id = s.get_handle(HandleKind::Mem)?;
    let blocking = s.get_bool()?;
    let origin = s.get_size3()?;
    let region = s.get_size3()?;
    let _host_row_pitch = s.get_size()?;
    let _host_slice_pitch = s.get_size()?;
    let tail = get_enqueue_tail(conn)?;

    let Some(queue) = api(&conn.stream, resolve_queue(conn, queue_id))? else {
        return Ok(());
    };
    let Some(waits) = api(&conn.stream, conn.registry.wait_list(&tail.wait_ids))? else {
        return Ok(());
    };
    let checked = conn.registry.mem(mem_id).and_then(|entry| {
        if !entry.is_image {
            return Err(Status::INVALID_MEM_OBJECT);
        }
        check_contexts(&queue, entry, &waits)?;
        entry.readable()?;
        if rect::dense_size(region) == 0 {
            return Err(Status::INVALID_VALUE);
        }
        Ok(entry.rt)
    });
    let Some(mem) = api(&conn.stream, checked)? else {
        return Ok(());
    };

    if blocking {
        if let Err(status) = wait_all(&waits, conn.runtime.as_ref()) {
            reply_status(&conn.stream, status)?;
            return Ok(());
        }
        let result = conn
            .runtime
            .enqueue_read_image(queue.rt, mem, origin, region)
            .and_then(|(data, ev)| {
                conn.runtime.wait_events(&[ev])?;
                Ok((data, ev))
            });
        match result {
            Ok((data, rt_event)) => reply_blocking_read(
                conn,
                &queue,
                command_type::READ_IMAGE,
                tail.want_event,
                rt_event,
                &data,
            ),
            Err(status) => {
                reply_status(&conn.stream, status)?;
                Ok(())
            }
        }
    } else {
        let Some((listener, event)) =
            start_async(conn, &queue, command_type::READ_IMAGE, tail.want_event)?
        else {
            return Ok(());
        };
        let guard = transfer::spawn_read(
            listener,
            Arc::clone(&conn.runtime),
            queue.rt,
            ReadOp::Image {
                mem,
                origin,
                region,
            },
            waits,
            event,
        );
        conn.transfers.push(guard);
        Ok(())
    }
}

pub fn write_image(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let queue_id = s.get_handle(HandleKind::CommandQueue)?;
    let mem_id = s.get_handle(HandleKind::Mem)?;
    let blocking = s.get_bool()?;
    let origin = s.get_size3()?;
    let region = s.get_size3()?;
    let _host_row_pitch = s.get_size()?;
    let _host_slice_pitch = s.get_size()?;
    let tail = get_enqueue_tail(conn)?;

    // Sizing the inline payload needs the image's element size, which is
    // registry state; an unknown handle still has to leave the stream
    // aligned, so the lookup happens before the verdict is sent.
    let element = conn
        .registry
        .mem(mem_id)
        .map(|e| e.element_size)
        .unwrap_or(1);
    let dense_len = rect::dense_size(region) * element;
    let inline = if blocking {
        Some(read_pack(&mut (&conn.stream), dense_len)?)
    } else {
        None
    };

    let Some(queue) = api(&conn.stream, resolve_queue(conn, queue_id))? else {
        return Ok(());
    };
    let Some(waits) = api(&conn.stream, conn.registry.wait_list(&tail.wait_ids))? else {
        return Ok(());
    };
    let checked = conn.registry.mem(mem_id).and_then(|entry| {
        if !entry.is_image {
            return Err(Status::INVALID_MEM_OBJECT);
        }
        check_contexts(&queue, entry, &waits)?;
        entry.writable()?;
        if rect::dense_size(region) == 0 {
            return Err(Status::INVALID_VALUE);
        }
        Ok(entry.rt)
    });
    let Some(mem) = api(&conn.stream, checked)? else {
        return Ok(());
    };

    if let Some(data) = inline {
        if let Err(status) = wait_all(&waits, conn.runtime.as_ref()) {
            reply_status(&conn.stream, status)?;
            return Ok(());
        }
        let result = conn
            .runtime
            .enqueue_write_image(queue.rt, mem, origin, region, &data)
            .and_then(|ev| {
                conn.runtime.wait_events(&[ev])?;
                Ok(ev)
            });
        reply_sync(conn, &queue, command_type::WRITE_IMAGE, tail.want_event, result)
    } else {
        let Some((listener, event)) =
            start_async(conn, &queue, command_type::WRITE_IMAGE, tail.want_event)?
        else {
            return Ok(());
        };
        let guard = transfer::spawn_write(
            listener,
            Arc::clone(&conn.runtime),
            queue.rt,
            WriteOp::Image {
                mem,
                origin,
                region,
            },
            dense_len,
            waits,
            event,
        );
        conn.transfers.push(guard);
        Ok(())
    }
}

pub fn copy_image(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let queue_id = s.get_handle(HandleKind::CommandQueue)?;
    let src_id = s.get_handle(HandleKind::Mem)?;
    let dst_id = s.get_handle(HandleKind::Mem)?;
    let src_origin = s.get_size3()?;
    let dst_origin = s.get_size3()?;
    let region = s.get_size3()?;
    let tail = get_enqueue_tail(conn)?;

    let Some(queue) = api(&conn.stream, resolve_queue(conn, queue_id))? else {
        return Ok(());
    };
    let mems = conn
        .registry
        .mem(src_id)
        .and_then(|s| Ok((s.rt, conn.registry.mem(dst_id)?.rt)));
    let Some((src, dst)) = api(&conn.stream, mems)? else {
        return Ok(());
    };
    let q = queue.rt;
    run_submission(conn, &queue, command_type::COPY_IMAGE, tail, move |rt| {
        rt.enqueue_copy_image(q, src, dst, src_origin, dst_origin, region)
    })
}

pub fn copy_image_to_buffer(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let queue_id = s.get_handle(HandleKind::CommandQueue)?;
    let image_id = s.get_handle(HandleKind::Mem)?;
    let buffer_id = s.get_handle(HandleKind::Mem)?;
    let origin = s.get_size3()?;
    let region = s.get_size3()?;
    let dst_offset = s.get_size()?;
    let tail = get_enqueue_tail(conn)?;

    let Some(queue) = api(&conn.stream, resolve_queue(conn, queue_id))? else {
        return Ok(());
    };
    let mems = conn
        .registry
        .mem(image_id)
        .and_then(|s| Ok((s.rt, conn.registry.mem(buffer_id)?.rt)));
    let Some((image, buffer)) = api(&conn.stream, mems)? else {
        return Ok(());
    };
    let q = queue.rt;
    run_submission(
        conn,
        &queue,
        command_type::COPY_IMAGE_TO_BUFFER,
        tail,
        move |rt| rt.enqueue_copy_image_to_buffer(q, image, buffer, origin, region, dst_offset),
    )
}

pub fn copy_buffer_to_image(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let queue_id = s.get_handle(HandleKind::CommandQueue)?;
    let buffer_id = s.get_handle(HandleKind::Mem)?;
    let image_id = s.get_handle(HandleKind::Mem)?;
    let src_offset = s.get_size()?;
    let dst_origin = s.get_size3()?;
    let region = s.get_size3()?;
    let tail = get_enqueue_tail(conn)?;

    let Some(queue) = api(&conn.stream, resolve_queue(conn, queue_id))? else {
        return Ok(());
    };
    let mems = conn
        .registry
        .mem(buffer_id)
        .and_then(|s| Ok((s.rt, conn.registry.mem(image_id)?.rt)));
    let Some((buffer, image)) = api(&conn.stream, mems)? else {
        return Ok(());
    };
    let q = queue.rt;
    run_submission(
        conn,
        &queue,
        command_type::COPY_BUFFER_TO_IMAGE,
        tail,
        move |rt| rt.enqueue_copy_buffer_to_image(q, buffer, image, src_offset, dst_origin, region),
    )
}

pub fn fill_buffer(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let queue_id = s.get_handle(HandleKind::CommandQueue)?;
    let mem_id = s.get_handle(HandleKind::Mem)?;
    let pattern = s.get_blob()?;
    let offset = s.get_size()?;
    let size = s.get_size()?;
    let tail = get_enqueue_tail(conn)?;

    let Some(queue) = api(&conn.stream, resolve_queue(conn, queue_id))? else {
        return Ok(());
    };
    let Some(mem) = api(&conn.stream, conn.registry.mem(mem_id).map(|e| e.rt))? else {
        return Ok(());
    };
    let q = queue.rt;
    run_submission(conn, &queue, command_type::FILL_BUFFER, tail, move |rt| {
        rt.enqueue_fill_buffer(q, mem, &pattern, offset, size)
    })
}

pub fn fill_image(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let queue_id = s.get_handle(HandleKind::CommandQueue)?;
    let mem_id = s.get_handle(HandleKind::Mem)?;
    let color = s.get_blob()?;
    let origin = s.get_size3()?;
    let region = s.get_size3()?;
    let tail = get_enqueue_tail(conn)?;

    let Some(queue) = api(&conn.stream, resolve_queue(conn, queue_id))? else {
        return Ok(());
    };
    let Some(mem) = api(&conn.stream, conn.registry.mem(mem_id).map(|e| e.rt))? else {
        return Ok(());
    };
    let q = queue.rt;
    run_submission(conn, &queue, command_type::FILL_IMAGE, tail, move |rt| {
        rt.enqueue_fill_image(q, mem, &color, origin, region)
    })
}

pub fn migrate_mem_objects(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let queue_id = s.get_handle(HandleKind::CommandQueue)?;
    let num = s.get_u32()? as usize;
    let mem_ids = s.get_handles(HandleKind::Mem, num)?;
    let flags = s.get_u64()?;
    let tail = get_enqueue_tail(conn)?;

    let Some(queue) = api(&conn.stream, resolve_queue(conn, queue_id))? else {
        return Ok(());
    };
    let mems = mem_ids
        .iter()
        .map(|id| Ok(conn.registry.mem(*id)?.rt))
        .collect::<Result<Vec<_>, Status>>();
    let Some(mems) = api(&conn.stream, mems)? else {
        return Ok(());
    };
    let q = queue.rt;
    run_submission(
        conn,
        &queue,
        command_type::MIGRATE_MEM_OBJECTS,
        tail,
        move |rt| rt.enqueue_migrate(q, &mems, flags),
    )
}

pub fn ndrange_kernel(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let queue_id = s.get_handle(HandleKind::CommandQueue)?;
    let kernel_id = s.get_handle(HandleKind::Kernel)?;
    let work_dim = s.get_u32()?;
    let has_offset = s.get_bool()?;
    let has_local = s.get_bool()?;
    let dims = work_dim as usize;
    let global_offset = if has_offset {
        Some(s.get_size_array(dims)?)
    } else {
        None
    };
    let global_size = s.get_size_array(dims)?;
    let local_size = if has_local {
        Some(s.get_size_array(dims)?)
    } else {
        None
    };
    let tail = get_enqueue_tail(conn)?;

    if !(1..=3).contains(&work_dim) {
        reply_status(&conn.stream, Status::INVALID_WORK_DIMENSION)?;
        return Ok(());
    }
    let Some(queue) = api(&conn.stream, resolve_queue(conn, queue_id))? else {
        return Ok(());
    };
    let Some(kernel) = api(&conn.stream, conn.registry.kernel(kernel_id).map(|e| e.rt))? else {
        return Ok(());
    };
    let q = queue.rt;
    run_submission(conn, &queue, command_type::NDRANGE_KERNEL, tail, move |rt| {
        rt.enqueue_ndrange(
            q,
            kernel,
            work_dim,
            global_offset.as_deref(),
            &global_size,
            local_size.as_deref(),
        )
    })
}

pub fn task(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let queue_id = s.get_handle(HandleKind::CommandQueue)?;
    let kernel_id = s.get_handle(HandleKind::Kernel)?;
    let tail = get_enqueue_tail(conn)?;

    let Some(queue) = api(&conn.stream, resolve_queue(conn, queue_id))? else {
        return Ok(());
    };
    let Some(kernel) = api(&conn.stream, conn.registry.kernel(kernel_id).map(|e| e.rt))? else {
        return Ok(());
    };
    let q = queue.rt;
    run_submission(conn, &queue, command_type::TASK, tail, move |rt| {
        rt.enqueue_task(q, kernel)
    })
}

pub fn marker_with_wait_list(conn: &mut Connection) -> HandlerResult {
    let queue_id = (&conn.stream).get_handle(HandleKind::CommandQueue)?;
    let tail = get_enqueue_tail(conn)?;

    let Some(queue) = api(&conn.stream, resolve_queue(conn, queue_id))? else {
        return Ok(());
    };
    let q = queue.rt;
    run_submission(conn, &queue, command_type::MARKER, tail, move |rt| {
        rt.enqueue_marker(q)
    })
}

pub fn barrier_with_wait_list(conn: &mut Connection) -> HandlerResult {
    let queue_id = (&conn.stream).get_handle(HandleKind::CommandQueue)?;
    let tail = get_enqueue_tail(conn)?;

    let Some(queue) = api(&conn.stream, resolve_queue(conn, queue_id))? else {
        return Ok(());
    };
    let q = queue.rt;
    run_submission(conn, &queue, command_type::BARRIER, tail, move |rt| {
        rt.enqueue_barrier(q)
    })
}
