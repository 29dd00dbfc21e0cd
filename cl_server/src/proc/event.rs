// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Event commands. The server's local lifecycle is authoritative for
//! execution status: transfer workers settle it, and the runtime event —
//! when there is one — is consulted through the wrapper's own wait.

use cl_protocol::types::{command_type, info, Status};
use cl_protocol::wire::WireRead;
use cl_protocol::{ExecState, HandleKind};

use crate::dispatch::{Connection, HandlerResult};
use crate::events::SrvEvent;

use super::*;

pub fn wait_for_events(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let num = s.get_u32()? as usize;
    let ids = s.get_handles(HandleKind::Event, num)?;

    let events = ids
        .iter()
        .map(|id| conn.registry.event(*id).cloned())
        .collect::<Result<Vec<_>, _>>();
    let Some(events) = api(&conn.stream, events)? else {
        return Ok(());
    };

    let mut result = Ok(());
    for ev in &events {
        if let Err(status) = ev.wait(conn.runtime.as_ref()) {
            result = Err(status);
            break;
        }
    }
    reply_status(&conn.stream, status_of(result))?;
    Ok(())
}

pub fn get_event_info(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let id = s.get_handle(HandleKind::Event)?;
    let param = s.get_u32()?;

    let result = conn.registry.event(id).and_then(|ev| match param {
        info::EVENT_COMMAND_QUEUE => Ok(ev.queue.unwrap_or(0).to_ne_bytes().to_vec()),
        info::EVENT_CONTEXT => Ok(ev.context.to_ne_bytes().to_vec()),
        info::EVENT_COMMAND_TYPE => Ok(ev.command_type.to_ne_bytes().to_vec()),
        info::EVENT_COMMAND_EXECUTION_STATUS => {
            Ok(ev.exec_state().to_wire().to_ne_bytes().to_vec())
        }
        info::EVENT_REFERENCE_COUNT => Ok(1u32.to_ne_bytes().to_vec()),
        _ => Err(Status::INVALID_VALUE),
    });
    reply_info(&conn.stream, result)?;
    Ok(())
}

pub fn retain_event(conn: &mut Connection) -> HandlerResult {
    let id = (&conn.stream).get_handle(HandleKind::Event)?;
    let result = conn.registry.event(id).and_then(|ev| match ev.rt_event() {
        Some(rt) => conn.runtime.retain_event(rt),
        // The work has not been issued yet; the table entry is the
        // reference.
        None => Ok(()),
    });
    reply_status(&conn.stream, status_of(result))?;
    Ok(())
}

pub fn release_event(conn: &mut Connection) -> HandlerResult {
    let id = (&conn.stream).get_handle(HandleKind::Event)?;
    match conn.registry.unregister_event(id) {
        Some(ev) => {
            // The client is done with it; a transfer worker may not be.
            ev.release_rt(conn.runtime.as_ref());
            reply_status(&conn.stream, Status::SUCCESS)?;
        }
        None => reply_status(&conn.stream, Status::INVALID_EVENT)?,
    }
    Ok(())
}

pub fn create_user_event(conn: &mut Connection) -> HandlerResult {
    let context_id = (&conn.stream).get_handle(HandleKind::Context)?;

    let Some(context) = api(&conn.stream, conn.registry.context(context_id).map(|e| e.rt))? else {
        return Ok(());
    };
    let Some(rt) = api(&conn.stream, conn.runtime.create_user_event(context))? else {
        return Ok(());
    };

    let id = conn.registry.mint();
    let event = SrvEvent::submitted(id, context_id, None, command_type::USER);
    event.attach_rt(rt);
    conn.registry.register_event(event);
    reply_created(&conn.stream, HandleKind::Event, id)?;
    Ok(())
}

pub fn set_user_event_status(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let id = s.get_handle(HandleKind::Event)?;
    let exec_status = s.get_i32()?;

    let result = conn.registry.event(id).cloned().and_then(|ev| {
        if ev.command_type != command_type::USER {
            return Err(Status::INVALID_EVENT);
        }
        if let Some(rt) = ev.rt_event() {
            conn.runtime.set_user_event_status(rt, exec_status)?;
        }
        ev.finish(ExecState::from_wire(exec_status));
        Ok(())
    });
    reply_status(&conn.stream, status_of(result))?;
    Ok(())
}

pub fn get_event_profiling_info(conn: &mut Connection) -> HandlerResult {
    let mut s = &conn.stream;
    let id = s.get_handle(HandleKind::Event)?;
    let param = s.get_u32()?;

    let result = conn.registry.event(id).and_then(|ev| match ev.exec_state() {
        // A failed transfer surfaces here: the submission itself already
        // returned success on the primary stream.
        ExecState::Error(status) => Err(status),
        ExecState::Submitted | ExecState::Running => Err(Status::PROFILING_INFO_NOT_AVAILABLE),
        ExecState::Complete => match ev.rt_event() {
            Some(rt) => conn.runtime.profiling_info(rt, param),
            None => Err(Status::PROFILING_INFO_NOT_AVAILABLE),
        },
    });
    reply_info(&conn.stream, result)?;
    Ok(())
}
