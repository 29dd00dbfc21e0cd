// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Client-side events.
//!
//! An event exists from the moment its producing command returns. For
//! synchronously-executed commands the server has already finished the
//! work; for asynchronous bulk transfers the local state stays
//! *submitted* until the transfer worker lands the data, and a wait is
//! not allowed to return before then, however early the server settles
//! its half.

use std::sync::{Arc, Condvar, Mutex};

use cl_protocol::types::{command_type, info};
use cl_protocol::wire::{WireRead, WireWrite};
use cl_protocol::{Command, ExecState, HandleKind, Status};

use crate::context::Context;
use crate::platform::{info_query, status_call};
use crate::queue::Queue;
use crate::session::Session;

pub(crate) struct EventInner {
    pub(crate) session: Session,
    pub(crate) remote: u64,
    pub(crate) context_remote: u64,
    pub(crate) queue: Option<Queue>,
    pub(crate) command_type: u32,
    /// True when a local worker thread finalises this event (asynchronous
    /// bulk transfers). Completion is then gated on the local state, not
    /// just the server's.
    transfer: bool,
    refs: Mutex<u32>,
    state: Mutex<ExecState>,
    cond: Condvar,
}

#[derive(Clone)]
pub struct Event {
    pub(crate) inner: Arc<EventInner>,
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("remote", &self.inner.remote)
            .finish()
    }
}

impl Event {
    pub(crate) fn new(
        session: &Session,
        remote: u64,
        queue: Option<Queue>,
        context_remote: u64,
        command_type: u32,
        transfer: bool,
        initial: ExecState,
    ) -> Event {
        let inner = Arc::new(EventInner {
            session: session.clone(),
            remote,
            context_remote,
            queue,
            command_type,
            transfer,
            refs: Mutex::new(1),
            state: Mutex::new(initial),
            cond: Condvar::new(),
        });
        session.register_event(&inner);
        Event { inner }
    }

    pub(crate) fn session(&self) -> &Session {
        &self.inner.session
    }

    pub(crate) fn remote(&self) -> u64 {
        self.inner.remote
    }

    /// The queue the producing command was submitted on; `None` for user
    /// events.
    pub fn queue(&self) -> Option<&Queue> {
        self.inner.queue.as_ref()
    }

    /// The command-type tag of the producing command.
    pub fn command_type(&self) -> u32 {
        self.inner.command_type
    }

    pub(crate) fn local_state(&self) -> ExecState {
        *self.inner.state.lock().unwrap()
    }

    /// Settle the local half. Transfer workers call this when the last
    /// byte lands; user events when the client sets their status.
    pub(crate) fn finish_local(&self, state: ExecState) {
        let mut st = self.inner.state.lock().unwrap();
        if !st.is_settled() {
            *st = state;
            self.inner.cond.notify_all();
        }
    }

    fn wait_local(&self) -> ExecState {
        let mut st = self.inner.state.lock().unwrap();
        while !st.is_settled() {
            st = self.inner.cond.wait(st).unwrap();
        }
        *st
    }

    /// Execution status, as the API reports it: the server's verdict,
    /// clamped so completion is never reported while a local transfer is
    /// still landing data. User events are this client's own doing and
    /// are answered locally.
    pub fn status(&self) -> crate::Result<ExecState> {
        let local = self.local_state();
        if self.inner.command_type == command_type::USER {
            return Ok(local);
        }
        if self.inner.transfer && local.is_settled() {
            return Ok(local);
        }
        let bytes = self.info_remote(info::EVENT_COMMAND_EXECUTION_STATUS)?;
        let raw = bytes
            .get(..4)
            .map(|b| i32::from_ne_bytes(b.try_into().unwrap()))
            .ok_or(Status::OUT_OF_RESOURCES)?;
        match ExecState::from_wire(raw) {
            // The server settled first; the data has not landed here yet.
            ExecState::Complete if self.inner.transfer => Ok(ExecState::Running),
            other => Ok(other),
        }
    }

    /// Info query; everything but the execution status is known locally.
    pub fn info(&self, param: u32) -> crate::Result<Vec<u8>> {
        match param {
            info::EVENT_COMMAND_QUEUE => Ok(self
                .inner
                .queue
                .as_ref()
                .map(|q| q.remote())
                .unwrap_or(0)
                .to_ne_bytes()
                .to_vec()),
            info::EVENT_CONTEXT => Ok(self.inner.context_remote.to_ne_bytes().to_vec()),
            info::EVENT_COMMAND_TYPE => Ok(self.inner.command_type.to_ne_bytes().to_vec()),
            info::EVENT_REFERENCE_COUNT => Ok(self.refcount().to_ne_bytes().to_vec()),
            info::EVENT_COMMAND_EXECUTION_STATUS => {
                Ok(self.status()?.to_wire().to_ne_bytes().to_vec())
            }
            _ => self.info_remote(param),
        }
    }

    fn info_remote(&self, param: u32) -> crate::Result<Vec<u8>> {
        info_query(&self.inner.session, Command::GetEventInfo, |frame| {
            frame.put_handle(HandleKind::Event, self.inner.remote)?;
            frame.put_u32(param)
        })
    }

    /// Profiling counter, nanoseconds. For an asynchronous transfer that
    /// failed after submission, this is where the failure surfaces.
    pub fn profiling(&self, param: u32) -> crate::Result<u64> {
        let bytes = info_query(
            &self.inner.session,
            Command::GetEventProfilingInfo,
            |frame| {
                frame.put_handle(HandleKind::Event, self.inner.remote)?;
                frame.put_u32(param)
            },
        )?;
        bytes
            .get(..8)
            .map(|b| u64::from_ne_bytes(b.try_into().unwrap()))
            .ok_or(Status::PROFILING_INFO_NOT_AVAILABLE)
    }

    /// Set a user event's terminal status: `Ok(())` completes it, an
    /// error status fails it. Only user events accept this.
    pub fn set_status(&self, status: std::result::Result<(), Status>) -> crate::Result<()> {
        if self.inner.command_type != command_type::USER {
            return Err(Status::INVALID_EVENT);
        }
        let wire = match status {
            Ok(()) => 0,
            Err(Status(code)) if code < 0 => code,
            Err(_) => return Err(Status::INVALID_VALUE),
        };
        status_call(&self.inner.session, |frame| {
            frame.put_u32(Command::SetUserEventStatus.into())?;
            frame.put_handle(HandleKind::Event, self.inner.remote)?;
            frame.put_i32(wire)
        })?;
        self.finish_local(ExecState::from_wire(wire));
        Ok(())
    }

    /// A completion callback would have to be invoked from the server;
    /// registering one is refused, like every other callback over this
    /// transport.
    pub fn set_callback(
        &self,
        _state: ExecState,
        _callback: Box<dyn FnOnce(ExecState) + Send>,
    ) -> crate::Result<()> {
        Err(Status::INVALID_EVENT)
    }

    pub fn retain(&self) -> crate::Result<()> {
        let mut refs = self.inner.refs.lock().unwrap();
        if *refs == 0 {
            return Err(Status::INVALID_EVENT);
        }
        *refs += 1;
        Ok(())
    }

    /// Drop one reference. The last one severs this client's interest:
    /// the server-side release goes out even if a transfer referencing
    /// the event is still in flight — the transfer owns its own handle
    /// on the event and finishes regardless.
    pub fn release(&self) -> crate::Result<()> {
        let mut refs = self.inner.refs.lock().unwrap();
        match *refs {
            0 => Err(Status::INVALID_EVENT),
            1 => {
                *refs = 0;
                drop(refs);
                status_call(&self.inner.session, |frame| {
                    frame.put_u32(Command::ReleaseEvent.into())?;
                    frame.put_handle(HandleKind::Event, self.inner.remote)
                })
            }
            _ => {
                *refs -= 1;
                Ok(())
            }
        }
    }

    /// The local reference count.
    pub fn refcount(&self) -> u32 {
        *self.inner.refs.lock().unwrap()
    }

    /// Wait for this event alone.
    pub fn wait(&self) -> crate::Result<()> {
        wait_for_events(std::slice::from_ref(self))
    }
}

/// Block until every event in the list is complete (or failed). The wait
/// is routed to the events' server first, then gated on any local
/// transfer finalisation, so data is on the host by the time this
/// returns.
pub fn wait_for_events(events: &[Event]) -> crate::Result<()> {
    let Some(first) = events.first() else {
        return Err(Status::INVALID_VALUE);
    };
    if events.iter().any(|e| e.session() != first.session()) {
        return Err(Status::INVALID_CONTEXT);
    }

    // User events are completed by this client, possibly from another
    // thread. Waiting them out locally first keeps the transport free for
    // the set-status call; the server-side wait below then returns
    // promptly.
    let mut result = Ok(());
    for e in events {
        if e.command_type() == command_type::USER {
            if let ExecState::Error(status) = e.wait_local() {
                result = Err(status);
            }
        }
    }

    status_call(first.session(), |frame| {
        frame.put_u32(Command::WaitForEvents.into())?;
        frame.put_u32(events.len() as u32)?;
        for e in events {
            frame.put_handle(HandleKind::Event, e.remote())?;
        }
        Ok(())
    })?;

    // And only now the transfers: their events may settle locally after
    // the server settles its half, and a wait must not return before the
    // data is actually on the host.
    for e in events {
        if e.inner.transfer {
            if let ExecState::Error(status) = e.wait_local() {
                result = Err(status);
            }
        }
    }
    result
}

impl Session {
    /// Create a user event: the one kind of event the client completes.
    pub fn create_user_event(&self, context: &Context) -> crate::Result<Event> {
        if context.session() != self {
            return Err(Status::INVALID_CONTEXT);
        }
        let remote = self.call(
            |frame| {
                frame.put_u32(Command::CreateUserEvent.into())?;
                frame.put_handle(HandleKind::Context, context.remote())
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                s.get_handle(HandleKind::Event)
            },
        )?;
        Ok(Event::new(
            self,
            remote,
            None,
            context.remote(),
            command_type::USER,
            false,
            ExecState::Submitted,
        ))
    }
}
