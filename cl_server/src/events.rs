// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Server-side event wrappers.
//!
//! Every event a client can name is one of these: it pairs the wire
//! identity with the local lifecycle (submitted → running → complete /
//! error) and, once the work has actually been issued, the runtime's own
//! event handle. The split exists because an asynchronous bulk transfer is
//! accepted — and its event handed to the client — before any runtime call
//! happens; the transfer worker settles the event later, possibly racing a
//! release from the dispatcher thread. The state is therefore behind a
//! mutex/condvar pair, and the table hands out `Arc`s so a worker keeps
//! its event alive after the client has dropped all interest.

use std::sync::{Arc, Condvar, Mutex};

use cl_protocol::{ExecState, Status};

use crate::runtime::{RtEvent, Runtime};

#[derive(Debug)]
pub struct SrvEvent {
    pub id: u64,
    pub context: u64,
    /// Null for user events.
    pub queue: Option<u64>,
    pub command_type: u32,
    state: Mutex<Inner>,
    cond: Condvar,
}

#[derive(Debug)]
struct Inner {
    exec: ExecState,
    rt: Option<RtEvent>,
}

impl SrvEvent {
    pub fn submitted(id: u64, context: u64, queue: Option<u64>, command_type: u32) -> Arc<Self> {
        Arc::new(Self {
            id,
            context,
            queue,
            command_type,
            state: Mutex::new(Inner {
                exec: ExecState::Submitted,
                rt: None,
            }),
            cond: Condvar::new(),
        })
    }

    /// An event whose command already ran on the dispatcher thread.
    pub fn completed(
        id: u64,
        context: u64,
        queue: Option<u64>,
        command_type: u32,
        rt: RtEvent,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            context,
            queue,
            command_type,
            state: Mutex::new(Inner {
                exec: ExecState::Complete,
                rt: Some(rt),
            }),
            cond: Condvar::new(),
        })
    }

    pub fn exec_state(&self) -> ExecState {
        self.state.lock().unwrap().exec
    }

    pub fn rt_event(&self) -> Option<RtEvent> {
        self.state.lock().unwrap().rt
    }

    pub fn set_running(&self) {
        let mut st = self.state.lock().unwrap();
        if st.exec == ExecState::Submitted {
            st.exec = ExecState::Running;
        }
    }

    /// Attach the runtime event once the work has been issued.
    pub fn attach_rt(&self, rt: RtEvent) {
        self.state.lock().unwrap().rt = Some(rt);
    }

    pub fn finish(&self, exec: ExecState) {
        let mut st = self.state.lock().unwrap();
        if !st.exec.is_settled() {
            st.exec = exec;
            self.cond.notify_all();
        }
    }

    /// Block until this event settles: first the local lifecycle, then —
    /// if the work produced a runtime event — the runtime's own notion of
    /// done, so completion is never reported ahead of the device.
    pub fn wait(&self, runtime: &dyn Runtime) -> Result<(), Status> {
        let rt = {
            let mut st = self.state.lock().unwrap();
            while !st.exec.is_settled() {
                st = self.cond.wait(st).unwrap();
            }
            if let ExecState::Error(status) = st.exec {
                return Err(status);
            }
            st.rt
        };
        if let Some(rt) = rt {
            runtime.wait_events(&[rt])?;
        }
        Ok(())
    }

    /// Release the runtime half, if any. Called when the table entry goes
    /// away; the `Arc` itself may outlive this in a transfer worker.
    pub fn release_rt(&self, runtime: &dyn Runtime) {
        if let Some(rt) = self.state.lock().unwrap().rt.take() {
            let _ = runtime.release_event(rt);
        }
    }
}

/// Wait every member of a wait-list. Events created by this server settle
/// through [`SrvEvent::wait`]; their runtime halves are then waited through
/// the runtime itself, which covers natively-created dependencies too.
pub fn wait_all(events: &[Arc<SrvEvent>], runtime: &dyn Runtime) -> Result<(), Status> {
    for ev in events {
        ev.wait(runtime)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::soft::SoftRuntime;

    #[test]
    fn settle_unblocks_waiters() {
        let ev = SrvEvent::submitted(1, 1, Some(2), cl_protocol::types::command_type::READ_BUFFER);
        let waiter = {
            let ev = Arc::clone(&ev);
            std::thread::spawn(move || ev.wait(&SoftRuntime::new()))
        };
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(!waiter.is_finished());
        ev.finish(ExecState::Complete);
        waiter.join().unwrap().unwrap();
        assert_eq!(ev.exec_state(), ExecState::Complete);
    }

    #[test]
    fn error_is_sticky_and_propagates() {
        let rt = SoftRuntime::new();
        let ev = SrvEvent::submitted(1, 1, None, cl_protocol::types::command_type::USER);
        ev.finish(ExecState::Error(Status::INVALID_OPERATION));
        // A later finish cannot overwrite a settled state.
        ev.finish(ExecState::Complete);
        assert_eq!(
            ev.wait(&rt).unwrap_err(),
            Status::INVALID_OPERATION
        );
    }
}
