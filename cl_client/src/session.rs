// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! One server peer: the control connection, the callbacks stream, and the
//! list of live events.

use log::*;

use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, Weak};

use cl_protocol::wire::{send_frame, WireRead};
use cl_protocol::{Error, Status};

use crate::event::EventInner;

/// A connection to one server. Cheap to clone; all clones share the
/// transport.
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    /// Where the control connection went; data connections go to the same
    /// host on whatever port a reply names.
    addr: SocketAddr,
    /// The request/reply stream. Commands hold this lock across the full
    /// exchange, so replies never interleave. `None` once the transport
    /// has failed.
    stream: Mutex<Option<TcpStream>>,
    /// Reserved for server→client notifications. Nothing reads it today;
    /// holding it open is what keeps the channel alive.
    #[allow(dead_code)]
    callbacks: TcpStream,
    /// Live events created through this session, for bookkeeping across
    /// tables. Guarded by its own mutex because transfer workers touch
    /// events in parallel with API calls.
    pub(crate) events: Mutex<Vec<Weak<EventInner>>>,
}

impl Session {
    /// Connect to a server. Session setup opens the control stream, then
    /// the callbacks stream on the port the server names in its greeting.
    pub fn connect(addr: impl ToSocketAddrs) -> std::io::Result<Session> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or(std::io::ErrorKind::AddrNotAvailable)?;
        let stream = TcpStream::connect(addr)?;

        let callbacks_port = (&stream).get_u32()? as u16;
        let callbacks = TcpStream::connect((addr.ip(), callbacks_port))?;
        debug!("session with {addr} established, callbacks stream on port {callbacks_port}");

        Ok(Session {
            inner: Arc::new(SessionInner {
                addr,
                stream: Mutex::new(Some(stream)),
                callbacks,
                events: Mutex::new(Vec::new()),
            }),
        })
    }

    pub(crate) fn server_ip(&self) -> IpAddr {
        self.inner.addr.ip()
    }

    /// Count of live events, for diagnostics.
    pub fn live_events(&self) -> usize {
        let mut events = self.inner.events.lock().unwrap();
        events.retain(|w| w.strong_count() > 0);
        events.len()
    }

    pub(crate) fn register_event(&self, event: &Arc<EventInner>) {
        let mut events = self.inner.events.lock().unwrap();
        events.retain(|w| w.strong_count() > 0);
        events.push(Arc::downgrade(event));
    }

    /// One full request/reply exchange. `build` assembles the request
    /// frame; `read` decodes the reply from the stream (including any
    /// inline payload). The per-session lock is held across both.
    pub(crate) fn call<T>(
        &self,
        build: impl FnOnce(&mut Vec<u8>) -> std::io::Result<()>,
        read: impl FnOnce(&TcpStream) -> std::result::Result<T, Error>,
    ) -> crate::Result<T> {
        self.call_inner(build, None, read)
    }

    /// Like [`Session::call`], with a bulk payload packed onto the wire
    /// right behind the request frame.
    pub(crate) fn call_with_payload<T>(
        &self,
        build: impl FnOnce(&mut Vec<u8>) -> std::io::Result<()>,
        payload: &[u8],
        read: impl FnOnce(&TcpStream) -> std::result::Result<T, Error>,
    ) -> crate::Result<T> {
        self.call_inner(build, Some(payload), read)
    }

    fn call_inner<T>(
        &self,
        build: impl FnOnce(&mut Vec<u8>) -> std::io::Result<()>,
        payload: Option<&[u8]>,
        read: impl FnOnce(&TcpStream) -> std::result::Result<T, Error>,
    ) -> crate::Result<T> {
        let mut guard = self.inner.stream.lock().unwrap();
        let Some(stream) = guard.as_ref() else {
            // The transport died earlier; nothing can be sent any more.
            return Err(Status::OUT_OF_HOST_MEMORY);
        };

        let mut frame = Vec::new();
        if build(&mut frame).is_err() {
            return Err(Status::OUT_OF_RESOURCES);
        }

        let sent = send_frame(stream, &frame, payload.is_some()).and_then(|()| match payload {
            Some(data) => cl_protocol::pack::write_pack(&mut (&*stream), data),
            None => Ok(()),
        });
        if let Err(e) = sent {
            warn!("transport to {} failed: {e}", self.inner.addr);
            *guard = None;
            return Err(Status::OUT_OF_RESOURCES);
        }

        match read(stream) {
            Ok(v) => Ok(v),
            // A status reply is a healthy exchange; the error is the
            // server's verdict, not the transport's.
            Err(Error::Api(status)) => Err(status),
            Err(e) => {
                warn!("transport to {} failed: {e}", self.inner.addr);
                *guard = None;
                Err(Status::OUT_OF_RESOURCES)
            }
        }
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
