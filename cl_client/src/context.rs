// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Contexts.

use std::sync::{Arc, Mutex};

use cl_protocol::types::info;
use cl_protocol::wire::{WireRead, WireWrite};
use cl_protocol::{Command, HandleKind, Status};

use crate::platform::{status_call, Device, Platform};
use crate::session::Session;

pub(crate) struct ContextInner {
    pub(crate) session: Session,
    pub(crate) remote: u64,
    refs: Mutex<u32>,
    pub(crate) devices: Vec<Device>,
    pub(crate) platform: Option<Platform>,
}

#[derive(Clone)]
pub struct Context {
    pub(crate) inner: Arc<ContextInner>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("remote", &self.inner.remote)
            .finish()
    }
}

/// The signature of a context error callback. The protocol cannot call
/// back into client code, so any attempt to register one is refused
/// before transmission.
pub type ContextNotify = Box<dyn FnMut(&str) + Send>;

fn put_properties(frame: &mut Vec<u8>, platform: Option<&Platform>) -> std::io::Result<()> {
    match platform {
        Some(p) => {
            frame.put_u32(1)?;
            frame.put_u32(info::CONTEXT_PLATFORM)?;
            frame.put_handle(HandleKind::Platform, p.remote)
        }
        None => frame.put_u32(0),
    }
}

impl Session {
    /// Create a context over `devices`, optionally pinned to a platform.
    pub fn create_context(
        &self,
        devices: &[Device],
        platform: Option<&Platform>,
    ) -> crate::Result<Context> {
        if devices.is_empty() {
            return Err(Status::INVALID_VALUE);
        }
        if devices.iter().any(|d| d.session() != self) {
            return Err(Status::INVALID_DEVICE);
        }
        if let Some(p) = platform {
            if &p.session != self {
                return Err(Status::INVALID_PLATFORM);
            }
        }

        let remote = self.call(
            |frame| {
                frame.put_u32(Command::CreateContext.into())?;
                put_properties(frame, platform)?;
                frame.put_u32(devices.len() as u32)?;
                for d in devices {
                    frame.put_handle(HandleKind::Device, d.remote())?;
                }
                Ok(())
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                s.get_handle(HandleKind::Context)
            },
        )?;

        Ok(Context {
            inner: Arc::new(ContextInner {
                session: self.clone(),
                remote,
                refs: Mutex::new(1),
                devices: devices.to_vec(),
                platform: platform.cloned(),
            }),
        })
    }

    /// Like [`Session::create_context`] with a caller-supplied error
    /// callback — which this transport cannot deliver, so the call is
    /// refused.
    pub fn create_context_with_notify(
        &self,
        _devices: &[Device],
        _platform: Option<&Platform>,
        _notify: ContextNotify,
    ) -> crate::Result<Context> {
        Err(Status::OUT_OF_RESOURCES)
    }

    /// Create a context from a device-type selector.
    pub fn create_context_from_type(
        &self,
        platform: Option<&Platform>,
        device_type: u64,
    ) -> crate::Result<Context> {
        if let Some(p) = platform {
            if &p.session != self {
                return Err(Status::INVALID_PLATFORM);
            }
        }

        let remote = self.call(
            |frame| {
                frame.put_u32(Command::CreateContextFromType.into())?;
                put_properties(frame, platform)?;
                frame.put_u64(device_type)
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                s.get_handle(HandleKind::Context)
            },
        )?;

        // The device list is the server's choice here; fetch it up front
        // so the local descriptor answers device queries like any other
        // context.
        let bytes =
            crate::platform::info_query(self, Command::GetContextInfo, |frame| {
                frame.put_handle(HandleKind::Context, remote)?;
                frame.put_u32(info::CONTEXT_DEVICES)
            })?;
        let devices = bytes
            .chunks_exact(8)
            .map(|c| {
                let id = u64::from_ne_bytes(c.try_into().unwrap());
                Device::new(self.clone(), id)
            })
            .collect();

        Ok(Context {
            inner: Arc::new(ContextInner {
                session: self.clone(),
                remote,
                refs: Mutex::new(1),
                devices,
                platform: platform.cloned(),
            }),
        })
    }
}

impl Context {
    pub(crate) fn session(&self) -> &Session {
        &self.inner.session
    }

    pub(crate) fn remote(&self) -> u64 {
        self.inner.remote
    }

    /// The devices the context spans, from the local descriptor.
    pub fn devices(&self) -> &[Device] {
        &self.inner.devices
    }

    /// Info query. The device list, property list and reference count are
    /// answered locally; anything else goes to the server.
    pub fn info(&self, param: u32) -> crate::Result<Vec<u8>> {
        match param {
            info::CONTEXT_DEVICES => Ok(self
                .inner
                .devices
                .iter()
                .flat_map(|d| d.remote().to_ne_bytes())
                .collect()),
            info::CONTEXT_NUM_DEVICES => {
                Ok((self.inner.devices.len() as u32).to_ne_bytes().to_vec())
            }
            info::CONTEXT_REFERENCE_COUNT => Ok(self.refcount().to_ne_bytes().to_vec()),
            info::CONTEXT_PROPERTIES => match &self.inner.platform {
                Some(p) => Ok([info::CONTEXT_PLATFORM as u64, p.remote, 0]
                    .iter()
                    .flat_map(|v| v.to_ne_bytes())
                    .collect()),
                None => Ok(Vec::new()),
            },
            _ => self.info_remote(param),
        }
    }

    fn info_remote(&self, param: u32) -> crate::Result<Vec<u8>> {
        crate::platform::info_query(&self.inner.session, Command::GetContextInfo, |frame| {
            frame.put_handle(HandleKind::Context, self.inner.remote)?;
            frame.put_u32(param)
        })
    }

    pub fn retain(&self) -> crate::Result<()> {
        let mut refs = self.inner.refs.lock().unwrap();
        if *refs == 0 {
            return Err(Status::INVALID_CONTEXT);
        }
        *refs += 1;
        Ok(())
    }

    pub fn release(&self) -> crate::Result<()> {
        let mut refs = self.inner.refs.lock().unwrap();
        match *refs {
            0 => Err(Status::INVALID_CONTEXT),
            1 => {
                *refs = 0;
                drop(refs);
                status_call(&self.inner.session, |frame| {
                    frame.put_u32(Command::ReleaseContext.into())?;
                    frame.put_handle(HandleKind::Context, self.inner.remote)
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
}
