// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Command queues. Lifecycle and queries live here; the enqueue surface
//! is in `enqueue.rs`.

use std::sync::{Arc, Mutex};

use cl_protocol::types::info;
use cl_protocol::wire::{WireRead, WireWrite};
use cl_protocol::{Command, HandleKind, Status};

use crate::context::Context;
use crate::platform::{info_query, status_call, Device};
use crate::session::Session;

pub(crate) struct QueueInner {
    pub(crate) session: Session,
    pub(crate) remote: u64,
    refs: Mutex<u32>,
    pub(crate) context: Context,
    pub(crate) device: Device,
    pub(crate) properties: u64,
}

#[derive(Clone)]
pub struct Queue {
    pub(crate) inner: Arc<QueueInner>,
}

impl Context {
    pub fn create_queue(&self, device: &Device, properties: u64) -> crate::Result<Queue> {
        if device.session() != self.session() {
            return Err(Status::INVALID_DEVICE);
        }
        if !self
            .devices()
            .iter()
            .any(|d| d.remote() == device.remote())
        {
            return Err(Status::INVALID_DEVICE);
        }

        let remote = self.session().call(
            |frame| {
                frame.put_u32(Command::CreateCommandQueue.into())?;
                frame.put_handle(HandleKind::Context, self.remote())?;
                frame.put_handle(HandleKind::Device, device.remote())?;
                frame.put_u64(properties)
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                s.get_handle(HandleKind::CommandQueue)
            },
        )?;

        Ok(Queue {
            inner: Arc::new(QueueInner {
                session: self.session().clone(),
                remote,
                refs: Mutex::new(1),
                context: self.clone(),
                device: device.clone(),
                properties,
            }),
        })
    }
}

impl Queue {
    pub(crate) fn session(&self) -> &Session {
        &self.inner.session
    }

    pub(crate) fn remote(&self) -> u64 {
        self.inner.remote
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    /// Info query; context, device, properties, and the reference count
    /// are all known locally.
    pub fn info(&self, param: u32) -> crate::Result<Vec<u8>> {
        match param {
            info::QUEUE_CONTEXT => Ok(self.inner.context.remote().to_ne_bytes().to_vec()),
            info::QUEUE_DEVICE => Ok(self.inner.device.remote().to_ne_bytes().to_vec()),
            info::QUEUE_PROPERTIES => Ok(self.inner.properties.to_ne_bytes().to_vec()),
            info::QUEUE_REFERENCE_COUNT => Ok(self.refcount().to_ne_bytes().to_vec()),
            _ => info_query(&self.inner.session, Command::GetCommandQueueInfo, |frame| {
                frame.put_handle(HandleKind::CommandQueue, self.inner.remote)?;
                frame.put_u32(param)
            }),
        }
    }

    /// Push all queued commands towards the device.
    pub fn flush(&self) -> crate::Result<()> {
        status_call(&self.inner.session, |frame| {
            frame.put_u32(Command::Flush.into())?;
            frame.put_handle(HandleKind::CommandQueue, self.inner.remote)
        })
    }

    /// Block until every queued command has completed.
    pub fn finish(&self) -> crate::Result<()> {
        status_call(&self.inner.session, |frame| {
            frame.put_u32(Command::Finish.into())?;
            frame.put_handle(HandleKind::CommandQueue, self.inner.remote)
        })
    }

    pub fn retain(&self) -> crate::Result<()> {
        let mut refs = self.inner.refs.lock().unwrap();
        if *refs == 0 {
            return Err(Status::INVALID_COMMAND_QUEUE);
        }
        *refs += 1;
        Ok(())
    }

    pub fn release(&self) -> crate::Result<()> {
        let mut refs = self.inner.refs.lock().unwrap();
        match *refs {
            0 => Err(Status::INVALID_COMMAND_QUEUE),
            1 => {
                *refs = 0;
                drop(refs);
                status_call(&self.inner.session, |frame| {
                    frame.put_u32(Command::ReleaseCommandQueue.into())?;
                    frame.put_handle(HandleKind::CommandQueue, self.inner.remote)
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
