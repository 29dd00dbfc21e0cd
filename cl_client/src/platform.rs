// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Platforms and devices.

use std::sync::{Arc, Mutex};

use cl_protocol::types::info;
use cl_protocol::wire::{WireRead, WireWrite};
use cl_protocol::{Command, HandleKind, Status};

use crate::session::Session;

/// A platform the server exposes. Platforms are discovered, not created,
/// and carry no reference count.
#[derive(Clone)]
pub struct Platform {
    pub(crate) session: Session,
    pub(crate) remote: u64,
}

impl Session {
    /// List the server's platforms.
    pub fn platforms(&self) -> crate::Result<Vec<Platform>> {
        let remotes = self.call(
            |frame| frame.put_u32(Command::GetPlatformIds.into()),
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                let n = s.get_u32()? as usize;
                s.get_handles(HandleKind::Platform, n)
            },
        )?;
        Ok(remotes
            .into_iter()
            .map(|remote| Platform {
                session: self.clone(),
                remote,
            })
            .collect())
    }
}

impl Platform {
    /// Raw info query; the typed accessors below cover the common ones.
    pub fn info(&self, param: u32) -> crate::Result<Vec<u8>> {
        info_query(&self.session, Command::GetPlatformInfo, |frame| {
            frame.put_handle(HandleKind::Platform, self.remote)?;
            frame.put_u32(param)
        })
    }

    pub fn name(&self) -> crate::Result<String> {
        self.info(info::PLATFORM_NAME).map(bytes_to_string)
    }

    pub fn vendor(&self) -> crate::Result<String> {
        self.info(info::PLATFORM_VENDOR).map(bytes_to_string)
    }

    pub fn version(&self) -> crate::Result<String> {
        self.info(info::PLATFORM_VERSION).map(bytes_to_string)
    }

    /// List devices of the given type (a `device_type` bit mask).
    pub fn devices(&self, device_type: u64) -> crate::Result<Vec<Device>> {
        let remotes = self.session.call(
            |frame| {
                frame.put_u32(Command::GetDeviceIds.into())?;
                frame.put_handle(HandleKind::Platform, self.remote)?;
                frame.put_u64(device_type)
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                let n = s.get_u32()? as usize;
                s.get_handles(HandleKind::Device, n)
            },
        )?;
        Ok(remotes
            .into_iter()
            .map(|remote| Device::new(self.session.clone(), remote))
            .collect())
    }

    /// Ask the server's runtime to drop its compiler caches.
    pub fn unload_compiler(&self) -> crate::Result<()> {
        status_call(&self.session, |frame| {
            frame.put_u32(Command::UnloadPlatformCompiler.into())?;
            frame.put_handle(HandleKind::Platform, self.remote)
        })
    }
}

pub(crate) struct DeviceInner {
    pub(crate) session: Session,
    pub(crate) remote: u64,
    refs: Mutex<u32>,
}

/// A device, root or partitioned. Sub-devices carry the usual reference
/// count; retain/release on a root device is accepted and does nothing
/// runtime-visible.
#[derive(Clone)]
pub struct Device {
    pub(crate) inner: Arc<DeviceInner>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("remote", &self.inner.remote)
            .finish()
    }
}

impl Device {
    pub(crate) fn new(session: Session, remote: u64) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                session,
                remote,
                refs: Mutex::new(1),
            }),
        }
    }

    pub(crate) fn session(&self) -> &Session {
        &self.inner.session
    }

    pub(crate) fn remote(&self) -> u64 {
        self.inner.remote
    }

    pub fn info(&self, param: u32) -> crate::Result<Vec<u8>> {
        info_query(&self.inner.session, Command::GetDeviceInfo, |frame| {
            frame.put_handle(HandleKind::Device, self.inner.remote)?;
            frame.put_u32(param)
        })
    }

    pub fn name(&self) -> crate::Result<String> {
        self.info(info::DEVICE_NAME).map(bytes_to_string)
    }

    /// Whether the runtime can compile source for this device.
    pub fn compiler_available(&self) -> crate::Result<bool> {
        let bytes = self.info(info::DEVICE_COMPILER_AVAILABLE)?;
        Ok(bytes.first().copied().unwrap_or(0) != 0)
    }

    /// Partition this device.
    pub fn create_sub_devices(&self, properties: &[u64]) -> crate::Result<Vec<Device>> {
        let remotes = self.inner.session.call(
            |frame| {
                frame.put_u32(Command::CreateSubDevices.into())?;
                frame.put_handle(HandleKind::Device, self.inner.remote)?;
                frame.put_u32(properties.len() as u32)?;
                frame.put_size_array(properties)
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                let n = s.get_u32()? as usize;
                s.get_handles(HandleKind::Device, n)
            },
        )?;
        Ok(remotes
            .into_iter()
            .map(|remote| Device::new(self.inner.session.clone(), remote))
            .collect())
    }

    pub fn retain(&self) -> crate::Result<()> {
        let mut refs = self.inner.refs.lock().unwrap();
        if *refs == 0 {
            return Err(Status::INVALID_DEVICE);
        }
        *refs += 1;
        Ok(())
    }

    pub fn release(&self) -> crate::Result<()> {
        let mut refs = self.inner.refs.lock().unwrap();
        match *refs {
            0 => Err(Status::INVALID_DEVICE),
            1 => {
                *refs = 0;
                drop(refs);
                status_call(&self.inner.session, |frame| {
                    frame.put_u32(Command::ReleaseDevice.into())?;
                    frame.put_handle(HandleKind::Device, self.inner.remote)
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

/// Strip the trailing NUL an info string carries and lossily decode it.
pub(crate) fn bytes_to_string(mut bytes: Vec<u8>) -> String {
    if bytes.last() == Some(&0) {
        bytes.pop();
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// The request/reply shape of every info query.
pub(crate) fn info_query(
    session: &Session,
    command: Command,
    build: impl FnOnce(&mut Vec<u8>) -> std::io::Result<()>,
) -> crate::Result<Vec<u8>> {
    session.call(
        |frame| {
            frame.put_u32(command.into())?;
            build(frame)
        },
        |stream| {
            let mut s = stream;
            s.get_status()?.ok()?;
            let len = s.get_size()? as usize;
            Ok(s.get_bytes(len)?)
        },
    )
}

/// A command whose reply is a bare status.
pub(crate) fn status_call(
    session: &Session,
    build: impl FnOnce(&mut Vec<u8>) -> std::io::Result<()>,
) -> crate::Result<()> {
    session.call(build, |stream| {
        let mut s = stream;
        s.get_status()?.ok()?;
        Ok(())
    })
}
