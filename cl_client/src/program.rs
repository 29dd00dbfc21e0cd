// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Programs.
//!
//! Build, compile and link are synchronous over this transport, and the
//! notification callbacks the API optionally takes cannot be delivered —
//! registering one fails before anything is sent. Retain and release
//! both forward to the server, so the runtime's count tracks the local
//! one exactly.

use std::sync::{Arc, Mutex};

use cl_protocol::types::info;
use cl_protocol::wire::{WireRead, WireWrite};
use cl_protocol::{Command, HandleKind, Status};

use crate::context::Context;
use crate::platform::{bytes_to_string, info_query, status_call, Device};
use crate::session::Session;

pub(crate) struct ProgramInner {
    pub(crate) session: Session,
    pub(crate) remote: u64,
    refs: Mutex<u32>,
    pub(crate) context: Context,
    pub(crate) devices: Vec<Device>,
    pub(crate) source: Option<String>,
}

#[derive(Clone)]
pub struct Program {
    pub(crate) inner: Arc<ProgramInner>,
}

/// The signature of a build/compile/link notification callback; see the
/// module docs for why these are refused.
pub type BuildNotify = Box<dyn FnMut() + Send>;

impl Context {
    pub fn create_program_with_source(&self, sources: &[&str]) -> crate::Result<Program> {
        if sources.is_empty() {
            return Err(Status::INVALID_VALUE);
        }
        let remote = self.session().call(
            |frame| {
                frame.put_u32(Command::CreateProgramWithSource.into())?;
                frame.put_handle(HandleKind::Context, self.remote())?;
                frame.put_u32(sources.len() as u32)?;
                for src in sources {
                    frame.put_string(src)?;
                }
                Ok(())
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                s.get_handle(HandleKind::Program)
            },
        )?;

        Ok(Program {
            inner: Arc::new(ProgramInner {
                session: self.session().clone(),
                remote,
                refs: Mutex::new(1),
                context: self.clone(),
                devices: self.devices().to_vec(),
                source: Some(sources.concat()),
            }),
        })
    }

    /// Load per-device binaries. On success the second element carries
    /// each binary's load status.
    pub fn create_program_with_binary(
        &self,
        binaries: &[(Device, Vec<u8>)],
    ) -> crate::Result<(Program, Vec<Status>)> {
        if binaries.is_empty() {
            return Err(Status::INVALID_VALUE);
        }
        if binaries.iter().any(|(d, _)| d.session() != self.session()) {
            return Err(Status::INVALID_DEVICE);
        }

        let (remote, statuses) = self.session().call(
            |frame| {
                frame.put_u32(Command::CreateProgramWithBinary.into())?;
                frame.put_handle(HandleKind::Context, self.remote())?;
                frame.put_u32(binaries.len() as u32)?;
                for (device, _) in binaries {
                    frame.put_handle(HandleKind::Device, device.remote())?;
                }
                for (_, binary) in binaries {
                    frame.put_blob(binary)?;
                }
                Ok(())
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                let remote = s.get_handle(HandleKind::Program)?;
                let mut statuses = Vec::new();
                for _ in 0..binaries.len() {
                    statuses.push(s.get_status()?);
                }
                Ok((remote, statuses))
            },
        )?;

        let program = Program {
            inner: Arc::new(ProgramInner {
                session: self.session().clone(),
                remote,
                refs: Mutex::new(1),
                context: self.clone(),
                devices: binaries.iter().map(|(d, _)| d.clone()).collect(),
                source: None,
            }),
        };
        Ok((program, statuses))
    }

    pub fn create_program_with_builtin_kernels(
        &self,
        devices: &[Device],
        kernel_names: &str,
    ) -> crate::Result<Program> {
        if devices.is_empty() {
            return Err(Status::INVALID_VALUE);
        }
        let remote = self.session().call(
            |frame| {
                frame.put_u32(Command::CreateProgramWithBuiltInKernels.into())?;
                frame.put_handle(HandleKind::Context, self.remote())?;
                frame.put_u32(devices.len() as u32)?;
                for d in devices {
                    frame.put_handle(HandleKind::Device, d.remote())?;
                }
                frame.put_string(kernel_names)
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                s.get_handle(HandleKind::Program)
            },
        )?;

        Ok(Program {
            inner: Arc::new(ProgramInner {
                session: self.session().clone(),
                remote,
                refs: Mutex::new(1),
                context: self.clone(),
                devices: devices.to_vec(),
                source: None,
            }),
        })
    }

    /// Link compiled programs into a new one. An empty program list is an
    /// invalid argument, reported as such.
    pub fn link_program(
        &self,
        devices: &[Device],
        options: &str,
        programs: &[Program],
    ) -> crate::Result<Program> {
        if programs.is_empty() {
            return Err(Status::INVALID_VALUE);
        }
        let remote = self.session().call(
            |frame| {
                frame.put_u32(Command::LinkProgram.into())?;
                frame.put_handle(HandleKind::Context, self.remote())?;
                frame.put_u32(devices.len() as u32)?;
                for d in devices {
                    frame.put_handle(HandleKind::Device, d.remote())?;
                }
                frame.put_string(options)?;
                frame.put_u32(programs.len() as u32)?;
                for p in programs {
                    frame.put_handle(HandleKind::Program, p.remote())?;
                }
                Ok(())
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                s.get_handle(HandleKind::Program)
            },
        )?;

        Ok(Program {
            inner: Arc::new(ProgramInner {
                session: self.session().clone(),
                remote,
                refs: Mutex::new(1),
                context: self.clone(),
                devices: devices.to_vec(),
                source: None,
            }),
        })
    }

    pub fn link_program_with_notify(
        &self,
        _devices: &[Device],
        _options: &str,
        _programs: &[Program],
        _notify: BuildNotify,
    ) -> crate::Result<Program> {
        Err(Status::OUT_OF_RESOURCES)
    }
}

impl Program {
    pub(crate) fn remote(&self) -> u64 {
        self.inner.remote
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    fn put_device_list(frame: &mut Vec<u8>, devices: &[Device]) -> std::io::Result<()> {
        frame.put_u32(devices.len() as u32)?;
        for d in devices {
            frame.put_handle(HandleKind::Device, d.remote())?;
        }
        Ok(())
    }

    /// Build for `devices` (empty = every device the program knows).
    pub fn build(&self, devices: &[Device], options: &str) -> crate::Result<()> {
        status_call(&self.inner.session, |frame| {
            frame.put_u32(Command::BuildProgram.into())?;
            frame.put_handle(HandleKind::Program, self.inner.remote)?;
            Self::put_device_list(frame, devices)?;
            frame.put_string(options)
        })
    }

    pub fn build_with_notify(
        &self,
        _devices: &[Device],
        _options: &str,
        _notify: BuildNotify,
    ) -> crate::Result<()> {
        Err(Status::OUT_OF_RESOURCES)
    }

    pub fn compile(
        &self,
        devices: &[Device],
        options: &str,
        headers: &[(&str, &Program)],
    ) -> crate::Result<()> {
        status_call(&self.inner.session, |frame| {
            frame.put_u32(Command::CompileProgram.into())?;
            frame.put_handle(HandleKind::Program, self.inner.remote)?;
            Self::put_device_list(frame, devices)?;
            frame.put_string(options)?;
            frame.put_u32(headers.len() as u32)?;
            for (name, header) in headers {
                frame.put_string(name)?;
                frame.put_handle(HandleKind::Program, header.remote())?;
            }
            Ok(())
        })
    }

    pub fn compile_with_notify(
        &self,
        _devices: &[Device],
        _options: &str,
        _headers: &[(&str, &Program)],
        _notify: BuildNotify,
    ) -> crate::Result<()> {
        Err(Status::OUT_OF_RESOURCES)
    }

    /// Info query; the source and the device list are cached locally.
    pub fn info(&self, param: u32) -> crate::Result<Vec<u8>> {
        match param {
            info::PROGRAM_CONTEXT => Ok(self.inner.context.remote().to_ne_bytes().to_vec()),
            info::PROGRAM_NUM_DEVICES => {
                Ok((self.inner.devices.len() as u32).to_ne_bytes().to_vec())
            }
            info::PROGRAM_DEVICES => Ok(self
                .inner
                .devices
                .iter()
                .flat_map(|d| d.remote().to_ne_bytes())
                .collect()),
            info::PROGRAM_REFERENCE_COUNT => Ok(self.refcount().to_ne_bytes().to_vec()),
            info::PROGRAM_SOURCE => match &self.inner.source {
                Some(src) => {
                    let mut v = src.as_bytes().to_vec();
                    v.push(0);
                    Ok(v)
                }
                None => Ok(vec![0]),
            },
            _ => self.info_remote(param),
        }
    }

    fn info_remote(&self, param: u32) -> crate::Result<Vec<u8>> {
        info_query(&self.inner.session, Command::GetProgramInfo, |frame| {
            frame.put_handle(HandleKind::Program, self.inner.remote)?;
            frame.put_u32(param)
        })
    }

    pub fn build_info(&self, device: &Device, param: u32) -> crate::Result<Vec<u8>> {
        info_query(&self.inner.session, Command::GetProgramBuildInfo, |frame| {
            frame.put_handle(HandleKind::Program, self.inner.remote)?;
            frame.put_handle(HandleKind::Device, device.remote())?;
            frame.put_u32(param)
        })
    }

    pub fn build_log(&self, device: &Device) -> crate::Result<String> {
        self.build_info(device, info::PROGRAM_BUILD_LOG)
            .map(bytes_to_string)
    }

    /// Retain forwards to the server, unlike the purely-local retain of
    /// the other kinds, so release must forward symmetrically on every
    /// call for the runtime's count to come back down.
    pub fn retain(&self) -> crate::Result<()> {
        let mut refs = self.inner.refs.lock().unwrap();
        if *refs == 0 {
            return Err(Status::INVALID_PROGRAM);
        }
        status_call(&self.inner.session, |frame| {
            frame.put_u32(Command::RetainProgram.into())?;
            frame.put_handle(HandleKind::Program, self.inner.remote)
        })?;
        *refs += 1;
        Ok(())
    }

    pub fn release(&self) -> crate::Result<()> {
        let mut refs = self.inner.refs.lock().unwrap();
        if *refs == 0 {
            return Err(Status::INVALID_PROGRAM);
        }
        status_call(&self.inner.session, |frame| {
            frame.put_u32(Command::ReleaseProgram.into())?;
            frame.put_handle(HandleKind::Program, self.inner.remote)
        })?;
        *refs -= 1;
        Ok(())
    }

    /// The local reference count.
    pub fn refcount(&self) -> u32 {
        *self.inner.refs.lock().unwrap()
    }
}
