// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Kernels and kernel-argument rewriting.
//!
//! An argument naming a memory object or a sampler cannot cross the wire
//! as raw bytes: the value only means something as the paired remote
//! identity. Setting such an argument queries (and caches) the
//! argument's address qualifier and type name, substitutes the identity,
//! and transmits it tagged with what it is. Setting an argument to the
//! value it already has is answered locally without a round-trip.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use cl_protocol::command::kernel_arg;
use cl_protocol::types::{arg_address, info};
use cl_protocol::wire::{WireRead, WireWrite};
use cl_protocol::{Command, HandleKind, Status};

use crate::mem::Mem;
use crate::platform::{bytes_to_string, info_query, status_call, Device};
use crate::program::Program;
use crate::sampler::Sampler;
use crate::session::Session;

/// A value for one kernel argument.
pub enum KernelArg<'a> {
    /// Plain bytes, shipped verbatim.
    Bytes(&'a [u8]),
    /// A memory object; rewritten to its remote identity.
    Mem(&'a Mem),
    /// A sampler; rewritten to its remote identity.
    Sampler(&'a Sampler),
    /// A local-memory argument of the given size; only the size travels.
    Local(u64),
}

/// What was last sent for an argument index, for deduplication.
#[derive(PartialEq, Eq, Clone)]
enum SentArg {
    Bytes(Vec<u8>),
    Mem(u64),
    Sampler(u64),
    Local(u64),
}

/// The cached classification of an argument index.
#[derive(Clone, Copy, PartialEq, Eq)]
enum ArgClass {
    /// `__global` or `__constant` pointer: must arrive as a memory
    /// object.
    MemPointer,
    /// `__local` pointer: only a size makes sense.
    LocalPointer,
    /// `sampler_t`.
    SamplerValue,
    /// Anything else passes through as bytes.
    Plain,
    /// The runtime would not say; no rewriting is attempted.
    Unknown,
}

#[derive(Default)]
struct ArgCache {
    class: HashMap<u32, ArgClass>,
    sent: HashMap<u32, SentArg>,
}

pub(crate) struct KernelInner {
    pub(crate) session: Session,
    pub(crate) remote: u64,
    refs: Mutex<u32>,
    pub(crate) program: Program,
    name: Option<String>,
    args: Mutex<ArgCache>,
}

#[derive(Clone)]
pub struct Kernel {
    pub(crate) inner: Arc<KernelInner>,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("remote", &self.inner.remote)
            .finish()
    }
}

impl Program {
    pub fn create_kernel(&self, name: &str) -> crate::Result<Kernel> {
        let remote = self.inner.session.call(
            |frame| {
                frame.put_u32(Command::CreateKernel.into())?;
                frame.put_handle(HandleKind::Program, self.remote())?;
                frame.put_string(name)
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                s.get_handle(HandleKind::Kernel)
            },
        )?;
        Ok(Kernel::new(self, remote, Some(name.to_string())))
    }

    /// Create one kernel per function in the program.
    pub fn create_kernels(&self) -> crate::Result<Vec<Kernel>> {
        let remotes = self.inner.session.call(
            |frame| {
                frame.put_u32(Command::CreateKernelsInProgram.into())?;
                frame.put_handle(HandleKind::Program, self.remote())
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                let n = s.get_u32()? as usize;
                s.get_handles(HandleKind::Kernel, n)
            },
        )?;
        Ok(remotes
            .into_iter()
            .map(|remote| Kernel::new(self, remote, None))
            .collect())
    }
}

impl Kernel {
    fn new(program: &Program, remote: u64, name: Option<String>) -> Kernel {
        Kernel {
            inner: Arc::new(KernelInner {
                session: program.inner.session.clone(),
                remote,
                refs: Mutex::new(1),
                program: program.clone(),
                name,
                args: Mutex::new(ArgCache::default()),
            }),
        }
    }

    pub(crate) fn remote(&self) -> u64 {
        self.inner.remote
    }

    pub fn program(&self) -> &Program {
        &self.inner.program
    }

    /// Classify an argument index from the arg-info queries, caching the
    /// verdict either way.
    fn classify(&self, index: u32) -> ArgClass {
        if let Some(class) = self.inner.args.lock().unwrap().class.get(&index) {
            return *class;
        }
        let class = match self.arg_info(index, info::KERNEL_ARG_ADDRESS_QUALIFIER) {
            Ok(bytes) if bytes.len() >= 4 => {
                let qualifier = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                match qualifier {
                    arg_address::GLOBAL | arg_address::CONSTANT => ArgClass::MemPointer,
                    arg_address::LOCAL => ArgClass::LocalPointer,
                    _ => {
                        let type_name = self
                            .arg_info(index, info::KERNEL_ARG_TYPE_NAME)
                            .map(bytes_to_string)
                            .unwrap_or_default();
                        if type_name == "sampler_t" {
                            ArgClass::SamplerValue
                        } else {
                            ArgClass::Plain
                        }
                    }
                }
            }
            _ => ArgClass::Unknown,
        };
        self.inner
            .args
            .lock()
            .unwrap()
            .class
            .insert(index, class);
        class
    }

    /// Set one argument.
    pub fn set_arg(&self, index: u32, arg: KernelArg) -> crate::Result<()> {
        let canonical = match &arg {
            KernelArg::Bytes(b) => SentArg::Bytes(b.to_vec()),
            KernelArg::Mem(m) => SentArg::Mem(m.remote()),
            KernelArg::Sampler(s) => SentArg::Sampler(s.remote()),
            KernelArg::Local(size) => SentArg::Local(*size),
        };
        // Re-setting the value already in place succeeds without a
        // round-trip.
        if self.inner.args.lock().unwrap().sent.get(&index) == Some(&canonical) {
            return Ok(());
        }

        match (&arg, self.classify(index)) {
            // A pointer-sized blob where a memory object belongs is a
            // stale host pointer; it cannot be rewritten from here.
            (KernelArg::Bytes(b), ArgClass::MemPointer) if b.len() == 8 => {
                return Err(Status::INVALID_ARG_VALUE)
            }
            (KernelArg::Bytes(b), ArgClass::SamplerValue) if b.len() == 8 => {
                return Err(Status::INVALID_ARG_VALUE)
            }
            (KernelArg::Mem(_), class)
                if class != ArgClass::MemPointer && class != ArgClass::Unknown =>
            {
                return Err(Status::INVALID_ARG_VALUE)
            }
            (KernelArg::Local(_), class)
                if class != ArgClass::LocalPointer && class != ArgClass::Unknown =>
            {
                return Err(Status::INVALID_ARG_VALUE)
            }
            _ => {}
        }

        status_call(&self.inner.session, |frame| {
            frame.put_u32(Command::SetKernelArg.into())?;
            frame.put_handle(HandleKind::Kernel, self.inner.remote)?;
            frame.put_u32(index)?;
            match &arg {
                KernelArg::Bytes(b) => {
                    frame.put_u8(kernel_arg::BYTES)?;
                    frame.put_blob(b)
                }
                KernelArg::Mem(m) => {
                    frame.put_u8(kernel_arg::MEM)?;
                    frame.put_handle(HandleKind::Mem, m.remote())
                }
                KernelArg::Sampler(s) => {
                    frame.put_u8(kernel_arg::SAMPLER)?;
                    frame.put_handle(HandleKind::Sampler, s.remote())
                }
                KernelArg::Local(size) => {
                    frame.put_u8(kernel_arg::LOCAL)?;
                    frame.put_size(*size)
                }
            }
        })?;

        self.inner.args.lock().unwrap().sent.insert(index, canonical);
        Ok(())
    }

    /// Info query; the function name is cached when it is known.
    pub fn info(&self, param: u32) -> crate::Result<Vec<u8>> {
        match param {
            info::KERNEL_FUNCTION_NAME => match &self.inner.name {
                Some(name) => {
                    let mut v = name.as_bytes().to_vec();
                    v.push(0);
                    Ok(v)
                }
                None => self.info_remote(param),
            },
            info::KERNEL_PROGRAM => Ok(self.inner.program.remote().to_ne_bytes().to_vec()),
            info::KERNEL_CONTEXT => Ok(self
                .inner
                .program
                .context()
                .remote()
                .to_ne_bytes()
                .to_vec()),
            info::KERNEL_REFERENCE_COUNT => Ok(self.refcount().to_ne_bytes().to_vec()),
            _ => self.info_remote(param),
        }
    }

    fn info_remote(&self, param: u32) -> crate::Result<Vec<u8>> {
        info_query(&self.inner.session, Command::GetKernelInfo, |frame| {
            frame.put_handle(HandleKind::Kernel, self.inner.remote)?;
            frame.put_u32(param)
        })
    }

    pub fn arg_info(&self, index: u32, param: u32) -> crate::Result<Vec<u8>> {
        info_query(&self.inner.session, Command::GetKernelArgInfo, |frame| {
            frame.put_handle(HandleKind::Kernel, self.inner.remote)?;
            frame.put_u32(index)?;
            frame.put_u32(param)
        })
    }

    pub fn work_group_info(&self, device: &Device, param: u32) -> crate::Result<Vec<u8>> {
        info_query(
            &self.inner.session,
            Command::GetKernelWorkGroupInfo,
            |frame| {
                frame.put_handle(HandleKind::Kernel, self.inner.remote)?;
                frame.put_handle(HandleKind::Device, device.remote())?;
                frame.put_u32(param)
            },
        )
    }

    pub fn retain(&self) -> crate::Result<()> {
        let mut refs = self.inner.refs.lock().unwrap();
        if *refs == 0 {
            return Err(Status::INVALID_KERNEL);
        }
        *refs += 1;
        Ok(())
    }

    pub fn release(&self) -> crate::Result<()> {
        let mut refs = self.inner.refs.lock().unwrap();
        match *refs {
            0 => Err(Status::INVALID_KERNEL),
            1 => {
                *refs = 0;
                drop(refs);
                status_call(&self.inner.session, |frame| {
                    frame.put_u32(Command::ReleaseKernel.into())?;
                    frame.put_handle(HandleKind::Kernel, self.inner.remote)
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
