// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Samplers.

use std::sync::{Arc, Mutex};

use cl_protocol::types::info;
use cl_protocol::wire::{WireRead, WireWrite};
use cl_protocol::{Command, HandleKind, Status};

use crate::context::Context;
use crate::platform::{info_query, status_call};

pub(crate) struct SamplerInner {
    pub(crate) remote: u64,
    refs: Mutex<u32>,
    context: Context,
    normalized_coords: bool,
    addressing_mode: u32,
    filter_mode: u32,
}

#[derive(Clone)]
pub struct Sampler {
    pub(crate) inner: Arc<SamplerInner>,
}

impl Context {
    pub fn create_sampler(
        &self,
        normalized_coords: bool,
        addressing_mode: u32,
        filter_mode: u32,
    ) -> crate::Result<Sampler> {
        let remote = self.session().call(
            |frame| {
                frame.put_u32(Command::CreateSampler.into())?;
                frame.put_handle(HandleKind::Context, self.remote())?;
                frame.put_bool(normalized_coords)?;
                frame.put_u32(addressing_mode)?;
                frame.put_u32(filter_mode)
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                s.get_handle(HandleKind::Sampler)
            },
        )?;

        Ok(Sampler {
            inner: Arc::new(SamplerInner {
                remote,
                refs: Mutex::new(1),
                context: self.clone(),
                normalized_coords,
                addressing_mode,
                filter_mode,
            }),
        })
    }
}

impl Sampler {
    pub(crate) fn remote(&self) -> u64 {
        self.inner.remote
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    /// Info query; everything a sampler is was fixed at creation.
    pub fn info(&self, param: u32) -> crate::Result<Vec<u8>> {
        match param {
            info::SAMPLER_CONTEXT => Ok(self.inner.context.remote().to_ne_bytes().to_vec()),
            info::SAMPLER_REFERENCE_COUNT => Ok(self.refcount().to_ne_bytes().to_vec()),
            info::SAMPLER_NORMALIZED_COORDS => {
                Ok((self.inner.normalized_coords as u32).to_ne_bytes().to_vec())
            }
            info::SAMPLER_ADDRESSING_MODE => {
                Ok(self.inner.addressing_mode.to_ne_bytes().to_vec())
            }
            info::SAMPLER_FILTER_MODE => Ok(self.inner.filter_mode.to_ne_bytes().to_vec()),
            _ => info_query(self.inner.context.session(), Command::GetSamplerInfo, |frame| {
                frame.put_handle(HandleKind::Sampler, self.inner.remote)?;
                frame.put_u32(param)
            }),
        }
    }

    pub fn retain(&self) -> crate::Result<()> {
        let mut refs = self.inner.refs.lock().unwrap();
        if *refs == 0 {
            return Err(Status::INVALID_SAMPLER);
        }
        *refs += 1;
        Ok(())
    }

    pub fn release(&self) -> crate::Result<()> {
        let mut refs = self.inner.refs.lock().unwrap();
        match *refs {
            0 => Err(Status::INVALID_SAMPLER),
            1 => {
                *refs = 0;
                drop(refs);
                status_call(self.inner.context.session(), |frame| {
                    frame.put_u32(Command::ReleaseSampler.into())?;
                    frame.put_handle(HandleKind::Sampler, self.inner.remote)
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
