// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The per-connection handle registry.
//!
//! Each table maps a wire identity to the runtime handle it stands for,
//! plus the attributes later commands need without asking the runtime
//! (context links, sizes, element sizes). Identities are minted from one
//! monotonic counter per connection, so they are unique across kinds and
//! never reused. Every inbound frame that names a handle is validated here
//! first and answered with the kind's `invalid-*` status when the lookup
//! fails.
//!
//! Only the connection's dispatcher thread mutates the registry. Event
//! entries are `Arc`s because transfer workers settle events in parallel;
//! dropping an entry severs the client's interest, not the worker's.

use log::*;

use std::collections::HashMap;
use std::sync::Arc;

use cl_protocol::types::{MemFlags, Status};
use cl_protocol::HandleKind;

use crate::events::SrvEvent;
use crate::runtime::*;

pub struct DeviceEntry {
    pub rt: RtDevice,
    pub platform: u64,
    /// Sub-devices are released on drain; root devices are not ours to
    /// release.
    pub sub: bool,
}

pub struct ContextEntry {
    pub rt: RtContext,
    pub devices: Vec<u64>,
    pub platform: Option<u64>,
}

#[derive(Debug)]
pub struct QueueEntry {
    pub rt: RtQueue,
    pub context: u64,
    pub device: u64,
    pub properties: u64,
}

#[derive(Debug)]
pub struct MemEntry {
    pub rt: RtMem,
    pub context: u64,
    pub size: u64,
    pub flags: MemFlags,
    /// 1 for buffers; pixel width for images.
    pub element_size: u64,
    pub is_image: bool,
    pub parent: Option<u64>,
}

impl MemEntry {
    pub fn readable(&self) -> Result<(), Status> {
        if self
            .flags
            .intersects(MemFlags::HOST_WRITE_ONLY | MemFlags::HOST_NO_ACCESS)
        {
            return Err(Status::INVALID_OPERATION);
        }
        Ok(())
    }

    pub fn writable(&self) -> Result<(), Status> {
        if self
            .flags
            .intersects(MemFlags::HOST_READ_ONLY | MemFlags::HOST_NO_ACCESS)
        {
            return Err(Status::INVALID_OPERATION);
        }
        Ok(())
    }

    pub fn check_range(&self, offset: u64, len: u64) -> Result<(), Status> {
        if len == 0 || offset + len > self.size {
            return Err(Status::INVALID_VALUE);
        }
        Ok(())
    }
}

pub struct SamplerEntry {
    pub rt: RtSampler,
    pub context: u64,
}

pub struct ProgramEntry {
    pub rt: RtProgram,
    pub context: u64,
    pub devices: Vec<u64>,
}

pub struct KernelEntry {
    pub rt: RtKernel,
    pub program: u64,
    pub context: u64,
}

#[derive(Default)]
pub struct Registry {
    next_id: u64,
    platforms: HashMap<u64, RtPlatform>,
    platform_ids: HashMap<u64, u64>,
    devices: HashMap<u64, DeviceEntry>,
    device_ids: HashMap<u64, u64>,
    contexts: HashMap<u64, ContextEntry>,
    queues: HashMap<u64, QueueEntry>,
    mems: HashMap<u64, MemEntry>,
    samplers: HashMap<u64, SamplerEntry>,
    programs: HashMap<u64, ProgramEntry>,
    kernels: HashMap<u64, KernelEntry>,
    events: HashMap<u64, Arc<SrvEvent>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Platforms are discovered rather than created; listing one twice
    /// must hand back the identity the client already knows.
    pub fn register_platform(&mut self, rt: RtPlatform) -> u64 {
        if let Some(id) = self.platform_ids.get(&rt.0) {
            return *id;
        }
        let id = self.mint();
        self.platforms.insert(id, rt);
        self.platform_ids.insert(rt.0, id);
        id
    }

    pub fn register_device(&mut self, rt: RtDevice, platform: u64, sub: bool) -> u64 {
        if let Some(id) = self.device_ids.get(&rt.0) {
            return *id;
        }
        let id = self.mint();
        self.devices.insert(id, DeviceEntry { rt, platform, sub });
        self.device_ids.insert(rt.0, id);
        id
    }

    pub fn register_context(&mut self, entry: ContextEntry) -> u64 {
        let id = self.mint();
        self.contexts.insert(id, entry);
        id
    }

    pub fn register_queue(&mut self, entry: QueueEntry) -> u64 {
        let id = self.mint();
        self.queues.insert(id, entry);
        id
    }

    pub fn register_mem(&mut self, entry: MemEntry) -> u64 {
        let id = self.mint();
        self.mems.insert(id, entry);
        id
    }

    pub fn register_sampler(&mut self, entry: SamplerEntry) -> u64 {
        let id = self.mint();
        self.samplers.insert(id, entry);
        id
    }

    pub fn register_program(&mut self, entry: ProgramEntry) -> u64 {
        let id = self.mint();
        self.programs.insert(id, entry);
        id
    }

    pub fn register_kernel(&mut self, entry: KernelEntry) -> u64 {
        let id = self.mint();
        self.kernels.insert(id, entry);
        id
    }

    pub fn register_event(&mut self, event: Arc<SrvEvent>) {
        self.events.insert(event.id, event);
    }

    pub fn platform(&self, id: u64) -> Result<RtPlatform, Status> {
        self.platforms
            .get(&id)
            .copied()
            .ok_or(Status::INVALID_PLATFORM)
    }

    pub fn device(&self, id: u64) -> Result<&DeviceEntry, Status> {
        self.devices.get(&id).ok_or(Status::INVALID_DEVICE)
    }

    pub fn devices(&self, ids: &[u64]) -> Result<Vec<RtDevice>, Status> {
        ids.iter().map(|id| Ok(self.device(*id)?.rt)).collect()
    }

    pub fn context(&self, id: u64) -> Result<&ContextEntry, Status> {
        self.contexts.get(&id).ok_or(Status::INVALID_CONTEXT)
    }

    pub fn queue(&self, id: u64) -> Result<&QueueEntry, Status> {
        self.queues.get(&id).ok_or(Status::INVALID_COMMAND_QUEUE)
    }

    pub fn mem(&self, id: u64) -> Result<&MemEntry, Status> {
        self.mems.get(&id).ok_or(Status::INVALID_MEM_OBJECT)
    }

    pub fn sampler(&self, id: u64) -> Result<&SamplerEntry, Status> {
        self.samplers.get(&id).ok_or(Status::INVALID_SAMPLER)
    }

    pub fn program(&self, id: u64) -> Result<&ProgramEntry, Status> {
        self.programs.get(&id).ok_or(Status::INVALID_PROGRAM)
    }

    pub fn kernel(&self, id: u64) -> Result<&KernelEntry, Status> {
        self.kernels.get(&id).ok_or(Status::INVALID_KERNEL)
    }

    pub fn event(&self, id: u64) -> Result<&Arc<SrvEvent>, Status> {
        self.events.get(&id).ok_or(Status::INVALID_EVENT)
    }

    /// Resolve a wait-list. Any unknown member invalidates the whole list.
    pub fn wait_list(&self, ids: &[u64]) -> Result<Vec<Arc<SrvEvent>>, Status> {
        ids.iter()
            .map(|id| {
                self.events
                    .get(id)
                    .cloned()
                    .ok_or(Status::INVALID_EVENT_WAIT_LIST)
            })
            .collect()
    }

    pub fn contains(&self, kind: HandleKind, id: u64) -> bool {
        match kind {
            HandleKind::Platform => self.platforms.contains_key(&id),
            HandleKind::Device => self.devices.contains_key(&id),
            HandleKind::Context => self.contexts.contains_key(&id),
            HandleKind::CommandQueue => self.queues.contains_key(&id),
            HandleKind::Mem => self.mems.contains_key(&id),
            HandleKind::Sampler => self.samplers.contains_key(&id),
            HandleKind::Program => self.programs.contains_key(&id),
            HandleKind::Kernel => self.kernels.contains_key(&id),
            HandleKind::Event => self.events.contains_key(&id),
        }
    }

    pub fn unregister_device(&mut self, id: u64) -> Option<DeviceEntry> {
        let entry = self.devices.remove(&id)?;
        self.device_ids.remove(&entry.rt.0);
        Some(entry)
    }

    pub fn unregister_context(&mut self, id: u64) -> Option<ContextEntry> {
        self.contexts.remove(&id)
    }

    pub fn unregister_queue(&mut self, id: u64) -> Option<QueueEntry> {
        self.queues.remove(&id)
    }

    pub fn unregister_mem(&mut self, id: u64) -> Option<MemEntry> {
        self.mems.remove(&id)
    }

    pub fn unregister_sampler(&mut self, id: u64) -> Option<SamplerEntry> {
        self.samplers.remove(&id)
    }

    pub fn unregister_program(&mut self, id: u64) -> Option<ProgramEntry> {
        self.programs.remove(&id)
    }

    pub fn unregister_kernel(&mut self, id: u64) -> Option<KernelEntry> {
        self.kernels.remove(&id)
    }

    pub fn unregister_event(&mut self, id: u64) -> Option<Arc<SrvEvent>> {
        self.events.remove(&id)
    }

    /// Release everything the client never released, children before
    /// parents so the runtime's own reference counts unwind cleanly.
    /// Called when the connection goes away.
    pub fn drain(&mut self, runtime: &dyn Runtime) {
        let leaked = self.events.len()
            + self.kernels.len()
            + self.programs.len()
            + self.samplers.len()
            + self.mems.len()
            + self.queues.len()
            + self.contexts.len();
        if leaked > 0 {
            debug!("draining {leaked} objects left registered at disconnect");
        }

        for (_, ev) in self.events.drain() {
            ev.release_rt(runtime);
        }
        for (_, k) in self.kernels.drain() {
            let _ = runtime.release_kernel(k.rt);
        }
        for (_, p) in self.programs.drain() {
            let _ = runtime.release_program(p.rt);
        }
        for (_, s) in self.samplers.drain() {
            let _ = runtime.release_sampler(s.rt);
        }
        // Sub-buffers first: releasing a parent before its children is a
        // runtime-level error.
        let (subs, roots): (Vec<_>, Vec<_>) = self
            .mems
            .drain()
            .partition(|(_, m)| m.parent.is_some());
        for (_, m) in subs.into_iter().chain(roots) {
            let _ = runtime.release_mem(m.rt);
        }
        for (_, q) in self.queues.drain() {
            let _ = runtime.release_queue(q.rt);
        }
        for (_, c) in self.contexts.drain() {
            let _ = runtime.release_context(c.rt);
        }
        for (_, d) in self.devices.drain() {
            if d.sub {
                let _ = runtime.release_device(d.rt);
            }
        }
        self.device_ids.clear();
        self.platforms.clear();
        self.platform_ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identities_are_unique_and_stable() {
        let mut reg = Registry::new();
        let p = reg.register_platform(RtPlatform(10));
        let d = reg.register_device(RtDevice(20), p, false);
        assert_ne!(p, d);
        // Re-listing hands back the same identities.
        assert_eq!(reg.register_platform(RtPlatform(10)), p);
        assert_eq!(reg.register_device(RtDevice(20), p, false), d);
        // A fresh object never reuses an identity.
        let c = reg.register_context(ContextEntry {
            rt: RtContext(30),
            devices: vec![d],
            platform: Some(p),
        });
        assert!(c > d);
    }

    #[test]
    fn lookup_failure_maps_to_the_kind() {
        let reg = Registry::new();
        assert_eq!(reg.mem(5).unwrap_err(), Status::INVALID_MEM_OBJECT);
        assert_eq!(reg.queue(5).unwrap_err(), Status::INVALID_COMMAND_QUEUE);
        assert_eq!(reg.event(5).unwrap_err(), Status::INVALID_EVENT);
        assert_eq!(
            reg.wait_list(&[5]).unwrap_err(),
            Status::INVALID_EVENT_WAIT_LIST
        );
    }

    #[test]
    fn drain_releases_on_the_runtime() {
        use crate::runtime::soft::SoftRuntime;
        use cl_protocol::types::device_type;

        let rt = SoftRuntime::new();
        let platform = rt.platform_ids().unwrap()[0];
        let device = rt.device_ids(platform, device_type::ALL).unwrap()[0];
        let context = rt.create_context(Some(platform), &[device]).unwrap();
        let buffer = rt
            .create_buffer(context, MemFlags::READ_WRITE, 16, None)
            .unwrap();

        let mut reg = Registry::new();
        let p = reg.register_platform(platform);
        let d = reg.register_device(device, p, false);
        let c = reg.register_context(ContextEntry {
            rt: context,
            devices: vec![d],
            platform: Some(p),
        });
        reg.register_mem(MemEntry {
            rt: buffer,
            context: c,
            size: 16,
            flags: MemFlags::READ_WRITE,
            element_size: 1,
            is_image: false,
            parent: None,
        });

        reg.drain(&rt);
        // The runtime object is gone too.
        assert_eq!(rt.retain_mem(buffer).unwrap_err(), Status::INVALID_MEM_OBJECT);
        assert_eq!(
            rt.retain_context(context).unwrap_err(),
            Status::INVALID_CONTEXT
        );
    }
}
