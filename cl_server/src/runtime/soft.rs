// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! A software reference device.
//!
//! One platform, one CPU-class device, full memory-object and event
//! semantics in host memory, with every enqueue executed synchronously at
//! submission. The device reports no compiler, so program build/compile/
//! link fail with `compiler-not-available` and no kernel can come into
//! existence; everything else behaves like a (very small) accelerator.
//! It exists so a deployment can be exercised end to end — protocol,
//! registry, events, bulk transfers — without hardware behind the daemon.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

use cl_protocol::rect::{self, RectLayout};
use cl_protocol::types::{element_size, image_type, info, ImageDesc, ImageFormat, MemFlags, Status};

use super::*;

const PLATFORM_ID: u64 = 1;
const DEVICE_ID: u64 = 2;

const PLATFORM_NAME: &str = "cl_server software device";
const VENDOR: &str = "cl_server";
const VERSION: &str = "OpenCL 1.2";

/// Build states as the program-build-info query reports them.
const BUILD_NONE: i32 = -1;
const BUILD_ERROR: i32 = -2;

pub struct SoftRuntime {
    state: Mutex<State>,
    epoch: Instant,
}

#[derive(Default)]
struct State {
    next: u64,
    contexts: HashMap<u64, Ctx>,
    queues: HashMap<u64, Queue>,
    mems: HashMap<u64, MemObj>,
    samplers: HashMap<u64, Sampler>,
    programs: HashMap<u64, Program>,
    events: HashMap<u64, Arc<Event>>,
}

struct Ctx {
    refs: u32,
}

struct Queue {
    context: u64,
    device: u64,
    properties: u64,
    refs: u32,
}

struct MemObj {
    context: u64,
    /// Shared with any sub-buffers carved out of this allocation.
    data: Arc<Mutex<Vec<u8>>>,
    origin: u64,
    size: u64,
    flags: MemFlags,
    parent: Option<u64>,
    image: Option<ImageMeta>,
    refs: u32,
}

struct ImageMeta {
    format: ImageFormat,
    desc: ImageDesc,
    element_size: u64,
    row_pitch: u64,
    slice_pitch: u64,
}

struct Sampler {
    context: u64,
    normalized_coords: bool,
    addressing_mode: u32,
    filter_mode: u32,
    refs: u32,
}

struct Program {
    context: u64,
    source: Option<String>,
    binaries: Option<Vec<Vec<u8>>>,
    build_status: i32,
    build_log: String,
    refs: u32,
}

/// Execution states use the API's `i32` encoding (0 complete, positive
/// pending, negative error) so user-event status forwarding is a copy.
struct Event {
    state: Mutex<i32>,
    cond: Condvar,
    user: bool,
    /// queued/submit/start/end device timestamps, nanoseconds.
    profile: Mutex<[u64; 4]>,
}

impl Event {
    fn settled(initial: i32, profile: [u64; 4]) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(initial),
            cond: Condvar::new(),
            user: false,
            profile: Mutex::new(profile),
        })
    }
}

impl SoftRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            epoch: Instant::now(),
        }
    }

    fn now(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// A synchronously-executed command: all four timestamps are known by
    /// the time the event exists.
    fn completed_event(&self, state: &mut State, queued: u64) -> RtEvent {
        let end = self.now();
        let id = state.mint();
        state
            .events
            .insert(id, Event::settled(0, [queued, queued, queued, end]));
        RtEvent(id)
    }
}

impl Default for SoftRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    fn mint(&mut self) -> u64 {
        // Skip the fixed platform/device identities.
        self.next += 1;
        self.next + DEVICE_ID
    }

    fn context(&self, c: RtContext) -> RtResult<&Ctx> {
        self.contexts.get(&c.0).ok_or(Status::INVALID_CONTEXT)
    }

    fn queue(&self, q: RtQueue) -> RtResult<&Queue> {
        self.queues.get(&q.0).ok_or(Status::INVALID_COMMAND_QUEUE)
    }

    fn mem(&self, m: RtMem) -> RtResult<&MemObj> {
        self.mems.get(&m.0).ok_or(Status::INVALID_MEM_OBJECT)
    }

    fn buffer(&self, m: RtMem) -> RtResult<&MemObj> {
        let mem = self.mem(m)?;
        if mem.image.is_some() {
            return Err(Status::INVALID_MEM_OBJECT);
        }
        Ok(mem)
    }

    fn image(&self, m: RtMem) -> RtResult<(&MemObj, &ImageMeta)> {
        let mem = self.mem(m)?;
        match &mem.image {
            Some(meta) => Ok((mem, meta)),
            None => Err(Status::INVALID_MEM_OBJECT),
        }
    }

    fn sampler(&self, s: RtSampler) -> RtResult<&Sampler> {
        self.samplers.get(&s.0).ok_or(Status::INVALID_SAMPLER)
    }

    fn program(&self, p: RtProgram) -> RtResult<&Program> {
        self.programs.get(&p.0).ok_or(Status::INVALID_PROGRAM)
    }

    fn event(&self, e: RtEvent) -> RtResult<Arc<Event>> {
        self.events.get(&e.0).cloned().ok_or(Status::INVALID_EVENT)
    }
}

fn info_bytes(v: &[u8]) -> Vec<u8> {
    v.to_vec()
}

fn info_str(s: &str) -> Vec<u8> {
    let mut v = s.as_bytes().to_vec();
    v.push(0);
    v
}

fn info_u32(v: u32) -> Vec<u8> {
    v.to_ne_bytes().to_vec()
}

fn info_i32(v: i32) -> Vec<u8> {
    v.to_ne_bytes().to_vec()
}

fn info_u64(v: u64) -> Vec<u8> {
    v.to_ne_bytes().to_vec()
}

/// Convert a 4-component fill colour (four 32-bit lanes, as the fill
/// command carries it) into one pixel of the image's own encoding.
fn encode_fill_color(color: &[u8], format: ImageFormat) -> RtResult<Vec<u8>> {
    if color.len() != 16 {
        return Err(Status::INVALID_VALUE);
    }
    let lanes: Vec<[u8; 4]> = color
        .chunks_exact(4)
        .map(|c| [c[0], c[1], c[2], c[3]])
        .collect();
    let channels = match format.channel_order {
        0x10B0 | 0x10B8 | 0x10B9 => 1,
        0x10B2 => 2,
        0x10B5 | 0x10B6 | 0x10B7 => 4,
        _ => return Err(Status::INVALID_VALUE),
    };

    let mut pixel = Vec::new();
    for lane in lanes.iter().take(channels) {
        match format.channel_type {
            // Float images take the lanes as f32 verbatim.
            0x10DE => pixel.extend_from_slice(lane),
            // Unnormalised integer images truncate each lane.
            0x10DA | 0x10D7 => pixel.push(lane[0]),
            0x10DB | 0x10D8 => pixel.extend_from_slice(&lane[..2]),
            0x10DC | 0x10D9 => pixel.extend_from_slice(lane),
            // Unorm8 scales a float lane into [0, 255].
            0x10D2 => {
                let f = f32::from_ne_bytes(*lane);
                pixel.push((f.clamp(0.0, 1.0) * 255.0).round() as u8);
            }
            _ => return Err(Status::INVALID_VALUE),
        }
    }
    Ok(pixel)
}

/// Scale a pixel-denominated origin/region pair to bytes.
fn to_bytes(origin: [u64; 3], region: [u64; 3], element: u64) -> ([u64; 3], [u64; 3]) {
    (
        [origin[0] * element, origin[1], origin[2]],
        [region[0] * element, region[1], region[2]],
    )
}

impl MemObj {
    fn check_range(&self, offset: u64, len: u64) -> RtResult<()> {
        if offset + len > self.size {
            return Err(Status::INVALID_VALUE);
        }
        Ok(())
    }

    fn with_slice<T>(&self, f: impl FnOnce(&[u8]) -> T) -> T {
        let data = self.data.lock().unwrap();
        f(&data[self.origin as usize..(self.origin + self.size) as usize])
    }

    fn with_slice_mut<T>(&self, f: impl FnOnce(&mut [u8]) -> T) -> T {
        let mut data = self.data.lock().unwrap();
        f(&mut data[self.origin as usize..(self.origin + self.size) as usize])
    }
}

impl Runtime for SoftRuntime {
    fn platform_ids(&self) -> RtResult<Vec<RtPlatform>> {
        Ok(vec![RtPlatform(PLATFORM_ID)])
    }

    fn platform_info(&self, platform: RtPlatform, param: u32) -> RtResult<Vec<u8>> {
        if platform.0 != PLATFORM_ID {
            return Err(Status::INVALID_PLATFORM);
        }
        match param {
            info::PLATFORM_PROFILE => Ok(info_str("EMBEDDED_PROFILE")),
            info::PLATFORM_VERSION => Ok(info_str(VERSION)),
            info::PLATFORM_NAME => Ok(info_str(PLATFORM_NAME)),
            info::PLATFORM_VENDOR => Ok(info_str(VENDOR)),
            info::PLATFORM_EXTENSIONS => Ok(info_str("")),
            _ => Err(Status::INVALID_VALUE),
        }
    }

    fn device_ids(&self, platform: RtPlatform, device_type: u64) -> RtResult<Vec<RtDevice>> {
        use cl_protocol::types::device_type as dt;
        if platform.0 != PLATFORM_ID {
            return Err(Status::INVALID_PLATFORM);
        }
        if device_type & (dt::CPU | dt::DEFAULT | dt::ALL) != 0 {
            Ok(vec![RtDevice(DEVICE_ID)])
        } else {
            Err(Status::DEVICE_NOT_FOUND)
        }
    }

    fn device_info(&self, device: RtDevice, param: u32) -> RtResult<Vec<u8>> {
        use cl_protocol::types::device_type as dt;
        if device.0 != DEVICE_ID {
            return Err(Status::INVALID_DEVICE);
        }
        match param {
            info::DEVICE_TYPE => Ok(info_u64(dt::CPU)),
            info::DEVICE_MAX_COMPUTE_UNITS => Ok(info_u32(1)),
            info::DEVICE_MAX_WORK_GROUP_SIZE => Ok(info_u64(1)),
            info::DEVICE_GLOBAL_MEM_SIZE => Ok(info_u64(1 << 30)),
            info::DEVICE_IMAGE_SUPPORT => Ok(info_u32(1)),
            info::DEVICE_COMPILER_AVAILABLE => Ok(info_u32(0)),
            info::DEVICE_NAME => Ok(info_str(PLATFORM_NAME)),
            info::DEVICE_VENDOR => Ok(info_str(VENDOR)),
            info::DEVICE_VERSION => Ok(info_str(VERSION)),
            _ => Err(Status::INVALID_VALUE),
        }
    }

    fn create_sub_devices(&self, device: RtDevice, _properties: &[u64]) -> RtResult<Vec<RtDevice>> {
        if device.0 != DEVICE_ID {
            return Err(Status::INVALID_DEVICE);
        }
        // A single compute unit cannot be partitioned.
        Err(Status::INVALID_VALUE)
    }

    fn retain_device(&self, device: RtDevice) -> RtResult<()> {
        // Root devices are not reference counted.
        if device.0 != DEVICE_ID {
            return Err(Status::INVALID_DEVICE);
        }
        Ok(())
    }

    fn release_device(&self, device: RtDevice) -> RtResult<()> {
        if device.0 != DEVICE_ID {
            return Err(Status::INVALID_DEVICE);
        }
        Ok(())
    }

    fn create_context(
        &self,
        platform: Option<RtPlatform>,
        devices: &[RtDevice],
    ) -> RtResult<RtContext> {
        if let Some(p) = platform {
            if p.0 != PLATFORM_ID {
                return Err(Status::INVALID_PLATFORM);
            }
        }
        if devices.is_empty() || devices.iter().any(|d| d.0 != DEVICE_ID) {
            return Err(Status::INVALID_DEVICE);
        }
        let mut state = self.state.lock().unwrap();
        let id = state.mint();
        state.contexts.insert(id, Ctx { refs: 1 });
        Ok(RtContext(id))
    }

    fn create_context_from_type(
        &self,
        platform: Option<RtPlatform>,
        device_type: u64,
    ) -> RtResult<(RtContext, Vec<RtDevice>)> {
        let devices = self.device_ids(platform.unwrap_or(RtPlatform(PLATFORM_ID)), device_type)?;
        let context = self.create_context(platform, &devices)?;
        Ok((context, devices))
    }

    fn retain_context(&self, context: RtContext) -> RtResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .contexts
            .get_mut(&context.0)
            .ok_or(Status::INVALID_CONTEXT)?
            .refs += 1;
        Ok(())
    }

    fn release_context(&self, context: RtContext) -> RtResult<()> {
        let mut state = self.state.lock().unwrap();
        let ctx = state
            .contexts
            .get_mut(&context.0)
            .ok_or(Status::INVALID_CONTEXT)?;
        ctx.refs -= 1;
        if ctx.refs == 0 {
            state.contexts.remove(&context.0);
        }
        Ok(())
    }

    fn context_info(&self, context: RtContext, param: u32) -> RtResult<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let ctx = state.context(context)?;
        match param {
            info::CONTEXT_REFERENCE_COUNT => Ok(info_u32(ctx.refs)),
            info::CONTEXT_NUM_DEVICES => Ok(info_u32(1)),
            _ => Err(Status::INVALID_VALUE),
        }
    }

    fn create_queue(
        &self,
        context: RtContext,
        device: RtDevice,
        properties: u64,
    ) -> RtResult<RtQueue> {
        if device.0 != DEVICE_ID {
            return Err(Status::INVALID_DEVICE);
        }
        let mut state = self.state.lock().unwrap();
        state.context(context)?;
        let id = state.mint();
        state.queues.insert(
            id,
            Queue {
                context: context.0,
                device: device.0,
                properties,
                refs: 1,
            },
        );
        Ok(RtQueue(id))
    }

    fn retain_queue(&self, queue: RtQueue) -> RtResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .queues
            .get_mut(&queue.0)
            .ok_or(Status::INVALID_COMMAND_QUEUE)?
            .refs += 1;
        Ok(())
    }

    fn release_queue(&self, queue: RtQueue) -> RtResult<()> {
        let mut state = self.state.lock().unwrap();
        let q = state
            .queues
            .get_mut(&queue.0)
            .ok_or(Status::INVALID_COMMAND_QUEUE)?;
        q.refs -= 1;
        if q.refs == 0 {
            state.queues.remove(&queue.0);
        }
        Ok(())
    }

    fn queue_info(&self, queue: RtQueue, param: u32) -> RtResult<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let q = state.queue(queue)?;
        match param {
            info::QUEUE_REFERENCE_COUNT => Ok(info_u32(q.refs)),
            info::QUEUE_PROPERTIES => Ok(info_u64(q.properties)),
            _ => Err(Status::INVALID_VALUE),
        }
    }

    fn flush(&self, queue: RtQueue) -> RtResult<()> {
        self.state.lock().unwrap().queue(queue)?;
        Ok(())
    }

    fn finish(&self, queue: RtQueue) -> RtResult<()> {
        // Everything executes at enqueue time; a full queue drain is a
        // validity check.
        self.state.lock().unwrap().queue(queue)?;
        Ok(())
    }

    fn create_buffer(
        &self,
        context: RtContext,
        flags: MemFlags,
        size: u64,
        host_data: Option<Vec<u8>>,
    ) -> RtResult<RtMem> {
        if size == 0 {
            return Err(Status::INVALID_BUFFER_SIZE);
        }
        let data = match host_data {
            Some(d) if d.len() as u64 != size => return Err(Status::INVALID_HOST_PTR),
            Some(d) => d,
            None => vec![0; size as usize],
        };
        let mut state = self.state.lock().unwrap();
        state.context(context)?;
        let id = state.mint();
        state.mems.insert(
            id,
            MemObj {
                context: context.0,
                data: Arc::new(Mutex::new(data)),
                origin: 0,
                size,
                flags,
                parent: None,
                image: None,
                refs: 1,
            },
        );
        Ok(RtMem(id))
    }

    fn create_sub_buffer(
        &self,
        parent: RtMem,
        flags: MemFlags,
        origin: u64,
        size: u64,
    ) -> RtResult<RtMem> {
        let mut state = self.state.lock().unwrap();
        let p = state.buffer(parent)?;
        if p.parent.is_some() {
            // Sub-buffers of sub-buffers are not a thing.
            return Err(Status::INVALID_MEM_OBJECT);
        }
        if size == 0 || origin + size > p.size {
            return Err(Status::INVALID_VALUE);
        }
        let entry = MemObj {
            context: p.context,
            data: Arc::clone(&p.data),
            origin: p.origin + origin,
            size,
            flags,
            parent: Some(parent.0),
            image: None,
            refs: 1,
        };
        let id = state.mint();
        state.mems.insert(id, entry);
        Ok(RtMem(id))
    }

    fn create_image(
        &self,
        context: RtContext,
        flags: MemFlags,
        format: ImageFormat,
        desc: &ImageDesc,
        host_data: Option<Vec<u8>>,
    ) -> RtResult<RtMem> {
        let element = element_size(format).ok_or(Status::INVALID_IMAGE_FORMAT_DESCRIPTOR)?;
        let (width, height, depth) = match desc.image_type {
            image_type::IMAGE2D => (desc.width, desc.height, 1),
            image_type::IMAGE3D => (desc.width, desc.height, desc.depth),
            _ => return Err(Status::INVALID_IMAGE_DESCRIPTOR),
        };
        if width == 0 || height == 0 || depth == 0 {
            return Err(Status::INVALID_IMAGE_SIZE);
        }
        // The device stores images densely whatever the creation pitches.
        let row_pitch = width * element;
        let slice_pitch = row_pitch * height;
        let size = slice_pitch * depth;
        let data = match host_data {
            Some(d) if d.len() as u64 != size => return Err(Status::INVALID_HOST_PTR),
            Some(d) => d,
            None => vec![0; size as usize],
        };

        let mut state = self.state.lock().unwrap();
        state.context(context)?;
        let id = state.mint();
        state.mems.insert(
            id,
            MemObj {
                context: context.0,
                data: Arc::new(Mutex::new(data)),
                origin: 0,
                size,
                flags,
                parent: None,
                image: Some(ImageMeta {
                    format,
                    desc: *desc,
                    element_size: element,
                    row_pitch,
                    slice_pitch,
                }),
                refs: 1,
            },
        );
        Ok(RtMem(id))
    }

    fn retain_mem(&self, mem: RtMem) -> RtResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .mems
            .get_mut(&mem.0)
            .ok_or(Status::INVALID_MEM_OBJECT)?
            .refs += 1;
        Ok(())
    }

    fn release_mem(&self, mem: RtMem) -> RtResult<()> {
        let mut state = self.state.lock().unwrap();
        let m = state
            .mems
            .get_mut(&mem.0)
            .ok_or(Status::INVALID_MEM_OBJECT)?;
        m.refs -= 1;
        if m.refs == 0 {
            state.mems.remove(&mem.0);
        }
        Ok(())
    }

    fn supported_image_formats(
        &self,
        context: RtContext,
        _flags: MemFlags,
        _image_type: u32,
    ) -> RtResult<Vec<ImageFormat>> {
        self.state.lock().unwrap().context(context)?;
        let orders = [0x10B0, 0x10B2, 0x10B5, 0x10B6];
        let types = [0x10D2, 0x10D9, 0x10DA, 0x10DC, 0x10DE];
        let mut formats = Vec::new();
        for order in orders {
            for ty in types {
                formats.push(ImageFormat {
                    channel_order: order,
                    channel_type: ty,
                });
            }
        }
        Ok(formats)
    }

    fn mem_info(&self, mem: RtMem, param: u32) -> RtResult<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let m = state.mem(mem)?;
        match param {
            info::MEM_TYPE => Ok(info_u32(match &m.image {
                Some(meta) => meta.desc.image_type,
                None => 0x10F0,
            })),
            info::MEM_FLAGS => Ok(info_u64(m.flags.bits())),
            info::MEM_SIZE => Ok(info_u64(m.size)),
            info::MEM_REFERENCE_COUNT => Ok(info_u32(m.refs)),
            info::MEM_OFFSET => Ok(info_u64(if m.parent.is_some() {
                m.origin
            } else {
                0
            })),
            _ => Err(Status::INVALID_VALUE),
        }
    }

    fn image_info(&self, mem: RtMem, param: u32) -> RtResult<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let (_, meta) = state.image(mem)?;
        match param {
            info::IMAGE_FORMAT => {
                let mut v = info_u32(meta.format.channel_order);
                v.extend_from_slice(&info_u32(meta.format.channel_type));
                Ok(v)
            }
            info::IMAGE_ELEMENT_SIZE => Ok(info_u64(meta.element_size)),
            info::IMAGE_ROW_PITCH => Ok(info_u64(meta.row_pitch)),
            info::IMAGE_SLICE_PITCH => Ok(info_u64(meta.slice_pitch)),
            info::IMAGE_WIDTH => Ok(info_u64(meta.desc.width)),
            info::IMAGE_HEIGHT => Ok(info_u64(meta.desc.height)),
            info::IMAGE_DEPTH => Ok(info_u64(match meta.desc.image_type {
                image_type::IMAGE3D => meta.desc.depth,
                _ => 0,
            })),
            _ => Err(Status::INVALID_VALUE),
        }
    }

    fn create_sampler(
        &self,
        context: RtContext,
        normalized_coords: bool,
        addressing_mode: u32,
        filter_mode: u32,
    ) -> RtResult<RtSampler> {
        let mut state = self.state.lock().unwrap();
        state.context(context)?;
        let id = state.mint();
        state.samplers.insert(
            id,
            Sampler {
                context: context.0,
                normalized_coords,
                addressing_mode,
                filter_mode,
                refs: 1,
            },
        );
        Ok(RtSampler(id))
    }

    fn retain_sampler(&self, sampler: RtSampler) -> RtResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .samplers
            .get_mut(&sampler.0)
            .ok_or(Status::INVALID_SAMPLER)?
            .refs += 1;
        Ok(())
    }

    fn release_sampler(&self, sampler: RtSampler) -> RtResult<()> {
        let mut state = self.state.lock().unwrap();
        let s = state
            .samplers
            .get_mut(&sampler.0)
            .ok_or(Status::INVALID_SAMPLER)?;
        s.refs -= 1;
        if s.refs == 0 {
            state.samplers.remove(&sampler.0);
        }
        Ok(())
    }

    fn sampler_info(&self, sampler: RtSampler, param: u32) -> RtResult<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let s = state.sampler(sampler)?;
        match param {
            info::SAMPLER_REFERENCE_COUNT => Ok(info_u32(s.refs)),
            info::SAMPLER_NORMALIZED_COORDS => Ok(info_u32(s.normalized_coords as u32)),
            info::SAMPLER_ADDRESSING_MODE => Ok(info_u32(s.addressing_mode)),
            info::SAMPLER_FILTER_MODE => Ok(info_u32(s.filter_mode)),
            _ => Err(Status::INVALID_VALUE),
        }
    }

    fn create_program_with_source(
        &self,
        context: RtContext,
        sources: &[String],
    ) -> RtResult<RtProgram> {
        if sources.is_empty() {
            return Err(Status::INVALID_VALUE);
        }
        let mut state = self.state.lock().unwrap();
        state.context(context)?;
        let id = state.mint();
        state.programs.insert(
            id,
            Program {
                context: context.0,
                source: Some(sources.concat()),
                binaries: None,
                build_status: BUILD_NONE,
                build_log: String::new(),
                refs: 1,
            },
        );
        Ok(RtProgram(id))
    }

    fn create_program_with_binary(
        &self,
        context: RtContext,
        devices: &[RtDevice],
        binaries: &[Vec<u8>],
    ) -> RtResult<(RtProgram, Vec<Status>)> {
        if devices.is_empty() || devices.len() != binaries.len() {
            return Err(Status::INVALID_VALUE);
        }
        if devices.iter().any(|d| d.0 != DEVICE_ID) {
            return Err(Status::INVALID_DEVICE);
        }
        let mut state = self.state.lock().unwrap();
        state.context(context)?;
        let id = state.mint();
        state.programs.insert(
            id,
            Program {
                context: context.0,
                source: None,
                binaries: Some(binaries.to_vec()),
                build_status: BUILD_NONE,
                build_log: String::new(),
                refs: 1,
            },
        );
        // The bytes are stored verbatim, so every load "succeeds"; running
        // them is a different story.
        Ok((RtProgram(id), vec![Status::SUCCESS; binaries.len()]))
    }

    fn create_program_with_builtin_kernels(
        &self,
        _context: RtContext,
        _devices: &[RtDevice],
        _kernel_names: &str,
    ) -> RtResult<RtProgram> {
        // The device ships no built-in kernels.
        Err(Status::INVALID_VALUE)
    }

    fn retain_program(&self, program: RtProgram) -> RtResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .programs
            .get_mut(&program.0)
            .ok_or(Status::INVALID_PROGRAM)?
            .refs += 1;
        Ok(())
    }

    fn release_program(&self, program: RtProgram) -> RtResult<()> {
        let mut state = self.state.lock().unwrap();
        let p = state
            .programs
            .get_mut(&program.0)
            .ok_or(Status::INVALID_PROGRAM)?;
        p.refs -= 1;
        if p.refs == 0 {
            state.programs.remove(&program.0);
        }
        Ok(())
    }

    fn build_program(
        &self,
        program: RtProgram,
        devices: &[RtDevice],
        _options: &str,
    ) -> RtResult<()> {
        if devices.iter().any(|d| d.0 != DEVICE_ID) {
            return Err(Status::INVALID_DEVICE);
        }
        let mut state = self.state.lock().unwrap();
        let p = state
            .programs
            .get_mut(&program.0)
            .ok_or(Status::INVALID_PROGRAM)?;
        p.build_status = BUILD_ERROR;
        p.build_log = "the software device has no compiler\n".into();
        Err(Status::COMPILER_NOT_AVAILABLE)
    }

    fn compile_program(
        &self,
        program: RtProgram,
        devices: &[RtDevice],
        options: &str,
        _headers: &[(String, RtProgram)],
    ) -> RtResult<()> {
        self.build_program(program, devices, options)
    }

    fn link_program(
        &self,
        context: RtContext,
        devices: &[RtDevice],
        _options: &str,
        programs: &[RtProgram],
    ) -> RtResult<RtProgram> {
        if devices.iter().any(|d| d.0 != DEVICE_ID) {
            return Err(Status::INVALID_DEVICE);
        }
        let state = self.state.lock().unwrap();
        state.context(context)?;
        for p in programs {
            state.program(*p)?;
        }
        Err(Status::COMPILER_NOT_AVAILABLE)
    }

    fn unload_compiler(&self, platform: RtPlatform) -> RtResult<()> {
        if platform.0 != PLATFORM_ID {
            return Err(Status::INVALID_PLATFORM);
        }
        Ok(())
    }

    fn program_info(&self, program: RtProgram, param: u32) -> RtResult<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let p = state.program(program)?;
        match param {
            info::PROGRAM_REFERENCE_COUNT => Ok(info_u32(p.refs)),
            info::PROGRAM_NUM_DEVICES => Ok(info_u32(1)),
            info::PROGRAM_SOURCE => Ok(info_str(p.source.as_deref().unwrap_or(""))),
            info::PROGRAM_BINARY_SIZES => match &p.binaries {
                Some(b) => Ok(b.iter().flat_map(|b| info_u64(b.len() as u64)).collect()),
                None => Ok(info_u64(0)),
            },
            info::PROGRAM_BINARIES => match &p.binaries {
                Some(b) => Ok(b.iter().flat_map(|b| info_bytes(b)).collect()),
                None => Ok(Vec::new()),
            },
            _ => Err(Status::INVALID_VALUE),
        }
    }

    fn program_build_info(
        &self,
        program: RtProgram,
        device: RtDevice,
        param: u32,
    ) -> RtResult<Vec<u8>> {
        if device.0 != DEVICE_ID {
            return Err(Status::INVALID_DEVICE);
        }
        let state = self.state.lock().unwrap();
        let p = state.program(program)?;
        match param {
            info::PROGRAM_BUILD_STATUS => Ok(info_i32(p.build_status)),
            info::PROGRAM_BUILD_OPTIONS => Ok(info_str("")),
            info::PROGRAM_BUILD_LOG => Ok(info_str(&p.build_log)),
            _ => Err(Status::INVALID_VALUE),
        }
    }

    fn create_kernel(&self, program: RtProgram, _name: &str) -> RtResult<RtKernel> {
        let state = self.state.lock().unwrap();
        state.program(program)?;
        // Nothing ever builds, so nothing is executable.
        Err(Status::INVALID_PROGRAM_EXECUTABLE)
    }

    fn create_kernels_in_program(&self, program: RtProgram) -> RtResult<Vec<RtKernel>> {
        let state = self.state.lock().unwrap();
        state.program(program)?;
        Err(Status::INVALID_PROGRAM_EXECUTABLE)
    }

    fn retain_kernel(&self, _kernel: RtKernel) -> RtResult<()> {
        Err(Status::INVALID_KERNEL)
    }

    fn release_kernel(&self, _kernel: RtKernel) -> RtResult<()> {
        Err(Status::INVALID_KERNEL)
    }

    fn set_kernel_arg(&self, _kernel: RtKernel, _index: u32, _value: &[u8]) -> RtResult<()> {
        Err(Status::INVALID_KERNEL)
    }

    fn set_kernel_arg_mem(&self, _kernel: RtKernel, _index: u32, _mem: RtMem) -> RtResult<()> {
        Err(Status::INVALID_KERNEL)
    }

    fn set_kernel_arg_sampler(
        &self,
        _kernel: RtKernel,
        _index: u32,
        _sampler: RtSampler,
    ) -> RtResult<()> {
        Err(Status::INVALID_KERNEL)
    }

    fn set_kernel_arg_local(&self, _kernel: RtKernel, _index: u32, _size: u64) -> RtResult<()> {
        Err(Status::INVALID_KERNEL)
    }

    fn kernel_info(&self, _kernel: RtKernel, _param: u32) -> RtResult<Vec<u8>> {
        Err(Status::INVALID_KERNEL)
    }

    fn kernel_arg_info(&self, _kernel: RtKernel, _index: u32, _param: u32) -> RtResult<Vec<u8>> {
        Err(Status::INVALID_KERNEL)
    }

    fn kernel_work_group_info(
        &self,
        _kernel: RtKernel,
        _device: RtDevice,
        _param: u32,
    ) -> RtResult<Vec<u8>> {
        Err(Status::INVALID_KERNEL)
    }

    fn create_user_event(&self, context: RtContext) -> RtResult<RtEvent> {
        let mut state = self.state.lock().unwrap();
        state.context(context)?;
        let id = state.mint();
        state.events.insert(
            id,
            Arc::new(Event {
                state: Mutex::new(2),
                cond: Condvar::new(),
                user: true,
                profile: Mutex::new([0; 4]),
            }),
        );
        Ok(RtEvent(id))
    }

    fn set_user_event_status(&self, event: RtEvent, status: i32) -> RtResult<()> {
        if status > 0 {
            return Err(Status::INVALID_VALUE);
        }
        let ev = self.state.lock().unwrap().event(event)?;
        if !ev.user {
            return Err(Status::INVALID_EVENT);
        }
        let mut st = ev.state.lock().unwrap();
        if *st <= 0 {
            // Terminal states are set once.
            return Err(Status::INVALID_OPERATION);
        }
        *st = status;
        ev.cond.notify_all();
        Ok(())
    }

    fn retain_event(&self, event: RtEvent) -> RtResult<()> {
        // Event lifetime on this device is carried by the Arc in the
        // table; the explicit count is the table entry itself.
        self.state.lock().unwrap().event(event)?;
        Ok(())
    }

    fn release_event(&self, event: RtEvent) -> RtResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .events
            .remove(&event.0)
            .map(|_| ())
            .ok_or(Status::INVALID_EVENT)
    }

    fn wait_events(&self, events: &[RtEvent]) -> RtResult<()> {
        let handles: Vec<Arc<Event>> = {
            let state = self.state.lock().unwrap();
            events
                .iter()
                .map(|e| state.event(*e))
                .collect::<RtResult<_>>()?
        };
        for ev in handles {
            let mut st = ev.state.lock().unwrap();
            while *st > 0 {
                st = ev.cond.wait(st).unwrap();
            }
            if *st < 0 {
                return Err(Status(*st));
            }
        }
        Ok(())
    }

    fn event_info(&self, event: RtEvent, param: u32) -> RtResult<Vec<u8>> {
        let ev = self.state.lock().unwrap().event(event)?;
        match param {
            info::EVENT_COMMAND_EXECUTION_STATUS => Ok(info_i32(*ev.state.lock().unwrap())),
            info::EVENT_REFERENCE_COUNT => Ok(info_u32(1)),
            _ => Err(Status::INVALID_VALUE),
        }
    }

    fn profiling_info(&self, event: RtEvent, param: u32) -> RtResult<Vec<u8>> {
        let ev = self.state.lock().unwrap().event(event)?;
        if ev.user {
            return Err(Status::PROFILING_INFO_NOT_AVAILABLE);
        }
        if *ev.state.lock().unwrap() != 0 {
            return Err(Status::PROFILING_INFO_NOT_AVAILABLE);
        }
        let profile = ev.profile.lock().unwrap();
        match param {
            info::PROFILING_COMMAND_QUEUED => Ok(info_u64(profile[0])),
            info::PROFILING_COMMAND_SUBMIT => Ok(info_u64(profile[1])),
            info::PROFILING_COMMAND_START => Ok(info_u64(profile[2])),
            info::PROFILING_COMMAND_END => Ok(info_u64(profile[3])),
            _ => Err(Status::INVALID_VALUE),
        }
    }

    fn enqueue_read_buffer(
        &self,
        queue: RtQueue,
        mem: RtMem,
        offset: u64,
        len: u64,
    ) -> RtResult<(Vec<u8>, RtEvent)> {
        let queued = self.now();
        let mut state = self.state.lock().unwrap();
        state.queue(queue)?;
        let m = state.buffer(mem)?;
        m.check_range(offset, len)?;
        let data =
            m.with_slice(|s| s[offset as usize..(offset + len) as usize].to_vec());
        let event = self.completed_event(&mut state, queued);
        Ok((data, event))
    }

    fn enqueue_write_buffer(
        &self,
        queue: RtQueue,
        mem: RtMem,
        offset: u64,
        data: &[u8],
    ) -> RtResult<RtEvent> {
        let queued = self.now();
        let mut state = self.state.lock().unwrap();
        state.queue(queue)?;
        let m = state.buffer(mem)?;
        m.check_range(offset, data.len() as u64)?;
        m.with_slice_mut(|s| {
            s[offset as usize..offset as usize + data.len()].copy_from_slice(data)
        });
        Ok(self.completed_event(&mut state, queued))
    }

    fn enqueue_copy_buffer(
        &self,
        queue: RtQueue,
        src: RtMem,
        dst: RtMem,
        src_offset: u64,
        dst_offset: u64,
        len: u64,
    ) -> RtResult<RtEvent> {
        let queued = self.now();
        let mut state = self.state.lock().unwrap();
        state.queue(queue)?;
        let s = state.buffer(src)?;
        s.check_range(src_offset, len)?;
        let data = s.with_slice(|b| b[src_offset as usize..(src_offset + len) as usize].to_vec());
        let d = state.buffer(dst)?;
        d.check_range(dst_offset, len)?;
        d.with_slice_mut(|b| {
            b[dst_offset as usize..(dst_offset + len) as usize].copy_from_slice(&data)
        });
        Ok(self.completed_event(&mut state, queued))
    }

    fn enqueue_read_buffer_rect(
        &self,
        queue: RtQueue,
        mem: RtMem,
        origin: [u64; 3],
        region: [u64; 3],
        row_pitch: u64,
        slice_pitch: u64,
    ) -> RtResult<(Vec<u8>, RtEvent)> {
        let queued = self.now();
        let mut state = self.state.lock().unwrap();
        state.queue(queue)?;
        let m = state.buffer(mem)?;
        let layout =
            RectLayout::new(region, row_pitch, slice_pitch).ok_or(Status::INVALID_VALUE)?;
        let dense = m
            .with_slice(|s| rect::gather(s, origin, region, layout))
            .ok_or(Status::INVALID_VALUE)?;
        let event = self.completed_event(&mut state, queued);
        Ok((dense, event))
    }

    fn enqueue_write_buffer_rect(
        &self,
        queue: RtQueue,
        mem: RtMem,
        origin: [u64; 3],
        region: [u64; 3],
        row_pitch: u64,
        slice_pitch: u64,
        dense: &[u8],
    ) -> RtResult<RtEvent> {
        let queued = self.now();
        let mut state = self.state.lock().unwrap();
        state.queue(queue)?;
        let m = state.buffer(mem)?;
        let layout =
            RectLayout::new(region, row_pitch, slice_pitch).ok_or(Status::INVALID_VALUE)?;
        m.with_slice_mut(|s| rect::scatter(dense, s, origin, region, layout))
            .ok_or(Status::INVALID_VALUE)?;
        Ok(self.completed_event(&mut state, queued))
    }

    fn enqueue_copy_buffer_rect(
        &self,
        queue: RtQueue,
        src: RtMem,
        dst: RtMem,
        src_origin: [u64; 3],
        dst_origin: [u64; 3],
        region: [u64; 3],
        src_pitches: (u64, u64),
        dst_pitches: (u64, u64),
    ) -> RtResult<RtEvent> {
        let (dense, _) = self.enqueue_read_buffer_rect(
            queue,
            src,
            src_origin,
            region,
            src_pitches.0,
            src_pitches.1,
        )?;
        self.enqueue_write_buffer_rect(
            queue,
            dst,
            dst_origin,
            region,
            dst_pitches.0,
            dst_pitches.1,
            &dense,
        )
    }

    fn enqueue_read_image(
        &self,
        queue: RtQueue,
        mem: RtMem,
        origin: [u64; 3],
        region: [u64; 3],
    ) -> RtResult<(Vec<u8>, RtEvent)> {
        let queued = self.now();
        let mut state = self.state.lock().unwrap();
        state.queue(queue)?;
        let (m, meta) = state.image(mem)?;
        let (borigin, bregion) = to_bytes(origin, region, meta.element_size);
        let layout = RectLayout {
            row_pitch: meta.row_pitch,
            slice_pitch: meta.slice_pitch,
        };
        let dense = m
            .with_slice(|s| rect::gather(s, borigin, bregion, layout))
            .ok_or(Status::INVALID_VALUE)?;
        let event = self.completed_event(&mut state, queued);
        Ok((dense, event))
    }

    fn enqueue_write_image(
        &self,
        queue: RtQueue,
        mem: RtMem,
        origin: [u64; 3],
        region: [u64; 3],
        dense: &[u8],
    ) -> RtResult<RtEvent> {
        let queued = self.now();
        let mut state = self.state.lock().unwrap();
        state.queue(queue)?;
        let (m, meta) = state.image(mem)?;
        let (borigin, bregion) = to_bytes(origin, region, meta.element_size);
        let layout = RectLayout {
            row_pitch: meta.row_pitch,
            slice_pitch: meta.slice_pitch,
        };
        m.with_slice_mut(|s| rect::scatter(dense, s, borigin, bregion, layout))
            .ok_or(Status::INVALID_VALUE)?;
        Ok(self.completed_event(&mut state, queued))
    }

    fn enqueue_copy_image(
        &self,
        queue: RtQueue,
        src: RtMem,
        dst: RtMem,
        src_origin: [u64; 3],
        dst_origin: [u64; 3],
        region: [u64; 3],
    ) -> RtResult<RtEvent> {
        {
            // Element sizes must agree for a pixel-wise copy.
            let state = self.state.lock().unwrap();
            let (_, s_meta) = state.image(src)?;
            let (_, d_meta) = state.image(dst)?;
            if s_meta.element_size != d_meta.element_size {
                return Err(Status::INVALID_VALUE);
            }
        }
        let (dense, _) = self.enqueue_read_image(queue, src, src_origin, region)?;
        self.enqueue_write_image(queue, dst, dst_origin, region, &dense)
    }

    fn enqueue_copy_image_to_buffer(
        &self,
        queue: RtQueue,
        image: RtMem,
        buffer: RtMem,
        origin: [u64; 3],
        region: [u64; 3],
        dst_offset: u64,
    ) -> RtResult<RtEvent> {
        let (dense, _) = self.enqueue_read_image(queue, image, origin, region)?;
        self.enqueue_write_buffer(queue, buffer, dst_offset, &dense)
    }

    fn enqueue_copy_buffer_to_image(
        &self,
        queue: RtQueue,
        buffer: RtMem,
        image: RtMem,
        src_offset: u64,
        dst_origin: [u64; 3],
        region: [u64; 3],
    ) -> RtResult<RtEvent> {
        let element = {
            let state = self.state.lock().unwrap();
            let (_, meta) = state.image(image)?;
            meta.element_size
        };
        let len = rect::dense_size(region) * element;
        let (dense, _) = self.enqueue_read_buffer(queue, buffer, src_offset, len)?;
        self.enqueue_write_image(queue, image, dst_origin, region, &dense)
    }

    fn enqueue_fill_buffer(
        &self,
        queue: RtQueue,
        mem: RtMem,
        pattern: &[u8],
        offset: u64,
        size: u64,
    ) -> RtResult<RtEvent> {
        let queued = self.now();
        let mut state = self.state.lock().unwrap();
        state.queue(queue)?;
        let m = state.buffer(mem)?;
        let plen = pattern.len() as u64;
        if plen == 0 || offset % plen != 0 || size % plen != 0 {
            return Err(Status::INVALID_VALUE);
        }
        m.check_range(offset, size)?;
        m.with_slice_mut(|s| {
            for chunk in s[offset as usize..(offset + size) as usize].chunks_exact_mut(plen as usize)
            {
                chunk.copy_from_slice(pattern);
            }
        });
        Ok(self.completed_event(&mut state, queued))
    }

    fn enqueue_fill_image(
        &self,
        queue: RtQueue,
        mem: RtMem,
        color: &[u8],
        origin: [u64; 3],
        region: [u64; 3],
    ) -> RtResult<RtEvent> {
        let pixel = {
            let state = self.state.lock().unwrap();
            let (_, meta) = state.image(mem)?;
            encode_fill_color(color, meta.format)?
        };
        let mut dense = Vec::with_capacity((rect::dense_size(region) * pixel.len() as u64) as usize);
        for _ in 0..rect::dense_size(region) {
            dense.extend_from_slice(&pixel);
        }
        self.enqueue_write_image(queue, mem, origin, region, &dense)
    }

    fn enqueue_migrate(&self, queue: RtQueue, mems: &[RtMem], _flags: u64) -> RtResult<RtEvent> {
        let queued = self.now();
        let mut state = self.state.lock().unwrap();
        state.queue(queue)?;
        for m in mems {
            state.mem(*m)?;
        }
        // There is exactly one place the data can live.
        Ok(self.completed_event(&mut state, queued))
    }

    fn enqueue_ndrange(
        &self,
        queue: RtQueue,
        _kernel: RtKernel,
        _work_dim: u32,
        _global_offset: Option<&[u64]>,
        _global_size: &[u64],
        _local_size: Option<&[u64]>,
    ) -> RtResult<RtEvent> {
        self.state.lock().unwrap().queue(queue)?;
        // No kernel handle can have been produced by this device.
        Err(Status::INVALID_KERNEL)
    }

    fn enqueue_marker(&self, queue: RtQueue) -> RtResult<RtEvent> {
        let queued = self.now();
        let mut state = self.state.lock().unwrap();
        state.queue(queue)?;
        Ok(self.completed_event(&mut state, queued))
    }

    fn enqueue_barrier(&self, queue: RtQueue) -> RtResult<RtEvent> {
        let queued = self.now();
        let mut state = self.state.lock().unwrap();
        state.queue(queue)?;
        Ok(self.completed_event(&mut state, queued))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cl_protocol::types::device_type;

    fn setup() -> (SoftRuntime, RtContext, RtQueue) {
        let rt = SoftRuntime::new();
        let platform = rt.platform_ids().unwrap()[0];
        let devices = rt.device_ids(platform, device_type::ALL).unwrap();
        let context = rt.create_context(Some(platform), &devices).unwrap();
        let queue = rt.create_queue(context, devices[0], 0).unwrap();
        (rt, context, queue)
    }

    #[test]
    fn buffer_write_read_round_trip() {
        let (rt, ctx, q) = setup();
        let data: Vec<u8> = (0..255).collect();
        let buf = rt
            .create_buffer(ctx, MemFlags::READ_WRITE, 255, None)
            .unwrap();
        rt.enqueue_write_buffer(q, buf, 0, &data).unwrap();
        let (back, ev) = rt.enqueue_read_buffer(q, buf, 0, 255).unwrap();
        assert_eq!(back, data);
        rt.wait_events(&[ev]).unwrap();
    }

    #[test]
    fn sub_buffer_aliases_parent() {
        let (rt, ctx, q) = setup();
        let buf = rt
            .create_buffer(ctx, MemFlags::READ_WRITE, 64, Some(vec![0xAA; 64]))
            .unwrap();
        let sub = rt
            .create_sub_buffer(buf, MemFlags::READ_WRITE, 16, 8)
            .unwrap();
        rt.enqueue_write_buffer(q, sub, 0, &[7; 8]).unwrap();
        let (back, _) = rt.enqueue_read_buffer(q, buf, 16, 8).unwrap();
        assert_eq!(back, [7; 8]);
        // And sub-buffers of sub-buffers are refused.
        assert_eq!(
            rt.create_sub_buffer(sub, MemFlags::READ_WRITE, 0, 4),
            Err(Status::INVALID_MEM_OBJECT)
        );
    }

    #[test]
    fn out_of_range_access_is_invalid() {
        let (rt, ctx, q) = setup();
        let buf = rt.create_buffer(ctx, MemFlags::READ_WRITE, 16, None).unwrap();
        assert_eq!(
            rt.enqueue_read_buffer(q, buf, 8, 9).unwrap_err(),
            Status::INVALID_VALUE
        );
    }

    #[test]
    fn fill_buffer_repeats_pattern() {
        let (rt, ctx, q) = setup();
        let buf = rt.create_buffer(ctx, MemFlags::READ_WRITE, 16, None).unwrap();
        rt.enqueue_fill_buffer(q, buf, &[1, 2], 4, 8).unwrap();
        let (back, _) = rt.enqueue_read_buffer(q, buf, 0, 16).unwrap();
        assert_eq!(back, [0, 0, 0, 0, 1, 2, 1, 2, 1, 2, 1, 2, 0, 0, 0, 0]);
        // An offset that is not a multiple of the pattern is refused.
        assert_eq!(
            rt.enqueue_fill_buffer(q, buf, &[1, 2], 3, 4).unwrap_err(),
            Status::INVALID_VALUE
        );
    }

    #[test]
    fn rect_copy_applies_pitches() {
        let (rt, ctx, q) = setup();
        // Two 8x2 buffers; copy a 4x2 region between different origins.
        let src = rt
            .create_buffer(ctx, MemFlags::READ_WRITE, 16, Some((0..16).collect()))
            .unwrap();
        let dst = rt.create_buffer(ctx, MemFlags::READ_WRITE, 16, None).unwrap();
        rt.enqueue_copy_buffer_rect(
            q,
            src,
            dst,
            [0, 0, 0],
            [4, 0, 0],
            [4, 2, 1],
            (8, 0),
            (8, 0),
        )
        .unwrap();
        let (back, _) = rt.enqueue_read_buffer(q, dst, 0, 16).unwrap();
        assert_eq!(back, [0, 0, 0, 0, 0, 1, 2, 3, 0, 0, 0, 0, 8, 9, 10, 11]);
    }

    #[test]
    fn image_round_trip_with_region() {
        let (rt, ctx, q) = setup();
        let format = ImageFormat {
            channel_order: 0x10B5, // RGBA
            channel_type: 0x10D2,  // UNORM_INT8
        };
        let desc = ImageDesc {
            image_type: image_type::IMAGE2D,
            width: 4,
            height: 4,
            ..Default::default()
        };
        let img = rt
            .create_image(ctx, MemFlags::READ_WRITE, format, &desc, None)
            .unwrap();
        let pixels = vec![9u8; 2 * 2 * 4];
        rt.enqueue_write_image(q, img, [1, 1, 0], [2, 2, 1], &pixels)
            .unwrap();
        let (back, _) = rt.enqueue_read_image(q, img, [1, 1, 0], [2, 2, 1]).unwrap();
        assert_eq!(back, pixels);
        let (corner, _) = rt.enqueue_read_image(q, img, [0, 0, 0], [1, 1, 1]).unwrap();
        assert_eq!(corner, [0, 0, 0, 0]);
    }

    #[test]
    fn user_event_gates_wait() {
        let (rt, ctx, _q) = setup();
        let ev = rt.create_user_event(ctx).unwrap();
        let rt = std::sync::Arc::new(rt);
        let waiter = {
            let rt = std::sync::Arc::clone(&rt);
            std::thread::spawn(move || rt.wait_events(&[ev]))
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!waiter.is_finished());
        rt.set_user_event_status(ev, 0).unwrap();
        waiter.join().unwrap().unwrap();
        // A settled user event cannot be set again.
        assert_eq!(
            rt.set_user_event_status(ev, 0).unwrap_err(),
            Status::INVALID_OPERATION
        );
    }

    #[test]
    fn no_compiler_no_kernels() {
        let (rt, ctx, _q) = setup();
        let program = rt
            .create_program_with_source(ctx, &["__kernel void f() {}".into()])
            .unwrap();
        assert_eq!(
            rt.build_program(program, &[RtDevice(DEVICE_ID)], "").unwrap_err(),
            Status::COMPILER_NOT_AVAILABLE
        );
        assert_eq!(
            rt.create_kernel(program, "f").unwrap_err(),
            Status::INVALID_PROGRAM_EXECUTABLE
        );
        let log = rt
            .program_build_info(program, RtDevice(DEVICE_ID), info::PROGRAM_BUILD_LOG)
            .unwrap();
        assert!(!log.is_empty());
    }

    #[test]
    fn release_to_zero_frees_the_object() {
        let (rt, ctx, q) = setup();
        let buf = rt.create_buffer(ctx, MemFlags::READ_WRITE, 8, None).unwrap();
        rt.retain_mem(buf).unwrap();
        rt.release_mem(buf).unwrap();
        // Still alive after one release of two references.
        rt.enqueue_write_buffer(q, buf, 0, &[1; 8]).unwrap();
        rt.release_mem(buf).unwrap();
        assert_eq!(
            rt.enqueue_write_buffer(q, buf, 0, &[1; 8]).unwrap_err(),
            Status::INVALID_MEM_OBJECT
        );
    }
}
