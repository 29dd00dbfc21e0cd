// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The seam between the dispatcher and the accelerator runtime it drives.
//!
//! Handlers never talk to an accelerator directly; they go through
//! [`Runtime`], which exposes exactly the operations the wrapped API needs,
//! in terms of opaque per-kind runtime handles. The dispatcher's registry
//! owns the mapping between wire identities and these handles, so a
//! `Runtime` implementation knows nothing about connections or the wire.
//!
//! Wait-lists never reach a `Runtime`: the dispatcher and the transfer
//! workers satisfy them before issuing the call (locally-created events via
//! the event table's wait, runtime-native ones via [`Runtime::wait_events`]),
//! so every enqueue here starts unconditionally. An implementation may
//! complete a transfer before returning, in which case the event it hands
//! back is already complete.

pub mod soft;

use cl_protocol::types::{ImageDesc, ImageFormat, MemFlags, Status};

/// Runtime calls report the API's own status codes, which propagate to the
/// client verbatim.
pub type RtResult<T> = Result<T, Status>;

macro_rules! rt_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);
    };
}

rt_handle!(RtPlatform);
rt_handle!(RtDevice);
rt_handle!(RtContext);
rt_handle!(RtQueue);
rt_handle!(RtMem);
rt_handle!(RtSampler);
rt_handle!(RtProgram);
rt_handle!(RtKernel);
rt_handle!(RtEvent);

pub trait Runtime: Send + Sync {
    // Platforms and devices.
    fn platform_ids(&self) -> RtResult<Vec<RtPlatform>>;
    fn platform_info(&self, platform: RtPlatform, param: u32) -> RtResult<Vec<u8>>;
    fn device_ids(&self, platform: RtPlatform, device_type: u64) -> RtResult<Vec<RtDevice>>;
    fn device_info(&self, device: RtDevice, param: u32) -> RtResult<Vec<u8>>;
    fn create_sub_devices(&self, device: RtDevice, properties: &[u64]) -> RtResult<Vec<RtDevice>>;
    fn retain_device(&self, device: RtDevice) -> RtResult<()>;
    fn release_device(&self, device: RtDevice) -> RtResult<()>;

    // Contexts.
    fn create_context(
        &self,
        platform: Option<RtPlatform>,
        devices: &[RtDevice],
    ) -> RtResult<RtContext>;
    fn create_context_from_type(
        &self,
        platform: Option<RtPlatform>,
        device_type: u64,
    ) -> RtResult<(RtContext, Vec<RtDevice>)>;
    fn retain_context(&self, context: RtContext) -> RtResult<()>;
    fn release_context(&self, context: RtContext) -> RtResult<()>;
    fn context_info(&self, context: RtContext, param: u32) -> RtResult<Vec<u8>>;

    // Command queues.
    fn create_queue(&self, context: RtContext, device: RtDevice, properties: u64)
        -> RtResult<RtQueue>;
    fn retain_queue(&self, queue: RtQueue) -> RtResult<()>;
    fn release_queue(&self, queue: RtQueue) -> RtResult<()>;
    fn queue_info(&self, queue: RtQueue, param: u32) -> RtResult<Vec<u8>>;
    fn flush(&self, queue: RtQueue) -> RtResult<()>;
    fn finish(&self, queue: RtQueue) -> RtResult<()>;

    // Memory objects.
    fn create_buffer(
        &self,
        context: RtContext,
        flags: MemFlags,
        size: u64,
        host_data: Option<Vec<u8>>,
    ) -> RtResult<RtMem>;
    fn create_sub_buffer(
        &self,
        parent: RtMem,
        flags: MemFlags,
        origin: u64,
        size: u64,
    ) -> RtResult<RtMem>;
    fn create_image(
        &self,
        context: RtContext,
        flags: MemFlags,
        format: ImageFormat,
        desc: &ImageDesc,
        host_data: Option<Vec<u8>>,
    ) -> RtResult<RtMem>;
    fn retain_mem(&self, mem: RtMem) -> RtResult<()>;
    fn release_mem(&self, mem: RtMem) -> RtResult<()>;
    fn supported_image_formats(
        &self,
        context: RtContext,
        flags: MemFlags,
        image_type: u32,
    ) -> RtResult<Vec<ImageFormat>>;
    fn mem_info(&self, mem: RtMem, param: u32) -> RtResult<Vec<u8>>;
    fn image_info(&self, mem: RtMem, param: u32) -> RtResult<Vec<u8>>;

    // Samplers.
    fn create_sampler(
        &self,
        context: RtContext,
        normalized_coords: bool,
        addressing_mode: u32,
        filter_mode: u32,
    ) -> RtResult<RtSampler>;
    fn retain_sampler(&self, sampler: RtSampler) -> RtResult<()>;
    fn release_sampler(&self, sampler: RtSampler) -> RtResult<()>;
    fn sampler_info(&self, sampler: RtSampler, param: u32) -> RtResult<Vec<u8>>;

    // Programs.
    fn create_program_with_source(
        &self,
        context: RtContext,
        sources: &[String],
    ) -> RtResult<RtProgram>;
    /// On success also reports the per-device load status of each binary.
    fn create_program_with_binary(
        &self,
        context: RtContext,
        devices: &[RtDevice],
        binaries: &[Vec<u8>],
    ) -> RtResult<(RtProgram, Vec<Status>)>;
    fn create_program_with_builtin_kernels(
        &self,
        context: RtContext,
        devices: &[RtDevice],
        kernel_names: &str,
    ) -> RtResult<RtProgram>;
    fn retain_program(&self, program: RtProgram) -> RtResult<()>;
    fn release_program(&self, program: RtProgram) -> RtResult<()>;
    fn build_program(
        &self,
        program: RtProgram,
        devices: &[RtDevice],
        options: &str,
    ) -> RtResult<()>;
    fn compile_program(
        &self,
        program: RtProgram,
        devices: &[RtDevice],
        options: &str,
        headers: &[(String, RtProgram)],
    ) -> RtResult<()>;
    fn link_program(
        &self,
        context: RtContext,
        devices: &[RtDevice],
        options: &str,
        programs: &[RtProgram],
    ) -> RtResult<RtProgram>;
    fn unload_compiler(&self, platform: RtPlatform) -> RtResult<()>;
    fn program_info(&self, program: RtProgram, param: u32) -> RtResult<Vec<u8>>;
    fn program_build_info(
        &self,
        program: RtProgram,
        device: RtDevice,
        param: u32,
    ) -> RtResult<Vec<u8>>;

    // Kernels.
    fn create_kernel(&self, program: RtProgram, name: &str) -> RtResult<RtKernel>;
    fn create_kernels_in_program(&self, program: RtProgram) -> RtResult<Vec<RtKernel>>;
    fn retain_kernel(&self, kernel: RtKernel) -> RtResult<()>;
    fn release_kernel(&self, kernel: RtKernel) -> RtResult<()>;
    fn set_kernel_arg(&self, kernel: RtKernel, index: u32, value: &[u8]) -> RtResult<()>;
    fn set_kernel_arg_mem(&self, kernel: RtKernel, index: u32, mem: RtMem) -> RtResult<()>;
    fn set_kernel_arg_sampler(
        &self,
        kernel: RtKernel,
        index: u32,
        sampler: RtSampler,
    ) -> RtResult<()>;
    fn set_kernel_arg_local(&self, kernel: RtKernel, index: u32, size: u64) -> RtResult<()>;
    fn kernel_info(&self, kernel: RtKernel, param: u32) -> RtResult<Vec<u8>>;
    fn kernel_arg_info(&self, kernel: RtKernel, index: u32, param: u32) -> RtResult<Vec<u8>>;
    fn kernel_work_group_info(
        &self,
        kernel: RtKernel,
        device: RtDevice,
        param: u32,
    ) -> RtResult<Vec<u8>>;

    // Events.
    fn create_user_event(&self, context: RtContext) -> RtResult<RtEvent>;
    fn set_user_event_status(&self, event: RtEvent, status: i32) -> RtResult<()>;
    fn retain_event(&self, event: RtEvent) -> RtResult<()>;
    fn release_event(&self, event: RtEvent) -> RtResult<()>;
    /// Block until every listed runtime event settles.
    fn wait_events(&self, events: &[RtEvent]) -> RtResult<()>;
    fn event_info(&self, event: RtEvent, param: u32) -> RtResult<Vec<u8>>;
    fn profiling_info(&self, event: RtEvent, param: u32) -> RtResult<Vec<u8>>;

    // Bulk transfers. Reads hand the bytes back densely packed; rect
    // variants apply the buffer-side pitches, so the block is always
    // `region[0] * region[1] * region[2]` bytes (pixels for images scale
    // by the element size).
    fn enqueue_read_buffer(
        &self,
        queue: RtQueue,
        mem: RtMem,
        offset: u64,
        len: u64,
    ) -> RtResult<(Vec<u8>, RtEvent)>;
    fn enqueue_write_buffer(
        &self,
        queue: RtQueue,
        mem: RtMem,
        offset: u64,
        data: &[u8],
    ) -> RtResult<RtEvent>;
    fn enqueue_copy_buffer(
        &self,
        queue: RtQueue,
        src: RtMem,
        dst: RtMem,
        src_offset: u64,
        dst_offset: u64,
        len: u64,
    ) -> RtResult<RtEvent>;
    fn enqueue_read_buffer_rect(
        &self,
        queue: RtQueue,
        mem: RtMem,
        origin: [u64; 3],
        region: [u64; 3],
        row_pitch: u64,
        slice_pitch: u64,
    ) -> RtResult<(Vec<u8>, RtEvent)>;
    fn enqueue_write_buffer_rect(
        &self,
        queue: RtQueue,
        mem: RtMem,
        origin: [u64; 3],
        region: [u64; 3],
        row_pitch: u64,
        slice_pitch: u64,
        dense: &[u8],
    ) -> RtResult<RtEvent>;
    #[allow(clippy::too_many_arguments)]
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
    ) -> RtResult<RtEvent>;
    fn enqueue_read_image(
        &self,
        queue: RtQueue,
        mem: RtMem,
        origin: [u64; 3],
        region: [u64; 3],
    ) -> RtResult<(Vec<u8>, RtEvent)>;
    fn enqueue_write_image(
        &self,
        queue: RtQueue,
        mem: RtMem,
        origin: [u64; 3],
        region: [u64; 3],
        dense: &[u8],
    ) -> RtResult<RtEvent>;
    fn enqueue_copy_image(
        &self,
        queue: RtQueue,
        src: RtMem,
        dst: RtMem,
        src_origin: [u64; 3],
        dst_origin: [u64; 3],
        region: [u64; 3],
    ) -> RtResult<RtEvent>;
    fn enqueue_copy_image_to_buffer(
        &self,
        queue: RtQueue,
        image: RtMem,
        buffer: RtMem,
        origin: [u64; 3],
        region: [u64; 3],
        dst_offset: u64,
    ) -> RtResult<RtEvent>;
    fn enqueue_copy_buffer_to_image(
        &self,
        queue: RtQueue,
        buffer: RtMem,
        image: RtMem,
        src_offset: u64,
        dst_origin: [u64; 3],
        region: [u64; 3],
    ) -> RtResult<RtEvent>;
    fn enqueue_fill_buffer(
        &self,
        queue: RtQueue,
        mem: RtMem,
        pattern: &[u8],
        offset: u64,
        size: u64,
    ) -> RtResult<RtEvent>;
    fn enqueue_fill_image(
        &self,
        queue: RtQueue,
        mem: RtMem,
        color: &[u8],
        origin: [u64; 3],
        region: [u64; 3],
    ) -> RtResult<RtEvent>;
    fn enqueue_migrate(&self, queue: RtQueue, mems: &[RtMem], flags: u64) -> RtResult<RtEvent>;
    fn enqueue_ndrange(
        &self,
        queue: RtQueue,
        kernel: RtKernel,
        work_dim: u32,
        global_offset: Option<&[u64]>,
        global_size: &[u64],
        local_size: Option<&[u64]>,
    ) -> RtResult<RtEvent>;
    fn enqueue_task(&self, queue: RtQueue, kernel: RtKernel) -> RtResult<RtEvent> {
        self.enqueue_ndrange(queue, kernel, 1, None, &[1], Some(&[1]))
    }
    fn enqueue_marker(&self, queue: RtQueue) -> RtResult<RtEvent>;
    fn enqueue_barrier(&self, queue: RtQueue) -> RtResult<RtEvent>;
}
