// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The status vocabulary and the plain value types both peers agree on.

use bitflags::bitflags;

use std::fmt;

/// A status code as the compute API defines them: zero for success,
/// negative for errors. Kept as a raw `i32` rather than a closed enum so
/// codes reported by an accelerator runtime propagate to the client
/// verbatim, including ones this crate has no name for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

impl Status {
    pub const SUCCESS: Status = Status(0);
    pub const DEVICE_NOT_FOUND: Status = Status(-1);
    pub const COMPILER_NOT_AVAILABLE: Status = Status(-3);
    pub const OUT_OF_RESOURCES: Status = Status(-5);
    pub const OUT_OF_HOST_MEMORY: Status = Status(-6);
    pub const PROFILING_INFO_NOT_AVAILABLE: Status = Status(-7);
    pub const BUILD_PROGRAM_FAILURE: Status = Status(-11);
    pub const MAP_FAILURE: Status = Status(-12);
    pub const MISALIGNED_SUB_BUFFER_OFFSET: Status = Status(-13);
    pub const INVALID_VALUE: Status = Status(-30);
    pub const INVALID_DEVICE_TYPE: Status = Status(-31);
    pub const INVALID_PLATFORM: Status = Status(-32);
    pub const INVALID_DEVICE: Status = Status(-33);
    pub const INVALID_CONTEXT: Status = Status(-34);
    pub const INVALID_QUEUE_PROPERTIES: Status = Status(-35);
    pub const INVALID_COMMAND_QUEUE: Status = Status(-36);
    pub const INVALID_HOST_PTR: Status = Status(-37);
    pub const INVALID_MEM_OBJECT: Status = Status(-38);
    pub const INVALID_IMAGE_FORMAT_DESCRIPTOR: Status = Status(-39);
    pub const INVALID_IMAGE_SIZE: Status = Status(-40);
    pub const INVALID_SAMPLER: Status = Status(-41);
    pub const INVALID_BINARY: Status = Status(-42);
    pub const INVALID_BUILD_OPTIONS: Status = Status(-43);
    pub const INVALID_PROGRAM: Status = Status(-44);
    pub const INVALID_PROGRAM_EXECUTABLE: Status = Status(-45);
    pub const INVALID_KERNEL_NAME: Status = Status(-46);
    pub const INVALID_KERNEL: Status = Status(-48);
    pub const INVALID_ARG_INDEX: Status = Status(-49);
    pub const INVALID_ARG_VALUE: Status = Status(-50);
    pub const INVALID_ARG_SIZE: Status = Status(-51);
    pub const INVALID_KERNEL_ARGS: Status = Status(-52);
    pub const INVALID_WORK_DIMENSION: Status = Status(-53);
    pub const INVALID_WORK_GROUP_SIZE: Status = Status(-54);
    pub const INVALID_EVENT_WAIT_LIST: Status = Status(-57);
    pub const INVALID_EVENT: Status = Status(-58);
    pub const INVALID_OPERATION: Status = Status(-59);
    pub const INVALID_GL_OBJECT: Status = Status(-60);
    pub const INVALID_BUFFER_SIZE: Status = Status(-61);
    pub const INVALID_IMAGE_DESCRIPTOR: Status = Status(-65);
    pub const PLATFORM_NOT_FOUND: Status = Status(-1001);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Turn a non-success status into `Err`, for the common
    /// "decode status, bail unless ok" step of reading a reply.
    pub fn ok(self) -> Result<(), crate::Error> {
        if self.is_success() {
            Ok(())
        } else {
            Err(crate::Error::Api(self))
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::SUCCESS => "success",
            Self::DEVICE_NOT_FOUND => "device not found",
            Self::COMPILER_NOT_AVAILABLE => "compiler not available",
            Self::OUT_OF_RESOURCES => "out of resources",
            Self::OUT_OF_HOST_MEMORY => "out of host memory",
            Self::PROFILING_INFO_NOT_AVAILABLE => "profiling info not available",
            Self::BUILD_PROGRAM_FAILURE => "build program failure",
            Self::MAP_FAILURE => "map failure",
            Self::INVALID_VALUE => "invalid value",
            Self::INVALID_PLATFORM => "invalid platform",
            Self::INVALID_DEVICE => "invalid device",
            Self::INVALID_CONTEXT => "invalid context",
            Self::INVALID_COMMAND_QUEUE => "invalid command queue",
            Self::INVALID_MEM_OBJECT => "invalid memory object",
            Self::INVALID_SAMPLER => "invalid sampler",
            Self::INVALID_PROGRAM => "invalid program",
            Self::INVALID_PROGRAM_EXECUTABLE => "invalid program executable",
            Self::INVALID_KERNEL_NAME => "invalid kernel name",
            Self::INVALID_KERNEL => "invalid kernel",
            Self::INVALID_EVENT_WAIT_LIST => "invalid event wait list",
            Self::INVALID_EVENT => "invalid event",
            Self::INVALID_OPERATION => "invalid operation",
            Self::INVALID_GL_OBJECT => "invalid GL object",
            Self::INVALID_BUFFER_SIZE => "invalid buffer size",
            Self::INVALID_IMAGE_DESCRIPTOR => "invalid image descriptor",
            Self::PLATFORM_NOT_FOUND => "platform not found",
            Status(code) => return write!(f, "status {code}"),
        };
        f.write_str(name)
    }
}

/// Execution state of an event. On the wire this is the API's `i32`
/// encoding: complete = 0, running = 1, submitted = 2 (a queued state is
/// folded into submitted), and any negative value is the error that
/// terminated the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Submitted,
    Running,
    Complete,
    Error(Status),
}

impl ExecState {
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Complete | Self::Error(_))
    }

    pub fn to_wire(self) -> i32 {
        match self {
            Self::Complete => 0,
            Self::Running => 1,
            Self::Submitted => 2,
            Self::Error(Status(code)) => code,
        }
    }

    pub fn from_wire(raw: i32) -> Self {
        match raw {
            0 => Self::Complete,
            1 => Self::Running,
            // 3 is the queued state, which this protocol never
            // distinguishes from submitted.
            2 | 3 => Self::Submitted,
            code => Self::Error(Status(code)),
        }
    }
}

bitflags! {
    /// Memory object creation flags. The host-pointer trio is part of the
    /// vocabulary even though only `COPY_HOST_PTR` is expressible over the
    /// wire; the others must be rejected before transmission.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemFlags: u64 {
        const READ_WRITE = 1 << 0;
        const WRITE_ONLY = 1 << 1;
        const READ_ONLY = 1 << 2;
        const USE_HOST_PTR = 1 << 3;
        const ALLOC_HOST_PTR = 1 << 4;
        const COPY_HOST_PTR = 1 << 5;
        const HOST_WRITE_ONLY = 1 << 7;
        const HOST_READ_ONLY = 1 << 8;
        const HOST_NO_ACCESS = 1 << 9;
    }
}

impl MemFlags {
    /// Flags that can never be honoured by a remote peer: both ask the
    /// runtime to adopt the caller's own allocation.
    pub fn wants_host_memory(self) -> bool {
        self.intersects(Self::USE_HOST_PTR | Self::ALLOC_HOST_PTR)
    }

    /// Access flags only, as forwarded to the server.
    pub fn without_host_ptr(self) -> Self {
        self - (Self::USE_HOST_PTR | Self::ALLOC_HOST_PTR | Self::COPY_HOST_PTR)
    }
}

bitflags! {
    /// Flags of a synthesised map operation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u64 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const WRITE_INVALIDATE_REGION = 1 << 2;
    }
}

/// Device type selector for device listing and from-type context creation.
pub mod device_type {
    pub const DEFAULT: u64 = 1 << 0;
    pub const CPU: u64 = 1 << 1;
    pub const GPU: u64 = 1 << 2;
    pub const ACCELERATOR: u64 = 1 << 3;
    pub const CUSTOM: u64 = 1 << 4;
    pub const ALL: u64 = 0xFFFF_FFFF;
}

/// Channel layout of an image, `{order, data type}` as two `u32`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFormat {
    pub channel_order: u32,
    pub channel_type: u32,
}

/// Geometry of an image, in the descriptor form every creation path is
/// normalised to (the deprecated 2D/3D entry points fill one of these).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageDesc {
    pub image_type: u32,
    pub width: u64,
    pub height: u64,
    pub depth: u64,
    pub array_size: u64,
    pub row_pitch: u64,
    pub slice_pitch: u64,
}

pub mod image_type {
    pub const BUFFER: u32 = 0x10F0;
    pub const IMAGE2D: u32 = 0x10F1;
    pub const IMAGE3D: u32 = 0x10F2;
}

/// Byte width of one pixel of `format`, or `None` for a channel layout
/// outside the supported set. Both peers size image transfers with this:
/// the wire block of an image region is `region[0] * region[1] *
/// region[2]` pixels of exactly this many bytes.
pub fn element_size(format: ImageFormat) -> Option<u64> {
    let channels: u64 = match format.channel_order {
        0x10B0 /* R */ | 0x10B8 /* INTENSITY */ | 0x10B9 /* LUMINANCE */ => 1,
        0x10B2 /* RG */ => 2,
        0x10B5 /* RGBA */ | 0x10B6 /* BGRA */ | 0x10B7 /* ARGB */ => 4,
        _ => return None,
    };
    let width: u64 = match format.channel_type {
        0x10D0 /* SNORM_INT8 */ | 0x10D2 /* UNORM_INT8 */
        | 0x10D7 /* SIGNED_INT8 */ | 0x10DA /* UNSIGNED_INT8 */ => 1,
        0x10D1 /* SNORM_INT16 */ | 0x10D3 /* UNORM_INT16 */
        | 0x10D8 /* SIGNED_INT16 */ | 0x10DB /* UNSIGNED_INT16 */
        | 0x10DD /* HALF_FLOAT */ => 2,
        0x10D9 /* SIGNED_INT32 */ | 0x10DC /* UNSIGNED_INT32 */
        | 0x10DE /* FLOAT */ => 4,
        _ => return None,
    };
    Some(channels * width)
}

/// Command-type tags carried by events, reported by the event-info query.
pub mod command_type {
    pub const NDRANGE_KERNEL: u32 = 0x11F0;
    pub const TASK: u32 = 0x11F1;
    pub const READ_BUFFER: u32 = 0x11F3;
    pub const WRITE_BUFFER: u32 = 0x11F4;
    pub const COPY_BUFFER: u32 = 0x11F5;
    pub const READ_IMAGE: u32 = 0x11F6;
    pub const WRITE_IMAGE: u32 = 0x11F7;
    pub const COPY_IMAGE: u32 = 0x11F8;
    pub const COPY_IMAGE_TO_BUFFER: u32 = 0x11F9;
    pub const COPY_BUFFER_TO_IMAGE: u32 = 0x11FA;
    pub const MAP_BUFFER: u32 = 0x11FB;
    pub const MAP_IMAGE: u32 = 0x11FC;
    pub const UNMAP_MEM_OBJECT: u32 = 0x11FD;
    pub const MARKER: u32 = 0x11FE;
    pub const READ_BUFFER_RECT: u32 = 0x1201;
    pub const WRITE_BUFFER_RECT: u32 = 0x1202;
    pub const COPY_BUFFER_RECT: u32 = 0x1203;
    pub const USER: u32 = 0x1204;
    pub const BARRIER: u32 = 0x1205;
    pub const MIGRATE_MEM_OBJECTS: u32 = 0x1206;
    pub const FILL_BUFFER: u32 = 0x1207;
    pub const FILL_IMAGE: u32 = 0x1208;
}

/// The info-query parameter names the implementation itself consults.
/// Info queries carry the raw `u32` through the protocol, so this list is
/// only the subset that client shortcuts or the software device answer by
/// name; anything else is the runtime's business.
pub mod info {
    pub const PLATFORM_PROFILE: u32 = 0x0900;
    pub const PLATFORM_VERSION: u32 = 0x0901;
    pub const PLATFORM_NAME: u32 = 0x0902;
    pub const PLATFORM_VENDOR: u32 = 0x0903;
    pub const PLATFORM_EXTENSIONS: u32 = 0x0904;

    pub const DEVICE_TYPE: u32 = 0x1000;
    pub const DEVICE_MAX_COMPUTE_UNITS: u32 = 0x1002;
    pub const DEVICE_MAX_WORK_GROUP_SIZE: u32 = 0x1004;
    pub const DEVICE_GLOBAL_MEM_SIZE: u32 = 0x101F;
    pub const DEVICE_IMAGE_SUPPORT: u32 = 0x1016;
    pub const DEVICE_COMPILER_AVAILABLE: u32 = 0x1028;
    pub const DEVICE_NAME: u32 = 0x102B;
    pub const DEVICE_VENDOR: u32 = 0x102C;
    pub const DEVICE_VERSION: u32 = 0x102F;
    pub const DEVICE_PLATFORM: u32 = 0x1031;

    pub const CONTEXT_REFERENCE_COUNT: u32 = 0x1080;
    pub const CONTEXT_DEVICES: u32 = 0x1081;
    pub const CONTEXT_PROPERTIES: u32 = 0x1082;
    pub const CONTEXT_NUM_DEVICES: u32 = 0x1083;
    /// A context-properties key, not an info query; it shares the
    /// numbering space.
    pub const CONTEXT_PLATFORM: u32 = 0x1084;

    pub const QUEUE_CONTEXT: u32 = 0x1090;
    pub const QUEUE_DEVICE: u32 = 0x1091;
    pub const QUEUE_REFERENCE_COUNT: u32 = 0x1092;
    pub const QUEUE_PROPERTIES: u32 = 0x1093;

    pub const MEM_TYPE: u32 = 0x1100;
    pub const MEM_FLAGS: u32 = 0x1101;
    pub const MEM_SIZE: u32 = 0x1102;
    pub const MEM_REFERENCE_COUNT: u32 = 0x1105;
    pub const MEM_CONTEXT: u32 = 0x1106;
    pub const MEM_ASSOCIATED_MEMOBJECT: u32 = 0x1107;
    pub const MEM_OFFSET: u32 = 0x1108;

    pub const IMAGE_FORMAT: u32 = 0x1110;
    pub const IMAGE_ELEMENT_SIZE: u32 = 0x1111;
    pub const IMAGE_ROW_PITCH: u32 = 0x1112;
    pub const IMAGE_SLICE_PITCH: u32 = 0x1113;
    pub const IMAGE_WIDTH: u32 = 0x1114;
    pub const IMAGE_HEIGHT: u32 = 0x1115;
    pub const IMAGE_DEPTH: u32 = 0x1116;

    pub const SAMPLER_REFERENCE_COUNT: u32 = 0x1150;
    pub const SAMPLER_CONTEXT: u32 = 0x1151;
    pub const SAMPLER_NORMALIZED_COORDS: u32 = 0x1152;
    pub const SAMPLER_ADDRESSING_MODE: u32 = 0x1153;
    pub const SAMPLER_FILTER_MODE: u32 = 0x1154;

    pub const PROGRAM_REFERENCE_COUNT: u32 = 0x1160;
    pub const PROGRAM_CONTEXT: u32 = 0x1161;
    pub const PROGRAM_NUM_DEVICES: u32 = 0x1162;
    pub const PROGRAM_DEVICES: u32 = 0x1163;
    pub const PROGRAM_SOURCE: u32 = 0x1164;
    pub const PROGRAM_BINARY_SIZES: u32 = 0x1165;
    pub const PROGRAM_BINARIES: u32 = 0x1166;

    pub const PROGRAM_BUILD_STATUS: u32 = 0x1181;
    pub const PROGRAM_BUILD_OPTIONS: u32 = 0x1182;
    pub const PROGRAM_BUILD_LOG: u32 = 0x1183;

    pub const KERNEL_FUNCTION_NAME: u32 = 0x1190;
    pub const KERNEL_NUM_ARGS: u32 = 0x1191;
    pub const KERNEL_REFERENCE_COUNT: u32 = 0x1192;
    pub const KERNEL_CONTEXT: u32 = 0x1193;
    pub const KERNEL_PROGRAM: u32 = 0x1194;

    pub const KERNEL_ARG_ADDRESS_QUALIFIER: u32 = 0x1196;
    pub const KERNEL_ARG_ACCESS_QUALIFIER: u32 = 0x1197;
    pub const KERNEL_ARG_TYPE_NAME: u32 = 0x1198;
    pub const KERNEL_ARG_NAME: u32 = 0x119A;

    pub const KERNEL_WORK_GROUP_SIZE: u32 = 0x11B0;
    pub const KERNEL_LOCAL_MEM_SIZE: u32 = 0x11B2;

    pub const EVENT_COMMAND_QUEUE: u32 = 0x11D0;
    pub const EVENT_COMMAND_TYPE: u32 = 0x11D1;
    pub const EVENT_REFERENCE_COUNT: u32 = 0x11D2;
    pub const EVENT_COMMAND_EXECUTION_STATUS: u32 = 0x11D3;
    pub const EVENT_CONTEXT: u32 = 0x11D4;

    pub const PROFILING_COMMAND_QUEUED: u32 = 0x1280;
    pub const PROFILING_COMMAND_SUBMIT: u32 = 0x1281;
    pub const PROFILING_COMMAND_START: u32 = 0x1282;
    pub const PROFILING_COMMAND_END: u32 = 0x1283;
}

/// Address qualifier of a kernel argument, as the arg-info query reports
/// it. The client's argument rewriting keys off this.
pub mod arg_address {
    pub const GLOBAL: u32 = 0x119B;
    pub const LOCAL: u32 = 0x119C;
    pub const CONSTANT: u32 = 0x119D;
    pub const PRIVATE: u32 = 0x119E;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_state_wire_round_trip() {
        for state in [
            ExecState::Submitted,
            ExecState::Running,
            ExecState::Complete,
            ExecState::Error(Status::INVALID_OPERATION),
        ] {
            assert_eq!(ExecState::from_wire(state.to_wire()), state);
        }
        // The queued state folds into submitted.
        assert_eq!(ExecState::from_wire(3), ExecState::Submitted);
    }

    #[test]
    fn host_ptr_flags() {
        let flags = MemFlags::READ_WRITE | MemFlags::USE_HOST_PTR;
        assert!(flags.wants_host_memory());
        assert_eq!(flags.without_host_ptr(), MemFlags::READ_WRITE);
        assert!(!(MemFlags::READ_ONLY | MemFlags::COPY_HOST_PTR).wants_host_memory());
    }
}
