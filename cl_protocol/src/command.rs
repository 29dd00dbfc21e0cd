// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The closed command set. Every request on the primary stream starts with
//! one of these tags as a `u32`; the framing of the fields that follow is
//! fixed per command and documented on the client/server pairs that speak
//! it. Tags are append-only: renumbering them breaks deployed peers.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::ProtocolError;

#[derive(IntoPrimitive, TryFromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum Command {
    GetPlatformIds = 1,
    GetPlatformInfo,
    GetDeviceIds,
    GetDeviceInfo,
    CreateSubDevices,
    RetainDevice,
    ReleaseDevice,
    CreateContext,
    CreateContextFromType,
    RetainContext,
    ReleaseContext,
    GetContextInfo,
    CreateCommandQueue,
    RetainCommandQueue,
    ReleaseCommandQueue,
    GetCommandQueueInfo,
    Flush,
    Finish,
    CreateBuffer,
    CreateSubBuffer,
    CreateImage,
    RetainMemObject,
    ReleaseMemObject,
    GetSupportedImageFormats,
    GetMemObjectInfo,
    GetImageInfo,
    CreateSampler,
    RetainSampler,
    ReleaseSampler,
    GetSamplerInfo,
    CreateProgramWithSource,
    CreateProgramWithBinary,
    CreateProgramWithBuiltInKernels,
    RetainProgram,
    ReleaseProgram,
    BuildProgram,
    CompileProgram,
    LinkProgram,
    UnloadPlatformCompiler,
    GetProgramInfo,
    GetProgramBuildInfo,
    CreateKernel,
    CreateKernelsInProgram,
    RetainKernel,
    ReleaseKernel,
    SetKernelArg,
    GetKernelInfo,
    GetKernelArgInfo,
    GetKernelWorkGroupInfo,
    WaitForEvents,
    GetEventInfo,
    RetainEvent,
    ReleaseEvent,
    CreateUserEvent,
    SetUserEventStatus,
    GetEventProfilingInfo,
    EnqueueReadBuffer,
    EnqueueWriteBuffer,
    EnqueueCopyBuffer,
    EnqueueReadBufferRect,
    EnqueueWriteBufferRect,
    EnqueueCopyBufferRect,
    EnqueueReadImage,
    EnqueueWriteImage,
    EnqueueCopyImage,
    EnqueueCopyImageToBuffer,
    EnqueueCopyBufferToImage,
    EnqueueFillBuffer,
    EnqueueFillImage,
    EnqueueMigrateMemObjects,
    EnqueueNDRangeKernel,
    EnqueueTask,
    EnqueueMarkerWithWaitList,
    EnqueueBarrierWithWaitList,
}

impl Command {
    pub fn decode(tag: u32) -> Result<Self, ProtocolError> {
        Self::try_from(tag).map_err(|_| ProtocolError::UnknownCommand(tag))
    }
}

/// The kind byte of the pointer wrapper: every object identity crossing the
/// wire is `{kind: u8, id: u64}`, and a wrapper read in a frame position
/// that calls for a different kind is a connection-fatal protocol error.
#[derive(IntoPrimitive, TryFromPrimitive, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HandleKind {
    Platform = 1,
    Device,
    Context,
    CommandQueue,
    Mem,
    Sampler,
    Program,
    Kernel,
    Event,
}

/// The kind byte a kernel-argument value is tagged with: the client
/// rewrites memory-object and sampler arguments to their identities, so
/// the server must be told what it is looking at.
pub mod kernel_arg {
    pub const BYTES: u8 = 0;
    pub const MEM: u8 = 1;
    pub const SAMPLER: u8 = 2;
    pub const LOCAL: u8 = 3;
}

impl HandleKind {
    /// The status a server replies with when a handle of this kind fails
    /// validation against the registry.
    pub fn invalid_status(self) -> crate::Status {
        use crate::Status;
        match self {
            Self::Platform => Status::INVALID_PLATFORM,
            Self::Device => Status::INVALID_DEVICE,
            Self::Context => Status::INVALID_CONTEXT,
            Self::CommandQueue => Status::INVALID_COMMAND_QUEUE,
            Self::Mem => Status::INVALID_MEM_OBJECT,
            Self::Sampler => Status::INVALID_SAMPLER,
            Self::Program => Status::INVALID_PROGRAM,
            Self::Kernel => Status::INVALID_KERNEL,
            Self::Event => Status::INVALID_EVENT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for tag in [
            Command::GetPlatformIds,
            Command::CreateBuffer,
            Command::EnqueueBarrierWithWaitList,
        ] {
            let raw: u32 = tag.into();
            assert_eq!(Command::decode(raw).unwrap(), tag);
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(Command::decode(0).is_err());
        assert!(Command::decode(10_000).is_err());
    }
}
