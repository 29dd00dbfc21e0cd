// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The client half of the network-transparent compute API.
//!
//! A [`Session`] is one server: a long-lived control connection plus a
//! callbacks stream. Objects created through it — contexts, queues,
//! buffers, programs, kernels, events — are local descriptors that cache
//! enough state to answer most info queries without a round-trip, paired
//! with the identity the server knows them by. Bulk reads and writes run
//! over ephemeral data connections on worker threads with the payload
//! compressed in flight.
//!
//! Every fallible call reports a [`Status`], exactly as the wrapped API
//! would: validation failures are detected before anything is
//! transmitted, server-side failures arrive in the reply, and transport
//! breakage surfaces as `out-of-resources` (the connection is then dead,
//! and later calls report `out-of-host-memory`).

mod context;
mod enqueue;
mod event;
mod kernel;
mod mem;
mod platform;
mod program;
mod queue;
mod sampler;
mod session;
mod transfer;

pub use cl_protocol::types::{
    device_type, ImageDesc, ImageFormat, MapFlags, MemFlags, Status,
};
pub use context::{Context, ContextNotify};
pub use event::{wait_for_events, Event};
pub use kernel::{Kernel, KernelArg};
pub use mem::{Mapping, Mem};
pub use platform::{Device, Platform};
pub use program::{BuildNotify, Program};
pub use queue::Queue;
pub use sampler::Sampler;
pub use session::Session;
pub use transfer::PendingRead;

/// Every API operation reports the compute API's own status codes.
pub type Result<T> = std::result::Result<T, Status>;
