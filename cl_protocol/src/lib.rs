// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Wire-level pieces shared by the compute-API client and server: the
//! command tags, the typed field encodings (including the pointer wrapper
//! used for every object identity), the compressed `dataPack` used by bulk
//! transfers, and the status vocabulary the two peers exchange.

pub mod command;
pub mod pack;
pub mod rect;
pub mod types;
pub mod wire;

pub use command::{Command, HandleKind};
pub use types::{ExecState, Status};

use std::fmt;

/// The possible errors that can arise from trying to encode, decode, or
/// exchange a command or its payload.
#[derive(Debug)]
pub enum Error {
    /// Protocol errors are violations of the framing itself (an unknown
    /// command tag, a pointer wrapper of the wrong kind, a payload whose
    /// decompressed size disagrees with the request). They are fatal to the
    /// connection that produced them.
    Protocol(ProtocolError),

    /// A status returned by the remote peer. Whether this is an error at
    /// all is up to the caller; `Status::SUCCESS` never ends up here.
    Api(Status),

    /// Errors returned by I/O failures. A truncated read of a control
    /// frame surfaces as `UnexpectedEof` and is fatal to the connection.
    Io(std::io::Error),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Protocol(e) => write!(f, "Protocol error: {e}"),
            Self::Api(s) => write!(f, "API error: {s}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

#[derive(Debug)]
pub enum ProtocolError {
    /// Received a command tag outside the closed command set.
    UnknownCommand(u32),

    /// A pointer wrapper carried a kind tag other than the one the frame
    /// position calls for.
    WrongHandleKind { expected: HandleKind, got: u8 },

    /// A decompressed payload did not have the size the request promised.
    PackSize { expected: u64, got: u64 },

    /// The compressed payload could not be inflated.
    Corrupt,

    /// A string field was not valid UTF-8.
    BadString,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCommand(tag) => write!(f, "Unknown command tag {tag}"),
            Self::WrongHandleKind { expected, got } => {
                write!(f, "Pointer wrapper kind {got} where {expected:?} was expected")
            }
            Self::PackSize { expected, got } => {
                write!(f, "Payload inflated to {got} bytes, expected {expected}")
            }
            Self::Corrupt => write!(f, "Corrupt compressed payload"),
            Self::BadString => write!(f, "String field is not valid UTF-8"),
        }
    }
}

/// A "pipe", constructed using socketpair(2), that can be used for testing
/// client and server framing without a TCP listener.
pub mod pipe {
    use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

    pub struct Endpoint {
        fd: std::os::fd::OwnedFd,
    }

    pub fn pipe() -> std::io::Result<(Endpoint, Endpoint)> {
        let (a, b) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::empty(),
        )?;

        Ok((Endpoint { fd: a }, Endpoint { fd: b }))
    }

    impl std::io::Read for Endpoint {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(nix::unistd::read(&self.fd, buf)?)
        }
    }

    impl std::io::Write for Endpoint {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(nix::unistd::write(&self.fd, buf)?)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
