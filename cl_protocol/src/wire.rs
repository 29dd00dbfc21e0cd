// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Typed field encoding on top of any byte stream.
//!
//! Each logical field is written in order with a fixed-width native-endian
//! encoding: the deployment is assumed byte-order homogeneous (a
//! negotiation handshake is a protocol revision away). `size_t`-class
//! values travel as `u64` regardless of host pointer width, and object
//! identities travel as the pointer wrapper `{kind: u8, id: u64}`.
//!
//! Reads are blocking and never return a partial record; a truncated
//! control read surfaces as `UnexpectedEof`, which callers treat as fatal
//! to the connection.

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};

use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::fd::AsRawFd;

use crate::command::HandleKind;
use crate::types::{ImageDesc, ImageFormat, Status};
use crate::{Error, ProtocolError};

type Order = NativeEndian;

/// Reading the typed wire fields from any `Read`.
pub trait WireRead: Read {
    fn get_u8(&mut self) -> std::io::Result<u8> {
        ReadBytesExt::read_u8(self)
    }

    fn get_u32(&mut self) -> std::io::Result<u32> {
        self.read_u32::<Order>()
    }

    fn get_i32(&mut self) -> std::io::Result<i32> {
        self.read_i32::<Order>()
    }

    fn get_u64(&mut self) -> std::io::Result<u64> {
        self.read_u64::<Order>()
    }

    fn get_bool(&mut self) -> std::io::Result<bool> {
        Ok(self.get_u8()? != 0)
    }

    /// A `size_t`-class value: always 8 bytes on the wire.
    fn get_size(&mut self) -> std::io::Result<u64> {
        self.get_u64()
    }

    fn get_status(&mut self) -> std::io::Result<Status> {
        Ok(Status(self.get_i32()?))
    }

    /// A pointer wrapper whose kind must match the frame position. A null
    /// identity is legal here; use [`WireRead::get_opt_handle`] when the
    /// command gives null a meaning.
    fn get_handle(&mut self, kind: HandleKind) -> Result<u64, Error> {
        let got = self.get_u8()?;
        if got != u8::from(kind) {
            return Err(ProtocolError::WrongHandleKind {
                expected: kind,
                got,
            }
            .into());
        }
        Ok(self.get_u64()?)
    }

    fn get_opt_handle(&mut self, kind: HandleKind) -> Result<Option<u64>, Error> {
        let id = self.get_handle(kind)?;
        Ok(if id == 0 { None } else { Some(id) })
    }

    fn get_handles(&mut self, kind: HandleKind, count: usize) -> Result<Vec<u64>, Error> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push(self.get_handle(kind)?);
        }
        Ok(ids)
    }

    fn get_bytes(&mut self, len: usize) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// A length-prefixed byte field: `u64 len` then `len` bytes.
    fn get_blob(&mut self) -> std::io::Result<Vec<u8>> {
        let len = self.get_size()? as usize;
        self.get_bytes(len)
    }

    /// A length-prefixed string; the length counts the trailing NUL, which
    /// is stripped on this side.
    fn get_string(&mut self) -> Result<String, Error> {
        let mut bytes = self.get_blob()?;
        if bytes.last() == Some(&0) {
            bytes.pop();
        }
        String::from_utf8(bytes).map_err(|_| ProtocolError::BadString.into())
    }

    fn get_size_array(&mut self, count: usize) -> std::io::Result<Vec<u64>> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.get_size()?);
        }
        Ok(out)
    }

    fn get_size3(&mut self) -> std::io::Result<[u64; 3]> {
        Ok([self.get_size()?, self.get_size()?, self.get_size()?])
    }

    fn get_image_format(&mut self) -> std::io::Result<ImageFormat> {
        Ok(ImageFormat {
            channel_order: self.get_u32()?,
            channel_type: self.get_u32()?,
        })
    }

    fn get_image_desc(&mut self) -> std::io::Result<ImageDesc> {
        Ok(ImageDesc {
            image_type: self.get_u32()?,
            width: self.get_size()?,
            height: self.get_size()?,
            depth: self.get_size()?,
            array_size: self.get_size()?,
            row_pitch: self.get_size()?,
            slice_pitch: self.get_size()?,
        })
    }
}

impl<R: Read + ?Sized> WireRead for R {}

/// Writing the typed wire fields to any `Write`. Requests are normally
/// assembled into a `Vec<u8>` frame and pushed with [`send_frame`], so a
/// frame is one send on the socket however many fields it carries.
pub trait WireWrite: Write {
    fn put_u8(&mut self, v: u8) -> std::io::Result<()> {
        WriteBytesExt::write_u8(self, v)
    }

    fn put_u32(&mut self, v: u32) -> std::io::Result<()> {
        self.write_u32::<Order>(v)
    }

    fn put_i32(&mut self, v: i32) -> std::io::Result<()> {
        self.write_i32::<Order>(v)
    }

    fn put_u64(&mut self, v: u64) -> std::io::Result<()> {
        self.write_u64::<Order>(v)
    }

    fn put_bool(&mut self, v: bool) -> std::io::Result<()> {
        self.put_u8(v as u8)
    }

    fn put_size(&mut self, v: u64) -> std::io::Result<()> {
        self.put_u64(v)
    }

    fn put_status(&mut self, s: Status) -> std::io::Result<()> {
        self.put_i32(s.0)
    }

    fn put_handle(&mut self, kind: HandleKind, id: u64) -> std::io::Result<()> {
        self.put_u8(kind.into())?;
        self.put_u64(id)
    }

    fn put_blob(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.put_size(data.len() as u64)?;
        self.write_all(data)
    }

    /// A length-prefixed string with the trailing NUL included, so the
    /// length on the wire is `s.len() + 1`.
    fn put_string(&mut self, s: &str) -> std::io::Result<()> {
        self.put_size(s.len() as u64 + 1)?;
        self.write_all(s.as_bytes())?;
        self.put_u8(0)
    }

    fn put_size_array(&mut self, vals: &[u64]) -> std::io::Result<()> {
        for v in vals {
            self.put_size(*v)?;
        }
        Ok(())
    }

    fn put_image_format(&mut self, f: ImageFormat) -> std::io::Result<()> {
        self.put_u32(f.channel_order)?;
        self.put_u32(f.channel_type)
    }

    fn put_image_desc(&mut self, d: &ImageDesc) -> std::io::Result<()> {
        self.put_u32(d.image_type)?;
        self.put_size(d.width)?;
        self.put_size(d.height)?;
        self.put_size(d.depth)?;
        self.put_size(d.array_size)?;
        self.put_size(d.row_pitch)?;
        self.put_size(d.slice_pitch)
    }
}

impl<W: Write + ?Sized> WireWrite for W {}

/// Push an assembled frame onto the primary stream. With `more` set the
/// kernel is hinted (`MSG_MORE`) that another segment follows immediately
/// — a bulk payload, typically — so the two coalesce where possible. The
/// hint never changes semantics, only packetisation.
pub fn send_frame(stream: &TcpStream, frame: &[u8], more: bool) -> std::io::Result<()> {
    let mut flags = libc::MSG_NOSIGNAL;
    if more {
        flags |= libc::MSG_MORE;
    }

    let mut sent = 0;
    while sent < frame.len() {
        let rest = &frame[sent..];
        let n = unsafe {
            libc::send(
                stream.as_raw_fd(),
                rest.as_ptr().cast(),
                rest.len(),
                flags,
            )
        };
        if n < 0 {
            let e = std::io::Error::last_os_error();
            if e.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e);
        }
        sent += n as usize;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_fields_round_trip() {
        let mut buf = Vec::new();
        buf.put_u32(7).unwrap();
        buf.put_i32(-30).unwrap();
        buf.put_size(1 << 40).unwrap();
        buf.put_bool(true).unwrap();
        buf.put_string("kernel.cl").unwrap();

        let mut r = buf.as_slice();
        assert_eq!(r.get_u32().unwrap(), 7);
        assert_eq!(r.get_status().unwrap(), Status::INVALID_VALUE);
        assert_eq!(r.get_size().unwrap(), 1 << 40);
        assert!(r.get_bool().unwrap());
        assert_eq!(r.get_string().unwrap(), "kernel.cl");
        assert!(r.is_empty());
    }

    #[test]
    fn handle_kind_is_checked() {
        let mut buf = Vec::new();
        buf.put_handle(HandleKind::Mem, 42).unwrap();

        let mut r = buf.as_slice();
        match r.get_handle(HandleKind::Event) {
            Err(Error::Protocol(ProtocolError::WrongHandleKind { expected, got })) => {
                assert_eq!(expected, HandleKind::Event);
                assert_eq!(got, u8::from(HandleKind::Mem));
            }
            other => panic!("expected a kind mismatch, got {other:?}"),
        }

        let mut r = buf.as_slice();
        assert_eq!(r.get_handle(HandleKind::Mem).unwrap(), 42);
    }

    #[test]
    fn null_handles() {
        let mut buf = Vec::new();
        buf.put_handle(HandleKind::Event, 0).unwrap();
        buf.put_handle(HandleKind::Event, 9).unwrap();

        let mut r = buf.as_slice();
        assert_eq!(r.get_opt_handle(HandleKind::Event).unwrap(), None);
        assert_eq!(r.get_opt_handle(HandleKind::Event).unwrap(), Some(9));
    }

    #[test]
    fn truncated_read_is_an_io_error() {
        let mut r: &[u8] = &[1, 2];
        let e = r.get_u32().unwrap_err();
        assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
