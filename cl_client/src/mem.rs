// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Memory objects: buffers, sub-buffers and images.
//!
//! Creation-time attributes are cached on the descriptor, so size, flag
//! and geometry queries never touch the wire. The host-pointer creation
//! modes that ask the runtime to adopt caller memory cannot exist across
//! a network and are refused up front; copying creation data is the one
//! host-pointer mode the protocol can express, and it ships compressed
//! inside the creation frame.

use std::sync::{Arc, Mutex};

use cl_protocol::types::{
    element_size, image_type, info, ImageDesc, ImageFormat, MapFlags, MemFlags,
};
use cl_protocol::wire::{WireRead, WireWrite};
use cl_protocol::{Command, HandleKind, Status};

use crate::context::Context;
use crate::platform::{info_query, status_call};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MemKind {
    Buffer,
    SubBuffer,
    Image,
}

pub(crate) struct MemInner {
    pub(crate) session: Session,
    pub(crate) remote: u64,
    refs: Mutex<u32>,
    pub(crate) context: Context,
    pub(crate) kind: MemKind,
    pub(crate) size: u64,
    pub(crate) flags: MemFlags,
    /// 1 for buffers, pixel width for images.
    pub(crate) element_size: u64,
    pub(crate) format: Option<ImageFormat>,
    pub(crate) desc: Option<ImageDesc>,
    pub(crate) parent: Option<Mem>,
    pub(crate) offset: u64,
    /// Outstanding synthesised maps; what a later unmap needs to decide
    /// its direction.
    pub(crate) maps: Mutex<MapRegistry>,
}

#[derive(Default)]
pub(crate) struct MapRegistry {
    next: u64,
    entries: Vec<MapEntry>,
}

struct MapEntry {
    id: u64,
    flags: MapFlags,
}

impl MapRegistry {
    pub(crate) fn insert(&mut self, flags: MapFlags) -> u64 {
        self.next += 1;
        self.entries.push(MapEntry {
            id: self.next,
            flags,
        });
        self.next
    }

    pub(crate) fn remove(&mut self, id: u64) -> Option<MapFlags> {
        let at = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(at).flags)
    }
}

#[derive(Clone)]
pub struct Mem {
    pub(crate) inner: Arc<MemInner>,
}

impl std::fmt::Debug for Mem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mem")
            .field("remote", &self.inner.remote)
            .finish()
    }
}

/// A synthesised mapping of a memory-object region into host memory. The
/// bytes live in `data`; unmapping decides from the map flags whether
/// they flow back.
pub struct Mapping {
    pub data: Vec<u8>,
    pub(crate) id: u64,
    pub(crate) mem_remote: u64,
    pub(crate) flags: MapFlags,
    pub(crate) offset: u64,
    pub(crate) origin: [u64; 3],
    pub(crate) region: [u64; 3],
    pub(crate) is_image: bool,
}

fn check_creation_flags(flags: MemFlags, host_data: Option<&[u8]>, size: u64) -> crate::Result<()> {
    if flags.wants_host_memory() {
        return Err(Status::INVALID_VALUE);
    }
    match (flags.contains(MemFlags::COPY_HOST_PTR), host_data) {
        (true, Some(data)) if data.len() as u64 == size => Ok(()),
        (false, None) => Ok(()),
        _ => Err(Status::INVALID_HOST_PTR),
    }
}

impl Context {
    /// Create a buffer, optionally seeded from host bytes
    /// (`COPY_HOST_PTR`).
    pub fn create_buffer(
        &self,
        flags: MemFlags,
        size: u64,
        host_data: Option<&[u8]>,
    ) -> crate::Result<Mem> {
        if size == 0 {
            return Err(Status::INVALID_BUFFER_SIZE);
        }
        check_creation_flags(flags, host_data, size)?;

        let build = |frame: &mut Vec<u8>| {
            frame.put_u32(Command::CreateBuffer.into())?;
            frame.put_handle(HandleKind::Context, self.remote())?;
            frame.put_u64(flags.bits())?;
            frame.put_size(size)?;
            frame.put_bool(host_data.is_some())
        };
        let read = |stream: &std::net::TcpStream| {
            let mut s = stream;
            s.get_status()?.ok()?;
            s.get_handle(HandleKind::Mem)
        };
        let remote = match host_data {
            Some(data) => self.session().call_with_payload(build, data, read)?,
            None => self.session().call(build, read)?,
        };

        Ok(Mem {
            inner: Arc::new(MemInner {
                session: self.session().clone(),
                remote,
                refs: Mutex::new(1),
                context: self.clone(),
                kind: MemKind::Buffer,
                size,
                flags,
                element_size: 1,
                format: None,
                desc: None,
                parent: None,
                offset: 0,
                maps: Mutex::new(MapRegistry::default()),
            }),
        })
    }

    /// Create an image from the descriptor form. The deprecated 2D/3D
    /// entry points below normalise into this.
    pub fn create_image(
        &self,
        flags: MemFlags,
        format: ImageFormat,
        desc: &ImageDesc,
        host_data: Option<&[u8]>,
    ) -> crate::Result<Mem> {
        let element =
            element_size(format).ok_or(Status::INVALID_IMAGE_FORMAT_DESCRIPTOR)?;
        let depth = match desc.image_type {
            image_type::IMAGE2D => 1,
            image_type::IMAGE3D => desc.depth.max(1),
            _ => return Err(Status::INVALID_IMAGE_DESCRIPTOR),
        };
        if desc.width == 0 || desc.height == 0 {
            return Err(Status::INVALID_IMAGE_SIZE);
        }
        let size = desc.width * desc.height * depth * element;
        check_creation_flags(flags, host_data, size)?;

        let build = |frame: &mut Vec<u8>| {
            frame.put_u32(Command::CreateImage.into())?;
            frame.put_handle(HandleKind::Context, self.remote())?;
            frame.put_u64(flags.bits())?;
            frame.put_image_format(format)?;
            frame.put_image_desc(desc)?;
            frame.put_bool(host_data.is_some())?;
            if host_data.is_some() {
                frame.put_size(size)?;
            }
            Ok(())
        };
        let read = |stream: &std::net::TcpStream| {
            let mut s = stream;
            s.get_status()?.ok()?;
            s.get_handle(HandleKind::Mem)
        };
        let remote = match host_data {
            Some(data) => self.session().call_with_payload(build, data, read)?,
            None => self.session().call(build, read)?,
        };

        Ok(Mem {
            inner: Arc::new(MemInner {
                session: self.session().clone(),
                remote,
                refs: Mutex::new(1),
                context: self.clone(),
                kind: MemKind::Image,
                size,
                flags,
                element_size: element,
                format: Some(format),
                desc: Some(*desc),
                parent: None,
                offset: 0,
                maps: Mutex::new(MapRegistry::default()),
            }),
        })
    }

    /// Deprecated 2D creation; delegates to the descriptor form.
    pub fn create_image_2d(
        &self,
        flags: MemFlags,
        format: ImageFormat,
        width: u64,
        height: u64,
        row_pitch: u64,
        host_data: Option<&[u8]>,
    ) -> crate::Result<Mem> {
        let desc = ImageDesc {
            image_type: image_type::IMAGE2D,
            width,
            height,
            row_pitch,
            ..Default::default()
        };
        self.create_image(flags, format, &desc, host_data)
    }

    /// Deprecated 3D creation; delegates to the descriptor form.
    #[allow(clippy::too_many_arguments)]
    pub fn create_image_3d(
        &self,
        flags: MemFlags,
        format: ImageFormat,
        width: u64,
        height: u64,
        depth: u64,
        row_pitch: u64,
        slice_pitch: u64,
        host_data: Option<&[u8]>,
    ) -> crate::Result<Mem> {
        let desc = ImageDesc {
            image_type: image_type::IMAGE3D,
            width,
            height,
            depth,
            row_pitch,
            slice_pitch,
            ..Default::default()
        };
        self.create_image(flags, format, &desc, host_data)
    }

    /// Graphics-interop objects cannot exist over this transport.
    pub fn create_from_gl_buffer(&self, _flags: MemFlags, _globj: u32) -> crate::Result<Mem> {
        Err(Status::INVALID_GL_OBJECT)
    }

    pub fn create_from_gl_texture(
        &self,
        _flags: MemFlags,
        _target: u32,
        _miplevel: i32,
        _texture: u32,
    ) -> crate::Result<Mem> {
        Err(Status::INVALID_GL_OBJECT)
    }

    pub fn create_from_gl_renderbuffer(
        &self,
        _flags: MemFlags,
        _renderbuffer: u32,
    ) -> crate::Result<Mem> {
        Err(Status::INVALID_GL_OBJECT)
    }

    /// The image formats the server's runtime supports for `image_type`.
    pub fn supported_image_formats(
        &self,
        flags: MemFlags,
        image_type: u32,
    ) -> crate::Result<Vec<ImageFormat>> {
        self.session().call(
            |frame| {
                frame.put_u32(Command::GetSupportedImageFormats.into())?;
                frame.put_handle(HandleKind::Context, self.remote())?;
                frame.put_u64(flags.bits())?;
                frame.put_u32(image_type)
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                let n = s.get_u32()? as usize;
                let mut formats = Vec::with_capacity(n);
                for _ in 0..n {
                    formats.push(s.get_image_format()?);
                }
                Ok(formats)
            },
        )
    }
}

impl Mem {
    pub(crate) fn session(&self) -> &Session {
        &self.inner.session
    }

    pub(crate) fn remote(&self) -> u64 {
        self.inner.remote
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    pub fn size(&self) -> u64 {
        self.inner.size
    }

    pub fn flags(&self) -> MemFlags {
        self.inner.flags
    }

    pub fn is_image(&self) -> bool {
        self.inner.kind == MemKind::Image
    }

    pub(crate) fn element_size(&self) -> u64 {
        self.inner.element_size
    }

    /// Carve a sub-buffer out of this buffer. Host-pointer flags are as
    /// impossible here as at buffer creation.
    pub fn create_sub_buffer(
        &self,
        flags: MemFlags,
        origin: u64,
        size: u64,
    ) -> crate::Result<Mem> {
        if self.inner.kind != MemKind::Buffer {
            return Err(Status::INVALID_MEM_OBJECT);
        }
        if flags.intersects(
            MemFlags::USE_HOST_PTR | MemFlags::ALLOC_HOST_PTR | MemFlags::COPY_HOST_PTR,
        ) {
            return Err(Status::INVALID_VALUE);
        }
        if size == 0 || origin + size > self.inner.size {
            return Err(Status::INVALID_VALUE);
        }

        let remote = self.inner.session.call(
            |frame| {
                frame.put_u32(Command::CreateSubBuffer.into())?;
                frame.put_handle(HandleKind::Mem, self.inner.remote)?;
                frame.put_u64(flags.bits())?;
                frame.put_size(origin)?;
                frame.put_size(size)
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                s.get_handle(HandleKind::Mem)
            },
        )?;

        Ok(Mem {
            inner: Arc::new(MemInner {
                session: self.inner.session.clone(),
                remote,
                refs: Mutex::new(1),
                context: self.inner.context.clone(),
                kind: MemKind::SubBuffer,
                size,
                flags,
                element_size: 1,
                format: None,
                desc: None,
                parent: Some(self.clone()),
                offset: origin,
                maps: Mutex::new(MapRegistry::default()),
            }),
        })
    }

    /// Info query, answered from the cached descriptor wherever possible.
    pub fn info(&self, param: u32) -> crate::Result<Vec<u8>> {
        match param {
            info::MEM_TYPE => Ok(match (&self.inner.kind, &self.inner.desc) {
                (MemKind::Image, Some(desc)) => desc.image_type,
                _ => image_type::BUFFER,
            }
            .to_ne_bytes()
            .to_vec()),
            info::MEM_FLAGS => Ok(self.inner.flags.bits().to_ne_bytes().to_vec()),
            info::MEM_SIZE => Ok(self.inner.size.to_ne_bytes().to_vec()),
            info::MEM_REFERENCE_COUNT => Ok(self.refcount().to_ne_bytes().to_vec()),
            info::MEM_CONTEXT => Ok(self.inner.context.remote().to_ne_bytes().to_vec()),
            info::MEM_ASSOCIATED_MEMOBJECT => Ok(self
                .inner
                .parent
                .as_ref()
                .map(|p| p.remote())
                .unwrap_or(0)
                .to_ne_bytes()
                .to_vec()),
            info::MEM_OFFSET => Ok(self.inner.offset.to_ne_bytes().to_vec()),
            _ => info_query(&self.inner.session, Command::GetMemObjectInfo, |frame| {
                frame.put_handle(HandleKind::Mem, self.inner.remote)?;
                frame.put_u32(param)
            }),
        }
    }

    /// Image info query, answered from the cached geometry.
    pub fn image_info(&self, param: u32) -> crate::Result<Vec<u8>> {
        let (Some(format), Some(desc)) = (self.inner.format, self.inner.desc) else {
            return Err(Status::INVALID_MEM_OBJECT);
        };
        let element = self.inner.element_size;
        match param {
            info::IMAGE_FORMAT => {
                let mut v = format.channel_order.to_ne_bytes().to_vec();
                v.extend_from_slice(&format.channel_type.to_ne_bytes());
                Ok(v)
            }
            info::IMAGE_ELEMENT_SIZE => Ok(element.to_ne_bytes().to_vec()),
            info::IMAGE_ROW_PITCH => Ok((desc.width * element).to_ne_bytes().to_vec()),
            info::IMAGE_SLICE_PITCH => {
                Ok((desc.width * desc.height * element).to_ne_bytes().to_vec())
            }
            info::IMAGE_WIDTH => Ok(desc.width.to_ne_bytes().to_vec()),
            info::IMAGE_HEIGHT => Ok(desc.height.to_ne_bytes().to_vec()),
            info::IMAGE_DEPTH => Ok(match desc.image_type {
                image_type::IMAGE3D => desc.depth,
                _ => 0,
            }
            .to_ne_bytes()
            .to_vec()),
            _ => info_query(&self.inner.session, Command::GetImageInfo, |frame| {
                frame.put_handle(HandleKind::Mem, self.inner.remote)?;
                frame.put_u32(param)
            }),
        }
    }

    /// A destructor callback would have to run client code from the
    /// server; it cannot be honoured.
    pub fn set_destructor_callback(
        &self,
        _callback: Box<dyn FnOnce() + Send>,
    ) -> crate::Result<()> {
        Err(Status::INVALID_MEM_OBJECT)
    }

    /// Graphics-interop queries have nothing to answer here.
    pub fn gl_object_info(&self) -> crate::Result<(u32, u32)> {
        Err(Status::INVALID_GL_OBJECT)
    }

    pub fn retain(&self) -> crate::Result<()> {
        let mut refs = self.inner.refs.lock().unwrap();
        if *refs == 0 {
            return Err(Status::INVALID_MEM_OBJECT);
        }
        *refs += 1;
        Ok(())
    }

    pub fn release(&self) -> crate::Result<()> {
        let mut refs = self.inner.refs.lock().unwrap();
        match *refs {
            0 => Err(Status::INVALID_MEM_OBJECT),
            1 => {
                *refs = 0;
                drop(refs);
                status_call(&self.inner.session, |frame| {
                    frame.put_u32(Command::ReleaseMemObject.into())?;
                    frame.put_handle(HandleKind::Mem, self.inner.remote)
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
