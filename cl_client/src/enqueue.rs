// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The enqueue surface of a [`Queue`].
//!
//! Blocking transfers carry their payload inline on the primary stream.
//! Non-blocking ones get a data port in the reply and hand the rest to a
//! worker thread; the caller keeps the submission's event and, for
//! reads, a [`PendingRead`] that delivers the bytes. Map and unmap are
//! synthesised on this side of the wire out of plain reads and writes.

use cl_protocol::pack::read_pack;
use cl_protocol::rect::{self, RectLayout};
use cl_protocol::types::{command_type, MapFlags};
use cl_protocol::wire::{WireRead, WireWrite};
use cl_protocol::{Command, ExecState, HandleKind, Status};

use crate::event::{wait_for_events, Event};
use crate::kernel::Kernel;
use crate::mem::{Mapping, Mem};
use crate::queue::Queue;
use crate::transfer::{self, PendingRead};

fn put_tail(frame: &mut Vec<u8>, want_event: bool, wait: &[Event]) -> std::io::Result<()> {
    frame.put_bool(want_event)?;
    frame.put_u32(wait.len() as u32)?;
    for e in wait {
        frame.put_handle(HandleKind::Event, e.remote())?;
    }
    Ok(())
}

impl Queue {
    /// Wait-list sanity: same session, same context as this queue.
    fn check_wait(&self, wait: &[Event]) -> crate::Result<()> {
        for e in wait {
            if e.session() != self.session() {
                return Err(Status::INVALID_EVENT_WAIT_LIST);
            }
            if e.inner.context_remote != self.context().remote() {
                return Err(Status::INVALID_CONTEXT);
            }
        }
        Ok(())
    }

    fn check_mem(&self, mem: &Mem) -> crate::Result<()> {
        if mem.session() != self.session() {
            return Err(Status::INVALID_MEM_OBJECT);
        }
        if mem.context().remote() != self.context().remote() {
            return Err(Status::INVALID_CONTEXT);
        }
        Ok(())
    }

    fn check_read_buffer(&self, mem: &Mem, offset: u64, len: u64) -> crate::Result<()> {
        self.check_mem(mem)?;
        if mem.is_image() {
            return Err(Status::INVALID_MEM_OBJECT);
        }
        if mem
            .flags()
            .intersects(crate::MemFlags::HOST_WRITE_ONLY | crate::MemFlags::HOST_NO_ACCESS)
        {
            return Err(Status::INVALID_OPERATION);
        }
        if len == 0 || offset + len > mem.size() {
            return Err(Status::INVALID_VALUE);
        }
        Ok(())
    }

    fn check_write_buffer(&self, mem: &Mem, offset: u64, len: u64) -> crate::Result<()> {
        self.check_mem(mem)?;
        if mem.is_image() {
            return Err(Status::INVALID_MEM_OBJECT);
        }
        if mem
            .flags()
            .intersects(crate::MemFlags::HOST_READ_ONLY | crate::MemFlags::HOST_NO_ACCESS)
        {
            return Err(Status::INVALID_OPERATION);
        }
        if len == 0 || offset + len > mem.size() {
            return Err(Status::INVALID_VALUE);
        }
        Ok(())
    }

    fn make_event(&self, remote: u64, ct: u32, transfer: bool, initial: ExecState) -> Event {
        Event::new(
            self.session(),
            remote,
            Some(self.clone()),
            self.context().remote(),
            ct,
            transfer,
            initial,
        )
    }

    /// A non-transfer submission: `status[, event]` comes straight back,
    /// with the event already complete unless the wait-list deferred the
    /// work server-side.
    fn submit(
        &self,
        command: Command,
        ct: u32,
        wait: &[Event],
        build: impl FnOnce(&mut Vec<u8>) -> std::io::Result<()>,
    ) -> crate::Result<Event> {
        self.check_wait(wait)?;
        let remote = self.session().call(
            |frame| {
                frame.put_u32(command.into())?;
                frame.put_handle(HandleKind::CommandQueue, self.remote())?;
                build(frame)?;
                put_tail(frame, true, wait)
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                s.get_handle(HandleKind::Event)
            },
        )?;
        Ok(self.make_event(remote, ct, false, ExecState::Submitted))
    }

    // ---- Buffer transfers ----

    /// Non-blocking read: the returned [`PendingRead`] delivers the bytes
    /// once the transfer worker lands them; its event completes no
    /// earlier.
    pub fn enqueue_read_buffer(
        &self,
        mem: &Mem,
        offset: u64,
        len: u64,
        wait: &[Event],
    ) -> crate::Result<PendingRead> {
        self.check_read_buffer(mem, offset, len)?;
        self.check_wait(wait)?;

        let (remote, port) = self.session().call(
            |frame| {
                frame.put_u32(Command::EnqueueReadBuffer.into())?;
                frame.put_handle(HandleKind::CommandQueue, self.remote())?;
                frame.put_handle(HandleKind::Mem, mem.remote())?;
                frame.put_bool(false)?;
                frame.put_size(offset)?;
                frame.put_size(len)?;
                put_tail(frame, true, wait)
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                let remote = s.get_handle(HandleKind::Event)?;
                let port = s.get_u32()? as u16;
                Ok((remote, port))
            },
        )?;

        let event = self.make_event(remote, command_type::READ_BUFFER, true, ExecState::Submitted);
        Ok(transfer::spawn_read(
            self.session().server_ip(),
            port,
            len,
            Ok,
            event,
        ))
    }

    /// Blocking read into `dst`; returns with the data in place.
    pub fn enqueue_read_buffer_blocking(
        &self,
        mem: &Mem,
        offset: u64,
        dst: &mut [u8],
        wait: &[Event],
    ) -> crate::Result<Event> {
        self.read_buffer_into(mem, offset, dst, wait, command_type::READ_BUFFER)
    }

    fn read_buffer_into(
        &self,
        mem: &Mem,
        offset: u64,
        dst: &mut [u8],
        wait: &[Event],
        ct: u32,
    ) -> crate::Result<Event> {
        let len = dst.len() as u64;
        self.check_read_buffer(mem, offset, len)?;
        self.check_wait(wait)?;

        let (remote, data) = self.session().call(
            |frame| {
                frame.put_u32(Command::EnqueueReadBuffer.into())?;
                frame.put_handle(HandleKind::CommandQueue, self.remote())?;
                frame.put_handle(HandleKind::Mem, mem.remote())?;
                frame.put_bool(true)?;
                frame.put_size(offset)?;
                frame.put_size(len)?;
                put_tail(frame, true, wait)
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                let remote = s.get_handle(HandleKind::Event)?;
                let data = read_pack(&mut s, len)?;
                Ok((remote, data))
            },
        )?;
        dst.copy_from_slice(&data);
        Ok(self.make_event(remote, ct, false, ExecState::Complete))
    }

    /// Non-blocking write; `data` is owned by the transfer from here on.
    pub fn enqueue_write_buffer(
        &self,
        mem: &Mem,
        offset: u64,
        data: Vec<u8>,
        wait: &[Event],
    ) -> crate::Result<Event> {
        self.check_write_buffer(mem, offset, data.len() as u64)?;
        self.check_wait(wait)?;

        let len = data.len() as u64;
        let (remote, port) = self.session().call(
            |frame| {
                frame.put_u32(Command::EnqueueWriteBuffer.into())?;
                frame.put_handle(HandleKind::CommandQueue, self.remote())?;
                frame.put_handle(HandleKind::Mem, mem.remote())?;
                frame.put_bool(false)?;
                frame.put_size(offset)?;
                frame.put_size(len)?;
                put_tail(frame, true, wait)
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                let remote = s.get_handle(HandleKind::Event)?;
                let port = s.get_u32()? as u16;
                Ok((remote, port))
            },
        )?;

        let event = self.make_event(remote, command_type::WRITE_BUFFER, true, ExecState::Submitted);
        transfer::spawn_write(
            self.session().server_ip(),
            port,
            move || Ok(data),
            event.clone(),
        );
        Ok(event)
    }

    /// Blocking write; returns once the server has committed the data.
    pub fn enqueue_write_buffer_blocking(
        &self,
        mem: &Mem,
        offset: u64,
        data: &[u8],
        wait: &[Event],
    ) -> crate::Result<Event> {
        self.write_buffer_inline(mem, offset, data, wait, command_type::WRITE_BUFFER)
    }

    fn write_buffer_inline(
        &self,
        mem: &Mem,
        offset: u64,
        data: &[u8],
        wait: &[Event],
        ct: u32,
    ) -> crate::Result<Event> {
        self.check_write_buffer(mem, offset, data.len() as u64)?;
        self.check_wait(wait)?;

        let len = data.len() as u64;
        let remote = self.session().call_with_payload(
            |frame| {
                frame.put_u32(Command::EnqueueWriteBuffer.into())?;
                frame.put_handle(HandleKind::CommandQueue, self.remote())?;
                frame.put_handle(HandleKind::Mem, mem.remote())?;
                frame.put_bool(true)?;
                frame.put_size(offset)?;
                frame.put_size(len)?;
                put_tail(frame, true, wait)
            },
            data,
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                s.get_handle(HandleKind::Event)
            },
        )?;
        Ok(self.make_event(remote, ct, false, ExecState::Complete))
    }

    pub fn enqueue_copy_buffer(
        &self,
        src: &Mem,
        dst: &Mem,
        src_offset: u64,
        dst_offset: u64,
        len: u64,
        wait: &[Event],
    ) -> crate::Result<Event> {
        self.check_mem(src)?;
        self.check_mem(dst)?;
        if len == 0 || src_offset + len > src.size() || dst_offset + len > dst.size() {
            return Err(Status::INVALID_VALUE);
        }
        self.submit(
            Command::EnqueueCopyBuffer,
            command_type::COPY_BUFFER,
            wait,
            |frame| {
                frame.put_handle(HandleKind::Mem, src.remote())?;
                frame.put_handle(HandleKind::Mem, dst.remote())?;
                frame.put_size(src_offset)?;
                frame.put_size(dst_offset)?;
                frame.put_size(len)
            },
        )
    }

    // ---- Rect transfers ----

    /// Non-blocking rect read. The wire carries the dense region block;
    /// this side scatters it into `host` using the host origin and
    /// pitches, and the [`PendingRead`] returns the whole host buffer.
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_read_buffer_rect(
        &self,
        mem: &Mem,
        buffer_origin: [u64; 3],
        host_origin: [u64; 3],
        region: [u64; 3],
        buffer_pitches: (u64, u64),
        host_pitches: (u64, u64),
        host: Vec<u8>,
        wait: &[Event],
    ) -> crate::Result<PendingRead> {
        let host_layout = self.check_rect_read(
            mem,
            buffer_origin,
            host_origin,
            region,
            buffer_pitches,
            host_pitches,
            host.len(),
        )?;
        self.check_wait(wait)?;

        let (remote, port) = self.session().call(
            |frame| {
                self.put_rect_request(
                    frame,
                    Command::EnqueueReadBufferRect,
                    mem,
                    false,
                    buffer_origin,
                    region,
                    buffer_pitches,
                    host_pitches,
                )?;
                put_tail(frame, true, wait)
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                let remote = s.get_handle(HandleKind::Event)?;
                let port = s.get_u32()? as u16;
                Ok((remote, port))
            },
        )?;

        let event = self.make_event(
            remote,
            command_type::READ_BUFFER_RECT,
            true,
            ExecState::Submitted,
        );
        let mut host = host;
        Ok(transfer::spawn_read(
            self.session().server_ip(),
            port,
            rect::dense_size(region),
            move |dense| {
                rect::scatter(&dense, &mut host, host_origin, region, host_layout)
                    .ok_or(Status::INVALID_VALUE)?;
                Ok(host)
            },
            event,
        ))
    }

    /// Blocking rect read into `host`.
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_read_buffer_rect_blocking(
        &self,
        mem: &Mem,
        buffer_origin: [u64; 3],
        host_origin: [u64; 3],
        region: [u64; 3],
        buffer_pitches: (u64, u64),
        host_pitches: (u64, u64),
        host: &mut [u8],
        wait: &[Event],
    ) -> crate::Result<Event> {
        let host_layout = self.check_rect_read(
            mem,
            buffer_origin,
            host_origin,
            region,
            buffer_pitches,
            host_pitches,
            host.len(),
        )?;
        self.check_wait(wait)?;

        let dense_len = rect::dense_size(region);
        let (remote, dense) = self.session().call(
            |frame| {
                self.put_rect_request(
                    frame,
                    Command::EnqueueReadBufferRect,
                    mem,
                    true,
                    buffer_origin,
                    region,
                    buffer_pitches,
                    host_pitches,
                )?;
                put_tail(frame, true, wait)
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                let remote = s.get_handle(HandleKind::Event)?;
                let dense = read_pack(&mut s, dense_len)?;
                Ok((remote, dense))
            },
        )?;
        rect::scatter(&dense, host, host_origin, region, host_layout)
            .ok_or(Status::INVALID_VALUE)?;
        Ok(self.make_event(remote, command_type::READ_BUFFER_RECT, false, ExecState::Complete))
    }

    /// Non-blocking rect write; the gather out of `host` happens on the
    /// worker.
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_write_buffer_rect(
        &self,
        mem: &Mem,
        buffer_origin: [u64; 3],
        host_origin: [u64; 3],
        region: [u64; 3],
        buffer_pitches: (u64, u64),
        host_pitches: (u64, u64),
        host: Vec<u8>,
        wait: &[Event],
    ) -> crate::Result<Event> {
        let host_layout = self.check_rect_write(
            mem,
            buffer_origin,
            host_origin,
            region,
            buffer_pitches,
            host_pitches,
            host.len(),
        )?;
        self.check_wait(wait)?;

        let (remote, port) = self.session().call(
            |frame| {
                self.put_rect_request(
                    frame,
                    Command::EnqueueWriteBufferRect,
                    mem,
                    false,
                    buffer_origin,
                    region,
                    buffer_pitches,
                    host_pitches,
                )?;
                put_tail(frame, true, wait)
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                let remote = s.get_handle(HandleKind::Event)?;
                let port = s.get_u32()? as u16;
                Ok((remote, port))
            },
        )?;

        let event = self.make_event(
            remote,
            command_type::WRITE_BUFFER_RECT,
            true,
            ExecState::Submitted,
        );
        transfer::spawn_write(
            self.session().server_ip(),
            port,
            move || {
                rect::gather(&host, host_origin, region, host_layout)
                    .ok_or(Status::INVALID_VALUE)
            },
            event.clone(),
        );
        Ok(event)
    }

    /// Blocking rect write.
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_write_buffer_rect_blocking(
        &self,
        mem: &Mem,
        buffer_origin: [u64; 3],
        host_origin: [u64; 3],
        region: [u64; 3],
        buffer_pitches: (u64, u64),
        host_pitches: (u64, u64),
        host: &[u8],
        wait: &[Event],
    ) -> crate::Result<Event> {
        let host_layout = self.check_rect_write(
            mem,
            buffer_origin,
            host_origin,
            region,
            buffer_pitches,
            host_pitches,
            host.len(),
        )?;
        self.check_wait(wait)?;

        let dense = rect::gather(host, host_origin, region, host_layout)
            .ok_or(Status::INVALID_VALUE)?;
        let remote = self.session().call_with_payload(
            |frame| {
                self.put_rect_request(
                    frame,
                    Command::EnqueueWriteBufferRect,
                    mem,
                    true,
                    buffer_origin,
                    region,
                    buffer_pitches,
                    host_pitches,
                )?;
                put_tail(frame, true, wait)
            },
            &dense,
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                s.get_handle(HandleKind::Event)
            },
        )?;
        Ok(self.make_event(remote, command_type::WRITE_BUFFER_RECT, false, ExecState::Complete))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_copy_buffer_rect(
        &self,
        src: &Mem,
        dst: &Mem,
        src_origin: [u64; 3],
        dst_origin: [u64; 3],
        region: [u64; 3],
        src_pitches: (u64, u64),
        dst_pitches: (u64, u64),
        wait: &[Event],
    ) -> crate::Result<Event> {
        self.check_mem(src)?;
        self.check_mem(dst)?;
        self.check_region_in(src, src_origin, region, src_pitches)?;
        self.check_region_in(dst, dst_origin, region, dst_pitches)?;
        self.submit(
            Command::EnqueueCopyBufferRect,
            command_type::COPY_BUFFER_RECT,
            wait,
            |frame| {
                frame.put_handle(HandleKind::Mem, src.remote())?;
                frame.put_handle(HandleKind::Mem, dst.remote())?;
                frame.put_size_array(&src_origin)?;
                frame.put_size_array(&dst_origin)?;
                frame.put_size_array(&region)?;
                frame.put_size(src_pitches.0)?;
                frame.put_size(src_pitches.1)?;
                frame.put_size(dst_pitches.0)?;
                frame.put_size(dst_pitches.1)
            },
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn put_rect_request(
        &self,
        frame: &mut Vec<u8>,
        command: Command,
        mem: &Mem,
        blocking: bool,
        buffer_origin: [u64; 3],
        region: [u64; 3],
        buffer_pitches: (u64, u64),
        host_pitches: (u64, u64),
    ) -> std::io::Result<()> {
        frame.put_u32(command.into())?;
        frame.put_handle(HandleKind::CommandQueue, self.remote())?;
        frame.put_handle(HandleKind::Mem, mem.remote())?;
        frame.put_bool(blocking)?;
        frame.put_size_array(&buffer_origin)?;
        frame.put_size_array(&region)?;
        frame.put_size(buffer_pitches.0)?;
        frame.put_size(buffer_pitches.1)?;
        frame.put_size(host_pitches.0)?;
        frame.put_size(host_pitches.1)
    }

    fn check_region_in(
        &self,
        mem: &Mem,
        origin: [u64; 3],
        region: [u64; 3],
        pitches: (u64, u64),
    ) -> crate::Result<()> {
        let layout =
            RectLayout::new(region, pitches.0, pitches.1).ok_or(Status::INVALID_VALUE)?;
        if rect::dense_size(region) == 0 || layout.required_len(origin, region) > mem.size() {
            return Err(Status::INVALID_VALUE);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn check_rect_read(
        &self,
        mem: &Mem,
        buffer_origin: [u64; 3],
        host_origin: [u64; 3],
        region: [u64; 3],
        buffer_pitches: (u64, u64),
        host_pitches: (u64, u64),
        host_len: usize,
    ) -> crate::Result<RectLayout> {
        self.check_mem(mem)?;
        if mem.is_image() {
            return Err(Status::INVALID_MEM_OBJECT);
        }
        self.check_region_in(mem, buffer_origin, region, buffer_pitches)?;
        let host_layout = RectLayout::new(region, host_pitches.0, host_pitches.1)
            .ok_or(Status::INVALID_VALUE)?;
        if host_layout.required_len(host_origin, region) > host_len as u64 {
            return Err(Status::INVALID_VALUE);
        }
        Ok(host_layout)
    }

    #[allow(clippy::too_many_arguments)]
    fn check_rect_write(
        &self,
        mem: &Mem,
        buffer_origin: [u64; 3],
        host_origin: [u64; 3],
        region: [u64; 3],
        buffer_pitches: (u64, u64),
        host_pitches: (u64, u64),
        host_len: usize,
    ) -> crate::Result<RectLayout> {
        // Same geometry rules either direction.
        self.check_rect_read(
            mem,
            buffer_origin,
            host_origin,
            region,
            buffer_pitches,
            host_pitches,
            host_len,
        )
    }

    // ---- Image transfers ----

    /// Non-blocking image read; the dense pixel block is scattered into
    /// `host` with the given host pitches (zero = tightly packed).
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_read_image(
        &self,
        mem: &Mem,
        origin: [u64; 3],
        region: [u64; 3],
        host_pitches: (u64, u64),
        host: Vec<u8>,
        wait: &[Event],
    ) -> crate::Result<PendingRead> {
        let (host_layout, byte_region) =
            self.check_image_io(mem, region, host_pitches, host.len())?;
        self.check_wait(wait)?;

        let (remote, port) = self.session().call(
            |frame| {
                self.put_image_request(
                    frame,
                    Command::EnqueueReadImage,
                    mem,
                    false,
                    origin,
                    region,
                    host_pitches,
                )?;
                put_tail(frame, true, wait)
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                let remote = s.get_handle(HandleKind::Event)?;
                let port = s.get_u32()? as u16;
                Ok((remote, port))
            },
        )?;

        let event = self.make_event(remote, command_type::READ_IMAGE, true, ExecState::Submitted);
        let mut host = host;
        Ok(transfer::spawn_read(
            self.session().server_ip(),
            port,
            rect::dense_size(byte_region),
            move |dense| {
                rect::scatter(&dense, &mut host, [0, 0, 0], byte_region, host_layout)
                    .ok_or(Status::INVALID_VALUE)?;
                Ok(host)
            },
            event,
        ))
    }

    /// Blocking image read into `host`.
    pub fn enqueue_read_image_blocking(
        &self,
        mem: &Mem,
        origin: [u64; 3],
        region: [u64; 3],
        host_pitches: (u64, u64),
        host: &mut [u8],
        wait: &[Event],
    ) -> crate::Result<Event> {
        self.read_image_into(
            mem,
            origin,
            region,
            host_pitches,
            host,
            wait,
            command_type::READ_IMAGE,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn read_image_into(
        &self,
        mem: &Mem,
        origin: [u64; 3],
        region: [u64; 3],
        host_pitches: (u64, u64),
        host: &mut [u8],
        wait: &[Event],
        ct: u32,
    ) -> crate::Result<Event> {
        let (host_layout, byte_region) =
            self.check_image_io(mem, region, host_pitches, host.len())?;
        self.check_wait(wait)?;

        let dense_len = rect::dense_size(byte_region);
        let (remote, dense) = self.session().call(
            |frame| {
                self.put_image_request(
                    frame,
                    Command::EnqueueReadImage,
                    mem,
                    true,
                    origin,
                    region,
                    host_pitches,
                )?;
                put_tail(frame, true, wait)
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                let remote = s.get_handle(HandleKind::Event)?;
                let dense = read_pack(&mut s, dense_len)?;
                Ok((remote, dense))
            },
        )?;
        rect::scatter(&dense, host, [0, 0, 0], byte_region, host_layout)
            .ok_or(Status::INVALID_VALUE)?;
        Ok(self.make_event(remote, ct, false, ExecState::Complete))
    }

    /// Non-blocking image write out of `host`.
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_write_image(
        &self,
        mem: &Mem,
        origin: [u64; 3],
        region: [u64; 3],
        host_pitches: (u64, u64),
        host: Vec<u8>,
        wait: &[Event],
    ) -> crate::Result<Event> {
        let (host_layout, byte_region) =
            self.check_image_io(mem, region, host_pitches, host.len())?;
        self.check_wait(wait)?;

        let (remote, port) = self.session().call(
            |frame| {
                self.put_image_request(
                    frame,
                    Command::EnqueueWriteImage,
                    mem,
                    false,
                    origin,
                    region,
                    host_pitches,
                )?;
                put_tail(frame, true, wait)
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                let remote = s.get_handle(HandleKind::Event)?;
                let port = s.get_u32()? as u16;
                Ok((remote, port))
            },
        )?;

        let event = self.make_event(remote, command_type::WRITE_IMAGE, true, ExecState::Submitted);
        transfer::spawn_write(
            self.session().server_ip(),
            port,
            move || {
                rect::gather(&host, [0, 0, 0], byte_region, host_layout)
                    .ok_or(Status::INVALID_VALUE)
            },
            event.clone(),
        );
        Ok(event)
    }

    /// Blocking image write.
    pub fn enqueue_write_image_blocking(
        &self,
        mem: &Mem,
        origin: [u64; 3],
        region: [u64; 3],
        host_pitches: (u64, u64),
        host: &[u8],
        wait: &[Event],
    ) -> crate::Result<Event> {
        self.write_image_inline(
            mem,
            origin,
            region,
            host_pitches,
            host,
            wait,
            command_type::WRITE_IMAGE,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn write_image_inline(
        &self,
        mem: &Mem,
        origin: [u64; 3],
        region: [u64; 3],
        host_pitches: (u64, u64),
        host: &[u8],
        wait: &[Event],
        ct: u32,
    ) -> crate::Result<Event> {
        let (host_layout, byte_region) =
            self.check_image_io(mem, region, host_pitches, host.len())?;
        self.check_wait(wait)?;

        let dense = rect::gather(host, [0, 0, 0], byte_region, host_layout)
            .ok_or(Status::INVALID_VALUE)?;
        let remote = self.session().call_with_payload(
            |frame| {
                self.put_image_request(
                    frame,
                    Command::EnqueueWriteImage,
                    mem,
                    true,
                    origin,
                    region,
                    host_pitches,
                )?;
                put_tail(frame, true, wait)
            },
            &dense,
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                s.get_handle(HandleKind::Event)
            },
        )?;
        Ok(self.make_event(remote, ct, false, ExecState::Complete))
    }

    fn put_image_request(
        &self,
        frame: &mut Vec<u8>,
        command: Command,
        mem: &Mem,
        blocking: bool,
        origin: [u64; 3],
        region: [u64; 3],
        host_pitches: (u64, u64),
    ) -> std::io::Result<()> {
        frame.put_u32(command.into())?;
        frame.put_handle(HandleKind::CommandQueue, self.remote())?;
        frame.put_handle(HandleKind::Mem, mem.remote())?;
        frame.put_bool(blocking)?;
        frame.put_size_array(&origin)?;
        frame.put_size_array(&region)?;
        frame.put_size(host_pitches.0)?;
        frame.put_size(host_pitches.1)
    }

    /// Geometry checks for an image transfer; returns the host-side
    /// layout and the byte-denominated region.
    fn check_image_io(
        &self,
        mem: &Mem,
        region: [u64; 3],
        host_pitches: (u64, u64),
        host_len: usize,
    ) -> crate::Result<(RectLayout, [u64; 3])> {
        self.check_mem(mem)?;
        if !mem.is_image() {
            return Err(Status::INVALID_MEM_OBJECT);
        }
        if rect::dense_size(region) == 0 {
            return Err(Status::INVALID_VALUE);
        }
        let byte_region = [region[0] * mem.element_size(), region[1], region[2]];
        let host_layout = RectLayout::new(byte_region, host_pitches.0, host_pitches.1)
            .ok_or(Status::INVALID_VALUE)?;
        if host_layout.required_len([0, 0, 0], byte_region) > host_len as u64 {
            return Err(Status::INVALID_VALUE);
        }
        Ok((host_layout, byte_region))
    }

    pub fn enqueue_copy_image(
        &self,
        src: &Mem,
        dst: &Mem,
        src_origin: [u64; 3],
        dst_origin: [u64; 3],
        region: [u64; 3],
        wait: &[Event],
    ) -> crate::Result<Event> {
        self.check_mem(src)?;
        self.check_mem(dst)?;
        self.submit(
            Command::EnqueueCopyImage,
            command_type::COPY_IMAGE,
            wait,
            |frame| {
                frame.put_handle(HandleKind::Mem, src.remote())?;
                frame.put_handle(HandleKind::Mem, dst.remote())?;
                frame.put_size_array(&src_origin)?;
                frame.put_size_array(&dst_origin)?;
                frame.put_size_array(&region)
            },
        )
    }

    pub fn enqueue_copy_image_to_buffer(
        &self,
        image: &Mem,
        buffer: &Mem,
        origin: [u64; 3],
        region: [u64; 3],
        dst_offset: u64,
        wait: &[Event],
    ) -> crate::Result<Event> {
        self.check_mem(image)?;
        self.check_mem(buffer)?;
        self.submit(
            Command::EnqueueCopyImageToBuffer,
            command_type::COPY_IMAGE_TO_BUFFER,
            wait,
            |frame| {
                frame.put_handle(HandleKind::Mem, image.remote())?;
                frame.put_handle(HandleKind::Mem, buffer.remote())?;
                frame.put_size_array(&origin)?;
                frame.put_size_array(&region)?;
                frame.put_size(dst_offset)
            },
        )
    }

    pub fn enqueue_copy_buffer_to_image(
        &self,
        buffer: &Mem,
        image: &Mem,
        src_offset: u64,
        dst_origin: [u64; 3],
        region: [u64; 3],
        wait: &[Event],
    ) -> crate::Result<Event> {
        self.check_mem(buffer)?;
        self.check_mem(image)?;
        self.submit(
            Command::EnqueueCopyBufferToImage,
            command_type::COPY_BUFFER_TO_IMAGE,
            wait,
            |frame| {
                frame.put_handle(HandleKind::Mem, buffer.remote())?;
                frame.put_handle(HandleKind::Mem, image.remote())?;
                frame.put_size(src_offset)?;
                frame.put_size_array(&dst_origin)?;
                frame.put_size_array(&region)
            },
        )
    }

    // ---- Fills, migration, kernels, markers ----

    pub fn enqueue_fill_buffer(
        &self,
        mem: &Mem,
        pattern: &[u8],
        offset: u64,
        size: u64,
        wait: &[Event],
    ) -> crate::Result<Event> {
        self.check_mem(mem)?;
        if pattern.is_empty() || size == 0 {
            return Err(Status::INVALID_VALUE);
        }
        self.submit(
            Command::EnqueueFillBuffer,
            command_type::FILL_BUFFER,
            wait,
            |frame| {
                frame.put_handle(HandleKind::Mem, mem.remote())?;
                frame.put_blob(pattern)?;
                frame.put_size(offset)?;
                frame.put_size(size)
            },
        )
    }

    /// Fill an image region with a colour given as four 32-bit lanes.
    pub fn enqueue_fill_image(
        &self,
        mem: &Mem,
        color: &[u8; 16],
        origin: [u64; 3],
        region: [u64; 3],
        wait: &[Event],
    ) -> crate::Result<Event> {
        self.check_mem(mem)?;
        if !mem.is_image() {
            return Err(Status::INVALID_MEM_OBJECT);
        }
        self.submit(
            Command::EnqueueFillImage,
            command_type::FILL_IMAGE,
            wait,
            |frame| {
                frame.put_handle(HandleKind::Mem, mem.remote())?;
                frame.put_blob(color)?;
                frame.put_size_array(&origin)?;
                frame.put_size_array(&region)
            },
        )
    }

    pub fn enqueue_migrate_mem_objects(
        &self,
        mems: &[Mem],
        flags: u64,
        wait: &[Event],
    ) -> crate::Result<Event> {
        for m in mems {
            self.check_mem(m)?;
        }
        self.submit(
            Command::EnqueueMigrateMemObjects,
            command_type::MIGRATE_MEM_OBJECTS,
            wait,
            |frame| {
                frame.put_u32(mems.len() as u32)?;
                for m in mems {
                    frame.put_handle(HandleKind::Mem, m.remote())?;
                }
                frame.put_u64(flags)
            },
        )
    }

    pub fn enqueue_ndrange_kernel(
        &self,
        kernel: &Kernel,
        global_offset: Option<&[u64]>,
        global_size: &[u64],
        local_size: Option<&[u64]>,
        wait: &[Event],
    ) -> crate::Result<Event> {
        let work_dim = global_size.len();
        if !(1..=3).contains(&work_dim) {
            return Err(Status::INVALID_WORK_DIMENSION);
        }
        if global_offset.is_some_and(|o| o.len() != work_dim)
            || local_size.is_some_and(|l| l.len() != work_dim)
        {
            return Err(Status::INVALID_VALUE);
        }
        self.submit(
            Command::EnqueueNDRangeKernel,
            command_type::NDRANGE_KERNEL,
            wait,
            |frame| {
                frame.put_handle(HandleKind::Kernel, kernel.remote())?;
                frame.put_u32(work_dim as u32)?;
                frame.put_bool(global_offset.is_some())?;
                frame.put_bool(local_size.is_some())?;
                if let Some(offset) = global_offset {
                    frame.put_size_array(offset)?;
                }
                frame.put_size_array(global_size)?;
                if let Some(local) = local_size {
                    frame.put_size_array(local)?;
                }
                Ok(())
            },
        )
    }

    pub fn enqueue_task(&self, kernel: &Kernel, wait: &[Event]) -> crate::Result<Event> {
        self.submit(Command::EnqueueTask, command_type::TASK, wait, |frame| {
            frame.put_handle(HandleKind::Kernel, kernel.remote())
        })
    }

    /// Native-code kernels would execute client code on the server; the
    /// operation does not exist over this transport.
    pub fn enqueue_native_kernel(
        &self,
        _f: Box<dyn FnOnce(&mut [u8]) + Send>,
        _args: &[u8],
        _wait: &[Event],
    ) -> crate::Result<Event> {
        Err(Status::INVALID_OPERATION)
    }

    pub fn enqueue_marker_with_wait_list(&self, wait: &[Event]) -> crate::Result<Event> {
        self.submit(
            Command::EnqueueMarkerWithWaitList,
            command_type::MARKER,
            wait,
            |_frame| Ok(()),
        )
    }

    /// Deprecated marker form; an empty wait-list marker.
    pub fn enqueue_marker(&self) -> crate::Result<Event> {
        self.enqueue_marker_with_wait_list(&[])
    }

    pub fn enqueue_barrier_with_wait_list(&self, wait: &[Event]) -> crate::Result<Event> {
        self.submit(
            Command::EnqueueBarrierWithWaitList,
            command_type::BARRIER,
            wait,
            |_frame| Ok(()),
        )
    }

    /// Deprecated barrier form; an empty wait-list barrier.
    pub fn enqueue_barrier(&self) -> crate::Result<Event> {
        self.enqueue_barrier_with_wait_list(&[])
    }

    /// Deprecated queue-level wait; a barrier over the given events with
    /// no event of its own.
    pub fn enqueue_wait_for_events(&self, events: &[Event]) -> crate::Result<()> {
        if events.is_empty() {
            return Err(Status::INVALID_VALUE);
        }
        self.check_wait(events)?;
        crate::platform::status_call(self.session(), |frame| {
            frame.put_u32(Command::EnqueueBarrierWithWaitList.into())?;
            frame.put_handle(HandleKind::CommandQueue, self.remote())?;
            put_tail(frame, false, events)
        })
    }

    // ---- Map / unmap synthesis ----

    /// Map a buffer region into host memory. The region's bytes are
    /// fetched with a plain read when the map is read- or
    /// write-visible; a `WRITE_INVALIDATE_REGION` map skips the fetch
    /// and completes a fresh user event after the wait-list resolves.
    pub fn enqueue_map_buffer(
        &self,
        mem: &Mem,
        flags: MapFlags,
        offset: u64,
        size: u64,
        wait: &[Event],
    ) -> crate::Result<(Mapping, Event)> {
        if flags.is_empty()
            || (flags.contains(MapFlags::WRITE_INVALIDATE_REGION)
                && flags.intersects(MapFlags::READ | MapFlags::WRITE))
        {
            return Err(Status::INVALID_VALUE);
        }
        self.check_mem(mem)?;
        if mem.is_image() {
            return Err(Status::INVALID_MEM_OBJECT);
        }
        if size == 0 || offset + size > mem.size() {
            return Err(Status::INVALID_VALUE);
        }
        self.check_wait(wait)?;

        let mut data = vec![0u8; size as usize];
        let event = if flags.contains(MapFlags::WRITE_INVALIDATE_REGION) {
            // The content is about to be overwritten wholesale; what
            // matters is ordering against the wait-list, settled before
            // the completion event exists.
            if !wait.is_empty() {
                wait_for_events(wait)?;
            }
            self.completed_user_event(command_type::MAP_BUFFER)?
        } else {
            self.read_buffer_into(mem, offset, &mut data, wait, command_type::MAP_BUFFER)?
        };

        let id = mem.inner.maps.lock().unwrap().insert(flags);
        let mapping = Mapping {
            data,
            id,
            mem_remote: mem.remote(),
            flags,
            offset,
            origin: [0; 3],
            region: [0; 3],
            is_image: false,
        };
        Ok((mapping, event))
    }

    /// Map an image region; the mapping holds the dense pixel block.
    pub fn enqueue_map_image(
        &self,
        mem: &Mem,
        flags: MapFlags,
        origin: [u64; 3],
        region: [u64; 3],
        wait: &[Event],
    ) -> crate::Result<(Mapping, Event)> {
        if flags.is_empty()
            || (flags.contains(MapFlags::WRITE_INVALIDATE_REGION)
                && flags.intersects(MapFlags::READ | MapFlags::WRITE))
        {
            return Err(Status::INVALID_VALUE);
        }
        self.check_mem(mem)?;
        if !mem.is_image() {
            return Err(Status::INVALID_MEM_OBJECT);
        }
        if rect::dense_size(region) == 0 {
            return Err(Status::INVALID_VALUE);
        }
        self.check_wait(wait)?;

        let len = rect::dense_size(region) * mem.element_size();
        let mut data = vec![0u8; len as usize];
        let event = if flags.contains(MapFlags::WRITE_INVALIDATE_REGION) {
            if !wait.is_empty() {
                wait_for_events(wait)?;
            }
            self.completed_user_event(command_type::MAP_IMAGE)?
        } else {
            self.read_image_into(
                mem,
                origin,
                region,
                (0, 0),
                &mut data,
                wait,
                command_type::MAP_IMAGE,
            )?
        };

        let id = mem.inner.maps.lock().unwrap().insert(flags);
        let mapping = Mapping {
            data,
            id,
            mem_remote: mem.remote(),
            flags,
            offset: 0,
            origin,
            region,
            is_image: true,
        };
        Ok((mapping, event))
    }

    /// Unmap: write-visible maps flow their bytes back with a plain
    /// write; read-only maps only order themselves behind the wait-list.
    pub fn enqueue_unmap(
        &self,
        mem: &Mem,
        mapping: Mapping,
        wait: &[Event],
    ) -> crate::Result<Event> {
        if mapping.mem_remote != mem.remote() {
            return Err(Status::INVALID_VALUE);
        }
        let Some(flags) = mem.inner.maps.lock().unwrap().remove(mapping.id) else {
            return Err(Status::INVALID_VALUE);
        };
        self.check_wait(wait)?;

        if flags.intersects(MapFlags::WRITE | MapFlags::WRITE_INVALIDATE_REGION) {
            if mapping.is_image {
                self.write_image_inline(
                    mem,
                    mapping.origin,
                    mapping.region,
                    (0, 0),
                    &mapping.data,
                    wait,
                    command_type::UNMAP_MEM_OBJECT,
                )
            } else {
                self.write_buffer_inline(
                    mem,
                    mapping.offset,
                    &mapping.data,
                    wait,
                    command_type::UNMAP_MEM_OBJECT,
                )
            }
        } else {
            if !wait.is_empty() {
                wait_for_events(wait)?;
            }
            self.completed_user_event(command_type::UNMAP_MEM_OBJECT)
        }
    }

    /// A server-side user event already set complete, used where the
    /// synthesis needs an event but no runtime work happened.
    fn completed_user_event(&self, ct: u32) -> crate::Result<Event> {
        let remote = self.session().call(
            |frame| {
                frame.put_u32(Command::CreateUserEvent.into())?;
                frame.put_handle(HandleKind::Context, self.context().remote())
            },
            |stream| {
                let mut s = stream;
                s.get_status()?.ok()?;
                s.get_handle(HandleKind::Event)
            },
        )?;
        crate::platform::status_call(self.session(), |frame| {
            frame.put_u32(Command::SetUserEventStatus.into())?;
            frame.put_handle(HandleKind::Event, remote)?;
            frame.put_i32(0)
        })?;
        Ok(self.make_event(remote, ct, false, ExecState::Complete))
    }
}
