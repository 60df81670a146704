//! Kernel buffer ring: allocation, memory mapping, priming, and teardown.

use std::os::raw::c_void;
use std::os::unix::io::RawFd;
use std::{mem, ptr, slice};

use log::warn;
use v4l::v4l2;
use v4l::v4l_sys::{v4l2_buffer, v4l2_requestbuffers};

use crate::traits::{CameraError, Result};

/// Buffer type pushed with every queue ioctl this crate issues.
pub(crate) const BUF_TYPE: u32 = v4l::buffer::Type::VideoCapture as u32;

/// Memory mode: driver-allocated buffers mapped into our address space.
pub(crate) const MEMORY_MMAP: u32 = v4l::memory::Memory::Mmap as u32;

/// One driver-allocated capture buffer mapped into our address space.
///
/// Owned exclusively by the pool. The only aliases handed out are the
/// short-lived frame views produced by a capture, and those borrow the
/// session.
#[derive(Debug)]
pub(crate) struct MappedBuffer {
    ptr: *mut u8,
    len: usize,
}

// Mappings are process-wide; nothing about them is tied to the creating
// thread.
unsafe impl Send for MappedBuffer {}

impl MappedBuffer {
    /// View of the first `bytesused` bytes, clamped to the mapped length in
    /// case the driver over-reports.
    pub(crate) fn bytes(&self, bytesused: usize) -> &[u8] {
        let len = bytesused.min(self.len);
        // Safe because the mapping stays valid for `self.len` bytes until
        // munmap, and the driver does not touch a buffer we hold.
        unsafe { slice::from_raw_parts(self.ptr, len) }
    }
}

/// The fixed set of mapped buffers backing a configured session.
///
/// Tracks allocation and mapping only; checkout state lives with the
/// capture cycle.
#[derive(Debug)]
pub(crate) struct BufferPool {
    bufs: Vec<MappedBuffer>,
}

impl BufferPool {
    pub(crate) const fn new() -> Self {
        Self { bufs: Vec::new() }
    }

    pub(crate) fn len(&self) -> usize {
        self.bufs.len()
    }

    pub(crate) fn get(&self, index: u32) -> Option<&MappedBuffer> {
        self.bufs.get(index as usize)
    }

    /// Request `count` driver buffers and map each granted one.
    ///
    /// Returns the granted count, which the driver may choose differently
    /// from the request. On a mapping failure, buffers mapped before the
    /// failing index stay in the pool until the session's teardown reclaims
    /// them.
    pub(crate) fn allocate(&mut self, fd: RawFd, count: u32) -> Result<u32> {
        let mut req = v4l2_requestbuffers {
            count,
            type_: BUF_TYPE,
            memory: MEMORY_MMAP,
            ..unsafe { mem::zeroed() }
        };
        unsafe {
            v4l2::ioctl(
                fd,
                v4l2::vidioc::VIDIOC_REQBUFS,
                &mut req as *mut _ as *mut c_void,
            )
        }
        .map_err(|source| CameraError::IoctlFailure {
            op: "VIDIOC_REQBUFS",
            source,
        })?;

        if req.count != count {
            warn!("driver granted {} buffers, requested {count}", req.count);
        }

        for index in 0..req.count {
            let mut buf = v4l2_buffer {
                index,
                type_: BUF_TYPE,
                memory: MEMORY_MMAP,
                ..unsafe { mem::zeroed() }
            };
            unsafe {
                v4l2::ioctl(
                    fd,
                    v4l2::vidioc::VIDIOC_QUERYBUF,
                    &mut buf as *mut _ as *mut c_void,
                )
            }
            .map_err(|source| CameraError::IoctlFailure {
                op: "VIDIOC_QUERYBUF",
                source,
            })?;

            let length = buf.length as usize;
            // Safe because length and offset come straight from QUERYBUF for
            // this descriptor.
            let mapped = unsafe {
                v4l2::mmap(
                    ptr::null_mut(),
                    length,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    fd,
                    buf.m.offset as libc::off_t,
                )
            }
            .map_err(|source| CameraError::MappingFailure { index, source })?;

            self.bufs.push(MappedBuffer {
                ptr: mapped.cast(),
                len: length,
            });
        }

        Ok(req.count)
    }

    /// Hand buffer `index` to the driver.
    pub(crate) fn enqueue(&self, fd: RawFd, index: u32) -> Result<()> {
        let mut buf = v4l2_buffer {
            index,
            type_: BUF_TYPE,
            memory: MEMORY_MMAP,
            ..unsafe { mem::zeroed() }
        };
        unsafe {
            v4l2::ioctl(
                fd,
                v4l2::vidioc::VIDIOC_QBUF,
                &mut buf as *mut _ as *mut c_void,
            )
        }
        .map_err(|source| CameraError::IoctlFailure {
            op: "VIDIOC_QBUF",
            source,
        })
    }

    /// Hand every mapped buffer to the driver, priming the pipeline before
    /// streaming starts.
    pub(crate) fn enqueue_all(&self, fd: RawFd) -> Result<()> {
        #[allow(clippy::cast_possible_truncation)]
        let count = self.bufs.len() as u32;
        for index in 0..count {
            self.enqueue(fd, index)?;
        }
        Ok(())
    }

    /// Unmap every buffer. Teardown path: munmap failures are ignored so
    /// cleanup always runs to completion.
    pub(crate) fn unmap_all(&mut self) {
        for buf in self.bufs.drain(..) {
            // Safe because pointer and length came from a successful mmap
            // and drain guarantees each buffer is unmapped exactly once.
            let _ = unsafe { v4l2::munmap(buf.ptr.cast(), buf.len) };
        }
    }
}
