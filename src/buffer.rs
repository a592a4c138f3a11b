//! Typed GPU buffers and host readback utilities.
//!
//! This module defines a [`GpuBuffer`] wrapper around [`wgpu::Buffer`]
//! that tracks the number of typed elements stored in the buffer.  The
//! same wrapper backs shader storage blocks, uniform blocks and the
//! map-readable staging buffers used to bring results back to the CPU.

use std::marker::PhantomData;

use bytemuck::{cast_slice, Pod};
use wgpu::util::DeviceExt;
use wgpu::{Buffer, BufferDescriptor, BufferUsages};

use crate::context::GpuContext;
use crate::error::{ComputeError, Result};

/// A typed GPU buffer.
///
/// The underlying buffer size in bytes is `len * size_of::<T>()`.
pub struct GpuBuffer<T: Pod> {
    pub buffer: Buffer,
    pub len: usize,
    _marker: PhantomData<T>,
}

impl<T: Pod> GpuBuffer<T> {
    fn from_contents(context: &GpuContext, label: &str, data: &[T], usage: BufferUsages) -> Self {
        let buffer = context
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: cast_slice(data),
                usage,
            });
        Self {
            buffer,
            len: data.len(),
            _marker: PhantomData,
        }
    }

    /// Create a shader storage buffer holding `data`.
    ///
    /// `COPY_SRC` is always included so the contents can be read back
    /// after a dispatch.
    pub fn storage(context: &GpuContext, label: &str, data: &[T]) -> Self {
        Self::from_contents(
            context,
            label,
            data,
            BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
        )
    }

    /// Create a uniform buffer holding `data`.
    pub fn uniform(context: &GpuContext, label: &str, data: &[T]) -> Self {
        Self::from_contents(
            context,
            label,
            data,
            BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        )
    }

    /// Create a download buffer sized to hold `len` elements.  It is
    /// mappable for reading and cannot be bound to a shader.
    pub fn new_download(context: &GpuContext, len: usize) -> Self {
        let buffer = context.device.create_buffer(&BufferDescriptor {
            label: Some("gpu_buffer_download"),
            size: (len * std::mem::size_of::<T>()) as u64,
            usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            len,
            _marker: PhantomData,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        (self.len * std::mem::size_of::<T>()) as u64
    }

    /// Copy the buffer into a staging buffer and read it back.
    pub fn read_back(&self, context: &GpuContext) -> Result<Vec<T>> {
        let download = Self::new_download(context, self.len);
        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback_encoder"),
            });
        encoder.copy_buffer_to_buffer(&self.buffer, 0, &download.buffer, 0, self.size_bytes());
        context.queue.submit([encoder.finish()]);
        download.read_to_vec(context)
    }

    /// Map a download buffer and copy its contents out.
    ///
    /// Blocks until the GPU has finished all submitted work.  The buffer
    /// is unmapped again before returning.
    pub fn read_to_vec(&self, context: &GpuContext) -> Result<Vec<T>> {
        let slice = self.buffer.slice(..);
        let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        context.device.poll(wgpu::PollType::Wait)?;

        // `None` means the callback was dropped without being called.
        pollster::block_on(rx.receive())
            .unwrap_or(Err(wgpu::BufferAsyncError))
            .map_err(ComputeError::Map)?;

        let data = slice.get_mapped_range();
        let result: Vec<T> = cast_slice(&data).to_vec();
        drop(data);
        self.buffer.unmap();
        Ok(result)
    }
}

/// `word[i] = i` for every dword, the contents of every input resource.
pub fn index_pattern(dwords: usize) -> Vec<u32> {
    (0..dwords as u32).collect()
}
