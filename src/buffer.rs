//! Typed GPU buffers and host readback utilities.
//!
//! [`GpuBuffer`] wraps a [`wgpu::Buffer`] and tracks how many typed
//! elements it holds.  Uploads go through the queue and readback goes
//! through a mappable staging buffer; both block until the GPU is done.

use std::sync::mpsc;

use bytemuck::{cast_slice, Pod};
use log::trace;
use wgpu::{Buffer, BufferDescriptor, BufferUsages};

use crate::backend::BufferAccess;
use crate::error::{DeviceStatus, Error, Result};
use crate::GpuContext;

/// A typed GPU storage buffer.
///
/// The underlying size in bytes is `len * std::mem::size_of::<T>()`.
/// Every buffer can be copied in both directions so the host can upload
/// inputs and read back results regardless of how kernels use it.
pub struct GpuBuffer<T: Pod> {
    pub buffer: Buffer,
    pub len: usize,
    pub access: BufferAccess,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Pod> GpuBuffer<T> {
    /// Create a zero-initialised storage buffer of `len` elements.
    pub fn new_storage(context: &GpuContext, len: usize, access: BufferAccess) -> Result<Self> {
        let size = (len * std::mem::size_of::<T>()) as u64;
        if size == 0 || size > context.device.limits().max_storage_buffer_binding_size as u64 {
            return Err(Error::device(
                DeviceStatus::InvalidValue,
                format!("cannot bind a storage buffer of {size} bytes"),
            ));
        }
        context.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = context.device.create_buffer(&BufferDescriptor {
            label: Some("gpu_buffer_storage"),
            size,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        if let Some(e) = pollster::block_on(context.device.pop_error_scope()) {
            return Err(Error::device(DeviceStatus::OutOfResources, e.to_string()));
        }
        trace!("allocated {size} byte storage buffer ({access:?})");
        Ok(Self {
            buffer,
            len,
            access,
            _marker: std::marker::PhantomData,
        })
    }

    /// Upload `data` and block until the queue has consumed it.
    pub fn write(&self, context: &GpuContext, data: &[T]) -> Result<()> {
        if data.len() != self.len {
            return Err(Error::device(
                DeviceStatus::InvalidValue,
                format!("write of {} elements into a buffer of {}", data.len(), self.len),
            ));
        }
        context.queue.write_buffer(&self.buffer, 0, cast_slice(data));
        let index = context.queue.submit([]);
        context
            .device
            .poll(wgpu::PollType::WaitForSubmissionIndex(index))
            .map_err(|e| Error::device(DeviceStatus::Timeout, e.to_string()))?;
        Ok(())
    }

    /// Read the contents of the buffer back to the CPU.
    ///
    /// The data is copied into a `MAP_READ` staging buffer first.  This
    /// method blocks the current thread until the copy has finished and
    /// the mapping is ready.
    pub fn read_to_vec(&self, context: &GpuContext) -> Result<Vec<T>> {
        let size = (self.len * std::mem::size_of::<T>()) as u64;
        let download = context.device.create_buffer(&BufferDescriptor {
            label: Some("gpu_buffer_download"),
            size,
            usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback_encoder") });
        encoder.copy_buffer_to_buffer(&self.buffer, 0, &download, 0, size);
        context.queue.submit([encoder.finish()]);

        let slice = download.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            // The receiver only goes away if this function already bailed out.
            let _ = tx.send(result);
        });
        // Block until the mapping is ready.
        context
            .device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| Error::device(DeviceStatus::Timeout, e.to_string()))?;
        rx.recv()
            .map_err(|e| Error::device(DeviceStatus::MapFailure, e.to_string()))?
            .map_err(|e| Error::device(DeviceStatus::MapFailure, e.to_string()))?;

        let data = slice.get_mapped_range();
        let result: Vec<T> = cast_slice(&data).to_vec();
        // Dropping the mapped view releases the borrow before unmapping.
        drop(data);
        download.unmap();
        trace!("read back {size} bytes");
        Ok(result)
    }
}
