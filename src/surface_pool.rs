// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Fixed-size pool of hardware decode surfaces.
//!
//! The surfaces are created all at once against a [`SurfaceDevice`] with [`SurfacePool::alloc`]
//! and released all at once with [`SurfacePool::free`]. They are never recycled individually: a
//! change of geometry or the loss of the device means freeing and reallocating the whole pool.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::Weak;

use crate::Error;
use crate::VideoDimensions;

/// Error returned by [`SurfaceDevice`] methods.
#[derive(thiserror::Error, Debug)]
pub enum SurfaceDeviceError {
    #[error("not enough device resources to create the requested surfaces")]
    OutOfResources,
    #[error("the device has been lost")]
    DeviceLost,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<SurfaceDeviceError> for Error {
    fn from(err: SurfaceDeviceError) -> Self {
        match err {
            SurfaceDeviceError::OutOfResources => {
                Error::AllocationFailure("device is out of surface resources".into())
            }
            SurfaceDeviceError::DeviceLost => Error::DeviceLost,
            SurfaceDeviceError::Other(e) => {
                Error::AllocationFailure(format!("cannot create hardware surfaces: {e:#}"))
            }
        }
    }
}

/// The hardware decoding service surfaces are created from.
///
/// An implementation is bound to a device manager and decoder service handed over by the host at
/// connection time.
pub trait SurfaceDevice {
    /// Device-specific handle to one decode surface.
    type Surface;

    /// Creates `count` NV12 decode surfaces of `width`x`height`.
    fn create_surfaces(
        &mut self,
        width: u32,
        height: u32,
        count: usize,
    ) -> Result<Vec<Self::Surface>, SurfaceDeviceError>;
}

/// One entry of a [`SurfacePool`].
#[derive(Debug)]
pub struct HardwareSurface<S> {
    id: u32,
    handle: S,
}

impl<S> HardwareSurface<S> {
    /// Index of the surface in its pool, as understood by the decoder.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn handle(&self) -> &S {
        &self.handle
    }
}

struct PoolSurfaces<S> {
    free: VecDeque<HardwareSurface<S>>,
    /// Bumped every time the pool is freed, so surfaces of a previous allocation are not
    /// taken back.
    generation: u64,
}

/// A surface borrowed from a [`SurfacePool`].
///
/// The surface goes back to the pool when dropped, unless the pool has been freed in the meantime.
pub struct PooledSurface<S> {
    surface: Option<HardwareSurface<S>>,
    generation: u64,
    pool: Weak<Mutex<PoolSurfaces<S>>>,
}

impl<S> PooledSurface<S> {
    pub fn id(&self) -> u32 {
        // `unwrap` will never fail as `surface` is `Some` until the object is dropped.
        self.surface.as_ref().unwrap().id()
    }

    pub fn handle(&self) -> &S {
        // `unwrap` will never fail as `surface` is `Some` until the object is dropped.
        self.surface.as_ref().unwrap().handle()
    }
}

impl<S> std::fmt::Debug for PooledSurface<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSurface")
            .field("id", &self.surface.as_ref().map(|s| s.id))
            .field("generation", &self.generation)
            .finish()
    }
}

impl<S> Drop for PooledSurface<S> {
    fn drop(&mut self) {
        let Some(surface) = self.surface.take() else {
            return;
        };

        if let Some(pool) = self.pool.upgrade() {
            let mut pool = pool.lock().unwrap_or_else(PoisonError::into_inner);
            if pool.generation == self.generation {
                pool.free.push_back(surface);
                return;
            }
        }

        log::debug!("dropping stale surface: {}", surface.id);
    }
}

/// Number of surfaces a pool is created with, and the device they are created from.
pub struct DeviceBinding<D: SurfaceDevice> {
    pub device: D,
    pub surface_count: usize,
}

impl<D: SurfaceDevice> DeviceBinding<D> {
    pub fn new(device: D, surface_count: usize) -> Self {
        Self {
            device,
            surface_count,
        }
    }
}

pub struct SurfacePool<D: SurfaceDevice> {
    device: D,
    surface_count: usize,
    dimensions: VideoDimensions,
    surfaces: Arc<Mutex<PoolSurfaces<D::Surface>>>,
    allocated: bool,
}

impl<D: SurfaceDevice> SurfacePool<D> {
    /// Creates an empty pool. Surfaces are only created by [`SurfacePool::alloc`].
    pub fn new(binding: DeviceBinding<D>, dimensions: VideoDimensions) -> Self {
        Self {
            device: binding.device,
            surface_count: binding.surface_count,
            dimensions,
            surfaces: Arc::new(Mutex::new(PoolSurfaces {
                free: VecDeque::new(),
                generation: 0,
            })),
            allocated: false,
        }
    }

    /// Creates all the surfaces of the pool for the current geometry, replacing any previous
    /// allocation. On failure the pool is left empty.
    pub fn alloc(&mut self) -> crate::Result<()> {
        self.free();

        let (width, height) = (self.dimensions.width(), self.dimensions.height());
        crate::validate_geometry(width, height)?;
        if self.surface_count == 0 {
            return Err(Error::InvalidArgument("surface pool needs at least one surface"));
        }

        let handles = self
            .device
            .create_surfaces(width as u32, height as u32, self.surface_count)
            .map_err(|e| {
                log::error!("cannot create {} surfaces: {e}", self.surface_count);
                Error::from(e)
            })?;

        if handles.len() != self.surface_count {
            return Err(Error::AllocationFailure(format!(
                "device created {} surfaces out of {}",
                handles.len(),
                self.surface_count
            )));
        }

        let mut surfaces = self.lock_surfaces();
        surfaces.free = handles
            .into_iter()
            .enumerate()
            .map(|(id, handle)| HardwareSurface {
                id: id as u32,
                handle,
            })
            .collect();
        drop(surfaces);

        log::info!(
            "allocated {} hardware surfaces of {}x{}",
            self.surface_count,
            width,
            height
        );
        self.allocated = true;

        Ok(())
    }

    /// Releases all the surfaces. Surfaces currently borrowed are released when dropped.
    pub fn free(&mut self) {
        let mut surfaces = self.lock_surfaces();
        surfaces.free.clear();
        surfaces.generation += 1;
        drop(surfaces);

        if self.allocated {
            log::debug!("released hardware surface pool");
        }
        self.allocated = false;
    }

    /// Changes the geometry of the surfaces. Takes effect at the next [`SurfacePool::alloc`].
    pub fn set_dimensions(&mut self, dimensions: VideoDimensions) {
        self.dimensions = dimensions;
    }

    pub fn dimensions(&self) -> VideoDimensions {
        self.dimensions
    }

    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    pub fn surface_count(&self) -> usize {
        self.surface_count
    }

    pub fn num_free_surfaces(&self) -> usize {
        self.lock_surfaces().free.len()
    }

    /// Gets a free surface from the pool.
    pub fn take_free_surface(&mut self) -> Option<PooledSurface<D::Surface>> {
        let mut surfaces = self.lock_surfaces();
        let surface = surfaces.free.pop_front()?;
        let generation = surfaces.generation;
        drop(surfaces);

        Some(PooledSurface {
            surface: Some(surface),
            generation,
            pool: Arc::downgrade(&self.surfaces),
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    fn lock_surfaces(&self) -> std::sync::MutexGuard<'_, PoolSurfaces<D::Surface>> {
        self.surfaces.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<D: SurfaceDevice> Drop for SurfacePool<D> {
    fn drop(&mut self) {
        self.free();
    }
}
