// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Fixed-size pool of software output frames.

use std::collections::VecDeque;
use std::ops::Deref;
use std::ops::DerefMut;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::Weak;

use crate::frame_buffer::PlanarFrameBuffer;
use crate::Error;
use crate::Result;

/// A frame obtained from a [`FramePool`].
///
/// The frame goes back to its pool when dropped, provided the pool has not been resized in the
/// meantime. Frames that have been turned into views with
/// [`PlanarFrameBuffer::copy_reference_to`], or whose storage is still referenced by views, get
/// fresh storage before being returned.
#[derive(Debug)]
pub struct PooledFrame {
    inner: Option<PlanarFrameBuffer>,
    pool: Weak<Mutex<VecDeque<PlanarFrameBuffer>>>,
    width: i32,
    height: i32,
}

impl Deref for PooledFrame {
    type Target = PlanarFrameBuffer;

    fn deref(&self) -> &PlanarFrameBuffer {
        // `unwrap` will never fail as `inner` is `Some` until the object is dropped.
        self.inner.as_ref().unwrap()
    }
}

impl DerefMut for PooledFrame {
    fn deref_mut(&mut self) -> &mut PlanarFrameBuffer {
        // `unwrap` will never fail as `inner` is `Some` until the object is dropped.
        self.inner.as_mut().unwrap()
    }
}

impl Drop for PooledFrame {
    fn drop(&mut self) {
        let Some(mut frame) = self.inner.take() else {
            return;
        };

        let Some(pool) = self.pool.upgrade() else {
            log::debug!(
                "dropping stale frame: {}x{}",
                frame.width(),
                frame.height()
            );
            return;
        };

        // Views handed out from this frame keep its current storage.
        if frame.is_shared() {
            frame.free();
        }

        if let Err(e) = frame.allocate(self.width, self.height) {
            log::error!("cannot restore pooled frame storage: {e}");
            return;
        }

        pool.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(frame);
    }
}

/// Pool of [`PlanarFrameBuffer`]s sharing the same geometry.
#[derive(Default)]
pub struct FramePool {
    pool: Option<Arc<Mutex<VecDeque<PlanarFrameBuffer>>>>,
    num_frames: usize,
    width: i32,
    height: i32,
}

impl FramePool {
    pub fn new() -> Self {
        Default::default()
    }

    /// Replaces the content of the pool with `count` frames of `width`x`height`.
    ///
    /// Frames of the previous geometry still in use are released instead of being returned. If
    /// any allocation fails, the pool keeps its previous content.
    pub fn resize(&mut self, count: usize, width: i32, height: i32) -> Result<()> {
        if count == 0 {
            return Err(Error::InvalidArgument("frame pool needs at least one frame"));
        }

        let mut frames = VecDeque::with_capacity(count);
        for _ in 0..count {
            let mut frame = PlanarFrameBuffer::new();
            frame.allocate(width, height)?;
            frames.push_back(frame);
        }

        log::debug!("frame pool resized to {count} frames of {width}x{height}");

        self.pool = Some(Arc::new(Mutex::new(frames)));
        self.num_frames = count;
        self.width = width;
        self.height = height;

        Ok(())
    }

    /// Drops all the frames of the pool. Frames still in use are released once dropped.
    pub fn clear(&mut self) {
        self.pool = None;
        self.num_frames = 0;
        self.width = 0;
        self.height = 0;
    }

    pub fn is_allocated(&self) -> bool {
        self.pool.is_some()
    }

    pub fn size(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    /// Total number of frames managed by the pool, including those in use.
    pub fn num_managed_frames(&self) -> usize {
        self.num_frames
    }

    pub fn num_free_frames(&self) -> usize {
        self.pool.as_ref().map_or(0, |pool| {
            pool.lock().unwrap_or_else(PoisonError::into_inner).len()
        })
    }

    /// Takes a free frame out of the pool, if there is any.
    pub fn alloc(&mut self) -> Option<PooledFrame> {
        let pool = self.pool.as_ref()?;
        let frame = pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()?;

        Some(PooledFrame {
            inner: Some(frame),
            pool: Arc::downgrade(pool),
            width: self.width,
            height: self.height,
        })
    }
}
