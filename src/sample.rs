// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Output units handed to the downstream stage.

use crate::frame_buffer::PlanarFrameBuffer;
use crate::frame_pool::PooledFrame;
use crate::media_type::MediaType;
use crate::surface_pool::PooledSurface;
use crate::ReferenceTime;

/// Which allocator a [`MediaSample`] comes from, and thus where its memory goes back to once the
/// downstream stage releases it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SampleAllocator {
    /// The software frame pool.
    Software,
    /// The hardware surface pool.
    Hardware,
}

/// Memory carried by a [`MediaSample`].
#[derive(Debug)]
pub enum SamplePayload<S> {
    Software(PooledFrame),
    Hardware(PooledSurface<S>),
}

/// One output unit: either a software frame or a hardware surface, plus delivery metadata.
#[derive(Debug)]
pub struct MediaSample<S> {
    payload: SamplePayload<S>,
    time: Option<(ReferenceTime, ReferenceTime)>,
    sync_point: bool,
    discontinuity: bool,
    media_type: Option<MediaType>,
}

impl<S> MediaSample<S> {
    pub fn new(payload: SamplePayload<S>) -> Self {
        Self {
            payload,
            time: None,
            sync_point: false,
            discontinuity: false,
            media_type: None,
        }
    }

    pub fn allocator(&self) -> SampleAllocator {
        match self.payload {
            SamplePayload::Software(_) => SampleAllocator::Software,
            SamplePayload::Hardware(_) => SampleAllocator::Hardware,
        }
    }

    pub fn payload(&self) -> &SamplePayload<S> {
        &self.payload
    }

    pub fn frame(&self) -> Option<&PlanarFrameBuffer> {
        match &self.payload {
            SamplePayload::Software(frame) => Some(frame),
            SamplePayload::Hardware(_) => None,
        }
    }

    pub fn frame_mut(&mut self) -> Option<&mut PlanarFrameBuffer> {
        match &mut self.payload {
            SamplePayload::Software(frame) => Some(frame),
            SamplePayload::Hardware(_) => None,
        }
    }

    pub fn surface(&self) -> Option<&PooledSurface<S>> {
        match &self.payload {
            SamplePayload::Software(_) => None,
            SamplePayload::Hardware(surface) => Some(surface),
        }
    }

    /// Pool index of the hardware surface carried by this sample.
    pub fn surface_id(&self) -> Option<u32> {
        self.surface().map(|surface| surface.id())
    }

    pub fn time(&self) -> Option<(ReferenceTime, ReferenceTime)> {
        self.time
    }

    pub fn set_time(&mut self, start: ReferenceTime, stop: ReferenceTime) {
        self.time = Some((start, stop));
        if let Some(frame) = self.frame_mut() {
            frame.set_time(start, stop);
        }
    }

    pub fn is_sync_point(&self) -> bool {
        self.sync_point
    }

    pub fn set_sync_point(&mut self, sync_point: bool) {
        self.sync_point = sync_point;
    }

    pub fn is_discontinuity(&self) -> bool {
        self.discontinuity
    }

    pub fn set_discontinuity(&mut self, discontinuity: bool) {
        self.discontinuity = discontinuity;
    }

    /// Format of this sample if it differs from the one of the previous sample.
    pub fn media_type(&self) -> Option<&MediaType> {
        self.media_type.as_ref()
    }

    pub fn set_media_type(&mut self, media_type: Option<MediaType>) {
        self.media_type = media_type;
    }

    pub fn into_payload(self) -> SamplePayload<S> {
        self.payload
    }
}
