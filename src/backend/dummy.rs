// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Dummy surface device and scripted peers whose only purpose is to let the transform stage run
//! so we can test it in isolation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::anyhow;

use crate::delivery::AllocatorProperties;
use crate::frame_buffer::Plane;
use crate::frame_buffer::PlanarFrameBuffer;
use crate::media_type::MediaType;
use crate::media_type::OutputFormatInfo;
use crate::negotiator::OutputNegotiation;
use crate::negotiator::ReconnectRequest;
use crate::sample::MediaSample;
use crate::sample::SampleAllocator;
use crate::surface_pool::SurfaceDevice;
use crate::surface_pool::SurfaceDeviceError;
use crate::transform::DecodeStrategy;
use crate::transform::Downstream;
use crate::transform::InputSample;
use crate::transform::OutputSize;
use crate::ReferenceTime;

/// Surface device handing out sequential numbers as surfaces.
#[derive(Debug, Default)]
pub(crate) struct DummyDevice {
    created: usize,
    last_size: Option<(u32, u32)>,
    fail_next: Option<SurfaceDeviceError>,
}

impl DummyDevice {
    /// Total number of surfaces created so far.
    pub(crate) fn created(&self) -> usize {
        self.created
    }

    pub(crate) fn last_size(&self) -> Option<(u32, u32)> {
        self.last_size
    }

    /// Makes the next call to `create_surfaces` fail with `err`.
    pub(crate) fn fail_next(&mut self, err: SurfaceDeviceError) {
        self.fail_next = Some(err);
    }
}

impl SurfaceDevice for DummyDevice {
    type Surface = u32;

    fn create_surfaces(
        &mut self,
        width: u32,
        height: u32,
        count: usize,
    ) -> Result<Vec<Self::Surface>, SurfaceDeviceError> {
        if let Some(err) = self.fail_next.take() {
            return Err(err);
        }

        let surfaces = (self.created..self.created + count)
            .map(|handle| handle as u32)
            .collect();
        self.created += count;
        self.last_size = Some((width, height));

        Ok(surfaces)
    }
}

/// Negotiation peer that rejects a given number of proposals, then accepts everything.
#[derive(Debug, Default)]
pub(crate) struct ScriptedPeer {
    rejections_left: usize,
    proposals: Vec<MediaType>,
}

impl ScriptedPeer {
    pub(crate) fn rejecting(count: usize) -> Self {
        Self {
            rejections_left: count,
            ..Default::default()
        }
    }

    /// Every type proposed so far, accepted or not.
    pub(crate) fn proposals(&self) -> &[MediaType] {
        &self.proposals
    }
}

impl OutputNegotiation for ScriptedPeer {
    fn propose_type(&mut self, proposed: &MediaType) -> bool {
        self.proposals.push(proposed.clone());

        if self.rejections_left > 0 {
            self.rejections_left -= 1;
            false
        } else {
            true
        }
    }
}

/// Summary of a sample received by [`ScriptedDownstream`]. The sample itself is released right
/// away so its buffer goes back to its pool.
#[derive(Clone, Debug)]
pub(crate) struct DeliveredSample {
    pub(crate) allocator: SampleAllocator,
    pub(crate) surface_id: Option<u32>,
    /// Frame geometry, `(0, 0)` for hardware surfaces.
    pub(crate) size: (i32, i32),
    /// First luma byte of the frame.
    pub(crate) luma: Option<u8>,
    pub(crate) time: Option<(ReferenceTime, ReferenceTime)>,
    pub(crate) sync_point: bool,
    pub(crate) media_type: Option<MediaType>,
}

#[derive(Debug, Default)]
pub(crate) struct DownstreamLog {
    pub(crate) proposals: Vec<MediaType>,
    pub(crate) allocator_requests: Vec<AllocatorProperties>,
    pub(crate) delivered: Vec<DeliveredSample>,
    /// Zero-copy views onto delivered frames, if the downstream keeps them.
    pub(crate) views: Vec<PlanarFrameBuffer>,
}

/// Downstream stage recording everything it is asked into a shared [`DownstreamLog`].
#[derive(Debug, Default)]
pub(crate) struct ScriptedDownstream {
    log: Arc<Mutex<DownstreamLog>>,
    peer: ScriptedPeer,
    hardware: bool,
    fail_delivery: bool,
    keep_views: bool,
}

impl ScriptedDownstream {
    pub(crate) fn rejecting(mut self, count: usize) -> Self {
        self.peer = ScriptedPeer::rejecting(count);
        self
    }

    pub(crate) fn with_hardware(mut self, hardware: bool) -> Self {
        self.hardware = hardware;
        self
    }

    /// Keeps a view onto every delivered frame, like a renderer holding on to the last pictures.
    pub(crate) fn keeping_views(mut self) -> Self {
        self.keep_views = true;
        self
    }

    pub(crate) fn set_fail_delivery(&mut self, fail_delivery: bool) {
        self.fail_delivery = fail_delivery;
    }

    pub(crate) fn log(&self) -> Arc<Mutex<DownstreamLog>> {
        Arc::clone(&self.log)
    }
}

impl OutputNegotiation for ScriptedDownstream {
    fn propose_type(&mut self, proposed: &MediaType) -> bool {
        self.log.lock().unwrap().proposals.push(proposed.clone());
        self.peer.propose_type(proposed)
    }
}

impl Downstream<u32> for ScriptedDownstream {
    fn accepts_hardware_surfaces(&self) -> bool {
        self.hardware
    }

    fn set_allocator_properties(
        &mut self,
        requested: &AllocatorProperties,
    ) -> anyhow::Result<AllocatorProperties> {
        self.log.lock().unwrap().allocator_requests.push(*requested);
        Ok(*requested)
    }

    fn deliver(&mut self, sample: MediaSample<u32>) -> anyhow::Result<()> {
        if self.fail_delivery {
            return Err(anyhow!("downstream is flushing"));
        }

        let frame = sample.frame();
        let mut log = self.log.lock().unwrap();
        if let Some(frame) = frame.filter(|_| self.keep_views) {
            let mut view = PlanarFrameBuffer::new();
            frame.copy_reference_to(&mut view);
            log.views.push(view);
        }
        log.delivered.push(DeliveredSample {
            allocator: sample.allocator(),
            surface_id: sample.surface_id(),
            size: frame.map_or((0, 0), |f| (f.width(), f.height())),
            luma: frame.and_then(|f| f.plane(Plane::Y)).map(|y| y[0]),
            time: sample.time(),
            sync_point: sample.is_sync_point(),
            media_type: sample.media_type().cloned(),
        });

        Ok(())
    }
}

/// Decoder producing one output shape per unit from a script, and filling software frames with
/// the first byte of the unit as luma.
#[derive(Debug)]
pub(crate) struct ScriptedDecoder {
    formats: Vec<OutputFormatInfo>,
    shapes: VecDeque<Option<ReconnectRequest>>,
    output_size: Option<OutputSize>,
    interlaced: bool,
    hardware_support: bool,
    transforms: usize,
    failing_transform: Option<usize>,
}

impl Default for ScriptedDecoder {
    fn default() -> Self {
        Self {
            formats: vec![OutputFormatInfo::I420],
            shapes: Default::default(),
            output_size: None,
            interlaced: false,
            hardware_support: true,
            transforms: 0,
            failing_transform: None,
        }
    }
}

impl ScriptedDecoder {
    pub(crate) fn with_formats(mut self, formats: Vec<OutputFormatInfo>) -> Self {
        self.formats = formats;
        self
    }

    pub(crate) fn with_shapes(mut self, shapes: Vec<Option<ReconnectRequest>>) -> Self {
        self.shapes = shapes.into();
        self
    }

    pub(crate) fn with_output_size(mut self, output_size: OutputSize) -> Self {
        self.output_size = Some(output_size);
        self
    }

    pub(crate) fn with_interlaced(mut self, interlaced: bool) -> Self {
        self.interlaced = interlaced;
        self
    }

    pub(crate) fn with_hardware_support(mut self, hardware_support: bool) -> Self {
        self.hardware_support = hardware_support;
        self
    }

    /// Makes the `index`-th call to `transform` fail.
    pub(crate) fn failing_transform_at(mut self, index: usize) -> Self {
        self.failing_transform = Some(index);
        self
    }

    pub(crate) fn push_shape(&mut self, shape: Option<ReconnectRequest>) {
        self.shapes.push_back(shape);
    }
}

impl DecodeStrategy<u32> for ScriptedDecoder {
    fn output_formats(&self) -> &[OutputFormatInfo] {
        &self.formats
    }

    fn prepare(&mut self, _: &InputSample) -> anyhow::Result<Option<ReconnectRequest>> {
        Ok(self.shapes.pop_front().flatten())
    }

    fn transform(&mut self, unit: &InputSample, output: &mut MediaSample<u32>) -> anyhow::Result<()> {
        let index = self.transforms;
        self.transforms += 1;
        if self.failing_transform == Some(index) {
            return Err(anyhow!("corrupted unit"));
        }

        if let Some(frame) = output.frame_mut() {
            let luma = unit.data.first().copied().unwrap_or_default();
            frame.fill(luma, 0x80, 0x80)?;
        }

        Ok(())
    }

    fn output_size(&self) -> Option<OutputSize> {
        self.output_size
    }

    fn is_interlaced(&self) -> bool {
        self.interlaced
    }

    fn on_hardware_connect(&mut self) -> anyhow::Result<()> {
        if self.hardware_support {
            Ok(())
        } else {
            Err(anyhow!("hardware decoding not supported for this stream"))
        }
    }
}
