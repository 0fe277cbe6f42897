// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Acquisition of output buffers.
//!
//! The [`DeliveryBufferProvider`] owns the software [`FramePool`] and, for connections running in
//! hardware mode, the [`SurfacePool`]. Which one buffers come from is decided once per connection
//! and recorded in the [`ConnectionSession`].

use crate::frame_buffer::PlaneLayout;
use crate::frame_buffer::BUFFER_ALIGNMENT;
use crate::frame_pool::FramePool;
use crate::negotiator::ConnectionMode;
use crate::negotiator::ConnectionSession;
use crate::negotiator::FormatNegotiator;
use crate::negotiator::OutputNegotiation;
use crate::negotiator::ReconnectRequest;
use crate::negotiator::Reconnection;
use crate::sample::MediaSample;
use crate::sample::SamplePayload;
use crate::surface_pool::DeviceBinding;
use crate::surface_pool::SurfaceDevice;
use crate::surface_pool::SurfacePool;
use crate::Error;
use crate::Result;
use crate::VideoDimensions;

/// Buffer requirements agreed on with the allocator of the downstream stage.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AllocatorProperties {
    pub buffers: usize,
    pub buffer_size: usize,
    pub alignment: usize,
    pub prefix: usize,
}

/// What to do when the downstream stage rejects a reconnection.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RejectionPolicy {
    /// Drop the unit that needed the reconnection and keep the connection as it is.
    #[default]
    DropUnit,
    /// Drop the unit and, if the connection runs in hardware mode, switch it to software mode for
    /// the rest of its lifetime.
    FallBackToSoftware,
}

fn same_size(a: VideoDimensions, b: VideoDimensions) -> bool {
    a.width() == b.width() && a.height() == b.height()
}

pub struct DeliveryBufferProvider<D: SurfaceDevice> {
    frames: FramePool,
    surfaces: Option<SurfacePool<D>>,
    buffer_count: usize,
    rejection_policy: RejectionPolicy,
    device_lost: bool,
}

impl<D: SurfaceDevice> DeliveryBufferProvider<D> {
    pub fn new(buffer_count: usize, rejection_policy: RejectionPolicy) -> Self {
        Self {
            frames: FramePool::new(),
            surfaces: None,
            buffer_count: buffer_count.max(1),
            rejection_policy,
            device_lost: false,
        }
    }

    /// Buffer requirements for the current output of `session`.
    pub fn decide_buffer_size(&self, session: &ConnectionSession) -> Result<AllocatorProperties> {
        let dimensions = session.output_dimensions();
        let layout = PlaneLayout::new(dimensions.width(), dimensions.height())?;

        Ok(AllocatorProperties {
            buffers: self.buffer_count,
            buffer_size: layout.total_size(),
            alignment: BUFFER_ALIGNMENT,
            prefix: 0,
        })
    }

    pub fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    pub fn set_buffer_count(&mut self, buffer_count: usize) {
        self.buffer_count = buffer_count.max(1);
    }

    /// Sets the connection up to hand out software frames.
    pub fn connect_software(&mut self, session: &mut ConnectionSession) -> Result<()> {
        self.surfaces = None;
        self.device_lost = false;

        let dimensions = session.output_dimensions();
        self.frames
            .resize(self.buffer_count, dimensions.width(), dimensions.height())?;
        session.set_mode(ConnectionMode::Software);

        Ok(())
    }

    /// Sets the connection up to hand out hardware surfaces created from `binding`.
    ///
    /// On failure the connection is left as it was.
    pub fn connect_hardware(
        &mut self,
        session: &mut ConnectionSession,
        binding: DeviceBinding<D>,
    ) -> Result<()> {
        let mut pool = SurfacePool::new(binding, session.output_dimensions());
        pool.alloc()?;

        self.frames.clear();
        self.surfaces = Some(pool);
        self.device_lost = false;
        session.set_mode(ConnectionMode::Hardware);

        Ok(())
    }

    /// Releases every buffer of the connection.
    pub fn disconnect(&mut self) {
        self.frames.clear();
        self.surfaces = None;
        self.device_lost = false;
    }

    /// Releases the hardware surfaces after the device got lost. Units fail with
    /// [`Error::DeviceLost`] until [`DeliveryBufferProvider::recover_device`] succeeds.
    pub fn on_device_lost(&mut self) {
        if let Some(pool) = self.surfaces.as_mut() {
            pool.free();
        }
        self.device_lost = true;
    }

    /// Recreates the hardware surfaces after a device loss.
    pub fn recover_device(&mut self, session: &ConnectionSession) -> Result<()> {
        let Some(pool) = self.surfaces.as_mut() else {
            self.device_lost = false;
            return Ok(());
        };

        pool.set_dimensions(session.output_dimensions());
        pool.alloc()?;
        self.device_lost = false;

        Ok(())
    }

    pub fn is_device_lost(&self) -> bool {
        self.device_lost
    }

    pub fn frame_pool(&self) -> &FramePool {
        &self.frames
    }

    pub fn surface_pool(&self) -> Option<&SurfacePool<D>> {
        self.surfaces.as_ref()
    }

    pub fn surface_pool_mut(&mut self) -> Option<&mut SurfacePool<D>> {
        self.surfaces.as_mut()
    }

    /// Renegotiates the output with `peer` if `request` requires it.
    ///
    /// When a reconnection takes place and `request.send_sample` is set, the buffer for the
    /// current unit is acquired right away and returned carrying the new type. Otherwise the new
    /// type is announced on the next buffer acquired.
    pub fn reconnect_output<N: OutputNegotiation + ?Sized>(
        &mut self,
        negotiator: &mut FormatNegotiator,
        session: &mut ConnectionSession,
        request: &ReconnectRequest,
        peer: &mut N,
    ) -> Result<(Reconnection, Option<MediaSample<D::Surface>>)> {
        let media_type = match negotiator.reconnect_output(session, request, peer) {
            Ok(Reconnection::Unchanged) => return Ok((Reconnection::Unchanged, None)),
            Ok(Reconnection::Reconnected(media_type)) => media_type,
            Err(Error::NegotiationRejected) => {
                self.apply_rejection_policy(session);
                return Err(Error::NegotiationRejected);
            }
            Err(e) => return Err(e),
        };

        session.set_pending_type(Some(media_type.clone()));
        if !request.send_sample {
            return Ok((Reconnection::Reconnected(media_type), None));
        }

        let sample = self.acquire(session)?;
        Ok((Reconnection::Reconnected(media_type), Some(sample)))
    }

    /// Gets an output buffer for a unit of the shape described by `request`, renegotiating the
    /// output first if needed.
    pub fn get_delivery_buffer<N: OutputNegotiation + ?Sized>(
        &mut self,
        negotiator: &mut FormatNegotiator,
        session: &mut ConnectionSession,
        request: &ReconnectRequest,
        peer: &mut N,
    ) -> Result<MediaSample<D::Surface>> {
        let request = ReconnectRequest {
            send_sample: true,
            ..request.clone()
        };

        match self.reconnect_output(negotiator, session, &request, peer)? {
            (_, Some(sample)) => Ok(sample),
            (_, None) => self.acquire(session),
        }
    }

    /// Gets an output buffer of the current output shape.
    pub fn acquire(&mut self, session: &mut ConnectionSession) -> Result<MediaSample<D::Surface>> {
        self.ensure_pool(session)?;

        let payload = match session.mode() {
            ConnectionMode::Software => {
                let frame = self.frames.alloc().ok_or_else(|| {
                    Error::AllocationFailure("no free frame in the output pool".into())
                })?;
                SamplePayload::Software(frame)
            }
            ConnectionMode::Hardware => {
                let pool = self.surfaces.as_mut().ok_or(Error::DeviceLost)?;
                let surface = pool.take_free_surface().ok_or_else(|| {
                    Error::AllocationFailure("no free hardware surface".into())
                })?;
                SamplePayload::Hardware(surface)
            }
        };

        let mut sample = MediaSample::new(payload);
        sample.set_sync_point(true);
        sample.set_discontinuity(false);
        sample.set_media_type(session.take_pending_type());

        Ok(sample)
    }

    /// Makes sure the pool in use matches the current output geometry.
    fn ensure_pool(&mut self, session: &ConnectionSession) -> Result<()> {
        let dimensions = session.output_dimensions();

        match session.mode() {
            ConnectionMode::Software => {
                if !self.frames.is_allocated()
                    || self.frames.size() != (dimensions.width(), dimensions.height())
                {
                    self.frames.resize(
                        self.buffer_count,
                        dimensions.width(),
                        dimensions.height(),
                    )?;
                }
            }
            ConnectionMode::Hardware => {
                if self.device_lost {
                    return Err(Error::DeviceLost);
                }

                let pool = self.surfaces.as_mut().ok_or(Error::DeviceLost)?;
                if !pool.is_allocated() || !same_size(pool.dimensions(), dimensions) {
                    pool.set_dimensions(dimensions);
                    pool.alloc()?;
                }
            }
        }

        Ok(())
    }

    fn apply_rejection_policy(&mut self, session: &mut ConnectionSession) {
        if self.rejection_policy != RejectionPolicy::FallBackToSoftware
            || session.mode() != ConnectionMode::Hardware
        {
            return;
        }

        log::warn!("output renegotiation rejected, disabling hardware surfaces for this connection");
        self.surfaces = None;
        self.device_lost = false;
        session.set_mode(ConnectionMode::Software);

        // On failure `ensure_pool` retries on the next acquisition.
        let dimensions = session.output_dimensions();
        if let Err(e) = self
            .frames
            .resize(self.buffer_count, dimensions.width(), dimensions.height())
        {
            log::error!("cannot allocate software frames: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyDevice;
    use crate::backend::dummy::ScriptedPeer;
    use crate::media_type::MediaType;
    use crate::media_type::Subtype;
    use crate::sample::SampleAllocator;

    fn connected_session(width: i32, height: i32) -> ConnectionSession {
        let mut session = ConnectionSession::new();
        let dimensions = VideoDimensions::new(width, height, 0, 0);
        session.set_input_dimensions(dimensions);
        session
            .set_output_type(MediaType::new(Subtype::I420, dimensions))
            .unwrap();
        session
    }

    #[test]
    fn buffer_size() {
        let session = connected_session(720, 480);
        let provider = DeliveryBufferProvider::<DummyDevice>::new(3, Default::default());

        assert_eq!(
            provider.decide_buffer_size(&session).unwrap(),
            AllocatorProperties {
                buffers: 3,
                buffer_size: 537600,
                alignment: 32,
                prefix: 0,
            }
        );
    }

    #[test]
    fn software_buffers() {
        let mut session = connected_session(320, 240);
        let mut negotiator = FormatNegotiator::new();
        let mut peer = ScriptedPeer::default();
        let mut provider = DeliveryBufferProvider::<DummyDevice>::new(2, Default::default());
        provider.connect_software(&mut session).unwrap();

        let request = ReconnectRequest::new(320, 240);
        let a = provider
            .get_delivery_buffer(&mut negotiator, &mut session, &request, &mut peer)
            .unwrap();
        let b = provider
            .get_delivery_buffer(&mut negotiator, &mut session, &request, &mut peer)
            .unwrap();

        assert_eq!(a.allocator(), SampleAllocator::Software);
        assert!(a.is_sync_point());
        assert!(!a.is_discontinuity());
        assert!(a.media_type().is_none());
        assert_eq!(b.frame().unwrap().width(), 320);
        assert!(peer.proposals().is_empty());

        assert!(matches!(
            provider.get_delivery_buffer(&mut negotiator, &mut session, &request, &mut peer),
            Err(Error::AllocationFailure(_))
        ));

        drop(a);
        provider
            .get_delivery_buffer(&mut negotiator, &mut session, &request, &mut peer)
            .unwrap();
    }

    #[test]
    fn reconnection_resizes_frames_and_tags_sample() {
        let mut session = connected_session(320, 240);
        let mut negotiator = FormatNegotiator::new();
        let mut peer = ScriptedPeer::default();
        let mut provider = DeliveryBufferProvider::<DummyDevice>::new(1, Default::default());
        provider.connect_software(&mut session).unwrap();

        let sample = provider
            .get_delivery_buffer(
                &mut negotiator,
                &mut session,
                &ReconnectRequest::new(640, 480),
                &mut peer,
            )
            .unwrap();

        let frame = sample.frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (640, 480));
        assert_eq!(
            sample.media_type().unwrap().dimensions,
            VideoDimensions::new(640, 480, 4, 3)
        );
        assert_eq!(provider.frame_pool().size(), (640, 480));
        drop(sample);

        let sample = provider.acquire(&mut session).unwrap();
        assert!(sample.media_type().is_none());
    }

    #[test]
    fn deferred_announcement() {
        let mut session = connected_session(320, 240);
        let mut negotiator = FormatNegotiator::new();
        let mut peer = ScriptedPeer::default();
        let mut provider = DeliveryBufferProvider::<DummyDevice>::new(1, Default::default());
        provider.connect_software(&mut session).unwrap();

        let request = ReconnectRequest::new(352, 288).send_sample(false);
        let (reconnection, sample) = provider
            .reconnect_output(&mut negotiator, &mut session, &request, &mut peer)
            .unwrap();

        assert!(matches!(reconnection, Reconnection::Reconnected(_)));
        assert!(sample.is_none());
        assert_eq!(provider.frame_pool().num_free_frames(), 1);

        let sample = provider.acquire(&mut session).unwrap();
        assert_eq!(sample.media_type().unwrap().dimensions.width(), 352);
        assert_eq!(sample.frame().unwrap().width(), 352);
    }

    #[test]
    fn hardware_buffers() {
        let mut session = connected_session(1920, 1088);
        let mut negotiator = FormatNegotiator::new();
        let mut peer = ScriptedPeer::default();
        let mut provider = DeliveryBufferProvider::new(1, Default::default());
        provider
            .connect_hardware(&mut session, DeviceBinding::new(DummyDevice::default(), 4))
            .unwrap();
        assert_eq!(session.mode(), ConnectionMode::Hardware);
        assert!(!provider.frame_pool().is_allocated());

        let request = ReconnectRequest::new(1920, 1088);
        let samples: Vec<_> = (0..4)
            .map(|_| {
                provider
                    .get_delivery_buffer(&mut negotiator, &mut session, &request, &mut peer)
                    .unwrap()
            })
            .collect();

        let ids: Vec<_> = samples.iter().filter_map(|s| s.surface_id()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert!(samples.iter().all(|s| s.allocator() == SampleAllocator::Hardware));
        assert!(samples[0].frame().is_none());

        assert!(matches!(
            provider.acquire(&mut session),
            Err(Error::AllocationFailure(_))
        ));
        drop(samples);

        // A geometry change reallocates the whole pool.
        let sample = provider
            .get_delivery_buffer(
                &mut negotiator,
                &mut session,
                &ReconnectRequest::new(1280, 720),
                &mut peer,
            )
            .unwrap();
        let pool = provider.surface_pool().unwrap();
        assert_eq!(pool.device().created(), 8);
        assert_eq!(pool.device().last_size(), Some((1280, 720)));
        assert_eq!(sample.surface_id(), Some(0));
    }

    #[test]
    fn failed_hardware_connect_keeps_software() {
        let mut session = connected_session(1920, 1088);
        let mut provider = DeliveryBufferProvider::new(1, Default::default());
        provider.connect_software(&mut session).unwrap();

        let mut device = DummyDevice::default();
        device.fail_next(crate::surface_pool::SurfaceDeviceError::OutOfResources);
        assert!(provider
            .connect_hardware(&mut session, DeviceBinding::new(device, 4))
            .is_err());

        assert_eq!(session.mode(), ConnectionMode::Software);
        assert!(provider.surface_pool().is_none());
        assert!(provider.acquire(&mut session).is_ok());
    }

    #[test]
    fn device_loss() {
        let mut session = connected_session(1280, 720);
        let mut provider = DeliveryBufferProvider::new(1, Default::default());
        provider
            .connect_hardware(&mut session, DeviceBinding::new(DummyDevice::default(), 2))
            .unwrap();

        let held = provider.acquire(&mut session).unwrap();
        provider.on_device_lost();
        assert!(matches!(
            provider.acquire(&mut session),
            Err(Error::DeviceLost)
        ));
        drop(held);

        provider.recover_device(&session).unwrap();
        assert_eq!(provider.surface_pool().unwrap().num_free_surfaces(), 2);
        assert!(provider.acquire(&mut session).is_ok());
    }

    #[test]
    fn rejection_policies() {
        for (policy, expected_mode) in [
            (RejectionPolicy::DropUnit, ConnectionMode::Hardware),
            (RejectionPolicy::FallBackToSoftware, ConnectionMode::Software),
        ] {
            let mut session = connected_session(1280, 720);
            let mut negotiator = FormatNegotiator::new();
            let mut peer = ScriptedPeer::rejecting(1);
            let mut provider = DeliveryBufferProvider::new(1, policy);
            provider
                .connect_hardware(&mut session, DeviceBinding::new(DummyDevice::default(), 2))
                .unwrap();

            assert!(matches!(
                provider.get_delivery_buffer(
                    &mut negotiator,
                    &mut session,
                    &ReconnectRequest::new(1920, 1080),
                    &mut peer,
                ),
                Err(Error::NegotiationRejected)
            ));
            assert_eq!(session.mode(), expected_mode, "{policy:?}");

            let sample = provider
                .get_delivery_buffer(
                    &mut negotiator,
                    &mut session,
                    &ReconnectRequest::new(1280, 720),
                    &mut peer,
                )
                .unwrap();
            assert_eq!(
                sample.allocator() == SampleAllocator::Hardware,
                expected_mode == ConnectionMode::Hardware
            );
        }
    }
}
