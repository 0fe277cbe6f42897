// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-unit entry point of the transform stage.
//!
//! The [`TransformDriver`] is what the host pipeline talks to. It takes care of the connection
//! handshake with the downstream stage, then for every incoming unit:
//!
//! 1. asks the [`DecodeStrategy`] for the output shape of the unit,
//! 2. renegotiates the output through the [`FormatNegotiator`] if that shape changed,
//! 3. acquires an output buffer from the [`DeliveryBufferProvider`],
//! 4. lets the [`DecodeStrategy`] fill it,
//! 5. delivers it to the [`Downstream`] stage.
//!
//! All of these steps run under a single lock, so a reconnection can never interleave with the
//! acquisition of a buffer for another unit.

use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use bytes::Bytes;

use crate::delivery::AllocatorProperties;
use crate::delivery::DeliveryBufferProvider;
use crate::delivery::RejectionPolicy;
use crate::media_type::MediaType;
use crate::media_type::OutputFormatInfo;
use crate::negotiator::ConnectionMode;
use crate::negotiator::ConnectionSession;
use crate::negotiator::FormatNegotiator;
use crate::negotiator::OutputNegotiation;
use crate::negotiator::ReconnectRequest;
use crate::negotiator::Reconnection;
use crate::sample::MediaSample;
use crate::surface_pool::DeviceBinding;
use crate::surface_pool::SurfaceDevice;
use crate::validate_geometry;
use crate::Error;
use crate::ReferenceTime;
use crate::Result;
use crate::VideoDimensions;

/// The stage output units are delivered to.
pub trait Downstream<S>: OutputNegotiation {
    /// Whether the stage can consume hardware decode surfaces directly.
    fn accepts_hardware_surfaces(&self) -> bool {
        false
    }

    /// Asks the allocator of the stage for buffers matching `requested`, and returns what it
    /// actually agreed to.
    fn set_allocator_properties(
        &mut self,
        requested: &AllocatorProperties,
    ) -> anyhow::Result<AllocatorProperties>;

    fn deliver(&mut self, sample: MediaSample<S>) -> anyhow::Result<()>;
}

/// One compressed or raw unit pushed by the upstream stage.
#[derive(Clone, Debug, Default)]
pub struct InputSample {
    pub data: Bytes,
    pub time: Option<(ReferenceTime, ReferenceTime)>,
    pub discontinuity: bool,
    pub sync_point: bool,
}

impl InputSample {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn with_time(mut self, start: ReferenceTime, stop: ReferenceTime) -> Self {
        self.time = Some((start, stop));
        self
    }
}

/// Output geometry of a decoder that pads its pictures.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OutputSize {
    pub dimensions: VideoDimensions,
    pub real_width: i32,
    pub real_height: i32,
}

/// The decoder plugged into the transform stage.
///
/// `S` is the surface type of the [`SurfaceDevice`] in use.
pub trait DecodeStrategy<S> {
    /// Output formats the decoder can produce, in order of preference.
    fn output_formats(&self) -> &[OutputFormatInfo];

    /// Processes `unit` up to the point where the output shape is known.
    ///
    /// Returns `None` if the unit does not produce a picture.
    fn prepare(&mut self, unit: &InputSample) -> anyhow::Result<Option<ReconnectRequest>>;

    /// Writes the picture of `unit` into `output`.
    fn transform(&mut self, unit: &InputSample, output: &mut MediaSample<S>) -> anyhow::Result<()>;

    /// Output geometry, if it differs from the input one.
    fn output_size(&self) -> Option<OutputSize> {
        None
    }

    fn is_interlaced(&self) -> bool {
        false
    }

    /// Flags advertised in the control field of the output types.
    fn video_info_control_flags(&self) -> u32 {
        0
    }

    /// Called when the downstream stage agreed to receive hardware surfaces. Returning an error
    /// makes the connection fall back to software frames.
    fn on_hardware_connect(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransformConfig {
    /// Number of software output frames requested from the downstream allocator.
    pub buffer_count: usize,
    pub rejection_policy: RejectionPolicy,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            buffer_count: 1,
            rejection_policy: Default::default(),
        }
    }
}

/// What became of a unit passed to [`TransformDriver::receive`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnitOutcome {
    Delivered,
    /// The decoder consumed the unit without producing a picture.
    NoOutput,
}

struct DriverState<S, H, D: SurfaceDevice> {
    session: ConnectionSession,
    negotiator: FormatNegotiator,
    provider: DeliveryBufferProvider<D>,
    strategy: S,
    downstream: H,
    connected: bool,
    delivered_units: u64,
    dropped_units: u64,
}

impl<S, H, D> DriverState<S, H, D>
where
    D: SurfaceDevice,
    S: DecodeStrategy<D::Surface>,
    H: Downstream<D::Surface>,
{
    fn check_output_type(&self, media_type: &MediaType) -> Result<()> {
        if !self
            .strategy
            .output_formats()
            .iter()
            .any(|format| format.subtype == media_type.subtype)
        {
            return Err(Error::UnsupportedFormat(media_type.subtype));
        }

        let dimensions = media_type.dimensions()?;
        validate_geometry(dimensions.width(), dimensions.height())
    }

    fn try_connect_hardware(&mut self, binding: DeviceBinding<D>) -> bool {
        if !self.downstream.accepts_hardware_surfaces() {
            log::info!("downstream does not accept hardware surfaces");
            return false;
        }

        if let Err(e) = self.strategy.on_hardware_connect() {
            log::warn!("decoder refused hardware connection: {e:#}");
            return false;
        }

        match self.provider.connect_hardware(&mut self.session, binding) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("cannot set up hardware surfaces, using software frames: {e}");
                false
            }
        }
    }

    fn process(&mut self, unit: &InputSample) -> Result<UnitOutcome> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        let Some(request) = self.strategy.prepare(unit)? else {
            return Ok(UnitOutcome::NoOutput);
        };

        let mut sample = self.provider.get_delivery_buffer(
            &mut self.negotiator,
            &mut self.session,
            &request,
            &mut self.downstream,
        )?;

        if let Some((start, stop)) = unit.time {
            sample.set_time(start, stop);
        }
        sample.set_discontinuity(unit.discontinuity);

        // The type announced by a sample that never reaches the downstream stage moves on to the
        // next one.
        let announced = sample.media_type().cloned();
        let result = match self.strategy.transform(unit, &mut sample) {
            Ok(()) => self.downstream.deliver(sample).map_err(Error::Downstream),
            Err(e) => Err(Error::from(e)),
        };
        if let Err(e) = result {
            if announced.is_some() {
                self.session.set_pending_type(announced);
            }
            return Err(e);
        }

        Ok(UnitOutcome::Delivered)
    }
}

/// Drives a [`DecodeStrategy`] between the upstream and [`Downstream`] stages.
pub struct TransformDriver<S, H, D: SurfaceDevice> {
    state: Mutex<DriverState<S, H, D>>,
}

impl<S, H, D> TransformDriver<S, H, D>
where
    D: SurfaceDevice,
    S: DecodeStrategy<D::Surface>,
    H: Downstream<D::Surface>,
{
    pub fn new(strategy: S, downstream: H, config: TransformConfig) -> Self {
        Self {
            state: Mutex::new(DriverState {
                session: ConnectionSession::new(),
                negotiator: FormatNegotiator::new(),
                provider: DeliveryBufferProvider::new(
                    config.buffer_count,
                    config.rejection_policy,
                ),
                strategy,
                downstream,
                connected: false,
                delivered_units: 0,
                dropped_units: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DriverState<S, H, D>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the type of the upstream connection.
    pub fn set_input_type(&self, media_type: &MediaType) -> Result<()> {
        let dimensions = media_type.dimensions()?;
        self.lock().session.set_input_dimensions(dimensions);

        log::debug!(
            "input connected as {}x{} ({}:{})",
            dimensions.width(),
            dimensions.height(),
            dimensions.aspect_x(),
            dimensions.aspect_y()
        );

        Ok(())
    }

    /// Candidate output type at `position`, in the order of preference of the decoder.
    pub fn output_type(&self, position: usize) -> Option<MediaType> {
        let state = self.lock();
        let format = state.strategy.output_formats().get(position)?;

        let (dimensions, real_size) = match state.strategy.output_size() {
            Some(size) => (size.dimensions, (size.real_width, size.real_height)),
            None => (state.session.output_dimensions(), (0, 0)),
        };
        if !dimensions.is_valid() {
            return None;
        }

        let mut media_type = MediaType::new(format.subtype, dimensions.normalized());
        (media_type.real_width, media_type.real_height) = real_size;
        media_type.avg_time_per_frame = state.session.avg_time_per_frame();
        media_type.interlaced = state.strategy.is_interlaced();
        media_type.control_flags = state.strategy.video_info_control_flags();

        Some(media_type)
    }

    /// Checks whether the output can be connected with `media_type`.
    pub fn check_output_type(&self, media_type: &MediaType) -> Result<()> {
        self.lock().check_output_type(media_type)
    }

    /// Checks whether `input` can be transformed into `output`.
    pub fn check_transform(&self, input: &MediaType, output: &MediaType) -> Result<()> {
        input.dimensions()?;
        self.check_output_type(output)
    }

    /// Records the type the output is connected with.
    pub fn set_output_type(&self, media_type: &MediaType) -> Result<()> {
        let mut state = self.lock();
        state.check_output_type(media_type)?;
        state.session.set_output_type(media_type.clone())
    }

    /// Agrees on the buffer requirements with the allocator of the downstream stage.
    pub fn decide_buffer_size(&self) -> Result<AllocatorProperties> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.session.output_type().is_none() {
            return Err(Error::NotConnected);
        }

        let requested = state.provider.decide_buffer_size(&state.session)?;
        let actual = state
            .downstream
            .set_allocator_properties(&requested)
            .map_err(Error::Downstream)?;

        if actual.buffers < requested.buffers || actual.buffer_size < requested.buffer_size {
            return Err(Error::AllocationFailure(format!(
                "downstream allocator provides {} buffers of {} bytes, {} of {} required",
                actual.buffers, actual.buffer_size, requested.buffers, requested.buffer_size
            )));
        }

        state.provider.set_buffer_count(actual.buffers);
        Ok(actual)
    }

    /// Completes the output connection and selects its mode.
    ///
    /// The connection runs in hardware mode if `binding` is provided, the downstream stage
    /// accepts hardware surfaces, the decoder agrees and the surfaces could be created. It runs
    /// in software mode otherwise. The mode then stays the same until
    /// [`TransformDriver::disconnect`].
    pub fn complete_connect(&self, binding: Option<DeviceBinding<D>>) -> Result<ConnectionMode> {
        let mut state = self.lock();
        if state.session.output_type().is_none() {
            return Err(Error::NotConnected);
        }

        let hardware = match binding {
            Some(binding) => state.try_connect_hardware(binding),
            None => false,
        };
        if !hardware {
            let state = &mut *state;
            state.provider.connect_software(&mut state.session)?;
        }
        state.connected = true;

        let mode = state.session.mode();
        let dimensions = state.session.output_dimensions();
        log::info!(
            "output connected in {:?} mode, {}x{}",
            mode,
            dimensions.width(),
            dimensions.height()
        );

        Ok(mode)
    }

    /// Processes one unit from the upstream stage.
    ///
    /// Errors only affect the current unit: the connection stays usable for the next ones.
    pub fn receive(&self, unit: &InputSample) -> Result<UnitOutcome> {
        let mut state = self.lock();

        match state.process(unit) {
            Ok(outcome) => {
                if outcome == UnitOutcome::Delivered {
                    state.delivered_units += 1;
                }
                Ok(outcome)
            }
            Err(e) => {
                state.dropped_units += 1;
                log::warn!("dropping unit: {e}");
                Err(e)
            }
        }
    }

    /// Renegotiates the output without a unit to deliver, e.g. when a change of shape is detected
    /// ahead of the next picture. The new type is announced on the next delivered sample.
    pub fn reconnect_output(&self, request: &ReconnectRequest) -> Result<Reconnection> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if !state.connected {
            return Err(Error::NotConnected);
        }

        let request = request.clone().send_sample(false);
        let (reconnection, _) = state.provider.reconnect_output(
            &mut state.negotiator,
            &mut state.session,
            &request,
            &mut state.downstream,
        )?;

        Ok(reconnection)
    }

    /// Releases the hardware surfaces after the device got lost.
    pub fn on_device_lost(&self) {
        log::warn!("hardware device lost, releasing surfaces");
        self.lock().provider.on_device_lost();
    }

    /// Recreates the hardware surfaces after a device loss.
    pub fn recover_device(&self) -> Result<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.provider.recover_device(&state.session)
    }

    /// Tears the connection down and releases every buffer.
    pub fn disconnect(&self) {
        let mut state = self.lock();
        state.provider.disconnect();
        state.session.reset();
        state.connected = false;
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn mode(&self) -> ConnectionMode {
        self.lock().session.mode()
    }

    pub fn input_dimensions(&self) -> VideoDimensions {
        self.lock().session.input_dimensions()
    }

    pub fn output_dimensions(&self) -> VideoDimensions {
        self.lock().session.output_dimensions()
    }

    pub fn delivered_units(&self) -> u64 {
        self.lock().delivered_units
    }

    /// Number of units that failed to be delivered.
    pub fn dropped_units(&self) -> u64 {
        self.lock().dropped_units
    }

    pub fn num_reconnections(&self) -> u64 {
        self.lock().negotiator.num_reconnections()
    }

    /// Runs `f` on the downstream stage, under the lock.
    pub fn with_downstream<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        f(&mut self.lock().downstream)
    }

    /// Runs `f` on the decoder, under the lock.
    pub fn with_strategy<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.lock().strategy)
    }
}
