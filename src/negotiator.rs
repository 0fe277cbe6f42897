// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Output format renegotiation.
//!
//! Every decoded unit comes with the output shape the decoder wants. The [`FormatNegotiator`]
//! compares it with the shape of the current output connection, held in a [`ConnectionSession`],
//! and proposes a new format to the downstream stage when they differ.

use crate::media_type::MediaType;
use crate::validate_geometry;
use crate::Error;
use crate::ReferenceTime;
use crate::Result;
use crate::VideoDimensions;

/// How output buffers are provided for the lifetime of a connection.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Output frames are [`PlanarFrameBuffer`](crate::frame_buffer::PlanarFrameBuffer)s.
    #[default]
    Software,
    /// Output frames are hardware decode surfaces.
    Hardware,
}

/// Access to the format negotiation mechanism of the downstream stage.
pub trait OutputNegotiation {
    /// Asks the downstream stage whether it can switch to `proposed`. Returns `true` if it did.
    fn propose_type(&mut self, proposed: &MediaType) -> bool;
}

/// Output shape requested by the decoder for a unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectRequest {
    pub width: i32,
    pub height: i32,
    pub aspect_x: i32,
    pub aspect_y: i32,
    pub avg_time_per_frame: ReferenceTime,
    pub interlaced: bool,
    /// Unpadded width, if the decoder pads the picture. 0 otherwise.
    pub real_width: i32,
    /// Unpadded height, if the decoder pads the picture. 0 otherwise.
    pub real_height: i32,
    /// Whether the buffer for the unit that triggered a reconnection is acquired as part of it.
    pub send_sample: bool,
    /// Renegotiate even if the shape did not change.
    pub force: bool,
}

impl ReconnectRequest {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            aspect_x: 0,
            aspect_y: 0,
            avg_time_per_frame: 0,
            interlaced: false,
            real_width: 0,
            real_height: 0,
            send_sample: true,
            force: false,
        }
    }

    pub fn aspect(mut self, aspect_x: i32, aspect_y: i32) -> Self {
        self.aspect_x = aspect_x;
        self.aspect_y = aspect_y;
        self
    }

    pub fn avg_time_per_frame(mut self, avg_time_per_frame: ReferenceTime) -> Self {
        self.avg_time_per_frame = avg_time_per_frame;
        self
    }

    pub fn interlaced(mut self, interlaced: bool) -> Self {
        self.interlaced = interlaced;
        self
    }

    pub fn real_size(mut self, real_width: i32, real_height: i32) -> Self {
        self.real_width = real_width;
        self.real_height = real_height;
        self
    }

    pub fn send_sample(mut self, send_sample: bool) -> Self {
        self.send_sample = send_sample;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Requested shape, with the aspect ratio normalized.
    pub fn dimensions(&self) -> VideoDimensions {
        VideoDimensions::new(self.width, self.height, self.aspect_x, self.aspect_y).normalized()
    }
}

/// State of one output connection.
#[derive(Clone, Debug, Default)]
pub struct ConnectionSession {
    input_dimensions: VideoDimensions,
    output_dimensions: VideoDimensions,
    output_type: Option<MediaType>,
    interlaced: bool,
    avg_time_per_frame: ReferenceTime,
    mode: ConnectionMode,
    /// Type negotiated by a reconnection that has not been announced on a sample yet.
    pending_type: Option<MediaType>,
}

impl ConnectionSession {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn input_dimensions(&self) -> VideoDimensions {
        self.input_dimensions
    }

    /// Records the shape of the upstream connection. Output dimensions start out identical.
    pub fn set_input_dimensions(&mut self, dimensions: VideoDimensions) {
        self.input_dimensions = dimensions;
        self.output_dimensions = dimensions;
    }

    pub fn output_dimensions(&self) -> VideoDimensions {
        self.output_dimensions
    }

    pub fn output_type(&self) -> Option<&MediaType> {
        self.output_type.as_ref()
    }

    /// Records the type the output is connected with.
    pub fn set_output_type(&mut self, media_type: MediaType) -> Result<()> {
        let dimensions = media_type.dimensions()?;

        self.output_dimensions = dimensions;
        self.interlaced = media_type.interlaced;
        self.avg_time_per_frame = media_type.avg_time_per_frame;
        self.output_type = Some(media_type);

        Ok(())
    }

    pub fn is_interlaced(&self) -> bool {
        self.interlaced
    }

    pub fn avg_time_per_frame(&self) -> ReferenceTime {
        self.avg_time_per_frame
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ConnectionMode) {
        self.mode = mode;
    }

    pub fn take_pending_type(&mut self) -> Option<MediaType> {
        self.pending_type.take()
    }

    pub fn set_pending_type(&mut self, media_type: Option<MediaType>) {
        self.pending_type = media_type;
    }

    /// Forgets everything about the connection.
    pub fn reset(&mut self) {
        *self = Default::default();
    }
}

/// Result of [`FormatNegotiator::reconnect_output`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reconnection {
    /// The current output format still fits.
    Unchanged,
    /// The downstream stage accepted this new format.
    Reconnected(MediaType),
}

/// Decides when the output needs to be renegotiated, and carries out the renegotiation.
#[derive(Debug, Default)]
pub struct FormatNegotiator {
    reconnections: u64,
    rejections: u64,
}

impl FormatNegotiator {
    pub fn new() -> Self {
        Default::default()
    }

    /// Whether `request` cannot be served by the current output format of `session`.
    pub fn needs_reconnect(&self, session: &ConnectionSession, request: &ReconnectRequest) -> bool {
        request.force
            || request.dimensions() != session.output_dimensions()
            || request.interlaced != session.is_interlaced()
    }

    /// Renegotiates the output format with `peer` if `request` requires it.
    ///
    /// On success `session` describes the new output. If `peer` rejects the new format, `session`
    /// is left untouched and [`Error::NegotiationRejected`] is returned.
    pub fn reconnect_output<N: OutputNegotiation + ?Sized>(
        &mut self,
        session: &mut ConnectionSession,
        request: &ReconnectRequest,
        peer: &mut N,
    ) -> Result<Reconnection> {
        validate_geometry(request.width, request.height)?;

        if !self.needs_reconnect(session, request) {
            return Ok(Reconnection::Unchanged);
        }

        let current = session.output_type().ok_or(Error::NotConnected)?;
        let dimensions = request.dimensions();
        let proposed = current.with_geometry(
            dimensions,
            (request.real_width, request.real_height),
            request.avg_time_per_frame,
            request.interlaced,
        );

        log::info!(
            "proposing output {}x{} ({}:{}){}{}, was {}x{} ({}:{})",
            dimensions.width(),
            dimensions.height(),
            dimensions.aspect_x(),
            dimensions.aspect_y(),
            if request.interlaced { " interlaced" } else { "" },
            if request.force { " (forced)" } else { "" },
            session.output_dimensions().width(),
            session.output_dimensions().height(),
            session.output_dimensions().aspect_x(),
            session.output_dimensions().aspect_y(),
        );

        if !peer.propose_type(&proposed) {
            self.rejections += 1;
            log::warn!(
                "downstream rejected output {}x{}",
                dimensions.width(),
                dimensions.height()
            );
            return Err(Error::NegotiationRejected);
        }

        session.set_output_type(proposed.clone())?;
        self.reconnections += 1;

        Ok(Reconnection::Reconnected(proposed))
    }

    /// Number of reconnections accepted by the downstream stage so far.
    pub fn num_reconnections(&self) -> u64 {
        self.reconnections
    }

    /// Number of reconnections rejected by the downstream stage so far.
    pub fn num_rejections(&self) -> u64 {
        self.rejections
    }
}
