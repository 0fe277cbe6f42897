// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Buffer, surface and output-format management for a video decode transform stage.
//!
//! This crate provides the substrate a decoder plugs into when it runs as a transform stage of a
//! streaming pipeline:
//!
//! * [`frame_buffer::PlanarFrameBuffer`], a 4:2:0 planar picture carved from a single aligned
//!   allocation, which can either own its memory or be a zero-copy view onto another buffer.
//! * [`surface_pool::SurfacePool`], a fixed-size pool of hardware decode surfaces created against
//!   an externally supplied [`surface_pool::SurfaceDevice`].
//! * [`negotiator::FormatNegotiator`], which decides for every decoded unit whether the output
//!   connection must be renegotiated with the downstream stage.
//! * [`delivery::DeliveryBufferProvider`], which hands out output buffers from the software or
//!   hardware pool depending on the mode the connection was established in.
//! * [`transform::TransformDriver`], the per-unit entry point that strings all of the above
//!   together under a single lock around a [`transform::DecodeStrategy`].

pub mod backend;
pub mod delivery;
pub mod frame_buffer;
pub mod frame_pool;
pub mod image_processing;
pub mod media_type;
pub mod negotiator;
pub mod sample;
pub mod surface_pool;
pub mod transform;
pub mod utils;

#[cfg(feature = "vaapi")]
pub use libva;

use crate::media_type::Subtype;
use crate::utils::gcd;

/// Presentation time in 100ns units.
pub type ReferenceTime = i64;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid geometry {width}x{height}: dimensions must be positive and even")]
    InvalidGeometry { width: i32, height: i32 },
    #[error("allocation failure: {0}")]
    AllocationFailure(String),
    #[error("downstream stage rejected the proposed output format")]
    NegotiationRejected,
    #[error("hardware device has been lost")]
    DeviceLost,
    #[error("output is not connected")]
    NotConnected,
    #[error("unsupported output subtype {0}")]
    UnsupportedFormat(Subtype),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("downstream stage failed: {0:#}")]
    Downstream(anyhow::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Returns an error unless `width` and `height` describe a 4:2:0 picture, i.e. are both positive
/// and even.
pub fn validate_geometry(width: i32, height: i32) -> Result<()> {
    if width <= 0 || height <= 0 || width & 1 != 0 || height & 1 != 0 {
        return Err(Error::InvalidGeometry { width, height });
    }

    Ok(())
}

/// Geometry and display aspect ratio of a video stream.
///
/// Values of this type are never updated in place: a change of shape produces a new value that
/// replaces the old one.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct VideoDimensions {
    width: i32,
    height: i32,
    aspect_x: i32,
    aspect_y: i32,
}

impl VideoDimensions {
    pub const fn new(width: i32, height: i32, aspect_x: i32, aspect_y: i32) -> Self {
        Self {
            width,
            height,
            aspect_x,
            aspect_y,
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn aspect_x(&self) -> i32 {
        self.aspect_x
    }

    pub fn aspect_y(&self) -> i32 {
        self.aspect_y
    }

    pub fn aspect(&self) -> (i32, i32) {
        (self.aspect_x, self.aspect_y)
    }

    /// Whether the geometry can back a 4:2:0 picture.
    pub fn is_valid(&self) -> bool {
        validate_geometry(self.width, self.height).is_ok()
    }

    /// Returns these dimensions with an unset (`0:0`) or partially set aspect ratio replaced by the
    /// square-pixel ratio of the picture, and any set ratio reduced to lowest terms.
    pub fn normalized(self) -> Self {
        let (x, y) = if self.aspect_x > 0 && self.aspect_y > 0 {
            (self.aspect_x, self.aspect_y)
        } else {
            (self.width, self.height)
        };

        let divisor = gcd(x, y);
        if divisor <= 0 {
            return Self {
                aspect_x: 0,
                aspect_y: 0,
                ..self
            };
        }

        Self {
            aspect_x: x / divisor,
            aspect_y: y / divisor,
            ..self
        }
    }

    /// Returns new dimensions with the same aspect ratio but a different picture size.
    pub fn with_size(self, width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            ..self
        }
    }
}

impl From<(i32, i32)> for VideoDimensions {
    fn from((width, height): (i32, i32)) -> Self {
        Self::new(width, height, 0, 0)
    }
}
