// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Descriptions of the video formats exchanged with the upstream and downstream stages.

use std::fmt;

use crate::utils::row_bytes;
use crate::validate_geometry;
use crate::Error;
use crate::ReferenceTime;
use crate::Result;
use crate::VideoDimensions;

/// Pixel layouts this crate can output.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Subtype {
    /// Planar 4:2:0, Y then U then V.
    I420,
    /// Planar 4:2:0, Y then V then U.
    Yv12,
    /// Y plane followed by an interleaved UV plane. Also the layout of hardware decode surfaces.
    Nv12,
}

impl Subtype {
    pub const fn fourcc(&self) -> [u8; 4] {
        match self {
            Subtype::I420 => *b"I420",
            Subtype::Yv12 => *b"YV12",
            Subtype::Nv12 => *b"NV12",
        }
    }

    /// The FourCC as a little-endian integer, as used for the compression field of bitmap headers.
    pub const fn fourcc_u32(&self) -> u32 {
        u32::from_le_bytes(self.fourcc())
    }

    pub fn from_fourcc(fourcc: [u8; 4]) -> Option<Self> {
        match &fourcc {
            b"I420" | b"IYUV" => Some(Subtype::I420),
            b"YV12" => Some(Subtype::Yv12),
            b"NV12" => Some(Subtype::Nv12),
            _ => None,
        }
    }
}

impl fmt::Display for Subtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fourcc = self.fourcc();
        write!(f, "{}", String::from_utf8_lossy(&fourcc))
    }
}

/// One output format a decoder is able to produce.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OutputFormatInfo {
    pub subtype: Subtype,
    pub planes: u16,
    pub bit_count: u16,
    pub compression: u32,
}

impl OutputFormatInfo {
    pub const I420: Self = Self::new(Subtype::I420);
    pub const YV12: Self = Self::new(Subtype::Yv12);
    pub const NV12: Self = Self::new(Subtype::Nv12);

    pub const fn new(subtype: Subtype) -> Self {
        Self {
            subtype,
            planes: match subtype {
                Subtype::Nv12 => 2,
                Subtype::I420 | Subtype::Yv12 => 3,
            },
            bit_count: 12,
            compression: subtype.fourcc_u32(),
        }
    }
}

/// Full description of a video format as proposed to, or accepted by, another stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaType {
    pub subtype: Subtype,
    pub dimensions: VideoDimensions,
    /// Visible width when the picture is padded, 0 if the whole picture is visible.
    pub real_width: i32,
    /// Visible height when the picture is padded, 0 if the whole picture is visible.
    pub real_height: i32,
    pub avg_time_per_frame: ReferenceTime,
    pub interlaced: bool,
    pub control_flags: u32,
    /// Luma row stride imposed by the downstream stage, if any.
    pub stride: Option<usize>,
}

impl MediaType {
    pub fn new(subtype: Subtype, dimensions: VideoDimensions) -> Self {
        Self {
            subtype,
            dimensions,
            real_width: 0,
            real_height: 0,
            avg_time_per_frame: 0,
            interlaced: false,
            control_flags: 0,
            stride: None,
        }
    }

    /// Extracts the stream dimensions, with the aspect ratio normalized.
    pub fn dimensions(&self) -> Result<VideoDimensions> {
        let (width, height) = (self.dimensions.width(), self.dimensions.height());
        if width <= 0 || height <= 0 {
            return Err(Error::InvalidGeometry { width, height });
        }

        Ok(self.dimensions.normalized())
    }

    /// Visible part of the picture.
    pub fn source_rect(&self) -> (i32, i32) {
        let width = if self.real_width > 0 {
            self.real_width
        } else {
            self.dimensions.width()
        };
        let height = if self.real_height > 0 {
            self.real_height
        } else {
            self.dimensions.height()
        };

        (width, height)
    }

    /// Luma row stride of a packed buffer of this type.
    pub fn stride(&self) -> usize {
        self.stride
            .unwrap_or_else(|| row_bytes(self.dimensions.width().max(0) as usize))
    }

    /// Size of one packed picture of this type, in bytes.
    pub fn sample_size(&self) -> Result<usize> {
        validate_geometry(self.dimensions.width(), self.dimensions.height())?;

        let height = self.dimensions.height() as usize;
        Ok(self.stride() * height * 3 / 2)
    }

    /// Returns a copy of this type describing a stream of different shape. Any stride imposed by
    /// the downstream stage is dropped since it applied to the previous geometry.
    pub fn with_geometry(
        &self,
        dimensions: VideoDimensions,
        (real_width, real_height): (i32, i32),
        avg_time_per_frame: ReferenceTime,
        interlaced: bool,
    ) -> Self {
        Self {
            dimensions,
            real_width,
            real_height,
            avg_time_per_frame: if avg_time_per_frame > 0 {
                avg_time_per_frame
            } else {
                self.avg_time_per_frame
            },
            interlaced,
            stride: None,
            ..self.clone()
        }
    }
}
