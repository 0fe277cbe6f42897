// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! VAAPI surface device.

use std::rc::Rc;

use anyhow::anyhow;
use libva::constants::VA_RT_FORMAT_YUV420;
use libva::Display;
use libva::Surface;

use crate::surface_pool::SurfaceDevice;
use crate::surface_pool::SurfaceDeviceError;

/// Creates decode surfaces with self-managed memory from a VA display.
pub struct VaapiSurfaceDevice {
    display: Rc<Display>,
    rt_format: u32,
    usage_hint: Option<libva::UsageHint>,
}

impl VaapiSurfaceDevice {
    /// Creates a device producing 4:2:0 surfaces from `display`.
    pub fn new(display: Rc<Display>) -> Self {
        Self {
            display,
            rt_format: VA_RT_FORMAT_YUV420,
            usage_hint: None,
        }
    }

    pub fn with_usage_hint(mut self, usage_hint: libva::UsageHint) -> Self {
        self.usage_hint = Some(usage_hint);
        self
    }

    pub fn display(&self) -> &Rc<Display> {
        &self.display
    }
}

impl SurfaceDevice for VaapiSurfaceDevice {
    type Surface = Surface<()>;

    fn create_surfaces(
        &mut self,
        width: u32,
        height: u32,
        count: usize,
    ) -> Result<Vec<Self::Surface>, SurfaceDeviceError> {
        self.display
            .create_surfaces(
                self.rt_format,
                // Let the hardware decide the best internal format.
                None,
                width,
                height,
                self.usage_hint,
                vec![(); count],
            )
            .map_err(|e| SurfaceDeviceError::Other(anyhow!(e)))
    }
}
