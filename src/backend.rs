// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Implementations of [`SurfaceDevice`](crate::surface_pool::SurfaceDevice) for the supported
//! hardware acceleration APIs.

#[cfg(test)]
pub(crate) mod dummy;
#[cfg(feature = "vaapi")]
pub mod vaapi;
