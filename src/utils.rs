// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Utility functions used by several parts of this crate.
//!
//! This module is for anything that doesn't fit into the other top-level modules. Try not to add
//! new code here unless it really doesn't belong anywhere else.

/// Row alignment, in bytes, of every plane of a [`PlanarFrameBuffer`].
///
/// [`PlanarFrameBuffer`]: crate::frame_buffer::PlanarFrameBuffer
pub const PITCH_ALIGNMENT: usize = 32;

/// Rounds `value` up to the next multiple of `alignment`, which must be a power of two.
pub const fn align_up(value: usize, alignment: usize) -> usize {
    (value + (alignment - 1)) & !(alignment - 1)
}

/// Number of bytes of one row of a plane `width` bytes wide.
pub const fn row_bytes(width: usize) -> usize {
    align_up(width, PITCH_ALIGNMENT)
}

/// Greatest common divisor of `a` and `b`, ignoring signs. Returns 0 if both are 0.
pub fn gcd(a: i32, b: i32) -> i32 {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }

    a as i32
}
