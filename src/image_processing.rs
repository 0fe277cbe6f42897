// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Conversion of decoded frames into the packed layouts expected by downstream stages.

use crate::frame_buffer::PlanarFrameBuffer;
use crate::media_type::Subtype;
use crate::Error;
use crate::Result;

/// Copies `height` lines of `width` bytes from `src` to `dst`, honouring the pitch of each.
fn copy_plane(
    src: &[u8],
    src_pitch: usize,
    dst: &mut [u8],
    dst_pitch: usize,
    width: usize,
    height: usize,
) {
    let src_lines = src.chunks(src_pitch).map(|line| &line[..width]);
    let dst_lines = dst.chunks_mut(dst_pitch).map(|line| &mut line[..width]);

    for (src_line, dst_line) in src_lines.zip(dst_lines).take(height) {
        dst_line.copy_from_slice(src_line);
    }
}

/// Interleaves the `u` and `v` planes into a single UV plane.
fn interleave_uv(
    u: &[u8],
    v: &[u8],
    src_pitch: usize,
    dst: &mut [u8],
    dst_pitch: usize,
    width: usize,
    height: usize,
) {
    let src_lines = u
        .chunks(src_pitch)
        .zip(v.chunks(src_pitch))
        .map(|(u, v)| (&u[..width], &v[..width]));
    let dst_lines = dst.chunks_mut(dst_pitch);

    for ((u_line, v_line), dst_line) in src_lines.zip(dst_lines).take(height) {
        for (dst_pair, (u, v)) in dst_line
            .chunks_exact_mut(2)
            .zip(u_line.iter().zip(v_line))
        {
            dst_pair[0] = *u;
            dst_pair[1] = *v;
        }
    }
}

/// Size of the buffer required by [`copy_sample_buffer`] for a `height` lines tall picture with a
/// luma stride of `dst_stride`.
pub fn packed_size(dst_stride: usize, height: usize) -> usize {
    dst_stride * height + dst_stride * (height / 2)
}

/// Writes `src` into the packed buffer `dst` using the layout of `subtype`.
///
/// `dst_stride` is the luma row stride of `dst`. The chroma stride is half of it for the planar
/// layouts and equal to it for NV12.
pub fn copy_sample_buffer(
    dst: &mut [u8],
    dst_stride: usize,
    subtype: Subtype,
    src: &PlanarFrameBuffer,
) -> Result<()> {
    let [y, u, v] = src
        .planes()
        .ok_or(Error::InvalidArgument("source frame holds no picture"))?;

    let width = src.width() as usize;
    let height = src.height() as usize;
    let (chroma_width, chroma_height) = (width / 2, height / 2);

    if dst_stride < width {
        return Err(Error::InvalidArgument("destination stride is narrower than the picture"));
    }
    if dst.len() < packed_size(dst_stride, height) {
        return Err(Error::InvalidArgument("destination buffer is too small"));
    }

    let (pitch_y, pitch_c) = (src.pitch_y(), src.pitch_c());
    let (dst_y, dst_c) = dst.split_at_mut(dst_stride * height);

    copy_plane(y, pitch_y, dst_y, dst_stride, width, height);

    match subtype {
        Subtype::I420 | Subtype::Yv12 => {
            let dst_c_stride = dst_stride / 2;
            let (first, second) = dst_c.split_at_mut(dst_c_stride * chroma_height);
            let (first_src, second_src) = match subtype {
                Subtype::Yv12 => (v, u),
                _ => (u, v),
            };

            copy_plane(first_src, pitch_c, first, dst_c_stride, chroma_width, chroma_height);
            copy_plane(second_src, pitch_c, second, dst_c_stride, chroma_width, chroma_height);
        }
        Subtype::Nv12 => {
            interleave_uv(u, v, pitch_c, dst_c, dst_stride, chroma_width, chroma_height);
        }
    }

    Ok(())
}
