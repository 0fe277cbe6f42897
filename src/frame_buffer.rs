// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Planar 4:2:0 picture storage.
//!
//! A [`PlanarFrameBuffer`] keeps its three planes in a single allocation aligned to
//! [`BUFFER_ALIGNMENT`] bytes, laid out as Y, then U, then V. Every plane row is padded to a
//! multiple of [`PITCH_ALIGNMENT`] bytes.
//!
//! A buffer either owns its allocation or is a reference view onto the allocation of another
//! buffer, created with [`PlanarFrameBuffer::copy_reference_to`]. Views keep the allocation alive
//! on their own, so the buffer they were created from may be freed or reallocated at any time.

use std::alloc;
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;

use enumn::N;

use crate::media_type::Subtype;
use crate::utils::row_bytes;
use crate::utils::PITCH_ALIGNMENT;
use crate::validate_geometry;
use crate::Error;
use crate::ReferenceTime;
use crate::Result;

/// Alignment of the start of the Y plane.
pub const BUFFER_ALIGNMENT: usize = PITCH_ALIGNMENT;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Plane {
    Y = 0,
    U = 1,
    V = 2,
}

/// Order in which the fields of an interlaced picture are to be displayed.
#[derive(N, Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum FieldOrder {
    #[default]
    Progressive = 0,
    TopFieldFirst = 1,
    BottomFieldFirst = 2,
}

/// Per-picture flags.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct FrameFlags(u32);

impl FrameFlags {
    const FIELD_ORDER_MASK: u32 = 0x3;

    pub const TOP_FIELD_FIRST: Self = Self(FieldOrder::TopFieldFirst as u32);
    pub const BOTTOM_FIELD_FIRST: Self = Self(FieldOrder::BottomFieldFirst as u32);
    pub const REPEAT_FIRST_FIELD: Self = Self(1 << 2);
    pub const KEY_FRAME: Self = Self(1 << 3);
    pub const DISCONTINUITY: Self = Self(1 << 4);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn field_order(&self) -> FieldOrder {
        FieldOrder::n(self.0 & Self::FIELD_ORDER_MASK).unwrap_or_default()
    }
}

impl std::ops::BitOr for FrameFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// How a downstream deinterlacer should treat the picture.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DeinterlaceMode {
    /// Let the renderer decide.
    #[default]
    Auto,
    /// Picture was already deinterlaced, or is progressive.
    None,
    Weave,
    Blend,
    Bob,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DeinterlaceInfo {
    pub mode: DeinterlaceMode,
    /// Index of the field being output when a frame is split into two fields.
    pub field: u8,
}

/// Per-picture metadata, carried independently of the pixel storage.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameAttributes {
    pub aspect_x: i32,
    pub aspect_y: i32,
    pub start: ReferenceTime,
    pub stop: ReferenceTime,
    pub flags: FrameFlags,
    pub deinterlace: DeinterlaceInfo,
}

/// Pitches and plane sizes of a 4:2:0 picture of a given size.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaneLayout {
    pub pitch_y: usize,
    pub pitch_c: usize,
    pub height: usize,
}

impl PlaneLayout {
    pub fn new(width: i32, height: i32) -> Result<Self> {
        validate_geometry(width, height)?;

        let width = width as usize;
        Ok(Self {
            pitch_y: row_bytes(width),
            pitch_c: row_bytes(width / 2),
            height: height as usize,
        })
    }

    pub fn size_y(&self) -> usize {
        self.pitch_y * self.height
    }

    /// Size of each of the U and V planes.
    pub fn size_c(&self) -> usize {
        self.pitch_c * (self.height / 2)
    }

    pub fn total_size(&self) -> usize {
        self.size_y() + self.size_c() * 2
    }

    /// Offset of each plane from the start of the allocation.
    pub fn offsets(&self) -> [usize; 3] {
        [0, self.size_y(), self.size_y() + self.size_c()]
    }

    pub fn pitch(&self, plane: Plane) -> usize {
        match plane {
            Plane::Y => self.pitch_y,
            Plane::U | Plane::V => self.pitch_c,
        }
    }
}

/// One block of zero-initialized memory aligned to [`BUFFER_ALIGNMENT`].
struct AlignedAllocation {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the allocation is plain bytes exclusively owned by this object; shared access only ever
// hands out `&[u8]` and mutable access requires `&mut self`.
unsafe impl Send for AlignedAllocation {}
// SAFETY: see above.
unsafe impl Sync for AlignedAllocation {}

impl AlignedAllocation {
    fn new(size: usize) -> Option<Self> {
        if size == 0 {
            return None;
        }

        let layout = Layout::from_size_align(size, BUFFER_ALIGNMENT).ok()?;
        // SAFETY: `layout` has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };

        NonNull::new(ptr).map(|ptr| Self { ptr, layout })
    }

    fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` points to `layout.size()` initialized bytes that live as long as `self`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl Drop for AlignedAllocation {
    fn drop(&mut self) {
        // SAFETY: `ptr` was returned by `alloc_zeroed` with this very layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

/// Backing memory of a [`PlanarFrameBuffer`].
#[derive(Default)]
enum Storage {
    #[default]
    Empty,
    /// The buffer allocated this memory and may write to it as long as no view is alive.
    Owned(Arc<AlignedAllocation>),
    /// The buffer is a read-only view onto memory allocated by another buffer.
    Borrowed(Arc<AlignedAllocation>),
}

impl Storage {
    fn allocation(&self) -> Option<&Arc<AlignedAllocation>> {
        match self {
            Storage::Empty => None,
            Storage::Owned(allocation) | Storage::Borrowed(allocation) => Some(allocation),
        }
    }
}

/// A decoded picture in planar 4:2:0 format.
#[derive(Default)]
pub struct PlanarFrameBuffer {
    width: i32,
    height: i32,
    layout: PlaneLayout,
    storage: Storage,
    subtype: Option<Subtype>,
    attributes: FrameAttributes,
}

impl std::fmt::Debug for PlanarFrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanarFrameBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pitch_y", &self.layout.pitch_y)
            .field("pitch_c", &self.layout.pitch_c)
            .field("owned", &self.is_owned())
            .field("subtype", &self.subtype)
            .field("attributes", &self.attributes)
            .finish()
    }
}

impl PlanarFrameBuffer {
    pub fn new() -> Self {
        Default::default()
    }

    /// Allocates storage for a `width`x`height` picture.
    ///
    /// If the buffer already owns storage of that exact size this is a no-op and the planes keep
    /// their content. On failure the buffer is left untouched.
    pub fn allocate(&mut self, width: i32, height: i32) -> Result<()> {
        let layout = PlaneLayout::new(width, height)?;

        if matches!(self.storage, Storage::Owned(_)) && width == self.width && height == self.height
        {
            return Ok(());
        }

        let allocation = AlignedAllocation::new(layout.total_size()).ok_or_else(|| {
            Error::AllocationFailure(format!(
                "cannot allocate {} bytes for a {width}x{height} frame",
                layout.total_size()
            ))
        })?;

        self.free();

        log::debug!(
            "allocated {}x{} frame buffer, pitches {}/{}, {} bytes",
            width,
            height,
            layout.pitch_y,
            layout.pitch_c,
            layout.total_size()
        );

        self.width = width;
        self.height = height;
        self.layout = layout;
        self.storage = Storage::Owned(Arc::new(allocation));
        self.subtype = Some(Subtype::I420);

        Ok(())
    }

    /// Releases the storage of the buffer and resets its geometry and subtype. Views only drop
    /// their reference; the memory they point to is left alone. Attributes are kept.
    pub fn free(&mut self) {
        self.storage = Storage::Empty;
        self.width = 0;
        self.height = 0;
        self.layout = Default::default();
        self.subtype = None;
    }

    /// Copies the metadata of `other` into `self`. Geometry and planes are not touched.
    pub fn copy_attributes_from(&mut self, other: &PlanarFrameBuffer) {
        self.attributes = other.attributes;
    }

    /// Turns `target` into a view onto the planes of `self`, without copying pixels.
    ///
    /// Whatever `target` held before is freed first.
    pub fn copy_reference_to(&self, target: &mut PlanarFrameBuffer) {
        target.free();

        target.width = self.width;
        target.height = self.height;
        target.layout = self.layout;
        target.storage = match self.storage.allocation() {
            Some(allocation) => Storage::Borrowed(Arc::clone(allocation)),
            None => Storage::Empty,
        };
        target.subtype = self.subtype;

        target.copy_attributes_from(self);
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn pitch_y(&self) -> usize {
        self.layout.pitch_y
    }

    pub fn pitch_c(&self) -> usize {
        self.layout.pitch_c
    }

    pub fn layout(&self) -> &PlaneLayout {
        &self.layout
    }

    pub fn subtype(&self) -> Option<Subtype> {
        self.subtype
    }

    pub fn is_allocated(&self) -> bool {
        !matches!(self.storage, Storage::Empty)
    }

    /// Whether the buffer allocated its own storage, as opposed to being a view.
    pub fn is_owned(&self) -> bool {
        matches!(self.storage, Storage::Owned(_))
    }

    /// Whether the buffer is a view onto the storage of another buffer.
    pub fn is_reference(&self) -> bool {
        matches!(self.storage, Storage::Borrowed(_))
    }

    /// Whether the buffer owns its storage while views onto it are still alive.
    pub fn is_shared(&self) -> bool {
        matches!(&self.storage, Storage::Owned(allocation) if Arc::strong_count(allocation) > 1)
    }

    pub fn attributes(&self) -> &FrameAttributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut FrameAttributes {
        &mut self.attributes
    }

    pub fn set_aspect(&mut self, aspect_x: i32, aspect_y: i32) {
        self.attributes.aspect_x = aspect_x;
        self.attributes.aspect_y = aspect_y;
    }

    pub fn set_time(&mut self, start: ReferenceTime, stop: ReferenceTime) {
        self.attributes.start = start;
        self.attributes.stop = stop;
    }

    /// Start address of each plane, or null pointers if the buffer holds no storage.
    pub fn plane_ptrs(&self) -> [*const u8; 3] {
        match self.storage.allocation() {
            Some(allocation) => {
                let base = allocation.as_ptr();
                // Offsets are within the allocation by construction of the layout.
                self.layout.offsets().map(|offset| base.wrapping_add(offset))
            }
            None => [std::ptr::null(); 3],
        }
    }

    /// Contents of `plane`, including row padding.
    pub fn plane(&self, plane: Plane) -> Option<&[u8]> {
        self.planes().map(|planes| planes[plane as usize])
    }

    pub fn planes(&self) -> Option<[&[u8]; 3]> {
        let data = self.storage.allocation()?.as_slice();
        let (y, chroma) = data.split_at(self.layout.size_y());
        let (u, v) = chroma.split_at(self.layout.size_c());

        Some([y, u, v])
    }

    /// Mutable access to the planes.
    ///
    /// Returns `None` if the buffer is a view, holds no storage, or if views onto its storage are
    /// still alive.
    pub fn planes_mut(&mut self) -> Option<[&mut [u8]; 3]> {
        let layout = self.layout;
        let data = match &mut self.storage {
            Storage::Owned(allocation) => Arc::get_mut(allocation)?.as_mut_slice(),
            Storage::Borrowed(_) | Storage::Empty => return None,
        };

        let (y, chroma) = data.split_at_mut(layout.size_y());
        let (u, v) = chroma.split_at_mut(layout.size_c());

        Some([y, u, v])
    }

    /// Fills every plane with a constant value. Useful to blank a picture before delivery.
    pub fn fill(&mut self, y: u8, u: u8, v: u8) -> Result<()> {
        let [plane_y, plane_u, plane_v] = self
            .planes_mut()
            .ok_or(Error::InvalidArgument("frame buffer is not writable"))?;

        plane_y.fill(y);
        plane_u.fill(u);
        plane_v.fill(v);

        Ok(())
    }
}
